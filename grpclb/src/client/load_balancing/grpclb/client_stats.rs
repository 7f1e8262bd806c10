/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

//! Per-call load accounting reported back to the balancer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

use crate::client::load_balancing::CallOutcome;

/// Counters shared between the pickers, which record calls from any thread,
/// and the balancer call, which periodically harvests them.
#[derive(Debug, Default)]
pub struct ClientStats {
    num_calls_started: AtomicI64,
    num_calls_finished: AtomicI64,
    num_calls_finished_with_client_failed_to_send: AtomicI64,
    num_calls_finished_known_received: AtomicI64,
    drop_token_counts: Mutex<BTreeMap<String, i64>>,
}

/// The counters accumulated since the previous harvest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStatsSnapshot {
    pub num_calls_started: i64,
    pub num_calls_finished: i64,
    pub num_calls_finished_with_client_failed_to_send: i64,
    pub num_calls_finished_known_received: i64,
    /// Dropped call counts by load balance token.
    pub calls_finished_with_drop: BTreeMap<String, i64>,
}

impl ClientStatsSnapshot {
    pub fn is_zero(&self) -> bool {
        self.num_calls_started == 0
            && self.num_calls_finished == 0
            && self.num_calls_finished_with_client_failed_to_send == 0
            && self.num_calls_finished_known_received == 0
            && self.calls_finished_with_drop.values().all(|&n| n == 0)
    }
}

impl ClientStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_call_started(&self) {
        self.num_calls_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_call_finished(&self, outcome: &CallOutcome) {
        self.num_calls_finished.fetch_add(1, Ordering::Relaxed);
        if outcome.client_failed_to_send {
            self.num_calls_finished_with_client_failed_to_send
                .fetch_add(1, Ordering::Relaxed);
        }
        if outcome.known_received {
            self.num_calls_finished_known_received
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a call the client dropped on the balancer's instruction. A
    /// dropped call counts as both started and finished.
    pub fn add_call_dropped(&self, token: &str) {
        self.num_calls_started.fetch_add(1, Ordering::Relaxed);
        self.num_calls_finished.fetch_add(1, Ordering::Relaxed);
        *self
            .drop_token_counts
            .lock()
            .entry(token.to_string())
            .or_default() += 1;
    }

    /// Returns everything recorded since the last harvest and starts counting
    /// from zero.
    pub fn harvest(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            num_calls_started: self.num_calls_started.swap(0, Ordering::Relaxed),
            num_calls_finished: self.num_calls_finished.swap(0, Ordering::Relaxed),
            num_calls_finished_with_client_failed_to_send: self
                .num_calls_finished_with_client_failed_to_send
                .swap(0, Ordering::Relaxed),
            num_calls_finished_known_received: self
                .num_calls_finished_known_received
                .swap(0, Ordering::Relaxed),
            calls_finished_with_drop: std::mem::take(&mut *self.drop_token_counts.lock()),
        }
    }
}
