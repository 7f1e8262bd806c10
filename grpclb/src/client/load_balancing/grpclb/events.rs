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

//! Hand-off of asynchronous completions into the policy.
//!
//! Background tasks never touch policy state. They push an event into the
//! inbox and schedule a `work()` call; the policy drains the inbox in arrival
//! order while it holds exclusive access to itself.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tonic::Status;
use tonic::metadata::MetadataMap;

use crate::client::ConnectivityState;
use crate::client::load_balancing::WorkScheduler;

/// Completions of a single balancer call.
#[derive(Debug)]
pub(super) enum BalancerCallEvent {
    InitialMetadata(MetadataMap),
    SendComplete(Result<(), Status>),
    Message(Bytes),
    Status(Status),
}

#[derive(Debug)]
pub(super) enum PolicyEvent {
    Call {
        call_id: u64,
        event: BalancerCallEvent,
    },
    LoadReportTimerFired {
        call_id: u64,
    },
    RetryTimerFired,
    FallbackTimerFired,
    BalancerConnectivityChanged(ConnectivityState),
}

#[derive(Debug, Default)]
pub(super) struct Inbox {
    events: Mutex<VecDeque<PolicyEvent>>,
}

impl Inbox {
    pub(super) fn drain(&self) -> Vec<PolicyEvent> {
        self.events.lock().drain(..).collect()
    }
}

/// A non-owning handle used by tasks to deliver events to the policy.
#[derive(Clone)]
pub(super) struct EventSink {
    inbox: Weak<Inbox>,
    work_scheduler: Arc<dyn WorkScheduler>,
}

impl EventSink {
    pub(super) fn new(inbox: &Arc<Inbox>, work_scheduler: Arc<dyn WorkScheduler>) -> Self {
        Self {
            inbox: Arc::downgrade(inbox),
            work_scheduler,
        }
    }

    /// Queues `event` for the next `work()` call. Returns false once the
    /// policy is gone, in which case the event is discarded.
    pub(super) fn post(&self, event: PolicyEvent) -> bool {
        let Some(inbox) = self.inbox.upgrade() else {
            return false;
        };
        inbox.events.lock().push_back(event);
        self.work_scheduler.schedule_work();
        true
    }
}
