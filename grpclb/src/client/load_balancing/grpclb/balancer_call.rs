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

//! One attempt of the `BalanceLoad` streaming call.
//!
//! A [`BalancerCall`] owns two runtime tasks. The send task writes queued
//! requests one at a time and reports each completion; the receive task
//! forwards headers, messages and the final status. Both report through the
//! policy's [`EventSink`], so all state below is only touched from the
//! policy's `work()`.
//!
//! Dropping a `BalancerCall` cancels it. The receive task then drops the
//! stream and posts a `CANCELLED` status, which the policy ignores because
//! the call is no longer current.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tonic::Status;
use tonic::metadata::MetadataMap;
use tracing::{debug, trace, warn};

use super::client_stats::ClientStats;
use super::codec::{self, BalancerResponse, LoadReportEncoder, Serverlist};
use super::error::CodecError;
use super::events::{BalancerCallEvent, EventSink, PolicyEvent};
use crate::client::balancer::{
    BALANCE_LOAD_METHOD, BalancerChannel, BalancerRecvStream, BalancerSendStream,
    BalancerStreamItem,
};
use crate::rt::{BoxedTaskHandle, Runtime, Sleep, Timer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CallPhase {
    Created,
    RequestSent,
    AwaitingInitialResponse,
    Streaming,
    Finished,
}

pub(super) struct BalancerCall {
    id: u64,
    phase: CallPhase,
    requests: mpsc::UnboundedSender<Bytes>,
    // Dropping the sender cancels the receive task.
    _cancel: oneshot::Sender<()>,
    send_task: BoxedTaskHandle,
    sink: EventSink,

    send_in_flight: bool,
    seen_initial_response: bool,
    seen_serverlist: bool,

    report_interval: Option<Duration>,
    client_stats: Option<Arc<ClientStats>>,
    load_report_timer: Timer,
    load_report_is_due: bool,
    encoder: LoadReportEncoder,
}

impl BalancerCall {
    /// Starts the call on `channel` and queues the initial request naming
    /// `service_name`.
    pub(super) fn start(
        id: u64,
        channel: &dyn BalancerChannel,
        service_name: &str,
        call_timeout: Option<Duration>,
        runtime: &Arc<dyn Runtime>,
        sink: EventSink,
    ) -> Self {
        let (send_stream, recv_stream) = channel.start_call(BALANCE_LOAD_METHOD);
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let deadline = call_timeout.map(|timeout| runtime.sleep(timeout));

        let send_task = runtime.spawn(Box::pin(send_loop(
            id,
            send_stream,
            requests_rx,
            sink.clone(),
        )));
        // The receive task ends by itself once cancelled, so its handle is
        // not kept.
        runtime.spawn(Box::pin(recv_loop(
            id,
            recv_stream,
            cancel_rx,
            deadline,
            sink.clone(),
        )));

        let mut call = BalancerCall {
            id,
            phase: CallPhase::Created,
            requests: requests_tx,
            _cancel: cancel_tx,
            send_task,
            sink,
            send_in_flight: false,
            seen_initial_response: false,
            seen_serverlist: false,
            report_interval: None,
            client_stats: None,
            load_report_timer: Timer::new(runtime.clone()),
            load_report_is_due: false,
            encoder: LoadReportEncoder::new(),
        };
        debug!(call_id = id, service_name, "sending initial balancer request");
        call.send(codec::encode_initial_request(service_name));
        call.phase = CallPhase::RequestSent;
        call
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    pub(super) fn seen_initial_response(&self) -> bool {
        self.seen_initial_response
    }

    pub(super) fn seen_serverlist(&self) -> bool {
        self.seen_serverlist
    }

    pub(super) fn client_stats(&self) -> Option<Arc<ClientStats>> {
        self.client_stats.clone()
    }

    fn send(&mut self, msg: Bytes) {
        self.send_in_flight = true;
        // Fails only once the send task has exited, in which case the call's
        // status is on its way.
        if self.requests.send(msg).is_err() {
            trace!(call_id = self.id, "send task already exited");
        }
    }

    pub(super) fn on_initial_metadata(&mut self, metadata: &MetadataMap) {
        trace!(
            call_id = self.id,
            headers = metadata.len(),
            "balancer call received headers"
        );
    }

    pub(super) fn on_send_complete(&mut self, result: Result<(), Status>) {
        self.send_in_flight = false;
        if let Err(status) = result {
            debug!(call_id = self.id, %status, "balancer call send failed");
            return;
        }
        if self.phase == CallPhase::RequestSent {
            self.phase = CallPhase::AwaitingInitialResponse;
        }
        if self.load_report_is_due {
            self.load_report_is_due = false;
            self.send_load_report();
        }
    }

    /// Processes one response. Returns the serverlist to apply, if the
    /// message carried one.
    pub(super) fn on_message(&mut self, bytes: Bytes) -> Result<Option<Serverlist>, CodecError> {
        let response = codec::decode_response(bytes)?;
        self.phase = CallPhase::Streaming;
        match response {
            BalancerResponse::Initial(initial) => {
                if self.seen_initial_response || self.seen_serverlist {
                    warn!(call_id = self.id, "ignoring unexpected initial response");
                    return Ok(None);
                }
                self.seen_initial_response = true;
                self.report_interval = initial.client_stats_report_interval;
                debug!(
                    call_id = self.id,
                    report_interval = ?self.report_interval,
                    "received initial balancer response"
                );
                Ok(None)
            }
            BalancerResponse::Serverlist(serverlist) => {
                self.seen_serverlist = true;
                debug!(
                    call_id = self.id,
                    servers = serverlist.servers.len(),
                    "received serverlist"
                );
                Ok(Some(serverlist))
            }
        }
    }

    pub(super) fn on_status(&mut self, status: &Status) {
        debug!(
            call_id = self.id,
            phase = ?self.phase,
            code = ?status.code(),
            message = status.message(),
            "balancer call finished"
        );
        self.phase = CallPhase::Finished;
        self.load_report_timer.cancel();
    }

    /// Starts load reporting if the balancer asked for it and it is not
    /// already running. Returns true if client stats were created.
    pub(super) fn maybe_start_load_reporting(&mut self) -> bool {
        if self.client_stats.is_some() {
            return false;
        }
        let Some(interval) = self.report_interval else {
            return false;
        };
        debug!(call_id = self.id, ?interval, "starting load reporting");
        self.client_stats = Some(Arc::new(ClientStats::new()));
        self.schedule_next_load_report(interval);
        true
    }

    fn schedule_next_load_report(&mut self, interval: Duration) {
        let sink = self.sink.clone();
        let call_id = self.id;
        self.load_report_timer.schedule(interval, move || {
            sink.post(PolicyEvent::LoadReportTimerFired { call_id });
        });
    }

    pub(super) fn on_load_report_timer(&mut self) {
        self.load_report_timer.fired();
        let Some(interval) = self.report_interval else {
            return;
        };
        if self.phase == CallPhase::Finished {
            return;
        }
        self.schedule_next_load_report(interval);
        if self.send_in_flight {
            // Sent from on_send_complete.
            self.load_report_is_due = true;
            return;
        }
        self.send_load_report();
    }

    fn send_load_report(&mut self) {
        let Some(stats) = &self.client_stats else {
            return;
        };
        let snapshot = stats.harvest();
        match self.encoder.encode(&snapshot) {
            Some(report) => {
                trace!(call_id = self.id, ?snapshot, "sending load report");
                self.send(report);
            }
            None => trace!(call_id = self.id, "skipping empty load report"),
        }
    }
}

impl Drop for BalancerCall {
    fn drop(&mut self) {
        if self.phase != CallPhase::Finished {
            debug!(call_id = self.id, "cancelling balancer call");
        }
        self.send_task.abort();
    }
}

async fn send_loop(
    call_id: u64,
    mut stream: Box<dyn BalancerSendStream>,
    mut requests: mpsc::UnboundedReceiver<Bytes>,
    sink: EventSink,
) {
    while let Some(msg) = requests.recv().await {
        let result = stream.send(msg).await;
        let failed = result.is_err();
        let event = PolicyEvent::Call {
            call_id,
            event: BalancerCallEvent::SendComplete(result),
        };
        if !sink.post(event) || failed {
            return;
        }
    }
}

async fn recv_loop(
    call_id: u64,
    mut stream: Box<dyn BalancerRecvStream>,
    mut cancel: oneshot::Receiver<()>,
    mut deadline: Option<Pin<Box<dyn Sleep>>>,
    sink: EventSink,
) {
    let status = loop {
        let expired = async {
            match deadline.as_mut() {
                Some(deadline) => deadline.await,
                None => std::future::pending().await,
            }
        };
        let item = tokio::select! {
            biased;
            _ = &mut cancel => break Status::cancelled("balancer call cancelled"),
            _ = expired => break Status::deadline_exceeded("balancer call deadline exceeded"),
            item = stream.next() => item,
        };
        let event = match item {
            BalancerStreamItem::Headers(metadata) => BalancerCallEvent::InitialMetadata(metadata),
            BalancerStreamItem::Message(msg) => BalancerCallEvent::Message(msg),
            BalancerStreamItem::Trailers(status) => break status,
        };
        if !sink.post(PolicyEvent::Call { call_id, event }) {
            return;
        }
    };
    drop(stream);
    sink.post(PolicyEvent::Call {
        call_id,
        event: BalancerCallEvent::Status(status),
    });
}
