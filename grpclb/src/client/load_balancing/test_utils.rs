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

use std::error::Error;
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tonic::Status;
use tonic::metadata::MetadataMap;

use crate::client::ConnectivityState;
use crate::client::balancer::{
    BalancerChannel, BalancerRecvStream, BalancerSendStream, BalancerStreamItem,
};
use crate::client::channel_args::ChannelArgs;
use crate::client::load_balancing::grpclb::{
    BalancerRequest, BalancerResponse, decode_request, encode_response,
};
use crate::client::load_balancing::{
    ChannelController, LbPolicy, LbPolicyBuilder, LbPolicyOptions, LbState, Pick, PickRequest,
    PickResult, Picker, QueuingPicker, Subchannel, SubchannelState, WorkScheduler,
};
use crate::client::name_resolution::{ResolverUpdate, ServerAddress, ServerAddressList};
use crate::client::service_config::{LbConfig, ParsedJsonLbConfig};
use crate::rt::{BoxFuture, BoxedTaskHandle, Runtime, Sleep};

pub(crate) const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn new_request() -> PickRequest {
    PickRequest {
        method: "/test.Service/Method".to_string(),
        metadata: MetadataMap::new(),
    }
}

// A test subchannel that reports connect calls as events, if given a sender.
#[derive(Debug)]
pub(crate) struct TestSubchannel {
    address: ServerAddress,
    tx_events: Option<mpsc::UnboundedSender<TestEvent>>,
}

impl TestSubchannel {
    pub(crate) fn new(address: ServerAddress) -> Self {
        Self {
            address,
            tx_events: None,
        }
    }
}

impl Subchannel for TestSubchannel {
    fn address(&self) -> ServerAddress {
        self.address.clone()
    }

    fn connect(&self) {
        if let Some(tx) = &self.tx_events {
            tx.send(TestEvent::Connect(self.address.clone())).unwrap();
        }
    }
}

pub(crate) enum TestEvent {
    NewSubchannel(Arc<dyn Subchannel>),
    UpdatePicker(LbState),
    RequestResolution,
    Connect(ServerAddress),
    CreateBalancerChannel(Arc<FakeBalancerChannel>),
    ScheduleWork,
    ChildBuilt(&'static str),
    ChildResolverUpdate(ResolverUpdate),
    ChildResetBackoff,
    ChildExitIdle,
}

impl Debug for TestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewSubchannel(sc) => write!(f, "NewSubchannel({})", sc.address()),
            Self::UpdatePicker(state) => write!(f, "UpdatePicker({})", state.connectivity_state),
            Self::RequestResolution => write!(f, "RequestResolution"),
            Self::Connect(addr) => write!(f, "Connect({addr})"),
            Self::CreateBalancerChannel(ch) => write!(f, "CreateBalancerChannel({})", ch.target),
            Self::ScheduleWork => write!(f, "ScheduleWork"),
            Self::ChildBuilt(name) => write!(f, "ChildBuilt({name})"),
            Self::ChildResolverUpdate(update) => write!(f, "ChildResolverUpdate({update:?})"),
            Self::ChildResetBackoff => write!(f, "ChildResetBackoff"),
            Self::ChildExitIdle => write!(f, "ChildExitIdle"),
        }
    }
}

/// A test channel controller that forwards calls to a channel.  This allows
/// tests to verify when a channel controller is asked to create subchannels,
/// balancer channels or update the picker.
pub(crate) struct TestChannelController {
    pub(crate) tx_events: mpsc::UnboundedSender<TestEvent>,
    /// Balancer calls started on any balancer channel created here.
    pub(crate) tx_calls: mpsc::UnboundedSender<FakeBalancerCall>,
    /// When set, every balancer send waits for a permit.
    pub(crate) send_permits: Option<Arc<Semaphore>>,
}

impl ChannelController for TestChannelController {
    fn new_subchannel(&mut self, address: &ServerAddress) -> Arc<dyn Subchannel> {
        let subchannel: Arc<dyn Subchannel> = Arc::new(TestSubchannel {
            address: address.clone(),
            tx_events: Some(self.tx_events.clone()),
        });
        self.tx_events
            .send(TestEvent::NewSubchannel(subchannel.clone()))
            .unwrap();
        subchannel
    }

    fn update_picker(&mut self, update: LbState) {
        self.tx_events
            .send(TestEvent::UpdatePicker(update))
            .unwrap();
    }

    fn request_resolution(&mut self) {
        self.tx_events.send(TestEvent::RequestResolution).unwrap();
    }

    fn create_balancer_channel(
        &mut self,
        target: &str,
        args: &ChannelArgs,
    ) -> Arc<dyn BalancerChannel> {
        let channel = Arc::new(FakeBalancerChannel::new(
            target,
            args.clone(),
            self.tx_calls.clone(),
            self.send_permits.clone(),
        ));
        self.tx_events
            .send(TestEvent::CreateBalancerChannel(channel.clone()))
            .unwrap();
        channel
    }
}

pub(crate) struct TestWorkScheduler {
    pub(crate) tx_events: mpsc::UnboundedSender<TestEvent>,
}

impl WorkScheduler for TestWorkScheduler {
    fn schedule_work(&self) {
        // The receiver is gone once a test has finished with the policy.
        let _ = self.tx_events.send(TestEvent::ScheduleWork);
    }
}

/// A runtime whose sleeps only complete when the test fires them.
pub(crate) struct FakeRuntime {
    tx_sleeps: mpsc::UnboundedSender<FakeSleepHandle>,
}

impl FakeRuntime {
    pub(crate) fn new(tx_sleeps: mpsc::UnboundedSender<FakeSleepHandle>) -> Self {
        Self { tx_sleeps }
    }
}

impl Runtime for FakeRuntime {
    fn spawn(&self, task: BoxFuture<()>) -> BoxedTaskHandle {
        Box::new(tokio::spawn(task))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>> {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx_sleeps.send(FakeSleepHandle { duration, fire: tx });
        Box::pin(FakeSleep { rx: Some(rx) })
    }
}

/// The test's side of a sleep requested from [`FakeRuntime`].
#[derive(Debug)]
pub(crate) struct FakeSleepHandle {
    pub(crate) duration: Duration,
    fire: oneshot::Sender<()>,
}

impl FakeSleepHandle {
    pub(crate) fn fire(self) {
        let _ = self.fire.send(());
    }

    /// Resolves once the sleeping task has been dropped or aborted.
    pub(crate) async fn cancelled(&mut self) {
        self.fire.closed().await
    }
}

struct FakeSleep {
    rx: Option<oneshot::Receiver<()>>,
}

impl Future for FakeSleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Pending;
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(Ok(())) => {
                self.rx = None;
                Poll::Ready(())
            }
            // A handle dropped without firing never fires.
            Poll::Ready(Err(_)) => {
                self.rx = None;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Sleep for FakeSleep {}

/// A balancer channel that hands every call it starts to the test.
pub(crate) struct FakeBalancerChannel {
    pub(crate) target: String,
    pub(crate) args: ChannelArgs,
    resolver_updates: Mutex<Vec<(ServerAddressList, ChannelArgs)>>,
    state: watch::Sender<ConnectivityState>,
    tx_calls: mpsc::UnboundedSender<FakeBalancerCall>,
    send_permits: Option<Arc<Semaphore>>,
    reset_backoff_count: AtomicUsize,
}

impl FakeBalancerChannel {
    fn new(
        target: &str,
        args: ChannelArgs,
        tx_calls: mpsc::UnboundedSender<FakeBalancerCall>,
        send_permits: Option<Arc<Semaphore>>,
    ) -> Self {
        Self {
            target: target.to_string(),
            args,
            resolver_updates: Mutex::default(),
            state: watch::Sender::new(ConnectivityState::Idle),
            tx_calls,
            send_permits,
            reset_backoff_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_state(&self, state: ConnectivityState) {
        self.state.send_replace(state);
    }

    pub(crate) fn resolver_updates(&self) -> Vec<(ServerAddressList, ChannelArgs)> {
        self.resolver_updates.lock().clone()
    }

    pub(crate) fn reset_backoff_count(&self) -> usize {
        self.reset_backoff_count.load(Ordering::SeqCst)
    }
}

impl BalancerChannel for FakeBalancerChannel {
    fn target(&self) -> &str {
        &self.target
    }

    fn update_resolver_state(&self, addresses: ServerAddressList, args: ChannelArgs) {
        self.resolver_updates.lock().push((addresses, args));
    }

    fn start_call(
        &self,
        method: &str,
    ) -> (Box<dyn BalancerSendStream>, Box<dyn BalancerRecvStream>) {
        let (tx_requests, rx_requests) = mpsc::unbounded_channel();
        let (tx_responses, rx_responses) = mpsc::unbounded_channel();
        let _ = self.tx_calls.send(FakeBalancerCall {
            target: self.target.clone(),
            method: method.to_string(),
            rx_requests,
            tx_responses,
        });
        (
            Box::new(FakeSendStream {
                tx: tx_requests,
                permits: self.send_permits.clone(),
            }),
            Box::new(FakeRecvStream { rx: rx_responses }),
        )
    }

    fn check_connectivity_state(&self, _try_to_connect: bool) -> ConnectivityState {
        *self.state.borrow()
    }

    fn watch_connectivity_state(
        &self,
        last_observed: ConnectivityState,
    ) -> BoxFuture<ConnectivityState> {
        let mut rx = self.state.subscribe();
        Box::pin(async move {
            loop {
                let current = *rx.borrow_and_update();
                if current != last_observed {
                    return current;
                }
                if rx.changed().await.is_err() {
                    return ConnectivityState::Shutdown;
                }
            }
        })
    }

    fn reset_connect_backoff(&self) {
        self.reset_backoff_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// The balancer's side of a call started on a [`FakeBalancerChannel`].
pub(crate) struct FakeBalancerCall {
    pub(crate) target: String,
    pub(crate) method: String,
    rx_requests: mpsc::UnboundedReceiver<Bytes>,
    tx_responses: mpsc::UnboundedSender<BalancerStreamItem>,
}

impl FakeBalancerCall {
    /// Waits for the next request the client sent.
    pub(crate) async fn next_request(&mut self) -> BalancerRequest {
        let bytes = self.rx_requests.recv().await.expect("client stream closed");
        decode_request(bytes).unwrap()
    }

    pub(crate) fn try_next_request(&mut self) -> Option<BalancerRequest> {
        let bytes = self.rx_requests.try_recv().ok()?;
        Some(decode_request(bytes).unwrap())
    }

    pub(crate) fn send_headers(&self) {
        let mut metadata = MetadataMap::new();
        metadata.insert("x-balancer-zone", "test-zone".parse().unwrap());
        self.send_item(BalancerStreamItem::Headers(metadata));
    }

    pub(crate) fn send_response(&self, response: BalancerResponse) {
        self.send_raw(encode_response(&response));
    }

    pub(crate) fn send_raw(&self, bytes: Bytes) {
        self.send_item(BalancerStreamItem::Message(bytes));
    }

    pub(crate) fn finish(&self, status: Status) {
        self.send_item(BalancerStreamItem::Trailers(status));
    }

    fn send_item(&self, item: BalancerStreamItem) {
        self.tx_responses
            .send(item)
            .expect("balancer call was cancelled");
    }

    /// Resolves once the client has dropped its receive stream.
    pub(crate) async fn cancelled(&self) {
        self.tx_responses.closed().await
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.tx_responses.is_closed()
    }
}

struct FakeSendStream {
    tx: mpsc::UnboundedSender<Bytes>,
    permits: Option<Arc<Semaphore>>,
}

#[tonic::async_trait]
impl BalancerSendStream for FakeSendStream {
    async fn send(&mut self, msg: Bytes) -> Result<(), Status> {
        if let Some(permits) = &self.permits {
            permits
                .acquire()
                .await
                .map_err(|_| Status::unavailable("send gate closed"))?
                .forget();
        }
        self.tx
            .send(msg)
            .map_err(|_| Status::unavailable("test balancer went away"))
    }
}

struct FakeRecvStream {
    rx: mpsc::UnboundedReceiver<BalancerStreamItem>,
}

#[tonic::async_trait]
impl BalancerRecvStream for FakeRecvStream {
    async fn next(&mut self) -> BalancerStreamItem {
        self.rx.recv().await.unwrap_or_else(|| {
            BalancerStreamItem::Trailers(Status::unavailable("test balancer went away"))
        })
    }
}

/// Stands in for a real child policy. It reports every call as an event,
/// creates one subchannel per address and publishes a Ready round robin
/// picker over them.
/// Builds child policies that create one subchannel per address. By default
/// a child reports Ready as soon as it gets addresses.
pub(crate) struct MockChildPolicyBuilder {
    name: &'static str,
    tx_events: Option<mpsc::UnboundedSender<TestEvent>>,
    ready_on_update: bool,
}

impl MockChildPolicyBuilder {
    pub(crate) fn new(
        name: &'static str,
        tx_events: Option<mpsc::UnboundedSender<TestEvent>>,
    ) -> Self {
        Self {
            name,
            tx_events,
            ready_on_update: true,
        }
    }

    /// A child that stays Connecting until one of its subchannels reports
    /// Ready.
    pub(crate) fn connecting(
        name: &'static str,
        tx_events: Option<mpsc::UnboundedSender<TestEvent>>,
    ) -> Self {
        Self {
            name,
            tx_events,
            ready_on_update: false,
        }
    }
}

impl LbPolicyBuilder for MockChildPolicyBuilder {
    fn build(&self, _options: LbPolicyOptions) -> Box<dyn LbPolicy> {
        if let Some(tx) = &self.tx_events {
            tx.send(TestEvent::ChildBuilt(self.name)).unwrap();
        }
        Box::new(MockChildPolicy {
            tx_events: self.tx_events.clone(),
            ready_on_update: self.ready_on_update,
            subchannels: vec![],
        })
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn parse_config(
        &self,
        _config: &ParsedJsonLbConfig,
    ) -> Result<Option<LbConfig>, Box<dyn Error + Send + Sync>> {
        Ok(None)
    }
}

struct MockChildPolicy {
    tx_events: Option<mpsc::UnboundedSender<TestEvent>>,
    ready_on_update: bool,
    subchannels: Vec<Arc<dyn Subchannel>>,
}

impl MockChildPolicy {
    fn send(&self, event: TestEvent) {
        if let Some(tx) = &self.tx_events {
            tx.send(event).unwrap();
        }
    }

    fn publish_ready(&self, channel_controller: &mut dyn ChannelController) {
        channel_controller.update_picker(LbState {
            connectivity_state: ConnectivityState::Ready,
            picker: Arc::new(RoundRobinPicker {
                subchannels: self.subchannels.clone(),
                next: AtomicUsize::new(0),
            }),
        });
    }
}

impl LbPolicy for MockChildPolicy {
    fn resolver_update(
        &mut self,
        update: ResolverUpdate,
        _config: Option<&LbConfig>,
        channel_controller: &mut dyn ChannelController,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.send(TestEvent::ChildResolverUpdate(update.clone()));
        let addresses = update.addresses?;
        self.subchannels = addresses
            .iter()
            .map(|address| channel_controller.new_subchannel(address))
            .collect();
        if self.ready_on_update {
            self.publish_ready(channel_controller);
        } else {
            channel_controller.update_picker(LbState {
                connectivity_state: ConnectivityState::Connecting,
                picker: Arc::new(QueuingPicker {}),
            });
        }
        Ok(())
    }

    fn subchannel_update(
        &mut self,
        _subchannel: Arc<dyn Subchannel>,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    ) {
        match state.connectivity_state {
            ConnectivityState::TransientFailure => channel_controller.request_resolution(),
            ConnectivityState::Ready if !self.ready_on_update => {
                self.publish_ready(channel_controller)
            }
            _ => {}
        }
    }

    fn exit_idle(&mut self, _channel_controller: &mut dyn ChannelController) {
        self.send(TestEvent::ChildExitIdle);
    }

    fn work(&mut self, _channel_controller: &mut dyn ChannelController) {}

    fn reset_backoff(&mut self) {
        self.send(TestEvent::ChildResetBackoff);
    }
}

struct RoundRobinPicker {
    subchannels: Vec<Arc<dyn Subchannel>>,
    next: AtomicUsize,
}

impl Picker for RoundRobinPicker {
    fn pick(&self, _request: &PickRequest) -> PickResult {
        if self.subchannels.is_empty() {
            return PickResult::Fail(Status::unavailable("no addresses"));
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.subchannels.len();
        PickResult::Pick(Pick::new(self.subchannels[index].clone()))
    }
}
