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

//! The grpclb look-aside load balancing policy.
//!
//! The policy resolves nothing itself. It opens a secondary channel to the
//! balancers named by the resolver and keeps one `BalanceLoad` call open on
//! it. Serverlists pushed by the balancer become the addresses of a child
//! policy (round robin by default) which does the actual connection
//! management. Calls picked through the child carry the backend's load
//! balance token, and when the balancer asks for it their outcomes are
//! reported back periodically.
//!
//! Failed balancer calls are retried with exponential backoff. A call that
//! got as far as the initial response is restarted immediately instead.

use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tonic::Status;
use tracing::{debug, error, info, trace, warn};

use crate::client::ConnectivityState;
use crate::client::backoff::ExponentialBackoff;
use crate::client::balancer::BalancerChannel;
use crate::client::channel_args::{
    ARG_ADDRESS_IS_BACKEND_FROM_GRPCLB_LOAD_BALANCER, ARG_INHIBIT_HEALTH_CHECKING,
    ARG_LB_ADDRESSES, ARG_LB_POLICY_NAME, ARG_SERVER_URI, ChannelArgs,
};
use crate::client::load_balancing::{
    ChannelController, LbPolicy, LbPolicyBuilder, LbPolicyOptions, LbPolicyRegistry, LbState,
    Subchannel, SubchannelState, WorkScheduler,
};
use crate::client::name_resolution::{ResolverUpdate, Target};
use crate::client::service_config::{LbConfig, ParsedJsonLbConfig};
use crate::rt::{BoxedTaskHandle, Runtime, Timer};

mod balancer_call;
mod client_stats;
mod codec;
mod config;
mod error;
mod events;
mod helper;
mod picker;
mod serverlist;


use balancer_call::BalancerCall;
use events::{BalancerCallEvent, EventSink, Inbox, PolicyEvent};
use helper::{GrpclbHelper, wrap_child_state};

pub use client_stats::{ClientStats, ClientStatsSnapshot};
pub use codec::{
    BalancerRequest, BalancerResponse, InitialResponse, LoadReportEncoder, ServerEntry,
    Serverlist, decode_request, decode_response, encode_initial_request, encode_response,
};
pub use config::{
    ChildPolicySelection, DEFAULT_CHILD_POLICY, DEFAULT_FALLBACK_TIMEOUT, GrpclbConfig,
    GrpclbOptions,
};
pub use error::{CodecError, GrpclbError};
pub use picker::{DropSchedule, GrpclbPicker, LB_TOKEN_METADATA_KEY};
pub use serverlist::{LbToken, backend_addresses, is_server_valid};

pub static POLICY_NAME: &str = "grpclb";

/// Builds grpclb policies. Child policies are looked up in the registry the
/// builder was created with.
pub struct GrpclbBuilder {
    registry: Arc<LbPolicyRegistry>,
    options: GrpclbOptions,
    backoff: ExponentialBackoff,
}

impl GrpclbBuilder {
    pub fn new(registry: Arc<LbPolicyRegistry>) -> Self {
        Self {
            registry,
            options: GrpclbOptions::default(),
            backoff: ExponentialBackoff::default(),
        }
    }

    /// Replaces the default options. Fails if the backoff config is invalid.
    pub fn with_options(mut self, options: GrpclbOptions) -> Result<Self, &'static str> {
        self.backoff = ExponentialBackoff::new(options.backoff.clone())?;
        self.options = options;
        Ok(self)
    }
}

impl LbPolicyBuilder for GrpclbBuilder {
    fn build(&self, options: LbPolicyOptions) -> Box<dyn LbPolicy> {
        Box::new(GrpclbPolicy::new(
            self.registry.clone(),
            self.options.clone(),
            self.backoff.clone(),
            options,
        ))
    }

    fn name(&self) -> &'static str {
        POLICY_NAME
    }

    fn parse_config(
        &self,
        config: &ParsedJsonLbConfig,
    ) -> Result<Option<LbConfig>, Box<dyn Error + Send + Sync>> {
        let config = GrpclbConfig::parse(config, &self.registry)?;
        Ok(Some(LbConfig::new(config)))
    }
}

struct ChildPolicy {
    name: String,
    config: Option<LbConfig>,
    policy: Box<dyn LbPolicy>,
    /// The child's last unwrapped state.
    state: Option<LbState>,
}

impl ChildPolicy {
    fn connectivity_state(&self) -> ConnectivityState {
        self.state
            .as_ref()
            .map_or(ConnectivityState::Connecting, |s| s.connectivity_state)
    }
}

/// Which child a subchannel or update belongs to. A pending child replaces
/// the current one once it is ready, or as soon as the current one is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildKind {
    Current,
    Pending,
}

fn subchannel_key(subchannel: &Arc<dyn Subchannel>) -> usize {
    Arc::as_ptr(subchannel) as *const () as usize
}

pub struct GrpclbPolicy {
    registry: Arc<LbPolicyRegistry>,
    options: GrpclbOptions,
    runtime: Arc<dyn Runtime>,
    work_scheduler: Arc<dyn WorkScheduler>,
    inbox: Arc<Inbox>,
    sink: EventSink,
    shutting_down: bool,

    config: Option<Arc<GrpclbConfig>>,
    args: ChannelArgs,
    service_name: String,
    call_timeout: Option<Duration>,

    balancer_channel: Option<Arc<dyn BalancerChannel>>,
    watch_task: Option<BoxedTaskHandle>,
    balancer_call: Option<BalancerCall>,
    next_call_id: u64,
    backoff: ExponentialBackoff,
    retry_timer: Timer,
    fallback_timer: Timer,

    serverlist: Option<Serverlist>,
    drops: Option<Arc<DropSchedule>>,
    child: Option<ChildPolicy>,
    pending_child: Option<ChildPolicy>,
    subchannel_owners: HashMap<usize, (Weak<dyn Subchannel>, ChildKind)>,
}

impl GrpclbPolicy {
    fn new(
        registry: Arc<LbPolicyRegistry>,
        options: GrpclbOptions,
        backoff: ExponentialBackoff,
        lb_options: LbPolicyOptions,
    ) -> Self {
        let inbox = Arc::new(Inbox::default());
        let sink = EventSink::new(&inbox, lb_options.work_scheduler.clone());
        Self {
            registry,
            options,
            retry_timer: Timer::new(lb_options.runtime.clone()),
            fallback_timer: Timer::new(lb_options.runtime.clone()),
            runtime: lb_options.runtime,
            work_scheduler: lb_options.work_scheduler,
            inbox,
            sink,
            shutting_down: false,
            config: None,
            args: ChannelArgs::new(),
            service_name: String::new(),
            call_timeout: None,
            balancer_channel: None,
            watch_task: None,
            balancer_call: None,
            next_call_id: 0,
            backoff,
            serverlist: None,
            drops: None,
            child: None,
            pending_child: None,
            subchannel_owners: HashMap::new(),
        }
    }

    /// Tears the policy down. Everything that can still deliver events is
    /// released before the balancer channel, and all events arriving later
    /// are ignored.
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        debug!("shutting down grpclb policy");
        self.shutting_down = true;
        self.balancer_call = None;
        self.retry_timer.cancel();
        self.fallback_timer.cancel();
        self.pending_child = None;
        self.child = None;
        self.subchannel_owners.clear();
        self.balancer_channel = None;
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
    }

    fn start_balancer_call(&mut self) {
        let Some(channel) = self.balancer_channel.clone() else {
            return;
        };
        self.next_call_id += 1;
        let call_id = self.next_call_id;
        debug!(call_id, target = channel.target(), "starting balancer call");
        self.balancer_call = Some(BalancerCall::start(
            call_id,
            channel.as_ref(),
            &self.service_name,
            self.call_timeout,
            &self.runtime,
            self.sink.clone(),
        ));
    }

    fn start_retry_timer(&mut self) {
        let delay = self.backoff.backoff_duration();
        debug!(?delay, "balancer call failed; retrying after backoff");
        let sink = self.sink.clone();
        self.retry_timer.schedule(delay, move || {
            sink.post(PolicyEvent::RetryTimerFired);
        });
    }

    fn start_fallback_timer(&mut self) {
        let Some(timeout) = self.options.fallback_timeout(&self.args) else {
            return;
        };
        let sink = self.sink.clone();
        self.fallback_timer.schedule(timeout, move || {
            sink.post(PolicyEvent::FallbackTimerFired);
        });
    }

    /// Watches the balancer channel until it becomes Idle, Ready or Shutdown.
    fn start_watching(&mut self) {
        if self.watch_task.is_some() {
            return;
        }
        let Some(channel) = self.balancer_channel.clone() else {
            return;
        };
        let sink = self.sink.clone();
        let mut last_observed = channel.check_connectivity_state(true);
        trace!(state = %last_observed, "watching balancer channel");
        self.watch_task = Some(self.runtime.spawn(Box::pin(async move {
            loop {
                let state = channel.watch_connectivity_state(last_observed).await;
                if !sink.post(PolicyEvent::BalancerConnectivityChanged(state)) {
                    return;
                }
                match state {
                    ConnectivityState::Connecting | ConnectivityState::TransientFailure => {
                        last_observed = state;
                    }
                    _ => return,
                }
            }
        })));
    }

    fn handle_event(&mut self, event: PolicyEvent, channel_controller: &mut dyn ChannelController) {
        if self.shutting_down {
            trace!(?event, "ignoring event after shutdown");
            return;
        }
        match event {
            PolicyEvent::Call { call_id, event } => {
                if self.balancer_call.as_ref().map(|c| c.id()) != Some(call_id) {
                    trace!(call_id, ?event, "ignoring event from stale balancer call");
                    return;
                }
                self.handle_call_event(event, channel_controller);
            }
            PolicyEvent::LoadReportTimerFired { call_id } => {
                if let Some(call) = self.balancer_call.as_mut().filter(|c| c.id() == call_id) {
                    call.on_load_report_timer();
                }
            }
            PolicyEvent::RetryTimerFired => {
                self.retry_timer.fired();
                if self.balancer_call.is_none() {
                    debug!("restarting balancer call after backoff");
                    self.start_balancer_call();
                }
            }
            PolicyEvent::FallbackTimerFired => {
                self.fallback_timer.fired();
                if self.serverlist.is_none() {
                    info!(
                        "no serverlist received before the fallback timeout; \
                         falling back to resolver backends is not supported"
                    );
                }
            }
            PolicyEvent::BalancerConnectivityChanged(state) => {
                self.on_balancer_connectivity_changed(state)
            }
        }
    }

    fn handle_call_event(
        &mut self,
        event: BalancerCallEvent,
        channel_controller: &mut dyn ChannelController,
    ) {
        let Some(call) = self.balancer_call.as_mut() else {
            return;
        };
        match event {
            BalancerCallEvent::InitialMetadata(metadata) => call.on_initial_metadata(&metadata),
            BalancerCallEvent::SendComplete(result) => call.on_send_complete(result),
            BalancerCallEvent::Message(msg) => self.on_balancer_message(msg, channel_controller),
            BalancerCallEvent::Status(status) => self.on_balancer_call_status(status),
        }
    }

    fn on_balancer_message(&mut self, msg: Bytes, channel_controller: &mut dyn ChannelController) {
        let Some(call) = self.balancer_call.as_mut() else {
            return;
        };
        let serverlist = match call.on_message(msg) {
            Ok(serverlist) => serverlist,
            Err(err) => {
                warn!(call_id = call.id(), %err, "ignoring invalid balancer response");
                return;
            }
        };
        // Any well-formed message shows the balancer is healthy.
        self.backoff.reset();
        if let Some(serverlist) = serverlist {
            self.on_serverlist(serverlist, channel_controller);
        }
    }

    fn on_serverlist(
        &mut self,
        serverlist: Serverlist,
        channel_controller: &mut dyn ChannelController,
    ) {
        if serverlist.servers.is_empty() {
            info!("received empty serverlist; ignoring");
            return;
        }
        let Some(call) = self.balancer_call.as_mut() else {
            return;
        };
        if call.maybe_start_load_reporting() {
            // Pickers already handed out do not count calls yet.
            if let Some(state) = self.child.as_ref().and_then(|c| c.state.clone()) {
                channel_controller.update_picker(wrap_child_state(
                    state,
                    call.client_stats(),
                    self.drops.clone(),
                ));
            }
        }
        if self.serverlist.as_ref() == Some(&serverlist) {
            debug!("serverlist unchanged; ignoring");
            return;
        }
        self.drops = DropSchedule::new(&serverlist);
        self.serverlist = Some(serverlist);
        self.fallback_timer.cancel();
        if self.ensure_child_policy(channel_controller) {
            self.push_serverlist(ChildKind::Current, channel_controller);
            self.push_serverlist(ChildKind::Pending, channel_controller);
        }
    }

    fn on_balancer_call_status(&mut self, status: Status) {
        let Some(mut call) = self.balancer_call.take() else {
            return;
        };
        call.on_status(&status);
        let restart_now = call.seen_initial_response();
        drop(call);
        if restart_now {
            self.backoff.reset();
            self.start_balancer_call();
        } else {
            self.start_retry_timer();
        }
    }

    fn on_balancer_connectivity_changed(&mut self, state: ConnectivityState) {
        match state {
            ConnectivityState::Connecting | ConnectivityState::TransientFailure => {
                trace!(%state, "balancer channel state changed; still watching");
            }
            ConnectivityState::Idle | ConnectivityState::Ready => {
                debug!(%state, "balancer channel state changed; restarting balancer call");
                self.watch_task = None;
                self.balancer_call = None;
                self.retry_timer.cancel();
                self.backoff.reset();
                self.start_balancer_call();
            }
            ConnectivityState::Shutdown => {
                self.watch_task = None;
            }
        }
    }

    /// Makes sure a child for the configured policy exists. A policy change
    /// builds the new child as pending while the current one keeps serving.
    /// Returns false if there is no child to update.
    fn ensure_child_policy(&mut self, channel_controller: &mut dyn ChannelController) -> bool {
        let Some(config) = self.config.clone() else {
            return false;
        };
        let name = &config.child_policy.name;
        if self.child.as_ref().is_some_and(|c| &c.name == name) {
            if self.pending_child.take().is_some() {
                debug!(policy = %name, "dropping pending child policy");
                self.forget_subchannels(ChildKind::Pending);
            }
            if let Some(child) = self.child.as_mut() {
                child.config = config.child_config.clone();
            }
            return true;
        }
        if let Some(pending) = self.pending_child.as_mut().filter(|c| &c.name == name) {
            pending.config = config.child_config.clone();
            return true;
        }

        let Some(builder) = self.registry.get_policy(name) else {
            error!(policy = %name, "child policy is not registered");
            if self.child.is_none() {
                channel_controller.update_picker(LbState::transient_failure(Status::unavailable(
                    GrpclbError::NoChildPolicy(name.clone()).to_string(),
                )));
            }
            return self.child.is_some();
        };
        let child = ChildPolicy {
            name: name.clone(),
            config: config.child_config.clone(),
            policy: builder.build(LbPolicyOptions {
                work_scheduler: self.work_scheduler.clone(),
                runtime: self.runtime.clone(),
            }),
            state: None,
        };
        if self.child.is_none() {
            debug!(policy = %name, "creating child policy");
            self.child = Some(child);
        } else {
            debug!(policy = %name, "switching child policy once the new one is ready");
            self.forget_subchannels(ChildKind::Pending);
            self.pending_child = Some(child);
        }
        true
    }

    /// Sends the current serverlist to the given child, if it exists.
    fn push_serverlist(&mut self, kind: ChildKind, channel_controller: &mut dyn ChannelController) {
        let Some(child) = self.child_mut(kind) else {
            return;
        };
        let name = child.name.clone();
        let child_config = child.config.clone();
        let Some(serverlist) = &self.serverlist else {
            return;
        };
        let child_args = self
            .args
            .set_int(ARG_ADDRESS_IS_BACKEND_FROM_GRPCLB_LOAD_BALANCER, 1)
            .set_int(ARG_INHIBIT_HEALTH_CHECKING, 1);
        let addresses = serverlist::backend_addresses(serverlist, &child_args);
        let update = ResolverUpdate::new(addresses, child_args);
        self.call_child(kind, channel_controller, |child, helper| {
            if let Err(err) = child.resolver_update(update, child_config.as_ref(), helper) {
                warn!(policy = %name, %err, "child policy rejected update");
            }
        });
    }

    fn child_mut(&mut self, kind: ChildKind) -> Option<&mut ChildPolicy> {
        match kind {
            ChildKind::Current => self.child.as_mut(),
            ChildKind::Pending => self.pending_child.as_mut(),
        }
    }

    /// Runs `f` against a child, if it exists, with a helper wrapping
    /// `channel_controller`, then applies what the child did through the
    /// helper.
    fn call_child<F>(
        &mut self,
        kind: ChildKind,
        channel_controller: &mut dyn ChannelController,
        f: F,
    ) where
        F: FnOnce(&mut dyn LbPolicy, &mut dyn ChannelController),
    {
        let seen_serverlist = self
            .balancer_call
            .as_ref()
            .is_some_and(|c| c.seen_serverlist());
        let Some(child) = self.child_mut(kind) else {
            return;
        };
        let mut helper = GrpclbHelper::new(channel_controller, seen_serverlist);
        f(child.policy.as_mut(), &mut helper as &mut dyn ChannelController);
        let GrpclbHelper {
            created_subchannels,
            picker_update,
            ..
        } = helper;

        self.subchannel_owners
            .retain(|_, (subchannel, _)| subchannel.strong_count() > 0);
        for subchannel in &created_subchannels {
            self.subchannel_owners.insert(
                subchannel_key(subchannel),
                (Arc::downgrade(subchannel), kind),
            );
        }
        if let Some(state) = picker_update {
            self.on_child_state(kind, state, channel_controller);
        }
    }

    fn on_child_state(
        &mut self,
        kind: ChildKind,
        state: LbState,
        channel_controller: &mut dyn ChannelController,
    ) {
        let Some(child) = self.child_mut(kind) else {
            return;
        };
        child.state = Some(state.clone());
        if kind == ChildKind::Current {
            self.publish(state, channel_controller);
        }
        self.maybe_swap_children(channel_controller);
    }

    fn maybe_swap_children(&mut self, channel_controller: &mut dyn ChannelController) {
        let (Some(current), Some(pending)) = (&self.child, &self.pending_child) else {
            return;
        };
        if current.connectivity_state() == ConnectivityState::Ready
            && pending.connectivity_state() != ConnectivityState::Ready
        {
            return;
        }
        debug!(
            old = %current.name,
            new = %pending.name,
            "switching to the new child policy"
        );
        self.child = self.pending_child.take();
        self.forget_subchannels(ChildKind::Current);
        for (_, kind) in self.subchannel_owners.values_mut() {
            *kind = ChildKind::Current;
        }
        let state = self
            .child
            .as_ref()
            .and_then(|c| c.state.clone())
            .unwrap_or_else(LbState::initial);
        self.publish(state, channel_controller);
    }

    fn forget_subchannels(&mut self, kind: ChildKind) {
        self.subchannel_owners.retain(|_, (_, owner)| *owner != kind);
    }

    /// Publishes a state of the current child, wrapped for grpclb.
    fn publish(&self, state: LbState, channel_controller: &mut dyn ChannelController) {
        let client_stats = self.balancer_call.as_ref().and_then(|c| c.client_stats());
        channel_controller.update_picker(wrap_child_state(state, client_stats, self.drops.clone()));
    }
}

/// The name sent to the balancer: the path of the channel's server URI, or of
/// the balancer name if the URI is not known.
fn service_name(args: &ChannelArgs, balancer_name: &str) -> String {
    let uri = args.get_string(ARG_SERVER_URI).unwrap_or(balancer_name);
    match uri.parse::<Target>() {
        Ok(target) => target.service_name().to_string(),
        Err(_) => uri.to_string(),
    }
}

impl LbPolicy for GrpclbPolicy {
    fn resolver_update(
        &mut self,
        update: ResolverUpdate,
        config: Option<&LbConfig>,
        channel_controller: &mut dyn ChannelController,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.shutting_down {
            return Ok(());
        }
        let Some(config) = config.and_then(|c| c.convert_to::<GrpclbConfig>()) else {
            error!("grpclb received an update without a grpclb config");
            return Err(GrpclbError::MissingConfig.into());
        };
        let Some(balancer_name) = config.balancer_name.clone() else {
            error!("grpclb config does not name a balancer; ignoring update");
            return Err(GrpclbError::MissingBalancerName.into());
        };
        let addresses = match update.addresses {
            Ok(addresses) => addresses,
            Err(err) => {
                error!(%err, "resolver reported an error");
                if self.balancer_channel.is_none() {
                    channel_controller.update_picker(LbState::transient_failure(
                        Status::unavailable(format!("resolver error: {err}")),
                    ));
                }
                return Err(GrpclbError::Resolver(err).into());
            }
        };

        let previous_config = self.config.replace(config.clone());
        self.args = update.args;
        self.service_name = service_name(&self.args, &balancer_name);
        let balancer_args =
            self.args
                .remove(&[ARG_LB_POLICY_NAME, ARG_SERVER_URI, ARG_LB_ADDRESSES]);

        let target_changed = self
            .balancer_channel
            .as_ref()
            .is_some_and(|c| c.target() != balancer_name);
        if target_changed {
            info!(balancer_name, "balancer name changed; recreating balancer channel");
            self.balancer_call = None;
            self.retry_timer.cancel();
            if let Some(task) = self.watch_task.take() {
                task.abort();
            }
            self.balancer_channel = None;
            self.backoff.reset();
        }

        let is_initial = self.balancer_channel.is_none();
        let channel = match &self.balancer_channel {
            Some(channel) => channel.clone(),
            None => {
                debug!(balancer_name, "creating balancer channel");
                let channel =
                    channel_controller.create_balancer_channel(&balancer_name, &balancer_args);
                self.balancer_channel = Some(channel.clone());
                channel
            }
        };
        channel.update_resolver_state(addresses.balancers(), balancer_args);

        if is_initial {
            self.call_timeout = self.options.balancer_call_timeout(&self.args);
            if !target_changed {
                self.start_fallback_timer();
            }
            self.start_balancer_call();
        } else {
            self.start_watching();
        }

        if let Some(previous) = previous_config {
            if previous.child_policy != config.child_policy
                && self.serverlist.is_some()
                && self.ensure_child_policy(channel_controller)
            {
                debug!(policy = %config.child_policy.name, "child policy config changed");
                let target = if self.pending_child.is_some() {
                    ChildKind::Pending
                } else {
                    ChildKind::Current
                };
                self.push_serverlist(target, channel_controller);
            }
        }
        Ok(())
    }

    fn subchannel_update(
        &mut self,
        subchannel: Arc<dyn Subchannel>,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    ) {
        let owner = self
            .subchannel_owners
            .get(&subchannel_key(&subchannel))
            .filter(|(weak, _)| weak.strong_count() > 0)
            .map_or(ChildKind::Current, |(_, kind)| *kind);
        self.call_child(owner, channel_controller, |child, helper| {
            child.subchannel_update(subchannel, state, helper)
        });
    }

    fn exit_idle(&mut self, channel_controller: &mut dyn ChannelController) {
        for kind in [ChildKind::Current, ChildKind::Pending] {
            self.call_child(kind, channel_controller, |child, helper| child.exit_idle(helper));
        }
    }

    fn work(&mut self, channel_controller: &mut dyn ChannelController) {
        for event in self.inbox.drain() {
            self.handle_event(event, channel_controller);
        }
        for kind in [ChildKind::Current, ChildKind::Pending] {
            self.call_child(kind, channel_controller, |child, helper| child.work(helper));
        }
    }

    fn reset_backoff(&mut self) {
        if let Some(channel) = &self.balancer_channel {
            channel.reset_connect_backoff();
        }
        for child in [self.child.as_mut(), self.pending_child.as_mut()]
            .into_iter()
            .flatten()
        {
            child.policy.reset_backoff();
        }
    }
}

impl Drop for GrpclbPolicy {
    fn drop(&mut self) {
        self.shutdown();
    }
}
