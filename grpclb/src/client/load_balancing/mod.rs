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

//! Load balancing policy interfaces.
//!
//! A channel owns one top-level [`LbPolicy`]. The policy creates connections
//! (modeled as [`Subchannel`]s) through a [`ChannelController`] and publishes
//! [`Picker`]s that choose a subchannel for every RPC. All calls into a policy
//! are serialized by the channel; asynchronous completions are delivered by
//! asking for a [`LbPolicy::work`] call through the [`WorkScheduler`].

use std::error::Error;
use std::fmt::{self, Debug};
use std::sync::Arc;

use tonic::Status;
use tonic::metadata::MetadataMap;

use crate::client::ConnectivityState;
use crate::client::balancer::BalancerChannel;
use crate::client::channel_args::ChannelArgs;
use crate::client::name_resolution::{ResolverUpdate, ServerAddress};
use crate::client::service_config::{LbConfig, ParsedJsonLbConfig};
use crate::rt::Runtime;

pub mod grpclb;
mod registry;

pub use registry::LbPolicyRegistry;

#[cfg(test)]
pub(crate) mod test_utils;

/// A collection of data configured on the channel that is constructing this
/// LbPolicy.
#[derive(Clone)]
pub struct LbPolicyOptions {
    /// A hook into the channel's work scheduler that allows the LbPolicy to
    /// request the ability to perform operations on the ChannelController.
    pub work_scheduler: Arc<dyn WorkScheduler>,

    /// The runtime used for background tasks and timers.
    pub runtime: Arc<dyn Runtime>,
}

/// Used to asynchronously request a call into the LbPolicy's work method if
/// the LbPolicy needs to provide an update without waiting for an update
/// from the channel first.
pub trait WorkScheduler: Send + Sync {
    // Schedules a call into the LbPolicy's work method.  If there is already a
    // pending work call that has not yet started, this may not schedule another
    // call.
    fn schedule_work(&self);
}

/// An LB policy factory that produces LbPolicy instances used by the channel
/// to manage connections and pick connections for RPCs.
pub trait LbPolicyBuilder: Send + Sync {
    /// Builds and returns a new LB policy instance.
    ///
    /// Note that build must not fail.  Any optional configuration is delivered
    /// via the LbPolicy's resolver_update method.
    fn build(&self, options: LbPolicyOptions) -> Box<dyn LbPolicy>;

    /// Reports the name of the LB Policy.
    fn name(&self) -> &'static str;

    /// Parses the JSON LB policy configuration into an internal representation.
    ///
    /// LB policies do not need to accept a configuration, in which case the
    /// default implementation returns Ok(None).
    fn parse_config(
        &self,
        _config: &ParsedJsonLbConfig,
    ) -> Result<Option<LbConfig>, Box<dyn Error + Send + Sync>> {
        Ok(None)
    }
}

/// An LB policy instance.
pub trait LbPolicy: Send {
    /// Called by the channel when the name resolver produces a new set of
    /// resolved addresses or a new config.
    fn resolver_update(
        &mut self,
        update: ResolverUpdate,
        config: Option<&LbConfig>,
        channel_controller: &mut dyn ChannelController,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Called by the channel when any subchannel created by the LB policy
    /// changes state.
    fn subchannel_update(
        &mut self,
        subchannel: Arc<dyn Subchannel>,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    );

    /// Called by the channel when a pick was attempted while the policy
    /// reported Idle.
    fn exit_idle(&mut self, channel_controller: &mut dyn ChannelController);

    /// Called by the channel in response to a call from the LB policy to the
    /// WorkScheduler's schedule_work method.
    fn work(&mut self, channel_controller: &mut dyn ChannelController);

    /// Asks the policy to skip any reconnect backoff currently in effect.
    fn reset_backoff(&mut self) {}
}

/// Controls channel behaviors.
pub trait ChannelController: Send + Sync {
    /// Creates a new subchannel in IDLE state.
    fn new_subchannel(&mut self, address: &ServerAddress) -> Arc<dyn Subchannel>;

    /// Provides a new snapshot of the LB policy's state to the channel.
    fn update_picker(&mut self, update: LbState);

    /// Signals the name resolver to attempt to re-resolve addresses.  Typically
    /// used when connections fail, indicating a possible change in the overall
    /// network configuration.
    fn request_resolution(&mut self);

    /// Creates a secondary channel to `target` whose addresses are provided
    /// by the caller through [`BalancerChannel::update_resolver_state`].
    fn create_balancer_channel(
        &mut self,
        target: &str,
        args: &ChannelArgs,
    ) -> Arc<dyn BalancerChannel>;
}

/// Represents the current state of a Subchannel.
#[derive(Clone, Debug)]
pub struct SubchannelState {
    pub connectivity_state: ConnectivityState,
    /// Describes the most recent connection error while in
    /// TransientFailure.
    pub last_connection_error: Option<Arc<dyn Error + Send + Sync>>,
}

/// A Subchannel represents a method of communicating with a server which may be
/// connected or disconnected many times across its lifetime.
///
/// When a Subchannel is dropped, it is disconnected, and no subsequent state
/// updates will be provided for it to the LB policy.
pub trait Subchannel: Send + Sync + Debug {
    /// The address this subchannel connects to, including the attributes the
    /// LB policy attached to it.
    fn address(&self) -> ServerAddress;

    /// Starts connecting if the subchannel is Idle.
    fn connect(&self);
}

/// Information about an RPC needed to pick a subchannel for it.
#[derive(Debug, Default)]
pub struct PickRequest {
    /// The full method name, e.g. `/pkg.Service/Method`.
    pub method: String,
    pub metadata: MetadataMap,
}

/// A Picker is responsible for deciding what Subchannel to use for any given
/// request.  A Picker is only used once for any RPC.  If pick() returns Queue,
/// the channel will queue the RPC until a new Picker is produced by the
/// LbPolicy, and will call pick() on the new Picker for the request.
pub trait Picker: Send + Sync {
    /// Picks a connection to use for the request.
    ///
    /// This function must not block.
    fn pick(&self, request: &PickRequest) -> PickResult;
}

#[derive(Debug)]
pub enum PickResult {
    /// Indicates the Subchannel in the Pick should be used for the request.
    Pick(Pick),
    /// Indicates the LbPolicy is attempting to connect to a server to use for
    /// the request.
    Queue,
    /// Indicates that the request should fail with the included error status
    /// unless it is wait-for-ready.
    Fail(Status),
    /// Indicates that the request should fail with the included status
    /// immediately, even if the RPC is wait-for-ready.
    Drop(Status),
}

/// How an RPC ended, as reported to a pick's completion hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOutcome {
    /// The client could not send the request to the server.
    pub client_failed_to_send: bool,
    /// The server is known to have received the request.
    pub known_received: bool,
}

/// Invoked by the channel exactly once when a picked RPC ends.
pub type OnComplete = Box<dyn FnOnce(&CallOutcome) + Send + Sync>;

/// A collection of data used by the channel for routing a request.
pub struct Pick {
    /// The Subchannel for the request.
    pub subchannel: Arc<dyn Subchannel>,
    /// Metadata to be added to existing outgoing metadata.
    pub metadata: MetadataMap,
    /// Called when the RPC completes, if set.
    pub on_complete: Option<OnComplete>,
}

impl Pick {
    pub fn new(subchannel: Arc<dyn Subchannel>) -> Self {
        Pick {
            subchannel,
            metadata: MetadataMap::new(),
            on_complete: None,
        }
    }
}

impl Debug for Pick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pick")
            .field("subchannel", &self.subchannel)
            .field("metadata", &self.metadata)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Data provided by the LB policy.
#[derive(Clone)]
pub struct LbState {
    pub connectivity_state: ConnectivityState,
    pub picker: Arc<dyn Picker>,
}

impl LbState {
    /// Returns a generic initial LbState which is Connecting and a picker which
    /// queues all picks.
    pub fn initial() -> Self {
        Self {
            connectivity_state: ConnectivityState::Connecting,
            picker: Arc::new(QueuingPicker {}),
        }
    }

    /// Returns a TransientFailure state whose picker fails every RPC with
    /// `status`.
    pub fn transient_failure(status: Status) -> Self {
        Self {
            connectivity_state: ConnectivityState::TransientFailure,
            picker: Arc::new(FailingPicker { status }),
        }
    }
}

impl Debug for LbState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LbState")
            .field("connectivity_state", &self.connectivity_state)
            .finish_non_exhaustive()
    }
}

/// QueuingPicker always returns Queue.  LB policies that are not actively
/// Connecting should not use this picker.
pub struct QueuingPicker {}

impl Picker for QueuingPicker {
    fn pick(&self, _request: &PickRequest) -> PickResult {
        PickResult::Queue
    }
}

/// Fails every pick with the same status.
pub struct FailingPicker {
    pub status: Status,
}

impl Picker for FailingPicker {
    fn pick(&self, _request: &PickRequest) -> PickResult {
        PickResult::Fail(self.status.clone())
    }
}
