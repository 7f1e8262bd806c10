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

//! The contract between look-aside load balancing and the secondary channel
//! that carries traffic to the balancers.
//!
//! The channel itself (connection management, HTTP/2 framing, TLS) is owned
//! by the embedding client; policies only see the traits below.

use bytes::Bytes;
use tonic::Status;
use tonic::metadata::MetadataMap;

use crate::client::ConnectivityState;
use crate::client::channel_args::ChannelArgs;
use crate::client::name_resolution::ServerAddressList;
use crate::rt::BoxFuture;

/// The full method name of the load reporting RPC.
pub const BALANCE_LOAD_METHOD: &str = "/grpc.lb.v1.LoadBalancer/BalanceLoad";

/// One item read from the receive side of a balancer call.
#[derive(Debug)]
pub enum BalancerStreamItem {
    /// The response headers. Delivered at most once, before any message.
    Headers(MetadataMap),
    /// A serialized response message.
    Message(Bytes),
    /// The terminal status of the call. Nothing is delivered after it.
    Trailers(Status),
}

/// The sending side of a balancer call. Dropping it half-closes the stream.
#[tonic::async_trait]
pub trait BalancerSendStream: Send {
    /// Sends a serialized request. An error means the stream is closed and
    /// later sends will fail too.
    async fn send(&mut self, msg: Bytes) -> Result<(), Status>;
}

/// The receiving side of a balancer call. Dropping it cancels the call if the
/// balancer has not already finished it.
#[tonic::async_trait]
pub trait BalancerRecvStream: Send {
    /// Returns the next item on the stream. After `Trailers` has been
    /// returned the stream must not be polled again.
    async fn next(&mut self) -> BalancerStreamItem;
}

/// A channel whose addresses are balancers, kept up to date by the policy
/// that owns it.
pub trait BalancerChannel: Send + Sync {
    /// The target the channel was created for.
    fn target(&self) -> &str;

    /// Replaces the channel's addresses, acting as the channel's resolver.
    fn update_resolver_state(&self, addresses: ServerAddressList, args: ChannelArgs);

    /// Starts a bidirectional streaming call to `method`.
    fn start_call(
        &self,
        method: &str,
    ) -> (Box<dyn BalancerSendStream>, Box<dyn BalancerRecvStream>);

    /// Returns the channel's current state, asking it to leave Idle if
    /// `try_to_connect` is set.
    fn check_connectivity_state(&self, try_to_connect: bool) -> ConnectivityState;

    /// Resolves with the new state once the channel leaves `last_observed`.
    fn watch_connectivity_state(
        &self,
        last_observed: ConnectivityState,
    ) -> BoxFuture<ConnectivityState>;

    /// Skips any pending reconnect backoff on the channel's connections.
    fn reset_connect_backoff(&self);
}
