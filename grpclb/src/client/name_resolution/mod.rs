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

//! Name resolution types consumed by the load balancing policies.
//!
//! A resolver converts the channel's target into a list of addresses. For
//! look-aside balancing the list mixes balancer addresses with ordinary
//! backends, distinguished by [`ServerAddress::is_balancer`].

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::net::SocketAddr;
use std::str::FromStr;

use url::Url;

use crate::attributes::Attributes;
use crate::client::channel_args::ChannelArgs;

/// Target represents a target for gRPC, as specified in
/// <https://github.com/grpc/grpc/blob/master/doc/naming.md>, e.g.
/// `dns:///service.example.com:443`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<Url>() {
            Ok(url) => Ok(Target { url }),
            Err(err) => Err(err.to_string()),
        }
    }
}

impl From<Url> for Target {
    fn from(url: Url) -> Self {
        Target { url }
    }
}

impl Target {
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The host part of the authority.
    pub fn authority_host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    /// The port part of the authority.
    pub fn authority_port(&self) -> Option<u16> {
        self.url.port()
    }

    /// Returns either host:port or host depending on the existence of the port
    /// in the authority.
    pub fn authority_host_port(&self) -> String {
        let host = self.authority_host();
        match self.authority_port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// The path with its leading `/` removed, which names the service being
    /// resolved.
    pub fn service_name(&self) -> &str {
        let path = self.path();
        path.strip_prefix('/').unwrap_or(path)
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}{}",
            self.scheme(),
            self.authority_host_port(),
            self.path()
        )
    }
}

/// A resolved address together with the metadata the resolver or a balancer
/// attached to it.
#[derive(Debug, Clone)]
pub struct ServerAddress {
    pub address: SocketAddr,

    /// Set when the address belongs to a look-aside balancer rather than a
    /// backend.
    pub is_balancer: bool,

    /// Per-address channel arguments.
    pub args: Option<ChannelArgs>,

    /// Arbitrary per-address data intended for the LB policy, keyed by type.
    pub attributes: Attributes,
}

impl ServerAddress {
    pub fn new(address: SocketAddr) -> Self {
        ServerAddress {
            address,
            is_balancer: false,
            args: None,
            attributes: Attributes::new(),
        }
    }

    pub fn balancer(address: SocketAddr) -> Self {
        ServerAddress {
            is_balancer: true,
            ..ServerAddress::new(address)
        }
    }

    /// The address as it appears on the wire: IP octets followed by the port
    /// in network order.
    fn raw_bytes(&self) -> Vec<u8> {
        let mut bytes = match self.address {
            SocketAddr::V4(addr) => addr.ip().octets().to_vec(),
            SocketAddr::V6(addr) => addr.ip().octets().to_vec(),
        };
        bytes.extend_from_slice(&self.address.port().to_be_bytes());
        bytes
    }
}

impl PartialEq for ServerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ServerAddress {}

impl PartialOrd for ServerAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw_bytes()
            .cmp(&other.raw_bytes())
            .then_with(|| self.args.cmp(&other.args))
            .then_with(|| self.attributes.cmp(&other.attributes))
            .then_with(|| self.is_balancer.cmp(&other.is_balancer))
    }
}

impl Display for ServerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_balancer {
            write!(f, "{} (balancer)", self.address)
        } else {
            write!(f, "{}", self.address)
        }
    }
}

/// An ordered list of addresses. Lists are built once and replaced wholesale
/// rather than edited.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerAddressList {
    addresses: Vec<ServerAddress>,
}

impl ServerAddressList {
    pub fn new(addresses: Vec<ServerAddress>) -> Self {
        ServerAddressList { addresses }
    }

    /// The balancer addresses, in order.
    pub fn balancers(&self) -> ServerAddressList {
        self.iter().filter(|a| a.is_balancer).cloned().collect()
    }

    /// The backend addresses, in order.
    pub fn backends(&self) -> ServerAddressList {
        self.iter().filter(|a| !a.is_balancer).cloned().collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ServerAddress> {
        self.addresses.iter()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl FromIterator<ServerAddress> for ServerAddressList {
    fn from_iter<I: IntoIterator<Item = ServerAddress>>(iter: I) -> Self {
        ServerAddressList {
            addresses: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ServerAddressList {
    type Item = &'a ServerAddress;
    type IntoIter = std::slice::Iter<'a, ServerAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.addresses.iter()
    }
}

impl IntoIterator for ServerAddressList {
    type Item = ServerAddress;
    type IntoIter = std::vec::IntoIter<ServerAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.addresses.into_iter()
    }
}

/// ResolverUpdate contains the current resolver state relevant to the LB
/// policy.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ResolverUpdate {
    /// The resolved addresses, or the error the resolver encountered.
    pub addresses: Result<ServerAddressList, String>,

    /// The channel arguments in effect for this update.
    pub args: ChannelArgs,

    /// An optional human-readable note describing context about the
    /// resolution, e.g. "no DNS entries found for <name>".
    pub resolution_note: Option<String>,
}

impl Default for ResolverUpdate {
    fn default() -> Self {
        ResolverUpdate {
            addresses: Ok(ServerAddressList::default()),
            args: ChannelArgs::default(),
            resolution_note: None,
        }
    }
}

impl ResolverUpdate {
    pub fn new(addresses: ServerAddressList, args: ChannelArgs) -> Self {
        ResolverUpdate {
            addresses: Ok(addresses),
            args,
            resolution_note: None,
        }
    }

    pub fn from_error(error: impl Into<String>) -> Self {
        ResolverUpdate {
            addresses: Err(error.into()),
            ..Default::default()
        }
    }
}
