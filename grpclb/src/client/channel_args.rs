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

//! Channel arguments: an ordered set of named integer or string settings that
//! travel with resolver updates and addresses.

use std::collections::BTreeMap;
use std::fmt;

/// The LB policy name selected for a channel.
pub const ARG_LB_POLICY_NAME: &str = "grpc.lb_policy_name";
/// The URI the channel was created for.
pub const ARG_SERVER_URI: &str = "grpc.server_uri";
/// Resolver-provided address list.
pub const ARG_LB_ADDRESSES: &str = "grpc.lb_addresses";
/// Set on addresses that came from a balancer's serverlist.
pub const ARG_ADDRESS_IS_BACKEND_FROM_GRPCLB_LOAD_BALANCER: &str =
    "grpc.address_is_backend_from_grpclb_load_balancer";
/// Disables client-side health checking for the addresses it is set on.
pub const ARG_INHIBIT_HEALTH_CHECKING: &str = "grpc.inhibit_health_checking";
/// Milliseconds to wait for a serverlist before fallback; 0 disables.
pub const ARG_GRPCLB_FALLBACK_TIMEOUT_MS: &str = "grpc.grpclb_fallback_timeout_ms";
/// Deadline in milliseconds for each balancer call; 0 means no deadline.
pub const ARG_GRPCLB_CALL_TIMEOUT_MS: &str = "grpc.grpclb_call_timeout_ms";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelArgValue {
    Integer(i64),
    String(String),
}

impl fmt::Display for ChannelArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelArgValue::Integer(v) => write!(f, "{v}"),
            ChannelArgValue::String(v) => write!(f, "{v}"),
        }
    }
}

/// An immutable-by-convention set of channel arguments, ordered by key.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelArgs {
    args: BTreeMap<String, ChannelArgValue>,
}

impl ChannelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `key` set to `value`.
    pub fn set(&self, key: impl Into<String>, value: ChannelArgValue) -> Self {
        let mut args = self.args.clone();
        args.insert(key.into(), value);
        Self { args }
    }

    pub fn set_int(&self, key: impl Into<String>, value: i64) -> Self {
        self.set(key, ChannelArgValue::Integer(value))
    }

    pub fn set_string(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, ChannelArgValue::String(value.into()))
    }

    /// Returns a copy without any of the given keys.
    pub fn remove(&self, keys: &[&str]) -> Self {
        let mut args = self.args.clone();
        for key in keys {
            args.remove(*key);
        }
        Self { args }
    }

    pub fn get(&self, key: &str) -> Option<&ChannelArgValue> {
        self.args.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.args.get(key)? {
            ChannelArgValue::Integer(v) => Some(*v),
            ChannelArgValue::String(_) => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.args.get(key)? {
            ChannelArgValue::String(v) => Some(v),
            ChannelArgValue::Integer(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ChannelArgValue)> {
        self.args.iter().map(|(k, v)| (k.as_str(), v))
    }
}
