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

use std::time::Duration;

use serde::Deserialize;

use super::error::GrpclbError;
use crate::client::backoff::{BackoffConfig, DEFAULT_EXPONENTIAL_CONFIG};
use crate::client::channel_args::{
    ARG_GRPCLB_CALL_TIMEOUT_MS, ARG_GRPCLB_FALLBACK_TIMEOUT_MS, ChannelArgs,
};
use crate::client::load_balancing::LbPolicyRegistry;
use crate::client::service_config::{LbConfig, ParsedJsonLbConfig};

/// The child policy used when the config does not name one.
pub const DEFAULT_CHILD_POLICY: &str = "round_robin";

/// How long to wait for a serverlist before falling back, by default.
pub const DEFAULT_FALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Knobs of the grpclb policy that are set by the embedding client rather
/// than by the service config.
#[derive(Debug, Clone)]
pub struct GrpclbOptions {
    /// Backoff between balancer call attempts.
    pub backoff: BackoffConfig,
    /// How long to wait for the first serverlist. None disables the timer.
    pub fallback_timeout: Option<Duration>,
    /// Deadline for each balancer call. None means no deadline.
    pub balancer_call_timeout: Option<Duration>,
}

impl Default for GrpclbOptions {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_EXPONENTIAL_CONFIG,
            fallback_timeout: Some(DEFAULT_FALLBACK_TIMEOUT),
            balancer_call_timeout: None,
        }
    }
}

impl GrpclbOptions {
    /// The fallback timeout after applying the channel arg override.
    pub(super) fn fallback_timeout(&self, args: &ChannelArgs) -> Option<Duration> {
        timeout_override(args, ARG_GRPCLB_FALLBACK_TIMEOUT_MS).unwrap_or(self.fallback_timeout)
    }

    /// The balancer call timeout after applying the channel arg override.
    pub(super) fn balancer_call_timeout(&self, args: &ChannelArgs) -> Option<Duration> {
        timeout_override(args, ARG_GRPCLB_CALL_TIMEOUT_MS).unwrap_or(self.balancer_call_timeout)
    }
}

/// Zero disables the timeout; negative values are ignored.
fn timeout_override(args: &ChannelArgs, key: &str) -> Option<Option<Duration>> {
    match args.get_int(key)? {
        0 => Some(None),
        ms if ms > 0 => Some(Some(Duration::from_millis(ms as u64))),
        _ => None,
    }
}

/// The child policy chosen from the config, with its raw config kept for
/// change detection.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildPolicySelection {
    pub name: String,
    pub config: serde_json::Value,
}

/// The parsed grpclb LB config.
#[derive(Debug, Clone)]
pub struct GrpclbConfig {
    /// The target of the balancer channel. Required, but only enforced when
    /// the config is applied.
    pub balancer_name: Option<String>,
    pub child_policy: ChildPolicySelection,
    /// The child's own parsed config, if it takes one.
    pub child_config: Option<LbConfig>,
    /// Recorded but unused: falling back to resolver backends is not
    /// supported.
    pub fallback_policy: Option<String>,
}

type PolicyList = Vec<serde_json::Map<String, serde_json::Value>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonConfig {
    #[serde(default)]
    balancer_name: Option<String>,
    #[serde(default)]
    child_policy: Option<PolicyList>,
    #[serde(default)]
    fallback_policy: Option<PolicyList>,
}

impl GrpclbConfig {
    /// Parses `{"balancerName": .., "childPolicy": [..], "fallbackPolicy": [..]}`.
    ///
    /// For each policy list the first entry naming a registered policy wins.
    pub fn parse(
        config: &ParsedJsonLbConfig,
        registry: &LbPolicyRegistry,
    ) -> Result<Self, GrpclbError> {
        let json: JsonConfig = config
            .convert_to()
            .map_err(|e| GrpclbError::InvalidConfig(e.to_string()))?;

        let balancer_name = json.balancer_name.filter(|name| !name.is_empty());

        let child_policy = match json.child_policy {
            Some(list) => select_policy(&list, registry, "childPolicy")?,
            None => ChildPolicySelection {
                name: DEFAULT_CHILD_POLICY.to_string(),
                config: serde_json::Value::Null,
            },
        };
        let child_config = match registry.get_policy(&child_policy.name) {
            Some(builder) => builder
                .parse_config(&ParsedJsonLbConfig::new(child_policy.config.clone()))
                .map_err(|e| {
                    GrpclbError::InvalidConfig(format!(
                        "child policy {}: {e}",
                        child_policy.name
                    ))
                })?,
            None => None,
        };

        let fallback_policy = match json.fallback_policy {
            Some(list) => Some(select_policy(&list, registry, "fallbackPolicy")?.name),
            None => None,
        };

        Ok(GrpclbConfig {
            balancer_name,
            child_policy,
            child_config,
            fallback_policy,
        })
    }
}

fn select_policy(
    list: &PolicyList,
    registry: &LbPolicyRegistry,
    field: &str,
) -> Result<ChildPolicySelection, GrpclbError> {
    for entry in list {
        let mut policies = entry.iter();
        let (Some((name, config)), None) = (policies.next(), policies.next()) else {
            return Err(GrpclbError::InvalidConfig(format!(
                "each {field} entry must name exactly one policy"
            )));
        };
        if registry.get_policy(name).is_some() {
            return Ok(ChildPolicySelection {
                name: name.clone(),
                config: config.clone(),
            });
        }
    }
    Err(GrpclbError::InvalidConfig(format!(
        "no registered policy found in {field}"
    )))
}
