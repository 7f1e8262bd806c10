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

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tonic::Status;
use tonic::metadata::AsciiMetadataValue;
use tracing::warn;

use super::client_stats::ClientStats;
use super::codec::Serverlist;
use super::serverlist::LbToken;
use crate::client::load_balancing::{CallOutcome, PickRequest, PickResult, Picker};

/// The metadata key carrying the backend's load balance token.
pub const LB_TOKEN_METADATA_KEY: &str = "lb-token";

/// The drop entries of a serverlist, in serverlist order. Picks walk every
/// entry in turn and a pick landing on a drop entry is dropped.
#[derive(Debug)]
pub struct DropSchedule {
    // The load balance token of each drop entry; None for backends.
    entries: Vec<Option<String>>,
    next: AtomicUsize,
}

impl DropSchedule {
    /// Returns None if `serverlist` holds no drop entries.
    pub fn new(serverlist: &Serverlist) -> Option<Arc<Self>> {
        if !serverlist.servers.iter().any(|entry| entry.drop) {
            return None;
        }
        let entries = serverlist
            .servers
            .iter()
            .map(|entry| entry.drop.then(|| entry.load_balance_token.clone()))
            .collect();
        Some(Arc::new(Self {
            entries,
            next: AtomicUsize::new(0),
        }))
    }

    /// Advances the schedule. Returns the drop entry's token if this pick is
    /// to be dropped.
    fn next_drop(&self) -> Option<&str> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.entries.len();
        self.entries[index].as_deref()
    }
}

/// Wraps the child policy's picker. Picks the balancer asked to drop fail
/// right away; every other pick is delegated. Successful picks get the
/// backend's load balance token attached and, while load reporting is
/// active, are counted in the client stats.
pub struct GrpclbPicker {
    child: Arc<dyn Picker>,
    client_stats: Option<Arc<ClientStats>>,
    drops: Option<Arc<DropSchedule>>,
}

impl GrpclbPicker {
    pub fn new(
        child: Arc<dyn Picker>,
        client_stats: Option<Arc<ClientStats>>,
        drops: Option<Arc<DropSchedule>>,
    ) -> Self {
        Self {
            child,
            client_stats,
            drops,
        }
    }
}

impl Picker for GrpclbPicker {
    fn pick(&self, request: &PickRequest) -> PickResult {
        if let Some(token) = self.drops.as_ref().and_then(|d| d.next_drop()) {
            if let Some(stats) = &self.client_stats {
                stats.add_call_dropped(token);
            }
            return PickResult::Drop(Status::unavailable("call dropped by load balancer"));
        }

        let mut pick = match self.child.pick(request) {
            PickResult::Pick(pick) => pick,
            other => return other,
        };

        if let Some(LbToken(token)) = pick.subchannel.address().attributes.get::<LbToken>() {
            match token.parse::<AsciiMetadataValue>() {
                Ok(value) => {
                    pick.metadata.insert(LB_TOKEN_METADATA_KEY, value);
                }
                Err(_) => warn!(%token, "load balance token is not valid metadata"),
            }
        }

        if let Some(stats) = &self.client_stats {
            stats.add_call_started();
            let stats = stats.clone();
            let child_on_complete = pick.on_complete.take();
            pick.on_complete = Some(Box::new(move |outcome: &CallOutcome| {
                stats.add_call_finished(outcome);
                if let Some(on_complete) = child_on_complete {
                    on_complete(outcome);
                }
            }));
        }
        PickResult::Pick(pick)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::client::load_balancing::grpclb::codec::ServerEntry;
    use crate::client::load_balancing::test_utils::{TestSubchannel, new_request};
    use crate::client::load_balancing::{FailingPicker, Pick, QueuingPicker};
    use crate::client::name_resolution::ServerAddress;

    struct OnePicker {
        pick: Box<dyn Fn() -> Pick + Send + Sync>,
    }

    impl Picker for OnePicker {
        fn pick(&self, _request: &PickRequest) -> PickResult {
            PickResult::Pick((self.pick)())
        }
    }

    fn address_with_token(token: &str) -> ServerAddress {
        let mut address = ServerAddress::new("10.0.0.1:80".parse().unwrap());
        address.attributes = address.attributes.add(LbToken(token.to_string()));
        address
    }

    #[test]
    fn non_pick_results_pass_through() {
        let stats = Arc::new(ClientStats::new());
        let picker = GrpclbPicker::new(Arc::new(QueuingPicker {}), Some(stats.clone()), None);
        assert!(matches!(picker.pick(&new_request()), PickResult::Queue));

        let picker = GrpclbPicker::new(
            Arc::new(FailingPicker {
                status: Status::unavailable("down"),
            }),
            Some(stats.clone()),
            None,
        );
        assert!(matches!(picker.pick(&new_request()), PickResult::Fail(_)));
        assert!(stats.harvest().is_zero());
    }

    #[test]
    fn pick_attaches_token_and_counts_call() {
        let stats = Arc::new(ClientStats::new());
        let child_completions = Arc::new(AtomicUsize::new(0));
        let counter = child_completions.clone();
        let child = OnePicker {
            pick: Box::new(move || {
                let counter = counter.clone();
                let mut pick = Pick::new(Arc::new(TestSubchannel::new(address_with_token(
                    "token-1",
                ))));
                pick.on_complete = Some(Box::new(move |_: &CallOutcome| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
                pick
            }),
        };
        let picker = GrpclbPicker::new(Arc::new(child), Some(stats.clone()), None);

        let PickResult::Pick(mut pick) = picker.pick(&new_request()) else {
            panic!("expected a pick");
        };
        assert_eq!(
            pick.metadata.get(LB_TOKEN_METADATA_KEY).unwrap(),
            "token-1"
        );
        (pick.on_complete.take().unwrap())(&CallOutcome {
            client_failed_to_send: false,
            known_received: true,
        });
        assert_eq!(child_completions.load(Ordering::SeqCst), 1);

        let snapshot = stats.harvest();
        assert_eq!(snapshot.num_calls_started, 1);
        assert_eq!(snapshot.num_calls_finished, 1);
        assert_eq!(snapshot.num_calls_finished_known_received, 1);
    }

    #[test]
    fn pick_without_stats_is_not_wrapped() {
        let child = OnePicker {
            pick: Box::new(|| {
                Pick::new(Arc::new(TestSubchannel::new(ServerAddress::new(
                    "10.0.0.1:80".parse().unwrap(),
                ))))
            }),
        };
        let picker = GrpclbPicker::new(Arc::new(child), None, None);
        let PickResult::Pick(pick) = picker.pick(&new_request()) else {
            panic!("expected a pick");
        };
        assert!(pick.on_complete.is_none());
        assert!(pick.metadata.get(LB_TOKEN_METADATA_KEY).is_none());
    }

    #[test]
    fn drop_entries_drop_their_share_of_picks() {
        let stats = Arc::new(ClientStats::new());
        let serverlist = Serverlist {
            servers: vec![
                ServerEntry {
                    ip_address: Bytes::from_static(&[10, 0, 0, 1]),
                    port: 80,
                    load_balance_token: "backend".to_string(),
                    drop: false,
                },
                ServerEntry {
                    ip_address: Bytes::new(),
                    port: 0,
                    load_balance_token: "rate-limit".to_string(),
                    drop: true,
                },
                ServerEntry {
                    ip_address: Bytes::new(),
                    port: 0,
                    load_balance_token: "overload".to_string(),
                    drop: true,
                },
            ],
        };
        let child = OnePicker {
            pick: Box::new(|| {
                Pick::new(Arc::new(TestSubchannel::new(ServerAddress::new(
                    "10.0.0.1:80".parse().unwrap(),
                ))))
            }),
        };
        let picker = GrpclbPicker::new(
            Arc::new(child),
            Some(stats.clone()),
            DropSchedule::new(&serverlist),
        );

        let results: Vec<_> = (0..6).map(|_| picker.pick(&new_request())).collect();
        for (i, result) in results.iter().enumerate() {
            if i % 3 == 0 {
                assert!(matches!(result, PickResult::Pick(_)), "pick {i}: {result:?}");
            } else {
                assert!(matches!(result, PickResult::Drop(_)), "pick {i}: {result:?}");
            }
        }

        let snapshot = stats.harvest();
        assert_eq!(snapshot.num_calls_started, 6);
        // Only the dropped calls have finished.
        assert_eq!(snapshot.num_calls_finished, 4);
        assert_eq!(snapshot.calls_finished_with_drop.get("rate-limit"), Some(&2));
        assert_eq!(snapshot.calls_finished_with_drop.get("overload"), Some(&2));
    }

    #[test]
    fn serverlist_without_drops_has_no_schedule() {
        let serverlist = Serverlist {
            servers: vec![ServerEntry {
                ip_address: Bytes::from_static(&[10, 0, 0, 1]),
                port: 80,
                load_balance_token: String::new(),
                drop: false,
            }],
        };
        assert!(DropSchedule::new(&serverlist).is_none());
    }
}
