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

//! Wire format of the `grpc.lb.v1.LoadBalancer/BalanceLoad` stream.
//!
//! The protobuf messages are private; the rest of the policy works with the
//! crate-owned types below.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use prost::Message;

use super::client_stats::ClientStatsSnapshot;
use super::error::CodecError;

/// A backend as announced by the balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    /// Big-endian IPv4 or IPv6 address bytes.
    pub ip_address: Bytes,
    pub port: i32,
    /// Opaque token the client attaches to calls sent to this backend.
    pub load_balance_token: String,
    /// Set on entries that instruct the client to drop calls.
    pub drop: bool,
}

/// An ordered list of backends. Two serverlists are the same only when they
/// hold identical entries in identical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Serverlist {
    pub servers: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitialResponse {
    /// How often the client should report load. None disables reporting.
    pub client_stats_report_interval: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalancerResponse {
    Initial(InitialResponse),
    Serverlist(Serverlist),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalancerRequest {
    Initial { name: String },
    LoadReport(ClientStatsSnapshot),
}

pub fn encode_initial_request(name: &str) -> Bytes {
    let request = proto::LoadBalanceRequest {
        load_balance_request_type: Some(proto::load_balance_request::Type::InitialRequest(
            proto::InitialLoadBalanceRequest {
                name: name.to_string(),
            },
        )),
    };
    request.encode_to_vec().into()
}

pub fn decode_response(bytes: Bytes) -> Result<BalancerResponse, CodecError> {
    let response = proto::LoadBalanceResponse::decode(bytes)?;
    match response.load_balance_response_type {
        Some(proto::load_balance_response::Type::InitialResponse(initial)) => {
            Ok(BalancerResponse::Initial(InitialResponse {
                client_stats_report_interval: initial
                    .client_stats_report_interval
                    .and_then(|d| to_interval(&d)),
            }))
        }
        Some(proto::load_balance_response::Type::ServerList(list)) => {
            Ok(BalancerResponse::Serverlist(Serverlist {
                servers: list
                    .servers
                    .into_iter()
                    .map(|s| ServerEntry {
                        ip_address: s.ip_address.into(),
                        port: s.port,
                        load_balance_token: s.load_balance_token,
                        drop: s.drop,
                    })
                    .collect(),
            }))
        }
        None => Err(CodecError::UnrecognizedResponse),
    }
}

/// Encodes a response the way a balancer would send it.
pub fn encode_response(response: &BalancerResponse) -> Bytes {
    let response_type = match response {
        BalancerResponse::Initial(initial) => {
            proto::load_balance_response::Type::InitialResponse(proto::InitialLoadBalanceResponse {
                load_balancer_delegate: String::new(),
                client_stats_report_interval: initial.client_stats_report_interval.map(|d| {
                    proto::Duration {
                        seconds: d.as_secs() as i64,
                        nanos: d.subsec_nanos() as i32,
                    }
                }),
            })
        }
        BalancerResponse::Serverlist(list) => {
            proto::load_balance_response::Type::ServerList(proto::ServerList {
                servers: list
                    .servers
                    .iter()
                    .map(|s| proto::Server {
                        ip_address: s.ip_address.to_vec(),
                        port: s.port,
                        load_balance_token: s.load_balance_token.clone(),
                        drop: s.drop,
                    })
                    .collect(),
            })
        }
    };
    proto::LoadBalanceResponse {
        load_balance_response_type: Some(response_type),
    }
    .encode_to_vec()
    .into()
}

/// Decodes a request the way a balancer would receive it.
pub fn decode_request(bytes: Bytes) -> Result<BalancerRequest, CodecError> {
    let request = proto::LoadBalanceRequest::decode(bytes)?;
    match request.load_balance_request_type {
        Some(proto::load_balance_request::Type::InitialRequest(initial)) => {
            Ok(BalancerRequest::Initial { name: initial.name })
        }
        Some(proto::load_balance_request::Type::ClientStats(stats)) => {
            Ok(BalancerRequest::LoadReport(ClientStatsSnapshot {
                num_calls_started: stats.num_calls_started,
                num_calls_finished: stats.num_calls_finished,
                num_calls_finished_with_client_failed_to_send: stats
                    .num_calls_finished_with_client_failed_to_send,
                num_calls_finished_known_received: stats.num_calls_finished_known_received,
                calls_finished_with_drop: stats
                    .calls_finished_with_drop
                    .into_iter()
                    .map(|d| (d.load_balance_token, d.num_calls))
                    .collect(),
            }))
        }
        None => Err(CodecError::UnrecognizedRequest),
    }
}

/// Encodes load reports, suppressing consecutive all-zero reports.
#[derive(Debug, Default)]
pub struct LoadReportEncoder {
    last_report_was_zero: bool,
}

impl LoadReportEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the encoded report, or None if both this report and the
    /// previous one carry no load.
    pub fn encode(&mut self, snapshot: &ClientStatsSnapshot) -> Option<Bytes> {
        let is_zero = snapshot.is_zero();
        if is_zero && self.last_report_was_zero {
            return None;
        }
        self.last_report_was_zero = is_zero;
        let stats = proto::ClientStats {
            timestamp: now_timestamp(),
            num_calls_started: snapshot.num_calls_started,
            num_calls_finished: snapshot.num_calls_finished,
            num_calls_finished_with_client_failed_to_send: snapshot
                .num_calls_finished_with_client_failed_to_send,
            num_calls_finished_known_received: snapshot.num_calls_finished_known_received,
            calls_finished_with_drop: snapshot
                .calls_finished_with_drop
                .iter()
                .map(|(token, &num_calls)| proto::ClientStatsPerToken {
                    load_balance_token: token.clone(),
                    num_calls,
                })
                .collect(),
        };
        let request = proto::LoadBalanceRequest {
            load_balance_request_type: Some(proto::load_balance_request::Type::ClientStats(stats)),
        };
        Some(request.encode_to_vec().into())
    }
}

/// Zero or negative intervals disable load reporting.
fn to_interval(d: &proto::Duration) -> Option<Duration> {
    if d.seconds < 0 || d.nanos < 0 {
        return None;
    }
    let interval = Duration::from_secs(d.seconds as u64) + Duration::from_nanos(d.nanos as u64);
    (!interval.is_zero()).then_some(interval)
}

fn now_timestamp() -> Option<proto::Timestamp> {
    let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    Some(proto::Timestamp {
        seconds: since_epoch.as_secs() as i64,
        nanos: since_epoch.subsec_nanos() as i32,
    })
}

mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct LoadBalanceRequest {
        #[prost(oneof = "load_balance_request::Type", tags = "1, 2")]
        pub load_balance_request_type: Option<load_balance_request::Type>,
    }

    pub mod load_balance_request {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Type {
            #[prost(message, tag = "1")]
            InitialRequest(super::InitialLoadBalanceRequest),
            #[prost(message, tag = "2")]
            ClientStats(super::ClientStats),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct InitialLoadBalanceRequest {
        #[prost(string, tag = "1")]
        pub name: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ClientStatsPerToken {
        #[prost(string, tag = "1")]
        pub load_balance_token: String,
        #[prost(int64, tag = "2")]
        pub num_calls: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ClientStats {
        #[prost(message, optional, tag = "1")]
        pub timestamp: Option<Timestamp>,
        #[prost(int64, tag = "2")]
        pub num_calls_started: i64,
        #[prost(int64, tag = "3")]
        pub num_calls_finished: i64,
        #[prost(int64, tag = "6")]
        pub num_calls_finished_with_client_failed_to_send: i64,
        #[prost(int64, tag = "7")]
        pub num_calls_finished_known_received: i64,
        #[prost(message, repeated, tag = "8")]
        pub calls_finished_with_drop: Vec<ClientStatsPerToken>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct LoadBalanceResponse {
        #[prost(oneof = "load_balance_response::Type", tags = "1, 2")]
        pub load_balance_response_type: Option<load_balance_response::Type>,
    }

    pub mod load_balance_response {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Type {
            #[prost(message, tag = "1")]
            InitialResponse(super::InitialLoadBalanceResponse),
            #[prost(message, tag = "2")]
            ServerList(super::ServerList),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct InitialLoadBalanceResponse {
        #[prost(string, tag = "1")]
        pub load_balancer_delegate: String,
        #[prost(message, optional, tag = "2")]
        pub client_stats_report_interval: Option<Duration>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ServerList {
        #[prost(message, repeated, tag = "1")]
        pub servers: Vec<Server>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Server {
        #[prost(bytes = "vec", tag = "1")]
        pub ip_address: Vec<u8>,
        #[prost(int32, tag = "2")]
        pub port: i32,
        #[prost(string, tag = "3")]
        pub load_balance_token: String,
        #[prost(bool, tag = "4")]
        pub drop: bool,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Duration {
        #[prost(int64, tag = "1")]
        pub seconds: i64,
        #[prost(int32, tag = "2")]
        pub nanos: i32,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Timestamp {
        #[prost(int64, tag = "1")]
        pub seconds: i64,
        #[prost(int32, tag = "2")]
        pub nanos: i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_request_carries_name() {
        let bytes = encode_initial_request("service.test");
        assert_eq!(
            decode_request(bytes).unwrap(),
            BalancerRequest::Initial {
                name: "service.test".to_string()
            }
        );
    }

    #[test]
    fn serverlist_decodes_in_order() {
        let list = Serverlist {
            servers: vec![
                ServerEntry {
                    ip_address: Bytes::from_static(&[10, 0, 0, 1]),
                    port: 443,
                    load_balance_token: "t1".to_string(),
                    drop: false,
                },
                ServerEntry {
                    ip_address: Bytes::new(),
                    port: 0,
                    load_balance_token: "t2".to_string(),
                    drop: true,
                },
            ],
        };
        let decoded = decode_response(encode_response(&BalancerResponse::Serverlist(list.clone())));
        assert_eq!(decoded.unwrap(), BalancerResponse::Serverlist(list));
    }

    #[test]
    fn report_interval_zero_disables_reporting() {
        let zero = encode_response(&BalancerResponse::Initial(InitialResponse {
            client_stats_report_interval: Some(Duration::ZERO),
        }));
        assert_eq!(
            decode_response(zero).unwrap(),
            BalancerResponse::Initial(InitialResponse {
                client_stats_report_interval: None
            })
        );

        let negative = proto::LoadBalanceResponse {
            load_balance_response_type: Some(proto::load_balance_response::Type::InitialResponse(
                proto::InitialLoadBalanceResponse {
                    load_balancer_delegate: String::new(),
                    client_stats_report_interval: Some(proto::Duration {
                        seconds: -1,
                        nanos: 0,
                    }),
                },
            )),
        };
        assert_eq!(
            decode_response(negative.encode_to_vec().into()).unwrap(),
            BalancerResponse::Initial(InitialResponse {
                client_stats_report_interval: None
            })
        );

        let interval = encode_response(&BalancerResponse::Initial(InitialResponse {
            client_stats_report_interval: Some(Duration::from_millis(1500)),
        }));
        assert_eq!(
            decode_response(interval).unwrap(),
            BalancerResponse::Initial(InitialResponse {
                client_stats_report_interval: Some(Duration::from_millis(1500))
            })
        );
    }

    #[test]
    fn malformed_and_empty_responses_are_errors() {
        assert!(matches!(
            decode_response(Bytes::from_static(&[0xff, 0xff, 0xff])),
            Err(CodecError::Decode(_))
        ));
        assert!(matches!(
            decode_response(Bytes::new()),
            Err(CodecError::UnrecognizedResponse)
        ));
    }

    #[test]
    fn consecutive_zero_reports_are_suppressed() {
        let mut encoder = LoadReportEncoder::new();
        let zero = ClientStatsSnapshot::default();
        let busy = ClientStatsSnapshot {
            num_calls_started: 3,
            num_calls_finished: 2,
            ..Default::default()
        };

        // The first zero report is still sent.
        assert!(encoder.encode(&zero).is_some());
        assert!(encoder.encode(&zero).is_none());

        let bytes = encoder.encode(&busy).unwrap();
        assert_eq!(
            decode_request(bytes).unwrap(),
            BalancerRequest::LoadReport(busy)
        );
        // A zero report after a busy one is sent once.
        assert!(encoder.encode(&zero).is_some());
        assert!(encoder.encode(&zero).is_none());
    }
}
