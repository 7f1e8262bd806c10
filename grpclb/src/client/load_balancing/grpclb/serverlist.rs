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

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tracing::debug;

use super::codec::{ServerEntry, Serverlist};
use crate::client::channel_args::ChannelArgs;
use crate::client::name_resolution::{ServerAddress, ServerAddressList};

/// The load balance token of the backend an address came from, carried as
/// an address attribute so the picker can attach it to calls.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LbToken(pub String);

/// Reports whether `entry` names a usable backend. Drop entries never do.
pub fn is_server_valid(entry: &ServerEntry) -> bool {
    if entry.drop {
        return false;
    }
    if !(0..=i32::from(u16::MAX)).contains(&entry.port) {
        return false;
    }
    matches!(entry.ip_address.len(), 4 | 16)
}

fn socket_addr(entry: &ServerEntry) -> Option<SocketAddr> {
    let port = u16::try_from(entry.port).ok()?;
    let ip = match entry.ip_address.len() {
        4 => {
            let octets: [u8; 4] = entry.ip_address[..].try_into().ok()?;
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = entry.ip_address[..].try_into().ok()?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

/// Converts the usable entries of a serverlist into backend addresses,
/// preserving order. Each address carries its load balance token and `args`.
pub fn backend_addresses(serverlist: &Serverlist, args: &ChannelArgs) -> ServerAddressList {
    serverlist
        .servers
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            if entry.drop {
                return None;
            }
            let addr = match socket_addr(entry).filter(|_| is_server_valid(entry)) {
                Some(addr) => addr,
                None => {
                    debug!(
                        index,
                        port = entry.port,
                        ip_len = entry.ip_address.len(),
                        "skipping invalid serverlist entry"
                    );
                    return None;
                }
            };
            let mut address = ServerAddress::new(addr);
            address.args = Some(args.clone());
            if !entry.load_balance_token.is_empty() {
                address.attributes = address
                    .attributes
                    .add(LbToken(entry.load_balance_token.clone()));
            }
            Some(address)
        })
        .collect()
}
