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

use thiserror::Error;

/// Errors reported by the grpclb policy to the channel.
#[derive(Debug, Error)]
pub enum GrpclbError {
    #[error("grpclb requires a config")]
    MissingConfig,
    #[error("grpclb config does not name a balancer")]
    MissingBalancerName,
    #[error("invalid grpclb config: {0}")]
    InvalidConfig(String),
    #[error("resolver error: {0}")]
    Resolver(String),
    #[error("no child policy available: {0}")]
    NoChildPolicy(String),
}

/// Errors produced while decoding balancer messages.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to decode message: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("response holds neither an initial response nor a serverlist")]
    UnrecognizedResponse,
    #[error("request holds neither an initial request nor client stats")]
    UnrecognizedRequest,
}
