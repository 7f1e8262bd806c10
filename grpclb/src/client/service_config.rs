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

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

/// A convenience wrapper for an LB policy's parsed configuration object.
#[derive(Clone)]
pub struct LbConfig {
    config: Arc<dyn Any + Send + Sync>,
}

impl LbConfig {
    /// Create a new LbConfig wrapper containing the provided config.
    pub fn new(config: impl Any + Send + Sync) -> Self {
        LbConfig {
            config: Arc::new(config),
        }
    }

    /// Extracts the LB policy's configuration object, or None if the wrapped
    /// value is of another type.
    pub fn convert_to<T: 'static + Send + Sync>(&self) -> Option<Arc<T>> {
        self.config.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for LbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LbConfig { .. }")
    }
}

/// An LB policy's configuration as it appears in the service config JSON,
/// before the policy has parsed it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedJsonLbConfig {
    pub value: serde_json::Value,
}

impl ParsedJsonLbConfig {
    pub fn new(value: serde_json::Value) -> Self {
        ParsedJsonLbConfig { value }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(ParsedJsonLbConfig {
            value: serde_json::from_str(json)?,
        })
    }

    /// Deserializes the JSON into the policy's config type.
    pub fn convert_to<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }
}
