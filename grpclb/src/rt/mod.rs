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

//! Runtime abstraction used by the load balancing policies.
//!
//! Policies never call into tokio directly: spawning, sleeping and timer
//! cancellation all go through [`Runtime`], which keeps the policies testable
//! with a fake clock.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "_runtime-tokio")]
pub mod tokio;

mod timer;

pub use timer::Timer;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

pub type BoxedTaskHandle = Box<dyn TaskHandle>;

/// An abstraction over an asynchronous runtime.
///
/// The `Runtime` trait defines the functionality the policies need for
/// executing background tasks and for time-based operations such as
/// sleeping.
pub trait Runtime: Send + Sync {
    /// Spawns the given asynchronous task to run in the background.
    fn spawn(&self, task: BoxFuture<()>) -> BoxedTaskHandle;

    /// Returns a future that completes after the specified duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>>;
}

/// A future that resolves after a specified duration.
pub trait Sleep: Send + Sync + Future<Output = ()> {}

pub trait TaskHandle: Send + Sync {
    /// Abort the associated task.
    fn abort(&self);
}

/// Returns the runtime used when a caller does not provide one.
#[cfg(feature = "_runtime-tokio")]
pub fn default_runtime() -> Arc<dyn Runtime> {
    Arc::new(self::tokio::TokioRuntime::default())
}
