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

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{BoxedTaskHandle, Runtime};

/// A single cancellable timer.
///
/// At most one firing is pending at a time: scheduling again replaces the
/// pending firing, and dropping the timer cancels it. The callback runs on a
/// runtime task, so it is expected to only hand an event back to whoever owns
/// the timer.
pub struct Timer {
    runtime: Arc<dyn Runtime>,
    pending: Option<BoxedTaskHandle>,
}

impl Timer {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            pending: None,
        }
    }

    pub fn schedule<F>(&mut self, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        let sleep = self.runtime.sleep(delay);
        self.pending = Some(self.runtime.spawn(Box::pin(async move {
            sleep.await;
            on_fire();
        })));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Records that the pending firing was delivered.
    pub fn fired(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("pending", &self.pending.is_some())
            .finish()
    }
}
