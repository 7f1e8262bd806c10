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

use std::pin::Pin;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::{BoxFuture, BoxedTaskHandle, Runtime, Sleep, TaskHandle};

#[derive(Debug, Default)]
pub struct TokioRuntime {
    _priv: (),
}

impl TaskHandle for JoinHandle<()> {
    fn abort(&self) {
        self.abort()
    }
}

impl Sleep for tokio::time::Sleep {}

impl Runtime for TokioRuntime {
    fn spawn(&self, task: BoxFuture<()>) -> BoxedTaskHandle {
        Box::new(tokio::spawn(task))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::TokioRuntime;
    use crate::rt::{Runtime, Timer, default_runtime};

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_delay() {
        let mut timer = Timer::new(default_runtime());
        let (tx, rx) = tokio::sync::oneshot::channel();
        timer.schedule(Duration::from_secs(5), move || {
            let _ = tx.send(());
        });
        assert!(timer.is_pending());
        tokio::time::timeout(Duration::from_secs(6), rx)
            .await
            .expect("timer did not fire")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_does_not_fire() {
        let runtime: Arc<dyn Runtime> = Arc::new(TokioRuntime::default());
        let mut timer = Timer::new(runtime);
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        timer.schedule(Duration::from_secs(5), move || {
            fired_clone.store(true, Ordering::SeqCst);
        });
        timer.cancel();
        assert!(!timer.is_pending());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
