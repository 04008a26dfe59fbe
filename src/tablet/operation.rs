// Copyright 2023 The SeamDB Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Result, TxnError};

#[derive(Clone, Copy, Debug, Default)]
struct OperationState {
    running: usize,
    paused: usize,
    stopped: bool,
}

struct CounterInner {
    resource: String,
    state: watch::Sender<OperationState>,
}

/// Counts running read write operations on a resource, so exclusive operations could wait
/// for them to drain.
#[derive(Clone)]
pub struct RwOperationCounter {
    inner: Arc<CounterInner>,
}

impl RwOperationCounter {
    pub fn new(resource: impl Into<String>) -> Self {
        let (state, _) = watch::channel(OperationState::default());
        Self { inner: Arc::new(CounterInner { resource: resource.into(), state }) }
    }

    pub fn running(&self) -> usize {
        self.inner.state.borrow().running
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.borrow().stopped
    }

    fn register(&self) -> Result<()> {
        let mut result = Ok(());
        self.inner.state.send_if_modified(|state| {
            if state.stopped {
                result = Err(TxnError::aborted(format!("{} is shutting down", self.inner.resource)));
                false
            } else if state.paused != 0 {
                result = Err(TxnError::TryAgain(format!("{} is paused", self.inner.resource)));
                false
            } else {
                state.running += 1;
                true
            }
        });
        result
    }

    fn unregister(&self) {
        self.inner.state.send_modify(|state| state.running -= 1);
    }

    /// Starts an operation which ends on drop of returned guard.
    pub fn operation(&self) -> Result<ScopedRwOperation> {
        self.register()?;
        Ok(ScopedRwOperation { counter: self.clone() })
    }

    async fn wait_drained(&self, deadline: tokio::time::Instant) -> Result<()> {
        let mut receiver = self.inner.state.subscribe();
        let result = match tokio::time::timeout_at(deadline, receiver.wait_for(|state| state.running == 0)).await {
            Ok(_) => Ok(()),
            Err(_) => Err(TxnError::TimedOut(format!(
                "timed out waiting for all pending operations of {} to complete, {} still running",
                self.inner.resource,
                self.running()
            ))),
        };
        result
    }

    /// Rejects new operations and waits running ones to complete.
    pub async fn pause(&self, deadline: tokio::time::Instant) -> Result<ScopedRwOperationPause> {
        self.inner.state.send_modify(|state| state.paused += 1);
        let pause = ScopedRwOperationPause { counter: self.clone() };
        self.wait_drained(deadline).await?;
        debug!("{} paused", self.inner.resource);
        Ok(pause)
    }

    /// Rejects all further operations and waits running ones to complete.
    pub async fn stop(&self, deadline: tokio::time::Instant) -> Result<()> {
        self.inner.state.send_modify(|state| state.stopped = true);
        if let Err(err) = self.wait_drained(deadline).await {
            warn!("{}", err);
            return Err(err);
        }
        Ok(())
    }
}

/// Running read write operation.
pub struct ScopedRwOperation {
    counter: RwOperationCounter,
}

impl Drop for ScopedRwOperation {
    fn drop(&mut self) {
        self.counter.unregister();
    }
}

/// Pause of operations, resumed on drop.
pub struct ScopedRwOperationPause {
    counter: RwOperationCounter,
}

impl Drop for ScopedRwOperationPause {
    fn drop(&mut self) {
        self.counter.inner.state.send_modify(|state| state.paused -= 1);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assertor::*;

    use super::*;

    fn deadline(millis: u64) -> tokio::time::Instant {
        tokio::time::Instant::now() + Duration::from_millis(millis)
    }

    #[tokio::test]
    async fn test_pause_waits_operations() {
        let counter = RwOperationCounter::new("T t1: regular db");
        let operation = counter.operation().unwrap();
        assert_that!(counter.running()).is_equal_to(1);

        let err = counter.pause(deadline(20)).await.err().unwrap();
        assert_that!(matches!(err, TxnError::TimedOut(_))).is_true();
        counter.operation().unwrap();

        let pausing = tokio::spawn({
            let counter = counter.clone();
            async move { counter.pause(deadline(5000)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(operation);
        let pause = pausing.await.unwrap().unwrap();

        let err = counter.operation().err().unwrap();
        assert_that!(matches!(err, TxnError::TryAgain(_))).is_true();
        drop(pause);
        counter.operation().unwrap();
    }

    #[tokio::test]
    async fn test_stop() {
        let counter = RwOperationCounter::new("T t1: intents db");
        counter.stop(deadline(100)).await.unwrap();
        assert_that!(counter.is_stopped()).is_true();
        let err = counter.operation().err().unwrap();
        assert_that!(matches!(err, TxnError::Aborted(_))).is_true();
    }
}
