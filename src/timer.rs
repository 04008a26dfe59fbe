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

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_io::Timer as IoTimer;

enum Inner {
    Never,
    Timer(IoTimer),
}

/// One shot timer, or a timer that never fires for disabled periodic work.
pub struct Timer {
    inner: Inner,
}

impl Timer {
    pub fn never() -> Timer {
        Self { inner: Inner::Never }
    }

    pub fn after(duration: Duration) -> Timer {
        Self { inner: Inner::Timer(IoTimer::after(duration)) }
    }

    /// Timer for periodic work, never fires if `period` is zero.
    pub fn period(period: Duration) -> Timer {
        match period.is_zero() {
            true => Self::never(),
            false => Self::after(period),
        }
    }
}

impl Future for Timer {
    type Output = Instant;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            Inner::Never => Poll::Pending,
            Inner::Timer(timer) => Pin::new(timer).poll(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assertor::*;
    use futures::FutureExt;

    use super::*;

    #[tokio::test]
    async fn test_timer_after() {
        let start = Instant::now();
        let fired = Timer::after(Duration::from_millis(10)).await;
        assert_that!(fired.duration_since(start)).is_at_least(Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_timer_never() {
        assert_that!(Timer::period(Duration::ZERO).now_or_never().is_none()).is_equal_to(true);
        let timer = tokio::time::timeout(Duration::from_millis(10), Timer::never()).await;
        assert_that!(timer.is_err()).is_equal_to(true);
    }
}
