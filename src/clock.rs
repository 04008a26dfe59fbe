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

use std::fmt::{self, Debug, Display, Formatter};
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use static_assertions::{assert_impl_all, assert_not_impl_any};

const LOGICAL_BITS: u32 = 12;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// Physical microseconds since unix epoch in high bits plus a logical counter in low 12 bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HybridTime(u64);

impl HybridTime {
    pub const MIN: HybridTime = HybridTime(0);
    pub const MAX: HybridTime = HybridTime(u64::MAX);

    pub const fn new(physical_micros: u64, logical: u64) -> Self {
        Self((physical_micros << LOGICAL_BITS) | (logical & LOGICAL_MASK))
    }

    pub const fn from_micros(physical_micros: u64) -> Self {
        Self::new(physical_micros, 0)
    }

    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub const fn to_u64(self) -> u64 {
        self.0
    }

    pub const fn physical_micros(self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    pub const fn logical(self) -> u64 {
        self.0 & LOGICAL_MASK
    }

    pub const fn is_max(self) -> bool {
        self.0 == u64::MAX
    }

    /// Largest hybrid time strictly before this one.
    pub const fn decremented(self) -> Self {
        match self.0 {
            0 => self,
            n => Self(n - 1),
        }
    }

    pub const fn incremented(self) -> Self {
        match self.0 {
            u64::MAX => self,
            n => Self(n + 1),
        }
    }

    /// Elapsed physical time from `earlier` to `self`, zero if `earlier` is later.
    pub fn physical_since(self, earlier: HybridTime) -> Duration {
        Duration::from_micros(self.physical_micros().saturating_sub(earlier.physical_micros()))
    }
}

impl Debug for HybridTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            return f.write_str("<max>");
        }
        write!(f, "{{ physical: {} logical: {} }}", self.physical_micros(), self.logical())
    }
}

impl Display for HybridTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

impl Add<Duration> for HybridTime {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        if self.is_max() {
            return self;
        }
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        let physical = self.physical_micros().saturating_add(micros).min(u64::MAX >> LOGICAL_BITS);
        Self::new(physical, self.logical())
    }
}

impl Sub<Duration> for HybridTime {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self {
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Self::new(self.physical_micros().saturating_sub(micros), self.logical())
    }
}

enum PhysicalSource {
    System,
    Manual(AtomicU64),
}

impl PhysicalSource {
    fn now_micros(&self) -> u64 {
        match self {
            PhysicalSource::System => {
                let elapsed = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
                u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
            },
            PhysicalSource::Manual(micros) => micros.load(Ordering::Relaxed),
        }
    }
}

struct HybridClock {
    source: PhysicalSource,
    mutex: spin::Mutex<HybridTime>,
}

assert_impl_all!(HybridClock: Send, Sync);
assert_not_impl_any!(HybridClock: Clone, Copy);

impl HybridClock {
    fn new(source: PhysicalSource) -> Self {
        let now = HybridTime::from_micros(source.now_micros());
        Self { source, mutex: spin::Mutex::new(now) }
    }

    fn now(&self) -> HybridTime {
        let mut now = HybridTime::from_micros(self.source.now_micros());
        let mut cache = self.mutex.lock();
        if now <= *cache {
            now = cache.incremented();
        }
        *cache = now;
        now
    }

    fn update(&self, time: HybridTime) {
        if time.is_max() {
            return;
        }
        let mut cache = self.mutex.lock();
        if time > *cache {
            *cache = time;
        }
    }
}

/// Monotonic hybrid clock shared by a tablet and its collaborators.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<HybridClock>,
}

impl Clock {
    pub fn new() -> Self {
        Self { inner: Arc::new(HybridClock::new(PhysicalSource::System)) }
    }

    /// Clock whose physical part only moves through [Clock::advance].
    pub fn manual(start: HybridTime) -> Self {
        let source = PhysicalSource::Manual(AtomicU64::new(start.physical_micros()));
        Self { inner: Arc::new(HybridClock::new(source)) }
    }

    pub fn now(&self) -> HybridTime {
        self.inner.now()
    }

    pub fn update(&self, time: HybridTime) {
        self.inner.update(time)
    }

    /// Advances physical time of a manual clock, no-op for system clock.
    pub fn advance(&self, duration: Duration) {
        if let PhysicalSource::Manual(micros) = &self.inner.source {
            let delta = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
            micros.fetch_add(delta, Ordering::Relaxed);
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Clock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock").field("last", &*self.inner.mutex.lock()).finish()
    }
}
