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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::storage::{FlushAbility, MemoryDb};
use crate::error::Result;
use crate::metrics::TabletMetrics;

/// Intents db flushes only up to the log index regular db has flushed, forcing regular db
/// to flush once intents waited longer than `max_delay`.
pub struct IntentsFlushFilter {
    log_prefix: String,
    regular: Arc<MemoryDb>,
    intents: Arc<MemoryDb>,
    max_delay: Duration,
    waiting_since: Mutex<Option<Instant>>,
    shutting_down: AtomicBool,
    metrics: Arc<TabletMetrics>,
}

impl IntentsFlushFilter {
    pub fn new(
        log_prefix: String,
        regular: Arc<MemoryDb>,
        intents: Arc<MemoryDb>,
        max_delay: Duration,
        metrics: Arc<TabletMetrics>,
    ) -> Self {
        Self {
            log_prefix,
            regular,
            intents,
            max_delay,
            waiting_since: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Whether intents memtable could be flushed now.
    pub fn allow_flush(&self, now: Instant) -> Result<bool> {
        let Some(intents_frontiers) = self.intents.memtable_frontiers() else {
            return Ok(true);
        };
        let largest_intents_index = intents_frontiers.largest.op_id.index;
        let regular_flushed_index =
            self.regular.flushed_frontiers().map_or(0, |frontiers| frontiers.largest.op_id.index);
        let mut waiting_since = self.waiting_since.lock().unwrap_or_else(PoisonError::into_inner);
        if regular_flushed_index >= largest_intents_index {
            debug!(
                "{}allow intents flush, regular flushed {} >= intents {}",
                self.log_prefix, regular_flushed_index, largest_intents_index
            );
            *waiting_since = None;
            return Ok(true);
        }
        if self.regular.flush_ability() == FlushAbility::NoNewData {
            debug!("{}allow intents flush, regular db has no new data", self.log_prefix);
            *waiting_since = None;
            return Ok(true);
        }
        let since = *waiting_since.get_or_insert(now);
        let shutting_down = self.shutting_down.load(Ordering::SeqCst);
        if shutting_down || now.saturating_duration_since(since) > self.max_delay {
            info!(
                "{}force regular db flush, intents waited {:?}, shutting down {}",
                self.log_prefix,
                now.saturating_duration_since(since),
                shutting_down
            );
            if let Err(err) = self.regular.flush() {
                warn!("{}fail to force flush regular db: {}", self.log_prefix, err);
                return Err(err);
            }
            self.metrics.regular_force_flushed();
        }
        Ok(false)
    }

    /// Flushes intents db if allowed.
    pub fn flush_intents(&self, now: Instant) -> Result<bool> {
        if !self.allow_flush(now)? {
            return Ok(false);
        }
        let flushed = self.intents.flush()?;
        if flushed {
            self.metrics.intents_flushed();
        }
        Ok(flushed)
    }
}
