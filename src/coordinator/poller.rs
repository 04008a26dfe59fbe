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

use std::time::Duration;

use tracing::debug;

use crate::timer::Timer;
use crate::utils::{drop_watcher, DropOwner, TaskHandle};

/// Periodic background task, stops once dropped or `tick` returns false.
#[derive(Debug)]
pub struct Poller {
    name: String,
    owner: Option<DropOwner>,
    task: TaskHandle<()>,
}

impl Poller {
    pub fn start(name: String, interval: Duration, mut tick: impl FnMut() -> bool + Send + 'static) -> Self {
        let (owner, mut watcher) = drop_watcher();
        let task_name = name.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = watcher.dropped() => break,
                    _ = Timer::period(interval) => {
                        if !tick() {
                            break;
                        }
                    },
                }
            }
            debug!("{task_name} stopped");
        });
        Self { name, owner: Some(owner), task: TaskHandle::new(task) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn stop(mut self) {
        self.owner.take();
        self.task.join().await;
    }
}
