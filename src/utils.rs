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

use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct DropOwner {
    sender: watch::Sender<()>,
}

#[derive(Clone, Debug)]
pub struct DropWatcher {
    receiver: watch::Receiver<()>,
}

impl DropWatcher {
    pub async fn dropped(&mut self) {
        while self.receiver.changed().await.is_ok() {}
    }
}

impl DropOwner {
    pub fn watch(&self) -> DropWatcher {
        DropWatcher { receiver: self.sender.subscribe() }
    }
}

pub fn drop_watcher() -> (DropOwner, DropWatcher) {
    let (sender, receiver) = watch::channel(());
    (DropOwner { sender }, DropWatcher { receiver })
}

/// Aborts task on drop.
#[derive(Debug)]
pub struct TaskHandle<T> {
    handle: Option<JoinHandle<T>>,
}

impl<T> TaskHandle<T> {
    pub fn new(handle: JoinHandle<T>) -> Self {
        Self { handle: Some(handle) }
    }

    /// Waits task to complete, [None] if it panicked or was cancelled.
    pub async fn join(mut self) -> Option<T> {
        let handle = self.handle.take()?;
        handle.await.ok()
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
