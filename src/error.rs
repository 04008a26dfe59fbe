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

use thiserror::Error;

use crate::types::TabletId;

#[derive(Clone, Debug, Error)]
pub enum TxnError {
    /// Missed too many heartbeats. Clients treat this as serialization failure.
    #[error("expired: {0}")]
    Expired(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("aborted: {0}")]
    Aborted(String),
    #[error("try again: {0}")]
    TryAgain(String),
    #[error("not found: {message}, split into {split_child_tablet_ids:?}")]
    NotFound { message: String, split_child_tablet_ids: Vec<TabletId> },
    #[error("timed out: {0}")]
    TimedOut(String),
    #[error("already present: {0}")]
    AlreadyPresent(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error(transparent)]
    Internal(Arc<anyhow::Error>),
}

impl TxnError {
    pub fn expired(message: impl Into<String>) -> Self {
        Self::Expired(message.into())
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into(), split_child_tablet_ids: Vec::new() }
    }

    pub fn tablet_split(tablet_id: &str, children: Vec<TabletId>) -> Self {
        Self::NotFound { message: format!("tablet {tablet_id} split"), split_child_tablet_ids: children }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Expired(_) | Self::Aborted(_) | Self::TryAgain(_) | Self::TimedOut(_))
    }

    pub fn is_serialization_failure(&self) -> bool {
        matches!(self, Self::Expired(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn split_child_tablet_ids(&self) -> &[TabletId] {
        match self {
            Self::NotFound { split_child_tablet_ids, .. } => split_child_tablet_ids,
            _ => &[],
        }
    }
}

impl From<anyhow::Error> for TxnError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(Arc::new(err))
    }
}

impl From<prost::DecodeError> for TxnError {
    fn from(err: prost::DecodeError) -> Self {
        Self::Corruption(err.to_string())
    }
}

pub type Result<T, E = TxnError> = std::result::Result<T, E>;
