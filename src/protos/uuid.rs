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

use crate::error::{Result, TxnError};

/// Globally unique 128 bit transaction identifier.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(uuid::Uuid);

impl TransactionId {
    pub fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    pub fn is_nil(self) -> bool {
        self.0.is_nil()
    }

    pub fn new_random() -> Self {
        uuid::Uuid::new_v4().into()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        match uuid::Uuid::from_slice(bytes) {
            Ok(id) => Ok(Self(id)),
            Err(_) => Err(TxnError::InvalidArgument(format!("invalid transaction id {bytes:?}"))),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl From<uuid::Uuid> for TransactionId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl From<TransactionId> for uuid::Uuid {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}

impl Debug for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}
