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

//! Key layout of regular and intents databases.
//!
//! Intents db:
//! * `m` + transaction id: transaction metadata
//! * `r` + transaction id + write id: reverse index to intent key
//! * `i` + user key length + user key + transaction id + write id: intent value
//!
//! Regular db keys are user key length + user key + inverted commit time + inverted write id,
//! so newer versions of one user key sort first.

use anyhow::{bail, Result};

use crate::clock::HybridTime;
use crate::protos::TransactionId;

pub const METADATA_KEY_PREFIX: &[u8] = &[b'm'];
pub const REVERSE_KEY_PREFIX: &[u8] = &[b'r'];
pub const INTENT_KEY_PREFIX: &[u8] = &[b'i'];

const ID_LEN: usize = 16;
const LEN_LEN: usize = 4;
const WRITE_ID_LEN: usize = 4;
const TIME_LEN: usize = 8;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IntentsKeyKind {
    Metadata,
    Reverse,
    Intent,
}

pub fn identify_intents_key(key: &[u8]) -> Result<IntentsKeyKind> {
    match key.first() {
        Some(b'm') if key.len() == 1 + ID_LEN => Ok(IntentsKeyKind::Metadata),
        Some(b'r') if key.len() == 1 + ID_LEN + WRITE_ID_LEN => Ok(IntentsKeyKind::Reverse),
        Some(b'i') if key.len() >= 1 + LEN_LEN + ID_LEN + WRITE_ID_LEN => Ok(IntentsKeyKind::Intent),
        _ => bail!("invalid intents key: {:?}", key),
    }
}

pub fn metadata_key(id: TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(METADATA_KEY_PREFIX.len() + ID_LEN);
    key.extend(METADATA_KEY_PREFIX.iter());
    key.extend(id.as_bytes().iter());
    key
}

pub fn reverse_prefix(id: TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(REVERSE_KEY_PREFIX.len() + ID_LEN + WRITE_ID_LEN);
    key.extend(REVERSE_KEY_PREFIX.iter());
    key.extend(id.as_bytes().iter());
    key
}

pub fn reverse_key(id: TransactionId, write_id: u32) -> Vec<u8> {
    let mut key = reverse_prefix(id);
    key.extend(write_id.to_be_bytes());
    key
}

fn put_user_key(buf: &mut Vec<u8>, user_key: &[u8]) {
    let len = u32::try_from(user_key.len()).unwrap_or(u32::MAX);
    buf.extend(len.to_be_bytes());
    buf.extend(user_key.iter());
}

fn split_user_key(key: &[u8]) -> Result<(&[u8], &[u8])> {
    if key.len() < LEN_LEN {
        bail!("key too short: {:?}", key)
    }
    let mut len = [0u8; LEN_LEN];
    len.copy_from_slice(&key[..LEN_LEN]);
    let len = u32::from_be_bytes(len) as usize;
    let rest = &key[LEN_LEN..];
    if rest.len() < len {
        bail!("truncated user key: {:?}", key)
    }
    Ok(rest.split_at(len))
}

fn read_u32(bytes: &[u8]) -> Result<u32> {
    match <[u8; WRITE_ID_LEN]>::try_from(bytes) {
        Ok(bytes) => Ok(u32::from_be_bytes(bytes)),
        Err(_) => bail!("invalid u32 bytes: {:?}", bytes),
    }
}

pub fn intent_key(user_key: &[u8], id: TransactionId, write_id: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(INTENT_KEY_PREFIX.len() + LEN_LEN + user_key.len() + ID_LEN + WRITE_ID_LEN);
    key.extend(INTENT_KEY_PREFIX.iter());
    put_user_key(&mut key, user_key);
    key.extend(id.as_bytes().iter());
    key.extend(write_id.to_be_bytes());
    key
}

pub fn decode_intent_key(key: &[u8]) -> Result<(&[u8], TransactionId, u32)> {
    let Some(key) = key.strip_prefix(INTENT_KEY_PREFIX) else {
        bail!("not an intent key: {:?}", key)
    };
    let (user_key, rest) = split_user_key(key)?;
    if rest.len() != ID_LEN + WRITE_ID_LEN {
        bail!("invalid intent key suffix: {:?}", rest)
    }
    let (id, write_id) = rest.split_at(ID_LEN);
    let id = TransactionId::from_slice(id).map_err(anyhow::Error::new)?;
    Ok((user_key, id, read_u32(write_id)?))
}

/// Prefix of all versions of `user_key` in regular db.
pub fn regular_prefix(user_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(LEN_LEN + user_key.len() + TIME_LEN + WRITE_ID_LEN);
    put_user_key(&mut key, user_key);
    key
}

pub fn regular_key(user_key: &[u8], time: HybridTime, write_id: u32) -> Vec<u8> {
    let mut key = regular_prefix(user_key);
    key.extend((!time.to_u64()).to_be_bytes());
    key.extend((!write_id).to_be_bytes());
    key
}

pub fn decode_regular_key(key: &[u8]) -> Result<(&[u8], HybridTime, u32)> {
    let (user_key, rest) = split_user_key(key)?;
    if rest.len() != TIME_LEN + WRITE_ID_LEN {
        bail!("invalid regular key suffix: {:?}", rest)
    }
    let (time, write_id) = rest.split_at(TIME_LEN);
    let mut bytes = [0u8; TIME_LEN];
    bytes.copy_from_slice(time);
    let time = HybridTime::from_u64(!u64::from_be_bytes(bytes));
    Ok((user_key, time, !read_u32(write_id)?))
}
