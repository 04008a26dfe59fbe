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

//! Transaction status tablet: coordination of distributed transactions and the participant
//! side apply path of their intents.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod local;
pub mod metrics;
pub mod protos;
pub mod tablet;
pub mod timer;
pub mod types;
pub mod utils;
