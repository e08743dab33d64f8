// Copyright 2023 TikBridge
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Relayer Engine
//!
//! The distributed relay engine shared by every mode: a redis-coordinated
//! cursor loop that fetches source block batches, hands each block to the
//! mode's [`BlockHandler`], persists the cursor after every block and routes
//! runtime errors into release-and-retry, keep-leases-and-retry or exit.

/// The per-process relay context.
pub mod context;
/// The cursor loop.
pub mod engine;

pub use context::RelayContext;
pub use engine::{BlockHandler, Engine};
