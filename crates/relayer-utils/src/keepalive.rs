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

/// Something that keeps distributed leases alive while a long wait is in
/// progress.
///
/// The receipt poller takes this as an explicit collaborator and calls it on
/// every iteration, so a multi-minute receipt wait cannot outlive the lease
/// TTLs.
#[async_trait::async_trait]
pub trait Keepalive: Send + Sync {
    /// Best-effort refresh; failures are logged, never surfaced.
    async fn keep_alive(&self);
}

/// A no-op keepalive for paths that hold no lease.
#[async_trait::async_trait]
impl Keepalive for () {
    async fn keep_alive(&self) {}
}
