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

use std::fmt;
use std::net::UdpSocket;

use tkm_relayer_types::{Address, ChainId};

const SENDER_LOCK_PREFIX: &str = "targetSender";

/// The store keys one relay process works with, derived once at startup and
/// logged. `target_name` scopes every key so several deployments can share
/// one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeKeys {
    /// Cursor key: `{mode}_{target}_start_{srcChainId}`.
    pub cursor: String,
    /// Runner lease key: `{mode}_{target}_lock_{srcChainId}`.
    pub runner_lock: String,
    /// Lease token of this process: `{ip}@{pid}`.
    pub runner_token: String,
    /// Sender lease key: `targetSender_{targetChainId}_0x{senderAddr}`.
    pub sender_lock: String,
    /// Last-update timestamp key (update mode):
    /// `{mode}_{target}_lastTimeStamp_{srcChainId}`.
    pub last_update: String,
}

impl RuntimeKeys {
    /// Derives the key set for one `(mode, target, src-chain)` stream.
    pub fn derive(
        mode: &str,
        target_name: &str,
        src_chain: ChainId,
        target_chain: u64,
        sender: Address,
    ) -> Self {
        let prefix =
            format!("{}_{}", mode.to_lowercase(), target_name.to_lowercase());
        Self {
            cursor: format!("{prefix}_start_{}", src_chain.0),
            runner_lock: format!("{prefix}_lock_{}", src_chain.0),
            runner_token: runner_token(),
            sender_lock: format!(
                "{SENDER_LOCK_PREFIX}_{target_chain}_0x{sender:x}"
            ),
            last_update: format!("{prefix}_lastTimeStamp_{}", src_chain.0),
        }
    }

    /// The cursor key of the xsync stream feeding the same target, read by
    /// xmaintain for the syncing-epoch hint.
    pub fn xsync_cursor(target_name: &str, src_chain: ChainId) -> String {
        format!(
            "xsync_{}_start_{}",
            target_name.to_lowercase(),
            src_chain.0
        )
    }
}

impl fmt::Display for RuntimeKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KEYS{{start: {} Lock{{runner:({} = {}) sender: {}}}}}",
            self.cursor, self.runner_lock, self.runner_token, self.sender_lock
        )
    }
}

/// The lease token identifying this process: `{ip}@{pid}`.
pub fn runner_token() -> String {
    format!("{}@{}", local_ip(), std::process::id())
}

// Routing trick: no packet is sent, the OS just picks the outbound address.
fn local_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|sock| {
            sock.connect("8.8.8.8:80")?;
            sock.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_mode_target_and_chain() {
        let sender = Address::repeat_byte(0xab);
        let keys = RuntimeKeys::derive("MAINTAIN", "BSC", ChainId(0), 56, sender);
        assert_eq!(keys.cursor, "maintain_bsc_start_0");
        assert_eq!(keys.runner_lock, "maintain_bsc_lock_0");
        assert_eq!(keys.last_update, "maintain_bsc_lastTimeStamp_0");
        assert_eq!(
            keys.sender_lock,
            format!("targetSender_56_0x{}", "ab".repeat(20))
        );
        assert!(keys.runner_token.contains('@'));
    }

    #[test]
    fn xsync_cursor_matches_the_sync_stream() {
        let keys =
            RuntimeKeys::derive("XSYNC", "BSC", ChainId(100), 56, Address::zero());
        assert_eq!(
            RuntimeKeys::xsync_cursor("BSC", ChainId(100)),
            keys.cursor
        );
    }
}
