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

use std::fs::OpenOptions;
use std::sync::Arc;

use tkm_relayer_utils::Result;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` overrides the default `info` level. When `log` names a file
/// the output is appended there (the pid is added as a suffix, every
/// replica gets its own file), otherwise it goes to stderr.
pub fn setup_logger(log: Option<&str>, directive: &str) -> Result<()> {
    let default_filter = if directive.is_empty() {
        "info".to_string()
    } else {
        format!("info,{directive}")
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match log {
        Some(path) => {
            let path = format!("{path}.{}", std::process::id());
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            builder
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => builder.init(),
    }
    Ok(())
}
