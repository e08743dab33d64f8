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

//! TKM Bridge Relayer Binary.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use clap::Parser;

mod cli;
mod commands;
mod pem;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    match commands::run(args).await {
        Ok(()) => {}
        Err(e) if e.exit_code() == 0 => {
            // an explicitly coded clean exit ("comms checked")
            tracing::info!("{e}");
        }
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("{e}");
            std::process::exit(e.exit_code());
        }
    }
}
