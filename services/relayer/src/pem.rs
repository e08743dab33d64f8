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

//! Sender key material: hex keys, PEM-encoded PKCS#8 key files (plain or
//! password-protected), and the one-shot `pem` import/export subcommand.

use ethers::signers::LocalWallet;
use k256::ecdsa::SigningKey;
use k256::SecretKey;
use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use tkm_relayer_config::TargetConfig;
use tkm_relayer_utils::{Error, Result};

use crate::cli::PemArgs;

const ENCRYPTED_LABEL: &str = "ENCRYPTED PRIVATE KEY";

fn prompt(hint: &str) -> Result<String> {
    rpassword::prompt_password(hint)
        .map_err(|e| Error::Input(format!("read password failed: {e}")))
}

/// Parses a PKCS#8 PEM, asking for the password when the file is encrypted
/// and none was supplied.
pub fn parse_pem(pem: &str, password: Option<&str>) -> Result<SecretKey> {
    if pem.contains(ENCRYPTED_LABEL) {
        let pwd = match password {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => prompt("please input the password of PEM: ")?,
        };
        SecretKey::from_pkcs8_encrypted_pem(pem, pwd.as_bytes()).map_err(|e| {
            tracing::debug!("parse pem failed: {e}");
            Error::Input("PEM error".into())
        })
    } else {
        SecretKey::from_pkcs8_pem(pem).map_err(|e| {
            tracing::debug!("parse pem failed: {e}");
            Error::Input("PEM error".into())
        })
    }
}

/// Loads the sender wallet: `target.senderkey` wins over
/// `target.senderpem`.
pub fn load_sender(target: &TargetConfig) -> Result<LocalWallet> {
    if let Some(hexkey) = &target.senderkey {
        let raw = hex::decode(hexkey.trim_start_matches("0x"))
            .map_err(|e| {
                Error::Input(format!("invalid target.senderkey: {e}"))
            })?;
        let key = SigningKey::from_slice(&raw).map_err(|e| {
            Error::Input(format!("invalid target.senderkey: {e}"))
        })?;
        return Ok(LocalWallet::from(key));
    }
    if let Some(path) = &target.senderpem {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            Error::Input(format!("read PEM failed: {e}"))
        })?;
        let secret =
            parse_pem(&pem, target.senderpempwd.as_deref())?;
        return Ok(LocalWallet::from(SigningKey::from(secret)));
    }
    Err(Error::Input("sender is missing".into()))
}

/// The `pem` subcommand: `--input` prints the hex key of a file, `--output`
/// writes a password-protected key file from a prompted hex key.
pub fn run(args: PemArgs) -> Result<()> {
    if let Some(path) = &args.input {
        tracing::info!("Input PATH: {}", path.display());
        let pem = std::fs::read_to_string(path).map_err(|e| {
            Error::Input(format!("read input file failed: {e}"))
        })?;
        let secret = parse_pem(&pem, None)?;
        tracing::info!("PRIV: {}", hex::encode(secret.to_bytes()));
        return Ok(());
    }
    let Some(path) = &args.output else {
        return Err(Error::Input("output path is missing".into()));
    };
    tracing::info!("Output PATH: {}", path.display());
    let hexkey = prompt("HEX of private key: ")?;
    let raw = hex::decode(hexkey.trim().trim_start_matches("0x"))
        .map_err(|e| Error::Input(format!("decode hex failed: {e}")))?;
    if raw.len() != 32 {
        return Err(Error::Input("invalid input private key".into()));
    }
    let secret = SecretKey::from_slice(&raw)
        .map_err(|e| Error::Input(format!("to ecdsa key failed: {e}")))?;
    tracing::info!("PRIV: {}", hex::encode(secret.to_bytes()));
    let pwd = prompt("password of file: ")?;
    let pwd_again = prompt("password of file again: ")?;
    if pwd != pwd_again {
        return Err(Error::Input("password not match".into()));
    }
    let pem = secret
        .to_pkcs8_encrypted_pem(
            &mut rand::rngs::OsRng,
            pwd.as_bytes(),
            LineEnding::LF,
        )
        .map_err(|e| {
            Error::Input(format!("convert to PEM failed: {e}"))
        })?;
    std::fs::write(path, pem.as_bytes())
        .map_err(|e| Error::Input(format!("write PEM failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_with_key(key: &str) -> TargetConfig {
        TargetConfig {
            name: "BSC".into(),
            api: "http://x".into(),
            chainid: None,
            senderkey: Some(key.into()),
            senderpem: None,
            senderpempwd: None,
            istkm: false,
            gpttl: 600,
            checkbalance: true,
        }
    }

    #[test]
    fn hex_sender_key_loads() {
        let target = target_with_key(
            "0x000000000000000000000000000000000000000000000000000000000000\
             0007",
        );
        let wallet = load_sender(&target).expect("wallet");
        assert!(!format!("{:?}", ethers::signers::Signer::address(&wallet))
            .is_empty());
    }

    #[test]
    fn bad_hex_is_an_input_error() {
        assert!(load_sender(&target_with_key("zz")).is_err());
        // 31 bytes is not a key
        assert!(load_sender(&target_with_key(&"ab".repeat(31))).is_err());
    }

    #[test]
    fn plain_pem_roundtrip() {
        let secret = SecretKey::from_slice(&[9u8; 32]).expect("key");
        let pem = secret
            .to_pkcs8_pem(LineEnding::LF)
            .expect("encode");
        let parsed = parse_pem(&pem, None).expect("parse");
        assert_eq!(parsed.to_bytes(), secret.to_bytes());
    }

    #[test]
    fn encrypted_pem_roundtrip() {
        let secret = SecretKey::from_slice(&[11u8; 32]).expect("key");
        let pem = secret
            .to_pkcs8_encrypted_pem(
                &mut rand::rngs::OsRng,
                b"hunter2",
                LineEnding::LF,
            )
            .expect("encrypt");
        let parsed = parse_pem(&pem, Some("hunter2")).expect("parse");
        assert_eq!(parsed.to_bytes(), secret.to_bytes());
        assert!(parse_pem(&pem, Some("wrong")).is_err());
    }
}
