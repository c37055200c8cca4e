// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

//! BIP32
//!
//! <https://github.com/bitcoin/bips/blob/master/bip-0032.mediawiki>

use std::str::FromStr;

pub use bitcoin::util::bip32::{ChildNumber, DerivationPath, ExtendedPubKey, Fingerprint};
use bitcoin::Network;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    BIP32(#[from] bitcoin::util::bip32::Error),
    #[error("Private extended keys are not accepted")]
    PrivateKeyMaterial,
    #[error("Unsupported extended key prefix '{0}'")]
    UnsupportedPrefix(String),
}

/// Parse the string encoding of a **public** extended key.
///
/// Anything carrying a private prefix is rejected before base58 decoding is
/// even attempted, so a pasted `xprv` never reaches storage or logs.
pub fn parse_xpub<S>(key_material: S) -> Result<ExtendedPubKey, Error>
where
    S: AsRef<str>,
{
    let key_material: &str = key_material.as_ref().trim();
    match key_material.get(..4) {
        Some("xprv") | Some("tprv") => Err(Error::PrivateKeyMaterial),
        Some("xpub") | Some("tpub") => Ok(ExtendedPubKey::from_str(key_material)?),
        Some(prefix) => Err(Error::UnsupportedPrefix(prefix.to_string())),
        None => Err(Error::UnsupportedPrefix(key_material.to_string())),
    }
}

pub fn coin(network: Network) -> u32 {
    u32::from(!network.eq(&Network::Bitcoin))
}

/// Build a non-hardened path from raw indexes.
pub fn normal_path(indexes: &[u32]) -> Result<DerivationPath, bitcoin::util::bip32::Error> {
    let mut path: Vec<ChildNumber> = Vec::with_capacity(indexes.len());
    for index in indexes.iter() {
        path.push(ChildNumber::from_normal_idx(*index)?);
    }
    Ok(DerivationPath::from(path))
}

/// Path: <change>/<index>
pub fn leaf_path(change: bool, index: u32) -> Result<DerivationPath, bitcoin::util::bip32::Error> {
    normal_path(&[u32::from(change), index])
}

#[cfg(test)]
mod tests {
    use super::*;

    const TPUB: &str = "tpubDCT8uwnkZj7woaY71Xr5hU7Wvjr7B1BXJEpwMzzDLd1H6HLnKTiaLPtt6ZfEizDMwdQ8PT8JCmKbB4ESVXTkCzv51oxhJhX5FLBvkeN9nJ3";

    #[test]
    fn test_parse_xpub() {
        assert!(parse_xpub(TPUB).is_ok());
        assert!(parse_xpub(format!("  {TPUB} ")).is_ok());
    }

    #[test]
    fn test_reject_private_key_material() {
        let err = parse_xpub("tprv8ZgxMBicQKsPd9TeAdPADNnSyH9SSUUbTVeFszDE23Ki6TBB5nCefAdHkK8Fm3qMQR6sHwA56zqRmKmxnHk37KkiFzHXpUcGJEGPPsyvdw1").unwrap_err();
        assert!(matches!(err, Error::PrivateKeyMaterial));
    }

    #[test]
    fn test_reject_unknown_prefix() {
        assert!(matches!(
            parse_xpub("zpubDCT8uwnkZj7woaY71Xr5hU7Wvjr7B1B").unwrap_err(),
            Error::UnsupportedPrefix(_)
        ));
        assert!(matches!(
            parse_xpub("x").unwrap_err(),
            Error::UnsupportedPrefix(_)
        ));
    }

    #[test]
    fn test_leaf_path() {
        assert_eq!(leaf_path(false, 0).unwrap().to_string(), "m/0/0");
        assert_eq!(leaf_path(true, 42).unwrap().to_string(), "m/1/42");
    }

    #[test]
    fn test_hardened_index_rejected() {
        assert!(normal_path(&[0x8000_0000]).is_err());
    }
}
