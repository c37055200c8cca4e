// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

//! BIP48
//!
//! <https://github.com/bitcoin/bips/blob/master/bip-0048.mediawiki>

use bitcoin::util::bip32::{ChildNumber, DerivationPath, Error};
use bitcoin::Network;

use super::bip32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScriptType {
    P2SHWSH = 1,
    P2WSH = 2,
}

impl ScriptType {
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }
}

pub fn account_extended_path(
    network: Network,
    account: Option<u32>,
    script_type: ScriptType,
) -> Result<DerivationPath, Error> {
    // Path: m/48'/<coin>'/<account>'/<script_type>'
    let path: Vec<ChildNumber> = vec![
        ChildNumber::from_hardened_idx(48)?,
        ChildNumber::from_hardened_idx(bip32::coin(network))?,
        ChildNumber::from_hardened_idx(account.unwrap_or(0))?,
        ChildNumber::from_hardened_idx(script_type.as_u32())?,
    ];
    Ok(DerivationPath::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p2wsh_account_path() {
        assert_eq!(
            account_extended_path(Network::Bitcoin, None, ScriptType::P2WSH)
                .unwrap()
                .to_string(),
            "m/48'/0'/0'/2'".to_string()
        );

        assert_eq!(
            account_extended_path(Network::Testnet, Some(1), ScriptType::P2WSH)
                .unwrap()
                .to_string(),
            "m/48'/1'/1'/2'".to_string()
        );
    }

    #[test]
    fn test_p2shwsh_account_path() {
        assert_eq!(
            account_extended_path(Network::Bitcoin, None, ScriptType::P2SHWSH)
                .unwrap()
                .to_string(),
            "m/48'/0'/0'/1'".to_string()
        );
    }
}
