// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

//! Multisig Deriver
//!
//! Deterministic sorted-multi P2WSH scripts, addresses and descriptors from
//! an ordered set of registered extended keys.

use std::str::FromStr;

use bdk::miniscript::descriptor::{Descriptor, DescriptorPublicKey};
use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, Script};
use bitcoin::util::bip32::DerivationPath;
use bitcoin::{Address, Network, PublicKey};

use crate::bips::{bip32, bip48};
use crate::types::{DerivedAddress, ExtendedKey};
use crate::SECP256K1;

pub const MIN_KEYS: usize = 2;
/// CHECKMULTISIG limit for the target script type.
pub const MAX_KEYS: usize = 15;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    BIP32(#[from] bitcoin::util::bip32::Error),
    #[error(transparent)]
    Miniscript(#[from] bdk::miniscript::Error),
    #[error("Select between 2 and 15 keys ({0} selected)")]
    KeyCountMismatch(usize),
    #[error("Required signatures must be between 1 and the number of keys ({0})")]
    InvalidM(usize),
}

fn check_quorum(m: usize, n: usize) -> Result<(), Error> {
    if !(MIN_KEYS..=MAX_KEYS).contains(&n) {
        return Err(Error::KeyCountMismatch(n));
    }
    if m < 1 || m > n {
        return Err(Error::InvalidM(n));
    }
    Ok(())
}

/// Leaf pubkeys at `0/<index>` below every key, sorted lexicographically as
/// raw bytes (BIP67). The sort is what makes the same key set produce the
/// same script regardless of selection order.
fn sorted_leaf_keys(keys: &[ExtendedKey], index: u32) -> Result<Vec<PublicKey>, Error> {
    let path: DerivationPath = bip32::leaf_path(false, index)?;
    let mut pubkeys: Vec<PublicKey> = Vec::with_capacity(keys.len());
    for key in keys.iter() {
        let leaf = key.xpub.derive_pub(&SECP256K1, &path)?;
        pubkeys.push(PublicKey::new(leaf.public_key));
    }
    pubkeys.sort_by_key(|pk| pk.to_bytes());
    Ok(pubkeys)
}

/// `OP_m <keys...> OP_n OP_CHECKMULTISIG`
pub fn multisig_script(pubkeys: &[PublicKey], m: usize) -> Script {
    let mut builder: Builder = Builder::new().push_int(m as i64);
    for pubkey in pubkeys.iter() {
        builder = builder.push_key(pubkey);
    }
    builder
        .push_int(pubkeys.len() as i64)
        .push_opcode(opcodes::all::OP_CHECKMULTISIG)
        .into_script()
}

/// Derive the M-of-N witness script, P2WSH address and descriptor for the
/// given keys at receive index `index`.
pub fn derive_address(
    keys: &[ExtendedKey],
    m: usize,
    index: u32,
    network: Network,
) -> Result<DerivedAddress, Error> {
    check_quorum(m, keys.len())?;
    let pubkeys: Vec<PublicKey> = sorted_leaf_keys(keys, index)?;
    let witness_script: Script = multisig_script(&pubkeys, m);
    let address: Address = Address::p2wsh(&witness_script, network);
    let descriptor: String = derive_descriptor(keys, m, network)?;
    Ok(DerivedAddress {
        witness_script,
        address,
        descriptor,
    })
}

/// `wsh(sortedmulti(m,[fp/48'/coin'/0'/2']xpub/0/*,...))#checksum`
///
/// The origin annotation is the fixed BIP48 P2WSH account path: the registry
/// never learns the true origin path of an imported xpub, so annotating
/// anything else would fabricate data.
pub fn derive_descriptor(keys: &[ExtendedKey], m: usize, network: Network) -> Result<String, Error> {
    check_quorum(m, keys.len())?;
    let origin: DerivationPath =
        bip48::account_extended_path(network, None, bip48::ScriptType::P2WSH)?;
    let origin: String = origin.to_string().replacen('m', "", 1);

    let inner: Vec<String> = keys
        .iter()
        .map(|key| format!("[{}{}]{}/0/*", key.xpub.fingerprint(), origin, key.xpub))
        .collect();
    let descriptor: String = format!("wsh(sortedmulti({},{}))", m, inner.join(","));

    // Round-trip through miniscript: validates the expression and appends
    // the checksum.
    let descriptor = Descriptor::<DescriptorPublicKey>::from_str(&descriptor)?;
    Ok(descriptor.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bitcoin::hashes::hex::FromHex;

    use super::*;
    use crate::store::{KeyStore, MemoryStore};
    use crate::types::Scope;
    use crate::KeyRegistry;

    const TPUB_1: &str = "tpubDCT8uwnkZj7woaY71Xr5hU7Wvjr7B1BXJEpwMzzDLd1H6HLnKTiaLPtt6ZfEizDMwdQ8PT8JCmKbB4ESVXTkCzv51oxhJhX5FLBvkeN9nJ3";
    const TPUB_2: &str = "tpubDCvLwbJPseNux9EtPbrbA2tgDayzptK4HNkky14Cw6msjHuqyZCE88miedZD86TZUb29Rof3sgtREU4wtzofte7QDSWDiw8ZU6ZYHmAxY9d";

    fn keys() -> Vec<ExtendedKey> {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let registry = KeyRegistry::new(store, Scope::default());
        vec![
            registry.register("alice", TPUB_1).unwrap(),
            registry.register("bob", TPUB_2).unwrap(),
        ]
    }

    #[test]
    fn test_known_2of2_address_vector() {
        // Independently computed 2-of-2 vector for these keys at 0/0.
        let keys = keys();
        let derived = derive_address(&keys, 2, 0, Network::Testnet).unwrap();
        assert_eq!(
            derived.address.to_string(),
            "tb1qdkk3aqn7xwmu7urhz9xwarm7rfyj94u4rhflh87ea5s05q30vvkshf6etc"
        );
        assert_eq!(
            derived.witness_script.to_bytes(),
            Vec::<u8>::from_hex("52210200ccf302bff15350b10919f6c4b7fa564edd7892753f622984c150906c0664dc210354a1e7745781750bb838e507cd9a2e217d2e4ab386dad31dbc05e4c24ff4937252ae").unwrap()
        );

        let mainnet = derive_address(&keys, 2, 0, Network::Bitcoin).unwrap();
        assert_eq!(
            mainnet.address.to_string(),
            "bc1qdkk3aqn7xwmu7urhz9xwarm7rfyj94u4rhflh87ea5s05q30vvksqpvk3h"
        );
    }

    #[test]
    fn test_derive_address_deterministic() {
        let keys = keys();
        let a = derive_address(&keys, 2, 0, Network::Testnet).unwrap();
        let b = derive_address(&keys, 2, 0, Network::Testnet).unwrap();
        assert_eq!(a, b);
        assert!(a.address.script_pubkey().is_v0_p2wsh());
    }

    #[test]
    fn test_selection_order_does_not_matter() {
        let keys = keys();
        let reversed: Vec<ExtendedKey> = keys.iter().rev().cloned().collect();
        let a = derive_address(&keys, 2, 0, Network::Testnet).unwrap();
        let b = derive_address(&reversed, 2, 0, Network::Testnet).unwrap();
        assert_eq!(a.address, b.address);
        assert_eq!(a.witness_script, b.witness_script);
    }

    #[test]
    fn test_different_index_different_address() {
        let keys = keys();
        let a = derive_address(&keys, 2, 0, Network::Testnet).unwrap();
        let b = derive_address(&keys, 2, 1, Network::Testnet).unwrap();
        assert_ne!(a.address, b.address);
    }

    #[test]
    fn test_script_shape() {
        let keys = keys();
        let derived = derive_address(&keys, 2, 0, Network::Testnet).unwrap();
        let bytes: Vec<u8> = derived.witness_script.to_bytes();
        // OP_PUSHNUM_2 ... OP_PUSHNUM_2 OP_CHECKMULTISIG
        assert_eq!(bytes.first(), Some(&0x52));
        assert_eq!(bytes.get(bytes.len() - 2), Some(&0x52));
        assert_eq!(bytes.last(), Some(&0xae));
        // Keys are sorted as raw bytes.
        let k1 = &bytes[2..35];
        let k2 = &bytes[36..69];
        assert!(k1 < k2);
    }

    #[test]
    fn test_quorum_constraints() {
        let keys = keys();
        assert!(matches!(
            derive_address(&keys[..1], 1, 0, Network::Testnet).unwrap_err(),
            Error::KeyCountMismatch(1)
        ));
        assert!(matches!(
            derive_address(&keys, 3, 0, Network::Testnet).unwrap_err(),
            Error::InvalidM(2)
        ));
        assert!(matches!(
            derive_address(&keys, 0, 0, Network::Testnet).unwrap_err(),
            Error::InvalidM(2)
        ));
    }

    #[test]
    fn test_descriptor_shape() {
        let keys = keys();
        let descriptor = derive_descriptor(&keys, 2, Network::Testnet).unwrap();
        assert!(descriptor.starts_with("wsh(sortedmulti(2,["));
        assert!(descriptor.contains("/48'/1'/0'/2']"));
        assert!(descriptor.contains(TPUB_1));
        assert!(descriptor.contains(TPUB_2));
        assert!(descriptor.contains('#'));

        // Scope-independent: key wrapper state does not leak into the string.
        let again = derive_descriptor(&keys, 2, Network::Testnet).unwrap();
        assert_eq!(descriptor, again);
    }

    #[test]
    fn test_descriptor_keeps_selection_order() {
        // sortedmulti sorts at derivation time; the expression itself keeps
        // the keys in selection order.
        let keys = keys();
        let descriptor = derive_descriptor(&keys, 2, Network::Testnet).unwrap();
        let pos1 = descriptor.find(TPUB_1).unwrap();
        let pos2 = descriptor.find(TPUB_2).unwrap();
        assert!(pos1 < pos2);
    }
}
