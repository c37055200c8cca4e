// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

//! Key Registry
//!
//! Labeled public extended keys, scoped per group of users, with
//! non-hardened child derivation and reverse matching of observed pubkeys.

use std::sync::Arc;

use bitcoin::secp256k1::PublicKey;
use bitcoin::util::bip32::{ChildNumber, DerivationPath, ExtendedPubKey};
use log::trace;

use crate::bips::bip32;
use crate::store::{self, KeyStore};
use crate::types::{ExtendedKey, KeyId, Scope};
use crate::SECP256K1;

/// Upper bound of the per-branch index scan used by [`KeyRegistry::match_key`].
///
/// Wallets using address gaps larger than this will not be matched; that is
/// an accepted limitation, not an error.
pub const MATCH_GAP_LIMIT: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    BIP32(#[from] bitcoin::util::bip32::Error),
    #[error(transparent)]
    KeyFormat(#[from] bip32::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error("Key not found")]
    NotFound,
}

/// A registered key matched back from an observed public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMatch {
    pub key_id: KeyId,
    pub label: String,
    pub path: DerivationPath,
}

#[derive(Clone)]
pub struct KeyRegistry {
    store: Arc<dyn KeyStore>,
    scope: Scope,
}

impl KeyRegistry {
    pub fn new(store: Arc<dyn KeyStore>, scope: Scope) -> Self {
        Self { store, scope }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Validate and store new key material.
    pub fn register<S>(&self, label: S, key_material: &str) -> Result<ExtendedKey, Error>
    where
        S: Into<String>,
    {
        let xpub: ExtendedPubKey = bip32::parse_xpub(key_material)?;
        Ok(self.store.insert(&self.scope, label.into(), xpub)?)
    }

    pub fn relabel<S>(&self, id: KeyId, new_label: S) -> Result<ExtendedKey, Error>
    where
        S: Into<String>,
    {
        match self.store.update_label(id, new_label.into()) {
            Ok(key) => Ok(key),
            Err(store::Error::NotFound) => Err(Error::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Idempotent: `false` means the id was already gone. Deletion does not
    /// retroactively alter PSBTs or descriptors derived from the key.
    pub fn remove(&self, id: KeyId) -> Result<bool, Error> {
        Ok(self.store.delete(id)?)
    }

    pub fn list(&self) -> Result<Vec<ExtendedKey>, Error> {
        Ok(self.store.list(&self.scope)?)
    }

    pub fn get(&self, id: KeyId) -> Result<ExtendedKey, Error> {
        self.store.get(id)?.ok_or(Error::NotFound)
    }

    /// Derive the compressed public key at a non-hardened path below the
    /// registered key. Hardened steps are impossible here: the registry holds
    /// public material only.
    pub fn derive_public_key(&self, id: KeyId, path: &[u32]) -> Result<PublicKey, Error> {
        let key = self.get(id)?;
        let path: DerivationPath = bip32::normal_path(path)?;
        let child: ExtendedPubKey = key.xpub.derive_pub(&SECP256K1, &path)?;
        Ok(child.public_key)
    }

    /// Brute-force search for the registered key and leaf path producing
    /// `candidate`: every key, receive and change branch, indexes
    /// `0..MATCH_GAP_LIMIT`. `None` means "unknown signer", not an error.
    pub fn match_key(&self, candidate: &PublicKey) -> Result<Option<KeyMatch>, Error> {
        for key in self.list()?.into_iter() {
            for change in [false, true] {
                let branch: ExtendedPubKey = key
                    .xpub
                    .ckd_pub(&SECP256K1, ChildNumber::from_normal_idx(u32::from(change))?)?;
                for index in 0..MATCH_GAP_LIMIT {
                    let leaf: ExtendedPubKey =
                        branch.ckd_pub(&SECP256K1, ChildNumber::from_normal_idx(index)?)?;
                    if leaf.public_key.eq(candidate) {
                        trace!(
                            "matched pubkey to key '{}' at {}/{}",
                            key.label,
                            u32::from(change),
                            index
                        );
                        return Ok(Some(KeyMatch {
                            key_id: key.id,
                            label: key.label,
                            path: bip32::leaf_path(change, index)?,
                        }));
                    }
                }
            }
        }
        Ok(None)
    }
}
