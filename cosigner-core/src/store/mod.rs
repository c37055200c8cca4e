// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

//! Storage abstractions.
//!
//! The core is agnostic to the backing engine; records are partitioned by an
//! opaque [`Scope`] token and identified by stable numeric ids.

use bitcoin::util::bip32::ExtendedPubKey;
use bitcoin::Txid;

use crate::types::{DescriptorRecord, ExtendedKey, KeyId, PsbtRecord, PsbtStatus, RecordId, Scope};

pub mod memory;

pub use self::memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Key material already registered in this scope")]
    Duplicate,
    #[error("Record not found")]
    NotFound,
    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("Storage backend: {0}")]
    Backend(String),
}

/// Fields of a PSBT record that the caller supplies on insert.
///
/// The signature count here is the server-side recomputed one; a
/// client-supplied count never reaches this struct.
#[derive(Debug, Clone)]
pub struct PsbtDraft {
    pub name: String,
    pub blob: String,
    pub m: u8,
    pub n: u8,
    pub signatures: usize,
    pub status: PsbtStatus,
    pub notes: Option<String>,
}

pub trait KeyStore: Send + Sync {
    fn list(&self, scope: &Scope) -> Result<Vec<ExtendedKey>, Error>;
    fn get(&self, id: KeyId) -> Result<Option<ExtendedKey>, Error>;
    /// Fails with [`Error::Duplicate`] when the same key material is already
    /// registered within the scope.
    fn insert(&self, scope: &Scope, label: String, xpub: ExtendedPubKey)
        -> Result<ExtendedKey, Error>;
    fn update_label(&self, id: KeyId, label: String) -> Result<ExtendedKey, Error>;
    /// Idempotent: returns `false` when the id does not exist.
    fn delete(&self, id: KeyId) -> Result<bool, Error>;
}

pub trait PsbtStore: Send + Sync {
    fn list(&self, scope: &Scope) -> Result<Vec<PsbtRecord>, Error>;
    /// Every record across all scopes, for poller reconstruction at startup.
    fn list_all(&self) -> Result<Vec<PsbtRecord>, Error>;
    fn get(&self, id: RecordId) -> Result<Option<PsbtRecord>, Error>;
    fn insert(&self, scope: &Scope, draft: PsbtDraft) -> Result<PsbtRecord, Error>;
    /// Replace the blob and derived signature state.
    ///
    /// The write only lands when `expected_version` matches the stored
    /// version; otherwise [`Error::VersionConflict`] tells the caller to
    /// re-read and retry the merge.
    fn update_blob(
        &self,
        id: RecordId,
        expected_version: u64,
        blob: String,
        signatures: usize,
        status: PsbtStatus,
    ) -> Result<PsbtRecord, Error>;
    fn update_broadcast(
        &self,
        id: RecordId,
        txid: Option<Txid>,
        status: PsbtStatus,
        confirmations: u32,
    ) -> Result<PsbtRecord, Error>;
    fn delete(&self, id: RecordId) -> Result<bool, Error>;
}

pub trait DescriptorStore: Send + Sync {
    fn list(&self, scope: &Scope) -> Result<Vec<DescriptorRecord>, Error>;
    fn insert(
        &self,
        scope: &Scope,
        name: String,
        descriptor: String,
        m: u8,
        n: u8,
        first_address: Option<String>,
    ) -> Result<DescriptorRecord, Error>;
    fn delete(&self, id: u64) -> Result<bool, Error>;
}
