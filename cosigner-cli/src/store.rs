// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

//! JSON-file persistence: a [`MemoryStore`] snapshot written through to disk
//! on every mutation.

use std::fs;
use std::path::PathBuf;

use cosigner_core::bitcoin::util::bip32::ExtendedPubKey;
use cosigner_core::bitcoin::Txid;
use cosigner_core::store::memory::Snapshot;
use cosigner_core::store::{
    DescriptorStore, Error, KeyStore, MemoryStore, PsbtDraft, PsbtStore,
};
use cosigner_core::types::{
    DescriptorRecord, ExtendedKey, KeyId, PsbtRecord, PsbtStatus, RecordId, Scope,
};

fn backend<E>(e: E) -> Error
where
    E: std::error::Error,
{
    Error::Backend(e.to_string())
}

pub struct JsonStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonStore {
    pub fn open(path: PathBuf) -> Result<Self, Error> {
        let inner: MemoryStore = if path.exists() {
            let json: String = fs::read_to_string(&path).map_err(backend)?;
            let snapshot: Snapshot = serde_json::from_str(&json).map_err(backend)?;
            MemoryStore::from_snapshot(snapshot)
        } else {
            MemoryStore::new()
        };
        Ok(Self { path, inner })
    }

    fn save(&self) -> Result<(), Error> {
        let json: String =
            serde_json::to_string_pretty(&self.inner.snapshot()).map_err(backend)?;
        fs::write(&self.path, json).map_err(backend)
    }
}

impl KeyStore for JsonStore {
    fn list(&self, scope: &Scope) -> Result<Vec<ExtendedKey>, Error> {
        KeyStore::list(&self.inner, scope)
    }

    fn get(&self, id: KeyId) -> Result<Option<ExtendedKey>, Error> {
        KeyStore::get(&self.inner, id)
    }

    fn insert(
        &self,
        scope: &Scope,
        label: String,
        xpub: ExtendedPubKey,
    ) -> Result<ExtendedKey, Error> {
        let key = KeyStore::insert(&self.inner, scope, label, xpub)?;
        self.save()?;
        Ok(key)
    }

    fn update_label(&self, id: KeyId, label: String) -> Result<ExtendedKey, Error> {
        let key = KeyStore::update_label(&self.inner, id, label)?;
        self.save()?;
        Ok(key)
    }

    fn delete(&self, id: KeyId) -> Result<bool, Error> {
        let deleted: bool = KeyStore::delete(&self.inner, id)?;
        if deleted {
            self.save()?;
        }
        Ok(deleted)
    }
}

impl PsbtStore for JsonStore {
    fn list(&self, scope: &Scope) -> Result<Vec<PsbtRecord>, Error> {
        PsbtStore::list(&self.inner, scope)
    }

    fn list_all(&self) -> Result<Vec<PsbtRecord>, Error> {
        PsbtStore::list_all(&self.inner)
    }

    fn get(&self, id: RecordId) -> Result<Option<PsbtRecord>, Error> {
        PsbtStore::get(&self.inner, id)
    }

    fn insert(&self, scope: &Scope, draft: PsbtDraft) -> Result<PsbtRecord, Error> {
        let record = PsbtStore::insert(&self.inner, scope, draft)?;
        self.save()?;
        Ok(record)
    }

    fn update_blob(
        &self,
        id: RecordId,
        expected_version: u64,
        blob: String,
        signatures: usize,
        status: PsbtStatus,
    ) -> Result<PsbtRecord, Error> {
        let record =
            self.inner
                .update_blob(id, expected_version, blob, signatures, status)?;
        self.save()?;
        Ok(record)
    }

    fn update_broadcast(
        &self,
        id: RecordId,
        txid: Option<Txid>,
        status: PsbtStatus,
        confirmations: u32,
    ) -> Result<PsbtRecord, Error> {
        let record = self.inner.update_broadcast(id, txid, status, confirmations)?;
        self.save()?;
        Ok(record)
    }

    fn delete(&self, id: RecordId) -> Result<bool, Error> {
        let deleted: bool = PsbtStore::delete(&self.inner, id)?;
        if deleted {
            self.save()?;
        }
        Ok(deleted)
    }
}

impl DescriptorStore for JsonStore {
    fn list(&self, scope: &Scope) -> Result<Vec<DescriptorRecord>, Error> {
        DescriptorStore::list(&self.inner, scope)
    }

    fn insert(
        &self,
        scope: &Scope,
        name: String,
        descriptor: String,
        m: u8,
        n: u8,
        first_address: Option<String>,
    ) -> Result<DescriptorRecord, Error> {
        let record =
            DescriptorStore::insert(&self.inner, scope, name, descriptor, m, n, first_address)?;
        self.save()?;
        Ok(record)
    }

    fn delete(&self, id: u64) -> Result<bool, Error> {
        let deleted: bool = DescriptorStore::delete(&self.inner, id)?;
        if deleted {
            self.save()?;
        }
        Ok(deleted)
    }
}
