// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

use std::collections::BTreeMap;

use bitcoin::util::bip32::ExtendedPubKey;
use bitcoin::Txid;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{DescriptorStore, Error, KeyStore, PsbtDraft, PsbtStore};
use crate::types::{DescriptorRecord, ExtendedKey, KeyId, PsbtRecord, PsbtStatus, RecordId, Scope};
use crate::util::time;

/// Serializable contents of a [`MemoryStore`].
///
/// Lets a thin persistence layer snapshot the whole store to disk and load
/// it back, without the core depending on any storage engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub keys: BTreeMap<KeyId, ExtendedKey>,
    pub psbts: BTreeMap<RecordId, PsbtRecord>,
    pub descriptors: BTreeMap<u64, DescriptorRecord>,
    pub next_id: u64,
}

/// In-memory store backing all three store traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.read().clone()
    }

    fn next_id(snapshot: &mut Snapshot) -> u64 {
        snapshot.next_id += 1;
        snapshot.next_id
    }
}

impl KeyStore for MemoryStore {
    fn list(&self, scope: &Scope) -> Result<Vec<ExtendedKey>, Error> {
        Ok(self
            .inner
            .read()
            .keys
            .values()
            .filter(|k| k.scope.eq(scope))
            .cloned()
            .collect())
    }

    fn get(&self, id: KeyId) -> Result<Option<ExtendedKey>, Error> {
        Ok(self.inner.read().keys.get(&id).cloned())
    }

    fn insert(
        &self,
        scope: &Scope,
        label: String,
        xpub: ExtendedPubKey,
    ) -> Result<ExtendedKey, Error> {
        let mut inner = self.inner.write();
        if inner
            .keys
            .values()
            .any(|k| k.scope.eq(scope) && k.xpub.eq(&xpub))
        {
            return Err(Error::Duplicate);
        }
        let id: KeyId = Self::next_id(&mut inner);
        let key = ExtendedKey {
            id,
            label,
            xpub,
            scope: scope.clone(),
            created_at: time::timestamp(),
        };
        inner.keys.insert(id, key.clone());
        Ok(key)
    }

    fn update_label(&self, id: KeyId, label: String) -> Result<ExtendedKey, Error> {
        let mut inner = self.inner.write();
        let key = inner.keys.get_mut(&id).ok_or(Error::NotFound)?;
        key.label = label;
        Ok(key.clone())
    }

    fn delete(&self, id: KeyId) -> Result<bool, Error> {
        Ok(self.inner.write().keys.remove(&id).is_some())
    }
}

impl PsbtStore for MemoryStore {
    fn list(&self, scope: &Scope) -> Result<Vec<PsbtRecord>, Error> {
        Ok(self
            .inner
            .read()
            .psbts
            .values()
            .filter(|r| r.scope.eq(scope))
            .cloned()
            .collect())
    }

    fn list_all(&self) -> Result<Vec<PsbtRecord>, Error> {
        Ok(self.inner.read().psbts.values().cloned().collect())
    }

    fn get(&self, id: RecordId) -> Result<Option<PsbtRecord>, Error> {
        Ok(self.inner.read().psbts.get(&id).cloned())
    }

    fn insert(&self, scope: &Scope, draft: PsbtDraft) -> Result<PsbtRecord, Error> {
        let mut inner = self.inner.write();
        let id: RecordId = Self::next_id(&mut inner);
        let now: u64 = time::timestamp();
        let record = PsbtRecord {
            id,
            name: draft.name,
            blob: draft.blob,
            m: draft.m,
            n: draft.n,
            signatures: draft.signatures,
            status: draft.status,
            notes: draft.notes,
            txid: None,
            confirmations: 0,
            version: 0,
            scope: scope.clone(),
            created_at: now,
            updated_at: now,
        };
        inner.psbts.insert(id, record.clone());
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
        let mut inner = self.inner.write();
        let record = inner.psbts.get_mut(&id).ok_or(Error::NotFound)?;
        if record.version != expected_version {
            return Err(Error::VersionConflict {
                expected: expected_version,
                actual: record.version,
            });
        }
        record.blob = blob;
        record.signatures = signatures;
        record.status = status;
        record.version += 1;
        record.updated_at = time::timestamp();
        Ok(record.clone())
    }

    fn update_broadcast(
        &self,
        id: RecordId,
        txid: Option<Txid>,
        status: PsbtStatus,
        confirmations: u32,
    ) -> Result<PsbtRecord, Error> {
        let mut inner = self.inner.write();
        let record = inner.psbts.get_mut(&id).ok_or(Error::NotFound)?;
        if let Some(txid) = txid {
            record.txid = Some(txid);
        }
        record.status = status;
        record.confirmations = confirmations;
        record.updated_at = time::timestamp();
        Ok(record.clone())
    }

    fn delete(&self, id: RecordId) -> Result<bool, Error> {
        Ok(self.inner.write().psbts.remove(&id).is_some())
    }
}

impl DescriptorStore for MemoryStore {
    fn list(&self, scope: &Scope) -> Result<Vec<DescriptorRecord>, Error> {
        Ok(self
            .inner
            .read()
            .descriptors
            .values()
            .filter(|d| d.scope.eq(scope))
            .cloned()
            .collect())
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
        let mut inner = self.inner.write();
        let id: u64 = Self::next_id(&mut inner);
        let record = DescriptorRecord {
            id,
            name,
            descriptor,
            m,
            n,
            first_address,
            scope: scope.clone(),
            created_at: time::timestamp(),
        };
        inner.descriptors.insert(id, record.clone());
        Ok(record)
    }

    fn delete(&self, id: u64) -> Result<bool, Error> {
        Ok(self.inner.write().descriptors.remove(&id).is_some())
    }
}
