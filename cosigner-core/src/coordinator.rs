// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

//! Coordinator
//!
//! Ties the registry, stores and endpoints together: upload-or-merge of
//! incoming PSBTs, quorum-gated broadcast fan-out, confirmation watching and
//! startup recovery.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bitcoin::Txid;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::broadcast::{
    self, confirmation_depth, submit_all, BroadcastEndpoint, BroadcastReport, ConfirmationPoller,
    LookupEndpoint, FINALITY_DEPTH,
};
use crate::psbt::{self, MergeOutcome, SignatureInfo};
use crate::registry::KeyRegistry;
use crate::store::{self, DescriptorStore, KeyStore, PsbtDraft, PsbtStore};
use crate::types::{PsbtRecord, PsbtStatus, RecordId, Scope};

/// Attempts at landing a merge before giving up on a contended record.
const MERGE_RETRIES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Psbt(#[from] psbt::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error(transparent)]
    Broadcast(#[from] broadcast::Error),
    #[error("Record not found")]
    NotFound,
    #[error("Quorum not reached: {signatures} of {m} required signatures")]
    QuorumNotReached { signatures: usize, m: u8 },
    #[error("Record has not been broadcast")]
    NotBroadcast,
    #[error("All broadcast endpoints failed: {0}")]
    AllEndpointsFailed(BroadcastReport),
    #[error("Record {0} is under concurrent modification, retry the upload")]
    MergeContention(RecordId),
}

/// What happened to an uploaded PSBT.
#[derive(Debug)]
pub enum UploadOutcome {
    /// No stored PSBT spends the same inputs: a new record was created.
    Inserted(PsbtRecord),
    /// Folded into an equivalent record, absorbing `added` new signatures.
    Merged { record: PsbtRecord, added: usize },
    /// An equivalent record already had everything the upload carried.
    Unchanged(PsbtRecord),
}

pub struct Coordinator {
    keys: Arc<dyn KeyStore>,
    psbts: Arc<dyn PsbtStore>,
    descriptors: Arc<dyn DescriptorStore>,
    broadcasters: Vec<Arc<dyn BroadcastEndpoint>>,
    lookups: Vec<Arc<dyn LookupEndpoint>>,
    pollers: Mutex<HashMap<RecordId, ConfirmationPoller>>,
}

impl Coordinator {
    pub fn new(
        keys: Arc<dyn KeyStore>,
        psbts: Arc<dyn PsbtStore>,
        descriptors: Arc<dyn DescriptorStore>,
    ) -> Self {
        Self {
            keys,
            psbts,
            descriptors,
            broadcasters: Vec::new(),
            lookups: Vec::new(),
            pollers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_endpoints(
        mut self,
        broadcasters: Vec<Arc<dyn BroadcastEndpoint>>,
        lookups: Vec<Arc<dyn LookupEndpoint>>,
    ) -> Self {
        self.broadcasters = broadcasters;
        self.lookups = lookups;
        self
    }

    /// Registry view over the key store for one scope.
    pub fn registry(&self, scope: Scope) -> KeyRegistry {
        KeyRegistry::new(self.keys.clone(), scope)
    }

    pub fn psbts(&self) -> &dyn PsbtStore {
        self.psbts.as_ref()
    }

    pub fn descriptors(&self) -> &dyn DescriptorStore {
        self.descriptors.as_ref()
    }

    /// Store an uploaded PSBT, folding it into an existing record when one
    /// already spends the same inputs.
    ///
    /// Quorum and signature count are always recomputed from the blob itself;
    /// nothing the uploader claims about signature state is trusted. Records
    /// that have already been broadcast are left untouched: late signatures
    /// for an in-flight transaction change nothing.
    pub fn upload_psbt<S>(
        &self,
        scope: &Scope,
        name: S,
        blob: &str,
        notes: Option<String>,
    ) -> Result<UploadOutcome, Error>
    where
        S: Into<String>,
    {
        let incoming = psbt::decode(blob)?;
        let registry: KeyRegistry = self.registry(scope.clone());
        let info: SignatureInfo = psbt::inspect(&incoming, &registry)?;

        for stored in self.psbts.list(scope)?.into_iter() {
            let existing = match psbt::decode(&stored.blob) {
                Ok(existing) => existing,
                Err(e) => {
                    warn!("stored record {} has an undecodable blob: {e}", stored.id);
                    continue;
                }
            };
            if !psbt::equivalent(&existing, &incoming) {
                continue;
            }
            if !matches!(stored.status, PsbtStatus::Signing | PsbtStatus::Ready) {
                debug!(
                    "record {} already {}, ignoring equivalent upload",
                    stored.id, stored.status
                );
                return Ok(UploadOutcome::Unchanged(stored));
            }
            match self.merge_into(stored.id, incoming.clone()) {
                // Same outpoints but a conflicting transaction (different
                // outputs): fall through and store the incoming draft as its
                // own record instead of failing the upload.
                Err(Error::Psbt(psbt::Error::NotEquivalent)) => {
                    warn!(
                        "record {} spends the same inputs as the upload but is a different transaction, storing separately",
                        stored.id
                    );
                    break;
                }
                outcome => return outcome,
            }
        }

        let status: PsbtStatus = if info.is_complete() {
            PsbtStatus::Ready
        } else {
            PsbtStatus::Signing
        };
        let record: PsbtRecord = self.psbts.insert(
            scope,
            PsbtDraft {
                name: name.into(),
                blob: psbt::encode(&incoming),
                m: info.m,
                n: info.n,
                signatures: info.signatures,
                status,
                notes,
            },
        )?;
        info!(
            "stored new psbt record {} ({} of {}, {} signatures)",
            record.id, record.m, record.n, record.signatures
        );
        Ok(UploadOutcome::Inserted(record))
    }

    /// Merge under optimistic concurrency: re-read, combine, write back with
    /// the version observed at read time, retry on conflict.
    fn merge_into(
        &self,
        id: RecordId,
        incoming: bitcoin::psbt::PartiallySignedTransaction,
    ) -> Result<UploadOutcome, Error> {
        for _ in 0..MERGE_RETRIES {
            let record: PsbtRecord = self.psbts.get(id)?.ok_or(Error::NotFound)?;
            let mut merged = psbt::decode(&record.blob)?;
            match psbt::merge(&mut merged, incoming.clone())? {
                MergeOutcome::Unchanged => return Ok(UploadOutcome::Unchanged(record)),
                MergeOutcome::Merged { added } => {
                    let signatures: usize = psbt::signature_count(&merged);
                    let status: PsbtStatus = if signatures >= usize::from(record.m) {
                        PsbtStatus::Ready
                    } else {
                        PsbtStatus::Signing
                    };
                    match self.psbts.update_blob(
                        id,
                        record.version,
                        psbt::encode(&merged),
                        signatures,
                        status,
                    ) {
                        Ok(record) => {
                            info!(
                                "merged {added} signature(s) into record {id}, now {} of {}",
                                record.signatures, record.m
                            );
                            return Ok(UploadOutcome::Merged { record, added });
                        }
                        Err(store::Error::VersionConflict { expected, actual }) => {
                            debug!("record {id} version moved {expected} -> {actual}, retrying");
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        Err(Error::MergeContention(id))
    }

    /// Finalize a quorum-complete record and fan it out to every broadcast
    /// endpoint.
    ///
    /// A rejection meaning "already known" counts as success: the transaction
    /// is on the network whether or not this submission put it there. No
    /// endpoint is contacted until finalization has produced a valid
    /// transaction.
    pub async fn broadcast_record(&self, id: RecordId) -> Result<PsbtRecord, Error> {
        let record: PsbtRecord = self.psbts.get(id)?.ok_or(Error::NotFound)?;
        if record.signatures < usize::from(record.m) {
            return Err(Error::QuorumNotReached {
                signatures: record.signatures,
                m: record.m,
            });
        }
        let finalized = psbt::finalize(psbt::decode(&record.blob)?)?;

        let report: BroadcastReport = submit_all(&self.broadcasters, &finalized.raw_hex).await;
        if !report.accepted() && !report.already_known() {
            return Err(Error::AllEndpointsFailed(report));
        }
        info!("broadcast {}: {report}", finalized.txid);

        let record: PsbtRecord =
            self.psbts
                .update_broadcast(id, Some(finalized.txid), PsbtStatus::Broadcast, 0)?;
        self.watch(id, finalized.txid, 0);
        Ok(record)
    }

    /// How many lookup services that were NOT broadcast targets can see the
    /// record's transaction.
    pub async fn verify_independent(&self, id: RecordId) -> Result<usize, Error> {
        let record: PsbtRecord = self.psbts.get(id)?.ok_or(Error::NotFound)?;
        let txid: Txid = record.txid.ok_or(Error::NotBroadcast)?;
        let targets: HashSet<String> = self
            .broadcasters
            .iter()
            .map(|b| b.name().to_string())
            .collect();
        Ok(broadcast::independent_confirmations(&self.lookups, &targets, &txid).await)
    }

    /// Start (or restart) the confirmation poller for a record.
    pub fn watch(&self, id: RecordId, txid: Txid, seen_depth: u32) {
        let poller = ConfirmationPoller::spawn(
            self.psbts.clone(),
            self.lookups.clone(),
            id,
            txid,
            seen_depth,
        );
        let mut pollers = self.pollers.lock();
        if let Some(previous) = pollers.insert(id, poller) {
            previous.cancel();
        }
    }

    /// Rebuild ephemeral watch state after a restart.
    ///
    /// Records mid-confirmation get their pollers back. A record stuck in
    /// `ready` may have been broadcast right before the crash: if any lookup
    /// can see its transaction, the record is fast-forwarded to the observed
    /// depth instead of being offered for a second broadcast.
    pub async fn recover_at_startup(&self) -> Result<(), Error> {
        for record in self.psbts.list_all()?.into_iter() {
            match record.status {
                PsbtStatus::Broadcast | PsbtStatus::Confirming => {
                    let txid = match record.txid {
                        Some(txid) => txid,
                        None => {
                            warn!("record {} is {} without a txid", record.id, record.status);
                            continue;
                        }
                    };
                    debug!("resuming confirmation watch for record {}", record.id);
                    self.watch(record.id, txid, record.confirmations);
                }
                PsbtStatus::Ready if record.txid.is_none() => {
                    let finalized = match psbt::decode(&record.blob).and_then(psbt::finalize) {
                        Ok(finalized) => finalized,
                        Err(e) => {
                            debug!("record {} not recoverable to a txid: {e}", record.id);
                            continue;
                        }
                    };
                    if let Some(depth) = self.observed_depth(&finalized.txid).await {
                        info!(
                            "record {} was already broadcast as {}, fast-forwarding",
                            record.id, finalized.txid
                        );
                        self.psbts.update_broadcast(
                            record.id,
                            Some(finalized.txid),
                            PsbtStatus::from_depth(depth),
                            depth,
                        )?;
                        if depth < FINALITY_DEPTH {
                            self.watch(record.id, finalized.txid, depth);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// First lookup that can see the transaction reports its depth; `None`
    /// means no service knows it.
    async fn observed_depth(&self, txid: &Txid) -> Option<u32> {
        for lookup in self.lookups.iter() {
            match lookup.exists(txid).await {
                Ok(true) => match confirmation_depth(lookup.as_ref(), txid).await {
                    Ok(depth) => return Some(depth),
                    Err(e) => debug!("depth lookup failed on {}: {e}", lookup.name()),
                },
                Ok(false) => {}
                Err(e) => debug!("existence lookup failed on {}: {e}", lookup.name()),
            }
        }
        None
    }

    /// Delete a record and stop watching it.
    pub fn delete_record(&self, id: RecordId) -> Result<bool, Error> {
        if let Some(poller) = self.pollers.lock().remove(&id) {
            poller.cancel();
        }
        Ok(self.psbts.delete(id)?)
    }

    /// Cancel every confirmation poller. Persisted state is untouched and
    /// will be picked back up by [`Self::recover_at_startup`].
    pub fn shutdown(&self) {
        let mut pollers = self.pollers.lock();
        for (_, poller) in pollers.drain() {
            poller.cancel();
        }
    }
}
