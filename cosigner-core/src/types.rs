// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

use std::fmt;

use bitcoin::util::bip32::ExtendedPubKey;
use bitcoin::{Address, Script, Txid};
use serde::{Deserialize, Serialize};

pub type KeyId = u64;
pub type RecordId = u64;

/// Opaque partition token separating unrelated groups of users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    pub fn new<S>(scope: S) -> Self
    where
        S: Into<String>,
    {
        Self(scope.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new("default")
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A labeled public extended key.
///
/// The key material is public-only: the registry never holds anything that
/// could yield a private component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedKey {
    pub id: KeyId,
    pub label: String,
    pub xpub: ExtendedPubKey,
    pub scope: Scope,
    pub created_at: u64,
}

/// Lifecycle of a stored PSBT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsbtStatus {
    /// Collecting signatures.
    Signing,
    /// Signature threshold met, not yet broadcast.
    Ready,
    /// Submitted, unconfirmed.
    Broadcast,
    /// 1 to 5 confirmations.
    Confirming,
    /// 6 or more confirmations.
    Final,
}

impl PsbtStatus {
    /// Status matching a confirmation depth, once a txid is known.
    pub fn from_depth(depth: u32) -> Self {
        match depth {
            0 => Self::Broadcast,
            1..=5 => Self::Confirming,
            _ => Self::Final,
        }
    }

    pub fn is_watchable(&self) -> bool {
        matches!(self, Self::Broadcast | Self::Confirming)
    }
}

impl fmt::Display for PsbtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signing => write!(f, "signing"),
            Self::Ready => write!(f, "ready"),
            Self::Broadcast => write!(f, "broadcast"),
            Self::Confirming => write!(f, "confirming"),
            Self::Final => write!(f, "final"),
        }
    }
}

/// A stored partially-signed transaction.
///
/// `signatures` is a cached derived value: it always equals the maximum
/// partial-signature count observable across the blob's inputs and is
/// recomputed on every mutation, never taken from the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsbtRecord {
    pub id: RecordId,
    pub name: String,
    /// Base64 PSBT blob, re-encoded server side.
    pub blob: String,
    pub m: u8,
    pub n: u8,
    pub signatures: usize,
    pub status: PsbtStatus,
    pub notes: Option<String>,
    pub txid: Option<Txid>,
    pub confirmations: u32,
    /// Optimistic concurrency counter, bumped on every blob update.
    pub version: u64,
    pub scope: Scope,
    pub created_at: u64,
    pub updated_at: u64,
}

/// A saved output descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorRecord {
    pub id: u64,
    pub name: String,
    pub descriptor: String,
    pub m: u8,
    pub n: u8,
    pub first_address: Option<String>,
    pub scope: Scope,
    pub created_at: u64,
}

/// Everything the multisig deriver computes for one (key set, m, index).
///
/// Pure function of its inputs; never stored as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAddress {
    pub witness_script: Script,
    pub address: Address,
    pub descriptor: String,
}
