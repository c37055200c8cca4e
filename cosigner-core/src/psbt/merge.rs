// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

use std::collections::BTreeSet;

use bitcoin::psbt::PartiallySignedTransaction;
use bitcoin::OutPoint;

use super::Error;

/// Outcome of a successful merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New signatures were absorbed.
    Merged { added: usize },
    /// The incoming PSBT carried nothing the stored one did not already have.
    /// A duplicate resubmission, not an error.
    Unchanged,
}

fn outpoints(psbt: &PartiallySignedTransaction) -> BTreeSet<OutPoint> {
    psbt.unsigned_tx
        .input
        .iter()
        .map(|input| input.previous_output)
        .collect()
}

/// Two PSBTs represent the same underlying transaction iff they spend exactly
/// the same set of outpoints.
pub fn equivalent(a: &PartiallySignedTransaction, b: &PartiallySignedTransaction) -> bool {
    outpoints(a) == outpoints(b)
}

/// Maximum partial-signature count across inputs.
///
/// In a well-formed multisig every input carries the same signer set, so
/// summing over inputs would double count.
pub fn signature_count(psbt: &PartiallySignedTransaction) -> usize {
    psbt.inputs
        .iter()
        .map(|input| input.partial_sigs.len())
        .max()
        .unwrap_or(0)
}

fn total_signatures(psbt: &PartiallySignedTransaction) -> usize {
    psbt.inputs
        .iter()
        .map(|input| input.partial_sigs.len())
        .sum()
}

/// Union the incoming PSBT's partial signatures into `existing`.
///
/// Signatures are keyed by the signing public key, so the union is naturally
/// deduplicating: re-adding a present signature is a no-op. Non-equivalent
/// PSBTs fail cleanly so the caller can store the incoming one separately.
pub fn merge(
    existing: &mut PartiallySignedTransaction,
    incoming: PartiallySignedTransaction,
) -> Result<MergeOutcome, Error> {
    if !equivalent(existing, &incoming) {
        return Err(Error::NotEquivalent);
    }
    let before: usize = total_signatures(existing);
    existing
        .combine(incoming)
        .map_err(|_| Error::NotEquivalent)?;
    let after: usize = total_signatures(existing);
    if after > before {
        Ok(MergeOutcome::Merged {
            added: after - before,
        })
    } else {
        Ok(MergeOutcome::Unchanged)
    }
}
