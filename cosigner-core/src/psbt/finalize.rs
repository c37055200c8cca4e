// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

use bdk::miniscript::psbt::PsbtExt;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::psbt::PartiallySignedTransaction;
use bitcoin::{Transaction, Txid};

use super::Error;
use crate::SECP256K1;

/// A fully-signed transaction extracted from a finalized PSBT.
#[derive(Debug, Clone)]
pub struct FinalizedTx {
    pub txid: Txid,
    pub raw_hex: String,
    pub tx: Transaction,
}

/// Combine each input's partial signatures into a satisfying witness and
/// extract the raw transaction.
///
/// Fails uniformly when any input cannot be satisfied; until the quorum is
/// reached that is the expected outcome, not an exceptional one.
pub fn finalize(mut psbt: PartiallySignedTransaction) -> Result<FinalizedTx, Error> {
    psbt.finalize_mut(&SECP256K1).map_err(|errors| {
        Error::Finalization(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<String>>()
                .join("; "),
        )
    })?;
    let tx: Transaction = psbt.extract_tx();
    Ok(FinalizedTx {
        txid: tx.txid(),
        raw_hex: serialize_hex(&tx),
        tx,
    })
}
