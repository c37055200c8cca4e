// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

//! PSBT
//!
//! Decoding, script decompilation, signature inspection, merging and
//! finalization of partially-signed transactions.

use std::str::FromStr;

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Instruction, Script};
use bitcoin::consensus::encode::deserialize;
use bitcoin::hashes::hex::FromHex;
use bitcoin::psbt::PartiallySignedTransaction;
use bitcoin::PublicKey;

mod finalize;
mod inspect;
mod merge;

pub use self::finalize::{finalize, FinalizedTx};
pub use self::inspect::{inspect, SignatureInfo, SignerEntry};
pub use self::merge::{equivalent, merge, signature_count, MergeOutcome};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid PSBT: neither base64 nor hex")]
    Parse,
    #[error("No multisig witness script found in any input")]
    NoWitnessScript,
    #[error("Witness script is not an M-of-N multisig")]
    NotMultisig,
    #[error("PSBTs do not spend the same inputs")]
    NotEquivalent,
    #[error("Unable to finalize: {0}")]
    Finalization(String),
    #[error(transparent)]
    Registry(#[from] crate::registry::Error),
}

/// Decode a PSBT from either of the two serializations in the wild:
/// base64 of the binary encoding, or plain hex of the same bytes.
pub fn decode(blob: &str) -> Result<PartiallySignedTransaction, Error> {
    let blob: &str = blob.trim();
    if let Ok(psbt) = PartiallySignedTransaction::from_str(blob) {
        return Ok(psbt);
    }
    if let Ok(bytes) = Vec::<u8>::from_hex(blob) {
        if let Ok(psbt) = deserialize::<PartiallySignedTransaction>(&bytes) {
            return Ok(psbt);
        }
    }
    Err(Error::Parse)
}

/// Canonical storage encoding (base64).
pub fn encode(psbt: &PartiallySignedTransaction) -> String {
    psbt.to_string()
}

/// Decompiled script element.
///
/// Different signer software encodes small constants differently: as an
/// `OP_PUSHNUM` opcode or as a pushed one-byte number. Modeling both
/// explicitly keeps the quorum decoding honest about which one it saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptElement {
    Opcode(u8),
    Data(Vec<u8>),
}

impl ScriptElement {
    /// Small script number in `1..=16`, from either encoding.
    pub fn as_small_int(&self) -> Option<u8> {
        match self {
            Self::Opcode(op)
                if *op >= opcodes::all::OP_PUSHNUM_1.to_u8()
                    && *op <= opcodes::all::OP_PUSHNUM_16.to_u8() =>
            {
                Some(op - opcodes::all::OP_PUSHNUM_1.to_u8() + 1)
            }
            Self::Data(bytes) if bytes.len() == 1 && (1..=16).contains(&bytes[0]) => {
                Some(bytes[0])
            }
            _ => None,
        }
    }

    /// Pushed data of pubkey length (33 or 65 bytes).
    pub fn as_pubkey(&self) -> Option<PublicKey> {
        match self {
            Self::Data(bytes) if bytes.len() == 33 || bytes.len() == 65 => {
                PublicKey::from_slice(bytes).ok()
            }
            _ => None,
        }
    }
}

pub fn decompile(script: &Script) -> Result<Vec<ScriptElement>, Error> {
    let mut elements: Vec<ScriptElement> = Vec::new();
    for instruction in script.instructions() {
        match instruction.map_err(|_| Error::NotMultisig)? {
            Instruction::Op(op) => elements.push(ScriptElement::Opcode(op.to_u8())),
            Instruction::PushBytes(bytes) => elements.push(ScriptElement::Data(bytes.to_vec())),
        }
    }
    Ok(elements)
}

#[cfg(test)]
pub(crate) mod test_util {
    //! Builders for synthetic multisig PSBTs used across the psbt tests.

    use std::str::FromStr;

    use bitcoin::blockdata::script::Builder;
    use bitcoin::secp256k1::{Message, SecretKey};
    use bitcoin::util::bip32::ExtendedPubKey;
    use bitcoin::util::sighash::SighashCache;
    use bitcoin::{
        EcdsaSig, EcdsaSighashType, OutPoint, PackedLockTime, PublicKey, Script, Sequence,
        Transaction, TxIn, TxOut, Txid, Witness,
    };

    use super::PartiallySignedTransaction;
    use crate::multisig;
    use crate::SECP256K1;

    pub const TPUB_1: &str = "tpubDCT8uwnkZj7woaY71Xr5hU7Wvjr7B1BXJEpwMzzDLd1H6HLnKTiaLPtt6ZfEizDMwdQ8PT8JCmKbB4ESVXTkCzv51oxhJhX5FLBvkeN9nJ3";
    pub const TPUB_2: &str = "tpubDCvLwbJPseNux9EtPbrbA2tgDayzptK4HNkky14Cw6msjHuqyZCE88miedZD86TZUb29Rof3sgtREU4wtzofte7QDSWDiw8ZU6ZYHmAxY9d";

    /// Deterministic keypair for seeding partial signatures.
    pub fn signer(seed: u8) -> (SecretKey, PublicKey) {
        let mut bytes: [u8; 32] = [0u8; 32];
        bytes[31] = seed;
        let sk = SecretKey::from_slice(&bytes).unwrap();
        (sk, PublicKey::new(sk.public_key(&SECP256K1)))
    }

    pub fn dummy_sig(sk: &SecretKey) -> EcdsaSig {
        let msg = Message::from_slice(&[42u8; 32]).unwrap();
        EcdsaSig {
            sig: SECP256K1.sign_ecdsa(&msg, sk),
            hash_ty: EcdsaSighashType::All,
        }
    }

    pub fn leaf_pubkeys(index: u32) -> Vec<PublicKey> {
        [TPUB_1, TPUB_2]
            .iter()
            .map(|tpub| {
                let xpub = ExtendedPubKey::from_str(tpub).unwrap();
                let path = crate::bips::bip32::leaf_path(false, index).unwrap();
                PublicKey::new(xpub.derive_pub(&SECP256K1, &path).unwrap().public_key)
            })
            .collect()
    }

    /// Unsigned PSBT spending the given outpoints, with a 2-of-2 witness
    /// script on every input.
    pub fn multisig_psbt(outpoints: &[OutPoint]) -> PartiallySignedTransaction {
        let mut pubkeys = leaf_pubkeys(0);
        pubkeys.sort_by_key(|pk| pk.to_bytes());
        let witness_script: Script = multisig::multisig_script(&pubkeys, 2);

        let tx = Transaction {
            version: 2,
            lock_time: PackedLockTime::ZERO,
            input: outpoints
                .iter()
                .map(|outpoint| TxIn {
                    previous_output: *outpoint,
                    script_sig: Script::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: vec![TxOut {
                value: 50_000,
                script_pubkey: Builder::new().into_script(),
            }],
        };

        let mut psbt = PartiallySignedTransaction::from_unsigned_tx(tx).unwrap();
        for input in psbt.inputs.iter_mut() {
            input.witness_script = Some(witness_script.clone());
        }
        psbt
    }

    /// Quorum-complete 2-of-2 PSBT that actually finalizes: the input
    /// carries its witness utxo and both signatures are real signatures over
    /// the segwit digest, not placeholders.
    pub fn finalizable_psbt() -> PartiallySignedTransaction {
        let (sk1, pk1) = signer(1);
        let (sk2, pk2) = signer(2);
        let mut pubkeys: Vec<PublicKey> = vec![pk1, pk2];
        pubkeys.sort_by_key(|pk| pk.to_bytes());
        let witness_script: Script = multisig::multisig_script(&pubkeys, 2);
        let value: u64 = 100_000;

        let tx = Transaction {
            version: 2,
            lock_time: PackedLockTime::ZERO,
            input: vec![TxIn {
                previous_output: outpoint(0x0f, 0),
                script_sig: Script::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: 90_000,
                script_pubkey: Builder::new().into_script(),
            }],
        };
        let mut psbt = PartiallySignedTransaction::from_unsigned_tx(tx).unwrap();
        psbt.inputs[0].witness_script = Some(witness_script.clone());
        psbt.inputs[0].witness_utxo = Some(TxOut {
            value,
            script_pubkey: Script::new_v0_p2wsh(&witness_script.wscript_hash()),
        });

        let sighash = SighashCache::new(&psbt.unsigned_tx)
            .segwit_signature_hash(0, &witness_script, value, EcdsaSighashType::All)
            .unwrap();
        let msg = Message::from_slice(&sighash[..]).unwrap();
        for (sk, pk) in [(sk1, pk1), (sk2, pk2)].into_iter() {
            psbt.inputs[0].partial_sigs.insert(
                pk,
                EcdsaSig {
                    sig: SECP256K1.sign_ecdsa(&msg, &sk),
                    hash_ty: EcdsaSighashType::All,
                },
            );
        }
        psbt
    }

    pub fn outpoint(byte: u8, vout: u32) -> OutPoint {
        let hex: String = format!("{byte:02x}").repeat(32);
        OutPoint::new(Txid::from_str(&hex).unwrap(), vout)
    }

    /// Attach a partial signature from synthetic signer `seed` to every input.
    pub fn sign_with(psbt: &mut PartiallySignedTransaction, seed: u8) {
        let (sk, pk) = signer(seed);
        for input in psbt.inputs.iter_mut() {
            input.partial_sigs.insert(pk, dummy_sig(&sk));
        }
    }
}
