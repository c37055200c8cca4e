// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

use bitcoin::blockdata::opcodes;
use bitcoin::psbt::PartiallySignedTransaction;
use bitcoin::PublicKey;

use super::{decompile, Error, ScriptElement};
use crate::registry::{KeyMatch, KeyRegistry};

/// Per-key signer status for one witness script.
#[derive(Debug, Clone)]
pub struct SignerEntry {
    pub pubkey: PublicKey,
    pub has_signed: bool,
    pub matched: Option<KeyMatch>,
}

/// Signature state recovered from a PSBT's own serialized data.
///
/// Derived, never stored: the registry can change between reads, so the
/// signer identity list is recomputed every time.
#[derive(Debug, Clone)]
pub struct SignatureInfo {
    pub m: u8,
    pub n: u8,
    /// Maximum partial-signature count observed on any single input.
    pub signatures: usize,
    pub signers: Vec<SignerEntry>,
}

impl SignatureInfo {
    pub fn is_complete(&self) -> bool {
        self.signatures >= usize::from(self.m)
    }
}

/// M, N and candidate pubkeys from a decompiled witness script.
fn quorum(elements: &[ScriptElement]) -> Result<(u8, u8, Vec<PublicKey>), Error> {
    if elements.len() < 4 {
        return Err(Error::NotMultisig);
    }
    let checkmultisig: bool = matches!(
        elements.last(),
        Some(ScriptElement::Opcode(op)) if *op == opcodes::all::OP_CHECKMULTISIG.to_u8()
    );
    if !checkmultisig {
        return Err(Error::NotMultisig);
    }
    let m: u8 = elements
        .first()
        .and_then(ScriptElement::as_small_int)
        .ok_or(Error::NotMultisig)?;
    let n: u8 = elements
        .get(elements.len() - 2)
        .and_then(ScriptElement::as_small_int)
        .ok_or(Error::NotMultisig)?;
    let pubkeys: Vec<PublicKey> = elements
        .iter()
        .filter_map(ScriptElement::as_pubkey)
        .collect();
    Ok((m, n, pubkeys))
}

/// Parse the multisig quorum and per-key signer status out of a PSBT.
///
/// The first input carrying a witness script is authoritative for the signer
/// identity list; later inputs are assumed to share the same key set and
/// only contribute their signature counts.
pub fn inspect(
    psbt: &PartiallySignedTransaction,
    registry: &KeyRegistry,
) -> Result<SignatureInfo, Error> {
    let mut info: Option<SignatureInfo> = None;
    let mut signatures: usize = 0;

    for input in psbt.inputs.iter() {
        signatures = signatures.max(input.partial_sigs.len());

        if info.is_some() {
            continue;
        }
        let script = match input.witness_script.as_ref() {
            Some(script) => script,
            None => continue,
        };
        let (m, n, pubkeys) = quorum(&decompile(script)?)?;
        let mut signers: Vec<SignerEntry> = Vec::with_capacity(pubkeys.len());
        for pubkey in pubkeys.into_iter() {
            let has_signed: bool = input.partial_sigs.contains_key(&pubkey);
            let matched: Option<KeyMatch> = registry.match_key(&pubkey.inner)?;
            signers.push(SignerEntry {
                pubkey,
                has_signed,
                matched,
            });
        }
        info = Some(SignatureInfo {
            m,
            n,
            signatures: 0,
            signers,
        });
    }

    let mut info: SignatureInfo = info.ok_or(Error::NoWitnessScript)?;
    info.signatures = signatures;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::test_util::{multisig_psbt, outpoint, sign_with, TPUB_1, TPUB_2};
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Scope;
    use crate::SECP256K1;

    fn registry() -> KeyRegistry {
        KeyRegistry::new(Arc::new(MemoryStore::new()), Scope::default())
    }

    #[test]
    fn test_inspect_unsigned() {
        let psbt = multisig_psbt(&[outpoint(0x01, 0)]);
        let info = inspect(&psbt, &registry()).unwrap();
        assert_eq!(info.m, 2);
        assert_eq!(info.n, 2);
        assert_eq!(info.signatures, 0);
        assert_eq!(info.signers.len(), 2);
        assert!(info.signers.iter().all(|s| !s.has_signed));
        assert!(!info.is_complete());
    }

    #[test]
    fn test_inspect_matches_registered_keys() {
        let registry = registry();
        registry.register("alice", TPUB_1).unwrap();
        registry.register("bob", TPUB_2).unwrap();

        let psbt = multisig_psbt(&[outpoint(0x01, 0)]);
        let info = inspect(&psbt, &registry).unwrap();
        let labels: Vec<&str> = info
            .signers
            .iter()
            .filter_map(|s| s.matched.as_ref().map(|m| m.label.as_str()))
            .collect();
        assert_eq!(labels.len(), 2);
        assert!(labels.contains(&"alice"));
        assert!(labels.contains(&"bob"));
        for signer in info.signers.iter() {
            assert_eq!(
                signer.matched.as_ref().unwrap().path.to_string(),
                "m/0/0".to_string()
            );
        }
    }

    #[test]
    fn test_signature_count_is_max_not_sum() {
        let mut psbt = multisig_psbt(&[outpoint(0x01, 0), outpoint(0x02, 1)]);
        // One synthetic signer on every input: max is 1, sum would be 2.
        sign_with(&mut psbt, 1);
        let info = inspect(&psbt, &registry()).unwrap();
        assert_eq!(info.signatures, 1);
        assert!(!info.is_complete());
    }

    #[test]
    fn test_complete_at_threshold() {
        // M == N boundary: N-1 signatures is incomplete, N is complete.
        let mut psbt = multisig_psbt(&[outpoint(0x01, 0)]);
        sign_with(&mut psbt, 1);
        assert!(!inspect(&psbt, &registry()).unwrap().is_complete());
        sign_with(&mut psbt, 2);
        assert!(inspect(&psbt, &registry()).unwrap().is_complete());
    }

    #[test]
    fn test_no_witness_script() {
        let mut psbt = multisig_psbt(&[outpoint(0x01, 0)]);
        psbt.inputs[0].witness_script = None;
        assert!(matches!(
            inspect(&psbt, &registry()).unwrap_err(),
            Error::NoWitnessScript
        ));
    }

    #[test]
    fn test_signed_flag_tracks_partial_sigs() {
        let registry = registry();
        registry.register("alice", TPUB_1).unwrap();

        let mut psbt = multisig_psbt(&[outpoint(0x01, 0)]);
        // Sign with alice's actual leaf key so the script pubkey matches.
        let alice_leaf = bitcoin::PublicKey::new(
            crate::bips::bip32::parse_xpub(TPUB_1)
                .unwrap()
                .derive_pub(&SECP256K1, &crate::bips::bip32::leaf_path(false, 0).unwrap())
                .unwrap()
                .public_key,
        );
        let (sk, _) = super::super::test_util::signer(1);
        psbt.inputs[0]
            .partial_sigs
            .insert(alice_leaf, super::super::test_util::dummy_sig(&sk));

        let info = inspect(&psbt, &registry).unwrap();
        let alice = info
            .signers
            .iter()
            .find(|s| s.pubkey == alice_leaf)
            .unwrap();
        assert!(alice.has_signed);
        assert_eq!(alice.matched.as_ref().unwrap().label, "alice");
        let other = info
            .signers
            .iter()
            .find(|s| s.pubkey != alice_leaf)
            .unwrap();
        assert!(!other.has_signed);
    }
}
