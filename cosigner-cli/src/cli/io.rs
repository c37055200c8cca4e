// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

use cosigner_core::psbt::SignatureInfo;
use cosigner_core::types::{DescriptorRecord, ExtendedKey, PsbtRecord};
use prettytable::{row, Table};

pub fn print_keys(keys: Vec<ExtendedKey>) {
    let mut table = Table::new();
    table.set_titles(row!["ID", "Label", "Fingerprint", "Extended public key"]);
    for key in keys.into_iter() {
        table.add_row(row![key.id, key.label, key.xpub.fingerprint(), key.xpub]);
    }
    table.printstd();
}

pub fn print_descriptors(descriptors: Vec<DescriptorRecord>) {
    let mut table = Table::new();
    table.set_titles(row!["ID", "Name", "Quorum", "First address", "Descriptor"]);
    for record in descriptors.into_iter() {
        table.add_row(row![
            record.id,
            record.name,
            format!("{} of {}", record.m, record.n),
            record.first_address.unwrap_or_default(),
            record.descriptor
        ]);
    }
    table.printstd();
}

pub fn print_psbts(records: Vec<PsbtRecord>) {
    let mut table = Table::new();
    table.set_titles(row![
        "ID",
        "Name",
        "Quorum",
        "Signatures",
        "Status",
        "Confirmations",
        "Txid"
    ]);
    for record in records.into_iter() {
        table.add_row(row![
            record.id,
            record.name,
            format!("{} of {}", record.m, record.n),
            record.signatures,
            record.status,
            record.confirmations,
            record
                .txid
                .map(|txid| txid.to_string())
                .unwrap_or_default()
        ]);
    }
    table.printstd();
}

pub fn print_signature_info(record: &PsbtRecord, info: SignatureInfo) {
    println!(
        "{} of {} multisig, {} signature(s) collected{}",
        info.m,
        info.n,
        info.signatures,
        if info.is_complete() {
            ", ready to broadcast"
        } else {
            ""
        }
    );
    if let Some(notes) = &record.notes {
        println!("Notes: {notes}");
    }

    let mut table = Table::new();
    table.set_titles(row!["Public key", "Signer", "Signed"]);
    for signer in info.signers.into_iter() {
        table.add_row(row![
            signer.pubkey,
            signer
                .matched
                .map(|m| format!("{} ({})", m.label, m.path))
                .unwrap_or_else(|| "unknown".to_string()),
            if signer.has_signed { "yes" } else { "no" }
        ]);
    }
    table.printstd();
}

pub fn print_record(record: &PsbtRecord) {
    let mut table = Table::new();
    table.add_row(row!["Name", record.name]);
    table.add_row(row!["Quorum", format!("{} of {}", record.m, record.n)]);
    table.add_row(row!["Signatures", record.signatures]);
    table.add_row(row!["Status", record.status]);
    if let Some(txid) = &record.txid {
        table.add_row(row!["Txid", txid]);
        table.add_row(row!["Confirmations", record.confirmations]);
    }
    table.printstd();
}
