// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

#![doc = include_str!("../../README.md")]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cosigner_core::bitcoin::Network;
use cosigner_core::broadcast::{self, BroadcastEndpoint, EsploraEndpoint, LookupEndpoint};
use cosigner_core::coordinator::UploadOutcome;
use cosigner_core::types::{ExtendedKey, PsbtStatus, Scope};
use cosigner_core::{multisig, psbt, Coordinator, Result};

mod cli;
mod store;

use self::cli::{io, Cli, Commands, DeriveCommand, DescriptorCommand, KeyCommand, PsbtCommand};
use self::store::JsonStore;

fn default_endpoints(network: Network) -> Vec<(&'static str, &'static str)> {
    match network {
        Network::Bitcoin => vec![
            ("mempool.space", "https://mempool.space/api"),
            ("blockstream.info", "https://blockstream.info/api"),
        ],
        Network::Testnet => vec![
            ("mempool.space", "https://mempool.space/testnet/api"),
            ("blockstream.info", "https://blockstream.info/testnet/api"),
        ],
        Network::Signet => vec![("mempool.space", "https://mempool.space/signet/api")],
        _ => Vec::new(),
    }
}

/// Read a PSBT file in any of the encodings signer software produces:
/// base64 text, hex text, or the raw binary serialization.
fn read_psbt_blob(file: PathBuf) -> Result<String> {
    let bytes: Vec<u8> = fs::read(file)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text.trim().to_string()),
        Err(e) => Ok(e
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Cli::parse();
    let network: Network = args.network;
    let scope: Scope = Scope::new(args.scope);

    let path: PathBuf = cosigner_common::cosigner()?.join(format!("{network}.json"));
    let store: Arc<JsonStore> = Arc::new(JsonStore::open(path)?);

    let mut broadcasters: Vec<Arc<dyn BroadcastEndpoint>> = Vec::new();
    let mut lookups: Vec<Arc<dyn LookupEndpoint>> = Vec::new();
    if args.endpoints.is_empty() {
        for (name, url) in default_endpoints(network).into_iter() {
            let endpoint: EsploraEndpoint = EsploraEndpoint::new(name, url)?;
            broadcasters.push(Arc::new(endpoint.clone()));
            lookups.push(Arc::new(endpoint));
        }
    } else {
        for url in args.endpoints.iter() {
            let endpoint: EsploraEndpoint = EsploraEndpoint::new(url.as_str(), url.as_str())?;
            broadcasters.push(Arc::new(endpoint.clone()));
            lookups.push(Arc::new(endpoint));
        }
    }
    let status_lookups: Vec<Arc<dyn LookupEndpoint>> = lookups.clone();

    let coordinator = Coordinator::new(store.clone(), store.clone(), store)
        .with_endpoints(broadcasters, lookups);

    match args.command {
        Commands::Key { command } => {
            let registry = coordinator.registry(scope);
            match command {
                KeyCommand::Add { label, xpub } => {
                    let key = registry.register(label, &xpub)?;
                    println!("Registered key #{} ({})", key.id, key.xpub.fingerprint());
                }
                KeyCommand::Rename { id, label } => {
                    let key = registry.relabel(id, label)?;
                    println!("Key #{} renamed to '{}'", key.id, key.label);
                }
                KeyCommand::Remove { id } => {
                    if registry.remove(id)? {
                        println!("Removed.");
                    } else {
                        println!("Key not found.");
                    }
                }
                KeyCommand::List => io::print_keys(registry.list()?),
            }
            Ok(())
        }
        Commands::Derive { command } => {
            let registry = coordinator.registry(scope.clone());
            match command {
                DeriveCommand::Address { keys, m, index } => {
                    let keys: Vec<ExtendedKey> = keys
                        .into_iter()
                        .map(|id| registry.get(id))
                        .collect::<Result<_, _>>()?;
                    let derived = multisig::derive_address(&keys, m, index, network)?;
                    println!("Address: {}", derived.address);
                    println!("Witness script: {:x}", derived.witness_script);
                    println!("Descriptor: {}", derived.descriptor);
                }
                DeriveCommand::Descriptor { keys, m, save } => {
                    let keys: Vec<ExtendedKey> = keys
                        .into_iter()
                        .map(|id| registry.get(id))
                        .collect::<Result<_, _>>()?;
                    let descriptor: String = multisig::derive_descriptor(&keys, m, network)?;
                    println!("{descriptor}");
                    if let Some(name) = save {
                        let first = multisig::derive_address(&keys, m, 0, network)?;
                        let record = coordinator.descriptors().insert(
                            &scope,
                            name,
                            descriptor,
                            m as u8,
                            keys.len() as u8,
                            Some(first.address.to_string()),
                        )?;
                        println!("Saved as descriptor #{}", record.id);
                    }
                }
            }
            Ok(())
        }
        Commands::Descriptor { command } => {
            match command {
                DescriptorCommand::List => {
                    io::print_descriptors(coordinator.descriptors().list(&scope)?)
                }
                DescriptorCommand::Delete { id } => {
                    if coordinator.descriptors().delete(id)? {
                        println!("Deleted.");
                    } else {
                        println!("Descriptor not found.");
                    }
                }
            }
            Ok(())
        }
        Commands::Psbt { command } => {
            match command {
                PsbtCommand::Upload { name, file, notes } => {
                    let blob: String = read_psbt_blob(file)?;
                    match coordinator.upload_psbt(&scope, name, &blob, notes)? {
                        UploadOutcome::Inserted(record) => println!(
                            "Stored as record #{} ({} of {}, {} signature(s))",
                            record.id, record.m, record.n, record.signatures
                        ),
                        UploadOutcome::Merged { record, added } => println!(
                            "Merged {added} new signature(s) into record #{}: now {} of {}",
                            record.id, record.signatures, record.m
                        ),
                        UploadOutcome::Unchanged(record) => println!(
                            "Record #{} already contains everything in this upload",
                            record.id
                        ),
                    }
                }
                PsbtCommand::Inspect { id } => {
                    let record = coordinator
                        .psbts()
                        .get(id)?
                        .ok_or("Record not found")?;
                    let decoded = psbt::decode(&record.blob)?;
                    let info = psbt::inspect(&decoded, &coordinator.registry(scope))?;
                    io::print_signature_info(&record, info);
                }
                PsbtCommand::List => io::print_psbts(coordinator.psbts().list(&scope)?),
                PsbtCommand::Status { id } => {
                    let mut record = coordinator
                        .psbts()
                        .get(id)?
                        .ok_or("Record not found")?;
                    if record.status.is_watchable() {
                        if let Some(txid) = record.txid {
                            let mut best: u32 = record.confirmations;
                            for lookup in status_lookups.iter() {
                                match broadcast::confirmation_depth(lookup.as_ref(), &txid).await {
                                    Ok(depth) => best = best.max(depth),
                                    Err(e) => {
                                        log::debug!("lookup {} failed: {e}", lookup.name())
                                    }
                                }
                            }
                            if best > record.confirmations {
                                record = coordinator.psbts().update_broadcast(
                                    id,
                                    None,
                                    PsbtStatus::from_depth(best),
                                    best,
                                )?;
                            }
                        }
                    }
                    io::print_record(&record);
                }
                PsbtCommand::Broadcast { id } => {
                    let record = coordinator.broadcast_record(id).await?;
                    if let Some(txid) = record.txid {
                        println!("Broadcast: {txid}");
                        println!("Track confirmations with: cosigner psbt status {id}");
                    }
                    // One-shot process: confirmation tracking happens on the
                    // next `psbt status` invocation, not in the background.
                    coordinator.shutdown();
                }
                PsbtCommand::Delete { id } => {
                    if coordinator.delete_record(id)? {
                        println!("Deleted.");
                    } else {
                        println!("Record not found.");
                    }
                }
            }
            Ok(())
        }
    }
}
