// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cosigner_core::bitcoin::Network;

pub mod io;

#[derive(Debug, Parser)]
#[command(name = "cosigner")]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Network
    #[clap(short, long, default_value_t = Network::Bitcoin)]
    pub network: Network,
    /// Scope (partition shared by one group of cosigners)
    #[clap(short, long, default_value = "default")]
    pub scope: String,
    /// Esplora endpoint URL (repeatable; replaces the built-in endpoints)
    #[clap(long = "endpoint")]
    pub endpoints: Vec<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage registered extended public keys
    Key {
        #[command(subcommand)]
        command: KeyCommand,
    },
    /// Derive multisig addresses and descriptors
    #[command(arg_required_else_help = true)]
    Derive {
        #[command(subcommand)]
        command: DeriveCommand,
    },
    /// Manage saved descriptors
    Descriptor {
        #[command(subcommand)]
        command: DescriptorCommand,
    },
    /// Manage partially-signed transactions
    Psbt {
        #[command(subcommand)]
        command: PsbtCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum KeyCommand {
    /// Register an extended public key
    Add {
        /// Label
        #[arg(required = true)]
        label: String,
        /// Extended public key (xpub/tpub)
        #[arg(required = true)]
        xpub: String,
    },
    /// Change a key's label
    Rename {
        /// Key id
        #[arg(required = true)]
        id: u64,
        /// New label
        #[arg(required = true)]
        label: String,
    },
    /// Remove a key
    Remove {
        /// Key id
        #[arg(required = true)]
        id: u64,
    },
    /// List registered keys
    List,
}

#[derive(Debug, Subcommand)]
pub enum DeriveCommand {
    /// Derive a P2WSH multisig address
    Address {
        /// Key ids, comma separated
        #[arg(required = true, value_delimiter = ',')]
        keys: Vec<u64>,
        /// Required signatures (M)
        #[arg(short = 'm', long = "threshold", required = true)]
        m: usize,
        /// Receive address index
        #[arg(long, default_value_t = 0)]
        index: u32,
    },
    /// Derive a sortedmulti output descriptor
    Descriptor {
        /// Key ids, comma separated
        #[arg(required = true, value_delimiter = ',')]
        keys: Vec<u64>,
        /// Required signatures (M)
        #[arg(short = 'm', long = "threshold", required = true)]
        m: usize,
        /// Save the descriptor under this name
        #[arg(long)]
        save: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum DescriptorCommand {
    /// List saved descriptors
    List,
    /// Delete a saved descriptor
    Delete {
        /// Descriptor id
        #[arg(required = true)]
        id: u64,
    },
}

#[derive(Debug, Subcommand)]
pub enum PsbtCommand {
    /// Upload a PSBT, merging it into an equivalent stored one if present
    Upload {
        /// Name
        #[arg(required = true)]
        name: String,
        /// PSBT file (binary, base64 or hex)
        #[arg(required = true)]
        file: PathBuf,
        /// Free-form note
        #[arg(long)]
        notes: Option<String>,
    },
    /// Show quorum and per-signer signature state
    Inspect {
        /// Record id
        #[arg(required = true)]
        id: u64,
    },
    /// List stored PSBTs
    List,
    /// Refresh and show broadcast/confirmation state
    Status {
        /// Record id
        #[arg(required = true)]
        id: u64,
    },
    /// Finalize and broadcast a quorum-complete PSBT
    Broadcast {
        /// Record id
        #[arg(required = true)]
        id: u64,
    },
    /// Delete a stored PSBT
    Delete {
        /// Record id
        #[arg(required = true)]
        id: u64,
    },
}
