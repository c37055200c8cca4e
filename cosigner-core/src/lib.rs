// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

#![doc = include_str!("../README.md")]

pub extern crate bdk;
pub extern crate bitcoin;

pub use bdk::miniscript;
pub use bitcoin::hashes;
pub use bitcoin::secp256k1;

use bitcoin::secp256k1::{All, Secp256k1};
use once_cell::sync::Lazy;

pub mod bips;
pub mod broadcast;
pub mod coordinator;
pub mod multisig;
pub mod psbt;
pub mod registry;
pub mod store;
pub mod types;
pub mod util;

pub use self::coordinator::{Coordinator, UploadOutcome};
pub use self::registry::KeyRegistry;
pub use self::types::{ExtendedKey, PsbtRecord, PsbtStatus, Scope};

pub static SECP256K1: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

pub type Result<T, E = Box<dyn std::error::Error>> = std::result::Result<T, E>;
