// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

//! Broadcast and lookup endpoints.
//!
//! A finalized transaction is fanned out to several independent broadcast
//! services; confirmation is then tracked through lookup services, counting
//! a service as an independent witness only when it was not itself a
//! broadcast target.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::Txid;
use futures::future::join_all;
use log::debug;
use serde::Deserialize;

pub mod poller;

pub use self::poller::ConfirmationPoller;

/// Depth at which a transaction is considered final.
pub const FINALITY_DEPTH: u32 = 6;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("Rejected by network: {0}")]
    Rejected(String),
    #[error("Invalid txid in endpoint response: {0}")]
    InvalidTxid(String),
}

impl Error {
    /// Rejections meaning the transaction is already known to the network.
    ///
    /// These divert into the confirmation-check path instead of counting as
    /// a broadcast failure: someone else got there first.
    pub fn is_already_known(&self) -> bool {
        match self {
            Self::Rejected(reason) => {
                let reason: String = reason.to_lowercase();
                reason.contains("already in block chain")
                    || reason.contains("already in the mempool")
                    || reason.contains("already known")
                    || reason.contains("txn-already")
            }
            _ => false,
        }
    }
}

#[async_trait]
pub trait BroadcastEndpoint: Send + Sync {
    fn name(&self) -> &str;
    /// Submit a raw transaction, returning the txid the service computed.
    async fn submit(&self, raw_tx_hex: &str) -> Result<Txid, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
}

#[async_trait]
pub trait LookupEndpoint: Send + Sync {
    fn name(&self) -> &str;
    async fn exists(&self, txid: &Txid) -> Result<bool, Error>;
    async fn status(&self, txid: &Txid) -> Result<TxStatus, Error>;
    async fn chain_tip_height(&self) -> Result<u64, Error>;
}

/// One endpoint's submission result.
#[derive(Debug)]
pub struct SubmissionResult {
    pub endpoint: String,
    pub result: Result<Txid, Error>,
}

/// Aggregated fan-out outcome; success requires at least one acceptance.
#[derive(Debug)]
pub struct BroadcastReport {
    pub results: Vec<SubmissionResult>,
}

impl BroadcastReport {
    pub fn accepted(&self) -> bool {
        self.results.iter().any(|r| r.result.is_ok())
    }

    pub fn already_known(&self) -> bool {
        self.results
            .iter()
            .any(|r| matches!(&r.result, Err(e) if e.is_already_known()))
    }

    /// Names of every endpoint the transaction was submitted to.
    pub fn targets(&self) -> HashSet<String> {
        self.results.iter().map(|r| r.endpoint.clone()).collect()
    }
}

impl fmt::Display for BroadcastReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, result) in self.results.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            match &result.result {
                Ok(txid) => write!(f, "{}: accepted {txid}", result.endpoint)?,
                Err(e) => write!(f, "{}: {e}", result.endpoint)?,
            }
        }
        Ok(())
    }
}

/// Fan the raw transaction out to every endpoint concurrently; all requests
/// are awaited before the outcome is decided.
pub async fn submit_all(
    endpoints: &[Arc<dyn BroadcastEndpoint>],
    raw_tx_hex: &str,
) -> BroadcastReport {
    let submissions = endpoints.iter().map(|endpoint| async move {
        SubmissionResult {
            endpoint: endpoint.name().to_string(),
            result: endpoint.submit(raw_tx_hex).await,
        }
    });
    BroadcastReport {
        results: join_all(submissions).await,
    }
}

/// How many lookup services can see the transaction, excluding services the
/// transaction was broadcast through (those would only echo our submission
/// back as "confirmation").
pub async fn independent_confirmations(
    lookups: &[Arc<dyn LookupEndpoint>],
    broadcast_targets: &HashSet<String>,
    txid: &Txid,
) -> usize {
    let checks = lookups
        .iter()
        .filter(|lookup| !broadcast_targets.contains(lookup.name()))
        .map(|lookup| async move {
            match lookup.exists(txid).await {
                Ok(found) => found,
                Err(e) => {
                    debug!("lookup {} failed for {txid}: {e}", lookup.name());
                    false
                }
            }
        });
    join_all(checks)
        .await
        .into_iter()
        .filter(|found| *found)
        .count()
}

/// Confirmation depth per a single lookup: chain tip height minus inclusion
/// height, plus one. Zero while unconfirmed.
pub async fn confirmation_depth(lookup: &dyn LookupEndpoint, txid: &Txid) -> Result<u32, Error> {
    let status: TxStatus = lookup.status(txid).await?;
    if !status.confirmed {
        return Ok(0);
    }
    match status.block_height {
        Some(height) => {
            let tip: u64 = lookup.chain_tip_height().await?;
            Ok(tip.saturating_sub(height).saturating_add(1) as u32)
        }
        // Confirmed without a height is a transient read; report unconfirmed
        // and let the next poll tick resolve it.
        None => Ok(0),
    }
}

/// Esplora-style HTTP API (mempool.space, blockstream.info).
#[derive(Debug, Clone)]
pub struct EsploraEndpoint {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EsploraTx {
    status: EsploraTxStatus,
}

#[derive(Deserialize)]
struct EsploraTxStatus {
    confirmed: bool,
    block_height: Option<u64>,
}

impl EsploraEndpoint {
    pub fn new<S>(name: S, base_url: S) -> Result<Self, Error>
    where
        S: Into<String>,
    {
        let client: reqwest::Client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl BroadcastEndpoint for EsploraEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, raw_tx_hex: &str) -> Result<Txid, Error> {
        let res = self
            .client
            .post(format!("{}/tx", self.base_url))
            .body(raw_tx_hex.to_string())
            .send()
            .await?;
        let status = res.status();
        let body: String = res.text().await?;
        if !status.is_success() {
            return Err(Error::Rejected(body));
        }
        Txid::from_str(body.trim()).map_err(|_| Error::InvalidTxid(body))
    }
}

#[async_trait]
impl LookupEndpoint for EsploraEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, txid: &Txid) -> Result<bool, Error> {
        let res = self
            .client
            .get(format!("{}/tx/{txid}", self.base_url))
            .send()
            .await?;
        Ok(res.status().is_success())
    }

    async fn status(&self, txid: &Txid) -> Result<TxStatus, Error> {
        let tx: EsploraTx = self
            .client
            .get(format!("{}/tx/{txid}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(TxStatus {
            confirmed: tx.status.confirmed,
            block_height: tx.status.block_height,
        })
    }

    async fn chain_tip_height(&self) -> Result<u64, Error> {
        let body: String = self
            .client
            .get(format!("{}/blocks/tip/height", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        body.trim()
            .parse::<u64>()
            .map_err(|_| Error::Rejected(format!("unexpected tip height response: {body}")))
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    //! Mock endpoints for exercising fan-out and polling without a network.

    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    pub struct MockBroadcaster {
        name: String,
        pub outcome: Result<Txid, String>,
        pub calls: Mutex<usize>,
    }

    impl MockBroadcaster {
        pub fn accepting<S>(name: S, txid: Txid) -> Arc<Self>
        where
            S: Into<String>,
        {
            Arc::new(Self {
                name: name.into(),
                outcome: Ok(txid),
                calls: Mutex::new(0),
            })
        }

        pub fn rejecting<S>(name: S, reason: S) -> Arc<Self>
        where
            S: Into<String>,
        {
            Arc::new(Self {
                name: name.into(),
                outcome: Err(reason.into()),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl BroadcastEndpoint for MockBroadcaster {
        fn name(&self) -> &str {
            &self.name
        }

        async fn submit(&self, _raw_tx_hex: &str) -> Result<Txid, Error> {
            *self.calls.lock() += 1;
            match &self.outcome {
                Ok(txid) => Ok(*txid),
                Err(reason) => Err(Error::Rejected(reason.clone())),
            }
        }
    }

    /// Lookup returning a scripted sequence of depths, then repeating the
    /// last one.
    pub struct MockLookup {
        name: String,
        pub found: bool,
        pub depths: Mutex<Vec<u32>>,
        pub tip: u64,
    }

    impl MockLookup {
        pub fn with_depths<S>(name: S, found: bool, depths: Vec<u32>) -> Arc<Self>
        where
            S: Into<String>,
        {
            Arc::new(Self {
                name: name.into(),
                found,
                depths: Mutex::new(depths),
                tip: 800_000,
            })
        }

        fn next_depth(&self) -> u32 {
            let mut depths = self.depths.lock();
            if depths.len() > 1 {
                depths.remove(0)
            } else {
                depths.first().copied().unwrap_or(0)
            }
        }
    }

    #[async_trait]
    impl LookupEndpoint for MockLookup {
        fn name(&self) -> &str {
            &self.name
        }

        async fn exists(&self, _txid: &Txid) -> Result<bool, Error> {
            Ok(self.found)
        }

        async fn status(&self, _txid: &Txid) -> Result<TxStatus, Error> {
            let depth: u32 = self.next_depth();
            if depth == 0 {
                return Ok(TxStatus {
                    confirmed: false,
                    block_height: None,
                });
            }
            Ok(TxStatus {
                confirmed: true,
                block_height: Some(self.tip - u64::from(depth) + 1),
            })
        }

        async fn chain_tip_height(&self) -> Result<u64, Error> {
            Ok(self.tip)
        }
    }

    pub fn txid(byte: u8) -> Txid {
        let hex: String = format!("{byte:02x}").repeat(32);
        Txid::from_str(&hex).unwrap()
    }
}
