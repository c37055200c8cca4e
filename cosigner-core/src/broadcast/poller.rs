// Copyright (c) 2022-2023 Yuki Kishimoto
// Distributed under the MIT software license

//! Confirmation polling.
//!
//! One cancellable task per broadcast transaction, driving the stored record
//! from `broadcast` through `confirming` to `final`.

use std::sync::Arc;
use std::time::Duration;

use bitcoin::Txid;
use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::{confirmation_depth, LookupEndpoint, FINALITY_DEPTH};
use crate::store::PsbtStore;
use crate::types::{PsbtStatus, RecordId};

const UNCONFIRMED_INTERVAL: Duration = Duration::from_secs(5);
const CONFIRMED_INTERVAL: Duration = Duration::from_secs(30);

/// Cancellable per-record confirmation watcher.
///
/// Ephemeral runtime state: never persisted, rebuilt at process start for
/// any record still short of finality.
pub struct ConfirmationPoller {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ConfirmationPoller {
    pub fn spawn(
        store: Arc<dyn PsbtStore>,
        lookups: Vec<Arc<dyn LookupEndpoint>>,
        id: RecordId,
        txid: Txid,
        seen_depth: u32,
    ) -> Self {
        let token = CancellationToken::new();
        let child: CancellationToken = token.clone();
        let handle: JoinHandle<()> =
            tokio::spawn(async move { poll_loop(store, lookups, id, txid, seen_depth, child).await });
        Self { token, handle }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn poll_loop(
    store: Arc<dyn PsbtStore>,
    lookups: Vec<Arc<dyn LookupEndpoint>>,
    id: RecordId,
    txid: Txid,
    mut depth: u32,
    token: CancellationToken,
) {
    loop {
        let interval: Duration = if depth == 0 {
            UNCONFIRMED_INTERVAL
        } else {
            CONFIRMED_INTERVAL
        };
        tokio::select! {
            _ = token.cancelled() => break,
            _ = sleep(interval) => {}
        }

        let mut observed: Option<u32> = None;
        for lookup in lookups.iter() {
            match confirmation_depth(lookup.as_ref(), &txid).await {
                Ok(d) => {
                    observed = Some(d);
                    break;
                }
                // Degraded to "status unknown"; the next tick retries.
                Err(e) => debug!("lookup {} failed for {txid}: {e}", lookup.name()),
            }
        }
        let observed: u32 = match observed {
            Some(observed) => observed,
            None => continue,
        };

        // Depth only ever increases: a lower reading is a transient view of
        // a lagging service, not a state change.
        if observed <= depth {
            continue;
        }
        depth = observed;

        let status: PsbtStatus = PsbtStatus::from_depth(depth);
        if let Err(e) = store.update_broadcast(id, Some(txid), status, depth) {
            warn!("failed to persist depth {depth} for record {id}: {e}");
        }
        if depth >= FINALITY_DEPTH {
            debug!("{txid} reached finality, stopping poller");
            break;
        }
    }
}
