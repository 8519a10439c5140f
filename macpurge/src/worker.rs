// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The maintenance task that drives the hardware purge engine.

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use slog::{debug, info, o};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::PurgeCoordinator;
use aal::AsicOps;

const DEFAULT_DISPATCH_BATCH: usize = 64;

/// Tunables for the purge worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Maximum number of purges issued before yielding to other tasks
    pub dispatch_batch: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            dispatch_batch: DEFAULT_DISPATCH_BATCH,
        }
    }
}

/// Wait for purge kicks and drain the coordinator after each one.  Returns
/// once every sender for `kicks` has been dropped.
pub async fn purge_worker<H>(
    coord: Arc<PurgeCoordinator<H>>,
    mut kicks: mpsc::UnboundedReceiver<()>,
    config: WorkerConfig,
) where
    H: AsicOps + Send + Sync + 'static,
{
    let log = coord.log.new(o!("unit" => "purge_worker"));
    let batch = config.dispatch_batch.max(1);
    info!(log, "purge worker started"; "dispatch_batch" => batch);

    while kicks.recv().await.is_some() {
        // Several kicks may have arrived while we were busy; a single pass
        // covers all of them.
        while kicks.try_recv().is_ok() {}

        let mut total = 0;
        loop {
            let n = coord.drain_batch(batch);
            total += n;
            if n < batch {
                break;
            }
            tokio::task::yield_now().await;
        }
        debug!(log, "purge pass finished"; "dispatched" => total);
    }

    info!(log, "purge worker exiting");
}

/// Spawn `purge_worker()` onto the current tokio runtime.
pub fn spawn_worker<H>(
    coord: Arc<PurgeCoordinator<H>>,
    kicks: mpsc::UnboundedReceiver<()>,
    config: WorkerConfig,
) -> JoinHandle<()>
where
    H: AsicOps + Send + Sync + 'static,
{
    tokio::spawn(purge_worker(coord, kicks, config))
}
