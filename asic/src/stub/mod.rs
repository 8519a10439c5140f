// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Deserialize;
use slog::{debug, info, o};
use tokio::sync::mpsc;

use aal::{AsicOps, AsicResult, PurgeTarget};
use common::ports::{Glort, PortId};

pub mod ports;
pub mod purge;

pub use purge::LearnedEntry;

/// A port the stub should create at startup.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct PortConfig {
    pub port: PortId,
    pub glort: Glort,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AsicConfig {
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

impl AsicOps for StubHandle {
    fn port_lookup(&self, port: PortId) -> AsicResult<Option<Glort>> {
        Ok(ports::lookup(self, port))
    }

    fn purge_kick(&self) {
        self.kicks.fetch_add(1, Ordering::Relaxed);
        let tx = self.kick_tx.lock().unwrap();
        match tx.as_ref() {
            // The receiver only needs to know that something may be pending,
            // so a closed channel is not worth reporting beyond a debug note.
            Some(tx) => {
                if tx.send(()).is_err() {
                    debug!(self.log, "purge kick receiver has gone away");
                }
            }
            None => debug!(self.log, "no purge kick handler registered"),
        }
    }

    fn purge_execute(&self, target: &PurgeTarget) -> AsicResult<()> {
        purge::execute(self, target)
    }
}

pub struct StubHandle {
    log: slog::Logger,
    ports: Mutex<BTreeMap<PortId, ports::StubPort>>,
    table: Mutex<Vec<LearnedEntry>>,
    executed: Mutex<Vec<PurgeTarget>>,
    // Number of upcoming purge_execute() calls that should fail
    pending_faults: Mutex<u32>,
    kicks: AtomicU64,
    kick_tx: Mutex<Option<mpsc::UnboundedSender<()>>>,
}

impl StubHandle {
    pub fn new(log: &slog::Logger, config: &AsicConfig) -> AsicResult<Self> {
        let log = log.new(o!("unit" => "asic_stub"));
        let hdl = StubHandle {
            log,
            ports: Mutex::new(BTreeMap::new()),
            table: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            pending_faults: Mutex::new(0),
            kicks: AtomicU64::new(0),
            kick_tx: Mutex::new(None),
        };
        for p in &config.ports {
            ports::add_port(&hdl, p.port, p.glort)?;
        }
        info!(hdl.log, "stub asic initialized";
            "ports" => config.ports.len());
        Ok(hdl)
    }

    /// Register a channel on which every purge kick will be signalled.
    pub fn register_kick_handler(&self, tx: mpsc::UnboundedSender<()>) {
        let mut kick_tx = self.kick_tx.lock().unwrap();
        *kick_tx = Some(tx);
    }

    /// Stop signalling kicks.  Dropping the sender closes the channel once
    /// the receiver has consumed what is already queued.
    pub fn unregister_kick_handler(&self) {
        self.kick_tx.lock().unwrap().take();
    }

    /// Number of times the purge engine has been kicked.
    pub fn kick_count(&self) -> u64 {
        self.kicks.load(Ordering::Relaxed)
    }

    pub fn port_add(&self, port: PortId, glort: Glort) -> AsicResult<()> {
        ports::add_port(self, port, glort)
    }

    pub fn port_delete(&self, port: PortId) -> AsicResult<()> {
        ports::delete_port(self, port)
    }

    /// Insert an entry into the stub's address table, as though the hardware
    /// had learned it.
    pub fn learn(&self, entry: LearnedEntry) {
        purge::learn(self, entry)
    }

    /// A copy of the stub's address table.
    pub fn learned(&self) -> Vec<LearnedEntry> {
        self.table.lock().unwrap().clone()
    }

    /// Every purge the stub has been asked to execute, in order.
    pub fn executed(&self) -> Vec<PurgeTarget> {
        self.executed.lock().unwrap().clone()
    }

    /// Cause the next `count` purge operations to fail.
    pub fn inject_purge_faults(&self, count: u32) {
        *self.pending_faults.lock().unwrap() = count;
    }
}
