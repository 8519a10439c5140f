// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Coalescing coordinator for MAC address table purge requests.
//!
//! Callers on any thread submit purge requests of varying specificity.  The
//! coordinator drops requests already covered by something pending, cancels
//! pending requests covered by a new one, and hands the survivors to the
//! hardware one at a time, round-robin across ports.  Completion callbacks
//! fire once a purge covering the caller's request has finished.

use std::sync::Arc;

use parking_lot::Mutex;
use slog::{error, info, o};

use aal::AsicOps;
use common::ports::{Glort, PortId};

mod bitset;
mod callback;
mod coalesce;
mod dispatch;
mod entry;
#[cfg(test)]
mod fault;
mod registry;
mod stats;
mod tree;
mod types;
mod worker;

pub use bitset::BitSet;
pub use callback::{CallbackEvent, CallbackFn, CallbackRecord, PurgeHandler};
pub use coalesce::Admission;
pub use entry::{EntryDump, REMID_ONLY, VID2_ONLY};
pub use registry::{PurgeRegistry, RegistryDump};
pub use stats::{CallbackStats, PurgeStats, RequestStats, ShapeTally};
pub use tree::{KeyedTree, TreeError};
pub use types::*;
pub use worker::{purge_worker, spawn_worker, WorkerConfig};

/// The purge coordinator for one switch.
pub struct PurgeCoordinator<H: AsicOps> {
    pub(crate) log: slog::Logger,
    hdl: Arc<H>,
    registry: Mutex<PurgeRegistry>,
}

impl<H: AsicOps> PurgeCoordinator<H> {
    pub fn new(log: &slog::Logger, hdl: Arc<H>) -> PurgeResult<Self> {
        let log = log.new(o!("unit" => "macpurge"));
        let registry = PurgeRegistry::new(&log)?;
        Ok(PurgeCoordinator {
            log,
            hdl,
            registry: Mutex::new(registry),
        })
    }

    pub fn asic(&self) -> &Arc<H> {
        &self.hdl
    }

    // Confirm that a port-scoped request names a live port, returning its
    // glort.  This is done before the registry is locked.
    fn lookup(&self, scope: PurgeScope) -> PurgeResult<Option<Glort>> {
        let Some(port) = scope.port() else {
            return Ok(None);
        };
        match self.hdl.port_lookup(port)? {
            Some(glort) => Ok(Some(glort)),
            None => Err(PurgeError::InvalidPort(port)),
        }
    }

    fn reject(&self, err: PurgeError) -> PurgeError {
        if err.is_caller_error() {
            self.registry.lock().note_invalid(&err);
        }
        err
    }

    /// Submit a purge request.  The hardware purge engine is kicked once
    /// the request reaches the registry, whatever the admission outcome.
    pub fn enqueue(
        &self,
        scope: PurgeScope,
        shape: PurgeShape,
        handler: Option<&PurgeHandler>,
    ) -> PurgeResult<Admission> {
        let glort = self.lookup(scope).map_err(|e| self.reject(e))?;
        let result = self.registry.lock().enqueue(scope, glort, shape, handler);
        self.hdl.purge_kick();
        result
    }

    /// Submit a purge request given as raw optional fields.  Any combination
    /// other than the six request shapes is rejected.
    pub fn enqueue_raw(
        &self,
        scope: PurgeScope,
        vid1: Option<u16>,
        vid2: Option<u16>,
        remote_id: Option<u16>,
        handler: Option<&PurgeHandler>,
    ) -> PurgeResult<Admission> {
        let shape = PurgeShape::from_fields(vid1, vid2, remote_id)
            .map_err(|e| self.reject(e))?;
        self.enqueue(scope, shape, handler)
    }

    /// Request a flush of every aged-out address.  It is dispatched after
    /// all other pending purges.
    pub fn request_expired_flush(&self, handler: Option<&PurgeHandler>) {
        self.registry.lock().request_expired(handler);
        self.hdl.purge_kick();
    }

    /// Submit a request in one of the caller-facing flush modes.
    pub fn flush(
        &self,
        mode: FlushMode,
        handler: Option<&PurgeHandler>,
    ) -> PurgeResult<Admission> {
        match mode.split() {
            Some((scope, shape)) => self.enqueue(scope, shape, handler),
            None => {
                self.request_expired_flush(handler);
                Ok(Admission::Enqueued)
            }
        }
    }

    /// Take the next purge to hand to the hardware.
    pub fn next_request(&self) -> Option<PurgeRequest> {
        self.registry.lock().next_request()
    }

    /// Report that the hardware has finished `req`, firing every callback
    /// it satisfies.  Handlers run without the registry locked, so they are
    /// free to submit new requests.
    pub fn complete(&self, req: &PurgeRequest) {
        let fired = self.registry.lock().complete(req);
        for rec in &fired {
            rec.fire();
        }
    }

    // Hand one request to the hardware.  A failed purge is still completed;
    // holding its callbacks back would strand them.
    fn execute(&self, req: &PurgeRequest) {
        if let Err(e) = self.hdl.purge_execute(&req.target) {
            error!(self.log, "hardware purge failed";
                "request" => %req,
                "error" => %e);
            self.registry.lock().note_dispatch_failure();
        }
        self.complete(req);
    }

    /// Dispatch and complete up to `max` purges, returning how many were
    /// carried out.
    pub fn drain_batch(&self, max: usize) -> usize {
        for n in 0..max {
            let Some(req) = self.next_request() else {
                return n;
            };
            self.execute(&req);
        }
        max
    }

    /// Dispatch and complete purges until nothing is pending.
    pub fn drain(&self) -> usize {
        let mut total = 0;
        while let Some(req) = self.next_request() {
            self.execute(&req);
            total += 1;
        }
        total
    }

    /// Note that `port` has been destroyed.  Purges already queued against
    /// it are still dispatched.
    pub fn port_removed(&self, port: PortId) -> bool {
        let found = self.registry.lock().port_removed(port);
        if found {
            info!(self.log, "port removed with purge entry"; "port" => %port);
        }
        found
    }

    /// Discard everything pending.  Callbacks are detached without being
    /// invoked and handed back to the caller.
    pub fn shutdown(&self) -> Vec<CallbackRecord> {
        let detached = self.registry.lock().shutdown();
        info!(self.log, "purge coordinator shut down";
            "detached_callbacks" => detached.len());
        detached
    }

    pub fn stats(&self) -> PurgeStats {
        self.registry.lock().stats()
    }

    pub fn reset_stats(&self) {
        self.registry.lock().reset_stats()
    }

    pub fn dump(&self) -> RegistryDump {
        self.registry.lock().dump()
    }

    pub fn pending_obligations(&self) -> usize {
        self.registry.lock().pending_obligations()
    }
}

#[cfg(test)]
pub(crate) fn test_log() -> slog::Logger {
    use slog::Drain;

    let decorator =
        slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    slog::Logger::root(drain, o!())
}
