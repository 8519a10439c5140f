// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The purge registry: every pending purge obligation on the switch, the
//! round-robin dispatch cursor, the pending completion callbacks, and the
//! statistics block.
//!
//! Entries are kept in a map ordered by scope, so the global entry is always
//! first.  The global entry is created with the registry and is never
//! removed.  A port entry is created by the first request against its port,
//! and is freed once its port has been removed and it has nothing left to
//! dispatch.
//!
//! A port entry is keyed by the glort its port had when the entry was
//! created as well as by the port.  If a removed port comes back with a
//! different glort while its old entry still has work queued, the old entry
//! keeps draining against the old glort and the new port gets an entry of
//! its own.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::Serialize;
use slog::{debug, error, o, trace};

use crate::callback::CallbackList;
use crate::callback::CallbackRecord;
use crate::callback::PurgeHandler;
use crate::callback::Registration;
use crate::entry::EntryDump;
use crate::entry::PurgeEntry;
use crate::stats::PurgeStats;
use crate::types::PurgeError;
use crate::types::PurgeResult;
use crate::types::PurgeScope;
use common::network::VlanId;
use common::ports::{Glort, PortId};

/// The key an entry is stored under.  Ordered by scope first, so the
/// global entry sorts ahead of every port entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct EntryKey {
    pub scope: PurgeScope,
    pub glort: Option<Glort>,
}

impl EntryKey {
    pub const GLOBAL: EntryKey = EntryKey {
        scope: PurgeScope::AllPorts,
        glort: None,
    };

    pub fn new(scope: PurgeScope, glort: Option<Glort>) -> Self {
        match scope {
            PurgeScope::AllPorts => EntryKey::GLOBAL,
            PurgeScope::Port(_) => EntryKey { scope, glort },
        }
    }
}

/// A read-only view of the registry, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct RegistryDump {
    /// The scope the dispatch scanner will consider first
    pub cursor: PurgeScope,
    pub flush_expired: bool,
    pub next_seq: u64,
    pub callbacks: usize,
    pub entries: Vec<EntryDump>,
}

pub struct PurgeRegistry {
    pub(crate) log: slog::Logger,
    pub(crate) entries: BTreeMap<EntryKey, PurgeEntry>,
    // Key at which the next dispatch scan starts.  It may name an entry
    // that has since been freed; scans treat it as a position, not a key.
    pub(crate) cursor: EntryKey,
    pub(crate) flush_expired: bool,
    pub(crate) next_seq: u64,
    pub(crate) callbacks: CallbackList,
    pub(crate) stats: PurgeStats,
}

impl PurgeRegistry {
    pub fn new(log: &slog::Logger) -> PurgeResult<Self> {
        let log = log.new(o!("unit" => "purge_registry"));
        let mut entries = BTreeMap::new();
        entries.insert(
            EntryKey::GLOBAL,
            PurgeEntry::new(PurgeScope::AllPorts, None)?,
        );
        Ok(PurgeRegistry {
            log,
            entries,
            cursor: EntryKey::GLOBAL,
            flush_expired: false,
            next_seq: 1,
            callbacks: CallbackList::new(),
            stats: PurgeStats::default(),
        })
    }

    /// Look up the entry for `scope` and `glort`, creating it if needed.  A
    /// port entry left behind by a removed port is revived if the port has
    /// come back with the same glort, since the caller has just confirmed
    /// that it exists again.  Returns true if the entry was created.
    pub(crate) fn entry_for(
        &mut self,
        scope: PurgeScope,
        glort: Option<Glort>,
    ) -> PurgeResult<bool> {
        let key = EntryKey::new(scope, glort);
        if let Some(entry) = self.entries.get_mut(&key) {
            if !entry.port_exists() {
                debug!(self.log, "reviving purge entry";
                    "scope" => %scope, "glort" => ?glort);
                entry.revive();
            }
            return Ok(false);
        }

        let entry = PurgeEntry::new(scope, key.glort)?;
        self.retire_stale(&key);
        self.entries.insert(key, entry);
        self.stats.entries_allocated += 1;
        trace!(self.log, "allocated purge entry";
            "scope" => %scope, "glort" => ?glort);
        Ok(true)
    }

    // Any other live entry for the same port belongs to an earlier
    // incarnation of the port, under a different glort.
    fn retire_stale(&mut self, key: &EntryKey) {
        if key.scope == PurgeScope::AllPorts {
            return;
        }
        let mut stale = Vec::new();
        for (k, entry) in self.entries.iter_mut() {
            if k.scope == key.scope && k != key && entry.port_exists() {
                entry.mark_port_gone();
                stale.push(*k);
            }
        }
        for k in &stale {
            debug!(self.log, "retiring purge entry for old glort";
                "scope" => %k.scope, "glort" => ?k.glort);
            self.reclaim(k);
        }
    }

    /// Free the entry under `key` if it is a removed port with nothing left
    /// to dispatch.
    pub(crate) fn reclaim(&mut self, key: &EntryKey) -> bool {
        let reclaimable =
            self.entries.get(key).is_some_and(|e| e.is_reclaimable());
        if reclaimable {
            self.entries.remove(key);
            self.stats.entries_freed += 1;
            debug!(self.log, "reclaimed purge entry";
                "scope" => %key.scope, "glort" => ?key.glort);
        }
        reclaimable
    }

    /// Free every reclaimable entry.
    pub(crate) fn reclaim_all(&mut self) -> usize {
        let dead: Vec<EntryKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_reclaimable())
            .map(|(k, _)| *k)
            .collect();
        dead.iter().filter(|k| self.reclaim(k)).count()
    }

    /// Record a completion callback for a request of the given port and
    /// VID1, to be satisfied by the next purge dispatched.
    pub(crate) fn register_callback(
        &mut self,
        handler: &PurgeHandler,
        port: Option<PortId>,
        vlan1: Option<VlanId>,
    ) {
        let seq = self.next_seq;
        match self.callbacks.register(handler, port, vlan1, seq) {
            Registration::Added => self.stats.callbacks.registered += 1,
            Registration::Refreshed => self.stats.callbacks.refreshed += 1,
        }
        trace!(self.log, "registered purge callback";
            "context" => handler.context(),
            "port" => ?port,
            "vlan1" => ?vlan1,
            "seq" => seq);
    }

    /// Note that a port has been destroyed.  Its entry stays behind until
    /// every obligation queued against it has been dispatched.
    pub fn port_removed(&mut self, port: PortId) -> bool {
        let scope = PurgeScope::Port(port);
        let keys: Vec<EntryKey> = self
            .entries
            .keys()
            .filter(|k| k.scope == scope)
            .copied()
            .collect();
        for key in &keys {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.mark_port_gone();
            }
            self.reclaim(key);
        }
        !keys.is_empty()
    }

    /// Cancel every pending obligation and detach every pending callback.
    /// The detached callbacks are returned without being invoked.
    pub fn shutdown(&mut self) -> Vec<CallbackRecord> {
        for entry in self.entries.values_mut() {
            let tally = entry.clear();
            self.stats.cancelled.merge(&tally);
        }
        let ports = self.entries.len() - 1;
        self.entries.retain(|key, _| *key == EntryKey::GLOBAL);
        self.stats.entries_freed += ports as u64;
        self.cursor = EntryKey::GLOBAL;
        self.flush_expired = false;

        let detached = self.callbacks.detach_all();
        self.stats.callbacks.cancelled += detached.len() as u64;
        self.next_seq = 1;
        debug!(self.log, "purge registry shut down";
            "ports" => ports,
            "callbacks" => detached.len());
        detached
    }

    /// The number of distinct obligations waiting to be dispatched, not
    /// counting a pending expired-address flush.
    pub fn pending_obligations(&self) -> usize {
        self.entries.values().map(|e| e.obligations()).sum()
    }

    pub fn stats(&self) -> PurgeStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn dump(&self) -> RegistryDump {
        RegistryDump {
            cursor: self.cursor.scope,
            flush_expired: self.flush_expired,
            next_seq: self.next_seq,
            callbacks: self.callbacks.len(),
            entries: self.entries.values().map(|e| e.dump()).collect(),
        }
    }

    /// Check each entry's internal consistency.  Only performed in debug
    /// builds.
    pub(crate) fn verify(&self) {
        if !cfg!(debug_assertions) {
            return;
        }
        for entry in self.entries.values() {
            if let Err(msg) = entry.check() {
                error!(self.log, "purge entry is inconsistent";
                    "scope" => %entry.scope(), "error" => %msg);
                debug_assert!(false, "{}: {msg}", entry.scope());
            }
        }
        if !self.entries.contains_key(&EntryKey::GLOBAL) {
            error!(self.log, "global purge entry is missing");
            debug_assert!(false, "global purge entry is missing");
        }
    }

    pub(crate) fn note_invalid(&mut self, err: &PurgeError) {
        self.stats.invalid_requests += 1;
        debug!(self.log, "rejected purge request"; "error" => %err);
    }
}
