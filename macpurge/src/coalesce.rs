// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Admission of new purge requests.
//!
//! Every request is classified against what is already pending:
//!
//! | pending state                                   | outcome    |
//! |-------------------------------------------------|------------|
//! | target entry holds the same shape               | duplicate  |
//! | target entry holds a coarser shape              | suppressed |
//! | port request, global entry holds same/coarser   | suppressed |
//! | anything else                                   | enqueued   |
//!
//! An enqueued request cancels whatever it dominates.  A global request
//! sweeps every port entry, where an obligation of the same shape is also
//! dominated; a port request only sweeps its own entry.

use schemars::JsonSchema;
use serde::Serialize;
use slog::debug;

use crate::callback::PurgeHandler;
use crate::entry::PurgeEntry;
use crate::registry::EntryKey;
use crate::registry::PurgeRegistry;
use crate::stats::ShapeTally;
use crate::types::PurgeError;
use crate::types::PurgeResult;
use crate::types::PurgeScope;
use crate::types::PurgeShape;
use common::ports::Glort;

/// What became of a request that passed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// The same obligation was already pending
    Duplicate,
    /// A pending obligation already covers this one
    Suppressed,
    /// The obligation was added, possibly cancelling finer ones
    Enqueued,
}

impl PurgeRegistry {
    /// Add a purge request to the registry.  `glort` is the current glort of
    /// the request's port, for port-scoped requests.  If a handler is
    /// supplied it is registered whatever the admission outcome.
    pub fn enqueue(
        &mut self,
        scope: PurgeScope,
        glort: Option<Glort>,
        shape: PurgeShape,
        handler: Option<&PurgeHandler>,
    ) -> PurgeResult<Admission> {
        let admission = self.admit(scope, glort, &shape)?;

        let counters = self.stats.scope_mut(&scope);
        counters.requests.bump(&shape);
        match admission {
            Admission::Duplicate => counters.duplicates.bump(&shape),
            Admission::Suppressed => counters.suppressed.bump(&shape),
            Admission::Enqueued => counters.enqueued.bump(&shape),
        }
        debug!(self.log, "purge request admitted";
            "scope" => %scope,
            "shape" => %shape,
            "outcome" => ?admission);

        if let Some(handler) = handler {
            self.register_callback(handler, scope.port(), shape.vid1());
        }
        self.verify();
        Ok(admission)
    }

    /// Ask for a flush of every aged-out address once all other pending
    /// obligations have been dispatched.
    pub fn request_expired(&mut self, handler: Option<&PurgeHandler>) {
        self.stats.expired_requests += 1;
        self.flush_expired = true;
        if let Some(handler) = handler {
            self.register_callback(handler, None, None);
        }
    }

    fn target_mut(&mut self, key: &EntryKey) -> PurgeResult<&mut PurgeEntry> {
        self.entries.get_mut(key).ok_or_else(|| {
            PurgeError::Internal(format!("no purge entry for {}", key.scope))
        })
    }

    fn classify(
        &self,
        key: &EntryKey,
        shape: &PurgeShape,
    ) -> Option<Admission> {
        if let Some(target) = self.entries.get(key) {
            if target.holds(shape) {
                return Some(Admission::Duplicate);
            }
            if target.dominates(shape) {
                return Some(Admission::Suppressed);
            }
        }
        if *key != EntryKey::GLOBAL {
            let global = self.entries.get(&EntryKey::GLOBAL)?;
            if global.holds(shape) || global.dominates(shape) {
                return Some(Admission::Suppressed);
            }
        }
        None
    }

    fn admit(
        &mut self,
        scope: PurgeScope,
        glort: Option<Glort>,
        shape: &PurgeShape,
    ) -> PurgeResult<Admission> {
        let key = EntryKey::new(scope, glort);
        if let Some(outcome) = self.classify(&key, shape) {
            // Keep a dead entry's port state current even when there is
            // nothing to add to it.
            if self.entries.contains_key(&key) {
                self.entry_for(scope, glort)?;
            }
            return Ok(outcome);
        }

        // Allocate everything the insert needs before cancelling anything,
        // so that a failed allocation leaves the pending set untouched.
        // Once the reserve has succeeded, the insert only fails if the
        // entry is internally inconsistent.
        let created = self.entry_for(scope, glort)?;
        let reserved = self.target_mut(&key)?.reserve(shape);
        if let Err(e) = reserved {
            self.unwind_admit(&key, shape, created);
            return Err(e);
        }

        let mut cancelled = ShapeTally::default();
        if key == EntryKey::GLOBAL {
            for (k, entry) in self.entries.iter_mut() {
                cancelled.merge(&entry.cancel_dominated(shape, *k != key));
            }
        } else if let Some(target) = self.entries.get_mut(&key) {
            cancelled.merge(&target.cancel_dominated(shape, false));
        }

        let inserted = self.target_mut(&key)?.insert(shape);
        if let Err(e) = inserted {
            self.unwind_admit(&key, shape, created);
            return Err(e);
        }

        if cancelled.total() > 0 {
            debug!(self.log, "cancelled dominated purges";
                "scope" => %scope,
                "shape" => %shape,
                "count" => cancelled.total());
            self.stats.cancelled.merge(&cancelled);
        }

        // A global request may have emptied entries for removed ports.
        self.reclaim_all();
        Ok(Admission::Enqueued)
    }

    // Drop a subtree node reserved for a request that did not land, along
    // with the entry itself if the request created it.
    fn unwind_admit(
        &mut self,
        key: &EntryKey,
        shape: &PurgeShape,
        created: bool,
    ) {
        if let Some(target) = self.entries.get_mut(key) {
            target.release_node(shape);
        }
        if created {
            self.entries.remove(key);
            self.stats.entries_allocated -= 1;
        }
        debug!(self.log, "purge request rolled back";
            "scope" => %key.scope,
            "shape" => %shape);
    }
}
