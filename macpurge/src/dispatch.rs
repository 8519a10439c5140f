// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Handing pending obligations to the hardware, one at a time, and
//! completing them once the hardware is done.

use std::ops::Bound;

use slog::{debug, trace};

use crate::callback::CallbackRecord;
use crate::registry::EntryKey;
use crate::registry::PurgeRegistry;
use crate::types::PurgeRequest;
use aal::{PurgeMatch, PurgeTarget};

impl PurgeRegistry {
    /// Remove and return the next obligation to dispatch, or `None` if
    /// nothing is pending.
    ///
    /// Entries are visited round-robin starting at the cursor, which then
    /// moves past the entry that produced the request.  An expired-address
    /// flush is only produced once every entry is empty.
    pub fn next_request(&mut self) -> Option<PurgeRequest> {
        let cursor = self.cursor;
        let key = self
            .entries
            .range(cursor..)
            .chain(self.entries.range(..cursor))
            .find(|(_, e)| !e.is_empty())
            .map(|(k, _)| *k);

        let target = match key {
            Some(key) => {
                let entry = self.entries.get_mut(&key)?;
                let shape = entry.take_next()?;
                let target = PurgeTarget::Match(PurgeMatch {
                    port: key.scope.port(),
                    glort: entry.glort(),
                    vid1: shape.vid1(),
                    vid2: shape.vid2(),
                    remote_id: shape.remote_id(),
                });
                self.stats.dispatched.bump(&shape);
                self.reclaim(&key);
                self.cursor = self.successor(&key);
                target
            }
            None if self.flush_expired => {
                self.flush_expired = false;
                self.stats.dispatched_expired += 1;
                PurgeTarget::Expired
            }
            None => return None,
        };

        let req = PurgeRequest {
            seq: self.next_seq,
            target,
        };
        self.next_seq += 1;
        debug!(self.log, "dispatching purge"; "request" => %req);
        Some(req)
    }

    // The key following `key` in scan order, wrapping to the global entry.
    fn successor(&self, key: &EntryKey) -> EntryKey {
        self.entries
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| *k)
            .unwrap_or(EntryKey::GLOBAL)
    }

    /// Record that the hardware has finished `req`.  The callbacks it
    /// satisfies are detached and returned for the caller to fire once the
    /// registry is no longer locked.
    pub fn complete(&mut self, req: &PurgeRequest) -> Vec<CallbackRecord> {
        let fired = self.callbacks.take_satisfied(req);
        self.stats.callbacks.fired += fired.len() as u64;
        if self.callbacks.is_empty() {
            // No outstanding callback depends on the old sequence numbers
            self.next_seq = 1;
        }
        trace!(self.log, "purge complete";
            "request" => %req,
            "callbacks" => fired.len());
        fired
    }

    pub(crate) fn note_dispatch_failure(&mut self) {
        self.stats.dispatch_failures += 1;
    }
}
