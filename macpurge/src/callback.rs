// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Completion callbacks.
//!
//! A caller that wants to know when its purge has taken effect supplies a
//! handler along with the request.  The handler is recorded against the
//! request's port and VID1, stamped with the sequence number the next
//! dispatched purge will carry.  It fires once a purge with at least that
//! sequence number completes and covers the recorded port and VID1.

use std::fmt;
use std::sync::Arc;

use crate::types::PurgeRequest;
use common::network::VlanId;
use common::ports::PortId;

/// The argument passed to a completion handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallbackEvent {
    /// The opaque value supplied with the handler
    pub context: u64,
    pub port: Option<PortId>,
    pub vlan1: Option<VlanId>,
}

pub type CallbackFn = dyn Fn(&CallbackEvent) + Send + Sync;

/// A completion handler and its opaque context.  Two handlers are the same
/// if they share both the function object and the context.
#[derive(Clone)]
pub struct PurgeHandler {
    callback: Arc<CallbackFn>,
    context: u64,
}

impl PurgeHandler {
    pub fn new(callback: Arc<CallbackFn>, context: u64) -> Self {
        PurgeHandler { callback, context }
    }

    /// Wrap a closure in a new handler.  Every call yields a distinct
    /// function object, so handlers meant to coalesce with one another
    /// should be cloned from a single `PurgeHandler` instead.
    pub fn from_fn<F>(f: F, context: u64) -> Self
    where
        F: Fn(&CallbackEvent) + Send + Sync + 'static,
    {
        PurgeHandler::new(Arc::new(f), context)
    }

    pub fn context(&self) -> u64 {
        self.context
    }

    pub fn invoke(&self, port: Option<PortId>, vlan1: Option<VlanId>) {
        (self.callback)(&CallbackEvent {
            context: self.context,
            port,
            vlan1,
        })
    }
}

impl PartialEq for PurgeHandler {
    fn eq(&self, other: &Self) -> bool {
        // Compare the data pointers only; vtable pointers for the same type
        // may differ across codegen units.
        std::ptr::eq(
            Arc::as_ptr(&self.callback) as *const (),
            Arc::as_ptr(&other.callback) as *const (),
        ) && self.context == other.context
    }
}

impl Eq for PurgeHandler {}

impl fmt::Debug for PurgeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PurgeHandler")
            .field("callback", &Arc::as_ptr(&self.callback))
            .field("context", &self.context)
            .finish()
    }
}

/// A handler waiting for its purge to complete.
#[derive(Clone, Debug)]
pub struct CallbackRecord {
    pub handler: PurgeHandler,
    pub port: Option<PortId>,
    pub vlan1: Option<VlanId>,
    /// The lowest sequence number whose completion satisfies this record
    pub seq: u64,
}

impl CallbackRecord {
    /// Report whether completing `req` satisfies this record.
    pub fn satisfied_by(&self, req: &PurgeRequest) -> bool {
        req.seq >= self.seq
            && req.vid1().is_none_or(|v| Some(v) == self.vlan1)
            && req.port().is_none_or(|p| Some(p) == self.port)
    }

    pub fn fire(&self) {
        self.handler.invoke(self.port, self.vlan1);
    }
}

/// The outcome of registering a handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// A new record was added
    Added,
    /// A record with the same handler, port, and VID1 was already waiting;
    /// its sequence number was moved forward
    Refreshed,
}

/// Pending completion callbacks, in registration order.
#[derive(Debug, Default)]
pub struct CallbackList {
    records: Vec<CallbackRecord>,
}

impl CallbackList {
    pub fn new() -> Self {
        CallbackList::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CallbackRecord] {
        &self.records
    }

    /// Record `handler` for a purge of (`port`, `vlan1`) that will be
    /// stamped no earlier than `seq`.  A matching record already waiting is
    /// re-stamped rather than duplicated, since a purge dispatched before
    /// this registration may have raced the newly learned addresses.
    pub fn register(
        &mut self,
        handler: &PurgeHandler,
        port: Option<PortId>,
        vlan1: Option<VlanId>,
        seq: u64,
    ) -> Registration {
        let existing = self.records.iter_mut().find(|r| {
            r.handler == *handler && r.port == port && r.vlan1 == vlan1
        });
        match existing {
            Some(rec) => {
                rec.seq = seq;
                Registration::Refreshed
            }
            None => {
                self.records.push(CallbackRecord {
                    handler: handler.clone(),
                    port,
                    vlan1,
                    seq,
                });
                Registration::Added
            }
        }
    }

    /// Remove and return every record satisfied by `req`, preserving
    /// registration order.  The caller is responsible for firing them.
    pub fn take_satisfied(
        &mut self,
        req: &PurgeRequest,
    ) -> Vec<CallbackRecord> {
        let mut fired = Vec::new();
        let mut idx = 0;
        while idx < self.records.len() {
            if self.records[idx].satisfied_by(req) {
                fired.push(self.records.remove(idx));
            } else {
                idx += 1;
            }
        }
        fired
    }

    /// Remove every record without firing it.
    pub fn detach_all(&mut self) -> Vec<CallbackRecord> {
        std::mem::take(&mut self.records)
    }
}
