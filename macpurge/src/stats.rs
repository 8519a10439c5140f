// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Diagnostic counters maintained by the purge registry.  Nothing in the
//! coordinator's behavior depends on these values.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::types::PurgeScope;
use crate::types::PurgeShape;

/// One counter per request shape.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct ShapeTally {
    pub all_vlans: u64,
    pub vid1: u64,
    pub vid2: u64,
    pub remote_id: u64,
    pub vid1_vid2: u64,
    pub vid1_remote_id: u64,
}

impl ShapeTally {
    pub fn bump(&mut self, shape: &PurgeShape) {
        self.add(shape, 1);
    }

    pub fn add(&mut self, shape: &PurgeShape, n: u64) {
        let counter = match shape {
            PurgeShape::AllVlans => &mut self.all_vlans,
            PurgeShape::Vid1(_) => &mut self.vid1,
            PurgeShape::Vid2(_) => &mut self.vid2,
            PurgeShape::RemoteId(_) => &mut self.remote_id,
            PurgeShape::Vid1Vid2(..) => &mut self.vid1_vid2,
            PurgeShape::Vid1RemoteId(..) => &mut self.vid1_remote_id,
        };
        *counter += n;
    }

    pub fn merge(&mut self, other: &ShapeTally) {
        self.all_vlans += other.all_vlans;
        self.vid1 += other.vid1;
        self.vid2 += other.vid2;
        self.remote_id += other.remote_id;
        self.vid1_vid2 += other.vid1_vid2;
        self.vid1_remote_id += other.vid1_remote_id;
    }

    pub fn total(&self) -> u64 {
        self.all_vlans
            + self.vid1
            + self.vid2
            + self.remote_id
            + self.vid1_vid2
            + self.vid1_remote_id
    }
}

/// Admission outcomes for requests of a single scope.  Every request that
/// passes validation lands in exactly one of `duplicates`, `suppressed`, or
/// `enqueued`.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct RequestStats {
    pub requests: ShapeTally,
    pub duplicates: ShapeTally,
    pub suppressed: ShapeTally,
    pub enqueued: ShapeTally,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct CallbackStats {
    /// New completion callbacks recorded
    pub registered: u64,
    /// Registrations matching an already pending callback
    pub refreshed: u64,
    pub fired: u64,
    /// Callbacks dropped without firing at teardown
    pub cancelled: u64,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct PurgeStats {
    /// Requests scoped to every port
    pub global: RequestStats,
    /// Requests scoped to a single port
    pub port: RequestStats,
    /// Requests rejected before reaching the registry
    pub invalid_requests: u64,
    pub expired_requests: u64,
    /// Pending obligations removed because a coarser request arrived
    pub cancelled: ShapeTally,
    /// Obligations handed to the hardware
    pub dispatched: ShapeTally,
    pub dispatched_expired: u64,
    pub dispatch_failures: u64,
    pub entries_allocated: u64,
    pub entries_freed: u64,
    pub callbacks: CallbackStats,
}

impl PurgeStats {
    pub fn scope_mut(&mut self, scope: &PurgeScope) -> &mut RequestStats {
        match scope {
            PurgeScope::AllPorts => &mut self.global,
            PurgeScope::Port(_) => &mut self.port,
        }
    }

    pub fn reset(&mut self) {
        *self = PurgeStats::default();
    }
}
