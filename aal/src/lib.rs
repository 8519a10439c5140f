// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fmt;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use common::network::{RemoteId, VlanId};
use common::ports::{Glort, PortId};

/// A specialized Result type for ASIC operations
pub type AsicResult<T> = Result<T, AsicError>;

/// Error type conveying additional information about ASIC errors
#[derive(Error, Debug)]
pub enum AsicError {
    /// An argument passed to the ASIC layer is invalid or inappropriate.  This
    /// indicates misbehavior from the caller.
    #[error("Invalid argument: {}", .0)]
    InvalidArg(String),
    /// An error derived from a purposely triggered synthetic fault for testing
    /// purposes.
    #[error("Synthetic ASIC error: {}", .0)]
    Synthetic(String),
    /// A general indication that a caller is trying to modify something that
    /// is not present.
    #[error("Missing: {}", .0)]
    Missing(String),
}

/// The set of address table fields a single hardware purge must match.  A
/// `None` field matches every value.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
pub struct PurgeMatch {
    pub port: Option<PortId>,
    /// Snapshot of the port's glort, taken when the port first had a purge
    /// queued against it.  The port may since have been destroyed.
    pub glort: Option<Glort>,
    pub vid1: Option<VlanId>,
    pub vid2: Option<VlanId>,
    pub remote_id: Option<RemoteId>,
}

impl PurgeMatch {
    /// A match covering every dynamic entry on the switch.
    pub const ALL: PurgeMatch = PurgeMatch {
        port: None,
        glort: None,
        vid1: None,
        vid2: None,
        remote_id: None,
    };
}

/// One unit of work for the hardware purge engine.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
pub enum PurgeTarget {
    /// Invalidate the learned entries matching these fields.
    Match(PurgeMatch),
    /// Invalidate every entry whose age has expired.
    Expired,
}

impl fmt::Display for PurgeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn any<T: fmt::Display>(v: &Option<T>) -> String {
            match v {
                Some(v) => v.to_string(),
                None => "*".to_string(),
            }
        }

        match self {
            PurgeTarget::Expired => write!(f, "expired"),
            PurgeTarget::Match(m) => write!(
                f,
                "port={} vid1={} vid2={} remote_id={}",
                any(&m.port),
                any(&m.vid1),
                any(&m.vid2),
                any(&m.remote_id)
            ),
        }
    }
}

/// The `AsicOps` trait contains the ASIC operations the address table purge
/// machinery requires.  Implementations must tolerate being called from
/// several threads at once.
pub trait AsicOps {
    /// Report whether a logical port currently exists.  If it does, the
    /// port's glort is returned.
    fn port_lookup(&self, port: PortId) -> AsicResult<Option<Glort>>;

    /// Signal the purge engine that new work may be waiting.  This is
    /// fire-and-forget: it must not block, and it must not call back into
    /// the purge coordinator.
    fn purge_kick(&self);

    /// Program the hardware to carry out a single purge, returning once the
    /// hardware has reported that it is complete.
    fn purge_execute(&self, target: &PurgeTarget) -> AsicResult<()>;
}
