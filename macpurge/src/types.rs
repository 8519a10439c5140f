// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! General types used throughout the purge coordinator.

use std::convert;
use std::fmt;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use aal::AsicError;
use aal::PurgeTarget;
use common::network::{RemoteId, VlanError, VlanId};
use common::ports::PortId;

pub type PurgeResult<T> = Result<T, PurgeError>;

#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    #[error("Port \"{0}\" does not exist")]
    InvalidPort(PortId),
    #[error("Out of memory: {0}")]
    NoMemory(String),
    #[error("Invalid argument: {0}")]
    InvalidArg(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("ASIC error: {0}")]
    Asic(AsicError),
}

impl PurgeError {
    /// Errors that indicate a bug in the caller, rather than a condition
    /// that may clear up if the request is retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, PurgeError::InvalidPort(_) | PurgeError::InvalidArg(_))
    }
}

impl convert::From<AsicError> for PurgeError {
    fn from(err: AsicError) -> Self {
        PurgeError::Asic(err)
    }
}

impl convert::From<VlanError> for PurgeError {
    fn from(err: VlanError) -> Self {
        PurgeError::InvalidArg(err.to_string())
    }
}

/// The set of ports a purge request applies to.
///
/// The derived ordering places `AllPorts` ahead of every port, which is the
/// order in which the registry keeps its entries.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PurgeScope {
    AllPorts,
    Port(PortId),
}

impl PurgeScope {
    pub fn port(&self) -> Option<PortId> {
        match self {
            PurgeScope::AllPorts => None,
            PurgeScope::Port(p) => Some(*p),
        }
    }
}

impl fmt::Display for PurgeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurgeScope::AllPorts => write!(f, "all_ports"),
            PurgeScope::Port(p) => write!(f, "{p}"),
        }
    }
}

/// Which address table entries within a scope a purge request covers.
///
/// Coarser shapes dominate finer ones: `AllVlans` covers everything,
/// `Vid1` covers both pair shapes with the same VID1, `Vid2` covers
/// `Vid1Vid2` with the same VID2, and `RemoteId` covers `Vid1RemoteId` with
/// the same remote ID.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PurgeShape {
    AllVlans,
    Vid1(VlanId),
    Vid2(VlanId),
    RemoteId(RemoteId),
    Vid1Vid2(VlanId, VlanId),
    Vid1RemoteId(VlanId, RemoteId),
}

impl PurgeShape {
    /// Build a shape from the optional fields of a raw request.  Only the
    /// six combinations named by the variants are legal.
    pub fn from_fields(
        vid1: Option<u16>,
        vid2: Option<u16>,
        remote_id: Option<u16>,
    ) -> PurgeResult<PurgeShape> {
        let vid1 = vid1.map(VlanId::new).transpose()?;
        let vid2 = vid2.map(VlanId::new).transpose()?;
        let remote_id = remote_id.map(RemoteId::new).transpose()?;
        match (vid1, vid2, remote_id) {
            (None, None, None) => Ok(PurgeShape::AllVlans),
            (Some(v1), None, None) => Ok(PurgeShape::Vid1(v1)),
            (None, Some(v2), None) => Ok(PurgeShape::Vid2(v2)),
            (None, None, Some(r)) => Ok(PurgeShape::RemoteId(r)),
            (Some(v1), Some(v2), None) => Ok(PurgeShape::Vid1Vid2(v1, v2)),
            (Some(v1), None, Some(r)) => Ok(PurgeShape::Vid1RemoteId(v1, r)),
            (_, Some(_), Some(_)) => Err(PurgeError::InvalidArg(
                "vid2 and remote_id may not be combined".into(),
            )),
        }
    }

    /// The VID1 a request of this shape is restricted to, if any.
    pub fn vid1(&self) -> Option<VlanId> {
        match self {
            PurgeShape::Vid1(v)
            | PurgeShape::Vid1Vid2(v, _)
            | PurgeShape::Vid1RemoteId(v, _) => Some(*v),
            _ => None,
        }
    }

    pub fn vid2(&self) -> Option<VlanId> {
        match self {
            PurgeShape::Vid2(v) | PurgeShape::Vid1Vid2(_, v) => Some(*v),
            _ => None,
        }
    }

    pub fn remote_id(&self) -> Option<RemoteId> {
        match self {
            PurgeShape::RemoteId(r) | PurgeShape::Vid1RemoteId(_, r) => {
                Some(*r)
            }
            _ => None,
        }
    }

    /// Every shape that strictly dominates this one within a single scope.
    pub fn coarser(&self) -> Vec<PurgeShape> {
        match *self {
            PurgeShape::AllVlans => vec![],
            PurgeShape::Vid1(_)
            | PurgeShape::Vid2(_)
            | PurgeShape::RemoteId(_) => vec![PurgeShape::AllVlans],
            PurgeShape::Vid1Vid2(v1, v2) => vec![
                PurgeShape::AllVlans,
                PurgeShape::Vid1(v1),
                PurgeShape::Vid2(v2),
            ],
            PurgeShape::Vid1RemoteId(v1, r) => vec![
                PurgeShape::AllVlans,
                PurgeShape::Vid1(v1),
                PurgeShape::RemoteId(r),
            ],
        }
    }
}

impl fmt::Display for PurgeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurgeShape::AllVlans => write!(f, "all_vlans"),
            PurgeShape::Vid1(v) => write!(f, "vid1({v})"),
            PurgeShape::Vid2(v) => write!(f, "vid2({v})"),
            PurgeShape::RemoteId(r) => write!(f, "remote_id({r})"),
            PurgeShape::Vid1Vid2(v1, v2) => write!(f, "vid1_vid2({v1},{v2})"),
            PurgeShape::Vid1RemoteId(v1, r) => {
                write!(f, "vid1_remote_id({v1},{r})")
            }
        }
    }
}

/// The flush modes offered to callers.  Each one, other than `Expired`, is a
/// particular combination of scope and shape.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FlushMode {
    /// Every dynamic entry on the switch
    AllDynamic,
    /// Every dynamic entry on one port
    Port { port: PortId },
    /// Every dynamic entry in a VLAN
    Vlan { vid1: VlanId },
    /// Entries in a VLAN, on one port
    PortVlan { port: PortId, vid1: VlanId },
    Vid1Vid2 { vid1: VlanId, vid2: VlanId },
    PortVid1Vid2 { port: PortId, vid1: VlanId, vid2: VlanId },
    /// Entries with the given inner tag, regardless of outer tag
    Vid2 { vid2: VlanId },
    PortVid2 { port: PortId, vid2: VlanId },
    RemoteId { remote_id: RemoteId },
    PortRemoteId { port: PortId, remote_id: RemoteId },
    Vid1RemoteId { vid1: VlanId, remote_id: RemoteId },
    PortVid1RemoteId {
        port: PortId,
        vid1: VlanId,
        remote_id: RemoteId,
    },
    /// Entries whose age has expired
    Expired,
}

impl FlushMode {
    /// Split a flush mode into the scope and shape the coordinator works
    /// with.  Returns `None` for `Expired`, which is tracked separately.
    pub fn split(&self) -> Option<(PurgeScope, PurgeShape)> {
        use PurgeScope::{AllPorts, Port};
        let split = match *self {
            FlushMode::AllDynamic => (AllPorts, PurgeShape::AllVlans),
            FlushMode::Port { port } => (Port(port), PurgeShape::AllVlans),
            FlushMode::Vlan { vid1 } => (AllPorts, PurgeShape::Vid1(vid1)),
            FlushMode::PortVlan { port, vid1 } => {
                (Port(port), PurgeShape::Vid1(vid1))
            }
            FlushMode::Vid1Vid2 { vid1, vid2 } => {
                (AllPorts, PurgeShape::Vid1Vid2(vid1, vid2))
            }
            FlushMode::PortVid1Vid2 { port, vid1, vid2 } => {
                (Port(port), PurgeShape::Vid1Vid2(vid1, vid2))
            }
            FlushMode::Vid2 { vid2 } => (AllPorts, PurgeShape::Vid2(vid2)),
            FlushMode::PortVid2 { port, vid2 } => {
                (Port(port), PurgeShape::Vid2(vid2))
            }
            FlushMode::RemoteId { remote_id } => {
                (AllPorts, PurgeShape::RemoteId(remote_id))
            }
            FlushMode::PortRemoteId { port, remote_id } => {
                (Port(port), PurgeShape::RemoteId(remote_id))
            }
            FlushMode::Vid1RemoteId { vid1, remote_id } => {
                (AllPorts, PurgeShape::Vid1RemoteId(vid1, remote_id))
            }
            FlushMode::PortVid1RemoteId {
                port,
                vid1,
                remote_id,
            } => (Port(port), PurgeShape::Vid1RemoteId(vid1, remote_id)),
            FlushMode::Expired => return None,
        };
        Some(split)
    }
}

/// A single purge handed to the hardware, stamped with the sequence number
/// used to decide which completion callbacks it satisfies.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
pub struct PurgeRequest {
    pub seq: u64,
    pub target: PurgeTarget,
}

impl PurgeRequest {
    /// The port this purge is limited to, or `None` if it covers every port.
    pub fn port(&self) -> Option<PortId> {
        match &self.target {
            PurgeTarget::Match(m) => m.port,
            PurgeTarget::Expired => None,
        }
    }

    /// The VID1 this purge is limited to, or `None` if it covers every VID1.
    pub fn vid1(&self) -> Option<VlanId> {
        match &self.target {
            PurgeTarget::Match(m) => m.vid1,
            PurgeTarget::Expired => None,
        }
    }
}

impl fmt::Display for PurgeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.seq, self.target)
    }
}
