// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::convert::TryFrom;
use std::fmt;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Number of distinct VLAN IDs the switch can track.  Both the VID1 and the
/// VID2 tag spaces are this large.
pub const VLAN_COUNT: usize = 4096;

/// Number of distinct remote IDs the switch can track.
pub const REMOTE_ID_COUNT: usize = 4096;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VlanError {
    /// Not a valid VLAN ID
    #[error("Invalid VLAN tag: {}", .0)]
    InvalidVlan(u16),
    /// Not a valid remote ID
    #[error("Invalid remote ID: {}", .0)]
    InvalidRemoteId(u16),
}

/// A VLAN tag.  The same type is used for the outer (VID1) and inner (VID2)
/// tags.
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
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    pub fn new(id: u16) -> Result<Self, VlanError> {
        if usize::from(id) >= VLAN_COUNT {
            Err(VlanError::InvalidVlan(id))
        } else {
            Ok(VlanId(id))
        }
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = VlanError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(v: VlanId) -> u16 {
        v.0
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An identifier used by tunnel and overlay flushes, orthogonal to VID2.
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
#[serde(try_from = "u16", into = "u16")]
pub struct RemoteId(u16);

impl RemoteId {
    pub fn new(id: u16) -> Result<Self, VlanError> {
        if usize::from(id) >= REMOTE_ID_COUNT {
            Err(VlanError::InvalidRemoteId(id))
        } else {
            Ok(RemoteId(id))
        }
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl TryFrom<u16> for RemoteId {
    type Error = VlanError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        RemoteId::new(id)
    }
}

impl From<RemoteId> for u16 {
    fn from(r: RemoteId) -> u16 {
        r.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
