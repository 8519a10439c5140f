// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The pending purge obligations for a single scope.
//!
//! An entry holds four kinds of state:
//!
//! - `all_pending`: purge everything in the scope.
//! - `pending_vlan1`: one bit per VID1.  A set bit either means "purge this
//!   VID1" (when neither subtree has a node for it) or acts as an index
//!   saying that at least one finer (VID1, VID2) or (VID1, remote ID)
//!   obligation exists under that VID1.
//! - `vid2_by_vid1`: VID1 -> bitset of VID2s.  The `VID2_ONLY` node holds
//!   "purge this VID2 regardless of VID1".
//! - `remid_by_vid1`: the same, for remote IDs, with `REMID_ONLY`.
//!
//! Subtree nodes exist only while they have at least one bit set.

use schemars::JsonSchema;
use serde::Serialize;

use crate::bitset::BitSet;
use crate::stats::ShapeTally;
use crate::tree::KeyedTree;
use crate::tree::TreeError;
use crate::types::PurgeResult;
use crate::types::PurgeScope;
use crate::types::PurgeShape;
use common::network::{RemoteId, VlanId, REMOTE_ID_COUNT, VLAN_COUNT};
use common::ports::Glort;

/// Subtree key holding VID2-only obligations.  Outside the VID1 range.
pub const VID2_ONLY: u16 = VLAN_COUNT as u16;
/// Subtree key holding remote-ID-only obligations.  Outside the VID1 range.
pub const REMID_ONLY: u16 = VLAN_COUNT as u16 + 1;

pub type SubTree = KeyedTree<BitSet>;

/// Selects one of an entry's two subtrees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubKind {
    Vid2,
    RemoteId,
}

impl SubKind {
    fn sentinel(self) -> u16 {
        match self {
            SubKind::Vid2 => VID2_ONLY,
            SubKind::RemoteId => REMID_ONLY,
        }
    }

    fn capacity(self) -> usize {
        match self {
            SubKind::Vid2 => VLAN_COUNT,
            SubKind::RemoteId => REMOTE_ID_COUNT,
        }
    }

    // The shape a single bit in this subtree represents
    fn shape(self, key: u16, bit: usize) -> Option<PurgeShape> {
        let bit = u16::try_from(bit).ok()?;
        let vid1 = || VlanId::new(key).ok();
        let shape = match self {
            SubKind::Vid2 => {
                let vid2 = VlanId::new(bit).ok()?;
                if key == VID2_ONLY {
                    PurgeShape::Vid2(vid2)
                } else {
                    PurgeShape::Vid1Vid2(vid1()?, vid2)
                }
            }
            SubKind::RemoteId => {
                let remote_id = RemoteId::new(bit).ok()?;
                if key == REMID_ONLY {
                    PurgeShape::RemoteId(remote_id)
                } else {
                    PurgeShape::Vid1RemoteId(vid1()?, remote_id)
                }
            }
        };
        Some(shape)
    }
}

/// A read-only view of one entry, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct EntryDump {
    pub scope: PurgeScope,
    pub glort: Option<Glort>,
    pub port_exists: bool,
    pub pending: Vec<PurgeShape>,
}

#[derive(Debug)]
pub struct PurgeEntry {
    scope: PurgeScope,
    glort: Option<Glort>,
    port_exists: bool,
    all_pending: bool,
    pending_vlan1: BitSet,
    vid2_by_vid1: SubTree,
    remid_by_vid1: SubTree,
}

impl PurgeEntry {
    pub fn new(scope: PurgeScope, glort: Option<Glort>) -> PurgeResult<Self> {
        Ok(PurgeEntry {
            scope,
            glort,
            port_exists: true,
            all_pending: false,
            pending_vlan1: BitSet::new(VLAN_COUNT)?,
            vid2_by_vid1: SubTree::new(),
            remid_by_vid1: SubTree::new(),
        })
    }

    pub fn scope(&self) -> PurgeScope {
        self.scope
    }

    pub fn glort(&self) -> Option<Glort> {
        self.glort
    }

    pub fn port_exists(&self) -> bool {
        self.port_exists
    }

    /// Record that the entry's port has been destroyed.
    pub fn mark_port_gone(&mut self) {
        self.port_exists = false;
    }

    /// Record that the entry's port exists again under the same glort.
    pub fn revive(&mut self) {
        self.port_exists = true;
    }

    pub fn is_empty(&self) -> bool {
        !self.all_pending
            && self.pending_vlan1.is_empty()
            && self.vid2_by_vid1.is_empty()
            && self.remid_by_vid1.is_empty()
    }

    /// A port entry whose port is gone and which has nothing left to purge
    /// may be freed.  The global entry is never freed.
    pub fn is_reclaimable(&self) -> bool {
        matches!(self.scope, PurgeScope::Port(_))
            && !self.port_exists
            && self.is_empty()
    }

    fn tree(&self, kind: SubKind) -> &SubTree {
        match kind {
            SubKind::Vid2 => &self.vid2_by_vid1,
            SubKind::RemoteId => &self.remid_by_vid1,
        }
    }

    fn tree_mut(&mut self, kind: SubKind) -> &mut SubTree {
        match kind {
            SubKind::Vid2 => &mut self.vid2_by_vid1,
            SubKind::RemoteId => &mut self.remid_by_vid1,
        }
    }

    fn has_children(&self, vid1: u16) -> bool {
        self.vid2_by_vid1.contains(vid1) || self.remid_by_vid1.contains(vid1)
    }

    fn vid1_only_pending(&self, vid1: VlanId) -> bool {
        self.pending_vlan1.test(vid1.index())
            && !self.has_children(vid1.as_u16())
    }

    // VID1 bits that stand for a VID1-only obligation rather than indexing
    // finer ones.
    fn vid1_only_count(&self) -> usize {
        self
            .pending_vlan1
            .iter()
            .filter(|idx| {
                u16::try_from(*idx).is_ok_and(|key| !self.has_children(key))
            })
            .count()
    }

    fn bit_pending(&self, kind: SubKind, key: u16, bit: usize) -> bool {
        self.tree(kind).find(key).is_some_and(|b| b.test(bit))
    }

    /// Report whether exactly this obligation is pending in the entry.
    pub fn holds(&self, shape: &PurgeShape) -> bool {
        match *shape {
            PurgeShape::AllVlans => self.all_pending,
            PurgeShape::Vid1(v) => self.vid1_only_pending(v),
            PurgeShape::Vid2(v2) => {
                self.bit_pending(SubKind::Vid2, VID2_ONLY, v2.index())
            }
            PurgeShape::RemoteId(r) => {
                self.bit_pending(SubKind::RemoteId, REMID_ONLY, r.index())
            }
            PurgeShape::Vid1Vid2(v1, v2) => {
                self.bit_pending(SubKind::Vid2, v1.as_u16(), v2.index())
            }
            PurgeShape::Vid1RemoteId(v1, r) => {
                self.bit_pending(SubKind::RemoteId, v1.as_u16(), r.index())
            }
        }
    }

    /// Report whether something pending in this entry strictly dominates
    /// `shape`.
    pub fn dominates(&self, shape: &PurgeShape) -> bool {
        shape.coarser().iter().any(|c| self.holds(c))
    }

    /// Make sure the subtree node an obligation of this shape lives in
    /// exists, so that the later insert cannot fail.  Returns true if a node
    /// was created.  A created node is empty until the insert lands, and
    /// must be released with `release_node()` if it does not.
    pub fn reserve(&mut self, shape: &PurgeShape) -> PurgeResult<bool> {
        let (kind, key) = match shape.subtree_slot() {
            Some(slot) => slot,
            None => return Ok(false),
        };
        self.reserve_key(kind, key)
    }

    /// Drop a node created by `reserve()` if it never received a bit.
    pub fn release_node(&mut self, shape: &PurgeShape) {
        if let Some((kind, key)) = shape.subtree_slot() {
            if self.tree(kind).find(key).is_some_and(|b| b.is_empty()) {
                let _ = self.tree_mut(kind).remove(key);
            }
        }
    }

    /// Add an obligation to the entry.  Returns false if it was already
    /// present.
    pub fn insert(&mut self, shape: &PurgeShape) -> PurgeResult<bool> {
        #[cfg(test)]
        if crate::fault::insert_should_fail() {
            let msg = format!("injected: {shape}");
            return Err(crate::types::PurgeError::Internal(msg));
        }
        match *shape {
            PurgeShape::AllVlans => {
                let added = !self.all_pending;
                self.all_pending = true;
                Ok(added)
            }
            PurgeShape::Vid1(v) => {
                Ok(!self.pending_vlan1.set(v.index(), true)?)
            }
            PurgeShape::Vid2(v2) => {
                self.insert_sub(SubKind::Vid2, VID2_ONLY, v2.index())
            }
            PurgeShape::RemoteId(r) => {
                self.insert_sub(SubKind::RemoteId, REMID_ONLY, r.index())
            }
            PurgeShape::Vid1Vid2(v1, v2) => {
                self.insert_sub(SubKind::Vid2, v1.as_u16(), v2.index())
            }
            PurgeShape::Vid1RemoteId(v1, r) => {
                self.insert_sub(SubKind::RemoteId, v1.as_u16(), r.index())
            }
        }
    }

    // Set a bit in a subtree node, creating the node on first insert.  Real
    // VID1 keys are also indexed in pending_vlan1.
    fn insert_sub(
        &mut self,
        kind: SubKind,
        key: u16,
        bit: usize,
    ) -> PurgeResult<bool> {
        let created = self.reserve_key(kind, key)?;
        let old = match self.tree_mut(kind).find_mut(key) {
            Some(bits) => bits.set(bit, true),
            None => Err(TreeError::NotFound(key).into()),
        };
        let old = match old {
            Ok(old) => old,
            Err(e) => {
                if created {
                    let _ = self.tree_mut(kind).remove(key);
                }
                return Err(e);
            }
        };
        if key != kind.sentinel() {
            self.pending_vlan1.set(usize::from(key), true)?;
        }
        Ok(!old)
    }

    fn reserve_key(&mut self, kind: SubKind, key: u16) -> PurgeResult<bool> {
        if self.tree(kind).contains(key) {
            return Ok(false);
        }
        let bits = BitSet::new(kind.capacity())?;
        self.tree_mut(kind).insert(key, bits)?;
        Ok(true)
    }

    // Clear a bit in a subtree node, destroying the node once it empties
    // and dropping the VID1 index bit once no node remains under it.
    // Returns true if the bit was set.
    fn remove_sub(&mut self, kind: SubKind, key: u16, bit: usize) -> bool {
        let (was_set, now_empty) = match self.tree_mut(kind).find_mut(key) {
            Some(bits) => {
                (bits.set(bit, false).unwrap_or(false), bits.is_empty())
            }
            None => return false,
        };
        if now_empty {
            self.remove_node(kind, key);
        }
        was_set
    }

    // Remove a whole subtree node, returning the number of bits it held.
    fn remove_node(&mut self, kind: SubKind, key: u16) -> usize {
        let cleared = match self.tree_mut(kind).remove(key) {
            Ok(bits) => bits.count(),
            Err(_) => return 0,
        };
        if key != kind.sentinel() && !self.has_children(key) {
            let was_set = self
                .pending_vlan1
                .set(usize::from(key), false)
                .unwrap_or(false);
            debug_assert!(was_set, "vid1 {key} had children but no index bit");
        }
        cleared
    }

    /// Remove every obligation in this entry that `shape` dominates.  When
    /// `inclusive` is set, an obligation equal to `shape` is removed as well;
    /// that is the case when `shape` arrives at a wider scope than this
    /// entry's.  Returns the cancelled obligations, counted by shape.
    pub fn cancel_dominated(
        &mut self,
        shape: &PurgeShape,
        inclusive: bool,
    ) -> ShapeTally {
        let mut tally = ShapeTally::default();
        match *shape {
            PurgeShape::AllVlans => {
                if inclusive && self.all_pending {
                    self.all_pending = false;
                    tally.bump(&PurgeShape::AllVlans);
                }
                self.clear_below_all(&mut tally);
            }
            PurgeShape::Vid1(v) => {
                let only = self.vid1_only_pending(v);
                let key = v.as_u16();
                let pairs = self.remove_node(SubKind::Vid2, key);
                tally.vid1_vid2 += pairs as u64;
                let pairs = self.remove_node(SubKind::RemoteId, key);
                tally.vid1_remote_id += pairs as u64;
                if inclusive && only {
                    let _ = self.pending_vlan1.set(v.index(), false);
                    tally.bump(shape);
                }
            }
            PurgeShape::Vid2(v2) => {
                self.cancel_column(
                    SubKind::Vid2,
                    v2.index(),
                    inclusive,
                    &mut tally,
                );
            }
            PurgeShape::RemoteId(r) => {
                self.cancel_column(
                    SubKind::RemoteId,
                    r.index(),
                    inclusive,
                    &mut tally,
                );
            }
            PurgeShape::Vid1Vid2(v1, v2) => {
                if inclusive
                    && self.remove_sub(SubKind::Vid2, v1.as_u16(), v2.index())
                {
                    tally.bump(shape);
                }
            }
            PurgeShape::Vid1RemoteId(v1, r) => {
                let key = v1.as_u16();
                if inclusive
                    && self.remove_sub(SubKind::RemoteId, key, r.index())
                {
                    tally.bump(shape);
                }
            }
        }
        tally
    }

    // Cancel every (vid1, bit) pair under real VID1 keys, plus the
    // sentinel-keyed bit when inclusive.
    fn cancel_column(
        &mut self,
        kind: SubKind,
        bit: usize,
        inclusive: bool,
        tally: &mut ShapeTally,
    ) {
        let sentinel = kind.sentinel();
        for key in self.tree(kind).keys() {
            if key == sentinel {
                continue;
            }
            if self.remove_sub(kind, key, bit) {
                match kind {
                    SubKind::Vid2 => tally.vid1_vid2 += 1,
                    SubKind::RemoteId => tally.vid1_remote_id += 1,
                }
            }
        }
        if inclusive && self.remove_sub(kind, sentinel, bit) {
            match kind {
                SubKind::Vid2 => tally.vid2 += 1,
                SubKind::RemoteId => tally.remote_id += 1,
            }
        }
    }

    // Clear everything except all_pending itself.
    fn clear_below_all(&mut self, tally: &mut ShapeTally) {
        let vid1_only = self.vid1_only_count();
        for kind in [SubKind::Vid2, SubKind::RemoteId] {
            let sentinel = kind.sentinel();
            for (key, bits) in self.tree_mut(kind).drain() {
                let n = bits.count() as u64;
                match (kind, key == sentinel) {
                    (SubKind::Vid2, true) => tally.vid2 += n,
                    (SubKind::Vid2, false) => tally.vid1_vid2 += n,
                    (SubKind::RemoteId, true) => tally.remote_id += n,
                    (SubKind::RemoteId, false) => tally.vid1_remote_id += n,
                }
            }
        }
        self.pending_vlan1.clear_all();
        tally.vid1 += vid1_only as u64;
    }

    /// Remove every obligation from the entry.
    pub fn clear(&mut self) -> ShapeTally {
        self.cancel_dominated(&PurgeShape::AllVlans, true)
    }

    /// Remove and return the next obligation to hand to the hardware.
    ///
    /// Precedence within the entry is: a scope-wide purge, then the lowest
    /// pending VID1 (finer pairs under it first, VID2 pairs ahead of remote
    /// ID pairs), then VID2-only, then remote-ID-only obligations.
    pub fn take_next(&mut self) -> Option<PurgeShape> {
        if self.all_pending {
            self.all_pending = false;
            return Some(PurgeShape::AllVlans);
        }

        if let Some(idx) = self.pending_vlan1.find_next(0, true) {
            let key = u16::try_from(idx).ok()?;
            for kind in [SubKind::Vid2, SubKind::RemoteId] {
                let bit = self
                    .tree(kind)
                    .find(key)
                    .and_then(|bits| bits.find_next(0, true));
                if let Some(bit) = bit {
                    let shape = kind.shape(key, bit);
                    self.remove_sub(kind, key, bit);
                    return shape;
                }
            }
            let _ = self.pending_vlan1.set(idx, false);
            return VlanId::new(key).ok().map(PurgeShape::Vid1);
        }

        for kind in [SubKind::Vid2, SubKind::RemoteId] {
            let sentinel = kind.sentinel();
            let bit = self
                .tree(kind)
                .find(sentinel)
                .and_then(|bits| bits.find_next(0, true));
            if let Some(bit) = bit {
                let shape = kind.shape(sentinel, bit);
                self.remove_sub(kind, sentinel, bit);
                return shape;
            }
        }

        None
    }

    /// The number of distinct obligations pending in this entry.  VID1 bits
    /// that only index finer obligations are not counted.
    pub fn obligations(&self) -> usize {
        let mut n = usize::from(self.all_pending);
        for kind in [SubKind::Vid2, SubKind::RemoteId] {
            n += self.tree(kind).iter().map(|(_, b)| b.count()).sum::<usize>();
        }
        n + self.vid1_only_count()
    }

    /// Every pending obligation, in the order `take_next()` would produce
    /// them.
    pub fn pending(&self) -> Vec<PurgeShape> {
        let mut out = Vec::new();
        if self.all_pending {
            out.push(PurgeShape::AllVlans);
        }
        for idx in self.pending_vlan1.iter() {
            let Ok(key) = u16::try_from(idx) else { continue };
            if !self.has_children(key) {
                out.extend(VlanId::new(key).ok().map(PurgeShape::Vid1));
                continue;
            }
            for kind in [SubKind::Vid2, SubKind::RemoteId] {
                if let Some(bits) = self.tree(kind).find(key) {
                    out.extend(bits.iter().filter_map(|b| kind.shape(key, b)));
                }
            }
        }
        for kind in [SubKind::Vid2, SubKind::RemoteId] {
            let sentinel = kind.sentinel();
            if let Some(bits) = self.tree(kind).find(sentinel) {
                out.extend(bits.iter().filter_map(|b| kind.shape(sentinel, b)));
            }
        }
        out
    }

    pub fn dump(&self) -> EntryDump {
        EntryDump {
            scope: self.scope,
            glort: self.glort,
            port_exists: self.port_exists,
            pending: self.pending(),
        }
    }

    /// Verify the cross-structure invariants, returning a description of
    /// the first violation found.
    pub fn check(&self) -> Result<(), String> {
        for kind in [SubKind::Vid2, SubKind::RemoteId] {
            for (key, bits) in self.tree(kind).iter() {
                if bits.is_empty() {
                    return Err(format!("empty {kind:?} node at {key}"));
                }
                if key != kind.sentinel()
                    && !self.pending_vlan1.test(usize::from(key))
                {
                    return Err(format!("{kind:?} node {key} is not indexed"));
                }
            }
        }
        Ok(())
    }
}

impl PurgeShape {
    // The subtree and key an obligation of this shape is stored under, for
    // the shapes that live in a subtree.
    fn subtree_slot(&self) -> Option<(SubKind, u16)> {
        match *self {
            PurgeShape::Vid2(_) => Some((SubKind::Vid2, VID2_ONLY)),
            PurgeShape::RemoteId(_) => Some((SubKind::RemoteId, REMID_ONLY)),
            PurgeShape::Vid1Vid2(v1, _) => Some((SubKind::Vid2, v1.as_u16())),
            PurgeShape::Vid1RemoteId(v1, _) => {
                Some((SubKind::RemoteId, v1.as_u16()))
            }
            PurgeShape::AllVlans | PurgeShape::Vid1(_) => None,
        }
    }
}
