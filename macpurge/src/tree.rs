// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;

use thiserror::Error;

use crate::types::PurgeError;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TreeError {
    #[error("key {0} already present")]
    Duplicate(u16),
    #[error("key {0} not found")]
    NotFound(u16),
}

impl From<TreeError> for PurgeError {
    fn from(e: TreeError) -> Self {
        PurgeError::Internal(e.to_string())
    }
}

/// An ordered map from a 16-bit key to an owned value.  Unlike a bare
/// `BTreeMap`, inserting over an existing key or removing a missing one is
/// reported as an error, since either indicates that the caller's view of
/// the tree has drifted from reality.
#[derive(Clone, Debug, Default)]
pub struct KeyedTree<V> {
    map: BTreeMap<u16, V>,
}

impl<V> KeyedTree<V> {
    pub fn new() -> Self {
        KeyedTree {
            map: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: u16, value: V) -> Result<(), TreeError> {
        if self.map.contains_key(&key) {
            return Err(TreeError::Duplicate(key));
        }
        self.map.insert(key, value);
        Ok(())
    }

    pub fn find(&self, key: u16) -> Option<&V> {
        self.map.get(&key)
    }

    pub fn find_mut(&mut self, key: u16) -> Option<&mut V> {
        self.map.get_mut(&key)
    }

    pub fn contains(&self, key: u16) -> bool {
        self.map.contains_key(&key)
    }

    pub fn remove(&mut self, key: u16) -> Result<V, TreeError> {
        self.map.remove(&key).ok_or(TreeError::NotFound(key))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate over the tree in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &V)> {
        self.map.iter().map(|(k, v)| (*k, v))
    }

    /// A snapshot of the keys, in ascending order.  Useful when the caller
    /// needs to mutate the tree while walking it.
    pub fn keys(&self) -> Vec<u16> {
        self.map.keys().copied().collect()
    }

    /// Remove every node, returning the values in ascending key order.
    pub fn drain(&mut self) -> Vec<(u16, V)> {
        std::mem::take(&mut self.map).into_iter().collect()
    }
}
