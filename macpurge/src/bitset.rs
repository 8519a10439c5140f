// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

/// A fixed-capacity, dense bit array that keeps a running count of its set
/// bits.  Used to track pending VLAN and remote ID purges.
use crate::types::PurgeError;
use crate::types::PurgeResult;

const WORD_BITS: usize = u64::BITS as usize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
    capacity: usize,
    // Number of bits currently set.  Kept in step with `words` by set() and
    // clear_all().
    count: usize,
}

impl BitSet {
    /// Allocate a bitset able to hold `capacity` bits, all clear.
    pub fn new(capacity: usize) -> PurgeResult<Self> {
        #[cfg(test)]
        if crate::fault::alloc_should_fail() {
            return Err(PurgeError::NoMemory(format!(
                "bitset of {capacity} bits: injected"
            )));
        }
        let nwords = capacity.div_ceil(WORD_BITS);
        let mut words = Vec::new();
        words.try_reserve_exact(nwords).map_err(|e| {
            PurgeError::NoMemory(format!("bitset of {capacity} bits: {e}"))
        })?;
        words.resize(nwords, 0);
        Ok(BitSet {
            words,
            capacity,
            count: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of bits currently set.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Set bit `idx` to `val`, returning its previous value.
    pub fn set(&mut self, idx: usize, val: bool) -> PurgeResult<bool> {
        if idx >= self.capacity {
            return Err(PurgeError::InvalidArg(format!(
                "bit {idx} exceeds capacity {}",
                self.capacity
            )));
        }
        let word = &mut self.words[idx / WORD_BITS];
        let mask = 1u64 << (idx % WORD_BITS);
        let old = *word & mask != 0;
        match (old, val) {
            (false, true) => {
                *word |= mask;
                self.count += 1;
            }
            (true, false) => {
                *word &= !mask;
                self.count -= 1;
            }
            _ => {}
        }
        Ok(old)
    }

    /// Report whether bit `idx` is set.  Bits beyond the capacity are never
    /// set.
    pub fn test(&self, idx: usize) -> bool {
        if idx >= self.capacity {
            return false;
        }
        self.words[idx / WORD_BITS] & (1u64 << (idx % WORD_BITS)) != 0
    }

    // Return word `w`, inverted if we are searching for clear bits.
    fn word_for(&self, w: usize, val: bool) -> u64 {
        if val {
            self.words[w]
        } else {
            !self.words[w]
        }
    }

    /// Find the first bit at or after `from` whose value is `val`.
    pub fn find_next(&self, from: usize, val: bool) -> Option<usize> {
        if from >= self.capacity || (val && self.count == 0) {
            return None;
        }
        let mut w = from / WORD_BITS;
        let mut word = self.word_for(w, val) & (!0u64 << (from % WORD_BITS));
        loop {
            if word != 0 {
                let idx = w * WORD_BITS + word.trailing_zeros() as usize;
                // An inverted final word has "clear" bits past the capacity
                return (idx < self.capacity).then_some(idx);
            }
            w += 1;
            if w >= self.words.len() {
                return None;
            }
            word = self.word_for(w, val);
        }
    }

    /// Find the last bit at or before `from` whose value is `val`.
    pub fn find_prev(&self, from: usize, val: bool) -> Option<usize> {
        if self.capacity == 0 || (val && self.count == 0) {
            return None;
        }
        let from = from.min(self.capacity - 1);
        let mut w = from / WORD_BITS;
        let shift = WORD_BITS - 1 - (from % WORD_BITS);
        let mut word = self.word_for(w, val) & (!0u64 >> shift);
        loop {
            if word != 0 {
                let top = WORD_BITS - 1 - word.leading_zeros() as usize;
                return Some(w * WORD_BITS + top);
            }
            if w == 0 {
                return None;
            }
            w -= 1;
            word = self.word_for(w, val);
        }
    }

    /// Clear every bit, returning how many were set.
    pub fn clear_all(&mut self) -> usize {
        let cleared = self.count;
        self.words.iter_mut().for_each(|w| *w = 0);
        self.count = 0;
        cleared
    }

    /// Iterate over the indices of the set bits, in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = self.find_next(0, true);
        std::iter::from_fn(move || {
            let cur = next?;
            next = self.find_next(cur + 1, true);
            Some(cur)
        })
    }
}
