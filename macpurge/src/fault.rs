// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Test-only fault injection for the allocation and insert paths.  Faults
//! are armed per thread, so concurrently running tests do not see each
//! other's faults.

use std::cell::Cell;

thread_local! {
    static ALLOC_COUNTDOWN: Cell<Option<usize>> = const { Cell::new(None) };
    static INSERT_FAIL: Cell<bool> = const { Cell::new(false) };
}

/// Fail the `nth` bitset allocation made on this thread from now on,
/// counting from 1.
pub(crate) fn fail_alloc(nth: usize) {
    ALLOC_COUNTDOWN.with(|c| c.set(Some(nth)));
}

/// Fail the next obligation insert made on this thread.
pub(crate) fn fail_next_insert() {
    INSERT_FAIL.with(|c| c.set(true));
}

/// Disarm any fault still pending on this thread.
pub(crate) fn clear() {
    ALLOC_COUNTDOWN.with(|c| c.set(None));
    INSERT_FAIL.with(|c| c.set(false));
}

pub(crate) fn alloc_should_fail() -> bool {
    ALLOC_COUNTDOWN.with(|c| match c.get() {
        Some(1) => {
            c.set(None);
            true
        }
        Some(n) => {
            c.set(Some(n - 1));
            false
        }
        None => false,
    })
}

pub(crate) fn insert_should_fail() -> bool {
    INSERT_FAIL.with(|c| c.replace(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_countdown() {
        fail_alloc(2);
        assert!(!alloc_should_fail());
        assert!(alloc_should_fail());
        assert!(!alloc_should_fail());
    }

    #[test]
    fn test_insert_fault_fires_once() {
        fail_next_insert();
        assert!(insert_should_fail());
        assert!(!insert_should_fail());
        clear();
    }
}
