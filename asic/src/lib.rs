// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! ASIC backends for the purge coordinator.
//!
//! Only the in-memory stub is provided.  It implements just enough of a
//! switch's address table and port inventory to drive the purge machinery
//! end to end, and it records every hardware operation so tests can inspect
//! them.

pub mod stub;

pub use stub::AsicConfig;
pub use stub::StubHandle as Handle;
