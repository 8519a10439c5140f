// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A toy address table, so that purges executed against the stub have a
//! visible effect.

use slog::{debug, error};

use aal::{AsicError, AsicResult, PurgeMatch, PurgeTarget};
use common::network::{RemoteId, VlanId};
use common::ports::PortId;

use super::StubHandle;

/// A single dynamic entry in the stub's address table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LearnedEntry {
    pub port: PortId,
    pub vid1: VlanId,
    pub vid2: Option<VlanId>,
    pub remote_id: Option<RemoteId>,
    pub expired: bool,
}

fn covers<T: PartialEq>(want: &Option<T>, have: &T) -> bool {
    match want {
        Some(w) => w == have,
        None => true,
    }
}

fn covers_opt<T: PartialEq>(want: &Option<T>, have: &Option<T>) -> bool {
    match want {
        Some(_) => want == have,
        None => true,
    }
}

fn matches(m: &PurgeMatch, e: &LearnedEntry) -> bool {
    covers(&m.port, &e.port)
        && covers(&m.vid1, &e.vid1)
        && covers_opt(&m.vid2, &e.vid2)
        && covers_opt(&m.remote_id, &e.remote_id)
}

pub fn learn(hdl: &StubHandle, entry: LearnedEntry) {
    let mut table = hdl.table.lock().unwrap();
    if !table.contains(&entry) {
        table.push(entry);
    }
}

pub fn execute(hdl: &StubHandle, target: &PurgeTarget) -> AsicResult<()> {
    {
        let mut faults = hdl.pending_faults.lock().unwrap();
        if *faults > 0 {
            *faults -= 1;
            error!(hdl.log, "injected purge failure"; "target" => %target);
            return Err(AsicError::Synthetic(format!("purge of {target}")));
        }
    }

    let mut table = hdl.table.lock().unwrap();
    let before = table.len();
    match target {
        PurgeTarget::Expired => table.retain(|e| !e.expired),
        PurgeTarget::Match(m) => table.retain(|e| !matches(m, e)),
    }
    debug!(hdl.log, "executed purge";
        "target" => %target,
        "removed" => before - table.len());
    hdl.executed.lock().unwrap().push(*target);
    Ok(())
}
