// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::AsicError;
use aal::AsicResult;
use common::ports::{Glort, PortId};

use super::StubHandle;

pub struct StubPort {
    pub glort: Glort,
}

pub fn lookup(hdl: &StubHandle, port: PortId) -> Option<Glort> {
    let ports = hdl.ports.lock().unwrap();
    ports.get(&port).map(|p| p.glort)
}

pub fn add_port(
    hdl: &StubHandle,
    port: PortId,
    glort: Glort,
) -> AsicResult<()> {
    let mut ports = hdl.ports.lock().unwrap();
    if ports.contains_key(&port) {
        return Err(AsicError::InvalidArg(format!("{port} already exists")));
    }
    if ports.values().any(|p| p.glort == glort) {
        return Err(AsicError::InvalidArg(format!("glort {glort} in use")));
    }
    slog::debug!(hdl.log, "adding port"; "port" => %port, "glort" => %glort);
    ports.insert(port, StubPort { glort });
    Ok(())
}

pub fn delete_port(hdl: &StubHandle, port: PortId) -> AsicResult<()> {
    let mut ports = hdl.ports.lock().unwrap();
    match ports.remove(&port) {
        Some(_) => {
            slog::debug!(hdl.log, "deleted port"; "port" => %port);
            Ok(())
        }
        None => Err(AsicError::Missing(format!("no such port: {port}"))),
    }
}
