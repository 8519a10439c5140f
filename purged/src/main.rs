// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Main application entry point for `purged`, which hosts the MAC address
//! table purge coordinator for a single switch.

use std::sync::Arc;

use anyhow::Context;
use futures::stream::StreamExt;
use libc::c_int;
use signal_hook::consts::SIGHUP;
use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGQUIT;
use signal_hook::consts::SIGTERM;
use signal_hook::consts::SIGUSR1;
use signal_hook_tokio::Signals;
use slog::debug;
use slog::error;
use slog::info;
use structopt::StructOpt;
use tokio::sync::mpsc;

use asic::AsicConfig;
use macpurge::PurgeCoordinator;

mod config;

type Coordinator = PurgeCoordinator<asic::Handle>;

#[derive(Debug, Default, StructOpt)]
#[structopt(name = "purged", about = "MAC address table purge coordinator")]
pub(crate) struct Opt {
    #[structopt(long, help = "TOML file holding the daemon's configuration")]
    config: Option<String>,

    #[structopt(
        long,
        about = "send log data to the named file rather than stdout"
    )]
    log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        about = "log format",
        help = "format logs for 'human' or 'json' consumption"
    )]
    log_format: Option<common::logging::LogFormat>,

    #[structopt(
        long,
        help = "maximum number of purges issued before the worker yields"
    )]
    dispatch_batch: Option<usize>,
}

// Log the statistics block and a snapshot of the registry.
fn dump_state(log: &slog::Logger, coord: &Coordinator) {
    match serde_json::to_string(&coord.stats()) {
        Ok(stats) => info!(log, "purge stats"; "stats" => stats),
        Err(e) => error!(log, "failed to serialize stats"; "error" => %e),
    }
    match serde_json::to_string(&coord.dump()) {
        Ok(dump) => info!(log, "purge registry";
            "pending" => coord.pending_obligations(),
            "registry" => dump),
        Err(e) => error!(log, "failed to serialize registry"; "error" => %e),
    }
}

async fn handle_signals(
    log: &slog::Logger,
    coord: &Coordinator,
    mut signals: Signals,
) {
    let log = log.new(slog::o!("unit" => "signal_handler"));
    let handle = signals.handle();

    while let Some(signal) = signals.next().await {
        match signal {
            SIGTERM | SIGQUIT | SIGINT | SIGHUP => {
                info!(log, "received signal"; "sig" => signal);
                handle.close();
                return;
            }
            SIGUSR1 => dump_state(&log, coord),
            _ => unreachable!(),
        }
    }
}

async fn run_purged(opt: Opt) -> anyhow::Result<()> {
    let config = config::build_config(&opt)?;

    let log =
        common::logging::init("purged", &config.log_file, config.log_format)?;
    info!(log, "purged config: {config:#?}");

    let asic_config = AsicConfig {
        ports: config.ports.clone(),
    };
    let hdl = Arc::new(
        asic::Handle::new(&log, &asic_config)
            .context("failed to initialize the asic")?,
    );
    let (kick_tx, kick_rx) = mpsc::unbounded_channel();
    hdl.register_kick_handler(kick_tx);

    let coord = Arc::new(
        PurgeCoordinator::new(&log, hdl.clone())
            .context("failed to create the purge coordinator")?,
    );
    let worker = macpurge::spawn_worker(
        coord.clone(),
        kick_rx,
        config.worker_config(),
    );

    for mode in &config.flush {
        match coord.flush(*mode, None) {
            Ok(outcome) => debug!(log, "initial flush submitted";
                "mode" => ?mode, "outcome" => ?outcome),
            Err(e) => error!(log, "initial flush rejected";
                "mode" => ?mode, "error" => %e),
        }
    }

    // Register the handler before waiting, so an early SIGUSR1 is queued
    // rather than killing the daemon.
    const SIGNALS: &[c_int] = &[SIGTERM, SIGQUIT, SIGINT, SIGHUP, SIGUSR1];
    let signals =
        Signals::new(SIGNALS).context("failed to register signal handler")?;
    handle_signals(&log, &coord, signals).await;

    info!(log, "shutting down purge coordinator");
    let detached = coord.shutdown();
    if !detached.is_empty() {
        info!(log, "dropped pending purge callbacks";
            "count" => detached.len());
    }
    hdl.unregister_kick_handler();
    worker.await.context("purge worker failed")?;
    dump_state(&log, &coord);

    info!(log, "done");
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    run_purged(opt).await
}
