// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for `purged`.

use anyhow::Context;
use serde::Deserialize;

use asic::stub::PortConfig;
use common::logging::LogFormat;
use macpurge::FlushMode;
use macpurge::WorkerConfig;

/// The Config structure captures all of the run-time settings, read from an
/// optional TOML file and then overridden by command-line options.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,

    /// Ports the stub ASIC should create at startup.
    pub ports: Vec<PortConfig>,

    /// Maximum number of purges the worker issues before yielding.
    pub dispatch_batch: usize,

    /// Flush requests to submit once the daemon is running.
    pub flush: Vec<FlushMode>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_format: LogFormat::Json,
            ports: Vec::new(),
            dispatch_batch: WorkerConfig::default().dispatch_batch,
            flush: Vec::new(),
        }
    }
}

impl Config {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            dispatch_batch: self.dispatch_batch,
        }
    }
}

fn parse_config(contents: &str) -> anyhow::Result<Config> {
    toml::from_str(contents).context("failed to parse TOML config")
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {path}"))?;
    parse_config(&contents)
}

fn update_from_cli(opts: &crate::Opt, config: &mut Config) {
    if let Some(log_file) = &opts.log_file {
        config.log_file = Some(log_file.to_string());
    }

    if let Some(log_format) = opts.log_format {
        config.log_format = log_format;
    }

    if let Some(batch) = opts.dispatch_batch {
        config.dispatch_batch = batch;
    }
}

pub(crate) fn build_config(opts: &crate::Opt) -> anyhow::Result<Config> {
    let mut config = match &opts.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    update_from_cli(opts, &mut config);
    anyhow::ensure!(config.dispatch_batch > 0, "dispatch_batch must be > 0");
    Ok(config)
}
