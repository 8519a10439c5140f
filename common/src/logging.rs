// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Root logger construction shared by the purge daemon and its tools.

use std::fmt;
use std::fs::File;
use std::fs::OpenOptions;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use slog::Drain;

/// How log records should be rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Unstructured, colorized text meant for a terminal.
    Human,
    /// Bunyan-style json, one record per line.
    #[default]
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("invalid log format: {s}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

fn open_log(path: &str) -> anyhow::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {path}"))
}

// Every drain goes through slog-async.
fn async_root<D>(drain: D) -> slog::Logger
where
    D: Drain<Ok = (), Err = slog::Never> + Send + 'static,
{
    let drain = slog_async::Async::new(drain).chan_size(0x2000).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

/// Build the root logger for a daemon or tool.
///
/// If `log_file` is `None` the records go to stdout.
pub fn init(
    name: &'static str,
    log_file: &Option<String>,
    log_format: LogFormat,
) -> anyhow::Result<slog::Logger> {
    let log = match (log_file, log_format) {
        (None, LogFormat::Human) => {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            async_root(drain).new(slog::o!("name" => name))
        }
        (Some(path), LogFormat::Human) => {
            let decorator = slog_term::PlainDecorator::new(open_log(path)?);
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            async_root(drain).new(slog::o!("name" => name))
        }
        (None, LogFormat::Json) => {
            let drain =
                slog_bunyan::with_name(name, std::io::stdout()).build().fuse();
            async_root(drain)
        }
        (Some(path), LogFormat::Json) => {
            let drain =
                slog_bunyan::with_name(name, open_log(path)?).build().fuse();
            async_root(drain)
        }
    };

    Ok(log)
}
