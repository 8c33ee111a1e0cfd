// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Main application entry point for `fdbd`, the switch's MAC learning daemon.

use std::sync::Arc;

use anyhow::Context;
use futures::stream::StreamExt;
use libc::c_int;
use signal_hook::consts::SIGHUP;
use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGQUIT;
use signal_hook::consts::SIGTERM;
use signal_hook::consts::SIGUSR1;
use signal_hook::consts::SIGUSR2;
use signal_hook_tokio::Signals;
use slog::error;
use slog::info;
use slog::Logger;
use structopt::StructOpt;

use aal::FdbOps;
use fdbd::config::{self, Opt};
use fdbd::device::{Device, DeviceRegistry};

// Re-read the config, applying whatever can be changed at runtime.
fn handle_refresh<H: FdbOps + 'static>(
    log: &Logger,
    opt: &Opt,
    device: &Device<H>,
) {
    match config::build_config(opt) {
        Ok(config) => device.reconfigure(&config),
        Err(e) => error!(log, "failed to reload config: {e}"),
    }
}

fn handle_dump<H: FdbOps + 'static>(log: &Logger, device: &Device<H>) {
    match device.dump() {
        Ok(text) => info!(log, "fdb table:\n{text}";
            "entries" => device.mac_learning().len()),
        Err(e) => error!(log, "failed to dump fdb table: {e}"),
    }
}

async fn handle_signals<H: FdbOps + 'static>(
    log: &Logger,
    opt: &Opt,
    device: &Device<H>,
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
            SIGUSR1 => {
                info!(log, "reloading config");
                handle_refresh(&log, opt, device)
            }
            SIGUSR2 => handle_dump(&log, device),
            _ => unreachable!(),
        }
    }
}

async fn run_fdbd(opt: Opt) -> anyhow::Result<()> {
    let config = config::build_config(&opt).context("building config")?;

    let log =
        common::logging::init("fdbd", &config.log_file, config.log_format)?;
    info!(log, "fdbd config: {config:#?}");

    let hdl = Arc::new(
        asic::Handle::new(&log, &config.asic_config)
            .context("initializing asic")?,
    );
    info!(log, "initialized asic"; "fdb_size" => hdl.fdb_size(),
        "model" => hdl.is_model());

    let mut devices = DeviceRegistry::new(&log);
    let device = devices
        .alloc(config.device_id, hdl.clone(), &config)
        .context("starting mac learning")?;

    const SIGNALS: &[c_int] =
        &[SIGTERM, SIGQUIT, SIGINT, SIGHUP, SIGUSR1, SIGUSR2];
    let signals =
        Signals::new(SIGNALS).context("installing signal handlers")?;
    handle_signals(&log, &opt, device, signals).await;

    info!(log, "shutting down mac learning");
    devices.remove(config.device_id)?;
    hdl.fini();

    info!(log, "done");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_fdbd(Opt::from_args()).await
}
