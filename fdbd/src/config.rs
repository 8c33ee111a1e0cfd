// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for `fdbd`.

use std::collections::BTreeSet;

use serde::Deserialize;
use structopt::StructOpt;

use aal::{IntfId, VlanId};
use asic::AsicConfig;
use common::logging::LogFormat;
use common::network::validate_vlan;

use crate::device::{DeviceId, MAX_DEVICES};
use crate::learning::{
    Settings, DEFAULT_IDLE_TIME, DEFAULT_MAX_ENTRIES, DEFAULT_QUEUE_DEPTH,
};
use crate::types::{FdbError, FdbResult};

#[derive(Debug, Default, StructOpt)]
#[structopt(name = "fdbd", about = "mac learning daemon for a switch asic")]
pub struct Opt {
    #[structopt(
        long,
        help = "send log data to the named file rather than stdout"
    )]
    pub log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        help = "format logs for 'human' or 'json' consumption"
    )]
    pub log_format: Option<LogFormat>,

    #[structopt(
        long,
        short = "c",
        help = "TOML file with the daemon's settings, vlans and port names"
    )]
    pub config: Option<String>,

    #[structopt(long, help = "seconds before an idle address is aged out")]
    pub idle_time: Option<u32>,

    #[structopt(long, help = "maximum number of learned addresses")]
    pub max_entries: Option<usize>,

    #[structopt(
        long,
        help = "number of hardware notifications that may be queued"
    )]
    pub queue_depth: Option<usize>,

    #[structopt(long, help = "switch device to manage")]
    pub device_id: Option<DeviceId>,

    #[cfg(feature = "chaos")]
    #[structopt(long, help = "TOML file with chaos asic settings")]
    pub chaos_config: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VlanConfig {
    pub id: VlanId,
    #[serde(default = "learning_default")]
    pub learning: bool,
}

fn learning_default() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortConfig {
    pub intf: IntfId,
    pub name: String,
}

/// The run-time settings of the daemon.
#[derive(Debug)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,

    /// Seconds an address may go unseen before the hardware ages it out.
    pub idle_time: u32,

    /// Upper bound on the number of learned addresses.
    pub max_entries: usize,

    /// Depth of the queue feeding the event thread.
    pub queue_depth: usize,

    /// Which switch device to manage.
    pub device_id: DeviceId,

    /// VLANs to create at startup.
    pub vlans: Vec<VlanConfig>,

    /// Names used when displaying the table.
    pub ports: Vec<PortConfig>,

    /// Asic/platform-specific config settings.
    pub asic_config: AsicConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_format: LogFormat::Json,
            idle_time: DEFAULT_IDLE_TIME,
            max_entries: DEFAULT_MAX_ENTRIES,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            device_id: 0,
            vlans: Vec::new(),
            ports: Vec::new(),
            asic_config: AsicConfig::default(),
        }
    }
}

impl Config {
    pub fn settings(&self) -> Settings {
        Settings {
            idle_time: self.idle_time,
            max_entries: self.max_entries,
            queue_depth: self.queue_depth,
        }
    }
}

/// The contents of a config file.  Anything left out keeps its default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub log_file: Option<String>,
    pub log_format: Option<LogFormat>,
    pub idle_time: Option<u32>,
    pub max_entries: Option<usize>,
    pub queue_depth: Option<usize>,
    pub device_id: Option<DeviceId>,
    #[serde(default, rename = "vlan")]
    pub vlans: Vec<VlanConfig>,
    #[serde(default, rename = "port")]
    pub ports: Vec<PortConfig>,
    pub asic: Option<AsicConfig>,
}

pub fn parse_config_file(txt: &str) -> FdbResult<ConfigFile> {
    toml::from_str(txt)
        .map_err(|e| FdbError::Invalid(format!("config file: {e}")))
}

fn update_from_file(file: ConfigFile, config: &mut Config) {
    if let Some(log_file) = file.log_file {
        config.log_file = Some(log_file);
    }
    if let Some(log_format) = file.log_format {
        config.log_format = log_format;
    }
    if let Some(idle_time) = file.idle_time {
        config.idle_time = idle_time;
    }
    if let Some(max_entries) = file.max_entries {
        config.max_entries = max_entries;
    }
    if let Some(queue_depth) = file.queue_depth {
        config.queue_depth = queue_depth;
    }
    if let Some(device_id) = file.device_id {
        config.device_id = device_id;
    }
    config.vlans = file.vlans;
    config.ports = file.ports;
    if let Some(asic) = file.asic {
        config.asic_config = asic;
    }
}

// Use the command-line arguments to update the run-time config.
fn update_from_cli(opts: &Opt, config: &mut Config) -> FdbResult<()> {
    if let Some(log_file) = &opts.log_file {
        config.log_file = Some(log_file.to_string());
    }

    if let Some(log_format) = opts.log_format {
        config.log_format = log_format;
    }

    if let Some(idle_time) = opts.idle_time {
        config.idle_time = idle_time;
    }

    if let Some(max_entries) = opts.max_entries {
        config.max_entries = max_entries;
    }

    if let Some(queue_depth) = opts.queue_depth {
        config.queue_depth = queue_depth;
    }

    if let Some(device_id) = opts.device_id {
        config.device_id = device_id;
    }

    #[cfg(feature = "chaos")]
    {
        if let Some(path) = &opts.chaos_config {
            let txt = std::fs::read_to_string(path)?;
            config.asic_config = toml::from_str(&txt)
                .map_err(|e| FdbError::Invalid(format!("chaos config: {e}")))?;
        }
    }

    Ok(())
}

fn validate(config: &Config) -> FdbResult<()> {
    if usize::from(config.device_id) >= MAX_DEVICES {
        return Err(FdbError::Invalid(format!(
            "device id {} out of range",
            config.device_id
        )));
    }
    if config.queue_depth == 0 {
        return Err(FdbError::Invalid("queue depth must be non-zero".into()));
    }

    let mut seen = BTreeSet::new();
    for vlan in &config.vlans {
        validate_vlan(vlan.id)?;
        if !seen.insert(vlan.id) {
            return Err(FdbError::Invalid(format!(
                "vlan {} configured twice",
                vlan.id
            )));
        }
    }

    let mut seen = BTreeSet::new();
    for port in &config.ports {
        if !seen.insert(port.intf) {
            return Err(FdbError::Invalid(format!(
                "intf {} named twice",
                port.intf
            )));
        }
    }
    Ok(())
}

/// This builds a Config struct containing the tunable settings used to adjust
/// the daemon's behavior.  Settings come from the defaults, overridden by the
/// config file if one is named, overridden in turn by command line options.
pub fn build_config(opts: &Opt) -> FdbResult<Config> {
    let mut config = Config::default();
    if let Some(path) = &opts.config {
        let txt = std::fs::read_to_string(path)?;
        update_from_file(parse_config_file(&txt)?, &mut config);
    }
    update_from_cli(opts, &mut config)?;
    validate(&config)?;
    Ok(config)
}
