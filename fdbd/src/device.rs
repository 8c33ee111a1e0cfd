// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Switch devices and the learning state owned by each.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use slog::{info, o, Logger};

use aal::{FdbOps, IntfId, VlanId};

use crate::config::Config;
use crate::learning::MacLearning;
use crate::types::{FdbError, FdbResult};
use crate::vlan::{VlanInfo, VlanLearning, VlanMgr};

pub type DeviceId = u8;

/// Number of switch devices a single daemon can manage.
pub const MAX_DEVICES: usize = 8;

/// A switch device: its ASIC, its VLANs and the addresses learned on it.
pub struct Device<H: FdbOps + 'static> {
    id: DeviceId,
    log: Logger,
    vlans: Arc<VlanMgr>,
    ports: RwLock<BTreeMap<IntfId, String>>,
    ml: MacLearning<H>,
}

impl<H: FdbOps + 'static> Device<H> {
    fn new(
        log: &Logger,
        id: DeviceId,
        hdl: Arc<H>,
        config: &Config,
    ) -> FdbResult<Self> {
        let log = log.new(o!("device" => id));

        let vlans = Arc::new(VlanMgr::new(&log));
        for v in &config.vlans {
            vlans.add(
                v.id,
                VlanInfo {
                    learning: v.learning,
                },
            )?;
        }
        let ports = config
            .ports
            .iter()
            .map(|p| (p.intf, p.name.clone()))
            .collect();

        let learning: Arc<dyn VlanLearning> = vlans.clone();
        let ml = MacLearning::new(&log, hdl, learning, config.settings())?;
        info!(log, "device created"; "vlans" => config.vlans.len());

        Ok(Device {
            id,
            log,
            vlans,
            ports: RwLock::new(ports),
            ml,
        })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn vlans(&self) -> &VlanMgr {
        &self.vlans
    }

    pub fn mac_learning(&self) -> &MacLearning<H> {
        &self.ml
    }

    pub fn add_vlan(&self, vlan: VlanId, info: VlanInfo) -> FdbResult<()> {
        self.vlans.add(vlan, info)
    }

    /// Remove a VLAN, and with it every address learned on it.
    pub fn remove_vlan(&self, vlan: VlanId) -> FdbResult<()> {
        self.vlans.remove(vlan)?;
        self.ml.notify_vlan_removed(vlan)
    }

    /// Flush the addresses learned on an interface that has gone down.
    pub fn port_down(&self, intf: IntfId) -> FdbResult<()> {
        info!(self.log, "port down"; "intf" => intf);
        self.ml.notify_port_down(intf)
    }

    pub fn set_port_name(&self, intf: IntfId, name: &str) {
        self.ports.write().unwrap().insert(intf, name.to_string());
    }

    /// Bring the runtime-adjustable settings in line with `config`.
    pub fn reconfigure(&self, config: &Config) {
        let idle_time = self.ml.set_idle_time(config.idle_time);
        let max_entries = self.ml.set_max_entries(config.max_entries);
        *self.ports.write().unwrap() = config
            .ports
            .iter()
            .map(|p| (p.intf, p.name.clone()))
            .collect();
        info!(self.log, "device reconfigured";
            "idle_time" => idle_time,
            "max_entries" => max_entries);
    }

    pub fn dump(&self) -> FdbResult<String> {
        let ports = self.ports.read().unwrap();
        self.ml.dump(&*ports)
    }
}

/// All of the devices managed by the daemon.
pub struct DeviceRegistry<H: FdbOps + 'static> {
    log: Logger,
    devices: BTreeMap<DeviceId, Device<H>>,
}

impl<H: FdbOps + 'static> DeviceRegistry<H> {
    pub fn new(log: &Logger) -> Self {
        DeviceRegistry {
            log: log.new(o!("unit" => "devices")),
            devices: BTreeMap::new(),
        }
    }

    /// Set up learning on device `id`.  If the device already exists, it is
    /// returned unchanged.
    pub fn alloc(
        &mut self,
        id: DeviceId,
        hdl: Arc<H>,
        config: &Config,
    ) -> FdbResult<&Device<H>> {
        if usize::from(id) >= MAX_DEVICES {
            return Err(FdbError::Invalid(format!("device id {id}")));
        }
        match self.devices.entry(id) {
            Entry::Occupied(e) => Ok(&*e.into_mut()),
            Entry::Vacant(e) => {
                let device = Device::new(&self.log, id, hdl, config)?;
                Ok(&*e.insert(device))
            }
        }
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device<H>> {
        self.devices.get(&id)
    }

    /// Tear down device `id`, flushing everything it learned.
    pub fn remove(&mut self, id: DeviceId) -> FdbResult<()> {
        match self.devices.remove(&id) {
            Some(_) => {
                info!(self.log, "device removed"; "device" => id);
                Ok(())
            }
            None => Err(FdbError::Missing(format!("device {id}"))),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device<H>> {
        self.devices.values()
    }
}
