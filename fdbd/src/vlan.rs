// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Per-VLAN bridge state consulted by the learning table.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use slog::{debug, info, o};

use aal::VlanId;
use common::network::validate_vlan;

use crate::types::{FdbError, FdbResult};

/// Answers whether source addresses seen on a VLAN should be learned.
///
/// Implementations guard their state with their own lock, which callers may
/// take while not holding any learning-table lock, never the reverse.
pub trait VlanLearning: Send + Sync {
    fn is_learning_enabled(&self, vlan: VlanId) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct VlanInfo {
    /// Learn source addresses seen on this VLAN.  If false, the VLAN floods.
    pub learning: bool,
}

impl Default for VlanInfo {
    fn default() -> Self {
        VlanInfo { learning: true }
    }
}

/// Tracks the VLANs configured on a device.
pub struct VlanMgr {
    log: slog::Logger,
    vlans: RwLock<BTreeMap<VlanId, VlanInfo>>,
}

impl VlanMgr {
    pub fn new(log: &slog::Logger) -> Self {
        VlanMgr {
            log: log.new(o!("unit" => "vlan_mgr")),
            vlans: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn add(&self, vlan: VlanId, info: VlanInfo) -> FdbResult<()> {
        validate_vlan(vlan)?;
        let mut vlans = self.vlans.write().unwrap();
        if vlans.contains_key(&vlan) {
            return Err(FdbError::Exists(format!("vlan {vlan}")));
        }
        vlans.insert(vlan, info);
        info!(self.log, "added vlan {vlan}"; "learning" => info.learning);
        Ok(())
    }

    pub fn remove(&self, vlan: VlanId) -> FdbResult<VlanInfo> {
        let info = self
            .vlans
            .write()
            .unwrap()
            .remove(&vlan)
            .ok_or_else(|| FdbError::Missing(format!("vlan {vlan}")))?;
        info!(self.log, "removed vlan {vlan}");
        Ok(info)
    }

    pub fn set_learning(&self, vlan: VlanId, learning: bool) -> FdbResult<()> {
        let mut vlans = self.vlans.write().unwrap();
        let info = vlans
            .get_mut(&vlan)
            .ok_or_else(|| FdbError::Missing(format!("vlan {vlan}")))?;
        info.learning = learning;
        debug!(self.log, "vlan {vlan} learning set to {learning}");
        Ok(())
    }

    pub fn get(&self, vlan: VlanId) -> Option<VlanInfo> {
        self.vlans.read().unwrap().get(&vlan).copied()
    }

    pub fn list(&self) -> Vec<(VlanId, VlanInfo)> {
        self.vlans
            .read()
            .unwrap()
            .iter()
            .map(|(id, info)| (*id, *info))
            .collect()
    }
}

impl VlanLearning for VlanMgr {
    // Unknown VLANs don't learn.
    fn is_learning_enabled(&self, vlan: VlanId) -> bool {
        self.get(vlan).map(|v| v.learning).unwrap_or(false)
    }
}
