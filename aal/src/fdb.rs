// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::convert::TryFrom;
use std::fmt;

use common::network::MacAddr;

use crate::{AsicError, FdbIndex, IntfId, VlanId};

/// What the forwarding pipeline does with a packet matching an FDB entry.
/// Learned entries always forward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PktCmd {
    #[default]
    Forward,
}

/// The data programmed into a single slot of the layer-2 forwarding table.
///
/// The (vlan, mac) pair is the key; everything else is the result of the
/// lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FdbEntry {
    pub vlan: VlanId,
    pub mac: MacAddr,
    pub intf: IntfId,
    /// Overlay segment (VNI) the entry was learned on, or 0 for none.
    pub service_id: u32,
    pub is_static: bool,
    pub is_control: bool,
    pub pkt_cmd: PktCmd,
}

impl FdbEntry {
    /// Build a dynamic, forwarding entry.
    pub fn new(vlan: VlanId, mac: MacAddr, intf: IntfId) -> Self {
        FdbEntry {
            vlan,
            mac,
            intf,
            service_id: 0,
            is_static: false,
            is_control: false,
            pkt_cmd: PktCmd::Forward,
        }
    }

    /// Returns true if both entries are keyed on the same (vlan, mac) pair.
    pub fn same_key(&self, other: &FdbEntry) -> bool {
        self.vlan == other.vlan && self.mac == other.mac
    }
}

impl fmt::Display for FdbEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "vlan {} mac {} intf {}", self.vlan, self.mac, self.intf)
    }
}

/// Where `FdbOps::fdb_add` placed a new entry.
///
/// If the ASIC had to make room by relocating the entry that previously lived
/// at `index`, that entry now lives at `rehash_index`.  Otherwise the two are
/// equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FdbSlot {
    pub index: FdbIndex,
    pub rehash_index: FdbIndex,
}

impl FdbSlot {
    /// A slot that was free before the insert.
    pub fn direct(index: FdbIndex) -> Self {
        FdbSlot {
            index,
            rehash_index: index,
        }
    }

    /// Did the insert displace an existing entry?
    pub fn relocated(&self) -> bool {
        self.index != self.rehash_index
    }
}

/// Why the bridge pipeline punted a packet to the learning handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ReasonCode {
    /// The source MAC is not present in the table.
    MacSaNew = 1,
    /// The source MAC missed on the ingress interface's lookup.
    IvifSaMiss = 2,
    /// The source MAC is present, but was learned on a different interface.
    MacSaMove = 3,
}

impl TryFrom<u32> for ReasonCode {
    type Error = AsicError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(ReasonCode::MacSaNew),
            2 => Ok(ReasonCode::IvifSaMiss),
            3 => Ok(ReasonCode::MacSaMove),
            x => Err(AsicError::InvalidArg(format!("unknown reason code {x}"))),
        }
    }
}

impl From<ReasonCode> for u32 {
    fn from(rc: ReasonCode) -> u32 {
        rc as u32
    }
}
