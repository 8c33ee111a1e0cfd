// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The software reflection of the hardware forwarding table.
//!
//! Entries are keyed by the hardware slot they occupy.  The hardware may move
//! an existing entry to another slot when inserting a new one, so every insert
//! has to be reconciled against the slot pair the ASIC reports.

use std::collections::HashMap;

use slog::{debug, error, info, warn, Logger};

use aal::{FdbEntry, FdbIndex, FdbOps, IntfId, VlanId};
use common::network::MacAddr;

use crate::types::{FdbError, FdbResult};

pub const MIN_IDLE_TIME: u32 = 15;
pub const MAX_IDLE_TIME: u32 = 3600;
pub const DEFAULT_IDLE_TIME: u32 = 300;

pub const MIN_MAX_ENTRIES: usize = 10;
pub const MAX_MAX_ENTRIES: usize = 1000 * 1000;
pub const DEFAULT_MAX_ENTRIES: usize = 16 * 1024;

pub fn normalize_idle_time(secs: u32) -> u32 {
    secs.clamp(MIN_IDLE_TIME, MAX_IDLE_TIME)
}

pub fn normalize_max_entries(n: usize) -> usize {
    n.clamp(MIN_MAX_ENTRIES, MAX_MAX_ENTRIES)
}

/// One learned (VLAN, MAC) -> interface association, along with the hardware
/// slot currently holding it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MacEntry {
    pub fdb: FdbEntry,
    pub index: FdbIndex,
}

impl MacEntry {
    pub fn vlan(&self) -> VlanId {
        self.fdb.vlan
    }

    pub fn mac(&self) -> MacAddr {
        self.fdb.mac
    }

    pub fn intf(&self) -> IntfId {
        self.fdb.intf
    }

    pub fn service_id(&self) -> u32 {
        self.fdb.service_id
    }
}

/// Basic statistics about learning table usage
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableUsage {
    /// Maximum number of entries in the table
    pub size: u32,
    /// Current number of entries in the table
    pub occupancy: u32,
    /// Total number of entries inserted over time
    pub inserts: u64,
    /// Total number of entries removed over time
    pub deletes: u64,
    /// Number of entries whose interface was updated by a move
    pub moves: u64,
    /// Number of entries relocated by the hardware to make room for another
    pub rehashes: u64,
    /// Number of inserts rejected because the table was full
    pub exhaustion: u64,
    /// Number of failed hardware operations
    pub switch_errors: u64,
    /// Number of times the software and hardware tables were found to differ
    pub inconsistencies: u64,
}

impl TableUsage {
    /// Initialize a TableUsage structure with the provided size
    pub fn new(size: u32) -> TableUsage {
        TableUsage {
            size,
            ..Default::default()
        }
    }
}

pub struct MacTable {
    entries: HashMap<FdbIndex, MacEntry>,
    max_entries: usize,
    idle_time: u32,
    usage: TableUsage,
}

impl MacTable {
    pub fn new(max_entries: usize, idle_time: u32) -> Self {
        let max_entries = normalize_max_entries(max_entries);
        MacTable {
            entries: HashMap::new(),
            max_entries,
            idle_time: normalize_idle_time(idle_time),
            usage: TableUsage::new(max_entries as u32),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn idle_time(&self) -> u32 {
        self.idle_time
    }

    pub fn usage(&self) -> &TableUsage {
        &self.usage
    }

    /// Returns the value actually applied.
    pub fn set_idle_time(&mut self, secs: u32) -> u32 {
        self.idle_time = normalize_idle_time(secs);
        self.idle_time
    }

    /// Returns the value actually applied.  Shrinking the limit below the
    /// current occupancy doesn't evict anything; it only blocks new inserts.
    pub fn set_max_entries(&mut self, n: usize) -> usize {
        self.max_entries = normalize_max_entries(n);
        self.usage.size = self.max_entries as u32;
        self.max_entries
    }

    fn sync_occupancy(&mut self) {
        self.usage.occupancy = self.entries.len() as u32;
    }

    pub fn lookup(&self, index: FdbIndex) -> Option<&MacEntry> {
        self.entries.get(&index)
    }

    pub fn lookup_by_vlan_mac(
        &self,
        vlan: VlanId,
        mac: MacAddr,
    ) -> Option<&MacEntry> {
        self.entries
            .values()
            .find(|e| e.vlan() == vlan && e.mac() == mac)
    }

    pub fn entries(&self) -> impl Iterator<Item = &MacEntry> {
        self.entries.values()
    }

    /// All occupied indices, in ascending order.
    pub fn indices(&self) -> Vec<FdbIndex> {
        let mut v: Vec<FdbIndex> = self.entries.keys().copied().collect();
        v.sort_unstable();
        v
    }

    /// Install `entry` in the hardware table and record it at the slot the
    /// hardware chose.  If the hardware relocated an existing entry to make
    /// room, the software copy of that entry is re-keyed to follow it.
    pub fn insert<H: FdbOps + ?Sized>(
        &mut self,
        hdl: &H,
        log: &Logger,
        entry: FdbEntry,
    ) -> FdbResult<FdbIndex> {
        if self.entries.len() >= self.max_entries {
            self.usage.exhaustion += 1;
            warn!(log, "unable to learn {entry}: table is full";
                "max_entries" => self.max_entries);
            return Err(FdbError::TableFull(format!(
                "mac learning ({} entries)",
                self.max_entries
            )));
        }

        let slot = hdl.fdb_add(&entry).map_err(|e| {
            self.usage.switch_errors += 1;
            error!(log, "unable to install {entry} in hardware: {e:?}");
            FdbError::from(e)
        })?;

        // Whatever the hardware just filled must have been empty, so a
        // software record at either slot means the two tables disagree.
        let conflict = if slot.relocated() {
            if !self.entries.contains_key(&slot.index) {
                Some(format!("no software entry displaced by {entry}"))
            } else if self.entries.contains_key(&slot.rehash_index) {
                Some(format!(
                    "software entry at slot {:#x} chosen for relocation",
                    slot.rehash_index
                ))
            } else {
                None
            }
        } else if self.entries.contains_key(&slot.index) {
            Some(format!(
                "software entry at slot {:#x} filled by {entry}",
                slot.index
            ))
        } else {
            None
        };
        if let Some(detail) = conflict {
            return Err(self.diverged(hdl, log, &entry, slot, detail));
        }

        if slot.relocated() {
            if let Some(mut displaced) = self.entries.remove(&slot.index) {
                debug!(log, "hardware relocated {}", displaced.fdb;
                    "from" => slot.index,
                    "to" => slot.rehash_index);
                displaced.index = slot.rehash_index;
                self.entries.insert(slot.rehash_index, displaced);
                self.usage.rehashes += 1;
            }
        }

        let new = MacEntry {
            fdb: entry,
            index: slot.index,
        };
        self.entries.insert(slot.index, new);
        self.usage.inserts += 1;
        self.sync_occupancy();
        info!(log, "learned {entry}"; "index" => slot.index);
        Ok(slot.index)
    }

    // The slots the hardware reported for `entry` don't match what we know
    // of them.  We can't tell what the hardware now holds at either slot, so
    // clear them both, along with any software records for them.  The
    // addresses involved are learned again on their next packet.
    fn diverged<H: FdbOps + ?Sized>(
        &mut self,
        hdl: &H,
        log: &Logger,
        entry: &FdbEntry,
        slot: aal::FdbSlot,
        detail: String,
    ) -> FdbError {
        self.usage.inconsistencies += 1;
        error!(log, "hardware and software disagree while adding {entry}: {detail}";
            "index" => slot.index,
            "rehash_index" => slot.rehash_index);

        let mut indices = vec![slot.index];
        if slot.relocated() {
            indices.push(slot.rehash_index);
        }
        for index in indices {
            if let Err(e) = hdl.fdb_remove_by_index(index) {
                self.usage.switch_errors += 1;
                error!(log, "unable to clear hardware slot: {e:?}";
                    "index" => index);
            }
            if let Some(stale) = self.entries.remove(&index) {
                error!(log, "discarding stale entry {}", stale.fdb;
                    "index" => index);
            }
        }
        self.sync_occupancy();

        FdbError::Inconsistent {
            index: slot.index,
            rehash_index: slot.rehash_index,
            detail,
        }
    }

    /// Remove the entry at `index` from both tables.  The software copy is
    /// removed even if the hardware refuses, and the hardware error is
    /// returned.
    pub fn expire<H: FdbOps + ?Sized>(
        &mut self,
        hdl: &H,
        log: &Logger,
        index: FdbIndex,
    ) -> FdbResult<MacEntry> {
        let entry = self
            .entries
            .remove(&index)
            .ok_or_else(|| FdbError::Missing(format!("fdb index {index:#x}")))?;
        self.usage.deletes += 1;
        self.sync_occupancy();

        match hdl.fdb_remove_by_index(index) {
            Ok(()) => {
                debug!(log, "expired {}", entry.fdb; "index" => index);
                Ok(entry)
            }
            Err(e) => {
                self.usage.switch_errors += 1;
                error!(log, "unable to remove {} from hardware: {e:?}",
                    entry.fdb; "index" => index);
                Err(e.into())
            }
        }
    }

    /// Point an existing entry at a new interface after its source address
    /// was seen arriving somewhere else.
    ///
    /// If we have no record of the entry the hardware found, the stray
    /// hardware entry is removed and the address stays unlearned until its
    /// next packet.  If the hardware rejects the update, the entry is expired
    /// altogether.
    pub fn relearn<H: FdbOps + ?Sized>(
        &mut self,
        hdl: &H,
        log: &Logger,
        index: FdbIndex,
        moved: &FdbEntry,
    ) -> FdbResult<()> {
        let Some(existing) = self.entries.get_mut(&index) else {
            self.usage.inconsistencies += 1;
            error!(log, "no software entry for moved {moved}"; "index" => index);
            if let Err(e) = hdl.fdb_remove(moved) {
                self.usage.switch_errors += 1;
                error!(log, "unable to remove stray {moved} from hardware: {e:?}";
                    "index" => index);
            }
            return Err(FdbError::Inconsistent {
                index,
                rehash_index: index,
                detail: format!("hardware entry for {moved} unknown to software"),
            });
        };

        let old_intf = existing.fdb.intf;
        existing.fdb.intf = moved.intf;
        let updated = existing.fdb;

        match hdl.fdb_write(index, &updated) {
            Ok(()) => {
                self.usage.moves += 1;
                info!(log, "moved {updated}"; "from_intf" => old_intf,
                    "index" => index);
                Ok(())
            }
            Err(e) => {
                self.usage.switch_errors += 1;
                error!(log, "unable to update {updated} in hardware: {e:?}";
                    "index" => index);
                // The expire error, if any, is logged there.
                let _ = self.expire(hdl, log, index);
                Err(e.into())
            }
        }
    }

    fn flush_matching<H, F>(&mut self, hdl: &H, log: &Logger, f: F) -> usize
    where
        H: FdbOps + ?Sized,
        F: Fn(&MacEntry) -> bool,
    {
        let victims: Vec<FdbIndex> = self
            .entries
            .values()
            .filter(|e| f(e))
            .map(|e| e.index)
            .collect();
        let count = victims.len();
        for index in victims {
            // Hardware failures were logged by expire, and the software copy
            // is gone either way.
            let _ = self.expire(hdl, log, index);
        }
        count
    }

    pub fn flush<H: FdbOps + ?Sized>(&mut self, hdl: &H, log: &Logger) -> usize {
        self.flush_matching(hdl, log, |_| true)
    }

    pub fn flush_by_intf<H: FdbOps + ?Sized>(
        &mut self,
        hdl: &H,
        log: &Logger,
        intf: IntfId,
    ) -> usize {
        self.flush_matching(hdl, log, |e| e.intf() == intf)
    }

    pub fn flush_by_vlan<H: FdbOps + ?Sized>(
        &mut self,
        hdl: &H,
        log: &Logger,
        vlan: VlanId,
    ) -> usize {
        self.flush_matching(hdl, log, |e| e.vlan() == vlan)
    }

    pub fn flush_by_vlan_intf_service<H: FdbOps + ?Sized>(
        &mut self,
        hdl: &H,
        log: &Logger,
        vlan: VlanId,
        intf: IntfId,
        service_id: u32,
    ) -> usize {
        self.flush_matching(hdl, log, |e| {
            e.vlan() == vlan && e.intf() == intf && e.service_id() == service_id
        })
    }
}
