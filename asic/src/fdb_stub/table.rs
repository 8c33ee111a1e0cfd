// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A software model of a bucketed cuckoo hash table, laid out the way the
//! hardware L2 table is: `buckets` rows of `WAYS` slots, with the slot index
//! being `bucket * WAYS + way`.  Every key may live in either of two buckets.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;

use aal::{AsicError, AsicResult, FdbEntry, FdbIndex, FdbSlot};

/// Number of slots in each bucket.
pub const WAYS: usize = 4;

pub(crate) struct FdbTable {
    buckets: usize,
    slots: Vec<Option<FdbEntry>>,
}

impl FdbTable {
    pub fn new(size: usize) -> AsicResult<Self> {
        if size < 2 * WAYS || size % WAYS != 0 {
            return Err(AsicError::InvalidArg(format!(
                "fdb size {size} must be a multiple of {WAYS}, at least {}",
                2 * WAYS
            )));
        }
        if FdbIndex::try_from(size).is_err() {
            return Err(AsicError::InvalidArg(format!(
                "fdb size {size} too large"
            )));
        }
        Ok(FdbTable {
            buckets: size / WAYS,
            slots: vec![None; size],
        })
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    fn hash(entry: &FdbEntry, salt: u8) -> u64 {
        let mut h = DefaultHasher::new();
        salt.hash(&mut h);
        entry.vlan.hash(&mut h);
        entry.mac.hash(&mut h);
        h.finish()
    }

    /// The two buckets `entry` may be stored in.  They are always distinct.
    pub fn candidates(&self, entry: &FdbEntry) -> (usize, usize) {
        let b1 = (Self::hash(entry, 0) % self.buckets as u64) as usize;
        let mut b2 = (Self::hash(entry, 1) % self.buckets as u64) as usize;
        if b1 == b2 {
            b2 = (b1 + 1) % self.buckets;
        }
        (b1, b2)
    }

    fn alternate(&self, entry: &FdbEntry, bucket: usize) -> usize {
        let (b1, b2) = self.candidates(entry);
        if b1 == bucket {
            b2
        } else {
            b1
        }
    }

    fn slot_range(bucket: usize) -> std::ops::Range<usize> {
        bucket * WAYS..(bucket + 1) * WAYS
    }

    fn free_slot(&self, bucket: usize) -> Option<usize> {
        Self::slot_range(bucket).find(|i| self.slots[*i].is_none())
    }

    fn check_index(&self, index: FdbIndex) -> AsicResult<usize> {
        let i = index as usize;
        if i >= self.slots.len() {
            Err(AsicError::InvalidArg(format!(
                "fdb index {index} out of range"
            )))
        } else {
            Ok(i)
        }
    }

    pub fn find(&self, entry: &FdbEntry) -> Option<FdbIndex> {
        let (b1, b2) = self.candidates(entry);
        Self::slot_range(b1)
            .chain(Self::slot_range(b2))
            .find(|i| match &self.slots[*i] {
                Some(e) => e.same_key(entry),
                None => false,
            })
            .map(|i| i as FdbIndex)
    }

    /// Install `entry`.  If both candidate buckets are full, try to make room
    /// by moving one occupant of the primary bucket to its alternate bucket.
    pub fn add(&mut self, entry: &FdbEntry) -> AsicResult<FdbSlot> {
        if self.find(entry).is_some() {
            return Err(AsicError::Exists);
        }

        let (b1, b2) = self.candidates(entry);
        for bucket in [b1, b2] {
            if let Some(i) = self.free_slot(bucket) {
                self.slots[i] = Some(*entry);
                return Ok(FdbSlot::direct(i as FdbIndex));
            }
        }

        for vacated in Self::slot_range(b1) {
            let Some(occupant) = self.slots[vacated] else {
                continue;
            };
            let alt = self.alternate(&occupant, b1);
            if let Some(dest) = self.free_slot(alt) {
                self.slots[dest] = Some(occupant);
                self.slots[vacated] = Some(*entry);
                return Ok(FdbSlot {
                    index: vacated as FdbIndex,
                    rehash_index: dest as FdbIndex,
                });
            }
        }

        Err(AsicError::NoSpace(format!(
            "fdb buckets {b1} and {b2} for {entry}"
        )))
    }

    pub fn remove_at(&mut self, index: FdbIndex) -> AsicResult<FdbEntry> {
        let i = self.check_index(index)?;
        self.slots[i]
            .take()
            .ok_or_else(|| AsicError::Missing(format!("fdb index {index}")))
    }

    pub fn remove(&mut self, entry: &FdbEntry) -> AsicResult<FdbIndex> {
        let index = self
            .find(entry)
            .ok_or_else(|| AsicError::Missing(format!("fdb entry {entry}")))?;
        self.slots[index as usize] = None;
        Ok(index)
    }

    /// Overwrite the result fields of the entry at `index`.  The key cannot
    /// change, since it determines which buckets the entry may occupy.
    pub fn write(&mut self, index: FdbIndex, entry: &FdbEntry) -> AsicResult<()> {
        let i = self.check_index(index)?;
        match &mut self.slots[i] {
            None => Err(AsicError::Missing(format!("fdb index {index}"))),
            Some(e) if !e.same_key(entry) => Err(AsicError::InvalidArg(
                format!("fdb index {index} holds {e}, not {entry}"),
            )),
            Some(e) => {
                *e = *entry;
                Ok(())
            }
        }
    }

    pub fn get(&self, index: FdbIndex) -> Option<FdbEntry> {
        self.slots.get(index as usize).copied().flatten()
    }

    pub fn occupied(&self) -> Vec<FdbIndex> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.map(|_| i as FdbIndex))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::network::MacAddr;

    fn entry(vlan: u16) -> FdbEntry {
        FdbEntry::new(vlan, MacAddr::random_unicast(), 1)
    }

    // Every stored entry must live in one of its two candidate buckets, and
    // lookups must find it where it lives.
    fn check_placement(t: &FdbTable) {
        for idx in t.occupied() {
            let e = t.get(idx).unwrap();
            let (b1, b2) = t.candidates(&e);
            let bucket = idx as usize / WAYS;
            assert!(bucket == b1 || bucket == b2, "{e} in bucket {bucket}");
            assert_eq!(t.find(&e), Some(idx));
        }
    }

    #[test]
    fn test_bad_size() {
        assert!(FdbTable::new(0).is_err());
        assert!(FdbTable::new(4).is_err());
        assert!(FdbTable::new(10).is_err());
        assert!(FdbTable::new(8).is_ok());
    }

    #[test]
    fn test_add_find_remove() {
        let mut t = FdbTable::new(64).unwrap();
        let e = entry(10);
        let slot = t.add(&e).unwrap();
        assert!(!slot.relocated());
        assert_eq!(t.find(&e), Some(slot.index));
        assert!(matches!(t.add(&e), Err(AsicError::Exists)));

        // Same MAC on a different VLAN is a different key
        let other = FdbEntry { vlan: 11, ..e };
        assert!(t.add(&other).is_ok());

        assert_eq!(t.remove(&e).unwrap(), slot.index);
        assert_eq!(t.find(&e), None);
        assert!(matches!(t.remove(&e), Err(AsicError::Missing(_))));
        assert!(matches!(
            t.remove_at(slot.index),
            Err(AsicError::Missing(_))
        ));
        assert!(matches!(t.remove_at(64), Err(AsicError::InvalidArg(_))));
    }

    #[test]
    fn test_write() {
        let mut t = FdbTable::new(64).unwrap();
        let e = entry(10);
        let idx = t.add(&e).unwrap().index;

        let moved = FdbEntry { intf: 7, ..e };
        t.write(idx, &moved).unwrap();
        assert_eq!(t.get(idx).unwrap().intf, 7);

        // The key can't be rewritten in place
        assert!(t.write(idx, &entry(10)).is_err());
        t.remove_at(idx).unwrap();
        assert!(matches!(t.write(idx, &moved), Err(AsicError::Missing(_))));
    }

    #[test]
    fn test_fill_and_relocate() {
        let mut relocations = 0;
        for _ in 0..20 {
            let mut t = FdbTable::new(32).unwrap();
            let mut failures = 0;
            while failures < 50 {
                let before: Vec<Option<FdbEntry>> =
                    (0..32).map(|i| t.get(i)).collect();
                let e = entry(1);
                match t.add(&e) {
                    Ok(slot) if slot.relocated() => {
                        relocations += 1;
                        let displaced = before[slot.index as usize].unwrap();
                        assert_eq!(t.get(slot.index), Some(e));
                        assert_eq!(t.get(slot.rehash_index), Some(displaced));
                        assert!(before[slot.rehash_index as usize].is_none());
                    }
                    Ok(slot) => {
                        assert!(before[slot.index as usize].is_none());
                        assert_eq!(t.get(slot.index), Some(e));
                    }
                    Err(AsicError::NoSpace(_)) => failures += 1,
                    Err(e) => panic!("unexpected error: {e:?}"),
                }
                check_placement(&t);
            }
            assert!(t.occupied().len() <= 32);
        }
        assert!(relocations > 0);
    }
}
