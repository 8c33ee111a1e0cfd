// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Learning against an ASIC whose table operations fail at random.  The
//! software table may lose entries, but it must never claim a slot the
//! hardware doesn't hold.

#![cfg(feature = "chaos")]

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::prelude::*;
use slog::{o, Drain};

use aal::{FdbEntry, FdbIndex, FdbOps, ReasonCode};
use asic::chaos::{AsicConfig, Handle};
use common::network::MacAddr;
use fdbd::learning::{LearnData, Settings};
use fdbd::vlan::{VlanInfo, VlanLearning, VlanMgr};
use fdbd::{FdbError, MacLearning};

fn logger() -> slog::Logger {
    let dec = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(dec).build().fuse();
    slog::Logger::root(drain, o!())
}

fn table(config: &AsicConfig) -> MacLearning<Handle> {
    let log = logger();
    let hdl = Arc::new(Handle::new(&log, config).unwrap());
    let vlans = Arc::new(VlanMgr::new(&log));
    for vlan in 1..=4 {
        vlans.add(vlan, VlanInfo::default()).unwrap();
    }
    let learning: Arc<dyn VlanLearning> = vlans;
    MacLearning::new(&log, hdl, learning, Settings::default()).unwrap()
}

// Every slot the software table records must hold the same entry in
// hardware.  The hardware may hold strays whose removal failed.
fn assert_subset(ml: &MacLearning<Handle>) {
    let hw: BTreeSet<FdbIndex> = ml.hdl().occupied().into_iter().collect();
    for index in ml.indices() {
        assert!(hw.contains(&index), "index {index:#x} not in hardware");
        let e = ml.lookup_by_index(index).unwrap();
        assert_eq!(ml.hdl().entry_at(index), Some(e.fdb));
    }
}

#[test]
fn test_learn_under_chaos() {
    let ml = table(&AsicConfig::uniform(128, 0.2));
    let mut rng = rand::thread_rng();
    let macs: Vec<MacAddr> =
        (0..48).map(|_| MacAddr::random_unicast()).collect();

    for _ in 0..2000 {
        let mac = macs[rng.gen_range(0..macs.len())];
        let vlan = rng.gen_range(1..=4);
        let reason = if rng.gen_bool(0.3) {
            ReasonCode::MacSaMove
        } else {
            ReasonCode::MacSaNew
        };
        let data = LearnData {
            intf: rng.gen_range(1..8),
            reason: reason.into(),
            vlan,
            mac,
            service_id: 0,
        };
        match ml.learn(&data) {
            Ok(())
            | Err(FdbError::Exists(_))
            | Err(FdbError::Missing(_))
            | Err(FdbError::Switch(_))
            | Err(FdbError::Inconsistent { .. }) => {}
            Err(e) => panic!("unexpected error: {e:?}"),
        }

        if rng.gen_bool(0.1) {
            let indices = ml.indices();
            if let Some(index) = indices.choose(&mut rng) {
                // A hardware failure still drops the software entry
                let _ = ml.age_by_index(*index);
                assert!(ml.lookup_by_index(*index).is_none());
            }
        }
        assert_subset(&ml);
    }

    ml.flush_all();
    assert!(ml.is_empty());
}

// Only removals fail, so the hardware accumulates strays the software has
// forgotten.  New entries that collide with them must still be reconciled.
#[test]
fn test_stray_entries() {
    let mut config = AsicConfig::default();
    config.stub.fdb_size = 64;
    config.fdb_remove_by_index.set(0.5);
    let ml = table(&config);

    for i in 0..400u64 {
        let mac = MacAddr::from(0x0200_0000_0000 + (i % 80));
        let entry = FdbEntry::new(1, mac, 1);
        if ml.hdl().fdb_find(&entry).unwrap().is_some() {
            continue;
        }
        let data = LearnData {
            intf: 1,
            reason: ReasonCode::MacSaNew.into(),
            vlan: 1,
            mac,
            service_id: 0,
        };
        let _ = ml.learn(&data);
        if i % 3 == 0 {
            ml.flush_all();
        }
        assert_subset(&ml);
    }
}
