// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The MAC learning table for a single switch device.
//!
//! The table is mutated from two directions: hardware notifications, which
//! arrive on the ASIC's threads and are applied by a dedicated event thread,
//! and control-plane requests, which run on the caller's thread.  Both go
//! through the same lock, so each mutation runs to completion before the next
//! begins.

use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use slog::{debug, error, info, o, warn, Logger};
use tokio::sync::{mpsc, watch};

use aal::{FdbIndex, FdbOps, IntfId, ReasonCode, VlanId};
use common::network::MacAddr;

use crate::dump::{self, IfaceNames};
use crate::types::{FdbError, FdbResult};
use crate::vlan::VlanLearning;

mod event;
mod table;

pub use event::{on_age, on_learn, Event, LearnData};
pub use table::{
    normalize_idle_time, normalize_max_entries, MacEntry, MacTable,
    TableUsage, DEFAULT_IDLE_TIME, DEFAULT_MAX_ENTRIES, MAX_IDLE_TIME,
    MAX_MAX_ENTRIES, MIN_IDLE_TIME, MIN_MAX_ENTRIES,
};

/// Default depth of the queue between the ASIC callbacks and the event thread.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Tunables for a learning table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    pub idle_time: u32,
    pub max_entries: usize,
    pub queue_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            idle_time: DEFAULT_IDLE_TIME,
            max_entries: DEFAULT_MAX_ENTRIES,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

// State shared between the owning `MacLearning` and its event thread.
pub(crate) struct Inner<H: FdbOps> {
    pub(crate) log: Logger,
    pub(crate) hdl: Arc<H>,
    vlans: Arc<dyn VlanLearning>,
    pub(crate) table: RwLock<MacTable>,
}

impl<H: FdbOps> Inner<H> {
    fn may_learn(&self, mac: MacAddr, vlan: VlanId) -> bool {
        self.vlans.is_learning_enabled(vlan) && !mac.is_multicast()
    }

    /// Apply a learning notification.
    ///
    /// The VLAN state is consulted before the table lock is taken, and the
    /// two locks are never held together.
    pub(crate) fn learn(&self, data: &LearnData) -> FdbResult<()> {
        if !self.may_learn(data.mac, data.vlan) {
            warn!(self.log, "not learning {} on vlan {}", data.mac, data.vlan;
                "intf" => data.intf);
            return Err(FdbError::NotLearnable {
                vlan: data.vlan,
                mac: data.mac,
            });
        }

        let reason = match ReasonCode::try_from(data.reason) {
            Ok(reason) => reason,
            Err(e) => {
                debug!(self.log, "ignoring learn notification: {e}";
                    "intf" => data.intf);
                return Ok(());
            }
        };
        let entry = data.entry();
        let hdl = &*self.hdl;
        let mut table = self.table.write().unwrap();

        match reason {
            ReasonCode::MacSaNew | ReasonCode::IvifSaMiss => {
                match hdl.fdb_find(&entry) {
                    Ok(None) => table.insert(hdl, &self.log, entry).map(|_| ()),
                    Ok(Some(index)) => Err(FdbError::Exists(format!(
                        "{entry} at index {index:#x}"
                    ))),
                    Err(e) => {
                        error!(self.log, "unable to look up {entry}: {e:?}");
                        Err(FdbError::Missing(format!("{entry}")))
                    }
                }
            }
            ReasonCode::MacSaMove => {
                let index = match hdl.fdb_find(&entry) {
                    Ok(Some(index)) => index,
                    Ok(None) => {
                        error!(self.log, "moved {entry} not in hardware");
                        return Err(FdbError::Missing(format!("{entry}")));
                    }
                    Err(e) => {
                        error!(self.log, "unable to look up {entry}: {e:?}");
                        return Err(FdbError::Missing(format!("{entry}")));
                    }
                };
                table.relearn(hdl, &self.log, index, &entry)
            }
        }
    }
}

/// A MAC learning table bound to one device's hardware FDB.
///
/// Dropping the table unregisters it from the ASIC, stops its event thread
/// and flushes every learned entry from the hardware.
pub struct MacLearning<H: FdbOps + 'static> {
    inner: Arc<Inner<H>>,
    tx: mpsc::Sender<Event>,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl<H: FdbOps + 'static> MacLearning<H> {
    /// Create a table and start learning.  Failing to register for the
    /// ASIC's notifications is fatal: without them the table would never
    /// learn anything.
    pub fn new(
        log: &Logger,
        hdl: Arc<H>,
        vlans: Arc<dyn VlanLearning>,
        settings: Settings,
    ) -> FdbResult<Self> {
        let log = log.new(o!("unit" => "mac_learning"));
        let table = MacTable::new(settings.max_entries, settings.idle_time);
        if let Err(e) = hdl.fdb_aging_time_set(table.idle_time()) {
            error!(log, "failed to set hardware aging time: {e:?}");
        }
        info!(log, "creating mac learning table";
            "idle_time" => table.idle_time(),
            "max_entries" => table.max_entries());

        let inner = Arc::new(Inner {
            log: log.clone(),
            hdl,
            vlans,
            table: RwLock::new(table),
        });
        let (tx, rx) = mpsc::channel(settings.queue_depth.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let thread_inner = inner.clone();
        let thread = std::thread::Builder::new()
            .name("fdb-events".into())
            .spawn(move || event::event_loop(thread_inner, rx, shutdown_rx))?;

        let mut ml = MacLearning {
            inner,
            tx,
            shutdown,
            thread: Some(thread),
        };

        let hdl = &ml.inner.hdl;
        let registered = hdl
            .register_learn_handler(event::learn_handler(&log, ml.tx.clone()))
            .and_then(|_| {
                hdl.register_aging_handler(event::aging_handler(
                    &log,
                    ml.tx.clone(),
                ))
                .inspect_err(|_| {
                    let _ = hdl.unregister_learn_handler();
                })
            });
        if let Err(e) = registered {
            error!(log, "failed to register fdb notification handlers: {e:?}");
            ml.stop_thread();
            return Err(e.into());
        }

        Ok(ml)
    }

    fn stop_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.shutdown.send(true);
            if thread.join().is_err() {
                error!(self.inner.log, "fdb event thread panicked");
            }
        }
    }

    /// Detach from the ASIC, stop the event thread and flush the table.  Any
    /// events still queued are discarded.
    pub fn shutdown(&mut self) {
        if self.thread.is_none() {
            return;
        }
        let log = &self.inner.log;
        if let Err(e) = self.inner.hdl.unregister_learn_handler() {
            error!(log, "could not unregister learn handler: {e:?}");
        }
        if let Err(e) = self.inner.hdl.unregister_aging_handler() {
            error!(log, "could not unregister aging handler: {e:?}");
        }
        self.stop_thread();
        let n = self.flush_all();
        info!(self.inner.log, "mac learning table destroyed";
            "flushed" => n);
    }

    pub fn hdl(&self) -> &H {
        &self.inner.hdl
    }

    pub fn may_learn(&self, mac: MacAddr, vlan: VlanId) -> bool {
        self.inner.may_learn(mac, vlan)
    }

    /// Apply a learning notification synchronously, on the caller's thread.
    /// Hardware notifications normally arrive through the event thread.
    #[doc(hidden)]
    pub fn learn(&self, data: &LearnData) -> FdbResult<()> {
        self.inner.learn(data)
    }

    pub fn lookup(&self, vlan: VlanId, mac: MacAddr) -> Option<MacEntry> {
        self.inner
            .table
            .read()
            .unwrap()
            .lookup_by_vlan_mac(vlan, mac)
            .copied()
    }

    pub fn lookup_by_index(&self, index: FdbIndex) -> Option<MacEntry> {
        self.inner.table.read().unwrap().lookup(index).copied()
    }

    /// Remove the entry at `index`.  An index with no entry is not an error:
    /// it has already been aged or flushed.
    pub fn age_by_index(&self, index: FdbIndex) -> FdbResult<()> {
        let mut table = self.inner.table.write().unwrap();
        if table.lookup(index).is_none() {
            return Ok(());
        }
        table
            .expire(&*self.inner.hdl, &self.inner.log, index)
            .map(|_| ())
    }

    pub fn age_by_vlan_mac(&self, vlan: VlanId, mac: MacAddr) -> FdbResult<()> {
        let mut table = self.inner.table.write().unwrap();
        let Some(index) = table.lookup_by_vlan_mac(vlan, mac).map(|e| e.index)
        else {
            warn!(self.inner.log, "no entry for {mac} on vlan {vlan}");
            return Err(FdbError::Missing(format!("{mac} on vlan {vlan}")));
        };
        table
            .expire(&*self.inner.hdl, &self.inner.log, index)
            .map(|_| ())
    }

    /// Each flush returns the number of entries removed.
    pub fn flush_all(&self) -> usize {
        self.inner
            .table
            .write()
            .unwrap()
            .flush(&*self.inner.hdl, &self.inner.log)
    }

    pub fn flush_by_intf(&self, intf: IntfId) -> usize {
        self.inner.table.write().unwrap().flush_by_intf(
            &*self.inner.hdl,
            &self.inner.log,
            intf,
        )
    }

    pub fn flush_by_vlan(&self, vlan: VlanId) -> usize {
        self.inner.table.write().unwrap().flush_by_vlan(
            &*self.inner.hdl,
            &self.inner.log,
            vlan,
        )
    }

    /// Remove the entries learned on `intf` for one overlay segment of a
    /// VLAN, as when that segment is torn down on the interface.
    pub fn flush_by_vlan_intf_service(
        &self,
        vlan: VlanId,
        intf: IntfId,
        service_id: u32,
    ) -> usize {
        self.inner
            .table
            .write()
            .unwrap()
            .flush_by_vlan_intf_service(
                &*self.inner.hdl,
                &self.inner.log,
                vlan,
                intf,
                service_id,
            )
    }

    /// Ask the event thread to flush an interface's entries, ordering the
    /// flush with any hardware events already queued.
    pub fn notify_port_down(&self, intf: IntfId) -> FdbResult<()> {
        event::post_retry(&self.inner.log, &self.tx, Event::PortDown(intf))
    }

    /// Ask the event thread to flush a VLAN's entries.
    pub fn notify_vlan_removed(&self, vlan: VlanId) -> FdbResult<()> {
        event::post_retry(&self.inner.log, &self.tx, Event::VlanRemoved(vlan))
    }

    /// Render the table as text, skipping entries on unnamed interfaces.
    pub fn dump(&self, names: &dyn IfaceNames) -> FdbResult<String> {
        let mut entries: Vec<MacEntry> =
            self.inner.table.read().unwrap().entries().copied().collect();
        entries.sort_by_key(|e| e.index);
        dump::render(&entries, names)
    }

    /// Returns the value actually applied, after clamping.
    pub fn set_idle_time(&self, secs: u32) -> u32 {
        let applied = self.inner.table.write().unwrap().set_idle_time(secs);
        if let Err(e) = self.inner.hdl.fdb_aging_time_set(applied) {
            error!(self.inner.log, "failed to set hardware aging time: {e:?}");
        }
        applied
    }

    /// Returns the value actually applied, after clamping.
    pub fn set_max_entries(&self, n: usize) -> usize {
        self.inner.table.write().unwrap().set_max_entries(n)
    }

    pub fn idle_time(&self) -> u32 {
        self.inner.table.read().unwrap().idle_time()
    }

    pub fn max_entries(&self) -> usize {
        self.inner.table.read().unwrap().max_entries()
    }

    pub fn len(&self) -> usize {
        self.inner.table.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn indices(&self) -> Vec<FdbIndex> {
        self.inner.table.read().unwrap().indices()
    }

    pub fn usage(&self) -> TableUsage {
        self.inner.table.read().unwrap().usage().clone()
    }
}

impl<H: FdbOps + 'static> Drop for MacLearning<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    use aal::{
        AgingHandler, AsicError, AsicResult, FdbEntry, FdbSlot, LearnHandler,
    };
    use asic::fdb_stub::{AsicConfig, StubHandle};
    use mockall::predicate;

    use crate::test_util::logger;
    use crate::vlan::{VlanInfo, VlanMgr};

    mockall::mock! {
        pub Fdb {}
        impl FdbOps for Fdb {
            fn fdb_size(&self) -> usize;
            fn fdb_add(&self, entry: &FdbEntry) -> AsicResult<FdbSlot>;
            fn fdb_remove_by_index(&self, index: FdbIndex) -> AsicResult<()>;
            fn fdb_remove(&self, entry: &FdbEntry) -> AsicResult<()>;
            fn fdb_find(&self, entry: &FdbEntry) -> AsicResult<Option<FdbIndex>>;
            fn fdb_write(&self, index: FdbIndex, entry: &FdbEntry) -> AsicResult<()>;
            fn fdb_aging_time_set(&self, secs: u32) -> AsicResult<()>;
            fn register_learn_handler(&self, handler: LearnHandler) -> AsicResult<()>;
            fn unregister_learn_handler(&self) -> AsicResult<()>;
            fn register_aging_handler(&self, handler: AgingHandler) -> AsicResult<()>;
            fn unregister_aging_handler(&self) -> AsicResult<()>;
        }
    }

    const SRC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];

    // A mock that accepts the calls made on every table's creation and
    // teardown.
    pub(crate) fn lifecycle_mock() -> MockFdb {
        let mut hdl = MockFdb::new();
        hdl.expect_fdb_aging_time_set().returning(|_| Ok(()));
        hdl.expect_register_learn_handler().returning(|_| Ok(()));
        hdl.expect_register_aging_handler().returning(|_| Ok(()));
        hdl.expect_unregister_learn_handler().returning(|| Ok(()));
        hdl.expect_unregister_aging_handler().returning(|| Ok(()));
        hdl
    }

    fn vlans(learning: &[(VlanId, bool)]) -> Arc<VlanMgr> {
        let mgr = VlanMgr::new(&logger());
        for (vlan, learning) in learning {
            mgr.add(*vlan, VlanInfo {
                learning: *learning,
            })
            .unwrap();
        }
        Arc::new(mgr)
    }

    fn stub_table(size: usize) -> MacLearning<StubHandle> {
        let log = logger();
        let hdl =
            Arc::new(StubHandle::new(&log, &AsicConfig { fdb_size: size }).unwrap());
        MacLearning::new(
            &log,
            hdl,
            vlans(&[(10, true), (20, false)]),
            Settings::default(),
        )
        .unwrap()
    }

    fn learn_data(reason: ReasonCode, intf: IntfId) -> LearnData {
        LearnData {
            intf,
            reason: reason.into(),
            vlan: 10,
            mac: MacAddr::from(SRC),
            service_id: 0,
        }
    }

    fn frame(src: MacAddr) -> Vec<u8> {
        let mut f = vec![0xff; 6];
        f.extend_from_slice(&<[u8; 6]>::from(src));
        f.extend_from_slice(&[0x08, 0x00]);
        f
    }

    fn wait_for<F: Fn() -> bool>(f: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_may_learn() {
        let ml = stub_table(64);
        let unicast = MacAddr::from(SRC);
        assert!(ml.may_learn(unicast, 10));
        // learning disabled
        assert!(!ml.may_learn(unicast, 20));
        // unknown vlan
        assert!(!ml.may_learn(unicast, 30));
        assert!(!ml.may_learn(MacAddr::BROADCAST, 10));
        assert!(!ml.may_learn(MacAddr::new(0x01, 0, 0x5e, 0, 0, 1), 10));
        for _ in 0..100 {
            let mac = MacAddr::random();
            assert_eq!(ml.may_learn(mac, 10), !mac.is_multicast());
            assert!(!ml.may_learn(mac, 20));
        }
    }

    #[test]
    fn test_learn_new() {
        let ml = stub_table(64);
        ml.learn(&learn_data(ReasonCode::MacSaNew, 5)).unwrap();
        let e = ml.lookup(10, MacAddr::from(SRC)).unwrap();
        assert_eq!(e.intf(), 5);
        assert_eq!(ml.lookup_by_index(e.index), Some(e));
        assert_eq!(ml.indices(), ml.hdl().occupied());

        // A repeat finds it already in hardware
        assert!(matches!(
            ml.learn(&learn_data(ReasonCode::IvifSaMiss, 5)),
            Err(FdbError::Exists(_))
        ));
        assert_eq!(ml.len(), 1);
    }

    #[test]
    fn test_learn_gated() {
        let ml = stub_table(64);
        let mut data = learn_data(ReasonCode::MacSaNew, 5);
        data.vlan = 20;
        assert!(matches!(
            ml.learn(&data),
            Err(FdbError::NotLearnable { vlan: 20, .. })
        ));

        // A move doesn't get to skip the check either
        let mut data = learn_data(ReasonCode::MacSaMove, 5);
        data.mac = MacAddr::BROADCAST;
        assert!(matches!(ml.learn(&data), Err(FdbError::NotLearnable { .. })));

        assert!(ml.is_empty());
        assert!(ml.hdl().occupied().is_empty());
    }

    #[test]
    fn test_learn_unknown_reason() {
        let ml = stub_table(64);
        let mut data = learn_data(ReasonCode::MacSaNew, 5);
        data.reason = 99;
        ml.learn(&data).unwrap();
        assert!(ml.is_empty());
    }

    #[test]
    fn test_learn_lookup_failure() {
        let mut hdl = lifecycle_mock();
        hdl.expect_fdb_find()
            .returning(|_| Err(AsicError::Internal("busted".into())));
        hdl.expect_fdb_add().never();
        let ml = MacLearning::new(
            &logger(),
            Arc::new(hdl),
            vlans(&[(10, true)]),
            Settings::default(),
        )
        .unwrap();
        assert!(matches!(
            ml.learn(&learn_data(ReasonCode::MacSaNew, 5)),
            Err(FdbError::Missing(_))
        ));
        assert!(matches!(
            ml.learn(&learn_data(ReasonCode::MacSaMove, 5)),
            Err(FdbError::Missing(_))
        ));
    }

    // A move updates only the interface, with a single write to the slot the
    // hardware reports.
    #[test]
    fn test_learn_move() {
        let mut hdl = lifecycle_mock();
        hdl.expect_fdb_find().once().returning(|_| Ok(None));
        hdl.expect_fdb_add()
            .once()
            .returning(|_| Ok(FdbSlot::direct(3)));
        hdl.expect_fdb_find().returning(|_| Ok(Some(3)));
        let expected = FdbEntry::new(10, MacAddr::from(SRC), 9);
        hdl.expect_fdb_write()
            .with(predicate::eq(3), predicate::eq(expected))
            .times(1)
            .returning(|_, _| Ok(()));
        hdl.expect_fdb_remove_by_index().returning(|_| Ok(()));

        let ml = MacLearning::new(
            &logger(),
            Arc::new(hdl),
            vlans(&[(10, true)]),
            Settings::default(),
        )
        .unwrap();
        ml.learn(&learn_data(ReasonCode::MacSaNew, 5)).unwrap();
        let before = ml.lookup_by_index(3).unwrap();

        ml.learn(&learn_data(ReasonCode::MacSaMove, 9)).unwrap();
        let after = ml.lookup_by_index(3).unwrap();
        assert_eq!(after.intf(), 9);
        assert_eq!(
            after.fdb,
            FdbEntry {
                intf: 9,
                ..before.fdb
            }
        );
        assert_eq!(after.index, before.index);
        assert_eq!(ml.usage().moves, 1);
    }

    // A move for an address the hardware doesn't hold is refused without
    // touching either table.
    #[test]
    fn test_move_not_in_hardware() {
        let mut hdl = lifecycle_mock();
        hdl.expect_fdb_find().once().returning(|_| Ok(None));
        hdl.expect_fdb_add()
            .once()
            .returning(|_| Ok(FdbSlot::direct(3)));
        hdl.expect_fdb_find().once().returning(|_| Ok(None));
        hdl.expect_fdb_write().never();
        hdl.expect_fdb_remove().never();
        // Only the flush at teardown
        hdl.expect_fdb_remove_by_index()
            .with(predicate::eq(3))
            .once()
            .returning(|_| Ok(()));

        let ml = MacLearning::new(
            &logger(),
            Arc::new(hdl),
            vlans(&[(10, true)]),
            Settings::default(),
        )
        .unwrap();
        ml.learn(&learn_data(ReasonCode::MacSaNew, 5)).unwrap();
        let before = ml.lookup_by_index(3).unwrap();

        assert!(matches!(
            ml.learn(&learn_data(ReasonCode::MacSaMove, 9)),
            Err(FdbError::Missing(_))
        ));
        assert_eq!(ml.indices(), vec![3]);
        assert_eq!(ml.lookup_by_index(3), Some(before));
        assert_eq!(ml.usage().moves, 0);
        assert_eq!(ml.usage().inserts, 1);
    }

    #[test]
    fn test_move_unknown_entry() {
        let ml = stub_table(64);
        // Put an entry in hardware behind the table's back
        let stray = FdbEntry::new(10, MacAddr::from(SRC), 5);
        ml.hdl().fdb_add(&stray).unwrap();

        assert!(matches!(
            ml.learn(&learn_data(ReasonCode::MacSaMove, 9)),
            Err(FdbError::Inconsistent { .. })
        ));
        // The stray is gone, and nothing was learned in its place
        assert!(ml.hdl().occupied().is_empty());
        assert!(ml.is_empty());
    }

    #[test]
    fn test_age() {
        let ml = stub_table(64);
        ml.learn(&learn_data(ReasonCode::MacSaNew, 5)).unwrap();
        let idx = ml.lookup(10, MacAddr::from(SRC)).unwrap().index;

        assert!(matches!(
            ml.age_by_vlan_mac(11, MacAddr::from(SRC)),
            Err(FdbError::Missing(_))
        ));
        ml.age_by_vlan_mac(10, MacAddr::from(SRC)).unwrap();
        assert!(ml.lookup_by_index(idx).is_none());
        assert!(ml.hdl().occupied().is_empty());

        // Already gone
        ml.age_by_index(idx).unwrap();
    }

    #[test]
    fn test_settings() {
        let log = logger();
        let hdl =
            Arc::new(StubHandle::new(&log, &AsicConfig { fdb_size: 64 }).unwrap());
        let ml = MacLearning::new(
            &log,
            hdl,
            vlans(&[]),
            Settings {
                idle_time: 5,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ml.idle_time(), 15);
        assert_eq!(ml.hdl().aging_time(), 15);

        assert_eq!(ml.set_idle_time(10000), 3600);
        assert_eq!(ml.idle_time(), 3600);
        assert_eq!(ml.hdl().aging_time(), 3600);

        assert_eq!(ml.set_max_entries(3), 10);
        assert_eq!(ml.set_max_entries(5_000_000), 1_000_000);
        assert_eq!(ml.usage().size, 1_000_000);
    }

    #[test]
    fn test_registration_failure() {
        let mut hdl = MockFdb::new();
        hdl.expect_fdb_aging_time_set().returning(|_| Ok(()));
        hdl.expect_register_learn_handler().once().returning(|_| Ok(()));
        hdl.expect_register_aging_handler()
            .once()
            .returning(|_| Err(AsicError::HandlerBusy("aging".into())));
        hdl.expect_unregister_learn_handler()
            .once()
            .returning(|| Ok(()));
        hdl.expect_unregister_aging_handler().never();

        let r = MacLearning::new(
            &logger(),
            Arc::new(hdl),
            vlans(&[]),
            Settings::default(),
        );
        assert!(matches!(
            r,
            Err(FdbError::Switch(AsicError::HandlerBusy(_)))
        ));
    }

    // Notifications fired by the "hardware" are applied by the event thread.
    #[test]
    fn test_events() {
        let ml = stub_table(64);
        let hdl = ml.hdl();
        let mac = MacAddr::from(SRC);

        hdl.inject_learn(5, ReasonCode::MacSaNew.into(), 10, &frame(mac))
            .unwrap();
        assert!(wait_for(|| ml.lookup(10, mac).is_some()));

        hdl.inject_learn(7, ReasonCode::MacSaMove.into(), 10, &frame(mac))
            .unwrap();
        assert!(wait_for(|| ml.lookup(10, mac).map(|e| e.intf()) == Some(7)));

        let idx = ml.lookup(10, mac).unwrap().index;
        hdl.inject_age(idx).unwrap();
        assert!(wait_for(|| ml.is_empty()));
        assert!(hdl.occupied().is_empty());

        // Short frames are refused at the callback
        assert!(hdl.inject_learn(5, 1, 10, &[0u8; 8]).is_err());
    }

    #[test]
    fn test_notify() {
        let ml = stub_table(64);
        let hdl = ml.hdl();
        for i in 0..6u8 {
            let mac = MacAddr::new(0xaa, 0, 0, 0, 0, i + 1);
            let intf = if i % 2 == 0 { 1 } else { 2 };
            hdl.inject_learn(intf, 1, 10, &frame(mac)).unwrap();
        }
        assert!(wait_for(|| ml.len() == 6));

        ml.notify_port_down(1).unwrap();
        assert!(wait_for(|| ml.len() == 3));
        assert_eq!(ml.flush_by_intf(1), 0);

        ml.notify_vlan_removed(10).unwrap();
        assert!(wait_for(|| ml.is_empty()));
        assert!(hdl.occupied().is_empty());
    }

    #[test]
    fn test_teardown() {
        let log = logger();
        let hdl =
            Arc::new(StubHandle::new(&log, &AsicConfig { fdb_size: 64 }).unwrap());
        let mut ml = MacLearning::new(
            &log,
            hdl.clone(),
            vlans(&[(10, true)]),
            Settings::default(),
        )
        .unwrap();
        ml.learn(&learn_data(ReasonCode::MacSaNew, 5)).unwrap();
        assert!(hdl.learn_registered());
        assert!(hdl.aging_registered());
        assert_eq!(hdl.occupied().len(), 1);

        ml.shutdown();
        assert!(!hdl.learn_registered());
        assert!(!hdl.aging_registered());
        assert!(hdl.occupied().is_empty());
        assert!(ml.notify_port_down(5).is_err());

        // Idempotent, including the implicit shutdown on drop
        ml.shutdown();
        drop(ml);
        assert!(hdl.inject_age(0).is_err());
    }

    #[test]
    fn test_dump() {
        let ml = stub_table(64);
        ml.learn(&learn_data(ReasonCode::MacSaNew, 5)).unwrap();
        let mut names = BTreeMap::new();
        names.insert(5u32, "eth5".to_string());
        let text = ml.dump(&names).unwrap();
        let idx = ml.lookup(10, MacAddr::from(SRC)).unwrap().index;
        assert!(text.contains(&format!("{idx:#x}")));
        assert!(text.contains("eth5"));

        // Unnamed interfaces are left out
        let empty: BTreeMap<IntfId, String> = BTreeMap::new();
        assert_eq!(ml.dump(&empty).unwrap().lines().count(), 1);
    }
}
