// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use slog::{debug, info, o, Logger};

use aal::{
    AgingHandler, AsicError, AsicResult, FdbEntry, FdbIndex, FdbOps, FdbSlot,
    IntfId, LearnHandler,
};

mod table;
pub use table::WAYS;

/// Number of slots in the stub's forwarding table unless configured otherwise.
pub const DEFAULT_FDB_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AsicConfig {
    /// Number of slots in the forwarding table
    pub fdb_size: usize,
}

impl Default for AsicConfig {
    fn default() -> Self {
        AsicConfig {
            fdb_size: DEFAULT_FDB_SIZE,
        }
    }
}

/// An in-memory model of the switch's L2 forwarding table.  Besides the
/// `FdbOps` the learning daemon drives, it lets a caller play the part of the
/// hardware by firing the registered learn and aging notifications.
pub struct StubHandle {
    log: Logger,
    fdb: Mutex<table::FdbTable>,
    aging_secs: AtomicU32,
    learn_handler: Mutex<Option<LearnHandler>>,
    aging_handler: Mutex<Option<AgingHandler>>,
}

impl StubHandle {
    pub fn new(log: &Logger, config: &AsicConfig) -> AsicResult<Self> {
        let log = log.new(o!("unit" => "fdb_stub"));
        let fdb = table::FdbTable::new(config.fdb_size)?;
        info!(log, "stub fdb initialized"; "size" => config.fdb_size);
        Ok(StubHandle {
            log,
            fdb: Mutex::new(fdb),
            aging_secs: AtomicU32::new(0),
            learn_handler: Mutex::new(None),
            aging_handler: Mutex::new(None),
        })
    }

    /// Stub ASICs always report as a model.
    pub fn is_model(&self) -> bool {
        true
    }

    pub fn fini(&self) {
        let _ = self.learn_handler.lock().unwrap().take();
        let _ = self.aging_handler.lock().unwrap().take();
    }

    /// The most recently programmed aging interval, or 0 if none.
    pub fn aging_time(&self) -> u32 {
        self.aging_secs.load(Ordering::Relaxed)
    }

    /// Indices of every occupied slot, in ascending order.
    pub fn occupied(&self) -> Vec<FdbIndex> {
        self.fdb.lock().unwrap().occupied()
    }

    pub fn entry_at(&self, index: FdbIndex) -> Option<FdbEntry> {
        self.fdb.lock().unwrap().get(index)
    }

    pub fn learn_registered(&self) -> bool {
        self.learn_handler.lock().unwrap().is_some()
    }

    pub fn aging_registered(&self) -> bool {
        self.aging_handler.lock().unwrap().is_some()
    }

    /// Deliver a learning notification, as the pipeline would when punting a
    /// packet with an unknown or moved source address.
    pub fn inject_learn(
        &self,
        intf: IntfId,
        reason: u32,
        segment: u32,
        payload: &[u8],
    ) -> AsicResult<()> {
        // Don't hold the lock across the callback, so the handler may
        // unregister itself.
        let handler = self.learn_handler.lock().unwrap().clone();
        match handler {
            Some(h) => h(intf, reason, segment, payload),
            None => Err(AsicError::Uninitialized(
                "no learn handler registered".into(),
            )),
        }
    }

    /// Deliver an aging notification for the entry at `index`.
    pub fn inject_age(&self, index: FdbIndex) -> AsicResult<()> {
        let handler = self.aging_handler.lock().unwrap().clone();
        match handler {
            Some(h) => {
                h(index);
                Ok(())
            }
            None => Err(AsicError::Uninitialized(
                "no aging handler registered".into(),
            )),
        }
    }
}

impl FdbOps for StubHandle {
    fn fdb_size(&self) -> usize {
        self.fdb.lock().unwrap().size()
    }

    fn fdb_add(&self, entry: &FdbEntry) -> AsicResult<FdbSlot> {
        let slot = self.fdb.lock().unwrap().add(entry)?;
        debug!(self.log, "added {entry}";
            "index" => slot.index,
            "rehash_index" => slot.rehash_index);
        Ok(slot)
    }

    fn fdb_remove_by_index(&self, index: FdbIndex) -> AsicResult<()> {
        let entry = self.fdb.lock().unwrap().remove_at(index)?;
        debug!(self.log, "removed {entry}"; "index" => index);
        Ok(())
    }

    fn fdb_remove(&self, entry: &FdbEntry) -> AsicResult<()> {
        let index = self.fdb.lock().unwrap().remove(entry)?;
        debug!(self.log, "removed {entry}"; "index" => index);
        Ok(())
    }

    fn fdb_find(&self, entry: &FdbEntry) -> AsicResult<Option<FdbIndex>> {
        Ok(self.fdb.lock().unwrap().find(entry))
    }

    fn fdb_write(&self, index: FdbIndex, entry: &FdbEntry) -> AsicResult<()> {
        self.fdb.lock().unwrap().write(index, entry)
    }

    fn fdb_aging_time_set(&self, secs: u32) -> AsicResult<()> {
        self.aging_secs.store(secs, Ordering::Relaxed);
        Ok(())
    }

    fn register_learn_handler(&self, handler: LearnHandler) -> AsicResult<()> {
        let mut h = self.learn_handler.lock().unwrap();
        if h.is_some() {
            return Err(AsicError::HandlerBusy("learn".into()));
        }
        *h = Some(handler);
        info!(self.log, "learn handler registered");
        Ok(())
    }

    fn unregister_learn_handler(&self) -> AsicResult<()> {
        match self.learn_handler.lock().unwrap().take() {
            Some(_) => {
                info!(self.log, "learn handler unregistered");
                Ok(())
            }
            None => Err(AsicError::Missing("learn handler".into())),
        }
    }

    fn register_aging_handler(&self, handler: AgingHandler) -> AsicResult<()> {
        let mut h = self.aging_handler.lock().unwrap();
        if h.is_some() {
            return Err(AsicError::HandlerBusy("aging".into()));
        }
        *h = Some(handler);
        info!(self.log, "aging handler registered");
        Ok(())
    }

    fn unregister_aging_handler(&self) -> AsicResult<()> {
        match self.aging_handler.lock().unwrap().take() {
            Some(_) => {
                info!(self.log, "aging handler unregistered");
                Ok(())
            }
            None => Err(AsicError::Missing("aging handler".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use common::network::MacAddr;
    use slog::Drain;

    fn test_logger() -> Logger {
        let dec =
            slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
        let drain = slog_term::FullFormat::new(dec).build().fuse();
        Logger::root(drain, o!())
    }

    fn stub(size: usize) -> StubHandle {
        StubHandle::new(&test_logger(), &AsicConfig { fdb_size: size })
            .unwrap()
    }

    #[test]
    fn test_ops() {
        let hdl = stub(64);
        assert_eq!(hdl.fdb_size(), 64);

        let e = FdbEntry::new(10, MacAddr::random_unicast(), 3);
        let idx = hdl.fdb_add(&e).unwrap().index;
        assert_eq!(hdl.fdb_find(&e).unwrap(), Some(idx));
        assert_eq!(hdl.occupied(), vec![idx]);

        hdl.fdb_write(idx, &FdbEntry { intf: 4, ..e }).unwrap();
        assert_eq!(hdl.entry_at(idx).unwrap().intf, 4);

        hdl.fdb_remove(&e).unwrap();
        assert_eq!(hdl.fdb_find(&e).unwrap(), None);
        assert!(hdl.fdb_remove_by_index(idx).is_err());
        assert!(hdl.occupied().is_empty());

        hdl.fdb_aging_time_set(300).unwrap();
        assert_eq!(hdl.aging_time(), 300);
    }

    #[test]
    fn test_handlers() {
        let hdl = stub(64);
        assert!(hdl.inject_age(0).is_err());
        assert!(hdl.inject_learn(1, 1, 1, &[]).is_err());

        let aged = Arc::new(AtomicUsize::new(0));
        let a = aged.clone();
        hdl.register_aging_handler(Arc::new(move |idx| {
            a.fetch_add(idx as usize, Ordering::SeqCst);
        }))
        .unwrap();
        assert!(matches!(
            hdl.register_aging_handler(Arc::new(|_| {})),
            Err(AsicError::HandlerBusy(_))
        ));
        hdl.inject_age(7).unwrap();
        assert_eq!(aged.load(Ordering::SeqCst), 7);

        hdl.register_learn_handler(Arc::new(|intf, _, _, payload| {
            if payload.is_empty() {
                Err(AsicError::InvalidArg(format!("empty on {intf}")))
            } else {
                Ok(())
            }
        }))
        .unwrap();
        assert!(hdl.inject_learn(1, 1, 1, &[]).is_err());
        assert!(hdl.inject_learn(1, 1, 1, &[0u8; 14]).is_ok());

        hdl.unregister_learn_handler().unwrap();
        hdl.unregister_aging_handler().unwrap();
        assert!(!hdl.learn_registered());
        assert!(!hdl.aging_registered());
        assert!(hdl.unregister_aging_handler().is_err());
    }
}
