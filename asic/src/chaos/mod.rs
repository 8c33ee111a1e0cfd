// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use rand::random;
use serde::{Deserialize, Serialize};
use slog::{o, Logger};

use aal::{
    AgingHandler, AsicError, AsicResult, FdbEntry, FdbIndex, FdbOps, FdbSlot,
    IntfId, LearnHandler,
};

use crate::fdb_stub::{self, StubHandle};

/// Chaos that happens according to a probability.
#[derive(Default, Debug, Serialize, Deserialize, Copy, Clone)]
pub struct Chaos {
    /// A probability between 0.0 and 1.0
    pub value: f64,
}

impl Chaos {
    /// Create a new chaos value.
    pub fn new(value: f64) -> Self {
        let mut c = Self::default();
        c.set(value);
        c
    }
    /// Set the chaos value. Panics if value is outside the range [0.0, 1.0].
    pub fn set(&mut self, value: f64) {
        if !(0.0..=1.0).contains(&value) {
            panic!("probability out of range");
        }
        self.value = value;
    }

    /// Get the underlying chaos value.
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Return a chaos error according to the underlying probability value.
    pub fn unfurled(&self, log: &Logger, message: &str) -> AsicResult<()> {
        if self.value >= random() {
            slog::error!(log, "chaos error: {}", message);
            return Err(AsicError::Synthetic(message.into()));
        }
        Ok(())
    }
}

/// The chaos ASIC config contains chaos values for each FDB operation.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AsicConfig {
    /// Configuration for the underlying stub table
    #[serde(flatten)]
    pub stub: fdb_stub::AsicConfig,
    pub fdb_add: Chaos,
    pub fdb_remove_by_index: Chaos,
    pub fdb_remove: Chaos,
    pub fdb_find: Chaos,
    pub fdb_write: Chaos,
    pub fdb_aging_time_set: Chaos,
    pub register_handler: Chaos,
}

impl AsicConfig {
    /// Apply a uniform failure probability to every table operation.  Handler
    /// registration is left reliable, since a failure there aborts startup.
    pub fn uniform(fdb_size: usize, v: f64) -> Self {
        Self {
            stub: fdb_stub::AsicConfig { fdb_size },
            fdb_add: Chaos::new(v),
            fdb_remove_by_index: Chaos::new(v),
            fdb_remove: Chaos::new(v),
            fdb_find: Chaos::new(v),
            fdb_write: Chaos::new(v),
            fdb_aging_time_set: Chaos::new(v),
            ..Default::default()
        }
    }

    /// Apply a uniform failure probability to the operations that modify the
    /// table.  Lookups are initialized with a default Chaos config that fails
    /// with probability zero.
    pub fn uniform_set(fdb_size: usize, v: f64) -> Self {
        Self {
            stub: fdb_stub::AsicConfig { fdb_size },
            fdb_add: Chaos::new(v),
            fdb_remove_by_index: Chaos::new(v),
            fdb_remove: Chaos::new(v),
            fdb_write: Chaos::new(v),
            ..Default::default()
        }
    }
}

/// A handle for a chaos asic.  Table state lives in an embedded stub, and
/// each operation is gated by its configured failure probability.
pub struct Handle {
    stub: StubHandle,
    config: AsicConfig,
    log: Logger,
}

impl Handle {
    /// Create a new chaos ASIC with the provided logger and config.
    pub fn new(log: &Logger, config: &AsicConfig) -> AsicResult<Self> {
        Ok(Handle {
            stub: StubHandle::new(log, &config.stub)?,
            config: config.clone(),
            log: log.new(o!("unit" => "chaos")),
        })
    }

    /// Chaos ASICs always report as a model.
    pub fn is_model(&self) -> bool {
        true
    }

    pub fn fini(&self) {
        self.stub.fini()
    }

    pub fn aging_time(&self) -> u32 {
        self.stub.aging_time()
    }

    pub fn occupied(&self) -> Vec<FdbIndex> {
        self.stub.occupied()
    }

    pub fn entry_at(&self, index: FdbIndex) -> Option<FdbEntry> {
        self.stub.entry_at(index)
    }

    pub fn inject_learn(
        &self,
        intf: IntfId,
        reason: u32,
        segment: u32,
        payload: &[u8],
    ) -> AsicResult<()> {
        self.stub.inject_learn(intf, reason, segment, payload)
    }

    pub fn inject_age(&self, index: FdbIndex) -> AsicResult<()> {
        self.stub.inject_age(index)
    }
}

/// A convenience macro for unfurling chaos. The $name should be a `Chaos`
/// member of [`AsicConfig`]. The `handle` is a [`Handle`] object.
macro_rules! unfurl {
    ($handle:ident, $name:ident) => {
        $handle
            .config
            .$name
            .unfurled(&$handle.log, stringify!($name))?
    };
}

impl FdbOps for Handle {
    fn fdb_size(&self) -> usize {
        self.stub.fdb_size()
    }

    fn fdb_add(&self, entry: &FdbEntry) -> AsicResult<FdbSlot> {
        unfurl!(self, fdb_add);
        self.stub.fdb_add(entry)
    }

    fn fdb_remove_by_index(&self, index: FdbIndex) -> AsicResult<()> {
        unfurl!(self, fdb_remove_by_index);
        self.stub.fdb_remove_by_index(index)
    }

    fn fdb_remove(&self, entry: &FdbEntry) -> AsicResult<()> {
        unfurl!(self, fdb_remove);
        self.stub.fdb_remove(entry)
    }

    fn fdb_find(&self, entry: &FdbEntry) -> AsicResult<Option<FdbIndex>> {
        unfurl!(self, fdb_find);
        self.stub.fdb_find(entry)
    }

    fn fdb_write(&self, index: FdbIndex, entry: &FdbEntry) -> AsicResult<()> {
        unfurl!(self, fdb_write);
        self.stub.fdb_write(index, entry)
    }

    fn fdb_aging_time_set(&self, secs: u32) -> AsicResult<()> {
        unfurl!(self, fdb_aging_time_set);
        self.stub.fdb_aging_time_set(secs)
    }

    fn register_learn_handler(&self, handler: LearnHandler) -> AsicResult<()> {
        unfurl!(self, register_handler);
        self.stub.register_learn_handler(handler)
    }

    fn unregister_learn_handler(&self) -> AsicResult<()> {
        self.stub.unregister_learn_handler()
    }

    fn register_aging_handler(&self, handler: AgingHandler) -> AsicResult<()> {
        unfurl!(self, register_handler);
        self.stub.register_aging_handler(handler)
    }

    fn unregister_aging_handler(&self) -> AsicResult<()> {
        self.stub.unregister_aging_handler()
    }
}
