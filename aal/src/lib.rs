// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::Arc;

use thiserror::Error;

mod fdb;
pub use fdb::*;

/// Index of a single slot in the ASIC's hash-indexed forwarding table.
pub type FdbIndex = u32;

/// Identifies an ingress/egress interface (port, LAG, tunnel) on the ASIC.
pub type IntfId = u32;

/// 802.1Q VLAN identifier, used by the ASIC as the bridge domain.
pub type VlanId = u16;

/// A specialized Result type for ASIC operations
pub type AsicResult<T> = Result<T, AsicError>;

/// Error type conveying additional information about ASIC errors
#[derive(Error, Debug)]
pub enum AsicError {
    /// An argument passed to the ASIC layer is invalid or inappropriate.  This
    /// indicates misbehavior from the caller.
    #[error("Invalid argument: {}", .0)]
    InvalidArg(String),
    /// An Asic function was called before the ASIC layer was properly
    /// initialized.  Indicates misbehavior from the caller.
    #[error("ASIC layer uninitialized: {}", .0)]
    Uninitialized(String),
    /// The ASIC layer detected some internal inconsistency
    #[error("Internal error: {}",.0)]
    Internal(String),
    /// An error derived from a purposely triggered synthetic fault for testing
    /// purposes.
    #[error("Synthetic ASIC error: {}", .0)]
    Synthetic(String),
    /// A general indication that a caller is trying to create something that
    /// already exists.
    #[error("Already exists")]
    Exists,
    /// A general indication that a caller is trying to modify something that
    /// is not present.
    #[error("Missing: {}", .0)]
    Missing(String),
    /// The hardware table has no slot left for the new entry, even after
    /// attempting to relocate an existing one.
    #[error("Not enough space in {}", .0)]
    NoSpace(String),
    /// A notification handler is already registered for this device.
    #[error("Handler already registered: {}", .0)]
    HandlerBusy(String),
}

/// Callback invoked by the ASIC layer when a packet is punted for source MAC
/// learning.  The arguments are the ingress interface, the raw hardware reason
/// code, the bridge domain (VLAN) the packet was classified into, and the
/// packet itself, starting at the Ethernet header.
///
/// The callback may be invoked from a driver thread or interrupt context, so it
/// must not block.
pub type LearnHandler =
    Arc<dyn Fn(IntfId, u32, u32, &[u8]) -> AsicResult<()> + Send + Sync>;

/// Callback invoked by the ASIC layer when the hardware ages out the entry at
/// the given index.  The same execution constraints as for `LearnHandler`
/// apply.
pub type AgingHandler = Arc<dyn Fn(FdbIndex) + Send + Sync>;

/// The `FdbOps` trait contains the operations on the ASIC's layer-2
/// forwarding table that the learning daemon requires.
///
/// The table is a fixed-capacity hash table.  When an insert collides, the
/// ASIC may relocate an existing entry to a different slot to make room; the
/// result of `fdb_add` tells the caller where both entries ended up.
pub trait FdbOps: Send + Sync {
    /// Returns the number of slots in the hardware table.
    fn fdb_size(&self) -> usize;

    /// Install a new entry.  Attempting to add a (VLAN, MAC) pair that is
    /// already present fails with `AsicError::Exists`.
    fn fdb_add(&self, entry: &FdbEntry) -> AsicResult<FdbSlot>;

    /// Remove whatever entry occupies the slot at `index`.
    fn fdb_remove_by_index(&self, index: FdbIndex) -> AsicResult<()>;

    /// Remove the entry matching the VLAN and MAC of `entry`.
    fn fdb_remove(&self, entry: &FdbEntry) -> AsicResult<()>;

    /// Look up the slot holding the VLAN and MAC of `entry`.  `Ok(None)` means
    /// the lookup completed and found nothing.
    fn fdb_find(&self, entry: &FdbEntry) -> AsicResult<Option<FdbIndex>>;

    /// Overwrite the slot at `index` with `entry`.
    fn fdb_write(&self, index: FdbIndex, entry: &FdbEntry) -> AsicResult<()>;

    /// Program the hardware aging timer.
    fn fdb_aging_time_set(&self, secs: u32) -> AsicResult<()>;

    /// Register to receive learning notifications.
    fn register_learn_handler(&self, handler: LearnHandler) -> AsicResult<()>;

    /// Stop receiving learning notifications.
    fn unregister_learn_handler(&self) -> AsicResult<()>;

    /// Register to receive aging notifications.
    fn register_aging_handler(&self, handler: AgingHandler) -> AsicResult<()>;

    /// Stop receiving aging notifications.
    fn unregister_aging_handler(&self) -> AsicResult<()>;
}
