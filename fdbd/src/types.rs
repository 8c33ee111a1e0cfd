// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! General types used throughout fdbd.

use std::convert;

use aal::{AsicError, FdbIndex, VlanId};
use common::network::{MacAddr, MacError, VlanError};

pub type FdbResult<T> = Result<T, FdbError>;

#[derive(Debug, thiserror::Error)]
pub enum FdbError {
    #[error("I/O error: {0:?}")]
    Io(std::io::Error),
    #[error("ASIC error: {0:?}")]
    Switch(AsicError),
    #[error("Resource already exists: {0}")]
    Exists(String),
    #[error("Resource is busy: {0}")]
    Busy(String),
    #[error("Resource is missing: {0}")]
    Missing(String),
    #[error("Invalid argument: {0}")]
    Invalid(String),
    #[error("Table {0} is full")]
    TableFull(String),
    /// The software table and the hardware table disagree about what lives
    /// at a slot.  Both implicated slots have been cleared.
    #[error(
        "FDB out of sync at index {index:#x} (rehash {rehash_index:#x}): {detail}"
    )]
    Inconsistent {
        index: FdbIndex,
        rehash_index: FdbIndex,
        detail: String,
    },
    #[error("{mac} may not be learned on vlan {vlan}")]
    NotLearnable { vlan: VlanId, mac: MacAddr },
    #[error("Malformed notification: {0}")]
    Malformed(String),
    #[error("Error: {0}")]
    Other(String),
}

impl FdbError {
    /// Not-found and already-exists are routine outcomes of a lookup, and
    /// aren't worth more than a debug message.
    pub fn is_expected(&self) -> bool {
        matches!(self, FdbError::Exists(_) | FdbError::Missing(_))
    }
}

impl convert::From<std::io::Error> for FdbError {
    fn from(err: std::io::Error) -> Self {
        FdbError::Io(err)
    }
}

impl convert::From<AsicError> for FdbError {
    fn from(err: AsicError) -> Self {
        FdbError::Switch(err)
    }
}

impl convert::From<VlanError> for FdbError {
    fn from(err: VlanError) -> Self {
        FdbError::Invalid(err.to_string())
    }
}

impl convert::From<MacError> for FdbError {
    fn from(err: MacError) -> Self {
        FdbError::Malformed(err.to_string())
    }
}

impl convert::From<FdbError> for AsicError {
    fn from(err: FdbError) -> Self {
        match err {
            FdbError::Switch(e) => e,
            FdbError::Malformed(msg) | FdbError::Invalid(msg) => {
                AsicError::InvalidArg(msg)
            }
            e => AsicError::Internal(e.to_string()),
        }
    }
}
