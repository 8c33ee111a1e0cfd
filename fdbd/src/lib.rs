// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! `fdbd` keeps a software copy of the switch's layer-2 forwarding table in
//! step with the hardware table, learning and aging addresses in response to
//! notifications from the ASIC.

pub mod config;
pub mod device;
pub mod dump;
pub mod learning;
pub mod types;
pub mod vlan;

pub use learning::MacLearning;
pub use types::{FdbError, FdbResult};
