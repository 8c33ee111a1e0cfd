// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Human-readable rendering of a learning table.

use std::collections::BTreeMap;
use std::io::Write;

use tabwriter::TabWriter;

use aal::IntfId;

use crate::learning::MacEntry;
use crate::types::{FdbError, FdbResult};

/// Maps an interface to the name it should be displayed under.
pub trait IfaceNames {
    fn iface_name(&self, intf: IntfId, service_id: u32) -> Option<String>;
}

impl IfaceNames for BTreeMap<IntfId, String> {
    fn iface_name(&self, intf: IntfId, _service_id: u32) -> Option<String> {
        self.get(&intf).cloned()
    }
}

/// Render `entries` as an aligned text table, in the order given.  Entries
/// whose interface has no name are skipped.
pub fn render(
    entries: &[MacEntry],
    names: &dyn IfaceNames,
) -> FdbResult<String> {
    let mut tw = TabWriter::new(Vec::new());
    writeln!(tw, "PORT\tVLAN\tMAC\tINDEX")?;
    for e in entries {
        let Some(name) = names.iface_name(e.intf(), e.service_id()) else {
            continue;
        };
        writeln!(tw, "{name}\t{}\t{}\t{:#x}", e.vlan(), e.mac(), e.index)?;
    }
    let buf = tw
        .into_inner()
        .map_err(|e| FdbError::Other(format!("rendering fdb table: {e}")))?;
    String::from_utf8(buf)
        .map_err(|e| FdbError::Other(format!("rendering fdb table: {e}")))
}
