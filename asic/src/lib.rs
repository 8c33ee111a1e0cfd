// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

// The stub is always built: the chaos backend layers its fault injection on
// top of it.
pub mod fdb_stub;

cfg_if::cfg_if! {
    if #[cfg(feature = "chaos")] {
        pub mod chaos;
        mod plat {
            pub use super::chaos::AsicConfig;
            pub use super::chaos::Handle;
        }
    } else {
        mod plat {
            pub use super::fdb_stub::AsicConfig;
            pub use super::fdb_stub::StubHandle as Handle;
        }
    }
}

pub use plat::AsicConfig;
pub use plat::Handle;
