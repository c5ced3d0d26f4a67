// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Controller settings that survive a reset.
//!
//! Where the bytes live is up to the platform, and reading or writing them
//! may take a while, so both directions are split: the adapter calls
//! `begin_*` and the platform answers with [`crate::Hba::persist_done`].

use hba_msgs::iocfc::IntrAttr;
use hubpack::SerializedSize;
use serde::{Deserialize, Serialize};

pub const PERSIST_MAGIC: u32 = 0xdc0f_5e77;
pub const PERSIST_VERSION: u8 = 1;

pub trait PersistStore {
    /// Starts reading the saved record.
    fn begin_read(&mut self);

    /// Starts writing `data` as the saved record.
    fn begin_write(&mut self, data: &[u8]);
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct PersistedConfig {
    pub magic: u32,
    pub version: u8,
    pub intr: IntrAttr,
}

impl PersistedConfig {
    pub fn new(intr: IntrAttr) -> Self {
        Self {
            magic: PERSIST_MAGIC,
            version: PERSIST_VERSION,
            intr,
        }
    }

    pub fn encode(&self, out: &mut [u8]) -> Option<usize> {
        hubpack::serialize(out, self).ok()
    }

    /// Returns `None` for anything that isn't a record we wrote, including
    /// an erased store.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let (rec, _): (Self, _) = hubpack::deserialize(raw).ok()?;
        (rec.magic == PERSIST_MAGIC && rec.version == PERSIST_VERSION)
            .then_some(rec)
    }
}
