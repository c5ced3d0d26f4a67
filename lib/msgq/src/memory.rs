// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Backing store for a [`crate::Ring`].
///
/// Ring memory is shared with a device, so it is only ever accessed by copying
/// whole payloads in or out; nothing hands out long-lived references into it.
pub trait SlotMemory {
    /// Total size in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Address the peer uses to reach offset 0.
    fn bus_addr(&self) -> u64;

    /// Copies `data` to `offset`. The range is always in bounds.
    fn write(&mut self, offset: usize, data: &[u8]);

    /// Fills `out` from `offset`. The range is always in bounds.
    fn read(&self, offset: usize, out: &mut [u8]);
}

/// A [`SlotMemory`] over a borrowed slice, for memory the host has already
/// mapped for the device.
#[derive(Debug)]
pub struct SliceMemory<'s> {
    backing: &'s mut [u8],
    bus_addr: u64,
}

impl<'s> SliceMemory<'s> {
    pub fn new(backing: &'s mut [u8], bus_addr: u64) -> Self {
        Self { backing, bus_addr }
    }
}

impl SlotMemory for SliceMemory<'_> {
    fn len(&self) -> usize {
        self.backing.len()
    }

    fn bus_addr(&self) -> u64 {
        self.bus_addr
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        if let Some(dst) = self.backing.get_mut(offset..offset + data.len()) {
            dst.copy_from_slice(data);
        }
    }

    fn read(&self, offset: usize, out: &mut [u8]) {
        if let Some(src) = self.backing.get(offset..offset + out.len()) {
            out.copy_from_slice(src);
        }
    }
}
