// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::SlotMemory;

/// Shape of a ring: `depth` slots of `slot_size` bytes each.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    depth: u16,
    slot_size: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GeometryError {
    /// Depth must be a power of two, and at least 2 so that one slot can be
    /// in flight.
    BadDepth(u16),
    ZeroSlotSize,
    /// Backing memory is smaller than `depth * slot_size`.
    MemoryTooSmall { need: usize, have: usize },
}

impl Geometry {
    pub fn new(depth: u16, slot_size: u16) -> Result<Self, GeometryError> {
        if depth < 2 || !depth.is_power_of_two() {
            return Err(GeometryError::BadDepth(depth));
        }
        if slot_size == 0 {
            return Err(GeometryError::ZeroSlotSize);
        }
        Ok(Self { depth, slot_size })
    }

    pub fn depth(&self) -> u16 {
        self.depth
    }

    pub fn slot_size(&self) -> usize {
        usize::from(self.slot_size)
    }

    /// Bytes of backing memory the ring needs.
    pub fn bytes(&self) -> usize {
        usize::from(self.depth) * self.slot_size()
    }

    fn mask(&self) -> u16 {
        self.depth - 1
    }
}

/// Error returned when producing would overrun the peer's consumer index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RingFull;

/// Error returned when the peer reports an index we can't reconcile with our
/// own, e.g. claiming to have consumed slots we never produced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BadIndex(pub u16);

/// Names one slot of a ring.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlotHandle(u16);

impl SlotHandle {
    pub fn index(&self) -> u16 {
        self.0
    }
}

/// A circular array of fixed-size slots.
///
/// The same type serves both directions. On a ring we produce into, we own
/// the producer index and track the peer's consumer index through
/// `peer_consumed`. On a ring we consume from, the peer owns the producer
/// index (reported through `peer_produced`) and we own the consumer index,
/// which only moves when we `ack`.
///
/// At most `depth - 1` slots are ever in flight, so that equal indices always
/// mean "empty".
#[derive(Debug)]
pub struct Ring<M> {
    mem: M,
    geometry: Geometry,
    pi: u16,
    ci: u16,
    /// Next slot `consume` will hand out. Always between `ci` and `pi`.
    cursor: u16,
}

impl<M: SlotMemory> Ring<M> {
    pub fn new(mem: M, geometry: Geometry) -> Result<Self, GeometryError> {
        let need = geometry.bytes();
        if mem.len() < need {
            return Err(GeometryError::MemoryTooSmall {
                need,
                have: mem.len(),
            });
        }
        Ok(Self {
            mem,
            geometry,
            pi: 0,
            ci: 0,
            cursor: 0,
        })
    }

    /// Returns both indices to zero, discarding anything in flight.
    pub fn reset(&mut self) {
        self.pi = 0;
        self.ci = 0;
        self.cursor = 0;
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn memory(&self) -> &M {
        &self.mem
    }

    pub fn producer_index(&self) -> u16 {
        self.pi
    }

    pub fn consumer_index(&self) -> u16 {
        self.ci
    }

    fn advance(&self, index: u16) -> u16 {
        index.wrapping_add(1) & self.geometry.mask()
    }

    fn distance(&self, from: u16, to: u16) -> u16 {
        to.wrapping_sub(from) & self.geometry.mask()
    }

    /// Slots produced but not yet released by the consumer.
    pub fn in_flight(&self) -> u16 {
        self.distance(self.ci, self.pi)
    }

    /// Slots that can be produced before the ring is full.
    pub fn free(&self) -> u16 {
        self.geometry.depth - 1 - self.in_flight()
    }

    pub fn is_full(&self) -> bool {
        self.advance(self.pi) == self.ci
    }

    pub fn is_empty(&self) -> bool {
        self.pi == self.ci
    }

    /// Copies `data` into the slot at the producer index and advances it.
    ///
    /// The remainder of the slot is zeroed. Bytes past the slot size are not
    /// written; callers size payloads to the slot. On success the new
    /// producer index is what must be written to the peer's doorbell.
    pub fn produce(&mut self, data: &[u8]) -> Result<SlotHandle, RingFull> {
        if self.is_full() {
            return Err(RingFull);
        }
        let slot = self.geometry.slot_size();
        let offset = usize::from(self.pi) * slot;
        let n = data.len().min(slot);
        self.mem.write(offset, &data[..n]);

        const ZEROS: [u8; 64] = [0; 64];
        let mut pad = offset + n;
        let end = offset + slot;
        while pad < end {
            let chunk = (end - pad).min(ZEROS.len());
            self.mem.write(pad, &ZEROS[..chunk]);
            pad += chunk;
        }

        let handle = SlotHandle(self.pi);
        self.pi = self.advance(self.pi);
        Ok(handle)
    }

    /// Records the peer's consumer index, as read from its doorbell register,
    /// and returns how many slots that released.
    pub fn peer_consumed(&mut self, peer_ci: u16) -> Result<u16, BadIndex> {
        let peer_ci = peer_ci & self.geometry.mask();
        let released = self.distance(self.ci, peer_ci);
        if released > self.in_flight() {
            return Err(BadIndex(peer_ci));
        }
        self.ci = peer_ci;
        Ok(released)
    }

    /// Records the peer's producer index and returns how many slots are now
    /// waiting to be consumed.
    pub fn peer_produced(&mut self, peer_pi: u16) -> u16 {
        self.pi = peer_pi & self.geometry.mask();
        // If the peer has lapped our cursor something has gone badly wrong;
        // keep the cursor inside the live window regardless.
        if self.distance(self.ci, self.cursor) > self.in_flight() {
            self.cursor = self.ci;
        }
        self.distance(self.cursor, self.pi)
    }

    /// Copies the next unconsumed slot into `out` (up to `out.len()` bytes)
    /// and moves past it. The slot stays owned by us until `ack`.
    pub fn consume(&mut self, out: &mut [u8]) -> Option<SlotHandle> {
        if self.cursor == self.pi {
            return None;
        }
        let slot = self.geometry.slot_size();
        let n = out.len().min(slot);
        self.mem
            .read(usize::from(self.cursor) * slot, &mut out[..n]);
        let handle = SlotHandle(self.cursor);
        self.cursor = self.advance(self.cursor);
        Some(handle)
    }

    /// Releases every consumed slot up to and including `up_to` back to the
    /// peer, returning the new consumer index to write to its doorbell.
    pub fn ack(&mut self, up_to: SlotHandle) -> Result<u16, BadIndex> {
        let next = self.advance(up_to.0 & self.geometry.mask());
        if self.distance(self.ci, next) > self.distance(self.ci, self.cursor)
        {
            return Err(BadIndex(up_to.0));
        }
        self.ci = next;
        Ok(self.ci)
    }

    /// Releases everything handed out by `consume` so far.
    pub fn ack_consumed(&mut self) -> u16 {
        self.ci = self.cursor;
        self.ci
    }
}
