// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing driver state.
//!
//! A [`Ringbuf`] holds the most recent `N` events of some `Copy + PartialEq`
//! payload type, each stamped with the source line that recorded it. It is an
//! ordinary value, so each driver instance carries its own and nothing is
//! shared between instances.
//!
//! ## Recording
//!
//! Entries are recorded with [`ringbuf_entry!`], which captures the line
//! number for you:
//!
//! ```ignore
//! ringbuf_entry!(self.trace, Trace::MboxTimeout);
//! ```
//!
//! ## Deduplication
//!
//! If the same payload is recorded from the same line twice in a row, the
//! second entry doesn't take a new slot; instead the existing entry's `count`
//! goes up. This keeps a tight polling loop from flushing everything else out
//! of the buffer. Each slot also has a `generation` that goes up every time
//! the slot is reused, so a reader can tell a slot that was overwritten from
//! one that wasn't.
//!
//! ## Disabling
//!
//! With the `disabled` feature, `entry` does nothing, which reduces a ring
//! buffer to its (unused) storage.

#![cfg_attr(not(test), no_std)]

#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let p = $payload;
        $buf.entry(line!() as u16, p);
    }};
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    /// Creates an empty buffer. `init` fills the unused slots and is never
    /// reported by `iter`.
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    #[cfg(feature = "disabled")]
    pub fn entry(&mut self, _line: u16, _payload: T) {}

    #[cfg(not(feature = "disabled"))]
    pub fn entry(&mut self, line: u16, payload: T) {
        if N == 0 {
            return;
        }
        if let Some(ent) = self.last.and_then(|i| self.buffer.get_mut(i)) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = match self.last {
            Some(i) if i + 1 < N => i + 1,
            _ => 0,
        };
        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };
        self.last = Some(ndx);
    }

    /// The most recently recorded entry.
    pub fn last(&self) -> Option<&RingbufEntry<T>> {
        self.last.and_then(|i| self.buffer.get(i))
    }

    /// Recorded entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> {
        let start = self.last.map(|i| i + 1).unwrap_or(0);
        let (newer, older) = self.buffer.split_at(start.min(N));
        older
            .iter()
            .chain(newer.iter())
            .filter(|ent| ent.count != 0)
    }

    /// Recorded payloads, oldest first. Deduplicated repeats appear once.
    pub fn payloads(&self) -> impl Iterator<Item = T> + '_ {
        self.iter().map(|ent| ent.payload)
    }

    pub fn clear(&mut self) {
        self.last = None;
        for ent in &mut self.buffer {
            ent.count = 0;
        }
    }
}
