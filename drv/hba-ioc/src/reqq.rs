// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request ring with flow control.

use hba_msgs::{MsgClass, MsgHeader, HEADER_LEN, MAX_SLOT_SIZE};
use msgq::{Ring, RingFull, SlotHandle, SlotMemory, WaitQueue};
use ringbuf::{ringbuf_entry, Ringbuf};
use zerocopy::IntoBytes;

use crate::dispatch::DispatchTable;
use crate::error::SendError;
use crate::hw::HbaHw;
use crate::ioc::Generation;
use crate::module::ModuleId;
use crate::stats::IocStats;
use crate::trace::{Trace, TRACE_DEPTH};

/// Most senders that can be parked at once.
pub const MAX_WAITERS: usize = 32;

/// Outcome of asking for ring space.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Space {
    /// A slot is free now and nobody is queued ahead of you.
    Available,
    /// You've been parked; `resume` will be called when a slot frees up.
    Queued,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Waiter {
    pub owner: ModuleId,
    pub arg: u32,
}

pub(crate) struct ReqQueue<M> {
    pub ring: Ring<M>,
    pub waiters: WaitQueue<Waiter, MAX_WAITERS>,
    open: bool,
}

impl<M: SlotMemory> ReqQueue<M> {
    pub fn new(ring: Ring<M>) -> Self {
        Self {
            ring,
            waiters: WaitQueue::new(),
            open: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Starts over from an empty ring.
    pub fn open(&mut self) {
        self.ring.reset();
        self.open = true;
    }

    /// Stops taking requests. Returns how many waiters were dropped.
    pub fn close(&mut self) -> usize {
        self.open = false;
        self.waiters.clear()
    }

    /// Produces `frame` and rings the doorbell.
    pub fn submit(
        &mut self,
        hw: &mut impl HbaHw,
        frame: &[u8],
    ) -> Result<SlotHandle, RingFull> {
        let slot = self.ring.produce(frame)?;
        hw.reqq_doorbell(self.ring.producer_index());
        Ok(slot)
    }

    pub fn has_space(&self) -> bool {
        !self.ring.is_full() && self.waiters.is_empty()
    }
}

/// What a module callback needs to send: implemented over the adapter's
/// request ring so `Tx` doesn't have to name the adapter's type parameters.
pub(crate) trait RequestPort {
    fn send(
        &mut self,
        class: MsgClass,
        id: u8,
        payload: &[u8],
    ) -> Result<(), SendError>;

    fn wait_for_space(
        &mut self,
        owner: ModuleId,
        arg: u32,
    ) -> Result<Space, SendError>;

    fn free_slots(&self) -> u16;
}

/// Borrowed view of the adapter's sending state.
pub(crate) struct Outbound<'a, H, M> {
    pub hw: &'a mut H,
    pub reqq: &'a mut ReqQueue<M>,
    pub dispatch: &'a DispatchTable,
    pub generation: Generation,
    /// Whether the controller is taking module traffic at all.
    pub admit: bool,
    pub stats: &'a mut IocStats,
    pub trace: &'a mut Ringbuf<Trace, TRACE_DEPTH>,
}

impl<H: HbaHw, M: SlotMemory> Outbound<'_, H, M> {
    fn check_open(&self) -> Result<(), SendError> {
        if self.admit && self.reqq.is_open() {
            Ok(())
        } else {
            Err(SendError::NotOperational)
        }
    }
}

impl<H: HbaHw, M: SlotMemory> RequestPort for Outbound<'_, H, M> {
    fn send(
        &mut self,
        class: MsgClass,
        id: u8,
        payload: &[u8],
    ) -> Result<(), SendError> {
        self.check_open()?;
        if self.dispatch.owner(class).is_none() {
            return Err(SendError::UnregisteredClass(class));
        }
        let slot = self.reqq.ring.geometry().slot_size();
        let max = slot - HEADER_LEN;
        if payload.len() > max {
            return Err(SendError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }

        let mut buf = [0u8; MAX_SLOT_SIZE];
        let header = MsgHeader::new(class, id, self.generation.raw());
        buf[..HEADER_LEN].copy_from_slice(header.as_bytes());
        let end = HEADER_LEN + payload.len();
        buf[HEADER_LEN..end].copy_from_slice(payload);

        match self.reqq.submit(&mut *self.hw, &buf[..end]) {
            Ok(_) => Ok(()),
            Err(RingFull) => {
                self.stats.ring_full = self.stats.ring_full.wrapping_add(1);
                ringbuf_entry!(self.trace, Trace::RingFull { class });
                Err(SendError::RingFull)
            }
        }
    }

    fn wait_for_space(
        &mut self,
        owner: ModuleId,
        arg: u32,
    ) -> Result<Space, SendError> {
        self.check_open()?;
        if self.reqq.has_space() {
            return Ok(Space::Available);
        }
        self.reqq
            .waiters
            .push(Waiter { owner, arg })
            .map_err(|_| SendError::WaitQueueFull)?;
        ringbuf_entry!(self.trace, Trace::WaiterQueued { owner, arg });
        Ok(Space::Queued)
    }

    fn free_slots(&self) -> u16 {
        self.reqq.ring.free()
    }
}
