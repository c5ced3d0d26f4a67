// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-slot message rings shared with a peer processor.
//!
//! A [`Ring`] is a circular array of equal-sized slots living in memory that
//! both sides can see. One side produces into it and the other consumes; each
//! side owns exactly one of the two indices, and learns the other one through
//! whatever doorbell mechanism the hardware offers. This crate only does the
//! index arithmetic and the copying. It never touches a register: the caller
//! is responsible for ringing doorbells with the values we hand back, and for
//! feeding us the peer's index when an interrupt tells us it changed.
//!
//! A [`WaitQueue`] parks callers that found the ring full, in order, until
//! their owner decides there is room to resume them.

#![cfg_attr(not(test), no_std)]

mod memory;
mod ring;
mod waitq;

pub use memory::{SliceMemory, SlotMemory};
pub use ring::{BadIndex, Geometry, GeometryError, Ring, RingFull, SlotHandle};
pub use waitq::{WaitQueue, WaitQueueFull};
