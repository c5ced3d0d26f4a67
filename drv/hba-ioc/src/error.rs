// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use derive_more::From;
use hba_msgs::{EncodeError, MsgClass};
use msgq::GeometryError;

use crate::ioc::IocState;
use crate::iocfc::IocfcState;
use crate::module::ModuleId;

/// Failure to put a request on the request ring.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SendError {
    /// No free slot. The caller may park on the wait queue.
    RingFull,
    /// The rings are not accepting traffic in the current state.
    NotOperational,
    /// Nobody has registered to receive this class's responses.
    UnregisteredClass(MsgClass),
    PayloadTooLarge { len: usize, max: usize },
    WaitQueueFull,
    Encode(EncodeError),
}

impl SendError {
    /// Returns `true` if retrying later can succeed without a state change.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RingFull | Self::WaitQueueFull)
    }
}

impl From<msgq::RingFull> for SendError {
    fn from(_: msgq::RingFull) -> Self {
        Self::RingFull
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MboxError {
    /// A request is already outstanding.
    Busy,
    Encode(EncodeError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    Ring(GeometryError),
    /// Ring depth is not a power of two within the supported range.
    Depth(u16),
    /// Slot size is not a multiple of the slot unit within range.
    SlotSize(u16),
    /// A timer interval of zero.
    ZeroInterval,
}

impl From<GeometryError> for ConfigError {
    fn from(e: GeometryError) -> Self {
        Self::Ring(e)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    Full,
    /// Modules can only be registered before attach.
    AlreadyAttached,
    UnknownModule(ModuleId),
    /// The class is handled by the controller itself.
    ClassReserved(MsgClass),
    ClassTaken(MsgClass),
}

/// An operation was requested in a state that does not accept it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StateError {
    Ioc(IocState),
    Iocfc(IocfcState),
    /// A persistence callback arrived with no read or write in progress.
    NoPersistOp,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, From)]
pub enum HbaError {
    Config(ConfigError),
    Registry(RegistryError),
    Send(SendError),
    Mbox(MboxError),
    State(StateError),
}
