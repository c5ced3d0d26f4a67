// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration messages carried over the request/response rings once the
//! controller is up.

use hubpack::SerializedSize;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

use crate::{
    body, DecodeError, FwStatus, HubpackError, Message, MsgClass, HEADER_LEN,
    MIN_SLOT_SIZE,
};

pub mod h2i {
    pub const CFG: u8 = 0x01;
    pub const SET_INTR: u8 = 0x02;
}

pub mod i2h {
    use crate::REPLY_BIT;

    pub const CFG: u8 = super::h2i::CFG | REPLY_BIT;
    pub const SET_INTR: u8 = super::h2i::SET_INTR | REPLY_BIT;
}

/// Where a ring lives and how it is shaped.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct RingDesc {
    pub base: u64,
    pub depth: u16,
    pub slot_size: u16,
}

/// Bounded firmware resources that dependent modules size their pools from.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    SerializedSize,
)]
#[serde(default)]
pub struct ResourceCounts {
    /// Concurrent I/O contexts.
    pub io_contexts: u16,
    pub task_mgmt: u16,
    /// Outstanding exchanges.
    pub exchanges: u16,
    pub remote_ports: u16,
    pub unsolicited_bufs: u16,
    pub logins: u16,
}

impl ResourceCounts {
    fn fields(&self) -> [u16; 6] {
        [
            self.io_contexts,
            self.task_mgmt,
            self.exchanges,
            self.remote_ports,
            self.unsolicited_bufs,
            self.logins,
        ]
    }

    /// Returns `true` if no count in `self` exceeds the same count in
    /// `limit`.
    pub fn fits_within(&self, limit: &Self) -> bool {
        self.fields()
            .iter()
            .zip(limit.fields().iter())
            .all(|(a, b)| a <= b)
    }
}

/// Interrupt coalescing attributes.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    SerializedSize,
)]
#[serde(default)]
pub struct IntrAttr {
    pub coalesce: bool,
    pub delay_us: u16,
    pub latency_us: u16,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct CfgReq {
    pub reqq: RingDesc,
    pub rspq: RingDesc,
    pub requested: ResourceCounts,
    pub intr: IntrAttr,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct CfgRsp {
    pub status: FwStatus,
    pub granted: ResourceCounts,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct SetIntrRsp {
    pub status: FwStatus,
    pub intr: IntrAttr,
}

// The negotiation message has to fit in the smallest slot we'll configure,
// since it is the first thing sent on a freshly reset ring.
const_assert!(HEADER_LEN + CfgReq::MAX_SIZE <= MIN_SLOT_SIZE);
const_assert!(HEADER_LEN + SetIntrRsp::MAX_SIZE <= MIN_SLOT_SIZE);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IocfcRequest {
    Cfg(CfgReq),
    SetIntr(IntrAttr),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IocfcReply {
    Cfg(CfgRsp),
    SetIntr(SetIntrRsp),
}

impl Message for IocfcRequest {
    const CLASS: MsgClass = MsgClass::Iocfc;

    fn id(&self) -> u8 {
        match self {
            Self::Cfg(_) => h2i::CFG,
            Self::SetIntr(_) => h2i::SET_INTR,
        }
    }

    fn encode_body(&self, out: &mut [u8]) -> Result<usize, HubpackError> {
        match self {
            Self::Cfg(r) => hubpack::serialize(out, r),
            Self::SetIntr(r) => hubpack::serialize(out, r),
        }
    }

    fn decode_body(id: u8, raw: &[u8]) -> Result<Self, DecodeError> {
        match id {
            h2i::CFG => Ok(Self::Cfg(body(raw)?)),
            h2i::SET_INTR => Ok(Self::SetIntr(body(raw)?)),
            other => Err(DecodeError::UnknownId(other)),
        }
    }
}

impl Message for IocfcReply {
    const CLASS: MsgClass = MsgClass::Iocfc;

    fn id(&self) -> u8 {
        match self {
            Self::Cfg(_) => i2h::CFG,
            Self::SetIntr(_) => i2h::SET_INTR,
        }
    }

    fn encode_body(&self, out: &mut [u8]) -> Result<usize, HubpackError> {
        match self {
            Self::Cfg(r) => hubpack::serialize(out, r),
            Self::SetIntr(r) => hubpack::serialize(out, r),
        }
    }

    fn decode_body(id: u8, raw: &[u8]) -> Result<Self, DecodeError> {
        match id {
            i2h::CFG => Ok(Self::Cfg(body(raw)?)),
            i2h::SET_INTR => Ok(Self::SetIntr(body(raw)?)),
            other => Err(DecodeError::UnknownId(other)),
        }
    }
}
