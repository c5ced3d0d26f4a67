// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bring-up commands carried over the mailbox.

use hubpack::SerializedSize;
use serde::{Deserialize, Serialize};

use crate::{
    body, DecodeError, FwStatus, FwVersion, HubpackError, Message, MsgClass,
};

/// Host-to-firmware opcodes.
pub mod h2i {
    pub const ENABLE: u8 = 0x01;
    pub const DISABLE: u8 = 0x02;
    pub const GET_ATTR: u8 = 0x03;
    pub const DEBUG_SYNC: u8 = 0x04;
    pub const DEBUG_DUMP: u8 = 0x05;
}

/// Firmware-to-host opcodes.
pub mod i2h {
    use crate::REPLY_BIT;

    pub const ENABLE: u8 = super::h2i::ENABLE | REPLY_BIT;
    pub const DISABLE: u8 = super::h2i::DISABLE | REPLY_BIT;
    pub const GET_ATTR: u8 = super::h2i::GET_ATTR | REPLY_BIT;
    pub const DEBUG_SYNC: u8 = super::h2i::DEBUG_SYNC | REPLY_BIT;
    pub const DEBUG_DUMP: u8 = super::h2i::DEBUG_DUMP | REPLY_BIT;
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct EnableReq {
    pub host_time_ms: u64,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct GetAttrReq {
    /// Bus address the firmware writes [`crate::FwAttributes`] to.
    pub attr_addr: u64,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct DebugDumpReq {
    pub offset: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IocRequest {
    Enable(EnableReq),
    Disable,
    GetAttr(GetAttrReq),
    DebugSync,
    DebugDump(DebugDumpReq),
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct EnableRsp {
    pub status: FwStatus,
    pub fw_version: FwVersion,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct StatusRsp {
    pub status: FwStatus,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SerializedSize,
)]
pub struct DebugDumpRsp {
    pub offset: u32,
    pub len: u32,
    /// More trace remains past `offset + len`.
    pub more: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IocReply {
    Enable(EnableRsp),
    Disable(StatusRsp),
    GetAttr(StatusRsp),
    DebugSync,
    DebugDump(DebugDumpRsp),
}

const fn max(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

impl IocRequest {
    pub const MAX_BODY: usize = max(
        EnableReq::MAX_SIZE,
        max(GetAttrReq::MAX_SIZE, DebugDumpReq::MAX_SIZE),
    );
}

impl IocReply {
    pub const MAX_BODY: usize = max(
        EnableRsp::MAX_SIZE,
        max(StatusRsp::MAX_SIZE, DebugDumpRsp::MAX_SIZE),
    );

    /// The request opcode this reply answers.
    pub fn request_id(&self) -> u8 {
        self.id() & !crate::REPLY_BIT
    }
}

impl Message for IocRequest {
    const CLASS: MsgClass = MsgClass::Ioc;

    fn id(&self) -> u8 {
        match self {
            Self::Enable(_) => h2i::ENABLE,
            Self::Disable => h2i::DISABLE,
            Self::GetAttr(_) => h2i::GET_ATTR,
            Self::DebugSync => h2i::DEBUG_SYNC,
            Self::DebugDump(_) => h2i::DEBUG_DUMP,
        }
    }

    fn encode_body(&self, out: &mut [u8]) -> Result<usize, HubpackError> {
        match self {
            Self::Enable(r) => hubpack::serialize(out, r),
            Self::GetAttr(r) => hubpack::serialize(out, r),
            Self::DebugDump(r) => hubpack::serialize(out, r),
            Self::Disable | Self::DebugSync => Ok(0),
        }
    }

    fn decode_body(id: u8, raw: &[u8]) -> Result<Self, DecodeError> {
        Ok(match id {
            h2i::ENABLE => Self::Enable(body(raw)?),
            h2i::DISABLE => Self::Disable,
            h2i::GET_ATTR => Self::GetAttr(body(raw)?),
            h2i::DEBUG_SYNC => Self::DebugSync,
            h2i::DEBUG_DUMP => Self::DebugDump(body(raw)?),
            other => return Err(DecodeError::UnknownId(other)),
        })
    }
}

impl Message for IocReply {
    const CLASS: MsgClass = MsgClass::Ioc;

    fn id(&self) -> u8 {
        match self {
            Self::Enable(_) => i2h::ENABLE,
            Self::Disable(_) => i2h::DISABLE,
            Self::GetAttr(_) => i2h::GET_ATTR,
            Self::DebugSync => i2h::DEBUG_SYNC,
            Self::DebugDump(_) => i2h::DEBUG_DUMP,
        }
    }

    fn encode_body(&self, out: &mut [u8]) -> Result<usize, HubpackError> {
        match self {
            Self::Enable(r) => hubpack::serialize(out, r),
            Self::Disable(r) | Self::GetAttr(r) => hubpack::serialize(out, r),
            Self::DebugDump(r) => hubpack::serialize(out, r),
            Self::DebugSync => Ok(0),
        }
    }

    fn decode_body(id: u8, raw: &[u8]) -> Result<Self, DecodeError> {
        Ok(match id {
            i2h::ENABLE => Self::Enable(body(raw)?),
            i2h::DISABLE => Self::Disable(body(raw)?),
            i2h::GET_ATTR => Self::GetAttr(body(raw)?),
            i2h::DEBUG_SYNC => Self::DebugSync,
            i2h::DEBUG_DUMP => Self::DebugDump(body(raw)?),
            other => return Err(DecodeError::UnknownId(other)),
        })
    }
}
