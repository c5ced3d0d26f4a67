// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types for messages exchanged between the host driver and the adapter
//! firmware.
//!
//! Every message starts with a [`MsgHeader`] naming the owning subsystem
//! ([`MsgClass`]), an opcode within that class, and a correlation token that
//! the firmware echoes in its reply. The header is followed by a
//! class-specific body. Bodies are hubpack-encoded; the header itself is a
//! fixed layout so that either side can route a slot without knowing how to
//! decode its body.
//!
//! The same framing is used for the request/response rings and for the
//! bring-up mailbox. The mailbox is restricted to [`MsgClass::Ioc`]; ring
//! traffic never uses that class.

#![cfg_attr(not(test), no_std)]

use num_derive::FromPrimitive;
use static_assertions::const_assert;
use zerocopy::{
    byteorder::little_endian as le, FromBytes, FromZeros, Immutable,
    IntoBytes, KnownLayout, Unaligned,
};

pub use hubpack::error::Error as HubpackError;
use hubpack::SerializedSize;

mod attr;
pub mod ioc;
pub mod iocfc;

pub use attr::{Capabilities, FwAttributes, FwVersion, ATTR_SIGNATURE};

/// Size of [`MsgHeader`] on the wire.
pub const HEADER_LEN: usize = core::mem::size_of::<MsgHeader>();

/// Number of 32-bit mailbox registers in each direction.
pub const MBOX_WORDS: usize = 7;

/// Bytes available to a mailbox message body after the header.
pub const MBOX_BODY_LEN: usize = MBOX_WORDS * 4 - HEADER_LEN;

/// Ring slots are sized in multiples of this.
pub const SLOT_UNIT: usize = 32;

/// Smallest ring slot we will configure.
pub const MIN_SLOT_SIZE: usize = 2 * SLOT_UNIT;

/// Largest ring slot we will configure.
pub const MAX_SLOT_SIZE: usize = 8 * SLOT_UNIT;

/// Replies carry the request's id with this bit set.
pub const REPLY_BIT: u8 = 0x80;

/// Subsystem that owns a message.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, enum_map::Enum,
)]
#[repr(u8)]
pub enum MsgClass {
    /// Reserved for the bring-up mailbox.
    Ioc = 1,
    Iocfc = 2,
    Port = 3,
    Diag = 4,
    Stats = 5,
    Flash = 6,
    Cee = 7,
    Ablk = 8,
    Fcxp = 9,
    Lps = 10,
    Rport = 11,
    Ioim = 12,
    Tskim = 13,
    Uf = 14,
    Sfp = 15,
}

impl MsgClass {
    pub fn from_wire(raw: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(raw)
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
#[repr(C)]
pub struct MsgHeader {
    pub class: u8,
    pub id: u8,
    pub token: le::U16,
}

const_assert!(HEADER_LEN == 4);

impl MsgHeader {
    pub fn new(class: MsgClass, id: u8, token: u16) -> Self {
        Self {
            class: class as u8,
            id,
            token: le::U16::new(token),
        }
    }

    pub fn class(&self) -> Option<MsgClass> {
        MsgClass::from_wire(self.class)
    }

    pub fn token(&self) -> u16 {
        self.token.get()
    }

    pub fn is_reply(&self) -> bool {
        self.id & REPLY_BIT != 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EncodeError {
    /// The output buffer cannot hold even the header.
    BufferTooSmall,
    Hubpack(HubpackError),
}

impl From<HubpackError> for EncodeError {
    fn from(e: HubpackError) -> Self {
        Self::Hubpack(e)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than a header.
    ShortFrame,
    UnknownClass(u8),
    /// The class is known but does not match the expected decoder.
    WrongClass(MsgClass),
    UnknownId(u8),
    Hubpack(HubpackError),
}

impl From<HubpackError> for DecodeError {
    fn from(e: HubpackError) -> Self {
        Self::Hubpack(e)
    }
}

/// A message body type for a single class, keyed by opcode.
pub trait Message: Sized {
    const CLASS: MsgClass;

    fn id(&self) -> u8;

    /// Serializes the body (not the header) into `out`, returning the number
    /// of bytes used.
    fn encode_body(&self, out: &mut [u8]) -> Result<usize, HubpackError>;

    fn decode_body(id: u8, body: &[u8]) -> Result<Self, DecodeError>;
}

pub(crate) fn body<T: serde::de::DeserializeOwned>(
    raw: &[u8],
) -> Result<T, DecodeError> {
    let (t, _rest) = hubpack::deserialize(raw)?;
    Ok(t)
}

/// Writes `msg` with its header into `out`, returning the number of bytes
/// used.
pub fn encode<M: Message>(
    msg: &M,
    token: u16,
    out: &mut [u8],
) -> Result<usize, EncodeError> {
    if out.len() < HEADER_LEN {
        return Err(EncodeError::BufferTooSmall);
    }
    let (hdr, body) = out.split_at_mut(HEADER_LEN);
    MsgHeader::new(M::CLASS, msg.id(), token)
        .write_to(hdr)
        .map_err(|_| EncodeError::BufferTooSmall)?;
    let n = msg.encode_body(body)?;
    Ok(HEADER_LEN + n)
}

/// Splits a frame into its header and body without interpreting the body.
pub fn split(frame: &[u8]) -> Result<(MsgHeader, &[u8]), DecodeError> {
    let (hdr, body) = MsgHeader::read_from_prefix(frame)
        .map_err(|_| DecodeError::ShortFrame)?;
    Ok((hdr, body))
}

/// Decodes a frame as a message of type `M`, returning its token alongside.
pub fn decode<M: Message>(frame: &[u8]) -> Result<(u16, M), DecodeError> {
    let (hdr, body) = split(frame)?;
    match hdr.class() {
        Some(c) if c == M::CLASS => {
            Ok((hdr.token(), M::decode_body(hdr.id, body)?))
        }
        Some(c) => Err(DecodeError::WrongClass(c)),
        None => Err(DecodeError::UnknownClass(hdr.class)),
    }
}

/// One mailbox transfer, as laid out across the mailbox registers.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
#[repr(C)]
pub struct MboxFrame {
    pub header: MsgHeader,
    pub body: [u8; MBOX_BODY_LEN],
}

const_assert!(ioc::IocRequest::MAX_BODY <= MBOX_BODY_LEN);
const_assert!(ioc::IocReply::MAX_BODY <= MBOX_BODY_LEN);

impl MboxFrame {
    pub fn encode<M: Message>(
        msg: &M,
        token: u16,
    ) -> Result<Self, EncodeError> {
        let mut frame = Self::new_zeroed();
        encode(msg, token, frame.as_mut_bytes())?;
        Ok(frame)
    }

    pub fn decode<M: Message>(&self) -> Result<(u16, M), DecodeError> {
        decode(self.as_bytes())
    }

    pub fn to_words(&self) -> [u32; MBOX_WORDS] {
        let words: [le::U32; MBOX_WORDS] = zerocopy::transmute!(*self);
        words.map(|w| w.get())
    }

    pub fn from_words(words: [u32; MBOX_WORDS]) -> Self {
        let words = words.map(le::U32::new);
        zerocopy::transmute!(words)
    }
}

/// Completion status reported by the firmware in replies.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    serde_repr::Serialize_repr,
    serde_repr::Deserialize_repr,
)]
#[repr(u8)]
pub enum FwStatus {
    Ok = 0,
    Failed = 1,
    Busy = 2,
    Invalid = 3,
}

// `serde_repr` and `hubpack` don't know about each other.
impl SerializedSize for FwStatus {
    const MAX_SIZE: usize = core::mem::size_of::<u8>();
}
