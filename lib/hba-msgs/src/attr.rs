// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The firmware attribute block.
//!
//! In response to a get-attributes mailbox command the firmware writes this
//! record into host memory at the address carried in the request. It is too
//! large for the mailbox, so it has a fixed layout of its own rather than a
//! hubpack encoding.

use hubpack::SerializedSize;
use serde::{Deserialize, Serialize};
use zerocopy::{
    byteorder::little_endian as le, FromBytes, Immutable, IntoBytes,
    KnownLayout, Unaligned,
};

use crate::DecodeError;

/// Value of [`FwAttributes::signature`] in a block the firmware has filled.
pub const ATTR_SIGNATURE: u32 = 0xb1fa_a77e;

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
pub struct FwVersion {
    pub major: u8,
    pub minor: u8,
    pub maint: u8,
    pub patch: u8,
}

impl FwVersion {
    pub fn from_bytes(raw: [u8; 4]) -> Self {
        let [major, minor, maint, patch] = raw;
        Self {
            major,
            minor,
            maint,
            patch,
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [self.major, self.minor, self.maint, self.patch]
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const FC = 1 << 0;
        const ETH = 1 << 1;
        const CEE = 1 << 2;
        const FLASH = 1 << 3;
        const DIAG = 1 << 4;
        const INTR_COALESCE = 1 << 5;
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
pub struct FwAttributes {
    pub signature: le::U32,
    pub fw_version: [u8; 4],
    pub card_type: le::U32,
    pub capabilities: le::U32,
    pub port_count: u8,
    pub max_speed_gbps: u8,
    pub pcie_gen: u8,
    pub pcie_lanes: u8,
    pub serial_num: [u8; 16],
    pub model: [u8; 16],
}

impl FwAttributes {
    pub const LEN: usize = core::mem::size_of::<Self>();

    /// Reads an attribute block, checking only that it is long enough.
    pub fn parse(raw: &[u8]) -> Result<Self, DecodeError> {
        let (attr, _rest) =
            Self::read_from_prefix(raw).map_err(|_| DecodeError::ShortFrame)?;
        Ok(attr)
    }

    pub fn signature_ok(&self) -> bool {
        self.signature.get() == ATTR_SIGNATURE
    }

    pub fn version(&self) -> FwVersion {
        FwVersion::from_bytes(self.fw_version)
    }

    /// Bits the host doesn't know about are dropped.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::from_bits_truncate(self.capabilities.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromZeros;

    #[test]
    fn layout_has_no_padding() {
        assert_eq!(FwAttributes::LEN, 52);
    }

    #[test]
    fn parse_blank_block() {
        let raw = [0u8; FwAttributes::LEN];
        let attr = FwAttributes::parse(&raw).unwrap();
        assert!(!attr.signature_ok());
        assert_eq!(attr.version(), FwVersion::default());
    }

    #[test]
    fn parse_short_block() {
        let raw = [0u8; FwAttributes::LEN - 1];
        assert_eq!(FwAttributes::parse(&raw), Err(DecodeError::ShortFrame));
    }

    #[test]
    fn unknown_capabilities_ignored() {
        let mut attr = FwAttributes::new_zeroed();
        attr.signature = le::U32::new(ATTR_SIGNATURE);
        attr.capabilities = le::U32::new(0x8000_0003);
        attr.fw_version = [3, 2, 1, 0];

        let back = FwAttributes::parse(attr.as_bytes()).unwrap();
        assert!(back.signature_ok());
        assert_eq!(back.capabilities(), Capabilities::FC | Capabilities::ETH);
        assert_eq!(
            back.version(),
            FwVersion {
                major: 3,
                minor: 2,
                maint: 1,
                patch: 0
            }
        );
    }
}
