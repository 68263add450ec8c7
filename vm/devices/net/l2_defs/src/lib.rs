// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Firmware interface definitions for the L2 (Ethernet) slow path of a
//! multi-engine, SR-IOV capable NIC.
//!
//! Everything here is little-endian and fixed-layout. Commands ("ramrods")
//! are a [`RamrodHeader`] followed by one of the payloads in [`eth`].
//! Counter regions read back from storm RAM live in [`stats`], and the
//! addresses they live at are in [`regs`].

pub mod eth;
pub mod mac;
pub mod regs;
pub mod stats;

pub use mac::MacAddress;

use open_enum::open_enum;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Maximum number of engines ("hwfns") that can back a single device.
pub const MAX_HWFNS_PER_DEVICE: usize = 2;

pub const ETH_TPA_MAX_AGGS_NUM: u8 = 64;
pub const ETH_RSS_IND_TABLE_ENTRIES_NUM: usize = 128;
pub const ETH_RSS_KEY_SIZE_REGS: usize = 10;
/// log2 of the indirection table size on a single-engine device.
pub const ETH_RSS_TABLE_SIZE_LOG: u8 = 7;
/// log2 of the per-engine indirection table size when two engines split it.
pub const ETH_RSS_CMT_TABLE_SIZE_LOG: u8 = 6;

pub const ETH_MULTICAST_MAC_BINS: usize = 256;
pub const ETH_MULTICAST_MAC_BINS_IN_REGS: usize = ETH_MULTICAST_MAC_BINS / 32;
pub const ETH_MULTICAST_BIN_FROM_MAC_SEED: u32 = 0;
pub const CRC32_POLY: u32 = 0x1edc_6f41;
pub const MAX_MC_ADDRS: usize = 64;

pub const DEFAULT_MAX_BUFFERS_PER_CQE: u8 = 16;

#[open_enum]
#[repr(u8)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub enum ProtocolId {
    ETH = 4,
    COMMON = 6,
}

/// 64-bit counter or DMA address split into two little-endian dwords.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RegPair {
    pub lo: u32,
    pub hi: u32,
}

impl RegPair {
    pub const fn new(value: u64) -> Self {
        Self {
            lo: value as u32,
            hi: (value >> 32) as u32,
        }
    }

    pub const fn get(&self) -> u64 {
        ((self.hi as u64) << 32) | self.lo as u64
    }
}

impl From<u64> for RegPair {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

/// Common header of every slow-path element.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RamrodHeader {
    pub cmd_id: u8,
    pub protocol_id: ProtocolId,
    pub reserved: u16,
    pub cid: u32,
    pub opaque_fid: u16,
    pub echo: u16,
}

/// Slow-path completion as delivered on an RX completion ring.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct EthSlowPathRxCqe {
    pub cqe_type: u8,
    pub ramrod_cmd_id: u8,
    pub error_flag: u8,
    pub reserved: [u8; 5],
    pub echo: u16,
    pub reserved1: [u8; 6],
}
