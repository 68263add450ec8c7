// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Statistics regions maintained by the storm processors and the management
//! firmware.

use super::RegPair;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Transmit-side per-queue counters.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct PstormPerQueueStat {
    pub sent_ucast_bytes: RegPair,
    pub sent_mcast_bytes: RegPair,
    pub sent_bcast_bytes: RegPair,
    pub sent_ucast_pkts: RegPair,
    pub sent_mcast_pkts: RegPair,
    pub sent_bcast_pkts: RegPair,
    pub error_drop_pkts: RegPair,
}

/// Receive-side per-queue counters.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct UstormPerQueueStat {
    pub rcv_ucast_bytes: RegPair,
    pub rcv_mcast_bytes: RegPair,
    pub rcv_bcast_bytes: RegPair,
    pub rcv_ucast_pkts: RegPair,
    pub rcv_mcast_pkts: RegPair,
    pub rcv_bcast_pkts: RegPair,
}

/// Per-queue discard and aggregation counters.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct MstormPerQueueStat {
    pub ttl0_discard: RegPair,
    pub packet_too_big_discard: RegPair,
    pub no_buff_discard: RegPair,
    pub not_active_discard: RegPair,
    pub tpa_coalesced_pkts: RegPair,
    pub tpa_coalesced_events: RegPair,
    pub tpa_aborts_num: RegPair,
    pub tpa_coalesced_bytes: RegPair,
}

/// Per-port filter discard counters.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct TstormPerPortStat {
    pub trunc_error_discard: RegPair,
    pub mac_error_discard: RegPair,
    pub mftag_filter_discard: RegPair,
    pub eth_mac_filter_discard: RegPair,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct BrbStats {
    pub brb_truncate: [u32; 8],
    pub brb_discard: [u32; 8],
}

/// MAC statistics as published by the management firmware.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct EthPortStats {
    pub r64: u64,
    pub r127: u64,
    pub r255: u64,
    pub r511: u64,
    pub r1023: u64,
    pub r1518: u64,
    pub r1522: u64,
    pub r2047: u64,
    pub r4095: u64,
    pub r9216: u64,
    pub r16383: u64,
    pub rfcs: u64,
    pub rxcf: u64,
    pub rxpf: u64,
    pub rxpp: u64,
    pub raln: u64,
    pub rfcr: u64,
    pub rovr: u64,
    pub rjbr: u64,
    pub rund: u64,
    pub rfrg: u64,
    pub t64: u64,
    pub t127: u64,
    pub t255: u64,
    pub t511: u64,
    pub t1023: u64,
    pub t1518: u64,
    pub t2047: u64,
    pub t4095: u64,
    pub t9216: u64,
    pub t16383: u64,
    pub txpf: u64,
    pub txpp: u64,
    pub tlpiec: u64,
    pub tncl: u64,
    pub rbyte: u64,
    pub rxuca: u64,
    pub rxmca: u64,
    pub rxbca: u64,
    pub rxpok: u64,
    pub tbyte: u64,
    pub txuca: u64,
    pub txmca: u64,
    pub txbca: u64,
    pub txcf: u64,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct PortStats {
    pub brb: BrbStats,
    pub eth: EthPortStats,
}
