// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Vport and port statistics.

use crate::config::StatsRegion;
use crate::config::VfStatsInfo;
use crate::io::read_region;
use crate::io::zero_region;
use crate::io::RegisterIo;
use l2_defs::regs::mstorm_queue_stat_offset;
use l2_defs::regs::pstorm_queue_stat_offset;
use l2_defs::regs::tstorm_port_stat_offset;
use l2_defs::regs::ustorm_queue_stat_offset;
use l2_defs::regs::BAR0_MAP_REG_MSDM_RAM;
use l2_defs::regs::BAR0_MAP_REG_PSDM_RAM;
use l2_defs::regs::BAR0_MAP_REG_TSDM_RAM;
use l2_defs::regs::BAR0_MAP_REG_USDM_RAM;
use l2_defs::regs::PUBLIC_PORT_STATS_OFFSET;
use l2_defs::stats::MstormPerQueueStat;
use l2_defs::stats::PortStats;
use l2_defs::stats::PstormPerQueueStat;
use l2_defs::stats::TstormPerPortStat;
use l2_defs::stats::UstormPerQueueStat;
use serde::Serialize;
use std::ops::AddAssign;
use std::ops::Sub;

macro_rules! eth_stats {
    ($($(#[$attr:meta])* $name:ident,)*) => {
        /// Ethernet counters for the device's base vport, summed over all
        /// engines.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
        #[allow(missing_docs)]
        pub struct EthStats {
            $($(#[$attr])* pub $name: u64,)*
        }

        impl AddAssign for EthStats {
            fn add_assign(&mut self, rhs: Self) {
                $(self.$name = self.$name.wrapping_add(rhs.$name);)*
            }
        }

        impl Sub for EthStats {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self {
                    $($name: self.$name.wrapping_sub(rhs.$name),)*
                }
            }
        }
    };
}

eth_stats! {
    no_buff_discards,
    packet_too_big_discard,
    ttl0_discard,
    rx_ucast_bytes,
    rx_mcast_bytes,
    rx_bcast_bytes,
    rx_ucast_pkts,
    rx_mcast_pkts,
    rx_bcast_pkts,
    mftag_filter_discards,
    mac_filter_discards,
    tx_ucast_bytes,
    tx_mcast_bytes,
    tx_bcast_bytes,
    tx_ucast_pkts,
    tx_mcast_pkts,
    tx_bcast_pkts,
    tx_err_drop_pkts,
    tpa_coalesced_pkts,
    tpa_coalesced_events,
    tpa_aborts_num,
    tpa_coalesced_bytes,

    // Port counters, maintained by the management firmware.
    rx_64_byte_packets,
    rx_65_to_127_byte_packets,
    rx_128_to_255_byte_packets,
    rx_256_to_511_byte_packets,
    rx_512_to_1023_byte_packets,
    rx_1024_to_1518_byte_packets,
    rx_1519_to_1522_byte_packets,
    rx_1519_to_2047_byte_packets,
    rx_2048_to_4095_byte_packets,
    rx_4096_to_9216_byte_packets,
    rx_9217_to_16383_byte_packets,
    rx_crc_errors,
    rx_mac_crtl_frames,
    rx_pause_frames,
    rx_pfc_frames,
    rx_align_errors,
    rx_carrier_errors,
    rx_oversize_packets,
    rx_jabbers,
    rx_undersize_packets,
    rx_fragments,
    tx_64_byte_packets,
    tx_65_to_127_byte_packets,
    tx_128_to_255_byte_packets,
    tx_256_to_511_byte_packets,
    tx_512_to_1023_byte_packets,
    tx_1024_to_1518_byte_packets,
    tx_1519_to_2047_byte_packets,
    tx_2048_to_4095_byte_packets,
    tx_4096_to_9216_byte_packets,
    tx_9217_to_16383_byte_packets,
    tx_pause_frames,
    tx_pfc_frames,
    tx_lpi_entry_count,
    tx_total_collisions,
    brb_truncates,
    brb_discards,
    rx_mac_bytes,
    rx_mac_uc_packets,
    rx_mac_mc_packets,
    rx_mac_bc_packets,
    rx_mac_frames_ok,
    tx_mac_bytes,
    tx_mac_uc_packets,
    tx_mac_mc_packets,
    tx_mac_bc_packets,
    tx_mac_ctrl_frames,
}

/// Where one engine's counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsRegions {
    /// Receive discard and aggregation counters.
    pub mstats: StatsRegion,
    /// Receive counters.
    pub ustats: StatsRegion,
    /// Transmit counters.
    pub pstats: StatsRegion,
    /// Port filter discard counters.
    pub tstats: StatsRegion,
    /// The management firmware's port statistics, if there are any to read.
    pub port: Option<StatsRegion>,
}

fn region<T>(address: u32) -> StatsRegion {
    StatsRegion {
        address,
        len: size_of::<T>() as u32,
    }
}

impl StatsRegions {
    /// Regions of a PF, for the absolute statistics counter `stats_id`.
    pub fn for_pf(stats_id: u8, port: u8, mcp_port_addr: Option<u32>) -> Self {
        let stats_id = stats_id.into();
        Self {
            mstats: region::<MstormPerQueueStat>(
                BAR0_MAP_REG_MSDM_RAM + mstorm_queue_stat_offset(stats_id),
            ),
            ustats: region::<UstormPerQueueStat>(
                BAR0_MAP_REG_USDM_RAM + ustorm_queue_stat_offset(stats_id),
            ),
            pstats: region::<PstormPerQueueStat>(
                BAR0_MAP_REG_PSDM_RAM + pstorm_queue_stat_offset(stats_id),
            ),
            tstats: region::<TstormPerPortStat>(
                BAR0_MAP_REG_TSDM_RAM + tstorm_port_stat_offset(port),
            ),
            port: mcp_port_addr
                .map(|addr| region::<PortStats>(addr + PUBLIC_PORT_STATS_OFFSET)),
        }
    }

    /// Regions a VF negotiated with its PF. A VF sees no port statistics.
    pub fn for_vf(info: &VfStatsInfo) -> Self {
        Self {
            mstats: info.mstats,
            ustats: info.ustats,
            pstats: info.pstats,
            tstats: info.tstats,
            port: None,
        }
    }
}

/// Reads one engine's counters.
pub fn read_engine_stats(io: &dyn RegisterIo, regions: &StatsRegions) -> anyhow::Result<EthStats> {
    let mut stats = EthStats::default();

    let m: MstormPerQueueStat = read_region(io, regions.mstats.address, regions.mstats.len)?;
    stats.no_buff_discards = m.no_buff_discard.get();
    stats.packet_too_big_discard = m.packet_too_big_discard.get();
    stats.ttl0_discard = m.ttl0_discard.get();
    stats.tpa_coalesced_pkts = m.tpa_coalesced_pkts.get();
    stats.tpa_coalesced_events = m.tpa_coalesced_events.get();
    stats.tpa_aborts_num = m.tpa_aborts_num.get();
    stats.tpa_coalesced_bytes = m.tpa_coalesced_bytes.get();

    let u: UstormPerQueueStat = read_region(io, regions.ustats.address, regions.ustats.len)?;
    stats.rx_ucast_bytes = u.rcv_ucast_bytes.get();
    stats.rx_mcast_bytes = u.rcv_mcast_bytes.get();
    stats.rx_bcast_bytes = u.rcv_bcast_bytes.get();
    stats.rx_ucast_pkts = u.rcv_ucast_pkts.get();
    stats.rx_mcast_pkts = u.rcv_mcast_pkts.get();
    stats.rx_bcast_pkts = u.rcv_bcast_pkts.get();

    let t: TstormPerPortStat = read_region(io, regions.tstats.address, regions.tstats.len)?;
    stats.mftag_filter_discards = t.mftag_filter_discard.get();
    stats.mac_filter_discards = t.eth_mac_filter_discard.get();

    let p: PstormPerQueueStat = read_region(io, regions.pstats.address, regions.pstats.len)?;
    stats.tx_ucast_bytes = p.sent_ucast_bytes.get();
    stats.tx_mcast_bytes = p.sent_mcast_bytes.get();
    stats.tx_bcast_bytes = p.sent_bcast_bytes.get();
    stats.tx_ucast_pkts = p.sent_ucast_pkts.get();
    stats.tx_mcast_pkts = p.sent_mcast_pkts.get();
    stats.tx_bcast_pkts = p.sent_bcast_pkts.get();
    stats.tx_err_drop_pkts = p.error_drop_pkts.get();

    if let Some(port) = &regions.port {
        let ps: PortStats = read_region(io, port.address, port.len)?;
        let e = &ps.eth;
        stats.rx_64_byte_packets = e.r64;
        stats.rx_65_to_127_byte_packets = e.r127;
        stats.rx_128_to_255_byte_packets = e.r255;
        stats.rx_256_to_511_byte_packets = e.r511;
        stats.rx_512_to_1023_byte_packets = e.r1023;
        stats.rx_1024_to_1518_byte_packets = e.r1518;
        stats.rx_1519_to_1522_byte_packets = e.r1522;
        stats.rx_1519_to_2047_byte_packets = e.r2047;
        stats.rx_2048_to_4095_byte_packets = e.r4095;
        stats.rx_4096_to_9216_byte_packets = e.r9216;
        stats.rx_9217_to_16383_byte_packets = e.r16383;
        stats.rx_crc_errors = e.rfcs;
        stats.rx_mac_crtl_frames = e.rxcf;
        stats.rx_pause_frames = e.rxpf;
        stats.rx_pfc_frames = e.rxpp;
        stats.rx_align_errors = e.raln;
        stats.rx_carrier_errors = e.rfcr;
        stats.rx_oversize_packets = e.rovr;
        stats.rx_jabbers = e.rjbr;
        stats.rx_undersize_packets = e.rund;
        stats.rx_fragments = e.rfrg;
        stats.tx_64_byte_packets = e.t64;
        stats.tx_65_to_127_byte_packets = e.t127;
        stats.tx_128_to_255_byte_packets = e.t255;
        stats.tx_256_to_511_byte_packets = e.t511;
        stats.tx_512_to_1023_byte_packets = e.t1023;
        stats.tx_1024_to_1518_byte_packets = e.t1518;
        stats.tx_1519_to_2047_byte_packets = e.t2047;
        stats.tx_2048_to_4095_byte_packets = e.t4095;
        stats.tx_4096_to_9216_byte_packets = e.t9216;
        stats.tx_9217_to_16383_byte_packets = e.t16383;
        stats.tx_pause_frames = e.txpf;
        stats.tx_pfc_frames = e.txpp;
        stats.tx_lpi_entry_count = e.tlpiec;
        stats.tx_total_collisions = e.tncl;
        stats.rx_mac_bytes = e.rbyte;
        stats.rx_mac_uc_packets = e.rxuca;
        stats.rx_mac_mc_packets = e.rxmca;
        stats.rx_mac_bc_packets = e.rxbca;
        stats.rx_mac_frames_ok = e.rxpok;
        stats.tx_mac_bytes = e.tbyte;
        stats.tx_mac_uc_packets = e.txuca;
        stats.tx_mac_mc_packets = e.txmca;
        stats.tx_mac_bc_packets = e.txbca;
        stats.tx_mac_ctrl_frames = e.txcf;
        stats.brb_truncates = ps.brb.brb_truncate.iter().map(|&v| u64::from(v)).sum();
        stats.brb_discards = ps.brb.brb_discard.iter().map(|&v| u64::from(v)).sum();
    }
    Ok(stats)
}

/// Zeroes one engine's per-queue counters. Port counters and the port
/// filter counters cannot be cleared this way.
pub fn zero_engine_stats(io: &dyn RegisterIo, regions: &StatsRegions) -> anyhow::Result<()> {
    zero_region::<MstormPerQueueStat>(io, regions.mstats.address, regions.mstats.len)?;
    zero_region::<UstormPerQueueStat>(io, regions.ustats.address, regions.ustats.len)?;
    zero_region::<PstormPerQueueStat>(io, regions.pstats.address, regions.pstats.len)?;
    Ok(())
}
