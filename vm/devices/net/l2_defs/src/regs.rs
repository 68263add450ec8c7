// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! BAR0 and doorbell address map for the parts of the device the L2 slow path
//! touches directly.

use super::stats::MstormPerQueueStat;
use super::stats::PstormPerQueueStat;
use super::stats::TstormPerPortStat;
use super::stats::UstormPerQueueStat;

pub const BAR0_MAP_REG_TSDM_RAM: u32 = 0x01c8_0000;
pub const BAR0_MAP_REG_MSDM_RAM: u32 = 0x01d0_0000;
pub const BAR0_MAP_REG_USDM_RAM: u32 = 0x01d8_0000;
pub const BAR0_MAP_REG_PSDM_RAM: u32 = 0x01f0_0000;

/// Window into MSDM RAM through the GTT, where the PF RX producers live.
pub const GTT_BAR0_MAP_REG_MSDM_RAM: u32 = 0x0001_6000;

const MSTORM_QUEUE_STAT_BASE: u32 = 0x4360;
const USTORM_QUEUE_STAT_BASE: u32 = 0xe760;
const PSTORM_QUEUE_STAT_BASE: u32 = 0xa3a0;
const TSTORM_PORT_STAT_BASE: u32 = 0x3fa0;
const MSTORM_ETH_PF_PRODS_BASE: u32 = 0xb880;

const QUEUE_STAT_STRIDE: u32 = 0x80;
const PORT_STAT_STRIDE: u32 = 0x40;

const _: () = assert!(size_of::<MstormPerQueueStat>() as u32 <= QUEUE_STAT_STRIDE);
const _: () = assert!(size_of::<UstormPerQueueStat>() as u32 <= QUEUE_STAT_STRIDE);
const _: () = assert!(size_of::<PstormPerQueueStat>() as u32 <= QUEUE_STAT_STRIDE);
const _: () = assert!(size_of::<TstormPerPortStat>() as u32 <= PORT_STAT_STRIDE);

pub const fn mstorm_queue_stat_offset(stat_counter_id: u16) -> u32 {
    MSTORM_QUEUE_STAT_BASE + stat_counter_id as u32 * QUEUE_STAT_STRIDE
}

pub const fn ustorm_queue_stat_offset(stat_counter_id: u16) -> u32 {
    USTORM_QUEUE_STAT_BASE + stat_counter_id as u32 * QUEUE_STAT_STRIDE
}

pub const fn pstorm_queue_stat_offset(stat_counter_id: u16) -> u32 {
    PSTORM_QUEUE_STAT_BASE + stat_counter_id as u32 * QUEUE_STAT_STRIDE
}

pub const fn tstorm_port_stat_offset(port: u8) -> u32 {
    TSTORM_PORT_STAT_BASE + port as u32 * PORT_STAT_STRIDE
}

/// Offset of a PF RX queue's producer block, relative to
/// [`GTT_BAR0_MAP_REG_MSDM_RAM`].
pub const fn mstorm_eth_pf_prods_offset(queue_zone_id: u16) -> u32 {
    MSTORM_ETH_PF_PRODS_BASE + queue_zone_id as u32 * 4
}

/// Offset of the statistics block inside the management firmware's public
/// port structure.
pub const PUBLIC_PORT_STATS_OFFSET: u32 = 0x5c;

pub const DQ_DEMS_LEGACY: u32 = 0;
pub const DB_LEGACY_ADDR_DEMS_SHIFT: u32 = 2;
pub const DB_LEGACY_ADDR_ICID_SHIFT: u32 = 5;

/// Doorbell offset for a connection, relative to the doorbell BAR.
pub const fn db_addr(cid: u32, dems: u32) -> u32 {
    (dems << DB_LEGACY_ADDR_DEMS_SHIFT) | (cid << DB_LEGACY_ADDR_ICID_SHIFT)
}
