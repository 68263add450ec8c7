// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Ethernet ramrod payloads.

#![allow(dead_code)]

use super::RegPair;
use super::ETH_MULTICAST_MAC_BINS_IN_REGS;
use super::ETH_RSS_IND_TABLE_ENTRIES_NUM;
use super::ETH_RSS_KEY_SIZE_REGS;
use bitfield_struct::bitfield;
use open_enum::open_enum;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

#[open_enum]
#[repr(u8)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub enum EthRamrodCmdId {
    VPORT_START = 1,
    VPORT_UPDATE = 2,
    VPORT_STOP = 3,
    RX_QUEUE_START = 4,
    RX_QUEUE_STOP = 5,
    TX_QUEUE_START = 6,
    TX_QUEUE_STOP = 7,
    FILTERS_UPDATE = 8,
    RX_QUEUE_UPDATE = 9,
}

#[open_enum]
#[repr(u8)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub enum CommonRamrodCmdId {
    PF_START = 1,
    PF_STOP = 2,
    PF_UPDATE = 5,
}

#[open_enum]
#[repr(u8)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub enum EthFilterType {
    MAC = 0,
    VLAN = 1,
    PAIR = 2,
    INNER_MAC = 3,
    INNER_VLAN = 4,
    INNER_PAIR = 5,
    INNER_MAC_VNI_PAIR = 6,
    MAC_VNI_PAIR = 7,
    VNI = 8,
}

#[open_enum]
#[repr(u8)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub enum EthFilterAction {
    ADD = 0,
    REMOVE = 1,
    REMOVE_ALL = 2,
}

#[open_enum]
#[repr(u8)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub enum EthVportRssMode {
    DISABLED = 0,
    REGULAR = 1,
}

#[bitfield(u16)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RxModeState {
    pub ucast_drop_all: bool,
    pub ucast_accept_all: bool,
    pub ucast_accept_unmatched: bool,
    pub mcast_drop_all: bool,
    pub mcast_accept_all: bool,
    pub bcast_accept_all: bool,
    #[bits(10)]
    reserved: u16,
}

#[bitfield(u16)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct TxModeState {
    pub ucast_drop_all: bool,
    pub ucast_accept_all: bool,
    pub mcast_drop_all: bool,
    pub mcast_accept_all: bool,
    pub bcast_accept_all: bool,
    #[bits(11)]
    reserved: u16,
}

#[bitfield(u16)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RssCapabilities {
    pub ipv4: bool,
    pub ipv6: bool,
    pub ipv4_tcp: bool,
    pub ipv6_tcp: bool,
    pub ipv4_udp: bool,
    pub ipv6_udp: bool,
    #[bits(10)]
    reserved: u16,
}

/// TPA (hardware receive aggregation) parameters, shared by vport start and
/// vport update.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct TpaParam {
    pub tpa_ipv4_en_flg: u8,
    pub tpa_ipv6_en_flg: u8,
    pub tpa_ipv4_tunn_en_flg: u8,
    pub tpa_ipv6_tunn_en_flg: u8,
    pub tpa_pkt_split_flg: u8,
    pub tpa_hdr_data_split_flg: u8,
    pub tpa_gro_consistent_flg: u8,
    pub tpa_max_aggs_num: u8,
    pub tpa_max_size: u16,
    pub tpa_min_size_to_start: u16,
    pub tpa_min_size_to_cont: u16,
    pub max_buff_num: u8,
    pub reserved: u8,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VportStartRamrodData {
    pub vport_id: u8,
    pub sw_fid: u8,
    pub mtu: u16,
    pub drop_ttl0_en: u8,
    pub inner_vlan_removal_en: u8,
    pub rx_mode: RxModeState,
    pub tpa_param: TpaParam,
    pub default_vlan_en: u8,
    pub tx_switching_en: u8,
    pub anti_spoofing_en: u8,
    pub untagged: u8,
    pub handle_ptp_pkts: u8,
    pub silent_vlan_removal_en: u8,
    pub ctl_frame_mac_check_en: u8,
    pub ctl_frame_ethtype_check_en: u8,
    pub default_vlan: u16,
    pub reserved: u16,
}

/// The value/update-flag pairs of a vport update. A value is only applied by
/// firmware when its `update_*` flag is set.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VportUpdateRamrodDataCmn {
    pub vport_id: u8,
    pub update_rx_active_flg: u8,
    pub rx_active_flg: u8,
    pub update_tx_active_flg: u8,
    pub tx_active_flg: u8,
    pub update_rx_mode_flg: u8,
    pub update_tx_mode_flg: u8,
    pub update_approx_mcast_flg: u8,
    pub update_rss_flg: u8,
    pub update_inner_vlan_removal_en_flg: u8,
    pub inner_vlan_removal_en: u8,
    pub update_tpa_param_flg: u8,
    pub update_tpa_en_flg: u8,
    pub update_tx_switching_en_flg: u8,
    pub tx_switching_en: u8,
    pub update_anti_spoofing_en_flg: u8,
    pub anti_spoofing_en: u8,
    pub update_default_vlan_en_flg: u8,
    pub default_vlan_en: u8,
    pub update_default_vlan_flg: u8,
    pub update_accept_any_vlan_flg: u8,
    pub accept_any_vlan: u8,
    pub silent_vlan_removal_en: u8,
    pub reserved: u8,
    pub default_vlan: u16,
    pub reserved2: u16,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VportUpdateRamrodMcast {
    pub bins: [u32; ETH_MULTICAST_MAC_BINS_IN_REGS],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VportRssConfig {
    pub capabilities: RssCapabilities,
    pub rss_id: u8,
    pub rss_mode: EthVportRssMode,
    pub update_rss_key: u8,
    pub update_rss_ind_table: u8,
    pub update_rss_capabilities: u8,
    pub tbl_size: u8,
    pub indirection_table: [u16; ETH_RSS_IND_TABLE_ENTRIES_NUM],
    pub rss_key: [u32; ETH_RSS_KEY_SIZE_REGS],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VportUpdateRamrodData {
    pub common: VportUpdateRamrodDataCmn,
    pub rx_mode: RxModeState,
    pub tx_mode: TxModeState,
    pub tpa_param: TpaParam,
    pub approx_mcast: VportUpdateRamrodMcast,
    pub rss_config: VportRssConfig,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VportStopRamrodData {
    pub vport_id: u8,
    pub reserved: [u8; 7],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RxQueueStartRamrodData {
    pub rx_queue_id: u16,
    pub num_of_pbl_pages: u16,
    pub bd_max_bytes: u16,
    pub sb_id: u16,
    pub sb_index: u8,
    pub vport_id: u8,
    pub stats_counter_id: u8,
    pub complete_cqe_flg: u8,
    pub complete_event_flg: u8,
    pub vf_rx_prod_use_zone_a: u8,
    pub vf_rx_prod_index: u8,
    pub reserved: u8,
    pub bd_base: RegPair,
    pub cqe_pbl_addr: RegPair,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RxQueueUpdateRamrodData {
    pub rx_queue_id: u16,
    pub complete_cqe_flg: u8,
    pub complete_event_flg: u8,
    pub vport_id: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct RxQueueStopRamrodData {
    pub rx_queue_id: u16,
    pub complete_cqe_flg: u8,
    pub complete_event_flg: u8,
    pub vport_id: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct TxQueueStartRamrodData {
    pub sb_id: u16,
    pub sb_index: u8,
    pub vport_id: u8,
    pub stats_counter_id: u8,
    pub reserved: u8,
    pub queue_zone_id: u16,
    pub same_as_last_id: u16,
    pub pbl_size: u16,
    pub qm_pq_id: u16,
    pub reserved2: u16,
    pub pbl_base_addr: RegPair,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct FilterCmdHeader {
    pub rx: u8,
    pub tx: u8,
    pub cmd_cnt: u8,
    pub assert_on_error: u8,
    pub reserved: [u8; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct FilterCmd {
    pub filter_type: EthFilterType,
    pub vport_id: u8,
    pub action: EthFilterAction,
    pub reserved: u8,
    pub vni: u32,
    pub mac_msb: u16,
    pub mac_mid: u16,
    pub mac_lsb: u16,
    pub vlan_id: u16,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VportFilterUpdateRamrodData {
    pub filter_cmd_hdr: FilterCmdHeader,
    pub filter_cmds: [FilterCmd; 2],
}

/// Tunnel portion of a PF update, the only part of that ramrod this crate
/// drives.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct PfUpdateTunnelConfig {
    pub update_vxlan_udp_port_flg: u8,
    pub update_geneve_udp_port_flg: u8,
    pub reserved: u16,
    pub vxlan_udp_port: u16,
    pub geneve_udp_port: u16,
}
