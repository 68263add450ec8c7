// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Vport start, update and stop commands.

use crate::error::L2Error;
use crate::filter::McastBins;
use crate::resources::ResourceManager;
use crate::rss::build_rss_config;
use crate::rss::RssParams;
use l2_defs::eth::RxModeState;
use l2_defs::eth::TpaParam;
use l2_defs::eth::TxModeState;
use l2_defs::eth::VportStartRamrodData;
use l2_defs::eth::VportStopRamrodData;
use l2_defs::eth::VportUpdateRamrodData;
use l2_defs::ETH_TPA_MAX_AGGS_NUM;
use std::ops::BitOr;
use std::ops::BitOrAssign;
use zerocopy::FromZeros;

/// Hardware receive aggregation policy for a new vport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TpaMode {
    /// No aggregation.
    #[default]
    None,
    /// GRO-compatible aggregation.
    Gro,
}

/// Parameters for starting a vport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VportStartParams {
    /// Receive aggregation policy.
    pub tpa_mode: TpaMode,
    /// Strip the inner VLAN tag.
    pub remove_inner_vlan: bool,
    /// Switch traffic between functions in the device.
    pub tx_switching: bool,
    /// Pass PTP packets to the host.
    pub handle_ptp_pkts: bool,
    /// Drop VLAN-tagged frames.
    pub only_untagged: bool,
    /// Drop packets with a zero TTL.
    pub drop_ttl0: bool,
    /// Function the vport belongs to.
    pub opaque_fid: u16,
    /// Software function id.
    pub sw_fid: u8,
    /// Relative vport id.
    pub vport_id: u8,
    /// MTU.
    pub mtu: u16,
    /// Check the MAC of control frames.
    pub check_mac: bool,
    /// Check the ethertype of control frames.
    pub check_ethtype: bool,
    /// Receive buffers one completion may span.
    pub max_buffers_per_cqe: u8,
}

/// Builds the vport start ramrod. The vport comes up dropping all unicast
/// and multicast traffic.
pub fn build_vport_start(
    resources: &ResourceManager,
    params: &VportStartParams,
) -> Result<VportStartRamrodData, L2Error> {
    let mut data = VportStartRamrodData::new_zeroed();
    data.vport_id = resources.fw_vport(params.vport_id)?;
    data.sw_fid = params.sw_fid;
    data.mtu = params.mtu;
    data.handle_ptp_pkts = params.handle_ptp_pkts.into();
    data.inner_vlan_removal_en = params.remove_inner_vlan.into();
    data.drop_ttl0_en = params.drop_ttl0.into();
    data.untagged = params.only_untagged.into();
    data.rx_mode = RxModeState::new()
        .with_ucast_drop_all(true)
        .with_mcast_drop_all(true);

    data.tpa_param = TpaParam::new_zeroed();
    data.tpa_param.max_buff_num = params.max_buffers_per_cqe;
    match params.tpa_mode {
        TpaMode::Gro => {
            let tpa = &mut data.tpa_param;
            tpa.tpa_max_aggs_num = ETH_TPA_MAX_AGGS_NUM;
            tpa.tpa_max_size = u16::MAX;
            tpa.tpa_min_size_to_cont = params.mtu / 2;
            tpa.tpa_min_size_to_start = params.mtu / 2;
            tpa.tpa_ipv4_en_flg = 1;
            tpa.tpa_ipv6_en_flg = 1;
            tpa.tpa_pkt_split_flg = 1;
            tpa.tpa_gro_consistent_flg = 1;
        }
        TpaMode::None => {}
    }

    data.tx_switching_en = params.tx_switching.into();
    data.ctl_frame_mac_check_en = params.check_mac.into();
    data.ctl_frame_ethtype_check_en = params.check_ethtype.into();
    Ok(data)
}

/// Which traffic classes a vport accepts in one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptFlags(u8);

#[allow(missing_docs)]
impl AcceptFlags {
    pub const NONE: Self = Self(0x01);
    pub const UCAST_MATCHED: Self = Self(0x02);
    pub const UCAST_UNMATCHED: Self = Self(0x04);
    pub const MCAST_MATCHED: Self = Self(0x08);
    pub const MCAST_UNMATCHED: Self = Self(0x10);
    pub const BCAST: Self = Self(0x20);

    /// Returns true if all of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    const fn any(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    fn rx_mode(self) -> RxModeState {
        let ucast = Self::UCAST_MATCHED | Self::UCAST_UNMATCHED;
        let mcast = Self::MCAST_MATCHED | Self::MCAST_UNMATCHED;
        RxModeState::new()
            .with_ucast_drop_all(!self.any(ucast))
            .with_ucast_accept_unmatched(self.contains(Self::UCAST_UNMATCHED))
            .with_mcast_drop_all(!self.any(mcast))
            .with_mcast_accept_all(self.contains(mcast))
            .with_bcast_accept_all(self.contains(Self::BCAST))
    }

    fn tx_mode(self) -> TxModeState {
        let mcast = Self::MCAST_MATCHED | Self::MCAST_UNMATCHED;
        TxModeState::new()
            .with_ucast_drop_all(self.contains(Self::NONE))
            .with_mcast_drop_all(self.contains(Self::NONE))
            .with_mcast_accept_all(self.contains(mcast))
            .with_bcast_accept_all(self.contains(Self::BCAST))
    }
}

impl BitOr for AcceptFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AcceptFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Aggregation settings changed by a vport update. Fields map one to one
/// onto the firmware's TPA parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct SgeTpaParams {
    pub max_buffers_per_cqe: u8,
    pub update_tpa_en_flg: bool,
    pub tpa_ipv4_en_flg: bool,
    pub tpa_ipv6_en_flg: bool,
    pub tpa_ipv4_tunn_en_flg: bool,
    pub tpa_ipv6_tunn_en_flg: bool,
    pub update_tpa_param_flg: bool,
    pub tpa_pkt_split_flg: bool,
    pub tpa_hdr_data_split_flg: bool,
    pub tpa_gro_consistent_flg: bool,
    pub tpa_max_aggs_num: u8,
    pub tpa_max_size: u16,
    pub tpa_min_size_to_start: u16,
    pub tpa_min_size_to_cont: u16,
}

/// A partial vport update. Only fields that are `Some` are changed on the
/// device.
#[derive(Debug, Clone, Default)]
pub struct VportUpdateParams<'a> {
    /// Function the vport belongs to.
    pub opaque_fid: u16,
    /// Relative vport id.
    pub vport_id: u8,
    /// Start or stop receiving.
    pub rx_active: Option<bool>,
    /// Start or stop transmitting.
    pub tx_active: Option<bool>,
    /// Strip the inner VLAN tag.
    pub inner_vlan_removal: Option<bool>,
    /// Tag untagged traffic with `default_vlan`.
    pub default_vlan_enable: Option<bool>,
    /// The default VLAN.
    pub default_vlan: Option<u16>,
    /// Applied with every update.
    pub silent_vlan_removal: bool,
    /// Switch traffic between functions in the device.
    pub tx_switching: Option<bool>,
    /// Drop transmitted frames with a foreign source MAC.
    pub anti_spoofing: Option<bool>,
    /// Accept frames with any VLAN tag.
    pub accept_any_vlan: Option<bool>,
    /// Replaces the whole approximate multicast filter.
    pub approx_mcast: Option<McastBins>,
    /// Receive accept mode.
    pub rx_accept_filter: Option<AcceptFlags>,
    /// Transmit accept mode.
    pub tx_accept_filter: Option<AcceptFlags>,
    /// RSS configuration.
    pub rss: Option<RssParams<'a>>,
    /// Aggregation settings.
    pub sge_tpa: Option<SgeTpaParams>,
}

fn flag<T: Default>(value: Option<T>) -> (u8, T) {
    match value {
        Some(v) => (1, v),
        None => (0, T::default()),
    }
}

/// Builds the vport update ramrod. Nothing is built if the RSS block is
/// invalid.
pub fn build_vport_update(
    resources: &ResourceManager,
    params: &VportUpdateParams<'_>,
    rss_table_max_size: usize,
) -> Result<VportUpdateRamrodData, L2Error> {
    let mut data = VportUpdateRamrodData::new_zeroed();
    let cmn = &mut data.common;
    cmn.vport_id = resources.fw_vport(params.vport_id)?;

    let (update, active) = flag(params.rx_active);
    cmn.update_rx_active_flg = update;
    cmn.rx_active_flg = active.into();
    let (update, active) = flag(params.tx_active);
    cmn.update_tx_active_flg = update;
    cmn.tx_active_flg = active.into();
    let (update, accept) = flag(params.accept_any_vlan);
    cmn.update_accept_any_vlan_flg = update;
    cmn.accept_any_vlan = accept.into();
    let (update, remove) = flag(params.inner_vlan_removal);
    cmn.update_inner_vlan_removal_en_flg = update;
    cmn.inner_vlan_removal_en = remove.into();
    let (update, enable) = flag(params.default_vlan_enable);
    cmn.update_default_vlan_en_flg = update;
    cmn.default_vlan_en = enable.into();
    let (update, vlan) = flag(params.default_vlan);
    cmn.update_default_vlan_flg = update;
    cmn.default_vlan = vlan;
    cmn.silent_vlan_removal_en = params.silent_vlan_removal.into();
    let (update, enable) = flag(params.tx_switching);
    cmn.update_tx_switching_en_flg = update;
    cmn.tx_switching_en = enable.into();
    let (update, enable) = flag(params.anti_spoofing);
    cmn.update_anti_spoofing_en_flg = update;
    cmn.anti_spoofing_en = enable.into();

    if let Some(rss) = &params.rss {
        data.rss_config = build_rss_config(resources, rss, rss_table_max_size)?;
        data.common.update_rss_flg = rss.update_rss_config.into();
    }

    if let Some(bins) = params.approx_mcast {
        data.common.update_approx_mcast_flg = 1;
        data.approx_mcast.bins = bins.0;
    }

    if let Some(accept) = params.rx_accept_filter {
        data.common.update_rx_mode_flg = 1;
        data.rx_mode = accept.rx_mode();
        tracing::trace!(state = data.rx_mode.into_bits(), "rx mode");
    }
    if let Some(accept) = params.tx_accept_filter {
        data.common.update_tx_mode_flg = 1;
        data.tx_mode = accept.tx_mode();
        tracing::trace!(state = data.tx_mode.into_bits(), "tx mode");
    }

    if let Some(sge) = &params.sge_tpa {
        data.common.update_tpa_en_flg = sge.update_tpa_en_flg.into();
        data.common.update_tpa_param_flg = sge.update_tpa_param_flg.into();
        data.tpa_param = TpaParam {
            tpa_ipv4_en_flg: sge.tpa_ipv4_en_flg.into(),
            tpa_ipv6_en_flg: sge.tpa_ipv6_en_flg.into(),
            tpa_ipv4_tunn_en_flg: sge.tpa_ipv4_tunn_en_flg.into(),
            tpa_ipv6_tunn_en_flg: sge.tpa_ipv6_tunn_en_flg.into(),
            tpa_pkt_split_flg: sge.tpa_pkt_split_flg.into(),
            tpa_hdr_data_split_flg: sge.tpa_hdr_data_split_flg.into(),
            tpa_gro_consistent_flg: sge.tpa_gro_consistent_flg.into(),
            tpa_max_aggs_num: sge.tpa_max_aggs_num,
            tpa_max_size: sge.tpa_max_size,
            tpa_min_size_to_start: sge.tpa_min_size_to_start,
            tpa_min_size_to_cont: sge.tpa_min_size_to_cont,
            max_buff_num: sge.max_buffers_per_cqe,
            reserved: 0,
        };
    }
    Ok(data)
}

/// Builds the vport stop ramrod.
pub fn build_vport_stop(
    resources: &ResourceManager,
    vport_id: u8,
) -> Result<VportStopRamrodData, L2Error> {
    let mut data = VportStopRamrodData::new_zeroed();
    data.vport_id = resources.fw_vport(vport_id)?;
    Ok(data)
}
