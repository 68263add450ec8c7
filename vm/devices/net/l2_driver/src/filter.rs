// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Unicast filter commands and the approximate multicast filter.

use crate::error::L2Error;
use crate::resources::ResourceManager;
use crate::vport::AcceptFlags;
use l2_defs::eth::EthFilterAction;
use l2_defs::eth::EthFilterType;
use l2_defs::eth::FilterCmd;
use l2_defs::eth::FilterCmdHeader;
use l2_defs::eth::VportFilterUpdateRamrodData;
use l2_defs::MacAddress;
use l2_defs::CRC32_POLY;
use l2_defs::ETH_MULTICAST_BIN_FROM_MAC_SEED;
use l2_defs::ETH_MULTICAST_MAC_BINS_IN_REGS;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::HashSet;
use zerocopy::FromZeros;

/// What to do with a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOpcode {
    /// Add the filter.
    Add,
    /// Remove the filter.
    Remove,
    /// Remove the filter from one vport and add it to another.
    Move,
    /// Remove all filters of the type from the vport, then add this one.
    Replace,
    /// Remove all filters of the type.
    Flush,
}

/// What a unicast filter matches on. The inner variants match the
/// encapsulated frame of a tunneled packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum UcastFilterType {
    Mac,
    Vlan,
    MacVlan,
    InnerMac,
    InnerVlan,
    InnerPair,
    InnerMacVniPair,
    MacVniPair,
    Vni,
}

impl UcastFilterType {
    fn fw_type(self) -> EthFilterType {
        match self {
            Self::Mac => EthFilterType::MAC,
            Self::Vlan => EthFilterType::VLAN,
            Self::MacVlan => EthFilterType::PAIR,
            Self::InnerMac => EthFilterType::INNER_MAC,
            Self::InnerVlan => EthFilterType::INNER_VLAN,
            Self::InnerPair => EthFilterType::INNER_PAIR,
            Self::InnerMacVniPair => EthFilterType::INNER_MAC_VNI_PAIR,
            Self::MacVniPair => EthFilterType::MAC_VNI_PAIR,
            Self::Vni => EthFilterType::VNI,
        }
    }

    fn has_mac(self) -> bool {
        matches!(
            self,
            Self::Mac
                | Self::MacVlan
                | Self::InnerMac
                | Self::InnerPair
                | Self::InnerMacVniPair
                | Self::MacVniPair
        )
    }

    fn has_vlan(self) -> bool {
        matches!(
            self,
            Self::Vlan | Self::MacVlan | Self::InnerVlan | Self::InnerPair
        )
    }

    fn has_vni(self) -> bool {
        matches!(self, Self::InnerMacVniPair | Self::MacVniPair | Self::Vni)
    }
}

/// A unicast filter operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UcastFilter {
    /// What to do.
    pub opcode: FilterOpcode,
    /// What to match on. Selects which of `mac`, `vlan` and `vni` are used.
    pub filter_type: UcastFilterType,
    /// Apply to received traffic.
    pub is_rx: bool,
    /// Apply to transmitted traffic.
    pub is_tx: bool,
    /// Relative vport the filter is added to.
    pub vport_to_add_to: u8,
    /// Relative vport the filter is removed from.
    pub vport_to_remove_from: u8,
    /// The MAC to match.
    pub mac: MacAddress,
    /// The VLAN to match.
    pub vlan: u16,
    /// The tunnel VNI to match.
    pub vni: u32,
    /// Ask firmware to assert if the command fails.
    pub assert_on_error: bool,
}

fn fw_filter_action(opcode: FilterOpcode) -> Option<EthFilterAction> {
    match opcode {
        FilterOpcode::Add => Some(EthFilterAction::ADD),
        FilterOpcode::Remove => Some(EthFilterAction::REMOVE),
        FilterOpcode::Flush => Some(EthFilterAction::REMOVE_ALL),
        FilterOpcode::Move | FilterOpcode::Replace => None,
    }
}

/// Firmware holds a MAC as three little-endian words, most significant
/// pair first, with the bytes of each pair swapped.
fn fw_mac_words(mac: MacAddress) -> [u16; 3] {
    let m = mac.to_bytes();
    [
        u16::from_le_bytes([m[1], m[0]]),
        u16::from_le_bytes([m[3], m[2]]),
        u16::from_le_bytes([m[5], m[4]]),
    ]
}

/// Builds the filters-update ramrod for a unicast filter operation.
pub fn build_ucast_ramrod(
    resources: &ResourceManager,
    filter: &UcastFilter,
) -> Result<VportFilterUpdateRamrodData, L2Error> {
    let vport_to_remove_from = resources.fw_vport(filter.vport_to_remove_from)?;
    let vport_to_add_to = resources.fw_vport(filter.vport_to_add_to)?;

    let mut data = VportFilterUpdateRamrodData::new_zeroed();
    data.filter_cmd_hdr = FilterCmdHeader {
        rx: filter.is_rx.into(),
        tx: filter.is_tx.into(),
        cmd_cnt: match filter.opcode {
            FilterOpcode::Move | FilterOpcode::Replace => 2,
            _ => 1,
        },
        assert_on_error: filter.assert_on_error.into(),
        reserved: [0; 4],
    };

    let mut first = FilterCmd::new_zeroed();
    first.filter_type = filter.filter_type.fw_type();
    if filter.filter_type.has_mac() {
        [first.mac_msb, first.mac_mid, first.mac_lsb] = fw_mac_words(filter.mac);
    }
    if filter.filter_type.has_vlan() {
        first.vlan_id = filter.vlan;
    }
    if filter.filter_type.has_vni() {
        first.vni = filter.vni;
    }

    let mut second = FilterCmd::new_zeroed();
    match filter.opcode {
        FilterOpcode::Move => {
            second = first;
            first.action = EthFilterAction::REMOVE;
            first.vport_id = vport_to_remove_from;
            second.action = EthFilterAction::ADD;
            second.vport_id = vport_to_add_to;
        }
        FilterOpcode::Replace => {
            first.vport_id = vport_to_add_to;
            second = first;
            first.action = EthFilterAction::REMOVE_ALL;
            second.action = EthFilterAction::ADD;
        }
        opcode => {
            first.action =
                fw_filter_action(opcode).ok_or(L2Error::UnsupportedOperation("filter opcode"))?;
            first.vport_id = if opcode == FilterOpcode::Remove {
                vport_to_remove_from
            } else {
                vport_to_add_to
            };
        }
    }
    data.filter_cmds = [first, second];
    Ok(data)
}

/// Returns the approximate multicast bin for `mac`.
///
/// The bin is the low byte of a bit-serial CRC32C (non-reflected, most
/// significant bit first) over the MAC padded with two zero bytes, feeding
/// each byte least significant bit first.
pub fn mcast_bin_from_mac(mac: MacAddress) -> u8 {
    let m = mac.to_bytes();
    let packet = [m[0], m[1], m[2], m[3], m[4], m[5], 0, 0];
    let mut crc = ETH_MULTICAST_BIN_FROM_MAC_SEED;
    for byte in packet {
        for bit in 0..8 {
            let msb = crc >> 31;
            crc <<= 1;
            if msb != u32::from((byte >> bit) & 1) {
                crc ^= CRC32_POLY;
                crc |= 1;
            }
        }
    }
    crc as u8
}

/// The 256-bit approximate multicast membership vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct McastBins(pub [u32; ETH_MULTICAST_MAC_BINS_IN_REGS]);

impl McastBins {
    /// Returns the bins for a set of addresses.
    pub fn from_macs<'a>(macs: impl IntoIterator<Item = &'a MacAddress>) -> Self {
        let mut bins = Self::default();
        for &mac in macs {
            bins.set(mcast_bin_from_mac(mac));
        }
        bins
    }

    /// Sets a bin.
    pub fn set(&mut self, bin: u8) {
        self.0[bin as usize / 32] |= 1 << (bin % 32);
    }

    /// Returns whether a bin is set.
    pub fn is_set(&self, bin: u8) -> bool {
        self.0[bin as usize / 32] & (1 << (bin % 32)) != 0
    }

    /// Iterates the set bins in ascending order.
    pub fn iter(&self) -> impl '_ + Iterator<Item = u8> {
        (0..=u8::MAX).filter(|&bin| self.is_set(bin))
    }
}

/// A multicast filter operation. Only [`FilterOpcode::Add`] and
/// [`FilterOpcode::Remove`] are supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McastFilter {
    /// Add or remove.
    pub opcode: FilterOpcode,
    /// Relative vport.
    pub vport_id: u8,
    /// The group addresses.
    pub macs: Vec<MacAddress>,
}

impl McastFilter {
    /// Checks the opcode and the list length.
    pub fn validate(&self, max_mc_addrs: usize) -> Result<(), L2Error> {
        if !matches!(self.opcode, FilterOpcode::Add | FilterOpcode::Remove) {
            return Err(L2Error::UnsupportedOperation("multicast filter opcode"));
        }
        if self.macs.len() > max_mc_addrs {
            return Err(L2Error::TooManyAddresses {
                count: self.macs.len(),
                max: max_mc_addrs,
            });
        }
        Ok(())
    }
}

/// The multicast addresses currently applied to each vport of an engine.
///
/// Add replaces a vport's set. Remove drops the listed addresses from it.
/// Either way the bins are recomputed from the resulting set.
///
/// A change is staged from the current set and committed after the device
/// accepts it. Callers hold [`McastTable::lock_updates`] across both so that
/// concurrent changes cannot stage from the same set.
#[derive(Debug)]
pub struct McastTable {
    vports: Mutex<HashMap<u8, Vec<MacAddress>>>,
    updates: futures::lock::Mutex<()>,
}

impl Default for McastTable {
    fn default() -> Self {
        Self {
            vports: Mutex::new(HashMap::new()),
            updates: futures::lock::Mutex::new(()),
        }
    }
}

/// A staged change to an [`McastTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McastUpdate {
    vport_id: u8,
    addrs: Vec<MacAddress>,
    /// The bins to program.
    pub bins: McastBins,
}

impl McastTable {
    /// Serializes stage-post-commit sequences.
    pub async fn lock_updates(&self) -> futures::lock::MutexGuard<'_, ()> {
        self.updates.lock().await
    }

    /// Computes the result of `filter` without applying it.
    pub fn stage(&self, filter: &McastFilter) -> McastUpdate {
        let mut addrs = match filter.opcode {
            FilterOpcode::Remove => {
                let vports = self.vports.lock();
                let mut addrs = vports.get(&filter.vport_id).cloned().unwrap_or_default();
                addrs.retain(|a| !filter.macs.contains(a));
                addrs
            }
            _ => filter.macs.clone(),
        };
        let mut seen = HashSet::new();
        addrs.retain(|a| seen.insert(*a));
        McastUpdate {
            vport_id: filter.vport_id,
            bins: McastBins::from_macs(&addrs),
            addrs,
        }
    }

    /// Records a staged change once it has been accepted.
    pub fn commit(&self, update: McastUpdate) {
        let mut vports = self.vports.lock();
        if update.addrs.is_empty() {
            vports.remove(&update.vport_id);
        } else {
            vports.insert(update.vport_id, update.addrs);
        }
    }

    /// Returns the addresses applied to a vport.
    pub fn addresses(&self, vport_id: u8) -> Vec<MacAddress> {
        self.vports
            .lock()
            .get(&vport_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// The add/delete/replace selector of device-level filter requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XcastType {
    /// Add the addresses.
    Add,
    /// Delete the addresses.
    Del,
    /// Replace what is configured with the addresses.
    Replace,
}

/// Receive mode presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxModeType {
    /// Matched unicast and multicast plus broadcast.
    Normal,
    /// Everything.
    Promisc,
    /// Matched unicast, all multicast, broadcast.
    MultiPromisc,
}

impl RxModeType {
    /// Returns the RX and TX accept filters for the preset.
    pub fn accept_filters(self) -> (AcceptFlags, AcceptFlags) {
        let base = AcceptFlags::UCAST_MATCHED | AcceptFlags::MCAST_MATCHED | AcceptFlags::BCAST;
        match self {
            Self::Normal => (base, base),
            Self::Promisc => (
                base | AcceptFlags::UCAST_UNMATCHED | AcceptFlags::MCAST_UNMATCHED,
                base | AcceptFlags::MCAST_UNMATCHED,
            ),
            Self::MultiPromisc => (
                base | AcceptFlags::MCAST_UNMATCHED,
                base | AcceptFlags::MCAST_UNMATCHED,
            ),
        }
    }
}

/// A device-level filter request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterConfig {
    /// A unicast MAC and/or VLAN filter on vport 0.
    Ucast {
        /// Add, delete or replace.
        kind: XcastType,
        /// The MAC, if filtering on one.
        mac: Option<MacAddress>,
        /// The VLAN, if filtering on one.
        vlan: Option<u16>,
    },
    /// A multicast list on vport 0.
    Mcast {
        /// Add or delete. Replace is not supported.
        kind: XcastType,
        /// The group addresses.
        macs: Vec<MacAddress>,
    },
    /// A receive mode preset on vport 0.
    RxMode(RxModeType),
}

impl FilterConfig {
    pub(crate) fn to_ucast(kind: XcastType, mac: Option<MacAddress>, vlan: Option<u16>) -> Result<UcastFilter, L2Error> {
        let (filter_type, mac, vlan) = match (mac, vlan) {
            (Some(mac), Some(vlan)) => (UcastFilterType::MacVlan, mac, vlan),
            (Some(mac), None) => (UcastFilterType::Mac, mac, 0),
            (None, Some(vlan)) => (UcastFilterType::Vlan, MacAddress::default(), vlan),
            (None, None) => {
                return Err(L2Error::InvalidArgument(
                    "unicast filter needs a mac or a vlan",
                ))
            }
        };
        Ok(UcastFilter {
            opcode: match kind {
                XcastType::Add => FilterOpcode::Add,
                XcastType::Del => FilterOpcode::Remove,
                XcastType::Replace => FilterOpcode::Replace,
            },
            filter_type,
            is_rx: true,
            is_tx: true,
            vport_to_add_to: 0,
            vport_to_remove_from: 0,
            mac,
            vlan,
            vni: 0,
            assert_on_error: false,
        })
    }

    pub(crate) fn to_mcast(kind: XcastType, macs: &[MacAddress]) -> Result<McastFilter, L2Error> {
        let opcode = match kind {
            XcastType::Add => FilterOpcode::Add,
            XcastType::Del => FilterOpcode::Remove,
            XcastType::Replace => {
                return Err(L2Error::UnsupportedOperation("multicast replace"))
            }
        };
        Ok(McastFilter {
            opcode,
            vport_id: 0,
            macs: macs.to_vec(),
        })
    }
}
