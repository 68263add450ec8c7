// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Device configuration handed to the control plane at attach time.
//!
//! Probe and bring-up live outside this crate; whatever performs them
//! describes the result (function type, resource ranges, engine topology,
//! negotiated VF statistics addresses) with these types.

use crate::error::L2Error;
use l2_defs::MacAddress;
use l2_defs::ETH_RSS_IND_TABLE_ENTRIES_NUM;
use l2_defs::MAX_HWFNS_PER_DEVICE;
use l2_defs::MAX_MC_ADDRS;
use serde::Deserialize;
use serde::Serialize;

/// Whether this device instance is a physical or a virtual function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// Physical function. Issues ramrods directly.
    Pf,
    /// Virtual function. Delegates to its PF over a channel.
    Vf,
}

/// A contiguous block of engine-absolute ids assigned to this function.
///
/// Relative id `n` maps to absolute id `base + n` for `n < count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRange {
    /// First absolute id.
    pub base: u16,
    /// Number of ids.
    pub count: u16,
}

impl ResourceRange {
    /// Translates a relative id, or returns `None` if it is out of range.
    pub fn translate(&self, rel: u16) -> Option<u16> {
        if rel < self.count {
            self.base.checked_add(rel)
        } else {
            None
        }
    }

    fn end(&self) -> u32 {
        self.base as u32 + self.count as u32
    }
}

/// The connection ids reserved for this function's L2 queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidRange {
    /// First cid.
    pub base: u32,
    /// Number of cids.
    pub count: u32,
}

/// An address/length pair for a counter region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRegion {
    /// Address passed to [`RegisterIo`](crate::io::RegisterIo).
    pub address: u32,
    /// Length of the region in bytes.
    pub len: u32,
}

/// Counter regions negotiated by a VF with its PF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VfStatsInfo {
    /// Receive discard and aggregation counters.
    pub mstats: StatsRegion,
    /// Transmit counters.
    pub pstats: StatsRegion,
    /// Port filter discard counters.
    pub tstats: StatsRegion,
    /// Receive counters.
    pub ustats: StatsRegion,
}

/// Per-engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The function id used in ramrod headers.
    pub opaque_fid: u16,
    /// Software function id placed in vport start.
    #[serde(default)]
    pub sw_fid: u8,
    /// The cid used for ramrods that are not tied to a queue.
    #[serde(default)]
    pub spq_cid: u32,
    /// Cids available to this engine's L2 queues.
    #[serde(default)]
    pub cids: CidRange,
    /// Vports assigned to the function. Statistics counters share this range.
    pub vports: ResourceRange,
    /// L2 queue zones assigned to the function.
    pub l2_queues: ResourceRange,
    /// RSS engines assigned to the function.
    pub rss_engines: ResourceRange,
    /// Physical port this engine is attached to.
    #[serde(default)]
    pub port: u8,
    /// Address of the management firmware's public port structure, if
    /// the management firmware is present.
    #[serde(default)]
    pub mcp_port_addr: Option<u32>,
    /// Negotiated statistics regions. Required for a VF.
    #[serde(default)]
    pub vf_stats: Option<VfStatsInfo>,
    /// Maximum number of outstanding ramrods.
    #[serde(default = "default_spq_depth")]
    pub spq_depth: usize,
    /// MAC filters available to the function.
    #[serde(default)]
    pub mac_filters: u16,
    /// VLAN filters available to the function.
    #[serde(default)]
    pub vlan_filters: u16,
    /// Receive queues granted to a VF by its PF.
    #[serde(default)]
    pub vf_num_rxqs: u8,
}

fn default_spq_depth() -> usize {
    256
}

fn default_max_mc_addrs() -> usize {
    MAX_MC_ADDRS
}

fn default_rss_table_max_size() -> usize {
    ETH_RSS_IND_TABLE_ENTRIES_NUM
}

const MAX_SPQ_DEPTH: usize = 4096;

/// Configuration for one logical device, backed by one or two engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// PF or VF.
    pub function: FunctionKind,
    /// The engines backing this device. The first one is the leading engine.
    pub engines: Vec<EngineConfig>,
    /// Largest multicast list accepted by a single filter request.
    #[serde(default = "default_max_mc_addrs")]
    pub max_mc_addrs: usize,
    /// Largest RSS indirection table the device accepts, in entries.
    #[serde(default = "default_rss_table_max_size")]
    pub rss_table_max_size: usize,
    /// Permanent MAC address of the port.
    #[serde(default)]
    pub port_mac: MacAddress,
    /// The VF is running against a PF with a pre-fastpath HSI.
    #[serde(default)]
    pub legacy_vf: bool,
}

impl DeviceConfig {
    /// Checks that the configuration is usable.
    pub fn validate(&self) -> Result<(), L2Error> {
        if self.engines.is_empty() || self.engines.len() > MAX_HWFNS_PER_DEVICE {
            return Err(L2Error::InvalidConfig("engine count must be 1 or 2"));
        }
        if !self.rss_table_max_size.is_power_of_two()
            || self.rss_table_max_size > ETH_RSS_IND_TABLE_ENTRIES_NUM
        {
            return Err(L2Error::InvalidConfig(
                "rss table max size must be a power of two no larger than 128",
            ));
        }
        if self.max_mc_addrs > MAX_MC_ADDRS {
            return Err(L2Error::InvalidConfig("too many multicast addresses"));
        }
        for engine in &self.engines {
            if engine.vports.end() > 0x100 || engine.rss_engines.end() > 0x100 {
                return Err(L2Error::InvalidConfig(
                    "vport and rss engine ids must fit in a byte",
                ));
            }
            if engine.spq_depth == 0 || engine.spq_depth > MAX_SPQ_DEPTH {
                return Err(L2Error::InvalidConfig("spq depth out of range"));
            }
            match self.function {
                FunctionKind::Pf => {
                    if engine.cids.base.checked_add(engine.cids.count).is_none() {
                        return Err(L2Error::InvalidConfig("cid range overflows"));
                    }
                }
                FunctionKind::Vf => {
                    if engine.vf_stats.is_none() {
                        return Err(L2Error::InvalidConfig(
                            "a vf requires negotiated statistics regions",
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
