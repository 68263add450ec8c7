// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! RSS indirection table and capability configuration.

use crate::error::L2Error;
use crate::error::ResourceKind;
use crate::resources::EngineId;
use crate::resources::QueueCid;
use crate::resources::ResourceManager;
use l2_defs::eth::EthVportRssMode;
use l2_defs::eth::RssCapabilities;
use l2_defs::eth::VportRssConfig;
use l2_defs::ETH_RSS_CMT_TABLE_SIZE_LOG;
use l2_defs::ETH_RSS_IND_TABLE_ENTRIES_NUM;
use l2_defs::ETH_RSS_KEY_SIZE_REGS;
use l2_defs::ETH_RSS_TABLE_SIZE_LOG;
use zerocopy::FromZeros;

/// The hash types RSS is enabled for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct RssCaps {
    pub ipv4: bool,
    pub ipv6: bool,
    pub ipv4_tcp: bool,
    pub ipv6_tcp: bool,
    pub ipv4_udp: bool,
    pub ipv6_udp: bool,
}

impl RssCaps {
    fn to_fw(self) -> RssCapabilities {
        RssCapabilities::new()
            .with_ipv4(self.ipv4)
            .with_ipv6(self.ipv6)
            .with_ipv4_tcp(self.ipv4_tcp)
            .with_ipv6_tcp(self.ipv6_tcp)
            .with_ipv4_udp(self.ipv4_udp)
            .with_ipv6_udp(self.ipv6_udp)
    }
}

/// An indirection table: each slot names the RX queue it steers to.
pub type RssTable<'a> = [Option<&'a QueueCid>; ETH_RSS_IND_TABLE_ENTRIES_NUM];

/// RSS configuration for a single engine.
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)]
pub struct RssParams<'a> {
    /// Apply the RSS block at all.
    pub update_rss_config: bool,
    pub rss_enable: bool,
    /// Relative RSS engine id.
    pub rss_eng_id: u8,
    pub update_rss_capabilities: bool,
    pub update_rss_ind_table: bool,
    pub update_rss_key: bool,
    pub rss_caps: RssCaps,
    /// log2 of the number of slots of `ind_table` in use.
    pub rss_table_size_log: u8,
    pub ind_table: RssTable<'a>,
    pub rss_key: [u32; ETH_RSS_KEY_SIZE_REGS],
}

impl Default for RssParams<'_> {
    fn default() -> Self {
        Self {
            update_rss_config: false,
            rss_enable: false,
            rss_eng_id: 0,
            update_rss_capabilities: false,
            update_rss_ind_table: false,
            update_rss_key: false,
            rss_caps: RssCaps::default(),
            rss_table_size_log: 0,
            ind_table: [None; ETH_RSS_IND_TABLE_ENTRIES_NUM],
            rss_key: [0; ETH_RSS_KEY_SIZE_REGS],
        }
    }
}

/// Builds the RSS block of a vport update.
///
/// Every slot in use must name a queue; the table holds the queues'
/// absolute ids in slot order.
pub fn build_rss_config(
    resources: &ResourceManager,
    params: &RssParams<'_>,
    max_table_size: usize,
) -> Result<VportRssConfig, L2Error> {
    let table_size = 1usize
        .checked_shl(params.rss_table_size_log.into())
        .filter(|&size| size <= max_table_size.min(ETH_RSS_IND_TABLE_ENTRIES_NUM))
        .ok_or(L2Error::UnsupportedOperation("rss table size"))?;

    let mut config = VportRssConfig::new_zeroed();
    config.rss_id = resources.fw_rss_eng(params.rss_eng_id)?;
    config.rss_mode = if params.rss_enable {
        EthVportRssMode::REGULAR
    } else {
        EthVportRssMode::DISABLED
    };
    config.update_rss_capabilities = params.update_rss_capabilities.into();
    config.update_rss_ind_table = params.update_rss_ind_table.into();
    config.update_rss_key = params.update_rss_key.into();
    config.capabilities = params.rss_caps.to_fw();
    config.tbl_size = params.rss_table_size_log;

    for (slot, (entry, queue)) in config
        .indirection_table
        .iter_mut()
        .zip(&params.ind_table)
        .take(table_size)
        .enumerate()
    {
        let queue = queue.ok_or(L2Error::IncompleteTable { slot })?;
        *entry = queue.abs().queue_id;
    }
    config.rss_key = params.rss_key;

    tracing::debug!(
        rss_id = config.rss_id,
        enable = params.rss_enable,
        caps = config.capabilities.into_bits(),
        table_size,
        update_caps = params.update_rss_capabilities,
        update_table = params.update_rss_ind_table,
        update_key = params.update_rss_key,
        "rss config"
    );
    tracing::trace!(table = ?&config.indirection_table[..table_size], "rss indirection table");
    Ok(config)
}

/// Device-level RSS request. The table spans the whole device; with more
/// than one engine each slot is steered by the engine owning its queue.
#[derive(Debug, Clone, Copy)]
pub struct RssInput<'a> {
    /// Hash types.
    pub rss_caps: RssCaps,
    /// Hash key.
    pub rss_key: [u32; ETH_RSS_KEY_SIZE_REGS],
    /// The device-wide indirection table.
    pub ind_table: RssTable<'a>,
}

fn same_queue(a: Option<&QueueCid>, b: Option<&QueueCid>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => std::ptr::eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Splits a device-level RSS request into one [`RssParams`] per engine.
///
/// On a single engine the table is used as is. With more than one engine,
/// slot `i` lands in slot `i / engines` of its owner's table, and each
/// engine's table is half the size. An engine whose table only names one
/// queue gets [`L2Error::DegenerateRssTable`]; the caller is expected to
/// go on without RSS.
pub fn split_for_engines<'a>(
    input: &RssInput<'a>,
    engines: usize,
) -> Result<Vec<RssParams<'a>>, L2Error> {
    let common = RssParams {
        update_rss_config: true,
        rss_enable: true,
        rss_eng_id: 0,
        update_rss_capabilities: true,
        update_rss_ind_table: true,
        update_rss_key: true,
        rss_caps: input.rss_caps,
        rss_table_size_log: ETH_RSS_TABLE_SIZE_LOG,
        ind_table: input.ind_table,
        rss_key: input.rss_key,
    };
    if engines <= 1 {
        return Ok(vec![common]);
    }

    let mut split = vec![
        RssParams {
            ind_table: [None; ETH_RSS_IND_TABLE_ENTRIES_NUM],
            rss_table_size_log: ETH_RSS_CMT_TABLE_SIZE_LOG,
            ..common
        };
        engines
    ];
    for (slot, queue) in input.ind_table.iter().enumerate() {
        let queue = queue.ok_or(L2Error::IncompleteTable { slot })?;
        let owner = queue.owner();
        let params = split.get_mut(owner.index()).ok_or(L2Error::InvalidResource {
            kind: ResourceKind::Engine,
            id: owner.0.into(),
        })?;
        params.ind_table[slot / engines] = Some(queue);
    }

    let per_engine = ETH_RSS_IND_TABLE_ENTRIES_NUM / engines;
    for (index, params) in split.iter().enumerate() {
        let first = params.ind_table[0];
        if params.ind_table[1..per_engine]
            .iter()
            .all(|&entry| same_queue(entry, first))
        {
            let engine = EngineId(index as u8);
            tracing::debug!(%engine, "one queue per engine, disabling rss");
            return Err(L2Error::DegenerateRssTable { engine });
        }
    }
    Ok(split)
}
