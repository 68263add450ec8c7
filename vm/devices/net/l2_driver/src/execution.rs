// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! How an engine carries out a command.
//!
//! A PF builds the ramrod and posts it on its own slow-path queue. A VF
//! cannot reach the slow path; it forwards the request to its PF and treats
//! the PF's answer as the completion.

use crate::error::L2Error;
use crate::error::RamrodKind;
use crate::filter::build_ucast_ramrod;
use crate::filter::McastBins;
use crate::filter::UcastFilter;
use crate::io::RegisterIo;
use crate::queue::build_rx_queue_start;
use crate::queue::build_rx_queue_stop;
use crate::queue::build_rx_queue_update;
use crate::queue::build_tx_queue_start;
use crate::queue::rx_producer_address;
use crate::queue::tx_doorbell_address;
use crate::queue::DoorbellAddress;
use crate::queue::ProducerAddress;
use crate::queue::RxQueueStartParams;
use crate::queue::TxQueueStartParams;
use crate::resources::EngineId;
use crate::resources::QueueCid;
use crate::resources::QueueParams;
use crate::resources::ResourceManager;
use crate::spq::CompletionMode;
use crate::spq::Ramrod;
use crate::spq::RamrodRequest;
use crate::spq::Spq;
use crate::spq::SpqCompleter;
use crate::vport::build_vport_start;
use crate::vport::build_vport_stop;
use crate::vport::build_vport_update;
use crate::vport::VportStartParams;
use crate::vport::VportUpdateParams;
use async_trait::async_trait;
use l2_defs::eth::PfUpdateTunnelConfig;
use l2_defs::MacAddress;
use std::sync::Arc;
use zerocopy::FromZeros;

/// Tunnel UDP ports to program. `None` leaves a port unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelParams {
    /// VXLAN destination port.
    pub vxlan_port: Option<u16>,
    /// GENEVE destination port.
    pub geneve_port: Option<u16>,
}

/// The per-function execution of control-plane commands.
///
/// The resource manager is passed in for translation; queue commands carry
/// their addressing in the [`QueueCid`].
#[async_trait]
pub trait FunctionOps: Send + Sync {
    /// Starts a vport.
    async fn vport_start(
        &self,
        resources: &ResourceManager,
        params: &VportStartParams,
    ) -> Result<(), L2Error>;

    /// Updates a vport.
    async fn vport_update(
        &self,
        resources: &ResourceManager,
        params: &VportUpdateParams<'_>,
        mode: CompletionMode,
    ) -> Result<(), L2Error>;

    /// Stops a vport.
    async fn vport_stop(
        &self,
        resources: &ResourceManager,
        opaque_fid: u16,
        vport_id: u8,
    ) -> Result<(), L2Error>;

    /// Starts an RX queue and returns where its producers live.
    async fn rxq_start(
        &self,
        resources: &ResourceManager,
        cid: &QueueCid,
        params: &RxQueueStartParams,
    ) -> Result<ProducerAddress, L2Error>;

    /// Changes an RX queue's completion flags.
    async fn rxq_update(
        &self,
        cid: &QueueCid,
        complete_cqe: bool,
        complete_event: bool,
        mode: CompletionMode,
    ) -> Result<(), L2Error>;

    /// Stops an RX queue.
    async fn rxq_stop(
        &self,
        cid: &QueueCid,
        eq_completion_only: bool,
        cqe_completion: bool,
    ) -> Result<(), L2Error>;

    /// Starts a TX queue and returns its doorbell.
    async fn txq_start(
        &self,
        resources: &ResourceManager,
        cid: &QueueCid,
        params: &TxQueueStartParams,
    ) -> Result<DoorbellAddress, L2Error>;

    /// Stops a TX queue.
    async fn txq_stop(&self, cid: &QueueCid) -> Result<(), L2Error>;

    /// Applies a unicast filter command.
    async fn filter_ucast(
        &self,
        resources: &ResourceManager,
        opaque_fid: u16,
        filter: &UcastFilter,
        mode: CompletionMode,
    ) -> Result<(), L2Error>;

    /// Programs a vport's multicast bins.
    async fn filter_mcast(
        &self,
        resources: &ResourceManager,
        vport_id: u8,
        bins: &McastBins,
        mode: CompletionMode,
    ) -> Result<(), L2Error>;

    /// Programs tunnel UDP ports.
    async fn tunnel_update(&self, params: &TunnelParams) -> Result<(), L2Error>;

    /// Returns whether the function may use `mac`.
    async fn check_mac(&self, mac: MacAddress) -> Result<bool, L2Error>;

    /// The completion handle of the slow-path queue, if the function has one.
    fn completer(&self) -> Option<SpqCompleter>;
}

/// Execution on a PF: ramrods go to the engine's own slow-path queue.
pub struct LocalExecution {
    spq: Spq,
    io: Arc<dyn RegisterIo>,
    spq_cid: u32,
    rss_table_max_size: usize,
}

impl LocalExecution {
    /// Creates a PF executor.
    pub fn new(
        spq: Spq,
        io: Arc<dyn RegisterIo>,
        spq_cid: u32,
        rss_table_max_size: usize,
    ) -> Self {
        Self {
            spq,
            io,
            spq_cid,
            rss_table_max_size,
        }
    }

    async fn post(
        &self,
        ramrod: Ramrod,
        cid: u32,
        opaque_fid: u16,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        self.spq
            .post(RamrodRequest {
                ramrod,
                cid,
                opaque_fid,
                mode,
            })
            .await
    }
}

#[async_trait]
impl FunctionOps for LocalExecution {
    async fn vport_start(
        &self,
        resources: &ResourceManager,
        params: &VportStartParams,
    ) -> Result<(), L2Error> {
        let data = build_vport_start(resources, params)?;
        self.post(
            Ramrod::VportStart(data),
            self.spq_cid,
            params.opaque_fid,
            CompletionMode::Blocking,
        )
        .await
    }

    async fn vport_update(
        &self,
        resources: &ResourceManager,
        params: &VportUpdateParams<'_>,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        let data = build_vport_update(resources, params, self.rss_table_max_size)?;
        self.post(
            Ramrod::VportUpdate(Box::new(data)),
            self.spq_cid,
            params.opaque_fid,
            mode,
        )
        .await
    }

    async fn vport_stop(
        &self,
        resources: &ResourceManager,
        opaque_fid: u16,
        vport_id: u8,
    ) -> Result<(), L2Error> {
        let data = build_vport_stop(resources, vport_id)?;
        self.post(
            Ramrod::VportStop(data),
            self.spq_cid,
            opaque_fid,
            CompletionMode::Blocking,
        )
        .await
    }

    async fn rxq_start(
        &self,
        _resources: &ResourceManager,
        cid: &QueueCid,
        params: &RxQueueStartParams,
    ) -> Result<ProducerAddress, L2Error> {
        let producers = rx_producer_address(cid);
        // Firmware reads the producers as soon as the queue starts.
        self.io
            .write(producers.0, &0u32.to_le_bytes())
            .map_err(L2Error::RegisterAccess)?;

        let data = build_rx_queue_start(cid, params);
        self.post(
            Ramrod::RxQueueStart(data),
            cid.cid(),
            cid.opaque_fid(),
            CompletionMode::Blocking,
        )
        .await?;
        Ok(producers)
    }

    async fn rxq_update(
        &self,
        cid: &QueueCid,
        complete_cqe: bool,
        complete_event: bool,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        let data = build_rx_queue_update(cid, complete_cqe, complete_event);
        self.post(
            Ramrod::RxQueueUpdate(data),
            cid.cid(),
            cid.opaque_fid(),
            mode,
        )
        .await
    }

    async fn rxq_stop(
        &self,
        cid: &QueueCid,
        eq_completion_only: bool,
        cqe_completion: bool,
    ) -> Result<(), L2Error> {
        let data = build_rx_queue_stop(cid, eq_completion_only, cqe_completion);
        self.post(
            Ramrod::RxQueueStop(data),
            cid.cid(),
            cid.opaque_fid(),
            CompletionMode::Blocking,
        )
        .await
    }

    async fn txq_start(
        &self,
        _resources: &ResourceManager,
        cid: &QueueCid,
        params: &TxQueueStartParams,
    ) -> Result<DoorbellAddress, L2Error> {
        let data = build_tx_queue_start(cid, params);
        self.post(
            Ramrod::TxQueueStart(data),
            cid.cid(),
            cid.opaque_fid(),
            CompletionMode::Blocking,
        )
        .await?;
        Ok(tx_doorbell_address(cid))
    }

    async fn txq_stop(&self, cid: &QueueCid) -> Result<(), L2Error> {
        self.post(
            Ramrod::TxQueueStop,
            cid.cid(),
            cid.opaque_fid(),
            CompletionMode::Blocking,
        )
        .await
    }

    async fn filter_ucast(
        &self,
        resources: &ResourceManager,
        opaque_fid: u16,
        filter: &UcastFilter,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        let data = build_ucast_ramrod(resources, filter)?;
        self.post(Ramrod::FiltersUpdate(data), self.spq_cid, opaque_fid, mode)
            .await
    }

    async fn filter_mcast(
        &self,
        resources: &ResourceManager,
        vport_id: u8,
        bins: &McastBins,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        let params = VportUpdateParams {
            opaque_fid: resources.opaque_fid(),
            vport_id,
            approx_mcast: Some(*bins),
            ..Default::default()
        };
        self.vport_update(resources, &params, mode).await
    }

    async fn tunnel_update(&self, params: &TunnelParams) -> Result<(), L2Error> {
        let mut data = PfUpdateTunnelConfig::new_zeroed();
        if let Some(port) = params.vxlan_port {
            data.update_vxlan_udp_port_flg = 1;
            data.vxlan_udp_port = port;
        }
        if let Some(port) = params.geneve_port {
            data.update_geneve_udp_port_flg = 1;
            data.geneve_udp_port = port;
        }
        self.post(
            Ramrod::TunnelUpdate(data),
            self.spq_cid,
            0,
            CompletionMode::Blocking,
        )
        .await
    }

    async fn check_mac(&self, _mac: MacAddress) -> Result<bool, L2Error> {
        // A PF owns every address on its port.
        Ok(true)
    }

    fn completer(&self) -> Option<SpqCompleter> {
        Some(self.spq.completer())
    }
}

/// The request channel from a VF to its PF.
///
/// Queue requests carry the VF's relative addressing; the PF translates
/// them. A returned error means the PF refused or could not be reached.
#[async_trait]
pub trait VfChannel: Send + Sync {
    /// Asks the PF to start a vport.
    async fn vport_start(&self, params: &VportStartParams) -> anyhow::Result<()>;
    /// Asks the PF to update a vport.
    async fn vport_update(&self, params: &VportUpdateParams<'_>) -> anyhow::Result<()>;
    /// Asks the PF to stop a vport.
    async fn vport_stop(&self, vport_id: u8) -> anyhow::Result<()>;
    /// Asks the PF to start an RX queue. Returns the producer offset the PF
    /// assigned.
    async fn rxq_start(
        &self,
        queue: &QueueParams,
        params: &RxQueueStartParams,
    ) -> anyhow::Result<ProducerAddress>;
    /// Asks the PF to change an RX queue's completion flags.
    async fn rxq_update(
        &self,
        queue: &QueueParams,
        complete_cqe: bool,
        complete_event: bool,
    ) -> anyhow::Result<()>;
    /// Asks the PF to stop an RX queue.
    async fn rxq_stop(&self, queue: &QueueParams, cqe_completion: bool) -> anyhow::Result<()>;
    /// Asks the PF to start a TX queue. Returns the doorbell the PF
    /// assigned.
    async fn txq_start(
        &self,
        queue: &QueueParams,
        params: &TxQueueStartParams,
    ) -> anyhow::Result<DoorbellAddress>;
    /// Asks the PF to stop a TX queue.
    async fn txq_stop(&self, queue: &QueueParams) -> anyhow::Result<()>;
    /// Asks the PF to apply a unicast filter.
    async fn filter_ucast(&self, filter: &UcastFilter) -> anyhow::Result<()>;
    /// Asks the PF to program multicast bins.
    async fn filter_mcast(&self, vport_id: u8, bins: &McastBins) -> anyhow::Result<()>;
    /// Asks whether the PF allows the VF to use `mac`.
    async fn check_mac(&self, mac: MacAddress) -> anyhow::Result<bool>;
}

/// Execution on a VF: requests go to the PF.
pub struct DelegatedExecution {
    channel: Arc<dyn VfChannel>,
    engine: EngineId,
}

impl DelegatedExecution {
    /// Creates a VF executor for `engine`.
    pub fn new(channel: Arc<dyn VfChannel>, engine: EngineId) -> Self {
        Self { channel, engine }
    }

    /// Maps the PF's answer to a completion. The PF has already waited for
    /// the firmware, so a successful answer completes the request.
    fn complete(
        &self,
        cmd: RamrodKind,
        result: anyhow::Result<()>,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        result.map_err(L2Error::Transport)?;
        match mode {
            CompletionMode::Callback(Some(callback)) => callback(0),
            CompletionMode::Callback(None) | CompletionMode::Blocking => {}
            // No event channel on a VF. The caller already has the result.
            CompletionMode::EventOnly => {
                tracing::debug!(engine = %self.engine, %cmd, "vf request completed without event");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FunctionOps for DelegatedExecution {
    async fn vport_start(
        &self,
        _resources: &ResourceManager,
        params: &VportStartParams,
    ) -> Result<(), L2Error> {
        self.channel
            .vport_start(params)
            .await
            .map_err(L2Error::Transport)
    }

    async fn vport_update(
        &self,
        _resources: &ResourceManager,
        params: &VportUpdateParams<'_>,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        let result = self.channel.vport_update(params).await;
        self.complete(RamrodKind::VportUpdate, result, mode)
    }

    async fn vport_stop(
        &self,
        _resources: &ResourceManager,
        _opaque_fid: u16,
        vport_id: u8,
    ) -> Result<(), L2Error> {
        self.channel
            .vport_stop(vport_id)
            .await
            .map_err(L2Error::Transport)
    }

    async fn rxq_start(
        &self,
        _resources: &ResourceManager,
        cid: &QueueCid,
        params: &RxQueueStartParams,
    ) -> Result<ProducerAddress, L2Error> {
        self.channel
            .rxq_start(cid.rel(), params)
            .await
            .map_err(L2Error::Transport)
    }

    async fn rxq_update(
        &self,
        cid: &QueueCid,
        complete_cqe: bool,
        complete_event: bool,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        let result = self
            .channel
            .rxq_update(cid.rel(), complete_cqe, complete_event)
            .await;
        self.complete(RamrodKind::RxQueueUpdate, result, mode)
    }

    async fn rxq_stop(
        &self,
        cid: &QueueCid,
        _eq_completion_only: bool,
        cqe_completion: bool,
    ) -> Result<(), L2Error> {
        self.channel
            .rxq_stop(cid.rel(), cqe_completion)
            .await
            .map_err(L2Error::Transport)
    }

    async fn txq_start(
        &self,
        _resources: &ResourceManager,
        cid: &QueueCid,
        params: &TxQueueStartParams,
    ) -> Result<DoorbellAddress, L2Error> {
        self.channel
            .txq_start(cid.rel(), params)
            .await
            .map_err(L2Error::Transport)
    }

    async fn txq_stop(&self, cid: &QueueCid) -> Result<(), L2Error> {
        self.channel
            .txq_stop(cid.rel())
            .await
            .map_err(L2Error::Transport)
    }

    async fn filter_ucast(
        &self,
        _resources: &ResourceManager,
        _opaque_fid: u16,
        filter: &UcastFilter,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        let result = self.channel.filter_ucast(filter).await;
        self.complete(RamrodKind::FiltersUpdate, result, mode)
    }

    async fn filter_mcast(
        &self,
        _resources: &ResourceManager,
        vport_id: u8,
        bins: &McastBins,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        let result = self.channel.filter_mcast(vport_id, bins).await;
        self.complete(RamrodKind::VportUpdate, result, mode)
    }

    async fn tunnel_update(&self, _params: &TunnelParams) -> Result<(), L2Error> {
        // Tunnel ports are owned by the PF.
        Ok(())
    }

    async fn check_mac(&self, mac: MacAddress) -> Result<bool, L2Error> {
        self.channel.check_mac(mac).await.map_err(L2Error::Transport)
    }

    fn completer(&self) -> Option<SpqCompleter> {
        None
    }
}
