// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! One engine of a device.

use crate::config::EngineConfig;
use crate::config::FunctionKind;
use crate::error::L2Error;
use crate::error::QueueStopError;
use crate::execution::FunctionOps;
use crate::execution::TunnelParams;
use crate::filter::McastFilter;
use crate::filter::McastTable;
use crate::filter::UcastFilter;
use crate::io::RegisterIo;
use crate::queue::DoorbellAddress;
use crate::queue::ProducerAddress;
use crate::queue::RxQueueHandle;
use crate::queue::RxQueueStartParams;
use crate::queue::TxQueueHandle;
use crate::queue::TxQueueStartParams;
use crate::resources::EngineId;
use crate::resources::QueueParams;
use crate::resources::ResourceManager;
use crate::spq::CompletionMode;
use crate::spq::SpqCompleter;
use crate::stats::read_engine_stats;
use crate::stats::zero_engine_stats;
use crate::stats::EthStats;
use crate::stats::StatsRegions;
use crate::vport::VportStartParams;
use crate::vport::VportUpdateParams;
use l2_defs::MacAddress;
use std::sync::Arc;

/// An engine: its resources, how it executes commands, and its registers.
pub struct Hwfn {
    engine: EngineId,
    function: FunctionKind,
    config: EngineConfig,
    resources: ResourceManager,
    ops: Box<dyn FunctionOps>,
    mcast: McastTable,
    io: Arc<dyn RegisterIo>,
    max_mc_addrs: usize,
}

impl Hwfn {
    /// Creates an engine.
    pub fn new(
        engine: EngineId,
        function: FunctionKind,
        config: EngineConfig,
        ops: Box<dyn FunctionOps>,
        io: Arc<dyn RegisterIo>,
        max_mc_addrs: usize,
    ) -> Self {
        Self {
            engine,
            function,
            resources: ResourceManager::new(engine, function, &config),
            config,
            ops,
            mcast: McastTable::default(),
            io,
            max_mc_addrs,
        }
    }

    /// The engine's index within its device.
    pub fn engine(&self) -> EngineId {
        self.engine
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The engine's resource manager.
    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Where firmware completions for this engine are delivered. `None` on
    /// a VF, which has no slow-path queue of its own.
    pub fn completer(&self) -> Option<SpqCompleter> {
        self.ops.completer()
    }

    /// The multicast addresses currently applied to a vport.
    pub fn mcast_addresses(&self, vport_id: u8) -> Vec<MacAddress> {
        self.mcast.addresses(vport_id)
    }

    /// Starts a vport.
    #[tracing::instrument(skip(self), level = "debug", err, fields(engine = self.engine.0))]
    pub async fn vport_start(&self, params: &VportStartParams) -> Result<(), L2Error> {
        self.ops.vport_start(&self.resources, params).await
    }

    /// Updates a vport.
    #[tracing::instrument(skip_all, level = "debug", err, fields(engine = self.engine.0, vport = params.vport_id))]
    pub async fn vport_update(
        &self,
        params: &VportUpdateParams<'_>,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        self.ops.vport_update(&self.resources, params, mode).await
    }

    /// Stops a vport.
    #[tracing::instrument(skip(self), level = "debug", err, fields(engine = self.engine.0))]
    pub async fn vport_stop(&self, vport_id: u8) -> Result<(), L2Error> {
        self.ops
            .vport_stop(&self.resources, self.resources.opaque_fid(), vport_id)
            .await
    }

    /// Starts one of this function's own RX queues.
    pub async fn rx_queue_start(
        &self,
        params: QueueParams,
        rx: &RxQueueStartParams,
    ) -> Result<(ProducerAddress, RxQueueHandle), L2Error> {
        self.rx_queue_start_for(self.resources.opaque_fid(), 0, false, params, rx)
            .await
    }

    /// Starts an RX queue on behalf of a VF. `vf_qid` is the queue's index
    /// within the VF and becomes its cid.
    pub async fn rx_queue_start_for_vf(
        &self,
        opaque_fid: u16,
        vf_qid: u8,
        legacy_vf: bool,
        params: QueueParams,
        rx: &RxQueueStartParams,
    ) -> Result<(ProducerAddress, RxQueueHandle), L2Error> {
        self.rx_queue_start_for(opaque_fid, vf_qid, legacy_vf, params, rx)
            .await
    }

    #[tracing::instrument(skip(self, rx), level = "debug", err, fields(engine = self.engine.0))]
    async fn rx_queue_start_for(
        &self,
        opaque_fid: u16,
        vf_qid: u8,
        legacy_vf: bool,
        params: QueueParams,
        rx: &RxQueueStartParams,
    ) -> Result<(ProducerAddress, RxQueueHandle), L2Error> {
        let cid = self
            .resources
            .acquire_cid(opaque_fid, vf_qid, legacy_vf, &params)?;
        match self.ops.rxq_start(&self.resources, &cid, rx).await {
            Ok(producers) => Ok((producers, RxQueueHandle::new(cid))),
            Err(err) => {
                self.resources.release_cid(cid);
                Err(err)
            }
        }
    }

    /// Updates the completion flags of a set of RX queues, one command per
    /// queue. Stops at the first failure; queues already updated stay
    /// updated.
    #[tracing::instrument(skip_all, level = "debug", err, fields(engine = self.engine.0, count = handles.len()))]
    pub async fn rx_queues_update(
        &self,
        handles: &[&RxQueueHandle],
        complete_cqe: bool,
        complete_event: bool,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        for (handle, mode) in handles.iter().zip(mode.split(handles.len())) {
            self.ops
                .rxq_update(handle.cid(), complete_cqe, complete_event, mode)
                .await?;
        }
        Ok(())
    }

    /// Stops an RX queue. On failure the queue is still running and its
    /// handle is returned.
    #[tracing::instrument(skip(self), level = "debug", err, fields(engine = self.engine.0))]
    pub async fn rx_queue_stop(
        &self,
        handle: RxQueueHandle,
        eq_completion_only: bool,
        cqe_completion: bool,
    ) -> Result<(), QueueStopError<RxQueueHandle>> {
        match self
            .ops
            .rxq_stop(handle.cid(), eq_completion_only, cqe_completion)
            .await
        {
            Ok(()) => {
                self.resources.release_cid(handle.into_cid());
                Ok(())
            }
            Err(error) => Err(QueueStopError { handle, error }),
        }
    }

    /// Starts a TX queue.
    #[tracing::instrument(skip(self, tx), level = "debug", err, fields(engine = self.engine.0))]
    pub async fn tx_queue_start(
        &self,
        params: QueueParams,
        tx: &TxQueueStartParams,
    ) -> Result<(DoorbellAddress, TxQueueHandle), L2Error> {
        let cid = self
            .resources
            .acquire_cid(self.resources.opaque_fid(), 0, false, &params)?;
        match self.ops.txq_start(&self.resources, &cid, tx).await {
            Ok(doorbell) => Ok((doorbell, TxQueueHandle::new(cid))),
            Err(err) => {
                self.resources.release_cid(cid);
                Err(err)
            }
        }
    }

    /// Stops a TX queue. On failure the queue is still running and its
    /// handle is returned.
    #[tracing::instrument(skip(self), level = "debug", err, fields(engine = self.engine.0))]
    pub async fn tx_queue_stop(
        &self,
        handle: TxQueueHandle,
    ) -> Result<(), QueueStopError<TxQueueHandle>> {
        match self.ops.txq_stop(handle.cid()).await {
            Ok(()) => {
                self.resources.release_cid(handle.into_cid());
                Ok(())
            }
            Err(error) => Err(QueueStopError { handle, error }),
        }
    }

    /// Applies a unicast filter command.
    #[tracing::instrument(skip(self, mode), level = "debug", err, fields(engine = self.engine.0))]
    pub async fn filter_ucast(
        &self,
        filter: &UcastFilter,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        self.ops
            .filter_ucast(&self.resources, self.resources.opaque_fid(), filter, mode)
            .await
    }

    /// Applies a multicast filter command.
    ///
    /// The vport's address set only changes once the command is accepted.
    /// Changes on one engine are applied one at a time.
    #[tracing::instrument(skip(self, mode), level = "debug", err, fields(engine = self.engine.0))]
    pub async fn filter_mcast(
        &self,
        filter: &McastFilter,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        filter.validate(self.max_mc_addrs)?;
        let _updating = self.mcast.lock_updates().await;
        let update = self.mcast.stage(filter);
        self.ops
            .filter_mcast(&self.resources, filter.vport_id, &update.bins, mode)
            .await?;
        self.mcast.commit(update);
        Ok(())
    }

    /// Programs tunnel UDP ports.
    #[tracing::instrument(skip(self), level = "debug", err, fields(engine = self.engine.0))]
    pub async fn tunnel_update(&self, params: &TunnelParams) -> Result<(), L2Error> {
        self.ops.tunnel_update(params).await
    }

    /// Returns whether the function may use `mac`.
    pub async fn check_mac(&self, mac: MacAddress) -> Result<bool, L2Error> {
        self.ops.check_mac(mac).await
    }

    /// Where this engine's counters live. A PF counts on its base vport.
    pub fn stats_regions(&self) -> Result<StatsRegions, L2Error> {
        match self.function {
            FunctionKind::Pf => Ok(StatsRegions::for_pf(
                self.resources.fw_vport(0)?,
                self.config.port,
                self.config.mcp_port_addr,
            )),
            FunctionKind::Vf => self
                .config
                .vf_stats
                .as_ref()
                .map(StatsRegions::for_vf)
                .ok_or(L2Error::InvalidConfig(
                    "a vf requires negotiated statistics regions",
                )),
        }
    }

    /// Reads the engine's counters.
    pub fn read_stats(&self) -> Result<EthStats, L2Error> {
        let regions = self.stats_regions()?;
        read_engine_stats(self.io.as_ref(), &regions).map_err(L2Error::RegisterAccess)
    }

    /// Zeroes the engine's per-vport counters in device memory.
    pub fn zero_stats(&self) -> Result<(), L2Error> {
        let regions = self.stats_regions()?;
        zero_engine_stats(self.io.as_ref(), &regions).map_err(L2Error::RegisterAccess)
    }
}
