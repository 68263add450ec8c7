// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The device-level L2 API.
//!
//! A device is backed by one or two engines. Vport, filter and statistics
//! operations apply to every engine; queues are spread across engines by
//! their RSS index.

use crate::config::DeviceConfig;
use crate::config::FunctionKind;
use crate::error::L2Error;
use crate::error::QueueStopError;
use crate::error::ResourceKind;
use crate::execution::DelegatedExecution;
use crate::execution::FunctionOps;
use crate::execution::LocalExecution;
use crate::execution::TunnelParams;
use crate::execution::VfChannel;
use crate::filter::FilterConfig;
use crate::hwfn::Hwfn;
use crate::io::RegisterIo;
use crate::queue::DoorbellAddress;
use crate::queue::ProducerAddress;
use crate::queue::RxQueueHandle;
use crate::queue::RxQueueStartParams;
use crate::queue::TxQueueHandle;
use crate::queue::TxQueueStartParams;
use crate::resources::EngineId;
use crate::resources::QueueParams;
use crate::rss::split_for_engines;
use crate::rss::RssInput;
use crate::spq::CompletionEvent;
use crate::spq::CompletionMode;
use crate::spq::SlowPathChannel;
use crate::spq::Spq;
use crate::stats::EthStats;
use crate::vport::TpaMode;
use crate::vport::VportStartParams;
use crate::vport::VportUpdateParams;
use futures::channel::mpsc;
use l2_defs::EthSlowPathRxCqe;
use l2_defs::MacAddress;
use l2_defs::DEFAULT_MAX_BUFFERS_PER_CQE;
use parking_lot::Mutex;
use std::sync::Arc;

/// How the device reaches firmware.
pub enum FunctionBackend {
    /// A PF posts to one slow-path channel per engine.
    Pf {
        /// One channel per engine, in engine order.
        channels: Vec<Arc<dyn SlowPathChannel>>,
        /// Receives completions of event-only ramrods.
        events: Option<mpsc::UnboundedSender<CompletionEvent>>,
    },
    /// A VF sends every request to its PF.
    Vf {
        /// The request channel.
        channel: Arc<dyn VfChannel>,
    },
}

/// Parameters for [`L2Device::vport_start`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartVportParams {
    /// Relative vport id.
    pub vport_id: u8,
    /// MTU.
    pub mtu: u16,
    /// Aggregate received TCP segments.
    pub gro_enable: bool,
    /// Strip the inner VLAN tag.
    pub remove_inner_vlan: bool,
    /// Drop packets with a zero TTL.
    pub drop_ttl0: bool,
    /// Pass PTP packets to the host.
    pub handle_ptp_pkts: bool,
    /// Reset the statistics baseline once the vport is up.
    pub clear_stats: bool,
}

/// Parameters for [`L2Device::vport_update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateVportParams<'a> {
    /// Relative vport id.
    pub vport_id: u8,
    /// Activate or deactivate RX and TX together.
    pub update_vport_active: Option<bool>,
    /// Enable or disable TX switching.
    pub tx_switching: Option<bool>,
    /// Accept frames with any VLAN tag.
    pub accept_any_vlan: Option<bool>,
    /// Reprogram RSS.
    pub rss: Option<RssInput<'a>>,
}

/// Static information about the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthDevInfo {
    /// Number of queue pairs available.
    pub num_queues: u16,
    /// Number of traffic classes.
    pub num_tc: u8,
    /// MAC filters available.
    pub num_mac_filters: u16,
    /// VLAN filters available.
    pub num_vlan_filters: u16,
    /// Permanent MAC address of the port.
    pub port_mac: MacAddress,
    /// The VF runs against a legacy PF.
    pub is_legacy: bool,
}

/// A PF or VF device: one to two engines behind a single L2 interface.
pub struct L2Device {
    config: DeviceConfig,
    hwfns: Vec<Hwfn>,
    baseline: Mutex<EthStats>,
}

impl L2Device {
    /// Creates the device's engines.
    pub fn new(
        config: DeviceConfig,
        backend: FunctionBackend,
        io: Arc<dyn RegisterIo>,
    ) -> Result<Self, L2Error> {
        config.validate()?;

        let ops: Vec<Box<dyn FunctionOps>> = match backend {
            FunctionBackend::Pf { channels, events } => {
                if config.function != FunctionKind::Pf {
                    return Err(L2Error::InvalidConfig("pf backend for a vf device"));
                }
                if channels.len() != config.engines.len() {
                    return Err(L2Error::InvalidConfig(
                        "need one slow path channel per engine",
                    ));
                }
                channels
                    .into_iter()
                    .zip(&config.engines)
                    .map(|(channel, engine)| {
                        Box::new(LocalExecution::new(
                            Spq::new(channel, engine.spq_depth, events.clone()),
                            io.clone(),
                            engine.spq_cid,
                            config.rss_table_max_size,
                        )) as Box<dyn FunctionOps>
                    })
                    .collect()
            }
            FunctionBackend::Vf { channel } => {
                if config.function != FunctionKind::Vf {
                    return Err(L2Error::InvalidConfig("vf backend for a pf device"));
                }
                (0..config.engines.len())
                    .map(|i| {
                        Box::new(DelegatedExecution::new(channel.clone(), EngineId(i as u8)))
                            as Box<dyn FunctionOps>
                    })
                    .collect()
            }
        };

        let hwfns = ops
            .into_iter()
            .zip(&config.engines)
            .enumerate()
            .map(|(i, (ops, engine))| {
                Hwfn::new(
                    EngineId(i as u8),
                    config.function,
                    engine.clone(),
                    ops,
                    io.clone(),
                    config.max_mc_addrs,
                )
            })
            .collect();

        tracing::info!(
            function = ?config.function,
            engines = config.engines.len(),
            "l2 device created"
        );

        Ok(Self {
            config,
            hwfns,
            baseline: Mutex::new(EthStats::default()),
        })
    }

    /// The device's engines, leading engine first.
    pub fn engines(&self) -> &[Hwfn] {
        &self.hwfns
    }

    /// Returns one engine.
    pub fn engine(&self, engine: EngineId) -> Option<&Hwfn> {
        self.hwfns.get(engine.index())
    }

    fn owner(&self, engine: EngineId) -> Result<&Hwfn, L2Error> {
        self.engine(engine).ok_or(L2Error::InvalidResource {
            kind: ResourceKind::Engine,
            id: engine.0.into(),
        })
    }

    /// Picks the engine for a queue and makes its ids engine-relative.
    fn place_queue(&self, rss_num: u8, params: QueueParams) -> (&Hwfn, QueueParams) {
        let engines = self.hwfns.len();
        let hwfn = &self.hwfns[usize::from(rss_num) % engines];
        let params = QueueParams {
            queue_id: params.queue_id / engines as u16,
            stats_id: params.vport_id,
            ..params
        };
        (hwfn, params)
    }

    /// Starts a vport on every engine.
    pub async fn vport_start(&self, params: &StartVportParams) -> Result<(), L2Error> {
        for hwfn in &self.hwfns {
            let start = VportStartParams {
                tpa_mode: if params.gro_enable {
                    TpaMode::Gro
                } else {
                    TpaMode::None
                },
                remove_inner_vlan: params.remove_inner_vlan,
                handle_ptp_pkts: params.handle_ptp_pkts,
                only_untagged: true,
                drop_ttl0: params.drop_ttl0,
                opaque_fid: hwfn.resources().opaque_fid(),
                sw_fid: hwfn.config().sw_fid,
                vport_id: params.vport_id,
                mtu: params.mtu,
                max_buffers_per_cqe: DEFAULT_MAX_BUFFERS_PER_CQE,
                ..Default::default()
            };
            hwfn.vport_start(&start).await.inspect_err(|err| {
                tracing::error!(
                    error = err as &dyn std::error::Error,
                    engine = hwfn.engine().0,
                    "failed to start vport"
                );
            })?;
            tracing::debug!(
                engine = hwfn.engine().0,
                vport = params.vport_id,
                mtu = params.mtu,
                "started vport"
            );
        }

        if params.clear_stats {
            self.reset_vport_stats()?;
        }
        Ok(())
    }

    /// Stops a vport on every engine.
    pub async fn vport_stop(&self, vport_id: u8) -> Result<(), L2Error> {
        for hwfn in &self.hwfns {
            hwfn.vport_stop(vport_id).await.inspect_err(|err| {
                tracing::error!(
                    error = err as &dyn std::error::Error,
                    engine = hwfn.engine().0,
                    "failed to stop vport"
                );
            })?;
        }
        Ok(())
    }

    /// Updates a vport on every engine.
    ///
    /// With more than one engine the RSS table is split by queue owner. If
    /// an engine would end up steering everything to one queue, the update
    /// goes ahead without RSS.
    pub async fn vport_update(&self, params: &UpdateVportParams<'_>) -> Result<(), L2Error> {
        let rss = match &params.rss {
            Some(input) => match split_for_engines(input, self.hwfns.len()) {
                Ok(split) => Some(split),
                Err(err @ L2Error::DegenerateRssTable { .. }) => {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        "not enough queues for rss, updating without it"
                    );
                    None
                }
                Err(err) => return Err(err),
            },
            None => None,
        };

        for hwfn in &self.hwfns {
            let update = VportUpdateParams {
                opaque_fid: hwfn.resources().opaque_fid(),
                vport_id: params.vport_id,
                rx_active: params.update_vport_active,
                tx_active: params.update_vport_active,
                tx_switching: params.tx_switching,
                accept_any_vlan: params.accept_any_vlan,
                rss: rss.as_ref().map(|split| split[hwfn.engine().index()]),
                ..Default::default()
            };
            hwfn.vport_update(&update, CompletionMode::Blocking)
                .await
                .inspect_err(|err| {
                    tracing::error!(
                        error = err as &dyn std::error::Error,
                        engine = hwfn.engine().0,
                        "failed to update vport"
                    );
                })?;
        }
        Ok(())
    }

    /// Starts an RX queue on the engine selected by `rss_num`.
    pub async fn queue_rx_start(
        &self,
        rss_num: u8,
        params: QueueParams,
        rx: &RxQueueStartParams,
    ) -> Result<(ProducerAddress, RxQueueHandle), L2Error> {
        let (hwfn, params) = self.place_queue(rss_num, params);
        hwfn.rx_queue_start(params, rx).await.inspect_err(|err| {
            tracing::error!(
                error = err as &dyn std::error::Error,
                rss_num,
                "failed to start rx queue"
            );
        })
    }

    /// Stops an RX queue.
    pub async fn queue_rx_stop(
        &self,
        handle: RxQueueHandle,
    ) -> Result<(), QueueStopError<RxQueueHandle>> {
        let hwfn = match self.owner(handle.cid().owner()) {
            Ok(hwfn) => hwfn,
            Err(error) => return Err(QueueStopError { handle, error }),
        };
        hwfn.rx_queue_stop(handle, false, false)
            .await
            .inspect_err(|err| {
                tracing::error!(
                    error = &err.error as &dyn std::error::Error,
                    "failed to stop rx queue"
                );
            })
    }

    /// Starts a TX queue on the engine selected by `rss_num`.
    pub async fn queue_tx_start(
        &self,
        rss_num: u8,
        params: QueueParams,
        tx: &TxQueueStartParams,
    ) -> Result<(DoorbellAddress, TxQueueHandle), L2Error> {
        let (hwfn, params) = self.place_queue(rss_num, params);
        hwfn.tx_queue_start(params, tx).await.inspect_err(|err| {
            tracing::error!(
                error = err as &dyn std::error::Error,
                rss_num,
                "failed to start tx queue"
            );
        })
    }

    /// Stops a TX queue.
    pub async fn queue_tx_stop(
        &self,
        handle: TxQueueHandle,
    ) -> Result<(), QueueStopError<TxQueueHandle>> {
        let hwfn = match self.owner(handle.cid().owner()) {
            Ok(hwfn) => hwfn,
            Err(error) => return Err(QueueStopError { handle, error }),
        };
        hwfn.tx_queue_stop(handle).await.inspect_err(|err| {
            tracing::error!(
                error = &err.error as &dyn std::error::Error,
                "failed to stop tx queue"
            );
        })
    }

    /// Updates the completion flags of RX queues across engines.
    ///
    /// A callback in `mode` runs once, after every queue's update completes.
    pub async fn rx_queues_update(
        &self,
        handles: &[&RxQueueHandle],
        complete_cqe: bool,
        complete_event: bool,
        mode: CompletionMode,
    ) -> Result<(), L2Error> {
        let groups: Vec<(&Hwfn, Vec<&RxQueueHandle>)> = self
            .hwfns
            .iter()
            .map(|hwfn| {
                let owned = handles
                    .iter()
                    .copied()
                    .filter(|h| h.cid().owner() == hwfn.engine())
                    .collect::<Vec<_>>();
                (hwfn, owned)
            })
            .filter(|(_, owned)| !owned.is_empty())
            .collect();

        let routed: usize = groups.iter().map(|(_, owned)| owned.len()).sum();
        if routed != handles.len() {
            return Err(L2Error::InvalidArgument("rx queue handle from another device"));
        }

        for ((hwfn, owned), mode) in groups.iter().zip(mode.split(groups.len())) {
            hwfn.rx_queues_update(owned, complete_cqe, complete_event, mode)
                .await?;
        }
        Ok(())
    }

    /// Applies a filter request on every engine.
    pub async fn filter_config(&self, config: &FilterConfig) -> Result<(), L2Error> {
        match config {
            FilterConfig::Ucast { kind, mac, vlan } => {
                let filter = FilterConfig::to_ucast(*kind, *mac, *vlan)?;
                for hwfn in &self.hwfns {
                    hwfn.filter_ucast(&filter, CompletionMode::Callback(None))
                        .await?;
                }
            }
            FilterConfig::Mcast { kind, macs } => {
                let filter = FilterConfig::to_mcast(*kind, macs)?;
                for hwfn in &self.hwfns {
                    hwfn.filter_mcast(&filter, CompletionMode::Callback(None))
                        .await?;
                }
            }
            FilterConfig::RxMode(mode) => {
                let (rx, tx) = mode.accept_filters();
                for hwfn in &self.hwfns {
                    let update = VportUpdateParams {
                        opaque_fid: hwfn.resources().opaque_fid(),
                        vport_id: 0,
                        rx_accept_filter: Some(rx),
                        tx_accept_filter: Some(tx),
                        ..Default::default()
                    };
                    hwfn.vport_update(&update, CompletionMode::Callback(None))
                        .await?;
                }
            }
        }
        Ok(())
    }

    fn read_stats(&self) -> Result<EthStats, L2Error> {
        let mut total = EthStats::default();
        for hwfn in &self.hwfns {
            total += hwfn.read_stats()?;
        }
        Ok(total)
    }

    /// Returns the counters accumulated since the last reset.
    pub fn get_vport_stats(&self) -> Result<EthStats, L2Error> {
        let live = self.read_stats()?;
        Ok(live - *self.baseline.lock())
    }

    /// Zeroes the per-vport counters and takes a new baseline. Port
    /// counters cannot be zeroed, so they are only baselined.
    pub fn reset_vport_stats(&self) -> Result<(), L2Error> {
        for hwfn in &self.hwfns {
            hwfn.zero_stats()?;
        }
        let baseline = self.read_stats()?;
        *self.baseline.lock() = baseline;
        Ok(())
    }

    /// Programs tunnel UDP ports on every engine. Does nothing on a VF.
    pub async fn tunnel_config(&self, params: &TunnelParams) -> Result<(), L2Error> {
        for hwfn in &self.hwfns {
            hwfn.tunnel_update(params).await?;
        }
        Ok(())
    }

    /// Delivers a slow-path completion seen on the RX ring of `rss_id`.
    ///
    /// Returns false if it did not match an outstanding ramrod.
    pub fn eth_cqe_completion(&self, rss_id: u8, cqe: &EthSlowPathRxCqe) -> bool {
        let hwfn = &self.hwfns[usize::from(rss_id) % self.hwfns.len()];
        match hwfn.completer() {
            Some(completer) => completer.complete_cqe(cqe),
            None => {
                tracing::warn!(rss_id, "slow path cqe on a function without a slow path queue");
                false
            }
        }
    }

    /// Returns static information about the device.
    pub fn eth_info(&self) -> EthDevInfo {
        let num_queues = match self.config.function {
            FunctionKind::Pf => self
                .config
                .engines
                .iter()
                .map(|e| u32::from(e.l2_queues.count).min(e.cids.count / 3))
                .sum::<u32>(),
            FunctionKind::Vf => self
                .config
                .engines
                .iter()
                .map(|e| u32::from(e.vf_num_rxqs))
                .sum(),
        };
        let leading = &self.config.engines[EngineId::LEADING.index()];
        EthDevInfo {
            num_queues: num_queues.try_into().unwrap_or(u16::MAX),
            num_tc: 1,
            num_mac_filters: leading.mac_filters,
            num_vlan_filters: leading.vlan_filters,
            port_mac: self.config.port_mac,
            is_legacy: self.config.legacy_vf,
        }
    }

    /// Returns whether the function may use `mac`.
    pub async fn check_mac(&self, mac: MacAddress) -> Result<bool, L2Error> {
        self.hwfns[EngineId::LEADING.index()].check_mac(mac).await
    }
}
