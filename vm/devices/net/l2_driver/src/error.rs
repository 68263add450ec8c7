// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::resources::EngineId;
use std::fmt::Display;
use thiserror::Error;

/// The kinds of per-function resources whose relative ids are translated to
/// engine-absolute ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A virtual port.
    Vport,
    /// An L2 queue zone.
    L2Queue,
    /// A statistics counter set.
    Stats,
    /// An RSS engine.
    RssEngine,
    /// An engine (hwfn) of the device.
    Engine,
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Vport => "vport",
            ResourceKind::L2Queue => "l2 queue",
            ResourceKind::Stats => "stats counter",
            ResourceKind::RssEngine => "rss engine",
            ResourceKind::Engine => "engine",
        };
        f.pad(s)
    }
}

/// Errors returned by the L2 control plane.
#[derive(Debug, Error)]
pub enum L2Error {
    /// The CID pool has no free entries.
    #[error("no free connection ids")]
    ResourceExhausted,
    /// A relative id is outside the function's assigned range.
    #[error("{kind} {id} is outside of the function's range")]
    InvalidResource {
        /// The kind of resource.
        kind: ResourceKind,
        /// The offending relative id.
        id: u16,
    },
    /// The requested operation is not supported.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
    /// An RSS indirection table slot does not reference a queue.
    #[error("rss indirection table slot {slot} is empty")]
    IncompleteTable {
        /// The first unresolved slot.
        slot: usize,
    },
    /// Too many multicast addresses were supplied.
    #[error("{count} multicast addresses exceeds the limit of {max}")]
    TooManyAddresses {
        /// The number of addresses supplied.
        count: usize,
        /// The configured maximum.
        max: usize,
    },
    /// The slow path queue did not accept the command.
    #[error("ramrod {cmd} was not accepted")]
    SubmissionRejected {
        /// The command that was rejected.
        cmd: RamrodKind,
        /// Why.
        #[source]
        source: anyhow::Error,
    },
    /// Firmware completed the command with a failure status.
    #[error("ramrod {cmd} completed with status {status:#x}")]
    CompletionFailed {
        /// The command that failed.
        cmd: RamrodKind,
        /// The firmware status code.
        status: u8,
    },
    /// The completion path went away before the command completed.
    #[error("ramrod {cmd} was abandoned before completion")]
    CompletionDropped {
        /// The command that was abandoned.
        cmd: RamrodKind,
    },
    /// A per-engine RSS table would steer to a single queue.
    #[error("rss table for engine {engine} references a single queue")]
    DegenerateRssTable {
        /// The engine whose table collapsed.
        engine: EngineId,
    },
    /// The caller supplied an invalid combination of parameters.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The device configuration is not usable.
    #[error("invalid device configuration: {0}")]
    InvalidConfig(&'static str),
    /// The register/memory collaborator failed.
    #[error("register access failed")]
    RegisterAccess(#[source] anyhow::Error),
    /// The VF-to-PF transport failed.
    #[error("vf channel request failed")]
    Transport(#[source] anyhow::Error),
}

/// Identifies a ramrod in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamrodKind {
    /// Vport start.
    VportStart,
    /// Vport update.
    VportUpdate,
    /// Vport stop.
    VportStop,
    /// RX queue start.
    RxQueueStart,
    /// RX queue update.
    RxQueueUpdate,
    /// RX queue stop.
    RxQueueStop,
    /// TX queue start.
    TxQueueStart,
    /// TX queue stop.
    TxQueueStop,
    /// Unicast filter update.
    FiltersUpdate,
    /// PF update carrying tunnel configuration.
    TunnelUpdate,
}

impl Display for RamrodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RamrodKind::VportStart => "vport_start",
            RamrodKind::VportUpdate => "vport_update",
            RamrodKind::VportStop => "vport_stop",
            RamrodKind::RxQueueStart => "rx_queue_start",
            RamrodKind::RxQueueUpdate => "rx_queue_update",
            RamrodKind::RxQueueStop => "rx_queue_stop",
            RamrodKind::TxQueueStart => "tx_queue_start",
            RamrodKind::TxQueueStop => "tx_queue_stop",
            RamrodKind::FiltersUpdate => "filters_update",
            RamrodKind::TunnelUpdate => "tunnel_update",
        };
        f.pad(s)
    }
}

/// A queue stop failed. The queue is still owned by the caller and must be
/// stopped again (or leaked) explicitly.
#[derive(Debug, Error)]
#[error("failed to stop queue")]
pub struct QueueStopError<H> {
    /// The handle of the queue that is still running.
    pub handle: H,
    /// The underlying failure.
    #[source]
    pub error: L2Error,
}
