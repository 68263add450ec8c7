// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The slow-path queue: ramrod submission and completion.
//!
//! Each ramrod is posted once with a fresh echo value. Firmware completes it
//! later, through [`SpqCompleter`], with that echo. Completions for the same
//! cid are delivered in the order the ramrods were posted, even if the
//! completion source reports them out of order.

use crate::error::L2Error;
use crate::error::RamrodKind;
use futures::channel::mpsc;
use futures::channel::oneshot;
use l2_defs::eth::CommonRamrodCmdId;
use l2_defs::eth::EthRamrodCmdId;
use l2_defs::eth::PfUpdateTunnelConfig;
use l2_defs::eth::RxQueueStartRamrodData;
use l2_defs::eth::RxQueueStopRamrodData;
use l2_defs::eth::RxQueueUpdateRamrodData;
use l2_defs::eth::TxQueueStartRamrodData;
use l2_defs::eth::VportFilterUpdateRamrodData;
use l2_defs::eth::VportStartRamrodData;
use l2_defs::eth::VportStopRamrodData;
use l2_defs::eth::VportUpdateRamrodData;
use l2_defs::EthSlowPathRxCqe;
use l2_defs::ProtocolId;
use l2_defs::RamrodHeader;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use zerocopy::IntoBytes;

/// A ramrod payload, tagged by command.
#[derive(Debug, Clone)]
pub enum Ramrod {
    /// Start a vport.
    VportStart(VportStartRamrodData),
    /// Update a vport.
    VportUpdate(Box<VportUpdateRamrodData>),
    /// Stop a vport.
    VportStop(VportStopRamrodData),
    /// Start an RX queue.
    RxQueueStart(RxQueueStartRamrodData),
    /// Change an RX queue's completion flags.
    RxQueueUpdate(RxQueueUpdateRamrodData),
    /// Stop an RX queue.
    RxQueueStop(RxQueueStopRamrodData),
    /// Start a TX queue.
    TxQueueStart(TxQueueStartRamrodData),
    /// Stop a TX queue. Carries no payload.
    TxQueueStop,
    /// Add, remove or move unicast filters.
    FiltersUpdate(VportFilterUpdateRamrodData),
    /// PF update carrying tunnel UDP ports.
    TunnelUpdate(PfUpdateTunnelConfig),
}

impl Ramrod {
    /// Returns the command kind.
    pub fn kind(&self) -> RamrodKind {
        match self {
            Ramrod::VportStart(_) => RamrodKind::VportStart,
            Ramrod::VportUpdate(_) => RamrodKind::VportUpdate,
            Ramrod::VportStop(_) => RamrodKind::VportStop,
            Ramrod::RxQueueStart(_) => RamrodKind::RxQueueStart,
            Ramrod::RxQueueUpdate(_) => RamrodKind::RxQueueUpdate,
            Ramrod::RxQueueStop(_) => RamrodKind::RxQueueStop,
            Ramrod::TxQueueStart(_) => RamrodKind::TxQueueStart,
            Ramrod::TxQueueStop => RamrodKind::TxQueueStop,
            Ramrod::FiltersUpdate(_) => RamrodKind::FiltersUpdate,
            Ramrod::TunnelUpdate(_) => RamrodKind::TunnelUpdate,
        }
    }

    fn cmd_id(&self) -> u8 {
        match self {
            Ramrod::VportStart(_) => EthRamrodCmdId::VPORT_START.0,
            Ramrod::VportUpdate(_) => EthRamrodCmdId::VPORT_UPDATE.0,
            Ramrod::VportStop(_) => EthRamrodCmdId::VPORT_STOP.0,
            Ramrod::RxQueueStart(_) => EthRamrodCmdId::RX_QUEUE_START.0,
            Ramrod::RxQueueUpdate(_) => EthRamrodCmdId::RX_QUEUE_UPDATE.0,
            Ramrod::RxQueueStop(_) => EthRamrodCmdId::RX_QUEUE_STOP.0,
            Ramrod::TxQueueStart(_) => EthRamrodCmdId::TX_QUEUE_START.0,
            Ramrod::TxQueueStop => EthRamrodCmdId::TX_QUEUE_STOP.0,
            Ramrod::FiltersUpdate(_) => EthRamrodCmdId::FILTERS_UPDATE.0,
            Ramrod::TunnelUpdate(_) => CommonRamrodCmdId::PF_UPDATE.0,
        }
    }

    fn protocol(&self) -> ProtocolId {
        match self {
            Ramrod::TunnelUpdate(_) => ProtocolId::COMMON,
            _ => ProtocolId::ETH,
        }
    }

    /// The payload bytes as posted after the header.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Ramrod::VportStart(data) => data.as_bytes(),
            Ramrod::VportUpdate(data) => data.as_bytes(),
            Ramrod::VportStop(data) => data.as_bytes(),
            Ramrod::RxQueueStart(data) => data.as_bytes(),
            Ramrod::RxQueueUpdate(data) => data.as_bytes(),
            Ramrod::RxQueueStop(data) => data.as_bytes(),
            Ramrod::TxQueueStart(data) => data.as_bytes(),
            Ramrod::TxQueueStop => &[],
            Ramrod::FiltersUpdate(data) => data.as_bytes(),
            Ramrod::TunnelUpdate(data) => data.as_bytes(),
        }
    }
}

/// A completion callback. Receives the firmware status (zero on success).
pub type CompletionCallback = Box<dyn FnOnce(u8) + Send>;

/// How the submitter learns that a ramrod completed.
pub enum CompletionMode {
    /// [`Spq::post`] waits for the completion and returns its result.
    Blocking,
    /// [`Spq::post`] returns once the ramrod is accepted. The callback, if
    /// any, runs from the completion context.
    Callback(Option<CompletionCallback>),
    /// [`Spq::post`] returns once the ramrod is accepted. The completion is
    /// reported on the event channel given to [`Spq::new`].
    ///
    /// A VF has no event channel. Its requests return after the PF has
    /// completed them, as with [`CompletionMode::Blocking`], and no event
    /// is raised.
    EventOnly,
}

impl std::fmt::Debug for CompletionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocking => f.write_str("Blocking"),
            Self::Callback(cb) => f
                .debug_tuple("Callback")
                .field(&cb.as_ref().map(|_| "..."))
                .finish(),
            Self::EventOnly => f.write_str("EventOnly"),
        }
    }
}

struct Batch {
    remaining: usize,
    status: u8,
    callback: Option<CompletionCallback>,
}

impl CompletionMode {
    /// Splits one completion request across `n` ramrods.
    ///
    /// A callback runs once, after the last of the `n` completes, with the
    /// first non-zero status seen. If fewer than `n` of the returned modes
    /// are ever posted, the callback does not run. With nothing to wait
    /// for, it runs right away.
    pub fn split(self, n: usize) -> Vec<CompletionMode> {
        match self {
            CompletionMode::Blocking => (0..n).map(|_| CompletionMode::Blocking).collect(),
            CompletionMode::EventOnly => (0..n).map(|_| CompletionMode::EventOnly).collect(),
            CompletionMode::Callback(None) => (0..n).map(|_| CompletionMode::Callback(None)).collect(),
            CompletionMode::Callback(Some(callback)) if n == 0 => {
                callback(0);
                Vec::new()
            }
            CompletionMode::Callback(Some(callback)) if n == 1 => {
                vec![CompletionMode::Callback(Some(callback))]
            }
            CompletionMode::Callback(Some(callback)) => {
                let batch = Arc::new(Mutex::new(Batch {
                    remaining: n,
                    status: 0,
                    callback: Some(callback),
                }));
                (0..n)
                    .map(|_| {
                        let batch = batch.clone();
                        CompletionMode::Callback(Some(Box::new(move |status| {
                            let callback = {
                                let mut batch = batch.lock();
                                if batch.status == 0 {
                                    batch.status = status;
                                }
                                batch.remaining -= 1;
                                if batch.remaining > 0 {
                                    return;
                                }
                                batch.callback.take().map(|cb| (cb, batch.status))
                            };
                            if let Some((callback, status)) = callback {
                                callback(status);
                            }
                        })))
                    })
                    .collect()
            }
        }
    }
}

/// One ramrod to post.
#[derive(Debug)]
pub struct RamrodRequest {
    /// The command and its payload.
    pub ramrod: Ramrod,
    /// The connection the ramrod applies to.
    pub cid: u32,
    /// The requesting function.
    pub opaque_fid: u16,
    /// How completion is reported.
    pub mode: CompletionMode,
}

/// A completion reported for an [`CompletionMode::EventOnly`] ramrod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEvent {
    /// The connection the ramrod applied to.
    pub cid: u32,
    /// The echo value it was posted with.
    pub echo: u16,
    /// The command.
    pub cmd: RamrodKind,
    /// The firmware status.
    pub status: u8,
}

/// The firmware command ring.
///
/// Implemented outside this crate by the owner of the ring memory and its
/// producer doorbell.
pub trait SlowPathChannel: Send + Sync {
    /// Places one element on the ring. An error means the ramrod was not
    /// accepted and will never complete.
    fn post(&self, header: &RamrodHeader, payload: &[u8]) -> anyhow::Result<()>;
}

enum Waiter {
    Blocking(oneshot::Sender<u8>),
    Callback(Option<CompletionCallback>),
    Event,
}

struct Pending {
    cid: u32,
    cmd: RamrodKind,
    waiter: Waiter,
    status: Option<u8>,
}

struct SpqState {
    next_echo: u16,
    pending: HashMap<u16, Pending>,
    /// Outstanding echoes per cid, in post order.
    order: HashMap<u32, VecDeque<u16>>,
}

impl SpqState {
    fn remove(&mut self, echo: u16) -> Option<Pending> {
        let pending = self.pending.remove(&echo)?;
        if let Some(queue) = self.order.get_mut(&pending.cid) {
            queue.retain(|&e| e != echo);
            if queue.is_empty() {
                self.order.remove(&pending.cid);
            }
        }
        Some(pending)
    }

    /// Pops the completed ramrods at the head of `cid`'s queue.
    fn take_ready(&mut self, cid: u32) -> Vec<(u16, Pending)> {
        let mut ready = Vec::new();
        let Some(queue) = self.order.get_mut(&cid) else {
            return ready;
        };
        while let Some(&echo) = queue.front() {
            if !matches!(self.pending.get(&echo), Some(Pending { status: Some(_), .. })) {
                break;
            }
            queue.pop_front();
            if let Some(pending) = self.pending.remove(&echo) {
                ready.push((echo, pending));
            }
        }
        if queue.is_empty() {
            self.order.remove(&cid);
        }
        ready
    }
}

struct SpqShared {
    state: Mutex<SpqState>,
    events: Option<mpsc::UnboundedSender<CompletionEvent>>,
}

impl SpqShared {
    fn deliver(&self, echo: u16, pending: Pending) {
        let Some(status) = pending.status else {
            return;
        };
        tracing::trace!(
            cmd = %pending.cmd,
            cid = pending.cid,
            echo,
            status,
            "ramrod complete"
        );
        match pending.waiter {
            Waiter::Blocking(send) => {
                // The waiter may have given up.
                let _ = send.send(status);
            }
            Waiter::Callback(Some(callback)) => callback(status),
            Waiter::Callback(None) => {}
            Waiter::Event => {
                let event = CompletionEvent {
                    cid: pending.cid,
                    echo,
                    cmd: pending.cmd,
                    status,
                };
                match &self.events {
                    Some(events) => {
                        if events.unbounded_send(event).is_err() {
                            tracing::warn!(?event, "completion event receiver closed");
                        }
                    }
                    None => tracing::warn!(?event, "no completion event channel"),
                }
            }
        }
    }
}

/// The slow-path queue of one engine.
pub struct Spq {
    channel: Arc<dyn SlowPathChannel>,
    depth: usize,
    shared: Arc<SpqShared>,
}

impl Spq {
    /// Creates a new slow-path queue posting to `channel`, with at most
    /// `depth` ramrods outstanding.
    ///
    /// `events` receives completions of [`CompletionMode::EventOnly`]
    /// ramrods.
    pub fn new(
        channel: Arc<dyn SlowPathChannel>,
        depth: usize,
        events: Option<mpsc::UnboundedSender<CompletionEvent>>,
    ) -> Self {
        Self {
            channel,
            depth,
            shared: Arc::new(SpqShared {
                state: Mutex::new(SpqState {
                    next_echo: 0,
                    pending: HashMap::new(),
                    order: HashMap::new(),
                }),
                events,
            }),
        }
    }

    /// Returns a handle for delivering completions to this queue.
    pub fn completer(&self) -> SpqCompleter {
        SpqCompleter {
            shared: self.shared.clone(),
        }
    }

    /// Returns the number of posted ramrods that have not completed.
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Posts a ramrod.
    ///
    /// For [`CompletionMode::Blocking`], waits for the completion and fails
    /// if firmware reports an error. Otherwise returns once the ramrod is
    /// accepted. Nothing is left outstanding if the ramrod is not accepted.
    pub async fn post(&self, request: RamrodRequest) -> Result<(), L2Error> {
        let RamrodRequest {
            ramrod,
            cid,
            opaque_fid,
            mode,
        } = request;
        let cmd = ramrod.kind();

        let (waiter, recv) = match mode {
            CompletionMode::Blocking => {
                let (send, recv) = oneshot::channel();
                (Waiter::Blocking(send), Some(recv))
            }
            CompletionMode::Callback(callback) => (Waiter::Callback(callback), None),
            CompletionMode::EventOnly => (Waiter::Event, None),
        };

        let echo = {
            let mut state = self.shared.state.lock();
            if state.pending.len() >= self.depth {
                return Err(L2Error::SubmissionRejected {
                    cmd,
                    source: anyhow::anyhow!("slow path queue is full"),
                });
            }
            let mut echo = state.next_echo;
            while state.pending.contains_key(&echo) {
                echo = echo.wrapping_add(1);
            }
            state.next_echo = echo.wrapping_add(1);
            state.pending.insert(
                echo,
                Pending {
                    cid,
                    cmd,
                    waiter,
                    status: None,
                },
            );
            state.order.entry(cid).or_default().push_back(echo);
            echo
        };

        let header = RamrodHeader {
            cmd_id: ramrod.cmd_id(),
            protocol_id: ramrod.protocol(),
            reserved: 0,
            cid,
            opaque_fid,
            echo,
        };

        tracing::debug!(%cmd, cid, opaque_fid, echo, "posting ramrod");
        if let Err(err) = self.channel.post(&header, ramrod.as_bytes()) {
            // Firmware never saw it, so it will never complete. Anything
            // held behind it on the same cid can go now.
            let ready = {
                let mut state = self.shared.state.lock();
                state.remove(echo);
                state.take_ready(cid)
            };
            for (echo, pending) in ready {
                self.shared.deliver(echo, pending);
            }
            return Err(L2Error::SubmissionRejected { cmd, source: err });
        }

        if let Some(recv) = recv {
            let status = recv.await.map_err(|_| L2Error::CompletionDropped { cmd })?;
            if status != 0 {
                return Err(L2Error::CompletionFailed { cmd, status });
            }
        }
        Ok(())
    }
}

/// Delivers completions to an [`Spq`]. Cheap to clone and usable from any
/// thread.
#[derive(Clone)]
pub struct SpqCompleter {
    shared: Arc<SpqShared>,
}

impl SpqCompleter {
    /// Completes the ramrod posted with `echo`.
    ///
    /// Returns false if no such ramrod is outstanding.
    pub fn complete(&self, echo: u16, status: u8) -> bool {
        let ready = {
            let mut state = self.shared.state.lock();
            let Some(pending) = state.pending.get_mut(&echo) else {
                tracing::warn!(echo, status, "completion for unknown ramrod");
                return false;
            };
            if pending.status.is_some() {
                tracing::warn!(echo, status, "duplicate ramrod completion");
                return false;
            }
            pending.status = Some(status);
            let cid = pending.cid;
            state.take_ready(cid)
        };
        // Callbacks run without the lock held so they can post again.
        for (echo, pending) in ready {
            self.shared.deliver(echo, pending);
        }
        true
    }

    /// Completes a ramrod reported through an RX completion ring.
    pub fn complete_cqe(&self, cqe: &EthSlowPathRxCqe) -> bool {
        tracing::trace!(
            ramrod_cmd_id = cqe.ramrod_cmd_id,
            echo = cqe.echo,
            error_flag = cqe.error_flag,
            "slow path cqe"
        );
        self.complete(cqe.echo, cqe.error_flag)
    }

    /// Drops every outstanding ramrod without completing it. Blocking
    /// submitters observe [`L2Error::CompletionDropped`].
    ///
    /// Used when the completion source is gone for good, such as after a
    /// device reset.
    pub fn abandon_all(&self) -> usize {
        let abandoned: Vec<_> = {
            let mut state = self.shared.state.lock();
            state.order.clear();
            state.pending.drain().collect()
        };
        for (echo, pending) in &abandoned {
            tracing::error!(cmd = %pending.cmd, cid = pending.cid, echo, "abandoning ramrod");
        }
        abandoned.len()
    }
}
