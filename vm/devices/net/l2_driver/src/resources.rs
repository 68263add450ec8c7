// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-engine resource ranges and queue connection ids.

use crate::config::CidRange;
use crate::config::EngineConfig;
use crate::config::FunctionKind;
use crate::config::ResourceRange;
use crate::error::L2Error;
use crate::error::ResourceKind;
use parking_lot::Mutex;
use std::fmt::Display;

/// Index of an engine within its device. Engine 0 is the leading engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineId(pub u8);

impl EngineId {
    /// The leading engine.
    pub const LEADING: Self = Self(0);

    /// The engine's index into the device's engine list.
    pub fn index(self) -> usize {
        self.0.into()
    }
}

impl Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The addressing of a queue: vport, queue zone, statistics counter and
/// status block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueParams {
    /// Vport the queue belongs to.
    pub vport_id: u8,
    /// Queue zone id.
    pub queue_id: u16,
    /// Statistics counter set.
    pub stats_id: u8,
    /// Status block id. Always absolute.
    pub sb: u16,
    /// Protocol index within the status block.
    pub sb_idx: u8,
}

/// The connection identity of one started (or starting) queue.
///
/// Must be handed back to [`ResourceManager::release_cid`] exactly once;
/// dropping it otherwise leaks the cid and logs an error.
#[derive(Debug)]
pub struct QueueCid {
    cid: u32,
    opaque_fid: u16,
    vf_qid: u8,
    legacy_vf: bool,
    is_vf: bool,
    pooled: bool,
    owner: EngineId,
    rel: QueueParams,
    abs: QueueParams,
    armed: bool,
}

impl QueueCid {
    /// The firmware connection id.
    pub fn cid(&self) -> u32 {
        self.cid
    }

    /// The function that requested the queue.
    pub fn opaque_fid(&self) -> u16 {
        self.opaque_fid
    }

    /// The queue index as seen by the owning VF.
    pub fn vf_qid(&self) -> u8 {
        self.vf_qid
    }

    /// The owning VF uses the legacy producer zone.
    pub fn legacy_vf(&self) -> bool {
        self.legacy_vf
    }

    /// The queue was configured by a PF on behalf of one of its VFs.
    pub fn is_vf(&self) -> bool {
        self.is_vf
    }

    /// The engine that created this cid.
    pub fn owner(&self) -> EngineId {
        self.owner
    }

    /// The ids as supplied by the caller.
    pub fn rel(&self) -> &QueueParams {
        &self.rel
    }

    /// The engine-absolute ids.
    pub fn abs(&self) -> &QueueParams {
        &self.abs
    }
}

impl Drop for QueueCid {
    fn drop(&mut self) {
        if self.armed {
            tracing::error!(
                cid = self.cid,
                owner = self.owner.0,
                queue_id = self.abs.queue_id,
                "leaking queue cid"
            );
        }
    }
}

/// Fixed-size set of cids with a free list.
struct CidPool {
    range: CidRange,
    free: Vec<u32>,
}

impl CidPool {
    fn new(range: CidRange) -> Self {
        // Lowest ids come out first.
        let free = (0..range.count).rev().collect();
        Self { range, free }
    }

    fn alloc(&mut self) -> Option<u32> {
        self.free.pop().map(|i| self.range.base + i)
    }

    /// Returns false, leaving the pool untouched, if `cid` is not an
    /// outstanding cid of this pool.
    fn free(&mut self, cid: u32) -> bool {
        let index = cid.wrapping_sub(self.range.base);
        if index >= self.range.count || self.free.contains(&index) {
            return false;
        }
        self.free.push(index);
        true
    }

    fn in_use(&self) -> usize {
        self.range.count as usize - self.free.len()
    }
}

/// The resource manager of one engine.
///
/// Owns the engine's cid pool and translates function-relative vport, queue,
/// statistics and RSS engine ids to engine-absolute ones.
pub struct ResourceManager {
    engine: EngineId,
    function: FunctionKind,
    opaque_fid: u16,
    vports: ResourceRange,
    l2_queues: ResourceRange,
    rss_engines: ResourceRange,
    pool: Mutex<CidPool>,
}

impl ResourceManager {
    /// Creates the resource manager for `engine`.
    pub fn new(engine: EngineId, function: FunctionKind, config: &EngineConfig) -> Self {
        Self {
            engine,
            function,
            opaque_fid: config.opaque_fid,
            vports: config.vports,
            l2_queues: config.l2_queues,
            rss_engines: config.rss_engines,
            pool: Mutex::new(CidPool::new(match function {
                FunctionKind::Pf => config.cids,
                FunctionKind::Vf => CidRange::default(),
            })),
        }
    }

    /// The engine this manager belongs to.
    pub fn engine(&self) -> EngineId {
        self.engine
    }

    /// The engine's own function id.
    pub fn opaque_fid(&self) -> u16 {
        self.opaque_fid
    }

    /// Translates a relative vport id.
    pub fn fw_vport(&self, rel: u8) -> Result<u8, L2Error> {
        translate_u8(&self.vports, rel, ResourceKind::Vport)
    }

    /// Translates a relative L2 queue zone id.
    pub fn fw_l2_queue(&self, rel: u16) -> Result<u16, L2Error> {
        self.l2_queues
            .translate(rel)
            .ok_or(L2Error::InvalidResource {
                kind: ResourceKind::L2Queue,
                id: rel,
            })
    }

    /// Translates a relative RSS engine id.
    pub fn fw_rss_eng(&self, rel: u8) -> Result<u8, L2Error> {
        translate_u8(&self.rss_engines, rel, ResourceKind::RssEngine)
    }

    fn fw_stats(&self, rel: u8) -> Result<u8, L2Error> {
        translate_u8(&self.vports, rel, ResourceKind::Stats)
    }

    /// Creates the connection identity for a new queue.
    ///
    /// `opaque_fid` is the function the queue is for. When it differs from
    /// this engine's own function, the queue is being configured for a VF:
    /// `vf_qid` becomes the cid and the statistics id is taken as absolute.
    pub fn acquire_cid(
        &self,
        opaque_fid: u16,
        vf_qid: u8,
        legacy_vf: bool,
        params: &QueueParams,
    ) -> Result<QueueCid, L2Error> {
        let is_vf = opaque_fid != self.opaque_fid;
        let mut queue_cid = QueueCid {
            cid: 0,
            opaque_fid,
            vf_qid,
            legacy_vf,
            is_vf: false,
            pooled: false,
            owner: self.engine,
            rel: *params,
            abs: *params,
            armed: true,
        };

        if self.function == FunctionKind::Vf {
            // Only the PF knows the absolute ids.
            return Ok(queue_cid);
        }

        if is_vf {
            queue_cid.cid = vf_qid.into();
        } else {
            let Some(cid) = self.pool.lock().alloc() else {
                queue_cid.armed = false;
                return Err(L2Error::ResourceExhausted);
            };
            queue_cid.cid = cid;
            queue_cid.pooled = true;
        }

        match self.translate(params, is_vf) {
            Ok(abs) => queue_cid.abs = abs,
            Err(err) => {
                self.release_cid(queue_cid);
                return Err(err);
            }
        }
        queue_cid.is_vf = is_vf;

        tracing::debug!(
            opaque_fid,
            cid = queue_cid.cid,
            vport = params.vport_id,
            abs_vport = queue_cid.abs.vport_id,
            qzone = params.queue_id,
            abs_qzone = queue_cid.abs.queue_id,
            stats = params.stats_id,
            abs_stats = queue_cid.abs.stats_id,
            sb = params.sb,
            sb_idx = params.sb_idx,
            "acquired queue cid"
        );
        Ok(queue_cid)
    }

    fn translate(&self, rel: &QueueParams, is_vf: bool) -> Result<QueueParams, L2Error> {
        Ok(QueueParams {
            vport_id: self.fw_vport(rel.vport_id)?,
            queue_id: self.fw_l2_queue(rel.queue_id)?,
            stats_id: if is_vf {
                rel.stats_id
            } else {
                self.fw_stats(rel.stats_id)?
            },
            sb: rel.sb,
            sb_idx: rel.sb_idx,
        })
    }

    /// Releases a queue's connection identity.
    ///
    /// A cid that this engine did not hand out is logged and leaked rather
    /// than added to the pool.
    pub fn release_cid(&self, mut cid: QueueCid) {
        if cid.owner != self.engine {
            tracing::error!(
                cid = cid.cid,
                owner = cid.owner.0,
                engine = self.engine.0,
                "cid released to the wrong engine"
            );
            return;
        }
        if cid.pooled && !self.pool.lock().free(cid.cid) {
            tracing::error!(cid = cid.cid, engine = self.engine.0, "cid is not from this pool");
            return;
        }
        cid.armed = false;
    }

    /// Returns the number of pooled cids currently handed out.
    pub fn cids_in_use(&self) -> usize {
        self.pool.lock().in_use()
    }

    /// Returns the size of the cid pool.
    pub fn cid_capacity(&self) -> usize {
        self.pool.lock().range.count as usize
    }
}

fn translate_u8(range: &ResourceRange, rel: u8, kind: ResourceKind) -> Result<u8, L2Error> {
    range
        .translate(rel.into())
        .and_then(|abs| u8::try_from(abs).ok())
        .ok_or(L2Error::InvalidResource {
            kind,
            id: rel.into(),
        })
}
