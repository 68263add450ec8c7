// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! RX and TX queue commands and handles.

use crate::resources::QueueCid;
use l2_defs::eth::RxQueueStartRamrodData;
use l2_defs::eth::RxQueueStopRamrodData;
use l2_defs::eth::RxQueueUpdateRamrodData;
use l2_defs::eth::TxQueueStartRamrodData;
use l2_defs::regs::db_addr;
use l2_defs::regs::mstorm_eth_pf_prods_offset;
use l2_defs::regs::DQ_DEMS_LEGACY;
use l2_defs::regs::GTT_BAR0_MAP_REG_MSDM_RAM;
use l2_defs::RegPair;
use zerocopy::FromZeros;

/// Ring addresses for a new RX queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxQueueStartParams {
    /// Size of each receive buffer.
    pub bd_max_bytes: u16,
    /// Base of the buffer descriptor ring.
    pub bd_chain_phys_addr: u64,
    /// Base of the completion ring's page table.
    pub cqe_pbl_addr: u64,
    /// Number of pages in the completion ring.
    pub cqe_pbl_size: u16,
}

/// Ring addresses for a new TX queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxQueueStartParams {
    /// Base of the transmit ring's page table.
    pub pbl_addr: u64,
    /// Number of pages in the transmit ring.
    pub pbl_size: u16,
    /// Physical queue the transmit queue is scheduled on.
    pub qm_pq_id: u16,
}

/// Where the driver writes an RX queue's producers, as a BAR0 offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerAddress(pub u32);

/// Where the driver rings a TX queue's doorbell, as an offset into the
/// doorbell BAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorbellAddress(pub u32);

/// A started RX queue.
#[derive(Debug)]
pub struct RxQueueHandle {
    cid: QueueCid,
}

/// A started TX queue.
#[derive(Debug)]
pub struct TxQueueHandle {
    cid: QueueCid,
}

impl RxQueueHandle {
    pub(crate) fn new(cid: QueueCid) -> Self {
        Self { cid }
    }

    pub(crate) fn into_cid(self) -> QueueCid {
        self.cid
    }

    /// The queue's connection identity, for RSS tables.
    pub fn cid(&self) -> &QueueCid {
        &self.cid
    }
}

impl TxQueueHandle {
    pub(crate) fn new(cid: QueueCid) -> Self {
        Self { cid }
    }

    pub(crate) fn into_cid(self) -> QueueCid {
        self.cid
    }

    /// The queue's connection identity.
    pub fn cid(&self) -> &QueueCid {
        &self.cid
    }
}

/// Returns the producer block of a PF RX queue.
pub fn rx_producer_address(cid: &QueueCid) -> ProducerAddress {
    ProducerAddress(GTT_BAR0_MAP_REG_MSDM_RAM + mstorm_eth_pf_prods_offset(cid.abs().queue_id))
}

/// Returns the doorbell of a PF TX queue.
pub fn tx_doorbell_address(cid: &QueueCid) -> DoorbellAddress {
    DoorbellAddress(db_addr(cid.cid(), DQ_DEMS_LEGACY))
}

/// Builds the RX queue start ramrod. Completion is requested on the event
/// queue only.
pub fn build_rx_queue_start(cid: &QueueCid, params: &RxQueueStartParams) -> RxQueueStartRamrodData {
    let abs = cid.abs();
    let mut data = RxQueueStartRamrodData::new_zeroed();
    data.sb_id = abs.sb;
    data.sb_index = abs.sb_idx;
    data.vport_id = abs.vport_id;
    data.stats_counter_id = abs.stats_id;
    data.rx_queue_id = abs.queue_id;
    data.complete_cqe_flg = 0;
    data.complete_event_flg = 1;
    data.bd_max_bytes = params.bd_max_bytes;
    data.bd_base = RegPair::new(params.bd_chain_phys_addr);
    data.num_of_pbl_pages = params.cqe_pbl_size;
    data.cqe_pbl_addr = RegPair::new(params.cqe_pbl_addr);

    if cid.is_vf() {
        tracing::debug!(
            vf_qid = cid.vf_qid(),
            legacy = cid.legacy_vf(),
            "rx queue is meant for a vf"
        );
        data.vf_rx_prod_index = cid.vf_qid();
        data.vf_rx_prod_use_zone_a = cid.legacy_vf().into();
    }
    data
}

/// Builds an RX queue update ramrod.
pub fn build_rx_queue_update(
    cid: &QueueCid,
    complete_cqe: bool,
    complete_event: bool,
) -> RxQueueUpdateRamrodData {
    let mut data = RxQueueUpdateRamrodData::new_zeroed();
    data.vport_id = cid.abs().vport_id;
    data.rx_queue_id = cid.abs().queue_id;
    data.complete_cqe_flg = complete_cqe.into();
    data.complete_event_flg = complete_event.into();
    data
}

/// Builds the RX queue stop ramrod.
///
/// Flushing the queue needs the completion on its own ring, unless only an
/// event queue completion was asked for. A queue owned by a VF always
/// completes on the event queue so the PF sees it.
pub fn build_rx_queue_stop(
    cid: &QueueCid,
    eq_completion_only: bool,
    cqe_completion: bool,
) -> RxQueueStopRamrodData {
    let mut data = RxQueueStopRamrodData::new_zeroed();
    data.vport_id = cid.abs().vport_id;
    data.rx_queue_id = cid.abs().queue_id;
    data.complete_cqe_flg = ((!cid.is_vf() && !eq_completion_only) || cqe_completion).into();
    data.complete_event_flg = (cid.is_vf() || eq_completion_only).into();
    data
}

/// Builds the TX queue start ramrod.
pub fn build_tx_queue_start(cid: &QueueCid, params: &TxQueueStartParams) -> TxQueueStartRamrodData {
    let abs = cid.abs();
    let mut data = TxQueueStartRamrodData::new_zeroed();
    data.vport_id = abs.vport_id;
    data.sb_id = abs.sb;
    data.sb_index = abs.sb_idx;
    data.stats_counter_id = abs.stats_id;
    data.queue_zone_id = abs.queue_id;
    data.same_as_last_id = abs.queue_id;
    data.pbl_size = params.pbl_size;
    data.pbl_base_addr = RegPair::new(params.pbl_addr);
    data.qm_pq_id = params.qm_pq_id;
    data
}
