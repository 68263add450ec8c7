// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Drives [`L2Device`] against an emulated firmware to test the end-to-end
//! flow.

use crate::config::CidRange;
use crate::config::DeviceConfig;
use crate::config::EngineConfig;
use crate::config::FunctionKind;
use crate::config::ResourceRange;
use crate::config::StatsRegion;
use crate::config::VfStatsInfo;
use crate::device::FunctionBackend;
use crate::device::StartVportParams;
use crate::device::UpdateVportParams;
use crate::execution::TunnelParams;
use crate::execution::VfChannel;
use crate::filter::FilterConfig;
use crate::filter::FilterOpcode;
use crate::filter::McastBins;
use crate::filter::McastFilter;
use crate::filter::RxModeType;
use crate::filter::UcastFilter;
use crate::filter::XcastType;
use crate::io::RegisterIo;
use crate::queue::DoorbellAddress;
use crate::queue::ProducerAddress;
use crate::queue::RxQueueHandle;
use crate::queue::RxQueueStartParams;
use crate::queue::TxQueueStartParams;
use crate::resources::EngineId;
use crate::resources::QueueParams;
use crate::rss::RssCaps;
use crate::rss::RssInput;
use crate::spq::CompletionEvent;
use crate::spq::CompletionMode;
use crate::spq::SlowPathChannel;
use crate::spq::SpqCompleter;
use crate::vport::VportStartParams;
use crate::vport::VportUpdateParams;
use crate::L2Device;
use crate::L2Error;
use crate::RamrodKind;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::executor::block_on;
use l2_defs::eth::EthFilterAction;
use l2_defs::eth::EthFilterType;
use l2_defs::eth::EthRamrodCmdId;
use l2_defs::eth::PfUpdateTunnelConfig;
use l2_defs::eth::RxQueueStartRamrodData;
use l2_defs::eth::RxQueueStopRamrodData;
use l2_defs::eth::TxQueueStartRamrodData;
use l2_defs::eth::VportFilterUpdateRamrodData;
use l2_defs::eth::VportStartRamrodData;
use l2_defs::eth::VportUpdateRamrodData;
use l2_defs::regs::db_addr;
use l2_defs::regs::DQ_DEMS_LEGACY;
use l2_defs::regs::PUBLIC_PORT_STATS_OFFSET;
use l2_defs::stats::PortStats;
use l2_defs::stats::UstormPerQueueStat;
use l2_defs::EthSlowPathRxCqe;
use l2_defs::MacAddress;
use l2_defs::ProtocolId;
use l2_defs::RamrodHeader;
use l2_defs::RegPair;
use l2_defs::ETH_RSS_IND_TABLE_ENTRIES_NUM;
use l2_defs::MAX_MC_ADDRS;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

const PORT_MAC: MacAddress = MacAddress::new([0x00, 0x0e, 0x1e, 0x00, 0x00, 0x01]);
const MCP_PORT_ADDR: u32 = 0x8_0000;

/// Firmware that completes every ramrod as soon as it is posted, unless
/// told to hold completions or to fail a command.
#[derive(Default)]
struct Firmware {
    completer: Mutex<Option<SpqCompleter>>,
    posted: Mutex<Vec<(RamrodHeader, Vec<u8>)>>,
    hold: Mutex<bool>,
    fail: Mutex<HashMap<(u8, u8), u8>>,
    reject: Mutex<Option<u8>>,
}

impl Firmware {
    fn fail_eth(&self, cmd: EthRamrodCmdId, status: u8) {
        self.fail.lock().insert((ProtocolId::ETH.0, cmd.0), status);
    }

    fn clear_failures(&self) {
        self.fail.lock().clear();
    }

    fn posted_eth(&self, cmd: EthRamrodCmdId) -> Vec<(RamrodHeader, Vec<u8>)> {
        self.posted
            .lock()
            .iter()
            .filter(|(h, _)| h.protocol_id == ProtocolId::ETH && h.cmd_id == cmd.0)
            .cloned()
            .collect()
    }

    fn last_eth<T: FromBytes>(&self, cmd: EthRamrodCmdId) -> (RamrodHeader, T) {
        let (header, payload) = self.posted_eth(cmd).pop().unwrap();
        (header, T::read_from_bytes(&payload).unwrap())
    }

    fn echoes(&self) -> Vec<u16> {
        self.posted.lock().iter().map(|(h, _)| h.echo).collect()
    }

    fn completer(&self) -> SpqCompleter {
        self.completer.lock().clone().unwrap()
    }
}

impl SlowPathChannel for Firmware {
    fn post(&self, header: &RamrodHeader, payload: &[u8]) -> anyhow::Result<()> {
        if *self.reject.lock() == Some(header.cmd_id) {
            anyhow::bail!("ring is full");
        }
        self.posted.lock().push((*header, payload.to_vec()));
        if *self.hold.lock() {
            return Ok(());
        }
        let status = self
            .fail
            .lock()
            .get(&(header.protocol_id.0, header.cmd_id))
            .copied()
            .unwrap_or(0);
        let completer = self.completer.lock().clone();
        if let Some(completer) = completer {
            completer.complete(header.echo, status);
        }
        Ok(())
    }
}

/// Sparse device memory. Unwritten bytes read as zero.
#[derive(Default)]
struct Memory {
    bytes: Mutex<BTreeMap<u32, u8>>,
}

impl Memory {
    fn store<T: IntoBytes + zerocopy::Immutable>(&self, addr: u32, value: &T) {
        self.write(addr, value.as_bytes()).unwrap();
    }

    fn written(&self, addr: u32) -> bool {
        self.bytes.lock().contains_key(&addr)
    }
}

impl RegisterIo for Memory {
    fn read(&self, addr: u32, data: &mut [u8]) -> anyhow::Result<()> {
        let bytes = self.bytes.lock();
        for (i, b) in data.iter_mut().enumerate() {
            *b = bytes.get(&(addr + i as u32)).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write(&self, addr: u32, data: &[u8]) -> anyhow::Result<()> {
        let mut bytes = self.bytes.lock();
        for (i, &b) in data.iter().enumerate() {
            bytes.insert(addr + i as u32, b);
        }
        Ok(())
    }
}

fn engine_config(index: usize) -> EngineConfig {
    EngineConfig {
        opaque_fid: 0x10 + index as u16,
        sw_fid: index as u8,
        spq_cid: 0x40,
        cids: CidRange { base: 0, count: 16 },
        vports: ResourceRange { base: 8, count: 4 },
        l2_queues: ResourceRange { base: 16, count: 8 },
        rss_engines: ResourceRange { base: 1, count: 1 },
        port: 0,
        mcp_port_addr: Some(MCP_PORT_ADDR),
        vf_stats: None,
        spq_depth: 64,
        mac_filters: 8,
        vlan_filters: 16,
        vf_num_rxqs: 0,
    }
}

struct PfDevice {
    device: L2Device,
    firmware: Vec<Arc<Firmware>>,
    memory: Arc<Memory>,
    events: mpsc::UnboundedReceiver<CompletionEvent>,
}

fn pf_device(engines: usize) -> PfDevice {
    crate::init_test_tracing();
    let firmware: Vec<_> = (0..engines).map(|_| Arc::new(Firmware::default())).collect();
    let memory = Arc::new(Memory::default());
    let (send, events) = mpsc::unbounded();
    let config = DeviceConfig {
        function: FunctionKind::Pf,
        engines: (0..engines).map(engine_config).collect(),
        max_mc_addrs: MAX_MC_ADDRS,
        rss_table_max_size: ETH_RSS_IND_TABLE_ENTRIES_NUM,
        port_mac: PORT_MAC,
        legacy_vf: false,
    };
    let device = L2Device::new(
        config,
        FunctionBackend::Pf {
            channels: firmware
                .iter()
                .map(|f| f.clone() as Arc<dyn SlowPathChannel>)
                .collect(),
            events: Some(send),
        },
        memory.clone(),
    )
    .unwrap();
    for (firmware, hwfn) in firmware.iter().zip(device.engines()) {
        *firmware.completer.lock() = hwfn.completer();
    }
    PfDevice {
        device,
        firmware,
        memory,
        events,
    }
}

fn queue(vport_id: u8, queue_id: u16) -> QueueParams {
    QueueParams {
        vport_id,
        queue_id,
        stats_id: 0,
        sb: 3,
        sb_idx: 1,
    }
}

fn rx_params() -> RxQueueStartParams {
    RxQueueStartParams {
        bd_max_bytes: 2048,
        bd_chain_phys_addr: 0x10_0000,
        cqe_pbl_addr: 0x20_0000,
        cqe_pbl_size: 2,
    }
}

fn start_rx(pf: &PfDevice, rss_num: u8) -> RxQueueHandle {
    let (_, handle) =
        block_on(pf.device.queue_rx_start(rss_num, queue(1, rss_num.into()), &rx_params()))
            .unwrap();
    handle
}

fn stop_rx(pf: &PfDevice, handles: Vec<RxQueueHandle>) {
    for handle in handles {
        block_on(pf.device.queue_rx_stop(handle)).unwrap();
    }
}

fn cids_in_use(pf: &PfDevice) -> usize {
    pf.device
        .engines()
        .iter()
        .map(|hwfn| hwfn.resources().cids_in_use())
        .sum()
}

#[test]
fn vport_start_with_gro() {
    let pf = pf_device(1);
    block_on(pf.device.vport_start(&StartVportParams {
        vport_id: 1,
        mtu: 1500,
        gro_enable: true,
        drop_ttl0: true,
        ..Default::default()
    }))
    .unwrap();

    let (header, data) =
        pf.firmware[0].last_eth::<VportStartRamrodData>(EthRamrodCmdId::VPORT_START);
    assert_eq!(header.cid, 0x40);
    assert_eq!(header.opaque_fid, 0x10);
    assert_eq!(data.vport_id, 9);
    assert_eq!(data.mtu, 1500);
    assert_eq!(data.untagged, 1);
    assert_eq!(data.drop_ttl0_en, 1);
    assert!(data.rx_mode.ucast_drop_all());
    assert!(data.rx_mode.mcast_drop_all());
    assert_eq!(data.tpa_param.max_buff_num, 16);
    assert_eq!(data.tpa_param.tpa_max_aggs_num, 64);
    assert_eq!(data.tpa_param.tpa_max_size, 0xffff);
    assert_eq!(data.tpa_param.tpa_min_size_to_start, 750);
    assert_eq!(data.tpa_param.tpa_min_size_to_cont, 750);

    block_on(pf.device.vport_stop(1)).unwrap();
    assert_eq!(pf.firmware[0].posted_eth(EthRamrodCmdId::VPORT_STOP).len(), 1);
}

#[test]
fn vport_start_out_of_range() {
    let pf = pf_device(1);
    let err = block_on(pf.device.vport_start(&StartVportParams {
        vport_id: 4,
        mtu: 1500,
        ..Default::default()
    }))
    .unwrap_err();
    assert!(matches!(err, L2Error::InvalidResource { id: 4, .. }));
    assert!(pf.firmware[0].posted.lock().is_empty());
}

#[test]
fn rx_queue_start_and_stop() {
    let pf = pf_device(1);
    let (producers, handle) =
        block_on(pf.device.queue_rx_start(0, queue(1, 2), &rx_params())).unwrap();
    assert_eq!(cids_in_use(&pf), 1);
    assert!(pf.memory.written(producers.0));

    let (header, data) =
        pf.firmware[0].last_eth::<RxQueueStartRamrodData>(EthRamrodCmdId::RX_QUEUE_START);
    assert_eq!(header.cid, handle.cid().cid());
    assert_eq!(data.rx_queue_id, 18);
    assert_eq!(data.vport_id, 9);
    // The device counts each queue on its vport.
    assert_eq!(data.stats_counter_id, 9);
    assert_eq!(data.complete_event_flg, 1);
    assert_eq!(data.bd_max_bytes, 2048);

    block_on(pf.device.queue_rx_stop(handle)).unwrap();
    assert_eq!(cids_in_use(&pf), 0);
    let (_, data) =
        pf.firmware[0].last_eth::<RxQueueStopRamrodData>(EthRamrodCmdId::RX_QUEUE_STOP);
    assert_eq!((data.complete_cqe_flg, data.complete_event_flg), (1, 0));
    assert_eq!(data.rx_queue_id, 18);
}

#[test]
fn failed_rx_stop_keeps_queue() {
    let pf = pf_device(1);
    let handle = start_rx(&pf, 0);
    pf.firmware[0].fail_eth(EthRamrodCmdId::RX_QUEUE_STOP, 3);

    let err = block_on(pf.device.queue_rx_stop(handle)).unwrap_err();
    assert!(matches!(
        err.error,
        L2Error::CompletionFailed {
            cmd: RamrodKind::RxQueueStop,
            status: 3
        }
    ));
    assert_eq!(cids_in_use(&pf), 1);

    pf.firmware[0].clear_failures();
    block_on(pf.device.queue_rx_stop(err.handle)).unwrap();
    assert_eq!(cids_in_use(&pf), 0);
}

#[test]
fn failed_rx_start_releases_cid() {
    let pf = pf_device(1);
    *pf.firmware[0].reject.lock() = Some(EthRamrodCmdId::RX_QUEUE_START.0);
    let err = block_on(pf.device.queue_rx_start(0, queue(1, 0), &rx_params())).unwrap_err();
    assert!(matches!(
        err,
        L2Error::SubmissionRejected {
            cmd: RamrodKind::RxQueueStart,
            ..
        }
    ));
    assert_eq!(cids_in_use(&pf), 0);

    *pf.firmware[0].reject.lock() = None;
    pf.firmware[0].fail_eth(EthRamrodCmdId::RX_QUEUE_START, 1);
    let err = block_on(pf.device.queue_rx_start(0, queue(1, 0), &rx_params())).unwrap_err();
    assert!(matches!(err, L2Error::CompletionFailed { .. }));
    assert_eq!(cids_in_use(&pf), 0);

    // Out of range queue zones never reach firmware.
    pf.firmware[0].clear_failures();
    let posted = pf.firmware[0].posted.lock().len();
    let err = block_on(pf.device.queue_rx_start(0, queue(1, 8), &rx_params())).unwrap_err();
    assert!(matches!(err, L2Error::InvalidResource { id: 8, .. }));
    assert_eq!(pf.firmware[0].posted.lock().len(), posted);
    assert_eq!(cids_in_use(&pf), 0);
}

#[test]
fn cid_pool_exhaustion() {
    let pf = pf_device(1);
    let handles: Vec<_> = (0..16).map(|_| start_rx(&pf, 0)).collect();
    let err = block_on(pf.device.queue_rx_start(0, queue(1, 0), &rx_params())).unwrap_err();
    assert!(matches!(err, L2Error::ResourceExhausted));
    stop_rx(&pf, handles);
    assert_eq!(cids_in_use(&pf), 0);
}

#[test]
fn tx_queue_start_and_stop() {
    let pf = pf_device(1);
    let (doorbell, handle) = block_on(pf.device.queue_tx_start(
        0,
        queue(2, 5),
        &TxQueueStartParams {
            pbl_addr: 0x30_0000,
            pbl_size: 1,
            qm_pq_id: 4,
        },
    ))
    .unwrap();
    assert_eq!(doorbell, DoorbellAddress(db_addr(handle.cid().cid(), DQ_DEMS_LEGACY)));
    let (_, data) =
        pf.firmware[0].last_eth::<TxQueueStartRamrodData>(EthRamrodCmdId::TX_QUEUE_START);
    assert_eq!(data.queue_zone_id, 21);
    assert_eq!(data.vport_id, 10);
    assert_eq!(data.qm_pq_id, 4);

    let cid = handle.cid().cid();
    block_on(pf.device.queue_tx_stop(handle)).unwrap();
    let (header, payload) = pf.firmware[0]
        .posted_eth(EthRamrodCmdId::TX_QUEUE_STOP)
        .pop()
        .unwrap();
    assert_eq!(header.cid, cid);
    assert!(payload.is_empty());
    assert_eq!(cids_in_use(&pf), 0);
}

#[test]
fn batch_update_with_callback() {
    let pf = pf_device(1);
    let a = start_rx(&pf, 0);
    let b = start_rx(&pf, 0);
    *pf.firmware[0].hold.lock() = true;

    let done = Arc::new(Mutex::new(Vec::new()));
    let mode = {
        let done = done.clone();
        CompletionMode::Callback(Some(Box::new(move |status| done.lock().push(status))))
    };
    block_on(pf.device.rx_queues_update(&[&a, &b], true, false, mode)).unwrap();
    assert_eq!(
        pf.firmware[0]
            .posted_eth(EthRamrodCmdId::RX_QUEUE_UPDATE)
            .len(),
        2
    );

    let echoes = pf.firmware[0].echoes();
    let completer = pf.firmware[0].completer();
    assert!(completer.complete(echoes[echoes.len() - 2], 0));
    assert!(done.lock().is_empty());
    assert!(completer.complete(echoes[echoes.len() - 1], 0));
    assert_eq!(*done.lock(), [0]);

    *pf.firmware[0].hold.lock() = false;
    stop_rx(&pf, vec![a, b]);
}

#[test]
fn batch_update_event_only() {
    let mut pf = pf_device(1);
    let a = start_rx(&pf, 0);
    block_on(pf.device.rx_queues_update(&[&a], false, true, CompletionMode::EventOnly)).unwrap();
    let event = pf.events.try_next().unwrap().unwrap();
    assert_eq!(event.cmd, RamrodKind::RxQueueUpdate);
    assert_eq!(event.cid, a.cid().cid());
    assert_eq!(event.status, 0);
    stop_rx(&pf, vec![a]);
}

#[test]
fn cqe_completion_routes_to_engine() {
    let pf = pf_device(2);
    let a = start_rx(&pf, 1);
    assert_eq!(a.cid().owner(), EngineId(1));
    *pf.firmware[1].hold.lock() = true;

    let done = Arc::new(Mutex::new(None));
    let mode = {
        let done = done.clone();
        CompletionMode::Callback(Some(Box::new(move |status| *done.lock() = Some(status))))
    };
    block_on(pf.device.rx_queues_update(&[&a], true, false, mode)).unwrap();

    let mut cqe = EthSlowPathRxCqe::new_zeroed();
    cqe.ramrod_cmd_id = EthRamrodCmdId::RX_QUEUE_UPDATE.0;
    cqe.echo = *pf.firmware[1].echoes().last().unwrap();
    // Engine 0 never saw this ramrod.
    assert!(!pf.device.eth_cqe_completion(0, &cqe));
    assert!(pf.device.eth_cqe_completion(1, &cqe));
    assert_eq!(*done.lock(), Some(0));

    *pf.firmware[1].hold.lock() = false;
    stop_rx(&pf, vec![a]);
}

#[test]
fn queues_spread_across_engines() {
    let pf = pf_device(2);
    let (_, handle) = block_on(pf.device.queue_rx_start(3, queue(1, 6), &rx_params())).unwrap();
    assert_eq!(handle.cid().owner(), EngineId(1));
    assert_eq!(handle.cid().rel().queue_id, 3);
    assert_eq!(handle.cid().abs().queue_id, 19);
    assert_eq!(handle.cid().opaque_fid(), 0x11);
    assert!(pf.firmware[0].posted.lock().is_empty());
    assert_eq!(
        pf.firmware[1]
            .posted_eth(EthRamrodCmdId::RX_QUEUE_START)
            .len(),
        1
    );
    stop_rx(&pf, vec![handle]);
}

fn rss_input<'a>(handles: &'a [RxQueueHandle]) -> RssInput<'a> {
    let mut ind_table = [None; ETH_RSS_IND_TABLE_ENTRIES_NUM];
    for (slot, entry) in ind_table.iter_mut().enumerate() {
        *entry = Some(handles[slot % handles.len()].cid());
    }
    RssInput {
        rss_caps: RssCaps {
            ipv4: true,
            ipv4_tcp: true,
            ..Default::default()
        },
        rss_key: [0x6d5a_6d5a; 10],
        ind_table,
    }
}

#[test]
fn rss_split_across_engines() {
    let pf = pf_device(2);
    let handles: Vec<_> = (0..4).map(|i| start_rx(&pf, i)).collect();
    block_on(pf.device.vport_update(&UpdateVportParams {
        vport_id: 1,
        update_vport_active: Some(true),
        rss: Some(rss_input(&handles)),
        ..Default::default()
    }))
    .unwrap();

    for firmware in &pf.firmware {
        let (_, data) = firmware.last_eth::<VportUpdateRamrodData>(EthRamrodCmdId::VPORT_UPDATE);
        assert_eq!(data.common.update_rss_flg, 1);
        assert_eq!(data.common.rx_active_flg, 1);
        assert_eq!(data.common.tx_active_flg, 1);
        assert_eq!(data.rss_config.tbl_size, 6);
        assert_eq!(data.rss_config.rss_id, 1);
        assert!(data.rss_config.capabilities.ipv4_tcp());
        assert!(!data.rss_config.capabilities.ipv6());
        assert_eq!(data.rss_config.indirection_table[..4], [16, 17, 16, 17]);
        assert_eq!(data.rss_config.rss_key, [0x6d5a_6d5a; 10]);
    }
    stop_rx(&pf, handles);
}

#[test]
fn degenerate_rss_is_dropped() {
    let pf = pf_device(2);
    let handles: Vec<_> = (0..2).map(|i| start_rx(&pf, i)).collect();
    block_on(pf.device.vport_update(&UpdateVportParams {
        vport_id: 1,
        update_vport_active: Some(true),
        rss: Some(rss_input(&handles)),
        ..Default::default()
    }))
    .unwrap();

    for firmware in &pf.firmware {
        let (_, data) = firmware.last_eth::<VportUpdateRamrodData>(EthRamrodCmdId::VPORT_UPDATE);
        assert_eq!(data.common.update_rss_flg, 0);
        assert_eq!(data.common.update_rx_active_flg, 1);
    }
    stop_rx(&pf, handles);
}

#[test]
fn incomplete_rss_table_posts_nothing() {
    let pf = pf_device(1);
    let handles = vec![start_rx(&pf, 0)];
    let mut input = rss_input(&handles);
    input.ind_table[77] = None;
    let posted = pf.firmware[0].posted.lock().len();
    let err = block_on(pf.device.vport_update(&UpdateVportParams {
        vport_id: 1,
        rss: Some(input),
        ..Default::default()
    }))
    .unwrap_err();
    assert!(matches!(err, L2Error::IncompleteTable { slot: 77 }));
    assert_eq!(pf.firmware[0].posted.lock().len(), posted);
    stop_rx(&pf, handles);
}

#[test]
fn unicast_filter_config() {
    let pf = pf_device(2);
    let mac = MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    block_on(pf.device.filter_config(&FilterConfig::Ucast {
        kind: XcastType::Add,
        mac: Some(mac),
        vlan: None,
    }))
    .unwrap();

    for firmware in &pf.firmware {
        let (_, data) =
            firmware.last_eth::<VportFilterUpdateRamrodData>(EthRamrodCmdId::FILTERS_UPDATE);
        assert_eq!(data.filter_cmd_hdr.cmd_cnt, 1);
        assert_eq!((data.filter_cmd_hdr.rx, data.filter_cmd_hdr.tx), (1, 1));
        let cmd = data.filter_cmds[0];
        assert_eq!(cmd.filter_type, EthFilterType::MAC);
        assert_eq!(cmd.action, EthFilterAction::ADD);
        assert_eq!(cmd.vport_id, 8);
        assert_eq!(
            [cmd.mac_msb, cmd.mac_mid, cmd.mac_lsb],
            [0x0011, 0x2233, 0x4455]
        );
    }

    let err = block_on(pf.device.filter_config(&FilterConfig::Ucast {
        kind: XcastType::Add,
        mac: None,
        vlan: None,
    }))
    .unwrap_err();
    assert!(matches!(err, L2Error::InvalidArgument(_)));
}

#[test]
fn multicast_filter_config() {
    let pf = pf_device(1);
    let group: MacAddress = "01:00:5e:00:00:01".parse().unwrap();
    block_on(pf.device.filter_config(&FilterConfig::Mcast {
        kind: XcastType::Add,
        macs: vec![group],
    }))
    .unwrap();
    let (_, data) =
        pf.firmware[0].last_eth::<VportUpdateRamrodData>(EthRamrodCmdId::VPORT_UPDATE);
    assert_eq!(data.common.update_approx_mcast_flg, 1);
    assert_eq!(data.common.vport_id, 8);
    assert_eq!(McastBins(data.approx_mcast.bins).iter().collect::<Vec<_>>(), [212]);
    let hwfn = pf.device.engine(EngineId::LEADING).unwrap();
    assert_eq!(hwfn.mcast_addresses(0), [group]);

    block_on(pf.device.filter_config(&FilterConfig::Mcast {
        kind: XcastType::Del,
        macs: vec![group],
    }))
    .unwrap();
    let (_, data) =
        pf.firmware[0].last_eth::<VportUpdateRamrodData>(EthRamrodCmdId::VPORT_UPDATE);
    assert_eq!(data.common.update_approx_mcast_flg, 1);
    assert_eq!(data.approx_mcast.bins, [0; 8]);
    assert!(hwfn.mcast_addresses(0).is_empty());

    let err = block_on(pf.device.filter_config(&FilterConfig::Mcast {
        kind: XcastType::Replace,
        macs: vec![group],
    }))
    .unwrap_err();
    assert!(matches!(err, L2Error::UnsupportedOperation(_)));

    let err = block_on(pf.device.filter_config(&FilterConfig::Mcast {
        kind: XcastType::Add,
        macs: vec![group; MAX_MC_ADDRS + 1],
    }))
    .unwrap_err();
    assert!(matches!(err, L2Error::TooManyAddresses { count: 65, max: 64 }));
}

#[test]
fn rejected_multicast_update_keeps_table() {
    let pf = pf_device(1);
    let group: MacAddress = "01:00:5e:00:00:01".parse().unwrap();
    *pf.firmware[0].reject.lock() = Some(EthRamrodCmdId::VPORT_UPDATE.0);
    let err = block_on(pf.device.filter_config(&FilterConfig::Mcast {
        kind: XcastType::Add,
        macs: vec![group],
    }))
    .unwrap_err();
    assert!(matches!(err, L2Error::SubmissionRejected { .. }));
    let hwfn = pf.device.engine(EngineId::LEADING).unwrap();
    assert!(hwfn.mcast_addresses(0).is_empty());
}

#[test]
fn concurrent_multicast_removes() {
    let pf = pf_device(1);
    let hwfn = pf.device.engine(EngineId::LEADING).unwrap();
    let a: MacAddress = "01:00:5e:00:00:01".parse().unwrap();
    let b: MacAddress = "33:33:00:00:00:01".parse().unwrap();
    let c: MacAddress = "01:00:5e:00:00:fb".parse().unwrap();
    let filter = |opcode, macs| McastFilter {
        opcode,
        vport_id: 0,
        macs,
    };
    block_on(hwfn.filter_mcast(
        &filter(FilterOpcode::Add, vec![a, b, c]),
        CompletionMode::Blocking,
    ))
    .unwrap();

    *pf.firmware[0].hold.lock() = true;
    let remove_a = filter(FilterOpcode::Remove, vec![a]);
    let remove_b = filter(FilterOpcode::Remove, vec![b]);
    let completer = pf.firmware[0].completer();
    let updates = || pf.firmware[0].posted_eth(EthRamrodCmdId::VPORT_UPDATE);
    block_on(async {
        let first = hwfn.filter_mcast(&remove_a, CompletionMode::Blocking);
        let second = hwfn.filter_mcast(&remove_b, CompletionMode::Blocking);
        futures::pin_mut!(first, second);
        assert!(futures::poll!(&mut first).is_pending());
        assert!(futures::poll!(&mut second).is_pending());
        // The second removal waits for the first to finish.
        assert_eq!(updates().len(), 2);

        assert!(completer.complete(updates()[1].0.echo, 0));
        first.await.unwrap();
        assert!(futures::poll!(&mut second).is_pending());
        assert_eq!(updates().len(), 3);
        assert!(completer.complete(updates()[2].0.echo, 0));
        second.await.unwrap();
    });
    *pf.firmware[0].hold.lock() = false;

    assert_eq!(hwfn.mcast_addresses(0), [c]);
    let (_, data) =
        pf.firmware[0].last_eth::<VportUpdateRamrodData>(EthRamrodCmdId::VPORT_UPDATE);
    assert_eq!(McastBins(data.approx_mcast.bins), McastBins::from_macs(&[c]));
}

#[test]
fn promiscuous_rx_mode() {
    let pf = pf_device(1);
    block_on(
        pf.device
            .filter_config(&FilterConfig::RxMode(RxModeType::Promisc)),
    )
    .unwrap();
    let (_, data) =
        pf.firmware[0].last_eth::<VportUpdateRamrodData>(EthRamrodCmdId::VPORT_UPDATE);
    assert_eq!(data.common.update_rx_mode_flg, 1);
    assert_eq!(data.common.update_tx_mode_flg, 1);
    assert!(!data.rx_mode.ucast_drop_all());
    assert!(data.rx_mode.ucast_accept_unmatched());
    assert!(data.rx_mode.mcast_accept_all());
    assert!(data.rx_mode.bcast_accept_all());
    assert!(!data.tx_mode.ucast_drop_all());
    assert!(data.tx_mode.mcast_accept_all());
    assert!(data.tx_mode.bcast_accept_all());
}

fn ustats_address(pf: &PfDevice) -> u32 {
    pf.device.engines()[0].stats_regions().unwrap().ustats.address
}

fn store_rx_ucast(pf: &PfDevice, pkts: u64) {
    let stats = UstormPerQueueStat {
        rcv_ucast_pkts: RegPair::new(pkts),
        ..Default::default()
    };
    pf.memory.store(ustats_address(pf), &stats);
}

fn store_port_rx_ucast(pf: &PfDevice, pkts: u64) {
    let mut stats = PortStats::default();
    stats.eth.rxuca = pkts;
    pf.memory
        .store(MCP_PORT_ADDR + PUBLIC_PORT_STATS_OFFSET, &stats);
}

#[test]
fn stats_reset_takes_baseline() {
    let pf = pf_device(1);
    store_rx_ucast(&pf, 100);
    store_port_rx_ucast(&pf, 40);
    let stats = pf.device.get_vport_stats().unwrap();
    assert_eq!(stats.rx_ucast_pkts, 100);
    assert_eq!(stats.rx_mac_uc_packets, 40);

    pf.device.reset_vport_stats().unwrap();
    let stats = pf.device.get_vport_stats().unwrap();
    assert_eq!(stats.rx_ucast_pkts, 0);
    assert_eq!(stats.rx_mac_uc_packets, 0);

    store_rx_ucast(&pf, 30);
    store_port_rx_ucast(&pf, 45);
    let stats = pf.device.get_vport_stats().unwrap();
    assert_eq!(stats.rx_ucast_pkts, 30);
    assert_eq!(stats.rx_mac_uc_packets, 5);
}

#[test]
fn vport_start_clears_stats() {
    let pf = pf_device(1);
    store_rx_ucast(&pf, 7);
    block_on(pf.device.vport_start(&StartVportParams {
        vport_id: 0,
        mtu: 9000,
        clear_stats: true,
        ..Default::default()
    }))
    .unwrap();
    assert_eq!(pf.device.get_vport_stats().unwrap().rx_ucast_pkts, 0);
}

#[test]
fn stats_sum_engines() {
    let pf = pf_device(2);
    for hwfn in pf.device.engines() {
        let stats = UstormPerQueueStat {
            rcv_bcast_bytes: RegPair::new(1000),
            ..Default::default()
        };
        pf.memory
            .store(hwfn.stats_regions().unwrap().ustats.address, &stats);
    }
    // Both engines count on the same base vport here, so the region is
    // shared and read twice.
    assert_eq!(pf.device.get_vport_stats().unwrap().rx_bcast_bytes, 2000);
}

#[test]
fn tunnel_config_on_pf() {
    let pf = pf_device(1);
    block_on(pf.device.tunnel_config(&TunnelParams {
        vxlan_port: Some(4789),
        geneve_port: None,
    }))
    .unwrap();
    let posted = pf.firmware[0].posted.lock();
    let (header, payload) = posted.last().unwrap();
    assert_eq!(header.protocol_id, ProtocolId::COMMON);
    let data = PfUpdateTunnelConfig::read_from_bytes(payload).unwrap();
    assert_eq!(data.update_vxlan_udp_port_flg, 1);
    assert_eq!(data.vxlan_udp_port, 4789);
    assert_eq!(data.update_geneve_udp_port_flg, 0);
}

#[test]
fn pf_info() {
    let pf = pf_device(2);
    let info = pf.device.eth_info();
    // 16 cids cover 5 queue triplets per engine.
    assert_eq!(info.num_queues, 10);
    assert_eq!(info.num_tc, 1);
    assert_eq!(info.num_mac_filters, 8);
    assert_eq!(info.num_vlan_filters, 16);
    assert_eq!(info.port_mac, PORT_MAC);
    assert!(!info.is_legacy);
    assert!(block_on(pf.device.check_mac(MacAddress::new([2, 0, 0, 0, 0, 1]))).unwrap());
}

#[test]
fn backend_must_match_config() {
    crate::init_test_tracing();
    let config = DeviceConfig {
        function: FunctionKind::Pf,
        engines: vec![engine_config(0), engine_config(1)],
        max_mc_addrs: MAX_MC_ADDRS,
        rss_table_max_size: ETH_RSS_IND_TABLE_ENTRIES_NUM,
        port_mac: PORT_MAC,
        legacy_vf: false,
    };
    let result = L2Device::new(
        config,
        FunctionBackend::Pf {
            channels: vec![Arc::new(Firmware::default()) as Arc<dyn SlowPathChannel>],
            events: None,
        },
        Arc::new(Memory::default()),
    );
    assert!(matches!(result, Err(L2Error::InvalidConfig(_))));
}

/// A PF on the far side of the VF channel. Records what it was asked.
#[derive(Default)]
struct FakePf {
    requests: Mutex<Vec<String>>,
    allowed_mac: Mutex<Option<MacAddress>>,
    down: Mutex<bool>,
}

impl FakePf {
    fn request(&self, request: String) -> anyhow::Result<()> {
        if *self.down.lock() {
            anyhow::bail!("pf is not responding");
        }
        self.requests.lock().push(request);
        Ok(())
    }
}

#[async_trait]
impl VfChannel for FakePf {
    async fn vport_start(&self, params: &VportStartParams) -> anyhow::Result<()> {
        self.request(format!("vport_start {} {}", params.vport_id, params.mtu))
    }

    async fn vport_update(&self, params: &VportUpdateParams<'_>) -> anyhow::Result<()> {
        self.request(format!(
            "vport_update {} rss={}",
            params.vport_id,
            params.rss.is_some()
        ))
    }

    async fn vport_stop(&self, vport_id: u8) -> anyhow::Result<()> {
        self.request(format!("vport_stop {vport_id}"))
    }

    async fn rxq_start(
        &self,
        queue: &QueueParams,
        _params: &RxQueueStartParams,
    ) -> anyhow::Result<ProducerAddress> {
        self.request(format!("rxq_start {}", queue.queue_id))?;
        Ok(ProducerAddress(0x1000 + u32::from(queue.queue_id) * 8))
    }

    async fn rxq_update(
        &self,
        queue: &QueueParams,
        complete_cqe: bool,
        _complete_event: bool,
    ) -> anyhow::Result<()> {
        self.request(format!("rxq_update {} {complete_cqe}", queue.queue_id))
    }

    async fn rxq_stop(&self, queue: &QueueParams, _cqe_completion: bool) -> anyhow::Result<()> {
        self.request(format!("rxq_stop {}", queue.queue_id))
    }

    async fn txq_start(
        &self,
        queue: &QueueParams,
        _params: &TxQueueStartParams,
    ) -> anyhow::Result<DoorbellAddress> {
        self.request(format!("txq_start {}", queue.queue_id))?;
        Ok(DoorbellAddress(0x80))
    }

    async fn txq_stop(&self, queue: &QueueParams) -> anyhow::Result<()> {
        self.request(format!("txq_stop {}", queue.queue_id))
    }

    async fn filter_ucast(&self, filter: &UcastFilter) -> anyhow::Result<()> {
        self.request(format!("filter_ucast {}", filter.mac))
    }

    async fn filter_mcast(&self, vport_id: u8, bins: &McastBins) -> anyhow::Result<()> {
        self.request(format!(
            "filter_mcast {vport_id} {:?}",
            bins.iter().collect::<Vec<_>>()
        ))
    }

    async fn check_mac(&self, mac: MacAddress) -> anyhow::Result<bool> {
        Ok(match *self.allowed_mac.lock() {
            Some(allowed) => allowed == mac,
            None => true,
        })
    }
}

fn vf_device(pf: Arc<FakePf>) -> L2Device {
    crate::init_test_tracing();
    let region = |address| StatsRegion { address, len: 64 };
    let config = DeviceConfig {
        function: FunctionKind::Vf,
        engines: vec![EngineConfig {
            vf_stats: Some(VfStatsInfo {
                mstats: region(0x100),
                pstats: region(0x200),
                tstats: region(0x300),
                ustats: region(0x400),
            }),
            vf_num_rxqs: 4,
            ..engine_config(0)
        }],
        max_mc_addrs: MAX_MC_ADDRS,
        rss_table_max_size: ETH_RSS_IND_TABLE_ENTRIES_NUM,
        port_mac: PORT_MAC,
        legacy_vf: true,
    };
    L2Device::new(
        config,
        FunctionBackend::Vf { channel: pf },
        Arc::new(Memory::default()),
    )
    .unwrap()
}

#[test]
fn vf_delegates_to_pf() {
    let pf = Arc::new(FakePf::default());
    let vf = vf_device(pf.clone());
    assert!(vf.engines()[0].completer().is_none());

    block_on(vf.vport_start(&StartVportParams {
        vport_id: 0,
        mtu: 1500,
        ..Default::default()
    }))
    .unwrap();
    let (producers, handle) = block_on(vf.queue_rx_start(0, queue(0, 2), &rx_params())).unwrap();
    assert_eq!(producers, ProducerAddress(0x1010));
    // A VF has no cids of its own; the PF assigns them.
    assert_eq!(handle.cid().cid(), 0);
    assert_eq!(handle.cid().abs(), handle.cid().rel());

    let called = Arc::new(Mutex::new(None));
    let mode = {
        let called = called.clone();
        CompletionMode::Callback(Some(Box::new(move |status| *called.lock() = Some(status))))
    };
    block_on(vf.rx_queues_update(&[&handle], true, false, mode)).unwrap();
    assert_eq!(*called.lock(), Some(0));
    // Returns once the PF answers. A VF raises no event.
    block_on(vf.rx_queues_update(&[&handle], false, true, CompletionMode::EventOnly)).unwrap();

    block_on(vf.filter_config(&FilterConfig::Mcast {
        kind: XcastType::Add,
        macs: vec!["01:00:5e:00:00:01".parse().unwrap()],
    }))
    .unwrap();
    block_on(vf.queue_rx_stop(handle)).unwrap();
    block_on(vf.vport_stop(0)).unwrap();

    assert_eq!(
        *pf.requests.lock(),
        [
            "vport_start 0 1500",
            "rxq_start 2",
            "rxq_update 2 true",
            "rxq_update 2 false",
            "filter_mcast 0 [212]",
            "rxq_stop 2",
            "vport_stop 0",
        ]
    );
}

#[test]
fn vf_transport_failure() {
    let pf = Arc::new(FakePf::default());
    let vf = vf_device(pf.clone());
    *pf.down.lock() = true;
    let err = block_on(vf.queue_tx_start(
        0,
        queue(0, 1),
        &TxQueueStartParams::default(),
    ))
    .unwrap_err();
    assert!(matches!(err, L2Error::Transport(_)));

    let group: MacAddress = "01:00:5e:00:00:01".parse().unwrap();
    let err = block_on(vf.filter_config(&FilterConfig::Mcast {
        kind: XcastType::Add,
        macs: vec![group],
    }))
    .unwrap_err();
    assert!(matches!(err, L2Error::Transport(_)));
    assert!(vf.engines()[0].mcast_addresses(0).is_empty());
}

#[test]
fn vf_tunnel_config_is_noop() {
    let pf = Arc::new(FakePf::default());
    let vf = vf_device(pf.clone());
    block_on(vf.tunnel_config(&TunnelParams {
        vxlan_port: Some(4789),
        geneve_port: Some(6081),
    }))
    .unwrap();
    assert!(pf.requests.lock().is_empty());
}

#[test]
fn vf_info_and_mac_check() {
    let pf = Arc::new(FakePf::default());
    let vf = vf_device(pf.clone());
    let info = vf.eth_info();
    assert_eq!(info.num_queues, 4);
    assert!(info.is_legacy);

    let mine = MacAddress::new([0x02, 0, 0, 0, 0, 7]);
    *pf.allowed_mac.lock() = Some(mine);
    assert!(block_on(vf.check_mac(mine)).unwrap());
    assert!(!block_on(vf.check_mac(MacAddress::new([0x02, 0, 0, 0, 0, 8]))).unwrap());
}

#[test]
fn vf_stats_use_negotiated_regions() {
    let pf = Arc::new(FakePf::default());
    let vf = vf_device(pf);
    let regions = vf.engines()[0].stats_regions().unwrap();
    assert_eq!(regions.ustats.address, 0x400);
    assert!(regions.port.is_none());
    assert_eq!(vf.get_vport_stats().unwrap().rx_ucast_pkts, 0);
    vf.reset_vport_stats().unwrap();
}
