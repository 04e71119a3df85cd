//! End-to-end scenarios over an in-memory station.
//!
//! Every test builds a full router from the in-crate mock seams: a
//! manually-advanced timer, the simulated radio, loopback IPC channels and
//! recording processors. Time only moves when a test says so, which makes
//! the cadence-sensitive behavior (queue aging, pings, pairing backoff,
//! storage probes) deterministic.

use groundlink::bytes::{ByteReader, FromBytes};
use groundlink::config::{Config, Platform, Processors};
use groundlink::hw::{RadioCaps, RadioInterfaceInfo, RadioType, SimRadio};
use groundlink::ipc::{Endpoints, IpcChannel, MemoryChannel};
use groundlink::model::{
    AudioParams, ClockSyncType, ControllerSettings, EncryptionFlags, Preferences,
    RadioLinkParams, VehicleModel, VideoProfileFlags,
};
use groundlink::packet::{
    self, compose_packet, PacketComponent, PacketHeader, PacketType, HEADER_LEN,
};
use groundlink::router::{Router, RouterInit, Tick};
use groundlink::time::{Duration, Instant, Timer};
use groundlink::InitError;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const F58: u32 = 5_745_000;
const F24: u32 = 2_412_000;
const CONTROLLER_ID: u32 = 0xC0DE_0001;
const VEHICLE_ID: u32 = 0x10C0_FFEE;

#[derive(Clone)]
struct MockTimer(Rc<Cell<u64>>);

impl Timer for MockTimer {
    fn now(&self) -> Instant {
        Instant::from_micros(self.0.get())
    }

    fn sleep(&self, duration: Duration) {
        self.0.set(self.0.get() + duration.as_micros());
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Radio(PacketType),
    Control,
    CameraCommand,
    Audio(usize),
}

#[derive(Clone, Default)]
struct RecProcessors {
    events: Rc<RefCell<Vec<Event>>>,
}

impl Processors for RecProcessors {
    fn on_radio_packet(&mut self, header: &PacketHeader, _packet: &[u8]) -> bool {
        self.events.borrow_mut().push(Event::Radio(header.packet_type));
        false
    }

    fn on_control_packet(&mut self, _packet: &[u8]) {
        self.events.borrow_mut().push(Event::Control);
    }

    fn video_periodic(&mut self, _now: Instant) {}

    fn on_camera_params_command(&mut self) {
        self.events.borrow_mut().push(Event::CameraCommand);
    }

    fn on_audio(&mut self, bytes: &[u8]) {
        self.events.borrow_mut().push(Event::Audio(bytes.len()));
    }
}

#[derive(Clone)]
struct MockPlatform {
    free_mb: Rc<Cell<Option<u32>>>,
}

impl Platform for MockPlatform {
    fn free_storage_mb(&mut self) -> Option<u32> {
        self.free_mb.get()
    }

    fn first_pairing_done(&self) -> bool {
        true
    }
}

struct TestConfig;

impl Config for TestConfig {
    type Timer = MockTimer;
    type Radio = SimRadio;
    type Ipc = MemoryChannel;
    type Processors = RecProcessors;
    type Platform = MockPlatform;
}

struct Station {
    router: Router<TestConfig>,
    clock: Rc<Cell<u64>>,
    events: Rc<RefCell<Vec<Event>>>,
    free_mb: Rc<Cell<Option<u32>>>,
    central_tx: MemoryChannel,
    central_rx: MemoryChannel,
    telemetry_rx: MemoryChannel,
}

fn all_caps() -> RadioCaps {
    RadioCaps::CAN_RX | RadioCaps::CAN_TX | RadioCaps::CAN_USE_FOR_VIDEO | RadioCaps::CAN_USE_FOR_DATA
}

fn wifi_card(freqs: &[u32]) -> RadioInterfaceInfo {
    RadioInterfaceInfo::new("00:11:22", "wlan", RadioType::Realtek, all_caps(), freqs.to_vec())
}

fn data_link(frequency_khz: u32) -> RadioLinkParams {
    RadioLinkParams {
        frequency_khz,
        caps: all_caps(),
        datarate_video_bps: 18_000_000,
        datarate_data_bps: 6_000_000,
    }
}

fn model(clock_sync: ClockSyncType, has_camera: bool, links: Vec<RadioLinkParams>) -> VehicleModel {
    VehicleModel {
        vehicle_id: VEHICLE_ID,
        sw_version: 46 << 16,
        is_spectator: false,
        must_sync_from_vehicle: false,
        clock_sync_type: clock_sync,
        enc_flags: EncryptionFlags::None,
        links,
        audio: AudioParams::default(),
        video_profile: VideoProfileFlags::default(),
        has_camera,
        osd_shows_video_stats: false,
    }
}

impl Station {
    fn new(model: Option<VehicleModel>, cards: Vec<RadioInterfaceInfo>) -> Self {
        Self::build(model, cards, None, 0)
    }

    fn build(
        model: Option<VehicleModel>,
        cards: Vec<RadioInterfaceInfo>,
        search: Option<u32>,
        main_frequency: u32,
    ) -> Self {
        let clock = Rc::new(Cell::new(0));
        let events = Rc::new(RefCell::new(Vec::new()));
        let free_mb = Rc::new(Cell::new(None));

        let (central_tx, from_central) = MemoryChannel::pair();
        let (to_central, central_rx) = MemoryChannel::pair();
        let (_telemetry_tx, from_telemetry) = MemoryChannel::pair();
        let (to_telemetry, telemetry_rx) = MemoryChannel::pair();
        let (_rc_tx, from_rc) = MemoryChannel::pair();
        let (to_rc, _rc_rx) = MemoryChannel::pair();

        let card_count = cards.len();
        let init = RouterInit::<TestConfig> {
            timer: MockTimer(clock.clone()),
            radio: SimRadio::new(card_count),
            ipc: Endpoints {
                from_central,
                to_central,
                from_telemetry,
                to_telemetry,
                from_rc,
                to_rc,
            },
            processors: RecProcessors {
                events: events.clone(),
            },
            platform: MockPlatform {
                free_mb: free_mb.clone(),
            },
            cards,
            model,
            prefs: Preferences::default(),
            settings: ControllerSettings {
                controller_id: CONTROLLER_ID,
                main_connect_frequency_khz: main_frequency,
                ..ControllerSettings::default()
            },
            search_frequency_khz: search,
            quit: Arc::new(AtomicBool::new(false)),
        };

        Station {
            router: Router::new(init).expect("router init"),
            clock,
            events,
            free_mb,
            central_tx,
            central_rx,
            telemetry_rx,
        }
    }

    fn start(&mut self) {
        self.router.start().expect("bring-up");
        self.router.set_pairing_completed();
    }

    fn tick_at(&mut self, ms: u64) -> Tick {
        self.clock.set(ms * 1_000);
        self.router.tick()
    }

    fn writes(&self) -> &[(usize, Vec<u8>)] {
        &self.router.radio().writes
    }

    /// Packet types of every sub-packet written so far, in write order.
    fn written_types(&self) -> Vec<PacketType> {
        self.writes()
            .iter()
            .flat_map(|(_, frame)| {
                packet::SubPackets::new(frame)
                    .filter_map(|sub| PacketHeader::parse(sub).ok())
                    .map(|h| h.packet_type)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn read_central(&mut self) -> Vec<Vec<u8>> {
        let mut messages = Vec::new();
        while let Some(m) = self.central_rx.try_read(Duration::from_micros(50)) {
            messages.push(m);
        }
        messages
    }
}

fn make_packet(component: PacketComponent, ty: PacketType, payload: &[u8]) -> Vec<u8> {
    let header = PacketHeader::new(component, ty, 0x1111_1111, VEHICLE_ID);
    compose_packet(&header, payload).unwrap()
}

fn telemetry_packet(tag: u8) -> Vec<u8> {
    make_packet(PacketComponent::Telemetry, PacketType::Unknown(0x60), &[tag; 16])
}

fn alarm_fields(message: &[u8]) -> Option<(u32, u32)> {
    let header = PacketHeader::parse(message).ok()?;
    if header.packet_type != PacketType::Alarm {
        return None;
    }
    let p = &message[HEADER_LEN..];
    Some((
        u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
        u32::from_le_bytes([p[4], p[5], p[6], p[7]]),
    ))
}

// ---- bring-up -------------------------------------------------------------

#[test]
fn single_link_bring_up_opens_both_cards() {
    let mut station = Station::new(
        Some(model(ClockSyncType::Basic, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58]), wifi_card(&[F58, F24])],
    );
    station.start();

    assert_eq!(station.router.cards()[0].assigned_link, Some(0));
    assert_eq!(station.router.cards()[1].assigned_link, Some(0));
    assert!(station.router.radio().is_open_for_read(0));
    assert!(station.router.radio().is_open_for_read(1));
    assert!(station.router.radio().is_open_for_write(0));
    assert_eq!(station.router.radio().frequency(0), F58);

    let messages = station.read_central();
    let first = PacketHeader::parse(&messages[0]).unwrap();
    assert_eq!(first.packet_type, PacketType::RouterReady);
    assert_eq!(first.component(), Some(PacketComponent::LocalControl));
}

#[test]
fn stored_main_frequency_steers_the_flexible_card() {
    let mut station = Station::build(
        Some(model(
            ClockSyncType::Basic,
            true,
            vec![data_link(F58), data_link(F24)],
        )),
        vec![wifi_card(&[F58, F24]), wifi_card(&[F58]), wifi_card(&[F24])],
        None,
        F24,
    );
    station.start();

    let cards = station.router.cards();
    assert_eq!(cards[1].assigned_link, Some(0));
    assert_eq!(cards[2].assigned_link, Some(1));
    assert_eq!(cards[0].assigned_link, Some(1));
    // No link went unserved, so nothing but the readiness broadcast.
    let alarms: Vec<_> = station
        .read_central()
        .iter()
        .filter_map(|m| alarm_fields(m))
        .collect();
    assert!(alarms.is_empty());
}

#[test]
fn encrypted_model_without_key_refuses_to_start() {
    let mut m = model(ClockSyncType::Basic, true, vec![data_link(F58)]);
    m.enc_flags = EncryptionFlags::All;

    let clock = Rc::new(Cell::new(0));
    let (_, from_central) = MemoryChannel::pair();
    let (to_central, _) = MemoryChannel::pair();
    let (_, from_telemetry) = MemoryChannel::pair();
    let (to_telemetry, _) = MemoryChannel::pair();
    let (_, from_rc) = MemoryChannel::pair();
    let (to_rc, _) = MemoryChannel::pair();

    let result = Router::new(RouterInit::<TestConfig> {
        timer: MockTimer(clock),
        radio: SimRadio::new(1),
        ipc: Endpoints {
            from_central,
            to_central,
            from_telemetry,
            to_telemetry,
            from_rc,
            to_rc,
        },
        processors: RecProcessors::default(),
        platform: MockPlatform {
            free_mb: Rc::new(Cell::new(None)),
        },
        cards: vec![wifi_card(&[F58])],
        model: Some(m),
        prefs: Preferences::default(),
        settings: ControllerSettings::default(),
        search_frequency_khz: None,
        quit: Arc::new(AtomicBool::new(false)),
    });
    assert!(matches!(result, Err(InitError::MissingEncryptionKey)));
}

// ---- scheduler ------------------------------------------------------------

#[test]
fn frequency_command_frame_goes_out_ten_times() {
    let mut station = Station::new(
        Some(model(ClockSyncType::None, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58])],
    );
    station.start();

    station.router.enqueue_radio_packet(make_packet(
        PacketComponent::Commands,
        PacketType::CommandSetRadioLinkFrequency,
        &F24.to_le_bytes(),
    ));
    station.router.enqueue_radio_packet(telemetry_packet(1));
    station.router.enqueue_radio_packet(telemetry_packet(2));

    station.tick_at(20);

    let writes = station.writes();
    assert_eq!(writes.len(), 11, "10 command repeats plus one telemetry frame");
    for (_, frame) in &writes[..10] {
        assert_eq!(frame, &writes[0].1, "command repeats must be identical");
        let subs: Vec<_> = packet::SubPackets::new(frame).collect();
        assert_eq!(subs.len(), 1);
        let header = PacketHeader::parse(subs[0]).unwrap();
        assert_eq!(header.packet_type, PacketType::CommandSetRadioLinkFrequency);
    }
    let (_, last) = &writes[10];
    let subs: Vec<_> = packet::SubPackets::new(last).collect();
    assert_eq!(subs.len(), 2, "both telemetry packets coalesce into one frame");

    // Repeats are spaced 2 ms apart: 9 gaps moved the mock clock forward.
    assert!(station.clock.get() >= 20_000 + 9 * 2_000);

    // Every sub-packet left with our id and a valid seal.
    for (_, frame) in station.writes() {
        for sub in packet::SubPackets::new(frame) {
            let header = PacketHeader::parse(sub).unwrap();
            assert_eq!(header.vehicle_id_src, CONTROLLER_ID);
            assert!(packet::verify_crc(sub));
        }
    }
}

#[test]
fn composed_frames_respect_the_size_cap() {
    let mut station = Station::new(
        Some(model(ClockSyncType::None, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58])],
    );
    station.start();

    // 8 packets of ~316 bytes each: no composed frame may exceed 900 bytes.
    for tag in 0..8u8 {
        station.router.enqueue_radio_packet(make_packet(
            PacketComponent::Telemetry,
            PacketType::Unknown(0x60),
            &vec![tag; 289],
        ));
    }
    station.tick_at(20);

    assert!(!station.writes().is_empty());
    for (_, frame) in station.writes() {
        assert!(frame.len() <= 900, "composed frame of {} bytes", frame.len());
    }
}

#[test]
fn retransmission_requests_jump_the_queue() {
    let mut station = Station::new(
        Some(model(ClockSyncType::Basic, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58])],
    );
    station.start();

    station.router.enqueue_radio_packet(telemetry_packet(7));
    station.router.enqueue_radio_packet(make_packet(
        PacketComponent::Video,
        PacketType::VideoReqMultiplePackets,
        &[1, 2, 3, 4],
    ));

    // The pending request alone forces this tick to transmit.
    station.tick_at(20);

    let types = station.written_types();
    assert!(!types.is_empty());
    assert_eq!(
        types[0],
        PacketType::VideoReqMultiplePackets,
        "retransmission request must be first on the wire"
    );
    assert!(types.contains(&PacketType::Unknown(0x60)));
    assert_eq!(station.router.radio_queue_len(), 0);

    // The request was rewritten in place before sending.
    let (_, first) = &station.writes()[0];
    let header = PacketHeader::parse(first).unwrap();
    assert_eq!(header.vehicle_id_src, CONTROLLER_ID);
    assert!(packet::verify_crc(first));
}

#[test]
fn stale_queue_head_forces_a_send() {
    let mut station = Station::new(
        Some(model(ClockSyncType::Basic, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58])],
    );
    station.start();

    station.clock.set(0);
    station.router.enqueue_radio_packet(telemetry_packet(9));

    station.tick_at(20);
    assert!(station.writes().is_empty(), "young queue head must wait");

    station.tick_at(150);
    assert!(
        !station.writes().is_empty(),
        "queue head older than 100 ms must flush"
    );
}

#[test]
fn update_in_progress_flushes_per_packet() {
    let mut station = Station::new(
        Some(model(ClockSyncType::None, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58])],
    );
    station.start();
    station.router.set_update_in_progress(true);

    station.router.enqueue_radio_packet(telemetry_packet(1));
    station.router.enqueue_radio_packet(telemetry_packet(2));
    station.tick_at(20);

    let writes = station.writes();
    assert_eq!(writes.len(), 2);
    for (_, frame) in writes {
        assert_eq!(packet::SubPackets::new(frame).count(), 1);
    }
}

#[test]
fn spectator_station_never_transmits() {
    let mut m = model(ClockSyncType::None, false, vec![data_link(F58)]);
    m.is_spectator = true;
    let mut station = Station::new(Some(m), vec![wifi_card(&[F58])]);
    station.start();

    station.router.enqueue_radio_packet(telemetry_packet(1));
    station.tick_at(20);

    assert!(station.writes().is_empty());
    assert_eq!(station.router.radio_queue_len(), 0, "queue is discarded");
}

#[test]
fn camera_params_command_pokes_adaptive_video() {
    let mut station = Station::new(
        Some(model(ClockSyncType::None, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58])],
    );
    station.start();

    station.router.enqueue_radio_packet(make_packet(
        PacketComponent::Commands,
        PacketType::CommandSetCameraParameters,
        &[0; 8],
    ));
    station.tick_at(20);

    assert!(station.events.borrow().contains(&Event::CameraCommand));
}

// ---- injectors ------------------------------------------------------------

#[test]
fn ping_cadence_follows_clock_sync_interval() {
    // No camera: every tick transmits, so pings go out exactly when due.
    let mut station = Station::new(
        Some(model(ClockSyncType::Basic, false, vec![data_link(F58)])),
        vec![wifi_card(&[F58])],
    );
    station.start();

    for ms in (0..=1_000).step_by(50) {
        station.tick_at(ms);
    }

    let pings = station
        .written_types()
        .into_iter()
        .filter(|t| *t == PacketType::PingClock)
        .count();
    // 250 ms interval over one second of ticks.
    assert_eq!(pings, 3);
}

#[test]
fn pairing_backoff_is_monotonic_and_stops_on_completion() {
    let mut station = Station::new(
        Some(model(ClockSyncType::Basic, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58])],
    );
    station.router.start().expect("bring-up");
    // Pairing left active on purpose.

    let mut send_times = Vec::new();
    let mut last_count = 0;
    for ms in (0..=2_000).step_by(10) {
        station.tick_at(ms);
        let count = station
            .written_types()
            .into_iter()
            .filter(|t| *t == PacketType::PairingRequest)
            .count();
        if count > last_count {
            send_times.push(ms);
            last_count = count;
        }
    }
    assert!(send_times.len() >= 2, "pairing requests must flow while unpaired");

    let gaps: Vec<u64> = send_times.windows(2).map(|w| w[1] - w[0]).collect();
    for pair in gaps.windows(2) {
        assert!(pair[1] >= pair[0], "pairing backoff must never shrink");
    }

    station.router.set_pairing_completed();
    let before = last_count;
    for ms in (2_010..=2_500).step_by(10) {
        station.tick_at(ms);
    }
    let after = station
        .written_types()
        .into_iter()
        .filter(|t| *t == PacketType::PairingRequest)
        .count();
    assert_eq!(before, after, "pairing requests must stop once paired");
}

// ---- main loop ------------------------------------------------------------

#[test]
fn ipc_messages_route_by_component() {
    let mut station = Station::new(
        Some(model(ClockSyncType::Basic, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58])],
    );
    station.start();

    let control = make_packet(PacketComponent::LocalControl, PacketType::Unknown(0x70), &[]);
    station.central_tx.send(&control);
    station.central_tx.send(&telemetry_packet(3));

    station.tick_at(15);

    assert!(station.events.borrow().contains(&Event::Control));
    assert_eq!(station.router.radio_queue_len(), 1);
}

#[test]
fn received_telemetry_is_forwarded_to_the_telemetry_process() {
    let mut station = Station::new(
        Some(model(ClockSyncType::Basic, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58])],
    );
    station.start();

    let downlink = telemetry_packet(5);
    station.router.radio_mut().push_rx(0, downlink.clone());
    station.tick_at(20);

    let forwarded = station.telemetry_rx.try_read(Duration::from_micros(50));
    assert_eq!(forwarded.as_deref(), Some(&downlink[..]));
    assert_eq!(station.router.stats().interfaces[0].rx_packets, 1);
}

#[test]
fn corrupted_frames_are_counted_and_dropped() {
    let mut station = Station::new(
        Some(model(ClockSyncType::Basic, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58])],
    );
    station.start();

    let mut corrupt = telemetry_packet(5);
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0xFF;
    station.router.radio_mut().push_rx(0, corrupt);
    station.tick_at(20);

    assert!(station.telemetry_rx.try_read(Duration::from_micros(50)).is_none());
    assert_eq!(station.router.stats().interfaces[0].rx_crc_errors, 1);
    assert_eq!(station.router.stats().interfaces[0].rx_packets, 0);
}

#[test]
fn adaptive_level_shift_updates_the_published_state() {
    let mut station = Station::new(
        Some(model(ClockSyncType::Basic, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58])],
    );
    station.start();

    station.router.enqueue_radio_packet(make_packet(
        PacketComponent::Video,
        PacketType::VideoSwitchToAdaptiveLevel,
        &3u32.to_le_bytes(),
    ));
    station.tick_at(20);

    let snapshot = station.router.adaptive_snapshot().expect("published");
    assert_eq!(snapshot.vehicles[0].vehicle_id, VEHICLE_ID);
    assert_eq!(snapshot.vehicles[0].last_requested_level_shift, 3);
    // The shift also made this tick transmit the request.
    assert!(!station.writes().is_empty());
}

#[test]
fn fatal_receive_error_shuts_the_router_down() {
    let mut station = Station::new(
        Some(model(ClockSyncType::Basic, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58]), wifi_card(&[F58])],
    );
    station.start();
    station.router.radio_mut().fatal = Some(-1);

    station.router.run();

    for card in station.router.cards() {
        assert!(!card.opened_for_read);
        assert!(!card.opened_for_write);
    }
    assert!(!station.router.radio().is_open_for_read(0));
    assert!(!station.router.radio().is_open_for_write(1));
}

#[test]
fn low_storage_raises_one_alarm_per_probe() {
    let mut station = Station::new(
        Some(model(ClockSyncType::Basic, true, vec![data_link(F58)])),
        vec![wifi_card(&[F58])],
    );
    station.start();
    station.free_mb.set(Some(150));
    station.read_central(); // discard the readiness broadcast

    station.tick_at(7_000);
    let alarms: Vec<_> = station
        .read_central()
        .iter()
        .filter_map(|m| alarm_fields(m))
        .collect();
    assert_eq!(alarms, vec![(2, 150)]);

    // Within the same probe window: silent.
    station.tick_at(7_050);
    assert!(station.read_central().iter().filter_map(|m| alarm_fields(m)).next().is_none());

    // Next probe, one more alarm.
    station.tick_at(70_000);
    let alarms: Vec<_> = station
        .read_central()
        .iter()
        .filter_map(|m| alarm_fields(m))
        .collect();
    assert_eq!(alarms, vec![(2, 150)]);
}

#[test]
fn unserved_link_raises_an_alarm_at_bring_up() {
    let mut station = Station::build(
        Some(model(
            ClockSyncType::Basic,
            true,
            vec![data_link(F58), data_link(F24)],
        )),
        vec![wifi_card(&[F58])],
        None,
        0,
    );
    station.start();

    // Both the planner and the bring-up report the dead link.
    let alarms: Vec<_> = station
        .read_central()
        .iter()
        .filter_map(|m| alarm_fields(m))
        .collect();
    assert_eq!(alarms, vec![(1, 1), (1, 1)], "link 1 has no capable interface");
}

#[test]
fn sik_link_uses_short_frames() {
    let sik = RadioInterfaceInfo::new(
        "sik0",
        "ttyUSB0",
        RadioType::SiK,
        all_caps(),
        vec![433_000],
    );
    let mut station = Station::new(
        Some(model(ClockSyncType::Basic, false, vec![data_link(433_000)])),
        vec![sik],
    );
    station.start();
    assert!(station.router.cards()[0].opened_for_read);
    assert!(station.router.cards()[0].opened_for_write);

    // Queued traffic is re-framed per sub-packet with the short header.
    station.router.enqueue_radio_packet(telemetry_packet(4));
    station.tick_at(20);
    let (_, frame) = &station.writes()[0];
    let short =
        groundlink::packet::ShortHeader::from_bytes(&mut ByteReader::new(frame))
            .unwrap();
    assert_eq!(short.total_length as usize, frame.len());
    assert_eq!(short.vehicle_id_src, CONTROLLER_ID);

    // The ping goes straight to the serial radio, bypassing the queue.
    let before = station.writes().len();
    station.tick_at(300);
    let new_writes = &station.writes()[before..];
    let ping = new_writes
        .iter()
        .map(|(_, f)| {
            groundlink::packet::ShortHeader::from_bytes(&mut ByteReader::new(f))
                .unwrap()
        })
        .find(|s| s.packet_type == PacketType::PingClock);
    assert!(ping.is_some(), "ping must reach the SiK radio as a short frame");
    assert_eq!(station.router.radio_queue_len(), 0);
}

#[test]
fn search_mode_listens_and_never_transmits() {
    let mut station = Station::build(None, vec![wifi_card(&[F58]), wifi_card(&[F24])], Some(F58), 0);
    station.router.start().expect("search bring-up");

    assert!(station.router.radio().is_open_for_read(0));
    assert!(!station.router.radio().is_open_for_write(0));
    assert!(!station.router.radio().is_open_for_read(1), "wrong band");
    assert_eq!(station.router.radio().frequency(0), F58);

    station.router.enqueue_radio_packet(telemetry_packet(1));
    for ms in (0..200).step_by(10) {
        station.tick_at(ms);
    }
    assert!(station.writes().is_empty());
}
