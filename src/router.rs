//! The router context and its cooperative main loop.
//!
//! All state the process owns lives in one [`Router`] value: the hardware
//! inventory, the two packet queues, the statistics, the IPC endpoints and
//! the timers of every periodic job. One call to [`Router::tick`] performs
//! one scheduling round:
//!
//! 1. periodic bookkeeping (stats refresh, snapshot publishing, pairing),
//! 2. drain the IPC channels into the control and radio queues,
//! 3. burst-receive from the radio and feed the downstream processors,
//! 4. decide whether this tick transmits and run the outgoing scheduler,
//! 5. overrun detection.
//!
//! [`Router::run`] repeats ticks until the quit flag is set or the radio
//! reports an unrecoverable receive error.

use crate::assign::plan_assignment;
use crate::bytes::{ByteReader, FromBytes};
use crate::config::{Config, Platform, Processors};
use crate::error::InitError;
use crate::hw::{RadioInterfaceInfo, RadioTransport, RxFrame};
use crate::ipc::{ChannelId, Endpoints, IpcChannel};
use crate::links;
use crate::model::{ClockSyncType, ControllerSettings, EncryptionFlags, Preferences, VehicleModel};
use crate::packet::{
    self, compose_packet, PacketComponent, PacketHeader, PacketQueue, PacketType, ShortHeader,
    StreamCounters, StreamId,
};
use crate::shm::SnapshotRegion;
use crate::stats::{
    AdaptiveVideoSnapshot, ControllerLinkStats, ProcessWatchdogSnapshot, RadioStats,
    RadioStatsSnapshot, VideoInfoSnapshot,
};
use crate::time::{Duration, Instant, Timer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Budget for one tick.
pub const DEFAULT_MAX_LOOP_TIME: Duration = Duration::from_millis(50);

/// Extra Central messages drained per tick while an upload wants
/// confirmations.
pub const DEFAULT_UPLOAD_PACKET_CONFIRMATION_FREQUENCY: usize = 5;

/// Busy-check window of one IPC read.
const IPC_READ_TIMEOUT: Duration = Duration::from_micros(50);

/// Wait for the first radio frame of a tick.
const RECEIVE_FIRST_TIMEOUT: Duration = Duration::from_micros(1000);

/// Wait for follow-up frames within the same burst.
const RECEIVE_RETRY_TIMEOUT: Duration = Duration::from_micros(200);

/// Follow-up receive attempts per tick.
const RECEIVE_BURST_ROUNDS: usize = 6;

/// A queue head older than this forces a transmission.
const QUEUE_FLUSH_AGE: Duration = Duration::from_millis(100);

/// Gap between IPC drains.
const PIPE_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Free space below this raises the low-storage alarm.
const LOW_STORAGE_THRESHOLD_MB: u32 = 200;

const STORAGE_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const FIRST_STORAGE_CHECK_DELAY: Duration = Duration::from_secs(6);

/// Video-info snapshot refresh cadence.
const VIDEO_INFO_PUBLISH_INTERVAL: Duration = Duration::from_millis(200);

/// No overload alarms during the first seconds after start.
const OVERRUN_ALARM_MIN_UPTIME: Duration = Duration::from_secs(10);

/// A single tick this long overruns loudly, without waiting for a streak.
const OVERRUN_IMMEDIATE_THRESHOLD: Duration = Duration::from_millis(300);

/// Overload alarms are suppressed this long after a radio-flags command
/// (the reconfiguration itself stalls the loop).
const RADIO_FLAGS_COMMAND_GRACE: Duration = Duration::from_secs(5);

/// Source id stamped on packets the router itself originates towards the
/// local processes.
const LOCAL_SOURCE_ID: u32 = PacketComponent::LinkControl as u32;

/// Alarm conditions reported to Central.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AlarmId {
    NoInterfacesForLink = 1,
    LowStorageSpace = 2,
    CpuLoopOverload = 3,
}

/// Outcome of one tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Tick {
    Continue,
    /// The radio receive path failed permanently; shut down.
    Fatal,
}

/// Everything needed to construct a [`Router`].
pub struct RouterInit<C: Config> {
    pub timer: C::Timer,
    pub radio: C::Radio,
    pub ipc: Endpoints<C::Ipc>,
    pub processors: C::Processors,
    pub platform: C::Platform,
    pub cards: Vec<RadioInterfaceInfo>,
    /// `None` only in search mode.
    pub model: Option<VehicleModel>,
    pub prefs: Preferences,
    pub settings: ControllerSettings,
    /// `Some` puts the router into search mode at this frequency.
    pub search_frequency_khz: Option<u32>,
    pub quit: Arc<AtomicBool>,
}

struct Snapshots {
    radio_stats: SnapshotRegion<RadioStatsSnapshot>,
    watchdog: SnapshotRegion<ProcessWatchdogSnapshot>,
    adaptive: SnapshotRegion<AdaptiveVideoSnapshot>,
    video_info: SnapshotRegion<VideoInfoSnapshot>,
    video_info_radio_in: SnapshotRegion<VideoInfoSnapshot>,
}

/// The ground-station router.
pub struct Router<C: Config> {
    pub(crate) timer: C::Timer,
    pub(crate) radio: C::Radio,
    pub(crate) ipc: Endpoints<C::Ipc>,
    pub(crate) processors: C::Processors,
    platform: C::Platform,

    pub(crate) model: Option<VehicleModel>,
    pub(crate) prefs: Preferences,
    pub(crate) settings: ControllerSettings,
    pub(crate) cards: Vec<RadioInterfaceInfo>,
    pub(crate) search_frequency_khz: Option<u32>,

    pub(crate) queue_radio: PacketQueue,
    queue_control: PacketQueue,
    pub(crate) stats: RadioStats,
    pub(crate) link_stats: ControllerLinkStats,
    pub(crate) streams: StreamCounters,

    snapshots: Snapshots,
    watchdog: ProcessWatchdogSnapshot,
    adaptive: AdaptiveVideoSnapshot,
    video_info: VideoInfoSnapshot,
    video_info_radio_in: VideoInfoSnapshot,

    pub(crate) update_in_progress: bool,
    pairing_completed: bool,
    first_pairing_done: bool,
    failed_init_interface: Option<usize>,

    time_start: Instant,
    pub(crate) time_now: Instant,
    last_pipe_check: Instant,
    last_video_info_publish: Instant,

    pub(crate) last_ping_send_micros: u64,
    pub(crate) last_ping_id: u8,
    pub(crate) last_ping_link: usize,
    pub(crate) last_link_stats_sent: Instant,

    pub(crate) last_pairing_send: Instant,
    pub(crate) pairing_interval_ms: u64,
    pub(crate) pairing_sent_count: u32,

    pub(crate) last_radio_flags_command: Instant,
    overrun_count: u32,
    storage_check_count: u32,
    last_storage_check: Instant,
    max_loop_time: Duration,

    quit: Arc<AtomicBool>,
}

impl<C: Config> Router<C> {
    /// Builds the router context.
    ///
    /// Fails only for conditions nothing downstream could fix; everything
    /// else is handled during [`start`](Self::start).
    pub fn new(init: RouterInit<C>) -> Result<Self, InitError> {
        if let Some(model) = &init.model {
            if model.enc_flags != EncryptionFlags::None && init.settings.encryption_key.is_none() {
                return Err(InitError::MissingEncryptionKey);
            }
        }

        let now = init.timer.now();
        let stats = RadioStats::new(init.settings.stats_refresh_interval_ms);

        Ok(Router {
            timer: init.timer,
            radio: init.radio,
            ipc: init.ipc,
            processors: init.processors,
            platform: init.platform,
            model: init.model,
            prefs: init.prefs,
            settings: init.settings,
            cards: init.cards,
            search_frequency_khz: init.search_frequency_khz,
            queue_radio: PacketQueue::new(),
            queue_control: PacketQueue::new(),
            stats,
            link_stats: ControllerLinkStats::new(),
            streams: StreamCounters::new(),
            snapshots: Snapshots {
                radio_stats: SnapshotRegion::new(),
                watchdog: SnapshotRegion::new(),
                adaptive: SnapshotRegion::new(),
                video_info: SnapshotRegion::new(),
                video_info_radio_in: SnapshotRegion::new(),
            },
            watchdog: ProcessWatchdogSnapshot::default(),
            adaptive: AdaptiveVideoSnapshot::default(),
            video_info: VideoInfoSnapshot::default(),
            video_info_radio_in: VideoInfoSnapshot::default(),
            update_in_progress: false,
            pairing_completed: false,
            first_pairing_done: false,
            failed_init_interface: None,
            time_start: now,
            time_now: now,
            last_pipe_check: Instant::default(),
            last_video_info_publish: Instant::default(),
            last_ping_send_micros: 0,
            last_ping_id: 0,
            last_ping_link: 0,
            last_link_stats_sent: Instant::default(),
            last_pairing_send: Instant::default(),
            pairing_interval_ms: 50,
            pairing_sent_count: 0,
            last_radio_flags_command: Instant::default(),
            overrun_count: 0,
            storage_check_count: 0,
            last_storage_check: Instant::default(),
            max_loop_time: DEFAULT_MAX_LOOP_TIME,
            quit: init.quit,
        })
    }

    /// Assigns, tunes and opens the radio interfaces, then announces
    /// readiness to the local processes.
    pub fn start(&mut self) -> Result<(), InitError> {
        self.time_now = self.timer.now();
        self.time_start = self.time_now;

        self.stats.interface_count = self.cards.len();
        self.stats.link_count = self.model.as_ref().map(|m| m.links.len()).unwrap_or(1);

        if let Some(model) = &self.model {
            self.adaptive.vehicle_count = 1;
            self.adaptive.vehicles[0].vehicle_id = model.vehicle_id;
        }

        self.first_pairing_done = self.platform.first_pairing_done();
        log::info!(
            "first pairing {} completed on this controller",
            if self.first_pairing_done { "was already" } else { "was never" }
        );

        if let Some(freq) = self.search_frequency_khz {
            links::set_cards_frequencies_for_search(&mut self.radio, &mut self.cards, freq);
            self.settle_after_tuning();
            let report = links::open_interfaces_for_search(&mut self.radio, &mut self.cards, freq);
            self.failed_init_interface = report.failed_interface;
        } else if self.model.is_some() {
            let model = self.model.take().expect("checked above");
            let plan = plan_assignment(
                &self.cards,
                &model,
                self.settings.main_connect_frequency_khz,
            );
            for (card, link) in self.cards.iter_mut().zip(&plan.iface_link) {
                card.assigned_link = *link;
            }
            for &link in &plan.unserved_links {
                self.send_alarm_to_central(AlarmId::NoInterfacesForLink, link as u32, 1);
            }

            links::set_cards_frequencies(&mut self.radio, &mut self.cards, &model);
            self.settle_after_tuning();

            let result = links::open_interfaces(&mut self.radio, &mut self.cards, &model);
            self.model = Some(model);
            let report = result?;
            self.failed_init_interface = report.failed_interface;
            for &link in &report.dead_links {
                self.send_alarm_to_central(AlarmId::NoInterfacesForLink, link as u32, 1);
            }
        } else {
            log::warn!("no paired vehicle model; radio side stays closed");
        }

        self.publish_radio_stats();
        self.broadcast_router_ready();
        if let Some(iface) = self.failed_init_interface {
            self.broadcast_interface_init_failed(iface);
        }
        log::info!("router is up and routing");
        Ok(())
    }

    /// Runs ticks until the quit flag is set or the radio fails, then
    /// releases everything.
    pub fn run(&mut self) {
        while !self.quit.load(Ordering::Relaxed) {
            if self.tick() == Tick::Fatal {
                log::error!("radio receive path failed, shutting down");
                break;
            }
        }
        self.shutdown();
    }

    /// One round of the cooperative loop.
    pub fn tick(&mut self) -> Tick {
        let t0 = self.timer.now();
        self.time_now = t0;
        self.watchdog.loop_counter = self.watchdog.loop_counter.wrapping_add(1);
        self.watchdog.last_active_time_ms = t0.millis() as u32;

        self.check_storage();
        self.periodic_loop();
        let t_periodic = self.timer.now();

        if self.time_now - self.last_pipe_check >= PIPE_CHECK_INTERVAL {
            self.last_pipe_check = self.time_now;
            self.drain_ipc();
            while let Some(packet) = self.queue_control.pop() {
                self.processors.on_control_packet(&packet);
            }
        }
        let t_ipc = self.timer.now();

        let end_of_video_block = match self.receive_burst() {
            Ok(flag) => flag,
            Err(code) => {
                log::error!("radio receive returned fatal error {}", code.0);
                return Tick::Fatal;
            }
        };
        let t_receive = self.timer.now();

        if self.search_frequency_khz.is_some() {
            let elapsed = self.timer.now() - t0;
            if elapsed > self.max_loop_time {
                log::warn!("search loop overran its budget ({})", elapsed);
            } else {
                self.overrun_count = 0;
            }
            self.update_watchdog_loop_time(t0);
            return Tick::Continue;
        }

        let has_camera = self.model.as_ref().map(|m| m.has_camera).unwrap_or(false);
        if has_camera {
            self.processors.video_periodic(self.time_now);
        }
        let t_video = self.timer.now();

        let (video_requests, video_adjustments) = self.scan_radio_queue();

        let send_now = self.decide_send_now(end_of_video_block, video_requests, video_adjustments);
        if send_now {
            self.process_and_send_packets(video_requests);
        }
        let t_send = self.timer.now();

        let elapsed = t_send - t0;
        if self.time_now - self.time_start > OVERRUN_ALARM_MIN_UPTIME && elapsed > self.max_loop_time
        {
            log::warn!(
                "loop overran its budget: {} (periodic {}, ipc {}, receive {}, video {}, send {}), streak {}",
                elapsed,
                t_periodic - t0,
                t_ipc - t_periodic,
                t_receive - t_ipc,
                t_video - t_receive,
                t_send - t_video,
                self.overrun_count + 1
            );
            self.overrun_count += 1;

            let grace_over =
                self.time_now - self.last_radio_flags_command > RADIO_FLAGS_COMMAND_GRACE;
            if self.overrun_count > 5 && grace_over {
                self.send_alarm_to_central(AlarmId::CpuLoopOverload, elapsed.as_millis() as u32, 1);
            }
            if elapsed >= OVERRUN_IMMEDIATE_THRESHOLD && grace_over {
                self.send_alarm_to_central(
                    AlarmId::CpuLoopOverload,
                    (elapsed.as_millis() as u32) << 16,
                    1,
                );
            }
        } else {
            self.overrun_count = 0;
        }

        self.update_watchdog_loop_time(t0);
        Tick::Continue
    }

    /// Orderly release of everything the router opened.
    fn shutdown(&mut self) {
        log::info!("stopping");
        links::close_interfaces(&mut self.radio, &mut self.cards);
        self.publish_radio_stats();
        log::info!("all radio interfaces released");
    }

    // ---- periodic jobs ----------------------------------------------------

    fn periodic_loop(&mut self) {
        if self.stats.periodic_update(self.time_now) {
            self.publish_radio_stats();
        }
        self.link_stats.periodic_update(&self.stats, self.time_now);

        let osd_wants_video_stats = self
            .model
            .as_ref()
            .map(|m| m.osd_shows_video_stats)
            .unwrap_or(false);
        if osd_wants_video_stats
            && self.time_now - self.last_video_info_publish >= VIDEO_INFO_PUBLISH_INTERVAL
        {
            self.last_video_info_publish = self.time_now;
            self.video_info.time_last_update_ms = self.time_now.millis() as u32;
            self.video_info_radio_in.time_last_update_ms = self.time_now.millis() as u32;
            self.snapshots.video_info.publish(&self.video_info);
            self.snapshots
                .video_info_radio_in
                .publish(&self.video_info_radio_in);
        }

        self.pairing_periodic();

        self.snapshots.adaptive.publish(&self.adaptive);
        self.snapshots.watchdog.publish(&self.watchdog);
    }

    fn check_storage(&mut self) {
        let due_first = self.storage_check_count == 0
            && self.time_now - self.time_start > FIRST_STORAGE_CHECK_DELAY;
        let due_again = self.storage_check_count > 0
            && self.time_now - self.last_storage_check > STORAGE_CHECK_INTERVAL;
        if !due_first && !due_again {
            return;
        }
        self.storage_check_count += 1;
        self.last_storage_check = self.time_now;
        if let Some(free_mb) = self.platform.free_storage_mb() {
            if free_mb < LOW_STORAGE_THRESHOLD_MB {
                self.send_alarm_to_central(AlarmId::LowStorageSpace, free_mb, 1);
            }
        }
    }

    fn update_watchdog_loop_time(&mut self, t0: Instant) {
        // The queue scan may have recorded adaptive-level shifts this tick.
        self.snapshots.adaptive.publish(&self.adaptive);

        let elapsed_ms = (self.timer.now() - t0).as_millis() as u32;
        if self.watchdog.max_loop_time_ms < elapsed_ms {
            self.watchdog.max_loop_time_ms = elapsed_ms;
        }
        self.watchdog.total_loop_time_ms = self.watchdog.total_loop_time_ms.wrapping_add(elapsed_ms);
        if self.watchdog.loop_counter != 0 {
            self.watchdog.average_loop_time_ms =
                self.watchdog.total_loop_time_ms / self.watchdog.loop_counter;
        }
        self.snapshots.watchdog.publish(&self.watchdog);
    }

    // ---- IPC --------------------------------------------------------------

    fn drain_ipc(&mut self) {
        let central_budget = 5 + DEFAULT_UPLOAD_PACKET_CONFIRMATION_FREQUENCY;
        for _ in 0..central_budget {
            match self.ipc.from_central.try_read(IPC_READ_TIMEOUT) {
                Some(message) => self.route_local_message(message),
                None => break,
            }
        }
        for _ in 0..5 {
            match self.ipc.from_telemetry.try_read(IPC_READ_TIMEOUT) {
                Some(message) => self.route_local_message(message),
                None => break,
            }
        }
        for _ in 0..5 {
            match self.ipc.from_rc.try_read(IPC_READ_TIMEOUT) {
                Some(message) => self.route_local_message(message),
                None => break,
            }
        }
    }

    /// Routes one message from a local producer into the right queue.
    fn route_local_message(&mut self, message: Vec<u8>) {
        self.watchdog.last_ipc_incoming_ms = self.time_now.millis() as u32;
        let header = match PacketHeader::parse(&message) {
            Ok(h) => h,
            Err(e) => {
                log::warn!("dropping malformed IPC message ({} bytes): {}", message.len(), e);
                return;
            }
        };
        if header.component() == Some(PacketComponent::LocalControl) {
            self.queue_control.push_back(message, self.time_now);
        } else {
            self.queue_radio.push_back(message, self.time_now);
        }
    }

    fn send_to_channel(&mut self, id: ChannelId, message: &[u8]) {
        let channel = match id {
            ChannelId::RouterToCentral => &mut self.ipc.to_central,
            ChannelId::RouterToTelemetry => &mut self.ipc.to_telemetry,
            ChannelId::RouterToRc => &mut self.ipc.to_rc,
            _ => return,
        };
        if channel.send(message) {
            self.watchdog.last_ipc_outgoing_ms = self.time_now.millis() as u32;
        } else {
            log::warn!("failed to deliver {} bytes to {}", message.len(), id);
        }
    }

    // ---- radio receive ----------------------------------------------------

    fn receive_burst(&mut self) -> Result<bool, crate::hw::RadioFatal> {
        let mut end_of_block = false;
        let mut frame = self.radio.try_receive(RECEIVE_FIRST_TIMEOUT)?;
        for _ in 0..RECEIVE_BURST_ROUNDS {
            match frame {
                Some(f) => end_of_block |= self.handle_rx_frame(f),
                None => break,
            }
            frame = self.radio.try_receive(RECEIVE_RETRY_TIMEOUT)?;
        }
        Ok(end_of_block)
    }

    /// Dispatches one received frame. Returns whether it completed a video
    /// block.
    fn handle_rx_frame(&mut self, frame: RxFrame) -> bool {
        let link = self
            .cards
            .get(frame.iface)
            .and_then(|card| card.assigned_link);
        let is_sik = self
            .cards
            .get(frame.iface)
            .map(|card| card.is_sik())
            .unwrap_or(false);

        if is_sik {
            return self.handle_short_frame(&frame, link);
        }

        let mut end_of_block = false;
        let frame_len = frame.bytes.len();
        let mut offset = 0;
        while offset < frame_len {
            let rest = &frame.bytes[offset..];
            let total = match packet::peek_total_length(rest) {
                Some(t) if t >= packet::HEADER_LEN && t <= rest.len() => t,
                _ => break,
            };
            let sub = frame.bytes[offset..offset + total].to_vec();
            offset += total;

            if !packet::verify_crc(&sub) {
                self.stats.on_crc_error(frame.iface);
                continue;
            }
            let header = match PacketHeader::parse(&sub) {
                Ok(h) => h,
                Err(_) => continue,
            };
            self.stats.on_packet_received(frame.iface, link, sub.len());
            self.stats.on_stream_received(header.stream_id());

            end_of_block |= self.dispatch_received_packet(&header, &sub);
        }
        end_of_block
    }

    fn handle_short_frame(&mut self, frame: &RxFrame, link: Option<usize>) -> bool {
        let short = match ShortHeader::from_bytes(&mut ByteReader::new(&frame.bytes)) {
            Ok(s) => s,
            Err(_) => {
                self.stats.on_crc_error(frame.iface);
                return false;
            }
        };
        self.stats
            .on_packet_received(frame.iface, link, frame.bytes.len());

        // Re-frame for the processors; short packets only ever carry link
        // management traffic.
        let mut header = PacketHeader::new(
            PacketComponent::LinkControl,
            short.packet_type,
            short.vehicle_id_src,
            short.vehicle_id_dest,
        );
        header.stream_packet_idx = short.stream_packet_idx;
        header.total_length = short.total_length;
        header.total_headers_length = packet::SHORT_HEADER_LEN as u16;
        self.processors.on_radio_packet(&header, &frame.bytes)
    }

    fn dispatch_received_packet(&mut self, header: &PacketHeader, sub: &[u8]) -> bool {
        match header.component() {
            Some(PacketComponent::Telemetry) => {
                self.send_to_channel(ChannelId::RouterToTelemetry, sub);
                false
            }
            Some(PacketComponent::Rc) => {
                self.send_to_channel(ChannelId::RouterToRc, sub);
                false
            }
            Some(PacketComponent::Audio) => {
                let start = (header.total_headers_length as usize).min(sub.len());
                self.processors.on_audio(&sub[start..]);
                false
            }
            Some(PacketComponent::LocalControl) => {
                log::warn!("dropping local-control packet received over the air");
                false
            }
            Some(PacketComponent::Video) => {
                self.video_info_radio_in.packets = self.video_info_radio_in.packets.wrapping_add(1);
                self.video_info_radio_in.bytes =
                    self.video_info_radio_in.bytes.wrapping_add(sub.len() as u32);
                let end = self.processors.on_radio_packet(header, sub);
                if end {
                    self.video_info_radio_in.blocks_completed =
                        self.video_info_radio_in.blocks_completed.wrapping_add(1);
                }
                end
            }
            _ => self.processors.on_radio_packet(header, sub),
        }
    }

    // ---- transmit decision ------------------------------------------------

    /// Peeks the radio queue for the signals that influence this tick's
    /// transmit decision: pending video retransmission requests and
    /// adaptive-level shifts (which also update the per-vehicle adaptive
    /// state).
    fn scan_radio_queue(&mut self) -> (usize, usize) {
        let mut requests = 0;
        let mut adjustments = 0;
        let now_ms = self.time_now.millis() as u32;

        for i in 0..self.queue_radio.len() {
            let parsed = {
                let p = match self.queue_radio.peek(i) {
                    Some(p) => p,
                    None => continue,
                };
                match PacketHeader::parse(p) {
                    Ok(header) => {
                        let level = if header.packet_type == PacketType::VideoSwitchToAdaptiveLevel
                        {
                            p.get(packet::HEADER_LEN..packet::HEADER_LEN + 4).map(|b| {
                                u32::from_le_bytes([b[0], b[1], b[2], b[3]])
                            })
                        } else {
                            None
                        };
                        Some((header, level))
                    }
                    Err(_) => None,
                }
            };
            let (header, level) = match parsed {
                Some(v) => v,
                None => continue,
            };

            if header.component() == Some(PacketComponent::Video)
                && header.packet_type.is_video_retransmission_request()
            {
                requests += 1;
            }
            if header.component() == Some(PacketComponent::Video) {
                if let Some(level) = level {
                    if self
                        .adaptive
                        .record_level_shift(header.vehicle_id_dest, level as i32, now_ms)
                    {
                        adjustments += 1;
                    }
                }
            }
        }
        (requests, adjustments)
    }

    fn decide_send_now(
        &self,
        end_of_video_block: bool,
        video_requests: usize,
        video_adjustments: usize,
    ) -> bool {
        let model = match &self.model {
            Some(m) => m,
            None => return false,
        };
        if !model.has_camera {
            return true;
        }
        if model.clock_sync_type == ClockSyncType::None {
            return true;
        }
        if self.update_in_progress || end_of_video_block {
            return true;
        }
        if let Some(first) = self.queue_radio.time_first_packet() {
            if self.time_now - first > QUEUE_FLUSH_AGE {
                return true;
            }
        }
        video_requests > 0 || video_adjustments > 0
    }

    // ---- local broadcasts -------------------------------------------------

    fn local_control_packet(&self, packet_type: PacketType, dest: u32) -> Vec<u8> {
        let header = PacketHeader::new(
            PacketComponent::LocalControl,
            packet_type,
            LOCAL_SOURCE_ID,
            dest,
        );
        compose_packet(&header, &[]).expect("local control packet always fits")
    }

    fn broadcast_router_ready(&mut self) {
        let message = self.local_control_packet(PacketType::RouterReady, 0);
        self.send_to_channel(ChannelId::RouterToCentral, &message);
        self.send_to_channel(ChannelId::RouterToTelemetry, &message);
        log::info!("broadcast: router ready");
    }

    fn broadcast_interface_init_failed(&mut self, iface: usize) {
        let message =
            self.local_control_packet(PacketType::RadioInterfaceFailedToInit, iface as u32);
        self.send_to_channel(ChannelId::RouterToCentral, &message);
        log::info!("told central that interface {} failed to initialize", iface);
    }

    pub(crate) fn send_alarm_to_central(&mut self, alarm: AlarmId, param: u32, count: u32) {
        let header = PacketHeader::new(
            PacketComponent::LocalControl,
            PacketType::Alarm,
            LOCAL_SOURCE_ID,
            0,
        );
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&(alarm as u32).to_le_bytes());
        payload.extend_from_slice(&param.to_le_bytes());
        payload.extend_from_slice(&count.to_le_bytes());
        let message = compose_packet(&header, &payload).expect("alarm packet always fits");
        self.send_to_channel(ChannelId::RouterToCentral, &message);
        log::warn!("alarm {:?} (param {}) sent to central", alarm, param);
    }

    // ---- snapshots and helpers --------------------------------------------

    fn publish_radio_stats(&mut self) {
        let snapshot = self.stats.snapshot(&self.cards);
        self.snapshots.radio_stats.publish(&snapshot);
    }

    fn settle_after_tuning(&mut self) {
        let delay = self.prefs.radio_settle_delay_ms.clamp(1, 200);
        self.timer.sleep(Duration::from_millis(delay as u64));
    }

    /// First writable interface serving `link`.
    pub(crate) fn interface_for_link(&self, link: usize) -> Option<usize> {
        self.cards
            .iter()
            .position(|card| card.assigned_link == Some(link) && card.opened_for_write)
    }

    // ---- external state changes -------------------------------------------

    /// Marks a firmware upload as running; the scheduler flushes per packet
    /// while set.
    pub fn set_update_in_progress(&mut self, in_progress: bool) {
        self.update_in_progress = in_progress;
    }

    /// Stops the pairing injector once the vehicle confirmed us.
    pub fn set_pairing_completed(&mut self) {
        self.pairing_completed = true;
    }

    pub fn is_pairing_completed(&self) -> bool {
        self.pairing_completed
    }

    pub(crate) fn pairing_active(&self) -> bool {
        !self.pairing_completed
    }

    /// Enqueues a packet for the radio as if it had arrived over IPC.
    pub fn enqueue_radio_packet(&mut self, packet: Vec<u8>) {
        let now = self.timer.now();
        self.queue_radio.push_back(packet, now);
    }

    // ---- introspection ----------------------------------------------------

    pub fn cards(&self) -> &[RadioInterfaceInfo] {
        &self.cards
    }

    pub fn radio(&self) -> &C::Radio {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut C::Radio {
        &mut self.radio
    }

    pub fn stats(&self) -> &RadioStats {
        &self.stats
    }

    pub fn radio_queue_len(&self) -> usize {
        self.queue_radio.len()
    }

    /// Reads back the published radio-stats snapshot, the way an external
    /// observer would.
    pub fn radio_stats_snapshot(&self) -> Option<RadioStatsSnapshot> {
        self.snapshots.radio_stats.read()
    }

    /// Reads back the published watchdog snapshot.
    pub fn watchdog_snapshot(&self) -> Option<ProcessWatchdogSnapshot> {
        self.snapshots.watchdog.read()
    }

    /// Reads back the published adaptive-video snapshot.
    pub fn adaptive_snapshot(&self) -> Option<AdaptiveVideoSnapshot> {
        self.snapshots.adaptive.read()
    }
}

// The outgoing scheduler and the control-packet injectors live in the
// `sched` and `ping` modules; both extend `Router` with further impl blocks
// so each policy stays reviewable on its own.

/// Stream index helper shared by the injectors.
impl<C: Config> Router<C> {
    pub(crate) fn next_stream_index(&mut self, stream: StreamId) -> u32 {
        self.streams.next_index(stream)
    }
}
