//! Hosted demo station.
//!
//! Wires the router core to in-memory transports so the whole control flow
//! can be exercised on a development machine: a simulated radio, loopback
//! IPC channels and a real storage probe. A deployment replaces this file's
//! `Config` with the platform's radio drivers and pipe transports.

use groundlink::cli::{self, Command};
use groundlink::config::{Config, NullProcessors, Platform};
use groundlink::hw::{RadioCaps, RadioInterfaceInfo, RadioType, SimRadio};
use groundlink::ipc::{Endpoints, MemoryChannel};
use groundlink::model::{
    AudioParams, ClockSyncType, ControllerSettings, EncryptionFlags, Preferences,
    RadioLinkParams, VehicleModel, VideoProfileFlags,
};
use groundlink::router::{Router, RouterInit};
use groundlink::time::StdTimer;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Sentinel dropped by Central after the first successful pairing.
const FIRST_PAIRING_SENTINEL: &str = "/tmp/groundlink-first-pairing-done";

/// Frequency of the demo vehicle's single link.
const DEMO_FREQUENCY_KHZ: u32 = 5_745_000;

static QUIT: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_signal(_sig: libc::c_int) {
    if let Some(flag) = QUIT.get() {
        flag.store(true, Ordering::Relaxed);
    }
}

fn install_signal_handlers(quit: Arc<AtomicBool>) {
    let _ = QUIT.set(quit);
    let handler = on_signal as extern "C" fn(libc::c_int);
    unsafe {
        // A consumer closing its pipe must not kill the router.
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        libc::signal(libc::SIGINT, handler as usize as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as usize as libc::sighandler_t);
        libc::signal(libc::SIGQUIT, handler as usize as libc::sighandler_t);
    }
}

/// OS services of a real station.
struct StationPlatform;

impl Platform for StationPlatform {
    fn free_storage_mb(&mut self) -> Option<u32> {
        let path = std::ffi::CString::new("/").ok()?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(path.as_ptr(), &mut stat) };
        if rc != 0 {
            return None;
        }
        let free_bytes = stat.f_bavail as u64 * stat.f_frsize as u64;
        Some((free_bytes / (1024 * 1024)) as u32)
    }

    fn first_pairing_done(&self) -> bool {
        Path::new(FIRST_PAIRING_SENTINEL).exists()
    }
}

struct Station;

impl Config for Station {
    type Timer = StdTimer;
    type Radio = SimRadio;
    type Ipc = MemoryChannel;
    type Processors = NullProcessors;
    type Platform = StationPlatform;
}

fn demo_cards() -> Vec<RadioInterfaceInfo> {
    let caps = RadioCaps::CAN_RX
        | RadioCaps::CAN_TX
        | RadioCaps::CAN_USE_FOR_VIDEO
        | RadioCaps::CAN_USE_FOR_DATA;
    vec![
        RadioInterfaceInfo::new(
            "00:0a:52:00:00:01",
            "wlan0",
            RadioType::Realtek,
            caps,
            vec![DEMO_FREQUENCY_KHZ, 5_805_000],
        ),
        RadioInterfaceInfo::new(
            "00:0a:52:00:00:02",
            "wlan1",
            RadioType::Realtek,
            caps,
            vec![DEMO_FREQUENCY_KHZ],
        ),
    ]
}

fn demo_model() -> VehicleModel {
    VehicleModel {
        vehicle_id: 0x10C0_FFEE,
        sw_version: 46 << 16,
        is_spectator: false,
        must_sync_from_vehicle: false,
        clock_sync_type: ClockSyncType::Basic,
        enc_flags: EncryptionFlags::None,
        links: vec![RadioLinkParams {
            frequency_khz: DEMO_FREQUENCY_KHZ,
            caps: RadioCaps::CAN_RX
                | RadioCaps::CAN_TX
                | RadioCaps::CAN_USE_FOR_VIDEO
                | RadioCaps::CAN_USE_FOR_DATA,
            datarate_video_bps: 18_000_000,
            datarate_data_bps: 6_000_000,
        }],
        audio: AudioParams::default(),
        video_profile: VideoProfileFlags::default(),
        has_camera: true,
        osd_shows_video_stats: false,
    }
}

/// Builds the six loopback channels, dropping the far ends: in the demo
/// there is nobody on the other side, which exercises the degraded paths.
fn loopback_endpoints() -> Endpoints<MemoryChannel> {
    let (from_central, _central_tx) = MemoryChannel::pair();
    let (to_central, _central_rx) = MemoryChannel::pair();
    let (from_telemetry, _telemetry_tx) = MemoryChannel::pair();
    let (to_telemetry, _telemetry_rx) = MemoryChannel::pair();
    let (from_rc, _rc_tx) = MemoryChannel::pair();
    let (to_rc, _rc_rx) = MemoryChannel::pair();
    Endpoints {
        from_central,
        to_central,
        from_telemetry,
        to_telemetry,
        from_rc,
        to_rc,
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match cli::parse_args(&args) {
        Command::PrintVersion => {
            println!("{}", cli::version_string());
            return;
        }
        Command::Run(options) => options,
    };

    let default_filter = if options.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let quit = Arc::new(AtomicBool::new(false));
    install_signal_handlers(quit.clone());

    if let Some(freq) = options.search_frequency_khz {
        log::info!("starting in search mode at {} kHz", freq);
    }

    let cards = demo_cards();
    let model = if options.search_frequency_khz.is_some() {
        None
    } else {
        Some(demo_model())
    };

    let init = RouterInit::<Station> {
        timer: StdTimer::new(),
        radio: SimRadio::new(cards.len()),
        ipc: loopback_endpoints(),
        processors: NullProcessors,
        platform: StationPlatform,
        cards,
        model,
        prefs: Preferences::default(),
        settings: ControllerSettings {
            controller_id: 0xC0DE_0001,
            ..ControllerSettings::default()
        },
        search_frequency_khz: options.search_frequency_khz,
        quit,
    };

    let mut router = match Router::new(init) {
        Ok(router) => router,
        Err(e) => {
            log::error!("router init failed: {}", e);
            std::process::exit(-1);
        }
    };
    if let Err(e) = router.start() {
        log::error!("router bring-up failed: {}", e);
        std::process::exit(-1);
    }

    router.run();
    log::info!("clean shutdown");
}
