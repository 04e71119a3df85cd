//! Router configuration trait.
//!
//! The router core is platform-agnostic: everything that touches hardware
//! or the OS goes through a trait. A [`Config`] implementation binds the
//! concrete types together; the embedding process defines one and hands the
//! instances to [`Router::new`](crate::router::Router::new).

use crate::hw::RadioTransport;
use crate::ipc::IpcChannel;
use crate::packet::PacketHeader;
use crate::time::{Instant, Timer};

/// Trait for router configurations.
///
/// Defines the platform services the router is built on. Tests and the demo
/// binary use in-memory implementations; a real station wires up the radio
/// drivers and named-pipe channels here.
pub trait Config {
    /// Monotonic time source with microsecond resolution.
    type Timer: Timer;

    /// Radio I/O, addressed by interface index.
    type Radio: RadioTransport;

    /// Message-framed IPC channel to a local process.
    type Ipc: IpcChannel;

    /// The downstream packet processors (video pipeline, control handler).
    type Processors: Processors;

    /// Remaining OS services (storage probe, pairing sentinel).
    type Platform: Platform;
}

/// Downstream consumers of routed packets.
///
/// The video FEC pipeline, the local-control handler and the audio output
/// live outside the router; this trait is their doorway. All methods are
/// called from the tick thread.
pub trait Processors {
    /// Handles one received radio packet that the router does not forward
    /// verbatim (video, link management, command responses).
    ///
    /// Returns `true` when the packet completed a video block; the router
    /// uses that as a transmit trigger.
    fn on_radio_packet(&mut self, header: &PacketHeader, packet: &[u8]) -> bool;

    /// Handles one local-control message drained from an IPC channel.
    fn on_control_packet(&mut self, packet: &[u8]);

    /// Periodic video pipeline hook; runs once per tick while the vehicle
    /// has a camera.
    fn video_periodic(&mut self, now: Instant);

    /// Side effect of a camera-parameters command passing through the
    /// scheduler: the adaptive video logic drops to a safe level.
    fn on_camera_params_command(&mut self);

    /// One segment of the audio downlink, ready for the local audio output.
    fn on_audio(&mut self, bytes: &[u8]);
}

/// OS services that do not fit the other seams.
pub trait Platform {
    /// Free space on the recording volume in MB, `None` when the probe is
    /// unavailable.
    fn free_storage_mb(&mut self) -> Option<u32>;

    /// Whether a first pairing was ever completed on this controller.
    fn first_pairing_done(&self) -> bool;
}

/// No-op [`Processors`] for routers that only shuttle packets (search mode,
/// the demo binary).
#[derive(Default)]
pub struct NullProcessors;

impl Processors for NullProcessors {
    fn on_radio_packet(&mut self, _header: &PacketHeader, _packet: &[u8]) -> bool {
        false
    }

    fn on_control_packet(&mut self, _packet: &[u8]) {}

    fn video_periodic(&mut self, _now: Instant) {}

    fn on_camera_params_command(&mut self) {}

    fn on_audio(&mut self, _bytes: &[u8]) {}
}

/// [`Platform`] that reports healthy storage and no pairing history.
#[derive(Default)]
pub struct NullPlatform;

impl Platform for NullPlatform {
    fn free_storage_mb(&mut self) -> Option<u32> {
        None
    }

    fn first_pairing_done(&self) -> bool {
        false
    }
}
