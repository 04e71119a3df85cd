//! The paired vehicle's model and the controller-side settings.
//!
//! The model describes what the vehicle exposes: its logical radio links,
//! clock-sync behavior, camera and audio capabilities. It is loaded by the
//! embedding process (the on-disk format is not the router's business) and
//! read-only from the router's point of view.

use crate::hw::RadioCaps;

/// How the vehicle and controller agree on a common clock.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClockSyncType {
    /// No sync; the controller transmits whenever it has something.
    None,
    /// Coarse sync off the ping round trip.
    Basic,
    /// Tight sync; transmissions are slotted around video blocks.
    Advanced,
}

/// Payload encryption configured on the vehicle.
///
/// The router never de- or encrypts anything; it only refuses to start when
/// the vehicle demands encryption and no key is installed on the controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EncryptionFlags {
    None,
    Data,
    Video,
    All,
}

/// One logical radio link the vehicle exposes.
#[derive(Clone, Debug)]
pub struct RadioLinkParams {
    pub frequency_khz: u32,
    pub caps: RadioCaps,
    /// Downlink data rate in bps (negative values select MCS indices).
    pub datarate_video_bps: i32,
    pub datarate_data_bps: i32,
}

impl RadioLinkParams {
    pub fn is_disabled(&self) -> bool {
        self.caps.contains(RadioCaps::DISABLED)
    }

    pub fn is_relay(&self) -> bool {
        self.caps.contains(RadioCaps::USED_FOR_RELAY)
    }
}

/// Video encoding flags of the selected video profile.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct VideoProfileFlags {
    /// Vehicle adjusts video parameters based on link quality.
    pub adaptive_video: bool,
    /// Adaptive video additionally wants controller-side link stats.
    pub adaptive_uses_controller_info: bool,
}

/// Audio downlink capabilities of the vehicle.
#[derive(Copy, Clone, Debug, Default)]
pub struct AudioParams {
    pub enabled: bool,
    pub has_audio_device: bool,
}

/// Everything the router needs to know about the paired vehicle.
#[derive(Clone, Debug)]
pub struct VehicleModel {
    pub vehicle_id: u32,
    /// Software version, major in the high 16 bits.
    pub sw_version: u32,
    /// Spectator controllers listen only and never transmit.
    pub is_spectator: bool,
    /// Set until the first full settings sync from the vehicle arrives;
    /// suppresses pings meanwhile.
    pub must_sync_from_vehicle: bool,
    pub clock_sync_type: ClockSyncType,
    pub enc_flags: EncryptionFlags,
    pub links: Vec<RadioLinkParams>,
    pub audio: AudioParams,
    pub video_profile: VideoProfileFlags,
    pub has_camera: bool,
    /// OSD wants the video-info stats regions refreshed.
    pub osd_shows_video_stats: bool,
}

impl VehicleModel {
    pub fn sw_version_major(&self) -> u32 {
        self.sw_version >> 16
    }

    pub fn link(&self, index: usize) -> Option<&RadioLinkParams> {
        self.links.get(index)
    }

    /// Whether link `index` is served by a SiK card in the given inventory.
    pub fn link_is_sik(&self, index: usize, cards: &[crate::hw::RadioInterfaceInfo]) -> bool {
        cards
            .iter()
            .any(|c| c.assigned_link == Some(index) && c.is_sik())
    }
}

/// Tunables persisted on the controller, loaded by the embedder.
#[derive(Clone, Debug)]
pub struct Preferences {
    /// Soft cap on one composed radio frame's data portion.
    pub max_radio_packet_size: usize,
    /// Settle time between retuning the cards and opening them.
    pub radio_settle_delay_ms: u32,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            max_radio_packet_size: 900,
            radio_settle_delay_ms: 50,
        }
    }
}

/// Controller identity and observability settings.
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Stable 32-bit id stamped as the source of every outgoing packet.
    pub controller_id: u32,
    /// Refresh interval of the published radio-stats rates.
    pub stats_refresh_interval_ms: u32,
    /// Installed pairing key, if any.
    pub encryption_key: Option<Vec<u8>>,
    /// User-pinned main connect frequency for the current vehicle, 0 if
    /// none was stored.
    pub main_connect_frequency_khz: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            controller_id: 0,
            stats_refresh_interval_ms: 100,
            encryption_key: None,
            main_connect_frequency_khz: 0,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A single-link 5.8 GHz model with a camera, used across the test
    /// suites.
    pub fn basic_model(links: Vec<RadioLinkParams>) -> VehicleModel {
        VehicleModel {
            vehicle_id: 0x55AA_0001,
            sw_version: 46 << 16,
            is_spectator: false,
            must_sync_from_vehicle: false,
            clock_sync_type: ClockSyncType::Basic,
            enc_flags: EncryptionFlags::None,
            links,
            audio: AudioParams::default(),
            video_profile: VideoProfileFlags::default(),
            has_camera: true,
            osd_shows_video_stats: false,
        }
    }

    pub fn data_link(frequency_khz: u32) -> RadioLinkParams {
        RadioLinkParams {
            frequency_khz,
            caps: RadioCaps::CAN_RX | RadioCaps::CAN_TX | RadioCaps::CAN_USE_FOR_DATA
                | RadioCaps::CAN_USE_FOR_VIDEO,
            datarate_video_bps: 18_000_000,
            datarate_data_bps: 6_000_000,
        }
    }
}
