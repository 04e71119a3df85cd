//! Radio statistics and the plain-data snapshots published for observers.
//!
//! The router keeps the authoritative counters in [`RadioStats`] and copies
//! them into flat [`RadioStatsSnapshot`] structs for the UI and watchdog
//! processes. Snapshot structs are `zerocopy`-safe plain data: all fields
//! are 32-bit, no padding, so a whole-struct byte copy is a valid publish.

use crate::hw::MAX_RADIO_INTERFACES;
use crate::packet::MAX_STREAMS;
use crate::time::{Duration, Instant};
use zerocopy::{AsBytes, FromBytes};

/// Number of vehicles the adaptive-video bookkeeping can track.
pub const MAX_CONCURRENT_VEHICLES: usize = 4;

/// Live counters for one radio interface.
#[derive(Copy, Clone, Debug, Default)]
pub struct InterfaceCounters {
    pub rx_packets: u32,
    pub rx_bytes: u32,
    pub rx_crc_errors: u32,
    pub tx_packets: u32,
    pub tx_bytes: u32,
    pub tx_failed: u32,
}

/// Live counters for one logical link.
#[derive(Copy, Clone, Debug, Default)]
pub struct LinkCounters {
    pub rx_packets: u32,
    pub tx_packets: u32,
    pub tx_bytes: u32,
}

/// Live counters for one packet stream.
#[derive(Copy, Clone, Debug, Default)]
pub struct StreamCountersStats {
    pub tx_packets: u32,
    pub tx_bytes: u32,
    pub rx_packets: u32,
}

/// The authoritative radio statistics, single-threaded, owned by the router.
pub struct RadioStats {
    pub interfaces: [InterfaceCounters; MAX_RADIO_INTERFACES],
    pub links: [LinkCounters; MAX_RADIO_INTERFACES],
    pub streams: [StreamCountersStats; MAX_STREAMS],
    pub interface_count: usize,
    pub link_count: usize,
    refresh_interval: Duration,
    last_refresh: Instant,
    /// Byte throughput per interface over the last refresh slice.
    rx_rate_bps: [u32; MAX_RADIO_INTERFACES],
    rx_bytes_at_refresh: [u32; MAX_RADIO_INTERFACES],
}

impl RadioStats {
    pub fn new(refresh_interval_ms: u32) -> Self {
        RadioStats {
            interfaces: Default::default(),
            links: Default::default(),
            streams: Default::default(),
            interface_count: 0,
            link_count: 0,
            refresh_interval: Duration::from_millis(refresh_interval_ms.max(10) as u64),
            last_refresh: Instant::default(),
            rx_rate_bps: [0; MAX_RADIO_INTERFACES],
            rx_bytes_at_refresh: [0; MAX_RADIO_INTERFACES],
        }
    }

    pub fn on_packet_received(&mut self, iface: usize, link: Option<usize>, len: usize) {
        if let Some(c) = self.interfaces.get_mut(iface) {
            c.rx_packets = c.rx_packets.wrapping_add(1);
            c.rx_bytes = c.rx_bytes.wrapping_add(len as u32);
        }
        if let Some(l) = link.and_then(|l| self.links.get_mut(l)) {
            l.rx_packets = l.rx_packets.wrapping_add(1);
        }
    }

    pub fn on_crc_error(&mut self, iface: usize) {
        if let Some(c) = self.interfaces.get_mut(iface) {
            c.rx_crc_errors = c.rx_crc_errors.wrapping_add(1);
        }
    }

    pub fn on_packet_sent(&mut self, iface: usize, len: usize) {
        if let Some(c) = self.interfaces.get_mut(iface) {
            c.tx_packets = c.tx_packets.wrapping_add(1);
            c.tx_bytes = c.tx_bytes.wrapping_add(len as u32);
        }
    }

    pub fn on_send_failed(&mut self, iface: usize) {
        if let Some(c) = self.interfaces.get_mut(iface) {
            c.tx_failed = c.tx_failed.wrapping_add(1);
        }
    }

    pub fn on_link_sent(&mut self, link: usize, stream: u8, len: usize, packets: u32) {
        if let Some(l) = self.links.get_mut(link) {
            l.tx_packets = l.tx_packets.wrapping_add(packets);
            l.tx_bytes = l.tx_bytes.wrapping_add(len as u32);
        }
        if let Some(s) = self.streams.get_mut(stream as usize) {
            s.tx_packets = s.tx_packets.wrapping_add(packets);
            s.tx_bytes = s.tx_bytes.wrapping_add(len as u32);
        }
    }

    pub fn on_stream_received(&mut self, stream: u8) {
        if let Some(s) = self.streams.get_mut(stream as usize) {
            s.rx_packets = s.rx_packets.wrapping_add(1);
        }
    }

    /// Recomputes the per-interface rates once per refresh interval.
    ///
    /// Returns `true` when a refresh happened and the published snapshot is
    /// stale.
    pub fn periodic_update(&mut self, now: Instant) -> bool {
        let elapsed = now - self.last_refresh;
        if elapsed < self.refresh_interval {
            return false;
        }
        let elapsed_ms = elapsed.as_millis().max(1);
        for i in 0..MAX_RADIO_INTERFACES {
            let bytes = self.interfaces[i]
                .rx_bytes
                .wrapping_sub(self.rx_bytes_at_refresh[i]);
            self.rx_rate_bps[i] = (bytes as u64 * 8 * 1_000 / elapsed_ms) as u32;
            self.rx_bytes_at_refresh[i] = self.interfaces[i].rx_bytes;
        }
        self.last_refresh = now;
        true
    }

    /// Flattens the counters into the publishable snapshot.
    pub fn snapshot(&self, cards: &[crate::hw::RadioInterfaceInfo]) -> RadioStatsSnapshot {
        let mut snap = RadioStatsSnapshot::new_zeroed();
        snap.interface_count = self.interface_count as u32;
        snap.link_count = self.link_count as u32;
        for (i, c) in self.interfaces.iter().enumerate() {
            let entry = &mut snap.interfaces[i];
            entry.rx_packets = c.rx_packets;
            entry.rx_bytes = c.rx_bytes;
            entry.rx_crc_errors = c.rx_crc_errors;
            entry.tx_packets = c.tx_packets;
            entry.tx_bytes = c.tx_bytes;
            entry.tx_failed = c.tx_failed;
            entry.rx_rate_bps = self.rx_rate_bps[i];
            if let Some(card) = cards.get(i) {
                entry.opened_for_read = card.opened_for_read as u32;
                entry.opened_for_write = card.opened_for_write as u32;
                entry.current_frequency_khz = card.current_frequency_khz;
                entry.assigned_link = card.assigned_link.map(|l| l as i32).unwrap_or(-1);
            } else {
                entry.assigned_link = -1;
            }
        }
        for (i, l) in self.links.iter().enumerate() {
            snap.links[i].rx_packets = l.rx_packets;
            snap.links[i].tx_packets = l.tx_packets;
            snap.links[i].tx_bytes = l.tx_bytes;
        }
        snap
    }
}

/// Published per-interface statistics. Plain data.
#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes)]
pub struct InterfaceStatsSnapshot {
    pub rx_packets: u32,
    pub rx_bytes: u32,
    pub rx_crc_errors: u32,
    pub rx_rate_bps: u32,
    pub tx_packets: u32,
    pub tx_bytes: u32,
    pub tx_failed: u32,
    pub opened_for_read: u32,
    pub opened_for_write: u32,
    pub current_frequency_khz: u32,
    pub assigned_link: i32,
}

/// Published per-link statistics. Plain data.
#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes)]
pub struct LinkStatsSnapshot {
    pub rx_packets: u32,
    pub tx_packets: u32,
    pub tx_bytes: u32,
}

/// The radio statistics snapshot shared with the UI processes.
#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes)]
pub struct RadioStatsSnapshot {
    pub interface_count: u32,
    pub link_count: u32,
    pub interfaces: [InterfaceStatsSnapshot; MAX_RADIO_INTERFACES],
    pub links: [LinkStatsSnapshot; MAX_RADIO_INTERFACES],
}

impl RadioStatsSnapshot {
    pub fn new_zeroed() -> Self {
        FromBytes::new_zeroed()
    }
}

/// Watchdog view of the router process. Plain data.
#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct ProcessWatchdogSnapshot {
    pub loop_counter: u32,
    pub last_active_time_ms: u32,
    pub last_ipc_incoming_ms: u32,
    pub last_ipc_outgoing_ms: u32,
    pub max_loop_time_ms: u32,
    pub total_loop_time_ms: u32,
    pub average_loop_time_ms: u32,
    pub alarm_flags: u32,
    pub alarm_time_ms: u32,
}

/// Adaptive-video bookkeeping for one vehicle. Plain data.
#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct VehicleAdaptiveInfo {
    pub vehicle_id: u32,
    pub last_requested_level_shift: i32,
    pub last_update_time_ms: u32,
}

/// Controller-side adaptive-video state, published for the video pipeline.
#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct AdaptiveVideoSnapshot {
    pub vehicle_count: u32,
    pub vehicles: [VehicleAdaptiveInfo; MAX_CONCURRENT_VEHICLES],
}

impl AdaptiveVideoSnapshot {
    /// Records a requested level shift for `vehicle_id`; returns whether the
    /// vehicle was known.
    pub fn record_level_shift(&mut self, vehicle_id: u32, level: i32, now_ms: u32) -> bool {
        for v in self.vehicles.iter_mut().take(self.vehicle_count as usize) {
            if v.vehicle_id == vehicle_id {
                v.last_requested_level_shift = level;
                v.last_update_time_ms = now_ms;
                return true;
            }
        }
        false
    }
}

/// Coarse video stream statistics. Plain data.
#[repr(C)]
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
pub struct VideoInfoSnapshot {
    pub time_last_update_ms: u32,
    pub packets: u32,
    pub bytes: u32,
    pub blocks_completed: u32,
}

/// Per-link receive quality history, appended to pings when the vehicle's
/// adaptive video wants controller-side feedback.
pub struct ControllerLinkStats {
    quality: [u8; MAX_RADIO_INTERFACES],
    rx_at_slice: [u32; MAX_RADIO_INTERFACES],
    crc_err_at_slice: [u32; MAX_RADIO_INTERFACES],
    last_slice: Instant,
}

/// History slice width for the controller link stats.
pub const LINK_STATS_SLICE_INTERVAL: Duration = Duration::from_millis(200);

impl ControllerLinkStats {
    pub fn new() -> Self {
        ControllerLinkStats {
            quality: [0; MAX_RADIO_INTERFACES],
            rx_at_slice: [0; MAX_RADIO_INTERFACES],
            crc_err_at_slice: [0; MAX_RADIO_INTERFACES],
            last_slice: Instant::default(),
        }
    }

    /// Rolls the history forward once per slice interval.
    pub fn periodic_update(&mut self, stats: &RadioStats, now: Instant) {
        if now - self.last_slice < LINK_STATS_SLICE_INTERVAL {
            return;
        }
        self.last_slice = now;
        for i in 0..MAX_RADIO_INTERFACES {
            let good = stats.interfaces[i].rx_packets.wrapping_sub(self.rx_at_slice[i]);
            let bad = stats.interfaces[i]
                .rx_crc_errors
                .wrapping_sub(self.crc_err_at_slice[i]);
            self.rx_at_slice[i] = stats.interfaces[i].rx_packets;
            self.crc_err_at_slice[i] = stats.interfaces[i].rx_crc_errors;
            let total = good + bad;
            self.quality[i] = if total == 0 {
                0
            } else {
                (good * 100 / total) as u8
            };
        }
    }

    /// Serialized form carried in ping payloads: a count byte followed by
    /// one quality byte per interface.
    pub fn to_payload(&self, interface_count: usize) -> Vec<u8> {
        let count = interface_count.min(MAX_RADIO_INTERFACES);
        let mut out = Vec::with_capacity(1 + count);
        out.push(count as u8);
        out.extend_from_slice(&self.quality[..count]);
        out
    }
}

impl Default for ControllerLinkStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem;

    #[test]
    fn snapshots_are_padding_free() {
        // AsBytes already guarantees this at compile time; the size checks
        // document the wire layout.
        assert_eq!(mem::size_of::<InterfaceStatsSnapshot>(), 11 * 4);
        assert_eq!(mem::size_of::<LinkStatsSnapshot>(), 3 * 4);
        assert_eq!(
            mem::size_of::<RadioStatsSnapshot>(),
            2 * 4 + MAX_RADIO_INTERFACES * (11 * 4 + 3 * 4)
        );
    }

    #[test]
    fn counters_flow_into_snapshot() {
        let mut stats = RadioStats::new(100);
        stats.interface_count = 2;
        stats.on_packet_received(0, Some(0), 100);
        stats.on_packet_received(0, Some(0), 50);
        stats.on_packet_sent(1, 30);
        stats.on_send_failed(1);
        stats.on_link_sent(0, 0, 30, 1);

        let snap = stats.snapshot(&[]);
        assert_eq!(snap.interfaces[0].rx_packets, 2);
        assert_eq!(snap.interfaces[0].rx_bytes, 150);
        assert_eq!(snap.interfaces[1].tx_packets, 1);
        assert_eq!(snap.interfaces[1].tx_failed, 1);
        assert_eq!(snap.links[0].tx_bytes, 30);
        assert_eq!(snap.interfaces[2].assigned_link, -1);
    }

    #[test]
    fn periodic_update_respects_interval() {
        let mut stats = RadioStats::new(100);
        let t0 = Instant::from_micros(0);
        assert!(stats.periodic_update(t0 + Duration::from_millis(100)));
        assert!(!stats.periodic_update(t0 + Duration::from_millis(150)));
        assert!(stats.periodic_update(t0 + Duration::from_millis(210)));
    }

    #[test]
    fn link_quality_payload() {
        let mut stats = RadioStats::new(100);
        let mut link_stats = ControllerLinkStats::new();
        for _ in 0..9 {
            stats.on_packet_received(0, Some(0), 10);
        }
        stats.on_crc_error(0);
        link_stats.periodic_update(&stats, Instant::from_micros(300_000));

        let payload = link_stats.to_payload(2);
        assert_eq!(payload.len(), 3);
        assert_eq!(payload[0], 2);
        assert_eq!(payload[1], 90);
    }
}
