//! Periodic control-packet injection: clock-sync pings and pairing
//! requests.
//!
//! Pings rotate round-robin over the vehicle's links so every link gets
//! measured. On SiK links the ping is written straight to the serial radio
//! with a short header; everywhere else it is pushed to the *front* of the
//! radio queue so it leaves before any backlog.
//!
//! Pairing requests run until the vehicle confirms us, starting eagerly and
//! backing off one millisecond per attempt up to 400 ms.

use crate::bytes::{ByteWriter, ToBytes};
use crate::config::Config;
use crate::hw::RadioTransport;
use crate::model::ClockSyncType;
use crate::packet::{
    compose_packet, PacketComponent, PacketHeader, PacketType, ShortHeader, StreamId,
    SHORT_HEADER_LEN,
};
use crate::router::Router;
use crate::stats::LINK_STATS_SLICE_INTERVAL;
use crate::time::Duration;

/// Ceiling of the pairing-request backoff.
const PAIRING_INTERVAL_MAX_MS: u64 = 400;

impl<C: Config> Router<C> {
    /// Ping interval for the current model, in milliseconds.
    ///
    /// Tighter clock sync wants more frequent pings; adaptive video caps
    /// the interval because its feedback rides along.
    pub(crate) fn ping_interval_ms(&self) -> u64 {
        let model = match &self.model {
            Some(m) => m,
            None => return 0,
        };
        let mut interval = match model.clock_sync_type {
            ClockSyncType::None => 500,
            ClockSyncType::Basic => 250,
            ClockSyncType::Advanced => 100,
        };
        if model.video_profile.adaptive_video {
            interval = interval.min(100);
        }
        interval
    }

    /// Whether a ping is due this tick.
    fn must_inject_ping_now(&self) -> bool {
        let model = match &self.model {
            Some(m) => m,
            None => return false,
        };
        if model.must_sync_from_vehicle || model.is_spectator {
            return false;
        }
        if self.search_frequency_khz.is_some() {
            return false;
        }
        let interval_us = self.ping_interval_ms() * 1_000;
        let now_us = self.time_now.micros();
        // The second comparison catches a clock that moved backwards.
        now_us > self.last_ping_send_micros + interval_us || now_us < self.last_ping_send_micros
    }

    /// Injects one clock-sync ping if it is due. Returns whether one was
    /// generated.
    pub(crate) fn check_send_ping(&mut self) -> bool {
        if !self.must_inject_ping_now() {
            return false;
        }

        self.last_ping_send_micros = self.time_now.micros();
        self.last_ping_id = self.last_ping_id.wrapping_add(1);

        let (vehicle_id, link_count, adaptive, wants_controller_stats) = {
            let model = self.model.as_ref().expect("checked by must_inject_ping_now");
            (
                model.vehicle_id,
                model.links.len(),
                model.video_profile.adaptive_video,
                model.video_profile.adaptive_uses_controller_info,
            )
        };
        if link_count == 0 {
            return false;
        }

        // Rotate to the next link that is actually in service.
        let mut rotations = 0;
        loop {
            self.last_ping_link += 1;
            if self.last_ping_link >= link_count {
                self.last_ping_link = 0;
            }
            rotations += 1;
            let usable = {
                let model = self.model.as_ref().expect("checked above");
                model
                    .link(self.last_ping_link)
                    .map(|l| !l.is_disabled() && !l.is_relay())
                    .unwrap_or(false)
            };
            if usable {
                break;
            }
            if rotations >= link_count {
                return false;
            }
        }
        let link = self.last_ping_link;
        let ping_id = self.last_ping_id;

        let link_is_sik = {
            let model = self.model.as_ref().expect("checked above");
            model.link_is_sik(link, &self.cards)
        };
        if link_is_sik {
            return self.send_sik_ping(vehicle_id, link, ping_id);
        }

        let mut header = PacketHeader::new(
            PacketComponent::LinkControl,
            PacketType::PingClock,
            self.settings.controller_id,
            vehicle_id,
        );
        header.stream_packet_idx = self.next_stream_index(StreamId::Data);

        let mut payload = vec![ping_id, link as u8];
        let stats_due = self.time_now - self.last_link_stats_sent
            > Duration::from_micros(LINK_STATS_SLICE_INTERVAL.as_micros() / 2);
        if adaptive && wants_controller_stats && stats_due {
            payload.extend_from_slice(&self.link_stats.to_payload(self.cards.len()));
            self.last_link_stats_sent = self.time_now;
        }

        match compose_packet(&header, &payload) {
            Ok(frame) => {
                self.queue_radio.push_front(frame, self.time_now);
                true
            }
            Err(e) => {
                log::warn!("could not build ping packet: {}", e);
                false
            }
        }
    }

    /// Writes a short-header ping straight to the SiK interface serving
    /// `link`.
    fn send_sik_ping(&mut self, vehicle_id: u32, link: usize, ping_id: u8) -> bool {
        let iface = match self.interface_for_link(link) {
            Some(i) => i,
            None => return false,
        };

        let mut full = PacketHeader::new(
            PacketComponent::LinkControl,
            PacketType::PingClock,
            self.settings.controller_id,
            vehicle_id,
        );
        full.stream_packet_idx = self.next_stream_index(StreamId::Data);
        full.set_payload_length(2);
        let short = ShortHeader::from_full(&full, self.streams.next_short_index());

        let mut buf = [0u8; SHORT_HEADER_LEN + 2];
        {
            let mut writer = ByteWriter::new(&mut buf);
            if short.to_bytes(&mut writer).is_err() {
                return false;
            }
            let _ = writer.write_u8(ping_id);
            let _ = writer.write_u8(link as u8);
        }

        match self.radio.write_frame(iface, &buf) {
            Ok(n) => {
                self.stats.on_packet_sent(iface, n);
                self.stats.on_link_sent(link, StreamId::Data as u8, n, 1);
                true
            }
            Err(_) => {
                self.stats.on_send_failed(iface);
                // A dropped ping is not worth requeueing; the next one is
                // at most a few hundred milliseconds away.
                true
            }
        }
    }

    /// Repeated pairing requests until the vehicle confirms this
    /// controller.
    pub(crate) fn pairing_periodic(&mut self) {
        if !self.pairing_active() || self.search_frequency_khz.is_some() {
            return;
        }
        let (vehicle_id, spectator) = match &self.model {
            Some(m) => (m.vehicle_id, m.is_spectator),
            None => return,
        };
        if spectator {
            return;
        }
        if self.time_now.millis() <= self.last_pairing_send.millis() + self.pairing_interval_ms {
            return;
        }

        self.pairing_sent_count += 1;
        self.last_pairing_send = self.time_now;
        if self.pairing_interval_ms < PAIRING_INTERVAL_MAX_MS {
            self.pairing_interval_ms += 1;
        }

        let mut header = PacketHeader::new(
            PacketComponent::LinkControl,
            PacketType::PairingRequest,
            self.settings.controller_id,
            vehicle_id,
        );
        header.stream_packet_idx = self.next_stream_index(StreamId::Data);
        let payload = self.pairing_sent_count.to_le_bytes();

        match compose_packet(&header, &payload) {
            Ok(frame) => {
                self.send_frame_to_radio_interfaces(&frame);
            }
            Err(e) => log::warn!("could not build pairing request: {}", e),
        }

        if self.pairing_sent_count % 5 == 0 {
            log::info!(
                "pairing request {} sent (controller {}, vehicle {})",
                self.pairing_sent_count,
                self.settings.controller_id,
                vehicle_id
            );
        }
    }
}
