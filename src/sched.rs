//! The outgoing packet scheduler.
//!
//! Runs only on ticks the main loop marked as transmitting. Two passes over
//! the radio queue, kept separate on purpose:
//!
//! * **Retransmission pass**: video fragment resend requests are sent
//!   immediately, ahead of everything else, while staying in the queue
//!   (the coalescing pass later discards them).
//! * **Coalescing pass**: remaining packets are popped and concatenated
//!   into one composition buffer until adding another would exceed the
//!   frame limit, then the buffer is flushed to every writable interface.
//!
//! A radio-link-frequency command makes its frame go out ten times with a
//! small gap, because after it is applied nobody can hear a correction.
//! Every packet leaves with this controller's id as source and a fresh
//! checksum.

use crate::bytes::{ByteWriter, ToBytes};
use crate::config::{Config, Processors};
use crate::hw::RadioTransport;
use crate::packet::{
    self, PacketComponent, PacketHeader, PacketType, ShortHeader, MAX_PACKET_PAYLOAD,
    MAX_PACKET_TOTAL_SIZE, SHORT_HEADER_LEN,
};
use crate::router::Router;
use crate::time::{Duration, Timer};

/// Replication factor for frames carrying a frequency-change command.
const FREQUENCY_CHANGE_SEND_COUNT: usize = 10;

/// Cap on coalesced frames per scheduler run, reduced by the number of
/// pending retransmission requests.
const MAX_FRAMES_PER_RUN: isize = 4;

impl<C: Config> Router<C> {
    /// Drains the radio queue onto the wire.
    ///
    /// `pending_video_retransmissions` is the count the main loop saw while
    /// peeking the queue this tick.
    pub(crate) fn process_and_send_packets(&mut self, mut pending_video_retransmissions: usize) {
        let spectator = self.model.as_ref().map(|m| m.is_spectator).unwrap_or(true);
        if self.search_frequency_khz.is_some() || spectator {
            self.queue_radio.clear();
            return;
        }

        let sent_ping = self.check_send_ping();
        if !sent_ping && self.queue_radio.is_empty() {
            return;
        }

        let controller_id = self.settings.controller_id;
        let max_frame_len = self.prefs.max_radio_packet_size.min(MAX_PACKET_PAYLOAD);
        let mut composed = [0u8; MAX_PACKET_TOTAL_SIZE];
        let mut composed_len = 0usize;
        let mut send_count = 1usize;
        let mut frames_left = MAX_FRAMES_PER_RUN - pending_video_retransmissions as isize;

        // Retransmission-first pass: send the requests in queue order, in
        // place, without disturbing the rest of the queue.
        let mut index = 0;
        while pending_video_retransmissions > 0 && index < self.queue_radio.len() {
            let ready = {
                let stored = match self.queue_radio.peek_mut(index) {
                    Some(p) => p,
                    None => break,
                };
                match PacketHeader::parse(stored) {
                    Ok(header)
                        if header.component() == Some(PacketComponent::Video)
                            && header.packet_type.is_video_retransmission_request() =>
                    {
                        packet::rewrite_source_id(stored, controller_id);
                        if packet::seal_crc(stored).is_err() {
                            None
                        } else {
                            Some(stored.clone())
                        }
                    }
                    _ => None,
                }
            };
            if let Some(frame) = ready {
                self.send_frame_to_radio_interfaces(&frame);
                pending_video_retransmissions -= 1;
            }
            index += 1;
        }

        // Coalescing pass.
        while !self.queue_radio.is_empty() && frames_left > 0 {
            let mut packet_bytes = match self.queue_radio.pop() {
                Some(p) => p,
                None => break,
            };
            let header = match PacketHeader::parse(&packet_bytes) {
                Ok(h) => h,
                Err(e) => {
                    log::warn!("dropping malformed queued packet: {}", e);
                    continue;
                }
            };

            if header.component() == Some(PacketComponent::Commands)
                && header.packet_type == PacketType::CommandSetRadioLinkFlags
            {
                // Radio reconfiguration stalls the loop; the overload alarm
                // stays quiet for a while after this.
                self.last_radio_flags_command = self.time_now;
                log::info!("radio link flags command on its way to the vehicle");
            }

            packet::rewrite_source_id(&mut packet_bytes, controller_id);
            if packet::seal_crc(&mut packet_bytes).is_err() {
                log::warn!("dropping queued packet with bogus length field");
                continue;
            }

            // Already sent by the retransmission pass.
            if header.component() == Some(PacketComponent::Video)
                && header.packet_type.is_video_retransmission_request()
            {
                continue;
            }

            // A pending duplicated frame must go out alone; whatever follows
            // it does not deserve ten copies.
            let must_flush_first = composed_len + packet_bytes.len() > max_frame_len
                || self.update_in_progress
                || send_count != 1;
            if must_flush_first && composed_len > 0 {
                self.flush_composed(&composed[..composed_len], send_count);
                frames_left -= 1;
                composed_len = 0;
                send_count = 1;
            }

            if header.component() == Some(PacketComponent::Commands) {
                if header.packet_type == PacketType::CommandSetRadioLinkFrequency {
                    send_count = FREQUENCY_CHANGE_SEND_COUNT;
                }
                if header.packet_type == PacketType::CommandSetCameraParameters {
                    self.processors.on_camera_params_command();
                }
            }

            if composed_len + packet_bytes.len() > composed.len() {
                log::warn!(
                    "dropping oversized packet ({} bytes) from the radio queue",
                    packet_bytes.len()
                );
                continue;
            }
            composed[composed_len..composed_len + packet_bytes.len()]
                .copy_from_slice(&packet_bytes);
            composed_len += packet_bytes.len();
        }

        if composed_len > 0 {
            self.flush_composed(&composed[..composed_len], send_count);
        }
    }

    /// Writes one composed frame `send_count` times with a small gap
    /// between repeats.
    fn flush_composed(&mut self, frame: &[u8], send_count: usize) {
        for repeat in 0..send_count {
            if repeat != 0 {
                self.timer.sleep(Duration::DUPLICATE_SEND_GAP);
            }
            self.send_frame_to_radio_interfaces(frame);
        }
    }

    /// Fans a frame out to every writable interface serving an active link.
    ///
    /// Returns whether at least one interface took the frame.
    pub(crate) fn send_frame_to_radio_interfaces(&mut self, frame: &[u8]) -> bool {
        let stream_id = PacketHeader::parse(frame)
            .map(|h| h.stream_id())
            .unwrap_or(0);
        let packets_in_frame = packet::SubPackets::new(frame).count() as u32;

        let mut any_sent = false;
        let mut links_sent: Vec<usize> = Vec::new();

        for i in 0..self.cards.len() {
            let (opened, link, is_sik) = {
                let card = &self.cards[i];
                (card.opened_for_write, card.assigned_link, card.is_sik())
            };
            if !opened {
                continue;
            }
            let link = match link {
                Some(l) => l,
                None => continue,
            };
            let active = self
                .model
                .as_ref()
                .and_then(|m| m.link(link))
                .map(|p| !p.is_disabled() && !p.is_relay())
                .unwrap_or(false);
            if !active {
                continue;
            }

            let written = if is_sik {
                self.write_frame_as_short(i, frame)
            } else {
                self.radio.write_frame(i, frame).ok()
            };

            match written {
                Some(n) => {
                    self.stats.on_packet_sent(i, n);
                    any_sent = true;
                    if !links_sent.contains(&link) {
                        links_sent.push(link);
                    }
                }
                None => self.stats.on_send_failed(i),
            }
        }

        for link in links_sent {
            self.stats
                .on_link_sent(link, stream_id, frame.len(), packets_in_frame.max(1));
        }
        any_sent
    }

    /// Re-frames every sub-packet with a [`ShortHeader`] and writes them
    /// individually; SiK radios cannot carry the full prefix.
    fn write_frame_as_short(&mut self, iface: usize, frame: &[u8]) -> Option<usize> {
        let mut total_written = 0;
        let mut wrote_any = false;

        // Collect first: the writes below need `&mut self.radio` while the
        // iterator borrows the frame.
        let subs: Vec<&[u8]> = packet::SubPackets::new(frame).collect();
        for sub in subs {
            let header = match PacketHeader::parse(sub) {
                Ok(h) => h,
                Err(_) => continue,
            };
            let short = ShortHeader::from_full(&header, self.streams.next_short_index());
            let payload_start = (header.total_headers_length as usize).min(sub.len());
            let payload = &sub[payload_start..];

            let mut buf = vec![0u8; SHORT_HEADER_LEN + payload.len()];
            {
                let mut writer = ByteWriter::new(&mut buf);
                if short.to_bytes(&mut writer).is_err() {
                    continue;
                }
                if writer.write_slice(payload).is_err() {
                    continue;
                }
            }
            match self.radio.write_frame(iface, &buf) {
                Ok(n) => {
                    total_written += n;
                    wrote_any = true;
                }
                Err(_) => return None,
            }
        }
        wrote_any.then_some(total_written)
    }
}
