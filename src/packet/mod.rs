//! Radio packet framing.
//!
//! Every radio frame is one [`PacketHeader`] followed by its payload. The
//! header is a fixed little-endian prefix:
//!
//! ```notrust
//! offset  0       4      5        9        13       17        19      21      23
//!         +-------+------+--------+--------+--------+---------+-------+-------+-----+
//!         | flags | type | stream | src id | dst id | hdr len | total | extra | crc |
//!         |  u32  |  u8  |  u32   |  u32   |  u32   |   u16   |  u16  |  u16  | u32 |
//!         +-------+------+--------+--------+--------+---------+-------+-------+-----+
//! ```
//!
//! `total` covers header plus payload, so multiple packets can be
//! concatenated into one radio write and split again by walking the length
//! fields (see [`SubPackets`]). `crc` is a CRC-32 over `[0, total)` computed
//! with the crc field itself zeroed; it is sealed immediately before a frame
//! goes out on the air.
//!
//! SiK links cannot afford the full prefix and use [`ShortHeader`] instead;
//! those radios frame and checksum on their own, so the short variant has no
//! crc field.
//!
//! The low nibble of `flags` selects the component the packet belongs to
//! ([`PacketComponent`]); the upper bits are free-form [`PacketFlags`]. The
//! top 4 bits of `stream` carry the stream id, the lower 28 a per-stream
//! wrapping packet index.

mod queue;

pub use self::queue::PacketQueue;

use crate::bytes::{ByteReader, ByteWriter, FromBytes, ToBytes};
use crate::Error;
use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use core::fmt;
use crc::{Crc, CRC_32_ISO_HDLC};

/// Hard upper bound on one radio write (headers included).
pub const MAX_PACKET_TOTAL_SIZE: usize = 1250;

/// Upper bound on the data portion of one composed radio frame.
pub const MAX_PACKET_PAYLOAD: usize = 1150;

/// Serialized size of [`PacketHeader`].
pub const HEADER_LEN: usize = 27;

/// Serialized size of [`ShortHeader`].
pub const SHORT_HEADER_LEN: usize = 16;

const TYPE_OFFSET: usize = 4;
const SRC_ID_OFFSET: usize = 9;
const TOTAL_LENGTH_OFFSET: usize = 19;
const CRC_OFFSET: usize = 23;

/// Bits of `stream_packet_idx` holding the per-stream packet index.
pub const STREAM_INDEX_MASK: u32 = 0x0FFF_FFFF;

/// Shift of the stream id within `stream_packet_idx`.
pub const STREAM_ID_SHIFT: u32 = 28;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

bitflags! {
    /// Upper bits of the header `flags` word (the low nibble is the
    /// component, see [`PacketComponent`]).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u32 {
        /// Payload is encrypted end to end. The router forwards such packets
        /// untouched; it never holds the key.
        const ENCRYPTED = 1 << 4;
        /// Receiver should confirm reception (used during uploads).
        const NEEDS_CONFIRMATION = 1 << 5;
    }
}

/// The subsystem a packet belongs to, stored in the low nibble of `flags`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketComponent {
    /// Link management: pings, pairing, session control.
    LinkControl = 0,
    /// Video downlink and video retransmission control.
    Video = 1,
    /// Telemetry downlink/uplink.
    Telemetry = 2,
    /// Commands from the controller to the vehicle.
    Commands = 3,
    /// RC channel uplink.
    Rc = 4,
    /// Never leaves the ground: messages between local processes.
    LocalControl = 5,
    /// Audio downlink.
    Audio = 6,
}

impl PacketComponent {
    /// Mask selecting the component nibble in the `flags` word.
    pub const FLAGS_MASK: u32 = 0x0F;

    /// Extracts the component from a raw `flags` word.
    pub fn from_flags(flags: u32) -> Option<Self> {
        Some(match flags & Self::FLAGS_MASK {
            0 => PacketComponent::LinkControl,
            1 => PacketComponent::Video,
            2 => PacketComponent::Telemetry,
            3 => PacketComponent::Commands,
            4 => PacketComponent::Rc,
            5 => PacketComponent::LocalControl,
            6 => PacketComponent::Audio,
            _ => return None,
        })
    }
}

/// Identifies one of the independent packet streams multiplexed on a link.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamId {
    Data = 0,
    Telemetry = 1,
    Rc = 2,
    Video = 3,
}

/// Number of stream slots tracked by the stats and index counters.
pub const MAX_STREAMS: usize = 8;

/// Per-stream wrapping packet indices, plus the 8-bit index used by short
/// headers.
#[derive(Default)]
pub struct StreamCounters {
    next: [u32; MAX_STREAMS],
    next_short: u8,
}

impl StreamCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the `stream_packet_idx` word for the next packet of `stream`
    /// and advances the counter.
    pub fn next_index(&mut self, stream: StreamId) -> u32 {
        let slot = stream as usize;
        let idx = self.next[slot];
        self.next[slot] = (idx + 1) & STREAM_INDEX_MASK;
        ((stream as u32) << STREAM_ID_SHIFT) | idx
    }

    /// Returns the next short-header packet index (wraps at 8 bits).
    pub fn next_short_index(&mut self) -> u8 {
        let idx = self.next_short;
        self.next_short = self.next_short.wrapping_add(1);
        idx
    }
}

/// Discriminates the payload of a packet. Stored as one byte after `flags`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// Local control: the router finished bring-up and is routing.
    RouterReady,
    /// Local control: a radio interface failed to initialize. The interface
    /// index travels in the destination-id field.
    RadioInterfaceFailedToInit,
    /// Local control: an alarm condition, with id and parameter as payload.
    Alarm,
    /// Clock-sync ping to the vehicle.
    PingClock,
    /// Repeated request to pair with the vehicle.
    PairingRequest,
    /// Request to resend specific video fragments.
    VideoReqMultiplePackets,
    /// Second-generation fragment resend request.
    VideoReqMultiplePackets2,
    /// Request to shift the adaptive video level.
    VideoSwitchToAdaptiveLevel,
    /// One segment of the audio downlink.
    AudioSegment,
    /// Command: retune a radio link to a new frequency.
    CommandSetRadioLinkFrequency,
    /// Command: change radio link modulation flags / data rates.
    CommandSetRadioLinkFlags,
    /// Command: change camera parameters.
    CommandSetCameraParameters,
    /// Anything this router does not interpret; forwarded untouched.
    Unknown(u8),
}

impl From<u8> for PacketType {
    fn from(value: u8) -> Self {
        match value {
            0x10 => PacketType::RouterReady,
            0x11 => PacketType::RadioInterfaceFailedToInit,
            0x12 => PacketType::Alarm,
            0x20 => PacketType::PingClock,
            0x21 => PacketType::PairingRequest,
            0x30 => PacketType::VideoReqMultiplePackets,
            0x31 => PacketType::VideoReqMultiplePackets2,
            0x32 => PacketType::VideoSwitchToAdaptiveLevel,
            0x40 => PacketType::AudioSegment,
            0x50 => PacketType::CommandSetRadioLinkFrequency,
            0x51 => PacketType::CommandSetRadioLinkFlags,
            0x52 => PacketType::CommandSetCameraParameters,
            other => PacketType::Unknown(other),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(value: PacketType) -> Self {
        match value {
            PacketType::RouterReady => 0x10,
            PacketType::RadioInterfaceFailedToInit => 0x11,
            PacketType::Alarm => 0x12,
            PacketType::PingClock => 0x20,
            PacketType::PairingRequest => 0x21,
            PacketType::VideoReqMultiplePackets => 0x30,
            PacketType::VideoReqMultiplePackets2 => 0x31,
            PacketType::VideoSwitchToAdaptiveLevel => 0x32,
            PacketType::AudioSegment => 0x40,
            PacketType::CommandSetRadioLinkFrequency => 0x50,
            PacketType::CommandSetRadioLinkFlags => 0x51,
            PacketType::CommandSetCameraParameters => 0x52,
            PacketType::Unknown(other) => other,
        }
    }
}

impl PacketType {
    /// Returns whether this is a video fragment retransmission request.
    ///
    /// These are latency critical and jump the transmit queue.
    pub fn is_video_retransmission_request(&self) -> bool {
        matches!(
            self,
            PacketType::VideoReqMultiplePackets | PacketType::VideoReqMultiplePackets2
        )
    }
}

/// The on-wire prefix of every full-size radio packet.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: u32,
    pub packet_type: PacketType,
    pub stream_packet_idx: u32,
    pub vehicle_id_src: u32,
    pub vehicle_id_dest: u32,
    pub total_headers_length: u16,
    pub total_length: u16,
    pub extra_flags: u16,
    pub crc: u32,
}

impl PacketHeader {
    /// Creates a header for an empty packet of the given component and type.
    pub fn new(
        component: PacketComponent,
        packet_type: PacketType,
        src: u32,
        dest: u32,
    ) -> Self {
        PacketHeader {
            flags: component as u32,
            packet_type,
            stream_packet_idx: 0,
            vehicle_id_src: src,
            vehicle_id_dest: dest,
            total_headers_length: HEADER_LEN as u16,
            total_length: HEADER_LEN as u16,
            extra_flags: 0,
            crc: 0,
        }
    }

    /// The component this packet belongs to, if the nibble is valid.
    pub fn component(&self) -> Option<PacketComponent> {
        PacketComponent::from_flags(self.flags)
    }

    /// Flag bits above the component nibble.
    pub fn packet_flags(&self) -> PacketFlags {
        PacketFlags::from_bits_truncate(self.flags)
    }

    /// Stream id carried in the top bits of `stream_packet_idx`.
    pub fn stream_id(&self) -> u8 {
        (self.stream_packet_idx >> STREAM_ID_SHIFT) as u8
    }

    /// Length of the payload following all headers.
    pub fn payload_length(&self) -> usize {
        (self.total_length as usize).saturating_sub(self.total_headers_length as usize)
    }

    /// Sets `total_length` for a payload of `len` bytes.
    pub fn set_payload_length(&mut self, len: usize) {
        self.total_length = (HEADER_LEN + len) as u16;
    }

    /// Parses a header from the start of `raw`.
    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        Self::from_bytes(&mut ByteReader::new(raw))
    }
}

impl fmt::Debug for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketHeader")
            .field("component", &self.component())
            .field("type", &self.packet_type)
            .field("stream", &self.stream_id())
            .field("src", &self.vehicle_id_src)
            .field("dest", &self.vehicle_id_dest)
            .field("total_length", &self.total_length)
            .finish()
    }
}

impl ToBytes for PacketHeader {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u32_le(self.flags)?;
        writer.write_u8(self.packet_type.into())?;
        writer.write_u32_le(self.stream_packet_idx)?;
        writer.write_u32_le(self.vehicle_id_src)?;
        writer.write_u32_le(self.vehicle_id_dest)?;
        writer.write_u16_le(self.total_headers_length)?;
        writer.write_u16_le(self.total_length)?;
        writer.write_u16_le(self.extra_flags)?;
        writer.write_u32_le(self.crc)
    }
}

impl<'a> FromBytes<'a> for PacketHeader {
    fn from_bytes(reader: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(PacketHeader {
            flags: reader.read_u32_le()?,
            packet_type: reader.read_u8()?.into(),
            stream_packet_idx: reader.read_u32_le()?,
            vehicle_id_src: reader.read_u32_le()?,
            vehicle_id_dest: reader.read_u32_le()?,
            total_headers_length: reader.read_u16_le()?,
            total_length: reader.read_u16_le()?,
            extra_flags: reader.read_u16_le()?,
            crc: reader.read_u32_le()?,
        })
    }
}

/// Compact header used on SiK links.
///
/// The serial radios frame and checksum on their own, so this variant drops
/// the flags word and the crc and shrinks the packet index to 8 bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ShortHeader {
    pub packet_type: PacketType,
    pub packet_index: u8,
    pub stream_packet_idx: u32,
    pub vehicle_id_src: u32,
    pub vehicle_id_dest: u32,
    pub total_length: u16,
}

impl ShortHeader {
    /// Re-frames a full header for a SiK link. `packet_index` comes from
    /// [`StreamCounters::next_short_index`].
    pub fn from_full(header: &PacketHeader, packet_index: u8) -> Self {
        let payload = header.payload_length();
        ShortHeader {
            packet_type: header.packet_type,
            packet_index,
            stream_packet_idx: header.stream_packet_idx,
            vehicle_id_src: header.vehicle_id_src,
            vehicle_id_dest: header.vehicle_id_dest,
            total_length: (SHORT_HEADER_LEN + payload) as u16,
        }
    }
}

impl ToBytes for ShortHeader {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(self.packet_type.into())?;
        writer.write_u8(self.packet_index)?;
        writer.write_u32_le(self.stream_packet_idx)?;
        writer.write_u32_le(self.vehicle_id_src)?;
        writer.write_u32_le(self.vehicle_id_dest)?;
        writer.write_u16_le(self.total_length)
    }
}

impl<'a> FromBytes<'a> for ShortHeader {
    fn from_bytes(reader: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(ShortHeader {
            packet_type: reader.read_u8()?.into(),
            packet_index: reader.read_u8()?,
            stream_packet_idx: reader.read_u32_le()?,
            vehicle_id_src: reader.read_u32_le()?,
            vehicle_id_dest: reader.read_u32_le()?,
            total_length: reader.read_u16_le()?,
        })
    }
}

/// Reads the `total_length` field of the packet starting at `raw[0]`.
pub fn peek_total_length(raw: &[u8]) -> Option<usize> {
    if raw.len() < HEADER_LEN {
        return None;
    }
    Some(LittleEndian::read_u16(&raw[TOTAL_LENGTH_OFFSET..]) as usize)
}

/// Reads the packet type byte of the packet starting at `raw[0]`.
pub fn peek_packet_type(raw: &[u8]) -> Option<PacketType> {
    raw.get(TYPE_OFFSET).map(|&b| b.into())
}

/// Overwrites the source vehicle id in place.
///
/// The frame must be resealed with [`seal_crc`] afterwards.
pub fn rewrite_source_id(frame: &mut [u8], src: u32) {
    if frame.len() >= SRC_ID_OFFSET + 4 {
        LittleEndian::write_u32(&mut frame[SRC_ID_OFFSET..], src);
    }
}

/// Computes and stores the checksum of the packet starting at `frame[0]`.
///
/// The crc field is zeroed first, then a CRC-32 over `[0, total_length)` is
/// written into it. Fails when the declared length does not fit the buffer.
pub fn seal_crc(frame: &mut [u8]) -> Result<(), Error> {
    let total = peek_total_length(frame).ok_or(Error::InvalidLength)?;
    if total < HEADER_LEN || total > frame.len() {
        return Err(Error::InvalidLength);
    }
    frame[CRC_OFFSET..CRC_OFFSET + 4].fill(0);
    let crc = CRC32.checksum(&frame[..total]);
    LittleEndian::write_u32(&mut frame[CRC_OFFSET..], crc);
    Ok(())
}

/// Verifies the checksum of the packet starting at `frame[0]`.
pub fn verify_crc(frame: &[u8]) -> bool {
    let total = match peek_total_length(frame) {
        Some(t) if t >= HEADER_LEN && t <= frame.len() => t,
        _ => return false,
    };
    let stored = LittleEndian::read_u32(&frame[CRC_OFFSET..]);
    let mut copy = [0u8; MAX_PACKET_TOTAL_SIZE];
    if total > copy.len() {
        return false;
    }
    copy[..total].copy_from_slice(&frame[..total]);
    copy[CRC_OFFSET..CRC_OFFSET + 4].fill(0);
    CRC32.checksum(&copy[..total]) == stored
}

/// Iterator over the self-delimited packets of a composed radio frame.
///
/// Stops at the first malformed length field; anything after it is
/// unrecoverable anyway.
pub struct SubPackets<'a> {
    rest: &'a [u8],
}

impl<'a> SubPackets<'a> {
    pub fn new(frame: &'a [u8]) -> Self {
        SubPackets { rest: frame }
    }
}

impl<'a> Iterator for SubPackets<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let total = peek_total_length(self.rest)?;
        if total < HEADER_LEN || total > self.rest.len() {
            self.rest = &[];
            return None;
        }
        let (packet, rest) = self.rest.split_at(total);
        self.rest = rest;
        Some(packet)
    }
}

/// Serializes `header` followed by `payload` into a fresh packet buffer,
/// fixing up `total_length` and sealing the checksum.
pub fn compose_packet(header: &PacketHeader, payload: &[u8]) -> Result<Vec<u8>, Error> {
    let mut header = *header;
    header.set_payload_length(payload.len());
    let total = header.total_length as usize;
    if total > MAX_PACKET_TOTAL_SIZE {
        return Err(Error::InvalidLength);
    }

    let mut buf = vec![0; total];
    let mut writer = ByteWriter::new(&mut buf);
    header.to_bytes(&mut writer)?;
    writer.write_slice(payload)?;
    seal_crc(&mut buf)?;
    Ok(buf)
}
