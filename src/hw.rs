//! Radio hardware inventory and the transport seam.
//!
//! One [`RadioInterfaceInfo`] exists per physical card the controller can
//! see. The inventory is built once at startup (enumeration itself is
//! platform code); after that only the link bring-up and the stats updater
//! touch the mutable fields.
//!
//! Actual I/O goes through [`RadioTransport`], implemented once per
//! platform. The in-crate [`SimRadio`] is a complete in-memory
//! implementation used by the demo binary and the test suite.

use crate::time::Duration;
use crate::Error;
use bitflags::bitflags;
use std::collections::VecDeque;

/// Upper bound on radio interfaces (and thereby logical links) per
/// controller.
pub const MAX_RADIO_INTERFACES: usize = 6;

bitflags! {
    /// Capability flags shared by radio interfaces and logical links.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RadioCaps: u32 {
        /// Can receive.
        const CAN_RX = 1 << 0;
        /// Can transmit.
        const CAN_TX = 1 << 1;
        /// May carry the video stream.
        const CAN_USE_FOR_VIDEO = 1 << 2;
        /// May carry data (telemetry, commands, RC).
        const CAN_USE_FOR_DATA = 1 << 3;
        /// Administratively disabled; never assigned or opened.
        const DISABLED = 1 << 4;
        /// The vehicle uses this link to relay another vehicle. The
        /// controller must leave it alone.
        const USED_FOR_RELAY = 1 << 5;
        /// High-capacity card, preferred for video.
        const HIGH_CAPACITY = 1 << 6;
    }
}

/// Driver family of a radio card.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RadioType {
    Ralink,
    Atheros,
    Realtek,
    /// Serial telemetry radio, opened once for both directions.
    SiK,
}

impl RadioType {
    pub fn is_sik(&self) -> bool {
        matches!(self, RadioType::SiK)
    }
}

/// One physical radio card and its mutable link state.
#[derive(Clone, Debug)]
pub struct RadioInterfaceInfo {
    /// Stable hardware identity, used to match per-card settings.
    pub mac: String,
    /// Human-readable name for logs.
    pub name: String,
    pub radio_type: RadioType,
    pub caps: RadioCaps,
    /// Frequencies this card can tune to, in kHz.
    pub supported_frequencies_khz: Vec<u32>,
    /// Per-card TX data rate override; `None` means use the link's rate.
    pub datarate_override_bps: Option<i32>,

    // Mutated by link bring-up only.
    pub current_frequency_khz: u32,
    pub opened_for_read: bool,
    pub opened_for_write: bool,
    pub assigned_link: Option<usize>,
}

impl RadioInterfaceInfo {
    /// Creates an inventory entry with all mutable state cleared.
    pub fn new(
        mac: impl Into<String>,
        name: impl Into<String>,
        radio_type: RadioType,
        caps: RadioCaps,
        supported_frequencies_khz: Vec<u32>,
    ) -> Self {
        RadioInterfaceInfo {
            mac: mac.into(),
            name: name.into(),
            radio_type,
            caps,
            supported_frequencies_khz,
            datarate_override_bps: None,
            current_frequency_khz: 0,
            opened_for_read: false,
            opened_for_write: false,
            assigned_link: None,
        }
    }

    pub fn supports_frequency(&self, khz: u32) -> bool {
        self.supported_frequencies_khz.contains(&khz)
    }

    pub fn is_disabled(&self) -> bool {
        self.caps.contains(RadioCaps::DISABLED)
    }

    pub fn is_sik(&self) -> bool {
        self.radio_type.is_sik()
    }
}

/// One frame received from a radio interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RxFrame {
    /// Index of the interface the frame arrived on.
    pub iface: usize,
    pub bytes: Vec<u8>,
}

/// Unrecoverable failure of the radio receive path.
///
/// The router shuts down when it sees one; everything less severe is
/// reported through [`Error`] or counted in the stats.
#[derive(Debug, PartialEq, Eq)]
pub struct RadioFatal(pub i32);

/// Platform seam for radio I/O, addressed by interface index.
///
/// Open/close calls are idempotent per interface. `try_receive` polls every
/// readable interface and returns at most one frame; the caller loops while
/// frames keep arriving.
pub trait RadioTransport {
    fn open_for_read(&mut self, iface: usize) -> Result<(), Error>;

    fn open_for_write(&mut self, iface: usize) -> Result<(), Error>;

    /// Single open entry point of SiK radios; the serial port carries both
    /// directions.
    fn open_read_write(&mut self, iface: usize) -> Result<(), Error>;

    /// Closes whatever `iface` has open.
    fn close(&mut self, iface: usize);

    fn set_frequency(&mut self, iface: usize, khz: u32) -> Result<(), Error>;

    /// Applies a TX data rate; only meaningful for Atheros-family cards.
    fn set_tx_datarate(&mut self, iface: usize, bps: i32);

    /// Waits up to `timeout` for one frame from any readable interface.
    fn try_receive(&mut self, timeout: Duration) -> Result<Option<RxFrame>, RadioFatal>;

    /// Writes one frame; returns the number of bytes that went out.
    fn write_frame(&mut self, iface: usize, frame: &[u8]) -> Result<usize, Error>;
}

/// In-memory [`RadioTransport`] for the demo binary and tests.
///
/// Writes are recorded, receives are scripted by pushing frames into the
/// inbox, and individual interfaces can be marked as failing their open.
pub struct SimRadio {
    opened_read: Vec<bool>,
    opened_write: Vec<bool>,
    frequencies: Vec<u32>,
    failing: Vec<bool>,
    inbox: VecDeque<RxFrame>,
    /// Every frame written, in order, with the interface it went to.
    pub writes: Vec<(usize, Vec<u8>)>,
    /// When set, the next `try_receive` reports this fatal error.
    pub fatal: Option<i32>,
}

impl SimRadio {
    pub fn new(interface_count: usize) -> Self {
        SimRadio {
            opened_read: vec![false; interface_count],
            opened_write: vec![false; interface_count],
            frequencies: vec![0; interface_count],
            failing: vec![false; interface_count],
            inbox: VecDeque::new(),
            writes: Vec::new(),
            fatal: None,
        }
    }

    /// Makes every open call on `iface` fail from now on.
    pub fn fail_interface(&mut self, iface: usize) {
        self.failing[iface] = true;
    }

    /// Scripts a frame to be handed out by a later `try_receive`.
    pub fn push_rx(&mut self, iface: usize, bytes: Vec<u8>) {
        self.inbox.push_back(RxFrame { iface, bytes });
    }

    pub fn is_open_for_read(&self, iface: usize) -> bool {
        self.opened_read[iface]
    }

    pub fn is_open_for_write(&self, iface: usize) -> bool {
        self.opened_write[iface]
    }

    pub fn frequency(&self, iface: usize) -> u32 {
        self.frequencies[iface]
    }

    fn check(&self, iface: usize) -> Result<(), Error> {
        if iface >= self.opened_read.len() || self.failing[iface] {
            Err(Error::Hardware)
        } else {
            Ok(())
        }
    }
}

impl RadioTransport for SimRadio {
    fn open_for_read(&mut self, iface: usize) -> Result<(), Error> {
        self.check(iface)?;
        self.opened_read[iface] = true;
        Ok(())
    }

    fn open_for_write(&mut self, iface: usize) -> Result<(), Error> {
        self.check(iface)?;
        self.opened_write[iface] = true;
        Ok(())
    }

    fn open_read_write(&mut self, iface: usize) -> Result<(), Error> {
        self.check(iface)?;
        self.opened_read[iface] = true;
        self.opened_write[iface] = true;
        Ok(())
    }

    fn close(&mut self, iface: usize) {
        if iface < self.opened_read.len() {
            self.opened_read[iface] = false;
            self.opened_write[iface] = false;
        }
    }

    fn set_frequency(&mut self, iface: usize, khz: u32) -> Result<(), Error> {
        self.check(iface)?;
        self.frequencies[iface] = khz;
        Ok(())
    }

    fn set_tx_datarate(&mut self, _iface: usize, _bps: i32) {}

    fn try_receive(&mut self, timeout: Duration) -> Result<Option<RxFrame>, RadioFatal> {
        if let Some(code) = self.fatal.take() {
            return Err(RadioFatal(code));
        }
        match self.inbox.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => {
                // Model the blocking read of a real driver so callers do not
                // busy-spin.
                std::thread::sleep(std::time::Duration::from_micros(timeout.as_micros()));
                Ok(None)
            }
        }
    }

    fn write_frame(&mut self, iface: usize, frame: &[u8]) -> Result<usize, Error> {
        if iface >= self.opened_write.len() || !self.opened_write[iface] {
            return Err(Error::Hardware);
        }
        self.writes.push((iface, frame.to_vec()));
        Ok(frame.len())
    }
}
