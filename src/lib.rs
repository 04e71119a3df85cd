//! Ground-station packet router for a long-range FPV radio link.
//!
//! A controller pairs with a mobile vehicle over one or more logical radio
//! links, each served by one or more physical radio interfaces. This crate
//! is the single process that owns those interfaces on the ground side: it
//! assigns cards to links, tunes and opens them, and shuttles packets
//! between the radio and the local Central / Telemetry / RC processes, one
//! cooperative ~50 ms tick at a time.
//!
//! The crate is platform-agnostic. Radio drivers, IPC transports, the video
//! pipeline and the remaining OS services plug in through the traits bound
//! together by [`config::Config`]; in-memory implementations of every seam
//! ship in-tree for tests and the demo binary.
//!
//! ```no_run
//! use groundlink::config::{Config, NullPlatform, NullProcessors};
//! use groundlink::hw::SimRadio;
//! use groundlink::ipc::MemoryChannel;
//! use groundlink::router::{Router, RouterInit};
//! use groundlink::time::StdTimer;
//!
//! struct Demo;
//! impl Config for Demo {
//!     type Timer = StdTimer;
//!     type Radio = SimRadio;
//!     type Ipc = MemoryChannel;
//!     type Processors = NullProcessors;
//!     type Platform = NullPlatform;
//! }
//! # fn endpoints() -> groundlink::ipc::Endpoints<MemoryChannel> { todo!() }
//!
//! let init = RouterInit::<Demo> {
//!     timer: StdTimer::new(),
//!     radio: SimRadio::new(0),
//!     ipc: endpoints(),
//!     processors: NullProcessors,
//!     platform: NullPlatform,
//!     cards: Vec::new(),
//!     model: None,
//!     prefs: Default::default(),
//!     settings: Default::default(),
//!     search_frequency_khz: Some(5_745_000),
//!     quit: Default::default(),
//! };
//! let mut router = Router::new(init).unwrap();
//! router.start().unwrap();
//! router.run();
//! ```

pub mod assign;
pub mod bytes;
pub mod cli;
pub mod config;
mod error;
pub mod hw;
pub mod ipc;
pub mod links;
pub mod model;
pub mod packet;
mod ping;
pub mod router;
mod sched;
pub mod shm;
pub mod stats;
pub mod time;

pub use self::error::{Error, InitError};

/// Version of the station software this router belongs to.
pub const SW_VERSION_MAJOR: u32 = 7;
pub const SW_VERSION_MINOR: u32 = 2;
pub const SW_BUILD_NUMBER: u32 = 143;
