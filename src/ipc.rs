//! IPC endpoints to the local producer/consumer processes.
//!
//! The router talks to three local processes, each over a read/write pair
//! of message-framed channels. Framing, blocking behavior and the transport
//! itself (named pipes, sockets, shared rings) belong to the
//! [`IpcChannel`] implementation; the router only sees whole messages.
//!
//! [`MemoryChannel`] is a complete single-process implementation used by
//! the test suites and the demo binary.

use crate::time::Duration;
use core::fmt;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// The six router-side channel endpoints.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelId {
    CentralToRouter,
    RouterToCentral,
    TelemetryToRouter,
    RouterToTelemetry,
    RcToRouter,
    RouterToRc,
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelId::CentralToRouter => "central->router",
            ChannelId::RouterToCentral => "router->central",
            ChannelId::TelemetryToRouter => "telemetry->router",
            ChannelId::RouterToTelemetry => "router->telemetry",
            ChannelId::RcToRouter => "rc->router",
            ChannelId::RouterToRc => "router->rc",
        })
    }
}

/// A message-framed, unidirectional IPC channel endpoint.
pub trait IpcChannel {
    /// Returns the next whole message, waiting at most `timeout` for one to
    /// show up.
    fn try_read(&mut self, timeout: Duration) -> Option<Vec<u8>>;

    /// Queues a message towards the peer. `false` means the peer is gone or
    /// its buffer is full; the caller logs and drops.
    fn send(&mut self, message: &[u8]) -> bool;
}

/// The full set of channels the router owns.
pub struct Endpoints<I: IpcChannel> {
    pub from_central: I,
    pub to_central: I,
    pub from_telemetry: I,
    pub to_telemetry: I,
    pub from_rc: I,
    pub to_rc: I,
}

/// In-memory [`IpcChannel`], one direction of a channel pair.
///
/// Cloning an endpoint shares the underlying buffers, so the "process" on
/// the other side is just another clone with the roles flipped.
#[derive(Clone)]
pub struct MemoryChannel {
    inbox: Rc<RefCell<VecDeque<Vec<u8>>>>,
    outbox: Rc<RefCell<VecDeque<Vec<u8>>>>,
    /// Send capacity before the channel reports a full peer.
    capacity: usize,
}

impl MemoryChannel {
    /// Creates a connected channel pair; what one end sends, the other
    /// reads.
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let a = Rc::new(RefCell::new(VecDeque::new()));
        let b = Rc::new(RefCell::new(VecDeque::new()));
        let capacity = 256;
        (
            MemoryChannel {
                inbox: a.clone(),
                outbox: b.clone(),
                capacity,
            },
            MemoryChannel {
                inbox: b,
                outbox: a,
                capacity,
            },
        )
    }
}

impl IpcChannel for MemoryChannel {
    fn try_read(&mut self, _timeout: Duration) -> Option<Vec<u8>> {
        self.inbox.borrow_mut().pop_front()
    }

    fn send(&mut self, message: &[u8]) -> bool {
        let mut outbox = self.outbox.borrow_mut();
        if outbox.len() >= self.capacity {
            return false;
        }
        outbox.push_back(message.to_vec());
        true
    }
}

/// Runs the channel contract checks against a connected pair.
///
/// Useful when implementing [`IpcChannel`] for a real transport: call this
/// from a `#[test]` with a freshly connected pair and it panics on any
/// contract violation (message boundaries, ordering, emptiness).
pub fn run_channel_tests(mut a: impl IpcChannel, mut b: impl IpcChannel) {
    let timeout = Duration::from_micros(50);

    assert!(a.try_read(timeout).is_none(), "fresh channel was not empty");

    assert!(a.send(b"first"), "send on fresh channel failed");
    assert!(a.send(b""), "empty message send failed");
    assert!(a.send(b"third"), "send on fresh channel failed");

    assert_eq!(b.try_read(timeout).as_deref(), Some(&b"first"[..]));
    assert_eq!(
        b.try_read(timeout).as_deref(),
        Some(&b""[..]),
        "message boundaries were not preserved"
    );
    assert_eq!(b.try_read(timeout).as_deref(), Some(&b"third"[..]));
    assert!(b.try_read(timeout).is_none(), "drained channel was not empty");

    // Both directions are independent.
    assert!(b.send(b"back"));
    assert_eq!(a.try_read(timeout).as_deref(), Some(&b"back"[..]));
}
