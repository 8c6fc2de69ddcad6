//! WebSocket client (RFC 6455)
//!
//! The client upgrades an HTTP/1.1 connection with the opening handshake and
//! then frames messages over the same transport:
//!
//! - [`handshake`] builds the `Upgrade` request and its random key
//! - [`frame`] encodes and decodes frame headers and applies masks
//! - [`client`] drives both and answers control frames
//!
//! Outbound messages are buffered whole in a small fixed buffer and sent as
//! a single masked frame; inbound payloads are read straight off the
//! transport and unmasked in place.
//!
//! # Examples
//!
//! ```no_run
//! use slimweb::ws::{Opcode, WebSocketClient, WebSocketConfig};
//! use std::time::Duration;
//!
//! let addr = "127.0.0.1:8080".parse().unwrap();
//! let transport = slimweb::net::connect(addr, Duration::from_secs(5)).unwrap();
//! let mut ws = WebSocketClient::new(transport, "127.0.0.1:8080", WebSocketConfig::default());
//!
//! ws.begin("/chat").unwrap();
//! ws.send(Opcode::Text, b"hello").unwrap();
//!
//! loop {
//!     if ws.parse_message().unwrap() > 0 {
//!         println!("{}", ws.read_string().unwrap());
//!     }
//! }
//! ```

pub mod client;
pub mod frame;
pub mod handshake;

pub use client::{WebSocketClient, WsState};
pub use frame::FrameHeader;

use crate::http::Timeouts;
use std::fmt;

/// Default capacity of the outbound message buffer
pub const DEFAULT_TX_BUFFER_LEN: usize = 128;

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Reserved opcodes 0x3-0x7 and 0xB-0xF
    Reserved(u8),
}

impl Opcode {
    /// Decode the low nibble of the first frame byte
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0f {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(value) => value & 0x0f,
        }
    }

    /// Control frames have the high bit of the opcode set
    pub fn is_control(self) -> bool {
        self.as_u8() & 0x08 != 0
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Continuation => write!(f, "CONTINUATION"),
            Opcode::Text => write!(f, "TEXT"),
            Opcode::Binary => write!(f, "BINARY"),
            Opcode::Close => write!(f, "CLOSE"),
            Opcode::Ping => write!(f, "PING"),
            Opcode::Pong => write!(f, "PONG"),
            Opcode::Reserved(value) => write!(f, "RESERVED({:#x})", value),
        }
    }
}

/// Source of handshake keys, mask keys and ping payloads
///
/// Any [`rand::RngCore`] qualifies; the client defaults to
/// [`rand::rngs::ThreadRng`].
pub trait Entropy {
    fn fill(&mut self, buf: &mut [u8]);
}

impl<R: rand::RngCore> Entropy for R {
    fn fill(&mut self, buf: &mut [u8]) {
        self.fill_bytes(buf);
    }
}

/// WebSocket client settings
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Capacity of the outbound message buffer (default: `128`)
    pub tx_buffer_len: usize,

    /// Waits for the handshake response and frame bytes
    pub timeouts: Timeouts,

    /// `User-Agent` sent with the handshake
    pub user_agent: String,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            tx_buffer_len: DEFAULT_TX_BUFFER_LEN,
            timeouts: Timeouts::default(),
            user_agent: concat!("slimweb/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl WebSocketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tx_buffer_len(mut self, len: usize) -> Self {
        self.tx_buffer_len = len;
        self
    }

    #[must_use]
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
