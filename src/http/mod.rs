//! HTTP/1.x implementation
//!
//! This module provides the server side of the crate: a request parser that
//! pulls bytes from a [`Transport`] under per-phase timeouts, fixed-capacity
//! header and argument tables, a response builder with content-length and
//! chunked framing, and an ordered handler chain. A minimal client side is
//! included for the WebSocket opening handshake.
//!
//! # Architecture
//!
//! - `Transport` trait defines the byte-stream operations (poll, read, peek, write, close)
//! - `HttpSession` layers caller-imposed timeouts on top of a transport
//! - `Server` accepts one connection at a time and dispatches one request per poll
//!
//! # Examples
//!
//! ```no_run
//! use slimweb::http::{Method, Server, ServerConfig};
//! use slimweb::net::TcpAcceptor;
//!
//! let acceptor = TcpAcceptor::bind("127.0.0.1:8080".parse().unwrap()).unwrap();
//! let mut server = Server::new(acceptor, ServerConfig::default());
//!
//! server.on("/", Method::Get, |ex| ex.send(200, "text/plain", b"hello"));
//! server.on("/echo", Method::Post, |ex| {
//!     let name = ex.arg("name").unwrap_or("nobody").to_string();
//!     ex.send(200, "text/plain", name.as_bytes())
//! });
//!
//! loop {
//!     if let Err(e) = server.handle_client() {
//!         eprintln!("request failed: {}", e);
//!     }
//! }
//! ```

pub mod args;
pub mod auth;
pub mod chunked;
pub mod client;
pub mod config;
pub mod handler;
pub mod headers;
pub mod message;
pub mod multipart;
pub mod parser;
pub mod response;
pub mod server;
pub mod session;
pub mod upload;

pub use args::Arguments;
pub use client::HttpClient;
pub use config::{ServerConfig, Timeouts};
pub use handler::{FunctionRequestHandler, RequestHandler};
pub use headers::Headers;
pub use message::{ContentLength, HttpRequest, Method, Version};
pub use parser::RequestParser;
pub use response::ResponseContext;
pub use server::{Exchange, Server};
pub use session::{HttpSession, MemoryTransport, Phase, PollEvents, TcpTransport, Transport};
pub use upload::{Upload, UploadStatus};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP and WebSocket operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] crate::net::Error),

    #[error("Malformed request line: {0}")]
    MalformedRequestLine(String),

    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("Body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Timed out waiting for request headers")]
    HeaderTimeout,

    #[error("Timed out waiting for request body")]
    BodyTimeout,

    #[error("Timeout")]
    Timeout,

    #[error("Multipart boundary mismatch")]
    BoundaryMismatch,

    #[error("Upload aborted")]
    UploadAborted,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("WebSocket handshake rejected with status {0}")]
    HandshakeRejected(u16),

    #[error("Frame payload of {len} bytes exceeds buffer capacity {capacity}")]
    FrameTruncated { len: usize, capacity: usize },

    #[error("WebSocket connection not upgraded")]
    NotUpgraded,

    #[error("WebSocket message already in progress")]
    MessageInProgress,

    #[error("No WebSocket message in progress")]
    NoMessageInProgress,

    #[error("Response headers already sent")]
    HeadersAlreadySent,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 64;

/// Maximum number of header lines read per request, collected or not
pub const MAX_HEADER_LINES: usize = 128;

/// CRLF line ending
pub const CRLF: &str = "\r\n";

/// Raw sentinel for a content length that is explicitly unknown (chunked)
pub const CONTENT_LENGTH_UNKNOWN: usize = usize::MAX;

/// Raw sentinel for a content length that has not been set yet
pub const CONTENT_LENGTH_NOT_SET: usize = usize::MAX - 1;

/// Default size of the upload chunk buffer
pub const UPLOAD_BUFFER_LEN: usize = 4096;

/// Default size of each piece written when streaming a file
pub const DOWNLOAD_UNIT_SIZE: usize = 1460;
