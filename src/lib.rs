//! slimweb - bounded-memory HTTP/1.x server engine and WebSocket client
//!
//! This crate provides a single-connection HTTP/1.x request parser, response
//! builder and handler dispatcher, plus an RFC 6455 client-side WebSocket
//! engine. Both run over any byte-stream transport implementing
//! [`http::Transport`].

pub mod http;
pub mod net;
pub mod ws;
