//! Server configuration: phase timeouts and buffer limits
//!
//! Every wait the engine performs is bounded by one of the [`Timeouts`], and
//! every buffer it owns is bounded by one of the [`ServerConfig`] limits.
//! Defaults are sized for a single connection on a small target.

use super::{DOWNLOAD_UNIT_SIZE, MAX_HEADERS, UPLOAD_BUFFER_LEN};
use std::time::Duration;

/// Caller-imposed waits, one per protocol phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// How long a freshly accepted client may stay silent (default: `1 second`)
    ///
    /// Also bounds each read of the request line and headers.
    pub data_wait: Duration,

    /// Deadline for the whole request line and header block (default: `5 seconds`)
    pub head_wait: Duration,

    /// How long to wait for each piece of request body (default: `1 second`)
    pub post_wait: Duration,

    /// How long a single outbound write may block (default: `5 seconds`)
    pub send_wait: Duration,

    /// How long to wait for the client to close after a response (default: `2 seconds`)
    pub close_wait: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            data_wait: Duration::from_millis(1000),
            head_wait: Duration::from_millis(5000),
            post_wait: Duration::from_millis(1000),
            send_wait: Duration::from_millis(5000),
            close_wait: Duration::from_millis(2000),
        }
    }
}

/// Server-wide limits
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Phase timeouts
    pub timeouts: Timeouts,

    /// Capacity of the upload chunk buffer (default: `4096`)
    pub upload_buffer_len: usize,

    /// Size of each piece written by `stream_file` (default: `1460`)
    pub download_unit: usize,

    /// Maximum number of request arguments retained (default: `32`)
    pub max_arguments: usize,

    /// Maximum number of collected request headers (default: `64`)
    pub max_headers: usize,

    /// Maximum request body bytes retained for urlencoded/plain bodies (default: `8192`)
    pub max_body_len: usize,

    /// Maximum retained length of a request or header line (default: `1024`)
    pub max_line_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            timeouts: Timeouts::default(),
            upload_buffer_len: UPLOAD_BUFFER_LEN,
            download_unit: DOWNLOAD_UNIT_SIZE,
            max_arguments: 32,
            max_headers: MAX_HEADERS,
            max_body_len: 8192,
            max_line_len: 1024,
        }
    }
}

impl ServerConfig {
    /// Create a configuration with default limits
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn data_wait(mut self, wait: Duration) -> Self {
        self.timeouts.data_wait = wait;
        self
    }

    #[must_use]
    pub fn head_wait(mut self, wait: Duration) -> Self {
        self.timeouts.head_wait = wait;
        self
    }

    #[must_use]
    pub fn post_wait(mut self, wait: Duration) -> Self {
        self.timeouts.post_wait = wait;
        self
    }

    #[must_use]
    pub fn send_wait(mut self, wait: Duration) -> Self {
        self.timeouts.send_wait = wait;
        self
    }

    #[must_use]
    pub fn close_wait(mut self, wait: Duration) -> Self {
        self.timeouts.close_wait = wait;
        self
    }

    #[must_use]
    pub fn upload_buffer_len(mut self, len: usize) -> Self {
        self.upload_buffer_len = len.max(1);
        self
    }

    #[must_use]
    pub fn download_unit(mut self, len: usize) -> Self {
        self.download_unit = len.max(1);
        self
    }

    #[must_use]
    pub fn max_arguments(mut self, count: usize) -> Self {
        self.max_arguments = count;
        self
    }

    #[must_use]
    pub fn max_headers(mut self, count: usize) -> Self {
        self.max_headers = count;
        self
    }

    #[must_use]
    pub fn max_body_len(mut self, len: usize) -> Self {
        self.max_body_len = len;
        self
    }

    #[must_use]
    pub fn max_line_len(mut self, len: usize) -> Self {
        self.max_line_len = len.max(16);
        self
    }
}
