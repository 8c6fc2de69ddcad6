//! WebSocket client connection
//!
//! Wraps an [`HttpClient`] and, once the handshake succeeded, frames
//! messages over its transport. Before that (or after a refused upgrade)
//! reads and writes pass straight through to the raw stream, so the same
//! connection can be used for plain HTTP.

use super::frame::{apply_mask, encode_frame, FrameHeader, MAX_CONTROL_PAYLOAD, MAX_HEADER_LEN};
use super::handshake::{generate_key, send_upgrade_request, SWITCHING_PROTOCOLS};
use super::{Entropy, Opcode, WebSocketConfig};
use crate::http::{Error, HttpClient, HttpSession, Phase, Result, Transport};
use bytes::BytesMut;
use rand::rngs::ThreadRng;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    NotUpgraded,
    Upgrading,
    Open,
    Closed,
}

/// Client end of a WebSocket connection
pub struct WebSocketClient<T: Transport, E: Entropy = ThreadRng> {
    http: HttpClient<T>,
    entropy: E,
    config: WebSocketConfig,
    state: WsState,

    tx: BytesMut,
    tx_opcode: Option<Opcode>,

    rx_remaining: u64,
    rx_opcode: Opcode,
    /// Opcode of the data message the current frame belongs to
    rx_data_opcode: Opcode,
    rx_final: bool,
    rx_mask: Option<[u8; 4]>,
    rx_mask_index: usize,
}

impl<T: Transport> WebSocketClient<T, ThreadRng> {
    /// Create a client for `host` drawing keys from the thread-local RNG
    pub fn new(transport: T, host: impl Into<String>, config: WebSocketConfig) -> Self {
        Self::with_entropy(transport, host, config, rand::thread_rng())
    }
}

impl<T: Transport, E: Entropy> WebSocketClient<T, E> {
    /// Create a client with an explicit randomness source
    pub fn with_entropy(
        transport: T,
        host: impl Into<String>,
        config: WebSocketConfig,
        entropy: E,
    ) -> Self {
        let http = HttpClient::new(transport, host, config.timeouts);
        let tx = BytesMut::with_capacity(config.tx_buffer_len);
        WebSocketClient {
            http,
            entropy,
            config,
            state: WsState::NotUpgraded,
            tx,
            tx_opcode: None,
            rx_remaining: 0,
            rx_opcode: Opcode::Continuation,
            rx_data_opcode: Opcode::Continuation,
            rx_final: false,
            rx_mask: None,
            rx_mask_index: 0,
        }
    }

    pub fn state(&self) -> WsState {
        self.state
    }

    /// Perform the opening handshake for `path`
    ///
    /// Any status other than 101 leaves the connection not upgraded and
    /// returns [`Error::HandshakeRejected`] with that status.
    pub fn begin(&mut self, path: &str) -> Result<()> {
        self.state = WsState::Upgrading;
        self.reset_rx();

        match self.handshake(path) {
            Ok(()) => {
                log::debug!("upgraded {}", path);
                self.state = WsState::Open;
                Ok(())
            }
            Err(e) => {
                log::warn!("upgrade of {} failed: {}", path, e);
                self.state = WsState::NotUpgraded;
                Err(e)
            }
        }
    }

    fn handshake(&mut self, path: &str) -> Result<()> {
        let key = generate_key(&mut self.entropy);
        send_upgrade_request(&mut self.http, path, &key, &self.config.user_agent)?;

        let status = self.http.response_status_code()?;
        self.http.skip_response_headers()?;

        if status != SWITCHING_PROTOCOLS {
            return Err(Error::HandshakeRejected(status));
        }
        Ok(())
    }

    /// Start an outbound message of type `opcode`
    pub fn begin_message(&mut self, opcode: Opcode) -> Result<()> {
        if self.state != WsState::Open {
            return Err(Error::NotUpgraded);
        }
        if self.tx_opcode.is_some() {
            return Err(Error::MessageInProgress);
        }

        self.tx_opcode = Some(opcode);
        self.tx.clear();
        Ok(())
    }

    /// Append payload to the open message
    ///
    /// Accepts at most what still fits in the outbound buffer and returns
    /// how many bytes were taken. Before the upgrade, writes go to the raw
    /// stream.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.state != WsState::Open {
            self.session_mut().write_all(data)?;
            return Ok(data.len());
        }
        if self.tx_opcode.is_none() {
            return Err(Error::NoMessageInProgress);
        }

        let room = self.config.tx_buffer_len.saturating_sub(self.tx.len());
        let accepted = data.len().min(room);
        if accepted < data.len() {
            log::warn!("message buffer full, dropping {} bytes", data.len() - accepted);
        }
        self.tx.extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    /// Send the open message as one final, masked frame
    pub fn end_message(&mut self) -> Result<()> {
        let opcode = self.tx_opcode.take().ok_or(Error::NoMessageInProgress)?;
        let mut mask = [0u8; 4];
        self.entropy.fill(&mut mask);
        let frame = encode_frame(opcode, &self.tx, mask);
        self.tx.clear();
        self.session_mut().write_all(&frame)
    }

    /// Send a whole message in one call
    pub fn send(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.tx_buffer_len {
            return Err(Error::FrameTruncated {
                len: payload.len(),
                capacity: self.config.tx_buffer_len,
            });
        }
        self.begin_message(opcode)?;
        self.write(payload)?;
        self.end_message()
    }

    /// Send a ping with 16 random payload bytes
    pub fn ping(&mut self) -> Result<()> {
        let mut payload = [0u8; 16];
        self.entropy.fill(&mut payload);
        self.send(Opcode::Ping, &payload)
    }

    /// Start on the next inbound frame
    ///
    /// Unread payload of the previous frame is discarded first. Returns 0
    /// if a frame header is not available yet, or if the frame was a
    /// control frame that has been dealt with: a PING is answered with a
    /// PONG echoing its payload, a PONG is discarded, a CLOSE closes the
    /// connection. Otherwise returns the payload size of the data frame.
    pub fn parse_message(&mut self) -> Result<u64> {
        if self.state != WsState::Open {
            return Err(Error::NotUpgraded);
        }

        self.flush_rx()?;
        if self.session_mut().available()? < 2 {
            return Ok(0);
        }

        let mut raw = [0u8; MAX_HEADER_LEN];
        self.session_mut().read_exact(&mut raw[..2], Phase::Body)?;
        let len = 2 + FrameHeader::remaining_header_len([raw[0], raw[1]]);
        self.session_mut().read_exact(&mut raw[2..len], Phase::Body)?;

        let Some((header, _)) = FrameHeader::decode(&raw[..len])? else {
            return Err(Error::Protocol("incomplete frame header".to_string()));
        };
        if header.opcode.is_control() && header.payload_len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(Error::Protocol(format!(
                "{} frame of {} bytes",
                header.opcode, header.payload_len
            )));
        }
        log::debug!(
            "frame {} fin={} len={}",
            header.opcode,
            header.fin,
            header.payload_len
        );

        self.rx_remaining = header.payload_len;
        self.rx_opcode = header.opcode;
        self.rx_final = header.fin;
        self.rx_mask = header.mask;
        self.rx_mask_index = 0;
        if !header.opcode.is_control() && header.opcode != Opcode::Continuation {
            self.rx_data_opcode = header.opcode;
        }

        match header.opcode {
            Opcode::Close => {
                self.flush_rx()?;
                self.stop();
                Ok(0)
            }
            Opcode::Ping => {
                let payload = self.read_payload()?;
                let frame = self.masked_frame(Opcode::Pong, &payload);
                self.session_mut().write_all(&frame)?;
                Ok(0)
            }
            Opcode::Pong => {
                self.flush_rx()?;
                Ok(0)
            }
            _ => Ok(self.rx_remaining),
        }
    }

    /// Type of the current inbound message
    ///
    /// A continuation frame reports the type of the message it continues.
    pub fn message_type(&self) -> Opcode {
        match self.rx_opcode {
            Opcode::Continuation => self.rx_data_opcode,
            opcode => opcode,
        }
    }

    /// Whether the current frame is the last of its message
    pub fn is_final(&self) -> bool {
        self.rx_final
    }

    /// Read and unmask payload of the current frame
    ///
    /// Returns 0 at the end of the frame or when the peer has closed.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state != WsState::Open {
            return match self.session_mut().read(buf, Phase::Body) {
                Err(Error::ConnectionClosed) => Ok(0),
                other => other,
            };
        }

        let want = (buf.len() as u64).min(self.rx_remaining) as usize;
        if want == 0 {
            return Ok(0);
        }

        let n = match self.session_mut().read(&mut buf[..want], Phase::Body) {
            Ok(n) => n,
            Err(Error::ConnectionClosed) => return Ok(0),
            Err(e) => return Err(e),
        };

        if let Some(mask) = self.rx_mask {
            apply_mask(&mut buf[..n], mask, self.rx_mask_index);
        }
        self.rx_mask_index += n;
        self.rx_remaining -= n as u64;
        Ok(n)
    }

    /// Next payload byte without consuming it
    pub fn peek(&mut self) -> Result<Option<u8>> {
        if self.state == WsState::Open && self.rx_remaining == 0 {
            return Ok(None);
        }

        let byte = self.session_mut().peek()?;
        Ok(match (self.state, self.rx_mask) {
            (WsState::Open, Some(mask)) => byte.map(|b| b ^ mask[self.rx_mask_index % 4]),
            _ => byte,
        })
    }

    /// Payload bytes left in the current frame (raw bytes before the upgrade)
    pub fn available(&mut self) -> Result<u64> {
        if self.state != WsState::Open {
            return Ok(self.session_mut().available()? as u64);
        }
        Ok(self.rx_remaining)
    }

    /// Read the rest of the current frame as text
    pub fn read_string(&mut self) -> Result<String> {
        let payload = self.read_payload()?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    /// Close the connection
    pub fn stop(&mut self) {
        if let Err(e) = self.http.close() {
            log::debug!("close failed: {}", e);
        }
        self.state = WsState::Closed;
        self.tx_opcode = None;
        self.reset_rx();
    }

    /// Whether the transport is still up
    pub fn connected(&mut self) -> bool {
        self.state != WsState::Closed && self.session_mut().connected()
    }

    /// The HTTP client the connection was opened with
    pub fn http(&mut self) -> &mut HttpClient<T> {
        &mut self.http
    }

    fn session_mut(&mut self) -> &mut HttpSession<T> {
        self.http.session_mut()
    }

    fn masked_frame(&mut self, opcode: Opcode, payload: &[u8]) -> bytes::Bytes {
        let mut mask = [0u8; 4];
        self.entropy.fill(&mut mask);
        encode_frame(opcode, payload, mask)
    }

    fn read_payload(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        let mut chunk = [0u8; 256];
        while self.rx_remaining > 0 {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            payload.extend_from_slice(&chunk[..n]);
        }
        Ok(payload)
    }

    /// Discard what is left of the current frame
    fn flush_rx(&mut self) -> Result<()> {
        while self.rx_remaining > 0 {
            let step = self.rx_remaining.min(usize::MAX as u64) as usize;
            self.http.session_mut().skip(step, Phase::Body)?;
            self.rx_remaining -= step as u64;
        }
        Ok(())
    }

    fn reset_rx(&mut self) {
        self.rx_remaining = 0;
        self.rx_opcode = Opcode::Continuation;
        self.rx_data_opcode = Opcode::Continuation;
        self.rx_final = false;
        self.rx_mask = None;
        self.rx_mask_index = 0;
    }
}
