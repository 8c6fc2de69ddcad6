//! HTTP client
//!
//! This module provides the small HTTP/1.1 client the WebSocket opening
//! handshake rides on: write a request line and headers, read the status
//! line and response headers. It is also enough for plain request/response
//! use when an upgrade is refused.

use super::chunked::ChunkedDecoder;
use super::config::Timeouts;
use super::headers::Headers;
use super::message::Method;
use super::parser::parse_status_line;
use super::session::{HttpSession, Phase, Transport};
use super::{Error, Result, CRLF, MAX_HEADER_LINES};

/// Longest status or header line read from a server
pub const MAX_RESPONSE_LINE: usize = 1024;

/// Default cap on a response body read into memory
pub const DEFAULT_MAX_RESPONSE_BODY: usize = 64 * 1024;

/// HTTP client over one transport
///
/// A request is assembled with [`begin_request`](Self::begin_request),
/// [`send_header`](Self::send_header) and sent by
/// [`end_request`](Self::end_request).
pub struct HttpClient<T: Transport> {
    session: HttpSession<T>,
    host: String,
    request: Vec<u8>,
    max_body_len: usize,
}

impl<T: Transport> HttpClient<T> {
    /// Create a client talking to `host` (used for the `Host` header)
    pub fn new(transport: T, host: impl Into<String>, timeouts: Timeouts) -> Self {
        HttpClient {
            session: HttpSession::new(transport, timeouts),
            host: host.into(),
            request: Vec::with_capacity(512),
            max_body_len: DEFAULT_MAX_RESPONSE_BODY,
        }
    }

    /// Limit the size of bodies returned by [`read_response_body`](Self::read_response_body)
    #[must_use]
    pub fn max_body_len(mut self, len: usize) -> Self {
        self.max_body_len = len;
        self
    }

    pub fn body_limit(&self) -> usize {
        self.max_body_len
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Start a request: `METHOD path HTTP/1.1`
    pub fn begin_request(&mut self, method: Method, path: &str) {
        self.request.clear();
        self.request.extend_from_slice(method.as_str().as_bytes());
        self.request.push(b' ');
        self.request
            .extend_from_slice(if path.is_empty() { "/" } else { path }.as_bytes());
        self.request.extend_from_slice(b" HTTP/1.1");
        self.request.extend_from_slice(CRLF.as_bytes());
    }

    /// Add a header line to the request being assembled
    pub fn send_header(&mut self, name: &str, value: &str) {
        self.request.extend_from_slice(name.as_bytes());
        self.request.extend_from_slice(b": ");
        self.request.extend_from_slice(value.as_bytes());
        self.request.extend_from_slice(CRLF.as_bytes());
    }

    /// Terminate the header block and send the request
    pub fn end_request(&mut self) -> Result<()> {
        self.request.extend_from_slice(CRLF.as_bytes());
        log::trace!("request:\n{}", String::from_utf8_lossy(&self.request));
        let result = self.session.write_all(&self.request);
        self.request.clear();
        result
    }

    /// Send raw body bytes after [`end_request`](Self::end_request)
    pub fn send_body(&mut self, body: &[u8]) -> Result<()> {
        self.session.write_all(body)
    }

    /// Read the status line of the final response
    ///
    /// Interim `100 Continue` responses are skipped along with their
    /// headers.
    pub fn response_status_code(&mut self) -> Result<u16> {
        loop {
            let line = self.read_line()?;
            let (_, code, reason) = parse_status_line(&line)?;
            log::trace!("status {} {}", code, reason);

            if code != 100 {
                return Ok(code);
            }
            self.skip_response_headers()?;
        }
    }

    /// Read the response headers up to the blank line
    pub fn read_response_headers(&mut self) -> Result<Headers> {
        let mut headers = Headers::new();
        for _ in 0..=MAX_HEADER_LINES {
            let line = self.read_line()?;
            if line.is_empty() {
                return Ok(headers);
            }
            let (name, value) = Headers::parse_header_line(&line)?;
            headers.insert(name, value);
        }
        Err(too_many_header_lines())
    }

    /// Discard the response headers up to the blank line
    pub fn skip_response_headers(&mut self) -> Result<()> {
        for _ in 0..=MAX_HEADER_LINES {
            if self.read_line()?.is_empty() {
                return Ok(());
            }
        }
        Err(too_many_header_lines())
    }

    /// Read a response body framed as `headers` describe
    ///
    /// Without `Content-Length` or chunked coding the body runs until the
    /// server closes the connection or stops sending. A declared length
    /// above the body limit is rejected before anything is read; chunked
    /// and close-delimited bodies fail with `BodyTooLarge` once they pass it.
    pub fn read_response_body(&mut self, headers: &Headers) -> Result<Vec<u8>> {
        if let Some(encoding) = headers.get("Transfer-Encoding") {
            if encoding.eq_ignore_ascii_case("chunked") {
                return self.read_chunked_body();
            }
        }

        if let Some(cl_str) = headers.get("Content-Length") {
            let content_length = cl_str
                .parse::<usize>()
                .map_err(|_| Error::InvalidHeader(format!("Invalid Content-Length: {}", cl_str)))?;
            if content_length > self.max_body_len {
                return Err(Error::InvalidHeader(format!(
                    "Content-Length {} exceeds limit of {} bytes",
                    content_length, self.max_body_len
                )));
            }

            let mut body = vec![0u8; content_length];
            self.session.read_exact(&mut body, Phase::Body)?;
            return Ok(body);
        }

        let mut body = Vec::new();
        let mut temp = [0u8; 1024];
        loop {
            match self.session.read(&mut temp, Phase::Body) {
                Ok(n) => {
                    body.extend_from_slice(&temp[..n]);
                    if body.len() > self.max_body_len {
                        return Err(Error::BodyTooLarge(self.max_body_len));
                    }
                }
                Err(Error::ConnectionClosed) | Err(Error::BodyTimeout) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(body)
    }

    fn read_chunked_body(&mut self) -> Result<Vec<u8>> {
        let mut decoder = ChunkedDecoder::new();
        let mut output = Vec::new();
        let mut input_buffer = Vec::new();
        let mut temp = [0u8; 1024];
        let mut decode_buffer = [0u8; 1024];

        while !decoder.is_complete() {
            let n = self.session.read(&mut temp, Phase::Body)?;
            input_buffer.extend_from_slice(&temp[..n]);

            loop {
                let (consumed, decoded, complete) =
                    decoder.decode(&input_buffer, &mut decode_buffer)?;
                output.extend_from_slice(&decode_buffer[..decoded]);
                input_buffer.drain(..consumed);
                if output.len() > self.max_body_len {
                    return Err(Error::BodyTooLarge(self.max_body_len));
                }

                if complete || (consumed == 0 && decoded == 0) {
                    break;
                }
            }
        }

        Ok(output)
    }

    fn read_line(&mut self) -> Result<String> {
        self.session.read_line(Phase::Request, MAX_RESPONSE_LINE)
    }

    /// Close the connection
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }

    /// Get a reference to the underlying session
    pub fn session(&self) -> &HttpSession<T> {
        &self.session
    }

    /// Get a mutable reference to the underlying session
    pub fn session_mut(&mut self) -> &mut HttpSession<T> {
        &mut self.session
    }

    /// Consume the client and return its session
    pub fn into_session(self) -> HttpSession<T> {
        self.session
    }
}

fn too_many_header_lines() -> Error {
    Error::InvalidHeader(format!("more than {} response header lines", MAX_HEADER_LINES))
}
