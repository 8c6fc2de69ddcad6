//! Response assembly
//!
//! [`ResponseContext`] collects the status, headers and length policy of
//! the response being built and writes it to the session. The framing
//! decision (declared length, chunked, or unframed for HTTP/1.0) is taken
//! exactly once, when the head is flushed, and holds for the rest of the
//! response.

use super::chunked::{ChunkHeader, LAST_CHUNK};
use super::headers::Headers;
use super::message::{reason_phrase, ContentLength, Version};
use super::session::{HttpSession, Transport};
use super::{Error, Result, CRLF};
use std::io::{ErrorKind, Read};

/// Content type used when a response does not name one
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// State of the response being built for the current request
#[derive(Debug, Clone)]
pub struct ResponseContext {
    code: u16,
    content_length: ContentLength,
    headers: Headers,
    chunked: bool,
    headers_sent: bool,
    /// Length framed in the head, if any
    declared: Option<usize>,
    body_sent: usize,
}

impl ResponseContext {
    pub fn new() -> Self {
        ResponseContext {
            code: 0,
            content_length: ContentLength::NotSet,
            headers: Headers::new(),
            chunked: false,
            headers_sent: false,
            declared: None,
            body_sent: 0,
        }
    }

    /// Forget the previous response
    pub fn reset(&mut self) {
        self.code = 0;
        self.content_length = ContentLength::NotSet;
        self.headers.clear();
        self.chunked = false;
        self.headers_sent = false;
        self.declared = None;
        self.body_sent = 0;
    }

    /// Status code of the flushed head, 0 before that
    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn content_length(&self) -> ContentLength {
        self.content_length
    }

    /// Headers accumulated so far
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Whether the body is being sent with chunked framing
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Queue a response header
    ///
    /// With `replace`, previously queued headers of the same name
    /// (case-insensitive) are dropped first.
    pub fn send_header(&mut self, name: &str, value: &str, replace: bool) -> Result<()> {
        if self.headers_sent {
            return Err(Error::HeadersAlreadySent);
        }
        if replace {
            self.headers.remove(name);
        }
        if !self.headers.insert(name, value) {
            log::warn!("response header table full, dropping {}", name);
        }
        Ok(())
    }

    /// Declare the body length before the head is sent
    ///
    /// [`ContentLength::Unknown`] selects chunked framing for HTTP/1.1.
    pub fn set_content_length(&mut self, length: ContentLength) -> Result<()> {
        if self.headers_sent {
            return Err(Error::HeadersAlreadySent);
        }
        self.content_length = length;
        Ok(())
    }

    /// Build the status line and headers, fixing the framing
    pub fn prepare_head(&mut self, version: Version, code: u16, content_type: &str) -> Vec<u8> {
        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(b"HTTP/1.");
        head.extend_from_slice(version.minor().to_string().as_bytes());
        head.push(b' ');
        head.extend_from_slice(code.to_string().as_bytes());
        head.push(b' ');
        head.extend_from_slice(reason_phrase(code).as_bytes());
        head.extend_from_slice(CRLF.as_bytes());

        let mut framing = Headers::with_capacity(4);
        if !self.headers.contains("Content-Type") {
            let content_type = if content_type.is_empty() {
                DEFAULT_CONTENT_TYPE
            } else {
                content_type
            };
            framing.insert("Content-Type", content_type);
        }
        framing.write_wire(&mut head);
        framing.clear();

        match self.content_length {
            ContentLength::Known(len) => {
                if !self.headers.contains("Content-Length") {
                    framing.insert("Content-Length", len.to_string());
                }
                self.declared = Some(len);
            }
            ContentLength::Unknown if version == Version::Http11 => {
                self.chunked = true;
                framing.insert("Accept-Ranges", "none");
                framing.insert("Transfer-Encoding", "chunked");
            }
            // HTTP/1.0 body ends when the connection closes
            ContentLength::Unknown => {}
            ContentLength::NotSet => {
                framing.insert("Content-Length", "0");
                self.declared = Some(0);
            }
        }
        if !self.headers.contains("Connection") {
            framing.insert("Connection", "close");
        }

        self.headers.write_wire(&mut head);
        framing.write_wire(&mut head);
        head.extend_from_slice(CRLF.as_bytes());

        self.code = code;
        self.headers_sent = true;
        head
    }

    /// Send a complete response
    ///
    /// Unless a length was declared earlier, the body's own length is used.
    pub fn send<T: Transport>(
        &mut self,
        session: &mut HttpSession<T>,
        version: Version,
        code: u16,
        content_type: &str,
        body: &[u8],
    ) -> Result<()> {
        if self.headers_sent {
            return Err(Error::HeadersAlreadySent);
        }
        if self.content_length == ContentLength::NotSet {
            self.content_length = ContentLength::Known(body.len());
        }

        let head = self.prepare_head(version, code, content_type);
        log::debug!("response {} ({:?})", code, self.content_length);
        session.write_all(&head)?;

        if !body.is_empty() {
            self.send_content(session, body)?;
        }
        Ok(())
    }

    /// Send body bytes after the head
    ///
    /// In chunked mode every call is one chunk and an empty call ends the
    /// body. With a declared length, bytes past it are dropped.
    pub fn send_content<T: Transport>(
        &mut self,
        session: &mut HttpSession<T>,
        data: &[u8],
    ) -> Result<()> {
        if self.chunked {
            if data.is_empty() {
                self.chunked = false;
                return session.write_all(LAST_CHUNK);
            }
            session.write_all(ChunkHeader::new(data.len()).as_bytes())?;
            session.write_all(data)?;
            return session.write_all(CRLF.as_bytes());
        }

        let data = match self.declared {
            Some(declared) => {
                let room = declared.saturating_sub(self.body_sent);
                if data.len() > room {
                    log::warn!(
                        "dropping {} bytes beyond declared Content-Length {}",
                        data.len() - room,
                        declared
                    );
                }
                &data[..data.len().min(room)]
            }
            None => data,
        };

        self.body_sent += data.len();
        session.write_all(data)
    }

    /// End a chunked body that the handler left open
    pub fn finalize<T: Transport>(&mut self, session: &mut HttpSession<T>) -> Result<()> {
        if self.headers_sent && self.chunked {
            self.chunked = false;
            session.write_all(LAST_CHUNK)?;
        }
        Ok(())
    }

    /// Send `size` bytes from `source` as a 200 response
    ///
    /// A `.gz` name gets `Content-Encoding: gzip` unless the type already
    /// says the client receives the archive itself. The body is copied in
    /// `unit`-sized pieces. Returns the number of body bytes sent.
    #[allow(clippy::too_many_arguments)]
    pub fn stream_file<T: Transport, R: Read>(
        &mut self,
        session: &mut HttpSession<T>,
        version: Version,
        source: &mut R,
        size: usize,
        name: &str,
        content_type: &str,
        unit: usize,
    ) -> Result<usize> {
        self.set_content_length(ContentLength::Known(size))?;
        if is_gzip_encoded(name, content_type) {
            self.send_header("Content-Encoding", "gzip", false)?;
        }
        self.send(session, version, 200, content_type, &[])?;

        let mut piece = vec![0u8; unit.max(1)];
        let mut sent = 0;
        while sent < size {
            let want = piece.len().min(size - sent);
            let n = match source.read(&mut piece[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.send_content(session, &piece[..n])?;
            sent += n;
        }

        if sent < size {
            log::warn!("{} ended after {} of {} bytes", name, sent, size);
        }
        Ok(sent)
    }
}

impl Default for ResponseContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a file named `name` is served pre-compressed
pub fn is_gzip_encoded(name: &str, content_type: &str) -> bool {
    name.ends_with(".gz")
        && content_type != "application/x-gzip"
        && content_type != "application/octet-stream"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::config::Timeouts;
    use crate::http::session::MemoryTransport;

    fn session() -> (MemoryTransport, HttpSession<MemoryTransport>) {
        let transport = MemoryTransport::new();
        let session = HttpSession::new(transport.clone(), Timeouts::default());
        (transport, session)
    }

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_simple_send() {
        let (wire, mut session) = session();
        let mut response = ResponseContext::new();

        response
            .send(&mut session, Version::Http11, 200, "text/plain", b"hello")
            .unwrap();

        assert_eq!(
            text(wire.written()),
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: 5\r\n\
             Connection: close\r\n\
             \r\n\
             hello"
        );
        assert!(matches!(
            response.send(&mut session, Version::Http11, 200, "", b""),
            Err(Error::HeadersAlreadySent)
        ));
    }

    #[test]
    fn test_default_type_and_version_echo() {
        let mut response = ResponseContext::new();
        let head = text(response.prepare_head(Version::Http10, 299, ""));

        assert!(head.starts_with("HTTP/1.0 299 Unknown\r\n"));
        assert!(head.contains("Content-Type: text/html\r\n"));
    }

    #[test]
    fn test_user_headers_win_over_defaults() {
        let mut response = ResponseContext::new();
        response.send_header("X-Trace", "a", false).unwrap();
        response.send_header("x-trace", "b", true).unwrap();
        response.send_header("Connection", "keep-alive", false).unwrap();
        response.send_header("Content-Type", "application/json", false).unwrap();
        response.set_content_length(ContentLength::Known(2)).unwrap();

        let head = text(response.prepare_head(Version::Http11, 201, "text/plain"));
        assert!(head.contains("x-trace: b\r\n"));
        assert!(!head.contains("X-Trace: a"));
        assert!(head.contains("Connection: keep-alive\r\n"));
        assert!(!head.contains("Connection: close"));
        assert!(head.contains("Content-Type: application/json\r\n"));
        assert!(!head.contains("text/plain"));
        assert!(head.contains("Content-Length: 2\r\n"));

        assert!(matches!(
            response.send_header("Late", "1", false),
            Err(Error::HeadersAlreadySent)
        ));
    }

    #[test]
    fn test_chunked_stream() {
        let (wire, mut session) = session();
        let mut response = ResponseContext::new();

        response.set_content_length(ContentLength::Unknown).unwrap();
        response
            .send(&mut session, Version::Http11, 200, "text/plain", b"")
            .unwrap();
        assert!(response.is_chunked());
        response.send_content(&mut session, b"Hello").unwrap();
        response.send_content(&mut session, b" World").unwrap();
        response.finalize(&mut session).unwrap();
        // Already finalized
        response.finalize(&mut session).unwrap();

        let out = text(wire.written());
        assert!(out.contains("Accept-Ranges: none\r\nTransfer-Encoding: chunked\r\n"));
        assert!(!out.contains("Content-Length"));
        assert!(out.ends_with("\r\n\r\n5\r\nHello\r\n6\r\n World\r\n0\r\n\r\n"));
    }

    #[test]
    fn test_empty_content_ends_chunked_body() {
        let (wire, mut session) = session();
        let mut response = ResponseContext::new();

        response.set_content_length(ContentLength::Unknown).unwrap();
        response
            .send(&mut session, Version::Http11, 200, "", b"")
            .unwrap();
        response.send_content(&mut session, b"x").unwrap();
        response.send_content(&mut session, b"").unwrap();
        response.finalize(&mut session).unwrap();

        assert!(text(wire.written()).ends_with("1\r\nx\r\n0\r\n\r\n"));
        assert!(!response.is_chunked());
    }

    #[test]
    fn test_unknown_length_on_http10_is_unframed() {
        let (wire, mut session) = session();
        let mut response = ResponseContext::new();

        response.set_content_length(ContentLength::Unknown).unwrap();
        response
            .send(&mut session, Version::Http10, 200, "text/plain", b"")
            .unwrap();
        response.send_content(&mut session, b"raw").unwrap();

        let out = text(wire.written());
        assert!(!response.is_chunked());
        assert!(!out.contains("Transfer-Encoding"));
        assert!(!out.contains("Content-Length"));
        assert!(out.ends_with("\r\n\r\nraw"));
    }

    #[test]
    fn test_bytes_beyond_declared_length_dropped() {
        let (wire, mut session) = session();
        let mut response = ResponseContext::new();

        response.set_content_length(ContentLength::Known(4)).unwrap();
        response
            .send(&mut session, Version::Http11, 200, "text/plain", b"abc")
            .unwrap();
        response.send_content(&mut session, b"defg").unwrap();

        assert!(text(wire.written()).ends_with("Content-Length: 4\r\nConnection: close\r\n\r\nabcd"));
    }

    #[test]
    fn test_stream_file_gzip_rule() {
        assert!(is_gzip_encoded("app.js.gz", "application/javascript"));
        assert!(!is_gzip_encoded("app.js.gz", "application/x-gzip"));
        assert!(!is_gzip_encoded("app.js.gz", "application/octet-stream"));
        assert!(!is_gzip_encoded("app.js", "application/javascript"));
    }

    #[test]
    fn test_stream_file_in_units() {
        let (wire, mut session) = session();
        let mut response = ResponseContext::new();
        let contents = vec![b'z'; 3000];

        let sent = response
            .stream_file(
                &mut session,
                Version::Http11,
                &mut contents.as_slice(),
                contents.len(),
                "style.css.gz",
                "text/css",
                1460,
            )
            .unwrap();

        assert_eq!(sent, 3000);
        let out = wire.written();
        let head_end = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let head = String::from_utf8_lossy(&out[..head_end]);
        assert!(head.contains("Content-Encoding: gzip\r\n"));
        assert!(head.contains("Content-Length: 3000\r\n"));
        assert_eq!(&out[head_end..], contents.as_slice());
    }
}
