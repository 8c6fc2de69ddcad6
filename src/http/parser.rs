//! HTTP message parsing
//!
//! This module provides the pull-based request parser and the status-line
//! parser used by the client side. The request parser reads straight from
//! the session, one phase at a time, so a request never has to fit in a
//! buffer: only lines (bounded) and urlencoded/plain bodies (bounded) are
//! held in memory, and multipart file parts are streamed.

use super::args::Arguments;
use super::chunked::ChunkedDecoder;
use super::config::ServerConfig;
use super::headers::{HeaderAllowList, Headers};
use super::message::{ContentLength, HttpRequest, Method, Version};
use super::multipart;
use super::session::{HttpSession, Phase, Transport};
use super::upload::Upload;
use super::{Error, Result, MAX_HEADER_LINES};
use std::time::Instant;

/// Parse HTTP request line
///
/// Format: METHOD URI VERSION
/// Example: GET /index.html?lang=en HTTP/1.1
///
/// Returns the method, the path, the raw query string (empty if none) and
/// the version.
pub fn parse_request_line(line: &str) -> Result<(Method, &str, &str, Version)> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.len() != 3 {
        return Err(Error::MalformedRequestLine(format!(
            "expected 3 parts, got {}: {:?}",
            parts.len(),
            line
        )));
    }

    let method = Method::from_str(parts[0])?;
    let version = Version::from_str(parts[2])?;
    let (path, query) = match parts[1].split_once('?') {
        Some((path, query)) => (path, query),
        None => (parts[1], ""),
    };

    Ok((method, path, query, version))
}

/// Parse HTTP response status line
///
/// Format: VERSION STATUS REASON
/// Example: HTTP/1.1 101 Switching Protocols
pub fn parse_status_line(line: &str) -> Result<(Version, u16, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(Error::InvalidStatus(format!(
            "Invalid status line: expected at least 2 parts, got {}",
            parts.len()
        )));
    }

    let version = Version::from_str(parts[0])
        .map_err(|_| Error::InvalidStatus(format!("Invalid version: {}", parts[0])))?;
    let status_code = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::InvalidStatus(format!("Invalid status code: {}", parts[1])))?;
    let reason = parts.get(2).map(|r| r.trim().to_string()).unwrap_or_default();

    Ok((version, status_code, reason))
}

/// Extract the `boundary` parameter from a multipart `Content-Type`
pub fn multipart_boundary(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then_some(value)
    })
}

/// How the body of the current request must be consumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyKind {
    /// No body
    None,
    /// `application/x-www-form-urlencoded`
    UrlEncoded,
    /// `multipart/form-data` with its boundary token
    Multipart { boundary: String },
    /// Anything else; stored as the `plain` argument
    Plain,
}

/// HTTP request parser
///
/// Borrows the session for the duration of one request. [`parse_head`]
/// reads the request line and headers; the caller then picks a handler and
/// calls [`parse_body`] with a sink for upload events.
///
/// [`parse_head`]: RequestParser::parse_head
/// [`parse_body`]: RequestParser::parse_body
pub struct RequestParser<'a, T: Transport> {
    session: &'a mut HttpSession<T>,
    config: &'a ServerConfig,
    allow: &'a HeaderAllowList,
}

impl<'a, T: Transport> RequestParser<'a, T> {
    /// Create a parser over `session`
    pub fn new(
        session: &'a mut HttpSession<T>,
        config: &'a ServerConfig,
        allow: &'a HeaderAllowList,
    ) -> Self {
        RequestParser {
            session,
            config,
            allow,
        }
    }

    /// Read the request line and headers into `request`
    ///
    /// The whole head must arrive within `head_wait`; each line is bounded
    /// by `max_line_len` and the block by [`MAX_HEADER_LINES`].
    pub fn parse_head(&mut self, request: &mut HttpRequest) -> Result<BodyKind> {
        let deadline = Instant::now() + self.config.timeouts.head_wait;
        self.session.set_deadline(Some(deadline));
        let result = self.read_head(request);
        self.session.set_deadline(None);
        result
    }

    fn read_head(&mut self, request: &mut HttpRequest) -> Result<BodyKind> {
        request.reset();

        let mut line = self.read_request_line()?;
        // A stray CRLF before the request line is tolerated
        if line.is_empty() {
            line = self.read_request_line()?;
        }

        let (method, path, query, version) = parse_request_line(&line)?;
        log::debug!("{} {} {}", method, path, version);
        request.set_request_line(method, path, query, version);
        request.args_mut().parse_urlencoded(query);

        let mut chunked = false;
        let mut lines = 0;
        loop {
            let line = self.read_header_line()?;
            if line.is_empty() {
                break;
            }
            lines += 1;
            if lines > MAX_HEADER_LINES {
                return Err(Error::InvalidHeader(format!(
                    "more than {} header lines",
                    MAX_HEADER_LINES
                )));
            }

            let (name, value) = Headers::parse_header_line(&line)?;
            if self.allow.allows(name) {
                request.headers_mut().insert(name, value);
            }

            if name.eq_ignore_ascii_case("Host") {
                request.set_host(value);
            } else if name.eq_ignore_ascii_case("Content-Length") {
                let length = value.parse::<usize>().map_err(|_| {
                    Error::InvalidHeader(format!("Invalid Content-Length: {}", value))
                })?;
                request.set_content_length(ContentLength::Known(length));
            } else if name.eq_ignore_ascii_case("Content-Type") {
                request.set_content_type(value);
            } else if name.eq_ignore_ascii_case("Transfer-Encoding") {
                chunked = value
                    .split(',')
                    .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
            }
        }

        if chunked {
            request.set_content_length(ContentLength::Unknown);
        }

        Ok(body_kind(request))
    }

    /// Consume the body described by `kind`
    ///
    /// `on_upload` receives every upload event of multipart file parts as
    /// it happens.
    pub fn parse_body(
        &mut self,
        request: &mut HttpRequest,
        kind: &BodyKind,
        on_upload: &mut dyn FnMut(&Upload),
    ) -> Result<()> {
        match kind {
            BodyKind::None => Ok(()),
            BodyKind::UrlEncoded => {
                let body = self.read_body(request.content_length())?;
                request
                    .args_mut()
                    .parse_urlencoded(&String::from_utf8_lossy(&body));
                Ok(())
            }
            BodyKind::Plain => {
                let body = self.read_body(request.content_length())?;
                if !body.is_empty() {
                    push_plain(request.args_mut(), &body);
                }
                Ok(())
            }
            BodyKind::Multipart { boundary } => {
                let length = request.content_length().known().unwrap_or(0);
                let (args, upload) = request.parts_mut();
                multipart::parse_form(
                    self.session,
                    boundary,
                    length,
                    self.config,
                    args,
                    upload,
                    on_upload,
                )
            }
        }
    }

    fn read_request_line(&mut self) -> Result<String> {
        match self.session.read_line(Phase::Request, self.config.max_line_len) {
            Err(Error::LineTooLong(max)) => Err(Error::MalformedRequestLine(format!(
                "request line longer than {} bytes",
                max
            ))),
            other => other,
        }
    }

    fn read_header_line(&mut self) -> Result<String> {
        match self.session.read_line(Phase::Request, self.config.max_line_len) {
            Err(Error::LineTooLong(max)) => Err(Error::InvalidHeader(format!(
                "header line longer than {} bytes",
                max
            ))),
            other => other,
        }
    }

    /// Read a length-delimited or chunked body, keeping at most `max_body_len` bytes
    fn read_body(&mut self, length: ContentLength) -> Result<Vec<u8>> {
        let max = self.config.max_body_len;

        match length {
            ContentLength::Known(len) => {
                let keep = len.min(max);
                let mut body = vec![0u8; keep];
                self.session.read_exact(&mut body, Phase::Body)?;
                if len > keep {
                    log::warn!("request body of {} bytes truncated to {}", len, keep);
                    self.session.skip(len - keep, Phase::Body)?;
                }
                Ok(body)
            }
            ContentLength::Unknown => self.read_chunked_body(max),
            ContentLength::NotSet => Ok(Vec::new()),
        }
    }

    fn read_chunked_body(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut decoder = ChunkedDecoder::new();
        let mut body = Vec::new();
        let mut pending = Vec::with_capacity(256);
        let mut input = [0u8; 256];
        let mut output = [0u8; 256];

        while !decoder.is_complete() {
            let n = self.session.read(&mut input, Phase::Body)?;
            pending.extend_from_slice(&input[..n]);

            loop {
                let (consumed, decoded, complete) = decoder.decode(&pending, &mut output)?;
                pending.drain(..consumed);

                let room = max.saturating_sub(body.len());
                body.extend_from_slice(&output[..decoded.min(room)]);

                if complete || (consumed == 0 && decoded == 0) {
                    break;
                }
            }

            if pending.len() > self.config.max_line_len {
                return Err(Error::InvalidChunkSize("chunk size line too long".to_string()));
            }
        }

        Ok(body)
    }
}

fn body_kind(request: &HttpRequest) -> BodyKind {
    let has_body = !matches!(
        request.content_length(),
        ContentLength::NotSet | ContentLength::Known(0)
    );
    if !has_body {
        return BodyKind::None;
    }

    let content_type = request.content_type();
    // Multipart is parsed straight off the stream, which needs a known length
    let length_known = request.content_length().known().is_some();
    if length_known && starts_with_ignore_case(content_type, "multipart/") {
        match multipart_boundary(content_type) {
            Some(boundary) => BodyKind::Multipart {
                boundary: boundary.to_string(),
            },
            None => BodyKind::Plain,
        }
    } else if starts_with_ignore_case(content_type, "application/x-www-form-urlencoded") {
        BodyKind::UrlEncoded
    } else {
        BodyKind::Plain
    }
}

fn push_plain(args: &mut Arguments, body: &[u8]) {
    args.push("plain", String::from_utf8_lossy(body));
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::{MemoryTransport, PollEvents};
    use std::time::Duration;

    /// Sends `prefix`, then repeats `filler` forever, one byte per read
    struct DripTransport {
        prefix: &'static [u8],
        filler: &'static [u8],
        sent: usize,
        delay: Duration,
    }

    impl DripTransport {
        fn new(prefix: &'static str, filler: &'static str) -> Self {
            DripTransport {
                prefix: prefix.as_bytes(),
                filler: filler.as_bytes(),
                sent: 0,
                delay: Duration::ZERO,
            }
        }

        fn next(&self) -> u8 {
            match self.prefix.get(self.sent) {
                Some(&b) => b,
                None => self.filler[(self.sent - self.prefix.len()) % self.filler.len()],
            }
        }
    }

    impl Transport for DripTransport {
        fn poll(&mut self, _events: PollEvents, _timeout: Option<Duration>) -> Result<bool> {
            std::thread::sleep(self.delay);
            Ok(true)
        }

        fn available(&mut self) -> Result<usize> {
            Ok(1)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            if buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.next();
            self.sent += 1;
            Ok(1)
        }

        fn peek(&mut self) -> Result<Option<u8>> {
            Ok(Some(self.next()))
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            Ok(buf.len())
        }

        fn connected(&mut self) -> bool {
            true
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn parse_drip(transport: DripTransport, config: &ServerConfig) -> (Result<BodyKind>, usize) {
        let allow = HeaderAllowList::new(["X-A"]);
        let mut session = HttpSession::new(transport, config.timeouts);
        let mut request = HttpRequest::new(config);

        let result = RequestParser::new(&mut session, config, &allow).parse_head(&mut request);
        assert_eq!(session.deadline(), None);
        (result, session.get_ref().sent)
    }

    fn parse(raw: &str, allow: &[&str]) -> Result<HttpRequest> {
        let config = ServerConfig::default();
        let allow = HeaderAllowList::new(allow.iter().copied());
        let mut session = HttpSession::new(MemoryTransport::with_input(raw), config.timeouts);
        let mut request = HttpRequest::new(&config);

        let mut parser = RequestParser::new(&mut session, &config, &allow);
        let kind = parser.parse_head(&mut request)?;
        parser.parse_body(&mut request, &kind, &mut |_| {})?;
        Ok(request)
    }

    #[test]
    fn test_parse_request_line() {
        let (method, path, query, version) =
            parse_request_line("GET /index.html?a=1&b=2 HTTP/1.0").unwrap();
        assert_eq!(method, Method::Get);
        assert_eq!(path, "/index.html");
        assert_eq!(query, "a=1&b=2");
        assert_eq!(version, Version::Http10);
    }

    #[test]
    fn test_request_line_errors() {
        assert!(matches!(
            parse_request_line("GET /"),
            Err(Error::MalformedRequestLine(_))
        ));
        assert!(matches!(
            parse_request_line("BREW /pot HTTP/1.1"),
            Err(Error::UnsupportedMethod(_))
        ));
        assert!(matches!(
            parse_request_line("GET / HTTP/3"),
            Err(Error::MalformedRequestLine(_))
        ));
    }

    #[test]
    fn test_parse_status_line() {
        let (version, code, reason) = parse_status_line("HTTP/1.1 101 Switching Protocols").unwrap();
        assert_eq!(version, Version::Http11);
        assert_eq!(code, 101);
        assert_eq!(reason, "Switching Protocols");

        assert_eq!(parse_status_line("HTTP/1.0 404").unwrap().1, 404);
        assert!(parse_status_line("garbage").is_err());
        assert!(parse_status_line("HTTP/1.1 abc OK").is_err());
    }

    #[test]
    fn test_multipart_boundary() {
        assert_eq!(
            multipart_boundary("multipart/form-data; boundary=----xyz"),
            Some("----xyz")
        );
        assert_eq!(
            multipart_boundary("multipart/form-data; charset=utf-8; Boundary=\"q b\""),
            Some("q b")
        );
        assert_eq!(multipart_boundary("multipart/form-data"), None);
    }

    #[test]
    fn test_get_with_query_and_collected_headers() {
        let request = parse(
            "GET /search?q=rust+lang&page=2 HTTP/1.1\r\n\
             Host: example.com\r\n\
             User-Agent: test\r\n\
             Cookie: secret\r\n\
             \r\n",
            &["user-agent"],
        )
        .unwrap();

        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.uri(), "/search");
        assert_eq!(request.host(), "example.com");
        assert_eq!(request.args().get("q"), Some("rust lang"));
        assert_eq!(request.args().get("page"), Some("2"));
        assert_eq!(request.headers().get("User-Agent"), Some("test"));
        assert_eq!(request.headers().get("Cookie"), None);
        assert_eq!(request.headers().len(), 1);
    }

    #[test]
    fn test_urlencoded_body_follows_query_args() {
        let body = "name=J%C3%BCrgen&tag=a&tag=b";
        let raw = format!(
            "POST /form?src=q HTTP/1.1\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let request = parse(&raw, &[]).unwrap();

        let names: Vec<_> = request.args().iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["src", "name", "tag", "tag"]);
        assert_eq!(request.args().get("name"), Some("Jürgen"));
        assert_eq!(request.args().value_at(3), Some("b"));
        assert_eq!(request.content_length(), ContentLength::Known(body.len()));
    }

    #[test]
    fn test_opaque_body_becomes_plain_argument() {
        let request = parse(
            "PUT /data HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 11\r\n\r\n{\"a\": true}",
            &[],
        )
        .unwrap();

        assert_eq!(request.method(), Method::Put);
        assert_eq!(request.args().get("plain"), Some("{\"a\": true}"));
    }

    #[test]
    fn test_chunked_request_body() {
        let request = parse(
            "POST /c HTTP/1.1\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Transfer-Encoding: chunked\r\n\r\n\
             4\r\na=1&\r\n3\r\nb=2\r\n0\r\n\r\n",
            &[],
        )
        .unwrap();

        assert_eq!(request.content_length(), ContentLength::Unknown);
        assert_eq!(request.args().get("a"), Some("1"));
        assert_eq!(request.args().get("b"), Some("2"));
    }

    #[test]
    fn test_short_body_times_out() {
        let result = parse(
            "POST /x HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 10\r\n\r\nabc",
            &[],
        );
        assert!(matches!(result, Err(Error::BodyTimeout)));
    }

    #[test]
    fn test_incomplete_headers_time_out() {
        let result = parse("GET / HTTP/1.1\r\nHost: a", &[]);
        assert!(matches!(result, Err(Error::HeaderTimeout)));
    }

    #[test]
    fn test_invalid_header_line() {
        let result = parse("GET / HTTP/1.1\r\nNoColonHere\r\n\r\n", &[]);
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_oversized_body_is_drained() {
        let config = ServerConfig::default().max_body_len(4);
        let allow = HeaderAllowList::new(["X-A"]);
        let transport = MemoryTransport::with_input(
            "POST /x HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789",
        );
        let mut session = HttpSession::new(transport.clone(), config.timeouts);
        let mut request = HttpRequest::new(&config);

        let mut parser = RequestParser::new(&mut session, &config, &allow);
        let kind = parser.parse_head(&mut request).unwrap();
        assert_eq!(kind, BodyKind::Plain);
        parser.parse_body(&mut request, &kind, &mut |_| {}).unwrap();

        assert_eq!(request.args().get("plain"), Some("0123"));
        assert_eq!(transport.pending_input(), 0);
    }

    #[test]
    fn test_endless_request_line_is_cut_off() {
        let config = ServerConfig::default().max_line_len(64);
        let (result, sent) = parse_drip(DripTransport::new("", "a"), &config);

        assert!(matches!(result, Err(Error::MalformedRequestLine(_))));
        assert_eq!(sent, 65);
    }

    #[test]
    fn test_endless_header_line_is_cut_off() {
        let config = ServerConfig::default().max_line_len(64);
        let (result, sent) =
            parse_drip(DripTransport::new("GET / HTTP/1.1\r\nX-Long: ", "a"), &config);

        assert!(matches!(result, Err(Error::InvalidHeader(_))));
        assert!(sent < 100);
    }

    #[test]
    fn test_endless_header_block_is_cut_off() {
        let config = ServerConfig::default();
        let (result, sent) =
            parse_drip(DripTransport::new("GET / HTTP/1.1\r\n", "X-A: b\r\n"), &config);

        assert!(matches!(result, Err(Error::InvalidHeader(_))));
        assert!(sent <= 16 + (MAX_HEADER_LINES + 1) * 8);
    }

    #[test]
    fn test_slow_head_hits_deadline() {
        let config = ServerConfig::default()
            .max_line_len(1 << 20)
            .head_wait(Duration::from_millis(30));
        let mut transport = DripTransport::new("", "a");
        transport.delay = Duration::from_millis(1);

        let (result, sent) = parse_drip(transport, &config);

        assert!(matches!(result, Err(Error::HeaderTimeout)));
        assert!(sent < 1000);
    }

    #[test]
    fn test_table_overflow_is_silent_on_request_path() {
        let config = ServerConfig::default().max_headers(2).max_arguments(2);
        let allow = HeaderAllowList::new(["X-A", "X-B", "X-C"]);
        let transport = MemoryTransport::with_input(
            "GET /t?a=1&b=2&c=3 HTTP/1.1\r\n\
             X-A: 1\r\nX-B: 2\r\nX-C: 3\r\nHost: h\r\n\r\n",
        );
        let mut session = HttpSession::new(transport, config.timeouts);
        let mut request = HttpRequest::new(&config);

        let kind = RequestParser::new(&mut session, &config, &allow)
            .parse_head(&mut request)
            .unwrap();

        assert_eq!(kind, BodyKind::None);
        assert_eq!(request.args().len(), 2);
        assert_eq!(request.args().get("b"), Some("2"));
        assert_eq!(request.args().get("c"), None);
        assert_eq!(request.headers().len(), 2);
        assert_eq!(request.headers().get("X-B"), Some("2"));
        assert_eq!(request.headers().get("X-C"), None);
        assert_eq!(request.host(), "h");
    }
}
