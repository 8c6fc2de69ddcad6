//! HTTP message types
//!
//! This module defines the request-side types: methods, versions, status
//! codes, the content-length sentinels and the parsed request itself.

use super::args::Arguments;
use super::config::ServerConfig;
use super::headers::Headers;
use super::upload::Upload;
use super::{Error, Result, CONTENT_LENGTH_NOT_SET, CONTENT_LENGTH_UNKNOWN};
use std::fmt;

/// HTTP methods
///
/// `Any` never appears on the wire; it is used when registering a handler
/// that accepts every method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Any,
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    /// Parse a request-line method token
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(Error::UnsupportedMethod(s.to_string())),
        }
    }

    /// Convert method to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Any => "ANY",
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }

    /// Whether a handler registered for `self` accepts a request using `method`
    pub fn accepts(self, method: Method) -> bool {
        self == Method::Any || self == method
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
}

impl Version {
    /// Parse version from string
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(Error::MalformedRequestLine(format!("unknown version {}", s))),
        }
    }

    /// Convert version to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }

    /// Minor version number: 0 for HTTP/1.0, 1 for HTTP/1.1
    pub fn minor(&self) -> u8 {
        match self {
            Version::Http10 => 0,
            Version::Http11 => 1,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reason phrase for any code, `Unknown` when the code is not in the table
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Time-out",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Large",
        415 => "Unsupported Media Type",
        416 => "Requested range not satisfiable",
        417 => "Expectation Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Time-out",
        505 => "HTTP Version not supported",
        _ => "Unknown",
    }
}

/// Declared body length
///
/// The two sentinels never collide with a real length: `Unknown` means the
/// length is explicitly not known up front (chunked), `NotSet` means
/// nothing has been declared yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentLength {
    Known(usize),
    Unknown,
    #[default]
    NotSet,
}

impl ContentLength {
    /// Convert from the raw `usize` form, mapping the reserved values
    pub fn from_raw(raw: usize) -> Self {
        match raw {
            CONTENT_LENGTH_UNKNOWN => ContentLength::Unknown,
            CONTENT_LENGTH_NOT_SET => ContentLength::NotSet,
            n => ContentLength::Known(n),
        }
    }

    /// Convert to the raw `usize` form
    pub fn to_raw(self) -> usize {
        match self {
            ContentLength::Known(n) => n,
            ContentLength::Unknown => CONTENT_LENGTH_UNKNOWN,
            ContentLength::NotSet => CONTENT_LENGTH_NOT_SET,
        }
    }

    /// The length if one is known
    pub fn known(self) -> Option<usize> {
        match self {
            ContentLength::Known(n) => Some(n),
            _ => None,
        }
    }
}

impl From<usize> for ContentLength {
    fn from(raw: usize) -> Self {
        ContentLength::from_raw(raw)
    }
}

/// A parsed HTTP request
///
/// One instance lives for the whole connection and is reset before each
/// request, so its tables and upload buffer are allocated only once.
#[derive(Debug)]
pub struct HttpRequest {
    method: Method,
    path: String,
    query: String,
    version: Version,
    host: String,
    content_length: ContentLength,
    content_type: String,
    args: Arguments,
    headers: Headers,
    upload: Upload,
}

impl HttpRequest {
    /// Create an empty request sized according to `config`
    pub fn new(config: &ServerConfig) -> Self {
        HttpRequest {
            method: Method::Get,
            path: String::new(),
            query: String::new(),
            version: Version::default(),
            host: String::new(),
            content_length: ContentLength::NotSet,
            content_type: String::new(),
            args: Arguments::with_capacity(config.max_arguments),
            headers: Headers::with_capacity(config.max_headers),
            upload: Upload::new(config.upload_buffer_len),
        }
    }

    /// Forget everything about the previous request
    pub fn reset(&mut self) {
        self.method = Method::Get;
        self.path.clear();
        self.query.clear();
        self.version = Version::default();
        self.host.clear();
        self.content_length = ContentLength::NotSet;
        self.content_type.clear();
        self.args.clear();
        self.headers.clear();
        self.upload.reset();
    }

    /// Get the request method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Request path, without the query string
    pub fn uri(&self) -> &str {
        &self.path
    }

    /// Raw query string (text after the first `?`)
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Get the HTTP version
    pub fn version(&self) -> Version {
        self.version
    }

    /// Value of the `Host` header, empty if absent
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Declared body length
    pub fn content_length(&self) -> ContentLength {
        self.content_length
    }

    /// Value of the `Content-Type` header, empty if absent
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Query and body arguments
    pub fn args(&self) -> &Arguments {
        &self.args
    }

    /// Collected (allow-listed) headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Upload record of the current multipart file part
    pub fn upload(&self) -> &Upload {
        &self.upload
    }

    pub(crate) fn set_request_line(&mut self, method: Method, path: &str, query: &str, version: Version) {
        self.method = method;
        self.path.push_str(path);
        self.query.push_str(query);
        self.version = version;
    }

    pub(crate) fn set_host(&mut self, host: &str) {
        self.host.clear();
        self.host.push_str(host);
    }

    pub(crate) fn set_content_length(&mut self, length: ContentLength) {
        self.content_length = length;
    }

    pub(crate) fn set_content_type(&mut self, content_type: &str) {
        self.content_type.clear();
        self.content_type.push_str(content_type);
    }

    pub(crate) fn args_mut(&mut self) -> &mut Arguments {
        &mut self.args
    }

    pub(crate) fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut Arguments, &mut Upload) {
        (&mut self.args, &mut self.upload)
    }
}
