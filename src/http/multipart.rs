//! `multipart/form-data` body parsing
//!
//! The body is consumed straight off the session. Plain fields become
//! arguments; file fields are streamed through the request's [`Upload`]
//! record, one buffer-full at a time, so a file of any size is received in
//! constant memory.

use super::args::Arguments;
use super::config::ServerConfig;
use super::session::{HttpSession, Phase, Transport};
use super::upload::Upload;
use super::{Error, Result};

/// Default type of a part without its own `Content-Type`
pub const DEFAULT_PART_TYPE: &str = "text/plain";

/// Headers of one body part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHeaders {
    pub name: String,
    /// `Some` for file parts, even when the client sent an empty filename
    pub filename: Option<String>,
    pub content_type: String,
}

impl Default for PartHeaders {
    fn default() -> Self {
        PartHeaders {
            name: String::new(),
            filename: None,
            content_type: DEFAULT_PART_TYPE.to_string(),
        }
    }
}

impl PartHeaders {
    /// Apply one `Content-Disposition` value
    ///
    /// Example: `form-data; name="file"; filename="report.txt"`
    pub fn apply_disposition(&mut self, value: &str) {
        for param in value.split(';').skip(1) {
            let Some((key, val)) = param.split_once('=') else {
                continue;
            };
            let val = val.trim().trim_matches('"');
            match key.trim() {
                k if k.eq_ignore_ascii_case("name") => self.name = val.to_string(),
                k if k.eq_ignore_ascii_case("filename") => self.filename = Some(val.to_string()),
                _ => {}
            }
        }
    }
}

/// Buffered reader bounded by the declared body length
struct BodyReader<'s, T: Transport> {
    session: &'s mut HttpSession<T>,
    /// Body bytes not yet pulled from the transport
    remaining: usize,
    buf: [u8; 256],
    pos: usize,
    len: usize,
    max_line: usize,
}

impl<'s, T: Transport> BodyReader<'s, T> {
    fn new(session: &'s mut HttpSession<T>, length: usize, max_line: usize) -> Self {
        BodyReader {
            session,
            remaining: length,
            buf: [0u8; 256],
            pos: 0,
            len: 0,
            max_line,
        }
    }

    /// Next body byte; running past the declared length is `UploadAborted`
    fn next_byte(&mut self) -> Result<u8> {
        if self.pos == self.len {
            if self.remaining == 0 {
                return Err(Error::UploadAborted);
            }
            let want = self.remaining.min(self.buf.len());
            let n = self.session.read(&mut self.buf[..want], Phase::Body)?;
            self.remaining -= n;
            self.pos = 0;
            self.len = n;
        }

        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// One CRLF-terminated line of at most `max_line` bytes
    fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::with_capacity(64);
        loop {
            let byte = self.next_byte()?;
            if byte == b'\n' {
                break;
            }
            line.push(byte);
            if line.len() - usize::from(byte == b'\r') > self.max_line {
                return Err(Error::LineTooLong(self.max_line));
            }
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Discard whatever is left of the body (the epilogue)
    fn drain(&mut self) -> Result<()> {
        self.pos = self.len;
        let remaining = std::mem::take(&mut self.remaining);
        self.session.skip(remaining, Phase::Body)
    }

    /// Feed part content to `emit` until `delimiter` is consumed
    ///
    /// A partial delimiter match that fails is replayed as content. The
    /// delimiter starts with the only CR it contains, so after a mismatch
    /// the current byte can only restart a match at position 0.
    fn scan_part(&mut self, delimiter: &[u8], mut emit: impl FnMut(u8)) -> Result<()> {
        let mut matched = 0;
        while matched < delimiter.len() {
            let byte = self.next_byte()?;
            if byte == delimiter[matched] {
                matched += 1;
                continue;
            }

            delimiter[..matched].iter().for_each(|&b| emit(b));
            if byte == delimiter[0] {
                matched = 1;
            } else {
                matched = 0;
                emit(byte);
            }
        }
        Ok(())
    }
}

/// Parse a multipart body of `length` bytes
///
/// Plain parts are appended to `args`; file parts drive `upload` and
/// `on_upload` through Start, Write (one per full buffer plus a final
/// partial one), End. If the stream closes, stalls, or runs out of
/// declared length inside a file part, `on_upload` sees `Aborted` and the
/// call fails with [`Error::UploadAborted`].
pub fn parse_form<T: Transport>(
    session: &mut HttpSession<T>,
    boundary: &str,
    length: usize,
    config: &ServerConfig,
    args: &mut Arguments,
    upload: &mut Upload,
    on_upload: &mut dyn FnMut(&Upload),
) -> Result<()> {
    let opening = format!("--{}", boundary);
    let delimiter = format!("\r\n--{}", boundary);
    let mut reader = BodyReader::new(session, length, config.max_line_len);

    if reader.read_line()? != opening {
        log::warn!("multipart body does not start with its boundary");
        return Err(Error::BoundaryMismatch);
    }

    loop {
        let part = read_part_headers(&mut reader)?;

        match &part.filename {
            Some(filename) => {
                log::debug!("upload start: {} ({})", filename, part.content_type);
                upload.start(&part.name, filename, &part.content_type);
                on_upload(upload);

                if let Err(e) = stream_file_part(&mut reader, delimiter.as_bytes(), upload, on_upload) {
                    log::warn!("upload of {} aborted: {}", filename, e);
                    upload.abort();
                    on_upload(upload);
                    return Err(Error::UploadAborted);
                }

                upload.finish();
                log::debug!("upload end: {} bytes", upload.total_size());
                on_upload(upload);
            }
            None => {
                let cap = upload.capacity();
                let mut value = Vec::new();
                reader.scan_part(delimiter.as_bytes(), |byte| {
                    if value.len() < cap {
                        value.push(byte);
                    }
                })?;
                args.push(part.name, String::from_utf8_lossy(&value));
            }
        }

        // "--" after the delimiter closes the body, CRLF opens the next part
        let tail = [reader.next_byte()?, reader.next_byte()?];
        if tail == *b"--" {
            return reader.drain();
        }
        if tail != *b"\r\n" {
            reader.read_line()?;
        }
    }
}

fn read_part_headers<T: Transport>(reader: &mut BodyReader<'_, T>) -> Result<PartHeaders> {
    let mut part = PartHeaders::default();
    loop {
        let line = reader.read_line()?;
        if line.is_empty() {
            return Ok(part);
        }

        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("Content-Disposition") {
            part.apply_disposition(value);
        } else if name.trim().eq_ignore_ascii_case("Content-Type") {
            part.content_type = value.to_string();
        }
    }
}

fn stream_file_part<T: Transport>(
    reader: &mut BodyReader<'_, T>,
    delimiter: &[u8],
    upload: &mut Upload,
    on_upload: &mut dyn FnMut(&Upload),
) -> Result<()> {
    reader.scan_part(delimiter, |byte| {
        if upload.push(byte) {
            upload.begin_write();
            on_upload(upload);
            upload.end_write();
        }
    })?;

    if upload.has_pending() {
        upload.begin_write();
        on_upload(upload);
        upload.end_write();
    }
    Ok(())
}
