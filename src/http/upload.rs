//! File upload streaming record
//!
//! A multipart file part is never held in memory as a whole. The parser
//! fills a fixed-capacity buffer and hands the [`Upload`] to the upload
//! callback each time it is full; the callback must copy what it needs
//! before returning because the next chunk overwrites the buffer.

/// Upload event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// A file part began; name, filename and type are known
    Start,
    /// `buffer()` holds the next `current_size` bytes of the file
    Write,
    /// The closing delimiter was seen; `total_size` is final
    End,
    /// The stream ended or stalled before the closing delimiter
    Aborted,
}

/// Streaming view of the file part being received
#[derive(Debug, Clone)]
pub struct Upload {
    status: UploadStatus,
    name: String,
    filename: String,
    mime_type: String,
    total_size: usize,
    current_size: usize,
    buf: Box<[u8]>,
}

impl Upload {
    /// Create an upload record with a chunk buffer of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Upload {
            status: UploadStatus::Start,
            name: String::new(),
            filename: String::new(),
            mime_type: String::new(),
            total_size: 0,
            current_size: 0,
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
        }
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    /// Form field name of the part
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client-supplied filename
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Declared `Content-Type` of the part
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Bytes delivered so far (final once the status is `End`)
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Bytes valid in `buffer()` for the current `Write` event
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// The current chunk
    pub fn buffer(&self) -> &[u8] {
        &self.buf[..self.current_size]
    }

    /// Capacity of the chunk buffer
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn reset(&mut self) {
        self.status = UploadStatus::Start;
        self.name.clear();
        self.filename.clear();
        self.mime_type.clear();
        self.total_size = 0;
        self.current_size = 0;
    }

    /// Enter `Start` for a new file part
    pub(crate) fn start(&mut self, name: &str, filename: &str, mime_type: &str) {
        self.reset();
        self.name.push_str(name);
        self.filename.push_str(filename);
        self.mime_type.push_str(mime_type);
    }

    /// Append one byte; returns true when the buffer became full
    pub(crate) fn push(&mut self, byte: u8) -> bool {
        self.buf[self.current_size] = byte;
        self.current_size += 1;
        self.current_size == self.buf.len()
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.current_size > 0
    }

    /// Mark the buffered bytes as a `Write` event
    pub(crate) fn begin_write(&mut self) {
        self.status = UploadStatus::Write;
        self.total_size += self.current_size;
    }

    /// Release the buffer after the callback consumed it
    pub(crate) fn end_write(&mut self) {
        self.current_size = 0;
    }

    pub(crate) fn finish(&mut self) {
        self.status = UploadStatus::End;
        self.current_size = 0;
    }

    pub(crate) fn abort(&mut self) {
        self.status = UploadStatus::Aborted;
        self.current_size = 0;
    }
}
