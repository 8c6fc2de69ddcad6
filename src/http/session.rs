//! Transport abstraction and timed session
//!
//! This module provides the transport operations pattern that keeps the
//! protocol code independent of the byte stream underneath it. The engine
//! never blocks on the transport directly: every read or write is preceded
//! by a `poll` bounded by the timeout of the current [`Phase`].

use super::config::Timeouts;
use super::{Error, Result};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Transport operations trait
///
/// Implemented once per platform. Reads and writes are expected to return
/// promptly after a successful `poll`; a read of 0 bytes means the peer has
/// closed the stream.
pub trait Transport {
    /// Poll the transport for events
    ///
    /// Returns true if the transport is ready for the requested operation
    fn poll(&mut self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Number of bytes that can be read without blocking
    fn available(&mut self) -> Result<usize>;

    /// Read data from the transport
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Look at the next byte without consuming it
    fn peek(&mut self) -> Result<Option<u8>>;

    /// Write data to the transport
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Whether the stream is still open or has unread data
    fn connected(&mut self) -> bool;

    /// Close the transport
    fn close(&mut self) -> Result<()>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// Protocol phase a wait belongs to
///
/// The phase selects both the timeout and the error reported when it
/// expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Request line and headers
    Request,
    /// Request body or WebSocket payload
    Body,
    /// Outbound data
    Send,
    /// Waiting for the peer to close
    Close,
}

impl Phase {
    /// Timeout that applies to this phase
    pub fn timeout(self, timeouts: &Timeouts) -> Duration {
        match self {
            Phase::Request => timeouts.data_wait,
            Phase::Body => timeouts.post_wait,
            Phase::Send => timeouts.send_wait,
            Phase::Close => timeouts.close_wait,
        }
    }

    fn timeout_error(self) -> Error {
        match self {
            Phase::Request => Error::HeaderTimeout,
            Phase::Body => Error::BodyTimeout,
            Phase::Send | Phase::Close => Error::Timeout,
        }
    }
}

/// HTTP session wrapping a transport with phase timeouts
pub struct HttpSession<T: Transport> {
    transport: T,
    timeouts: Timeouts,
    /// Overall limit on reads, on top of the per-read phase timeout
    deadline: Option<Instant>,
}

impl<T: Transport> HttpSession<T> {
    /// Create a new HTTP session
    pub fn new(transport: T, timeouts: Timeouts) -> Self {
        HttpSession {
            transport,
            timeouts,
            deadline: None,
        }
    }

    /// Set the timeouts for operations
    pub fn set_timeouts(&mut self, timeouts: Timeouts) {
        self.timeouts = timeouts;
    }

    /// Get the timeouts
    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Bound every following read by `deadline` as well, until cleared
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Wait until data can be read, or fail with the phase's timeout error
    ///
    /// The wait is the phase timeout, shortened to what is left before the
    /// deadline if one is set.
    pub fn wait_readable(&mut self, phase: Phase) -> Result<()> {
        let mut timeout = phase.timeout(&self.timeouts);
        if let Some(deadline) = self.deadline {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(phase.timeout_error());
            }
            timeout = timeout.min(left);
        }
        if !self.transport.poll(PollEvents::Read, Some(timeout))? {
            return Err(phase.timeout_error());
        }
        Ok(())
    }

    /// Read data with timeout
    ///
    /// Never returns 0: a closed stream is reported as `ConnectionClosed`.
    pub fn read(&mut self, buf: &mut [u8], phase: Phase) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.wait_readable(phase)?;

        match self.transport.read(buf)? {
            0 => Err(Error::ConnectionClosed),
            n => Ok(n),
        }
    }

    /// Read a single byte with timeout
    pub fn read_byte(&mut self, phase: Phase) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read(&mut byte, phase)?;
        Ok(byte[0])
    }

    /// Fill `buf` completely, waiting at most one phase timeout per read
    pub fn read_exact(&mut self, buf: &mut [u8], phase: Phase) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read(&mut buf[filled..], phase)?;
        }
        Ok(())
    }

    /// Read and discard `len` bytes
    pub fn skip(&mut self, mut len: usize, phase: Phase) -> Result<()> {
        let mut scratch = [0u8; 256];
        while len > 0 {
            let want = len.min(scratch.len());
            len -= self.read(&mut scratch[..want], phase)?;
        }
        Ok(())
    }

    /// Read one line terminated by LF, stripping the CR before it
    ///
    /// A line holding more than `max_len` bytes before its line ending fails
    /// with `LineTooLong` as soon as the limit is passed.
    pub fn read_line(&mut self, phase: Phase, max_len: usize) -> Result<String> {
        let mut line = Vec::with_capacity(64);
        loop {
            let byte = self.read_byte(phase)?;
            if byte == b'\n' {
                break;
            }
            line.push(byte);
            if line.len() - usize::from(byte == b'\r') > max_len {
                return Err(Error::LineTooLong(max_len));
            }
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }

        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Write all of `buf`, waiting at most the send timeout per write
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let timeout = Phase::Send.timeout(&self.timeouts);
        let mut written = 0;

        while written < buf.len() {
            if !self.transport.poll(PollEvents::Write, Some(timeout))? {
                return Err(Error::Timeout);
            }
            let n = self.transport.write(&buf[written..])?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            written += n;
        }

        Ok(())
    }

    /// Bytes readable without blocking
    pub fn available(&mut self) -> Result<usize> {
        self.transport.available()
    }

    /// Next byte, if one is already buffered
    pub fn peek(&mut self) -> Result<Option<u8>> {
        self.transport.peek()
    }

    /// Whether the underlying transport is still connected
    pub fn connected(&mut self) -> bool {
        self.transport.connected()
    }

    /// Close the session
    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }

    /// Get a reference to the underlying transport
    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the session and return the transport
    pub fn into_inner(self) -> T {
        self.transport
    }
}

/// Plain TCP stream transport driven through `poll(2)`
pub struct TcpTransport {
    stream: TcpStream,
    closed: bool,
}

impl TcpTransport {
    /// Create a new transport from a connected TCP stream
    pub fn new(stream: TcpStream) -> Self {
        TcpTransport {
            stream,
            closed: false,
        }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Get a mutable reference to the underlying stream
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

impl Transport for TcpTransport {
    fn poll(&mut self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        use libc::{poll, pollfd, POLLIN, POLLOUT};

        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        let mut pfd = pollfd {
            fd: self.stream.as_raw_fd(),
            events: match events {
                PollEvents::Read => POLLIN,
                PollEvents::Write => POLLOUT,
                PollEvents::Both => POLLIN | POLLOUT,
            },
            revents: 0,
        };

        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1); // -1 = infinite

        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(Error::Io(err));
        }

        Ok(result > 0)
    }

    fn available(&mut self) -> Result<usize> {
        if self.closed {
            return Ok(0);
        }

        let mut count: libc::c_int = 0;
        let result = unsafe {
            libc::ioctl(
                self.stream.as_raw_fd(),
                libc::FIONREAD,
                &mut count as *mut libc::c_int,
            )
        };

        if result < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        Ok(count.max(0) as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(0),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        if self.available()? == 0 {
            return Ok(None);
        }

        let mut byte = [0u8; 1];
        match self.stream.peek(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn connected(&mut self) -> bool {
        if self.closed {
            return false;
        }

        match self.poll(PollEvents::Read, Some(Duration::ZERO)) {
            Ok(false) => true,
            Ok(true) => {
                // Readable with nothing to read means the peer hung up
                let mut byte = [0u8; 1];
                matches!(self.stream.peek(&mut byte), Ok(n) if n > 0)
            }
            Err(_) => false,
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(Error::from(e)),
            _ => Ok(()),
        }
    }
}

/// Helper to create an HTTP session from a TCP stream
pub fn from_tcp_stream(stream: TcpStream, timeouts: Timeouts) -> HttpSession<TcpTransport> {
    HttpSession::new(TcpTransport::new(stream), timeouts)
}

#[derive(Debug, Default)]
struct MemoryState {
    input: VecDeque<u8>,
    output: Vec<u8>,
    peer_closed: bool,
    closed: bool,
}

/// In-memory transport
///
/// Clones share the same buffers, so a test can keep one handle to feed
/// input and inspect output while the engine owns another. A poll on an
/// empty, still-open input reports "not ready" immediately, which the
/// session turns into the phase's timeout error.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryTransport {
    /// Create an open transport with no pending input
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an open transport with `input` pending
    pub fn with_input(input: impl AsRef<[u8]>) -> Self {
        let transport = Self::new();
        transport.push_input(input);
        transport
    }

    /// Queue bytes for the engine to read
    pub fn push_input(&self, input: impl AsRef<[u8]>) {
        self.state
            .borrow_mut()
            .input
            .extend(input.as_ref().iter().copied());
    }

    /// Simulate the peer closing its side once pending input is consumed
    pub fn close_input(&self) {
        self.state.borrow_mut().peer_closed = true;
    }

    /// Everything written by the engine so far
    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().output.clone()
    }

    /// Take and clear everything written so far
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().output)
    }

    /// Input bytes not yet consumed
    pub fn pending_input(&self) -> usize {
        self.state.borrow().input.len()
    }

    /// Whether the engine closed the transport
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }
}

impl Transport for MemoryTransport {
    fn poll(&mut self, events: PollEvents, _timeout: Option<Duration>) -> Result<bool> {
        let state = self.state.borrow();
        let readable = !state.input.is_empty() || state.peer_closed || state.closed;
        let writable = !state.closed;

        Ok(match events {
            PollEvents::Read => readable,
            PollEvents::Write => writable,
            PollEvents::Both => readable || writable,
        })
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.state.borrow().input.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Ok(0);
        }

        let n = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        Ok(self.state.borrow().input.front().copied())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(Error::ConnectionClosed);
        }
        state.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn connected(&mut self) -> bool {
        let state = self.state.borrow();
        !state.closed && !(state.peer_closed && state.input.is_empty())
    }

    fn close(&mut self) -> Result<()> {
        self.state.borrow_mut().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_tcp_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"Hello").unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut transport = TcpTransport::new(stream);

        // Poll for read
        assert!(transport
            .poll(PollEvents::Read, Some(Duration::from_secs(1)))
            .unwrap());

        handle.join().unwrap();
        assert_eq!(transport.available().unwrap(), 5);
        assert_eq!(transport.peek().unwrap(), Some(b'H'));

        // Read data
        let mut buf = [0u8; 5];
        let n = transport.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"Hello");

        // Peer is gone and nothing is left to read
        assert!(!transport.connected());
    }

    #[test]
    fn test_session_header_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        // Don't send anything - test timeout
        let _handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(2));
        });

        let stream = TcpStream::connect(addr).unwrap();
        let timeouts = Timeouts {
            data_wait: Duration::from_millis(100),
            ..Timeouts::default()
        };
        let mut session = from_tcp_stream(stream, timeouts);

        let result = session.read_byte(Phase::Request);
        assert!(matches!(result.unwrap_err(), Error::HeaderTimeout));
    }

    #[test]
    fn test_read_line_strips_crlf() {
        let transport = MemoryTransport::with_input("GET / HTTP/1.1\r\nabcd\r\nnext\n");
        let mut session = HttpSession::new(transport, Timeouts::default());

        assert_eq!(session.read_line(Phase::Request, 64).unwrap(), "GET / HTTP/1.1");
        assert_eq!(session.read_line(Phase::Request, 4).unwrap(), "abcd");
        assert_eq!(session.read_line(Phase::Request, 64).unwrap(), "next");
    }

    #[test]
    fn test_read_line_stops_at_limit() {
        let transport = MemoryTransport::with_input("abcdefghij\r\nrest");
        let mut session = HttpSession::new(transport.clone(), Timeouts::default());

        assert!(matches!(
            session.read_line(Phase::Request, 4),
            Err(Error::LineTooLong(4))
        ));
        assert_eq!(transport.pending_input(), "fghij\r\nrest".len());
    }

    #[test]
    fn test_expired_deadline_fails_reads() {
        let transport = MemoryTransport::with_input("data");
        let mut session = HttpSession::new(transport, Timeouts::default());

        session.set_deadline(Some(Instant::now()));
        assert!(matches!(session.read_byte(Phase::Request), Err(Error::HeaderTimeout)));
        assert!(matches!(session.read_byte(Phase::Body), Err(Error::BodyTimeout)));

        session.set_deadline(None);
        assert_eq!(session.read_byte(Phase::Request).unwrap(), b'd');
    }

    #[test]
    fn test_closed_tcp_transport_reports_connection_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || listener.accept().map(|(stream, _)| stream));

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = from_tcp_stream(stream, Timeouts::default());
        session.close().unwrap();

        assert!(matches!(session.read_byte(Phase::Request), Err(Error::ConnectionClosed)));
        assert!(matches!(session.write_all(b"x"), Err(Error::ConnectionClosed)));
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_phase_timeout_errors() {
        let mut session = HttpSession::new(MemoryTransport::new(), Timeouts::default());

        assert!(matches!(session.read_byte(Phase::Request), Err(Error::HeaderTimeout)));
        assert!(matches!(session.read_byte(Phase::Body), Err(Error::BodyTimeout)));
    }

    #[test]
    fn test_closed_peer_reports_connection_closed() {
        let transport = MemoryTransport::with_input("x");
        transport.close_input();
        let mut session = HttpSession::new(transport.clone(), Timeouts::default());

        assert_eq!(session.read_byte(Phase::Body).unwrap(), b'x');
        assert!(!session.connected());
        assert!(matches!(session.read_byte(Phase::Body), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_memory_transport_shares_buffers() {
        let handle = MemoryTransport::new();
        let mut session = HttpSession::new(handle.clone(), Timeouts::default());

        session.write_all(b"abc").unwrap();
        assert_eq!(handle.written(), b"abc");

        session.close().unwrap();
        assert!(handle.is_closed());
        assert!(session.write_all(b"d").is_err());
    }
}
