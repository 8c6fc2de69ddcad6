//! Listening and connecting sockets
//!
//! The protocol engines only see [`Transport`]s. This module produces them:
//! [`TcpAcceptor`] hands out at most one accepted connection per call
//! without blocking, [`connect`] opens an outbound stream with a bounded
//! wait, and [`MemoryListener`] feeds prepared in-memory transports to a
//! server under test.

use crate::http::session::{MemoryTransport, TcpTransport, Transport};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

/// Socket setup errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("accept failed: {0}")]
    Accept(io::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Source of incoming connections
pub trait Listener {
    type Transport: Transport;

    /// Take the next pending connection, if any, without blocking
    fn accept(&mut self) -> Result<Option<Self::Transport>>;
}

/// Non-blocking TCP listener
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Bind and listen on `addr` (port 0 picks a free port)
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let bind_err = |source| Error::Bind { addr, source };

        let socket =
            Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket.listen(128).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        log::debug!("listening on {}", addr);
        Ok(TcpAcceptor {
            listener: socket.into(),
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Error::Accept)
    }
}

impl Listener for TcpAcceptor {
    type Transport = TcpTransport;

    fn accept(&mut self) -> Result<Option<TcpTransport>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                // Accepted sockets inherit non-blocking mode on some platforms
                stream.set_nonblocking(false).map_err(Error::Accept)?;
                stream.set_nodelay(true).map_err(Error::Accept)?;
                log::debug!("accepted connection from {}", peer);
                Ok(Some(TcpTransport::new(stream)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(Error::Accept(e)),
        }
    }
}

/// Open a TCP connection to `addr`, waiting at most `timeout`
pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpTransport> {
    let connect_err = |source| Error::Connect { addr, source };

    let socket =
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(connect_err)?;
    socket.connect_timeout(&addr.into(), timeout).map_err(connect_err)?;

    let stream: TcpStream = socket.into();
    stream.set_nodelay(true).map_err(connect_err)?;
    Ok(TcpTransport::new(stream))
}

/// Listener over a queue of in-memory transports
#[derive(Debug, Default)]
pub struct MemoryListener {
    pending: VecDeque<MemoryTransport>,
}

impl MemoryListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection for the next `accept`
    pub fn push(&mut self, transport: MemoryTransport) {
        self.pending.push_back(transport);
    }

    /// Connections not yet accepted
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Listener for MemoryListener {
    type Transport = MemoryTransport;

    fn accept(&mut self) -> Result<Option<MemoryTransport>> {
        Ok(self.pending.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_accept_is_non_blocking() {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(acceptor.accept().unwrap().is_none());

        let addr = acceptor.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"ping").unwrap();

        let mut accepted = None;
        for _ in 0..100 {
            accepted = acceptor.accept().unwrap();
            if accepted.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let mut transport = accepted.expect("connection accepted");
        assert!(transport.poll(crate::http::PollEvents::Read, Some(Duration::from_secs(1))).unwrap());
        let mut buf = [0u8; 4];
        assert_eq!(transport.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn test_connect() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let mut transport = connect(addr, Duration::from_secs(1)).unwrap();
        assert!(transport.connected());
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to find a port nobody listens on
        let addr = {
            let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap()).unwrap();
            acceptor.local_addr().unwrap()
        };
        assert!(matches!(
            connect(addr, Duration::from_millis(500)),
            Err(Error::Connect { .. })
        ));
    }

    #[test]
    fn test_memory_listener_order() {
        let mut listener = MemoryListener::new();
        let first = MemoryTransport::with_input("1");
        listener.push(first.clone());
        listener.push(MemoryTransport::with_input("2"));

        let mut accepted = listener.accept().unwrap().unwrap();
        assert_eq!(accepted.peek().unwrap(), Some(b'1'));
        assert_eq!(listener.pending(), 1);
        listener.accept().unwrap();
        assert!(listener.accept().unwrap().is_none());
    }
}
