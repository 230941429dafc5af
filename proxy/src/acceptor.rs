//! Listening socket setup and the accept loop.

use mio::net::{TcpListener, TcpStream};
use std::io;
use std::net::SocketAddr;

/// Listen backlog.
const BACKLOG: i32 = 128;

/// Owns the listening socket and yields accepted client streams.
pub struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    /// Bind the listening socket with SO_REUSEADDR and SO_REUSEPORT set,
    /// in nonblocking mode.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = socket2::Socket::new(
            match addr {
                SocketAddr::V4(_) => socket2::Domain::IPV4,
                SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(BACKLOG)?;

        let std_listener: std::net::TcpListener = socket.into();
        Ok(Self {
            listener: TcpListener::from_std(std_listener),
        })
    }

    /// The bound address (port is resolved when binding to port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The socket to register with the reactor.
    pub fn source(&mut self) -> &mut TcpListener {
        &mut self.listener
    }

    /// Accept one pending connection, with TCP_NODELAY set.
    ///
    /// Returns `None` once the accept queue is drained. ECONNABORTED,
    /// EPROTO, and EINTR are benign (the aborted connection is skipped);
    /// anything else is a real error.
    pub fn accept(&mut self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nodelay(true)?;
                    return Ok(Some((stream, addr)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e)
                    if e.kind() == io::ErrorKind::ConnectionAborted
                        || e.kind() == io::ErrorKind::Interrupted
                        || e.raw_os_error() == Some(libc::EPROTO) =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_resolves_port_zero() {
        let acceptor = Acceptor::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(acceptor.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_accept_drains_to_would_block() {
        let mut acceptor = Acceptor::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let _a = std::net::TcpStream::connect(addr).unwrap();
        let _b = std::net::TcpStream::connect(addr).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut accepted = 0;
        while let Some((_stream, peer)) = acceptor.accept().unwrap() {
            assert_eq!(peer.ip().to_string(), "127.0.0.1");
            accepted += 1;
        }
        assert_eq!(accepted, 2);
    }

    #[test]
    fn test_reuse_allows_rebinding_port() {
        let acceptor = Acceptor::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = acceptor.local_addr().unwrap();
        // SO_REUSEPORT permits a second listener on the same port.
        let second = Acceptor::bind(addr);
        assert!(second.is_ok());
    }
}
