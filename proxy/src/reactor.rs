//! Readiness reactor over epoll/kqueue.
//!
//! Wraps `mio::Poll`. Registration is edge-triggered (mio's behavior on
//! epoll), so every handler must drain its socket until the OS reports
//! would-block. Events are copied out into plain [`Readiness`] records
//! before dispatch so handlers can freely mutate the session table.

use mio::event::Source;
use mio::{Events, Poll, Token};
use std::io;
use std::time::Duration;

/// Maximum events retrieved per wait.
pub const MAX_EVENTS: usize = 1024;

/// Interest mask of a registered socket.
///
/// The reactor translates this to the kernel mask; sessions never touch
/// `mio::Interest` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Wake on readability (and peer hang-up).
    Read,
    /// Wake on writability.
    Write,
    /// Wake on either.
    Both,
}

impl Interest {
    fn to_mio(self) -> mio::Interest {
        match self {
            Interest::Read => mio::Interest::READABLE,
            Interest::Write => mio::Interest::WRITABLE,
            Interest::Both => mio::Interest::READABLE | mio::Interest::WRITABLE,
        }
    }
}

/// One readiness notification, detached from the mio event buffer.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// Peer hang-up (RDHUP) or socket error.
    pub hangup: bool,
}

/// The readiness-notification wrapper owning the poll instance.
pub struct Reactor {
    poll: Poll,
    events: Events,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(MAX_EVENTS),
        })
    }

    /// Register a socket with an initial interest mask.
    pub fn register<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll
            .registry()
            .register(source, token, interest.to_mio())
    }

    /// Change the interest mask of a registered socket.
    ///
    /// On epoll this is an `EPOLL_CTL_MOD`, which also re-arms the edge: if
    /// the socket is already ready for the new mask, a fresh event is
    /// delivered. Reply delivery relies on this.
    pub fn rearm<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll
            .registry()
            .reregister(source, token, interest.to_mio())
    }

    /// Remove a socket from the reactor.
    pub fn deregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    /// Block until readiness events arrive or the timeout elapses, filling
    /// `out` with detached records. EINTR yields an empty batch.
    pub fn wait(&mut self, timeout: Option<Duration>, out: &mut Vec<Readiness>) -> io::Result<()> {
        out.clear();
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e);
        }
        for event in self.events.iter() {
            out.push(Readiness {
                token: event.token(),
                readable: event.is_readable(),
                writable: event.is_writable(),
                hangup: event.is_read_closed() || event.is_error(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::{TcpListener, TcpStream};
    use std::time::Duration;

    #[test]
    fn test_wait_times_out_with_no_events() {
        let mut reactor = Reactor::new().unwrap();
        let mut out = Vec::new();
        reactor
            .wait(Some(Duration::from_millis(10)), &mut out)
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_listener_readable_on_connect() {
        let mut reactor = Reactor::new().unwrap();
        let mut listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        reactor
            .register(&mut listener, Token(7), Interest::Read)
            .unwrap();

        let _client = std::net::TcpStream::connect(addr).unwrap();

        let mut out = Vec::new();
        for _ in 0..50 {
            reactor
                .wait(Some(Duration::from_millis(100)), &mut out)
                .unwrap();
            if !out.is_empty() {
                break;
            }
        }
        assert!(out.iter().any(|r| r.token == Token(7) && r.readable));
    }

    #[test]
    fn test_rearm_redelivers_writable_edge() {
        let mut reactor = Reactor::new().unwrap();
        let mut listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).unwrap();
        reactor
            .register(&mut stream, Token(1), Interest::Write)
            .unwrap();

        let mut out = Vec::new();
        for _ in 0..50 {
            reactor
                .wait(Some(Duration::from_millis(100)), &mut out)
                .unwrap();
            if out.iter().any(|r| r.token == Token(1) && r.writable) {
                break;
            }
        }
        assert!(out.iter().any(|r| r.token == Token(1) && r.writable));

        // Edge already consumed; a MOD must deliver it again.
        reactor.rearm(&mut stream, Token(1), Interest::Both).unwrap();
        let mut again = Vec::new();
        for _ in 0..50 {
            reactor
                .wait(Some(Duration::from_millis(100)), &mut again)
                .unwrap();
            if again.iter().any(|r| r.token == Token(1) && r.writable) {
                break;
            }
        }
        assert!(again.iter().any(|r| r.token == Token(1) && r.writable));
    }

    #[test]
    fn test_deregister_stops_events() {
        let mut reactor = Reactor::new().unwrap();
        let mut listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        reactor
            .register(&mut listener, Token(3), Interest::Read)
            .unwrap();
        reactor.deregister(&mut listener).unwrap();

        let _client = std::net::TcpStream::connect(addr).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let mut out = Vec::new();
        reactor
            .wait(Some(Duration::from_millis(50)), &mut out)
            .unwrap();
        assert!(out.iter().all(|r| r.token != Token(3)));
    }
}
