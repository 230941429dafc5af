//! Proxy core: owns every session and drives the reactor loop.
//!
//! Single-threaded cooperative scheduling. One thread owns the reactor, the
//! acceptor, the client slab, and the upstream singleton; handlers are
//! finite-duration functions that mutate buffers and re-arm interest, and
//! the only blocking call is the readiness wait.

use crate::acceptor::Acceptor;
use crate::client::{ClientId, ClientSession};
use crate::config::Config;
use crate::error::Error;
use crate::reactor::{Interest, MAX_EVENTS, Reactor, Readiness};
use crate::upstream::{StagedRequest, UpstreamSession};

use ahash::AHashMap;
use mio::Token;
use slab::Slab;
use std::io::{self, IoSlice, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Token of the listening socket.
const LISTENER: Token = Token(0);
/// Token of the upstream connection.
const UPSTREAM: Token = Token(1);

/// Scatter segments per writev, bounded by UIO_MAXIOV.
const MAX_BATCH_SEGMENTS: usize = 1024;

/// Wait granularity; bounds shutdown latency.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors local to one peer, handled by destroying that session.
fn is_peer_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut
    )
}

/// The proxy: acceptor, client sessions, and the upstream singleton, all
/// owned by the reactor thread.
pub struct Proxy {
    reactor: Reactor,
    acceptor: Acceptor,
    clients: Slab<ClientSession>,
    upstream: Option<UpstreamSession>,
    upstream_addr: SocketAddr,
    buffer_size: usize,
    next_generation: u32,
    shutdown: Arc<AtomicBool>,
}

impl Proxy {
    /// Bind the listener and register it with a fresh reactor.
    pub fn new(config: &Config, shutdown: Arc<AtomicBool>) -> Result<Self, Error> {
        let reactor = Reactor::new()?;
        let mut acceptor = Acceptor::bind(config.proxy.listen).map_err(|source| Error::Bind {
            addr: config.proxy.listen,
            source,
        })?;
        reactor.register(acceptor.source(), LISTENER, Interest::Read)?;

        let listen = acceptor.local_addr()?;
        info!(%listen, upstream = %config.upstream.addr, "proxy listening");

        Ok(Self {
            reactor,
            acceptor,
            clients: Slab::with_capacity(1024),
            upstream: None,
            upstream_addr: config.upstream.addr,
            buffer_size: config.buffers.recv,
            next_generation: 0,
            shutdown,
        })
    }

    /// The bound listening address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    /// Run the event loop until the shutdown flag is set or a fatal error
    /// occurs.
    pub fn run(&mut self) -> Result<(), Error> {
        let mut ready = Vec::with_capacity(MAX_EVENTS);
        while !self.shutdown.load(Ordering::Relaxed) {
            self.reactor.wait(Some(POLL_INTERVAL), &mut ready)?;
            for event in &ready {
                self.dispatch(*event)?;
            }
        }
        info!("shutdown signal received");
        Ok(())
    }

    fn dispatch(&mut self, event: Readiness) -> Result<(), Error> {
        match event.token {
            LISTENER => self.on_accept(),
            UPSTREAM => self.on_upstream_event(event),
            token => self.on_client_event(ClientId::from_token(token), event),
        }
    }

    // ── Acceptor ────────────────────────────────────────────────────────

    fn on_accept(&mut self) -> Result<(), Error> {
        while let Some((mut stream, addr)) = self.acceptor.accept()? {
            let entry = self.clients.vacant_entry();
            self.next_generation = self.next_generation.wrapping_add(1);
            let id = ClientId::new(entry.key() as u32, self.next_generation);
            self.reactor.register(&mut stream, id.token(), Interest::Read)?;
            entry.insert(ClientSession::new(stream, addr, id, self.buffer_size));
            trace!(slot = id.slot(), peer = %addr, "accepted client");
        }
        Ok(())
    }

    // ── Client handlers ─────────────────────────────────────────────────

    fn on_client_event(&mut self, id: ClientId, event: Readiness) -> Result<(), Error> {
        if event.hangup {
            self.destroy_client(id, "peer hung up");
            return Ok(());
        }
        if event.readable {
            self.on_client_readable(id)?;
        }
        if event.writable {
            self.on_client_writable(id)?;
        }
        Ok(())
    }

    fn on_client_readable(&mut self, id: ClientId) -> Result<(), Error> {
        let result = {
            let Some(client) = self.clients.get_mut(id.slot()) else {
                return Ok(());
            };
            if client.id != id {
                return Ok(());
            }
            client.request_buffer.drain_from(&mut client.stream)
        };
        let drained = match result {
            Ok(d) => d,
            Err(e) if is_peer_error(&e) => {
                self.destroy_client(id, "read error");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if drained.bytes > 0 {
            let staged = {
                let Some(client) = self.clients.get_mut(id.slot()) else {
                    return Ok(());
                };
                client.stage_requests()
            };
            let lens = match staged {
                Ok(lens) => lens,
                Err(e) => {
                    warn!(slot = id.slot(), error = %e, "malformed client request");
                    self.destroy_client(id, "bad request frame");
                    return Ok(());
                }
            };
            if !lens.is_empty() {
                self.ensure_upstream()?;
                if let Some(up) = self.upstream.as_mut() {
                    for len in lens {
                        up.push_request(id, len);
                    }
                    self.reactor.rearm(&mut up.stream, UPSTREAM, Interest::Both)?;
                }
            }
        }

        if drained.peer_closed {
            self.destroy_client(id, "peer closed");
        }
        Ok(())
    }

    fn on_client_writable(&mut self, id: ClientId) -> Result<(), Error> {
        let dead = {
            let Some(client) = self.clients.get_mut(id.slot()) else {
                return Ok(());
            };
            if client.id != id {
                return Ok(());
            }
            match client.flush_replies() {
                Ok(true) => {
                    // reply flushed; back to read-only interest
                    self.reactor
                        .rearm(&mut client.stream, id.token(), Interest::Read)?;
                    false
                }
                // still armed for write; the next edge resumes the flush
                Ok(false) => false,
                Err(e) if is_peer_error(&e) => true,
                Err(e) => return Err(e.into()),
            }
        };
        if dead {
            self.destroy_client(id, "write error");
        }
        Ok(())
    }

    /// Tear down a client session: close the socket, deregister, and remove
    /// it from the upstream queues (tombstoning any in-flight slots).
    fn destroy_client(&mut self, id: ClientId, reason: &str) {
        if !self
            .clients
            .get(id.slot())
            .is_some_and(|client| client.id == id)
        {
            return;
        }
        let mut client = self.clients.remove(id.slot());
        let _ = self.reactor.deregister(&mut client.stream);
        if let Some(up) = self.upstream.as_mut() {
            up.pop_client(id);
        }
        debug!(slot = id.slot(), peer = %client.addr, reason, "client closed");
        // dropping the session closes the fd
    }

    // ── Upstream handlers ───────────────────────────────────────────────

    /// Open the singleton upstream connection if it does not exist yet.
    fn ensure_upstream(&mut self) -> Result<(), Error> {
        if self.upstream.is_some() {
            return Ok(());
        }
        let mut up = UpstreamSession::connect(self.upstream_addr, self.buffer_size)?;
        self.reactor.register(&mut up.stream, UPSTREAM, Interest::Both)?;
        info!(addr = %self.upstream_addr, "connecting to upstream");
        self.upstream = Some(up);
        Ok(())
    }

    fn on_upstream_event(&mut self, event: Readiness) -> Result<(), Error> {
        if event.hangup {
            self.upstream_lost("peer hung up");
            return Ok(());
        }
        if event.readable {
            self.on_upstream_readable()?;
        }
        if event.writable {
            self.on_upstream_writable()?;
        }
        Ok(())
    }

    fn on_upstream_writable(&mut self) -> Result<(), Error> {
        // deferred connect result arrives with the first writable edge
        let connect_failed = match self.upstream.as_mut() {
            None => return Ok(()),
            Some(up) if !up.connected => match up.finish_connect() {
                Ok(()) => {
                    debug!(addr = %up.addr, "upstream connected");
                    false
                }
                Err(e) => {
                    warn!(addr = %up.addr, error = %e, "upstream connect failed");
                    true
                }
            },
            Some(_) => false,
        };
        if connect_failed {
            self.upstream_lost("connect failed");
            return Ok(());
        }

        // remainder of a committed batch goes out before anything else
        let outbox = match self.upstream.as_mut() {
            None => return Ok(()),
            Some(up) if !up.outbox.is_empty() => Some(up.flush_outbox()),
            Some(_) => None,
        };
        match outbox {
            Some(Ok(true)) | None => {}
            Some(Ok(false)) => return Ok(()), // still would-block
            Some(Err(e)) if is_peer_error(&e) => {
                self.upstream_lost("write error");
                return Ok(());
            }
            Some(Err(e)) => return Err(e.into()),
        }

        self.send_batch()
    }

    /// Request fan-in: commit the staged batch to the wire.
    ///
    /// No-op while `staging` is empty or an earlier batch still owes
    /// replies; two batches never interleave on the wire.
    fn send_batch(&mut self) -> Result<(), Error> {
        let lost = {
            let Some(up) = self.upstream.as_mut() else {
                return Ok(());
            };
            if up.staging.is_empty() || !up.pending.is_empty() {
                return Ok(());
            }
            match Self::commit_batch(up, &mut self.clients, &self.reactor) {
                Ok(()) => false,
                Err(Error::Io(e)) if is_peer_error(&e) => true,
                Err(e) => return Err(e),
            }
        };
        if lost {
            self.upstream_lost("write error");
        }
        Ok(())
    }

    /// Build a scatter view over every staged request's bytes (in staging
    /// order), issue one writev, and move the batch to `pending`.
    ///
    /// Bytes the socket does not accept are spilled to the outbox, so the
    /// batch is committed in full either way: correlation is fixed here,
    /// independent of flush progress and of clients dying afterwards.
    fn commit_batch(
        up: &mut UpstreamSession,
        clients: &mut Slab<ClientSession>,
        reactor: &Reactor,
    ) -> Result<(), Error> {
        let take = up.staging.len().min(MAX_BATCH_SEGMENTS);
        let batch: Vec<StagedRequest> = up.staging.drain(..take).collect();

        let mut offsets: AHashMap<usize, usize> = AHashMap::with_capacity(batch.len());
        let mut iov: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len());
        for request in &batch {
            let Some(client) = clients.get(request.client.slot()) else {
                continue;
            };
            if client.id != request.client {
                continue;
            }
            let offset = offsets.entry(request.client.slot()).or_insert(0);
            iov.push(IoSlice::new(
                &client.staged.as_slice()[*offset..*offset + request.len],
            ));
            *offset += request.len;
        }

        // The batch is committed below even if the write fails: the advance
        // loop must run so every batch client lands in `pending` with its
        // staged bytes consumed, leaving the caller's teardown path a
        // consistent queue state.
        let mut io_failure = None;
        let written = if iov.is_empty() {
            0
        } else {
            match up.stream.write_vectored(&iov) {
                Ok(n) => n,
                // nothing sent; the whole batch spills to the outbox and
                // goes out on the next writable edge
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    0
                }
                Err(e) => {
                    io_failure = Some(e);
                    0
                }
            }
        };

        let mut remaining = written;
        for request in &batch {
            let Some(client) = clients.get_mut(request.client.slot()) else {
                continue;
            };
            if client.id != request.client {
                continue;
            }
            let sent = remaining.min(request.len);
            if sent < request.len {
                up.outbox
                    .extend_from_slice(&client.staged.as_slice()[sent..request.len]);
            }
            client.staged.consume(request.len);
            remaining -= sent;
            up.pending.push_back(Some(request.client));
        }
        trace!(
            requests = batch.len(),
            bytes = written,
            spilled = up.outbox.len(),
            "batch committed"
        );

        if let Some(e) = io_failure {
            return Err(e.into());
        }

        // no further writes until the next batch (or the outbox remainder)
        let interest = if up.outbox.is_empty() {
            Interest::Read
        } else {
            Interest::Both
        };
        reactor.rearm(&mut up.stream, UPSTREAM, interest)?;
        Ok(())
    }

    fn on_upstream_readable(&mut self) -> Result<(), Error> {
        let result = {
            let Some(up) = self.upstream.as_mut() else {
                return Ok(());
            };
            up.reply_buffer.drain_from(&mut up.stream)
        };
        let drained = match result {
            Ok(d) => d,
            Err(e) if is_peer_error(&e) => {
                self.upstream_lost("read error");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if drained.bytes > 0 {
            let Some(up) = self.upstream.as_mut() else {
                return Ok(());
            };
            Self::route_replies(up, &mut self.clients, &self.reactor)?;
        }

        if drained.peer_closed {
            self.upstream_lost("peer closed");
            return Ok(());
        }

        // allow the next batch to be staged
        if let Some(up) = self.upstream.as_mut() {
            self.reactor.rearm(&mut up.stream, UPSTREAM, Interest::Both)?;
        }
        Ok(())
    }

    /// Reply fan-out: frame the reply buffer and assign each complete frame
    /// to pending slots in FIFO order.
    ///
    /// More replies than pending requests means the framer and the upstream
    /// disagree; correlation is unrecoverable and the error is fatal.
    fn route_replies(
        up: &mut UpstreamSession,
        clients: &mut Slab<ClientSession>,
        reactor: &Reactor,
    ) -> Result<(), Error> {
        let split = protocol_resp::split(up.reply_buffer.as_slice()).map_err(Error::BadMessage)?;
        if split.len() > up.pending.len() {
            return Err(Error::ReplyOverrun {
                got: split.len(),
                pending: up.pending.len(),
            });
        }

        for range in split.frames() {
            match up.pending.pop_front() {
                Some(Some(id)) => {
                    let Some(client) = clients.get_mut(id.slot()) else {
                        continue;
                    };
                    if client.id != id {
                        continue;
                    }
                    client.queue_reply(&up.reply_buffer.as_slice()[range.clone()]);
                    reactor.rearm(&mut client.stream, id.token(), Interest::Both)?;
                }
                Some(None) => trace!("discarded reply for departed client"),
                None => break, // unreachable: count checked above
            }
        }

        if split.is_finished() {
            up.reply_buffer.clear();
        } else {
            up.reply_buffer.consume(split.resume_offset());
        }
        Ok(())
    }

    /// Terminal upstream failure: clear the singleton so the next client
    /// request reconnects, and close every client whose requests can no
    /// longer be correlated.
    fn upstream_lost(&mut self, reason: &str) {
        let Some(mut up) = self.upstream.take() else {
            return;
        };
        let _ = self.reactor.deregister(&mut up.stream);
        warn!(
            reason,
            in_flight = up.pending.len(),
            staged = up.staging.len(),
            "upstream connection lost"
        );

        let mut doomed: Vec<ClientId> = up.pending.iter().flatten().copied().collect();
        doomed.extend(up.staging.iter().map(|request| request.client));
        doomed.sort_unstable();
        doomed.dedup();
        for id in doomed {
            self.destroy_client(id, "upstream lost");
        }
    }
}
