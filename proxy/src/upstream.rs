//! Upstream session: the singleton connection to the key-value server.

use crate::buffer::Buffer;
use crate::client::ClientId;
use bytes::BytesMut;
use mio::net::TcpStream;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::net::SocketAddr;

/// A whole request frame queued for the next upstream write cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedRequest {
    /// The client that sent it.
    pub client: ClientId,
    /// Frame length in bytes, locating the request within the client's
    /// staged buffer (requests are FIFO per client).
    pub len: usize,
}

/// The connection to the upstream server.
///
/// `staging` holds requests contributing bytes to the next write cycle;
/// `pending` holds one slot per request written upstream whose reply has not
/// fully arrived. The k-th complete reply frame belongs to the k-th pending
/// slot; a `None` slot marks a client that died in flight, whose reply is
/// parsed and discarded to keep positions aligned.
pub struct UpstreamSession {
    pub stream: TcpStream,
    pub addr: SocketAddr,
    /// False until the nonblocking connect completes.
    pub connected: bool,
    /// Reply bytes accumulated from the socket, possibly ending mid-frame.
    pub reply_buffer: Buffer,
    /// Requests queued for the next write cycle, FIFO.
    pub staging: VecDeque<StagedRequest>,
    /// One slot per request in flight.
    pub pending: VecDeque<Option<ClientId>>,
    /// Unsent remainder of a committed batch; flushed before anything else
    /// on later writable edges.
    pub outbox: BytesMut,
}

impl UpstreamSession {
    /// Initiate a nonblocking connect with TCP_NODELAY. The connect
    /// completes on the first writable edge (EINPROGRESS is expected).
    pub fn connect(addr: SocketAddr, buffer_size: usize) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            addr,
            connected: false,
            reply_buffer: Buffer::with_capacity(buffer_size),
            staging: VecDeque::new(),
            pending: VecDeque::new(),
            outbox: BytesMut::new(),
        })
    }

    /// Check the deferred connect result. Call on the first writable edge.
    pub fn finish_connect(&mut self) -> io::Result<()> {
        if self.connected {
            return Ok(());
        }
        if let Some(e) = self.stream.take_error()? {
            return Err(e);
        }
        self.connected = true;
        Ok(())
    }

    /// Queue one whole request for the next write cycle.
    pub fn push_request(&mut self, client: ClientId, len: usize) {
        self.staging.push_back(StagedRequest { client, len });
    }

    /// Remove a departing client from the queues.
    ///
    /// Staged (uncommitted) requests are dropped outright. Pending slots are
    /// tombstoned in place: positions must stay stable with respect to reply
    /// bytes already on the wire.
    pub fn pop_client(&mut self, client: ClientId) {
        self.staging.retain(|req| req.client != client);
        for slot in self.pending.iter_mut() {
            if *slot == Some(client) {
                *slot = None;
            }
        }
    }

    /// Write the outbox remainder until drained or would-block.
    ///
    /// Returns true once the outbox is empty.
    pub fn flush_outbox(&mut self) -> io::Result<bool> {
        while !self.outbox.is_empty() {
            match self.stream.write(&self.outbox) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    let _ = self.outbox.split_to(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (UpstreamSession, std::net::TcpListener) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let session = UpstreamSession::connect(addr, 4096).unwrap();
        (session, listener)
    }

    fn id(slot: u32) -> ClientId {
        ClientId::new(slot, 1)
    }

    #[test]
    fn test_push_request_preserves_order() {
        let (mut up, _listener) = session();
        up.push_request(id(0), 14);
        up.push_request(id(1), 23);
        up.push_request(id(0), 14);

        let order: Vec<(ClientId, usize)> =
            up.staging.iter().map(|r| (r.client, r.len)).collect();
        assert_eq!(order, vec![(id(0), 14), (id(1), 23), (id(0), 14)]);
    }

    #[test]
    fn test_pop_client_drops_staged_requests() {
        let (mut up, _listener) = session();
        up.push_request(id(0), 14);
        up.push_request(id(1), 23);
        up.push_request(id(0), 7);

        up.pop_client(id(0));
        let order: Vec<ClientId> = up.staging.iter().map(|r| r.client).collect();
        assert_eq!(order, vec![id(1)]);
    }

    #[test]
    fn test_pop_client_tombstones_pending_in_place() {
        let (mut up, _listener) = session();
        up.pending.push_back(Some(id(0)));
        up.pending.push_back(Some(id(1)));
        up.pending.push_back(Some(id(0)));

        up.pop_client(id(0));
        let slots: Vec<Option<ClientId>> = up.pending.iter().copied().collect();
        assert_eq!(slots, vec![None, Some(id(1)), None]);
        assert_eq!(up.pending.len(), 3);
    }

    #[test]
    fn test_pop_client_ignores_other_generations() {
        let (mut up, _listener) = session();
        let old = ClientId::new(5, 1);
        let new = ClientId::new(5, 2);
        up.pending.push_back(Some(new));

        up.pop_client(old);
        assert_eq!(up.pending.front().copied(), Some(Some(new)));
    }
}
