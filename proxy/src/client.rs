//! Client session: one per accepted connection.

use crate::buffer::Buffer;
use bytes::BytesMut;
use mio::Token;
use mio::net::TcpStream;
use protocol_resp::FrameError;
use std::io::{self, Write};
use std::net::SocketAddr;

/// Tag bit distinguishing client tokens from the fixed listener and
/// upstream tokens.
const CLIENT_BIT: usize = 1 << 63;

/// Stable handle to a client session.
///
/// The slab slot index and a generation counter are packed together into
/// the reactor token, so a readiness event or queue entry referring to a
/// destroyed session can never be routed to a new session reusing the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId {
    slot: u32,
    generation: u32,
}

impl ClientId {
    pub fn new(slot: u32, generation: u32) -> Self {
        // 31 generation bits survive the token round trip
        Self {
            slot,
            generation: generation & 0x7fff_ffff,
        }
    }

    /// Slab slot index of the session.
    pub fn slot(self) -> usize {
        self.slot as usize
    }

    /// Pack into a reactor token. Bit 63 is always set, so client tokens
    /// never collide with the listener or upstream tokens.
    pub fn token(self) -> Token {
        Token(CLIENT_BIT | ((self.generation as usize & 0x7fff_ffff) << 32) | self.slot as usize)
    }

    /// Unpack from a reactor token.
    pub fn from_token(token: Token) -> Self {
        Self {
            slot: (token.0 & 0xffff_ffff) as u32,
            generation: ((token.0 >> 32) & 0x7fff_ffff) as u32,
        }
    }
}

/// A client connection.
///
/// Bytes arrive into `request_buffer`; whole request frames are moved to
/// `staged`, where they wait for the next upstream write cycle. Reply bytes
/// routed back from the upstream accumulate in `reply_buffer` until the
/// socket accepts them.
pub struct ClientSession {
    pub stream: TcpStream,
    pub addr: SocketAddr,
    pub id: ClientId,
    /// Received bytes not yet framed (may end in a partial frame).
    pub request_buffer: Buffer,
    /// Whole request frames awaiting transmission upstream, FIFO.
    pub staged: Buffer,
    /// Reply bytes destined for this client, not yet flushed.
    pub reply_buffer: BytesMut,
}

impl ClientSession {
    pub fn new(stream: TcpStream, addr: SocketAddr, id: ClientId, buffer_size: usize) -> Self {
        Self {
            stream,
            addr,
            id,
            request_buffer: Buffer::with_capacity(buffer_size),
            staged: Buffer::with_capacity(buffer_size),
            reply_buffer: BytesMut::with_capacity(buffer_size),
        }
    }

    /// Frame the buffered request bytes and move every complete frame into
    /// the staged queue, leaving a partial tail behind.
    ///
    /// Returns the byte length of each newly staged request, in order.
    pub fn stage_requests(&mut self) -> Result<Vec<usize>, FrameError> {
        let split = protocol_resp::split(self.request_buffer.as_slice())?;
        let lens: Vec<usize> = split.frames().iter().map(|r| r.len()).collect();
        if let Some(end) = split.frames().last().map(|r| r.end) {
            self.staged
                .extend_from_slice(&self.request_buffer.as_slice()[..end]);
            self.request_buffer.consume(end);
        }
        Ok(lens)
    }

    /// Queue one reply frame for delivery.
    pub fn queue_reply(&mut self, frame: &[u8]) {
        self.reply_buffer.extend_from_slice(frame);
    }

    /// Write queued replies until drained or the socket would block.
    ///
    /// Returns true once the reply buffer is empty.
    pub fn flush_replies(&mut self) -> io::Result<bool> {
        while !self.reply_buffer.is_empty() {
            match self.stream.write(&self.reply_buffer) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    let _ = self.reply_buffer.split_to(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}
