//! Growable buffer for nonblocking socket I/O.

use std::io::{self, Read, Write};

/// Default initial capacity: 16KB.
const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Granularity of growth while draining a socket.
const READ_CHUNK: usize = 4096;

/// Outcome of draining a socket into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    /// Total bytes appended by this call.
    pub bytes: usize,
    /// True if the peer half-closed (a read returned zero).
    pub peer_closed: bool,
}

/// A growable byte buffer with a movable read position.
///
/// Data is appended at the write position and consumed from the read
/// position; `consume` drops a prefix without moving the remaining bytes.
/// The buffer compacts when writable space runs low and shrinks back to its
/// initial capacity once fully drained.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    /// Initial capacity (used for shrinking)
    initial_capacity: usize,
    /// Read position: data before this has been consumed
    read_pos: usize,
    /// Write position: data has been written up to here
    write_pos: usize,
}

impl Buffer {
    /// Create a new buffer with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new buffer with the specified initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(READ_CHUNK)],
            initial_capacity: capacity.max(READ_CHUNK),
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Returns the number of bytes available to read.
    #[inline]
    pub fn len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Returns true if there is no data to read.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// Returns the number of bytes available to write.
    #[inline]
    fn writable(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// Returns a contiguous slice of the readable data.
    ///
    /// The slice stays valid until the next mutation of the buffer.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Ensures at least `additional` bytes of writable space, compacting
    /// before growing. Growth is unbounded; memory is the only limit.
    fn reserve(&mut self, additional: usize) {
        if self.writable() >= additional {
            return;
        }
        if self.read_pos > 0 {
            self.compact();
            if self.writable() >= additional {
                return;
            }
        }
        let needed = self.write_pos + additional;
        self.data.resize(needed.next_power_of_two(), 0);
    }

    /// Moves unread data to the start of the buffer.
    fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        let readable = self.len();
        if readable > 0 {
            self.data.copy_within(self.read_pos..self.write_pos, 0);
        }
        self.read_pos = 0;
        self.write_pos = readable;
    }

    /// Drops the first `n` readable bytes, keeping the remainder in order.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the readable bytes.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "consume({n}) exceeds readable bytes");
        self.read_pos += n;
        if self.read_pos == self.write_pos {
            self.reset();
        }
    }

    /// Clears the buffer, resetting both positions.
    pub fn clear(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        // Shrink back once a burst is over
        if self.data.len() > self.initial_capacity * 2 {
            self.data.truncate(self.initial_capacity);
            self.data.shrink_to_fit();
            self.data.resize(self.initial_capacity, 0);
        }
    }

    /// Appends bytes, growing as needed.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.data[self.write_pos..self.write_pos + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
    }

    /// Reads from `src` until it would block, appending everything read.
    ///
    /// Returns the total bytes appended and whether the peer half-closed.
    /// `bytes` is zero with `peer_closed` set when the very first read hits
    /// end of stream. EINTR is retried.
    pub fn drain_from<R: Read>(&mut self, src: &mut R) -> io::Result<Drained> {
        let mut total = 0;
        loop {
            if self.writable() < READ_CHUNK {
                self.reserve(READ_CHUNK);
            }
            match src.read(&mut self.data[self.write_pos..]) {
                Ok(0) => {
                    return Ok(Drained {
                        bytes: total,
                        peer_closed: true,
                    });
                }
                Ok(n) => {
                    self.write_pos += n;
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Drained {
                        bytes: total,
                        peer_closed: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes to `dst` until the buffer is empty or the write would block,
    /// consuming whatever was accepted.
    ///
    /// Returns the bytes written; the buffer is non-empty afterwards iff the
    /// socket stopped accepting bytes.
    pub fn write_to<W: Write>(&mut self, dst: &mut W) -> io::Result<usize> {
        let mut total = 0;
        while !self.is_empty() {
            match dst.write(self.as_slice()) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.consume(n);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Writer that accepts at most `limit` bytes per call, then would-block.
    struct Throttled {
        accepted: Vec<u8>,
        limit: usize,
        calls_before_block: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.calls_before_block == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.calls_before_block -= 1;
            let n = buf.len().min(self.limit);
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Reader yielding chunks, then would-block (and EOF after that).
    struct Chunked {
        chunks: Vec<Vec<u8>>,
        eof: bool,
    }

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                if self.eof {
                    return Ok(0);
                }
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let chunk = &mut self.chunks[0];
            let n = buf.len().min(chunk.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            chunk.drain(..n);
            if chunk.is_empty() {
                self.chunks.remove(0);
            }
            Ok(n)
        }
    }

    #[test]
    fn test_basic_operations() {
        let mut buf = Buffer::with_capacity(4096);

        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"hello");
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.as_slice(), b"hello");

        buf.consume(2);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.as_slice(), b"llo");
    }

    #[test]
    fn test_consume_preserves_order_and_size() {
        let mut buf = Buffer::new();
        buf.extend_from_slice(b"abcdef");
        let before = buf.len();
        buf.consume(2);
        assert_eq!(buf.len(), before - 2);
        assert_eq!(buf.as_slice(), b"cdef");
    }

    #[test]
    #[should_panic(expected = "exceeds readable bytes")]
    fn test_consume_too_much_panics() {
        let mut buf = Buffer::new();
        buf.extend_from_slice(b"ab");
        buf.consume(3);
    }

    #[test]
    fn test_consume_all_resets() {
        let mut buf = Buffer::with_capacity(4096);
        buf.extend_from_slice(b"test");
        buf.consume(4);
        assert!(buf.is_empty());
        assert_eq!(buf.writable(), 4096);
    }

    #[test]
    fn test_grows_past_initial_capacity() {
        let mut buf = Buffer::with_capacity(4096);
        let big = vec![b'x'; 100 * 1024];
        buf.extend_from_slice(&big);
        assert_eq!(buf.len(), big.len());
        assert_eq!(buf.as_slice(), big.as_slice());
    }

    #[test]
    fn test_shrinks_when_emptied() {
        let mut buf = Buffer::with_capacity(4096);
        buf.extend_from_slice(&vec![b'x'; 64 * 1024]);
        buf.consume(64 * 1024);
        assert_eq!(buf.data.len(), 4096);
    }

    #[test]
    fn test_reserve_compacts_first() {
        let mut buf = Buffer::with_capacity(4096);
        buf.extend_from_slice(&vec![b'a'; 4096]);
        buf.consume(4000);
        // 96 readable bytes; room must be made without growing
        buf.extend_from_slice(&vec![b'b'; 1000]);
        assert_eq!(buf.data.len(), 4096);
        assert_eq!(buf.len(), 1096);
    }

    #[test]
    fn test_drain_from_reads_to_would_block() {
        let mut src = Chunked {
            chunks: vec![b"hello ".to_vec(), b"world".to_vec()],
            eof: false,
        };
        let mut buf = Buffer::new();
        let drained = buf.drain_from(&mut src).unwrap();
        assert_eq!(drained.bytes, 11);
        assert!(!drained.peer_closed);
        assert_eq!(buf.as_slice(), b"hello world");
    }

    #[test]
    fn test_drain_from_reports_eof() {
        let mut src = Chunked {
            chunks: vec![b"bye".to_vec()],
            eof: true,
        };
        let mut buf = Buffer::new();
        let drained = buf.drain_from(&mut src).unwrap();
        assert_eq!(drained.bytes, 3);
        assert!(drained.peer_closed);
    }

    #[test]
    fn test_drain_from_immediate_eof() {
        let mut src = Cursor::new(Vec::new());
        let mut buf = Buffer::new();
        let drained = buf.drain_from(&mut src).unwrap();
        assert_eq!(drained.bytes, 0);
        assert!(drained.peer_closed);
    }

    #[test]
    fn test_drain_from_grows_for_large_input() {
        let payload = vec![b'z'; 200 * 1024];
        let mut src = Chunked {
            chunks: payload.chunks(8192).map(|c| c.to_vec()).collect(),
            eof: false,
        };
        let mut buf = Buffer::with_capacity(4096);
        let drained = buf.drain_from(&mut src).unwrap();
        assert_eq!(drained.bytes, payload.len());
        assert_eq!(buf.as_slice(), payload.as_slice());
    }

    #[test]
    fn test_write_to_drains_fully() {
        let mut buf = Buffer::new();
        buf.extend_from_slice(b"response");
        let mut dst = Throttled {
            accepted: Vec::new(),
            limit: 1024,
            calls_before_block: 10,
        };
        let n = buf.write_to(&mut dst).unwrap();
        assert_eq!(n, 8);
        assert!(buf.is_empty());
        assert_eq!(dst.accepted, b"response");
    }

    #[test]
    fn test_write_to_partial_keeps_remainder() {
        let mut buf = Buffer::new();
        buf.extend_from_slice(b"0123456789");
        let mut dst = Throttled {
            accepted: Vec::new(),
            limit: 4,
            calls_before_block: 1,
        };
        let n = buf.write_to(&mut dst).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf.as_slice(), b"456789");
        assert_eq!(dst.accepted, b"0123");
    }
}
