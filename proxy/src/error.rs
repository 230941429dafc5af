//! Proxy runtime errors.

use protocol_resp::FrameError;
use std::io;
use std::net::SocketAddr;

/// Fatal proxy errors.
///
/// Everything surfacing here terminates the process. Per-session socket
/// failures (resets, aborted peers) are absorbed by destroying the affected
/// session and never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unexpected errno on a socket or reactor syscall.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The listening socket could not be set up.
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    /// The upstream reply stream could not be framed. Reply correlation is
    /// lost the moment the framer disagrees with the upstream, so this is
    /// fail-stop.
    #[error("malformed upstream reply: {0}")]
    BadMessage(#[source] FrameError),

    /// The upstream produced more replies than requests in flight.
    #[error("upstream sent {got} replies with only {pending} requests in flight")]
    ReplyOverrun { got: usize, pending: usize },
}
