//! Pipelining RESP proxy.
//!
//! Multiplexes many client connections onto a single upstream connection.
//! Concurrent client requests are aggregated into one stream of writes to
//! the upstream; the reply stream is framed and routed back to the
//! originating clients positionally, preserving per-client ordering.
//!
//! Single-threaded: one reactor thread owns every session, buffer, and
//! socket, so the core needs no locks.

pub mod acceptor;
pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod reactor;
pub mod upstream;
pub mod worker;

pub mod logging;
pub mod signal;

pub use config::Config;
pub use error::Error;
pub use worker::Proxy;
