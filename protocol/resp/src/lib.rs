//! RESP wire framing.
//!
//! This crate locates message boundaries in a RESP byte stream without
//! decoding any values. It recognizes the five frame types (`+` simple
//! string, `-` error, `:` integer, `$` bulk string, `*` array), each
//! terminated by CRLF, with bulk string payloads sized by their length
//! prefix and arrays framing their elements recursively.
//!
//! The primary entry point is [`split`], which enumerates every complete
//! frame in a buffer and reports where a trailing partial frame begins so
//! the caller can resume after the next read:
//!
//! ```
//! let buf = b"+PONG\r\n+PO";
//! let split = protocol_resp::split(buf).unwrap();
//! assert_eq!(split.frames(), &[0..7]);
//! assert!(!split.is_finished());
//! assert_eq!(split.resume_offset(), 7);
//! ```

pub mod error;
pub mod frame;

pub use error::FrameError;
pub use frame::{FrameSplit, split};
