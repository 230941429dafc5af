/// Framing error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The buffer ends in the middle of a frame.
    #[error("incomplete frame")]
    Incomplete,
    /// The first byte of a frame is not one of `+ - : $ *`.
    #[error("unknown frame type byte 0x{0:02x}")]
    UnknownType(u8),
    /// A length prefix is empty, non-numeric, overlong, or negative
    /// (other than the `-1` null marker).
    #[error("malformed length prefix")]
    BadLength,
    /// A bulk string payload is not followed by CRLF.
    #[error("missing CRLF terminator")]
    BadTerminator,
    /// Arrays nested beyond the supported depth.
    #[error("frames nested too deeply")]
    NestingTooDeep,
}
