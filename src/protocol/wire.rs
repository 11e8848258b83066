//! Framing primitives.
//!
//! Every variable-length field travels as a *segment*: a ten-digit ASCII
//! decimal length immediately followed by that many raw payload bytes — no
//! escaping, no terminator. Multi-file payloads are sequences of segment
//! pairs closed by the all-zero sentinel length.
//!
//! Parsers accept exact widths only. A malformed length, a non-digit
//! where a digit is required, or a short read inside a frame is a
//! bad-request on the input side; it does not terminate the connection.

use std::io::{self, Read, Write};
use thiserror::Error;

/// Width of every length prefix and numeric count field.
pub const LEN_DIGITS: usize = 10;

/// End-of-stream marker for multi-file payloads.
pub const SENTINEL: &[u8; LEN_DIGITS] = b"0000000000";

/// How reading or writing a frame can fail.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The peer closed the stream at a request boundary.
    #[error("connection closed by peer")]
    Eof,
    /// The frame violates the protocol; the connection survives.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The transport failed; the connection is torn down.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Read exactly `buf.len()` bytes; a short read is a malformed frame.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> ProtocolResult<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ProtocolError::Malformed(
            "frame truncated mid-field".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Read a single ASCII digit field.
pub fn read_digit(reader: &mut impl Read) -> ProtocolResult<u8> {
    let mut buf = [0u8; 1];
    read_full(reader, &mut buf)?;
    if !buf[0].is_ascii_digit() {
        return Err(ProtocolError::Malformed(format!(
            "expected a digit, got byte {:#04x}",
            buf[0]
        )));
    }
    Ok(buf[0] - b'0')
}

/// Read a ten-digit unsigned length prefix.
pub fn read_len(reader: &mut impl Read) -> ProtocolResult<usize> {
    let mut buf = [0u8; LEN_DIGITS];
    read_full(reader, &mut buf)?;
    parse_digits(&buf)
}

/// Read a ten-character signed count (an optional leading `-`, digits
/// elsewhere). Zero or negative means "all".
pub fn read_count(reader: &mut impl Read) -> ProtocolResult<i64> {
    let mut buf = [0u8; LEN_DIGITS];
    read_full(reader, &mut buf)?;

    let (negative, digits) = match buf[0] {
        b'-' => (true, &buf[1..]),
        _ => (false, &buf[..]),
    };
    let magnitude = parse_digits(digits)? as i64;
    Ok(if negative { -magnitude } else { magnitude })
}

fn parse_digits(digits: &[u8]) -> ProtocolResult<usize> {
    let mut value: usize = 0;
    for &d in digits {
        if !d.is_ascii_digit() {
            return Err(ProtocolError::Malformed(format!(
                "non-digit byte {:#04x} in numeric field",
                d
            )));
        }
        value = value * 10 + (d - b'0') as usize;
    }
    Ok(value)
}

/// Read one length-prefixed segment.
pub fn read_segment(reader: &mut impl Read) -> ProtocolResult<Vec<u8>> {
    let len = read_len(reader)?;
    let mut payload = vec![0u8; len];
    read_full(reader, &mut payload)?;
    Ok(payload)
}

/// Write one length-prefixed segment.
pub fn write_segment(writer: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    write!(writer, "{:0width$}", payload.len(), width = LEN_DIGITS)?;
    writer.write_all(payload)
}

/// Write a ten-character signed count.
pub fn write_count(writer: &mut impl Write, count: i64) -> io::Result<()> {
    write!(writer, "{:0width$}", count, width = LEN_DIGITS)
}

/// Close a multi-file payload.
pub fn write_sentinel(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(SENTINEL)
}
