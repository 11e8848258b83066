//! Response framing.
//!
//! Responses open with a two-digit code. Read responses append one content
//! segment; read-N and eviction payloads append a stream of (path,
//! content) segment pairs closed by the sentinel length.

use std::io::{self, Read, Write};

use super::wire::{self, ProtocolError, ProtocolResult, LEN_DIGITS};
use crate::cache::store::StoreError;

/// Response codes as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    Ok = 1,
    FileNotFound = 2,
    Forbidden = 3,
    FileTooBig = 4,
    InternalError = 5,
    BadRequest = 6,
    AlreadyExists = 7,
}

impl ResponseCode {
    fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Ok),
            2 => Some(Self::FileNotFound),
            3 => Some(Self::Forbidden),
            4 => Some(Self::FileTooBig),
            5 => Some(Self::InternalError),
            6 => Some(Self::BadRequest),
            7 => Some(Self::AlreadyExists),
            _ => None,
        }
    }
}

impl From<StoreError> for ResponseCode {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::FileNotFound,
            StoreError::Forbidden => Self::Forbidden,
            StoreError::TooBig => Self::FileTooBig,
            StoreError::AlreadyExists => Self::AlreadyExists,
        }
    }
}

/// Write the two-digit response code.
pub fn write_code(writer: &mut impl Write, code: ResponseCode) -> io::Result<()> {
    write!(writer, "{:02}", code as u8)
}

/// Read a two-digit response code (client side).
pub fn read_code(reader: &mut impl Read) -> ProtocolResult<ResponseCode> {
    let tens = wire::read_digit(reader)?;
    let ones = wire::read_digit(reader)?;
    let value = tens * 10 + ones;
    ResponseCode::from_value(value)
        .ok_or_else(|| ProtocolError::Malformed(format!("unknown response code {value}")))
}

/// Write a stream of (path, content) pairs closed by the sentinel.
pub fn write_file_list(
    writer: &mut impl Write,
    files: &[(Vec<u8>, Vec<u8>)],
) -> io::Result<()> {
    for (path, content) in files {
        wire::write_segment(writer, path)?;
        wire::write_segment(writer, content)?;
    }
    wire::write_sentinel(writer)
}

/// Read a sentinel-terminated stream of (path, content) pairs
/// (client side).
pub fn read_file_list(reader: &mut impl Read) -> ProtocolResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut files = Vec::new();
    loop {
        let mut len_buf = [0u8; LEN_DIGITS];
        reader.read_exact(&mut len_buf)?;
        if &len_buf == wire::SENTINEL {
            return Ok(files);
        }

        let len: usize = std::str::from_utf8(&len_buf)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ProtocolError::Malformed("bad path length".to_string()))?;
        let mut path = vec![0u8; len];
        reader.read_exact(&mut path)?;
        let content = wire::read_segment(reader)?;
        files.push((path, content));
    }
}
