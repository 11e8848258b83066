//! Request framing.
//!
//! A request is one code digit followed by the fields that operation
//! needs: a pathname segment for everything but read-N, a flag digit for
//! open, a second segment for write/append, a signed count for read-N.

use std::io::{self, Read, Write};

use super::wire::{self, ProtocolError, ProtocolResult};
use crate::cache::store::OpenFlags;

/// Request codes as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestCode {
    ReadN = 1,
    Open = 2,
    Read = 3,
    Write = 4,
    Append = 5,
    Lock = 6,
    Unlock = 7,
    Close = 8,
    Remove = 9,
}

impl RequestCode {
    fn from_digit(digit: u8) -> Option<Self> {
        match digit {
            1 => Some(Self::ReadN),
            2 => Some(Self::Open),
            3 => Some(Self::Read),
            4 => Some(Self::Write),
            5 => Some(Self::Append),
            6 => Some(Self::Lock),
            7 => Some(Self::Unlock),
            8 => Some(Self::Close),
            9 => Some(Self::Remove),
            _ => None,
        }
    }
}

/// A fully parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Fetch up to `limit` files (≤ 0 meaning all).
    ReadN { limit: i64 },
    /// Open or create a file.
    Open { path: Vec<u8>, flags: OpenFlags },
    /// Read a file's content.
    Read { path: Vec<u8> },
    /// Perform the initial write on a just-created file.
    Write { path: Vec<u8>, content: Vec<u8> },
    /// Append to a file.
    Append { path: Vec<u8>, content: Vec<u8> },
    /// Acquire a file lock.
    Lock { path: Vec<u8> },
    /// Release a file lock.
    Unlock { path: Vec<u8> },
    /// Close a file.
    Close { path: Vec<u8> },
    /// Remove a file.
    Remove { path: Vec<u8> },
}

impl Request {
    /// Parse exactly one request from the stream.
    ///
    /// End-of-stream before the code digit means the client left and maps
    /// to [`ProtocolError::Eof`]; everything malformed past that point is
    /// [`ProtocolError::Malformed`].
    pub fn read_from(reader: &mut impl Read) -> ProtocolResult<Self> {
        let mut code_buf = [0u8; 1];
        loop {
            match reader.read(&mut code_buf) {
                Ok(0) => return Err(ProtocolError::Eof),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if !code_buf[0].is_ascii_digit() {
            return Err(ProtocolError::Malformed(format!(
                "request code is not a digit: {:#04x}",
                code_buf[0]
            )));
        }

        let code = RequestCode::from_digit(code_buf[0] - b'0').ok_or_else(|| {
            ProtocolError::Malformed(format!("unknown request code {}", code_buf[0] - b'0'))
        })?;

        match code {
            RequestCode::ReadN => Ok(Self::ReadN {
                limit: wire::read_count(reader)?,
            }),
            RequestCode::Open => {
                let path = wire::read_segment(reader)?;
                let flag_digit = wire::read_digit(reader)?;
                let flags = OpenFlags::from_bits(flag_digit).ok_or_else(|| {
                    ProtocolError::Malformed(format!("invalid open flags {flag_digit}"))
                })?;
                Ok(Self::Open { path, flags })
            }
            RequestCode::Read => Ok(Self::Read {
                path: wire::read_segment(reader)?,
            }),
            RequestCode::Write => Ok(Self::Write {
                path: wire::read_segment(reader)?,
                content: wire::read_segment(reader)?,
            }),
            RequestCode::Append => Ok(Self::Append {
                path: wire::read_segment(reader)?,
                content: wire::read_segment(reader)?,
            }),
            RequestCode::Lock => Ok(Self::Lock {
                path: wire::read_segment(reader)?,
            }),
            RequestCode::Unlock => Ok(Self::Unlock {
                path: wire::read_segment(reader)?,
            }),
            RequestCode::Close => Ok(Self::Close {
                path: wire::read_segment(reader)?,
            }),
            RequestCode::Remove => Ok(Self::Remove {
                path: wire::read_segment(reader)?,
            }),
        }
    }

    /// Serialize this request as a client would send it.
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        match self {
            Self::ReadN { limit } => {
                write!(writer, "{}", RequestCode::ReadN as u8)?;
                wire::write_count(writer, *limit)
            }
            Self::Open { path, flags } => {
                write!(writer, "{}", RequestCode::Open as u8)?;
                wire::write_segment(writer, path)?;
                write!(writer, "{}", flags.bits())
            }
            Self::Read { path } => Self::write_path_only(writer, RequestCode::Read, path),
            Self::Write { path, content } => {
                write!(writer, "{}", RequestCode::Write as u8)?;
                wire::write_segment(writer, path)?;
                wire::write_segment(writer, content)
            }
            Self::Append { path, content } => {
                write!(writer, "{}", RequestCode::Append as u8)?;
                wire::write_segment(writer, path)?;
                wire::write_segment(writer, content)
            }
            Self::Lock { path } => Self::write_path_only(writer, RequestCode::Lock, path),
            Self::Unlock { path } => Self::write_path_only(writer, RequestCode::Unlock, path),
            Self::Close { path } => Self::write_path_only(writer, RequestCode::Close, path),
            Self::Remove { path } => Self::write_path_only(writer, RequestCode::Remove, path),
        }
    }

    fn write_path_only(writer: &mut impl Write, code: RequestCode, path: &[u8]) -> io::Result<()> {
        write!(writer, "{}", code as u8)?;
        wire::write_segment(writer, path)
    }

    /// The pathname this request targets, if it has one.
    pub fn path(&self) -> Option<&[u8]> {
        match self {
            Self::ReadN { .. } => None,
            Self::Open { path, .. }
            | Self::Read { path }
            | Self::Write { path, .. }
            | Self::Append { path, .. }
            | Self::Lock { path }
            | Self::Unlock { path }
            | Self::Close { path }
            | Self::Remove { path } => Some(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(request: Request) {
        let mut buf = Vec::new();
        request.write_to(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(Request::read_from(&mut cursor).unwrap(), request);
    }

    #[test]
    fn open_with_flags_parses() {
        round_trip(Request::Open {
            path: b"/a/b".to_vec(),
            flags: OpenFlags {
                create: true,
                lock: true,
            },
        });
    }

    #[test]
    fn write_carries_two_segments() {
        round_trip(Request::Write {
            path: b"/a".to_vec(),
            content: b"binary \x00 payload".to_vec(),
        });
    }

    #[test]
    fn read_n_carries_a_signed_count() {
        round_trip(Request::ReadN { limit: -1 });
        round_trip(Request::ReadN { limit: 25 });
    }

    #[test]
    fn eof_before_the_code_digit_means_client_left() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(matches!(
            Request::read_from(&mut cursor),
            Err(ProtocolError::Eof)
        ));
    }

    #[test]
    fn unknown_code_is_malformed() {
        let mut cursor = Cursor::new(b"0".to_vec());
        assert!(matches!(
            Request::read_from(&mut cursor),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn invalid_open_flags_are_malformed() {
        let mut buf = Vec::new();
        buf.push(b'2');
        wire::write_segment(&mut buf, b"/x").unwrap();
        buf.push(b'7');
        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            Request::read_from(&mut cursor),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn truncated_request_is_malformed_not_eof() {
        let mut buf = Vec::new();
        Request::Read {
            path: b"/abc".to_vec(),
        }
        .write_to(&mut buf)
        .unwrap();
        buf.truncate(buf.len() - 2);
        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            Request::read_from(&mut cursor),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
