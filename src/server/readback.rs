//! The worker→dispatcher readback channel.
//!
//! When a worker finishes a request it must hand the client descriptor
//! back to the dispatcher's readiness set. Each hand-off is a fixed-width
//! ASCII frame on a pipe — the descriptor number, or the all-zero
//! sentinel meaning "a client went away" — while the socket object itself
//! travels through a shared hand-back table keyed by descriptor. Frames
//! are smaller than `PIPE_BUF`, so concurrent worker writes never
//! interleave.
//!
//! Clients blocked on a lock are *parked* instead: their socket sits in
//! the wait table, un-armed, until the hand-off that grants the lock (or
//! reports the file gone) writes the response and re-arms them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

/// Width of one readback frame.
pub const FRAME_LEN: usize = 10;

/// Frame announcing that a client disconnected.
pub const CLIENT_GONE: &[u8; FRAME_LEN] = b"0000000000";

/// A decoded readback frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadbackMessage {
    /// Re-arm this descriptor in the readiness set.
    Rearm(RawFd),
    /// A client went away; the live count drops by one.
    ClientGone,
}

type StreamTable = Arc<Mutex<HashMap<RawFd, UnixStream>>>;

/// Dispatcher side of the channel.
pub struct ReadbackReceiver {
    read_end: OwnedFd,
    handback: StreamTable,
}

/// Worker side of the channel.
#[derive(Clone)]
pub struct Courier {
    write_end: Arc<OwnedFd>,
    handback: StreamTable,
    parked: StreamTable,
}

/// Create the pipe and the shared tables behind both endpoints.
pub fn channel() -> io::Result<(ReadbackReceiver, Courier)> {
    let mut fds = [0 as RawFd; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    let read_end = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let write_end = unsafe { OwnedFd::from_raw_fd(fds[1]) };

    let handback: StreamTable = Arc::new(Mutex::new(HashMap::new()));
    let receiver = ReadbackReceiver {
        read_end,
        handback: Arc::clone(&handback),
    };
    let courier = Courier {
        write_end: Arc::new(write_end),
        handback,
        parked: Arc::new(Mutex::new(HashMap::new())),
    };
    Ok((receiver, courier))
}

impl ReadbackReceiver {
    /// The descriptor the dispatcher polls for readability.
    pub fn raw_fd(&self) -> RawFd {
        self.read_end.as_raw_fd()
    }

    /// Read exactly one frame. Blocks, so call only after readiness.
    pub fn read_frame(&self) -> io::Result<ReadbackMessage> {
        let mut buf = [0u8; FRAME_LEN];
        let mut got = 0;
        while got < FRAME_LEN {
            let n = unsafe {
                libc::read(
                    self.read_end.as_raw_fd(),
                    buf[got..].as_mut_ptr().cast(),
                    FRAME_LEN - got,
                )
            };
            match n {
                -1 => {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                }
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "readback pipe closed",
                    ))
                }
                n => got += n as usize,
            }
        }

        if &buf == CLIENT_GONE {
            return Ok(ReadbackMessage::ClientGone);
        }
        let fd: RawFd = std::str::from_utf8(&buf)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "malformed readback frame")
            })?;
        Ok(ReadbackMessage::Rearm(fd))
    }

    /// Claim the socket a worker handed back for this descriptor.
    pub fn take(&self, fd: RawFd) -> Option<UnixStream> {
        self.handback.lock().remove(&fd)
    }
}

impl Courier {
    /// Hand a served client back to the dispatcher.
    pub fn rearm(&self, stream: UnixStream) -> io::Result<()> {
        let fd = stream.as_raw_fd();
        self.handback.lock().insert(fd, stream);
        self.send_frame(&frame_for(fd))
    }

    /// Report that a client disconnected.
    pub fn client_gone(&self) -> io::Result<()> {
        self.send_frame(CLIENT_GONE)
    }

    /// Park a client that is waiting for a lock.
    pub fn park(&self, stream: UnixStream) {
        self.parked.lock().insert(stream.as_raw_fd(), stream);
    }

    /// Claim a parked client, typically to deliver a lock hand-off.
    pub fn unpark(&self, fd: RawFd) -> Option<UnixStream> {
        self.parked.lock().remove(&fd)
    }

    fn send_frame(&self, frame: &[u8; FRAME_LEN]) -> io::Result<()> {
        loop {
            let n = unsafe {
                libc::write(
                    self.write_end.as_raw_fd(),
                    frame.as_ptr().cast(),
                    FRAME_LEN,
                )
            };
            if n == FRAME_LEN as isize {
                return Ok(());
            }
            if n == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            // A frame is far below PIPE_BUF; a partial write here means
            // the pipe is broken beyond repair.
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "short write on readback pipe",
            ));
        }
    }
}

fn frame_for(fd: RawFd) -> [u8; FRAME_LEN] {
    let mut frame = [b'0'; FRAME_LEN];
    let digits = format!("{fd:0width$}", width = FRAME_LEN);
    frame.copy_from_slice(digits.as_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip_through_the_pipe() {
        let (receiver, courier) = channel().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();

        courier.rearm(a).unwrap();
        assert_eq!(receiver.read_frame().unwrap(), ReadbackMessage::Rearm(fd));
        assert!(receiver.take(fd).is_some());
        assert!(receiver.take(fd).is_none());
    }

    #[test]
    fn client_gone_frames_are_distinguished() {
        let (receiver, courier) = channel().unwrap();
        courier.client_gone().unwrap();
        assert_eq!(receiver.read_frame().unwrap(), ReadbackMessage::ClientGone);
    }

    #[test]
    fn parked_streams_can_be_reclaimed_once() {
        let (_receiver, courier) = channel().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();

        courier.park(a);
        assert!(courier.unpark(fd).is_some());
        assert!(courier.unpark(fd).is_none());
    }

    #[test]
    fn frames_from_several_writers_arrive_intact() {
        let (receiver, courier) = channel().unwrap();
        let mut streams = Vec::new();
        let mut expected = Vec::new();
        for _ in 0..8 {
            let (a, b) = UnixStream::pair().unwrap();
            expected.push(a.as_raw_fd());
            courier.rearm(a).unwrap();
            streams.push(b);
        }
        for fd in expected {
            assert_eq!(receiver.read_frame().unwrap(), ReadbackMessage::Rearm(fd));
        }
    }
}
