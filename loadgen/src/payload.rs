//! Synthetic object contents that never touch the filesystem.
//!
//! A [`Payload`] is a fixed-length stream filled with [`FILL_BYTE`]. It can be read, seeked and
//! cloned, so the same value can serve as an upload body more than once.

use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task;

use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

/// The byte every payload is filled with.
pub const FILL_BYTE: u8 = b'Q';

/// Deterministic contents of an object.
///
/// The payload keeps a cursor into a virtual buffer of `len` bytes. Reads past the end return
/// end-of-stream, and seeking beyond the end is allowed without clamping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    len: u64,
    pos: u64,
}

impl Payload {
    /// Creates a payload of exactly `len` bytes, positioned at the start.
    pub fn new(len: u64) -> Self {
        Self { len, pos: 0 }
    }

    /// The total length of the payload in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if the payload has no content at all.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The current cursor position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// The number of bytes left before end-of-stream.
    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }

    /// Releases the payload. There is nothing to release, so this always succeeds.
    pub fn close(self) -> io::Result<()> {
        Ok(())
    }

    fn fill(&mut self, buf: &mut [u8]) -> usize {
        let len_to_fill = (buf.len() as u64).min(self.remaining()) as usize;
        buf[..len_to_fill].fill(FILL_BYTE);
        self.pos += len_to_fill as u64;
        len_to_fill
    }

    fn seek_to(&mut self, position: SeekFrom) -> io::Result<u64> {
        let new_pos = match position {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(offset) => self.pos.checked_add_signed(offset),
            SeekFrom::End(offset) => self.len.checked_add_signed(offset),
        };

        let Some(new_pos) = new_pos else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            ));
        };

        self.pos = new_pos;
        Ok(new_pos)
    }
}

impl io::Read for Payload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.fill(buf))
    }
}

impl io::Seek for Payload {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.seek_to(pos)
    }
}

impl AsyncRead for Payload {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> task::Poll<io::Result<()>> {
        let len_to_fill = (buf.remaining() as u64).min(self.remaining()) as usize;

        let fill_buf = buf.initialize_unfilled_to(len_to_fill);
        let filled = self.fill(fill_buf);
        buf.advance(filled);

        task::Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for Payload {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        self.seek_to(position).map(|_| ())
    }

    fn poll_complete(
        self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
    ) -> task::Poll<io::Result<u64>> {
        task::Poll::Ready(Ok(self.pos))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek};

    use super::*;

    fn read_all(payload: &mut Payload, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0; chunk];
        loop {
            let n = payload.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn produces_exact_length() {
        for len in [0, 1, 7, 4096, 10_000] {
            let mut payload = Payload::new(len);
            let bytes = read_all(&mut payload, 1000);
            assert_eq!(bytes.len() as u64, len);
            assert!(bytes.iter().all(|b| *b == FILL_BYTE));
        }
    }

    #[test]
    fn empty_payload_is_immediately_exhausted() {
        let mut payload = Payload::new(0);
        let mut buf = [0u8; 16];
        assert_eq!(payload.read(&mut buf).unwrap(), 0);
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn never_fills_more_than_requested() {
        let mut payload = Payload::new(100);
        let mut buf = [0u8; 10];
        assert_eq!(payload.read(&mut buf[..3]).unwrap(), 3);
        assert_eq!(&buf[..4], &[FILL_BYTE, FILL_BYTE, FILL_BYTE, 0]);
        assert_eq!(payload.remaining(), 97);
    }

    #[test]
    fn rewinding_reproduces_contents() {
        let mut payload = Payload::new(300);
        let mut first = [0u8; 120];
        payload.read_exact(&mut first).unwrap();

        payload.rewind().unwrap();
        let all = read_all(&mut payload, 64);
        assert_eq!(all.len(), 300);
        assert_eq!(&all[..120], &first[..]);
    }

    #[test]
    fn seek_relative_to_end_and_current() {
        let mut payload = Payload::new(50);
        assert_eq!(payload.seek(SeekFrom::End(-10)).unwrap(), 40);
        assert_eq!(payload.seek(SeekFrom::Current(5)).unwrap(), 45);
        assert_eq!(read_all(&mut payload, 8).len(), 5);
    }

    #[test]
    fn seek_past_end_reads_nothing() {
        let mut payload = Payload::new(10);
        assert_eq!(payload.seek(SeekFrom::Start(25)).unwrap(), 25);
        assert_eq!(read_all(&mut payload, 8).len(), 0);

        // back within range, the content is readable again
        payload.seek(SeekFrom::Current(-20)).unwrap();
        assert_eq!(read_all(&mut payload, 8).len(), 5);
    }

    #[test]
    fn seek_before_start_fails() {
        let mut payload = Payload::new(10);
        let err = payload.seek(SeekFrom::Current(-1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(payload.position(), 0);
    }

    #[test]
    fn clones_are_independent() {
        let mut payload = Payload::new(10);
        let mut clone = payload.clone();
        read_all(&mut payload, 4);
        assert_eq!(clone.position(), 0);
        assert_eq!(read_all(&mut clone, 4).len(), 10);
        assert!(clone.close().is_ok());
    }
}
