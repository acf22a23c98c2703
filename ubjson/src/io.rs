//! Pull-style byte sources and push-style byte sinks. Sources hand out
//! exactly the bytes the decoder demands and never consume transport
//! bytes beyond that, so data trailing a complete document stays
//! readable by the caller. Sinks buffer encoder output and only forward
//! it while the document is still known to be well formed.

use crate::error::{DecodeError, DecodeErrorKind};
use std::io::{Read, Write, self};

/// A reader filling its scratch buffer grows it in steps of this size, so
/// a length prefix lying about a gigantic payload cannot force a gigantic
/// allocation before the bytes actually arrive.
const READ_CHUNK: usize = 64 * 1024;

/// Buffered sink output is forwarded to the transport once this many
/// bytes have accumulated.
const FLUSH_AT: usize = 8 * 1024;

/// Pull-style input of the decoder.
pub trait Source {
    /// Returns exactly `n` bytes or fails with `Truncated`. The returned
    /// slice is valid until the next read.
    fn read_exact(&mut self, n: usize) -> Result<&[u8], DecodeError>;

    fn read_u8(&mut self) -> Result<u8, DecodeError>;

    /// Count of bytes consumed so far. On a truncation failure this has
    /// advanced over the partial bytes, which places it exactly at the
    /// end of the available input.
    fn offset(&self) -> u64;
}

/// A source over a borrowed buffer.
pub struct SliceSource<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(buf: &'a [u8]) -> SliceSource<'a> {
        SliceSource { buf, pos: 0 }
    }
}

impl<'a> Source for SliceSource<'a> {
    fn read_exact(&mut self, n: usize) -> Result<&[u8], DecodeError> {
        if self.buf.len() - self.pos < n {
            self.pos = self.buf.len();
            return Err(DecodeErrorKind::Truncated.at(self.pos as u64));
        }
        self.pos += n;
        Ok(&self.buf[self.pos - n..self.pos])
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        match self.buf.get(self.pos) {
            Some(b) => {
                self.pos += 1;
                Ok(*b)
            }
            None => Err(DecodeErrorKind::Truncated.at(self.pos as u64)),
        }
    }

    fn offset(&self) -> u64 {
        self.pos as u64
    }
}

/// A source over any `std::io::Read`. Reads demand-exact, so the
/// transport position after a successful decode is the first byte behind
/// the document.
pub struct ReaderSource<R: Read> {
    inner: R,
    scratch: Vec<u8>,
    offset: u64,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(inner: R) -> ReaderSource<R> {
        ReaderSource { inner, scratch: Vec::new(), offset: 0 }
    }
}

impl<R: Read> Source for ReaderSource<R> {
    fn read_exact(&mut self, n: usize) -> Result<&[u8], DecodeError> {
        self.scratch.clear();
        while self.scratch.len() < n {
            let want = (n - self.scratch.len()).min(READ_CHUNK);
            let start = self.scratch.len();
            self.scratch.resize(start + want, 0);
            match self.inner.read(&mut self.scratch[start..]) {
                Ok(0) => {
                    self.scratch.truncate(start);
                    return Err(DecodeErrorKind::Truncated.at(self.offset));
                }
                Ok(got) => {
                    self.scratch.truncate(start + got);
                    self.offset += got as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.scratch.truncate(start);
                }
                Err(e) => {
                    self.scratch.truncate(start);
                    return Err(DecodeErrorKind::Io(e).at(self.offset));
                }
            }
        }
        Ok(&self.scratch)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_exact(1)?[0])
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

/// Push-style output of the encoder.
pub trait Sink {
    fn push(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl Sink for Vec<u8> {
    fn push(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// A sink over any `std::io::Write`. Output accumulates in a buffer that
/// is forwarded at a threshold and on [`flush`](StreamSink::flush). After
/// a failed encode the sink is tainted: buffered bytes of the broken
/// document are withheld from the transport.
pub struct StreamSink<W: Write> {
    inner: W,
    buf: Vec<u8>,
    tainted: bool,
}

impl<W: Write> StreamSink<W> {
    pub fn new(inner: W) -> StreamSink<W> {
        StreamSink { inner, buf: Vec::new(), tainted: false }
    }

    /// Forwards all buffered bytes and flushes the transport. A no-op on
    /// a tainted sink.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.tainted {
            return Ok(());
        }
        self.inner.write_all(&self.buf)?;
        self.buf.clear();
        self.inner.flush()
    }

    pub fn taint(&mut self) {
        self.tainted = true;
        self.buf.clear();
    }
}

impl<W: Write> Sink for StreamSink<W> {
    fn push(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() >= FLUSH_AT {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DecodeErrorKind, ReaderSource, Sink, SliceSource, Source, StreamSink};
    use std::io::{Cursor, Read};

    #[test]
    fn slice_source_reads_exactly() {
        let mut src = SliceSource::new(&[1, 2, 3, 4]);
        assert_eq!(&[1, 2], src.read_exact(2).unwrap());
        assert_eq!(3, src.read_u8().unwrap());
        assert_eq!(3, src.offset());
    }

    #[test]
    fn truncation_lands_on_end_of_input() {
        let mut src = SliceSource::new(&[1, 2, 3]);
        src.read_u8().unwrap();
        let err = src.read_exact(5).unwrap_err();
        assert!(matches!(err.kind(), DecodeErrorKind::Truncated));
        assert_eq!(3, err.offset());
    }

    #[test]
    fn reader_source_does_not_overread() {
        let mut cur = Cursor::new(vec![10, 11, 12, 13]);
        {
            let mut src = ReaderSource::new(&mut cur);
            assert_eq!(&[10, 11], src.read_exact(2).unwrap());
            assert_eq!(2, src.offset());
        }
        let mut rest = Vec::new();
        cur.read_to_end(&mut rest).unwrap();
        assert_eq!(vec![12, 13], rest);
    }

    #[test]
    fn reader_source_truncation_counts_partial_bytes() {
        let mut src = ReaderSource::new(Cursor::new(vec![1, 2]));
        let err = src.read_exact(4).unwrap_err();
        assert!(matches!(err.kind(), DecodeErrorKind::Truncated));
        assert_eq!(2, err.offset());
    }

    #[test]
    fn tainted_sink_withholds_output() {
        let mut out = Vec::new();
        let mut sink = StreamSink::new(&mut out);
        sink.push(&[1, 2, 3]).unwrap();
        sink.taint();
        sink.flush().unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn sink_flushes_buffered_bytes() {
        let mut out = Vec::new();
        let mut sink = StreamSink::new(&mut out);
        sink.push(b"abc").unwrap();
        sink.flush().unwrap();
        assert_eq!(b"abc".to_vec(), out);
    }
}
