//! Stream adapters the engine is built on.
//!
//! The engine talks to the outside world exclusively through
//! [`std::io::Read`], [`std::io::Write`] and [`std::io::Seek`].  The
//! adapters here compose by ownership:
//!
//! - [`CountingReader`] / [`CountingWriter`] expose a cumulative byte
//!   count next to the wrapped stream.  The writer stack uses them to
//!   learn compressed and uncompressed offsets without asking the sink.
//! - [`LimitedReader`] caps the number of bytes readable from a
//!   sub-stream.
//! - [`BlockReader`] pulls 512-byte chunks into an internal buffer and
//!   exposes a one-byte lookahead (`peek`) with an explicit EOF sentinel
//!   (`None`).  Every text parser (PAX records, index rows, checkpoint
//!   rows, the tail) runs on top of it; the lookahead is what makes the
//!   self-delimiting `LEN`-prefixed records parseable.
//! - [`SharedStream`] / [`StreamCursor`] share one seekable stream
//!   between several consumers, each with its own position.  A cursor
//!   re-seeks the underlying stream on every read, so interleaving the
//!   index iterator with random-access entry reads is always safe.
//!
//! Memory streams are `std::io::Cursor` and `Vec<u8>`; they need no
//! adapter.
//!
//! Readers may return short reads and consumers loop; a writer that
//! produces a short write is an error (std's `write_all` contract).

use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

/// The USTAR block size.  Also the granularity of [`BlockReader`] and the
/// trailer sniffing window.
pub const BLOCK_SIZE: usize = 512;

// ── CountingReader ───────────────────────────────────────────────────────────

/// Wraps a reader and counts the bytes that pass through it.
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    /// Total bytes read so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

// ── CountingWriter ───────────────────────────────────────────────────────────

/// Wraps a writer and counts the bytes that pass through it.
#[derive(Debug)]
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    /// Total bytes written so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ── LimitedReader ────────────────────────────────────────────────────────────

/// Caps the total number of bytes readable from the wrapped reader.
/// Once the limit is exhausted, reads return 0 (EOF).
#[derive(Debug)]
pub struct LimitedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> LimitedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self { inner, remaining: limit }
    }

    /// Bytes still readable before the limit cuts the stream off.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for LimitedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let cap = buf.len().min(self.remaining as usize);
        let n = self.inner.read(&mut buf[..cap])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

// ── BlockReader ──────────────────────────────────────────────────────────────

/// 512-byte buffered reader with one-byte lookahead.
///
/// `peek()` returns the next byte without consuming it, or `None` at EOF.
/// `consume()` advances past the peeked byte, refilling the buffer from
/// the inner reader when it runs dry.  Short reads from the inner reader
/// are accepted; the buffer simply holds fewer than 512 bytes.
pub struct BlockReader<R> {
    inner: R,
    block: [u8; BLOCK_SIZE],
    len: usize,
    pos: usize,
    next: Option<u8>,
}

impl<R: Read> BlockReader<R> {
    pub fn new(inner: R) -> io::Result<Self> {
        let mut br = Self {
            inner,
            block: [0u8; BLOCK_SIZE],
            len: 0,
            pos: 0,
            next: None,
        };
        br.refill()?;
        Ok(br)
    }

    fn refill(&mut self) -> io::Result<()> {
        let n = self.inner.read(&mut self.block)?;
        if n == 0 {
            self.next = None;
        } else {
            self.len = n;
            self.pos = 1;
            self.next = Some(self.block[0]);
        }
        Ok(())
    }

    /// One-byte lookahead; `None` is the EOF sentinel.
    pub fn peek(&self) -> Option<u8> {
        self.next
    }

    /// Advance past the peeked byte.  A no-op at EOF.
    pub fn consume(&mut self) -> io::Result<()> {
        if self.next.is_none() {
            return Ok(());
        }

        if self.pos >= self.len {
            self.refill()?;
        } else {
            self.next = Some(self.block[self.pos]);
            self.pos += 1;
        }
        Ok(())
    }

    /// Consume exactly `n` bytes; hitting EOF first is an error.
    pub fn skip(&mut self, mut n: u64) -> io::Result<()> {
        while n > 0 {
            if self.next.is_none() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of stream while skipping",
                ));
            }
            self.consume()?;
            n -= 1;
        }
        Ok(())
    }
}

impl<R: Read> Read for BlockReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.next {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                    self.consume()?;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

// ── SharedStream / StreamCursor ──────────────────────────────────────────────

/// A single-threaded shared handle to one seekable stream.
///
/// The SCAR reader's index iterator and its random-access path both read
/// from the same underlying file at unrelated positions.  Each consumer
/// takes a [`StreamCursor`], which remembers its own offset and restores
/// it with a seek before every read, so neither side can clobber the
/// other.  The engine is strictly single-threaded (no `Send` is implied).
pub struct SharedStream<R> {
    inner: Rc<RefCell<R>>,
}

impl<R> Clone for SharedStream<R> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<R: Read + Seek> SharedStream<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: Rc::new(RefCell::new(inner)) }
    }

    /// Total stream length, via a seek to the end.
    pub fn len(&self) -> io::Result<u64> {
        self.inner.borrow_mut().seek(SeekFrom::End(0))
    }

    /// A new independent cursor positioned at `pos`.
    pub fn cursor(&self, pos: u64) -> StreamCursor<R> {
        StreamCursor { inner: Rc::clone(&self.inner), pos }
    }

    /// Read exactly `buf.len()` bytes starting at `pos`.
    pub fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.seek(SeekFrom::Start(pos))?;
        inner.read_exact(buf)
    }
}

/// An independent read position on a [`SharedStream`].
pub struct StreamCursor<R> {
    inner: Rc<RefCell<R>>,
    pos: u64,
}

impl<R> StreamCursor<R> {
    /// The cursor's current offset from the start of the stream.
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl<R: Read + Seek> Read for StreamCursor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        inner.seek(SeekFrom::Start(self.pos))?;
        let n = inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
