//! Uncompressed codec.
//!
//! Writes pass straight through, so every offset is a resync point and
//! `resync`/`finish` are no-ops.  The "magic" is the literal
//! `SCAR-TAIL\n` text: the tail section is the only place the reader
//! hunts for a stream start, and under this codec the tail's first
//! plaintext bytes are exactly that string.

use std::io::{self, Read, Write};

pub const MAGIC: &[u8] = b"SCAR-TAIL\n";
pub const EOF_MARKER: &[u8] = b"SCAR-EOF\n";

pub struct PlainCompressor<W: Write> {
    inner: W,
}

impl<W: Write> PlainCompressor<W> {
    pub fn new(w: W) -> Self {
        Self { inner: w }
    }

    pub fn resync(&mut self) -> io::Result<()> {
        Ok(())
    }

    pub fn finish(self) -> io::Result<W> {
        Ok(self.inner)
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: Write> Write for PlainCompressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub struct PlainDecompressor<R: Read> {
    inner: R,
}

impl<R: Read> PlainDecompressor<R> {
    pub fn new(r: R) -> Self {
        Self { inner: r }
    }
}

impl<R: Read> Read for PlainDecompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
