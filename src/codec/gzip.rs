//! Gzip codec (flate2).
//!
//! Resync points are member boundaries: `resync` finishes the current
//! gzip member (deflate trailer, CRC32, ISIZE) and the next write opens
//! a new member, so the archive is a standard multi-member gzip file and
//! any checkpoint position is the start of a well-formed member.
//! The decompressor reads concatenated members.

use std::io::{self, Read, Write};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Every gzip member starts with these two bytes.
pub const MAGIC: &[u8] = &[0x1f, 0x8b];

/// A complete gzip member whose content is `SCAR-EOF\n`.  Appended
/// verbatim to every gzip archive; byte-for-byte fixed so suffix
/// matching identifies the codec.
pub const EOF_MARKER: &[u8] = &[
    0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x03, 0x0b, 0x76, 0x76, 0x0c, 0xd2,
    0x75, 0xf5, 0x77, 0xe3, 0x02, 0x00, 0xf8, 0xf3, 0x55, 0x01, 0x09, 0x00, 0x00, 0x00,
];

/// Sink state: between members the raw sink is held directly, so the
/// next member starts exactly at the bytes recorded by a checkpoint.
enum State<W: Write> {
    Idle(W),
    Active(GzEncoder<W>),
    Poisoned,
}

pub struct GzipCompressor<W: Write> {
    state: State<W>,
    level: Compression,
}

impl<W: Write> GzipCompressor<W> {
    pub fn new(w: W, level: u32) -> Self {
        Self {
            state: State::Idle(w),
            level: Compression::new(level.min(9)),
        }
    }

    pub fn resync(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Active(enc) => {
                let w = enc.finish()?;
                self.state = State::Idle(w);
                Ok(())
            }
            // Nothing written since the last boundary.
            idle @ State::Idle(_) => {
                self.state = idle;
                Ok(())
            }
            State::Poisoned => unreachable!("gzip compressor poisoned"),
        }
    }

    pub fn finish(self) -> io::Result<W> {
        match self.state {
            State::Active(enc) => enc.finish(),
            State::Idle(w) => Ok(w),
            State::Poisoned => unreachable!("gzip compressor poisoned"),
        }
    }

    pub fn get_ref(&self) -> &W {
        match &self.state {
            State::Active(enc) => enc.get_ref(),
            State::Idle(w) => w,
            State::Poisoned => unreachable!("gzip compressor poisoned"),
        }
    }
}

impl<W: Write> Write for GzipCompressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let State::Idle(_) = self.state {
            match std::mem::replace(&mut self.state, State::Poisoned) {
                State::Idle(w) => {
                    self.state = State::Active(GzEncoder::new(w, self.level));
                }
                _ => unreachable!(),
            }
        }
        match &mut self.state {
            State::Active(enc) => enc.write(buf),
            _ => unreachable!("gzip compressor poisoned"),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            State::Active(enc) => enc.flush(),
            State::Idle(w) => w.flush(),
            State::Poisoned => unreachable!("gzip compressor poisoned"),
        }
    }
}

pub struct GzipDecompressor<R: Read> {
    inner: MultiGzDecoder<R>,
}

impl<R: Read> GzipDecompressor<R> {
    pub fn new(r: R) -> Self {
        Self { inner: MultiGzDecoder::new(r) }
    }
}

impl<R: Read> Read for GzipDecompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn empty_resync_is_a_noop() {
        let mut c = GzipCompressor::new(Vec::new(), 6);
        c.resync().unwrap();
        c.resync().unwrap();
        let out = c.finish().unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn multi_member_stream_decodes_in_one_pass() {
        let mut c = GzipCompressor::new(Vec::new(), 6);
        c.write_all(b"Hello").unwrap();
        c.resync().unwrap();
        c.write_all(b"World").unwrap();
        let bytes = c.finish().unwrap();

        let mut out = Vec::new();
        GzipDecompressor::new(Cursor::new(bytes)).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"HelloWorld");
    }
}
