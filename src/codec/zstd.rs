//! Zstandard codec.
//!
//! Same shape as the gzip codec at frame granularity: `resync` finishes
//! the current zstd frame and the next write opens a new one, so every
//! checkpoint position is the start of a well-formed frame.  The
//! decompressor reads concatenated frames.

use std::io::{self, BufReader, Read, Write};

use zstd::stream::read::Decoder;
use zstd::stream::write::Encoder;

/// Zstandard frame magic.
pub const MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

/// A complete single-segment zstd frame (one raw block, no checksum)
/// whose content is `SCAR-EOF\n`.
pub const EOF_MARKER: &[u8] = &[
    0x28, 0xb5, 0x2f, 0xfd, // magic
    0x20, // frame header: single-segment, 1-byte content size
    0x09, // frame content size = 9
    0x49, 0x00, 0x00, // block header: last block, raw, size 9
    b'S', b'C', b'A', b'R', b'-', b'E', b'O', b'F', b'\n',
];

enum State<W: Write> {
    Idle(W),
    Active(Encoder<'static, W>),
    Poisoned,
}

pub struct ZstdCompressor<W: Write> {
    state: State<W>,
    level: i32,
}

impl<W: Write> ZstdCompressor<W> {
    pub fn new(w: W, level: u32) -> Self {
        Self {
            state: State::Idle(w),
            level: (level as i32).clamp(1, 21),
        }
    }

    pub fn resync(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Active(enc) => {
                let w = enc.finish()?;
                self.state = State::Idle(w);
                Ok(())
            }
            idle @ State::Idle(_) => {
                self.state = idle;
                Ok(())
            }
            State::Poisoned => unreachable!("zstd compressor poisoned"),
        }
    }

    pub fn finish(self) -> io::Result<W> {
        match self.state {
            State::Active(enc) => enc.finish(),
            State::Idle(w) => Ok(w),
            State::Poisoned => unreachable!("zstd compressor poisoned"),
        }
    }

    pub fn get_ref(&self) -> &W {
        match &self.state {
            State::Active(enc) => enc.get_ref(),
            State::Idle(w) => w,
            State::Poisoned => unreachable!("zstd compressor poisoned"),
        }
    }
}

impl<W: Write> Write for ZstdCompressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let State::Idle(_) = self.state {
            match std::mem::replace(&mut self.state, State::Poisoned) {
                State::Idle(w) => {
                    self.state = State::Active(Encoder::new(w, self.level)?);
                }
                _ => unreachable!(),
            }
        }
        match &mut self.state {
            State::Active(enc) => enc.write(buf),
            _ => unreachable!("zstd compressor poisoned"),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            State::Active(enc) => enc.flush(),
            State::Idle(w) => w.flush(),
            State::Poisoned => unreachable!("zstd compressor poisoned"),
        }
    }
}

pub struct ZstdDecompressor<R: Read> {
    inner: Decoder<'static, BufReader<R>>,
}

impl<R: Read> ZstdDecompressor<R> {
    pub fn new(r: R) -> io::Result<Self> {
        Ok(Self { inner: Decoder::new(r)? })
    }
}

impl<R: Read> Read for ZstdDecompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn multi_frame_stream_decodes_in_one_pass() {
        let mut c = ZstdCompressor::new(Vec::new(), 3);
        c.write_all(b"Hello").unwrap();
        c.resync().unwrap();
        c.write_all(b"World").unwrap();
        let bytes = c.finish().unwrap();

        let mut out = Vec::new();
        ZstdDecompressor::new(Cursor::new(bytes))
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"HelloWorld");
    }
}
