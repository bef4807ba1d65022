//! Compression codecs with explicit resync and finish semantics.
//!
//! # Identity rules
//! A codec is identified by two byte-string constants:
//!
//! - `magic` — the prefix every compressed stream starts with.  The
//!   reader scans backward over these when hunting for the tail section.
//! - `eof_marker` — a fixed byte sequence appended verbatim as the last
//!   bytes of every archive.  It is a complete, well-formed stream under
//!   its codec (decoding to `SCAR-EOF\n`), and it is the format
//!   discriminator: the reader picks the codec whose marker matches the
//!   file suffix.
//!
//! # Resync semantics
//! `Compressor::resync` closes the current member/frame and arms a fresh
//! one, so the bytes written so far form a decodable prefix *and* a new
//! decompressor pointed at the next byte picks up exactly the data
//! written after the resync.  Decompressors decode concatenated
//! members/frames, which is what lets one decompressor run from a
//! checkpoint through to the end of a section.
//!
//! For the plain codec resync is a no-op and every offset is a resync
//! point.

pub mod gzip;
pub mod plain;
pub mod zstd;

use std::io::{self, Read, Write};

use self::gzip::{GzipCompressor, GzipDecompressor};
use self::plain::{PlainCompressor, PlainDecompressor};
use self::zstd::{ZstdCompressor, ZstdDecompressor};

/// Runtime codec discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Plain,
    Zstd,
}

/// Sniffing order.  Plain must come last: its EOF marker (`SCAR-EOF\n`)
/// is also the raw-block payload at the end of the zstd marker.
const SNIFF_ORDER: [Codec; 3] = [Codec::Gzip, Codec::Zstd, Codec::Plain];

impl Codec {
    /// Human-readable name (CLI surface, diagnostics).
    pub fn name(self) -> &'static str {
        match self {
            Codec::Gzip => "gzip",
            Codec::Plain => "plain",
            Codec::Zstd => "zstd",
        }
    }

    /// Parse a CLI codec name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gzip" | "gz" => Some(Codec::Gzip),
            "plain" | "none" => Some(Codec::Plain),
            "zstd" | "zst" => Some(Codec::Zstd),
            _ => None,
        }
    }

    /// The prefix bytes of every compressed stream under this codec.
    pub fn magic(self) -> &'static [u8] {
        match self {
            Codec::Gzip => gzip::MAGIC,
            Codec::Plain => plain::MAGIC,
            Codec::Zstd => zstd::MAGIC,
        }
    }

    /// The fixed trailer bytes that identify this codec as a file suffix.
    pub fn eof_marker(self) -> &'static [u8] {
        match self {
            Codec::Gzip => gzip::EOF_MARKER,
            Codec::Plain => plain::EOF_MARKER,
            Codec::Zstd => zstd::EOF_MARKER,
        }
    }

    /// Identify the codec from the last bytes of a file by EOF-marker
    /// suffix match.  `None` means the file is not a SCAR archive of any
    /// codec known to this build.
    pub fn from_tail(tail: &[u8]) -> Option<Self> {
        SNIFF_ORDER.into_iter().find(|c| tail.ends_with(c.eof_marker()))
    }

    pub fn compressor<W: Write>(self, w: W, level: u32) -> Compressor<W> {
        match self {
            Codec::Gzip => Compressor::Gzip(GzipCompressor::new(w, level)),
            Codec::Plain => Compressor::Plain(PlainCompressor::new(w)),
            Codec::Zstd => Compressor::Zstd(ZstdCompressor::new(w, level)),
        }
    }

    pub fn decompressor<R: Read>(self, r: R) -> io::Result<Decompressor<R>> {
        Ok(match self {
            Codec::Gzip => Decompressor::Gzip(GzipDecompressor::new(r)),
            Codec::Plain => Decompressor::Plain(PlainDecompressor::new(r)),
            Codec::Zstd => Decompressor::Zstd(ZstdDecompressor::new(r)?),
        })
    }
}

// ── Compressor ───────────────────────────────────────────────────────────────

/// A byte-stream compressor over an owned sink.
///
/// Implements [`Write`]; `resync` and `finish` carry the member-boundary
/// semantics described in the module docs.
pub enum Compressor<W: Write> {
    Gzip(GzipCompressor<W>),
    Plain(PlainCompressor<W>),
    Zstd(ZstdCompressor<W>),
}

impl<W: Write> Compressor<W> {
    /// Close the current member/frame so a fresh decompressor can start
    /// at the next compressed byte.
    pub fn resync(&mut self) -> io::Result<()> {
        match self {
            Compressor::Gzip(c) => c.resync(),
            Compressor::Plain(c) => c.resync(),
            Compressor::Zstd(c) => c.resync(),
        }
    }

    /// Close the stream, emit any trailer, and return the sink.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Gzip(c) => c.finish(),
            Compressor::Plain(c) => c.finish(),
            Compressor::Zstd(c) => c.finish(),
        }
    }

    /// Access the sink (the writer stack reads byte counters through
    /// this).
    pub fn get_ref(&self) -> &W {
        match self {
            Compressor::Gzip(c) => c.get_ref(),
            Compressor::Plain(c) => c.get_ref(),
            Compressor::Zstd(c) => c.get_ref(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Gzip(c) => c.write(buf),
            Compressor::Plain(c) => c.write(buf),
            Compressor::Zstd(c) => c.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Gzip(c) => c.flush(),
            Compressor::Plain(c) => c.flush(),
            Compressor::Zstd(c) => c.flush(),
        }
    }
}

// ── Decompressor ─────────────────────────────────────────────────────────────

/// A byte-stream decompressor over an owned source.  Decodes
/// concatenated members/frames until the source runs dry or stops
/// looking like the codec.
pub enum Decompressor<R: Read> {
    Gzip(GzipDecompressor<R>),
    Plain(PlainDecompressor<R>),
    Zstd(ZstdDecompressor<R>),
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Gzip(d) => d.read(buf),
            Decompressor::Plain(d) => d.read(buf),
            Decompressor::Zstd(d) => d.read(buf),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ioutil::CountingWriter;
    use std::io::Cursor;

    const SAMPLE: &[u8] = b"Helloooo! This is your captain speaking. \
        We unfortunately have to report that this boat is about to take off. \
        The buoyant force from unauthorized helium balloons is now enough to \
        counteract the force of gravity.";

    fn all_codecs() -> [Codec; 3] {
        [Codec::Gzip, Codec::Plain, Codec::Zstd]
    }

    #[test]
    fn roundtrip_each_codec() {
        for codec in all_codecs() {
            let mut c = codec.compressor(Vec::new(), 6);
            c.write_all(SAMPLE).unwrap();
            let compressed = c.finish().unwrap();

            let mut d = codec.decompressor(Cursor::new(compressed)).unwrap();
            let mut out = Vec::new();
            d.read_to_end(&mut out).unwrap();
            assert_eq!(out, SAMPLE, "codec {}", codec.name());
        }
    }

    #[test]
    fn compressed_stream_starts_with_magic() {
        for codec in [Codec::Gzip, Codec::Zstd] {
            let mut c = codec.compressor(Vec::new(), 6);
            c.write_all(b"data").unwrap();
            let compressed = c.finish().unwrap();
            assert!(
                compressed.starts_with(codec.magic()),
                "codec {}",
                codec.name()
            );
        }
    }

    #[test]
    fn resync_allows_fresh_decompressor_mid_stream() {
        for codec in all_codecs() {
            let mut c = codec.compressor(CountingWriter::new(Vec::new()), 6);
            c.write_all(b"written before the checkpoint").unwrap();
            c.resync().unwrap();
            let mark = c.get_ref().count();
            c.write_all(b"written after the checkpoint").unwrap();
            let compressed = c.finish().unwrap().into_inner();

            // The whole stream still decodes in one pass.
            let mut whole = Vec::new();
            codec
                .decompressor(Cursor::new(compressed.clone()))
                .unwrap()
                .read_to_end(&mut whole)
                .unwrap();
            assert_eq!(
                whole, b"written before the checkpointwritten after the checkpoint",
                "codec {}",
                codec.name()
            );

            // A fresh decompressor at the resync point sees only the
            // bytes written after it.
            let mut suffix = Vec::new();
            codec
                .decompressor(Cursor::new(compressed[mark as usize..].to_vec()))
                .unwrap()
                .read_to_end(&mut suffix)
                .unwrap();
            assert_eq!(suffix, b"written after the checkpoint", "codec {}", codec.name());
        }
    }

    #[test]
    fn eof_markers_decode_to_scar_eof() {
        for codec in all_codecs() {
            let mut d = codec
                .decompressor(Cursor::new(codec.eof_marker().to_vec()))
                .unwrap();
            let mut out = Vec::new();
            d.read_to_end(&mut out).unwrap();
            assert_eq!(out, b"SCAR-EOF\n", "codec {}", codec.name());
        }
    }

    #[test]
    fn sniffing_by_suffix() {
        for codec in all_codecs() {
            let mut tail = b"leading noise".to_vec();
            tail.extend_from_slice(codec.eof_marker());
            assert_eq!(Codec::from_tail(&tail), Some(codec));
        }
        assert_eq!(Codec::from_tail(b"not an archive at all"), None);
    }

    #[test]
    fn codec_names_roundtrip() {
        for codec in all_codecs() {
            assert_eq!(Codec::from_name(codec.name()), Some(codec));
        }
        assert_eq!(Codec::from_name("bzip2"), None);
    }
}
