//! Streaming archive writer.
//!
//! [`ScarWriter`] drives one entry compressor and two staging
//! compressors (index, checkpoints).  Entries pass through the PAX
//! writer into the entry compressor; every time the uncompressed stream
//! grows past the checkpoint interval the compressor is resynced and a
//! `(compressed, uncompressed)` pair is recorded.  `finish` appends the
//! staged index and checkpoint sections, a compressed
//! `SCAR-TAIL\n<index_off>\n<checkpoints_off>\n` section, and the
//! codec's EOF marker.
//!
//! After a successful `finish` the file suffix equals the codec's EOF
//! marker.  Dropping a writer without finishing it leaves an archive no
//! reader will accept.

use std::io::{Read, Write};

use crate::codec::{Codec, Compressor};
use crate::error::{Result, ScarError};
use crate::ioutil::CountingWriter;
use crate::meta::{FileType, Meta};
use crate::pax::{self, syntax};

/// Default distance between checkpoints, in uncompressed bytes.
///
/// Not part of the on-disk format: any positive interval yields a valid
/// archive, and readers discover the actual checkpoint positions from
/// the checkpoints section.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 10 * 1024 * 1024;

pub struct ScarWriter<W: Write> {
    codec: Codec,
    level: u32,
    checkpoint_interval: u64,
    last_checkpoint_uncompressed: u64,

    /// Uncompressed counter → entry compressor → compressed counter → sink.
    entry: CountingWriter<Compressor<CountingWriter<W>>>,
    index: Compressor<Vec<u8>>,
    checkpoints: Compressor<Vec<u8>>,
}

impl<W: Write> ScarWriter<W> {
    pub fn new(w: W, codec: Codec, level: u32) -> Result<Self> {
        Self::with_options(w, codec, level, DEFAULT_CHECKPOINT_INTERVAL)
    }

    /// Create a writer with an explicit checkpoint interval.  Small
    /// intervals give finer random access at the cost of compression
    /// ratio (every checkpoint is a member boundary).
    pub fn with_options(
        w: W,
        codec: Codec,
        level: u32,
        checkpoint_interval: u64,
    ) -> Result<Self> {
        let entry = CountingWriter::new(codec.compressor(CountingWriter::new(w), level));

        let mut index = codec.compressor(Vec::new(), level);
        index.write_all(b"SCAR-INDEX\n")?;

        let mut checkpoints = codec.compressor(Vec::new(), level);
        checkpoints.write_all(b"SCAR-CHECKPOINTS\n")?;

        Ok(Self {
            codec,
            level,
            checkpoint_interval: checkpoint_interval.max(1),
            last_checkpoint_uncompressed: 0,
            entry,
            index,
            checkpoints,
        })
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Current position in the uncompressed entry stream.
    pub fn uncompressed_offset(&self) -> u64 {
        self.entry.count()
    }

    fn compressed_offset(&self) -> u64 {
        self.entry.get_ref().get_ref().count()
    }

    /// Resync the entry compressor and record a checkpoint row.
    fn create_checkpoint(&mut self) -> Result<()> {
        self.entry.get_mut().resync()?;

        let compressed = self.compressed_offset();
        let uncompressed = self.uncompressed_offset();
        self.last_checkpoint_uncompressed = uncompressed;

        writeln!(self.checkpoints, "{compressed} {uncompressed}")?;
        Ok(())
    }

    fn checkpoint_if_due(&mut self) -> Result<()> {
        if self.uncompressed_offset()
            > self.last_checkpoint_uncompressed + self.checkpoint_interval
        {
            self.create_checkpoint()?;
        }
        Ok(())
    }

    /// Append one self-delimited row to the index stream.
    fn write_index_row(&mut self, body: &[u8]) -> Result<()> {
        let len = syntax::self_delimiting_len(1 + body.len() as u64);
        write!(self.index, "{len} ")?;
        self.index.write_all(body)?;
        Ok(())
    }

    /// Write one archive entry: metadata, then `meta.size` bytes of
    /// content from `body`.
    pub fn write_entry<R: Read>(&mut self, meta: &Meta, body: &mut R) -> Result<()> {
        let path = meta
            .path
            .as_deref()
            .ok_or_else(|| ScarError::InvalidArgument("entry has no path".into()))?;
        if meta.filetype == FileType::Unknown {
            return Err(ScarError::Unsupported("entry has no file type".into()));
        }

        self.checkpoint_if_due()?;

        let row = format!(
            "{} {} {}\n",
            meta.filetype.as_char() as char,
            self.uncompressed_offset(),
            path,
        );
        self.write_index_row(row.as_bytes())?;

        pax::write_entry(&mut self.entry, meta, body)
    }

    /// Write a global (`g`) attribute entry.  Its fields apply to every
    /// following entry, both when scanning sequentially and when walking
    /// the index.
    pub fn write_global(&mut self, meta: &Meta) -> Result<()> {
        let payload = syntax::encode_all(meta);
        if payload.is_empty() {
            return Err(ScarError::InvalidArgument("global entry has no attributes".into()));
        }

        self.checkpoint_if_due()?;

        let mut row = format!("g {} ", self.uncompressed_offset()).into_bytes();
        row.extend_from_slice(&payload);
        self.write_index_row(&row)?;

        pax::write_global(&mut self.entry, meta)
    }

    /// Terminate the entry stream, append the trailer sections and the
    /// EOF marker, and return the sink.
    pub fn finish(mut self) -> Result<W> {
        pax::write_end(&mut self.entry)?;

        let sink = self.entry.into_inner().finish()?;
        let index_buf = self.index.finish()?;
        let checkpoints_buf = self.checkpoints.finish()?;

        let index_offset = sink.count();
        let checkpoints_offset = index_offset + index_buf.len() as u64;

        let mut w = sink.into_inner();
        w.write_all(&index_buf)?;
        w.write_all(&checkpoints_buf)?;

        let mut tail = self.codec.compressor(&mut w, self.level);
        write!(tail, "SCAR-TAIL\n{index_offset}\n{checkpoints_offset}\n")?;
        tail.finish()?;

        w.write_all(self.codec.eof_marker())?;
        w.flush()?;
        Ok(w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn finished_archive_ends_with_eof_marker() {
        for codec in [Codec::Gzip, Codec::Plain, Codec::Zstd] {
            let mut sw = ScarWriter::new(Vec::new(), codec, 6).unwrap();
            sw.write_entry(&Meta::file("a.txt", 5), &mut Cursor::new(b"hello".to_vec()))
                .unwrap();
            let archive = sw.finish().unwrap();
            assert!(
                archive.ends_with(codec.eof_marker()),
                "codec {}",
                codec.name()
            );
        }
    }

    #[test]
    fn entry_without_path_is_rejected() {
        let mut sw = ScarWriter::new(Vec::new(), Codec::Plain, 0).unwrap();
        let mut meta = Meta::empty();
        meta.filetype = FileType::File;
        let err = sw.write_entry(&meta, &mut Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, ScarError::InvalidArgument(_)));
    }

    #[test]
    fn entry_without_type_is_rejected() {
        let mut sw = ScarWriter::new(Vec::new(), Codec::Plain, 0).unwrap();
        let mut meta = Meta::empty();
        meta.path = Some("x".into());
        let err = sw.write_entry(&meta, &mut Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, ScarError::Unsupported(_)));
    }

    #[test]
    fn plain_archive_layout_is_readable_text() {
        // With the plain codec the whole trailer is plaintext; spot-check
        // the section headers land in the file in order.
        let mut sw = ScarWriter::new(Vec::new(), Codec::Plain, 0).unwrap();
        sw.write_entry(&Meta::file("a.txt", 5), &mut Cursor::new(b"hello".to_vec()))
            .unwrap();
        let archive = sw.finish().unwrap();

        let index_pos = find(&archive, b"SCAR-INDEX\n").unwrap();
        let ckpt_pos = find(&archive, b"SCAR-CHECKPOINTS\n").unwrap();
        let tail_pos = find(&archive, b"SCAR-TAIL\n").unwrap();
        assert!(index_pos < ckpt_pos && ckpt_pos < tail_pos);

        // The tail names the index and checkpoint offsets.
        let tail = &archive[tail_pos..];
        let text = String::from_utf8_lossy(tail);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("SCAR-TAIL"));
        assert_eq!(lines.next().unwrap().parse::<usize>().unwrap(), index_pos);
        assert_eq!(lines.next().unwrap().parse::<usize>().unwrap(), ckpt_pos);
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }
}
