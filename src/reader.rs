//! Random-access archive reader.
//!
//! # Opening
//! [`ScarReader::new`] reads the last `min(512, len)` bytes of the file,
//! picks the codec whose EOF marker matches the suffix, then scans that
//! window backward for codec magic candidates.  Each candidate is
//! speculatively decompressed and accepted if its plaintext starts with
//! `SCAR-TAIL\n` followed by the index and checkpoint offsets.
//!
//! # Index iteration
//! [`ScarReader::iterate`] hands out an [`IndexIter`] with its own
//! decompressor and its own cursor on the shared stream, so iteration
//! and random-access reads interleave freely.  `g` rows update the
//! iterator's global attribute set and are not emitted.
//!
//! # Random access
//! [`ScarReader::read_meta`] looks up the nearest checkpoint at or
//! before the requested uncompressed offset (the checkpoint table loads
//! lazily on first use), starts a fresh decompressor at its compressed
//! offset, skips forward, and delegates to the PAX reader.  The
//! decompressor stays active for the following
//! [`ScarReader::read_content`].

use std::io::{self, Cursor, Read, Seek, Write};
use std::rc::Rc;

use crate::codec::{Codec, Decompressor};
use crate::error::{Result, ScarError};
use crate::ioutil::{BlockReader, SharedStream, StreamCursor, BLOCK_SIZE};
use crate::meta::{FileType, Meta};
use crate::pax::{self, syntax};

/// Largest accepted index row payload.  Longer rows are corruption.
const MAX_ROW_PAYLOAD: u64 = 16 * 1024 * 1024;

/// A codec resync boundary: the entry stream can be decoded from
/// `compressed` onward without prior context, and the first decoded byte
/// sits at `uncompressed` in the entry stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub compressed: u64,
    pub uncompressed: u64,
}

/// One row of the archive index.
///
/// `global` is the accumulated `g`-record attribute set in effect for
/// this entry; pass it back to [`ScarReader::read_meta`].
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub filetype: FileType,
    pub path: String,
    pub offset: u64,
    pub global: Rc<Meta>,
}

pub struct ScarReader<R: Read + Seek> {
    stream: SharedStream<R>,
    codec: Codec,
    index_offset: u64,
    checkpoints_offset: u64,
    checkpoints: Option<Vec<Checkpoint>>,
    entry: Option<Decompressor<StreamCursor<R>>>,
}

impl<R: Read + Seek> std::fmt::Debug for ScarReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScarReader")
            .field("codec", &self.codec)
            .field("index_offset", &self.index_offset)
            .field("checkpoints_offset", &self.checkpoints_offset)
            .field("checkpoints", &self.checkpoints)
            .finish_non_exhaustive()
    }
}

impl<R: Read + Seek> ScarReader<R> {
    /// Open an archive.  Fails with [`ScarError::UnsupportedCodec`] when
    /// no codec's EOF marker matches the file suffix, and with
    /// [`ScarError::Malformed`] when no tail section can be located.
    pub fn new(r: R) -> Result<Self> {
        let stream = SharedStream::new(r);
        let len = stream.len()?;

        let tail_len = (BLOCK_SIZE as u64).min(len);
        let mut tail = vec![0u8; tail_len as usize];
        stream.read_exact_at(len - tail_len, &mut tail)?;

        let codec = Codec::from_tail(&tail).ok_or(ScarError::UnsupportedCodec)?;
        let (index_offset, checkpoints_offset) = find_tail(codec, &tail, len)
            .ok_or_else(|| ScarError::malformed("no tail section found"))?;

        Ok(Self {
            stream,
            codec,
            index_offset,
            checkpoints_offset,
            checkpoints: None,
            entry: None,
        })
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Start iterating the index.  The iterator is independent of this
    /// reader; `read_meta`/`read_content` calls may be interleaved with
    /// `next_entry`.
    pub fn iterate(&self) -> Result<IndexIter<R>> {
        let cursor = self.stream.cursor(self.index_offset);
        let decomp = self.codec.decompressor(cursor)?;
        let mut br = BlockReader::new(decomp)?;

        let mut head = [0u8; 11];
        br.read_exact(&mut head)
            .map_err(|_| ScarError::malformed("truncated index section"))?;
        if &head != b"SCAR-INDEX\n" {
            return Err(ScarError::malformed("index section header missing"));
        }

        Ok(IndexIter { br, global: Rc::new(Meta::empty()) })
    }

    /// The checkpoint table, loading it from the archive on first use.
    /// The implicit `(0, 0)` head is included.
    pub fn checkpoints(&mut self) -> Result<&[Checkpoint]> {
        self.load_checkpoints()
    }

    fn load_checkpoints(&mut self) -> Result<&[Checkpoint]> {
        if self.checkpoints.is_none() {
            let cursor = self.stream.cursor(self.checkpoints_offset);
            let decomp = self.codec.decompressor(cursor)?;
            let mut br = BlockReader::new(decomp)?;

            let mut head = [0u8; 17];
            br.read_exact(&mut head)
                .map_err(|_| ScarError::malformed("truncated checkpoints section"))?;
            if &head != b"SCAR-CHECKPOINTS\n" {
                return Err(ScarError::malformed("checkpoints section header missing"));
            }

            // (0, 0) is the implicit head of the table.
            let mut table = vec![Checkpoint { compressed: 0, uncompressed: 0 }];
            while matches!(br.peek(), Some(b) if b.is_ascii_digit()) {
                let compressed = read_decimal(&mut br, b' ')?;
                let uncompressed = read_decimal(&mut br, b'\n')?;
                let ck = Checkpoint { compressed, uncompressed };

                let prev = *table.last().unwrap();
                if ck.compressed < prev.compressed || ck.uncompressed < prev.uncompressed {
                    return Err(ScarError::malformed("checkpoint table is not monotonic"));
                }
                table.push(ck);
            }

            self.checkpoints = Some(table);
        }
        Ok(self.checkpoints.as_deref().unwrap())
    }

    /// Read the full metadata of the entry at `offset` (an uncompressed
    /// entry-stream offset from the index).  `global` is the attribute
    /// set in effect at that entry; a private copy is handed to the PAX
    /// reader, which mutates its global argument.
    pub fn read_meta(&mut self, offset: u64, global: &Meta) -> Result<Meta> {
        self.load_checkpoints()?;
        let table = self.checkpoints.as_deref().unwrap();

        // Greatest checkpoint at or before the requested offset.
        let at = table.partition_point(|ck| ck.uncompressed <= offset);
        let ck = table[at - 1];

        // Any previous entry decompressor dies here.
        self.entry = None;

        let cursor = self.stream.cursor(ck.compressed);
        let mut decomp = self.codec.decompressor(cursor)?;

        let skip = offset - ck.uncompressed;
        let skipped = io::copy(&mut (&mut decomp).take(skip), &mut io::sink())?;
        if skipped < skip {
            return Err(ScarError::InvalidArgument(
                "offset is beyond the end of the entry stream".into(),
            ));
        }

        let mut global = global.clone();
        let meta = pax::read_meta(&mut global, &mut decomp)?.ok_or_else(|| {
            ScarError::InvalidArgument("offset points at the end-of-archive indicator".into())
        })?;

        self.entry = Some(decomp);
        Ok(meta)
    }

    /// Stream the content of the entry most recently resolved by
    /// [`read_meta`](Self::read_meta) into `w`.
    pub fn read_content<W: Write>(&mut self, w: &mut W, size: u64) -> Result<()> {
        let decomp = self.entry.as_mut().ok_or_else(|| {
            ScarError::InvalidArgument("read_meta must be called before read_content".into())
        })?;
        pax::read_content(decomp, w, size)
    }
}

// ── Index iteration ──────────────────────────────────────────────────────────

pub struct IndexIter<R: Read + Seek> {
    br: BlockReader<Decompressor<StreamCursor<R>>>,
    global: Rc<Meta>,
}

impl<R: Read + Seek> IndexIter<R> {
    /// The global attribute set accumulated so far.
    pub fn global(&self) -> &Meta {
        &self.global
    }

    /// The next index entry, or `None` after the last row.
    pub fn next_entry(&mut self) -> Result<Option<IndexEntry>> {
        loop {
            // Rows start with a digit; anything else is the end of the
            // index stream (the decompressor runs straight into the
            // checkpoints section).
            match self.br.peek() {
                Some(b) if b.is_ascii_digit() => {}
                _ => return Ok(None),
            }

            let mut len: u64 = 0;
            let mut len_digits: u64 = 0;
            loop {
                match self.br.peek() {
                    Some(b' ') => break,
                    Some(b @ b'0'..=b'9') => {
                        len = len * 10 + (b - b'0') as u64;
                        len_digits += 1;
                        self.br.consume()?;
                    }
                    _ => return Err(ScarError::malformed("bad index row length")),
                }
            }
            self.br.consume()?; // ' '

            let mut remaining = len
                .checked_sub(len_digits + 1)
                .ok_or_else(|| ScarError::malformed("index row shorter than its prefix"))?;

            let typeflag = self
                .br
                .peek()
                .ok_or_else(|| ScarError::malformed("truncated index row"))?;
            self.br.consume()?;

            if self.br.peek() != Some(b' ') {
                return Err(ScarError::malformed("index row missing separator"));
            }
            self.br.consume()?;

            remaining = remaining
                .checked_sub(2)
                .ok_or_else(|| ScarError::malformed("index row shorter than its prefix"))?;

            let mut offset: u64 = 0;
            let mut offset_digits = 0;
            loop {
                match self.br.peek() {
                    Some(b' ') => break,
                    Some(b @ b'0'..=b'9') => {
                        offset = offset * 10 + (b - b'0') as u64;
                        offset_digits += 1;
                        self.br.consume()?;
                        remaining = remaining
                            .checked_sub(1)
                            .ok_or_else(|| ScarError::malformed("index row offset overruns row"))?;
                    }
                    _ => return Err(ScarError::malformed("bad index row offset")),
                }
            }
            if offset_digits == 0 {
                return Err(ScarError::malformed("index row missing offset"));
            }
            self.br.consume()?; // ' '
            remaining = remaining
                .checked_sub(1)
                .ok_or_else(|| ScarError::malformed("index row shorter than its prefix"))?;

            if remaining <= 1 {
                return Err(ScarError::malformed("index row has no payload"));
            }
            if remaining > MAX_ROW_PAYLOAD {
                return Err(ScarError::malformed("index row is implausibly large"));
            }

            // Global rows route their payload into the shared attribute
            // set and do not name a file.
            if typeflag == b'g' {
                syntax::parse_records(Rc::make_mut(&mut self.global), &mut self.br, remaining)?;
                continue;
            }

            let mut path = vec![0u8; (remaining - 1) as usize];
            self.br
                .read_exact(&mut path)
                .map_err(|_| ScarError::malformed("truncated index row path"))?;

            if self.br.peek() != Some(b'\n') {
                return Err(ScarError::malformed("index row missing newline"));
            }
            self.br.consume()?;

            return Ok(Some(IndexEntry {
                filetype: FileType::from_char(typeflag),
                path: String::from_utf8_lossy(&path).into_owned(),
                offset,
                global: Rc::clone(&self.global),
            }));
        }
    }
}

// ── Tail discovery ───────────────────────────────────────────────────────────

/// Scan the trailing window backward for codec-magic candidates and
/// return the `(index_offset, checkpoints_offset)` of the first
/// candidate that decodes to a well-formed tail section.
fn find_tail(codec: Codec, tail: &[u8], file_len: u64) -> Option<(u64, u64)> {
    let magic = codec.magic();
    let region_len = tail.len().checked_sub(codec.eof_marker().len())?;
    let region = &tail[..region_len];

    let mut pos = region_len.checked_sub(magic.len())?;
    loop {
        if region[pos..].starts_with(magic) {
            if let Some(plain) = decode_prefix(codec, &region[pos..]) {
                if let Some((index_offset, checkpoints_offset)) = parse_tail_text(&plain) {
                    if index_offset < file_len && checkpoints_offset < file_len {
                        return Some((index_offset, checkpoints_offset));
                    }
                }
            }
        }
        if pos == 0 {
            return None;
        }
        pos -= 1;
    }
}

/// Speculatively decompress up to one block of plaintext.  Candidates
/// that are not a stream start simply fail to decode; that rejects them,
/// it is not an archive error.
fn decode_prefix(codec: Codec, candidate: &[u8]) -> Option<Vec<u8>> {
    let mut decomp = codec.decompressor(Cursor::new(candidate)).ok()?;
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut filled = 0;
    loop {
        match decomp.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                if filled == buf.len() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    if filled == 0 {
        return None;
    }
    buf.truncate(filled);
    Some(buf)
}

fn parse_tail_text(plain: &[u8]) -> Option<(u64, u64)> {
    let rest = plain.strip_prefix(b"SCAR-TAIL\n")?;
    let (index_offset, rest) = parse_decimal_line(rest)?;
    let (checkpoints_offset, _) = parse_decimal_line(rest)?;
    Some((index_offset, checkpoints_offset))
}

fn parse_decimal_line(buf: &[u8]) -> Option<(u64, &[u8])> {
    let end = buf.iter().position(|&b| b == b'\n')?;
    if end == 0 || !buf[..end].iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut num = 0u64;
    for &b in &buf[..end] {
        num = num.checked_mul(10)?.checked_add((b - b'0') as u64)?;
    }
    Some((num, &buf[end + 1..]))
}

/// Parse an unsigned decimal from a block reader, consuming the single
/// terminator byte.
fn read_decimal<R: Read>(br: &mut BlockReader<R>, terminator: u8) -> Result<u64> {
    let mut num: u64 = 0;
    let mut digits = 0;
    loop {
        match br.peek() {
            Some(b) if b == terminator => break,
            Some(b @ b'0'..=b'9') => {
                num = num
                    .checked_mul(10)
                    .and_then(|n| n.checked_add((b - b'0') as u64))
                    .ok_or_else(|| ScarError::malformed("checkpoint value overflows"))?;
                digits += 1;
                br.consume()?;
            }
            _ => return Err(ScarError::malformed("bad checkpoint row")),
        }
    }
    if digits == 0 {
        return Err(ScarError::malformed("empty checkpoint value"));
    }
    br.consume()?;
    Ok(num)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ScarWriter;

    fn build_archive(codec: Codec) -> Vec<u8> {
        let mut sw = ScarWriter::new(Vec::new(), codec, 6).unwrap();
        sw.write_entry(&Meta::directory("dir/"), &mut Cursor::new(Vec::new()))
            .unwrap();
        sw.write_entry(
            &Meta::file("dir/hello.txt", 11),
            &mut Cursor::new(b"hello world".to_vec()),
        )
        .unwrap();
        sw.write_entry(
            &Meta::file("dir/other.txt", 5),
            &mut Cursor::new(b"other".to_vec()),
        )
        .unwrap();
        sw.finish().unwrap()
    }

    #[test]
    fn open_and_walk_index() {
        for codec in [Codec::Gzip, Codec::Plain, Codec::Zstd] {
            let archive = build_archive(codec);
            let sr = ScarReader::new(Cursor::new(archive)).unwrap();
            assert_eq!(sr.codec(), codec);

            let mut it = sr.iterate().unwrap();
            let paths: Vec<String> = std::iter::from_fn(|| it.next_entry().unwrap())
                .map(|e| e.path)
                .collect();
            assert_eq!(paths, ["dir/", "dir/hello.txt", "dir/other.txt"]);
        }
    }

    #[test]
    fn random_access_entry() {
        for codec in [Codec::Gzip, Codec::Plain, Codec::Zstd] {
            let archive = build_archive(codec);
            let mut sr = ScarReader::new(Cursor::new(archive)).unwrap();

            let mut it = sr.iterate().unwrap();
            let entry = std::iter::from_fn(|| it.next_entry().unwrap())
                .find(|e| e.path == "dir/hello.txt")
                .unwrap();

            let meta = sr.read_meta(entry.offset, &entry.global).unwrap();
            assert_eq!(meta.filetype, FileType::File);
            assert_eq!(meta.size, Some(11));

            let mut body = Vec::new();
            sr.read_content(&mut body, 11).unwrap();
            assert_eq!(body, b"hello world");
        }
    }

    #[test]
    fn iteration_and_random_access_interleave() {
        let archive = build_archive(Codec::Gzip);
        let mut sr = ScarReader::new(Cursor::new(archive)).unwrap();

        let mut it = sr.iterate().unwrap();
        let mut seen = 0;
        while let Some(entry) = it.next_entry().unwrap() {
            if entry.filetype != FileType::File {
                continue;
            }
            let meta = sr.read_meta(entry.offset, &entry.global).unwrap();
            let mut body = Vec::new();
            sr.read_content(&mut body, meta.size.unwrap()).unwrap();
            assert!(!body.is_empty());
            seen += 1;
        }
        assert_eq!(seen, 2);
    }

    #[test]
    fn read_content_before_read_meta_is_rejected() {
        let archive = build_archive(Codec::Plain);
        let mut sr = ScarReader::new(Cursor::new(archive)).unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            sr.read_content(&mut out, 1),
            Err(ScarError::InvalidArgument(_))
        ));
    }

    #[test]
    fn not_an_archive_is_rejected() {
        let err = ScarReader::new(Cursor::new(b"definitely not a scar archive".to_vec()))
            .unwrap_err();
        assert!(matches!(err, ScarError::UnsupportedCodec));
    }

    #[test]
    fn truncated_trailer_is_rejected() {
        // Keep the EOF marker but destroy everything before it: codec
        // sniffing succeeds, tail discovery must fail.
        let marker = Codec::Gzip.eof_marker();
        let mut bogus = vec![0xaau8; 300];
        bogus.extend_from_slice(marker);
        let err = ScarReader::new(Cursor::new(bogus)).unwrap_err();
        assert!(matches!(err, ScarError::Malformed(_)));
    }

    #[test]
    fn offset_past_end_is_invalid_argument() {
        let archive = build_archive(Codec::Gzip);
        let mut sr = ScarReader::new(Cursor::new(archive)).unwrap();
        let err = sr.read_meta(1 << 40, &Meta::empty()).unwrap_err();
        assert!(matches!(err, ScarError::InvalidArgument(_)));
    }

    #[test]
    fn global_rows_reach_index_entries() {
        let mut sw = ScarWriter::new(Vec::new(), Codec::Plain, 0).unwrap();
        let mut g = Meta::empty();
        g.uname = Some("ci".into());
        sw.write_global(&g).unwrap();
        sw.write_entry(&Meta::file("a", 1), &mut Cursor::new(b"x".to_vec()))
            .unwrap();
        sw.write_entry(&Meta::file("b", 1), &mut Cursor::new(b"y".to_vec()))
            .unwrap();
        let archive = sw.finish().unwrap();

        let mut sr = ScarReader::new(Cursor::new(archive)).unwrap();
        let mut it = sr.iterate().unwrap();
        while let Some(entry) = it.next_entry().unwrap() {
            assert_eq!(entry.global.uname.as_deref(), Some("ci"));
            let meta = sr.read_meta(entry.offset, &entry.global).unwrap();
            assert_eq!(meta.uname.as_deref(), Some("ci"));
        }
    }

    #[test]
    fn checkpoint_table_loads_and_is_monotonic() {
        let mut sw = ScarWriter::with_options(Vec::new(), Codec::Gzip, 6, 1024).unwrap();
        let body = vec![0x5au8; 4096];
        for i in 0..16 {
            sw.write_entry(
                &Meta::file(format!("f{i}"), body.len() as u64),
                &mut Cursor::new(body.clone()),
            )
            .unwrap();
        }
        let archive = sw.finish().unwrap();

        let mut sr = ScarReader::new(Cursor::new(archive)).unwrap();
        let table = sr.load_checkpoints().unwrap().to_vec();
        // 16 entries of ~4.5 KiB against a 1 KiB interval: a checkpoint
        // lands in front of nearly every entry.
        assert!(table.len() > 10, "only {} checkpoints", table.len());
        for pair in table.windows(2) {
            assert!(pair[1].compressed >= pair[0].compressed);
            assert!(pair[1].uncompressed >= pair[0].uncompressed);
        }
    }
}
