//! PAX entry reader and writer.
//!
//! Composes the USTAR block codec with the extended-header syntax into
//! typed entries:
//!
//! - The reader accepts standard PAX (`x`/`g` extended headers) plus the
//!   GNU `L`/`K` long-name extensions.
//! - The writer never emits `L`/`K` or the USTAR prefix field; anything
//!   that does not fit the fixed USTAR fields goes into one `x` record
//!   per entry.
//!
//! All entry data is 512-byte block aligned; content is padded with
//! zeros and the padding is discarded on read.

pub mod syntax;

use std::io::{Read, Write};

use crate::error::{Result, ScarError};
use crate::ioutil::BLOCK_SIZE;
use crate::meta::{FileType, Meta};
use crate::ustar;

/// Largest accepted `L`/`K`/`x`/`g` payload.  A metadata payload beyond
/// this is corruption, not data.
const MAX_EXT_PAYLOAD: u64 = 16 * 1024 * 1024;

// ── Reading ──────────────────────────────────────────────────────────────────

fn read_block<R: Read>(r: &mut R, block: &mut ustar::Block) -> Result<()> {
    r.read_exact(block).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            ScarError::malformed("entry stream ended in the middle of a header block")
        }
        _ => ScarError::Io(e),
    })
}

/// Read `size` bytes rounded up to the block boundary, returning exactly
/// the first `size` of them.
fn read_aligned<R: Read>(r: &mut R, size: u64) -> Result<Vec<u8>> {
    if size > MAX_EXT_PAYLOAD {
        return Err(ScarError::malformed("oversized metadata payload"));
    }

    let padded = size.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64;
    let mut buf = vec![0u8; padded as usize];
    r.read_exact(&mut buf)
        .map_err(|_| ScarError::malformed("truncated metadata payload"))?;
    buf.truncate(size as usize);
    Ok(buf)
}

/// GNU `L`/`K` payloads count their NUL terminator in `size`.
fn gnu_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Parse a PAX payload of `size` bytes, then discard the block padding.
fn read_pax_aligned<R: Read>(meta: &mut Meta, r: &mut R, size: u64) -> Result<()> {
    if size > MAX_EXT_PAYLOAD {
        return Err(ScarError::malformed("oversized extended header"));
    }

    syntax::parse(meta, &mut *r, size)?;

    let leftover = (BLOCK_SIZE as u64 - size % BLOCK_SIZE as u64) % BLOCK_SIZE as u64;
    if leftover > 0 {
        let mut pad = [0u8; BLOCK_SIZE];
        r.read_exact(&mut pad[..leftover as usize])
            .map_err(|_| ScarError::malformed("truncated extended header padding"))?;
    }
    Ok(())
}

/// Read one logical archive entry's metadata.
///
/// `global` is the accumulated `g`-record attribute set; it is mutated
/// when a new global record is encountered.  Returns `Ok(None)` at the
/// end-of-archive indicator (two zero blocks).
///
/// Leaves the stream positioned at the start of the entry's content.
pub fn read_meta<R: Read>(global: &mut Meta, r: &mut R) -> Result<Option<Meta>> {
    let mut block: ustar::Block = [0; BLOCK_SIZE];
    let mut meta = global.clone();

    // Read past any metadata-style entries.  Once this loop breaks we
    // hold the header block of the actual file entry.
    let typeflag = loop {
        read_block(r, &mut block)?;

        if ustar::is_zero_block(&block) {
            read_block(r, &mut block)?;
            if ustar::is_zero_block(&block) {
                return Ok(None);
            }
            return Err(ScarError::malformed(
                "lone zero block where the end-of-archive indicator was expected",
            ));
        }

        if !ustar::verify_checksum(&block) {
            return Err(ScarError::malformed("header block checksum mismatch"));
        }

        let size = ustar::read_size(&block, ustar::SIZE);
        let typeflag = block[ustar::TYPEFLAG.start];
        match typeflag {
            // GNU extension: long path.
            b'L' => {
                let buf = read_aligned(r, size)?;
                meta.path = Some(gnu_string(&buf));
            }
            // GNU extension: long linkpath.
            b'K' => {
                let buf = read_aligned(r, size)?;
                meta.linkpath = Some(gnu_string(&buf));
            }
            // PAX extended header for the next entry.
            b'x' => read_pax_aligned(&mut meta, r, size)?,
            // PAX global header: overlay the global set, restart meta.
            b'g' => {
                read_pax_aligned(global, r, size)?;
                meta = global.clone();
            }
            _ => break typeflag,
        }
    };

    // Unassigned typeflags map to Unknown and are accepted.
    meta.filetype = FileType::from_char(typeflag);

    // Fill every still-absent field from the fixed header.
    if meta.mode.is_none() {
        meta.mode = Some(ustar::read_octal_u32(&block, ustar::MODE));
    }
    if meta.devmajor.is_none() {
        meta.devmajor = Some(ustar::read_octal_u32(&block, ustar::DEVMAJOR));
    }
    if meta.devminor.is_none() {
        meta.devminor = Some(ustar::read_octal_u32(&block, ustar::DEVMINOR));
    }
    if meta.gid.is_none() {
        meta.gid = Some(ustar::read_octal(&block, ustar::GID));
    }
    if meta.uid.is_none() {
        meta.uid = Some(ustar::read_octal(&block, ustar::UID));
    }
    if meta.mtime.is_none() {
        meta.mtime = Some(ustar::read_octal(&block, ustar::MTIME) as f64);
    }
    if meta.size.is_none() {
        meta.size = Some(ustar::read_size(&block, ustar::SIZE));
    }
    if meta.gname.is_none() {
        meta.gname = ustar::read_string(&block, ustar::GNAME);
    }
    if meta.uname.is_none() {
        meta.uname = ustar::read_string(&block, ustar::UNAME);
    }
    if meta.linkpath.is_none() {
        meta.linkpath = ustar::read_string(&block, ustar::LINKNAME);
    }
    if meta.path.is_none() {
        meta.path = ustar::read_path(&block, ustar::NAME);
    }

    Ok(Some(meta))
}

/// Copy an entry's `size` content bytes from `r` to `w`, then discard
/// the padding that rounds the content up to the block boundary.
pub fn read_content<R: Read, W: Write>(r: &mut R, w: &mut W, size: u64) -> Result<()> {
    let mut remaining = size;
    let mut buf = [0u8; 8 * BLOCK_SIZE];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = r.read(&mut buf[..want])?;
        if n == 0 {
            return Err(ScarError::malformed("entry content ends before its declared size"));
        }
        w.write_all(&buf[..n])?;
        remaining -= n as u64;
    }

    let leftover = (BLOCK_SIZE as u64 - size % BLOCK_SIZE as u64) % BLOCK_SIZE as u64;
    if leftover > 0 {
        let mut pad = [0u8; BLOCK_SIZE];
        r.read_exact(&mut pad[..leftover as usize])
            .map_err(|_| ScarError::malformed("entry padding ends before the block boundary"))?;
    }
    Ok(())
}

// ── Writing ──────────────────────────────────────────────────────────────────

const MAX_OCTAL_7: u64 = 0o7777777; // 8-byte octal field
const MAX_OCTAL_11: u64 = 0o77777777777; // 12-byte octal field
const MAX_OCTAL_12: u64 = 0o777777777777; // 12-byte octal mtime field

/// Collect the attributes that cannot be represented in the fixed USTAR
/// fields, encoded as PAX records.
fn overflow_records(meta: &Meta) -> Vec<u8> {
    let mut pax = Vec::new();

    if let Some(atime) = meta.atime {
        syntax::write_time(&mut pax, "atime", atime);
    }
    if let Some(ref charset) = meta.charset {
        syntax::write_string(&mut pax, "charset", charset);
    }
    if let Some(ref comment) = meta.comment {
        syntax::write_string(&mut pax, "comment", comment);
    }
    if let Some(gid) = meta.gid {
        if gid > MAX_OCTAL_7 {
            syntax::write_uint(&mut pax, "gid", gid);
        }
    }
    if let Some(ref gname) = meta.gname {
        if gname.len() > 32 {
            syntax::write_string(&mut pax, "gname", gname);
        }
    }
    if let Some(ref hdrcharset) = meta.hdrcharset {
        syntax::write_string(&mut pax, "hdrcharset", hdrcharset);
    }
    if let Some(ref linkpath) = meta.linkpath {
        if linkpath.len() > 100 {
            syntax::write_string(&mut pax, "linkpath", linkpath);
        }
    }
    if let Some(mtime) = meta.mtime {
        if mtime < 0.0 || mtime > MAX_OCTAL_12 as f64 || mtime != mtime.floor() {
            syntax::write_time(&mut pax, "mtime", mtime);
        }
    }
    if let Some(ref path) = meta.path {
        if path.len() > 100 {
            syntax::write_string(&mut pax, "path", path);
        }
    }
    if let Some(size) = meta.size {
        if size > MAX_OCTAL_11 {
            syntax::write_uint(&mut pax, "size", size);
        }
    }
    if let Some(uid) = meta.uid {
        if uid > MAX_OCTAL_7 {
            syntax::write_uint(&mut pax, "uid", uid);
        }
    }
    if let Some(ref uname) = meta.uname {
        if uname.len() > 32 {
            syntax::write_string(&mut pax, "uname", uname);
        }
    }

    pax
}

/// Write a metadata-carrying header block (`x` or `g`) followed by its
/// padded payload.
fn write_ext_entry<W: Write>(w: &mut W, typeflag: u8, payload: &[u8]) -> Result<()> {
    let mut block: ustar::Block = [0; BLOCK_SIZE];
    block[ustar::TYPEFLAG.start] = typeflag;
    ustar::write_octal(&mut block, ustar::SIZE, payload.len() as u64);
    ustar::finalize_header(&mut block);
    w.write_all(&block)?;
    w.write_all(payload)?;

    let padding = (BLOCK_SIZE - payload.len() % BLOCK_SIZE) % BLOCK_SIZE;
    if padding > 0 {
        w.write_all(&[0u8; BLOCK_SIZE][..padding])?;
    }
    Ok(())
}

/// Write the header for one entry: an optional `x` extended-header
/// entry followed by exactly one USTAR header block.
pub fn write_meta<W: Write>(w: &mut W, meta: &Meta) -> Result<()> {
    if meta.path.is_none() {
        return Err(ScarError::InvalidArgument("entry has no path".into()));
    }
    if meta.filetype == FileType::Unknown {
        return Err(ScarError::Unsupported("entry has no file type".into()));
    }

    let pax = overflow_records(meta);
    if !pax.is_empty() {
        write_ext_entry(w, b'x', &pax)?;
    }

    let mut block: ustar::Block = [0; BLOCK_SIZE];
    if let Some(ref path) = meta.path {
        ustar::write_string(&mut block, ustar::NAME, path);
    }
    ustar::write_octal(&mut block, ustar::MODE, meta.mode.unwrap_or(0) as u64);
    ustar::write_octal(&mut block, ustar::UID, meta.uid.unwrap_or(0));
    ustar::write_octal(&mut block, ustar::GID, meta.gid.unwrap_or(0));
    ustar::write_octal(&mut block, ustar::SIZE, meta.size.unwrap_or(0));
    let mtime = meta.mtime.unwrap_or(0.0);
    ustar::write_octal(
        &mut block,
        ustar::MTIME,
        if mtime > 0.0 { mtime.floor() as u64 } else { 0 },
    );
    block[ustar::TYPEFLAG.start] = meta.filetype.as_char();
    if let Some(ref linkpath) = meta.linkpath {
        ustar::write_string(&mut block, ustar::LINKNAME, linkpath);
    }
    if let Some(ref uname) = meta.uname {
        ustar::write_string(&mut block, ustar::UNAME, uname);
    }
    if let Some(ref gname) = meta.gname {
        ustar::write_string(&mut block, ustar::GNAME, gname);
    }
    ustar::write_octal(&mut block, ustar::DEVMAJOR, meta.devmajor.unwrap_or(0) as u64);
    ustar::write_octal(&mut block, ustar::DEVMINOR, meta.devminor.unwrap_or(0) as u64);
    ustar::finalize_header(&mut block);

    w.write_all(&block)?;
    Ok(())
}

/// Write a global (`g`) attribute entry carrying every present field of
/// `meta`.  Subsequent entries inherit these attributes unless they set
/// their own.
pub fn write_global<W: Write>(w: &mut W, meta: &Meta) -> Result<()> {
    let payload = syntax::encode_all(meta);
    if payload.is_empty() {
        return Err(ScarError::InvalidArgument("global entry has no attributes".into()));
    }
    write_ext_entry(w, b'g', &payload)
}

/// Copy exactly `size` content bytes from `r` to `w` and pad to the
/// block boundary.  A body shorter than `size` is a caller error.
pub fn write_content<R: Read, W: Write>(w: &mut W, r: &mut R, size: u64) -> Result<()> {
    let mut remaining = size;
    let mut buf = [0u8; 8 * BLOCK_SIZE];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = r.read(&mut buf[..want])?;
        if n == 0 {
            return Err(ScarError::InvalidArgument(
                "entry body ended before its declared size".into(),
            ));
        }
        w.write_all(&buf[..n])?;
        remaining -= n as u64;
    }

    let padding = (BLOCK_SIZE as u64 - size % BLOCK_SIZE as u64) % BLOCK_SIZE as u64;
    if padding > 0 {
        w.write_all(&[0u8; BLOCK_SIZE][..padding as usize])?;
    }
    Ok(())
}

/// Header plus content in one call.
pub fn write_entry<R: Read, W: Write>(w: &mut W, meta: &Meta, r: &mut R) -> Result<()> {
    write_meta(w, meta)?;
    write_content(w, r, meta.size.unwrap_or(0))
}

/// The end-of-archive indicator: two zero blocks.
pub fn write_end<W: Write>(w: &mut W) -> Result<()> {
    w.write_all(&[0u8; 2 * BLOCK_SIZE])?;
    Ok(())
}
