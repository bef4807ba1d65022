//! # scar — Seekable Compressed ARchive
//!
//! A SCAR archive is a PAX-compatible tar stream pushed through a
//! compressor that is periodically resynced, followed by a compressed
//! plaintext trailer that makes random access possible without
//! decompressing the whole stream.
//!
//! Format guarantees (frozen):
//! - The entry stream is standard PAX (USTAR 512-byte blocks plus
//!   `x`/`g` extended headers); GNU `L`/`K` long-name entries are
//!   accepted on read, never emitted on write
//! - Every resync point starts a complete gzip member / zstd frame, so
//!   a fresh decompressor can be pointed at any checkpoint offset
//! - The trailer is: index section (`SCAR-INDEX\n` + self-delimited
//!   rows), checkpoints section (`SCAR-CHECKPOINTS\n` + rows), tail
//!   section (`SCAR-TAIL\n<index_off>\n<checkpoints_off>\n`), each
//!   compressed independently with the archive's codec
//! - The last bytes of every archive are the codec's fixed EOF marker;
//!   readers identify the codec by suffix match and reject files with
//!   no matching marker
//! - The checkpoint interval is a writer-side tuning knob, not part of
//!   the on-disk format
//!
//! ```no_run
//! use std::io::Cursor;
//! use scar::{Codec, Meta, ScarReader, ScarWriter};
//!
//! // Write
//! let mut sw = ScarWriter::new(Vec::new(), Codec::Gzip, 6)?;
//! sw.write_entry(&Meta::file("hello.txt", 11), &mut Cursor::new(b"hello world".to_vec()))?;
//! let archive = sw.finish()?;
//!
//! // Random access
//! let mut sr = ScarReader::new(Cursor::new(archive))?;
//! let mut it = sr.iterate()?;
//! while let Some(entry) = it.next_entry()? {
//!     let meta = sr.read_meta(entry.offset, &entry.global)?;
//!     let mut body = Vec::new();
//!     sr.read_content(&mut body, meta.size.unwrap_or(0))?;
//! }
//! # Ok::<(), scar::ScarError>(())
//! ```

pub mod codec;
pub mod error;
pub mod ioutil;
pub mod meta;
pub mod pax;
pub mod reader;
pub mod ustar;
pub mod writer;

// Flat re-exports for the most common types.
pub use codec::{Codec, Compressor, Decompressor};
pub use error::{Result, ScarError};
pub use meta::{FileType, Meta};
pub use reader::{Checkpoint, IndexEntry, IndexIter, ScarReader};
pub use writer::{ScarWriter, DEFAULT_CHECKPOINT_INTERVAL};
