use clap::{Parser, Subcommand};
use scar::{Codec, FileType, Meta, ScarReader, ScarWriter};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "scar", version, about = "Seekable compressed archives")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an archive from files and directories
    Create {
        #[arg(short, long)]
        output: PathBuf,
        /// Codec: gzip (default), zstd, plain
        #[arg(short, long, default_value = "gzip")]
        codec: String,
        #[arg(short, long, default_value = "6")]
        level: u32,
        /// Checkpoint interval in KiB (default 10240 = 10 MiB)
        #[arg(long, default_value = "10240")]
        checkpoint_interval: u64,
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// List the immediate children of a directory inside the archive
    Ls {
        archive: PathBuf,
        /// Directory prefix, e.g. "some/dir/"; empty lists the root
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Print every entry path in the archive
    Tree {
        archive: PathBuf,
    },
    /// Stream file bodies to stdout
    Cat {
        archive: PathBuf,
        #[arg(required = true, num_args = 1..)]
        path: Vec<String>,
    },
    /// Extract the whole archive into a directory
    Extract {
        archive: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Convert a tar/pax stream into a SCAR archive ("-" reads stdin)
    Convert {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value = "gzip")]
        codec: String,
        #[arg(short, long, default_value = "6")]
        level: u32,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        // ── Create ───────────────────────────────────────────────────────────
        Commands::Create { output, codec, level, checkpoint_interval, input } => {
            let codec = parse_codec(&codec)?;
            let sink = BufWriter::new(File::create(&output)?);
            let mut sw =
                ScarWriter::with_options(sink, codec, level, checkpoint_interval * 1024)?;

            let mut count = 0usize;
            for root in &input {
                for dirent in walkdir::WalkDir::new(root).sort_by_file_name() {
                    let dirent = dirent?;
                    add_path(&mut sw, dirent.path())?;
                    count += 1;
                }
            }

            sw.finish()?.flush()?;
            let size = fs::metadata(&output)?.len();
            println!("Created: {} ({} entries, {} B on disk)", output.display(), count, size);
        }

        // ── Ls ───────────────────────────────────────────────────────────────
        Commands::Ls { archive, prefix } => {
            let sr = open_archive(&archive)?;
            let mut it = sr.iterate()?;

            let mut children = BTreeSet::new();
            while let Some(entry) = it.next_entry()? {
                let Some(rest) = entry.path.strip_prefix(&prefix) else {
                    continue;
                };
                if rest.is_empty() {
                    continue;
                }
                // Keep only the first path component below the prefix.
                match rest.find('/') {
                    Some(pos) => children.insert(rest[..pos + 1].to_string()),
                    None => children.insert(rest.to_string()),
                };
            }

            for child in children {
                println!("{child}");
            }
        }

        // ── Tree ─────────────────────────────────────────────────────────────
        Commands::Tree { archive } => {
            let sr = open_archive(&archive)?;
            let mut it = sr.iterate()?;
            while let Some(entry) = it.next_entry()? {
                println!("{}", entry.path);
            }
        }

        // ── Cat ──────────────────────────────────────────────────────────────
        Commands::Cat { archive, path } => {
            let mut sr = open_archive(&archive)?;
            let wanted: BTreeSet<&str> = path.iter().map(String::as_str).collect();
            let mut found = BTreeSet::new();

            let stdout = io::stdout();
            let mut out = stdout.lock();

            let mut it = sr.iterate()?;
            while let Some(entry) = it.next_entry()? {
                if entry.filetype != FileType::File || !wanted.contains(entry.path.as_str()) {
                    continue;
                }
                let meta = sr.read_meta(entry.offset, &entry.global)?;
                sr.read_content(&mut out, meta.size.unwrap_or(0))?;
                found.insert(entry.path.clone());
            }

            for want in wanted {
                if !found.contains(want) {
                    return Err(format!("'{want}' not found in archive").into());
                }
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { archive, output_dir } => {
            let mut sr = open_archive(&archive)?;
            let mut it = sr.iterate()?;
            let mut count = 0usize;
            while let Some(entry) = it.next_entry()? {
                let meta = sr.read_meta(entry.offset, &entry.global)?;
                extract_entry(&mut sr, &output_dir, &entry.path, &meta)?;
                count += 1;
            }
            println!("Extracted {count} entries to {}", output_dir.display());
        }

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output, codec, level } => {
            let codec = parse_codec(&codec)?;
            let mut src: BufReader<Box<dyn Read>> = if input.as_os_str() == "-" {
                BufReader::new(Box::new(io::stdin().lock()))
            } else {
                BufReader::new(Box::new(File::open(&input)?))
            };

            let sink = BufWriter::new(File::create(&output)?);
            let mut sw = ScarWriter::new(sink, codec, level)?;

            let mut global = Meta::empty();
            let mut count = 0usize;
            while let Some(meta) = scar::pax::read_meta(&mut global, &mut src)? {
                let size = meta.size.unwrap_or(0);
                let mut body = scar::ioutil::LimitedReader::new(&mut src, size);
                sw.write_entry(&meta, &mut body)?;

                // The source stream pads content to the block boundary.
                let padding = (512 - size % 512) % 512;
                io::copy(&mut (&mut src).take(padding), &mut io::sink())?;
                count += 1;
            }

            sw.finish()?.flush()?;
            println!("Converted {count} entries -> {}", output.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_codec(name: &str) -> Result<Codec, String> {
    Codec::from_name(name).ok_or_else(|| format!("unknown codec '{name}'"))
}

fn open_archive(path: &Path) -> Result<ScarReader<File>, Box<dyn std::error::Error>> {
    Ok(ScarReader::new(File::open(path)?)?)
}

/// Stat one filesystem path into a Meta and write it to the archive.
fn add_path<W: Write>(
    sw: &mut ScarWriter<W>,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let meta = fs::symlink_metadata(path)?;
    let ft = meta.file_type();

    let mut name = path.to_string_lossy().into_owned();
    if ft.is_dir() && !name.ends_with('/') {
        name.push('/');
    }

    let mut entry = stat_to_meta(&name, &meta)?;

    if ft.is_symlink() {
        entry.linkpath = Some(fs::read_link(path)?.to_string_lossy().into_owned());
    }

    if ft.is_file() {
        let mut body = BufReader::new(File::open(path)?);
        sw.write_entry(&entry, &mut body)?;
    } else {
        entry.size = None;
        sw.write_entry(&entry, &mut io::empty())?;
    }
    Ok(())
}

#[cfg(unix)]
fn stat_to_meta(name: &str, meta: &fs::Metadata) -> Result<Meta, Box<dyn std::error::Error>> {
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    let ft = meta.file_type();
    let filetype = if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_fifo() {
        FileType::Fifo
    } else if ft.is_char_device() {
        FileType::CharDev
    } else if ft.is_block_device() {
        FileType::BlockDev
    } else if ft.is_socket() {
        return Err(format!("'{name}': sockets cannot be archived").into());
    } else {
        FileType::File
    };

    let mut entry = Meta::empty();
    entry.filetype = filetype;
    entry.path = Some(name.to_string());
    entry.mode = Some(meta.mode() & 0o7777);
    entry.uid = Some(meta.uid() as u64);
    entry.gid = Some(meta.gid() as u64);
    entry.mtime = Some(meta.mtime() as f64 + meta.mtime_nsec() as f64 / 1_000_000_000.0);
    if filetype == FileType::File {
        entry.size = Some(meta.len());
    }
    if matches!(filetype, FileType::CharDev | FileType::BlockDev) {
        entry.devmajor = Some(dev_major(meta.rdev()));
        entry.devminor = Some(dev_minor(meta.rdev()));
    }
    Ok(entry)
}

#[cfg(not(unix))]
fn stat_to_meta(name: &str, meta: &fs::Metadata) -> Result<Meta, Box<dyn std::error::Error>> {
    use std::time::UNIX_EPOCH;

    let mut entry = Meta::empty();
    entry.filetype = if meta.is_dir() { FileType::Directory } else { FileType::File };
    entry.path = Some(name.to_string());
    if let Ok(mtime) = meta.modified().and_then(|t| {
        t.duration_since(UNIX_EPOCH)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }) {
        entry.mtime = Some(mtime.as_secs_f64());
    }
    if entry.filetype == FileType::File {
        entry.size = Some(meta.len());
    }
    Ok(entry)
}

// Device number split, glibc bit layout.
#[cfg(unix)]
fn dev_major(rdev: u64) -> u32 {
    (((rdev >> 32) & 0xffff_f000) | ((rdev >> 8) & 0xfff)) as u32
}

#[cfg(unix)]
fn dev_minor(rdev: u64) -> u32 {
    (((rdev >> 12) & 0xffff_ff00) | (rdev & 0xff)) as u32
}

fn extract_entry(
    sr: &mut ScarReader<File>,
    output_dir: &Path,
    name: &str,
    meta: &Meta,
) -> Result<(), Box<dyn std::error::Error>> {
    let dest = sanitize_join(output_dir, name)
        .ok_or_else(|| format!("'{name}': refusing to extract outside the output directory"))?;

    match meta.filetype {
        FileType::Directory => {
            fs::create_dir_all(&dest)?;
        }
        FileType::File => {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = BufWriter::new(File::create(&dest)?);
            sr.read_content(&mut out, meta.size.unwrap_or(0))?;
            out.flush()?;
        }
        FileType::Symlink => {
            let target = meta
                .linkpath
                .as_deref()
                .ok_or_else(|| format!("'{name}': symlink without a target"))?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            make_symlink(target, &dest)?;
        }
        FileType::Hardlink => {
            let target = meta
                .linkpath
                .as_deref()
                .ok_or_else(|| format!("'{name}': hardlink without a target"))?;
            let target = sanitize_join(output_dir, target)
                .ok_or_else(|| format!("'{name}': hardlink target escapes the output directory"))?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::hard_link(&target, &dest)?;
        }
        FileType::CharDev | FileType::BlockDev | FileType::Fifo => {
            eprintln!("skipping special file '{name}'");
            return Ok(());
        }
        FileType::Unknown => {
            eprintln!("skipping entry of unknown type '{name}'");
            return Ok(());
        }
    }

    #[cfg(unix)]
    if meta.filetype != FileType::Symlink {
        if let Some(mode) = meta.mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dest, fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(())
}

/// Join an archive path onto the output directory, rejecting absolute
/// paths and `..` traversal.
fn sanitize_join(base: &Path, name: &str) -> Option<PathBuf> {
    let mut dest = base.to_path_buf();
    for part in name.split('/') {
        match part {
            "" | "." => continue,
            ".." => return None,
            part => dest.push(part),
        }
    }
    if dest == base {
        return None;
    }
    Some(dest)
}

#[cfg(unix)]
fn make_symlink(target: &str, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(not(unix))]
fn make_symlink(_target: &str, dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("symlinks are not supported on this platform: {}", dest.display()),
    ))
}
