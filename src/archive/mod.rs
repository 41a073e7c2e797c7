//! Ramdisk archive codec (newc cpio)
//!
//! The boot ramdisk is an ASCII-header cpio archive (`070701`, or `070702`
//! with a byte-sum check field). Decoding yields entries in encounter order,
//! and extraction relies on that order: archives produced by the platform
//! tooling always emit a directory before anything inside it, so extraction
//! does not re-sort and fails loudly if a parent is missing.

use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, DirBuilderExt, OpenOptionsExt};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, trace};

use crate::error::{Error, Result};

const MAGIC_NEWC: &[u8; 6] = b"070701";
const MAGIC_CRC: &[u8; 6] = b"070702";
const HEADER_LEN: usize = 110;
const TRAILER: &str = "TRAILER!!!";

/// Inode numbers synthesized on save start here; the kernel ignores them
const INO_BASE: u32 = 300_000;

const S_IFMT: u32 = 0o170_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;
const S_IFLNK: u32 = 0o120_000;

/// One decoded archive member.
///
/// `mode` carries both the permission bits and the file-type bits; for
/// symlinks, `data` holds the link target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: PathBuf,
    pub mode: u32,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    /// Directory entry with the given permission bits.
    pub fn new_directory(name: impl Into<PathBuf>, perms: u32) -> ArchiveEntry {
        ArchiveEntry {
            name: name.into(),
            mode: S_IFDIR | (perms & 0o7777),
            data: Vec::new(),
        }
    }

    /// Regular file entry.
    pub fn new_file(name: impl Into<PathBuf>, perms: u32, data: Vec<u8>) -> ArchiveEntry {
        ArchiveEntry {
            name: name.into(),
            mode: S_IFREG | (perms & 0o7777),
            data,
        }
    }

    /// Symlink entry pointing at `target`.
    pub fn new_symlink(name: impl Into<PathBuf>, target: impl AsRef<OsStr>) -> ArchiveEntry {
        ArchiveEntry {
            name: name.into(),
            mode: S_IFLNK | 0o777,
            data: target.as_ref().as_bytes().to_vec(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    fn perms(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Decode an archive into its ordered entry sequence.
///
/// Stops at the trailer record; anything after it is ignored. Every record
/// must start with a known magic, otherwise the offset of the bad record is
/// reported.
pub fn parse(data: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    loop {
        if pos + HEADER_LEN > data.len() {
            return Err(Error::ArchiveTruncated("<header>".to_string()));
        }
        let magic = &data[pos..pos + 6];
        if magic != MAGIC_NEWC && magic != MAGIC_CRC {
            return Err(Error::ArchiveMagic(pos));
        }
        let header = &data[pos..pos + HEADER_LEN];
        let mode = hex_field(header, 1, "mode")?;
        let filesize = hex_field(header, 6, "filesize")? as usize;
        let namesize = hex_field(header, 11, "namesize")? as usize;

        let name_start = pos + HEADER_LEN;
        if name_start + namesize > data.len() {
            return Err(Error::ArchiveTruncated("<name>".to_string()));
        }
        let raw_name = &data[name_start..name_start + namesize];
        let name_bytes = match raw_name.iter().position(|&b| b == 0) {
            Some(nul) => &raw_name[..nul],
            None => raw_name,
        };
        let name = PathBuf::from(OsStr::from_bytes(name_bytes));

        let data_start = align4(name_start + namesize);
        if name.as_os_str() == TRAILER {
            trace!("archive trailer after {} entries", entries.len());
            break;
        }
        if data_start + filesize > data.len() {
            return Err(Error::ArchiveTruncated(name.display().to_string()));
        }
        entries.push(ArchiveEntry {
            name,
            mode,
            data: data[data_start..data_start + filesize].to_vec(),
        });
        pos = align4(data_start + filesize);
    }
    Ok(entries)
}

/// Materialize `entries` under `root`, skipping any entry whose leading path
/// component is named in `exclusions`.
///
/// Directories, regular files, and symlinks are recreated with their mode
/// bits; other entry types are skipped. Parents must precede children
/// (encounter order is trusted, per the archive producer's contract).
pub fn extract_all(entries: &[ArchiveEntry], root: &Path, exclusions: &[&str]) -> Result<()> {
    for entry in entries {
        let rel = entry.name.strip_prefix("/").unwrap_or(&entry.name);
        if excluded(rel, exclusions) {
            debug!("excluded from extraction: {:?}", rel);
            continue;
        }
        let target = root.join(rel);
        if entry.is_dir() {
            match fs::DirBuilder::new().mode(entry.perms()).create(&target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(Error::file(target, e)),
            }
        } else if entry.is_file() {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(entry.perms())
                .open(&target)
                .map_err(|e| Error::file(&target, e))?;
            file.write_all(&entry.data)
                .map_err(|e| Error::file(&target, e))?;
        } else if entry.is_symlink() {
            let link_target = OsStr::from_bytes(&entry.data);
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target).map_err(|e| Error::file(&target, e))?;
            }
            symlink(link_target, &target).map_err(|e| Error::file(&target, e))?;
        } else {
            debug!("skipping special entry {:?} (mode {:o})", rel, entry.mode);
        }
    }
    Ok(())
}

/// Encode entries back into archive bytes, trailer included.
pub fn save(entries: &[ArchiveEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut ino = INO_BASE;
    for entry in entries {
        write_record(&mut out, ino, entry.mode, &entry.name, &entry.data);
        ino += 1;
    }
    write_record(&mut out, 0, 0, Path::new(TRAILER), &[]);
    out
}

fn write_record(out: &mut Vec<u8>, ino: u32, mode: u32, name: &Path, data: &[u8]) {
    let name_bytes = name.as_os_str().as_bytes();
    let namesize = name_bytes.len() + 1;
    out.extend_from_slice(MAGIC_NEWC);
    for field in [
        ino,
        mode,
        0, // uid
        0, // gid
        1, // nlink
        0, // mtime
        data.len() as u32,
        0, // devmajor
        0, // devminor
        0, // rdevmajor
        0, // rdevminor
        namesize as u32,
        0, // check
    ] {
        out.extend_from_slice(format!("{:08x}", field).as_bytes());
    }
    out.extend_from_slice(name_bytes);
    out.push(0);
    pad4(out);
    out.extend_from_slice(data);
    pad4(out);
}

fn excluded(name: &Path, exclusions: &[&str]) -> bool {
    match name.components().next() {
        Some(Component::Normal(first)) => exclusions.iter().any(|e| OsStr::new(e) == first),
        _ => false,
    }
}

fn hex_field(header: &[u8], index: usize, field: &'static str) -> Result<u32> {
    let start = 6 + index * 8;
    std::str::from_utf8(&header[start..start + 8])
        .ok()
        .and_then(|s| u32::from_str_radix(s, 16).ok())
        .ok_or(Error::ArchiveField(field))
}

fn align4(pos: usize) -> usize {
    (pos + 3) & !3
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// Byte-sum check value used by the `070702` variant; exposed for tooling
/// that needs to re-emit checked archives.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |sum, &b| sum.wrapping_add(b as u32))
}
