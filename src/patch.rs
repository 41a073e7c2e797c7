//! In-place byte patching
//!
//! Two patch shapes exist: fixed-width token substitution (replacement is
//! exactly as long as the located pattern, enforced through the const
//! parameter of [`PatchPoint`]) and the 3-byte tail overwrite that breaks
//! the policy pathname compiled into stock init. Both operate on read-write
//! mappings and never change file length.

use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use memmap2::MmapMut;
use tracing::debug;

use crate::config::{MAGISK_RC_IMPORT, PATTERN_BREAKER, PLAT_CIL_PATTERN};
use crate::error::{Error, Result};

/// A byte location discovered by pattern search, tied to the pattern length.
///
/// `apply` only accepts a replacement of exactly `N` bytes, so a wrong-size
/// substitution is a type error rather than a silent file corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchPoint<const N: usize> {
    offset: usize,
}

impl<const N: usize> PatchPoint<N> {
    /// Scan `haystack` for `pattern`; the first match wins.
    pub fn locate(haystack: &[u8], pattern: &[u8; N]) -> Option<PatchPoint<N>> {
        find(haystack, pattern).map(|offset| PatchPoint { offset })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Overwrite the located region with `replacement`.
    ///
    /// `image` must be (a mapping of) the same content the point was located
    /// in; the region must still be inside it.
    pub fn apply(&self, image: &mut [u8], replacement: &[u8; N]) {
        image[self.offset..self.offset + N].copy_from_slice(replacement);
    }
}

/// Map a file read-write for in-place patching.
pub fn map_rw(path: &Path) -> Result<MmapMut> {
    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| Error::file(path, e))?;
    unsafe { MmapMut::map_mut(&file) }.map_err(|e| Error::file(path, e))
}

/// Break the split-policy pathname compiled into stock init.
///
/// Locates the exact platform CIL path string inside the executable and
/// overwrites its final three bytes in place, so init's own probe for a
/// split policy fails and our committed policy survives. Returns whether a
/// patch was applied; absence of the pattern is not an error.
pub fn neuter_policy_probe(init_path: &Path) -> Result<bool> {
    let mut image = map_rw(init_path)?;
    let pattern: &[u8] = PLAT_CIL_PATTERN;
    match find(&image, pattern) {
        Some(at) => {
            let end = at + pattern.len();
            image[end - PATTERN_BREAKER.len()..end].copy_from_slice(PATTERN_BREAKER);
            image.flush().map_err(|e| Error::file(init_path, e))?;
            debug!("init policy probe neutered at offset {:#x}", at);
            Ok(true)
        }
        None => {
            debug!("init carries no split-policy probe");
            Ok(false)
        }
    }
}

/// Read a script, apply `rewrite`, write the result back (created 0750 when
/// the file is new; an existing file keeps its mode).
pub fn patch_script(path: &Path, rewrite: impl FnOnce(&str) -> String) -> Result<()> {
    let contents = fs::read_to_string(path).map_err(|e| Error::file(path, e))?;
    let patched = rewrite(&contents);
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o750)
        .open(path)
        .map_err(|e| Error::file(path, e))?;
    file.write_all(patched.as_bytes())
        .map_err(|e| Error::file(path, e))
}

/// Service-stanza injection for the init script: add the import line for the
/// generated rc after the last existing top-level import, or at the very top
/// if the script has none. Already-present imports are left alone.
pub fn inject_magisk_import(rc: &str) -> String {
    if rc.lines().any(|line| line.trim() == MAGISK_RC_IMPORT) {
        return rc.to_string();
    }
    let mut lines: Vec<&str> = rc.lines().collect();
    let insert_at = lines
        .iter()
        .rposition(|line| line.trim_start().starts_with("import "))
        .map(|p| p + 1)
        .unwrap_or(0);
    lines.insert(insert_at, MAGISK_RC_IMPORT);
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
