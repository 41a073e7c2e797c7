//! Boot command line parsing
//!
//! The kernel command line decides the boot mode: whether the initramfs is
//! skipped (system-as-root devices) and which A/B slot is active. It is read
//! once, very early, through a transient procfs mount that leaves no trace.

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use tracing::debug;

use crate::config::BootPaths;
use crate::error::{Error, Result};
use crate::mount::Mounter;

/// Boot-mode flags parsed from the kernel command line. Immutable once
/// parsed; lives for the process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdlineInfo {
    /// Rootfs must be wiped and rebuilt from the system partition
    pub skip_initramfs: bool,
    /// Active slot suffix, e.g. `"_a"`, or empty on non-A/B devices
    pub slot_suffix: String,
}

impl CmdlineInfo {
    /// Parse a space-separated kernel command line.
    ///
    /// Tokens are processed in input order. Both slot forms write the same
    /// field, so when both appear the later token wins; this matches the
    /// long-standing observed behavior and is pinned by tests rather than
    /// left to chance.
    pub fn parse(raw: &str) -> CmdlineInfo {
        let mut info = CmdlineInfo::default();
        for token in raw.split_whitespace() {
            if let Some(suffix) = token.strip_prefix("androidboot.slot_suffix=") {
                if !suffix.is_empty() {
                    info.slot_suffix = truncate(suffix, 2);
                }
            } else if let Some(letter) = token.strip_prefix("androidboot.slot=") {
                if let Some(c) = letter.chars().next() {
                    info.slot_suffix = format!("_{}", c);
                }
            } else if token == "skip_initramfs" {
                info.skip_initramfs = true;
            }
        }
        info
    }

    /// Read and parse the live command line.
    ///
    /// Mounts procfs at the contract's proc directory, reads the cmdline
    /// pseudo-file, then unmounts. Read failure is fatal to the caller: the
    /// boot-mode decision gates every later phase.
    pub fn read(paths: &BootPaths, mounter: &dyn Mounter) -> Result<CmdlineInfo> {
        let proc_dir = paths.proc_dir();
        make_dir_0555(&proc_dir);
        mounter.mount(Path::new("proc"), &proc_dir, "proc", 0)?;
        let raw = fs::read_to_string(paths.proc_cmdline()).map_err(Error::Cmdline);
        if let Err(err) = mounter.umount(&proc_dir) {
            debug!("leaving procfs mounted: {}", err);
        }
        let info = CmdlineInfo::parse(&raw?);
        debug!(
            "cmdline: skip_initramfs={} slot_suffix={:?}",
            info.skip_initramfs, info.slot_suffix
        );
        Ok(info)
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn make_dir_0555(path: &Path) {
    let _ = fs::DirBuilder::new().mode(0o555).create(path);
}
