//! Root filesystem tree operations
//!
//! Destructive resets and tree moves used while repopulating the rootfs.
//! Symlinks are never followed: every walk works on the link itself, so a
//! hostile or stale link inside the old rootfs cannot redirect a wipe or a
//! clone outside the tree being processed.

use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::{symlink, DirBuilderExt, MetadataExt};
use std::path::Path;

use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Remove every top-level entry of `root` except those named in `keep`.
pub fn wipe_root(root: &Path, keep: &[&str]) -> Result<()> {
    debug!("wiping {:?}, keeping {:?}", root, keep);
    let entries = fs::read_dir(root).map_err(|e| Error::file(root, e))?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if keep.iter().any(|k| OsStr::new(k) == name.as_os_str()) {
            trace!("keeping {:?}", name);
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| Error::file(&path, e))?;
        let removed = if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| Error::file(&path, e))?;
    }
    Ok(())
}

/// Recursively copy `src` into `dst`, skipping entries named in `skip` at
/// any depth. Directories keep their permission bits, files their contents
/// and permissions, symlinks their targets.
pub fn clone_dir(src: &Path, dst: &Path, skip: &[&str]) -> Result<()> {
    let entries = fs::read_dir(src).map_err(|e| Error::file(src, e))?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if skip.iter().any(|k| OsStr::new(k) == name.as_os_str()) {
            trace!("not cloning {:?}", name);
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type().map_err(|e| Error::file(&from, e))?;
        if file_type.is_dir() {
            let meta = entry.metadata().map_err(|e| Error::file(&from, e))?;
            match fs::DirBuilder::new()
                .mode(meta.mode() & 0o7777)
                .create(&to)
            {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(Error::file(&to, e)),
            }
            clone_dir(&from, &to, skip)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&from).map_err(|e| Error::file(&from, e))?;
            if to.symlink_metadata().is_ok() {
                fs::remove_file(&to).map_err(|e| Error::file(&to, e))?;
            }
            symlink(&target, &to).map_err(|e| Error::file(&to, e))?;
        } else {
            fs::copy(&from, &to).map_err(|e| Error::file(&to, e))?;
        }
    }
    Ok(())
}

/// Merge the overlay staging directory into `root` and remove it.
///
/// Top-level overlay entries are moved into `root`; on a name collision the
/// incoming entry wins and the existing one is removed first. A missing
/// overlay directory is the normal case and a no-op.
pub fn merge_overlay(root: &Path, overlay: &Path) -> Result<()> {
    if !overlay.is_dir() {
        return Ok(());
    }
    debug!("merging overlay {:?}", overlay);
    let entries = fs::read_dir(overlay).map_err(|e| Error::file(overlay, e))?;
    for entry in entries.flatten() {
        let from = entry.path();
        let to = root.join(entry.file_name());
        if let Ok(meta) = to.symlink_metadata() {
            let removed = if meta.is_dir() {
                fs::remove_dir_all(&to)
            } else {
                fs::remove_file(&to)
            };
            removed.map_err(|e| Error::file(&to, e))?;
        }
        fs::rename(&from, &to).map_err(|e| Error::file(&to, e))?;
    }
    fs::remove_dir(overlay).map_err(|e| Error::file(overlay, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_wipe_keeps_exclusions() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("init"), b"x").unwrap();
        fs::write(tmp.path().join("init.bak"), b"x").unwrap();
        fs::create_dir(tmp.path().join("overlay")).unwrap();
        fs::write(tmp.path().join("overlay/frag.rc"), b"y").unwrap();
        fs::create_dir(tmp.path().join(".backup")).unwrap();
        fs::create_dir(tmp.path().join("sbin")).unwrap();

        wipe_root(tmp.path(), &["overlay", ".backup", "init.bak"]).unwrap();

        assert!(!tmp.path().join("init").exists());
        assert!(!tmp.path().join("sbin").exists());
        assert!(tmp.path().join("init.bak").exists());
        assert!(tmp.path().join(".backup").exists());
        assert!(tmp.path().join("overlay/frag.rc").exists());
    }

    #[test]
    fn test_wipe_removes_symlink_not_target() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("overlay")).unwrap();
        fs::write(tmp.path().join("overlay/real"), b"data").unwrap();
        symlink("overlay", tmp.path().join("link")).unwrap();

        wipe_root(tmp.path(), &["overlay"]).unwrap();

        assert!(!tmp.path().join("link").exists());
        assert!(tmp.path().join("overlay/real").exists());
    }

    #[test]
    fn test_clone_dir_copies_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("etc/init.d")).unwrap();
        fs::create_dir(&dst).unwrap();
        fs::write(src.join("etc/fstab"), b"/dev/block/sda2 /system\n").unwrap();
        fs::set_permissions(src.join("etc/fstab"), fs::Permissions::from_mode(0o640)).unwrap();
        symlink("fstab", src.join("etc/fstab.link")).unwrap();

        clone_dir(&src, &dst, &[]).unwrap();

        let copied = dst.join("etc/fstab");
        assert_eq!(fs::read(&copied).unwrap(), b"/dev/block/sda2 /system\n");
        assert_eq!(
            fs::metadata(&copied).unwrap().permissions().mode() & 0o7777,
            0o640
        );
        assert_eq!(
            fs::read_link(dst.join("etc/fstab.link")).unwrap(),
            Path::new("fstab")
        );
        assert!(dst.join("etc/init.d").is_dir());
    }

    #[test]
    fn test_clone_dir_skips_named_entries_at_any_depth() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("system/bin")).unwrap();
        fs::create_dir_all(src.join("vendor/system")).unwrap();
        fs::write(src.join("build.prop"), b"ro.build=1").unwrap();
        fs::create_dir(&dst).unwrap();

        clone_dir(&src, &dst, &["system"]).unwrap();

        assert!(!dst.join("system").exists());
        assert!(!dst.join("vendor/system").exists());
        assert!(dst.join("vendor").is_dir());
        assert!(dst.join("build.prop").exists());
    }

    #[test]
    fn test_merge_overlay_incoming_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let overlay = tmp.path().join("overlay");
        fs::create_dir_all(overlay.join("sbin")).unwrap();
        fs::write(overlay.join("init.rc"), b"patched").unwrap();
        fs::write(overlay.join("sbin/helper"), b"h").unwrap();
        fs::write(tmp.path().join("init.rc"), b"original").unwrap();

        merge_overlay(tmp.path(), &overlay).unwrap();

        assert_eq!(fs::read(tmp.path().join("init.rc")).unwrap(), b"patched");
        assert!(tmp.path().join("sbin/helper").exists());
        assert!(!overlay.exists());
    }

    #[test]
    fn test_merge_overlay_absent_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("init.rc"), b"original").unwrap();
        merge_overlay(tmp.path(), &tmp.path().join("overlay")).unwrap();
        assert_eq!(fs::read(tmp.path().join("init.rc")).unwrap(), b"original");
    }
}
