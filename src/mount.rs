//! Mount operations and device-node syscalls
//!
//! Thin wrappers over the raw syscalls the boot sequence needs. Mounting
//! goes through the [`Mounter`] trait so the orchestrator can be driven in
//! tests without privileges; device-node creation is exposed as plain
//! functions since tests never exercise it against a real `/dev`.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use tracing::trace;

use crate::error::{Error, Result};

pub use libc::{MS_BIND, MS_RDONLY};

/// Performs mount and unmount operations on behalf of the orchestrator.
///
/// The production implementation issues the real syscalls; tests substitute
/// a recording implementation so phase logic is checkable without running
/// as pid 1.
pub trait Mounter {
    /// Mount `source` on `target` with the given filesystem type and flags.
    /// No data payload is ever passed.
    fn mount(&self, source: &Path, target: &Path, fstype: &str, flags: libc::c_ulong)
        -> Result<()>;

    /// Bind-mount `source` onto `target`.
    fn bind(&self, source: &Path, target: &Path) -> Result<()>;

    /// Unmount `target`.
    fn umount(&self, target: &Path) -> Result<()>;
}

/// [`Mounter`] backed by the mount(2) and umount(2) syscalls.
#[derive(Debug, Default)]
pub struct SysMounter;

impl Mounter for SysMounter {
    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fstype: &str,
        flags: libc::c_ulong,
    ) -> Result<()> {
        trace!("mount {:?} -> {:?} ({})", source, target, fstype);
        let src = cstring(source)?;
        let tgt = cstring(target)?;
        let fs = CString::new(fstype).map_err(|_| invalid(target))?;
        let ret = unsafe { libc::mount(src.as_ptr(), tgt.as_ptr(), fs.as_ptr(), flags, ptr::null()) };
        if ret < 0 {
            return Err(Error::Mount(target.into(), io::Error::last_os_error()));
        }
        Ok(())
    }

    fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        trace!("bind {:?} -> {:?}", source, target);
        let src = cstring(source)?;
        let tgt = cstring(target)?;
        let ret =
            unsafe { libc::mount(src.as_ptr(), tgt.as_ptr(), ptr::null(), MS_BIND, ptr::null()) };
        if ret < 0 {
            return Err(Error::Mount(target.into(), io::Error::last_os_error()));
        }
        Ok(())
    }

    fn umount(&self, target: &Path) -> Result<()> {
        trace!("umount {:?}", target);
        let tgt = cstring(target)?;
        let ret = unsafe { libc::umount(tgt.as_ptr()) };
        if ret < 0 {
            return Err(Error::Mount(target.into(), io::Error::last_os_error()));
        }
        Ok(())
    }
}

/// Create a character device node.
pub fn mknod_chr(path: &Path, perms: u32, major: u32, minor: u32) -> Result<()> {
    mknod(path, libc::S_IFCHR | perms, major, minor)
}

/// Create a block device node.
pub fn mknod_blk(path: &Path, perms: u32, major: u32, minor: u32) -> Result<()> {
    mknod(path, libc::S_IFBLK | perms, major, minor)
}

fn mknod(path: &Path, mode: u32, major: u32, minor: u32) -> Result<()> {
    let c_path = cstring(path)?;
    let dev = libc::makedev(major, minor);
    let ret = unsafe { libc::mknod(c_path.as_ptr(), mode as libc::mode_t, dev) };
    if ret < 0 {
        return Err(Error::file(path, io::Error::last_os_error()));
    }
    Ok(())
}

fn cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| invalid(path))
}

fn invalid(path: &Path) -> Error {
    Error::file(
        path,
        io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"),
    )
}
