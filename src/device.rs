//! Block device discovery
//!
//! Partitions are located by name through the kernel's per-device uevent
//! metadata under sysfs. Enumeration order is whatever the filesystem
//! returns; the first byte-exact `PARTNAME` match wins.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::config::BootPaths;
use crate::error::{Error, Result};
use crate::mount;

/// A named partition resolved to its block device numbers.
///
/// `path` points at the device node under the contract's dev directory and
/// is only valid once [`DeviceInfo::resolve`] has created that node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub major: u32,
    pub minor: u32,
    pub devname: String,
    pub partname: String,
    pub path: PathBuf,
}

impl DeviceInfo {
    /// Look up `partname` in the sysfs block-device metadata without
    /// touching the dev directory.
    pub fn scan(paths: &BootPaths, partname: &str) -> Result<DeviceInfo> {
        let info_dir = paths.block_info_dir();
        let entries = fs::read_dir(&info_dir).map_err(|e| Error::file(&info_dir, e))?;
        for entry in entries.flatten() {
            let uevent = entry.path().join("uevent");
            let contents = match fs::read_to_string(&uevent) {
                Ok(c) => c,
                Err(_) => continue,
            };
            if let Some(dev) = parse_uevent(paths, &contents, partname) {
                debug!(
                    "{} is {}:{} ({})",
                    dev.partname, dev.major, dev.minor, dev.devname
                );
                return Ok(dev);
            }
        }
        Err(Error::PartitionNotFound(partname.to_string()))
    }

    /// Look up `partname` and create its device node.
    ///
    /// Creates the dev directory hierarchy as needed and mknods a block
    /// device with mode 0600. Node creation is best-effort: the node may
    /// already exist from an earlier boot stage, and mount failures surface
    /// the problem anyway.
    pub fn resolve(paths: &BootPaths, partname: &str) -> Result<DeviceInfo> {
        let dev = DeviceInfo::scan(paths, partname)?;
        let _ = fs::create_dir(paths.dev_dir());
        let _ = fs::create_dir(paths.block_dev_dir());
        if let Err(err) = mount::mknod_blk(&dev.path, 0o600, dev.major, dev.minor) {
            debug!("device node for {} not created: {}", dev.partname, err);
        }
        Ok(dev)
    }
}

fn parse_uevent(paths: &BootPaths, contents: &str, wanted: &str) -> Option<DeviceInfo> {
    let mut major = None;
    let mut minor = None;
    let mut devname = None;
    let mut partname = None;
    for line in contents.lines() {
        if let Some(v) = line.strip_prefix("MAJOR=") {
            major = v.trim().parse::<u32>().ok();
        } else if let Some(v) = line.strip_prefix("MINOR=") {
            minor = v.trim().parse::<u32>().ok();
        } else if let Some(v) = line.strip_prefix("DEVNAME=") {
            devname = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("PARTNAME=") {
            partname = Some(v.trim().to_string());
        }
    }
    let partname = partname?;
    if partname != wanted {
        trace!("skipping partition {}", partname);
        return None;
    }
    let devname = devname?;
    let path = paths.block_dev_dir().join(&devname);
    Some(DeviceInfo {
        major: major?,
        minor: minor?,
        devname,
        partname,
        path,
    })
}
