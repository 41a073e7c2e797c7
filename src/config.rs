//! Filesystem contract and fixed constants
//!
//! Every absolute path the boot sequence touches is derived from a single
//! overridable root so tests can run the full sequence inside a scratch
//! directory. The default root is `/`, matching the environment this binary
//! actually runs in: the initial ramdisk, before any other process exists.

use std::path::{Path, PathBuf};

/// Length of the coordination token embedded in the companion binary
pub const SOCKET_TOKEN_LEN: usize = 32;

/// Placeholder token the build embeds in the companion binary; replaced with
/// a per-boot random value before the binary is ever executed
pub const SOCKET_PLACEHOLDER: &[u8; SOCKET_TOKEN_LEN] = b"d30138f2310a9fb9c54a3e0c21f58591";

/// Pathname string compiled into stock init whose presence gates its own
/// split-policy loading; located by byte scan inside the init executable
pub const PLAT_CIL_PATTERN: &[u8] = b"/system/etc/selinux/plat_sepolicy.cil";

/// Replacement for the final bytes of [`PLAT_CIL_PATTERN`]; breaks the
/// compiled-in pathname so stock init skips its own policy load
pub const PATTERN_BREAKER: &[u8; 3] = b"xxx";

/// Applet names this executable answers to when invoked through a link
pub const INIT_APPLETS: &[&str] = &["magiskpolicy", "supolicy"];

/// Partition label prefix of the system partition (slot suffix appended)
pub const SYSTEM_PARTITION: &str = "SYSTEM";

/// Partition label prefix of the vendor partition (slot suffix appended)
pub const VENDOR_PARTITION: &str = "VENDOR";

/// Extension marking a stored policy fingerprint file
pub const FINGERPRINT_EXT: &str = "sha256";

/// Binary policy version requested from the CIL compiler (xperms-ioctl)
pub const POLICY_VERSION: u32 = 30;

/// Import line injected into the init script
pub const MAGISK_RC_IMPORT: &str = "import /init.magisk.rc";

/// All filesystem locations the boot sequence reads or mutates, anchored at
/// one root directory.
#[derive(Debug, Clone)]
pub struct BootPaths {
    root: PathBuf,
}

impl BootPaths {
    /// Anchor the filesystem contract at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        BootPaths { root: root.into() }
    }

    /// The anchored root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scratch node used to redirect stdio before any real device exists.
    pub fn null(&self) -> PathBuf {
        self.root.join("null")
    }

    /// The init executable this process replaced and will hand back to.
    pub fn init(&self) -> PathBuf {
        self.root.join("init")
    }

    /// Transient hardlink of `/init` taken at startup.
    pub fn init_bak(&self) -> PathBuf {
        self.root.join("init.bak")
    }

    /// Copy of the original init preserved by an earlier installation.
    pub fn preserved_init(&self) -> PathBuf {
        self.root.join(".backup/init")
    }

    /// The init script patched during the patch phase.
    pub fn init_rc(&self) -> PathBuf {
        self.root.join("init.rc")
    }

    /// High-compression ramdisk archive, present on devices that ship one.
    pub fn ramdisk_xz(&self) -> PathBuf {
        self.root.join("ramdisk.cpio.xz")
    }

    /// Decoded ramdisk archive produced from [`Self::ramdisk_xz`].
    pub fn ramdisk_cpio(&self) -> PathBuf {
        self.root.join("ramdisk.cpio")
    }

    /// Staging directory whose contents are merged over the rootfs.
    pub fn overlay(&self) -> PathBuf {
        self.root.join("overlay")
    }

    /// Canonical monolithic policy path.
    pub fn sepolicy(&self) -> PathBuf {
        self.root.join("sepolicy")
    }

    /// Debug alias of the canonical policy path.
    pub fn sepolicy_debug(&self) -> PathBuf {
        self.root.join("sepolicy_debug")
    }

    /// System partition mount point.
    pub fn system(&self) -> PathBuf {
        self.root.join("system")
    }

    /// Auxiliary mount point used when the system partition carries the
    /// root filesystem itself.
    pub fn system_root(&self) -> PathBuf {
        self.root.join("system_root")
    }

    /// Vendor partition mount point.
    pub fn vendor(&self) -> PathBuf {
        self.root.join("vendor")
    }

    /// Generated init-service script consumed via an injected import.
    pub fn magisk_rc(&self) -> PathBuf {
        self.root.join("init.magisk.rc")
    }

    /// Install path of the companion binary.
    pub fn magisk_bin(&self) -> PathBuf {
        self.root.join("sbin/magisk")
    }

    /// Permanent applet location the backed-up init binary is renamed to.
    pub fn applet_install(&self) -> PathBuf {
        self.root.join("sbin/magiskinit")
    }

    /// Marker file identifying a recovery-image boot.
    pub fn recovery_fstab(&self) -> PathBuf {
        self.root.join("etc/recovery.fstab")
    }

    /// Mount point of the transient procfs.
    pub fn proc_dir(&self) -> PathBuf {
        self.root.join("proc")
    }

    /// Kernel-exposed boot command line.
    pub fn proc_cmdline(&self) -> PathBuf {
        self.root.join("proc/cmdline")
    }

    /// Mount point of sysfs.
    pub fn sys_dir(&self) -> PathBuf {
        self.root.join("sys")
    }

    /// Per-block-device metadata directory under sysfs.
    pub fn block_info_dir(&self) -> PathBuf {
        self.root.join("sys/dev/block")
    }

    /// Device directory under which block nodes are created.
    pub fn dev_dir(&self) -> PathBuf {
        self.root.join("dev")
    }

    /// Block device node directory.
    pub fn block_dev_dir(&self) -> PathBuf {
        self.root.join("dev/block")
    }

    /// Platform CIL policy source.
    pub fn plat_cil(&self) -> PathBuf {
        self.root.join("system/etc/selinux/plat_sepolicy.cil")
    }

    /// Platform policy directory (fingerprint lookup).
    pub fn plat_policy_dir(&self) -> PathBuf {
        self.root.join("system/etc/selinux")
    }

    /// Version-selected mapping CIL for the platform policy.
    pub fn plat_mapping(&self, version: &str) -> PathBuf {
        self.root
            .join(format!("system/etc/selinux/mapping/{}.cil", version))
    }

    /// Vendor policy directory (fingerprint lookup and extra CIL sources).
    pub fn vendor_policy_dir(&self) -> PathBuf {
        self.root.join("vendor/etc/selinux")
    }

    /// Precompiled split policy shipped on the vendor partition.
    pub fn precompiled_policy(&self) -> PathBuf {
        self.root.join("vendor/etc/selinux/precompiled_sepolicy")
    }

    /// File naming the platform policy version the vendor image was built
    /// against.
    pub fn plat_version_file(&self) -> PathBuf {
        self.root.join("vendor/etc/selinux/plat_sepolicy_vers.txt")
    }
}

impl Default for BootPaths {
    fn default() -> Self {
        BootPaths::new("/")
    }
}
