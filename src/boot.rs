//! Boot orchestration
//!
//! Runs the whole pre-init sequence as pid 1: harden stdio, decide the boot
//! mode from the kernel command line, populate the root filesystem, mount
//! the partitions policy resolution needs, patch the rootfs, then hand
//! control to the real init.
//!
//! Everything is strictly sequential and synchronous; no other process
//! exists yet, so there is nothing to lock against and nobody to time out
//! on. There is also no rollback: a crash after the rootfs wipe or between
//! the init binary patch and the handover leaves the device unbootable until
//! reflashed. Failures that admit forward progress are logged and absorbed
//! instead.

use std::ffi::{CString, OsString};
use std::fs;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::archive;
use crate::cmdline::CmdlineInfo;
use crate::compress;
use crate::config::{BootPaths, SOCKET_TOKEN_LEN, SYSTEM_PARTITION, VENDOR_PARTITION};
use crate::device::DeviceInfo;
use crate::error::{Error, Result};
use crate::mount::{self, Mounter, MS_RDONLY};
use crate::patch::{self, PatchPoint};
use crate::payload;
use crate::rootfs;
use crate::sepolicy::{self, PolicyToolkit};

/// Rootfs entries that survive the `skip_initramfs` wipe.
const WIPE_KEEP_SKIP_INITRAMFS: &[&str] = &["overlay", ".backup", "init.bak"];

/// Rootfs entries that survive the compressed-ramdisk wipe and are shielded
/// from being overwritten by archive contents.
const WIPE_KEEP_RAMDISK: &[&str] = &["overlay", ".backup"];

/// Entries never cloned from the system root onto `/`.
const CLONE_SKIP: &[&str] = &["system"];

/// Replaces the process image with the real init.
///
/// A seam rather than a direct `execv` so the orchestrator can run end to
/// end in tests, where the recording implementation stores the call instead
/// of never returning.
pub trait Handoff {
    /// Execute `program` with the full original argument vector, argv\[0\]
    /// included.
    fn exec(&self, program: &Path, argv: &[OsString]) -> Result<()>;
}

/// [`Handoff`] that actually replaces the process image. Returns only on
/// failure.
#[derive(Debug, Default)]
pub struct ExecHandoff;

impl Handoff for ExecHandoff {
    fn exec(&self, program: &Path, argv: &[OsString]) -> Result<()> {
        let mut cmd = Command::new(program);
        if let Some(argv0) = argv.first() {
            cmd.arg0(argv0);
            cmd.args(&argv[1..]);
        }
        let err = cmd.exec();
        Err(Error::Handover(program.to_path_buf(), err))
    }
}

/// Everything one boot attempt owns: the filesystem contract, the syscall
/// and tool seams, the socket-token offset cache, and the record of mounts
/// to undo before the handover.
pub struct BootContext<'a> {
    paths: BootPaths,
    mounter: &'a dyn Mounter,
    toolkit: &'a dyn PolicyToolkit,
    handoff: &'a dyn Handoff,
    token_offset: Option<PatchPoint<SOCKET_TOKEN_LEN>>,
    mounted: Vec<PathBuf>,
}

impl<'a> BootContext<'a> {
    pub fn new(
        paths: BootPaths,
        mounter: &'a dyn Mounter,
        toolkit: &'a dyn PolicyToolkit,
        handoff: &'a dyn Handoff,
    ) -> Self {
        BootContext {
            paths,
            mounter,
            toolkit,
            handoff,
            token_offset: None,
            mounted: Vec::new(),
        }
    }

    /// Run the complete boot sequence and hand control to the real init.
    ///
    /// On success this never returns in production (the process image is
    /// replaced). Any error that escapes means the boot cannot continue.
    pub fn run(&mut self, argv: &[OsString]) -> Result<()> {
        self.harden_stdio();
        self.backup_init();

        let info = CmdlineInfo::read(&self.paths, self.mounter)?;
        info!(
            "boot mode: skip_initramfs={} slot={:?}",
            info.skip_initramfs, info.slot_suffix
        );

        self.populate_root(&info)?;
        self.early_mount(&info)?;

        if self.paths.recovery_fstab().exists() {
            info!("recovery boot, leaving rootfs untouched");
        } else {
            self.patch_rootfs()?;
        }

        self.cleanup();
        self.handoff.exec(&self.paths.init(), argv)
    }

    /// Point stdin, stdout and stderr at the null device.
    ///
    /// The node is created, opened and immediately unlinked so nothing of it
    /// survives in the rootfs. All three descriptors are marked
    /// close-on-exec; the real init opens its own console. Every step is
    /// best-effort, matching an environment where even `/dev` may not exist.
    fn harden_stdio(&self) {
        let null = self.paths.null();
        if let Err(err) = mount::mknod_chr(&null, 0o666, 1, 3) {
            debug!("no stdio device node: {}", err);
            return;
        }
        let c_null = match CString::new(null.as_os_str().as_bytes()) {
            Ok(c) => c,
            Err(_) => return,
        };
        let fd = unsafe { libc::open(c_null.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
        let _ = fs::remove_file(&null);
        if fd < 0 {
            return;
        }
        for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            unsafe { libc::dup3(fd, target, libc::O_CLOEXEC) };
        }
        if fd > libc::STDERR_FILENO {
            unsafe { libc::close(fd) };
        }
    }

    /// Hard-link `/init` to `/init.bak` so this executable survives being
    /// overwritten during root population; the patch phase renames the
    /// backup to its permanent applet location.
    fn backup_init(&self) {
        if let Err(err) = fs::hard_link(self.paths.init(), self.paths.init_bak()) {
            debug!("init backup not taken: {}", err);
        }
    }

    /// Bring the root filesystem to its boot state through exactly one of
    /// three paths: wipe it for a system-as-root boot, unpack a compressed
    /// ramdisk over it, or put the preserved original init back in place.
    fn populate_root(&self, info: &CmdlineInfo) -> Result<()> {
        let root = self.paths.root();
        if info.skip_initramfs {
            info!("system-as-root: clearing rootfs");
            rootfs::wipe_root(root, WIPE_KEEP_SKIP_INITRAMFS)?;
        } else if readable(&self.paths.ramdisk_xz()) {
            info!("unpacking compressed ramdisk");
            let xz_path = self.paths.ramdisk_xz();
            let compressed = fs::read(&xz_path).map_err(|e| Error::file(&xz_path, e))?;
            let decoded = compress::unxz(&compressed)?;

            // The decoded archive lands on disk before the wipe removes it
            // again, keeping the rootfs byte-for-byte in the order the
            // stock boot chain would produce.
            let cpio_path = self.paths.ramdisk_cpio();
            let mut cpio_file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0)
                .open(&cpio_path)
                .map_err(|e| Error::file(&cpio_path, e))?;
            cpio_file
                .write_all(&decoded)
                .map_err(|e| Error::file(&cpio_path, e))?;
            drop(cpio_file);

            let entries = archive::parse(&decoded)?;
            rootfs::wipe_root(root, WIPE_KEEP_RAMDISK)?;
            archive::extract_all(&entries, root, WIPE_KEEP_RAMDISK)?;
        } else {
            info!("restoring original init");
            if let Err(err) = fs::remove_file(self.paths.init()) {
                debug!("no init to remove: {}", err);
            }
            let preserved = self.paths.preserved_init();
            fs::hard_link(&preserved, self.paths.init())
                .map_err(|e| Error::file(&preserved, e))?;
        }
        Ok(())
    }

    /// Mount the partitions policy resolution reads from.
    ///
    /// Only needed when the policy must come from the system or vendor
    /// partition: under `skip_initramfs`, or when no monolithic policy is
    /// in the rootfs. An unresolvable system partition abandons the phase;
    /// the boot still proceeds and later stages cope with the missing
    /// mounts.
    fn early_mount(&mut self, info: &CmdlineInfo) -> Result<()> {
        if !info.skip_initramfs && readable(&self.paths.sepolicy()) {
            return Ok(());
        }

        let sys_dir = self.paths.sys_dir();
        let _ = fs::create_dir(&sys_dir);
        if let Err(err) = self
            .mounter
            .mount(Path::new("sysfs"), &sys_dir, "sysfs", 0)
        {
            warn!("sysfs unavailable: {}", err);
        }

        let system_part = format!("{}{}", SYSTEM_PARTITION, info.slot_suffix);
        let system_dev = match DeviceInfo::resolve(&self.paths, &system_part) {
            Ok(dev) => dev,
            Err(err) => {
                warn!("system partition unavailable, early mount abandoned: {}", err);
                return Ok(());
            }
        };

        if info.skip_initramfs {
            let system_root = self.paths.system_root();
            let _ = fs::create_dir(&system_root);
            if let Err(err) = self
                .mounter
                .mount(&system_dev.path, &system_root, "ext4", MS_RDONLY)
            {
                warn!("system root mount failed: {}", err);
            }

            // The system partition carries the real rootfs; everything but
            // its /system payload is cloned onto ours.
            rootfs::clone_dir(&system_root, self.paths.root(), CLONE_SKIP)?;

            let system = self.paths.system();
            let _ = fs::create_dir(&system);
            if let Err(err) = self.mounter.bind(&system_root.join("system"), &system) {
                warn!("system bind mount failed: {}", err);
            }
        } else {
            let system = self.paths.system();
            match self
                .mounter
                .mount(&system_dev.path, &system, "ext4", MS_RDONLY)
            {
                Ok(()) => self.mounted.push(system),
                Err(err) => warn!("system mount failed: {}", err),
            }
        }

        let vendor_part = format!("{}{}", VENDOR_PARTITION, info.slot_suffix);
        match DeviceInfo::resolve(&self.paths, &vendor_part) {
            Ok(vendor_dev) => {
                let vendor = self.paths.vendor();
                match self
                    .mounter
                    .mount(&vendor_dev.path, &vendor, "ext4", MS_RDONLY)
                {
                    Ok(()) => self.mounted.push(vendor),
                    Err(err) => warn!("vendor mount failed: {}", err),
                }
            }
            Err(err) => debug!("no vendor partition: {}", err),
        }
        Ok(())
    }

    /// Patch the populated rootfs: fold in the overlay, disarm the stock
    /// init's own policy loading, hook the init script, install the policy,
    /// and materialize the companion payloads.
    fn patch_rootfs(&mut self) -> Result<()> {
        rootfs::merge_overlay(self.paths.root(), &self.paths.overlay())?;

        if !patch::neuter_policy_probe(&self.paths.init())? {
            debug!("init carries no split-policy path, binary patch skipped");
        }
        patch::patch_script(&self.paths.init_rc(), patch::inject_magisk_import)?;

        let mut db = match sepolicy::resolve(&self.paths, self.toolkit) {
            Ok((source, db)) => {
                info!("policy source: {:?}", source);
                db
            }
            Err(err) => {
                warn!("no usable policy, companion install skipped: {}", err);
                return Ok(());
            }
        };
        sepolicy::commit(&self.paths, self.toolkit, &mut db)?;

        payload::extract_script(&self.paths.magisk_rc(), 0o750)?;
        let magisk = self.paths.magisk_bin();
        payload::extract_binary(&magisk, 0o755)?;
        payload::randomize_token(&magisk, &mut self.token_offset)?;

        if let Err(err) = fs::rename(self.paths.init_bak(), self.paths.applet_install()) {
            warn!("applet install failed: {}", err);
        }
        Ok(())
    }

    /// Undo the recorded partition mounts, newest first. The bind mount
    /// placed under `skip_initramfs` is never recorded; the booted system
    /// keeps using it.
    fn cleanup(&mut self) {
        while let Some(target) = self.mounted.pop() {
            if let Err(err) = self.mounter.umount(&target) {
                warn!("unmount of {:?} failed: {}", target, err);
            }
        }
    }
}

fn readable(path: &Path) -> bool {
    fs::File::open(path).is_ok()
}
