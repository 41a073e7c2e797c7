//! Compressed-ramdisk boot path
//!
//! When `/ramdisk.cpio.xz` is present the boot sequence decompresses it,
//! drops the decoded archive at `/ramdisk.cpio`, wipes the rootfs keeping
//! only the overlay and backup directories, and extracts the archive over
//! the clean root. The wipe then also took both archive files with it.
//! These tests drive the whole sequence through `BootContext::run` against
//! a scratch root.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use liblzma::write::XzEncoder;

use magiskinit::archive::{self, ArchiveEntry};
use magiskinit::boot::{BootContext, Handoff};
use magiskinit::config::{BootPaths, PLAT_CIL_PATTERN, SOCKET_PLACEHOLDER};
use magiskinit::error::{Error, Result};
use magiskinit::mount::Mounter;
use magiskinit::payload::MAGISK_RC;
use magiskinit::sepolicy::{CilJob, PolicyDb, PolicyToolkit, Statement, POLICYDB_MAGIC};

#[derive(Default)]
struct RecordingMounter {
    calls: RefCell<Vec<String>>,
}

impl Mounter for RecordingMounter {
    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fstype: &str,
        _flags: libc::c_ulong,
    ) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("mount {} {} {}", source.display(), target.display(), fstype));
        Ok(())
    }

    fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("bind {} {}", source.display(), target.display()));
        Ok(())
    }

    fn umount(&self, target: &Path) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("umount {}", target.display()));
        Ok(())
    }
}

/// Toolkit that loads and exports images unchanged; rule injection is a
/// no-op so the committed policy stays byte-identical to its source.
struct PassthroughToolkit;

impl PolicyToolkit for PassthroughToolkit {
    fn load_policy(&self, raw: Vec<u8>) -> Result<PolicyDb> {
        PolicyDb::from_image(raw)
    }

    fn compile_cil(&self, _job: &CilJob) -> Result<PolicyDb> {
        panic!("the extracted ramdisk always carries a monolithic policy");
    }

    fn apply_statement(&self, _db: &mut PolicyDb, _stmt: &Statement) -> Result<()> {
        Ok(())
    }

    fn export(&self, db: &PolicyDb) -> Result<Vec<u8>> {
        Ok(db.as_bytes().to_vec())
    }
}

#[derive(Default)]
struct RecordingHandoff {
    call: RefCell<Option<(PathBuf, Vec<OsString>)>>,
}

impl Handoff for RecordingHandoff {
    fn exec(&self, program: &Path, argv: &[OsString]) -> Result<()> {
        *self.call.borrow_mut() = Some((program.to_path_buf(), argv.to_vec()));
        Ok(())
    }
}

fn xz(data: &[u8]) -> Vec<u8> {
    let mut enc = XzEncoder::new(Vec::new(), 6);
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn policy_image() -> Vec<u8> {
    let mut raw = POLICYDB_MAGIC.to_le_bytes().to_vec();
    raw.extend_from_slice(b"policy-body\n");
    raw
}

fn stock_init_image() -> Vec<u8> {
    let mut raw = b"\x7fELF\x02\x01\x01\x00".to_vec();
    raw.extend_from_slice(&[0u8; 64]);
    raw.extend_from_slice(PLAT_CIL_PATTERN);
    raw.push(0);
    raw.extend_from_slice(&[0u8; 64]);
    raw
}

const INIT_RC: &str = "import /init.environ.rc\n\
import /init.usb.rc\n\
\n\
on early-init\n\
    start ueventd\n";

/// The ramdisk a stock boot image would carry, as archive entries.
fn stock_ramdisk() -> Vec<ArchiveEntry> {
    vec![
        ArchiveEntry::new_directory("sbin", 0o750),
        ArchiveEntry::new_directory("etc", 0o755),
        ArchiveEntry::new_file("init", 0o750, stock_init_image()),
        ArchiveEntry::new_file("init.rc", 0o750, INIT_RC.as_bytes().to_vec()),
        ArchiveEntry::new_file("sepolicy", 0o644, policy_image()),
        ArchiveEntry::new_symlink("charger", "/sbin/healthd"),
        // Names shielded by the wipe keep-list must not clobber the
        // preserved directories either
        ArchiveEntry::new_directory("overlay", 0o755),
        ArchiveEntry::new_file("overlay/from_archive.rc", 0o644, b"bogus\n".to_vec()),
    ]
}

/// Seed a root that currently runs the injected init, with leftovers the
/// wipe must remove and preserved directories it must keep.
fn seed_compressed_root(paths: &BootPaths, ramdisk: &[u8]) {
    let root = paths.root();
    fs::create_dir_all(root.join("proc")).unwrap();
    fs::write(
        paths.proc_cmdline(),
        "console=ttyMSM0 androidboot.hardware=qcom\n",
    )
    .unwrap();
    fs::write(paths.init(), b"currently running injected init").unwrap();
    fs::write(root.join("leftover.tmp"), b"stale state").unwrap();
    fs::create_dir(paths.overlay()).unwrap();
    fs::write(paths.overlay().join("custom.rc"), b"service adbd_custom /sbin/adbd\n").unwrap();
    fs::create_dir(root.join(".backup")).unwrap();
    fs::write(paths.preserved_init(), b"preserved stock init").unwrap();
    fs::write(paths.ramdisk_xz(), ramdisk).unwrap();

    // Stdio hardening must not steal this test process's descriptors: an
    // existing entry makes the device-node creation fail and the phase back
    // off, exactly as on a rootfs without mknod privilege.
    fs::write(paths.null(), b"").unwrap();
}

#[test]
fn test_compressed_ramdisk_boot_replaces_rootfs() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = BootPaths::new(tmp.path());
    seed_compressed_root(&paths, &xz(&archive::save(&stock_ramdisk())));

    let mounter = RecordingMounter::default();
    let handoff = RecordingHandoff::default();
    let mut ctx = BootContext::new(paths.clone(), &mounter, &PassthroughToolkit, &handoff);
    let argv = vec![OsString::from("/init")];
    ctx.run(&argv).unwrap();

    // The wipe removed the stale state and both archive files
    assert!(!tmp.path().join("leftover.tmp").exists());
    assert!(!paths.ramdisk_xz().exists());
    assert!(!paths.ramdisk_cpio().exists());

    // Preserved directories survived; the archive's own overlay entries
    // were shielded out, so the merge folded in only the real overlay
    assert_eq!(fs::read(paths.preserved_init()).unwrap(), b"preserved stock init");
    assert_eq!(
        fs::read(tmp.path().join("custom.rc")).unwrap(),
        b"service adbd_custom /sbin/adbd\n"
    );
    assert!(!paths.overlay().exists());
    assert!(!tmp.path().join("from_archive.rc").exists());

    // The extracted init got its split-policy path broken in place
    let init = fs::read(paths.init()).unwrap();
    assert_eq!(&init[..4], b"\x7fELF");
    assert!(!window_contains(&init, PLAT_CIL_PATTERN));
    let broken: Vec<u8> = PLAT_CIL_PATTERN
        .iter()
        .copied()
        .take(PLAT_CIL_PATTERN.len() - 3)
        .chain(*b"xxx")
        .collect();
    assert!(window_contains(&init, &broken));

    // Import hook lands after the existing imports
    let rc = fs::read_to_string(paths.init_rc()).unwrap();
    let lines: Vec<&str> = rc.lines().collect();
    assert_eq!(lines[0], "import /init.environ.rc");
    assert_eq!(lines[2], "import /init.magisk.rc");

    // Symlinks from the archive came through
    let charger = tmp.path().join("charger");
    assert!(charger.symlink_metadata().unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&charger).unwrap(), Path::new("/sbin/healthd"));

    // Passthrough toolkit: the committed policy is its source, unmodified
    assert_eq!(fs::read(paths.sepolicy()).unwrap(), policy_image());

    // Companion payloads
    let rc_meta = fs::metadata(paths.magisk_rc()).unwrap();
    assert_eq!(rc_meta.permissions().mode() & 0o7777, 0o750);
    assert_eq!(fs::read(paths.magisk_rc()).unwrap(), MAGISK_RC);
    let magisk = fs::read(paths.magisk_bin()).unwrap();
    let magisk_meta = fs::metadata(paths.magisk_bin()).unwrap();
    assert_eq!(magisk_meta.permissions().mode() & 0o7777, 0o755);
    assert_eq!(&magisk[..4], b"\x7fELF");
    assert!(!window_contains(&magisk, SOCKET_PLACEHOLDER));

    // The wipe took /init.bak with it, so no applet could be installed
    assert!(!paths.init_bak().exists());
    assert!(!paths.applet_install().exists());

    // Monolithic policy in the extracted ramdisk: no early mount, only the
    // cmdline read touched the mounter
    let calls = mounter.calls.borrow();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].starts_with("mount proc"));
    assert!(calls[1].starts_with("umount"));

    let call = handoff.call.borrow();
    let (program, handed_argv) = call.as_ref().unwrap();
    assert_eq!(program, &paths.init());
    assert_eq!(handed_argv, &argv);
}

#[test]
fn test_garbage_ramdisk_stream_aborts_before_wipe() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = BootPaths::new(tmp.path());
    seed_compressed_root(&paths, b"definitely not an xz stream");

    let mounter = RecordingMounter::default();
    let handoff = RecordingHandoff::default();
    let mut ctx = BootContext::new(paths.clone(), &mounter, &PassthroughToolkit, &handoff);
    assert!(ctx.run(&[OsString::from("/init")]).is_err());

    // Decode failed before anything was touched
    assert!(tmp.path().join("leftover.tmp").exists());
    assert_eq!(
        fs::read(paths.init()).unwrap(),
        b"currently running injected init"
    );
    assert!(handoff.call.borrow().is_none());
}

#[test]
fn test_truncated_ramdisk_stream_fails_archive_parse() {
    let tmp = tempfile::tempdir().unwrap();
    let paths = BootPaths::new(tmp.path());
    let full = xz(&archive::save(&stock_ramdisk()));
    // Deep truncation: the decoder accepts input exhaustion quietly, so the
    // failure must come from the archive parser instead
    seed_compressed_root(&paths, &full[..32]);

    let mounter = RecordingMounter::default();
    let handoff = RecordingHandoff::default();
    let mut ctx = BootContext::new(paths.clone(), &mounter, &PassthroughToolkit, &handoff);
    let err = ctx.run(&[OsString::from("/init")]).unwrap_err();
    assert!(matches!(err, Error::ArchiveTruncated(_)));

    // The partial decode landed on disk, the wipe never ran
    assert!(paths.ramdisk_cpio().exists());
    assert!(tmp.path().join("leftover.tmp").exists());
    assert!(handoff.call.borrow().is_none());
}

fn window_contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
