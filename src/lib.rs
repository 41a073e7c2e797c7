//! # magiskinit - Pre-Init Boot Environment Setup
//!
//! `magiskinit-rs` replaces `/init` inside an Android boot image and rebuilds
//! the early boot environment before handing control back to the real init:
//!
//! - **Boot-mode detection** from the kernel command line (A/B slot suffix,
//!   system-as-root)
//! - **Rootfs population**: destructive wipe, compressed-ramdisk unpacking,
//!   or reverting to the preserved original init
//! - **SELinux policy setup**: monolithic, vendor-precompiled or
//!   CIL-compiled sources, extended with the rules the companion needs
//! - **Payload installation**: embedded companion executable and boot
//!   script, with a freshly randomized socket token every boot
//!
//! The same executable doubles as the `magiskpolicy`/`supolicy` applet when
//! invoked through a link, and hands out its embedded payloads via `-x`.
//!
//! ## Quick Start
//!
//! ```rust
//! use magiskinit::CmdlineInfo;
//!
//! let info = CmdlineInfo::parse("console=ttyMSM0 androidboot.slot=a skip_initramfs");
//! assert!(info.skip_initramfs);
//! assert_eq!(info.slot_suffix, "_a");
//! ```
//!
//! The full boot sequence only makes sense as pid 1, but every phase runs
//! against an overridable filesystem root:
//!
//! ```rust,no_run
//! use magiskinit::{BootContext, BootPaths, ExecHandoff, SysMounter};
//! use magiskinit::sepolicy::HostToolkit;
//! use std::env;
//!
//! # fn main() -> magiskinit::Result<()> {
//! let argv: Vec<_> = env::args_os().collect();
//! let mounter = SysMounter;
//! let toolkit = HostToolkit::default();
//! let handoff = ExecHandoff;
//! let mut ctx = BootContext::new(BootPaths::default(), &mounter, &toolkit, &handoff);
//! ctx.run(&argv)?;
//! # Ok(())
//! # }
//! ```

pub mod applet;
pub mod archive;
pub mod boot;
pub mod cmdline;
pub mod compress;
pub mod config;
pub mod device;
pub mod error;
pub mod mount;
pub mod patch;
pub mod payload;
pub mod rootfs;
pub mod sepolicy;

pub use crate::applet::{Invocation, Payload};
pub use crate::archive::ArchiveEntry;
pub use crate::boot::{BootContext, ExecHandoff, Handoff};
pub use crate::cmdline::CmdlineInfo;
pub use crate::config::BootPaths;
pub use crate::device::DeviceInfo;
pub use crate::error::{Error, Result};
pub use crate::mount::{Mounter, SysMounter};
pub use crate::patch::PatchPoint;
pub use crate::sepolicy::{PolicySource, PolicyToolkit, Statement};
