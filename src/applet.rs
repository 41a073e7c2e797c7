//! Invocation dispatch and the policy applet
//!
//! The same executable answers to several names. Linked in as
//! `magiskpolicy` or `supolicy` it becomes a policy editing tool; invoked
//! with `-x` it hands out one of its embedded payloads; anything else is a
//! real boot.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{BootPaths, INIT_APPLETS};
use crate::error::{Error, Result};
use crate::payload;
use crate::sepolicy::{PolicyToolkit, Statement};

/// Embedded payload selectable through the extraction invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// The compressed companion executable
    Magisk,
    /// The boot script template
    MagiskRc,
}

/// What an invocation asks for, decided from the argument vector alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// argv\[0\] was one of the applet names: act as the policy tool
    Policy,
    /// `-x <payload> <path>`: materialize an embedded payload and exit
    Extract(Payload, PathBuf),
    /// Anything else: run the boot sequence
    Boot,
}

impl Invocation {
    /// Classify an argument vector.
    ///
    /// The applet match is on the basename of argv\[0\], so both direct
    /// invocation and links from arbitrary directories dispatch the same
    /// way. Malformed extraction requests fall through to the boot path
    /// like any other unrecognized arguments.
    pub fn from_argv(argv: &[OsString]) -> Invocation {
        if let Some(argv0) = argv.first() {
            if let Some(name) = Path::new(argv0).file_name() {
                if INIT_APPLETS.iter().any(|applet| name == *applet) {
                    return Invocation::Policy;
                }
            }
        }
        if argv.len() >= 4 && argv[1] == "-x" {
            let target = PathBuf::from(&argv[3]);
            if argv[2] == "magisk" {
                return Invocation::Extract(Payload::Magisk, target);
            }
            if argv[2] == "magiskrc" {
                return Invocation::Extract(Payload::MagiskRc, target);
            }
        }
        Invocation::Boot
    }
}

/// Materialize one embedded payload at `target`. Extraction installs
/// executable copies for repacking tools, so both payloads get mode 0755.
pub fn extract_payload(kind: Payload, target: &Path) -> Result<()> {
    match kind {
        Payload::Magisk => payload::extract_binary(target, 0o755),
        Payload::MagiskRc => payload::extract_script(target, 0o755),
    }
}

/// Entry point of the policy applet.
///
/// `args` excludes the applet name. Recognized flags: `--load <file>`
/// (default: the canonical policy path), `--save <file>`, `--magisk` (apply
/// the fixed rule table); every other argument is parsed as one policy
/// statement and applied in order. Without `--save` the edits are discarded
/// after validation, which doubles as a dry run.
pub fn policy_main(
    paths: &BootPaths,
    toolkit: &dyn PolicyToolkit,
    args: &[OsString],
) -> Result<()> {
    let mut load: Option<PathBuf> = None;
    let mut save: Option<PathBuf> = None;
    let mut apply_fixed = false;
    let mut statements = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--load" {
            let value = iter
                .next()
                .ok_or(Error::Usage("--load requires a file argument"))?;
            load = Some(PathBuf::from(value));
        } else if arg == "--save" {
            let value = iter
                .next()
                .ok_or(Error::Usage("--save requires a file argument"))?;
            save = Some(PathBuf::from(value));
        } else if arg == "--magisk" {
            apply_fixed = true;
        } else {
            let text = arg
                .to_str()
                .ok_or(Error::Usage("policy statements must be UTF-8"))?;
            statements.push(Statement::parse(text)?);
        }
    }

    let input = load.unwrap_or_else(|| paths.sepolicy());
    let raw = fs::read(&input).map_err(|e| Error::file(&input, e))?;
    let mut db = toolkit.load_policy(raw)?;

    if apply_fixed {
        toolkit.inject_rules(&mut db)?;
    }
    for statement in &statements {
        toolkit.apply_statement(&mut db, statement)?;
    }

    if let Some(out) = save {
        let bytes = toolkit.export(&db)?;
        fs::write(&out, bytes).map_err(|e| Error::file(&out, e))?;
    }
    Ok(())
}
