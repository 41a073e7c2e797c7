//! Policy toolkit seam
//!
//! Loading, compiling, mutating and serializing binary SELinux policies is
//! delegated through [`PolicyToolkit`]. The boot sequence only decides
//! *which* of these operations happen and in what order; the heavy lifting
//! lives behind this trait. [`HostToolkit`] drives the platform `secilc`
//! and `magiskpolicy` tools; tests substitute recording implementations.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, trace};

use crate::config::POLICY_VERSION;
use crate::error::{Error, Result};
use crate::sepolicy::statement::{magisk_rules, Statement};

/// First word of every kernel binary policy, little-endian
pub const POLICYDB_MAGIC: u32 = 0xf97c_ff8c;

/// An in-memory binary policy image.
///
/// The container format is opaque to the boot sequence; validation stops at
/// the leading magic, which is enough to reject text files, truncated
/// downloads, and policies written for the wrong byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDb {
    image: Vec<u8>,
}

impl PolicyDb {
    /// Wrap a binary image, validating the policy magic.
    pub fn from_image(image: Vec<u8>) -> Result<PolicyDb> {
        if image.len() < 4 {
            return Err(Error::PolicyMagic(0));
        }
        let magic = u32::from_le_bytes([image[0], image[1], image[2], image[3]]);
        if magic != POLICYDB_MAGIC {
            return Err(Error::PolicyMagic(magic));
        }
        Ok(PolicyDb { image })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.image
    }

    pub fn len(&self) -> usize {
        self.image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    /// Swap in a new image, e.g. after an external tool rewrote the policy.
    /// The caller vouches for the content; no re-validation happens here.
    pub fn replace_image(&mut self, image: Vec<u8>) {
        self.image = image;
    }
}

/// A CIL compile request: fixed compiler configuration plus the ordered
/// source list (platform CIL, version mapping, vendor CIL files).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CilJob {
    /// Multi-level security enabled
    pub mls: bool,
    /// Multiple top-level declarations permitted
    pub multiple_decls: bool,
    /// Neverallow assertions disabled
    pub disable_neverallow: bool,
    /// Target platform
    pub target: &'static str,
    /// Binary policy version to emit
    pub policy_version: u32,
    /// Expand and strip attributes (always off here)
    pub expand_attributes: bool,
    /// Sources in feed order
    pub sources: Vec<PathBuf>,
}

impl CilJob {
    /// A job with the fixed boot-time configuration over `sources`.
    pub fn new(sources: Vec<PathBuf>) -> CilJob {
        CilJob {
            mls: true,
            multiple_decls: true,
            disable_neverallow: true,
            target: "selinux",
            policy_version: POLICY_VERSION,
            expand_attributes: false,
            sources,
        }
    }
}

/// Operations the boot sequence needs from the policy implementation.
///
/// `inject_rules` has a default body that applies the fixed rule table one
/// statement at a time, so a toolkit only has to know how to apply a single
/// statement; implementations with a cheaper batch path can override it.
pub trait PolicyToolkit {
    /// Validate and take ownership of a binary policy image.
    fn load_policy(&self, raw: Vec<u8>) -> Result<PolicyDb>;

    /// Compile CIL sources into a binary policy image.
    fn compile_cil(&self, job: &CilJob) -> Result<PolicyDb>;

    /// Apply one statement to a loaded policy.
    fn apply_statement(&self, db: &mut PolicyDb, stmt: &Statement) -> Result<()>;

    /// Serialize the policy image for writing.
    fn export(&self, db: &PolicyDb) -> Result<Vec<u8>>;

    /// Apply the fixed domain rule table.
    fn inject_rules(&self, db: &mut PolicyDb) -> Result<()> {
        for stmt in magisk_rules() {
            self.apply_statement(db, &stmt)?;
        }
        Ok(())
    }
}

/// [`PolicyToolkit`] backed by the platform policy tools.
///
/// `secilc` performs CIL compilation; `magiskpolicy` applies statements to
/// binary images. On a deployed ramdisk both are present as applets of this
/// very binary's install location.
#[derive(Debug, Clone)]
pub struct HostToolkit {
    secilc: PathBuf,
    magiskpolicy: PathBuf,
}

impl HostToolkit {
    pub fn new(secilc: impl Into<PathBuf>, magiskpolicy: impl Into<PathBuf>) -> HostToolkit {
        HostToolkit {
            secilc: secilc.into(),
            magiskpolicy: magiskpolicy.into(),
        }
    }

    /// Round-trip the image through `magiskpolicy --load/--save` applying
    /// `statements` in order.
    fn run_policy_tool(&self, db: &mut PolicyDb, statements: &[Statement]) -> Result<()> {
        let scratch = std::env::temp_dir();
        let load = scratch.join(format!("sepolicy.in.{}", std::process::id()));
        let save = scratch.join(format!("sepolicy.out.{}", std::process::id()));
        fs::write(&load, db.as_bytes()).map_err(|e| Error::file(&load, e))?;

        let mut cmd = Command::new(&self.magiskpolicy);
        cmd.arg("--load").arg(&load).arg("--save").arg(&save);
        for stmt in statements {
            cmd.arg(stmt.to_string());
        }
        trace!("running {:?}", cmd);
        let output = cmd
            .output()
            .map_err(|e| Error::PolicyRules(format!("cannot run {:?}: {}", self.magiskpolicy, e)))?;
        let _ = fs::remove_file(&load);
        if !output.status.success() {
            let _ = fs::remove_file(&save);
            return Err(Error::PolicyRules(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let raw = fs::read(&save).map_err(|e| Error::file(&save, e))?;
        let _ = fs::remove_file(&save);
        db.replace_image(PolicyDb::from_image(raw)?.into_bytes());
        Ok(())
    }
}

impl Default for HostToolkit {
    fn default() -> Self {
        HostToolkit::new("secilc", "magiskpolicy")
    }
}

impl PolicyToolkit for HostToolkit {
    fn load_policy(&self, raw: Vec<u8>) -> Result<PolicyDb> {
        PolicyDb::from_image(raw)
    }

    fn compile_cil(&self, job: &CilJob) -> Result<PolicyDb> {
        let out = std::env::temp_dir().join(format!("sepolicy.cil.{}", std::process::id()));
        let mut cmd = Command::new(&self.secilc);
        cmd.arg("-M").arg(if job.mls { "true" } else { "false" });
        if job.multiple_decls {
            cmd.arg("-m");
        }
        if job.disable_neverallow {
            cmd.arg("-N");
        }
        cmd.arg("-t").arg(job.target);
        cmd.arg("-c").arg(job.policy_version.to_string());
        if job.expand_attributes {
            cmd.arg("-G");
        }
        cmd.arg("-f").arg("/dev/null");
        cmd.arg("-o").arg(&out);
        cmd.args(&job.sources);
        debug!("compiling {} CIL sources", job.sources.len());
        trace!("running {:?}", cmd);

        let output = cmd
            .output()
            .map_err(|e| Error::PolicyCompile(format!("cannot run {:?}: {}", self.secilc, e)))?;
        if !output.status.success() {
            let _ = fs::remove_file(&out);
            return Err(Error::PolicyCompile(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let raw = fs::read(&out).map_err(|e| Error::file(&out, e))?;
        let _ = fs::remove_file(&out);
        PolicyDb::from_image(raw)
    }

    fn apply_statement(&self, db: &mut PolicyDb, stmt: &Statement) -> Result<()> {
        self.run_policy_tool(db, std::slice::from_ref(stmt))
    }

    fn export(&self, db: &PolicyDb) -> Result<Vec<u8>> {
        Ok(db.as_bytes().to_vec())
    }

    fn inject_rules(&self, db: &mut PolicyDb) -> Result<()> {
        self.run_policy_tool(db, &magisk_rules())
    }
}
