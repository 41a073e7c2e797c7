//! SELinux policy resolution
//!
//! Exactly one of three sources produces the boot policy, tried in strict
//! order: a monolithic `/sepolicy`, the vendor-shipped precompiled split
//! policy (only when vendor and platform fingerprints agree), or a full CIL
//! compile from the split sources. The resolved image gets the fixed rule
//! table injected and is written back to the canonical path.
//!
//! Directory-order dependence is inherited behavior: the fingerprint files
//! and vendor CIL sources are taken in filesystem enumeration order, which
//! in practice holds a single file each.

pub mod statement;
pub mod toolkit;

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::{BootPaths, FINGERPRINT_EXT};
use crate::error::{Error, Result};

pub use statement::{magisk_rules, Statement};
pub use toolkit::{CilJob, HostToolkit, PolicyDb, PolicyToolkit, POLICYDB_MAGIC};

/// Which branch produced the policy image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySource {
    /// Monolithic policy file loaded directly
    Plain,
    /// Vendor precompiled split policy, fingerprints verified
    Precompiled,
    /// Compiled in-memory from CIL sources
    CompiledFromCil,
}

/// Resolve the boot policy from the first applicable source.
pub fn resolve(paths: &BootPaths, toolkit: &dyn PolicyToolkit) -> Result<(PolicySource, PolicyDb)> {
    let monolithic = paths.sepolicy();
    if readable(&monolithic) {
        debug!("loading monolithic policy {:?}", monolithic);
        let raw = fs::read(&monolithic).map_err(|e| Error::file(&monolithic, e))?;
        return Ok((PolicySource::Plain, toolkit.load_policy(raw)?));
    }

    let precompiled = paths.precompiled_policy();
    if readable(&precompiled) && fingerprints_match(paths) {
        debug!("loading precompiled policy {:?}", precompiled);
        let raw = fs::read(&precompiled).map_err(|e| Error::file(&precompiled, e))?;
        return Ok((PolicySource::Precompiled, toolkit.load_policy(raw)?));
    }

    let plat_cil = paths.plat_cil();
    if plat_cil.exists() {
        let job = assemble_cil_job(paths)?;
        debug!("compiling policy from {} CIL sources", job.sources.len());
        return Ok((PolicySource::CompiledFromCil, toolkit.compile_cil(&job)?));
    }

    Err(Error::NoPolicySource)
}

/// Inject the fixed rule table and write the image to the canonical policy
/// path. If the debug alias exists it is re-pointed at the fresh policy via
/// a hard link, so both names address byte-identical content.
pub fn commit(paths: &BootPaths, toolkit: &dyn PolicyToolkit, db: &mut PolicyDb) -> Result<()> {
    toolkit.inject_rules(db)?;
    let bytes = toolkit.export(db)?;
    let target = paths.sepolicy();
    fs::write(&target, &bytes).map_err(|e| Error::PolicyCommit(target.clone(), e))?;
    debug!("committed {} byte policy to {:?}", bytes.len(), target);

    let debug_alias = paths.sepolicy_debug();
    if debug_alias.exists() {
        fs::remove_file(&debug_alias).map_err(|e| Error::PolicyCommit(debug_alias.clone(), e))?;
        fs::hard_link(&target, &debug_alias)
            .map_err(|e| Error::PolicyCommit(debug_alias.clone(), e))?;
    }
    Ok(())
}

/// Compare the vendor and platform policy fingerprints.
///
/// Each side contributes the first enumeration-order file with the
/// fingerprint extension; the two texts must match exactly. A missing or
/// unreadable fingerprint on either side fails the check.
pub fn fingerprints_match(paths: &BootPaths) -> bool {
    let vendor = first_fingerprint(&paths.vendor_policy_dir());
    let platform = first_fingerprint(&paths.plat_policy_dir());
    match (vendor, platform) {
        (Some(v), Some(p)) => {
            let matched = v == p;
            if !matched {
                warn!("policy fingerprints differ, precompiled policy rejected");
            }
            matched
        }
        _ => {
            debug!("policy fingerprint missing on at least one side");
            false
        }
    }
}

fn first_fingerprint(dir: &Path) -> Option<String> {
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map_or(false, |e| e == FINGERPRINT_EXT) {
            return fs::read_to_string(&path).ok();
        }
    }
    None
}

fn assemble_cil_job(paths: &BootPaths) -> Result<CilJob> {
    let mut sources = vec![paths.plat_cil()];

    let version_file = paths.plat_version_file();
    let version = fs::read_to_string(&version_file).map_err(|e| Error::file(&version_file, e))?;
    sources.push(paths.plat_mapping(version.trim()));

    let vendor_dir = paths.vendor_policy_dir();
    let entries = fs::read_dir(&vendor_dir).map_err(|e| Error::file(&vendor_dir, e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map_or(false, |e| e == "cil") {
            sources.push(path);
        }
    }
    Ok(CilJob::new(sources))
}

fn readable(path: &Path) -> bool {
    fs::File::open(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn image() -> Vec<u8> {
        let mut raw = POLICYDB_MAGIC.to_le_bytes().to_vec();
        raw.extend_from_slice(b"policy body");
        raw
    }

    #[test]
    fn test_monolithic_branch_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BootPaths::new(tmp.path());
        fs::write(paths.sepolicy(), image()).unwrap();
        fs::create_dir_all(paths.vendor_policy_dir()).unwrap();
        fs::write(paths.precompiled_policy(), image()).unwrap();

        let (source, db) = resolve(&paths, &HostToolkit::default()).unwrap();
        assert_eq!(source, PolicySource::Plain);
        assert_eq!(db.as_bytes(), image());
    }

    #[test]
    fn test_no_source_at_all() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BootPaths::new(tmp.path());
        assert!(matches!(
            resolve(&paths, &HostToolkit::default()),
            Err(Error::NoPolicySource)
        ));
    }

    #[test]
    fn test_fingerprints_match_exact_text() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BootPaths::new(tmp.path());
        fs::create_dir_all(paths.vendor_policy_dir()).unwrap();
        fs::create_dir_all(paths.plat_policy_dir()).unwrap();
        fs::write(
            paths.vendor_policy_dir().join("precompiled_sepolicy.plat_and_mapping.sha256"),
            "abc123\n",
        )
        .unwrap();
        fs::write(
            paths.plat_policy_dir().join("plat_and_mapping_sepolicy.cil.sha256"),
            "abc123\n",
        )
        .unwrap();
        assert!(fingerprints_match(&paths));
    }

    #[test]
    fn test_fingerprints_differ() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BootPaths::new(tmp.path());
        fs::create_dir_all(paths.vendor_policy_dir()).unwrap();
        fs::create_dir_all(paths.plat_policy_dir()).unwrap();
        fs::write(paths.vendor_policy_dir().join("a.sha256"), "abc").unwrap();
        fs::write(paths.plat_policy_dir().join("b.sha256"), "def").unwrap();
        assert!(!fingerprints_match(&paths));
    }

    #[test]
    fn test_fingerprint_missing_side_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BootPaths::new(tmp.path());
        fs::create_dir_all(paths.vendor_policy_dir()).unwrap();
        fs::create_dir_all(paths.plat_policy_dir()).unwrap();
        fs::write(paths.vendor_policy_dir().join("a.sha256"), "abc").unwrap();
        assert!(!fingerprints_match(&paths));
    }

    #[test]
    fn test_cil_job_source_order() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BootPaths::new(tmp.path());
        fs::create_dir_all(paths.plat_cil().parent().unwrap()).unwrap();
        fs::create_dir_all(paths.vendor_policy_dir()).unwrap();
        fs::write(paths.plat_cil(), "(cil)").unwrap();
        fs::write(paths.plat_version_file(), "27.0\n").unwrap();
        fs::write(paths.vendor_policy_dir().join("nonplat_sepolicy.cil"), "(cil)").unwrap();

        let job = assemble_cil_job(&paths).unwrap();
        assert_eq!(job.sources[0], paths.plat_cil());
        assert_eq!(job.sources[1], paths.plat_mapping("27.0"));
        assert!(job
            .sources[2..]
            .iter()
            .any(|p| p.ends_with("nonplat_sepolicy.cil")));
        // The version file itself is not a CIL source
        assert!(job.sources.iter().all(|p| p.extension().unwrap() == "cil"));
    }

    #[test]
    fn test_commit_repoints_debug_alias() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BootPaths::new(tmp.path());
        fs::write(paths.sepolicy_debug(), b"stale").unwrap();

        let mut db = PolicyDb::from_image(image()).unwrap();
        commit(&paths, &NoopToolkit, &mut db).unwrap();

        let canonical = fs::read(paths.sepolicy()).unwrap();
        let alias = fs::read(paths.sepolicy_debug()).unwrap();
        assert_eq!(canonical, alias);
        assert_eq!(canonical, image());
    }

    #[test]
    fn test_commit_without_debug_alias() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BootPaths::new(tmp.path());

        let mut db = PolicyDb::from_image(image()).unwrap();
        commit(&paths, &NoopToolkit, &mut db).unwrap();

        assert!(paths.sepolicy().exists());
        assert!(!paths.sepolicy_debug().exists());
    }

    struct NoopToolkit;

    impl PolicyToolkit for NoopToolkit {
        fn load_policy(&self, raw: Vec<u8>) -> crate::error::Result<PolicyDb> {
            PolicyDb::from_image(raw)
        }
        fn compile_cil(&self, _job: &CilJob) -> crate::error::Result<PolicyDb> {
            unreachable!("not exercised")
        }
        fn apply_statement(
            &self,
            _db: &mut PolicyDb,
            _stmt: &Statement,
        ) -> crate::error::Result<()> {
            Ok(())
        }
        fn export(&self, db: &PolicyDb) -> crate::error::Result<Vec<u8>> {
            Ok(db.as_bytes().to_vec())
        }
    }
}
