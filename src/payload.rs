//! Embedded companion payloads
//!
//! The companion executable ships inside this binary as an xz stream and the
//! boot script ships as plain text. Extraction recreates them on the rootfs
//! with the right ownership-independent modes, and the socket token embedded
//! in the executable is replaced with a fresh random value on every
//! extraction so the name never survives a reboot.

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use crate::compress::unxz_to;
use crate::config::{SOCKET_PLACEHOLDER, SOCKET_TOKEN_LEN};
use crate::error::{Error, Result};
use crate::patch::{map_rw, PatchPoint};

/// Compressed companion executable.
pub const MAGISK_XZ: &[u8] = include_bytes!("../assets/magisk.xz");

/// Boot script injected into the rootfs.
pub const MAGISK_RC: &[u8] = include_bytes!("../assets/magiskrc");

/// Decompress the embedded executable to `target` with the given mode.
///
/// A stale file at the target is removed first so the mode always comes from
/// this call rather than an earlier extraction.
pub fn extract_binary(target: &Path, mode: u32) -> Result<()> {
    if target.exists() {
        fs::remove_file(target).map_err(|e| Error::file(target, e))?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(target)
        .map_err(|e| Error::file(target, e))?;
    unxz_to(MAGISK_XZ, &mut file)?;
    debug!("extracted companion executable to {:?}", target);
    Ok(())
}

/// Write the embedded boot script to `target` with the given mode.
pub fn extract_script(target: &Path, mode: u32) -> Result<()> {
    if target.exists() {
        fs::remove_file(target).map_err(|e| Error::file(target, e))?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(target)
        .map_err(|e| Error::file(target, e))?;
    file.write_all(MAGISK_RC).map_err(|e| Error::file(target, e))?;
    debug!("extracted boot script to {:?}", target);
    Ok(())
}

/// Overwrite the socket token inside an extracted executable with a fresh
/// random value.
///
/// The placeholder offset is scanned once and cached in `cache`; later calls
/// against re-extracted copies reuse it, which is sound because every copy
/// comes from the same embedded image. The token length never changes, so
/// neither does the file length.
pub fn randomize_token(
    target: &Path,
    cache: &mut Option<PatchPoint<SOCKET_TOKEN_LEN>>,
) -> Result<()> {
    let mut map = map_rw(target)?;
    let point = match *cache {
        Some(point) => point,
        None => {
            let point = PatchPoint::locate(&map, SOCKET_PLACEHOLDER)
                .ok_or_else(|| Error::PatternNotFound(target.to_path_buf()))?;
            debug!("socket token found at offset {}", point.offset());
            *cache = Some(point);
            point
        }
    };
    let token = fresh_token();
    point.apply(&mut map, &token);
    map.flush().map_err(|e| Error::file(target, e))?;
    Ok(())
}

fn fresh_token() -> [u8; SOCKET_TOKEN_LEN] {
    let mut token = [0u8; SOCKET_TOKEN_LEN];
    let mut rng = rand::thread_rng();
    for byte in token.iter_mut() {
        *byte = rng.sample(Alphanumeric);
    }
    token
}
