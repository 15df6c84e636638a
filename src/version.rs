//! Version resolution for items
//!
//! An item's version is the dash-joined concatenation of, in order, its
//! explicit `version_string`, the SHA-1 of its `version_hashable` file, and
//! the trimmed output of its `version_command`, whichever are configured.
//! The order is part of the cache key and must not change.

use crate::config::schema::is_valid_version_token;
use crate::config::ItemConfig;
use crate::error::{InstacloneError, InstacloneResult};
use crate::shell;
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// SHA-1 hex digest of a file, streamed in fixed-size blocks
pub fn file_sha1(path: &Path) -> InstacloneResult<String> {
    let mut file = File::open(path)
        .map_err(|e| InstacloneError::io(format!("opening {} for hashing", path.display()), e))?;

    let mut hasher = Sha1::new();
    let mut block = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let n = file
            .read(&mut block)
            .map_err(|e| {
                InstacloneError::io(format!("reading {} for hashing", path.display()), e)
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Resolve the version string for an item
pub fn resolve(config: &ItemConfig) -> InstacloneResult<String> {
    let mut bits = vec![];

    if let Some(ref version) = config.version_string {
        bits.push(version.clone());
    }

    if let Some(ref hashable) = config.version_hashable {
        debug!("Computing sha1 of: {}", hashable.display());
        bits.push(file_sha1(hashable)?);
    }

    if let Some(ref command) = config.version_command {
        debug!("Version command: {}", command);
        let argv = shell::expand_to_argv(command, &shell::env_with(&[]))?;
        let output = shell::output(&argv)?;
        let output = output.trim();
        if !is_valid_version_token(output) {
            return Err(InstacloneError::VersionOutputInvalid(output.to_string()));
        }
        bits.push(output.to_string());
    }

    if bits.is_empty() {
        return Err(InstacloneError::VersionMissing(config.name.clone()));
    }

    let version = bits.join("-");
    debug!("Version of {}: {}", config.name, version);
    Ok(version)
}
