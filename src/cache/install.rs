//! Installing cache entries into the working tree
//!
//! Every install first clears the target according to the caller's policy,
//! then hands off to the strategy for the item's install method.

use crate::config::InstallMethod;
use crate::error::{InstacloneError, InstacloneResult};
use crate::fsutil::{self, BACKUP_SUFFIX};
use crate::shell;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// One way of turning a cache entry into a working-tree artifact
pub trait InstallStrategy {
    /// The install method this strategy implements
    fn method(&self) -> InstallMethod;

    /// Refuse entries this strategy cannot install, before the target is touched
    fn check(&self, _cache_path: &Path) -> InstacloneResult<()> {
        Ok(())
    }

    /// Create `target` from `cache_path`. Nothing exists at `target`.
    fn install(&self, cache_path: &Path, target: &Path) -> InstacloneResult<()>;
}

/// Link the target to the cache entry
pub struct SymlinkInstall;

/// Hard-link a cached file
pub struct HardlinkInstall;

/// Make an owner-writable copy
pub struct CopyInstall;

/// Copy directories with rsync when it is available
pub struct FastCopyInstall {
    program: String,
}

/// Strategy for an install method
pub fn strategy_for(method: InstallMethod) -> Box<dyn InstallStrategy> {
    match method {
        InstallMethod::Symlink => Box::new(SymlinkInstall),
        InstallMethod::Hardlink => Box::new(HardlinkInstall),
        InstallMethod::Copy => Box::new(CopyInstall),
        InstallMethod::Fastcopy => Box::new(FastCopyInstall::default()),
    }
}

impl InstallStrategy for SymlinkInstall {
    fn method(&self) -> InstallMethod {
        InstallMethod::Symlink
    }

    fn install(&self, cache_path: &Path, target: &Path) -> InstacloneResult<()> {
        make_symlink(cache_path, target).map_err(|e| {
            InstacloneError::io(
                format!("linking {} to {}", target.display(), cache_path.display()),
                e,
            )
        })
    }
}

#[cfg(unix)]
fn make_symlink(source: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, link)
}

#[cfg(windows)]
fn make_symlink(source: &Path, link: &Path) -> std::io::Result<()> {
    if source.is_dir() {
        std::os::windows::fs::symlink_dir(source, link)
    } else {
        std::os::windows::fs::symlink_file(source, link)
    }
}

impl InstallStrategy for HardlinkInstall {
    fn method(&self) -> InstallMethod {
        InstallMethod::Hardlink
    }

    fn check(&self, cache_path: &Path) -> InstacloneResult<()> {
        if cache_path.is_dir() {
            return Err(InstacloneError::HardlinkDirectory(cache_path.to_path_buf()));
        }
        Ok(())
    }

    fn install(&self, cache_path: &Path, target: &Path) -> InstacloneResult<()> {
        fs::hard_link(cache_path, target).map_err(|e| {
            InstacloneError::io(
                format!("hard-linking {} to {}", target.display(), cache_path.display()),
                e,
            )
        })
    }
}

impl InstallStrategy for CopyInstall {
    fn method(&self) -> InstallMethod {
        InstallMethod::Copy
    }

    fn install(&self, cache_path: &Path, target: &Path) -> InstacloneResult<()> {
        fsutil::copy_tree_atomic(cache_path, target)
    }
}

/// Whether an `rsync` binary can be run, probed once per process
pub fn rsync_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        let found = Command::new("rsync")
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        debug!("rsync available: {}", found);
        found
    })
}

const RSYNC: &str = "rsync";

impl Default for FastCopyInstall {
    fn default() -> Self {
        Self::with_program(RSYNC)
    }
}

impl FastCopyInstall {
    /// Use `program` in place of rsync; it is called with rsync's arguments
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn available(&self) -> bool {
        self.program != RSYNC || rsync_available()
    }

    fn rsync_dir(&self, source: &Path, target: &Path) -> InstacloneResult<()> {
        let mut source = source.to_string_lossy().trim_end_matches('/').to_string();
        source.push('/');
        let argv = vec![
            self.program.clone(),
            "-a".to_string(),
            "--delete".to_string(),
            "--chmod=u+w".to_string(),
            source,
            target.to_string_lossy().to_string(),
        ];
        shell::run(&argv)
    }
}

impl InstallStrategy for FastCopyInstall {
    fn method(&self) -> InstallMethod {
        InstallMethod::Fastcopy
    }

    fn install(&self, cache_path: &Path, target: &Path) -> InstacloneResult<()> {
        if cache_path.is_dir() && self.available() {
            info!("Using {} for faster copy", self.program);
            let synced =
                fsutil::atomic_output(target, false, None, |tmp| self.rsync_dir(cache_path, tmp));
            match synced {
                Ok(()) => return Ok(()),
                // Only a failing tool falls back to a plain copy
                Err(
                    e @ (InstacloneError::CommandExit { .. }
                    | InstacloneError::CommandFailed { .. }),
                ) => warn!("{} failed ({}), copying instead", self.program, e),
                Err(e) => return Err(e),
            }
        }
        fsutil::copy_tree_atomic(cache_path, target)
    }
}

/// Get whatever is at `target` out of the way.
///
/// Symlinks are always removed; they are most likely a previous install.
fn clear_target(target: &Path, force: bool, backup: bool) -> InstacloneResult<()> {
    if fsutil::is_symlink(target) {
        debug!("Removing previous link: {}", target.display());
        fs::remove_file(target)
            .map_err(|e| InstacloneError::io(format!("removing link {}", target.display()), e))?;
        return Ok(());
    }
    if !fsutil::lexists(target) {
        return Ok(());
    }
    match (force, backup) {
        (false, _) => Err(InstacloneError::TargetExists(target.to_path_buf())),
        (true, true) => fsutil::move_to_backup(target, BACKUP_SUFFIX),
        (true, false) => {
            debug!("Removing previous target: {}", target.display());
            fsutil::remove_any(target, false)
        }
    }
}

/// Install a cache entry at `target` using `method`.
///
/// With `force`, an existing target is replaced, or moved to `<target>.bak`
/// when `backup` is also set. Without it, an existing target is an error.
pub fn install_from_cache(
    cache_path: &Path,
    target: &Path,
    method: InstallMethod,
    force: bool,
    backup: bool,
) -> InstacloneResult<()> {
    if !fsutil::lexists(cache_path) {
        return Err(InstacloneError::CacheEntryMissing(cache_path.to_path_buf()));
    }

    let strategy = strategy_for(method);
    debug!("Using install method {}", strategy.method());
    strategy.check(cache_path)?;

    clear_target(target, force, backup)?;
    fsutil::make_parent_dirs(target)?;
    strategy.install(cache_path, target)
}
