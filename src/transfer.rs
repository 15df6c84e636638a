//! Moving files to and from the remote store
//!
//! instaclone has no transport of its own. Each item names an upload and a
//! download command template; the adapter fills in `$LOCAL` and `$REMOTE`
//! and runs it. A nonzero exit is reported as a transfer failure.

use crate::config::ItemConfig;
use crate::error::InstacloneResult;
use crate::fsutil;
use crate::shell;
use std::path::Path;
use tracing::info;

/// Upload and download of single files
pub trait TransferAdapter {
    /// Copy the local file `local` to the remote location `remote`
    fn upload(&self, item: &ItemConfig, local: &Path, remote: &str) -> InstacloneResult<()>;

    /// Copy the remote file `remote` to `local`, creating parent directories.
    ///
    /// `local` must not be left half-written if the transfer fails.
    fn download(&self, item: &ItemConfig, remote: &str, local: &Path) -> InstacloneResult<()>;
}

/// Runs the item's configured shell command templates
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellTransfer;

impl ShellTransfer {
    fn run_template(template: &str, local: &Path, remote: &str) -> InstacloneResult<()> {
        let local = local.to_string_lossy();
        let vars = shell::env_with(&[("LOCAL", local.as_ref()), ("REMOTE", remote)]);
        let argv = shell::expand_to_argv(template, &vars)?;
        shell::run(&argv)
    }
}

impl TransferAdapter for ShellTransfer {
    fn upload(&self, item: &ItemConfig, local: &Path, remote: &str) -> InstacloneResult<()> {
        info!("Uploading: {} -> {}", local.display(), remote);
        Self::run_template(&item.upload_command, local, remote)
    }

    fn download(&self, item: &ItemConfig, remote: &str, local: &Path) -> InstacloneResult<()> {
        info!("Downloading: {} -> {}", remote, local.display());
        fsutil::atomic_output(local, true, None, |tmp| {
            Self::run_template(&item.download_command, tmp, remote)
        })
    }
}
