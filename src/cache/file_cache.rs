//! The local file cache
//!
//! Publishing stores an item in the cache and uploads it; installing
//! downloads it into the cache unless it is already there. Either way the
//! working-tree copy is then installed from the cache entry.
//!
//! # Layout
//!
//! ```text
//! <root>/version
//! <root>/contents/<sanitized prefix>/<remote_path>/<name>.$<version>$/<basename>[.tar.gz]
//! ```
//!
//! Entries are read-only once stored. Directories are kept unpacked; their
//! archives only exist in the cache while being transferred.

use crate::archive::{ArchiveCodec, TarGzCodec};
use crate::cache::address;
use crate::cache::install::install_from_cache;
use crate::config::{InstallMethod, ItemConfig};
use crate::error::{InstacloneError, InstacloneResult};
use crate::fsutil;
use crate::transfer::{ShellTransfer, TransferAdapter};
use std::cell::Cell;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Format version written to the cache marker file
pub const CACHE_FORMAT_VERSION: &str = "1";

/// A content-addressed cache of published items
pub struct FileCache<T: TransferAdapter = ShellTransfer> {
    root: PathBuf,
    contents: PathBuf,
    version_path: PathBuf,
    transfer: T,
    setup_done: Cell<bool>,
}

impl FileCache<ShellTransfer> {
    /// A cache at `root` that transfers with each item's shell commands
    pub fn new(root: PathBuf) -> Self {
        Self::with_transfer(root, ShellTransfer)
    }
}

impl<T: TransferAdapter> FileCache<T> {
    pub fn with_transfer(root: PathBuf, transfer: T) -> Self {
        Self {
            contents: root.join("contents"),
            version_path: root.join("version"),
            root,
            transfer,
            setup_done: Cell::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    /// Initialize the cache on first use, or check an existing one
    pub fn setup(&self) -> InstacloneResult<()> {
        if self.setup_done.get() {
            return Ok(());
        }

        if fsutil::lexists(&self.version_path) {
            let found = fs::read_to_string(&self.version_path).map_err(|e| {
                InstacloneError::io(format!("reading {}", self.version_path.display()), e)
            })?;
            let found = found.trim();
            if found != CACHE_FORMAT_VERSION {
                return Err(InstacloneError::CacheFormat {
                    path: self.version_path.clone(),
                    found: found.to_string(),
                    expected: CACHE_FORMAT_VERSION.to_string(),
                });
            }
            info!("Using cache: {}", self.root.display());
        } else {
            info!("Initializing new cache: {}", self.root.display());
            fsutil::make_all_dirs(&self.contents)?;
            fsutil::write_string_to_file(&self.version_path, &format!("{CACHE_FORMAT_VERSION}\n"))?;
        }

        self.setup_done.set(true);
        Ok(())
    }

    pub fn cache_path(&self, config: &ItemConfig, version: &str, suffix: &str) -> PathBuf {
        address::cache_path(&self.contents, config, version, suffix)
    }

    pub fn remote_loc(&self, config: &ItemConfig, version: &str, suffix: &str) -> String {
        address::remote_loc(config, version, suffix)
    }

    fn codec(config: &ItemConfig) -> TarGzCodec {
        TarGzCodec::new(config.external_symlinks)
    }

    /// Store `config.local_path` in the cache, upload it, and reinstall it
    /// from the cache.
    ///
    /// The cache entry is only writable while this runs.
    pub fn publish(&self, config: &ItemConfig, version: &str, force: bool) -> InstacloneResult<()> {
        info!("Publishing {} ({})", config.name, version);
        let cached_path = self.cache_path(config, version, "");
        if fsutil::lexists(&cached_path) {
            fsutil::make_writable(&cached_path)?;
        }

        let result = self.publish_writable(config, version, force);

        if fsutil::lexists(&cached_path) {
            if let Err(e) = fsutil::make_readonly(&cached_path) {
                if result.is_ok() {
                    return Err(e);
                }
                warn!("Could not make {} read-only: {}", cached_path.display(), e);
            }
        }
        result
    }

    fn publish_writable(
        &self,
        config: &ItemConfig,
        version: &str,
        force: bool,
    ) -> InstacloneResult<()> {
        let local_path = &config.local_path;
        if fsutil::is_symlink(local_path) {
            return Err(InstacloneError::PublishSymlink(local_path.clone()));
        }

        self.setup()?;

        let metadata = match fs::metadata(local_path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(InstacloneError::PathNotFound(local_path.clone()))
            }
            Err(e) => {
                return Err(InstacloneError::io(
                    format!("reading metadata of {}", local_path.display()),
                    e,
                ))
            }
        };

        if metadata.is_dir() {
            self.publish_dir(config, version, force)
        } else if metadata.is_file() {
            self.publish_file(config, version, force)
        } else {
            Err(InstacloneError::UnsupportedFileType(local_path.clone()))
        }
    }

    fn publish_dir(&self, config: &ItemConfig, version: &str, force: bool) -> InstacloneResult<()> {
        let local_path = &config.local_path;
        if config.install_method == InstallMethod::Hardlink {
            return Err(InstacloneError::HardlinkDirectory(local_path.clone()));
        }

        let codec = Self::codec(config);
        let cached_path = self.cache_path(config, version, "");
        let cached_archive = self.cache_path(config, version, codec.suffix());
        let remote_loc = self.remote_loc(config, version, codec.suffix());

        // Refuse before packing so a conflicting publish never reaches the remote
        if !force && fsutil::lexists(&cached_path) {
            return Err(InstacloneError::TargetExists(cached_path));
        }
        if fsutil::lexists(&cached_archive) {
            if !force {
                return Err(InstacloneError::ArchiveExists(cached_archive));
            }
            info!("Deleting previous archive: {}", cached_archive.display());
            fsutil::remove_any(&cached_archive, false)?;
        }
        debug!("Installing to cache: {} -> {}", local_path.display(), cached_path.display());
        fsutil::atomic_output(&cached_archive, true, None, |tmp| codec.pack(local_path, tmp))?;

        // Unpack what was uploaded, so the publisher ends up with exactly what
        // a later install would produce.
        let stored = self
            .transfer
            .upload(config, &cached_archive, &remote_loc)
            .and_then(|()| self.unpack_into_cache(&codec, &cached_archive, &cached_path, force));
        if let Err(e) = stored {
            if fsutil::lexists(&cached_archive) {
                debug!("Removing staged archive: {}", cached_archive.display());
                if let Err(cleanup) = fsutil::remove_any(&cached_archive, false) {
                    warn!("Could not remove {}: {}", cached_archive.display(), cleanup);
                }
            }
            return Err(e);
        }
        info!("Installed to cache: {} -> {}", local_path.display(), cached_path.display());

        install_from_cache(&cached_path, local_path, config.install_method, true, true)?;
        info!("Published archive: {}", remote_loc);
        Ok(())
    }

    fn publish_file(
        &self,
        config: &ItemConfig,
        version: &str,
        force: bool,
    ) -> InstacloneResult<()> {
        let local_path = &config.local_path;
        let cached_path = self.cache_path(config, version, "");
        let remote_loc = self.remote_loc(config, version, "");

        if fsutil::lexists(&cached_path) {
            if !force {
                return Err(InstacloneError::EntryExists(cached_path));
            }
            info!("Deleting previous cache entry: {}", cached_path.display());
            fsutil::remove_any(&cached_path, false)?;
        }

        debug!("Installing to cache: {} -> {}", local_path.display(), cached_path.display());
        fsutil::move_file(local_path, &cached_path)?;

        if let Err(e) = self.transfer.upload(config, &cached_path, &remote_loc) {
            debug!("Upload failed, restoring {}", local_path.display());
            if let Err(restore) = fsutil::move_file(&cached_path, local_path) {
                warn!(
                    "Could not restore {} from {}: {}",
                    local_path.display(),
                    cached_path.display(),
                    restore
                );
            }
            return Err(e);
        }
        info!("Installed to cache: {} -> {}", local_path.display(), cached_path.display());

        install_from_cache(&cached_path, local_path, config.install_method, false, false)?;
        info!("Published file: {}", remote_loc);
        Ok(())
    }

    fn unpack_into_cache(
        &self,
        codec: &dyn ArchiveCodec,
        archive: &Path,
        cached_path: &Path,
        force: bool,
    ) -> InstacloneResult<()> {
        if fsutil::lexists(cached_path) {
            if !force {
                return Err(InstacloneError::TargetExists(cached_path.to_path_buf()));
            }
            info!("Deleting previous dir: {}", cached_path.display());
            fsutil::remove_any(cached_path, false)?;
        }
        fsutil::atomic_output(cached_path, true, None, |tmp| codec.unpack(archive, tmp))?;
        fs::remove_file(archive)
            .map_err(|e| InstacloneError::io(format!("removing {}", archive.display()), e))
    }

    /// Install `config.local_path` from the cache, downloading it first if
    /// this version is not cached yet
    pub fn install(&self, config: &ItemConfig, version: &str, force: bool) -> InstacloneResult<()> {
        info!("Installing {} ({})", config.name, version);
        self.setup()?;

        let local_path = &config.local_path;
        let cached_path = self.cache_path(config, version, "");
        if fsutil::lexists(&cached_path) {
            install_from_cache(&cached_path, local_path, config.install_method, force, false)?;
            info!(
                "Installed from cache ({}): {} -> {}",
                config.install_method,
                local_path.display(),
                cached_path.display()
            );
            return Ok(());
        }

        // Whether the item is a directory is only known remotely: try the
        // archive first, and fall back to a plain file if it isn't there.
        let codec = Self::codec(config);
        let remote_archive = self.remote_loc(config, version, codec.suffix());
        let cached_archive = self.cache_path(config, version, codec.suffix());
        debug!("Checking for archived directory: {}", remote_archive);
        let is_dir = match self.transfer.download(config, &remote_archive, &cached_archive) {
            Ok(()) => true,
            Err(e) if e.is_transfer_failure() => {
                debug!("No archive ({}), treating it as a file", e);
                false
            }
            Err(e) => return Err(e),
        };

        if is_dir {
            info!("Downloaded published archive: {}", remote_archive);
            self.unpack_into_cache(&codec, &cached_archive, &cached_path, force)?;
            info!("Installed directory: {} -> {}", local_path.display(), cached_path.display());
        } else {
            let remote_loc = self.remote_loc(config, version, "");
            self.transfer.download(config, &remote_loc, &cached_path)?;
            info!("Downloaded published file: {}", remote_loc);
        }

        fsutil::make_readonly(&cached_path)?;
        install_from_cache(&cached_path, local_path, config.install_method, force, false)
    }

    /// Delete the whole cache
    pub fn purge(&self) -> InstacloneResult<()> {
        info!("Purging cache: {}", self.root.display());
        fsutil::remove_any(&self.root, true)?;
        self.setup_done.set(false);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::SymlinkPolicy;
    use crate::fsutil::tests::release;
    use crate::transfer::tests::DirTransfer;
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::TempDir;

    struct Fixture {
        work: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                work: TempDir::new().unwrap(),
            }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.work.path().join(rel)
        }

        fn cache(&self) -> FileCache<DirTransfer> {
            FileCache::with_transfer(self.path("cache"), DirTransfer::new(&self.path("remote")))
        }

        fn item(&self, name: &str, method: InstallMethod) -> ItemConfig {
            ItemConfig {
                name: name.to_string(),
                local_path: self.path(&format!("tree/{name}")),
                remote_path: String::new(),
                remote_prefix: "s3://bucket/ic".to_string(),
                install_method: method,
                upload_command: "unused".to_string(),
                download_command: "unused".to_string(),
                version_string: Some("v1".to_string()),
                version_hashable: None,
                version_command: None,
                external_symlinks: SymlinkPolicy::Dereference,
            }
        }

        fn make_lib(&self) -> PathBuf {
            let lib = self.path("tree/lib");
            fs::create_dir_all(lib.join("sub")).unwrap();
            fs::write(lib.join("a.txt"), "alpha").unwrap();
            fs::write(lib.join("sub/b.txt"), "beta").unwrap();
            symlink("../a.txt", lib.join("sub/a_link")).unwrap();
            lib
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            release(&self.work);
        }
    }

    fn is_readonly(path: &Path) -> bool {
        fs::metadata(path).unwrap().permissions().mode() & 0o222 == 0
    }

    #[test]
    fn setup_writes_marker_once() {
        let fx = Fixture::new();
        let cache = fx.cache();
        cache.setup().unwrap();
        cache.setup().unwrap();
        assert_eq!(fs::read_to_string(fx.path("cache/version")).unwrap(), "1\n");
        assert!(fx.path("cache/contents").is_dir());

        let reopened = fx.cache();
        reopened.setup().unwrap();
    }

    #[test]
    fn setup_rejects_other_formats() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.path("cache")).unwrap();
        fs::write(fx.path("cache/version"), "2\n").unwrap();
        let err = fx.cache().setup().unwrap_err();
        assert!(matches!(err, InstacloneError::CacheFormat { .. }));
    }

    #[test]
    fn directory_scenario_round_trip() {
        let fx = Fixture::new();
        let lib = fx.make_lib();
        let config = fx.item("lib", InstallMethod::Copy);

        let cache = fx.cache();
        cache.publish(&config, "v1", false).unwrap();

        let remote = cache.transfer().location("s3://bucket/ic/lib.$v1$/lib.tar.gz");
        assert!(remote.is_file());
        assert_eq!(
            cache.transfer().uploads.borrow().as_slice(),
            ["s3://bucket/ic/lib.$v1$/lib.tar.gz"]
        );

        let cached = fx.path("cache/contents/s3/bucket/ic/lib.$v1$/lib");
        assert!(cached.is_dir());
        assert!(is_readonly(&cached.join("a.txt")));
        assert!(!fsutil::lexists(&fx.path("cache/contents/s3/bucket/ic/lib.$v1$/lib.tar.gz")));

        assert!(!fsutil::is_symlink(&lib));
        assert_eq!(fs::read_to_string(lib.join("a.txt")).unwrap(), "alpha");
        assert!(!is_readonly(&lib.join("a.txt")));
        assert!(fx.path("tree/lib.bak/a.txt").is_file());

        // A fresh machine: no cache, no working copy.
        cache.purge().unwrap();
        assert!(!fx.path("cache").exists());
        fsutil::remove_any(&lib, false).unwrap();
        fsutil::remove_any(&fx.path("tree/lib.bak"), false).unwrap();

        let fresh = fx.cache();
        fresh.install(&config, "v1", false).unwrap();
        assert_eq!(fs::read_to_string(lib.join("a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(lib.join("sub/b.txt")).unwrap(), "beta");
        assert_eq!(fs::read_link(lib.join("sub/a_link")).unwrap(), PathBuf::from("../a.txt"));
        assert_eq!(fresh.transfer().downloads.borrow().len(), 1);
        assert!(is_readonly(&cached.join("a.txt")));
    }

    #[test]
    fn file_round_trip_falls_back_to_flat_download() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.path("tree")).unwrap();
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        fs::write(fx.path("tree/blob.bin"), &payload).unwrap();
        let config = fx.item("blob.bin", InstallMethod::Copy);

        let cache = fx.cache();
        cache.publish(&config, "v1", false).unwrap();
        assert_eq!(fs::read(&config.local_path).unwrap(), payload);
        assert_eq!(
            cache.transfer().uploads.borrow().as_slice(),
            ["s3://bucket/ic/blob.bin.$v1$/blob.bin"]
        );

        cache.purge().unwrap();
        fs::remove_file(&config.local_path).unwrap();

        let fresh = fx.cache();
        fresh.install(&config, "v1", false).unwrap();
        assert_eq!(fs::read(&config.local_path).unwrap(), payload);
        assert_eq!(
            fresh.transfer().downloads.borrow().as_slice(),
            [
                "s3://bucket/ic/blob.bin.$v1$/blob.bin.tar.gz",
                "s3://bucket/ic/blob.bin.$v1$/blob.bin",
            ]
        );
        assert!(!fsutil::lexists(&fresh.cache_path(&config, "v1", ".tar.gz")));
    }

    #[test]
    fn forced_reinstall_is_idempotent_and_uses_cache() {
        let fx = Fixture::new();
        fx.make_lib();
        let config = fx.item("lib", InstallMethod::Copy);
        fx.cache().publish(&config, "v1", false).unwrap();

        let cache = fx.cache();
        cache.install(&config, "v1", true).unwrap();
        cache.install(&config, "v1", true).unwrap();
        assert!(cache.transfer().downloads.borrow().is_empty());
        assert_eq!(fs::read_to_string(config.local_path.join("a.txt")).unwrap(), "alpha");

        let err = cache.install(&config, "v1", false).unwrap_err();
        assert!(matches!(err, InstacloneError::TargetExists(_)));
    }

    #[test]
    fn republishing_same_version_needs_force() {
        let fx = Fixture::new();
        let lib = fx.make_lib();
        let config = fx.item("lib", InstallMethod::Copy);
        let cache = fx.cache();
        cache.publish(&config, "v1", false).unwrap();

        fs::write(lib.join("a.txt"), "changed").unwrap();
        let err = cache.publish(&config, "v1", false).unwrap_err();
        assert!(matches!(err, InstacloneError::TargetExists(_)));
        assert_eq!(fs::read_to_string(lib.join("a.txt")).unwrap(), "changed");
        let cached = cache.cache_path(&config, "v1", "");
        assert!(is_readonly(&cached.join("a.txt")));

        cache.publish(&config, "v1", true).unwrap();
        assert_eq!(fs::read_to_string(cached.join("a.txt")).unwrap(), "changed");
        assert!(is_readonly(&cached.join("a.txt")));
    }

    #[test]
    fn refused_republish_leaves_remote_and_cache_alone() {
        let fx = Fixture::new();
        let lib = fx.make_lib();
        let config = fx.item("lib", InstallMethod::Copy);
        let cache = fx.cache();
        cache.publish(&config, "v1", false).unwrap();
        let remote = cache.transfer().location("s3://bucket/ic/lib.$v1$/lib.tar.gz");
        let published = fs::read(&remote).unwrap();

        fs::write(lib.join("a.txt"), "changed").unwrap();
        for _ in 0..2 {
            let err = cache.publish(&config, "v1", false).unwrap_err();
            assert!(matches!(err, InstacloneError::TargetExists(_)));
        }
        assert_eq!(cache.transfer().uploads.borrow().len(), 1);
        assert_eq!(fs::read(&remote).unwrap(), published);
        assert!(!fsutil::lexists(&cache.cache_path(&config, "v1", ".tar.gz")));
    }

    #[test]
    fn failed_directory_upload_drops_staged_archive() {
        let fx = Fixture::new();
        let lib = fx.make_lib();
        let config = fx.item("lib", InstallMethod::Copy);

        let mut transfer = DirTransfer::new(&fx.path("remote"));
        transfer.fail_uploads = true;
        let cache = FileCache::with_transfer(fx.path("cache"), transfer);

        let err = cache.publish(&config, "v1", false).unwrap_err();
        assert!(err.is_transfer_failure());
        assert!(!fsutil::lexists(&cache.cache_path(&config, "v1", ".tar.gz")));
        assert!(!fsutil::lexists(&cache.cache_path(&config, "v1", "")));
        assert_eq!(fs::read_to_string(lib.join("a.txt")).unwrap(), "alpha");
    }

    #[test]
    fn file_entry_conflict_needs_force() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.path("tree")).unwrap();
        fs::write(fx.path("tree/f"), "one").unwrap();
        let config = fx.item("f", InstallMethod::Copy);
        let cache = fx.cache();
        cache.publish(&config, "v1", false).unwrap();

        fs::write(&config.local_path, "two").unwrap();
        let err = cache.publish(&config, "v1", false).unwrap_err();
        assert!(matches!(err, InstacloneError::EntryExists(_)));
        assert_eq!(fs::read_to_string(&config.local_path).unwrap(), "two");
    }

    #[test]
    fn failed_file_upload_restores_local_file() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.path("tree")).unwrap();
        fs::write(fx.path("tree/f"), "data").unwrap();
        let config = fx.item("f", InstallMethod::Copy);

        let mut transfer = DirTransfer::new(&fx.path("remote"));
        transfer.fail_uploads = true;
        let cache = FileCache::with_transfer(fx.path("cache"), transfer);

        let err = cache.publish(&config, "v1", false).unwrap_err();
        assert!(err.is_transfer_failure());
        assert_eq!(fs::read_to_string(&config.local_path).unwrap(), "data");
        assert!(!fsutil::lexists(&cache.cache_path(&config, "v1", "")));
    }

    #[test]
    fn symlink_install_points_into_cache() {
        let fx = Fixture::new();
        let lib = fx.make_lib();
        let config = fx.item("lib", InstallMethod::Symlink);
        let cache = fx.cache();
        cache.publish(&config, "v1", false).unwrap();

        assert!(fsutil::is_symlink(&lib));
        assert_eq!(fs::read_link(&lib).unwrap(), cache.cache_path(&config, "v1", ""));
        assert_eq!(fs::read_to_string(lib.join("sub/b.txt")).unwrap(), "beta");

        let err = cache.publish(&config, "v1", true).unwrap_err();
        assert!(matches!(err, InstacloneError::PublishSymlink(_)));
    }

    #[test]
    fn hardlinked_directory_is_refused_before_any_work() {
        let fx = Fixture::new();
        let lib = fx.make_lib();
        let config = fx.item("lib", InstallMethod::Hardlink);
        let cache = fx.cache();

        let err = cache.publish(&config, "v1", false).unwrap_err();
        assert!(matches!(err, InstacloneError::HardlinkDirectory(_)));
        assert!(cache.transfer().uploads.borrow().is_empty());
        assert!(lib.join("a.txt").is_file());
    }

    #[test]
    fn hardlinked_file_publish() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.path("tree")).unwrap();
        fs::write(fx.path("tree/f"), "data").unwrap();
        let config = fx.item("f", InstallMethod::Hardlink);
        let cache = fx.cache();
        cache.publish(&config, "v1", false).unwrap();
        assert_eq!(fs::read_to_string(&config.local_path).unwrap(), "data");
        assert!(is_readonly(&config.local_path));
    }

    #[test]
    fn publishing_nothing_fails() {
        let fx = Fixture::new();
        let config = fx.item("missing", InstallMethod::Copy);
        let err = fx.cache().publish(&config, "v1", false).unwrap_err();
        assert!(matches!(err, InstacloneError::PathNotFound(_)));
    }

    #[test]
    fn install_of_unpublished_item_fails_cleanly() {
        let fx = Fixture::new();
        let config = fx.item("lib", InstallMethod::Copy);
        let cache = fx.cache();
        let err = cache.install(&config, "v1", false).unwrap_err();
        assert!(err.is_transfer_failure());
        assert!(!fsutil::lexists(&config.local_path));
        assert!(!fsutil::lexists(&cache.cache_path(&config, "v1", "")));
    }

    #[test]
    fn purge_of_missing_cache_is_a_noop() {
        let fx = Fixture::new();
        fx.cache().purge().unwrap();
    }
}
