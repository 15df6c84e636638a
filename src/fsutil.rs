//! Filesystem primitives
//!
//! Anything that produces a new file or directory is staged at a uniquely
//! suffixed sibling (`<dest>.partial.<uid>`) and renamed into place only after
//! it was fully written. A crash leaves either the old destination or an
//! orphaned partial path, never a half-written destination.

use crate::error::{InstacloneError, InstacloneResult};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Suffix used when keeping a previous file or directory aside
pub const BACKUP_SUFFIX: &str = ".bak";

/// Append a suffix to the final component of a path
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// A short random id, safe for filenames on case-insensitive disks
fn new_uid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Whether anything (including a dangling symlink) exists at `path`
pub fn lexists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Whether `path` is itself a symlink
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Create `path` and all of its parents
pub fn make_all_dirs(path: &Path) -> InstacloneResult<()> {
    fs::create_dir_all(path)
        .map_err(|e| InstacloneError::io(format!("creating directory {}", path.display()), e))
}

/// Create the parent directories of `path`
pub fn make_parent_dirs(path: &Path) -> InstacloneResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => make_all_dirs(parent),
        _ => Ok(()),
    }
}

/// Move `path` to `path.bak`, replacing any previous backup
pub fn move_to_backup(path: &Path, backup_suffix: &str) -> InstacloneResult<()> {
    if !lexists(path) {
        return Ok(());
    }
    let backup = with_suffix(path, backup_suffix);
    remove_any(&backup, true)?;
    debug!("Moving {} aside to {}", path.display(), backup.display());
    fs::rename(path, &backup).map_err(|e| {
        InstacloneError::io(
            format!("moving {} to {}", path.display(), backup.display()),
            e,
        )
    })
}

/// Stage output for `dest` at a temporary sibling and rename it into place.
///
/// `write` receives the staging path and must create it. If a backup suffix
/// is given, any previous `dest` is moved aside first; otherwise a previous
/// file is replaced and a previous directory removed.
pub fn atomic_output<T, F>(
    dest: &Path,
    make_parents: bool,
    backup_suffix: Option<&str>,
    write: F,
) -> InstacloneResult<T>
where
    F: FnOnce(&Path) -> InstacloneResult<T>,
{
    let tmp = with_suffix(dest, &format!(".partial.{}", new_uid()));
    if make_parents {
        make_parent_dirs(&tmp)?;
    }

    let value = match write(&tmp) {
        Ok(value) => value,
        Err(e) => {
            if let Err(cleanup) = remove_any(&tmp, true) {
                warn!("Failed to clean up {}: {}", tmp.display(), cleanup);
            }
            return Err(e);
        }
    };

    if !lexists(&tmp) {
        return Err(InstacloneError::io(
            format!("writing {}", dest.display()),
            std::io::Error::new(
                ErrorKind::NotFound,
                format!("staged output {} missing", tmp.display()),
            ),
        ));
    }

    if let Some(suffix) = backup_suffix {
        move_to_backup(dest, suffix)?;
    }
    if dest.is_dir() && !is_symlink(dest) {
        remove_any(dest, false)?;
    }

    fs::rename(&tmp, dest).map_err(|e| {
        InstacloneError::io(
            format!("renaming {} to {}", tmp.display(), dest.display()),
            e,
        )
    })?;
    Ok(value)
}

/// Write a whole file atomically, keeping the previous contents as a backup
pub fn write_string_to_file(path: &Path, contents: &str) -> InstacloneResult<()> {
    atomic_output(path, true, Some(BACKUP_SUFFIX), |tmp| {
        fs::write(tmp, contents)
            .map_err(|e| InstacloneError::io(format!("writing {}", tmp.display()), e))
    })
}

/// Remove a file, symlink, or directory tree, whatever it is.
///
/// Read-only trees are made writable first so removal cannot be blocked by
/// permissions the cache set on itself.
pub fn remove_any(path: &Path, ignore_missing: bool) -> InstacloneResult<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if ignore_missing && e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(InstacloneError::io(format!("removing {}", path.display()), e)),
    };

    if metadata.is_dir() {
        make_writable(path)?;
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
    .map_err(|e| InstacloneError::io(format!("removing {}", path.display()), e))
}

#[cfg(unix)]
fn crosses_devices(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn crosses_devices(e: &std::io::Error) -> bool {
    e.kind() != ErrorKind::NotFound
}

/// Move a file, falling back to copy-and-delete across filesystems
pub fn move_file(source: &Path, dest: &Path) -> InstacloneResult<()> {
    make_parent_dirs(dest)?;
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if crosses_devices(&e) => {
            debug!("Rename across devices, copying {} instead", source.display());
            copy_file_atomic(source, dest)?;
            fs::remove_file(source)
                .map_err(|e| InstacloneError::io(format!("removing {}", source.display()), e))
        }
        Err(e) => Err(InstacloneError::io(
            format!("moving {} to {}", source.display(), dest.display()),
            e,
        )),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, update: impl Fn(u32) -> u32) -> InstacloneResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::symlink_metadata(path)
        .map_err(|e| InstacloneError::io(format!("reading metadata of {}", path.display()), e))?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let mode = metadata.permissions().mode();
    let new_mode = update(mode);
    if new_mode != mode {
        fs::set_permissions(path, fs::Permissions::from_mode(new_mode)).map_err(|e| {
            InstacloneError::io(format!("setting permissions on {}", path.display()), e)
        })?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(path: &Path, update: impl Fn(u32) -> u32) -> InstacloneResult<()> {
    let metadata = fs::symlink_metadata(path)
        .map_err(|e| InstacloneError::io(format!("reading metadata of {}", path.display()), e))?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let mut perms = metadata.permissions();
    let readonly = update(0o777) & 0o200 == 0;
    if perms.readonly() != readonly {
        perms.set_readonly(readonly);
        fs::set_permissions(path, perms).map_err(|e| {
            InstacloneError::io(format!("setting permissions on {}", path.display()), e)
        })?;
    }
    Ok(())
}

fn chmod_recursive(path: &Path, update: impl Fn(u32) -> u32) -> InstacloneResult<()> {
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| {
            let context = format!("walking {}", path.display());
            match e.into_io_error() {
                Some(source) => InstacloneError::io(context, source),
                None => InstacloneError::io(context, std::io::Error::other("filesystem loop")),
            }
        })?;
        set_mode(entry.path(), &update)?;
    }
    Ok(())
}

/// Remove write permission for everyone, recursively (`chmod -R ugo-w`)
pub fn make_readonly(path: &Path) -> InstacloneResult<()> {
    debug!("Making read-only: {}", path.display());
    chmod_recursive(path, |mode| mode & !0o222)
}

/// Grant owner write permission, recursively (`chmod -R u+w`)
pub fn make_writable(path: &Path) -> InstacloneResult<()> {
    chmod_recursive(path, |mode| mode | 0o200)
}

/// Copy a single file to `dest`, keeping its modification time and making
/// the copy owner-writable
fn copy_file_contents(source: &Path, dest: &Path) -> InstacloneResult<()> {
    fs::copy(source, dest).map_err(|e| {
        InstacloneError::io(
            format!("copying {} to {}", source.display(), dest.display()),
            e,
        )
    })?;
    set_mode(dest, |mode| mode | 0o200)?;

    let modified = fs::metadata(source)
        .and_then(|m| m.modified())
        .map_err(|e| InstacloneError::io(format!("reading mtime of {}", source.display()), e))?;
    fs::File::options()
        .write(true)
        .open(dest)
        .and_then(|f| f.set_modified(modified))
        .map_err(|e| InstacloneError::io(format!("setting mtime of {}", dest.display()), e))
}

#[cfg(unix)]
fn copy_symlink(source: &Path, dest: &Path) -> InstacloneResult<()> {
    let target = fs::read_link(source)
        .map_err(|e| InstacloneError::io(format!("reading link {}", source.display()), e))?;
    std::os::unix::fs::symlink(&target, dest)
        .map_err(|e| InstacloneError::io(format!("creating link {}", dest.display()), e))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, dest: &Path) -> InstacloneResult<()> {
    copy_file_contents(source, dest)
}

fn copy_dir_contents(source: &Path, dest: &Path) -> InstacloneResult<()> {
    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let context = format!("walking {}", source.display());
            match e.into_io_error() {
                Some(io) => InstacloneError::io(context, io),
                None => InstacloneError::io(context, std::io::Error::other("filesystem loop")),
            }
        })?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .unwrap_or_else(|_| Path::new(""));
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| {
                InstacloneError::io(format!("creating directory {}", target.display()), e)
            })?;
            let permissions = entry
                .metadata()
                .map_err(|e| {
                    InstacloneError::io(format!("reading {}", entry.path().display()), e.into())
                })?
                .permissions();
            fs::set_permissions(&target, permissions).map_err(|e| {
                InstacloneError::io(format!("setting permissions on {}", target.display()), e)
            })?;
            set_mode(&target, |mode| mode | 0o700)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            copy_file_contents(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Copy a file atomically; the copy keeps the source's mtime
pub fn copy_file_atomic(source: &Path, dest: &Path) -> InstacloneResult<()> {
    atomic_output(dest, false, None, |tmp| copy_file_contents(source, tmp))
}

/// Copy a file or a directory tree atomically.
///
/// Relative symlinks inside a directory are recreated as symlinks. The copy
/// is owner-writable even when the source is read-only.
pub fn copy_tree_atomic(source: &Path, dest: &Path) -> InstacloneResult<()> {
    if source.is_dir() {
        atomic_output(dest, false, None, |tmp| copy_dir_contents(source, tmp))
    } else {
        copy_file_atomic(source, dest)
    }
}
