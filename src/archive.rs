//! Directory archiving
//!
//! Directories travel to and from the remote store as a single archive.
//! Packing normalizes symlinks so an archive unpacks the same way on any
//! machine: links that stay inside the tree are kept, links that leave it
//! are either replaced by the content they point to or refused.

use crate::config::SymlinkPolicy;
use crate::error::{InstacloneError, InstacloneResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File, Metadata};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tar::{EntryType, Header, HeaderMode};
use tracing::{debug, info};

/// Maximum number of links followed when resolving a chain of symlinks
pub const MAX_LINK_HOPS: usize = 10;

/// Packs a directory into one file and back
pub trait ArchiveCodec {
    /// Filename suffix of archives produced by this codec, e.g. `.tar.gz`
    fn suffix(&self) -> &'static str;

    /// Pack the contents of `source_dir` into a new file at `archive`
    fn pack(&self, source_dir: &Path, archive: &Path) -> InstacloneResult<()>;

    /// Unpack `archive` into `target_dir`, creating it if needed
    fn unpack(&self, archive: &Path, target_dir: &Path) -> InstacloneResult<()>;
}

/// Gzipped tarballs
#[derive(Debug, Clone, Copy, Default)]
pub struct TarGzCodec {
    policy: SymlinkPolicy,
}

impl TarGzCodec {
    pub fn new(policy: SymlinkPolicy) -> Self {
        Self { policy }
    }
}

impl ArchiveCodec for TarGzCodec {
    fn suffix(&self) -> &'static str {
        ".tar.gz"
    }

    fn pack(&self, source_dir: &Path, archive: &Path) -> InstacloneResult<()> {
        info!("Creating archive: {} -> {}", source_dir.display(), archive.display());

        let root = std::path::absolute(source_dir)
            .map(|p| normalize(&p))
            .map_err(|e| InstacloneError::io(format!("resolving {}", source_dir.display()), e))?;
        let file = File::create(archive)
            .map_err(|e| InstacloneError::io(format!("creating {}", archive.display()), e))?;

        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        builder.follow_symlinks(false);

        let mut packer = Packer {
            builder,
            root: root.clone(),
            policy: self.policy,
            visiting: vec![],
            entries: 0,
            links_kept: 0,
            links_followed: 0,
        };
        packer.add_dir_contents(&root, Path::new(""), false)?;

        let Packer {
            builder,
            entries,
            links_kept,
            links_followed,
            ..
        } = packer;
        let archive_err =
            |e: std::io::Error| InstacloneError::io(format!("writing {}", archive.display()), e);
        let mut file = builder
            .into_inner()
            .map_err(archive_err)?
            .finish()
            .map_err(archive_err)?;
        file.flush().map_err(archive_err)?;

        debug!(
            "Archived {} entries ({} symlinks kept, {} followed)",
            entries, links_kept, links_followed
        );
        Ok(())
    }

    fn unpack(&self, archive: &Path, target_dir: &Path) -> InstacloneResult<()> {
        info!("Unpacking archive: {} -> {}", archive.display(), target_dir.display());

        fs::create_dir_all(target_dir).map_err(|e| {
            InstacloneError::io(format!("creating directory {}", target_dir.display()), e)
        })?;
        let file = File::open(archive)
            .map_err(|e| InstacloneError::io(format!("opening {}", archive.display()), e))?;

        let mut tarball = tar::Archive::new(GzDecoder::new(file));
        tarball.set_preserve_permissions(true);
        tarball.set_preserve_mtime(true);
        tarball.set_unpack_xattrs(false);
        tarball.unpack(target_dir).map_err(|e| {
            InstacloneError::io(
                format!("unpacking {} into {}", archive.display(), target_dir.display()),
                e,
            )
        })
    }
}

/// Lexically normalize a path, resolving `.` and `..` without touching disk
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Follow a chain of symlinks to the first non-link path.
///
/// Each hop is resolved lexically relative to the link's directory. Fails if
/// the chain is longer than [`MAX_LINK_HOPS`] or ends at nothing.
pub fn follow_link(path: &Path) -> InstacloneResult<PathBuf> {
    let mut hops = link_chain(path)?;
    Ok(hops.pop().unwrap_or_else(|| path.to_path_buf()))
}

/// Every path visited while following `path`, in order, ending at the
/// first non-link. Empty when `path` is not a symlink.
fn link_chain(path: &Path) -> InstacloneResult<Vec<PathBuf>> {
    let mut hops: Vec<PathBuf> = vec![];
    let mut current = path.to_path_buf();

    while crate::fsutil::is_symlink(&current) {
        if hops.len() == MAX_LINK_HOPS {
            return Err(InstacloneError::SymlinkLoop(path.to_path_buf()));
        }
        let link = fs::read_link(&current)
            .map_err(|e| InstacloneError::io(format!("reading link {}", current.display()), e))?;
        let base = current.parent().unwrap_or_else(|| Path::new(""));
        current = normalize(&base.join(link));
        hops.push(current.clone());
    }

    if !crate::fsutil::lexists(&current) {
        return Err(InstacloneError::SymlinkTargetMissing {
            link: path.to_path_buf(),
            target: current,
        });
    }
    Ok(hops)
}

struct Packer<W: Write> {
    builder: tar::Builder<W>,
    root: PathBuf,
    policy: SymlinkPolicy,
    visiting: Vec<PathBuf>,
    entries: usize,
    links_kept: usize,
    links_followed: usize,
}

impl<W: Write> Packer<W> {
    fn header(metadata: &Metadata, entry_type: EntryType) -> Header {
        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(metadata, HeaderMode::Complete);
        header.set_entry_type(entry_type);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(0);
        header
    }

    fn append_err(rel: &Path, e: std::io::Error) -> InstacloneError {
        InstacloneError::io(format!("adding {} to archive", rel.display()), e)
    }

    /// Add every child of `dir` under `rel`, in sorted order
    fn add_dir_contents(
        &mut self,
        dir: &Path,
        rel: &Path,
        dereferenced: bool,
    ) -> InstacloneResult<()> {
        let canonical = fs::canonicalize(dir)
            .map_err(|e| InstacloneError::io(format!("resolving {}", dir.display()), e))?;
        if self.visiting.contains(&canonical) {
            return Err(InstacloneError::SymlinkLoop(dir.to_path_buf()));
        }
        self.visiting.push(canonical);

        let mut names = fs::read_dir(dir)
            .and_then(|entries| {
                entries
                    .map(|e| e.map(|e| e.file_name()))
                    .collect::<Result<Vec<_>, _>>()
            })
            .map_err(|e| InstacloneError::io(format!("listing {}", dir.display()), e))?;
        names.sort();

        for name in names {
            self.add_entry(&dir.join(&name), &rel.join(&name), dereferenced)?;
        }

        self.visiting.pop();
        Ok(())
    }

    fn add_entry(&mut self, path: &Path, rel: &Path, dereferenced: bool) -> InstacloneResult<()> {
        let metadata = fs::symlink_metadata(path).map_err(|e| {
            InstacloneError::io(format!("reading metadata of {}", path.display()), e)
        })?;
        let file_type = metadata.file_type();

        if file_type.is_symlink() {
            let hops = link_chain(path)?;
            let resolved = hops.last().cloned().unwrap_or_else(|| path.to_path_buf());
            let link_text = fs::read_link(path)
                .map_err(|e| InstacloneError::io(format!("reading link {}", path.display()), e))?;

            // A kept link must never pass outside the tree, even if it comes back
            let stays_inside = hops.iter().all(|hop| hop.starts_with(&self.root));
            if !dereferenced && link_text.is_relative() && stays_inside {
                let mut header = Self::header(&metadata, EntryType::Symlink);
                self.builder
                    .append_link(&mut header, rel, &link_text)
                    .map_err(|e| Self::append_err(rel, e))?;
                self.links_kept += 1;
                self.entries += 1;
                return Ok(());
            }

            match self.policy {
                SymlinkPolicy::Reject => Err(InstacloneError::SymlinkEscapes {
                    link: rel.to_path_buf(),
                    target: link_text,
                }),
                SymlinkPolicy::Dereference => {
                    debug!("Following symlink: {} -> {}", rel.display(), resolved.display());
                    self.links_followed += 1;
                    self.add_resolved(&resolved, rel)
                }
            }
        } else if file_type.is_dir() {
            self.append_dir(&metadata, rel)?;
            self.add_dir_contents(path, rel, dereferenced)
        } else if file_type.is_file() {
            self.append_file(path, &metadata, rel)
        } else {
            Err(InstacloneError::UnsupportedFileType(path.to_path_buf()))
        }
    }

    /// Embed the real content behind a followed link at `rel`
    fn add_resolved(&mut self, target: &Path, rel: &Path) -> InstacloneResult<()> {
        let metadata = fs::metadata(target).map_err(|e| {
            InstacloneError::io(format!("reading metadata of {}", target.display()), e)
        })?;
        if metadata.is_dir() {
            self.append_dir(&metadata, rel)?;
            self.add_dir_contents(target, rel, true)
        } else if metadata.is_file() {
            self.append_file(target, &metadata, rel)
        } else {
            Err(InstacloneError::UnsupportedFileType(target.to_path_buf()))
        }
    }

    fn append_dir(&mut self, metadata: &Metadata, rel: &Path) -> InstacloneResult<()> {
        let mut header = Self::header(metadata, EntryType::Directory);
        self.builder
            .append_data(&mut header, rel, std::io::empty())
            .map_err(|e| Self::append_err(rel, e))?;
        self.entries += 1;
        Ok(())
    }

    fn append_file(
        &mut self,
        source: &Path,
        metadata: &Metadata,
        rel: &Path,
    ) -> InstacloneResult<()> {
        let mut header = Self::header(metadata, EntryType::Regular);
        header.set_size(metadata.len());
        let file = File::open(source)
            .map_err(|e| InstacloneError::io(format!("opening {}", source.display()), e))?;
        self.builder
            .append_data(&mut header, rel, file)
            .map_err(|e| Self::append_err(rel, e))?;
        self.entries += 1;
        Ok(())
    }
}
