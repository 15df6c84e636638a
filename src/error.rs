//! Error types for instaclone
//!
//! All modules use `InstacloneResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for instaclone operations
pub type InstacloneResult<T> = Result<T, InstacloneError>;

/// Broad classes of failure, used for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or missing configuration, invalid version tokens
    Config,
    /// Operation-level conflicts the user can override with `--force`
    App,
    /// Internal assertion failure; indicates a bug
    Invariant,
    /// A configured transfer or version command exited unsuccessfully
    Transfer,
    /// Filesystem or process plumbing
    Io,
}

/// All errors that can occur in instaclone
#[derive(Error, Debug)]
pub enum InstacloneError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("No config file found in: {searched}")]
    ConfigNotFound { searched: String },

    #[error("Invalid item config '{item}': {reason}")]
    ItemInvalid { item: String, reason: String },

    #[error("Invalid version output from version command: {0:?}")]
    VersionOutputInvalid(String),

    #[error("No version source configured for item '{0}'")]
    VersionMissing(String),

    #[error("Could not find config for item: {0}")]
    ItemNotFound(String),

    #[error("Could not expand command template '{template}': {reason}")]
    TemplateInvalid { template: String, reason: String },

    // Cache errors
    #[error("Unsupported cache format version {found:?} in {path} (expected {expected:?})")]
    CacheFormat {
        path: PathBuf,
        found: String,
        expected: String,
    },

    #[error("Archive already in cache (has version changed?): {0}")]
    ArchiveExists(PathBuf),

    #[error("Item already in cache (has version changed?): {0}")]
    EntryExists(PathBuf),

    #[error("Target already exists: {0}")]
    TargetExists(PathBuf),

    #[error("Can't hardlink a directory: {0}")]
    HardlinkDirectory(PathBuf),

    #[error("Cannot publish symlinks (is path already published?): {0}")]
    PublishSymlink(PathBuf),

    #[error("Only files or directories can be published: {0}")]
    UnsupportedFileType(PathBuf),

    #[error("Cached item missing: {0}")]
    CacheEntryMissing(PathBuf),

    // Archive errors
    #[error("Symlink target not found: {link} -> {target}")]
    SymlinkTargetMissing { link: PathBuf, target: PathBuf },

    #[error("Too many levels of symlinks: {0}")]
    SymlinkLoop(PathBuf),

    #[error("Symlink points outside the archived directory: {link} -> {target}")]
    SymlinkEscapes { link: PathBuf, target: PathBuf },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command exited with {status}: {command}")]
    CommandExit { command: String, status: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl InstacloneError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error (the process could not be run at all)
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Classify the error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigInvalid { .. }
            | Self::ConfigNotFound { .. }
            | Self::ItemInvalid { .. }
            | Self::VersionOutputInvalid(_)
            | Self::VersionMissing(_)
            | Self::ItemNotFound(_)
            | Self::TemplateInvalid { .. } => ErrorCategory::Config,
            Self::ArchiveExists(_)
            | Self::EntryExists(_)
            | Self::TargetExists(_)
            | Self::HardlinkDirectory(_)
            | Self::PublishSymlink(_)
            | Self::UnsupportedFileType(_)
            | Self::PathNotFound(_)
            | Self::SymlinkTargetMissing { .. }
            | Self::SymlinkLoop(_)
            | Self::SymlinkEscapes { .. } => ErrorCategory::App,
            Self::CacheEntryMissing(_) => ErrorCategory::Invariant,
            Self::CommandExit { .. } => ErrorCategory::Transfer,
            Self::CacheFormat { .. }
            | Self::Io { .. }
            | Self::CommandFailed { .. }
            | Self::Json(_)
            | Self::TomlSerialize(_) => ErrorCategory::Io,
        }
    }

    /// Whether this is a nonzero exit from an external command
    pub fn is_transfer_failure(&self) -> bool {
        self.category() == ErrorCategory::Transfer
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ArchiveExists(_) | Self::EntryExists(_) | Self::TargetExists(_) => {
                Some(
                    "Use --force to overwrite (existing local targets are kept as .bak on publish)",
                )
            }
            Self::PublishSymlink(_) => Some("Remove the link, or run install instead"),
            Self::ConfigNotFound { .. } => {
                Some(
                    "Put an instaclone.toml in the working directory or pass --config \
                     (instaclone.yml is not read; convert it to TOML or JSON)",
                )
            }
            Self::CacheEntryMissing(_) => Some("This is a bug; please report it"),
            Self::CacheFormat { .. } => Some("Run: instaclone purge"),
            _ => None,
        }
    }
}
