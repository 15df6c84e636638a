//! Configuration schema for instaclone
//!
//! A config file lists the items to sync:
//!
//! ```toml
//! [[items]]
//! local_path = "node_modules"
//! remote_prefix = "s3://my-bucket/instaclone-resources"
//! remote_path = "my-app"
//! install_method = "symlink"
//! upload_command = "s4cmd put -f $LOCAL $REMOTE"
//! download_command = "s4cmd get $REMOTE $LOCAL"
//! version_hashable = "package.json"
//! ```

use crate::error::{InstacloneError, InstacloneResult};
use crate::shell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

/// Pattern every explicit or command-produced version token must match
pub fn version_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("version pattern is valid"))
}

/// Whether `value` is an acceptable version token
pub fn is_valid_version_token(value: &str) -> bool {
    version_token_re().is_match(value)
}

/// How a cache entry becomes the working-tree artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
    /// Symlink the target to the read-only cache entry
    Symlink,
    /// Hard link the target to the cache entry (files only)
    Hardlink,
    /// Full, atomic, recursive copy
    Copy,
    /// Mirror with rsync when available, otherwise copy
    Fastcopy,
}

impl InstallMethod {
    /// All methods, in declaration order
    pub fn all() -> &'static [Self] {
        &[Self::Symlink, Self::Hardlink, Self::Copy, Self::Fastcopy]
    }

    /// Config spelling of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Symlink => "symlink",
            Self::Hardlink => "hardlink",
            Self::Copy => "copy",
            Self::Fastcopy => "fastcopy",
        }
    }
}

impl fmt::Display for InstallMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InstallMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("invalid install method: {s}"))
    }
}

/// What to do with symlinks that point outside an archived directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkPolicy {
    /// Embed the file or directory the link points to
    #[default]
    Dereference,
    /// Refuse to archive the directory
    Reject,
}

/// Root of a config file, as written by the user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// Items to sync
    #[serde(default)]
    pub items: Vec<RawItem>,
}

/// One item, as written by the user (before validation)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawItem {
    pub local_path: Option<String>,
    pub remote_path: Option<String>,
    pub remote_prefix: Option<String>,
    #[serde(alias = "copy_type")]
    pub install_method: Option<String>,
    pub upload_command: Option<String>,
    pub download_command: Option<String>,
    #[serde(alias = "version")]
    pub version_string: Option<String>,
    pub version_hashable: Option<PathBuf>,
    pub version_command: Option<String>,
    pub external_symlinks: Option<SymlinkPolicy>,
}

/// A validated item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemConfig {
    /// Identity of the item, derived from `local_path`
    pub name: String,

    /// Where the item lives in the working tree
    pub local_path: PathBuf,

    /// Path under the remote prefix (may be empty)
    pub remote_path: String,

    /// Remote root, e.g. `s3://bucket/prefix`
    pub remote_prefix: String,

    /// How cache entries are installed
    pub install_method: InstallMethod,

    /// Template run to upload `$LOCAL` to `$REMOTE`
    pub upload_command: String,

    /// Template run to download `$REMOTE` to `$LOCAL`
    pub download_command: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_string: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_hashable: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_command: Option<String>,

    /// Handling of symlinks leaving an archived directory
    #[serde(default)]
    pub external_symlinks: SymlinkPolicy,
}

fn require(raw: Option<String>, key: &str, item: &str) -> InstacloneResult<String> {
    raw.ok_or_else(|| InstacloneError::ItemInvalid {
        item: item.to_string(),
        reason: format!("must specify '{key}'"),
    })
}

/// Reject absolute paths and `..` components
fn check_relative(value: &str, key: &str, item: &str, allow_parent: bool) -> InstacloneResult<()> {
    let invalid = |reason: &str| InstacloneError::ItemInvalid {
        item: item.to_string(),
        reason: format!("'{key}' {reason}: {value}"),
    };

    if value.starts_with('/') {
        return Err(invalid("must be a relative path"));
    }
    if !allow_parent
        && Path::new(value)
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir))
    {
        return Err(invalid("must not leave the working directory"));
    }
    Ok(())
}

impl RawItem {
    /// Validate and normalize into an `ItemConfig`
    pub fn validate(self) -> InstacloneResult<ItemConfig> {
        let local_path = self
            .local_path
            .ok_or_else(|| InstacloneError::ItemInvalid {
                item: "<unnamed>".to_string(),
                reason: "must specify 'local_path'".to_string(),
            })?;
        let name = local_path.trim_end_matches('/').to_string();
        if name.is_empty() || name == "." {
            return Err(InstacloneError::ItemInvalid {
                item: local_path,
                reason: "'local_path' must name a file or directory".to_string(),
            });
        }
        check_relative(&name, "local_path", &name, false)?;

        let remote_path = self
            .remote_path
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        check_relative(&remote_path, "remote_path", &name, false)?;

        let remote_prefix = require(self.remote_prefix, "remote_prefix", &name)?
            .trim_end_matches('/')
            .to_string();
        check_relative(&remote_prefix, "remote_prefix", &name, true)?;

        let method = require(self.install_method, "install_method", &name)?;
        let install_method = method
            .parse::<InstallMethod>()
            .map_err(|reason| InstacloneError::ItemInvalid {
                item: name.clone(),
                reason,
            })?;

        let upload_command = require(self.upload_command, "upload_command", &name)?;
        let download_command = require(self.download_command, "download_command", &name)?;
        let bindings = shell::env_with(&[("LOCAL", "dummy"), ("REMOTE", "dummy")]);
        for template in [&upload_command, &download_command] {
            shell::expand_to_argv(template, &bindings)?;
        }

        if let Some(ref version) = self.version_string {
            if !is_valid_version_token(version) {
                return Err(InstacloneError::ItemInvalid {
                    item: name,
                    reason: format!("invalid version string: '{version}'"),
                });
            }
        }
        if self.version_string.is_none()
            && self.version_hashable.is_none()
            && self.version_command.is_none()
        {
            return Err(InstacloneError::ItemInvalid {
                item: name,
                reason: "must specify 'version_string', 'version_hashable', or 'version_command'"
                    .to_string(),
            });
        }

        Ok(ItemConfig {
            local_path: PathBuf::from(&name),
            name,
            remote_path,
            remote_prefix,
            install_method,
            upload_command,
            download_command,
            version_string: self.version_string,
            version_hashable: self.version_hashable,
            version_command: self.version_command,
            external_symlinks: self.external_symlinks.unwrap_or_default(),
        })
    }
}

impl ItemConfig {
    /// Final path component of the item name
    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}
