//! Configuration management for instaclone

pub mod schema;

pub use schema::{InstallMethod, ItemConfig, RawConfig, RawItem, SymlinkPolicy};

use crate::error::{InstacloneError, InstacloneResult};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Base name of config files (`instaclone.toml` or `instaclone.json`)
pub const CONFIG_NAME: &str = "instaclone";

/// Environment variable naming the instaclone directory
pub const DIR_ENV: &str = "INSTACLONE_DIR";

const CONFIG_SUFFIXES: &[&str] = &["toml", "json"];

/// Configuration manager
pub struct ConfigManager {
    override_path: Option<PathBuf>,
    search_dirs: Vec<PathBuf>,
}

impl ConfigManager {
    /// Create a config manager using the default search order
    pub fn new() -> Self {
        Self {
            override_path: None,
            search_dirs: Self::default_search_dirs(),
        }
    }

    /// Create a config manager that only reads the given file
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            override_path: Some(path),
            search_dirs: vec![],
        }
    }

    /// Create a config manager searching the given directories, in order
    pub fn with_search_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            override_path: None,
            search_dirs,
        }
    }

    /// `.`, then `$INSTACLONE_DIR`, then `~/.instaclone` (unset entries skipped)
    pub fn default_search_dirs() -> Vec<PathBuf> {
        let mut dirs = vec![PathBuf::from(".")];
        dirs.extend(Self::dir_candidates());
        dirs
    }

    fn dir_candidates() -> Vec<PathBuf> {
        let mut dirs = vec![];
        if let Some(dir) = std::env::var_os(DIR_ENV).filter(|d| !d.is_empty()) {
            dirs.push(PathBuf::from(dir));
        }
        if let Some(home) = dirs::home_dir() {
            dirs.push(home.join(".instaclone"));
        }
        dirs
    }

    /// The instaclone directory: first existing candidate, else `~/.instaclone`
    pub fn instaclone_dir() -> PathBuf {
        let candidates = Self::dir_candidates();
        for dir in &candidates {
            debug!("Searching for instaclone dir: {}", dir.display());
            if dir.is_dir() {
                return dir.clone();
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".instaclone")
    }

    /// Get (and create) the absolute cache directory
    pub fn cache_dir() -> InstacloneResult<PathBuf> {
        let dir = Self::instaclone_dir().join("cache");
        if !dir.is_dir() {
            info!("Creating cache dir: {}", dir.display());
        }
        fs::create_dir_all(&dir)
            .map_err(|e| InstacloneError::io(format!("creating cache dir {}", dir.display()), e))?;
        std::path::absolute(&dir)
            .map_err(|e| InstacloneError::io(format!("resolving cache dir {}", dir.display()), e))
    }

    /// Find the config file to use
    pub fn locate(&self) -> InstacloneResult<PathBuf> {
        if let Some(ref path) = self.override_path {
            if !path.is_file() {
                return Err(InstacloneError::ConfigNotFound {
                    searched: path.display().to_string(),
                });
            }
            return Ok(path.clone());
        }

        let mut tried = vec![];
        for dir in &self.search_dirs {
            for suffix in CONFIG_SUFFIXES {
                let path = dir.join(format!("{CONFIG_NAME}.{suffix}"));
                debug!("Searching for config file: {}", path.display());
                if path.is_file() {
                    debug!("Using config file: {}", path.display());
                    return Ok(path);
                }
                tried.push(path.display().to_string());
            }
        }

        Err(InstacloneError::ConfigNotFound {
            searched: tried.join(", "),
        })
    }

    /// Locate, parse, and validate all items
    pub fn load(&self) -> InstacloneResult<Vec<ItemConfig>> {
        let path = self.locate()?;
        Self::load_from_file(&path)
    }

    /// Parse and validate all items of a specific file
    pub fn load_from_file(path: &Path) -> InstacloneResult<Vec<ItemConfig>> {
        let content = fs::read_to_string(path).map_err(|e| {
            InstacloneError::io(format!("reading config from {}", path.display()), e)
        })?;

        let invalid = |reason: String| InstacloneError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        };
        let raw: RawConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?,
            _ => toml::from_str(&content).map_err(|e| invalid(e.to_string()))?,
        };

        let items = raw
            .items
            .into_iter()
            .map(RawItem::validate)
            .collect::<InstacloneResult<Vec<_>>>()?;

        let mut seen = HashSet::new();
        for item in &items {
            if !seen.insert(item.name.as_str()) {
                return Err(invalid(format!("duplicate item: {}", item.name)));
            }
        }

        debug!("Loaded {} item(s) from {}", items.len(), path.display());
        Ok(items)
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Select items by name, in the order requested; all items if none named
pub fn select_items(items: Vec<ItemConfig>, names: &[String]) -> InstacloneResult<Vec<ItemConfig>> {
    if names.is_empty() {
        return Ok(items);
    }
    debug!("Selecting items: {:?}", names);
    names
        .iter()
        .map(|name| {
            items
                .iter()
                .find(|item| &item.name == name)
                .cloned()
                .ok_or_else(|| InstacloneError::ItemNotFound(name.clone()))
        })
        .collect()
}
