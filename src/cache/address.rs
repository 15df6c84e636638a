//! Cache and remote addressing
//!
//! Pure functions: nothing here touches the filesystem, so paths can be
//! computed (and compared) before deciding what to do.

use crate::config::ItemConfig;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Opens the version segment: `<name>.$<version>$`
pub const VERSION_SEP: &str = ".$";
/// Closes the version segment
pub const VERSION_END: &str = "$";

fn safe_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z0-9_.-]+").expect("segment pattern is valid"))
}

/// Turn a remote prefix into path segments safe to use under `contents/`.
///
/// Only runs of `[a-zA-Z0-9_.-]` survive; runs made only of dots are dropped,
/// so `..`, leading `/`, `~`, and shell metacharacters all disappear.
pub fn sanitize_prefix(remote_prefix: &str) -> PathBuf {
    safe_run_re()
        .find_iter(remote_prefix)
        .map(|m| m.as_str())
        .filter(|run| !run.chars().all(|c| c == '.'))
        .collect()
}

/// `<remote_path>/<name>.$<version>$/<basename(name)><suffix>`
pub fn versioned_path(config: &ItemConfig, version: &str, suffix: &str) -> String {
    let segment = format!("{}{}{}{}", config.name, VERSION_SEP, version, VERSION_END);
    let leaf = format!("{}{}", config.basename(), suffix);
    [config.remote_path.as_str(), segment.as_str(), leaf.as_str()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

/// Where an item version lives in the local cache
pub fn cache_path(
    contents_root: &Path,
    config: &ItemConfig,
    version: &str,
    suffix: &str,
) -> PathBuf {
    contents_root
        .join(sanitize_prefix(&config.remote_prefix))
        .join(versioned_path(config, version, suffix))
}

/// Where an item version lives remotely
pub fn remote_loc(config: &ItemConfig, version: &str, suffix: &str) -> String {
    let prefix = config.remote_prefix.trim_end_matches('/');
    let rest = versioned_path(config, version, suffix);
    if prefix.is_empty() {
        rest
    } else {
        format!("{prefix}/{rest}")
    }
}
