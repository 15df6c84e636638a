//! Content-addressed local cache of published items
//!
//! Each item version is stored once, keyed by its remote prefix, name and
//! version, and installed into the working tree from there.
//!
//! # Entry States
//!
//! | State | Permissions | Description |
//! |-------|-------------|-------------|
//! | Absent | - | Not published or installed on this machine yet |
//! | Archive | rw | Directory archive mid-transfer, removed once unpacked |
//! | Stored | ro | Complete and immutable; only replaced with `--force` |

pub mod address;
pub mod file_cache;
pub mod install;

pub use address::{cache_path, remote_loc, sanitize_prefix, versioned_path};
pub use file_cache::{FileCache, CACHE_FORMAT_VERSION};
pub use install::{install_from_cache, strategy_for, InstallStrategy};
