//! instaclone - fast, cached installations of versioned files
//!
//! Files and directories are published to a remote store through
//! user-supplied transfer commands and kept in a local, content-addressed
//! cache. Installing a version that is already cached is a local link or
//! copy instead of a download.

pub mod archive;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod shell;
pub mod transfer;
pub mod ui;
pub mod version;

pub use error::{InstacloneError, InstacloneResult};
