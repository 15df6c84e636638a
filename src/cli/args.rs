//! CLI argument definitions using clap derive

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// instaclone - fast, cached installations of versioned files
///
/// Publishes files and directories to a remote store of your choice and
/// installs them back through a local cache, so unchanged versions are
/// never downloaded twice.
#[derive(Parser, Debug)]
#[command(name = "instaclone")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Clobber existing cached or local targets (use with care)
    #[arg(short, long, global = true)]
    pub force: bool,

    /// Config file to use instead of searching for one
    #[arg(short, long, global = true, env = "INSTACLONE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output, including error causes
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload items and store them in the local cache
    Publish(ItemArgs),

    /// Install items from the cache, downloading them if needed
    Install(ItemArgs),

    /// Delete the local cache
    Purge,

    /// Show the configured items
    Configs(ConfigsArgs),
}

/// Item selection shared by most commands
#[derive(Args, Debug, Clone, Default)]
pub struct ItemArgs {
    /// Items to act on, by name (default: all configured items)
    pub items: Vec<String>,
}

/// Arguments for the configs command
#[derive(Args, Debug)]
pub struct ConfigsArgs {
    #[command(flatten)]
    pub selection: ItemArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = ConfigFormat::Toml)]
    pub format: ConfigFormat,
}

/// Output formats for the configs command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Json,
    /// One line per item
    Plain,
}
