//! Purge command - delete the local cache

use crate::cache::FileCache;
use crate::config::ConfigManager;
use crate::error::InstacloneResult;
use crate::ui::{self, UiContext};

/// Execute the purge command
pub fn execute() -> InstacloneResult<()> {
    let ctx = UiContext::detect();
    let root = ConfigManager::cache_dir()?;
    FileCache::new(root.clone()).purge()?;
    ui::step_ok(&ctx, &format!("Purged cache: {}", root.display()));
    Ok(())
}
