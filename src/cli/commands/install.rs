//! Install command - install items from the cache

use super::resolve_versions;
use crate::cache::FileCache;
use crate::cli::args::ItemArgs;
use crate::config::{select_items, ConfigManager};
use crate::error::InstacloneResult;
use crate::ui::{self, UiContext};

/// Execute the install command
pub fn execute(args: ItemArgs, manager: &ConfigManager, force: bool) -> InstacloneResult<()> {
    let ctx = UiContext::detect();
    let items = resolve_versions(select_items(manager.load()?, &args.items)?)?;
    if items.is_empty() {
        ui::step_warn(&ctx, "No items configured");
        return Ok(());
    }

    let cache = FileCache::new(ConfigManager::cache_dir()?);
    for (item, version) in &items {
        cache.install(item, version, force)?;
        ui::step_ok_detail(
            &ctx,
            &format!("Installed {} ({})", item.name, item.install_method),
            version,
        );
    }

    Ok(())
}
