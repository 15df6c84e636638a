//! Configs command - show the validated item configs

use crate::cli::args::{ConfigFormat, ConfigsArgs};
use crate::config::{select_items, ConfigManager, ItemConfig};
use crate::error::InstacloneResult;
use serde::Serialize;

#[derive(Serialize)]
struct ItemList<'a> {
    items: &'a [ItemConfig],
}

/// Execute the configs command
pub fn execute(args: ConfigsArgs, manager: &ConfigManager) -> InstacloneResult<()> {
    let items = select_items(manager.load()?, &args.selection.items)?;
    print!("{}", render(&items, args.format)?);
    Ok(())
}

fn render(items: &[ItemConfig], format: ConfigFormat) -> InstacloneResult<String> {
    Ok(match format {
        ConfigFormat::Toml => toml::to_string_pretty(&ItemList { items })?,
        ConfigFormat::Json => serde_json::to_string_pretty(&ItemList { items })? + "\n",
        ConfigFormat::Plain => items
            .iter()
            .map(|item| {
                format!(
                    "{}\t{}\t{}\n",
                    item.name,
                    item.install_method,
                    crate::cache::remote_loc(item, "<version>", "")
                )
            })
            .collect(),
    })
}
