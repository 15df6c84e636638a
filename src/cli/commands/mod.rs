//! CLI command implementations

pub mod configs;
pub mod install;
pub mod publish;
pub mod purge;

pub use configs::execute as configs;
pub use install::execute as install;
pub use publish::execute as publish;
pub use purge::execute as purge;

use crate::config::ItemConfig;
use crate::error::InstacloneResult;
use crate::version;

/// Resolve every item's version up front, so a bad version source fails
/// before anything is transferred
pub(crate) fn resolve_versions(
    items: Vec<ItemConfig>,
) -> InstacloneResult<Vec<(ItemConfig, String)>> {
    items
        .into_iter()
        .map(|item| {
            let version = version::resolve(&item)?;
            Ok((item, version))
        })
        .collect()
}
