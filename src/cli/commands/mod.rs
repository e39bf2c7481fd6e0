pub mod agents;
pub mod command;
pub mod export;
pub mod list;
pub mod show;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::{ManifestLoader, PayloadIndex};
use crate::config::Settings;
use crate::Result;

/// Common trait for all command handlers
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self) -> Result<()>;

    /// Command name for logging
    fn name(&self) -> &'static str;
}

/// Build an index from the manifest directory, preferring an explicit override
pub fn open_catalog(settings: &Settings, manifest_dir: Option<&Path>) -> Arc<PayloadIndex> {
    let index = Arc::new(PayloadIndex::new());
    let dir = manifest_dir.unwrap_or(&settings.manifest_dir);
    ManifestLoader::new(&index).load_dir(dir);
    index
}

/// Cut text to `max` characters for table cells
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate("ééééééééé", 5), "éé...");
    }
}
