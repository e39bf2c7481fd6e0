use std::path::PathBuf;

use async_trait::async_trait;

use super::{open_catalog, CommandHandler};
use crate::catalog::{render, ExportFormat, FilterSpec, QueryEngine};
use crate::config::Settings;
use crate::Result;

/// Handler for the `export` command
pub struct ExportCommand {
    pub settings: Settings,
    pub manifest_dir: Option<PathBuf>,
    pub format: ExportFormat,
    pub ids: Vec<String>,
    pub search: String,
    pub output: Option<PathBuf>,
}

#[async_trait]
impl CommandHandler for ExportCommand {
    async fn execute(&self) -> Result<()> {
        let index = open_catalog(&self.settings, self.manifest_dir.as_deref());
        let entries = if self.ids.is_empty() {
            let filter = FilterSpec::new()
                .with_search(self.search.clone())
                .with_page(1, self.settings.export_limit);
            QueryEngine::new(index).query(&filter).items
        } else {
            index.entries(&self.ids)
        };
        let bytes = render(&entries, self.format)?;

        match &self.output {
            Some(path) => {
                std::fs::write(path, &bytes)?;
                eprintln!("Exported {} payloads to {}", entries.len(), path.display());
            }
            None => print!("{}", String::from_utf8_lossy(&bytes)),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "export"
    }
}
