use std::path::PathBuf;

use async_trait::async_trait;

use super::{open_catalog, CommandHandler};
use crate::config::Settings;
use crate::{PayloadError, Result};

/// Handler for the `show` command
pub struct ShowCommand {
    pub settings: Settings,
    pub manifest_dir: Option<PathBuf>,
    pub id: String,
}

#[async_trait]
impl CommandHandler for ShowCommand {
    async fn execute(&self) -> Result<()> {
        let index = open_catalog(&self.settings, self.manifest_dir.as_deref());
        let entry = index
            .get(&self.id)
            .ok_or_else(|| PayloadError::NotFound(self.id.clone()))?;
        print!("{}", serde_yaml_ng::to_string(&entry)?);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "show"
    }
}
