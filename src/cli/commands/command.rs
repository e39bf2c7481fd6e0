use std::path::PathBuf;

use async_trait::async_trait;

use super::{open_catalog, CommandHandler};
use crate::catalog::Platform;
use crate::config::Settings;
use crate::dispatch::{build_command, delivery_url, preferred_executor};
use crate::{PayloadError, Result};

/// Handler for the `command` command
pub struct CommandCommand {
    pub settings: Settings,
    pub manifest_dir: Option<PathBuf>,
    pub id: String,
    pub platform: String,
}

#[async_trait]
impl CommandHandler for CommandCommand {
    async fn execute(&self) -> Result<()> {
        let index = open_catalog(&self.settings, self.manifest_dir.as_deref());
        let entry = index
            .get(&self.id)
            .ok_or_else(|| PayloadError::NotFound(self.id.clone()))?;
        let url = delivery_url(&entry, &self.settings.base_url)?;
        let platform = Platform::from_agent(&self.platform);

        eprintln!("# executor: {}", preferred_executor(platform));
        println!("{}", build_command(platform, &entry.file_type, &entry.id, &url));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
