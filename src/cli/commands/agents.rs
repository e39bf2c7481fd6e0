use std::path::PathBuf;

use async_trait::async_trait;
use tabled::{settings::Style, Table, Tabled};

use super::CommandHandler;
use crate::catalog::Page;
use crate::dispatch::{Agent, AgentFilter, AgentFleet, StaticFleet};
use crate::Result;

#[derive(Tabled)]
struct AgentRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Platform")]
    platform: String,
    #[tabled(rename = "Executors")]
    executors: String,
}

/// Handler for the `agents` command
pub struct AgentsCommand {
    pub roster: PathBuf,
    pub search: String,
    pub online_only: bool,
    pub page: usize,
    pub page_size: usize,
    pub json: bool,
}

#[async_trait]
impl CommandHandler for AgentsCommand {
    async fn execute(&self) -> Result<()> {
        let page = self.select().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&page)?);
            return Ok(());
        }
        let rows: Vec<AgentRow> = page
            .items
            .iter()
            .map(|a| AgentRow {
                id: a.id.clone(),
                host: a.host.clone(),
                platform: a.platform.clone(),
                executors: a.executors.join(","),
            })
            .collect();
        println!("{}", Table::new(&rows).with(Style::rounded()));
        println!("{} agent(s)", page.total);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "agents"
    }
}

impl AgentsCommand {
    async fn select(&self) -> Result<Page<Agent>> {
        let fleet = StaticFleet::from_path(&self.roster)?;
        let filter = AgentFilter::search(self.search.clone()).online(self.online_only);
        let agents = fleet.list_agents(&filter).await?;
        Ok(Page::slice(agents, self.page, self.page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_online_only_drops_silent_agents() {
        let dir = TempDir::new().unwrap();
        let roster = dir.path().join("agents.yml");
        std::fs::write(
            &roster,
            "agents:\n  - id: a1\n    host: ws-1\n    watchdog: 30\n  - id: a2\n    host: ws-2\n",
        )
        .unwrap();

        let mut command = AgentsCommand {
            roster,
            search: String::new(),
            online_only: false,
            page: 1,
            page_size: 0,
            json: true,
        };
        assert_eq!(command.select().await.unwrap().total, 2);

        command.online_only = true;
        let page = command.select().await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, "a1");
    }
}
