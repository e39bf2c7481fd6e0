use std::path::PathBuf;

use async_trait::async_trait;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use super::{open_catalog, truncate, CommandHandler};
use crate::catalog::{CatalogEntry, FilterSpec, QueryEngine};
use crate::config::Settings;
use crate::Result;

/// Table row for `list`
#[derive(Tabled)]
struct PayloadRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "OS")]
    os: String,
    #[tabled(rename = "Type")]
    file_type: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Tactics")]
    tactics: String,
}

impl From<&CatalogEntry> for PayloadRow {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            id: entry.id.clone(),
            name: truncate(&entry.name, 40),
            os: entry
                .os
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(","),
            file_type: entry.file_type.clone(),
            severity: entry.severity.to_string(),
            status: entry.status.to_string(),
            tactics: entry.tactics.join(","),
        }
    }
}

/// Handler for the `list` command
pub struct ListCommand {
    pub settings: Settings,
    pub manifest_dir: Option<PathBuf>,
    pub filter: FilterSpec,
    pub json: bool,
}

#[async_trait]
impl CommandHandler for ListCommand {
    async fn execute(&self) -> Result<()> {
        let engine = QueryEngine::new(open_catalog(&self.settings, self.manifest_dir.as_deref()));
        let mut filter = self.filter.clone();
        if filter.page_size == 0 {
            filter.page_size = self.settings.default_page_size;
        }
        let page = engine.query(&filter);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&page)?);
            return Ok(());
        }
        if page.items.is_empty() {
            println!("No payloads found ({} total).", page.total);
            return Ok(());
        }

        let rows: Vec<PayloadRow> = page.items.iter().map(PayloadRow::from).collect();
        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()))
            .to_string();
        println!("{table}");
        println!(
            "Page {} ({} per page), {} total",
            page.page, page.page_size, page.total
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "list"
    }
}

/// Handler for the `facets` command
pub struct FacetsCommand {
    pub settings: Settings,
    pub manifest_dir: Option<PathBuf>,
    pub search: String,
    pub json: bool,
}

#[async_trait]
impl CommandHandler for FacetsCommand {
    async fn execute(&self) -> Result<()> {
        let engine = QueryEngine::new(open_catalog(&self.settings, self.manifest_dir.as_deref()));
        let facets = engine.facets(&self.search);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&facets)?);
            return Ok(());
        }
        for (dimension, counts) in &facets {
            println!("{dimension}:");
            for count in counts {
                println!("  {:<24} {}", count.key, count.count);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "facets"
    }
}
