use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Payloads: index, search and dispatch a library of payload artifacts
#[derive(Parser)]
#[command(name = "payloads")]
#[command(version = "0.1.0")]
#[command(about = "Index, search and dispatch a library of payload artifacts")]
#[command(
    long_about = "Payloads loads YAML payload manifests into an in-memory index, answers faceted searches over them and renders the commands agents use to fetch and run each payload."
)]
pub struct Cli {
    /// Settings file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Manifest directory, overriding the settings file
    #[arg(long, global = true)]
    pub manifest_dir: Option<PathBuf>,

    /// Log verbosity, written to stderr
    #[arg(long, value_enum, default_value = "warn", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate manifest files or directories
    Validate {
        /// Manifest files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// List payloads matching a filter
    List {
        /// Free text; every word must match
        #[arg(short, long, default_value = "")]
        search: String,

        /// ATT&CK tactic key (repeatable)
        #[arg(long = "tactic")]
        tactics: Vec<String>,

        /// Target platform (repeatable)
        #[arg(long)]
        os: Vec<String>,

        /// File type (repeatable)
        #[arg(long = "file-type")]
        file_types: Vec<String>,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Status (repeatable)
        #[arg(long)]
        status: Vec<String>,

        /// Severity (repeatable)
        #[arg(long)]
        severity: Vec<String>,

        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Page size (0 uses the configured default)
        #[arg(long, default_value_t = 0)]
        page_size: usize,

        /// Sort as <field>:<asc|desc>
        #[arg(long, default_value = "updated_at:desc")]
        sort: String,

        #[arg(long)]
        json: bool,
    },

    /// Show facet counts
    Facets {
        #[arg(short, long, default_value = "")]
        search: String,

        #[arg(long)]
        json: bool,
    },

    /// Show one payload
    Show {
        id: String,
    },

    /// Export payloads as YAML or CSV
    Export {
        /// yaml or csv
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Payload ids; exports every match of --search when empty
        #[arg(long = "id")]
        ids: Vec<String>,

        #[arg(short, long, default_value = "")]
        search: String,

        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the command an agent would run for a payload
    Command {
        id: String,

        /// Agent platform string, e.g. windows, linux, darwin
        #[arg(short, long)]
        platform: String,
    },

    /// List agents from a roster file
    Agents {
        /// YAML roster with an `agents` list
        #[arg(long)]
        roster: PathBuf,

        #[arg(short, long, default_value = "")]
        search: String,

        /// Only agents that are checking in
        #[arg(long)]
        online_only: bool,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 0)]
        page_size: usize,

        #[arg(long)]
        json: bool,
    },
}
