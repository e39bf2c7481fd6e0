use clap::Parser;
use payloads::{
    catalog::{ExportFormat, FilterSpec},
    cli::commands::{
        agents::AgentsCommand,
        command::CommandCommand,
        export::ExportCommand,
        list::{FacetsCommand, ListCommand},
        show::ShowCommand,
        validate::ValidateCommand,
        CommandHandler,
    },
    cli::{Cli, Commands, LogLevel},
    config::Settings,
    Result,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn initialize_tracing(log_level: LogLevel) {
    // RUST_LOG wins over the flag when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(cli.log_level);

    let settings = Settings::load(cli.config.as_deref())?;
    let manifest_dir = cli.manifest_dir;

    let handler: Box<dyn CommandHandler> = match cli.command {
        Commands::Validate { paths, json } => Box::new(ValidateCommand::new(paths, json)),
        Commands::List {
            search,
            tactics,
            os,
            file_types,
            tags,
            status,
            severity,
            page,
            page_size,
            sort,
            json,
        } => Box::new(ListCommand {
            settings,
            manifest_dir,
            filter: FilterSpec {
                search,
                tactics,
                os,
                file_types,
                tags,
                status,
                severity,
                page,
                page_size,
                sort,
            },
            json,
        }),
        Commands::Facets { search, json } => Box::new(FacetsCommand {
            settings,
            manifest_dir,
            search,
            json,
        }),
        Commands::Show { id } => Box::new(ShowCommand {
            settings,
            manifest_dir,
            id,
        }),
        Commands::Export {
            format,
            ids,
            search,
            output,
        } => Box::new(ExportCommand {
            settings,
            manifest_dir,
            format: format.parse::<ExportFormat>()?,
            ids,
            search,
            output,
        }),
        Commands::Command { id, platform } => Box::new(CommandCommand {
            settings,
            manifest_dir,
            id,
            platform,
        }),
        Commands::Agents {
            roster,
            search,
            online_only,
            page,
            page_size,
            json,
        } => Box::new(AgentsCommand {
            roster,
            search,
            online_only,
            page,
            page_size,
            json,
        }),
    };

    debug!("Running {} command", handler.name());
    handler.execute().await
}
