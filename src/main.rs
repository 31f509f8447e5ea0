//! sqldesk - run SQL against saved SQLite and PostgreSQL connections.

use anyhow::{bail, Context, Result};
use sqldesk::catalog::{self, groups, CatalogDb};
use sqldesk::cli::{Cli, Command, ConnectionsCommand, OutputFormat, Target, TargetArgs};
use sqldesk::config::Config;
use sqldesk::db::{self, schema, ConnectionDescriptor, SqlxBackend};
use sqldesk::logging;
use sqldesk::output;
use sqldesk::query::{Coordinator, QueryOutcome};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    match &cli.log_file {
        Some(path) => logging::init_file_logging(path),
        None => logging::init_stderr_logging(),
    }

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Runs the command; `Ok(false)` means the query did not succeed.
async fn run(cli: Cli) -> Result<bool> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    match cli.command {
        Command::Query {
            target,
            timeout_ms,
            format,
            sql,
        } => {
            let descriptor = resolve_target(&target, &config).await?;
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.execution.timeout());
            let outcome = run_query(&config, descriptor, sql, timeout).await?;
            print_outcome(&outcome, format)?;
            Ok(outcome.is_success())
        }
        Command::Tables {
            target,
            preview,
            limit,
            last,
        } => {
            let descriptor = resolve_target(&target, &config).await?;
            match preview {
                Some(table) => {
                    let end = if last {
                        schema::PreviewEnd::Last
                    } else {
                        schema::PreviewEnd::First
                    };
                    let sql = schema::preview_sql(descriptor.kind(), &table, limit, end);
                    let timeout = config.execution.timeout();
                    let outcome = run_query(&config, descriptor, sql, timeout).await?;
                    print_outcome(&outcome, OutputFormat::Text)?;
                    Ok(outcome.is_success())
                }
                None => {
                    list_tables(&descriptor).await?;
                    Ok(true)
                }
            }
        }
        Command::Connections { action } => manage_connections(action, &config).await,
    }
}

/// Resolves command-line target flags to a descriptor.
///
/// Saved names are looked up in the catalog first, then in the config file.
async fn resolve_target(target: &TargetArgs, config: &Config) -> Result<ConnectionDescriptor> {
    let name = match target.to_target()? {
        Target::Descriptor(descriptor) => return Ok(descriptor),
        Target::Named(name) => name,
    };

    let catalog = open_catalog(config).await?;
    let resolved = resolve_name(&catalog, &name, config).await;
    catalog.close().await;
    resolved
}

/// Looks up a saved connection and records its use.
async fn resolve_name(
    catalog: &CatalogDb,
    name: &str,
    config: &Config,
) -> Result<ConnectionDescriptor> {
    if let Some(saved) = catalog::connections::get_connection(catalog.pool(), name).await? {
        if let Err(e) = catalog::connections::touch_connection(catalog.pool(), name).await {
            warn!("Failed to record use of connection '{name}': {e}");
        }
        info!("Using saved connection '{name}'");
        return Ok(saved.descriptor);
    }

    match config.get_connection(name) {
        Some(descriptor) => {
            info!("Using connection '{name}' from config file");
            Ok(descriptor.clone())
        }
        None => bail!("Connection '{name}' not found in catalog or config file"),
    }
}

async fn open_catalog(config: &Config) -> Result<CatalogDb> {
    let path = config.catalog.resolved_path();
    CatalogDb::open(&path)
        .await
        .with_context(|| format!("Could not open catalog at {}", path.display()))
}

/// Runs one statement on a fresh slot; Ctrl-C cancels it.
async fn run_query(
    config: &Config,
    descriptor: ConnectionDescriptor,
    sql: String,
    timeout: Duration,
) -> Result<QueryOutcome> {
    let (coordinator, mut events) = Coordinator::new(Arc::new(SqlxBackend), &config.execution)?;
    let slot = coordinator.open_slot();
    let task = coordinator.submit_with_timeout(slot, descriptor, sql, timeout)?;
    info!("Submitted {task} on slot {slot}");

    let mut interrupted = false;
    let event = loop {
        tokio::select! {
            event = events.recv() => break event,
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {e}");
                }
                interrupted = true;
                coordinator.cancel(slot);
            }
        }
    };

    coordinator.shutdown();
    match event {
        Some(event) => Ok(event.outcome),
        None => bail!("Query finished without reporting an outcome"),
    }
}

fn print_outcome(outcome: &QueryOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if outcome.is_success() {
                println!("{}", output::render_text(outcome));
            } else {
                eprintln!("{}", output::render_text(outcome));
            }
        }
        OutputFormat::Json => {
            let doc = output::render_json(outcome);
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }
    Ok(())
}

async fn list_tables(descriptor: &ConnectionDescriptor) -> Result<()> {
    let mut client = db::connect(descriptor).await?;
    let tables = client.list_tables().await;
    if let Err(e) = client.close().await {
        warn!("Failed to close connection: {e}");
    }
    let tables = tables?;

    if tables.is_empty() {
        println!("No tables found.");
    } else {
        println!("{}", output::format_tables(&tables));
    }
    Ok(())
}

/// Runs a `connections` subcommand; `Ok(false)` means a connection test failed.
async fn manage_connections(action: ConnectionsCommand, config: &Config) -> Result<bool> {
    let catalog = open_catalog(config).await?;
    let result = match action {
        ConnectionsCommand::List => list_connections(&catalog).await.map(|()| true),
        ConnectionsCommand::Add {
            name,
            group,
            create,
            target,
        } => add_connection(&catalog, &name, group.as_deref(), create, &target)
            .await
            .map(|()| true),
        ConnectionsCommand::Remove { name } => {
            catalog::connections::delete_connection(catalog.pool(), &name)
                .await
                .map(|()| {
                    println!("Removed connection '{name}'.");
                    true
                })
                .map_err(Into::into)
        }
        ConnectionsCommand::Test { target } => test_connection(&catalog, &target, config).await,
    };
    catalog.close().await;
    result
}

/// Opens and closes one connection to the target.
async fn test_connection(catalog: &CatalogDb, target: &TargetArgs, config: &Config) -> Result<bool> {
    let descriptor = match target.to_target()? {
        Target::Descriptor(descriptor) => descriptor,
        Target::Named(name) => resolve_name(catalog, &name, config).await?,
    };

    info!("Testing connection to {}", descriptor.display_string());
    match db::test_connection(&descriptor).await {
        Ok(()) => {
            println!("Connection successful!");
            Ok(true)
        }
        Err(e) => {
            warn!("Connection test failed: {e}");
            eprintln!("Failed to connect:\n{}", e.message());
            Ok(false)
        }
    }
}

async fn list_connections(catalog: &CatalogDb) -> Result<()> {
    let groups = groups::list_groups(catalog.pool()).await?;
    for group in &groups {
        let saved = catalog::connections::list_connections(catalog.pool(), Some(group.id)).await?;
        println!("{}", group.name);
        if saved.is_empty() {
            println!("  (empty)");
        }
        for connection in saved {
            println!(
                "  {}  {}  (used {} times)",
                connection.name,
                connection.descriptor.display_string(),
                connection.usage_count
            );
        }
    }
    Ok(())
}

async fn add_connection(
    catalog: &CatalogDb,
    name: &str,
    group: Option<&str>,
    create: bool,
    target: &TargetArgs,
) -> Result<()> {
    let descriptor = match target.to_target()? {
        Target::Descriptor(descriptor) => descriptor,
        Target::Named(_) => bail!("A saved connection needs --url, --sqlite or network flags"),
    };
    descriptor.validate()?;

    if create {
        let ConnectionDescriptor::File { path } = &descriptor else {
            bail!("--create only applies to SQLite files");
        };
        db::create_sqlite_database(path).await?;
        println!("Database created successfully at: {}", path.display());
    }

    let group_name = group.unwrap_or_else(|| groups::default_group_for(descriptor.kind()));
    let group_id = match groups::get_group_by_name(catalog.pool(), group_name).await? {
        Some(group) => group.id,
        None => groups::create_group(catalog.pool(), group_name, None).await?,
    };

    catalog::connections::create_connection(catalog.pool(), group_id, name, &descriptor).await?;
    println!("Saved connection '{name}' in {group_name}.");
    Ok(())
}
