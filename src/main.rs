use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;

use newswire::categories::CategoryCatalog;
use newswire::cli::{Cli, Command, HistoryCommand, ReadCommand, SourcesCommand};
use newswire::collect::CollectorSet;
use newswire::collect::feed::FeedCollector;
use newswire::model::{SourceConfig, SourceKind};
use newswire::refresh::RefreshOrchestrator;
use newswire::registry::{SourcePatch, SourceRegistry};
use newswire::store::DurableStore;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    newswire::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let store = Arc::new(
        DurableStore::open(&cli.data_dir)
            .await
            .context("open data directory")?,
    );
    let registry = Arc::new(
        SourceRegistry::load(cli.data_dir.join("sources.json"))
            .await
            .context("load sources")?,
    );

    match cli.command {
        Command::Refresh => refresh(registry, store).await.context("refresh")?,
        Command::Sources { command } => sources(&registry, command).await?,
        Command::History { command } => history(&store, command).await?,
        Command::Read { command } => read(&store, command).await?,
    }

    Ok(())
}

async fn refresh(registry: Arc<SourceRegistry>, store: Arc<DurableStore>) -> anyhow::Result<()> {
    let mut collectors = CollectorSet::new();
    // No scraper driver in the CLI; scraper sources are skipped and listed
    // in the outcome. The desktop frontend registers its own driver.
    collectors.register(
        SourceKind::Feed,
        Arc::new(FeedCollector::new().context("build feed collector")?),
    );

    let orchestrator = Arc::new(RefreshOrchestrator::new(
        registry,
        store,
        Arc::new(collectors),
        Arc::new(CategoryCatalog::default()),
    ));
    orchestrator
        .load_cached()
        .await
        .context("load cached articles")?;

    let outcome = orchestrator.refresh_and_wait().await?;
    orchestrator.close().await;

    println!("{}", outcome.summary());
    for (name, error) in &outcome.failed_sources {
        println!("  {name}: {error}");
    }
    if !outcome.skipped_sources.is_empty() {
        println!("  skipped (no collector): {}", outcome.skipped_sources.join(", "));
    }
    if let Some(error) = &outcome.persist_error {
        println!("  warning: results not persisted: {error}");
    }

    Ok(())
}

async fn sources(registry: &SourceRegistry, command: SourcesCommand) -> anyhow::Result<()> {
    match command {
        SourcesCommand::List => {
            for source in registry.list().await {
                let marker = if source.enabled { " " } else { "-" };
                let builtin = if source.is_builtin { " [builtin]" } else { "" };
                println!(
                    "{marker} {} ({}){builtin} {}",
                    source.name,
                    source.kind,
                    source.endpoint.as_deref().unwrap_or("")
                );
            }
        }
        SourcesCommand::Add(args) => {
            registry
                .add(SourceConfig::feed(args.name, args.url, args.category))
                .await
                .context("add source")?;
        }
        SourcesCommand::Remove { name } => {
            registry.remove(&name).await.context("remove source")?;
        }
        SourcesCommand::Enable { name } => {
            set_enabled(registry, &name, true).await?;
        }
        SourcesCommand::Disable { name } => {
            set_enabled(registry, &name, false).await?;
        }
    }
    Ok(())
}

async fn set_enabled(registry: &SourceRegistry, name: &str, enabled: bool) -> anyhow::Result<()> {
    registry
        .update(
            name,
            SourcePatch {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
        .await
        .with_context(|| format!("update source {name:?}"))
}

async fn history(store: &DurableStore, command: HistoryCommand) -> anyhow::Result<()> {
    match command {
        HistoryCommand::List => {
            for entry in store.load_history().await.context("load history")? {
                println!(
                    "{}  {}  ({})  {}",
                    entry.visited_at.format("%Y-%m-%d %H:%M"),
                    entry.title,
                    entry.source_name,
                    entry.link
                );
            }
        }
        HistoryCommand::Delete { link } => {
            store
                .delete_history_entry(&link)
                .await
                .context("delete history entry")?;
        }
        HistoryCommand::Clear => {
            store.clear_history().await.context("clear history")?;
        }
    }
    Ok(())
}

async fn read(store: &DurableStore, command: ReadCommand) -> anyhow::Result<()> {
    match command {
        ReadCommand::Mark { link } => {
            store.mark_read(&link).await.context("mark read")?;
        }
        ReadCommand::Clear => {
            store.clear_read_status().await.context("clear read status")?;
        }
    }
    Ok(())
}
