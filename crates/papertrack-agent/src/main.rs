//! Papertrack — incremental arXiv and Crossref tracking.
//! Entry point for the `papertrack` binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use papertrack_common::config::KNOWN_SOURCES;
use papertrack_common::AppConfig;
use papertrack_ingestion::sources::arxiv::ArxivClient;
use papertrack_ingestion::sources::crossref::CrossrefClient;
use papertrack_ingestion::{
    compile_all, run_tracking, MemoryLedger, PaperFeed, SeenLedger, SqliteLedger, TrackingJob,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "papertrack", version, about = "Track new papers for saved queries")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every configured query and print the new papers as JSON
    Search(SearchArgs),
}

#[derive(Args)]
struct SearchArgs {
    /// YAML config merged over the built-in defaults
    #[arg(long, env = "PAPERTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Keep the seen-paper ledger in memory for this run only
    #[arg(long)]
    no_storage: bool,

    /// Print the compiled query expressions and exit
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Search(args) => search(args).await,
    }
}

async fn search(args: SearchArgs) -> anyhow::Result<()> {
    let config = AppConfig::load(args.config.as_deref()).context("Could not load configuration")?;
    init_tracing(&config);

    info!("Papertrack {}", env!("CARGO_PKG_VERSION"));
    info!(
        queries = config.queries.len(),
        sources = ?config.search.sources,
        storage = config.storage.enabled && !args.no_storage,
        "Configuration loaded"
    );

    let feeds = build_feeds(&config)?;
    let job = TrackingJob::from_config(&config);

    if args.dry_run {
        for compiled in compile_all(&job, &feeds) {
            println!("{}\t{}\t{}", compiled.name, compiled.source, compiled.expression);
        }
        return Ok(());
    }

    let ledger = build_ledger(&config, args.no_storage)?;
    let report = run_tracking(&job, &feeds, ledger, chrono::Utc::now()).await?;

    for degraded in report.degraded() {
        for failed in degraded.failed_sources() {
            warn!(
                query = %degraded.name,
                source = %failed.source,
                kept = failed.accepted,
                "Source ended on a feed failure"
            );
        }
    }
    if report.all_failed() {
        bail!("Every search source failed");
    }
    info!(total_new = report.total_new, "Done");

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// `RUST_LOG` wins; otherwise the configured level.
fn init_tracing(config: &AppConfig) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log.filter_directive())),
        )
        .init();
}

/// One feed per configured source, in configured order.
fn build_feeds(config: &AppConfig) -> anyhow::Result<Vec<Arc<dyn PaperFeed>>> {
    if config.search.sources.is_empty() {
        bail!("No search source configured");
    }
    config
        .search
        .sources
        .iter()
        .map(|source| -> anyhow::Result<Arc<dyn PaperFeed>> {
            let feed: Arc<dyn PaperFeed> = match source.as_str() {
                "arxiv" => Arc::new(ArxivClient::new(config.storage.keep_arxiv_version)?),
                "crossref" => Arc::new(CrossrefClient::new()?),
                other => bail!("Unsupported source {other:?}; known sources: {KNOWN_SOURCES:?}"),
            };
            Ok(feed)
        })
        .collect()
}

fn build_ledger(config: &AppConfig, no_storage: bool) -> anyhow::Result<Arc<dyn SeenLedger>> {
    if no_storage || !config.storage.enabled {
        info!("Using in-memory seen ledger");
        let ledger: Arc<dyn SeenLedger> = Arc::new(MemoryLedger::new());
        return Ok(ledger);
    }
    let path = Path::new(&config.storage.db_path);
    let ledger = SqliteLedger::open(path)
        .with_context(|| format!("Could not open seen-paper database {}", path.display()))?;
    info!(path = %path.display(), "Seen ledger opened");
    let ledger: Arc<dyn SeenLedger> = Arc::new(ledger);
    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_flags() {
        let cli = Cli::try_parse_from(["papertrack", "search", "--config", "my.yml", "--dry-run"])
            .unwrap();
        let Command::Search(args) = cli.command;
        assert_eq!(args.config, Some(PathBuf::from("my.yml")));
        assert!(args.dry_run);
        assert!(!args.no_storage);
    }

    #[test]
    fn test_search_subcommand_required() {
        assert!(Cli::try_parse_from(["papertrack"]).is_err());
    }

    #[test]
    fn test_no_storage_uses_memory_ledger() {
        let config = AppConfig::from_yaml_str("queries: [{TITLE: {OR: [diffusion]}}]").unwrap();
        assert!(build_ledger(&config, true).is_ok());
        assert_eq!(build_feeds(&config).unwrap().len(), 1);
    }

    #[test]
    fn test_builds_every_configured_source() {
        let config = AppConfig::from_yaml_str(
            "search: {sources: [crossref, arxiv]}\nqueries: [{TITLE: {OR: [diffusion]}}]",
        )
        .unwrap();
        let feeds = build_feeds(&config).unwrap();
        let sources: Vec<&str> = feeds.iter().map(|f| f.source().as_str()).collect();
        assert_eq!(sources, vec!["crossref", "arxiv"]);
    }
}
