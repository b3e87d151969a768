//! CLI entry point for the crawling engine.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use crawlkit::extract::default_extractor;
use crawlkit::{CrawlerBuilder, ExportFormat, Exporter, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum CliFormat {
    #[default]
    Json,
    Jsonl,
    Csv,
    Sqlite,
}

impl From<CliFormat> for ExportFormat {
    fn from(format: CliFormat) -> Self {
        match format {
            CliFormat::Json => Self::Json,
            CliFormat::Jsonl => Self::Jsonl,
            CliFormat::Csv => Self::Csv,
            CliFormat::Sqlite => Self::Sqlite,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[value(rename_all = "UPPER")]
enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

/// Polite, concurrent web crawler.
#[derive(Debug, Parser)]
#[command(name = "crawlkit", version, about)]
struct Cli {
    /// Single URL to crawl.
    #[arg(short, long)]
    url: Option<String>,

    /// File containing URLs, one per line; `#` comments and blanks ignored.
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Number of concurrent workers.
    #[arg(short, long, default_value_t = 3)]
    workers: usize,

    /// Export format.
    #[arg(long, value_enum, default_value_t = CliFormat::Json)]
    format: CliFormat,

    /// Output filename (timestamped default if omitted).
    #[arg(short, long)]
    output: Option<String>,

    /// File containing proxy URLs, one per line.
    #[arg(short, long)]
    proxies: Option<PathBuf>,

    /// Logging level.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("crawlkit={}", level.as_filter())));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_urls_from_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read URL file {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut urls = Vec::new();
    if let Some(url) = cli.url.clone() {
        urls.push(url);
    }
    if let Some(file) = cli.file.as_deref() {
        urls.extend(load_urls_from_file(file)?);
    }
    if urls.is_empty() {
        anyhow::bail!("no URLs provided; use --url or --file");
    }

    let crawler = CrawlerBuilder::from_env()
        .with_extractor(default_extractor)
        .build()?;

    if let Some(proxy_file) = cli.proxies.as_deref() {
        let count = crawler.proxy_pool().load_from_file(proxy_file).await?;
        tracing::info!("Loaded proxies {{ count: {count} }}");
    }

    println!("URLs to process: {}", urls.len());
    println!("Workers: {}", cli.workers);

    let engine = crawler.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, draining workers...");
            engine.stop();
        }
    });

    let results = crawler.run(&urls, cli.workers, Priority::Normal).await?;

    if !results.is_empty() {
        let exporter = Exporter::new(crawler.config().storage.export_path());
        let path = exporter
            .export(&results, cli.format.into(), cli.output.as_deref())
            .await?;
        println!("Results exported to: {}", path.display());
    }

    let stats = crawler.stats().await;
    println!("\nCrawl complete");
    println!("  processed:        {}", stats.urls_processed);
    println!("  successful:       {}", stats.urls_successful);
    println!("  failed:           {}", stats.urls_failed);
    println!("  bytes downloaded: {}", stats.bytes_downloaded);
    println!("  http fetches:     {}", stats.http_fetches);
    println!("  browser fetches:  {}", stats.browser_fetches);
    println!("  duration:         {:.2}s", stats.duration_seconds);
    println!("  success rate:     {:.1}%", stats.success_rate);

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
