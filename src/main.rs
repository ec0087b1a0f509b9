//! rustcitedby - Google Scholar citation counts for paper metadata CSVs
//!
//! ## Usage
//!
//! ```bash
//! rustcitedby enrich papers.csv -o updated_citations.csv
//! rustcitedby enrich papers.csv -o updated_citations.csv --resume
//! rustcitedby lookup "Attention Is All You Need"
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rustcitedby::config::{DelayRange, RunConfig, DEFAULT_CHECKPOINT_EVERY, DEFAULT_OUTPUT};
use rustcitedby::cookies::CookieStore;
use rustcitedby::gscholar::{ScholarClient, ScholarConfig};
use rustcitedby::title::is_valid_title;
use rustcitedby::{pipeline, LookupClient};
use std::fs::OpenOptions;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Google Scholar citation enrichment for paper metadata CSVs
#[derive(Parser)]
#[command(name = "rustcitedby")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add citation counts to every row of a CSV
    Enrich {
        /// Input CSV with `title` and `submitter` columns
        input: PathBuf,

        /// Output CSV (also used for checkpoints)
        #[arg(short, long, default_value = DEFAULT_OUTPUT)]
        output: PathBuf,

        /// Minimum pause between requests, in seconds
        #[arg(long, default_value_t = 2.0)]
        min_delay: f64,

        /// Maximum pause between requests, in seconds
        #[arg(long, default_value_t = 5.0)]
        max_delay: f64,

        /// Save the output every N processed rows (0 disables)
        #[arg(long, default_value_t = DEFAULT_CHECKPOINT_EVERY)]
        checkpoint_every: usize,

        /// Continue from the output file if it exists
        #[arg(long)]
        resume: bool,

        /// Look up rows again even if a previous pass completed them
        #[arg(long)]
        no_skip_completed: bool,

        #[command(flatten)]
        scholar: ScholarArgs,
    },

    /// Look up a single title
    Lookup {
        title: String,

        /// Send the query even if the title fails validation
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        scholar: ScholarArgs,
    },

    /// Manage stored cookies
    Cookies {
        /// Cookie file (default: ~/.rustcitedby_cookies.json)
        #[arg(long, global = true)]
        cookie_file: Option<PathBuf>,

        #[command(subcommand)]
        action: CookieAction,
    },
}

#[derive(Subcommand)]
enum CookieAction {
    /// Show cookie file path
    Path,
    /// Clear stored cookies
    Clear,
    /// Read a JSON cookie array (browser export) from stdin and store it
    Import,
}

#[derive(Args)]
struct ScholarArgs {
    /// Proxy URL (e.g., http://127.0.0.1:7890); repeat to rotate
    #[arg(long = "proxy")]
    proxies: Vec<String>,

    /// File with one proxy URL per line
    #[arg(long)]
    proxy_file: Option<PathBuf>,

    /// Send the same User-Agent on every request
    #[arg(long)]
    no_rotate_user_agent: bool,

    /// Mirror site URL
    #[arg(long)]
    mirror: Option<String>,

    /// Cookie file (default: ~/.rustcitedby_cookies.json)
    #[arg(long)]
    cookie_file: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

impl From<ScholarArgs> for ScholarConfig {
    fn from(args: ScholarArgs) -> Self {
        Self {
            base_url: args.mirror,
            proxies: args.proxies,
            proxy_file: args.proxy_file,
            rotate_user_agent: !args.no_rotate_user_agent,
            cookie_file: args.cookie_file,
            timeout: Duration::from_secs(args.timeout),
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug, cli.json_logs, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Enrich {
            input,
            output,
            min_delay,
            max_delay,
            checkpoint_every,
            resume,
            no_skip_completed,
            scholar,
        } => {
            let config = RunConfig {
                delay_range: DelayRange::from_secs_f64(min_delay, max_delay)
                    .context("Invalid --min-delay/--max-delay")?,
                checkpoint_every,
                skip_completed: !no_skip_completed,
                resume,
                scholar: scholar.into(),
                ..RunConfig::new(input, output)
            };
            run_enrich(config).await
        }
        Commands::Lookup {
            title,
            force,
            scholar,
        } => run_lookup(&title, force, scholar.into()).await,
        Commands::Cookies { cookie_file, action } => handle_cookies(cookie_file, action),
    }
}

/// Console logging (plain or JSON), optionally mirrored to a file.
fn init_logging(debug: bool, json: bool, log_file: Option<&Path>) -> Result<()> {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let (plain_layer, json_layer) = if json {
        (None, Some(fmt::layer().json()))
    } else {
        (Some(fmt::layer().with_target(true).with_thread_ids(false)), None)
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    Ok(())
}

// ============================================================================
// Enrichment
// ============================================================================

async fn run_enrich(config: RunConfig) -> Result<()> {
    info!(
        input = %config.input_path.display(),
        output = %config.output_path.display(),
        proxy_enabled = config.proxy_enabled(),
        resume = config.resume,
        "Starting the Google Scholar citation scraper"
    );

    let client = ScholarClient::new(&config.scholar).context("Failed to set up Scholar client")?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let summary = pipeline::enrich_file(client, &config, &cancel)
        .await
        .with_context(|| format!("Enrichment of {} failed", config.source_path().display()))?;

    println!("\n{}", summary);
    if summary.interrupted {
        println!(
            "Interrupted. Partial results saved to {}; rerun with --resume to continue.",
            config.output_path.display()
        );
    } else {
        println!("Updated data saved to {}", config.output_path.display());
    }
    Ok(())
}

/// First Ctrl-C stops new lookups and lets the run save; a second one exits
/// immediately.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!(
            "Interrupt received. Finishing the current lookup and saving progress (Ctrl-C again to abort)"
        );
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt, aborting without saving");
            std::process::exit(130);
        }
    });
}

// ============================================================================
// Single Lookup
// ============================================================================

async fn run_lookup(title: &str, force: bool, scholar: ScholarConfig) -> Result<()> {
    if !is_valid_title(Some(title)) {
        if !force {
            anyhow::bail!(
                "Title contains characters outside [A-Za-z0-9 -:]; use --force to query anyway"
            );
        }
        warn!(title, "Querying invalid title");
    }

    let client = ScholarClient::new(&scholar).context("Failed to set up Scholar client")?;
    let outcome = client.lookup(title).await;
    println!("{}: {}", title, outcome);
    Ok(())
}

// ============================================================================
// Cookie Management
// ============================================================================

fn handle_cookies(cookie_file: Option<PathBuf>, action: CookieAction) -> Result<()> {
    let store = match cookie_file {
        Some(path) => CookieStore::with_path(path),
        None => CookieStore::open_default(),
    };

    match action {
        CookieAction::Path => {
            println!("Cookie file: {}", store.path().display());
        }
        CookieAction::Clear => {
            store.clear()?;
            println!("Cookies cleared.");
        }
        CookieAction::Import => {
            println!(
                "Paste a JSON cookie array exported from scholar.google.com, then EOF (Ctrl-D):"
            );
            println!(
                "Format: [{{\"name\":\"NID\",\"value\":\"xxx\",\"domain\":\".google.com\"}},...]"
            );

            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read cookies from stdin")?;

            let count = store.import_json(&input).context("Failed to import cookies")?;
            println!("Saved {} cookies to {}", count, store.path().display());
        }
    }

    Ok(())
}
