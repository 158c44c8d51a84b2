use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sitepulse::config::MonitorConfig;
use sitepulse::probes::{HttpProber, Prober};
use sitepulse::query::QueryFacade;
use sitepulse::sites::{parse_site_list, Site, SiteList};
use sitepulse::storage::Store;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "sitepulse",
    about = "Fixed-interval HTTP(S) uptime prober with SQLite history",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (TOML); falls back to ./sitepulse.toml, then built-in defaults
    #[arg(long, global = true, env = "SITEPULSE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (scheduler + JSON API)
    Serve {
        /// Bind address for the API
        #[arg(long)]
        bind: Option<String>,

        /// SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,

        /// Site list file
        #[arg(long)]
        sites: Option<PathBuf>,

        /// Seconds between sweeps
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Probe one URL now and print the outcome (nothing is stored)
    Check {
        /// URL to probe
        url: String,

        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show the latest status and recent history of a site from the database
    Status {
        /// Site URL exactly as written in the site list
        url: String,

        /// SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,

        /// Number of history points
        #[arg(long, default_value = "24")]
        limit: usize,
    },

    /// Validate a site list file and print the accepted sites
    Sites {
        /// Site list file
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<MonitorConfig> {
    match path {
        Some(p) => MonitorConfig::load(p),
        None => Ok(MonitorConfig::load_or_default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = sitepulse::with_startup_logging(|| load_config(cli.config.as_ref()))?;
    sitepulse::init_tracing(&config.logging);

    match cli.command {
        Commands::Serve {
            bind,
            db,
            sites,
            interval,
        } => {
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            if let Some(db) = db {
                config.storage.db_path = db;
            }
            if let Some(sites) = sites {
                config.sites.path = sites;
            }
            if let Some(secs) = interval {
                config.scheduler.interval_secs = secs;
            }

            tracing::info!(bind = %config.api.bind, "Starting sitepulse daemon");
            let shutdown = CancellationToken::new();
            let on_signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown requested");
                    on_signal.cancel();
                }
            });
            sitepulse::serve(config, shutdown).await?;
        }
        Commands::Check { url, timeout, json } => {
            let site = Site::parse(&url).with_context(|| format!("invalid site '{}'", url))?;
            let timeout = timeout
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.probe.timeout());
            let prober = HttpProber::new(timeout, &config.probe.user_agent)?;
            let outcome = prober.check(&site).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                let code = outcome
                    .status_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<6} {} (code: {}, time: {:.2}s)",
                    outcome.reachable.as_str().to_uppercase(),
                    outcome.site,
                    code,
                    outcome.latency.as_secs_f64()
                );
            }
        }
        Commands::Status { url, db, limit } => {
            let db_path = db.unwrap_or(config.storage.db_path);
            let store = Store::open(&db_path)?;
            let query = QueryFacade::new(Arc::new(store), SiteList::new());

            match query.latest(&url)? {
                None => println!("No checks recorded for {}", url),
                Some(latest) => {
                    let code = latest
                        .status_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("\n{}", url);
                    println!("Status:     {}", latest.reachable.as_str().to_uppercase());
                    println!("Code:       {}", code);
                    println!("Latency:    {:.3}s", latest.latency.as_secs_f64());
                    println!("Last check: {}", latest.observed_at.to_rfc3339());

                    let history = query.history(&url, limit)?;
                    let bar: String = history
                        .iter()
                        .map(|p| match p.reachable {
                            sitepulse::probes::Reachability::Up => '+',
                            sitepulse::probes::Reachability::Down => '-',
                            sitepulse::probes::Reachability::Error => '!',
                        })
                        .collect();
                    println!("History:    [{}] (oldest -> newest, {} points)\n", bar, history.len());
                }
            }
        }
        Commands::Sites { file } => {
            let path = file.unwrap_or(config.sites.path);
            let raw = std::fs::read(&path)
                .with_context(|| format!("cannot read site list {}", path.display()))?;
            let parsed = parse_site_list(raw);

            for site in &parsed.sites {
                println!("{}", site);
            }
            for rejected in &parsed.rejected {
                eprintln!(
                    "line {}: skipped '{}': {}",
                    rejected.line_no, rejected.content, rejected.reason
                );
            }
            if parsed.truncated > 0 {
                eprintln!("{} further lines ignored (limit reached)", parsed.truncated);
            }
            println!(
                "{} sites accepted, {} lines rejected",
                parsed.sites.len(),
                parsed.rejected.len()
            );
        }
    }

    Ok(())
}
