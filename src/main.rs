use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pinglun::config::Config;
use pinglun::crawler::Platform;
use pinglun::models::SortMode;
use pinglun::storage::{DedupStrategy, OutputFormat};

mod commands;

use commands::{harvest, HarvestParams};

#[derive(Parser)]
#[command(
    name = "pinglun",
    version,
    about = "Resilient comment harvester for Bilibili videos and Weibo posts",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest the comments of one or more videos or posts
    Harvest {
        /// Target URLs or ids (BV id, av id, Weibo URL or numeric id)
        #[arg(required = true)]
        targets: Vec<String>,

        /// Platform for bare numeric ids (bilibili, weibo)
        #[arg(short, long)]
        platform: Option<Platform>,

        /// Maximum number of top-level pages
        #[arg(long)]
        max_pages: Option<u32>,

        /// Maximum pages fetched per reply thread
        #[arg(long)]
        max_sub_pages: Option<u32>,

        /// Top-level page size
        #[arg(long)]
        page_size: Option<u32>,

        /// Reply thread page size
        #[arg(long)]
        reply_page_size: Option<u32>,

        /// Attempts per page before giving up on it
        #[arg(long)]
        retries: Option<u32>,

        /// Minimum pause between requests, in seconds
        #[arg(long)]
        delay_min: Option<f64>,

        /// Maximum pause between requests, in seconds
        #[arg(long)]
        delay_max: Option<f64>,

        /// Ordering of the comment stream (time, popularity)
        #[arg(short, long)]
        sort: Option<SortMode>,

        /// Deduplication strategy (identity, content)
        #[arg(long)]
        dedup: Option<DedupStrategy>,

        /// Skip nested reply expansion
        #[arg(long, default_value = "false")]
        no_replies: bool,

        /// Output formats (json, jsonl, csv, txt)
        #[arg(short, long, value_delimiter = ',')]
        format: Vec<OutputFormat>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Cookie header sent with every request
        #[arg(long)]
        cookie: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // Initialize tracing/logging
    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    tracing::info!("pinglun comment harvester starting");

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing current request");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    match cli.command {
        Commands::Harvest {
            targets,
            platform,
            max_pages,
            max_sub_pages,
            page_size,
            reply_page_size,
            retries,
            delay_min,
            delay_max,
            sort,
            dedup,
            no_replies,
            format,
            output,
            cookie,
        } => {
            tracing::info!(
                targets = targets.len(),
                platform = ?platform,
                max_pages = ?max_pages,
                no_replies = %no_replies,
                "Starting harvest command"
            );
            let params = HarvestParams {
                targets,
                platform,
                max_pages,
                max_sub_pages,
                page_size,
                reply_page_size,
                retries,
                delay_min,
                delay_max,
                sort,
                dedup,
                no_replies,
                formats: format,
                output,
                cookie,
            };
            harvest(config, params, cancel).await?;
        }
    }

    tracing::info!("pinglun completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("pinglun=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("pinglun={level},warn"))?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
