use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pinglun::config::Config;
use pinglun::crawler::{parse_target, Harvester, HttpTransport, Platform, TargetRef};
use pinglun::error::PinglunErrorTrait;
use pinglun::models::SortMode;
use pinglun::storage::{DedupStrategy, FileSink, HarvestReport, OutputFormat};
use pinglun::utils::{format_bytes, truncate_text};

/// Command-line overrides for the harvest command
#[derive(Debug, Default)]
pub struct HarvestParams {
    pub targets: Vec<String>,
    pub platform: Option<Platform>,
    pub max_pages: Option<u32>,
    pub max_sub_pages: Option<u32>,
    pub page_size: Option<u32>,
    pub reply_page_size: Option<u32>,
    pub retries: Option<u32>,
    pub delay_min: Option<f64>,
    pub delay_max: Option<f64>,
    pub sort: Option<SortMode>,
    pub dedup: Option<DedupStrategy>,
    pub no_replies: bool,
    pub formats: Vec<OutputFormat>,
    pub output: Option<PathBuf>,
    pub cookie: Option<String>,
}

impl HarvestParams {
    /// Fold the overrides into `config`
    fn apply(&self, config: &mut Config) {
        let h = &mut config.harvest;
        if let Some(v) = self.max_pages {
            h.max_top_level_pages = v;
        }
        if let Some(v) = self.max_sub_pages {
            h.max_sub_pages_per_thread = v;
        }
        if let Some(v) = self.page_size {
            h.page_size = v;
        }
        if let Some(v) = self.reply_page_size {
            h.reply_page_size = v;
        }
        if let Some(v) = self.retries {
            h.retry_limit = v;
        }
        if let Some(v) = self.delay_min {
            h.delay_interval.min_secs = v;
        }
        if let Some(v) = self.delay_max {
            h.delay_interval.max_secs = v;
        }
        if let Some(v) = self.sort {
            h.sort_mode = v;
        }
        if let Some(v) = self.dedup {
            h.dedup = v;
        }
        if self.no_replies {
            h.expand_replies = false;
        }
        if !self.formats.is_empty() {
            config.output.formats = self.formats.clone();
        }
        if let Some(dir) = &self.output {
            config.output.dir = dir.clone();
        }
        if self.cookie.is_some() {
            config.transport.cookie = self.cookie.clone();
        }
    }
}

/// Harvest every target in turn
///
/// A target that cannot be resolved is reported and skipped. Returns an
/// error only for configuration problems or when no target succeeded.
pub async fn harvest(
    mut config: Config,
    params: HarvestParams,
    cancel: Arc<AtomicBool>,
) -> Result<()> {
    params.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let sink = FileSink::new(&config.output.dir)?;

    println!("Starting comment harvest");
    println!("========================");
    println!("Targets: {}", params.targets.len());
    println!(
        "Max pages: {} (replies: {} per thread)",
        config.harvest.max_top_level_pages,
        if config.harvest.expand_replies {
            config.harvest.max_sub_pages_per_thread.to_string()
        } else {
            String::from("off")
        }
    );
    println!("Sort: {}", config.harvest.sort_mode.as_str());
    println!("Output: {}", sink.output_dir().display());

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    let mut aborted = 0usize;

    for input in &params.targets {
        if cancel.load(Ordering::SeqCst) {
            tracing::warn!("Harvest cancelled, skipping remaining targets");
            break;
        }

        let target = match parse_target(input, params.platform) {
            Ok(target) => target,
            Err(e) => {
                tracing::error!(input = %input, error = %e, "Unrecognized target");
                eprintln!("Skipping {input}: {}", e.describe());
                aborted += 1;
                continue;
            }
        };

        match harvest_target(&config, &target, &cancel).await {
            Ok(report) => {
                if persist_report(&sink, &report, &config.output.formats) {
                    succeeded += 1;
                } else {
                    failed += 1;
                }
            }
            Err(e) => {
                tracing::error!(target = ?target, error = %e, "Harvest aborted");
                eprintln!("Skipping {input}: {e}");
                aborted += 1;
            }
        }
    }

    println!("\nHarvested {succeeded} target(s), {failed} not saved, {aborted} aborted");

    if succeeded == 0 && failed + aborted > 0 {
        anyhow::bail!("no target could be harvested");
    }
    Ok(())
}

async fn harvest_target(
    config: &Config,
    target: &TargetRef,
    cancel: &Arc<AtomicBool>,
) -> Result<HarvestReport> {
    let platform = target.platform();
    let transport = HttpTransport::new(platform, config.transport.rate_limit)
        .context("Failed to create HTTP transport")?
        .with_cookie(config.transport.cookie.clone());

    let harvester = Harvester::new(config, platform, Arc::new(transport))
        .with_cancel_flag(Arc::clone(cancel));

    Ok(harvester.run(target).await?)
}

/// Print the run summary and write the report files
///
/// A write failure is reported and leaves the remaining targets untouched.
/// Returns whether every file was saved.
fn persist_report(sink: &FileSink, report: &HarvestReport, formats: &[OutputFormat]) -> bool {
    print_summary(report);

    match sink.save_report(report, formats) {
        Ok(paths) => {
            for path in &paths {
                let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                println!("  Saved {} ({})", path.display(), format_bytes(size));
            }
            true
        }
        Err(e) => {
            tracing::error!(target = %report.target.label(), error = %e, "Failed to save report");
            eprintln!("Could not save {}: {e}", report.target.label());
            false
        }
    }
}

fn print_summary(report: &HarvestReport) {
    let stats = &report.stats;
    let title = report.target.title.as_deref().unwrap_or_default();

    println!("\n{} {}", report.target.label(), truncate_text(title, 40));
    println!("{}", "-".repeat(40));
    println!(
        "Comments: {} ({} top-level, {} replies, {:.1}% replies)",
        stats.record_count,
        stats.top_level_count,
        stats.reply_count,
        stats.reply_ratio() * 100.0
    );
    println!(
        "Pages: {} fetched, {} failed",
        stats.pages_fetched, stats.failed_page_count
    );
    println!("Reply threads expanded: {}", stats.threads_expanded);
    println!("Duplicates removed: {}", stats.duplicates_removed);
    println!("Distinct authors: {}", stats.distinct_authors);

    if let Some(likes) = &stats.likes {
        println!(
            "Likes: total {}, mean {:.1}, median {:.1}, max {}",
            likes.total, likes.mean, likes.median, likes.max
        );
    }
    if let (Some(earliest), Some(latest)) = (stats.earliest, stats.latest) {
        println!(
            "Time span: {} .. {}",
            earliest.format("%Y-%m-%d %H:%M"),
            latest.format("%Y-%m-%d %H:%M")
        );
    }
    if !stats.top_commenters.is_empty() {
        println!("Top commenters:");
        for c in &stats.top_commenters {
            println!("  {} ({}): {}", truncate_text(&c.author_name, 20), c.author_id, c.comments);
        }
    }

    for failed in &report.failed_pages {
        println!(
            "  Failed {} page {}: {}",
            failed.thread,
            failed.page,
            truncate_text(&failed.error, 80)
        );
    }
    if report.interrupted {
        println!("Interrupted: partial results saved");
    }
}
