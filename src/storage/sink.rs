//! Persistence of finalized comment collections
//!
//! The harvester calls a [`CommentSink`] once per completed (or interrupted)
//! session. [`FileSink`] writes one file per requested format into an output
//! directory, plus a JSON summary of the run.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::crawler::platform::Target;
use crate::error::{Error, Result};
use crate::models::CommentRecord;
use crate::storage::session::HarvestReport;
use crate::utils::sanitize_filename;

/// Output format requested from the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Pretty-printed JSON array
    Json,
    /// One JSON object per line
    Jsonl,
    /// Comma-separated table
    Csv,
    /// Plain text, replies indented under their root
    Txt,
}

impl OutputFormat {
    /// File extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonl => "jsonl",
            Self::Csv => "csv",
            Self::Txt => "txt",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            "csv" => Ok(Self::Csv),
            "txt" | "text" => Ok(Self::Txt),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Persistence collaborator
pub trait CommentSink {
    /// Persist `records` for `target` in `format`, returning the location
    fn save(&self, records: &[CommentRecord], target: &Target, format: OutputFormat)
        -> Result<PathBuf>;
}

/// Writes result files into a directory
#[derive(Debug, Clone)]
pub struct FileSink {
    output_dir: PathBuf,
}

impl FileSink {
    /// Create a sink writing into `output_dir`, creating it if needed
    pub fn new(output_dir: &Path) -> Result<Self> {
        fs::create_dir_all(output_dir).map_err(|e| {
            Error::with_source(
                format!("Failed to create output directory: {}", output_dir.display()),
                e,
            )
        })?;

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
        })
    }

    /// Get output directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write the report's records in every format, plus the summary
    pub fn save_report(&self, report: &HarvestReport, formats: &[OutputFormat]) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(formats.len() + 1);
        for format in formats {
            paths.push(self.save(&report.records, &report.target, *format)?);
        }
        paths.push(self.write_summary(report)?);
        Ok(paths)
    }

    /// Write statistics and failures, without the records
    pub fn write_summary(&self, report: &HarvestReport) -> Result<PathBuf> {
        #[derive(Serialize)]
        struct Summary<'a> {
            target: &'a Target,
            stats: &'a crate::storage::session::HarvestStats,
            failed_pages: &'a [crate::storage::session::FailedPage],
            failed_threads: &'a [String],
            interrupted: bool,
            started_at: chrono::DateTime<chrono::Utc>,
            finished_at: chrono::DateTime<chrono::Utc>,
        }

        let path = self.path_for(&report.target, "summary", "json");
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(
            &mut writer,
            &Summary {
                target: &report.target,
                stats: &report.stats,
                failed_pages: &report.failed_pages,
                failed_threads: &report.failed_threads,
                interrupted: report.interrupted,
                started_at: report.started_at,
                finished_at: report.finished_at,
            },
        )?;
        writer.flush()?;
        Ok(path)
    }

    fn path_for(&self, target: &Target, suffix: &str, extension: &str) -> PathBuf {
        let name = sanitize_filename(&format!("{}_{suffix}.{extension}", target.label()));
        self.output_dir.join(name)
    }

    fn write_csv<W: Write>(writer: &mut W, records: &[CommentRecord]) -> Result<()> {
        writeln!(
            writer,
            "id,parent_id,author_id,author_name,body,like_count,reply_count,created_at,floor,level,is_vip,verification,location,gender"
        )?;
        for r in records {
            let row = [
                r.id.clone(),
                r.parent_id.clone().unwrap_or_default(),
                r.author_id.to_string(),
                r.author_name.clone(),
                r.body.clone(),
                r.like_count.to_string(),
                r.reply_count.to_string(),
                r.created_at.to_rfc3339(),
                r.rank_or_floor.map(|f| f.to_string()).unwrap_or_default(),
                r.author.level.to_string(),
                r.author.is_vip.to_string(),
                r.author.verification.clone(),
                r.author.location.clone(),
                format!("{:?}", r.author.gender).to_lowercase(),
            ];
            let line = row.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",");
            writeln!(writer, "{line}")?;
        }
        Ok(())
    }

    fn write_txt<W: Write>(writer: &mut W, records: &[CommentRecord]) -> Result<()> {
        let roots: HashSet<&str> = records
            .iter()
            .filter(|r| r.is_top_level())
            .map(|r| r.id.as_str())
            .collect();

        let mut replies: HashMap<&str, Vec<&CommentRecord>> = HashMap::new();
        for reply in records {
            if let Some(parent) = reply.parent_id.as_deref() {
                replies.entry(parent).or_default().push(reply);
            }
        }

        for root in records.iter().filter(|r| r.is_top_level()) {
            writeln!(
                writer,
                "[{}] {} ({} likes): {}",
                root.created_at.format("%Y-%m-%d %H:%M"),
                display_name(root),
                root.like_count,
                root.body
            )?;
            for reply in replies.get(root.id.as_str()).into_iter().flatten() {
                writeln!(
                    writer,
                    "    ↳ {} ({} likes): {}",
                    display_name(reply),
                    reply.like_count,
                    reply.body
                )?;
            }
        }

        // Replies whose root never arrived are listed at the end
        for reply in records.iter().filter(|r| {
            r.parent_id
                .as_deref()
                .is_some_and(|p| !roots.contains(p))
        }) {
            writeln!(
                writer,
                "[reply to {}] {}: {}",
                reply.parent_id.as_deref().unwrap_or_default(),
                display_name(reply),
                reply.body
            )?;
        }
        Ok(())
    }
}

impl CommentSink for FileSink {
    fn save(
        &self,
        records: &[CommentRecord],
        target: &Target,
        format: OutputFormat,
    ) -> Result<PathBuf> {
        let path = self.path_for(target, "comments", format.extension());
        let mut writer = BufWriter::new(File::create(&path)?);

        match format {
            OutputFormat::Json => serde_json::to_writer_pretty(&mut writer, records)?,
            OutputFormat::Jsonl => {
                for record in records {
                    serde_json::to_writer(&mut writer, record)?;
                    writer.write_all(b"\n")?;
                }
            }
            OutputFormat::Csv => {
                // BOM so spreadsheet tools detect UTF-8
                writer.write_all("\u{feff}".as_bytes())?;
                Self::write_csv(&mut writer, records)?;
            }
            OutputFormat::Txt => Self::write_txt(&mut writer, records)?,
        }
        writer.flush()?;

        tracing::info!(
            path = %path.display(),
            format = %format,
            records = records.len(),
            "Saved comments"
        );
        Ok(path)
    }
}

fn display_name(record: &CommentRecord) -> &str {
    if record.author_name.is_empty() {
        "(anonymous)"
    } else {
        &record.author_name
    }
}

/// Quote a CSV field when it contains separators, quotes or newlines
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
