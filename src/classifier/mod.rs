//! LLM taxonomy classification of report titles.
//!
//! Unfetched source reports are classified one at a time; those that land
//! in a known sub-industry are copied into the target database and flagged
//! as fetched in the source.

pub mod openai;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::db::{self, TargetReport};

pub use openai::OpenAiClassifier;

const NOT_FOUND: &str = "NOT_FOUND";

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("API reply had no content")]
    EmptyReply,
    #[error("reply is not the expected JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The model's answer.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Classification {
    pub industry: String,
    pub sub_industry: String,
    confidence: Value,
}

impl Classification {
    pub fn is_not_found(&self) -> bool {
        self.industry == NOT_FOUND
    }

    pub fn confidence(&self) -> String {
        match &self.confidence {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// The industry and the sub-industries the model may choose from.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    pub industry: String,
    pub sub_industries: Vec<String>,
}

pub trait Classify {
    fn classify(&self, title: &str) -> Result<Classification, ClassifyError>;
}

/// Title as sent to the model: text before the first `|`, with
/// " Market Analysis" appended when "market" is absent.
pub fn normalize_title(title: &str) -> String {
    if title.is_empty() {
        return String::new();
    }
    let clean = title.split('|').next().unwrap_or_default().trim();
    if clean.to_lowercase().contains("market") {
        clean.to_string()
    } else {
        format!("{} Market Analysis", clean)
    }
}

pub struct ClassifyJob<'a> {
    pub industry_ids: &'a [i64],
    pub industry_name: &'a str,
    pub limit: usize,
    pub log_dir: &'a Path,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassifyStats {
    pub processed: usize,
    pub inserted: usize,
    pub not_found: usize,
    pub unmapped: usize,
    pub no_description: usize,
    pub duplicates: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Inserted,
    NotFound,
    Unmapped,
    NoDescription,
    Duplicate,
}

/// Append-only plain text audit files (`not_found.log`, `classified.log`).
struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(AuditLog {
            dir: dir.to_path_buf(),
        })
    }

    fn append(&self, file: &str, line: &str) -> Result<()> {
        let path = self.dir.join(file);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        writeln!(f, "{}", line)?;
        Ok(())
    }
}

pub fn run(
    source: &Connection,
    target: &Connection,
    job: &ClassifyJob<'_>,
    classifier: &dyn Classify,
) -> Result<ClassifyStats> {
    info!("===== Classification started =====");
    let audit = AuditLog::new(job.log_dir)?;
    let reports = db::fetch_unfetched_reports(source, job.industry_ids, job.limit)
        .context("Failed to fetch source reports")?;

    let mut stats = ClassifyStats::default();
    if reports.is_empty() {
        debug!("No reports to process");
        return Ok(stats);
    }

    for report in &reports {
        stats.processed += 1;
        let title = normalize_title(&report.name);
        debug!("Processing {} | {}", report.id, title);

        match classify_one(source, target, job, classifier, &audit, report, &title) {
            Ok(Outcome::Inserted) => stats.inserted += 1,
            Ok(Outcome::NotFound) => stats.not_found += 1,
            Ok(Outcome::Unmapped) => stats.unmapped += 1,
            Ok(Outcome::NoDescription) => stats.no_description += 1,
            Ok(Outcome::Duplicate) => stats.duplicates += 1,
            Err(e) => {
                error!(report_id = report.id, "PROCESS ERROR {} | {:#}", report.id, e);
                stats.failed += 1;
            }
        }
    }

    info!(
        processed = stats.processed,
        inserted = stats.inserted,
        not_found = stats.not_found,
        unmapped = stats.unmapped,
        duplicates = stats.duplicates,
        failed = stats.failed,
        "===== Classification finished ====="
    );
    Ok(stats)
}

fn classify_one(
    source: &Connection,
    target: &Connection,
    job: &ClassifyJob<'_>,
    classifier: &dyn Classify,
    audit: &AuditLog,
    report: &db::SourceReport,
    title: &str,
) -> Result<Outcome> {
    let result = classifier.classify(title)?;

    if result.is_not_found() {
        audit.append("not_found.log", &format!("{}, {}", report.id, title))?;
        return Ok(Outcome::NotFound);
    }

    let industry_id = db::industry_id(target, job.industry_name)?;
    let sub = db::sub_industry_id(target, &result.sub_industry)?;
    let (Some(industry_id), Some((sub_industry_id, _))) = (industry_id, sub) else {
        debug!("Industry/SubIndustry not found in target DB for {}", report.id);
        return Ok(Outcome::Unmapped);
    };

    let Some(desc) = db::fetch_description_meta(source, report.id)? else {
        return Ok(Outcome::NoDescription);
    };

    let name = desc.keywords.as_deref();
    if let Some(name) = name {
        if db::report_name_exists(target, name)? {
            audit.append(
                "classified.log",
                &format!("{}, {} => SKIPPED_DUPLICATE ({})", report.id, title, name),
            )?;
            return Ok(Outcome::Duplicate);
        }
    }

    db::insert_target_report(
        target,
        &TargetReport {
            ref_report_id: report.id,
            industry_id,
            sub_industry_id,
            name,
            description: desc.title.as_deref(),
            slug: report.path.as_deref(),
        },
    )?;

    audit.append(
        "classified.log",
        &format!(
            "{}, {} => {} / {} ({})",
            report.id,
            title,
            job.industry_name,
            result.sub_industry,
            result.confidence()
        ),
    )?;

    if let Err(e) = db::mark_fetched(source, report.id) {
        error!(report_id = report.id, "FAILED TO UPDATE isFetched FOR REPORT {} | {:#}", report.id, e);
    } else {
        debug!("Marked report {} as fetched", report.id);
    }
    Ok(Outcome::Inserted)
}
