//! Row loop shared by the year-range jobs.
//!
//! Rows come from the source database one page at a time. Every row of a
//! page is scanned first (in parallel with the `rayon` feature), then the
//! results go to the sink in id order. A failing row is logged and counted;
//! a failing page aborts the run.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use std::collections::BTreeMap;
use tracing::{error, info};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::db;
use crate::range::{extract, normalize, scan, Cascade, RangeFormat, Rule};

/// A matched row, rendered for the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub range: String,
    pub rule: Rule,
    pub context: Option<String>,
}

/// Destination for scan results.
pub trait Sink {
    fn format(&self) -> RangeFormat;

    /// Whether hits should carry a context snippet.
    fn with_context(&self) -> bool;

    fn found(&mut self, report_id: i64, hit: &Hit) -> Result<()>;

    fn not_found(&mut self, report_id: i64) -> Result<()>;

    /// Called after the last row of each page.
    fn end_page(&mut self) -> Result<()>;

    /// Flush anything buffered; returns the number of files written.
    fn finish(&mut self) -> Result<usize>;
}

#[derive(Debug, Clone)]
pub enum Source {
    /// Every non-null description, ascending id, `page_size` rows at a time.
    Paged { page_size: usize },
    /// A fixed id list, treated as one page.
    Ids(Vec<i64>),
}

#[derive(Debug, Clone)]
pub struct Job {
    pub name: &'static str,
    pub cascade: Cascade,
    pub source: Source,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub processed: usize,
    pub matched: usize,
    pub not_found: usize,
    pub failed: usize,
    pub by_rule: BTreeMap<Rule, usize>,
    pub files: usize,
}

impl RunStats {
    pub fn log(&self, job: &str) {
        info!("===== {} completed =====", job);
        info!("Total processed : {}", self.processed);
        info!("Total matched   : {}", self.matched);
        info!("Total not found : {}", self.not_found);
        if self.failed > 0 {
            info!("Total failed    : {}", self.failed);
        }
        for (rule, n) in &self.by_rule {
            info!(rule = rule.as_str(), matched = n);
        }
        if self.files > 0 {
            info!("Total files created : {}", self.files);
        }
    }
}

struct Row {
    report_id: i64,
    text: Option<String>,
}

pub fn run(conn: &Connection, job: &Job, sink: &mut dyn Sink) -> Result<RunStats> {
    info!("===== {} started =====", job.name);
    let mut stats = RunStats::default();

    match &job.source {
        Source::Paged { page_size } => {
            let total = db::count_descriptions(conn)?;
            let pb = progress_bar(total)?;
            let mut last_id = 0;
            loop {
                let page = db::fetch_description_page(conn, last_id, (*page_size).max(1))
                    .with_context(|| format!("Failed to fetch page after ReportId={}", last_id))?;
                let Some(last) = page.last() else {
                    break;
                };
                last_id = last.report_id;
                let rows: Vec<Row> = page
                    .into_iter()
                    .map(|r| Row {
                        report_id: r.report_id,
                        text: Some(r.description),
                    })
                    .collect();
                process_page(&rows, job.cascade, sink, &mut stats);
                sink.end_page()
                    .with_context(|| format!("Failed to close page ending at ReportId={}", last_id))?;
                pb.inc(rows.len() as u64);
                info!(
                    "Processed up to ReportId={} | Processed={} | Matched={} | NotFound={}",
                    last_id, stats.processed, stats.matched, stats.not_found
                );
            }
            pb.finish_and_clear();
        }
        Source::Ids(ids) => {
            let pb = progress_bar(ids.len() as u64)?;
            let mut rows = Vec::with_capacity(ids.len());
            for &report_id in ids {
                match db::fetch_description(conn, report_id) {
                    Ok(text) => rows.push(Row { report_id, text }),
                    Err(e) => {
                        error!(report_id, "Failed for ReportId={} | Error={:#}", report_id, e);
                        stats.failed += 1;
                    }
                }
                pb.inc(1);
            }
            process_page(&rows, job.cascade, sink, &mut stats);
            sink.end_page().context("Failed to close id list")?;
            pb.finish_and_clear();
        }
    }

    stats.files = sink.finish()?;
    Ok(stats)
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

fn process_page(rows: &[Row], cascade: Cascade, sink: &mut dyn Sink, stats: &mut RunStats) {
    let format = sink.format();
    let with_context = sink.with_context();
    let hits = evaluate(rows, cascade, format, with_context);

    for (row, hit) in rows.iter().zip(hits) {
        stats.processed += 1;
        let result = match &hit {
            Some(hit) => {
                stats.matched += 1;
                *stats.by_rule.entry(hit.rule).or_default() += 1;
                sink.found(row.report_id, hit)
            }
            None => {
                stats.not_found += 1;
                sink.not_found(row.report_id)
            }
        };
        if let Err(e) = result {
            error!(
                report_id = row.report_id,
                "Failed for ReportId={} | Error={:#}", row.report_id, e
            );
            stats.failed += 1;
        }
    }
}

#[cfg(feature = "rayon")]
fn evaluate(rows: &[Row], cascade: Cascade, format: RangeFormat, with_context: bool) -> Vec<Option<Hit>> {
    rows.par_iter()
        .map(|r| evaluate_one(r.text.as_deref(), cascade, format, with_context))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn evaluate(rows: &[Row], cascade: Cascade, format: RangeFormat, with_context: bool) -> Vec<Option<Hit>> {
    rows.iter()
        .map(|r| evaluate_one(r.text.as_deref(), cascade, format, with_context))
        .collect()
}

/// Missing or empty text is a miss without touching the patterns.
pub fn evaluate_one(
    text: Option<&str>,
    cascade: Cascade,
    format: RangeFormat,
    with_context: bool,
) -> Option<Hit> {
    let text = text.filter(|t| !t.is_empty())?;
    if with_context {
        let f = scan(text, cascade)?;
        return Some(Hit {
            range: f.range.render(format),
            rule: f.rule,
            context: Some(f.context),
        });
    }
    let normalized = normalize(text);
    let e = extract(&normalized, cascade)?;
    Some(Hit {
        range: e.range.render(format),
        rule: e.rule,
        context: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{add_description, source};
    use anyhow::anyhow;

    #[derive(Default)]
    struct Recorder {
        format: Option<RangeFormat>,
        found: Vec<(i64, Hit)>,
        not_found: Vec<i64>,
        pages: usize,
        fail_on: Option<i64>,
    }

    impl Sink for Recorder {
        fn format(&self) -> RangeFormat {
            self.format.unwrap_or(RangeFormat::Human)
        }

        fn with_context(&self) -> bool {
            self.format != Some(RangeFormat::Compact)
        }

        fn found(&mut self, report_id: i64, hit: &Hit) -> Result<()> {
            if self.fail_on == Some(report_id) {
                return Err(anyhow!("disk full"));
            }
            self.found.push((report_id, hit.clone()));
            Ok(())
        }

        fn not_found(&mut self, report_id: i64) -> Result<()> {
            self.not_found.push(report_id);
            Ok(())
        }

        fn end_page(&mut self) -> Result<()> {
            self.pages += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<usize> {
            Ok(0)
        }
    }

    fn seeded() -> Connection {
        let conn = source();
        add_description(&conn, 1, Some("Forecast 2024\u{2013}2030 by region"));
        add_description(&conn, 2, Some("No horizon given."));
        add_description(&conn, 3, None);
        add_description(&conn, 4, Some("Valued in 2023, reaching USD 2 billion by 2032"));
        add_description(&conn, 5, Some(""));
        add_description(&conn, 6, Some("Expected to double by 2040."));
        conn
    }

    fn forecast_job(page_size: usize) -> Job {
        Job {
            name: "test",
            cascade: Cascade::Forecast,
            source: Source::Paged { page_size },
        }
    }

    #[test]
    fn paged_run_visits_every_non_null_row() {
        let conn = seeded();
        let mut sink = Recorder::default();
        let stats = run(&conn, &forecast_job(2), &mut sink).unwrap();

        assert_eq!(stats.processed, 5);
        assert_eq!(stats.matched, 3);
        assert_eq!(stats.not_found, 2);
        assert_eq!(sink.pages, 3);
        assert_eq!(sink.not_found, vec![2, 5]);

        let ids: Vec<i64> = sink.found.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 4, 6]);
        assert_eq!(sink.found[0].1.range, "2024 to 2030");
        assert_eq!(sink.found[0].1.context.as_deref(), Some("Forecast 2024-2030 by region"));
        assert_eq!(sink.found[1].1.range, "2023 to 2032");
        assert_eq!(sink.found[2].1.range, "to 2040");
        assert_eq!(stats.by_rule.get(&Rule::YearHyphen), Some(&1));
        assert_eq!(stats.by_rule.get(&Rule::InBy), Some(&1));
        assert_eq!(stats.by_rule.get(&Rule::ByOnly), Some(&1));
    }

    #[test]
    fn compact_sinks_skip_context() {
        let conn = seeded();
        let mut sink = Recorder {
            format: Some(RangeFormat::Compact),
            ..Default::default()
        };
        run(&conn, &forecast_job(100), &mut sink).unwrap();
        assert_eq!(sink.pages, 1);
        let rendered: Vec<&str> = sink.found.iter().map(|(_, h)| h.range.as_str()).collect();
        assert_eq!(rendered, vec!["2024-2030", "2023-2032", "-2040"]);
        assert!(sink.found.iter().all(|(_, h)| h.context.is_none()));
    }

    #[test]
    fn row_failures_do_not_stop_the_run() {
        let conn = seeded();
        let mut sink = Recorder {
            fail_on: Some(4),
            ..Default::default()
        };
        let stats = run(&conn, &forecast_job(10), &mut sink).unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 5);
        assert_eq!(sink.found.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 6]);
    }

    #[test]
    fn id_list_treats_missing_rows_as_not_found() {
        let conn = source();
        add_description(&conn, 10, Some("Demand in 2023 rises through 2033."));
        add_description(&conn, 11, Some("between 2020 and 2030"));
        add_description(&conn, 12, None);
        let job = Job {
            name: "remaining",
            cascade: Cascade::Through,
            source: Source::Ids(vec![12, 10, 99, 11]),
        };
        let mut sink = Recorder::default();
        let stats = run(&conn, &job, &mut sink).unwrap();

        assert_eq!(sink.pages, 1);
        assert_eq!(stats.processed, 4);
        assert_eq!(sink.found.len(), 1);
        assert_eq!(sink.found[0].0, 10);
        assert_eq!(sink.found[0].1.range, "2023 to 2033");
        assert_eq!(sink.not_found, vec![12, 99, 11]);
    }

    #[test]
    fn empty_source() {
        let conn = source();
        let mut sink = Recorder::default();
        let stats = run(&conn, &forecast_job(10), &mut sink).unwrap();
        assert_eq!(stats, RunStats::default());
        assert_eq!(sink.pages, 0);
    }

    #[test]
    fn absent_text_short_circuits() {
        assert_eq!(evaluate_one(None, Cascade::Forecast, RangeFormat::Human, true), None);
        assert_eq!(evaluate_one(Some(""), Cascade::Forecast, RangeFormat::Human, true), None);
    }
}
