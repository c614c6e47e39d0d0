use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::range::RangeFormat;
use crate::runner::{Hit, Sink};

#[derive(Debug, Serialize)]
struct FoundRecord {
    #[serde(rename = "ReportId")]
    report_id: i64,
    #[serde(rename = "YearRange")]
    year_range: String,
    #[serde(rename = "Context")]
    context: String,
}

#[derive(Debug, Serialize)]
struct NotFoundRecord {
    #[serde(rename = "ReportId")]
    report_id: i64,
}

/// Where matched rows end up.
#[derive(Debug, Clone)]
pub enum FoundLayout {
    /// `<prefix>_<n>.csv`, a fresh file every `batch_size` rows.
    Numbered { prefix: String, batch_size: usize },
    /// One file, appended to across runs.
    Append(String),
}

/// CSV sink for the export jobs: matched rows with their context snippet,
/// unmatched ids in a separate appended file.
pub struct CsvExport {
    dir: PathBuf,
    layout: FoundLayout,
    not_found_file: String,
    flush_every: usize,
    found: Vec<FoundRecord>,
    not_found: Vec<NotFoundRecord>,
    next_file: usize,
    files: Vec<PathBuf>,
}

impl CsvExport {
    pub fn new(dir: &Path, layout: FoundLayout, not_found_file: &str) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let flush_every = match &layout {
            FoundLayout::Numbered { batch_size, .. } => (*batch_size).max(1),
            FoundLayout::Append(_) => 1,
        };
        Ok(CsvExport {
            dir: dir.to_path_buf(),
            layout,
            not_found_file: not_found_file.to_string(),
            flush_every,
            found: Vec::new(),
            not_found: Vec::new(),
            next_file: 1,
            files: Vec::new(),
        })
    }

    /// Paged forecast export: `year_ranges_<n>.csv` + `year_ranges_not_found.csv`.
    pub fn year_ranges(dir: &Path, batch_size: usize) -> Result<Self> {
        Self::new(
            dir,
            FoundLayout::Numbered {
                prefix: "year_ranges".to_string(),
                batch_size,
            },
            "year_ranges_not_found.csv",
        )
    }

    /// Through-rule export for the fixed id list.
    pub fn remaining(dir: &Path) -> Result<Self> {
        Self::new(
            dir,
            FoundLayout::Append("remaining-ranges.csv".to_string()),
            "remaining-not-found.csv",
        )
    }

    fn flush_found(&mut self) -> Result<()> {
        if self.found.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.found);
        match &self.layout {
            FoundLayout::Numbered { prefix, .. } => {
                let path = self.dir.join(format!("{}_{}.csv", prefix, self.next_file));
                let mut w = csv::Writer::from_path(&path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                for r in &rows {
                    w.serialize(r)?;
                }
                w.flush()?;
                info!("Created {} with {} records", path.display(), rows.len());
                self.next_file += 1;
                self.files.push(path);
            }
            FoundLayout::Append(name) => {
                let path = self.dir.join(name);
                append_records(&path, &rows)?;
                if !self.files.contains(&path) {
                    self.files.push(path);
                }
            }
        }
        Ok(())
    }

    fn flush_not_found(&mut self) -> Result<()> {
        if self.not_found.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.not_found);
        append_records(&self.dir.join(&self.not_found_file), &rows)
    }
}

/// Append to `path`, writing the header only when the file is new.
fn append_records<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let is_new = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut w = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    for r in rows {
        w.serialize(r)?;
    }
    w.flush()?;
    Ok(())
}

impl Sink for CsvExport {
    fn format(&self) -> RangeFormat {
        RangeFormat::Human
    }

    fn with_context(&self) -> bool {
        true
    }

    fn found(&mut self, report_id: i64, hit: &Hit) -> Result<()> {
        self.found.push(FoundRecord {
            report_id,
            year_range: hit.range.clone(),
            context: hit.context.clone().unwrap_or_default(),
        });
        if self.found.len() >= self.flush_every {
            self.flush_found()?;
        }
        Ok(())
    }

    fn not_found(&mut self, report_id: i64) -> Result<()> {
        self.not_found.push(NotFoundRecord { report_id });
        if self.not_found.len() >= self.flush_every {
            self.flush_not_found()?;
        }
        Ok(())
    }

    fn end_page(&mut self) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<usize> {
        self.flush_found()?;
        self.flush_not_found()?;
        Ok(self.files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::Cascade;
    use crate::runner::evaluate_one;

    fn hit(text: &str, cascade: Cascade) -> Hit {
        evaluate_one(Some(text), cascade, RangeFormat::Human, true).unwrap()
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn numbered_files_roll_over() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvExport::year_ranges(dir.path(), 2).unwrap();
        let h = hit("between 2020 and 2030", Cascade::Forecast);
        for id in 1..=5 {
            sink.found(id, &h).unwrap();
        }
        assert_eq!(sink.finish().unwrap(), 3);

        let first = read(&dir.path().join("year_ranges_1.csv"));
        assert_eq!(
            first,
            "ReportId,YearRange,Context\n1,2020 to 2030,between 2020 and 2030\n2,2020 to 2030,between 2020 and 2030\n"
        );
        let last = read(&dir.path().join("year_ranges_3.csv"));
        assert_eq!(last.lines().count(), 2);
        assert!(last.ends_with("5,2020 to 2030,between 2020 and 2030\n"));
    }

    #[test]
    fn context_is_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvExport::year_ranges(dir.path(), 10).unwrap();
        let h = hit("Sales, \"adjusted\", grow by 2040", Cascade::Forecast);
        sink.found(7, &h).unwrap();
        sink.finish().unwrap();
        let body = read(&dir.path().join("year_ranges_1.csv"));
        assert!(body.contains("7,to 2040,\"Sales, \"\"adjusted\"\", grow by 2040\""));
    }

    #[test]
    fn not_found_appends_with_single_header() {
        let dir = tempfile::tempdir().unwrap();
        for ids in [[1, 2], [3, 4]] {
            let mut sink = CsvExport::year_ranges(dir.path(), 10).unwrap();
            for id in ids {
                sink.not_found(id).unwrap();
            }
            sink.finish().unwrap();
        }
        let body = read(&dir.path().join("year_ranges_not_found.csv"));
        assert_eq!(body, "ReportId\n1\n2\n3\n4\n");
        assert!(!dir.path().join("year_ranges_1.csv").exists());
    }

    #[test]
    fn remaining_appends_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let h = hit("in 2023 ... through 2033", Cascade::Through);
        for id in [10, 11] {
            let mut sink = CsvExport::remaining(dir.path()).unwrap();
            sink.found(id, &h).unwrap();
            sink.not_found(id + 100).unwrap();
            assert_eq!(sink.finish().unwrap(), 1);
        }
        let ranges = read(&dir.path().join("remaining-ranges.csv"));
        assert_eq!(
            ranges,
            "ReportId,YearRange,Context\n10,2023 to 2033,in 2023 ... through 2033\n11,2023 to 2033,in 2023 ... through 2033\n"
        );
        let missing = read(&dir.path().join("remaining-not-found.csv"));
        assert_eq!(missing, "ReportId\n110\n111\n");
    }
}
