use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db;
use crate::range::RangeFormat;
use crate::runner::{Hit, Sink};

/// Writes compact ranges into `report_market_metrics.forecast_year`.
///
/// Each page runs in one transaction committed at `end_page`, so an
/// interrupted run leaves whole pages applied. Rewriting a row with the same
/// range is harmless, which makes the job safe to re-run.
pub struct ForecastUpdate<'c> {
    conn: &'c Connection,
    in_tx: bool,
    updated: usize,
    missing: usize,
}

impl<'c> ForecastUpdate<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        ForecastUpdate {
            conn,
            in_tx: false,
            updated: 0,
            missing: 0,
        }
    }

    pub fn updated(&self) -> usize {
        self.updated
    }

    fn begin(&mut self) -> Result<()> {
        if !self.in_tx {
            self.conn.execute("BEGIN TRANSACTION", [])?;
            self.in_tx = true;
        }
        Ok(())
    }
}

impl Sink for ForecastUpdate<'_> {
    fn format(&self) -> RangeFormat {
        RangeFormat::Compact
    }

    fn with_context(&self) -> bool {
        false
    }

    fn found(&mut self, report_id: i64, hit: &Hit) -> Result<()> {
        self.begin()?;
        let n = db::update_forecast_year(self.conn, report_id, &hit.range)?;
        if n == 0 {
            warn!(report_id, "No report_market_metrics row for ReportId={}", report_id);
            self.missing += 1;
        } else {
            self.updated += n;
        }
        Ok(())
    }

    fn not_found(&mut self, _report_id: i64) -> Result<()> {
        Ok(())
    }

    fn end_page(&mut self) -> Result<()> {
        if self.in_tx {
            self.conn.execute("COMMIT", []).context("Commit failed")?;
            self.in_tx = false;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<usize> {
        self.end_page()?;
        info!(
            "forecast_year updated for {} rows ({} without a metrics row)",
            self.updated, self.missing
        );
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{add_description, add_metric, forecast_year, metrics, source};
    use crate::range::Cascade;
    use crate::runner::{run, Job, Source};

    #[test]
    fn paged_update_writes_compact_ranges() {
        let src = source();
        add_description(&src, 1, Some("between 2024 and 2031"));
        add_description(&src, 2, Some("no years"));
        add_description(&src, 3, Some("reach USD 5 billion by 2035"));
        add_description(&src, 4, Some("valued in 2022, USD 9 billion by 2030"));

        let dst = metrics();
        for id in [1, 2, 3] {
            add_metric(&dst, id);
        }

        let job = Job {
            name: "update",
            cascade: Cascade::Forecast,
            source: Source::Paged { page_size: 2 },
        };
        let mut sink = ForecastUpdate::new(&dst);
        let stats = run(&src, &job, &mut sink).unwrap();

        assert_eq!(stats.matched, 3);
        assert_eq!(sink.updated(), 2);
        assert_eq!(forecast_year(&dst, 1).as_deref(), Some("2024-2031"));
        assert_eq!(forecast_year(&dst, 2), None);
        assert_eq!(forecast_year(&dst, 3).as_deref(), Some("-2035"));
        assert!(dst.is_autocommit());
    }

    #[test]
    fn rerun_is_idempotent() {
        let src = source();
        add_description(&src, 7, Some("Demand in 2023 grows through 2033"));
        let dst = metrics();
        add_metric(&dst, 7);

        let job = Job {
            name: "remaining-update",
            cascade: Cascade::Through,
            source: Source::Ids(vec![7, 8]),
        };
        for _ in 0..2 {
            let mut sink = ForecastUpdate::new(&dst);
            run(&src, &job, &mut sink).unwrap();
            assert_eq!(sink.updated(), 1);
        }
        assert_eq!(forecast_year(&dst, 7).as_deref(), Some("2023-2033"));
    }
}
