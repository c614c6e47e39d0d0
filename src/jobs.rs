//! Entry points for the year-range jobs. Each opens its own connections,
//! runs once and logs a summary.

use anyhow::Result;
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::info;

use crate::db;
use crate::export::CsvExport;
use crate::range::Cascade;
use crate::runner::{self, Job, RunStats, Source};
use crate::settings::Settings;
use crate::writeback::ForecastUpdate;

/// Forecast cascade over every description, exported to CSV.
pub fn export(settings: &Settings) -> Result<RunStats> {
    let conn = db::connect(&settings.database.source)?;
    info!("Database connection successful");
    let mut sink = CsvExport::year_ranges(&settings.extract.output_dir, settings.extract.batch_size)?;
    let job = Job {
        name: "Year Range Extraction",
        cascade: Cascade::Forecast,
        source: Source::Paged {
            page_size: settings.extract.fetch_size,
        },
    };
    let stats = runner::run(&conn, &job, &mut sink)?;
    stats.log(job.name);
    Ok(stats)
}

/// Forecast cascade over every description, written to `forecast_year`.
pub fn update(settings: &Settings) -> Result<RunStats> {
    let src = db::connect(&settings.database.source)?;
    let dst = db::connect(&settings.database.metrics)?;
    info!("Database connection successful");
    let mut sink = ForecastUpdate::new(&dst);
    let job = Job {
        name: "Forecast Year Update",
        cascade: Cascade::Forecast,
        source: Source::Paged {
            page_size: settings.extract.fetch_size,
        },
    };
    let stats = runner::run(&src, &job, &mut sink)?;
    stats.log(job.name);
    info!("Rows updated    : {}", sink.updated());
    Ok(stats)
}

/// Through rule over the configured leftover ids, exported to CSV.
pub fn remaining_export(settings: &Settings, ids: Vec<i64>) -> Result<RunStats> {
    let conn = db::connect(&settings.database.source)?;
    info!("Database connection successful");
    let mut sink = CsvExport::remaining(&settings.extract.output_dir)?;
    let job = Job {
        name: "Remaining Range Extraction",
        cascade: Cascade::Through,
        source: Source::Ids(ids),
    };
    let stats = runner::run(&conn, &job, &mut sink)?;
    stats.log(job.name);
    Ok(stats)
}

/// Through rule over the configured leftover ids, written to `forecast_year`.
pub fn remaining_update(settings: &Settings, ids: Vec<i64>) -> Result<RunStats> {
    let src = db::connect(&settings.database.source)?;
    let dst = db::connect(&settings.database.metrics)?;
    info!("Database connection successful");
    let mut sink = ForecastUpdate::new(&dst);
    let job = Job {
        name: "Remaining Forecast Update",
        cascade: Cascade::Through,
        source: Source::Ids(ids),
    };
    let stats = runner::run(&src, &job, &mut sink)?;
    stats.log(job.name);
    info!("Rows updated    : {}", sink.updated());
    Ok(stats)
}

/// Create any missing tables in all three databases.
pub fn init(settings: &Settings) -> Result<()> {
    let schemas: [(&PathBuf, fn(&Connection) -> Result<()>); 3] = [
        (&settings.database.source, db::init_source_schema),
        (&settings.database.metrics, db::init_metrics_schema),
        (&settings.database.target, db::init_target_schema),
    ];
    for (path, init) in schemas {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = db::connect(path)?;
        init(&conn)?;
        info!("Schema ready: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::add_description;
    use std::fs;

    fn settings_in(dir: &std::path::Path) -> Settings {
        let mut s = Settings::defaults();
        s.database.source = dir.join("data/reports.sqlite");
        s.database.metrics = dir.join("data/metrics.sqlite");
        s.database.target = dir.join("data/target.sqlite");
        s.extract.output_dir = dir.join("output");
        s.extract.fetch_size = 2;
        s
    }

    #[test]
    fn export_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings_in(dir.path());
        init(&s).unwrap();
        {
            let conn = db::connect(&s.database.source).unwrap();
            add_description(&conn, 1, Some("CAGR of 5% from 2024 to 2030"));
            add_description(&conn, 2, Some("Strong demand."));
            add_description(&conn, 3, Some("USD 3 billion by 2033"));
        }

        let stats = export(&s).unwrap();
        assert_eq!((stats.processed, stats.matched, stats.not_found), (3, 2, 1));
        assert_eq!(stats.files, 1);

        let found = fs::read_to_string(s.extract.output_dir.join("year_ranges_1.csv")).unwrap();
        assert_eq!(
            found,
            "ReportId,YearRange,Context\n1,2024 to 2030,CAGR of 5% from 2024 to 2030\n3,to 2033,USD 3 billion by 2033\n"
        );
        let missing =
            fs::read_to_string(s.extract.output_dir.join("year_ranges_not_found.csv")).unwrap();
        assert_eq!(missing, "ReportId\n2\n");
    }

    #[test]
    fn remaining_update_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings_in(dir.path());
        init(&s).unwrap();
        {
            let conn = db::connect(&s.database.source).unwrap();
            add_description(&conn, 4390, Some("Valued in 2023; outlook through 2033."));
            let metrics = db::connect(&s.database.metrics).unwrap();
            crate::db::testing::add_metric(&metrics, 4390);
        }

        let stats = remaining_update(&s, vec![4390, 5231]).unwrap();
        assert_eq!((stats.matched, stats.not_found), (1, 1));

        let metrics = db::connect(&s.database.metrics).unwrap();
        assert_eq!(
            crate::db::testing::forecast_year(&metrics, 4390).as_deref(),
            Some("2023-2033")
        );
    }

    #[test]
    fn unreachable_database_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings_in(dir.path());
        s.database.source = dir.path().join("missing/dir/reports.sqlite");
        assert!(export(&s).is_err());
    }
}
