use anyhow::{Context, Result};
use itertools::Itertools;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub fn connect(path: &Path) -> Result<Connection> {
    let conn =
        Connection::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .with_context(|| format!("Failed to configure {}", path.display()))?;
    Ok(conn)
}

// ── Schema ──

pub fn init_source_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS report_master (
            Id          INTEGER PRIMARY KEY,
            Name        TEXT,
            Path        TEXT,
            IndustryId  INTEGER,
            isFetched   BOOLEAN NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_report_master_industry ON report_master(IndustryId, isFetched);

        CREATE TABLE IF NOT EXISTS report_desc_master (
            ReportId    INTEGER PRIMARY KEY,
            ReportDesc  TEXT,
            Keywords    TEXT,
            Title       TEXT
        );
        ",
    )?;
    Ok(())
}

pub fn init_metrics_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS report_market_metrics (
            report_id      INTEGER PRIMARY KEY,
            forecast_year  TEXT
        );
        ",
    )?;
    Ok(())
}

pub fn init_target_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS industries_master (
            Id    INTEGER PRIMARY KEY,
            name  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sub_industries_master (
            Id           INTEGER PRIMARY KEY,
            industry_id  INTEGER NOT NULL REFERENCES industries_master(Id),
            name         TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS report_master (
            Id               INTEGER PRIMARY KEY,
            ref_report_id    INTEGER NOT NULL,
            industry_id      INTEGER NOT NULL REFERENCES industries_master(Id),
            sub_industry_id  INTEGER NOT NULL REFERENCES sub_industries_master(Id),
            name             TEXT,
            description      TEXT,
            slug             TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_target_report_name ON report_master(name);
        ",
    )?;
    Ok(())
}

// ── Descriptions (year-range jobs) ──

#[derive(Debug, Clone)]
pub struct DescriptionRow {
    pub report_id: i64,
    pub description: String,
}

pub fn count_descriptions(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM report_desc_master WHERE ReportDesc IS NOT NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(n.max(0) as u64)
}

/// Next page of non-null descriptions with `ReportId > after_id`, ascending.
pub fn fetch_description_page(
    conn: &Connection,
    after_id: i64,
    limit: usize,
) -> Result<Vec<DescriptionRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT ReportId, ReportDesc
         FROM report_desc_master
         WHERE ReportDesc IS NOT NULL AND ReportId > ?1
         ORDER BY ReportId
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![after_id, limit as i64], |row| {
            Ok(DescriptionRow {
                report_id: row.get(0)?,
                description: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// `None` when the row is missing or its description is NULL.
pub fn fetch_description(conn: &Connection, report_id: i64) -> Result<Option<String>> {
    let desc = conn
        .query_row(
            "SELECT ReportDesc FROM report_desc_master WHERE ReportId = ?1",
            params![report_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?;
    Ok(desc.flatten())
}

pub fn update_forecast_year(conn: &Connection, report_id: i64, range: &str) -> Result<usize> {
    let n = conn
        .prepare_cached("UPDATE report_market_metrics SET forecast_year = ?1 WHERE report_id = ?2")?
        .execute(params![range, report_id])?;
    Ok(n)
}

// ── Classification ──

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub id: i64,
    pub name: String,
    pub path: Option<String>,
}

/// Unfetched reports in the given industries, newest first.
pub fn fetch_unfetched_reports(
    conn: &Connection,
    industry_ids: &[i64],
    limit: usize,
) -> Result<Vec<SourceReport>> {
    if industry_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT Id, Name, Path
         FROM report_master
         WHERE isFetched = 0 AND IndustryId IN ({})
         ORDER BY Id DESC
         LIMIT {}",
        industry_ids.iter().join(","),
        limit
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SourceReport {
                id: row.get(0)?,
                name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                path: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct DescriptionMeta {
    pub keywords: Option<String>,
    pub title: Option<String>,
}

pub fn fetch_description_meta(conn: &Connection, report_id: i64) -> Result<Option<DescriptionMeta>> {
    let meta = conn
        .query_row(
            "SELECT Keywords, Title FROM report_desc_master WHERE ReportId = ?1",
            params![report_id],
            |row| {
                Ok(DescriptionMeta {
                    keywords: row.get(0)?,
                    title: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(meta)
}

pub fn mark_fetched(conn: &Connection, report_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE report_master SET isFetched = 1 WHERE Id = ?1",
        params![report_id],
    )?;
    Ok(())
}

pub fn industry_id(conn: &Connection, name: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT Id FROM industries_master WHERE LOWER(name) = LOWER(?1) LIMIT 1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// (sub_industry_id, industry_id)
pub fn sub_industry_id(conn: &Connection, name: &str) -> Result<Option<(i64, i64)>> {
    let ids = conn
        .query_row(
            "SELECT Id, industry_id FROM sub_industries_master WHERE LOWER(name) = LOWER(?1) LIMIT 1",
            params![name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(ids)
}

pub fn report_name_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT Id FROM report_master WHERE LOWER(name) = LOWER(?1) LIMIT 1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub struct TargetReport<'a> {
    pub ref_report_id: i64,
    pub industry_id: i64,
    pub sub_industry_id: i64,
    pub name: Option<&'a str>,
    pub description: Option<&'a str>,
    pub slug: Option<&'a str>,
}

pub fn insert_target_report(conn: &Connection, r: &TargetReport<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO report_master
         (ref_report_id, industry_id, sub_industry_id, name, description, slug)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            r.ref_report_id,
            r.industry_id,
            r.sub_industry_id,
            r.name,
            r.description,
            r.slug,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}
