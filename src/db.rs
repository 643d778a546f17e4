use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::dedup::SeenStore;
use crate::error::StoreError;
use crate::pipeline::CycleStats;
use crate::record::JobRecord;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS seen_jobs (
            identity      TEXT PRIMARY KEY,
            first_seen    TEXT NOT NULL,
            last_notified TEXT
        );

        CREATE TABLE IF NOT EXISTS jobs (
            identity          TEXT PRIMARY KEY REFERENCES seen_jobs(identity),
            url               TEXT NOT NULL,
            title             TEXT NOT NULL,
            company           TEXT NOT NULL,
            location          TEXT NOT NULL,
            posted_at         TEXT,
            work_type         TEXT,
            is_recommendation BOOLEAN NOT NULL DEFAULT 0,
            page              INTEGER NOT NULL,
            first_seen        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_company ON jobs(company);
        CREATE INDEX IF NOT EXISTS idx_jobs_first_seen ON jobs(first_seen);

        CREATE TABLE IF NOT EXISTS scrape_runs (
            id               INTEGER PRIMARY KEY,
            started_at       TEXT NOT NULL,
            completed_at     TEXT,
            duration_seconds REAL,
            status           TEXT NOT NULL CHECK(status IN ('running','completed','failed')),
            stats_json       TEXT,
            error            TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_runs_started ON scrape_runs(started_at);

        CREATE TABLE IF NOT EXISTS reports_sent (
            id           INTEGER PRIMARY KEY,
            kind         TEXT NOT NULL,
            period_start TEXT NOT NULL,
            period_end   TEXT NOT NULL,
            sent_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_reports_kind ON reports_sent(kind, sent_at);
        ",
    )?;
    Ok(())
}

// ── Seen store ──

/// SQLite-backed [`SeenStore`]. Each insert commits on its own.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = connect(path)?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl SeenStore for SqliteStore {
    fn contains(&self, identity: &str) -> std::result::Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM seen_jobs WHERE identity = ?1",
                params![identity],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert(&mut self, identity: &str, at: DateTime<Utc>) -> std::result::Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO seen_jobs (identity, first_seen) VALUES (?1, ?2)",
            params![identity, at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn mark_notified(&mut self, identity: &str, at: DateTime<Utc>) -> std::result::Result<(), StoreError> {
        let n = self.conn.execute(
            "UPDATE seen_jobs SET last_notified = ?2 WHERE identity = ?1",
            params![identity, at.to_rfc3339()],
        )?;
        if n == 0 {
            return Err(StoreError::Other(format!("unknown identity {}", identity)));
        }
        Ok(())
    }
}

// ── Job archive ──

pub fn save_jobs(conn: &Connection, records: &[JobRecord], at: DateTime<Utc>) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO jobs
             (identity, url, title, company, location, posted_at, work_type, is_recommendation, page, first_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        let first_seen = at.to_rfc3339();
        for r in records {
            count += stmt.execute(params![
                r.identity(), r.url(), r.title(), r.company(), r.location(), r.posted_at(),
                r.work_type(), r.is_recommendation(), r.page(), first_seen,
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub struct RecentJob {
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: String,
    pub first_seen: String,
    pub notified: bool,
}

pub fn fetch_recent(conn: &Connection, company: Option<&str>, limit: usize) -> Result<Vec<RecentJob>> {
    let mut stmt = conn.prepare(
        "SELECT j.title, j.company, j.location, j.url, j.first_seen, s.last_notified IS NOT NULL
         FROM jobs j
         JOIN seen_jobs s ON s.identity = j.identity
         WHERE (?1 IS NULL OR j.company LIKE '%' || ?1 || '%')
         ORDER BY j.first_seen DESC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![company, limit as i64], |row| {
            Ok(RecentJob {
                title: row.get(0)?,
                company: row.get(1)?,
                location: row.get(2)?,
                url: row.get(3)?,
                first_seen: row.get(4)?,
                notified: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Scrape runs ──

pub fn start_run(conn: &Connection, at: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO scrape_runs (started_at, status) VALUES (?1, 'running')",
        params![at.to_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn complete_run(conn: &Connection, run_id: i64, stats: &CycleStats, at: DateTime<Utc>) -> Result<()> {
    let json = serde_json::to_string(stats)?;
    finish_run(conn, run_id, "completed", Some(json), None, at)
}

pub fn fail_run(conn: &Connection, run_id: i64, error: &str, at: DateTime<Utc>) -> Result<()> {
    finish_run(conn, run_id, "failed", None, Some(error), at)
}

fn finish_run(
    conn: &Connection,
    run_id: i64,
    status: &str,
    stats_json: Option<String>,
    error: Option<&str>,
    at: DateTime<Utc>,
) -> Result<()> {
    let started: Option<String> = conn
        .query_row(
            "SELECT started_at FROM scrape_runs WHERE id = ?1",
            params![run_id],
            |row| row.get(0),
        )
        .optional()?;
    let duration = started
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|s| (at - s.with_timezone(&Utc)).num_milliseconds() as f64 / 1000.0)
        .unwrap_or(0.0);

    conn.execute(
        "UPDATE scrape_runs
         SET completed_at = ?2, duration_seconds = ?3, status = ?4, stats_json = ?5, error = ?6
         WHERE id = ?1",
        params![run_id, at.to_rfc3339(), duration, status, stats_json, error],
    )?;
    Ok(())
}

// ── Stats ──

pub struct Stats {
    pub seen: i64,
    pub notified: i64,
    pub companies: i64,
    pub runs_completed: i64,
    pub runs_failed: i64,
    pub last_run: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };
    Ok(Stats {
        seen: count("SELECT COUNT(*) FROM seen_jobs")?,
        notified: count("SELECT COUNT(*) FROM seen_jobs WHERE last_notified IS NOT NULL")?,
        companies: count("SELECT COUNT(DISTINCT company) FROM jobs")?,
        runs_completed: count("SELECT COUNT(*) FROM scrape_runs WHERE status = 'completed'")?,
        runs_failed: count("SELECT COUNT(*) FROM scrape_runs WHERE status = 'failed'")?,
        last_run: conn
            .query_row(
                "SELECT completed_at FROM scrape_runs WHERE status = 'completed' ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?,
    })
}

// ── Reporting ──

/// A job admitted during a reporting period.
pub struct PeriodJob {
    pub title: String,
    pub company: String,
    pub location: String,
    pub is_recommendation: bool,
    pub first_seen: String,
}

/// Activity since a point in time.
#[derive(Default)]
pub struct PeriodStats {
    pub runs: usize,
    pub failed_runs: usize,
    /// Records extracted across completed runs.
    pub extracted: usize,
    pub notified: usize,
    /// Newest first.
    pub jobs: Vec<PeriodJob>,
}

impl PeriodStats {
    pub fn is_empty(&self) -> bool {
        self.runs == 0 && self.failed_runs == 0 && self.jobs.is_empty()
    }
}

pub fn stats_since(conn: &Connection, since: DateTime<Utc>) -> Result<PeriodStats> {
    let since = since.to_rfc3339();

    let mut stmt = conn.prepare(
        "SELECT status, stats_json FROM scrape_runs
         WHERE started_at >= ?1 AND status != 'running'",
    )?;
    let runs = stmt
        .query_map(params![since], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = PeriodStats::default();
    for (status, json) in runs {
        if status == "failed" {
            out.failed_runs += 1;
            continue;
        }
        out.runs += 1;
        let extracted = json
            .and_then(|j| serde_json::from_str::<serde_json::Value>(&j).ok())
            .and_then(|v| v.get("extracted").and_then(|n| n.as_u64()))
            .unwrap_or(0);
        out.extracted += extracted as usize;
    }

    out.notified = conn.query_row(
        "SELECT COUNT(*) FROM seen_jobs WHERE last_notified >= ?1",
        params![since],
        |row| row.get::<_, i64>(0),
    )? as usize;

    let mut stmt = conn.prepare(
        "SELECT title, company, location, is_recommendation, first_seen
         FROM jobs WHERE first_seen >= ?1
         ORDER BY first_seen DESC",
    )?;
    out.jobs = stmt
        .query_map(params![since], |row| {
            Ok(PeriodJob {
                title: row.get(0)?,
                company: row.get(1)?,
                location: row.get(2)?,
                is_recommendation: row.get(3)?,
                first_seen: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(out)
}

pub fn record_report_sent(
    conn: &Connection,
    kind: &str,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO reports_sent (kind, period_start, period_end, sent_at) VALUES (?1, ?2, ?3, ?3)",
        params![kind, period_start.to_rfc3339(), period_end.to_rfc3339()],
    )?;
    Ok(())
}

pub fn last_report_at(conn: &Connection, kind: &str) -> Result<Option<DateTime<Utc>>> {
    let sent: Option<String> = conn
        .query_row(
            "SELECT sent_at FROM reports_sent WHERE kind = ?1 ORDER BY id DESC LIMIT 1",
            params![kind],
            |row| row.get(0),
        )
        .optional()?;
    Ok(sent
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc)))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{IdentityStrategy, RecordBuilder};

    fn rec(url: &str, company: &str) -> JobRecord {
        RecordBuilder::new()
            .url(Some(url.into()))
            .title(Some("Rust Engineer".into()))
            .company(Some(company.into()))
            .location(Some("Remote".into()))
            .build(IdentityStrategy::Url)
            .unwrap()
    }

    #[test]
    fn seen_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.sqlite");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            assert!(!store.contains("example.com/a").unwrap());
            store.insert("example.com/a", Utc::now()).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.contains("example.com/a").unwrap());
        assert!(!store.contains("example.com/b").unwrap());
    }

    #[test]
    fn repeated_insert_is_ignored() {
        let mut store = SqliteStore::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        store.insert("x", Utc::now()).unwrap();
        store.insert("x", Utc::now()).unwrap();
        let n: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM seen_jobs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn mark_notified_requires_insert() {
        let mut store = SqliteStore::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        assert!(store.mark_notified("x", Utc::now()).is_err());
        store.insert("x", Utc::now()).unwrap();
        store.mark_notified("x", Utc::now()).unwrap();
        assert_eq!(get_stats(store.conn()).unwrap().notified, 1);
    }

    #[test]
    fn archive_and_recent() {
        let mut store = SqliteStore::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        let records = vec![rec("https://example.com/a", "Acme"), rec("https://example.com/b", "Globex")];
        let now = Utc::now();
        for r in &records {
            store.insert(r.identity(), now).unwrap();
        }
        assert_eq!(save_jobs(store.conn(), &records, now).unwrap(), 2);
        assert_eq!(save_jobs(store.conn(), &records, now).unwrap(), 0);
        store.mark_notified("example.com/a", now).unwrap();

        let all = fetch_recent(store.conn(), None, 10).unwrap();
        assert_eq!(all.len(), 2);
        let acme = fetch_recent(store.conn(), Some("acm"), 10).unwrap();
        assert_eq!(acme.len(), 1);
        assert!(acme[0].notified);
        assert_eq!(get_stats(store.conn()).unwrap().companies, 2);
    }

    #[test]
    fn run_lifecycle() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let t0 = Utc::now();
        let ok = start_run(&conn, t0).unwrap();
        complete_run(&conn, ok, &CycleStats::default(), t0 + chrono::Duration::seconds(3)).unwrap();
        let bad = start_run(&conn, t0).unwrap();
        fail_run(&conn, bad, "seen store unavailable", t0).unwrap();

        let s = get_stats(&conn).unwrap();
        assert_eq!(s.runs_completed, 1);
        assert_eq!(s.runs_failed, 1);
        assert!(s.last_run.is_some());
        let d: f64 = conn
            .query_row("SELECT duration_seconds FROM scrape_runs WHERE id = ?1", params![ok], |r| r.get(0))
            .unwrap();
        assert!((d - 3.0).abs() < 0.01);
    }

    #[test]
    fn period_stats_cover_only_the_window() {
        let mut store = SqliteStore::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        let now = Utc::now();
        let old = now - chrono::Duration::hours(30);

        let stale = rec("https://example.com/old", "Initech");
        store.insert(stale.identity(), old).unwrap();
        save_jobs(store.conn(), &[stale], old).unwrap();
        let r = start_run(store.conn(), old).unwrap();
        complete_run(store.conn(), r, &CycleStats { extracted: 9, ..Default::default() }, old).unwrap();

        let fresh = rec("https://example.com/new", "Acme");
        store.insert(fresh.identity(), now).unwrap();
        save_jobs(store.conn(), &[fresh], now).unwrap();
        store.mark_notified("example.com/new", now).unwrap();
        let r = start_run(store.conn(), now).unwrap();
        complete_run(store.conn(), r, &CycleStats { extracted: 4, novel: 1, ..Default::default() }, now).unwrap();
        let r = start_run(store.conn(), now).unwrap();
        fail_run(store.conn(), r, "boom", now).unwrap();

        let p = stats_since(store.conn(), now - chrono::Duration::hours(6)).unwrap();
        assert_eq!(p.runs, 1);
        assert_eq!(p.failed_runs, 1);
        assert_eq!(p.extracted, 4);
        assert_eq!(p.notified, 1);
        assert_eq!(p.jobs.len(), 1);
        assert_eq!(p.jobs[0].company, "Acme");

        let empty = stats_since(store.conn(), now + chrono::Duration::hours(1)).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn report_ledger_returns_latest() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert!(last_report_at(&conn, "daily").unwrap().is_none());
        let t0 = Utc::now() - chrono::Duration::days(1);
        let t1 = Utc::now();
        record_report_sent(&conn, "daily", t0 - chrono::Duration::days(1), t0).unwrap();
        record_report_sent(&conn, "daily", t0, t1).unwrap();
        record_report_sent(&conn, "periodic", t0, t0).unwrap();
        let last = last_report_at(&conn, "daily").unwrap().unwrap();
        assert_eq!(last.timestamp(), t1.timestamp());
    }
}
