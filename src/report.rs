use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::ReportsConfig;
use crate::db::{self, PeriodStats, Stats};
use crate::notify::{escape_html, truncate, Notifier};
use crate::pipeline::CycleStats;
use crate::record::{JobRecord, UNKNOWN};

pub const PERIODIC: &str = "periodic";
pub const DAILY: &str = "daily";

/// What one finished cycle produced, for the run report.
pub struct RunSummary<'a> {
    pub stats: &'a CycleStats,
    pub jobs: &'a [JobRecord],
    pub pages_failed: usize,
    pub delivered: usize,
    pub duration: Duration,
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Most frequent values, ties broken alphabetically.
fn top_counts<'a>(values: impl Iterator<Item = &'a str>, n: usize) -> Vec<(&'a str, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in values.filter(|v| !v.is_empty() && *v != UNKNOWN) {
        *counts.entry(v).or_default() += 1;
    }
    let mut top: Vec<(&str, usize)> = counts.into_iter().collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    top.truncate(n);
    top
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn push_top(msg: &mut String, heading: &str, top: &[(&str, usize)]) {
    if top.is_empty() {
        return;
    }
    msg.push_str(&format!("\n<b>{}</b>\n", heading));
    for (i, (name, n)) in top.iter().enumerate() {
        msg.push_str(&format!("  {}. {}: {} job{}\n", i + 1, escape_html(name), n, plural(*n)));
    }
}

pub fn format_run_report(run: &RunSummary, now: DateTime<Utc>) -> String {
    let s = run.stats;
    let recommended = run.jobs.iter().filter(|r| r.is_recommendation()).count();

    let mut msg = format!(
        "<b>🔍 Scrape run complete</b>\n\n\
         Duration: {}\n\
         Pages: {} ({} failed)\n\
         Jobs found: {}\n\
         Accepted: {} | Rejected: {}\n\
         Already seen: {}\n\
         New jobs: {} ({} direct, {} recommended)\n\
         Notifications sent: {}\n",
        format_duration(run.duration),
        s.fragments,
        run.pages_failed,
        s.extracted,
        s.accepted,
        s.rejected(),
        s.already_seen + s.duplicates_in_batch,
        s.novel,
        s.novel.saturating_sub(recommended),
        recommended,
        run.delivered,
    );

    push_top(&mut msg, "Top companies", &top_counts(run.jobs.iter().map(|r| r.company()), 5));

    if s.extracted > 0 {
        msg.push_str(&format!(
            "\nMatch rate: {:.0}% ({}/{})\n",
            s.accepted as f64 * 100.0 / s.extracted as f64,
            s.accepted,
            s.extracted
        ));
    }
    msg.push_str(&format!("\n<i>{}</i>", now.format("%Y-%m-%d %H:%M:%S UTC")));
    msg
}

/// Summary of the last `hours`, or `None` when nothing happened.
pub fn format_periodic_report(period: &PeriodStats, hours: u32, now: DateTime<Utc>) -> Option<String> {
    if period.is_empty() {
        return None;
    }
    let start = now - chrono::Duration::hours(hours as i64);

    let mut msg = format!(
        "<b>📊 {}-hour summary</b>\n<i>{} - {} UTC</i>\n\n\
         Runs: {} ({} failed)\n\
         Jobs seen: {}\n\
         New jobs: {}\n\
         Notifications: {}\n",
        hours,
        start.format("%H:%M"),
        now.format("%H:%M"),
        period.runs,
        period.failed_runs,
        period.extracted,
        period.jobs.len(),
        period.notified,
    );

    push_top(&mut msg, "Top companies", &top_counts(period.jobs.iter().map(|j| j.company.as_str()), 5));
    let cities = period
        .jobs
        .iter()
        .map(|j| j.location.split(',').next().unwrap_or("").trim());
    push_top(&mut msg, "Top locations", &top_counts(cities, 3));

    let best: Vec<_> = period.jobs.iter().filter(|j| !j.is_recommendation).take(5).collect();
    if !best.is_empty() {
        msg.push_str("\n<b>Best matches</b>\n");
        for j in best {
            let title = escape_html(&truncate(&j.title, 40));
            if j.company == UNKNOWN {
                msg.push_str(&format!("  ⭐ {}\n", title));
            } else {
                msg.push_str(&format!("  ⭐ {} - {}\n", title, escape_html(&j.company)));
            }
        }
    }

    msg.push_str(&format!("\n<i>{}</i>", now.format("%Y-%m-%d %H:%M:%S UTC")));
    Some(msg)
}

pub fn format_daily_summary(today: &PeriodStats, totals: &Stats, now: DateTime<Utc>) -> String {
    let mut msg = format!(
        "<b>📅 Daily summary - {}</b>\n\n\
         <b>Last 24 hours</b>\n\
         Runs: {} ({} failed)\n\
         Jobs seen: {}\n\
         New jobs: {}\n\
         Notifications: {}\n\n\
         <b>All time</b>\n\
         Jobs tracked: {}\n\
         Companies: {}\n\
         Runs: {}\n\
         Notifications: {}\n",
        now.format("%b %d, %Y"),
        today.runs,
        today.failed_runs,
        today.extracted,
        today.jobs.len(),
        today.notified,
        totals.seen,
        totals.companies,
        totals.runs_completed,
        totals.notified,
    );
    push_top(&mut msg, "Top companies today", &top_counts(today.jobs.iter().map(|j| j.company.as_str()), 3));
    msg
}

pub fn periodic_due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, hours: u32) -> bool {
    if hours == 0 {
        return false;
    }
    last.map_or(true, |l| now - l >= chrono::Duration::hours(hours as i64))
}

/// Due once per UTC day, at or after `hour`.
pub fn daily_due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, hour: Option<u32>) -> bool {
    let Some(hour) = hour else { return false };
    if now.hour() < hour {
        return false;
    }
    last.map_or(true, |l| l.date_naive() < now.date_naive())
}

/// Send whichever of the periodic and daily reports are due, recording each
/// successful send. Returns the kinds sent.
pub async fn send_due_reports(
    notifier: &dyn Notifier,
    conn: &Connection,
    cfg: &ReportsConfig,
    now: DateTime<Utc>,
) -> Result<Vec<&'static str>> {
    let mut sent = Vec::new();

    if periodic_due(db::last_report_at(conn, PERIODIC)?, now, cfg.periodic_hours) {
        let start = now - chrono::Duration::hours(cfg.periodic_hours as i64);
        let period = db::stats_since(conn, start)?;
        match format_periodic_report(&period, cfg.periodic_hours, now) {
            Some(text) => match notifier.send(&text).await {
                Ok(()) => {
                    db::record_report_sent(conn, PERIODIC, start, now)?;
                    info!("Periodic report sent");
                    sent.push(PERIODIC);
                }
                Err(e) => warn!("Failed to send periodic report: {:#}", e),
            },
            None => {
                info!("No activity in the last {}h, periodic report skipped", cfg.periodic_hours);
                db::record_report_sent(conn, PERIODIC, start, now)?;
            }
        }
    }

    let daily_hour = cfg.daily_summary.then_some(cfg.daily_hour_utc);
    if daily_due(db::last_report_at(conn, DAILY)?, now, daily_hour) {
        let start = now - chrono::Duration::hours(24);
        let text = format_daily_summary(&db::stats_since(conn, start)?, &db::get_stats(conn)?, now);
        match notifier.send(&text).await {
            Ok(()) => {
                db::record_report_sent(conn, DAILY, start, now)?;
                info!("Daily summary sent");
                sent.push(DAILY);
            }
            Err(e) => warn!("Failed to send daily summary: {:#}", e),
        }
    }

    Ok(sent)
}

// ── Tests ──
