use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::config::TelegramConfig;
use crate::dedup::SeenStore;
use crate::pipeline::BatchResult;
use crate::record::{JobRecord, UNKNOWN};

const TELEGRAM_API: &str = "https://api.telegram.org";
const SEND_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const DIGEST_TOP: usize = 5;

/// Where formatted messages go.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one HTML-formatted message.
    async fn send(&self, text: &str) -> Result<()>;
}

/// Telegram bot `sendMessage` backend.
pub struct TelegramNotifier {
    http: Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(http: Client, cfg: &TelegramConfig) -> Self {
        Self {
            http,
            bot_token: cfg.bot_token.clone(),
            chat_id: cfg.chat_id.clone(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.bot_token);
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let mut attempt = 1;
        loop {
            match post(&self.http, &url, &payload).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < SEND_ATTEMPTS => {
                    warn!("Telegram send attempt {}/{} failed: {:#}", attempt, SEND_ATTEMPTS, e);
                    tokio::time::sleep(RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Writes messages to the log instead of sending them.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        info!(target: "job_watch::notify", "{}", text);
        Ok(())
    }
}

/// Telegram when configured, the log otherwise.
pub fn from_config(http: Client, cfg: Option<&TelegramConfig>) -> Box<dyn Notifier> {
    match cfg {
        Some(t) => Box::new(TelegramNotifier::new(http, t)),
        None => Box::new(LogNotifier),
    }
}

async fn post(client: &Client, url: &str, payload: &serde_json::Value) -> Result<()> {
    let resp = client
        .post(url)
        .json(payload)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .context("Telegram request failed")?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Telegram API error {}: {}", status, body);
    }
    Ok(())
}

/// Deliver a batch and mark every delivered identity as notified.
///
/// A batch at or over the digest threshold goes out as one message, anything
/// smaller as one message per record. Failed sends are logged and skipped; the
/// identity stays seen so it is not re-sent next cycle. Returns how many
/// records were delivered.
pub async fn deliver<S: SeenStore + ?Sized>(
    notifier: &dyn Notifier,
    batch: &BatchResult,
    store: &mut S,
    now: DateTime<Utc>,
) -> Result<usize> {
    if batch.notify_list.is_empty() {
        return Ok(0);
    }

    if batch.is_digest() {
        let text = format_digest(&batch.notify_list, now);
        if let Err(e) = notifier.send(&text).await {
            warn!("Failed to send digest of {} jobs: {:#}", batch.notify_list.len(), e);
            return Ok(0);
        }
        for r in &batch.notify_list {
            store.mark_notified(r.identity(), now)?;
        }
        return Ok(batch.notify_list.len());
    }

    let mut sent = 0;
    for r in &batch.notify_list {
        match notifier.send(&format_job(r)).await {
            Ok(()) => {
                store.mark_notified(r.identity(), now)?;
                info!("Notified: {} - {}", truncate(r.title(), 40), r.company());
                sent += 1;
            }
            Err(e) => warn!("Failed to notify {}: {:#}", truncate(r.title(), 40), e),
        }
    }
    Ok(sent)
}

// ── Formatting ──

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Cut to `max` chars, ellipsis included.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

fn display_company(r: &JobRecord) -> &str {
    if r.company() == UNKNOWN {
        "Company not listed"
    } else {
        r.company()
    }
}

fn display_location(r: &JobRecord) -> &str {
    if r.location() == UNKNOWN {
        "Location not specified"
    } else {
        r.location()
    }
}

pub fn format_job(r: &JobRecord) -> String {
    let badge = if r.is_recommendation() {
        "RECOMMENDED"
    } else {
        "DIRECT MATCH"
    };

    let mut msg = format!(
        "<b>{}</b>\n\n📍 {}\n🏢 {}\n",
        escape_html(r.title()),
        escape_html(&truncate(display_location(r), 50)),
        escape_html(display_company(r)),
    );
    if let Some(w) = r.work_type() {
        msg.push_str(&format!("💼 {}\n", escape_html(w)));
    }
    if let Some(i) = r.insight() {
        msg.push_str(&format!("ℹ️ {}\n", escape_html(i)));
    }
    msg.push_str(&format!("\n{}\n\n<a href=\"{}\">View job</a>", badge, escape_html(r.url())));
    if let Some(p) = r.posted_at() {
        msg.push_str(&format!("\n\n<i>Posted {}</i>", escape_html(p)));
    }
    msg
}

pub fn format_digest(records: &[JobRecord], now: DateTime<Utc>) -> String {
    let count = records.len();
    let recommended = records.iter().filter(|r| r.is_recommendation()).count();
    let direct = count - recommended;

    let mut msg = format!(
        "<b>🔔 {} New Job{} Found</b>\n\n",
        count,
        if count == 1 { "" } else { "s" }
    );
    if direct > 0 {
        msg.push_str(&format!("Direct matches: {}\n", direct));
    }
    if recommended > 0 {
        msg.push_str(&format!("Recommendations: {}\n", recommended));
    }
    msg.push_str("\n<b>Latest:</b>\n\n");

    for (i, r) in records.iter().take(DIGEST_TOP).enumerate() {
        msg.push_str(&format!(
            "{}. <a href=\"{}\"><b>{}</b></a>\n   🏢 {}\n\n",
            i + 1,
            escape_html(r.url()),
            escape_html(&truncate(r.title(), 45)),
            escape_html(&truncate(display_company(r), 30)),
        ));
    }
    if count > DIGEST_TOP {
        msg.push_str(&format!("<i>...and {} more</i>\n\n", count - DIGEST_TOP));
    }
    msg.push_str(&format!("<i>Scraped at {}</i>", now.format("%H:%M, %b %d")));
    msg
}

pub fn format_error(error: &str, now: DateTime<Utc>) -> String {
    format!(
        "<b>⚠️ job_watch alert</b>\n\nAn error occurred:\n\n<code>{}</code>\n\n<i>{}</i>",
        escape_html(error),
        now.format("%H:%M, %b %d, %Y")
    )
}

// ── Tests ──
