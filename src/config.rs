use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;
use crate::record::IdentityStrategy;

pub const DEFAULT_CONFIG_PATH: &str = "job_watch.toml";
const ENV_PREFIX: &str = "JOB_WATCH";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub identity: IdentityStrategy,
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub rules: RuleConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub search_urls: Vec<String>,
    /// Query parameter carrying the result offset.
    pub page_param: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub concurrency: usize,
    pub max_retries: u32,
    pub interval_minutes: u64,
    pub include_recommendations: bool,
    pub default_location: Option<String>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            search_urls: Vec::new(),
            page_param: "start".to_string(),
            page_size: 25,
            max_pages: 5,
            concurrency: 4,
            max_retries: 3,
            interval_minutes: 10,
            include_recommendations: true,
            default_location: None,
        }
    }
}

/// Filter options as written in the config file, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub required_keywords: Vec<String>,
    pub excluded_keywords: Vec<String>,
    pub company_allow: Vec<String>,
    pub company_deny: Vec<String>,
    pub location_match: Option<String>,
    pub min_notifications_per_run: usize,
}

/// Summary messages beyond per-job notifications.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    /// Send a report after every cycle.
    pub run_report: bool,
    /// Hours between periodic summaries in `watch`; 0 disables.
    pub periodic_hours: u32,
    /// Send a daily summary in `watch`.
    pub daily_summary: bool,
    /// UTC hour the daily summary goes out at.
    pub daily_hour_utc: u32,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            run_report: false,
            periodic_hours: 6,
            daily_summary: true,
            daily_hour_utc: 9,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/jobs.sqlite")
}

impl Settings {
    /// Load settings from an optional TOML file overlaid by `JOB_WATCH__*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(required))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Parse settings from a TOML string, no environment overlay.
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_file() {
        let s = Settings::from_toml("").unwrap();
        assert_eq!(s.db_path, PathBuf::from("data/jobs.sqlite"));
        assert_eq!(s.identity, IdentityStrategy::Url);
        assert_eq!(s.scrape.page_size, 25);
        assert!(s.scrape.include_recommendations);
        assert!(s.rules.required_keywords.is_empty());
        assert!(s.telegram.is_none());
        assert!(!s.reports.run_report);
        assert_eq!(s.reports.periodic_hours, 6);
        assert!(s.reports.daily_summary);
        assert_eq!(s.reports.daily_hour_utc, 9);
    }

    #[test]
    fn full_file() {
        let s = Settings::from_toml(
            r#"
            db_path = "/tmp/x.sqlite"
            identity = "composite"

            [scrape]
            search_urls = ["https://example.com/jobs?q=rust"]
            max_pages = 2
            include_recommendations = false

            [rules]
            required_keywords = ["rust", "python"]
            excluded_keywords = ["senior"]
            company_deny = ["Globex"]
            location_match = "remote"
            min_notifications_per_run = 3

            [reports]
            run_report = true
            periodic_hours = 0
            daily_summary = false

            [telegram]
            bot_token = "t"
            chat_id = "c"
            "#,
        )
        .unwrap();
        assert_eq!(s.identity, IdentityStrategy::Composite);
        assert_eq!(s.scrape.max_pages, 2);
        assert_eq!(s.scrape.page_param, "start");
        assert!(!s.scrape.include_recommendations);
        assert_eq!(s.rules.required_keywords.len(), 2);
        assert_eq!(s.rules.location_match.as_deref(), Some("remote"));
        assert_eq!(s.rules.min_notifications_per_run, 3);
        assert!(s.reports.run_report);
        assert_eq!(s.reports.periodic_hours, 0);
        assert!(!s.reports.daily_summary);
        assert_eq!(s.reports.daily_hour_utc, 9);
        assert_eq!(s.telegram.unwrap().chat_id, "c");
    }

    #[test]
    fn bad_identity_value_is_an_error() {
        assert!(Settings::from_toml("identity = \"title\"").is_err());
    }
}
