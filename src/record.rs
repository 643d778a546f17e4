use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Placeholder for a text field the markup did not provide.
pub const UNKNOWN: &str = "unknown";

static VIEW_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/jobs/view/(?:[^/?#]*-)?(\d+)").unwrap());
static CURRENT_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]currentJobId=(\d+)").unwrap());

/// Which source fields a record's identity is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStrategy {
    /// Canonical posting URL, composite as fallback.
    #[default]
    Url,
    /// `title|company|location`, URL as fallback.
    Composite,
}

/// A structured job posting. Constructed once by [`RecordBuilder`], read-only after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    identity: String,
    title: String,
    company: String,
    location: String,
    posted_at: Option<String>,
    url: String,
    raw_text: String,
    work_type: Option<String>,
    insight: Option<String>,
    is_recommendation: bool,
    page: u32,
}

impl JobRecord {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn company(&self) -> &str {
        &self.company
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn posted_at(&self) -> Option<&str> {
        self.posted_at.as_deref()
    }

    /// Absolute posting URL, empty when the card had no resolvable link.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Lower-cased text used for keyword matching.
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn work_type(&self) -> Option<&str> {
        self.work_type.as_deref()
    }

    pub fn insight(&self) -> Option<&str> {
        self.insight.as_deref()
    }

    pub fn is_recommendation(&self) -> bool {
        self.is_recommendation
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn has_company(&self) -> bool {
        self.company != UNKNOWN
    }
}

/// Collects optional field values and produces a [`JobRecord`] if an identity resolves.
#[derive(Debug, Default, Clone)]
pub struct RecordBuilder {
    title: Option<String>,
    company: Option<String>,
    location: Option<String>,
    posted_at: Option<String>,
    url: Option<String>,
    work_type: Option<String>,
    insight: Option<String>,
    is_recommendation: bool,
    page: u32,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, v: Option<String>) -> Self {
        self.title = non_blank(v);
        self
    }

    pub fn company(mut self, v: Option<String>) -> Self {
        self.company = non_blank(v);
        self
    }

    pub fn location(mut self, v: Option<String>) -> Self {
        self.location = non_blank(v);
        self
    }

    pub fn posted_at(mut self, v: Option<String>) -> Self {
        self.posted_at = non_blank(v);
        self
    }

    pub fn url(mut self, v: Option<String>) -> Self {
        self.url = non_blank(v);
        self
    }

    pub fn work_type(mut self, v: Option<String>) -> Self {
        self.work_type = non_blank(v);
        self
    }

    pub fn insight(mut self, v: Option<String>) -> Self {
        self.insight = non_blank(v);
        self
    }

    pub fn recommendation(mut self, v: bool) -> Self {
        self.is_recommendation = v;
        self
    }

    pub fn page(mut self, v: u32) -> Self {
        self.page = v;
        self
    }

    /// Returns `None` when neither a URL nor a title+company pair is available.
    pub fn build(self, strategy: IdentityStrategy) -> Option<JobRecord> {
        let by_url = self.url.as_deref().and_then(url_identity);
        let by_composite = composite_identity(
            self.title.as_deref(),
            self.company.as_deref(),
            self.location.as_deref(),
        );
        let identity = match strategy {
            IdentityStrategy::Url => by_url.or(by_composite),
            IdentityStrategy::Composite => by_composite.or(by_url),
        }?;

        let raw_text = [
            self.title.as_deref(),
            self.company.as_deref(),
            self.location.as_deref(),
            self.insight.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

        Some(JobRecord {
            identity,
            title: self.title.unwrap_or_else(|| UNKNOWN.to_string()),
            company: self.company.unwrap_or_else(|| UNKNOWN.to_string()),
            location: self.location.unwrap_or_else(|| UNKNOWN.to_string()),
            posted_at: self.posted_at,
            url: self.url.unwrap_or_default(),
            raw_text,
            work_type: self.work_type,
            insight: self.insight,
            is_recommendation: self.is_recommendation,
            page: self.page,
        })
    }
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s != UNKNOWN)
}

/// Query keys that only track where a click came from.
const TRACKING_PARAMS: &[&str] = &[
    "trk",
    "trkinfo",
    "refid",
    "trackingid",
    "ref",
    "fbclid",
    "gclid",
    "mc_cid",
    "mc_eid",
    "_dt",
    "modal",
    "lipi",
    "position",
    "pagenum",
    "ebp",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Canonical key for a posting URL: `host/jobs/<id>` when a numeric job id is
/// present, otherwise `host/path` plus the non-tracking query pairs in sorted
/// order. Fragment and trailing slash are dropped.
pub fn url_identity(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    let host = parsed.host_str()?.trim_start_matches("www.").to_lowercase();

    if let Some(caps) = VIEW_ID_RE.captures(parsed.path()) {
        return Some(format!("{}/jobs/{}", host, &caps[1]));
    }
    if let Some(caps) = CURRENT_ID_RE.captures(raw) {
        return Some(format!("{}/jobs/{}", host, &caps[1]));
    }

    let path = parsed.path().trim_end_matches('/');
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        return Some(format!("{}{}", host, path));
    }
    pairs.sort();
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    Some(format!("{}{}?{}", host, path, query))
}

fn composite_identity(
    title: Option<&str>,
    company: Option<&str>,
    location: Option<&str>,
) -> Option<String> {
    let title = normalize_key(title?);
    let company = normalize_key(company?);
    let location = location.map(normalize_key).unwrap_or_default();
    Some(format!("{}|{}|{}", title, company, location))
}

fn normalize_key(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ── Tests ──
