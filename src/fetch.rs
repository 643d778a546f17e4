use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, StatusCode};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ScrapeConfig;
use crate::parser::{self, PageFragment};

const BASE_BACKOFF_MS: u64 = 2000;
/// Backoff stops doubling after 2s * 2^6.
const MAX_BACKOFF_EXP: u32 = 6;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch stats returned after completion.
#[derive(Debug, Default, Clone, Copy)]
pub struct FetchStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

pub fn client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("job_watch/", env!("CARGO_PKG_VERSION")))
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

/// URL of result page `page` (1-based) for a search URL.
pub fn page_url(search: &Url, page_param: &str, page_size: u32, page: u32) -> Url {
    let kept: Vec<(String, String)> = search
        .query_pairs()
        .filter(|(k, _)| k != page_param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut url = search.clone();
    {
        let mut q = url.query_pairs_mut();
        q.clear();
        for (k, v) in &kept {
            q.append_pair(k, v);
        }
        if page > 1 {
            q.append_pair(page_param, &((page - 1) * page_size).to_string());
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    url
}

/// Anything that can GET a page and report its status and body.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn get(&self, url: &Url) -> Result<(StatusCode, String)>;
}

#[async_trait]
impl PageSource for Client {
    async fn get(&self, url: &Url) -> Result<(StatusCode, String)> {
        let resp = Client::get(self, url.clone()).send().await?;
        let status = resp.status();
        let body = if status.is_success() {
            resp.text().await?
        } else {
            String::new()
        };
        Ok((status, body))
    }
}

struct Fetched {
    search_idx: usize,
    fragment: Option<PageFragment>,
}

/// Fetch result pages for every search URL with `client`.
pub async fn fetch_fragments(client: &Client, cfg: &ScrapeConfig) -> Result<(Vec<PageFragment>, FetchStats)> {
    fetch_from(Arc::new(client.clone()), cfg).await
}

/// Fetch result pages for every search URL. Each search paginates on its own
/// task until `max_pages`, an empty-results page, or an error; requests across
/// all tasks are capped at `concurrency`. Output is ordered by search, then page.
pub async fn fetch_from(
    source: Arc<dyn PageSource>,
    cfg: &ScrapeConfig,
) -> Result<(Vec<PageFragment>, FetchStats)> {
    let searches: Vec<Url> = cfg
        .search_urls
        .iter()
        .map(|s| Url::parse(s).with_context(|| format!("Invalid search URL {}", s)))
        .collect::<Result<_>>()?;

    let semaphore = Arc::new(Semaphore::new(cfg.concurrency.max(1)));
    let cfg = Arc::new(cfg.clone());
    let pb = ProgressBar::new((searches.len() as u64) * cfg.max_pages as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} pages ({per_sec})")?
            .progress_chars("=> "),
    );

    let (tx, mut rx) = tokio::sync::mpsc::channel::<Fetched>(cfg.concurrency.max(1) * 2);

    for (search_idx, search) in searches.into_iter().enumerate() {
        tokio::spawn(paginate(
            Arc::clone(&source),
            Arc::clone(&semaphore),
            Arc::clone(&cfg),
            search_idx,
            search,
            tx.clone(),
        ));
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut stats = FetchStats::default();
    let mut fragments: Vec<(usize, PageFragment)> = Vec::new();
    while let Some(item) = rx.recv().await {
        stats.total += 1;
        match item.fragment {
            Some(f) => {
                stats.ok += 1;
                fragments.push((item.search_idx, f));
            }
            None => stats.errors += 1,
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    fragments.sort_by_key(|(idx, f)| (*idx, f.page));
    info!("Fetched {} pages ({} ok, {} errors)", stats.total, stats.ok, stats.errors);
    Ok((fragments.into_iter().map(|(_, f)| f).collect(), stats))
}

async fn paginate(
    source: Arc<dyn PageSource>,
    sem: Arc<Semaphore>,
    cfg: Arc<ScrapeConfig>,
    search_idx: usize,
    search: Url,
    tx: tokio::sync::mpsc::Sender<Fetched>,
) {
    for page in 1..=cfg.max_pages {
        let url = page_url(&search, &cfg.page_param, cfg.page_size, page);
        let result = {
            let Ok(_permit) = sem.acquire().await else { return };
            fetch_with_retry(source.as_ref(), &url, cfg.max_retries).await
        };
        match result {
            Ok(html) => {
                let empty = parser::is_empty_results_html(&html);
                let fragment = PageFragment::new(html, Some(url), page);
                if tx.send(Fetched { search_idx, fragment: Some(fragment) }).await.is_err() {
                    return;
                }
                if empty {
                    debug!(search = %search, page, "no more results");
                    return;
                }
            }
            Err(e) => {
                warn!("Fetch failed for {} page {}: {:#}", search, page, e);
                let _ = tx.send(Fetched { search_idx, fragment: None }).await;
                return;
            }
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Delay before retry number `attempt + 1`, doubling up to a cap.
fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(MAX_BACKOFF_EXP)))
}

async fn fetch_with_retry(source: &dyn PageSource, url: &Url, max_retries: u32) -> Result<String> {
    let mut attempt = 0;
    loop {
        let start = Instant::now();
        let (status, body) = source.get(url).await?;

        if status.is_success() {
            debug!(%url, latency_ms = start.elapsed().as_millis() as u64, "fetched");
            return Ok(body);
        }
        if !is_retryable(status) || attempt >= max_retries {
            anyhow::bail!("HTTP {} for {}", status, url);
        }

        let delay = backoff(attempt);
        warn!(
            "HTTP {} on {} (attempt {}/{}), backing off {:.1}s",
            status,
            url,
            attempt + 1,
            max_retries,
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Read HTML files from disk as fragments, numbered in argument order.
pub fn read_fragments(paths: &[std::path::PathBuf], base: Option<&Url>) -> Result<Vec<PageFragment>> {
    paths
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let html = std::fs::read_to_string(p).with_context(|| format!("Failed to read {:?}", p))?;
            Ok::<_, anyhow::Error>(PageFragment::new(html, base.cloned(), i as u32 + 1))
        })
        .collect()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[test]
    fn first_page_has_no_offset() {
        let search = Url::parse("https://www.linkedin.com/jobs/search/?keywords=rust&start=50").unwrap();
        let u = page_url(&search, "start", 25, 1);
        assert_eq!(u.as_str(), "https://www.linkedin.com/jobs/search/?keywords=rust");
    }

    #[test]
    fn later_pages_add_offset() {
        let search = Url::parse("https://www.linkedin.com/jobs/search/?keywords=rust%20dev").unwrap();
        let u = page_url(&search, "start", 25, 3);
        assert_eq!(u.query_pairs().find(|(k, _)| k == "start").unwrap().1, "50");
        assert_eq!(u.query_pairs().find(|(k, _)| k == "keywords").unwrap().1, "rust dev");
    }

    #[test]
    fn query_less_search_stays_clean() {
        let search = Url::parse("https://jobs.example.com/rust").unwrap();
        assert_eq!(page_url(&search, "start", 25, 1).as_str(), "https://jobs.example.com/rust");
    }

    /// Replays canned responses per URL; unknown URLs answer 404.
    #[derive(Default)]
    struct Canned {
        responses: Mutex<HashMap<String, VecDeque<(u16, String)>>>,
        calls: Mutex<Vec<String>>,
    }

    impl Canned {
        fn on(self, url: Url, replies: &[(u16, &str)]) -> Self {
            self.responses.lock().unwrap().insert(
                url.to_string(),
                replies.iter().map(|(s, b)| (*s, b.to_string())).collect(),
            );
            self
        }

        fn calls_to(&self, prefix: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| u.starts_with(prefix)).count()
        }
    }

    #[async_trait]
    impl PageSource for Canned {
        async fn get(&self, url: &Url) -> Result<(StatusCode, String)> {
            self.calls.lock().unwrap().push(url.to_string());
            let reply = self
                .responses
                .lock()
                .unwrap()
                .get_mut(url.as_str())
                .and_then(|q| q.pop_front());
            let (status, body) = reply.unwrap_or((404, String::new()));
            Ok((StatusCode::from_u16(status).unwrap(), body))
        }
    }

    const RESULTS: &str = r#"<ul><li class="jobs-search-results__list-item"><a href="/jobs/view/1/">Job</a></li></ul>"#;
    const NO_RESULTS: &str = "<main><h1>No matching jobs found.</h1></main>";

    fn cfg(searches: &[&str], max_pages: u32, max_retries: u32) -> ScrapeConfig {
        ScrapeConfig {
            search_urls: searches.iter().map(|s| s.to_string()).collect(),
            max_pages,
            max_retries,
            ..Default::default()
        }
    }

    fn page(search: &str, n: u32) -> Url {
        page_url(&Url::parse(search).unwrap(), "start", 25, n)
    }

    const A: &str = "https://a.example.com/search?q=rust";
    const B: &str = "https://b.example.com/search?q=rust";

    #[tokio::test]
    async fn pagination_stops_at_empty_results_page() {
        let source = Arc::new(
            Canned::default()
                .on(page(A, 1), &[(200, RESULTS)])
                .on(page(A, 2), &[(200, NO_RESULTS)])
                .on(page(A, 3), &[(200, RESULTS)]),
        );
        let (frags, stats) = fetch_from(source.clone(), &cfg(&[A], 5, 0)).await.unwrap();
        assert_eq!(frags.len(), 2);
        assert_eq!(stats.ok, 2);
        assert_eq!(stats.errors, 0);
        assert_eq!(source.calls_to("https://a.example.com"), 2);
    }

    #[tokio::test]
    async fn failed_page_ends_that_search_only() {
        let source = Arc::new(
            Canned::default()
                .on(page(A, 1), &[(200, RESULTS)])
                .on(page(A, 2), &[(404, "")])
                .on(page(A, 3), &[(200, RESULTS)])
                .on(page(B, 1), &[(200, RESULTS)])
                .on(page(B, 2), &[(200, RESULTS)])
                .on(page(B, 3), &[(200, NO_RESULTS)]),
        );
        let (frags, stats) = fetch_from(source.clone(), &cfg(&[A, B], 3, 0)).await.unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.ok, 4);
        assert_eq!(frags.len(), 4);
        assert_eq!(source.calls_to("https://a.example.com"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_throttled_and_server_errors() {
        let source = Arc::new(Canned::default().on(page(A, 1), &[(429, ""), (503, ""), (200, RESULTS)]));
        let (frags, stats) = fetch_from(source.clone(), &cfg(&[A], 1, 3)).await.unwrap();
        assert_eq!(frags.len(), 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(source.calls_to("https://a.example.com"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let source = Arc::new(Canned::default().on(page(A, 1), &[(500, ""), (500, ""), (200, RESULTS)]));
        let (frags, stats) = fetch_from(source.clone(), &cfg(&[A], 1, 1)).await.unwrap();
        assert!(frags.is_empty());
        assert_eq!(stats.errors, 1);
        assert_eq!(source.calls_to("https://a.example.com"), 2);
    }

    #[tokio::test]
    async fn output_is_ordered_by_search_then_page() {
        let source = Arc::new(
            Canned::default()
                .on(page(A, 1), &[(200, RESULTS)])
                .on(page(A, 2), &[(200, RESULTS)])
                .on(page(B, 1), &[(200, RESULTS)])
                .on(page(B, 2), &[(200, RESULTS)]),
        );
        let (frags, _) = fetch_from(source, &cfg(&[B, A], 2, 0)).await.unwrap();
        let order: Vec<(String, u32)> = frags
            .iter()
            .map(|f| (f.source_url.as_ref().unwrap().host_str().unwrap().to_string(), f.page))
            .collect();
        assert_eq!(
            order,
            vec![
                ("b.example.com".to_string(), 1),
                ("b.example.com".to_string(), 2),
                ("a.example.com".to_string(), 1),
                ("a.example.com".to_string(), 2),
            ]
        );
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff(0), Duration::from_secs(2));
        assert_eq!(backoff(2), Duration::from_secs(8));
        assert_eq!(backoff(6), backoff(64));
        assert_eq!(backoff(u32::MAX), Duration::from_secs(128));
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
    }

    #[test]
    fn html_files_become_numbered_fragments() {
        let paths = vec![
            std::path::PathBuf::from("tests/fixtures/search_page.html"),
            std::path::PathBuf::from("tests/fixtures/no_results.html"),
        ];
        let frags = read_fragments(&paths, None).unwrap();
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[1].page, 2);
        assert!(read_fragments(&[std::path::PathBuf::from("tests/fixtures/missing.html")], None).is_err());
    }
}
