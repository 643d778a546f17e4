use std::sync::LazyLock;

use scraper::{ElementRef, Selector};
use url::Url;

static LTR: LazyLock<Selector> = LazyLock::new(|| sel(r#"[dir="ltr"]"#));
static ANY_LTR_DIV: LazyLock<Selector> = LazyLock::new(|| sel(r#"div[dir="ltr"], span[dir="ltr"]"#));
static GENERIC_HEADINGS: LazyLock<Vec<Selector>> = LazyLock::new(|| sels(&["h1", "h2", "h3"]));
static TIME: LazyLock<Selector> = LazyLock::new(|| sel("time"));
static INSIGHT: LazyLock<Selector> = LazyLock::new(|| sel(r#"[class*="job-insight"]"#));
static JOB_ID_ATTR: LazyLock<Selector> = LazyLock::new(|| sel("[data-job-id], [data-occludable-job-id], [data-entity-urn]"));

static TITLE_LOCKUP: LazyLock<Selector> = LazyLock::new(|| sel(".artdeco-entity-lockup__title"));
static TITLE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    sels(&[
        "h1.job-details-jobs-unified-top-card__job-title",
        "h1.jobs-unified-top-card__job-title",
        "a.job-card-list__title",
        ".job-card-list__title--link",
        "h3.base-search-card__title",
        "h2.t-24.t-bold",
        "h1.t-24",
        "h1.topcard__title",
    ])
});

static COMPANY_LOCKUP: LazyLock<Selector> = LazyLock::new(|| sel(".artdeco-entity-lockup__subtitle"));
static COMPANY: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    sels(&[
        r#"[class*="job-details-jobs-unified-top-card__company-name"]"#,
        r#"[class*="jobs-unified-top-card__company-name"]"#,
        r#"[class*="job-card-job-posting-card-wrapper__subtitle"]"#,
        r#"[class*="jobs-unified-top-card__subtitle-primary-grouping"]"#,
        r#"[class*="job-card-container__primary-description"]"#,
        "h4.base-search-card__subtitle",
    ])
});
static COMPANY_LINK: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    sels(&[
        "a.topcard__org-name-link",
        r#"a[data-tracking-control-name="public_jobs_topcard-org-name"]"#,
        r#"a[href*="/company/"]"#,
    ])
});

static LOCATION_LOCKUP: LazyLock<Selector> = LazyLock::new(|| sel(".artdeco-entity-lockup__caption"));
static LOCATION: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    sels(&[
        "span.job-details-jobs-unified-top-card__bullet",
        "span.jobs-unified-top-card__bullet",
        "span.topcard__flavor--bullet",
        "span.job-search-card__location",
        "li.job-card-container__metadata-item",
    ])
});

static URL: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    sels(&[
        r#"a[href*="/jobs/view/"]"#,
        "a.base-card__full-link",
        "a.job-card-list__title",
        "a.job-card-container__link",
    ])
});

static POSTED: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    sels(&[
        ".job-search-card__listdate",
        ".job-search-card__listdate--new",
        r#"[class*="listed-time"]"#,
        r#"[class*="posted-date"]"#,
    ])
});

const WORK_TYPES: &[&str] = &["Remote", "On-site", "Hybrid"];
const UI_WORDS: &[&str] = &["apply", "save", "share", "show more", "show less", "see more", "see less"];
const NOT_A_COMPANY: &[&str] = &["hiring", "new", "jobs", "apply"];

fn sel(s: &str) -> Selector {
    Selector::parse(s).unwrap()
}

fn sels(list: &[&str]) -> Vec<Selector> {
    list.iter().map(|s| sel(s)).collect()
}

/// Visible text of an element with whitespace collapsed and stray comment markers removed.
pub fn clean_text(el: ElementRef) -> String {
    let raw: String = el.text().collect::<Vec<_>>().join(" ");
    raw.replace("<!--", "")
        .replace("-->", "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(scope: ElementRef, selectors: &[Selector], accept: impl Fn(&str) -> bool) -> Option<String> {
    selectors
        .iter()
        .filter_map(|s| scope.select(s).next())
        .map(clean_text)
        .find(|t| accept(t))
}

/// Text of a lockup slot, preferring its nested `dir="ltr"` element.
fn lockup_text(scope: ElementRef, slot: &Selector) -> Option<String> {
    let el = scope.select(slot).next()?;
    let text = el
        .select(&LTR)
        .next()
        .map(clean_text)
        .unwrap_or_else(|| clean_text(el));
    Some(text).filter(|t| !t.is_empty())
}

fn looks_like_location(text: &str) -> bool {
    text.contains(',') || WORK_TYPES.iter().any(|w| text.contains(w))
}

pub fn title(card: ElementRef) -> Option<String> {
    if let Some(t) = lockup_text(card, &TITLE_LOCKUP) {
        return Some(t);
    }
    if let Some(t) = first_text(card, &TITLE, |t| !t.is_empty()) {
        return Some(t);
    }
    first_text(card, &GENERIC_HEADINGS, |t| t.chars().count() > 3)
}

pub fn company(card: ElementRef, title: Option<&str>) -> Option<String> {
    let raw = lockup_text(card, &COMPANY_LOCKUP)
        .filter(|t| t.chars().count() > 1)
        .or_else(|| {
            first_text(card, &COMPANY, |t| {
                let head = cut_separators(t);
                (3..100).contains(&head.chars().count())
            })
        })
        .or_else(|| first_text(card, &COMPANY_LINK, |t| t.chars().count() > 1))
        .or_else(|| company_from_ltr(card, title))?;
    clean_company(&raw)
}

/// Last resort: the first `dir="ltr"` text that is not the title, a location or UI chrome.
fn company_from_ltr(card: ElementRef, title: Option<&str>) -> Option<String> {
    card.select(&ANY_LTR_DIV).take(20).map(clean_text).find(|t| {
        let len = t.chars().count();
        let lower = t.to_lowercase();
        (3..100).contains(&len)
            && title.map_or(true, |title| lower != title.to_lowercase())
            && t.matches(',').count() < 2
            && !WORK_TYPES.iter().any(|w| t.contains(w))
            && !UI_WORDS.contains(&lower.as_str())
    })
}

fn cut_separators(text: &str) -> &str {
    text.split(['·', '•', '\n']).next().unwrap_or("").trim()
}

/// Normalize a company name; `None` for values that are clearly not one.
pub fn clean_company(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let name = cut_separators(&collapsed).trim_end_matches(['.', ',', ';', ':']);
    if name.chars().count() < 2 || NOT_A_COMPANY.contains(&name.to_lowercase().as_str()) {
        return None;
    }
    Some(name.to_string())
}

pub fn location(card: ElementRef) -> Option<String> {
    if let Some(t) = lockup_text(card, &LOCATION_LOCKUP).filter(|t| looks_like_location(t)) {
        return Some(t);
    }
    if let Some(t) = first_text(card, &LOCATION, looks_like_location) {
        return Some(t);
    }
    card.select(&ANY_LTR_DIV)
        .take(30)
        .map(clean_text)
        .find(|t| looks_like_location(t) && (6..150).contains(&t.chars().count()))
}

/// Absolute posting URL, resolved against `base` when the link is relative.
pub fn url(card: ElementRef, base: Option<&Url>) -> Option<String> {
    let href = URL
        .iter()
        .filter_map(|s| card.select(s).next())
        .find_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|h| !h.is_empty() && !h.starts_with('#') && !h.starts_with("javascript:"));

    if let Some(href) = href {
        return resolve(href, base);
    }

    // Cards without an anchor still carry the numeric id as a data attribute.
    let id = std::iter::once(card)
        .chain(card.select(&JOB_ID_ATTR))
        .find_map(job_id_attr)?;
    resolve(&format!("/jobs/view/{}/", id), base)
}

fn job_id_attr(el: ElementRef) -> Option<String> {
    let v = el.value();
    let raw = v
        .attr("data-job-id")
        .or_else(|| v.attr("data-occludable-job-id"))
        .or_else(|| v.attr("data-entity-urn"))?;
    let id = raw.rsplit(':').next()?.trim();
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
}

fn resolve(href: &str, base: Option<&Url>) -> Option<String> {
    match Url::parse(href) {
        Ok(u) => Some(u),
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(href).ok(),
        Err(_) => None,
    }
    .filter(|u| u.scheme() == "http" || u.scheme() == "https")
    .map(String::from)
}

pub fn posted_at(card: ElementRef) -> Option<String> {
    if let Some(t) = card.select(&TIME).next() {
        let text = clean_text(t);
        if !text.is_empty() {
            return Some(text);
        }
        if let Some(dt) = t.value().attr("datetime") {
            return Some(dt.trim().to_string());
        }
    }
    first_text(card, &POSTED, |t| !t.is_empty())
}

pub fn work_type(card_text: &str) -> Option<String> {
    WORK_TYPES
        .iter()
        .find(|w| card_text.contains(*w))
        .map(|w| w.to_string())
}

pub fn insight(card: ElementRef) -> Option<String> {
    card.select(&INSIGHT)
        .next()
        .map(clean_text)
        .filter(|t| !t.is_empty())
}

// ── Tests ──
