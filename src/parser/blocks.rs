use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

/// Card containers, most specific layout first. The first selector with any
/// match decides the layout of the whole page.
static CARD_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "li.scaffold-layout__list-item",
        "li.jobs-search-results__list-item",
        "div.job-card-container",
        "div.base-card",
        "li[data-occludable-job-id]",
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect()
});

/// Job details panel on a single-posting page.
static DETAILS_PANEL: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "div.jobs-details__main-content",
        "section.jobs-details__main-content",
        "div.jobs-unified-top-card",
        "div.job-details-jobs-unified-top-card",
        "div#job-details",
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect()
});

const DIVIDER_MARKERS: &[&str] = &["We've found more results", "share similar criteria"];
const EMPTY_RESULTS_MARKERS: &[&str] = &[
    "No matching jobs found",
    "Try removing filters or rephrasing your search",
];

#[derive(Debug, Clone, Copy)]
pub enum Block<'a> {
    /// A job card (or the details panel) to extract fields from.
    Card(ElementRef<'a>),
    /// Separator after which listings are recommendations, not direct matches.
    Divider,
}

/// Split a parsed page into card blocks, in document order.
///
/// Pages with no recognizable card layout yield the details panel as a single
/// block, or nothing when there is no panel either.
pub fn split_cards(doc: &Html) -> Vec<Block<'_>> {
    for selector in CARD_SELECTORS.iter() {
        let cards: Vec<Block> = doc.select(selector).map(classify).collect();
        if !cards.is_empty() {
            return cards;
        }
    }

    DETAILS_PANEL
        .iter()
        .find_map(|s| doc.select(s).next())
        .map(|panel| vec![Block::Card(panel)])
        .unwrap_or_default()
}

fn classify(el: ElementRef<'_>) -> Block<'_> {
    let text: String = el.text().collect();
    if is_divider(&text) {
        Block::Divider
    } else {
        Block::Card(el)
    }
}

fn is_divider(text: &str) -> bool {
    DIVIDER_MARKERS.iter().any(|m| text.contains(m))
}

/// True when the page is a "no matching jobs" result page.
pub fn is_empty_results(doc: &Html) -> bool {
    let text: String = doc.root_element().text().collect::<Vec<_>>().join(" ");
    let lower = text.to_lowercase();
    EMPTY_RESULTS_MARKERS
        .iter()
        .any(|m| lower.contains(&m.to_lowercase()))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_items_become_cards() {
        let doc = Html::parse_document(
            r#"<ul>
                <li class="jobs-search-results__list-item"><a href="/jobs/view/1">A</a></li>
                <li class="jobs-search-results__list-item"><a href="/jobs/view/2">B</a></li>
               </ul>"#,
        );
        let blocks = split_cards(&doc);
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| matches!(b, Block::Card(_))));
    }

    #[test]
    fn first_matching_layout_wins() {
        let doc = Html::parse_document(
            r#"<li class="scaffold-layout__list-item"><div class="job-card-container">A</div></li>"#,
        );
        assert_eq!(split_cards(&doc).len(), 1);
    }

    #[test]
    fn divider_card_is_detected() {
        let doc = Html::parse_document(
            r#"<li class="jobs-search-results__list-item">Job</li>
               <li class="jobs-search-results__list-item"><h2>We've found more results for you</h2></li>
               <li class="jobs-search-results__list-item">Job</li>"#,
        );
        let blocks = split_cards(&doc);
        assert!(matches!(blocks[1], Block::Divider));
        assert!(matches!(blocks[2], Block::Card(_)));
    }

    #[test]
    fn details_panel_fallback() {
        let doc = Html::parse_document(
            r#"<nav><h1>Site nav</h1></nav>
               <div class="jobs-unified-top-card"><h1 class="t-24">Rust Engineer</h1></div>"#,
        );
        let blocks = split_cards(&doc);
        assert_eq!(blocks.len(), 1);
        if let Block::Card(el) = blocks[0] {
            assert!(el.value().classes().any(|c| c == "jobs-unified-top-card"));
        }
    }

    #[test]
    fn page_without_layout_has_no_blocks() {
        let doc = Html::parse_document(
            r#"<main><h1>Sign in to view more jobs</h1>
               <a href="https://www.linkedin.com/company/acme-corp">Acme Corp</a></main>"#,
        );
        assert!(split_cards(&doc).is_empty());
    }

    #[test]
    fn empty_results_page() {
        let doc = Html::parse_document("<main><h1>No matching jobs found.</h1></main>");
        assert!(is_empty_results(&doc));
        let doc = Html::parse_document("<main><h1>Jobs</h1></main>");
        assert!(!is_empty_results(&doc));
    }
}
