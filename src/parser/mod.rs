pub mod blocks;
pub mod fields;

use scraper::Html;
use tracing::debug;
use url::Url;

use crate::record::{IdentityStrategy, JobRecord, RecordBuilder};
use blocks::Block;

/// One result page of raw markup, as handed over by the fetcher.
#[derive(Debug, Clone)]
pub struct PageFragment {
    pub html: String,
    /// Page URL, used to resolve relative links.
    pub source_url: Option<Url>,
    pub page: u32,
}

impl PageFragment {
    pub fn new(html: impl Into<String>, source_url: Option<Url>, page: u32) -> Self {
        Self {
            html: html.into(),
            source_url,
            page,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub identity: IdentityStrategy,
    /// Keep cards listed after the "more results" divider.
    pub include_recommendations: bool,
    /// Substituted when a card has no recognizable location.
    pub default_location: Option<String>,
}

/// A parsed fragment. Records borrow from it, so it outlives their iterator.
pub struct ParsedPage {
    doc: Html,
    source_url: Option<Url>,
    page: u32,
}

impl ParsedPage {
    pub fn parse(fragment: &PageFragment) -> Self {
        Self {
            doc: Html::parse_document(&fragment.html),
            source_url: fragment.source_url.clone(),
            page: fragment.page,
        }
    }

    pub fn is_empty_results(&self) -> bool {
        blocks::is_empty_results(&self.doc)
    }

    /// Lazily extract candidate records, one per card.
    pub fn records<'a>(&'a self, opts: &'a ExtractOptions) -> Records<'a> {
        let cards = if self.is_empty_results() {
            Vec::new()
        } else {
            blocks::split_cards(&self.doc)
        };
        Records {
            cards: cards.into_iter(),
            page: self,
            opts,
            after_divider: false,
            unresolvable: 0,
        }
    }
}

pub struct Records<'a> {
    cards: std::vec::IntoIter<Block<'a>>,
    page: &'a ParsedPage,
    opts: &'a ExtractOptions,
    after_divider: bool,
    unresolvable: usize,
}

impl Records<'_> {
    /// Cards skipped so far because no identity could be derived.
    pub fn unresolvable(&self) -> usize {
        self.unresolvable
    }
}

impl Iterator for Records<'_> {
    type Item = JobRecord;

    fn next(&mut self) -> Option<JobRecord> {
        loop {
            let card = match self.cards.next()? {
                Block::Divider => {
                    if !self.opts.include_recommendations {
                        debug!(page = self.page.page, "recommendation divider, stopping");
                        self.cards = Vec::new().into_iter();
                        return None;
                    }
                    self.after_divider = true;
                    continue;
                }
                Block::Card(el) => el,
            };

            let title = fields::title(card);
            let company = fields::company(card, title.as_deref());
            let location = fields::location(card).or_else(|| self.opts.default_location.clone());
            let card_text = fields::clean_text(card);

            let record = RecordBuilder::new()
                .url(fields::url(card, self.page.source_url.as_ref()))
                .title(title)
                .company(company)
                .location(location)
                .posted_at(fields::posted_at(card))
                .work_type(fields::work_type(&card_text))
                .insight(fields::insight(card))
                .recommendation(self.after_divider)
                .page(self.page.page)
                .build(self.opts.identity);

            match record {
                Some(r) => return Some(r),
                None => {
                    self.unresolvable += 1;
                    debug!(page = self.page.page, "card without url or title+company, skipped");
                }
            }
        }
    }
}

/// Whether raw markup is an empty-results page. The parsed document does not
/// leave this call, so callers on async tasks can hold the result across awaits.
pub fn is_empty_results_html(html: &str) -> bool {
    blocks::is_empty_results(&Html::parse_document(html))
}

/// Records pulled out of one fragment plus the count of unidentifiable cards.
#[derive(Debug, Default)]
pub struct Extraction {
    pub records: Vec<JobRecord>,
    pub unresolvable: usize,
}

/// Parse and fully extract one fragment.
pub fn extract(fragment: &PageFragment, opts: &ExtractOptions) -> Extraction {
    let page = ParsedPage::parse(fragment);
    let mut iter = page.records(opts);
    let records: Vec<JobRecord> = iter.by_ref().collect();
    Extraction {
        records,
        unresolvable: iter.unresolvable(),
    }
}

// ── Tests ──
