use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::config::RuleConfig;
use crate::error::{Error, Result};
use crate::record::JobRecord;

/// Why a record was turned away. Order matches evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingRequiredKeyword,
    ExcludedKeywordPresent,
    CompanyBlacklisted,
    CompanyNotWhitelisted,
    LocationMismatch,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::MissingRequiredKeyword => "missing_required_keyword",
            RejectReason::ExcludedKeywordPresent => "excluded_keyword_present",
            RejectReason::CompanyBlacklisted => "company_blacklisted",
            RejectReason::CompanyNotWhitelisted => "company_not_whitelisted",
            RejectReason::LocationMismatch => "location_mismatch",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Normalized, validated filter rules. All terms are stored lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    required_keywords: BTreeSet<String>,
    excluded_keywords: BTreeSet<String>,
    company_allow: BTreeSet<String>,
    company_deny: BTreeSet<String>,
    location_match: Option<String>,
}

impl RuleSet {
    pub fn new<I, S>(
        required_keywords: I,
        excluded_keywords: I,
        company_allow: I,
        company_deny: I,
        location_match: Option<S>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let required_keywords = normalize_terms("required_keywords", required_keywords)?;
        let excluded_keywords = normalize_terms("excluded_keywords", excluded_keywords)?;
        let company_allow = normalize_terms("company_allow", company_allow)?;
        let company_deny = normalize_terms("company_deny", company_deny)?;

        if let Some(term) = required_keywords.intersection(&excluded_keywords).next() {
            return Err(Error::malformed(format!(
                "'{}' is both required and excluded",
                term
            )));
        }
        if let Some(term) = company_allow.intersection(&company_deny).next() {
            return Err(Error::malformed(format!(
                "company '{}' is in both company_allow and company_deny",
                term
            )));
        }

        let location_match = match location_match {
            Some(loc) => {
                let loc = loc.as_ref().trim().to_lowercase();
                if loc.is_empty() {
                    return Err(Error::malformed("location_match is blank"));
                }
                Some(loc)
            }
            None => None,
        };

        Ok(Self {
            required_keywords,
            excluded_keywords,
            company_allow,
            company_deny,
            location_match,
        })
    }

    pub fn from_config(cfg: &RuleConfig) -> Result<Self> {
        Self::new(
            cfg.required_keywords.iter(),
            cfg.excluded_keywords.iter(),
            cfg.company_allow.iter(),
            cfg.company_deny.iter(),
            cfg.location_match.as_ref(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.required_keywords.is_empty()
            && self.excluded_keywords.is_empty()
            && self.company_allow.is_empty()
            && self.company_deny.is_empty()
            && self.location_match.is_none()
    }

    /// Human-readable list of the active filters.
    pub fn summary(&self) -> Vec<String> {
        let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(", ");
        let mut out = Vec::new();
        if !self.required_keywords.is_empty() {
            out.push(format!("Required keywords: {}", join(&self.required_keywords)));
        }
        if !self.excluded_keywords.is_empty() {
            out.push(format!("Excluded keywords: {}", join(&self.excluded_keywords)));
        }
        if !self.company_deny.is_empty() {
            out.push(format!("Excluded companies: {}", join(&self.company_deny)));
        }
        if !self.company_allow.is_empty() {
            out.push(format!("Allowed companies: {}", join(&self.company_allow)));
        }
        if let Some(loc) = &self.location_match {
            out.push(format!("Location must contain: {}", loc));
        }
        if out.is_empty() {
            out.push("No filters active".to_string());
        }
        out
    }
}

/// Check a record against the rules, stopping at the first failing step.
pub fn evaluate(record: &JobRecord, rules: &RuleSet) -> Verdict {
    let text = record.raw_text();

    if !rules.required_keywords.is_empty()
        && !rules.required_keywords.iter().any(|kw| text.contains(kw.as_str()))
    {
        return Verdict::Reject(RejectReason::MissingRequiredKeyword);
    }

    if rules.excluded_keywords.iter().any(|kw| text.contains(kw.as_str())) {
        return Verdict::Reject(RejectReason::ExcludedKeywordPresent);
    }

    // A missing company never matches a list entry
    let company = record.has_company().then(|| record.company().to_lowercase());
    let listed = |terms: &BTreeSet<String>| company.as_deref().is_some_and(|c| contains_any(c, terms));
    if listed(&rules.company_deny) {
        return Verdict::Reject(RejectReason::CompanyBlacklisted);
    }
    if !rules.company_allow.is_empty() && !listed(&rules.company_allow) {
        return Verdict::Reject(RejectReason::CompanyNotWhitelisted);
    }

    if let Some(loc) = &rules.location_match {
        if !record.location().to_lowercase().contains(loc.as_str()) {
            return Verdict::Reject(RejectReason::LocationMismatch);
        }
    }

    Verdict::Accept
}

fn contains_any(haystack: &str, terms: &BTreeSet<String>) -> bool {
    terms.iter().any(|t| haystack.contains(t.as_str()))
}

fn normalize_terms<I, S>(field: &str, terms: I) -> Result<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BTreeSet::new();
    for term in terms {
        let t = term.as_ref().trim().to_lowercase();
        if t.is_empty() {
            return Err(Error::malformed(format!("{} contains a blank entry", field)));
        }
        out.insert(t);
    }
    Ok(out)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{IdentityStrategy, RecordBuilder};

    fn record(title: &str, company: &str, location: &str) -> JobRecord {
        RecordBuilder::new()
            .title(Some(title.into()))
            .company(Some(company.into()))
            .location(Some(location.into()))
            .build(IdentityStrategy::Composite)
            .unwrap()
    }

    fn rules(required: &[&str], excluded: &[&str]) -> RuleSet {
        RuleSet::new(required.to_vec(), excluded.to_vec(), vec![], vec![], None).unwrap()
    }

    fn company_rules(allow: &[&str], deny: &[&str]) -> RuleSet {
        RuleSet::new(vec![], vec![], allow.to_vec(), deny.to_vec(), None::<&str>).unwrap()
    }

    #[test]
    fn excluded_wins_over_required() {
        let r = record("Senior Python Developer", "Acme", "Remote");
        let verdict = evaluate(&r, &rules(&["python"], &["senior"]));
        assert_eq!(verdict, Verdict::Reject(RejectReason::ExcludedKeywordPresent));
    }

    #[test]
    fn required_needs_one_match() {
        let r = record("Rust Developer", "Acme", "Remote");
        assert_eq!(evaluate(&r, &rules(&["python", "rust"], &[])), Verdict::Accept);
        assert_eq!(
            evaluate(&r, &rules(&["python", "go"], &[])),
            Verdict::Reject(RejectReason::MissingRequiredKeyword)
        );
    }

    #[test]
    fn empty_required_never_rejects() {
        let r = record("Anything", "Acme", "Remote");
        assert_eq!(evaluate(&r, &RuleSet::default()), Verdict::Accept);
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let r = record("RUST Engineer", "Acme", "Remote");
        assert!(evaluate(&r, &rules(&["Rust"], &[])).is_accept());
    }

    #[test]
    fn company_not_whitelisted() {
        let r = record("Engineer", "Globex", "Remote");
        assert_eq!(
            evaluate(&r, &company_rules(&["Acme"], &[])),
            Verdict::Reject(RejectReason::CompanyNotWhitelisted)
        );
    }

    #[test]
    fn missing_company_is_not_matched_against_lists() {
        let r = RecordBuilder::new()
            .url(Some("https://example.com/jobs/1".into()))
            .title(Some("Engineer".into()))
            .build(IdentityStrategy::Url)
            .unwrap();
        assert!(!r.has_company());
        assert_eq!(evaluate(&r, &company_rules(&[], &["kno"])), Verdict::Accept);
        assert_eq!(
            evaluate(&r, &company_rules(&["unknown"], &[])),
            Verdict::Reject(RejectReason::CompanyNotWhitelisted)
        );
    }

    #[test]
    fn company_deny_is_substring() {
        let r = record("Engineer", "Globex Corporation", "Remote");
        assert_eq!(
            evaluate(&r, &company_rules(&[], &["globex"])),
            Verdict::Reject(RejectReason::CompanyBlacklisted)
        );
    }

    #[test]
    fn location_mismatch() {
        let r = record("Engineer", "Acme", "Berlin, Germany");
        let rules = RuleSet::new(vec![], vec![], vec![], vec![], Some("remote")).unwrap();
        assert_eq!(evaluate(&r, &rules), Verdict::Reject(RejectReason::LocationMismatch));

        let r = record("Engineer", "Acme", "Remote (EU)");
        assert!(evaluate(&r, &rules).is_accept());
    }

    #[test]
    fn evaluate_is_repeatable() {
        let r = record("Rust Developer", "Acme", "Remote");
        let rules = rules(&["rust"], &["intern"]);
        assert_eq!(evaluate(&r, &rules), evaluate(&r, &rules));
    }

    #[test]
    fn overlapping_allow_deny_is_malformed() {
        let err = RuleSet::new(vec![], vec![], vec!["Acme"], vec!["acme "], None).unwrap_err();
        assert!(matches!(err, Error::FilterRuleMalformed { .. }));
    }

    #[test]
    fn required_and_excluded_overlap_is_malformed() {
        let err = RuleSet::new(vec!["rust"], vec!["RUST"], vec![], vec![], None).unwrap_err();
        assert!(matches!(err, Error::FilterRuleMalformed { .. }));
    }

    #[test]
    fn blank_entries_are_malformed() {
        assert!(RuleSet::new(vec!["  "], vec![], vec![], vec![], None).is_err());
        assert!(RuleSet::new(vec![], vec![], vec![], vec![], Some(" ")).is_err());
    }

    #[test]
    fn summary_lists_active_filters() {
        assert_eq!(RuleSet::default().summary(), vec!["No filters active".to_string()]);
        let s = rules(&["rust"], &["senior"]).summary();
        assert_eq!(s.len(), 2);
        assert!(s[0].contains("rust"));
    }
}
