use sitewatch_core::Baseline;

/// Result of validating a proposed baseline against §4.4's rules. Errors
/// abort a commit; warnings are advisory and never block one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks a proposed baseline against the §3 invariants and §4.4 validation
/// rules. `previous` is the baseline it would supersede, when one exists —
/// used only for the two warning checks, never for the error checks.
pub fn validate(baseline: &Baseline, previous: Option<&Baseline>) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();

    if baseline.site_id.trim().is_empty() {
        outcome.errors.push("missing site-id".to_string());
    }

    if baseline.declares_content_method() && baseline.urls.len() != baseline.content_hashes.len()
    {
        outcome.errors.push(format!(
            "url count ({}) does not match content-hash key count ({}) for a baseline declaring a content method",
            baseline.urls.len(),
            baseline.content_hashes.len()
        ));
    }

    for url in baseline.content_hashes.keys() {
        if !baseline.urls.contains(url) {
            outcome
                .errors
                .push(format!("content hash present for URL not in baseline: {url}"));
        }
    }

    for (url, entry) in &baseline.content_hashes {
        if entry.hash.is_empty() && entry.length != 0 {
            outcome.errors.push(format!(
                "empty hash with non-zero length ({}) for {url}",
                entry.length
            ));
        }
    }

    if let Some(previous_ts) = baseline.previous_timestamp {
        if previous_ts > baseline.created_at {
            outcome
                .warnings
                .push("predecessor timestamp is in the future".to_string());
        }
    }

    if let Some(previous) = previous {
        let prev_count = previous.urls.len();
        let next_count = baseline.urls.len();
        if prev_count > 0 {
            let delta = (next_count as f64 - prev_count as f64).abs() / prev_count as f64;
            if delta > 0.5 {
                outcome.warnings.push(format!(
                    "abrupt URL count change: {prev_count} -> {next_count} ({:.0}% delta)",
                    delta * 100.0
                ));
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitewatch_core::{
        BaselineMetadata, ChangeSummary, DetectionMethod, EvolutionType, HashEntry,
    };
    use std::collections::{BTreeMap, BTreeSet};

    fn valid_baseline() -> Baseline {
        let mut urls = BTreeSet::new();
        urls.insert("https://a.example/1".to_string());
        let mut hashes = BTreeMap::new();
        hashes.insert(
            "https://a.example/1".to_string(),
            HashEntry {
                hash: "abc".to_string(),
                length: 3,
            },
        );
        Baseline {
            site_id: "site".to_string(),
            site_name: "Site".to_string(),
            created_at: chrono::Utc::now(),
            previous_timestamp: None,
            version: "v1".to_string(),
            evolution_type: EvolutionType::Initial,
            urls,
            content_hashes: hashes,
            change_summary: ChangeSummary::default(),
            metadata: BaselineMetadata {
                method: DetectionMethod::Content,
                sitemap_info: None,
            },
        }
    }

    #[test]
    fn valid_baseline_has_no_errors() {
        let outcome = validate(&valid_baseline(), None);
        assert!(outcome.is_ok());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn missing_site_id_is_an_error() {
        let mut baseline = valid_baseline();
        baseline.site_id.clear();
        let outcome = validate(&baseline, None);
        assert!(!outcome.is_ok());
    }

    #[test]
    fn url_count_mismatch_with_content_method_is_an_error() {
        let mut baseline = valid_baseline();
        baseline.urls.insert("https://a.example/2".to_string());
        let outcome = validate(&baseline, None);
        assert!(!outcome.is_ok());
    }

    #[test]
    fn empty_hash_with_nonzero_length_is_an_error() {
        let mut baseline = valid_baseline();
        baseline.content_hashes.get_mut("https://a.example/1").unwrap().hash = String::new();
        let outcome = validate(&baseline, None);
        assert!(!outcome.is_ok());
    }

    #[test]
    fn future_predecessor_timestamp_is_a_warning_not_an_error() {
        let mut baseline = valid_baseline();
        baseline.previous_timestamp = Some(baseline.created_at + chrono::Duration::days(1));
        let outcome = validate(&baseline, None);
        assert!(outcome.is_ok());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn abrupt_url_count_change_is_a_warning() {
        let mut previous = valid_baseline();
        for i in 0..10 {
            previous.urls.insert(format!("https://a.example/prev-{i}"));
        }
        let next = valid_baseline();
        let outcome = validate(&next, Some(&previous));
        assert!(outcome.is_ok());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn sitemap_only_baseline_may_have_empty_content_hashes() {
        let mut baseline = valid_baseline();
        baseline.metadata.method = DetectionMethod::Sitemap;
        baseline.content_hashes.clear();
        let outcome = validate(&baseline, None);
        assert!(outcome.is_ok());
    }
}
