use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{info, warn};

use sitewatch_baseline::{validate, BaselineStore};
use sitewatch_core::{
    Baseline, BaselineEvent, BaselineEventKind, BaselineMetadata, ChangeKind, ChangeRecord,
    ChangeSummary, CurrentObservation, DetectionMethod, EngineError, EvolutionType, HashEntry,
};

/// Outcome of one evolution attempt for a site.
#[derive(Debug, Clone)]
pub enum EvolutionOutcome {
    /// A new baseline was constructed and committed.
    Committed { baseline: Baseline, event: BaselineEvent },
    /// No changes were detected and no revalidation was requested (§4.6
    /// commit policy, scenario S6) — the previous baseline remains latest.
    NoChange,
    /// No changes were detected but the caller explicitly requested
    /// revalidation; a `validated` event is appended without a new baseline.
    Revalidated { event: BaselineEvent },
}

/// Merges `previous` + `current` + `changes` into the next baseline and
/// commits it through `store`, following the commit policy in §4.6:
/// committed only when `changes` is non-empty, or unconditionally on the
/// initial-creation branch (`previous.is_none()`), or as a bare validation
/// event when `revalidate` is requested on an otherwise unchanged baseline.
pub async fn evolve_and_commit(
    store: &BaselineStore,
    previous: Option<&Baseline>,
    site_name: &str,
    current: &CurrentObservation,
    changes: &[ChangeRecord],
    summary: ChangeSummary,
    revalidate: bool,
) -> Result<EvolutionOutcome, EngineError> {
    if previous.is_some() && changes.is_empty() {
        if !revalidate {
            return Ok(EvolutionOutcome::NoChange);
        }
        let event = BaselineEvent {
            event_id: new_event_id(),
            site_id: current.site_id.clone(),
            timestamp: Utc::now(),
            kind: BaselineEventKind::Validated,
            counts: summary,
            previous_baseline_id: previous.map(Baseline::identifier),
            new_baseline_id: None,
            errors: Vec::new(),
        };
        store.append_event(&event).await?;
        return Ok(EvolutionOutcome::Revalidated { event });
    }

    let next = evolve(previous, site_name, current, changes, summary);
    let event = commit(store, previous, &next).await?;
    Ok(EvolutionOutcome::Committed { baseline: next, event })
}

/// Pure merge of `previous` + `current` + `changes` into the next baseline
/// (§4.6 merge rules). Idempotent modulo `created_at`: identical inputs
/// always produce the same URL set and hash map.
pub fn evolve(
    previous: Option<&Baseline>,
    site_name: &str,
    current: &CurrentObservation,
    changes: &[ChangeRecord],
    summary: ChangeSummary,
) -> Baseline {
    let deleted: BTreeSet<&str> = changes
        .iter()
        .filter(|c| c.kind == ChangeKind::DeletedPage)
        .map(|c| c.url.as_str())
        .collect();

    let fresh_hashes: BTreeMap<&str, &str> = changes
        .iter()
        .filter(|c| matches!(c.kind, ChangeKind::NewPage | ChangeKind::ModifiedContent))
        .filter_map(|c| c.new_hash.as_deref().map(|h| (c.url.as_str(), h)))
        .collect();

    let prev_urls: BTreeSet<&str> = previous
        .map(|p| p.urls.iter().map(String::as_str).collect())
        .unwrap_or_default();

    let next_urls: BTreeSet<String> = prev_urls
        .union(&current.urls.iter().map(String::as_str).collect())
        .filter(|u| !deleted.contains(*u))
        .map(|u| u.to_string())
        .collect();

    // A baseline declaring a content method must carry one content_hashes
    // entry per URL (§3 invariant, enforced by validate()'s url-count
    // check) — ignored files and sentinel (fetch-failed) URLs get the
    // spec's empty/zero-length sentinel entry rather than being omitted.
    let declares_content_method =
        matches!(current.method, DetectionMethod::Content | DetectionMethod::Hybrid);

    let mut content_hashes = BTreeMap::new();
    for url in &next_urls {
        let resolved = if let Some(hash) = fresh_hashes.get(url.as_str()) {
            let length = current.hashes.get(url).map(|fp| fp.length).unwrap_or(0);
            Some(HashEntry {
                hash: hash.to_string(),
                length,
            })
        } else if previous.map(|p| p.urls.contains(url)).unwrap_or(false) {
            previous.and_then(|p| p.content_hashes.get(url)).cloned()
        } else if let Some(fp) = current.hashes.get(url) {
            fp.has_hash().then(|| HashEntry {
                hash: fp.hash.clone(),
                length: fp.length,
            })
        } else {
            None
        };

        match resolved {
            Some(entry) => {
                content_hashes.insert(url.clone(), entry);
            }
            None if declares_content_method => {
                content_hashes.insert(
                    url.clone(),
                    HashEntry {
                        hash: String::new(),
                        length: 0,
                    },
                );
            }
            None => {}
        }
    }

    Baseline {
        site_id: current.site_id.clone(),
        site_name: site_name.to_string(),
        created_at: Utc::now(),
        previous_timestamp: previous.map(|p| p.created_at),
        version: next_version(previous),
        evolution_type: match previous {
            Some(_) => EvolutionType::AutomaticUpdate,
            None => EvolutionType::Initial,
        },
        urls: next_urls,
        content_hashes,
        change_summary: summary,
        metadata: BaselineMetadata {
            method: current.method,
            sitemap_info: current.sitemap_info.clone(),
        },
    }
}

/// Validates `next` and, if it passes, commits it via `store.save()` plus
/// an `append_event()`. On a validation error the commit is aborted — the
/// store is never touched with `next` — and a `validation_failed` event is
/// recorded instead, per §4.6's commit policy.
pub async fn commit(
    store: &BaselineStore,
    previous: Option<&Baseline>,
    next: &Baseline,
) -> Result<BaselineEvent, EngineError> {
    let outcome = validate(next, previous);
    if !outcome.is_ok() {
        warn!(site_id = %next.site_id, errors = ?outcome.errors, "baseline validation failed, commit aborted");
        let event = BaselineEvent {
            event_id: new_event_id(),
            site_id: next.site_id.clone(),
            timestamp: Utc::now(),
            kind: BaselineEventKind::ValidationFailed,
            counts: next.change_summary,
            previous_baseline_id: previous.map(Baseline::identifier),
            new_baseline_id: None,
            errors: outcome.errors.clone(),
        };
        store.append_event(&event).await?;
        return Err(EngineError::BaselineValidation(outcome.errors));
    }

    for warning in &outcome.warnings {
        warn!(site_id = %next.site_id, %warning, "baseline validation warning");
    }

    let new_id = store.save(&next.site_id, next).await?;
    let kind = match next.evolution_type {
        EvolutionType::Initial => BaselineEventKind::Created,
        _ => BaselineEventKind::Updated,
    };
    let event = BaselineEvent {
        event_id: new_event_id(),
        site_id: next.site_id.clone(),
        timestamp: Utc::now(),
        kind,
        counts: next.change_summary,
        previous_baseline_id: previous.map(Baseline::identifier),
        new_baseline_id: Some(new_id),
        errors: Vec::new(),
    };
    store.append_event(&event).await?;
    info!(site_id = %next.site_id, event_id = %event.event_id, ?kind, "baseline evolution committed");
    Ok(event)
}

/// Promotes `target_baseline_id` back to latest (§6 rollback endpoint). The
/// rolled-back baseline is written as a fresh entry — same URL set and
/// hashes as the target, a new `created_at` — so the store's "latest by
/// creation timestamp" rule picks it up without disturbing history.
pub async fn rollback(
    store: &BaselineStore,
    site_id: &str,
    target_baseline_id: &str,
) -> Result<BaselineEvent, EngineError> {
    let target = store.load(site_id, target_baseline_id).await?;
    let current_latest = store.latest(site_id).await?;

    let mut next = target.clone();
    next.created_at = Utc::now();
    next.previous_timestamp = current_latest.as_ref().map(|b| b.created_at);
    next.evolution_type = EvolutionType::ManualRollback;
    next.version = next_version(current_latest.as_ref());

    let outcome = validate(&next, current_latest.as_ref());
    if !outcome.is_ok() {
        let event = BaselineEvent {
            event_id: new_event_id(),
            site_id: site_id.to_string(),
            timestamp: Utc::now(),
            kind: BaselineEventKind::ValidationFailed,
            counts: next.change_summary,
            previous_baseline_id: current_latest.as_ref().map(Baseline::identifier),
            new_baseline_id: None,
            errors: outcome.errors.clone(),
        };
        store.append_event(&event).await?;
        return Err(EngineError::BaselineValidation(outcome.errors));
    }

    let new_id = store.save(site_id, &next).await?;
    let event = BaselineEvent {
        event_id: new_event_id(),
        site_id: site_id.to_string(),
        timestamp: Utc::now(),
        kind: BaselineEventKind::RolledBack,
        counts: next.change_summary,
        previous_baseline_id: current_latest.map(|b| b.identifier()),
        new_baseline_id: Some(new_id),
        errors: Vec::new(),
    };
    store.append_event(&event).await?;
    info!(site_id, target_baseline_id, "baseline rolled back");
    Ok(event)
}

/// Appends a `run_aborted` event without touching the store's baseline —
/// used when a run's deadline expires before evolution would otherwise run.
pub async fn record_run_aborted(
    store: &BaselineStore,
    site_id: &str,
    previous: Option<&Baseline>,
) -> Result<(), EngineError> {
    let event = BaselineEvent {
        event_id: new_event_id(),
        site_id: site_id.to_string(),
        timestamp: Utc::now(),
        kind: BaselineEventKind::RunAborted,
        counts: ChangeSummary::default(),
        previous_baseline_id: previous.map(Baseline::identifier),
        new_baseline_id: None,
        errors: Vec::new(),
    };
    store.append_event(&event).await
}

fn next_version(previous: Option<&Baseline>) -> String {
    let Some(previous) = previous else {
        return "v1".to_string();
    };
    match previous.version.strip_prefix('v').and_then(|n| n.parse::<u64>().ok()) {
        Some(n) => format!("v{}", n + 1),
        None => format!("{}.1", previous.version),
    }
}

fn new_event_id() -> String {
    format!("evt_{}", uuid::Uuid::new_v4())
}
