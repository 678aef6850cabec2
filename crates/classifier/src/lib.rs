use chrono::Utc;

use sitewatch_core::{Baseline, ChangeKind, ChangeRecord, ChangeSummary, CurrentObservation};

/// Compares a persisted baseline against a fresh observation and returns the
/// classified change set. Pure and total: never fails, never performs I/O.
/// Upstream fetch failures only ever show up here as missing hashes.
pub fn classify(baseline: &Baseline, current: &CurrentObservation) -> Vec<ChangeRecord> {
    let now = Utc::now();
    let mut records = Vec::new();

    for url in current.urls.difference(&baseline.urls) {
        let ignored_type = current.ignored.get(url);
        records.push(ChangeRecord {
            url: url.clone(),
            kind: ChangeKind::NewPage,
            detected_at: now,
            prev_hash: None,
            new_hash: current
                .hashes
                .get(url)
                .filter(|fp| fp.has_hash())
                .map(|fp| fp.hash.clone()),
            file_type: ignored_type.cloned(),
            detail: None,
        });
    }

    for url in baseline.urls.difference(&current.urls) {
        records.push(ChangeRecord {
            url: url.clone(),
            kind: ChangeKind::DeletedPage,
            detected_at: now,
            prev_hash: baseline.content_hashes.get(url).map(|h| h.hash.clone()),
            new_hash: None,
            file_type: None,
            detail: None,
        });
    }

    for url in baseline.urls.intersection(&current.urls) {
        if let Some(file_type) = current.ignored.get(url) {
            records.push(ChangeRecord {
                url: url.clone(),
                kind: ChangeKind::IgnoredFile,
                detected_at: now,
                prev_hash: None,
                new_hash: None,
                file_type: Some(file_type.clone()),
                detail: None,
            });
            continue;
        }

        let prev = baseline.content_hashes.get(url).filter(|h| !h.hash.is_empty());
        let curr = current
            .hashes
            .get(url)
            .filter(|fp| fp.has_hash());

        if let (Some(prev), Some(curr)) = (prev, curr) {
            if prev.hash != curr.hash {
                records.push(ChangeRecord {
                    url: url.clone(),
                    kind: ChangeKind::ModifiedContent,
                    detected_at: now,
                    prev_hash: Some(prev.hash.clone()),
                    new_hash: Some(curr.hash.clone()),
                    file_type: None,
                    detail: None,
                });
            }
        }
    }

    records.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.url.cmp(&b.url)));
    records
}

/// Derives the summary counts carried on change reports and next baselines.
/// `unchanged` is not a record kind — it is whatever of the intersection was
/// neither modified nor (already) ignored.
pub fn summarize(
    records: &[ChangeRecord],
    baseline: &Baseline,
    current: &CurrentObservation,
) -> ChangeSummary {
    let new = records.iter().filter(|r| r.kind == ChangeKind::NewPage).count();
    let modified = records
        .iter()
        .filter(|r| r.kind == ChangeKind::ModifiedContent)
        .count();
    let deleted = records.iter().filter(|r| r.kind == ChangeKind::DeletedPage).count();
    let ignored = records.iter().filter(|r| r.kind == ChangeKind::IgnoredFile).count();

    let intersection = baseline.urls.intersection(&current.urls).count();
    let unchanged = intersection.saturating_sub(modified).saturating_sub(ignored);

    ChangeSummary {
        new,
        modified,
        deleted,
        ignored,
        unchanged,
    }
}
