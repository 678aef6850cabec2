mod validate;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use sitewatch_core::{Baseline, BaselineEvent, EngineError};

pub use validate::{validate, ValidationOutcome};

/// Persists and retrieves timestamped baselines per site; the sole mutator
/// of a site's baseline history. One directory per site; writes are
/// write-temp-then-rename so readers never observe a half-written baseline.
pub struct BaselineStore {
    root: PathBuf,
    site_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BaselineStore {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            root: output_root.into(),
            site_locks: DashMap::new(),
        }
    }

    fn site_dir(&self, site_id: &str) -> PathBuf {
        self.root.join("baselines").join(site_id)
    }

    fn events_path(&self, site_id: &str) -> PathBuf {
        self.site_dir(site_id).join("events.jsonl")
    }

    /// Waits up to `wait` for the per-site lock, failing `BusySite` on
    /// timeout (§7 "lock contention"). Cross-site writes never contend.
    pub async fn acquire_site_lock(
        &self,
        site_id: &str,
        wait: Duration,
    ) -> Result<OwnedMutexGuard<()>, EngineError> {
        let mutex = self
            .site_locks
            .entry(site_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        tokio::time::timeout(wait, mutex.lock_owned())
            .await
            .map_err(|_| EngineError::BusySite)
    }

    /// Most recent baseline by creation timestamp; ties broken
    /// lexicographically on identifier.
    pub async fn latest(&self, site_id: &str) -> Result<Option<Baseline>, EngineError> {
        let ids = self.list(site_id).await?;
        match ids.into_iter().next() {
            Some(id) => Ok(Some(self.load(site_id, &id).await?)),
            None => Ok(None),
        }
    }

    /// Baseline identifiers newest first.
    pub async fn list(&self, site_id: &str) -> Result<Vec<String>, EngineError> {
        let dir = self.site_dir(site_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| EngineError::Other(e.into()))?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| EngineError::Other(e.into()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(".json") {
                if id.starts_with("baseline_") {
                    entries.push(id.to_string());
                }
            }
        }
        entries.sort_by(|a, b| b.cmp(a));
        Ok(entries)
    }

    pub async fn load(&self, site_id: &str, baseline_id: &str) -> Result<Baseline, EngineError> {
        let path = self.site_dir(site_id).join(format!("{baseline_id}.json"));
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| EngineError::Other(e.into()))?;
        serde_json::from_str(&raw).map_err(|e| EngineError::Other(e.into()))
    }

    /// Atomic write: temp file in the site's directory, fsync, rename.
    /// Returns the new baseline's identifier.
    pub async fn save(&self, site_id: &str, baseline: &Baseline) -> Result<String, EngineError> {
        let dir = self.site_dir(site_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::Other(e.into()))?;

        let identifier = baseline.identifier();
        let final_path = dir.join(format!("{identifier}.json"));
        let body = serde_json::to_vec_pretty(baseline).map_err(|e| EngineError::Other(e.into()))?;

        let dir_clone = dir.clone();
        let final_path_clone = final_path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir_clone)?;
            tmp.write_all(&body)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&final_path_clone)
                .map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Other(e.into()))?
        .map_err(|e| EngineError::Other(e.into()))?;

        info!(site_id, identifier, "baseline saved");
        Ok(identifier)
    }

    /// Retains the K most recent baselines plus the initial one; removes the
    /// rest.
    pub async fn prune(&self, site_id: &str, keep: usize) -> Result<Vec<String>, EngineError> {
        let ids = self.list(site_id).await?;
        if ids.len() <= keep {
            return Ok(Vec::new());
        }

        let mut initial_id = None;
        for id in ids.iter().rev() {
            let baseline = self.load(site_id, id).await?;
            if baseline.evolution_type == sitewatch_core::EvolutionType::Initial {
                initial_id = Some(id.clone());
                break;
            }
        }

        let keep_set: std::collections::HashSet<&str> = ids
            .iter()
            .take(keep)
            .map(String::as_str)
            .chain(initial_id.as_deref())
            .collect();

        let mut removed = Vec::new();
        for id in &ids {
            if keep_set.contains(id.as_str()) {
                continue;
            }
            let path = self.site_dir(site_id).join(format!("{id}.json"));
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| EngineError::Other(e.into()))?;
            removed.push(id.clone());
        }
        if !removed.is_empty() {
            info!(site_id, removed = removed.len(), "pruned old baselines");
        }
        Ok(removed)
    }

    /// Appends one event to the site's line-delimited event log.
    pub async fn append_event(&self, event: &BaselineEvent) -> Result<(), EngineError> {
        let dir = self.site_dir(&event.site_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::Other(e.into()))?;
        let mut line = serde_json::to_string(event).map_err(|e| EngineError::Other(e.into()))?;
        line.push('\n');
        let path = self.events_path(&event.site_id);
        append_line(&path, &line).await
    }

    pub async fn read_events(&self, site_id: &str) -> Result<Vec<BaselineEvent>, EngineError> {
        let path = self.events_path(site_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| EngineError::Other(e.into()))?;
        let mut events = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BaselineEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(site_id, error = %e, "skipping malformed event log line"),
            }
        }
        Ok(events)
    }
}

async fn append_line(path: &Path, line: &str) -> Result<(), EngineError> {
    let path = path.to_path_buf();
    let line = line.to_string();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        use std::fs::OpenOptions;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        file.sync_all()
    })
    .await
    .map_err(|e| EngineError::Other(e.into()))?
    .map_err(|e| EngineError::Other(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitewatch_core::{
        BaselineEventKind, BaselineMetadata, ChangeSummary, DetectionMethod, EvolutionType,
    };
    use std::collections::{BTreeMap, BTreeSet};

    fn sample_baseline(urls: &[&str]) -> Baseline {
        Baseline {
            site_id: "site".to_string(),
            site_name: "Site".to_string(),
            created_at: chrono::Utc::now(),
            previous_timestamp: None,
            version: "v1".to_string(),
            evolution_type: EvolutionType::Initial,
            urls: urls.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            content_hashes: BTreeMap::new(),
            change_summary: ChangeSummary::default(),
            metadata: BaselineMetadata {
                method: DetectionMethod::Sitemap,
                sitemap_info: None,
            },
        }
    }

    #[tokio::test]
    async fn save_then_latest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        let baseline = sample_baseline(&["https://a.example/1"]);
        let id = store.save("site", &baseline).await.unwrap();

        let latest = store.latest("site").await.unwrap().unwrap();
        assert_eq!(latest.identifier(), id);
        assert_eq!(latest.urls, baseline.urls);
    }

    #[tokio::test]
    async fn no_baseline_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        assert!(store.latest("nothing-here").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prune_keeps_newest_and_initial() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());

        let mut initial = sample_baseline(&["a"]);
        initial.created_at = chrono::Utc::now() - chrono::Duration::days(10);
        store.save("site", &initial).await.unwrap();

        for i in 0..5 {
            let mut b = sample_baseline(&["a", "b"]);
            b.evolution_type = EvolutionType::AutomaticUpdate;
            b.created_at = chrono::Utc::now() - chrono::Duration::hours(5 - i);
            store.save("site", &b).await.unwrap();
        }

        let removed = store.prune("site", 2).await.unwrap();
        let remaining = store.list("site").await.unwrap();
        assert_eq!(remaining.len(), 3); // 2 kept + initial
        assert!(!removed.is_empty());
    }

    #[tokio::test]
    async fn append_event_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        let event = BaselineEvent {
            event_id: "e1".to_string(),
            site_id: "site".to_string(),
            timestamp: chrono::Utc::now(),
            kind: BaselineEventKind::Created,
            counts: ChangeSummary::default(),
            previous_baseline_id: None,
            new_baseline_id: Some("baseline_1_abc".to_string()),
            errors: Vec::new(),
        };
        store.append_event(&event).await.unwrap();
        let events = store.read_events("site").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "e1");
    }

    #[tokio::test]
    async fn site_lock_serializes_writers() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BaselineStore::new(dir.path()));
        let guard = store
            .acquire_site_lock("site", Duration::from_millis(50))
            .await
            .unwrap();
        let store2 = store.clone();
        let err = tokio::spawn(async move {
            store2
                .acquire_site_lock("site", Duration::from_millis(50))
                .await
        })
        .await
        .unwrap();
        assert!(matches!(err, Err(EngineError::BusySite)));
        drop(guard);
    }
}
