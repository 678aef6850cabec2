use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use sitewatch_baseline::BaselineStore;
use sitewatch_classifier::{classify, summarize};
use sitewatch_core::{
    Baseline, ChangeReport, ChangeSummary, CurrentObservation, DetectionMethod, EngineError,
    GlobalOptions, SiteConfig,
};
use sitewatch_evolution::{evolve_and_commit, record_run_aborted, EvolutionOutcome};
use sitewatch_fetcher::{Fetcher, FetcherConfig, ProxyConfig, ProxyProvider};
use sitewatch_fingerprint::fingerprint_batch;
use sitewatch_sitemap::SitemapResolver;

/// Outcome of one `run` invocation for a single site: one `ChangeReport` per
/// enabled detection method (§9 Open Question #2 — methods are independent),
/// plus any per-method errors that did not abort the whole run.
pub struct SiteRunOutcome {
    pub site_id: String,
    pub reports: Vec<ChangeReport>,
    pub errors: Vec<String>,
}

impl SiteRunOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn fetcher_config(options: &GlobalOptions) -> FetcherConfig {
    let proxy = options.tor_socks_addr.clone().map(|socks_addr| ProxyConfig {
        provider: ProxyProvider::Tor,
        socks_addr,
        rotate_every: options.tor_rotate_every,
        allow_direct_fallback: options.tor_allow_direct_fallback,
    });
    FetcherConfig {
        max_concurrent: options.max_concurrent_fetches,
        request_timeout: Duration::from_secs(options.fetch_timeout_secs),
        redirect_cap: options.redirect_cap,
        min_host_delay: Duration::from_millis(options.min_host_delay_ms),
        retry_attempts: options.retry_attempts,
        proxy,
        ..FetcherConfig::default()
    }
}

/// Runs detection once for `site`, one independent report per enabled
/// method, bounded by the run deadline in `options` (§5 cancellation and
/// timeouts). On expiry, nothing is committed and a `run_aborted` event is
/// recorded.
pub async fn run_site(
    site: &SiteConfig,
    fetcher: &Fetcher,
    store: &BaselineStore,
    options: &GlobalOptions,
    revalidate: bool,
) -> SiteRunOutcome {
    let deadline = Duration::from_secs(options.run_deadline_secs);
    match tokio::time::timeout(
        deadline,
        run_site_within_deadline(site, fetcher, store, options, revalidate),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(site_id = %site.site_id, "run deadline exceeded, aborting");
            let previous = store.latest(&site.site_id).await.ok().flatten();
            if let Err(e) = record_run_aborted(store, &site.site_id, previous.as_ref()).await {
                warn!(site_id = %site.site_id, error = %e, "failed to record run_aborted event");
            }
            SiteRunOutcome {
                site_id: site.site_id.clone(),
                reports: Vec::new(),
                errors: vec!["run deadline exceeded".to_string()],
            }
        }
    }
}

async fn run_site_within_deadline(
    site: &SiteConfig,
    fetcher: &Fetcher,
    store: &BaselineStore,
    options: &GlobalOptions,
    revalidate: bool,
) -> SiteRunOutcome {
    let lock_wait = Duration::from_secs(options.lock_wait_secs.unwrap_or(60));
    let _guard = match store.acquire_site_lock(&site.site_id, lock_wait).await {
        Ok(guard) => guard,
        Err(e) => {
            return SiteRunOutcome {
                site_id: site.site_id.clone(),
                reports: Vec::new(),
                errors: vec![e.to_string()],
            }
        }
    };

    let mut reports = Vec::new();
    let mut errors = Vec::new();
    for method in &site.methods {
        match run_one_method(*method, site, fetcher, store, options, revalidate).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                warn!(site_id = %site.site_id, ?method, error = %e, "detection method failed");
                errors.push(format!("{method:?}: {e}"));
            }
        }
    }

    if let Err(e) = store.prune(&site.site_id, options.retention_count).await {
        warn!(site_id = %site.site_id, error = %e, "baseline prune failed");
    }

    SiteRunOutcome {
        site_id: site.site_id.clone(),
        reports,
        errors,
    }
}

async fn run_one_method(
    method: DetectionMethod,
    site: &SiteConfig,
    fetcher: &Fetcher,
    store: &BaselineStore,
    options: &GlobalOptions,
    revalidate: bool,
) -> Result<ChangeReport, EngineError> {
    let previous = store.latest(&site.site_id).await?;
    let current = build_observation(method, site, fetcher, options, previous.as_ref()).await?;

    let changes = match &previous {
        Some(previous) => classify(previous, &current),
        None => Vec::new(),
    };
    let summary = match &previous {
        Some(previous) => summarize(&changes, previous, &current),
        None => ChangeSummary::default(),
    };

    info!(
        site_id = %site.site_id,
        ?method,
        new = summary.new,
        modified = summary.modified,
        deleted = summary.deleted,
        "classification complete"
    );

    let evolution = evolve_and_commit(
        store,
        previous.as_ref(),
        &site.name,
        &current,
        &changes,
        summary,
        revalidate,
    )
    .await?;

    if let EvolutionOutcome::Committed { .. } = &evolution {
        info!(site_id = %site.site_id, ?method, "baseline evolved");
    }

    Ok(ChangeReport {
        site: site.name.clone(),
        detected_at: current.detected_at,
        method,
        changes,
        summary,
        source_metadata: current.sitemap_info.clone(),
    })
}

/// Builds the current observation for one method, per §2's control flow:
/// sitemap and hybrid discover the URL universe via the Sitemap Resolver;
/// content-only reuses the baseline's known URL list as the universe and
/// only re-fingerprints it.
async fn build_observation(
    method: DetectionMethod,
    site: &SiteConfig,
    fetcher: &Fetcher,
    options: &GlobalOptions,
    previous: Option<&Baseline>,
) -> Result<CurrentObservation, EngineError> {
    let detected_at = Utc::now();

    match method {
        DetectionMethod::Sitemap => {
            let resolver = SitemapResolver::new(fetcher);
            let url_set = resolver.resolve(&site.sitemap_url).await?;
            Ok(CurrentObservation {
                site_id: site.site_id.clone(),
                method,
                detected_at,
                urls: url_set.urls,
                hashes: BTreeMap::new(),
                ignored: BTreeMap::new(),
                sitemap_info: url_set.sitemap_info,
            })
        }
        DetectionMethod::Content => {
            let urls: Vec<String> = previous
                .map(|p| p.urls.iter().cloned().collect())
                .unwrap_or_default();
            let (hashes, ignored) = fingerprint_all(fetcher, &urls, options.batch_size).await;
            Ok(CurrentObservation {
                site_id: site.site_id.clone(),
                method,
                detected_at,
                urls: urls.into_iter().collect(),
                hashes,
                ignored,
                sitemap_info: None,
            })
        }
        DetectionMethod::Hybrid => {
            let resolver = SitemapResolver::new(fetcher);
            let url_set = resolver.resolve(&site.sitemap_url).await?;
            let urls: Vec<String> = url_set.urls.iter().cloned().collect();
            let (hashes, ignored) = fingerprint_all(fetcher, &urls, options.batch_size).await;
            Ok(CurrentObservation {
                site_id: site.site_id.clone(),
                method,
                detected_at,
                urls: url_set.urls,
                hashes,
                ignored,
                sitemap_info: url_set.sitemap_info,
            })
        }
    }
}

async fn fingerprint_all(
    fetcher: &Fetcher,
    urls: &[String],
    batch_size: usize,
) -> (
    BTreeMap<String, sitewatch_core::ContentFingerprint>,
    BTreeMap<String, String>,
) {
    let outcomes = fingerprint_batch(fetcher, urls, batch_size).await;
    let mut hashes = BTreeMap::new();
    let mut ignored = BTreeMap::new();
    for (url, outcome) in outcomes {
        match outcome {
            sitewatch_fingerprint::FingerprintOutcome::Hashed(fp) => {
                hashes.insert(url, fp);
            }
            sitewatch_fingerprint::FingerprintOutcome::Ignored { file_type, .. } => {
                ignored.insert(url, file_type);
            }
            sitewatch_fingerprint::FingerprintOutcome::Sentinel { .. } => {}
        }
    }
    (hashes, ignored)
}
