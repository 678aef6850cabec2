use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the three detection methods a site can enable. Modeled as a set
/// member (§9 Open Question #2): a site enabling more than one gets one
/// independent run, and one change report, per method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Sitemap,
    Content,
    Hybrid,
}

/// A configured monitoring target, loaded once at startup and immutable for
/// the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    pub site_id: String,
    pub name: String,
    pub root_url: String,
    pub sitemap_url: String,
    pub methods: BTreeSet<DetectionMethod>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_poll_interval_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

/// Global, read-only-after-startup options shared by every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalOptions {
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retention_count")]
    pub retention_count: usize,
    #[serde(default = "default_output_root")]
    pub output_root: String,
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    #[serde(default = "default_min_host_delay_ms")]
    pub min_host_delay_ms: u64,
    #[serde(default = "default_redirect_cap")]
    pub redirect_cap: u8,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default)]
    pub lock_wait_secs: Option<u64>,
    /// `socks5h://` endpoint for Tor-proxied fetching (§4.1 optional proxy
    /// mode). Absent means every fetch goes direct.
    #[serde(default)]
    pub tor_socks_addr: Option<String>,
    /// Request identity rotation every N successful fetches through the
    /// proxy (10 recommended); only meaningful when `tor_socks_addr` is set.
    #[serde(default)]
    pub tor_rotate_every: Option<u32>,
    /// If the proxy is unreachable, fall back to a direct connection instead
    /// of surfacing `ConnectionRefused` and aborting the run.
    #[serde(default)]
    pub tor_allow_direct_fallback: bool,
}

fn default_max_concurrent_fetches() -> usize {
    20
}
fn default_fetch_timeout_secs() -> u64 {
    15
}
fn default_batch_size() -> usize {
    20
}
fn default_retention_count() -> usize {
    30
}
fn default_output_root() -> String {
    "output".to_string()
}
fn default_run_deadline_secs() -> u64 {
    1800
}
fn default_min_host_delay_ms() -> u64 {
    100
}
fn default_redirect_cap() -> u8 {
    10
}
fn default_retry_attempts() -> u32 {
    3
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            batch_size: default_batch_size(),
            retention_count: default_retention_count(),
            output_root: default_output_root(),
            run_deadline_secs: default_run_deadline_secs(),
            min_host_delay_ms: default_min_host_delay_ms(),
            redirect_cap: default_redirect_cap(),
            retry_attempts: default_retry_attempts(),
            lock_wait_secs: None,
            tor_socks_addr: None,
            tor_rotate_every: None,
            tor_allow_direct_fallback: false,
        }
    }
}

/// Outcome of fetching one child sitemap (or the entry document itself).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitemapChildInfo {
    pub url: String,
    pub status: ChildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub url_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SitemapKind {
    Single,
    Index,
}

/// Structural metadata the Sitemap Resolver returns alongside the URL set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitemapInfo {
    pub sitemap_type: SitemapKind,
    pub child_count: usize,
    pub children: Vec<SitemapChildInfo>,
    pub resolved_at: DateTime<Utc>,
}

/// A deduplicated, lexicographically sorted URL set with resolver metadata.
/// `BTreeSet` keeps serialization byte-stable without an explicit sort step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlSet {
    pub urls: BTreeSet<String>,
    pub sitemap_info: Option<SitemapInfo>,
}

/// Per-URL fingerprint: hash is the empty-string sentinel when canonicalization
/// could not run (non-2xx fetch, see §4.3 step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFingerprint {
    pub hash: String,
    pub length: u64,
    pub fetched_at: DateTime<Utc>,
    pub http_status: u16,
}

impl ContentFingerprint {
    pub fn has_hash(&self) -> bool {
        !self.hash.is_empty()
    }
}

/// The URL set and (optionally) hashes produced by one detection run, before
/// comparison against a baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentObservation {
    pub site_id: String,
    pub method: DetectionMethod,
    pub detected_at: DateTime<Utc>,
    pub urls: BTreeSet<String>,
    pub hashes: BTreeMap<String, ContentFingerprint>,
    pub ignored: BTreeMap<String, String>,
    pub sitemap_info: Option<SitemapInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionType {
    Initial,
    AutomaticUpdate,
    ManualRollback,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub new: usize,
    pub modified: usize,
    pub deleted: usize,
    pub ignored: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineMetadata {
    pub method: DetectionMethod,
    pub sitemap_info: Option<SitemapInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashEntry {
    pub hash: String,
    pub length: u64,
}

/// A persisted snapshot of a site's known URLs and (optionally) content
/// fingerprints, and the sole ground truth the Change Classifier compares
/// against. See §3 invariants in the design doc for the rules every instance
/// must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub site_id: String,
    pub site_name: String,
    pub created_at: DateTime<Utc>,
    pub previous_timestamp: Option<DateTime<Utc>>,
    pub version: String,
    pub evolution_type: EvolutionType,
    pub urls: BTreeSet<String>,
    pub content_hashes: BTreeMap<String, HashEntry>,
    pub change_summary: ChangeSummary,
    pub metadata: BaselineMetadata,
}

impl Baseline {
    /// Identifier used for the on-disk filename and for `latest` tie-breaks:
    /// `baseline_<unix-ts>_<short-hash>`.
    pub fn identifier(&self) -> String {
        format!(
            "baseline_{}_{}",
            self.created_at.timestamp(),
            short_hash(&self.version)
        )
    }

    pub fn declares_content_method(&self) -> bool {
        matches!(
            self.metadata.method,
            DetectionMethod::Content | DetectionMethod::Hybrid
        )
    }
}

fn short_hash(s: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    format!("{:x}", hasher.finish())[..8].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    NewPage,
    ModifiedContent,
    DeletedPage,
    IgnoredFile,
}

/// One classified change, emitted per run into the change-report file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub url: String,
    pub kind: ChangeKind,
    pub detected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The per-run artifact: classified changes plus the summary counts and the
/// method/metadata that produced them. Does not replace the baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeReport {
    pub site: String,
    pub detected_at: DateTime<Utc>,
    pub method: DetectionMethod,
    pub changes: Vec<ChangeRecord>,
    pub summary: ChangeSummary,
    pub source_metadata: Option<SitemapInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineEventKind {
    Created,
    Updated,
    Validated,
    RolledBack,
    ValidationFailed,
    RunAborted,
}

/// Appended to a site's event log on every baseline transition attempt,
/// whether or not it ultimately committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineEvent {
    pub event_id: String,
    pub site_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: BaselineEventKind,
    pub counts: ChangeSummary,
    pub previous_baseline_id: Option<String>,
    pub new_baseline_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
}
