mod xml;

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};
use url::Url;

use sitewatch_core::{
    ChildStatus, EngineError, SitemapChildInfo, SitemapInfo, SitemapKind, UrlSet,
};
use sitewatch_fetcher::Fetcher;

pub use xml::{parse_sitemap_xml, RootKind};

/// Expands a sitemap entry point (single sitemap or sitemap index) into a
/// deduplicated, lexicographically sorted URL set plus structural metadata.
pub struct SitemapResolver<'a> {
    fetcher: &'a Fetcher,
}

impl<'a> SitemapResolver<'a> {
    pub fn new(fetcher: &'a Fetcher) -> Self {
        Self { fetcher }
    }

    pub async fn resolve(&self, entry_url: &str) -> Result<UrlSet, EngineError> {
        let entry = Url::parse(entry_url)
            .map_err(|e| EngineError::SitemapUnavailable(format!("invalid entry URL: {e}")))?;

        let body = match self.fetcher.fetch(&entry).await {
            Ok(resp) => String::from_utf8_lossy(&resp.body).into_owned(),
            Err(err) => {
                return Err(EngineError::SitemapUnavailable(format!(
                    "failed to fetch sitemap entry {entry}: {err}"
                )))
            }
        };

        let parsed = parse_sitemap_xml(&body);

        match parsed.root {
            RootKind::UrlSet => {
                let urls = normalize_locs(&parsed.locs);
                let info = SitemapInfo {
                    sitemap_type: SitemapKind::Single,
                    child_count: 0,
                    children: vec![SitemapChildInfo {
                        url: entry.to_string(),
                        status: ChildStatus::Ok,
                        reason: None,
                        url_count: urls.len(),
                    }],
                    resolved_at: Utc::now(),
                };
                Ok(UrlSet {
                    urls,
                    sitemap_info: Some(info),
                })
            }
            RootKind::SitemapIndex => self.resolve_index(&entry, &parsed.locs).await,
            RootKind::Unknown => Err(EngineError::SitemapUnavailable(
                "entry document is neither a urlset nor a sitemapindex".to_string(),
            )),
        }
    }

    async fn resolve_index(
        &self,
        entry: &Url,
        child_urls: &[String],
    ) -> Result<UrlSet, EngineError> {
        if child_urls.is_empty() {
            return Err(EngineError::SitemapUnavailable(format!(
                "sitemap index {entry} has no child sitemaps"
            )));
        }

        let fetches = child_urls
            .iter()
            .map(|child| self.resolve_child(child));
        let results = join_all(fetches).await;

        let mut urls = std::collections::BTreeSet::new();
        let mut children = Vec::with_capacity(results.len());
        let mut any_success = false;

        for (child_url, outcome) in child_urls.iter().zip(results) {
            match outcome {
                Ok(locs) => {
                    any_success = true;
                    let child_set = normalize_locs(&locs);
                    children.push(SitemapChildInfo {
                        url: child_url.clone(),
                        status: ChildStatus::Ok,
                        reason: None,
                        url_count: child_set.len(),
                    });
                    urls.extend(child_set);
                }
                Err(reason) => {
                    warn!(child = %child_url, %reason, "child sitemap fetch failed, continuing");
                    children.push(SitemapChildInfo {
                        url: child_url.clone(),
                        status: ChildStatus::Error,
                        reason: Some(reason),
                        url_count: 0,
                    });
                }
            }
        }

        if !any_success {
            return Err(EngineError::SitemapUnavailable(format!(
                "all {} child sitemaps of {} failed",
                child_urls.len(),
                entry
            )));
        }

        info!(
            entry = %entry,
            children = child_urls.len(),
            urls = urls.len(),
            "resolved sitemap index"
        );

        Ok(UrlSet {
            urls,
            sitemap_info: Some(SitemapInfo {
                sitemap_type: SitemapKind::Index,
                child_count: child_urls.len(),
                children,
                resolved_at: Utc::now(),
            }),
        })
    }

    async fn resolve_child(&self, child_url: &str) -> Result<Vec<String>, String> {
        let url = Url::parse(child_url).map_err(|e| e.to_string())?;
        let resp = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|e| e.to_string())?;
        let body = String::from_utf8_lossy(&resp.body).into_owned();
        let parsed = parse_sitemap_xml(&body);
        Ok(parsed.locs)
    }
}

/// Strips fragments (§4.2 ordering rule); preserves trailing slashes as-is.
/// Empty entries are skipped. Returned as a `BTreeSet` so serialization is
/// byte-stable without a separate sort pass.
fn normalize_locs(locs: &[String]) -> std::collections::BTreeSet<String> {
    locs.iter()
        .filter(|loc| !loc.trim().is_empty())
        .map(|loc| strip_fragment(loc.trim()))
        .collect()
}

fn strip_fragment(raw: &str) -> String {
    match raw.split_once('#') {
        Some((before, _)) => before.to_string(),
        None => raw.to_string(),
    }
}
