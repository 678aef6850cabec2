mod canonicalize;
mod content_kind;

use std::collections::BTreeMap;

use chrono::Utc;
use futures::future::join_all;
use tracing::info;
use url::Url;

use sitewatch_core::{ContentFingerprint, FetchError};
use sitewatch_fetcher::Fetcher;

pub use canonicalize::canonicalize_and_hash;
pub use content_kind::{classify_content_kind, ContentKind};

/// Per-URL result of the fingerprinting pipeline: a real hash, a short-
/// circuited "ignored file" classification, or an empty sentinel standing in
/// for "unknown" when the fetch itself failed.
#[derive(Debug, Clone)]
pub enum FingerprintOutcome {
    Hashed(ContentFingerprint),
    Ignored { file_type: String, status: u16 },
    Sentinel { status: u16 },
}

impl FingerprintOutcome {
    pub fn as_fingerprint(&self) -> Option<&ContentFingerprint> {
        match self {
            FingerprintOutcome::Hashed(fp) => Some(fp),
            _ => None,
        }
    }
}

/// Fingerprints a single URL: fetch, classify, canonicalize, hash. Never
/// returns an error — fetch failures become the empty sentinel per §4.3
/// step 1, matching the classifier's "missing hash = unknown" contract.
pub async fn fingerprint_one(fetcher: &Fetcher, url: &str) -> FingerprintOutcome {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return FingerprintOutcome::Sentinel { status: 0 },
    };

    let resp = match fetcher.fetch(&parsed).await {
        Ok(resp) => resp,
        Err(err) => return FingerprintOutcome::Sentinel { status: status_of(&err) },
    };

    match classify_content_kind(resp.content_type.as_deref(), resp.final_url.as_str()) {
        ContentKind::Ignored { file_type } => FingerprintOutcome::Ignored {
            file_type,
            status: resp.status,
        },
        ContentKind::Html => {
            let body = String::from_utf8_lossy(&resp.body).into_owned();
            let (hash, length) = canonicalize_and_hash(&body);
            FingerprintOutcome::Hashed(ContentFingerprint {
                hash,
                length,
                fetched_at: Utc::now(),
                http_status: resp.status,
            })
        }
    }
}

fn status_of(err: &FetchError) -> u16 {
    match err {
        FetchError::HttpClientError(code) | FetchError::HttpServerError(code) => *code,
        _ => 0,
    }
}

/// Fingerprints `urls` in batches of `batch_size`, reporting progress at each
/// batch boundary via `tracing`. Concurrency within a batch is bounded by the
/// Fetcher's own semaphore, so this only controls reporting granularity, not
/// a second layer of limiting.
pub async fn fingerprint_batch(
    fetcher: &Fetcher,
    urls: &[String],
    batch_size: usize,
) -> BTreeMap<String, FingerprintOutcome> {
    let batch_size = batch_size.max(1);
    let mut results = BTreeMap::new();
    let total = urls.len();

    for (batch_index, chunk) in urls.chunks(batch_size).enumerate() {
        let futures = chunk.iter().map(|url| async move {
            let outcome = fingerprint_one(fetcher, url).await;
            (url.clone(), outcome)
        });
        let batch_results = join_all(futures).await;
        for (url, outcome) in batch_results {
            results.insert(url, outcome);
        }
        let done = ((batch_index + 1) * batch_size).min(total);
        info!(done, total, "fingerprint batch complete");
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitewatch_fetcher::FetcherConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn hashes_html_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body><p>Hello</p></body></html>")
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(FetcherConfig::default()).unwrap();
        let outcome = fingerprint_one(&fetcher, &format!("{}/page", server.uri())).await;
        match outcome {
            FingerprintOutcome::Hashed(fp) => assert!(fp.has_hash()),
            other => panic!("expected Hashed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_html_short_circuits_to_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"%PDF-1.4".to_vec())
                    .insert_header("content-type", "application/pdf"),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(FetcherConfig::default()).unwrap();
        let outcome = fingerprint_one(&fetcher, &format!("{}/doc.pdf", server.uri())).await;
        assert!(matches!(outcome, FingerprintOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn fetch_failure_yields_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(FetcherConfig::default()).unwrap();
        let outcome = fingerprint_one(&fetcher, &format!("{}/missing", server.uri())).await;
        match outcome {
            FingerprintOutcome::Sentinel { status } => assert_eq!(status, 404),
            other => panic!("expected Sentinel, got {other:?}"),
        }
    }
}
