use thiserror::Error;

/// Typed fetch failure, as named in the Fetcher contract. Retried or not
/// depending on which variant it is (see `FetchError::is_transient`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out")]
    Timeout,

    #[error("dns resolution failed: {0}")]
    Dns(String),

    #[error("connection refused")]
    ConnectionRefused,

    #[error("tls handshake failed: {0}")]
    TlsFailure(String),

    #[error("http client error: {0}")]
    HttpClientError(u16),

    #[error("http server error: {0}")]
    HttpServerError(u16),

    #[error("response exceeded size limit")]
    TooLarge,

    #[error("failed to decode response body: {0}")]
    PayloadDecodeFailed(String),
}

impl FetchError {
    /// 5xx, 408 and 429 are retried in-process; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout
                | FetchError::Dns(_)
                | FetchError::ConnectionRefused
                | FetchError::TlsFailure(_)
                | FetchError::HttpServerError(_)
        ) || matches!(self, FetchError::HttpClientError(code) if *code == 408 || *code == 429)
    }
}

/// Taxonomy from the error-handling design: one variant per failure class the
/// core surfaces to an orchestrator, never as a panic.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("sitemap unavailable: {0}")]
    SitemapUnavailable(String),

    #[error("baseline failed validation: {0:?}")]
    BaselineValidation(Vec<String>),

    #[error("site is busy")]
    BusySite,

    #[error("run deadline exceeded")]
    DeadlineExceeded,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
