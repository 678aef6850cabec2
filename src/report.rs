use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sitewatch_core::{ChangeReport, EngineError};
use tracing::info;

/// Writes one change report to `<output_root>/<YYYYMMDD_HHMMSS>/<site-name>_<YYYYMMDD_HHMMSS>.json`
/// (§6 change report file format). `run_started` is shared by every report
/// in the same invocation so they land in one run directory.
pub async fn write_change_report(
    output_root: &Path,
    run_started: DateTime<Utc>,
    report: &ChangeReport,
) -> Result<PathBuf, EngineError> {
    let stamp = run_started.format("%Y%m%d_%H%M%S").to_string();
    let dir = output_root.join(&stamp);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| EngineError::Other(e.into()))?;

    let path = dir.join(format!("{}_{}.json", slugify(&report.site), stamp));
    let body = serde_json::to_vec_pretty(report).map_err(|e| EngineError::Other(e.into()))?;
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| EngineError::Other(e.into()))?;

    info!(path = %path.display(), "wrote change report");
    Ok(path)
}

/// Filesystem-safe rendering of a site's display name: lowercase, with any
/// run of non-alphanumeric characters collapsed to a single underscore.
pub(crate) fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Example Site!! 2.0"), "example_site_2_0");
    }
}
