use anyhow::Result;

use sitewatch_baseline::BaselineStore;
use sitewatch_core::AppConfig;

use crate::report::slugify;

/// `sitewatch status` — latest baseline summary for every configured site.
pub async fn print_status(config: &AppConfig, store: &BaselineStore) -> Result<()> {
    for site in &config.sites {
        match store.latest(&site.site_id).await? {
            Some(baseline) => {
                println!(
                    "{:<24} {:>5} urls   {:?}   created {}",
                    site.site_id,
                    baseline.urls.len(),
                    baseline.evolution_type,
                    baseline.created_at.to_rfc3339(),
                );
            }
            None => println!("{:<24} no baseline yet", site.site_id),
        }
    }
    Ok(())
}

/// `sitewatch baselines <site-id>` — baseline history, newest first.
pub async fn print_baselines(store: &BaselineStore, site_id: &str) -> Result<()> {
    let ids = store.list(site_id).await?;
    if ids.is_empty() {
        println!("no baselines recorded for {site_id}");
        return Ok(());
    }
    for id in ids {
        let baseline = store.load(site_id, &id).await?;
        println!(
            "{id}  {:?}  {} urls  created {}",
            baseline.evolution_type,
            baseline.urls.len(),
            baseline.created_at.to_rfc3339(),
        );
    }
    Ok(())
}

/// `sitewatch changes <site-id> --limit N` — the N most recent change
/// report files under `output_root`, newest first.
pub async fn print_changes(output_root: &str, site_id: &str, site_name: &str, limit: usize) -> Result<()> {
    let slug = slugify(site_name);
    let mut files = Vec::new();
    let mut run_dirs = tokio::fs::read_dir(output_root).await?;
    while let Some(run_dir) = run_dirs.next_entry().await? {
        if !run_dir.file_type().await?.is_dir() {
            continue;
        }
        let mut entries = tokio::fs::read_dir(run_dir.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&format!("{slug}_")) && name.ends_with(".json") {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    files.reverse();
    files.truncate(limit);

    if files.is_empty() {
        println!("no change reports recorded for {site_id}");
        return Ok(());
    }
    for path in files {
        let raw = tokio::fs::read_to_string(&path).await?;
        println!("--- {} ---", path.display());
        println!("{raw}");
    }
    Ok(())
}

/// `sitewatch rollback <site-id> <baseline-id>`.
pub async fn rollback(store: &BaselineStore, site_id: &str, baseline_id: &str) -> Result<()> {
    let event = sitewatch_evolution::rollback(store, site_id, baseline_id).await?;
    println!("rolled back {site_id} to {baseline_id} (event {})", event.event_id);
    Ok(())
}
