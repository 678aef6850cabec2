mod cli;
mod report;
mod run;
mod status;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use sitewatch_baseline::BaselineStore;
use sitewatch_core::AppConfig;

use crate::cli::{Cli, Commands};

const EXIT_SUCCESS: i32 = 0;
const EXIT_PARTIAL: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_DEADLINE_EXCEEDED: i32 = 3;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let code = runtime.block_on(async_main());
    std::process::exit(code);
}

async fn async_main() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run_cli().await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "fatal error");
            EXIT_CONFIG_ERROR
        }
    }
}

async fn run_cli() -> Result<i32> {
    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using built-in defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config = AppConfig::from_toml_str(&config_str).context("parsing configuration")?;
    apply_env_overrides(&mut config);

    let store = BaselineStore::new(config.options.output_root.clone());

    match cli.command {
        Commands::Run { site_id, revalidate } => {
            let Some(site) = config.site(&site_id) else {
                error!(site_id, "no such site configured");
                return Ok(EXIT_CONFIG_ERROR);
            };
            let fetcher = sitewatch_fetcher::Fetcher::new(run::fetcher_config(&config.options))?;
            let run_started = chrono::Utc::now();
            let outcome = run::run_site(site, &fetcher, &store, &config.options, revalidate).await;
            Ok(finish_single_site(&config, run_started, outcome).await)
        }
        Commands::RunAll { revalidate } => {
            let fetcher = sitewatch_fetcher::Fetcher::new(run::fetcher_config(&config.options))?;
            let run_started = chrono::Utc::now();
            let mut worst = EXIT_SUCCESS;
            for site in config.active_sites() {
                let outcome =
                    run::run_site(site, &fetcher, &store, &config.options, revalidate).await;
                let code = finish_single_site(&config, run_started, outcome).await;
                worst = worst.max(code);
            }
            Ok(worst)
        }
        Commands::Status => {
            status::print_status(&config, &store).await?;
            Ok(EXIT_SUCCESS)
        }
        Commands::Baselines { site_id } => {
            status::print_baselines(&store, &site_id).await?;
            Ok(EXIT_SUCCESS)
        }
        Commands::Changes { site_id, limit } => {
            let Some(site) = config.site(&site_id) else {
                error!(site_id, "no such site configured");
                return Ok(EXIT_CONFIG_ERROR);
            };
            status::print_changes(&config.options.output_root, &site_id, &site.name, limit)
                .await?;
            Ok(EXIT_SUCCESS)
        }
        Commands::Rollback { site_id, baseline_id } => {
            status::rollback(&store, &site_id, &baseline_id).await?;
            Ok(EXIT_SUCCESS)
        }
    }
}

/// Writes every report from a site run to the output store and folds its
/// outcome into an exit code (§6: 0 success, 1 partial, 3 deadline exceeded).
async fn finish_single_site(
    config: &AppConfig,
    run_started: chrono::DateTime<chrono::Utc>,
    outcome: run::SiteRunOutcome,
) -> i32 {
    for report in &outcome.reports {
        if let Err(e) =
            report::write_change_report(
                std::path::Path::new(&config.options.output_root),
                run_started,
                report,
            )
            .await
        {
            warn!(site_id = %outcome.site_id, error = %e, "failed to write change report");
        }
    }

    if outcome.is_success() {
        info!(site_id = %outcome.site_id, reports = outcome.reports.len(), "run complete");
        EXIT_SUCCESS
    } else if outcome.errors.iter().any(|e| e.contains("deadline exceeded")) {
        EXIT_DEADLINE_EXCEEDED
    } else {
        EXIT_PARTIAL
    }
}

/// Environment-variable overrides for the handful of operational knobs
/// named in the options bundle, read once at startup.
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = std::env::var("SITEWATCH_MAX_CONCURRENT_FETCHES") {
        if let Ok(n) = v.parse() {
            config.options.max_concurrent_fetches = n;
        }
    }
    if let Ok(v) = std::env::var("SITEWATCH_OUTPUT_ROOT") {
        config.options.output_root = v;
    }
    if let Ok(v) = std::env::var("SITEWATCH_FETCH_TIMEOUT_SECS") {
        if let Ok(n) = v.parse() {
            config.options.fetch_timeout_secs = n;
        }
    }
    if let Ok(v) = std::env::var("SITEWATCH_RETENTION_COUNT") {
        if let Ok(n) = v.parse() {
            config.options.retention_count = n;
        }
    }
}
