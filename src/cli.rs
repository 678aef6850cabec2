use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sitewatch", about = "Site change-detection engine")]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run detection once for one configured site
    Run {
        /// Site-id as configured
        site_id: String,
        /// Commit a `validated` event even if nothing changed
        #[arg(long)]
        revalidate: bool,
    },
    /// Run detection once for every active site, independently
    RunAll {
        #[arg(long)]
        revalidate: bool,
    },
    /// Print the latest baseline summary for every configured site
    Status,
    /// Print baseline history for a site, newest first
    Baselines {
        site_id: String,
    },
    /// Print the most recent change reports for a site
    Changes {
        site_id: String,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Set an older baseline as latest
    Rollback {
        site_id: String,
        baseline_id: String,
    },
}
