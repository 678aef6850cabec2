use serde::Deserialize;

use crate::error::EngineError;
use crate::types::{GlobalOptions, SiteConfig};

/// Top-level shape of the configuration file: a list of sites plus one
/// `[options]` table. Unknown keys anywhere in the document are a hard parse
/// error (§9 redesign flag #1) rather than a silently-ignored option.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub sites: Vec<SiteConfig>,
    #[serde(default)]
    pub options: GlobalOptions,
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, EngineError> {
        toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn site(&self, site_id: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.site_id == site_id)
    }

    pub fn active_sites(&self) -> impl Iterator<Item = &SiteConfig> {
        self.sites.iter().filter(|s| s.active)
    }
}
