//! Engine configuration.
//!
//! Everything has a default matching the browser's on-disk layout, so an
//! empty JSON object (`{}`) is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BlockersError, Result};

pub const DEFAULT_HTTPS_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_THIRD_PARTY_CACHE_CAPACITY: usize = 20;
pub const DEFAULT_REDIRECT_TABLE_CAPACITY: usize = 256;
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

/// Location of one rule-data file: `<data_dir>/<version>/<file_name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFileConfig {
    pub version: String,
    pub file_name: String,
}

impl RuleFileConfig {
    pub fn new(version: &str, file_name: &str) -> Self {
        Self {
            version: version.to_string(),
            file_name: file_name.to_string(),
        }
    }
}

/// A region-specific ad-block list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionalListConfig {
    pub uuid: String,
    pub title: String,
    /// Language codes the list is meant for (e.g. `["de"]`).
    pub langs: Vec<String>,
    pub file: RuleFileConfig,
    /// Load regardless of locale.
    pub enabled: bool,
}

impl Default for RegionalListConfig {
    fn default() -> Self {
        Self {
            uuid: String::new(),
            title: String::new(),
            langs: Vec::new(),
            file: RuleFileConfig::new("1", ""),
            enabled: false,
        }
    }
}

impl RegionalListConfig {
    /// Whether this list should be loaded for `locale` (e.g. `de-DE`).
    pub fn applies_to(&self, locale: &str) -> bool {
        if self.enabled {
            return true;
        }
        let lang = locale
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        !lang.is_empty() && self.langs.iter().any(|l| l.eq_ignore_ascii_case(&lang))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory holding versioned rule data.
    pub data_dir: PathBuf,
    /// Browser locale, used to pick regional lists.
    pub locale: String,
    pub tracking_protection: RuleFileConfig,
    pub ad_block: RuleFileConfig,
    pub regional: Vec<RegionalListConfig>,
    pub httpse: RuleFileConfig,
    pub https_cache_capacity: usize,
    pub third_party_cache_capacity: usize,
    pub redirect_table_capacity: usize,
    /// HTTPS rewrites allowed per request before the loop guard trips.
    pub max_redirects: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            locale: String::from("en-US"),
            tracking_protection: RuleFileConfig::new("1", "TrackingProtection.dat"),
            ad_block: RuleFileConfig::new("1", "ABPFilterParserData.dat"),
            regional: Vec::new(),
            httpse: RuleFileConfig::new("4", "httpse.sqlite"),
            https_cache_capacity: DEFAULT_HTTPS_CACHE_CAPACITY,
            third_party_cache_capacity: DEFAULT_THIRD_PARTY_CACHE_CAPACITY,
            redirect_table_capacity: DEFAULT_REDIRECT_TABLE_CAPACITY,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

impl EngineConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(text).map_err(|e| BlockersError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| BlockersError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.https_cache_capacity == 0 {
            return Err(BlockersError::Config("https_cache_capacity must be > 0".into()));
        }
        if self.third_party_cache_capacity == 0 {
            return Err(BlockersError::Config("third_party_cache_capacity must be > 0".into()));
        }
        if self.redirect_table_capacity == 0 {
            return Err(BlockersError::Config("redirect_table_capacity must be > 0".into()));
        }
        if self.max_redirects == 0 {
            return Err(BlockersError::Config("max_redirects must be > 0".into()));
        }
        Ok(())
    }

    /// Regional lists selected for the configured locale, in config order.
    pub fn selected_regional_lists(&self) -> Vec<&RegionalListConfig> {
        self.regional
            .iter()
            .filter(|list| list.applies_to(&self.locale))
            .collect()
    }
}
