use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Where the channel list comes from and how it is fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// `http(s)://` URL, `file://` URL, or a plain local path.
    #[serde(default = "default_catalog_source")]
    pub source: String,
    /// Storage-read grant for `file` sources.
    #[serde(default = "default_allow_file")]
    pub allow_file: bool,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Upper bound for fetching a portal page before falling back.
    #[serde(default = "default_scrape_timeout_secs")]
    pub scrape_timeout_secs: u64,
    /// User agent sent when the source does not override it.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Portal bodies larger than this are truncated before extraction.
    #[serde(default = "default_max_scrape_bytes")]
    pub max_scrape_bytes: usize,
    /// Hosts scraped in addition to the built-in portal set.
    #[serde(default)]
    pub extra_portal_hosts: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Swap the direction of next/previous (channel-up goes down the list).
    #[serde(default)]
    pub reversed: bool,
}

/// User-configurable persistence paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_prefs_file")]
    pub prefs_file: PathBuf,
    #[serde(default = "default_overlay_file")]
    pub overlay_file: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            source: default_catalog_source(),
            allow_file: default_allow_file(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            scrape_timeout_secs: default_scrape_timeout_secs(),
            user_agent: default_user_agent(),
            max_scrape_bytes: default_max_scrape_bytes(),
            extra_portal_hosts: Vec::new(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            prefs_file: default_prefs_file(),
            overlay_file: default_overlay_file(),
        }
    }
}

fn default_catalog_source() -> String {
    platform::config_dir()
        .join("channels.json")
        .display()
        .to_string()
}

fn default_allow_file() -> bool {
    true
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_scrape_timeout_secs() -> u64 {
    8
}

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_max_scrape_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_prefs_file() -> PathBuf {
    platform::data_dir().join("prefs.json")
}

fn default_overlay_file() -> PathBuf {
    platform::data_dir().join("overlay.toml")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        platform::write_atomic(&Self::config_path(), content.as_bytes())?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.catalog.allow_file);
        assert_eq!(config.resolver.scrape_timeout_secs, 8);
        assert!(config.resolver.user_agent.starts_with("Mozilla/5.0"));
        assert!(!config.navigation.reversed);
        assert!(config.paths.overlay_file.ends_with("tvzap/overlay.toml"));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [navigation]
            reversed = true

            [resolver]
            extra_portal_hosts = ["example.tv"]
            "#,
        )
        .unwrap();
        assert!(config.navigation.reversed);
        assert_eq!(config.resolver.extra_portal_hosts, vec!["example.tv"]);
        assert_eq!(config.resolver.max_scrape_bytes, 2 * 1024 * 1024);
        assert_eq!(config.catalog.fetch_timeout_secs, 20);
    }
}
