//! Application configuration for the threat intelligence aggregator.
//!
//! User config lives at `~/.threatintel/threatintel.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ThreatIntelError};
use crate::types::{CollectorKind, CollectorSpec, DEFAULT_HEADER, FeedSource};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "threatintel.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".threatintel";

/// Smallest allowed per-section entity cap. A cap of one would collapse every
/// section to a single threat.
pub const MIN_ENTITIES_PER_SECTION: usize = 2;

/// Largest accepted run deadline (one day).
pub const MAX_DEADLINE_SECS: u64 = 24 * 60 * 60;

static SQL_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid identifier regex"));

// ---------------------------------------------------------------------------
// Config structs (matching threatintel.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Session store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Registered collectors, in registration order.
    #[serde(default = "default_collectors")]
    pub collectors: Vec<CollectorSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsConfig::default(),
            storage: StorageConfig::default(),
            collectors: default_collectors(),
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Global run deadline in seconds.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// Maximum merged entities rendered per section.
    #[serde(default = "default_max_entities")]
    pub max_entities_per_section: usize,

    /// Report header line.
    #[serde(default = "default_header")]
    pub header: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            max_entities_per_section: default_max_entities(),
            header: default_header(),
        }
    }
}

fn default_deadline_secs() -> u64 {
    120
}
fn default_max_entities() -> usize {
    8
}
fn default_header() -> String {
    DEFAULT_HEADER.into()
}

/// Session store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Local libSQL/SQLite file.
    Embedded,
    /// Networked libSQL server (sqld / Turso).
    Remote,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// File path (embedded) or database URL (remote).
    #[serde(default = "default_location")]
    pub location: String,

    /// Name of the env var holding the remote auth token.
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,

    /// Table (namespace) holding session turns.
    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            location: default_location(),
            auth_token_env: default_auth_token_env(),
            table: default_table(),
        }
    }
}

fn default_backend() -> StorageBackend {
    StorageBackend::Embedded
}
fn default_location() -> String {
    "~/.threatintel/threat_intel.db".into()
}
fn default_auth_token_env() -> String {
    "THREATINTEL_DB_TOKEN".into()
}
fn default_table() -> String {
    "threat_intel_sessions".into()
}

fn default_collectors() -> Vec<CollectorSpec> {
    let feed = |name: &str, url: &str| {
        Url::parse(url).ok().map(|url| FeedSource {
            name: name.into(),
            url,
        })
    };

    let mut collectors = Vec::new();

    if let Ok(endpoint) = Url::parse("https://api.exa.ai/search") {
        collectors.push(CollectorSpec {
            name: "WebSearchAgent".into(),
            query: "cybersecurity threat reports published since {since}: ransomware, phishing, \
                    vulnerabilities, threat actors, targeted industries"
                .into(),
            timeout_secs: None,
            kind: CollectorKind::WebSearch {
                endpoint,
                api_key_env: Some("EXA_API_KEY".into()),
                max_results: 10,
            },
        });
    }

    if let Ok(endpoint) = Url::parse("https://api.x.com/2/tweets/search/recent") {
        collectors.push(CollectorSpec {
            name: "XAnalysisAgent".into(),
            query: "(ransomware OR phishing OR \"zero-day\" OR APT OR CVE) -is:retweet".into(),
            timeout_secs: None,
            kind: CollectorKind::SocialPosts {
                endpoint,
                api_key_env: Some("X_BEARER_TOKEN".into()),
                max_results: 25,
            },
        });
    }

    let feeds: Vec<FeedSource> = [
        feed("NVD", "https://nvd.nist.gov/feeds/xml/cve/misc/nvd-rss.xml"),
        feed("US-CERT", "https://www.cisa.gov/uscert/ncas/alerts.xml"),
    ]
    .into_iter()
    .flatten()
    .collect();

    collectors.push(CollectorSpec {
        name: "FeedReaderAgent".into(),
        query: "recent vulnerabilities and alerts since {since}".into(),
        timeout_secs: None,
        kind: CollectorKind::Feed {
            feeds,
            max_items: 10,
        },
    });

    collectors
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime run configuration, merged from config file and CLI flags.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Global deadline for the collection phase.
    pub deadline: Duration,
    /// Entity cap per section (always ≥ [`MIN_ENTITIES_PER_SECTION`]).
    pub max_entities_per_section: usize,
    /// Report header line.
    pub header: String,
}

impl From<&AppConfig> for RunConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            deadline: Duration::from_secs(config.defaults.deadline_secs),
            max_entities_per_section: config
                .defaults
                .max_entities_per_section
                .max(MIN_ENTITIES_PER_SECTION),
            header: config.defaults.header.clone(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Check invariants the rest of the system relies on.
    pub fn validate(&self) -> Result<()> {
        validate_collectors(&self.collectors)?;
        validate_table_name(&self.storage.table)?;
        if !(1..=MAX_DEADLINE_SECS).contains(&self.defaults.deadline_secs) {
            return Err(ThreatIntelError::config(format!(
                "defaults.deadline_secs must be between 1 and {MAX_DEADLINE_SECS}"
            )));
        }
        Ok(())
    }
}

/// Collector names must be unique and at least one collector must be registered.
pub fn validate_collectors(specs: &[CollectorSpec]) -> Result<()> {
    if specs.is_empty() {
        return Err(ThreatIntelError::config("at least one collector must be configured"));
    }

    let mut seen = HashSet::new();
    for spec in specs {
        if spec.name.trim().is_empty() {
            return Err(ThreatIntelError::config("collector name must not be empty"));
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(ThreatIntelError::config(format!(
                "duplicate collector name: {}",
                spec.name
            )));
        }
        if let CollectorKind::Feed { feeds, .. } = &spec.kind {
            if feeds.is_empty() {
                return Err(ThreatIntelError::config(format!(
                    "feed collector {} has no feeds",
                    spec.name
                )));
            }
        }
    }
    Ok(())
}

/// The table name is interpolated into SQL, so only plain identifiers are accepted.
pub fn validate_table_name(table: &str) -> Result<()> {
    if SQL_IDENT.is_match(table) {
        Ok(())
    } else {
        Err(ThreatIntelError::config(format!(
            "storage.table {table:?} is not a plain SQL identifier"
        )))
    }
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(location: &str) -> PathBuf {
    match location.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(location)),
        None => PathBuf::from(location),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.threatintel/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ThreatIntelError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.threatintel/threatintel.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ThreatIntelError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ThreatIntelError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ThreatIntelError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ThreatIntelError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ThreatIntelError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
