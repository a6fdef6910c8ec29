use crate::minhash::{MinHashParams, DEFAULT_NUM_HASHES, DEFAULT_SEED};
use crate::tokenizer::DEFAULT_SHINGLE_SIZE;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Minimum length of a usable secret for signed links.
pub const MIN_SECRET_LEN: usize = 16;
const DEV_SECRET: &str = "dev-secret-change-in-production";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_draft_ttl_secs")]
    pub draft_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: default_data_dir(), draft_ttl_secs: default_draft_ttl_secs() }
    }
}

impl StorageConfig {
    pub fn draft_ttl(&self) -> Duration {
        Duration::from_secs(self.draft_ttl_secs)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_draft_ttl_secs() -> u64 {
    24 * 60 * 60
}

/// Parameters that must be identical on the upload and the check path.
/// Changing any of them makes previously stored signatures incomparable.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintConfig {
    #[serde(default = "default_shingle_size")]
    pub shingle_size: usize,
    #[serde(default = "default_num_hashes")]
    pub num_hashes: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            shingle_size: default_shingle_size(),
            num_hashes: default_num_hashes(),
            seed: default_seed(),
        }
    }
}

impl FingerprintConfig {
    pub fn minhash_params(&self) -> MinHashParams {
        MinHashParams { num_hashes: self.num_hashes, seed: self.seed }
    }
}

fn default_shingle_size() -> usize {
    DEFAULT_SHINGLE_SIZE
}
fn default_num_hashes() -> usize {
    DEFAULT_NUM_HASHES
}
fn default_seed() -> u64 {
    DEFAULT_SEED
}

#[derive(Debug, Deserialize, Clone)]
pub struct CheckConfig {
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    /// Categories in one group are always searched together.
    #[serde(default = "default_overlap_groups")]
    pub overlap_groups: Vec<Vec<String>>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            min_content_chars: default_min_content_chars(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            overlap_groups: default_overlap_groups(),
        }
    }
}

fn default_min_content_chars() -> usize {
    50
}
fn default_top_k() -> usize {
    5
}
fn default_max_top_k() -> usize {
    100
}
fn default_overlap_groups() -> Vec<Vec<String>> {
    vec![vec!["coursework".to_string(), "diploma".to_string()]]
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AccessConfig {
    #[serde(default)]
    pub secret: Option<String>,
}

impl AccessConfig {
    /// Secret for signed links: `REPORT_ACCESS_SECRET`, then the config file,
    /// then a development default. Secrets shorter than [`MIN_SECRET_LEN`] are
    /// ignored.
    pub fn resolve_secret(&self) -> String {
        let from_env = std::env::var("REPORT_ACCESS_SECRET").ok();
        for candidate in [from_env.as_deref(), self.secret.as_deref()].into_iter().flatten() {
            if candidate.len() >= MIN_SECRET_LEN {
                return candidate.to_string();
            }
        }
        tracing::warn!("no access secret of at least {MIN_SECRET_LEN} chars configured; using development secret");
        DEV_SECRET.to_string()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if given, otherwise defaults; then apply `SIMCHECK_DATA_DIR`.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) => load_config(p)?,
        None => Config::default(),
    };
    if let Ok(dir) = std::env::var("SIMCHECK_DATA_DIR") {
        if !dir.trim().is_empty() {
            config.storage.data_dir = PathBuf::from(dir);
        }
    }
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.fingerprint.shingle_size == 0 {
        anyhow::bail!("fingerprint.shingle_size must be > 0");
    }
    if config.fingerprint.num_hashes == 0 {
        anyhow::bail!("fingerprint.num_hashes must be > 0");
    }
    if config.storage.draft_ttl_secs == 0 {
        anyhow::bail!("storage.draft_ttl_secs must be > 0");
    }
    if config.check.default_top_k < 1 {
        anyhow::bail!("check.default_top_k must be >= 1");
    }
    if config.check.max_top_k < config.check.default_top_k {
        anyhow::bail!("check.max_top_k must be >= check.default_top_k");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.fingerprint, FingerprintConfig::default());
        assert_eq!(config.fingerprint.num_hashes, 128);
        assert_eq!(config.fingerprint.shingle_size, 5);
        assert_eq!(config.storage.draft_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.check.overlap_groups, vec![vec!["coursework", "diploma"]]);
        validate(&config).unwrap();
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [fingerprint]
            seed = 7

            [check]
            overlap_groups = [["lab", "practice"], ["coursework", "diploma"]]
            "#,
        )
        .unwrap();
        assert_eq!(config.fingerprint.seed, 7);
        assert_eq!(config.fingerprint.num_hashes, 128);
        assert_eq!(config.check.overlap_groups.len(), 2);
        assert_eq!(config.check.min_content_chars, 50);
    }

    #[test]
    fn load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[fingerprint]\nnum_hashes = 0").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("num_hashes"));
    }

    #[test]
    fn short_configured_secret_is_ignored() {
        let access = AccessConfig { secret: Some("short".into()) };
        if std::env::var("REPORT_ACCESS_SECRET").is_err() {
            assert_eq!(access.resolve_secret(), DEV_SECRET);
        }
        let access = AccessConfig { secret: Some("a-long-enough-secret-value".into()) };
        if std::env::var("REPORT_ACCESS_SECRET").is_err() {
            assert_eq!(access.resolve_secret(), "a-long-enough-secret-value");
        }
    }
}
