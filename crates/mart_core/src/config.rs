use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

const ENV_RPC_URL: &str = "MART_RPC_URL";
const ENV_CONTRACT_ADDRESS: &str = "MART_CONTRACT_ADDRESS";
const ENV_CHAIN_ID: &str = "MART_CHAIN_ID";
const ENV_ABI_PATH: &str = "MART_ABI_PATH";

/// Problems found by [`MartConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("no contract address configured (set `contract_address` or {ENV_CONTRACT_ADDRESS})")]
    MissingContractAddress,

    #[error("invalid contract address: {0}")]
    InvalidContractAddress(String),

    #[error("ABI file not found: {0}")]
    MissingAbiFile(String),
}

// ---------------------------------------------------------------------------
// MartConfig
// ---------------------------------------------------------------------------

/// Storefront configuration stored at `~/.decentralmart/config.json`.
///
/// Everything the integration layer needs to reach the marketplace contract:
/// the node endpoint, the contract address and its interface descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MartConfig {
    // Network
    pub rpc_url: String,
    pub chain_id: u64,
    pub request_timeout_secs: u64,

    // Contract
    pub contract_address: Option<String>,
    /// JSON ABI on disk. `None` uses the ABI bundled with `mart_chain`.
    pub abi_path: Option<PathBuf>,

    // Polling
    pub receipt_poll_interval_ms: u64,
    pub account_poll_interval_secs: u64,

    // General
    pub log_level: String,
}

impl Default for MartConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".into(),
            chain_id: 31337,
            request_timeout_secs: 30,
            contract_address: None,
            abi_path: None,
            receipt_poll_interval_ms: 1000,
            account_poll_interval_secs: 2,
            log_level: "info".into(),
        }
    }
}

impl MartConfig {
    /// Returns the base config directory: `~/.decentralmart/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".decentralmart"))
    }

    /// Returns the config file path: `~/.decentralmart/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.decentralmart/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Ensures all required directories exist.
    pub fn ensure_dirs() -> Result<()> {
        for dir in [Self::base_dir()?, Self::logs_dir()?] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            }
        }
        Ok(())
    }

    /// Loads config from disk, or creates default if missing.
    pub fn load() -> Result<Self> {
        Self::ensure_dirs()?;
        let path = Self::config_path()?;
        Self::load_from_path(&path)
    }

    /// Load config from a specific file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Self =
                serde_json::from_str(&content).with_context(|| "Failed to parse config.json")?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to_path(path)?;
            info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Save config to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Overlay `MART_*` environment variables on top of the file values.
    pub fn apply_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.rpc_url = url;
        }
        if let Some(address) = lookup(ENV_CONTRACT_ADDRESS) {
            self.contract_address = Some(address);
        }
        if let Some(raw) = lookup(ENV_CHAIN_ID) {
            match raw.parse::<u64>() {
                Ok(id) => self.chain_id = id,
                Err(e) => warn!("Ignoring {ENV_CHAIN_ID}={raw}: {e}"),
            }
        }
        if let Some(path) = lookup(ENV_ABI_PATH) {
            self.abi_path = Some(PathBuf::from(path));
        }
    }

    /// Check the values needed before any contract call can be made.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !validate_url(&self.rpc_url) {
            return Err(ConfigError::InvalidRpcUrl(self.rpc_url.clone()));
        }
        let address = self
            .contract_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or(ConfigError::MissingContractAddress)?;
        if !is_hex_address(address) {
            return Err(ConfigError::InvalidContractAddress(address.to_string()));
        }
        if let Some(path) = &self.abi_path {
            if !path.exists() {
                return Err(ConfigError::MissingAbiFile(path.display().to_string()));
            }
        }
        Ok(())
    }
}

/// Validate that a URL is well-formed and uses HTTP or HTTPS.
pub fn validate_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            (scheme == "http" || scheme == "https") && parsed.host().is_some()
        }
        Err(_) => false,
    }
}

fn is_hex_address(s: &str) -> bool {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const ADDRESS: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn valid_config() -> MartConfig {
        MartConfig {
            contract_address: Some(ADDRESS.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = MartConfig::default();
        assert_eq!(config.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(config.chain_id, 31337);
        assert!(config.contract_address.is_none());
        assert!(config.abi_path.is_none());
        assert_eq!(config.receipt_poll_interval_ms, 1000);
    }

    #[test]
    fn test_load_missing_creates_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");

        let config = MartConfig::load_from_path(&path).unwrap();
        assert_eq!(config, MartConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_save_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");

        let mut original = valid_config();
        original.chain_id = 11155111;
        original.rpc_url = "https://rpc.sepolia.example.com".into();
        original.save_to_path(&path).unwrap();

        let loaded = MartConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{ "chain_id": 1 }"#).unwrap();

        let loaded = MartConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.chain_id, 1);
        assert_eq!(loaded.rpc_url, "http://127.0.0.1:8545");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(MartConfig::load_from_path(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_RPC_URL, "https://node.example.com"),
            (ENV_CONTRACT_ADDRESS, ADDRESS),
            (ENV_CHAIN_ID, "8453"),
        ]
        .into_iter()
        .collect();

        let mut config = MartConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.rpc_url, "https://node.example.com");
        assert_eq!(config.contract_address.as_deref(), Some(ADDRESS));
        assert_eq!(config.chain_id, 8453);
        assert!(config.abi_path.is_none());
    }

    #[test]
    fn test_bad_chain_id_override_is_ignored() {
        let mut config = MartConfig::default();
        config.apply_overrides(|key| (key == ENV_CHAIN_ID).then(|| "mainnet".to_string()));
        assert_eq!(config.chain_id, 31337);
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert_eq!(valid_config().validate(), Ok(()));
    }

    #[test]
    fn test_validate_requires_contract_address() {
        let config = MartConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::MissingContractAddress));

        let blank = MartConfig {
            contract_address: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(blank.validate(), Err(ConfigError::MissingContractAddress));
    }

    #[test]
    fn test_validate_rejects_malformed_address() {
        let config = MartConfig {
            contract_address: Some("0x1234".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidContractAddress(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_rpc_url() {
        let config = MartConfig {
            rpc_url: "ws://127.0.0.1:8545".into(),
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRpcUrl(_))));
    }

    #[test]
    fn test_validate_rejects_missing_abi_file() {
        let config = MartConfig {
            abi_path: Some(PathBuf::from("/definitely/not/here/abi.json")),
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingAbiFile(_))));
    }

    #[test]
    fn test_validate_url_accepts_http_and_https() {
        assert!(validate_url("https://rpc.example.com"));
        assert!(validate_url("http://localhost:8545"));
    }

    #[test]
    fn test_validate_url_rejects_garbage() {
        assert!(!validate_url(""));
        assert!(!validate_url("not a url"));
        assert!(!validate_url("ftp://server.com"));
        assert!(!validate_url("file:///etc/passwd"));
    }
}
