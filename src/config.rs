//! Configuration management for the xCall tracker
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::chain::{ChainId, ChainKind};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    pub instance_id: String,
    /// Interval of the source/destination transfer poller
    pub poll_interval_ms: u64,
    /// Attempts of the wait-for-inclusion retry
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub health_check_interval_secs: u64,
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            instance_id: "xcall-tracker".to_string(),
            poll_interval_ms: 1000,
            max_retries: 10,
            retry_delay_ms: 1000,
            health_check_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    pub tick_interval_ms: u64,
    pub height_refresh_interval_ms: u64,
}

impl ScannerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn height_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.height_refresh_interval_ms)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            height_refresh_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeConfig {
    pub cache_ttl_secs: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Static descriptor of one chain, loaded once
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// xCall network id, e.g. `0x1.icon`
    pub id: ChainId,
    pub name: String,
    pub kind: ChainKind,
    pub rpc_urls: Vec<String>,
    /// Cosmos REST endpoint (smart queries, bank balances)
    #[serde(default)]
    pub lcd_url: Option<String>,
    /// Native chain id: ICON nid, EVM chain id or Cosmos chain-id
    pub network_id: String,
    pub contracts: ContractAddresses,
    pub native_currency: NativeCurrency,
    /// Minimum native balance (in whole units) considered enough for gas
    #[serde(default)]
    pub gas_threshold: f64,
    #[serde(default = "default_true")]
    pub auto_execution: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractAddresses {
    pub xcall: String,
    #[serde(default)]
    pub asset_manager: Option<String>,
    /// Stable coin with native cross-chain transfer support
    #[serde(default)]
    pub bnusd: Option<String>,
    #[serde(default)]
    pub amm: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NativeCurrency {
    pub symbol: String,
    pub decimals: u8,
    #[serde(default)]
    pub denom: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding the EVM signing key
    pub evm_private_key_env: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("XCALL_TRACKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` references
    pub fn parse(config_str: &str) -> Result<Self> {
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        // At least one chain must be enabled
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        let mut seen = std::collections::HashSet::new();
        for (name, chain) in &self.chains {
            if !chain.enabled {
                continue;
            }
            if !seen.insert(chain.id.clone()) {
                anyhow::bail!("Chain id {} is configured more than once", chain.id);
            }
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.contracts.xcall.is_empty() {
                anyhow::bail!("Chain {} has no xCall contract configured", name);
            }
            if chain.kind == ChainKind::Cosmos && chain.lcd_url.is_none() {
                anyhow::bail!("Cosmos chain {} needs an lcd_url", name);
            }
            if chain.contracts.asset_manager.is_none() && chain.contracts.bnusd.is_none() {
                tracing::warn!("Chain {} has no transfer contracts - tracking only", name);
            }
        }

        if self.scanner.tick_interval_ms == 0 || self.scanner.height_refresh_interval_ms == 0 {
            anyhow::bail!("Scanner intervals must be non-zero");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by xCall network id
    pub fn get_chain_by_id(&self, chain_id: &ChainId) -> Option<&ChainConfig> {
        self.chains
            .values()
            .find(|c| c.enabled && &c.id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
