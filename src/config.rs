//! Runtime configuration for cl-sentinel
//!
//! Settings come from the environment (and `.env`), or from a TOML file
//! with the same shape. RPC endpoints and price listing URLs can be
//! overridden per exchange; everything else about an exchange is built in.

use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::chain::CachePolicy;
use crate::exchanges::{Exchange, ExchangeDescriptor, ExchangeRegistry};

/// `DATABASE_PATH` value selecting the in-process ledger
pub const MEMORY_DATABASE: &str = ":memory:";

// ============================================
// MAIN CONFIGURATION
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ========== Storage ==========
    /// SQLite file, or `:memory:`
    pub database_path: String,

    // ========== Timing ==========
    /// Seconds between range sweeps in watch mode
    pub poll_interval_secs: u64,

    /// Timeout for price listing requests
    pub http_timeout_secs: u64,

    /// Token metadata lifetime, 0 keeps entries for the whole process
    pub metadata_max_age_secs: u64,

    // ========== Per-exchange overrides ==========
    /// Exchange name -> RPC URL
    pub rpc_urls: BTreeMap<String, String>,

    /// Exchange name -> token price listing URL
    pub price_apis: BTreeMap<String, String>,
}

impl Config {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self::from_lookup(|key| env::var(key).ok()))
    }

    /// Build from any key lookup; missing or unparseable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let mut rpc_urls = BTreeMap::new();
        let mut price_apis = BTreeMap::new();
        for exchange in Exchange::ALL {
            if let Some(url) = lookup(exchange.rpc_env_var()).filter(|v| !v.trim().is_empty()) {
                rpc_urls.insert(exchange.as_str().to_string(), url.trim().to_string());
            }
            if let Some(url) = lookup(&exchange.price_env_var()).filter(|v| !v.trim().is_empty()) {
                price_apis.insert(exchange.as_str().to_string(), url.trim().to_string());
            }
        }

        Self {
            database_path: lookup("DATABASE_PATH").unwrap_or(defaults.database_path),
            poll_interval_secs: lookup("POLL_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.poll_interval_secs),
            http_timeout_secs: lookup("HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            metadata_max_age_secs: lookup("METADATA_MAX_AGE_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.metadata_max_age_secs),
            rpc_urls,
            price_apis,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_path.trim().is_empty() {
            return Err(eyre!("DATABASE_PATH must not be empty"));
        }
        if self.poll_interval_secs == 0 {
            return Err(eyre!("POLL_INTERVAL_SECS must be at least 1"));
        }
        if self.http_timeout_secs == 0 {
            return Err(eyre!("HTTP_TIMEOUT_SECS must be at least 1"));
        }

        for (name, url) in self.rpc_urls.iter().chain(&self.price_apis) {
            name.parse::<Exchange>()?;
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(eyre!("{} override {} is not an http(s) URL", name, url));
            }
        }

        Ok(())
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_path == MEMORY_DATABASE
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn cache_policy(&self) -> CachePolicy {
        match self.metadata_max_age_secs {
            0 => CachePolicy::NeverEvict,
            secs => CachePolicy::MaxAge(Duration::from_secs(secs)),
        }
    }

    /// Built-in descriptors with this configuration's overrides applied
    pub fn registry(&self) -> Result<ExchangeRegistry> {
        let mut descriptors: BTreeMap<Exchange, ExchangeDescriptor> = Exchange::ALL
            .into_iter()
            .map(|exchange| (exchange, ExchangeDescriptor::builtin(exchange)))
            .collect();

        for (name, url) in &self.rpc_urls {
            let exchange: Exchange = name.parse()?;
            if let Some(descriptor) = descriptors.get_mut(&exchange) {
                descriptor.rpc_url = url.clone();
            }
        }
        for (name, url) in &self.price_apis {
            let exchange: Exchange = name.parse()?;
            if let Some(descriptor) = descriptors.get_mut(&exchange) {
                descriptor.price_api = Some(url.clone());
            }
        }

        Ok(ExchangeRegistry::from_descriptors(descriptors.into_values()))
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║                 CL SENTINEL - CONFIGURATION                ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Ledger:            {:<40} ║", self.database_path);
        println!("║ Poll Interval:     {:<40} ║", format!("{}s", self.poll_interval_secs));
        println!("║ HTTP Timeout:      {:<40} ║", format!("{}s", self.http_timeout_secs));
        println!("║ Metadata Max Age:  {:<40} ║", match self.metadata_max_age_secs {
            0 => "never evicted".to_string(),
            secs => format!("{}s", secs),
        });
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ OVERRIDES                                                  ║");
        println!("║ • RPC URLs:        {:<40} ║", self.rpc_urls.len());
        println!("║ • Price APIs:      {:<40} ║", self.price_apis.len());
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "./data/positions.db".to_string(),
            poll_interval_secs: 60,
            http_timeout_secs: 10,
            metadata_max_age_secs: 0,
            rpc_urls: BTreeMap::new(),
            price_apis: BTreeMap::new(),
        }
    }
}

// ============================================
// TESTS
// ============================================
