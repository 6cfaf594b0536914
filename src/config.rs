//! Configuration for the transfer pipeline
//!
//! Loaded from TOML with environment overrides. Everything here is immutable
//! once constructed: a different network profile means a new component
//! graph, not a flag flipped inside a running one.

use crate::fees::FeeSchedule;
use crate::retry::BackoffPolicy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable selecting the target network
pub const NETWORK_ENV: &str = "LEDGER_NETWORK";
/// Comma separated ledger endpoint URLs
pub const ENDPOINTS_ENV: &str = "LEDGER_RPC_ENDPOINTS";
/// Base58 sponsor public key
pub const SPONSOR_PUBKEY_ENV: &str = "SPONSOR_PUBKEY";

/// Configuration-related errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid address for {field}: {value}")]
    InvalidAddress { field: String, value: String },
}

/// Which ledger the pipeline talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Production,
    Test,
}

impl NetworkKind {
    /// Interpret a network flag. Fails closed: anything that is not an
    /// explicit production name selects the test network.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag.map(|f| f.trim().to_ascii_lowercase()).as_deref() {
            Some("mainnet") | Some("mainnet-beta") | Some("production") => NetworkKind::Production,
            _ => NetworkKind::Test,
        }
    }

    pub fn from_env() -> Self {
        Self::from_flag(std::env::var(NETWORK_ENV).ok().as_deref())
    }

    pub fn is_production(&self) -> bool {
        matches!(self, NetworkKind::Production)
    }
}

/// Timeouts, retry budgets and leniency for one network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub kind: NetworkKind,

    /// Client-side maximum age of a recent-block reference
    pub max_reference_age_ms: u64,

    /// Sponsor rejects references this close (in block heights) to expiry
    pub sponsor_safety_margin_blocks: u64,

    /// Quick confirmation phase length; zero skips the phase
    pub quick_phase_window_ms: u64,
    pub quick_phase_interval_ms: u64,

    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,

    /// Delay before the single fallback status check
    pub fallback_grace_ms: u64,

    /// Consecutive rate-limited polls before the tracker rotates endpoints
    pub rate_limit_rotation_threshold: u32,

    /// Report success when a submission identifier exists and no on-chain
    /// error was ever observed. Production only.
    pub lenient_confirmation: bool,

    pub backoff: BackoffPolicy,

    /// Requests an endpoint serves before the pool may rotate away again
    pub endpoint_min_dwell: u32,

    pub compute_unit_price_micro_lamports: u64,
    pub compute_unit_limit: u32,
}

impl NetworkProfile {
    pub fn production() -> Self {
        Self {
            kind: NetworkKind::Production,
            max_reference_age_ms: 45_000,
            sponsor_safety_margin_blocks: 20,
            quick_phase_window_ms: 0,
            quick_phase_interval_ms: 0,
            poll_interval_ms: 3_000,
            max_poll_attempts: 10,
            fallback_grace_ms: 10_000,
            rate_limit_rotation_threshold: 3,
            lenient_confirmation: true,
            backoff: BackoffPolicy::production(),
            endpoint_min_dwell: 3,
            compute_unit_price_micro_lamports: 5_000,
            compute_unit_limit: 80_000,
        }
    }

    pub fn test_network() -> Self {
        Self {
            kind: NetworkKind::Test,
            max_reference_age_ms: 45_000,
            sponsor_safety_margin_blocks: 20,
            quick_phase_window_ms: 3_000,
            quick_phase_interval_ms: 500,
            poll_interval_ms: 1_000,
            max_poll_attempts: 15,
            fallback_grace_ms: 3_000,
            rate_limit_rotation_threshold: 3,
            lenient_confirmation: false,
            backoff: BackoffPolicy::test_network(),
            endpoint_min_dwell: 1,
            compute_unit_price_micro_lamports: 0,
            compute_unit_limit: 80_000,
        }
    }

    pub fn for_kind(kind: NetworkKind) -> Self {
        match kind {
            NetworkKind::Production => Self::production(),
            NetworkKind::Test => Self::test_network(),
        }
    }

    /// Profile with confirmation leniency switched on or off
    pub fn with_lenient_confirmation(mut self, lenient: bool) -> Result<Self, ConfigError> {
        self.lenient_confirmation = lenient;
        self.validate()?;
        Ok(self)
    }

    pub fn max_reference_age(&self) -> Duration {
        Duration::from_millis(self.max_reference_age_ms)
    }

    pub fn quick_phase_window(&self) -> Duration {
        Duration::from_millis(self.quick_phase_window_ms)
    }

    pub fn quick_phase_interval(&self) -> Duration {
        Duration::from_millis(self.quick_phase_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fallback_grace(&self) -> Duration {
        Duration::from_millis(self.fallback_grace_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lenient_confirmation && !self.kind.is_production() {
            return Err(ConfigError::Validation(
                "lenient confirmation is only allowed on a production profile".to_string(),
            ));
        }
        if self.max_reference_age_ms == 0 {
            return Err(ConfigError::Validation(
                "max_reference_age_ms must be > 0".to_string(),
            ));
        }
        if self.sponsor_safety_margin_blocks >= crate::ledger::REFERENCE_LIFETIME_BLOCKS {
            return Err(ConfigError::Validation(format!(
                "sponsor_safety_margin_blocks must be below {}",
                crate::ledger::REFERENCE_LIFETIME_BLOCKS
            )));
        }
        if self.quick_phase_window_ms > 0 && self.quick_phase_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "quick_phase_interval_ms must be > 0 when the quick phase is enabled".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 || self.max_poll_attempts == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_ms and max_poll_attempts must be > 0".to_string(),
            ));
        }
        self.backoff.validate().map_err(ConfigError::Validation)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network flag; same values as `LEDGER_NETWORK`
    #[serde(default)]
    pub name: Option<String>,

    /// Override the profile's confirmation leniency
    #[serde(default)]
    pub lenient_confirmation: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Primary first, then fallbacks
    pub endpoints: Vec<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SponsorConfig {
    #[serde(with = "pubkey_string")]
    pub public_key: Pubkey,

    /// Owner of the token account receiving service fees
    #[serde(with = "pubkey_string")]
    pub treasury: Pubkey,

    /// Remote co-signing service; `None` means an in-process coordinator
    #[serde(default)]
    pub service_url: Option<String>,

    #[serde(default = "default_global_rps")]
    pub global_rps: u32,

    #[serde(default = "default_per_sender_per_minute")]
    pub per_sender_per_minute: u32,

    #[serde(default = "default_max_compute_unit_price")]
    pub max_compute_unit_price: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(with = "pubkey_string")]
    pub mint: Pubkey,

    pub decimals: u8,

    #[serde(with = "pubkey_string", default = "default_token_program")]
    pub token_program: Pubkey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessConfig {
    /// Overrides the profile's client-side maximum reference age
    #[serde(default)]
    pub max_reference_age_ms: Option<u64>,

    #[serde(default = "default_max_rebuilds")]
    pub max_rebuilds: u32,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            max_reference_age_ms: None,
            max_rebuilds: default_max_rebuilds(),
        }
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    pub ledger: LedgerConfig,

    pub sponsor: SponsorConfig,

    pub token: TokenConfig,

    #[serde(default)]
    pub fees: FeeSchedule,

    #[serde(default)]
    pub freshness: FreshnessConfig,
}

// Default value functions
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_global_rps() -> u32 { 50 }
fn default_per_sender_per_minute() -> u32 { 20 }
fn default_max_compute_unit_price() -> u64 { 100_000 }
fn default_max_rebuilds() -> u32 { 3 }
fn default_token_program() -> Pubkey { spl_token::id() }

impl PipelineConfig {
    /// Minimal configuration for one endpoint and a token mint
    pub fn new(endpoints: Vec<String>, sponsor: Pubkey, treasury: Pubkey, mint: Pubkey, decimals: u8) -> Self {
        Self {
            network: NetworkConfig::default(),
            ledger: LedgerConfig {
                endpoints,
                request_timeout_ms: default_request_timeout_ms(),
            },
            sponsor: SponsorConfig {
                public_key: sponsor,
                treasury,
                service_url: None,
                global_rps: default_global_rps(),
                per_sender_per_minute: default_per_sender_per_minute(),
                max_compute_unit_price: default_max_compute_unit_price(),
            },
            token: TokenConfig {
                mint,
                decimals,
                token_program: default_token_program(),
            },
            fees: FeeSchedule::default(),
            freshness: FreshnessConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        let config: PipelineConfig =
            toml::from_str(&content).with_context(|| format!("failed to parse {path}"))?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LEDGER_NETWORK`, `LEDGER_RPC_ENDPOINTS` and `SPONSOR_PUBKEY`
    /// from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(network) = lookup(NETWORK_ENV) {
            self.network.name = Some(network);
        }

        if let Some(endpoints) = lookup(ENDPOINTS_ENV) {
            let urls: Vec<String> = endpoints
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if urls.is_empty() {
                return Err(ConfigError::Validation(format!("{ENDPOINTS_ENV} is empty")));
            }
            self.ledger.endpoints = urls;
        }

        if let Some(sponsor) = lookup(SPONSOR_PUBKEY_ENV) {
            self.sponsor.public_key =
                Pubkey::from_str(sponsor.trim()).map_err(|_| ConfigError::InvalidAddress {
                    field: SPONSOR_PUBKEY_ENV.to_string(),
                    value: sponsor.clone(),
                })?;
        }

        Ok(())
    }

    pub fn network_kind(&self) -> NetworkKind {
        NetworkKind::from_flag(self.network.name.as_deref())
    }

    /// Resolve the network profile with configured overrides applied
    pub fn network_profile(&self) -> Result<NetworkProfile, ConfigError> {
        let mut profile = NetworkProfile::for_kind(self.network_kind());
        if let Some(age) = self.freshness.max_reference_age_ms {
            profile.max_reference_age_ms = age;
        }
        if let Some(lenient) = self.network.lenient_confirmation {
            profile.lenient_confirmation = lenient;
        }
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.endpoints.is_empty() {
            return Err(ConfigError::Validation(
                "At least one ledger endpoint must be configured".to_string(),
            ));
        }

        let mut seen_urls = std::collections::HashSet::new();
        for url in &self.ledger.endpoints {
            if !seen_urls.insert(url) {
                return Err(ConfigError::Validation(format!("Duplicate ledger URL: {url}")));
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!("Invalid URL format: {url}")));
            }
        }

        if let Some(service_url) = &self.sponsor.service_url {
            if !service_url.starts_with("http://") && !service_url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "Invalid sponsor service URL: {service_url}"
                )));
            }
        }
        if self.sponsor.public_key == Pubkey::default() {
            return Err(ConfigError::InvalidAddress {
                field: "sponsor.public_key".to_string(),
                value: self.sponsor.public_key.to_string(),
            });
        }
        if self.sponsor.global_rps == 0 || self.sponsor.per_sender_per_minute == 0 {
            return Err(ConfigError::Validation(
                "sponsor rate limits must be > 0".to_string(),
            ));
        }

        self.fees
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        self.network_profile()?;
        Ok(())
    }
}

/// Serialize a `Pubkey` as its base58 string
pub mod pubkey_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&key.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let s = String::deserialize(deserializer)?;
        Pubkey::from_str(&s).map_err(serde::de::Error::custom)
    }
}
