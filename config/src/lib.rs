//! Shroud Configuration
//!
//! Shared configuration crate for all Shroud components.
//!
//! Handles loading configuration from:
//! 1. SHROUD_CONFIG env var (explicit path)
//! 2. ~/.shroud/config.toml (user home)
//! 3. ./config.toml (current directory)
//!
//! Environment variables take precedence over TOML config.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::{env, fs};

use shroud_privacy::denomination::{DEFAULT_DENOMINATIONS, DenominationSet, MAX_DENOMINATIONS};
use shroud_privacy::MAX_TREE_DEPTH;

/// Global config instance for convenience access
pub static GLOBAL_CONFIG: OnceLock<ShroudConfig> = OnceLock::new();

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_NAME: &str = ".shroud";
const CONFIG_ENV: &str = "SHROUD_CONFIG";

// ============================================================================
// Default Constants
// ============================================================================

const DEFAULT_COORDINATOR_URL: &str = "127.0.0.1:8470";
const DEFAULT_JOIN_DELAY_MIN_SECS: u64 = 5;
const DEFAULT_JOIN_DELAY_MAX_SECS: u64 = 35;
const DEFAULT_SUBMISSION_JITTER_MAX_SECS: u64 = 3;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_BASE_MS: u64 = 2000;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MIN_RSA_BITS: u64 = 2048;

const DEFAULT_TREE_DEPTH: usize = 8;
const DEFAULT_ROOT_HISTORY: usize = 30;

const DEFAULT_BATCH_THRESHOLD: usize = 3;
const DEFAULT_MAX_BATCH_AGE_SECS: u64 = 600;

const DEFAULT_SETTLEMENT_RETRIES: u32 = 5;
const DEFAULT_SETTLEMENT_RETRY_MS: u64 = 1000;
const DEFAULT_STATUS_CACHE_TTL_SECS: u64 = 15;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

const DEFAULT_DB_PATH: &str = "./shroud-db";

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShroudConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub denominations: DenominationsConfig,
}

/// CoinJoin coordinator connection and session timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_coordinator_url")]
    pub url: String,
    #[serde(default = "default_join_delay_min")]
    pub join_delay_min_secs: u64,
    #[serde(default = "default_join_delay_max")]
    pub join_delay_max_secs: u64,
    #[serde(default = "default_submission_jitter_max")]
    pub submission_jitter_max_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_min_rsa_bits")]
    pub min_rsa_bits: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_COORDINATOR_URL.into(),
            join_delay_min_secs: DEFAULT_JOIN_DELAY_MIN_SECS,
            join_delay_max_secs: DEFAULT_JOIN_DELAY_MAX_SECS,
            submission_jitter_max_secs: DEFAULT_SUBMISSION_JITTER_MAX_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            min_rsa_bits: DEFAULT_MIN_RSA_BITS,
        }
    }
}

fn default_coordinator_url() -> String {
    DEFAULT_COORDINATOR_URL.into()
}
fn default_join_delay_min() -> u64 {
    DEFAULT_JOIN_DELAY_MIN_SECS
}
fn default_join_delay_max() -> u64 {
    DEFAULT_JOIN_DELAY_MAX_SECS
}
fn default_submission_jitter_max() -> u64 {
    DEFAULT_SUBMISSION_JITTER_MAX_SECS
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_retry_base_ms() -> u64 {
    DEFAULT_RETRY_BASE_MS
}
fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}
fn default_min_rsa_bits() -> u64 {
    DEFAULT_MIN_RSA_BITS
}

/// Merkle accumulator shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default = "default_tree_depth")]
    pub depth: usize,
    #[serde(default = "default_root_history")]
    pub root_history: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_TREE_DEPTH,
            root_history: DEFAULT_ROOT_HISTORY,
        }
    }
}

fn default_tree_depth() -> usize {
    DEFAULT_TREE_DEPTH
}
fn default_root_history() -> usize {
    DEFAULT_ROOT_HISTORY
}

/// Anonymity set batching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_threshold")]
    pub threshold: usize,
    #[serde(default = "default_max_batch_age")]
    pub max_batch_age_secs: u64,
    /// Allow settling an undersized batch once it is older than `max_batch_age_secs`.
    #[serde(default)]
    pub settle_on_timeout: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_BATCH_THRESHOLD,
            max_batch_age_secs: DEFAULT_MAX_BATCH_AGE_SECS,
            settle_on_timeout: false,
        }
    }
}

fn default_batch_threshold() -> usize {
    DEFAULT_BATCH_THRESHOLD
}
fn default_max_batch_age() -> u64 {
    DEFAULT_MAX_BATCH_AGE_SECS
}

/// Ledger settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfig {
    #[serde(default = "default_settlement_retries")]
    pub max_retries: u32,
    #[serde(default = "default_settlement_retry_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_status_cache_ttl")]
    pub status_cache_ttl_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_SETTLEMENT_RETRIES,
            retry_delay_ms: DEFAULT_SETTLEMENT_RETRY_MS,
            status_cache_ttl_secs: DEFAULT_STATUS_CACHE_TTL_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

fn default_settlement_retries() -> u32 {
    DEFAULT_SETTLEMENT_RETRIES
}
fn default_settlement_retry_ms() -> u64 {
    DEFAULT_SETTLEMENT_RETRY_MS
}
fn default_status_cache_ttl() -> u64 {
    DEFAULT_STATUS_CACHE_TTL_SECS
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DB_PATH.into(),
        }
    }
}

fn default_db_path() -> String {
    DEFAULT_DB_PATH.into()
}

/// Accepted deposit amounts, in base units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationsConfig {
    #[serde(default = "default_enabled_denominations")]
    pub enabled: Vec<u64>,
    #[serde(default)]
    pub allow_custom: bool,
    #[serde(default = "default_min_denomination")]
    pub min: u64,
    #[serde(default = "default_max_denomination")]
    pub max: u64,
}

impl Default for DenominationsConfig {
    fn default() -> Self {
        let set = DenominationSet::default();
        Self {
            enabled: set.enabled,
            allow_custom: set.allow_custom,
            min: set.min,
            max: set.max,
        }
    }
}

impl DenominationsConfig {
    pub fn to_set(&self) -> DenominationSet {
        DenominationSet {
            enabled: self.enabled.clone(),
            allow_custom: self.allow_custom,
            min: self.min,
            max: self.max,
        }
    }
}

fn default_enabled_denominations() -> Vec<u64> {
    DEFAULT_DENOMINATIONS.to_vec()
}
fn default_min_denomination() -> u64 {
    DenominationSet::default().min
}
fn default_max_denomination() -> u64 {
    DenominationSet::default().max
}

// ============================================================================
// Environment Variable Helpers
// ============================================================================

/// Source of environment values; `std::env` in production.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Set field from env var if present
fn env_string(env: EnvLookup<'_>, key: &str, field: &mut String) {
    if let Some(v) = env(key) {
        *field = v;
    }
}

/// Set field from env var if present and parseable
fn env_parse<T: std::str::FromStr>(env: EnvLookup<'_>, key: &str, field: &mut T) {
    if let Some(v) = env(key) {
        match v.parse() {
            Ok(parsed) => *field = parsed,
            Err(_) => log::warn!("Ignoring unparseable value for {}", key),
        }
    }
}

/// Check if env var is set to a truthy value ("1" or "true")
fn env_bool(env: EnvLookup<'_>, key: &str) -> Option<bool> {
    env(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Comma-separated list of base-unit amounts
fn env_list(env: EnvLookup<'_>, key: &str, field: &mut Vec<u64>) {
    if let Some(v) = env(key) {
        let parsed: Result<Vec<u64>, _> = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect();
        match parsed {
            Ok(list) => *field = list,
            Err(_) => log::warn!("Ignoring unparseable value for {}", key),
        }
    }
}

// ============================================================================
// Implementation
// ============================================================================

impl ShroudConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                log::info!("Loading config from: {}", path.display());
                Self::parse_file(&path)?
            }
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::parse_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Find the config file path
    fn find_config_file() -> Option<PathBuf> {
        // 1. Check SHROUD_CONFIG env var
        if let Ok(path) = env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            log::warn!("{} points to a missing file: {}", CONFIG_ENV, path.display());
        }

        // 2. Check ~/.shroud/config.toml
        if let Some(home) = Self::default_config_path().filter(|p| p.exists()) {
            return Some(home);
        }

        // 3. Check ./config.toml (current directory)
        Some(PathBuf::from(CONFIG_FILE_NAME)).filter(|p| p.exists())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(&|key| env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from(&mut self, env: EnvLookup<'_>) {
        // Coordinator
        env_string(env, "SHROUD_COORDINATOR_URL", &mut self.coordinator.url);
        env_parse(
            env,
            "SHROUD_JOIN_DELAY_MIN_SECS",
            &mut self.coordinator.join_delay_min_secs,
        );
        env_parse(
            env,
            "SHROUD_JOIN_DELAY_MAX_SECS",
            &mut self.coordinator.join_delay_max_secs,
        );
        env_parse(env, "SHROUD_MAX_ATTEMPTS", &mut self.coordinator.max_attempts);
        env_parse(env, "SHROUD_MIN_RSA_BITS", &mut self.coordinator.min_rsa_bits);

        // Tree
        env_parse(env, "SHROUD_TREE_DEPTH", &mut self.tree.depth);
        env_parse(env, "SHROUD_ROOT_HISTORY", &mut self.tree.root_history);

        // Batch
        env_parse(env, "SHROUD_BATCH_THRESHOLD", &mut self.batch.threshold);
        env_parse(env, "SHROUD_BATCH_MAX_AGE", &mut self.batch.max_batch_age_secs);
        if let Some(v) = env_bool(env, "SHROUD_SETTLE_ON_TIMEOUT") {
            self.batch.settle_on_timeout = v;
        }

        // Settlement
        env_parse(
            env,
            "SHROUD_SETTLEMENT_RETRIES",
            &mut self.settlement.max_retries,
        );
        env_parse(
            env,
            "SHROUD_STATUS_CACHE_TTL",
            &mut self.settlement.status_cache_ttl_secs,
        );

        // Database
        env_string(env, "SHROUD_DB_PATH", &mut self.database.path);

        // Denominations
        env_list(env, "SHROUD_DENOMINATIONS", &mut self.denominations.enabled);
        if let Some(v) = env_bool(env, "SHROUD_ALLOW_CUSTOM_DENOMINATIONS") {
            self.denominations.allow_custom = v;
        }
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.tree.depth == 0 || self.tree.depth > MAX_TREE_DEPTH {
            bail!(
                "tree.depth must be between 1 and {}, got {}",
                MAX_TREE_DEPTH,
                self.tree.depth
            );
        }
        if self.tree.root_history == 0 {
            bail!("tree.root_history must be at least 1");
        }
        if self.batch.threshold == 0 {
            bail!("batch.threshold must be at least 1");
        }
        if self.coordinator.max_attempts == 0 {
            bail!("coordinator.max_attempts must be at least 1");
        }
        if self.coordinator.join_delay_min_secs > self.coordinator.join_delay_max_secs {
            bail!("coordinator.join_delay_min_secs exceeds join_delay_max_secs");
        }

        let denoms = &self.denominations;
        if denoms.min > denoms.max {
            bail!("denominations.min exceeds denominations.max");
        }
        if denoms.enabled.is_empty() && !denoms.allow_custom {
            bail!("no denominations enabled");
        }
        if denoms.enabled.len() > MAX_DENOMINATIONS {
            bail!("at most {} denominations may be enabled", MAX_DENOMINATIONS);
        }
        if let Some(bad) = denoms
            .enabled
            .iter()
            .find(|d| **d < denoms.min || **d > denoms.max)
        {
            bail!("denomination {} is outside [{}, {}]", bad, denoms.min, denoms.max);
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        let mut sample = Self::default();
        sample.batch.settle_on_timeout = true;
        toml::to_string_pretty(&sample).unwrap_or_default()
    }

    /// Get the global config instance, initializing it if necessary.
    ///
    /// Falls back to defaults if loading fails.
    pub fn global() -> &'static ShroudConfig {
        GLOBAL_CONFIG.get_or_init(|| {
            Self::load().unwrap_or_else(|e| {
                log::warn!("Failed to load config: {:#}, using defaults", e);
                Self::default()
            })
        })
    }

    /// Returns `None` if config hasn't been initialized yet.
    pub fn try_global() -> Option<&'static ShroudConfig> {
        GLOBAL_CONFIG.get()
    }

    /// Returns `Err(config)` if already initialized.
    pub fn set_global(config: ShroudConfig) -> Result<(), ShroudConfig> {
        GLOBAL_CONFIG.set(config)
    }
}

/// Shorthand for `ShroudConfig::global()`.
#[inline]
pub fn global_config() -> &'static ShroudConfig {
    ShroudConfig::global()
}

// ============================================================================
// Tests
// ============================================================================
