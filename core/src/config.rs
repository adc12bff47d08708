//! Runtime settings derived from [`ShroudConfig`].

use std::time::Duration;

use shroud_coinjoin::{JoinDelay, RunnerConfig, TcpConnector};
use shroud_config::ShroudConfig;
use shroud_privacy::{CommitmentVault, MerkleTree, PrivacyError, RootHistory};

use crate::accountant::AccountantConfig;
use crate::settlement::{BatchStatusCache, SettlerConfig};

/// Conversions from the file/env configuration into component settings.
pub trait ConfigExt {
    fn to_runner_config(&self, input_address: impl Into<String>) -> RunnerConfig;
    fn to_accountant_config(&self) -> AccountantConfig;
    fn to_settler_config(&self) -> SettlerConfig;
    fn status_cache(&self) -> BatchStatusCache;
    fn poll_interval(&self) -> Duration;
    fn connector(&self) -> TcpConnector;
    fn vault(&self) -> CommitmentVault;
    fn new_tree(&self) -> Result<MerkleTree, PrivacyError>;
    fn root_history(&self) -> RootHistory;
}

impl ConfigExt for ShroudConfig {
    fn to_runner_config(&self, input_address: impl Into<String>) -> RunnerConfig {
        let c = &self.coordinator;
        RunnerConfig {
            join_delay: JoinDelay::new(
                Duration::from_secs(c.join_delay_min_secs),
                Duration::from_secs(c.join_delay_max_secs),
            ),
            submission_jitter: JoinDelay::up_to(Duration::from_secs(c.submission_jitter_max_secs)),
            max_attempts: c.max_attempts,
            retry_base: Duration::from_millis(c.retry_base_ms),
            idle_timeout: Duration::from_secs(c.idle_timeout_secs),
            min_rsa_bits: c.min_rsa_bits,
            input_address: input_address.into(),
        }
    }

    fn to_accountant_config(&self) -> AccountantConfig {
        AccountantConfig {
            threshold: self.batch.threshold,
            max_batch_age: Duration::from_secs(self.batch.max_batch_age_secs),
            settle_on_timeout: self.batch.settle_on_timeout,
        }
    }

    fn to_settler_config(&self) -> SettlerConfig {
        SettlerConfig {
            max_retries: self.settlement.max_retries,
            retry_delay: Duration::from_millis(self.settlement.retry_delay_ms),
        }
    }

    fn status_cache(&self) -> BatchStatusCache {
        BatchStatusCache::new(Duration::from_secs(self.settlement.status_cache_ttl_secs))
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.settlement.poll_interval_ms)
    }

    fn connector(&self) -> TcpConnector {
        TcpConnector::new(self.coordinator.url.clone())
    }

    fn vault(&self) -> CommitmentVault {
        CommitmentVault::new(self.denominations.to_set())
    }

    fn new_tree(&self) -> Result<MerkleTree, PrivacyError> {
        MerkleTree::new(self.tree.depth)
    }

    fn root_history(&self) -> RootHistory {
        RootHistory::new(self.tree.root_history)
    }
}
