//! Bounded retry for ledger calls.

use std::future::Future;

use tracing::warn;

use super::ledger::LedgerError;
use super::settler::SettlerConfig;

/// Run `op` until it succeeds, fails permanently, or the attempt budget in
/// `config` runs out. Only transient errors are retried; the delay grows
/// linearly with the attempt number.
pub async fn with_retry<T, F, Fut>(
    config: &SettlerConfig,
    operation: &'static str,
    mut op: F,
) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let attempts = config.max_retries.max(1);
    let mut last = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                warn!(
                    operation,
                    attempt,
                    max = attempts,
                    error = %e,
                    "ledger call failed"
                );
                last = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(config.retry_delay * attempt).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(LedgerError::RetriesExhausted {
        attempts,
        last: last.map(|e| e.to_string()).unwrap_or_default(),
    })
}
