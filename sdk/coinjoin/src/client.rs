//! Async driver for [`CoinJoinSession`].
//!
//! The session itself is a pure state machine. [`SessionRunner`] owns the
//! I/O around it: the randomized join delay, the session channel, a fresh
//! connection for the anonymous submission, wallet signing, and retrying
//! recoverable failures with new note material.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use shroud_privacy::{Commitment, CommitmentVault, Note};

use crate::channel::{ChannelError, Connector, CoordinatorChannel};
use crate::delay::{DEFAULT_SUBMISSION_JITTER_MAX, JoinDelay};
use crate::error::CoinJoinError;
use crate::messages::Outbound;
use crate::session::{
    CoinJoinSession, CompletedSession, SessionAction, SessionConfig, SessionError,
    SessionFailure, SessionOutcome,
};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(2);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MIN_RSA_BITS: u64 = 2048;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub join_delay: JoinDelay,
    pub submission_jitter: JoinDelay,
    pub max_attempts: u32,
    /// Backoff before attempt `n + 1` is `retry_base * n`.
    pub retry_base: Duration,
    /// Longest silence tolerated from the coordinator.
    pub idle_timeout: Duration,
    pub min_rsa_bits: u64,
    pub input_address: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            join_delay: JoinDelay::default(),
            submission_jitter: JoinDelay::up_to(DEFAULT_SUBMISSION_JITTER_MAX),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base: DEFAULT_RETRY_BASE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            min_rsa_bits: DEFAULT_MIN_RSA_BITS,
            input_address: String::new(),
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SignerError(pub String);

/// Wallet hook for the joint transaction.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign_transaction(&self, transaction: &[u8]) -> Result<Vec<u8>, SignerError>;
}

#[derive(Debug, Error)]
#[error("failed to record deposit: {0}")]
pub struct RecordError(pub String);

/// Receives commitments of completed deposits, e.g. the anonymity accountant.
#[async_trait]
pub trait DepositSink: Send + Sync {
    /// Returns the number of deposits pending in the batch it joined.
    async fn record_deposit(
        &self,
        commitment: Commitment,
        denomination: u64,
    ) -> Result<usize, RecordError>;
}

/// Result of a successful deposit. The note is the only way to withdraw.
#[derive(Debug)]
pub struct DepositReceipt {
    pub note: Note,
    pub session: CompletedSession,
    pub attempts: u32,
    /// `None` without a sink or if recording failed.
    pub pending_in_batch: Option<usize>,
}

/// Cancels in-flight sessions of a runner.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortState>,
}

#[derive(Debug, Default)]
struct AbortState {
    requested: AtomicBool,
    notify: Notify,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    async fn aborted(&self) {
        loop {
            // registered before the flag check so a concurrent abort is not missed
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

pub struct SessionRunner<C, S> {
    connector: C,
    signer: S,
    vault: CommitmentVault,
    sink: Option<Arc<dyn DepositSink>>,
    abort: AbortHandle,
    config: RunnerConfig,
}

impl<C, S> SessionRunner<C, S>
where
    C: Connector,
    S: TransactionSigner,
{
    pub fn new(connector: C, signer: S, vault: CommitmentVault, config: RunnerConfig) -> Self {
        Self {
            connector,
            signer,
            vault,
            sink: None,
            abort: AbortHandle::default(),
            config,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DepositSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Deposit one note of `denomination` through a CoinJoin session.
    ///
    /// Each attempt uses a freshly generated note. Failures after the
    /// unblinded submission are returned immediately.
    pub async fn deposit(&self, denomination: u64) -> Result<DepositReceipt, CoinJoinError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let note = self.vault.generate(denomination)?;

            let waited = tokio::select! {
                waited = self.config.join_delay.wait() => waited,
                _ = self.abort.aborted() => return Err(cancelled()),
            };
            if self.abort.is_aborted() {
                return Err(cancelled());
            }
            debug!(attempt, delay_ms = waited.as_millis() as u64, "joining coinjoin session");

            let failure = match self.run_session(note.commitment, denomination).await {
                Ok(session) => {
                    let pending_in_batch = self.record(&session).await;
                    info!(
                        session_id = %session.session_id,
                        attempt,
                        tx = %session.tx_signature,
                        "deposit completed"
                    );
                    return Ok(DepositReceipt {
                        note,
                        session,
                        attempts: attempt,
                        pending_in_batch,
                    });
                }
                Err(failure) => failure,
            };

            if !failure.is_recoverable() || self.abort.is_aborted() {
                return Err(CoinJoinError::Session(failure));
            }
            if attempt >= max_attempts {
                return Err(CoinJoinError::RetriesExhausted {
                    attempts: attempt,
                    last: failure,
                });
            }

            let backoff = self.config.retry_base * attempt;
            warn!(
                attempt,
                code = failure.class().code(),
                backoff_ms = backoff.as_millis() as u64,
                "coinjoin attempt failed, retrying with a fresh note"
            );
            // note material of the failed attempt is dropped here
            drop(note);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.abort.aborted() => return Err(cancelled()),
            }
        }
    }

    async fn record(&self, session: &CompletedSession) -> Option<usize> {
        let sink = self.sink.as_ref()?;
        match sink
            .record_deposit(session.commitment, session.denomination)
            .await
        {
            Ok(pending) => Some(pending),
            Err(e) => {
                warn!(session_id = %session.session_id, error = %e, "deposit not recorded");
                None
            }
        }
    }

    async fn run_session(
        &self,
        commitment: Commitment,
        denomination: u64,
    ) -> Result<CompletedSession, SessionFailure> {
        let mut session = CoinJoinSession::new(
            SessionConfig {
                denomination,
                input_address: self.config.input_address.clone(),
                min_rsa_bits: self.config.min_rsa_bits,
            },
            commitment,
        );
        let mut pending = VecDeque::new();
        let mut channel = None;

        if let Err(e) = session.begin() {
            pending.extend(session.fail(e));
        } else {
            match self.connector.connect().await {
                Ok(ch) => {
                    channel = Some(ch);
                    match session.on_connected() {
                        Ok(actions) => pending.extend(actions),
                        Err(e) => pending.extend(session.fail(e)),
                    }
                }
                Err(e) => pending.extend(session.connection_lost(e.to_string())),
            }
        }

        loop {
            while let Some(action) = pending.pop_front() {
                match action {
                    SessionAction::Send(msg) => {
                        let Some(ch) = channel.as_mut() else {
                            continue;
                        };
                        if let Err(e) = ch.send(&msg).await {
                            pending.extend(session.connection_lost(e.to_string()));
                        }
                    }
                    SessionAction::SendAnonymously(msg) => {
                        let jitter = tokio::select! {
                            jitter = self.config.submission_jitter.wait() => Some(jitter),
                            _ = self.abort.aborted() => None,
                        };
                        let Some(jitter) = jitter else {
                            pending.extend(session.abort("cancelled by user"));
                            continue;
                        };
                        debug!(
                            kind = msg.kind(),
                            jitter_ms = jitter.as_millis() as u64,
                            "anonymous submission"
                        );
                        if let Err(e) = self.send_anonymously(&msg).await {
                            pending.extend(session.connection_lost(e.to_string()));
                        }
                    }
                    SessionAction::SignTransaction(tx) => {
                        let actions = match self.signer.sign_transaction(&tx).await {
                            Ok(signature) => session
                                .submit_signature(signature)
                                .unwrap_or_else(|e| session.fail(e)),
                            Err(e) => session.fail(SessionError::Signing(e.to_string())),
                        };
                        pending.extend(actions);
                    }
                    SessionAction::Finished(outcome) => {
                        if let Some(mut ch) = channel.take() {
                            if let Err(e) = ch.close().await {
                                debug!(error = %e, "closing session channel");
                            }
                        }
                        return match outcome {
                            SessionOutcome::Completed(done) => Ok(done),
                            SessionOutcome::Failed(failure) => Err(failure),
                        };
                    }
                }
            }

            let Some(ch) = channel.as_mut() else {
                return Err(SessionFailure {
                    session_id: session.session_id().map(str::to_string),
                    error: SessionError::Connection("no coordinator channel".into()),
                    after_submission: session.submitted_unblinded(),
                });
            };

            tokio::select! {
                received = tokio::time::timeout(self.config.idle_timeout, ch.recv()) => {
                    let actions = match received {
                        Err(_) => session.connection_lost("coordinator idle timeout"),
                        Ok(Ok(Some(msg))) => session.handle(msg),
                        Ok(Ok(None)) => session.connection_lost("coordinator closed the channel"),
                        Ok(Err(ChannelError::Protocol(e))) => session.fail(e.into()),
                        Ok(Err(e)) => session.connection_lost(e.to_string()),
                    };
                    pending.extend(actions);
                }
                _ = self.abort.aborted() => {
                    pending.extend(session.abort("cancelled by user"));
                }
            }
        }
    }

    /// One message on its own short-lived connection.
    async fn send_anonymously(&self, msg: &Outbound) -> Result<(), ChannelError> {
        let mut ch = self.connector.connect().await?;
        let sent = ch.send(msg).await;
        if let Err(e) = ch.close().await {
            debug!(error = %e, "closing anonymous channel");
        }
        sent
    }
}

/// Abort observed before any coordinator contact of the attempt.
fn cancelled() -> CoinJoinError {
    CoinJoinError::Session(SessionFailure {
        session_id: None,
        error: SessionError::Cancelled("cancelled by user".into()),
        after_submission: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryConnector;

    struct NoSigner;

    #[async_trait]
    impl TransactionSigner for NoSigner {
        async fn sign_transaction(&self, _transaction: &[u8]) -> Result<Vec<u8>, SignerError> {
            Err(SignerError("not expected".into()))
        }
    }

    fn is_cancelled(err: &CoinJoinError) -> bool {
        matches!(
            err,
            CoinJoinError::Session(SessionFailure {
                error: SessionError::Cancelled(_),
                ..
            })
        )
    }

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.join_delay.min(), Duration::from_secs(5));
        assert_eq!(config.join_delay.max(), Duration::from_secs(35));
        assert_eq!(config.submission_jitter.max(), Duration::from_secs(3));
        assert_eq!(config.max_attempts, 5);
    }

    #[tokio::test]
    async fn test_abort_handle_wakes_waiter() {
        let handle = AbortHandle::default();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.aborted().await });
        handle.abort();
        task.await.unwrap();
        assert!(handle.is_aborted());
    }

    #[tokio::test]
    async fn test_abort_before_wait_is_seen() {
        let handle = AbortHandle::default();
        handle.abort();
        handle.aborted().await;
    }

    #[tokio::test]
    async fn test_abort_wakes_every_waiter() {
        let handle = AbortHandle::default();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let waiter = handle.clone();
                tokio::spawn(async move { waiter.aborted().await })
            })
            .collect();
        tokio::task::yield_now().await;
        handle.abort();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter left asleep")
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_during_join_delay_opens_no_channel() {
        let (connector, mut peers) = MemoryConnector::new();
        let runner = SessionRunner::new(
            connector,
            NoSigner,
            CommitmentVault::default(),
            RunnerConfig::default(),
        );
        let abort = runner.abort_handle();

        let (result, ()) = tokio::join!(runner.deposit(1_000_000_000), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            abort.abort();
        });
        assert!(is_cancelled(&result.unwrap_err()));
        assert!(peers.try_recv().is_err(), "no coordinator contact after abort");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_during_backoff_stops_retrying() {
        let (connector, mut peers) = MemoryConnector::new();
        connector.refuse_next(1);
        let runner = SessionRunner::new(
            connector,
            NoSigner,
            CommitmentVault::default(),
            RunnerConfig {
                join_delay: JoinDelay::none(),
                retry_base: Duration::from_secs(10),
                ..RunnerConfig::default()
            },
        );
        let abort = runner.abort_handle();

        let (result, ()) = tokio::join!(runner.deposit(1_000_000_000), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            abort.abort();
        });
        assert!(is_cancelled(&result.unwrap_err()));
        assert!(peers.try_recv().is_err());
    }
}
