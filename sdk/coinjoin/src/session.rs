//! CoinJoin session state machine.
//!
//! ```text
//! Disconnected ─▶ Connecting ─JOINED─▶ WaitingForParticipants ─SESSION_STARTING─▶ Blinding
//!   ─REQUEST_BLINDED_COMMITMENT─▶ WaitingForSignature ─BLIND_SIGNATURE─▶ SubmittingUnblinded
//!   ─COMMITMENTS_COLLECTED─▶ BuildingTx ─TRANSACTION_READY─▶ SigningTx ─(signed)─▶ Broadcasting
//!   ─TRANSACTION_COMPLETE─▶ Completed
//!
//! SESSION_ABORTED / ERROR / fatal checks from any live state ─▶ Failed
//! ```
//!
//! The machine does no I/O. Each inbound message is handled to completion
//! and turned into [`SessionAction`]s for the runner to perform. Messages
//! that are not valid for the current state are dropped without a state
//! change, which makes duplicates of already-passed steps harmless.

use std::fmt;

use num_bigint::BigUint;
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use shroud_privacy::{Commitment, ErrorClass};

use crate::blind::{BlindError, BlindingFactor, RsaPublicKey};
use crate::messages::{Inbound, Outbound, ProtocolError, RATE_LIMITED};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    WaitingForParticipants,
    Blinding,
    WaitingForSignature,
    SubmittingUnblinded,
    BuildingTx,
    SigningTx,
    Broadcasting,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub denomination: u64,
    /// Wallet address funding the deposit, sent on REQUEST_INPUT_ADDRESS.
    pub input_address: String,
    pub min_rsa_bits: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("connection lost: {0}")]
    Connection(String),

    #[error("coordinator aborted the session: {0}")]
    Aborted(String),

    #[error("coordinator error {code}: {message}")]
    Coordinator { code: String, message: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("coordinator offered denomination {offered}, expected {expected}")]
    DenominationMismatch { expected: u64, offered: u64 },

    #[error(transparent)]
    Blind(#[from] BlindError),

    #[error("transaction signing failed: {0}")]
    Signing(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("`{action}` is not valid in state {state}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },
}

impl SessionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SessionError::Connection(_) => ErrorClass::Connection,
            SessionError::Coordinator { code, .. } if code == RATE_LIMITED => {
                ErrorClass::Connection
            }
            SessionError::DenominationMismatch { .. } | SessionError::Blind(_) => {
                ErrorClass::Cryptographic
            }
            SessionError::Aborted(_)
            | SessionError::Coordinator { .. }
            | SessionError::Protocol(_)
            | SessionError::Signing(_)
            | SessionError::Cancelled(_)
            | SessionError::InvalidState { .. } => ErrorClass::Protocol,
        }
    }

    /// Whether we should tell the coordinator we are leaving.
    fn notifies_coordinator(&self) -> bool {
        !matches!(
            self,
            SessionError::Connection(_)
                | SessionError::Aborted(_)
                | SessionError::Coordinator { .. }
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{error}")]
pub struct SessionFailure {
    pub session_id: Option<String>,
    pub error: SessionError,
    /// The unblinded signature had already been submitted.
    pub after_submission: bool,
}

impl SessionFailure {
    pub fn class(&self) -> ErrorClass {
        self.error.class()
    }

    /// A new session with fresh note material may be attempted.
    pub fn is_recoverable(&self) -> bool {
        if self.after_submission {
            return false;
        }
        matches!(
            self.error,
            SessionError::Connection(_)
                | SessionError::Aborted(_)
                | SessionError::Coordinator { .. }
                | SessionError::Protocol(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSession {
    pub session_id: String,
    pub commitment: Commitment,
    pub denomination: u64,
    pub commitments_collected: Option<u32>,
    pub tx_signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed(CompletedSession),
    Failed(SessionFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send on the session channel.
    Send(Outbound),
    /// Send on a fresh connection not linked to this session's channel.
    SendAnonymously(Outbound),
    /// Ask the wallet to sign; answer with [`CoinJoinSession::submit_signature`].
    SignTransaction(Vec<u8>),
    Finished(SessionOutcome),
}

pub struct CoinJoinSession {
    config: SessionConfig,
    commitment: Commitment,
    state: SessionState,
    connected: bool,
    session_id: Option<String>,
    participant_id: Option<String>,
    key: Option<RsaPublicKey>,
    participants: Option<(u32, u32)>,
    message: Option<BigUint>,
    blinding: Option<BlindingFactor>,
    unblinded: Option<Zeroizing<Vec<u8>>>,
    submitted_unblinded: bool,
    input_sent: bool,
    commitments_collected: Option<u32>,
}

impl CoinJoinSession {
    pub fn new(config: SessionConfig, commitment: Commitment) -> Self {
        Self {
            config,
            commitment,
            state: SessionState::Disconnected,
            connected: false,
            session_id: None,
            participant_id: None,
            key: None,
            participants: None,
            message: None,
            blinding: None,
            unblinded: None,
            submitted_unblinded: false,
            input_sent: false,
            commitments_collected: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn participant_id(&self) -> Option<&str> {
        self.participant_id.as_deref()
    }

    /// Last `(count, required)` reported by the coordinator.
    pub fn participants(&self) -> Option<(u32, u32)> {
        self.participants
    }

    pub fn commitment(&self) -> &Commitment {
        &self.commitment
    }

    pub fn submitted_unblinded(&self) -> bool {
        self.submitted_unblinded
    }

    /// Blinding factor or unblinded signature still held.
    pub fn holds_secrets(&self) -> bool {
        self.blinding.is_some() || self.unblinded.is_some() || self.message.is_some()
    }

    pub fn begin(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::Disconnected, "begin")?;
        self.transition(SessionState::Connecting);
        Ok(())
    }

    /// Channel is up: announce ourselves.
    pub fn on_connected(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        self.expect_state(SessionState::Connecting, "on_connected")?;
        self.connected = true;
        Ok(vec![SessionAction::Send(Outbound::Join {
            denomination: self.config.denomination,
        })])
    }

    pub fn handle(&mut self, msg: Inbound) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            debug!(kind = msg.kind(), state = %self.state, "ignoring message after session end");
            return Vec::new();
        }

        match (self.state, msg) {
            (_, Inbound::SessionAborted { reason }) => self.fail(SessionError::Aborted(reason)),
            (_, Inbound::Error { code, message }) => {
                self.fail(SessionError::Coordinator { code, message })
            }
            (
                SessionState::Connecting,
                Inbound::Joined {
                    session_id,
                    participant_id,
                    rsa_modulus,
                    rsa_exponent,
                    denomination,
                },
            ) => self.on_joined(
                session_id,
                participant_id,
                &rsa_modulus,
                &rsa_exponent,
                denomination,
            ),
            (SessionState::WaitingForParticipants, Inbound::ParticipantCount { count, required }) => {
                debug!(count, required, "participant count");
                self.participants = Some((count, required));
                Vec::new()
            }
            (SessionState::WaitingForParticipants, Inbound::SessionStarting { session_id }) => {
                self.on_starting(session_id)
            }
            (SessionState::Blinding, Inbound::RequestBlindedCommitment) => self.on_blind_request(),
            (SessionState::WaitingForSignature, Inbound::BlindSignature { signature }) => {
                self.on_blind_signature(&signature)
            }
            (SessionState::SubmittingUnblinded, Inbound::RequestUnblindedCommitment)
                if !self.submitted_unblinded =>
            {
                self.on_unblinded_request()
            }
            (SessionState::SubmittingUnblinded, Inbound::CommitmentsCollected { count })
                if self.submitted_unblinded =>
            {
                self.commitments_collected = Some(count);
                self.transition(SessionState::BuildingTx);
                Vec::new()
            }
            (SessionState::BuildingTx, Inbound::RequestInputAddress) if !self.input_sent => {
                self.input_sent = true;
                vec![SessionAction::Send(Outbound::SubmitInput {
                    session_id: self.current_session_id(),
                    input_address: self.config.input_address.clone(),
                })]
            }
            (SessionState::BuildingTx, Inbound::TransactionReady { transaction }) => {
                self.transition(SessionState::SigningTx);
                vec![SessionAction::SignTransaction(transaction)]
            }
            (SessionState::Broadcasting, Inbound::TransactionComplete { signature }) => {
                self.complete(signature)
            }
            (state, msg) => {
                debug!(kind = msg.kind(), %state, "ignoring message not valid in current state");
                Vec::new()
            }
        }
    }

    /// Wallet signature over the transaction from TRANSACTION_READY.
    pub fn submit_signature(
        &mut self,
        signature: Vec<u8>,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.expect_state(SessionState::SigningTx, "submit_signature")?;
        self.transition(SessionState::Broadcasting);
        Ok(vec![SessionAction::Send(Outbound::SubmitSignature {
            session_id: self.current_session_id(),
            signature,
        })])
    }

    /// User-initiated abort. After the unblinded submission this can only
    /// ask the coordinator to stop.
    pub fn abort(&mut self, reason: impl Into<String>) -> Vec<SessionAction> {
        self.fail(SessionError::Cancelled(reason.into()))
    }

    pub fn connection_lost(&mut self, detail: impl Into<String>) -> Vec<SessionAction> {
        self.fail(SessionError::Connection(detail.into()))
    }

    /// Move to `Failed`, wipe secrets and report the failure.
    pub fn fail(&mut self, error: SessionError) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if self.connected && error.notifies_coordinator() {
            let reason = match &error {
                SessionError::Cancelled(reason) => reason.clone(),
                other => other.class().public_message().to_string(),
            };
            actions.push(SessionAction::Send(Outbound::Abort {
                session_id: self.session_id.clone(),
                reason,
            }));
        }

        let failure = SessionFailure {
            session_id: self.session_id.clone(),
            error,
            after_submission: self.submitted_unblinded,
        };
        warn!(
            session_id = ?self.session_id,
            state = %self.state,
            code = failure.class().code(),
            after_submission = failure.after_submission,
            error = %failure.error,
            "coinjoin session failed"
        );

        self.state = SessionState::Failed;
        self.wipe();
        actions.push(SessionAction::Finished(SessionOutcome::Failed(failure)));
        actions
    }

    fn on_joined(
        &mut self,
        session_id: String,
        participant_id: String,
        modulus: &[u8],
        exponent: &[u8],
        denomination: u64,
    ) -> Vec<SessionAction> {
        if denomination != self.config.denomination {
            return self.fail(SessionError::DenominationMismatch {
                expected: self.config.denomination,
                offered: denomination,
            });
        }

        let key = RsaPublicKey::from_be_bytes(modulus, exponent);
        if let Err(e) = key.validate(self.config.min_rsa_bits) {
            return self.fail(e.into());
        }

        info!(%session_id, modulus_bits = key.bits(), "joined coinjoin session");
        self.session_id = Some(session_id);
        self.participant_id = Some(participant_id);
        self.key = Some(key);
        self.transition(SessionState::WaitingForParticipants);
        Vec::new()
    }

    fn on_starting(&mut self, session_id: String) -> Vec<SessionAction> {
        if self.session_id.as_deref() != Some(session_id.as_str()) {
            return self.fail(SessionError::Protocol(ProtocolError::InvalidField {
                field: "sessionId",
                reason: "does not match the joined session",
            }));
        }
        self.transition(SessionState::Blinding);
        vec![SessionAction::Send(Outbound::Ready { session_id })]
    }

    fn on_blind_request(&mut self) -> Vec<SessionAction> {
        let Some(key) = self.key.clone() else {
            return self.fail(SessionError::InvalidState {
                action: "blind",
                state: self.state,
            });
        };

        let m = key.message_representative(self.commitment.as_bytes());
        let r = match BlindingFactor::generate(&key) {
            Ok(r) => r,
            Err(e) => return self.fail(e.into()),
        };
        let blinded = match key.blind(&m, &r) {
            Ok(b) => b,
            Err(e) => return self.fail(e.into()),
        };

        self.message = Some(m);
        self.blinding = Some(r);
        self.transition(SessionState::WaitingForSignature);

        vec![SessionAction::Send(Outbound::SubmitBlinded {
            session_id: self.current_session_id(),
            blinded_commitment: key.to_fixed_bytes(&blinded),
        })]
    }

    fn on_blind_signature(&mut self, signature: &[u8]) -> Vec<SessionAction> {
        let (Some(key), Some(r), Some(m)) =
            (self.key.clone(), self.blinding.take(), self.message.take())
        else {
            return self.fail(SessionError::InvalidState {
                action: "unblind",
                state: self.state,
            });
        };

        let blind_sig = BigUint::from_bytes_be(signature);
        let unblinded = key.unblind(&blind_sig, &r);
        drop(r);

        let sig = match unblinded {
            Ok(sig) => sig,
            Err(e) => return self.fail(e.into()),
        };
        // fail fast instead of submitting a bad signature anonymously
        if !key.verify(&sig, &m) {
            return self.fail(BlindError::VerificationFailed.into());
        }

        self.unblinded = Some(Zeroizing::new(key.to_fixed_bytes(&sig)));
        self.transition(SessionState::SubmittingUnblinded);
        Vec::new()
    }

    fn on_unblinded_request(&mut self) -> Vec<SessionAction> {
        let Some(signature) = self.unblinded.take() else {
            return self.fail(SessionError::InvalidState {
                action: "submit_unblinded",
                state: self.state,
            });
        };
        self.submitted_unblinded = true;
        info!(session_id = ?self.session_id, "submitting unblinded commitment anonymously");

        vec![SessionAction::SendAnonymously(Outbound::SubmitUnblinded {
            session_id: self.current_session_id(),
            commitment: self.commitment.0,
            signature: signature.to_vec(),
        })]
    }

    fn complete(&mut self, tx_signature: String) -> Vec<SessionAction> {
        self.transition(SessionState::Completed);
        self.wipe();
        vec![SessionAction::Finished(SessionOutcome::Completed(
            CompletedSession {
                session_id: self.current_session_id(),
                commitment: self.commitment,
                denomination: self.config.denomination,
                commitments_collected: self.commitments_collected,
                tx_signature,
            },
        ))]
    }

    fn expect_state(&self, expected: SessionState, action: &'static str) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                action,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: SessionState) {
        info!(session_id = ?self.session_id, from = %self.state, to = %next, "session state changed");
        self.state = next;
    }

    fn current_session_id(&self) -> String {
        self.session_id.clone().unwrap_or_default()
    }

    fn wipe(&mut self) {
        self.blinding = None;
        self.unblinded = None;
        self.message = None;
    }
}

impl Drop for CoinJoinSession {
    fn drop(&mut self) {
        self.wipe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blind::RsaSigningKey;
    use crate::blind::tests::test_signing_key;

    const DENOM: u64 = 1_000_000_000;

    fn config() -> SessionConfig {
        SessionConfig {
            denomination: DENOM,
            input_address: "wallet-1".into(),
            min_rsa_bits: 1024,
        }
    }

    fn joined(signer: &RsaSigningKey) -> Inbound {
        Inbound::Joined {
            session_id: "s1".into(),
            participant_id: "p1".into(),
            rsa_modulus: signer.public_key().n().to_bytes_be(),
            rsa_exponent: signer.public_key().e().to_bytes_be(),
            denomination: DENOM,
        }
    }

    fn connected_session() -> CoinJoinSession {
        let mut session = CoinJoinSession::new(config(), Commitment([7u8; 32]));
        session.begin().unwrap();
        let actions = session.on_connected().unwrap();
        assert_eq!(
            actions,
            vec![SessionAction::Send(Outbound::Join {
                denomination: DENOM
            })]
        );
        session
    }

    /// Drive a session up to WaitingForSignature, returning the blinded value.
    fn blinded_session(signer: &RsaSigningKey) -> (CoinJoinSession, Vec<u8>) {
        let mut session = connected_session();
        assert!(session.handle(joined(signer)).is_empty());
        assert_eq!(session.state(), SessionState::WaitingForParticipants);

        session.handle(Inbound::ParticipantCount {
            count: 2,
            required: 3,
        });
        assert_eq!(session.participants(), Some((2, 3)));

        let actions = session.handle(Inbound::SessionStarting {
            session_id: "s1".into(),
        });
        assert_eq!(
            actions,
            vec![SessionAction::Send(Outbound::Ready {
                session_id: "s1".into()
            })]
        );

        let actions = session.handle(Inbound::RequestBlindedCommitment);
        let blinded = match &actions[..] {
            [SessionAction::Send(Outbound::SubmitBlinded {
                blinded_commitment,
                ..
            })] => blinded_commitment.clone(),
            other => panic!("unexpected actions: {other:?}"),
        };
        assert_eq!(session.state(), SessionState::WaitingForSignature);
        (session, blinded)
    }

    fn sign(signer: &RsaSigningKey, blinded: &[u8]) -> Vec<u8> {
        let s = signer
            .sign_blinded(&BigUint::from_bytes_be(blinded))
            .unwrap();
        signer.public_key().to_fixed_bytes(&s)
    }

    fn expect_failure(actions: &[SessionAction]) -> SessionFailure {
        match actions.last() {
            Some(SessionAction::Finished(SessionOutcome::Failed(f))) => f.clone(),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_full_session() {
        let signer = test_signing_key();
        let (mut session, blinded) = blinded_session(&signer);
        assert!(session.holds_secrets());

        assert!(
            session
                .handle(Inbound::BlindSignature {
                    signature: sign(&signer, &blinded),
                })
                .is_empty()
        );
        assert_eq!(session.state(), SessionState::SubmittingUnblinded);

        let actions = session.handle(Inbound::RequestUnblindedCommitment);
        let (commitment, signature) = match &actions[..] {
            [SessionAction::SendAnonymously(Outbound::SubmitUnblinded {
                commitment,
                signature,
                ..
            })] => (*commitment, signature.clone()),
            other => panic!("unexpected actions: {other:?}"),
        };
        assert_eq!(commitment, [7u8; 32]);

        // the coordinator can verify the unblinded signature on the commitment
        let pk = signer.public_key();
        let m = pk.message_representative(&commitment);
        assert!(pk.verify(&BigUint::from_bytes_be(&signature), &m));

        session.handle(Inbound::CommitmentsCollected { count: 3 });
        assert_eq!(session.state(), SessionState::BuildingTx);

        let actions = session.handle(Inbound::RequestInputAddress);
        assert_eq!(
            actions,
            vec![SessionAction::Send(Outbound::SubmitInput {
                session_id: "s1".into(),
                input_address: "wallet-1".into(),
            })]
        );

        let actions = session.handle(Inbound::TransactionReady {
            transaction: vec![1, 2, 3],
        });
        assert_eq!(actions, vec![SessionAction::SignTransaction(vec![1, 2, 3])]);
        assert_eq!(session.state(), SessionState::SigningTx);

        let actions = session.submit_signature(vec![9; 64]).unwrap();
        assert!(matches!(
            &actions[..],
            [SessionAction::Send(Outbound::SubmitSignature { .. })]
        ));
        assert_eq!(session.state(), SessionState::Broadcasting);

        let actions = session.handle(Inbound::TransactionComplete {
            signature: "tx-sig".into(),
        });
        match &actions[..] {
            [SessionAction::Finished(SessionOutcome::Completed(done))] => {
                assert_eq!(done.session_id, "s1");
                assert_eq!(done.commitment, Commitment([7u8; 32]));
                assert_eq!(done.commitments_collected, Some(3));
                assert_eq!(done.tx_signature, "tx-sig");
            }
            other => panic!("unexpected actions: {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Completed);
        assert!(!session.holds_secrets());
    }

    #[test]
    fn test_blind_signature_ignored_while_waiting_for_participants() {
        let signer = test_signing_key();
        let mut session = connected_session();
        session.handle(joined(&signer));
        assert_eq!(session.state(), SessionState::WaitingForParticipants);

        let actions = session.handle(Inbound::BlindSignature {
            signature: vec![1; 32],
        });
        assert!(actions.is_empty());
        assert_eq!(session.state(), SessionState::WaitingForParticipants);
    }

    #[test]
    fn test_blind_signature_accepted_while_waiting_for_signature() {
        let signer = test_signing_key();
        let (mut session, blinded) = blinded_session(&signer);
        session.handle(Inbound::BlindSignature {
            signature: sign(&signer, &blinded),
        });
        assert_eq!(session.state(), SessionState::SubmittingUnblinded);
    }

    #[test]
    fn test_invalid_signature_is_fatal_and_wipes() {
        let signer = test_signing_key();
        let (mut session, _) = blinded_session(&signer);

        let actions = session.handle(Inbound::BlindSignature {
            signature: vec![0x42; 16],
        });
        let failure = expect_failure(&actions);
        assert_eq!(failure.error, SessionError::Blind(BlindError::VerificationFailed));
        assert_eq!(failure.class(), ErrorClass::Cryptographic);
        assert!(!failure.is_recoverable());
        assert!(matches!(
            actions.first(),
            Some(SessionAction::Send(Outbound::Abort { .. }))
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!session.holds_secrets());
    }

    #[test]
    fn test_weak_coordinator_key_is_fatal() {
        let signer = test_signing_key();
        let mut session = CoinJoinSession::new(
            SessionConfig {
                min_rsa_bits: 2048,
                ..config()
            },
            Commitment([7u8; 32]),
        );
        session.begin().unwrap();
        session.on_connected().unwrap();

        let failure = expect_failure(&session.handle(joined(&signer)));
        assert!(matches!(
            failure.error,
            SessionError::Blind(BlindError::WeakModulus { .. })
        ));
        assert!(!failure.is_recoverable());
    }

    #[test]
    fn test_denomination_mismatch_is_fatal() {
        let signer = test_signing_key();
        let mut session = connected_session();
        let mut msg = joined(&signer);
        if let Inbound::Joined { denomination, .. } = &mut msg {
            *denomination = DENOM * 10;
        }
        let failure = expect_failure(&session.handle(msg));
        assert_eq!(failure.class(), ErrorClass::Cryptographic);
    }

    #[test]
    fn test_duplicate_unblinded_request_ignored() {
        let signer = test_signing_key();
        let (mut session, blinded) = blinded_session(&signer);
        session.handle(Inbound::BlindSignature {
            signature: sign(&signer, &blinded),
        });

        assert_eq!(session.handle(Inbound::RequestUnblindedCommitment).len(), 1);
        assert!(session.handle(Inbound::RequestUnblindedCommitment).is_empty());
        // replaying an earlier step changes nothing
        assert!(session.handle(Inbound::RequestBlindedCommitment).is_empty());
        assert_eq!(session.state(), SessionState::SubmittingUnblinded);
    }

    #[test]
    fn test_coordinator_abort_from_any_state() {
        let mut session = connected_session();
        let failure = expect_failure(&session.handle(Inbound::SessionAborted {
            reason: "timeout".into(),
        }));
        assert_eq!(failure.error, SessionError::Aborted("timeout".into()));
        assert!(failure.is_recoverable());
        assert_eq!(session.state(), SessionState::Failed);

        // terminal: further messages are dropped
        assert!(session.handle(Inbound::RequestBlindedCommitment).is_empty());
    }

    #[test]
    fn test_rate_limited_is_retryable() {
        let mut session = connected_session();
        let failure = expect_failure(&session.handle(Inbound::Error {
            code: RATE_LIMITED.into(),
            message: "slow down".into(),
        }));
        assert_eq!(failure.class(), ErrorClass::Connection);
        assert!(failure.is_recoverable());
    }

    #[test]
    fn test_abort_after_submission_only_requests_stop() {
        let signer = test_signing_key();
        let (mut session, blinded) = blinded_session(&signer);
        session.handle(Inbound::BlindSignature {
            signature: sign(&signer, &blinded),
        });
        session.handle(Inbound::RequestUnblindedCommitment);

        let actions = session.abort("user cancelled");
        assert_eq!(
            actions[0],
            SessionAction::Send(Outbound::Abort {
                session_id: Some("s1".into()),
                reason: "user cancelled".into(),
            })
        );
        let failure = expect_failure(&actions);
        assert!(failure.after_submission);
        assert!(!failure.is_recoverable());
        assert!(!session.holds_secrets());
    }

    #[test]
    fn test_abort_before_connect_sends_nothing() {
        let mut session = CoinJoinSession::new(config(), Commitment([1u8; 32]));
        session.begin().unwrap();
        let actions = session.abort("changed my mind");
        assert_eq!(actions.len(), 1);
        assert!(session.abort("again").is_empty());
    }

    #[test]
    fn test_submit_signature_requires_signing_state() {
        let mut session = connected_session();
        assert!(matches!(
            session.submit_signature(vec![1]),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_session_id_mismatch_on_start() {
        let signer = test_signing_key();
        let mut session = connected_session();
        session.handle(joined(&signer));
        let failure = expect_failure(&session.handle(Inbound::SessionStarting {
            session_id: "other".into(),
        }));
        assert!(matches!(failure.error, SessionError::Protocol(_)));
    }
}
