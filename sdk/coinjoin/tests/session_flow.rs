//! End-to-end sessions against an in-process coordinator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigUint;
use num_traits::One;
use tokio::sync::{Mutex, mpsc};

use shroud_coinjoin::{
    CoinJoinError, DepositSink, Inbound, JoinDelay, MemoryConnector, MemoryPeer, Outbound,
    RecordError, RsaSigningKey, RunnerConfig, SessionError, SessionRunner, SignerError,
    TransactionSigner,
};
use shroud_privacy::{Commitment, CommitmentVault, ErrorClass};

const DENOM: u64 = 1_000_000_000;

/// 1128-bit modulus from two Mersenne primes; fast and deterministic.
fn signing_key() -> RsaSigningKey {
    let one = BigUint::one();
    let p = (&one << 521usize) - &one;
    let q = (&one << 607usize) - &one;
    RsaSigningKey::from_primes(&p, &q, &BigUint::from(65537u32)).unwrap()
}

fn config(max_attempts: u32) -> RunnerConfig {
    RunnerConfig {
        join_delay: JoinDelay::none(),
        submission_jitter: JoinDelay::none(),
        max_attempts,
        retry_base: Duration::from_millis(1),
        idle_timeout: Duration::from_secs(5),
        min_rsa_bits: 1024,
        input_address: "wallet-1".into(),
    }
}

struct ReversingSigner;

#[async_trait]
impl TransactionSigner for ReversingSigner {
    async fn sign_transaction(&self, transaction: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(transaction.iter().rev().copied().collect())
    }
}

#[derive(Default)]
struct RecordingSink {
    deposits: Mutex<Vec<(Commitment, u64)>>,
}

#[async_trait]
impl DepositSink for RecordingSink {
    async fn record_deposit(
        &self,
        commitment: Commitment,
        denomination: u64,
    ) -> Result<usize, RecordError> {
        let mut deposits = self.deposits.lock().await;
        deposits.push((commitment, denomination));
        Ok(deposits.len())
    }
}

async fn expect(peer: &mut MemoryPeer) -> Outbound {
    peer.recv().await.unwrap().expect("client hung up")
}

struct Coordinator {
    signer: RsaSigningKey,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl Coordinator {
    async fn accept(&mut self) -> MemoryPeer {
        self.peers.recv().await.expect("no connection")
    }

    fn joined(&self, session_id: &str) -> Inbound {
        let pk = self.signer.public_key();
        Inbound::Joined {
            session_id: session_id.into(),
            participant_id: "p1".into(),
            rsa_modulus: pk.n().to_bytes_be(),
            rsa_exponent: pk.e().to_bytes_be(),
            denomination: DENOM,
        }
    }

    /// Accept a JOIN and answer with JOINED and SESSION_STARTING.
    async fn open_session(&mut self, session_id: &str) -> MemoryPeer {
        let mut peer = self.accept().await;
        assert_eq!(expect(&mut peer).await, Outbound::Join { denomination: DENOM });
        peer.send(&self.joined(session_id)).unwrap();
        peer.send(&Inbound::ParticipantCount {
            count: 3,
            required: 3,
        })
        .unwrap();
        peer.send(&Inbound::SessionStarting {
            session_id: session_id.into(),
        })
        .unwrap();
        assert_eq!(
            expect(&mut peer).await,
            Outbound::Ready {
                session_id: session_id.into()
            }
        );
        peer
    }

    /// Run one honest session and return the commitment received on the
    /// anonymous connection.
    async fn serve(&mut self, session_id: &str) -> [u8; 32] {
        let mut peer = self.open_session(session_id).await;
        let pk = self.signer.public_key().clone();

        peer.send(&Inbound::RequestBlindedCommitment).unwrap();
        let blinded = match expect(&mut peer).await {
            Outbound::SubmitBlinded {
                blinded_commitment, ..
            } => blinded_commitment,
            other => panic!("expected SUBMIT_BLINDED, got {other:?}"),
        };
        let blind_sig = self
            .signer
            .sign_blinded(&BigUint::from_bytes_be(&blinded))
            .unwrap();
        peer.send(&Inbound::BlindSignature {
            signature: pk.to_fixed_bytes(&blind_sig),
        })
        .unwrap();
        peer.send(&Inbound::RequestUnblindedCommitment).unwrap();

        // the unblinded pair arrives on a separate connection
        let mut anon = self.accept().await;
        let (commitment, signature) = match expect(&mut anon).await {
            Outbound::SubmitUnblinded {
                commitment,
                signature,
                ..
            } => (commitment, signature),
            other => panic!("expected SUBMIT_UNBLINDED, got {other:?}"),
        };
        assert!(anon.recv().await.unwrap().is_none());
        assert!(pk.verify(
            &BigUint::from_bytes_be(&signature),
            &pk.message_representative(&commitment)
        ));

        peer.send(&Inbound::CommitmentsCollected { count: 3 }).unwrap();
        peer.send(&Inbound::RequestInputAddress).unwrap();
        assert_eq!(
            expect(&mut peer).await,
            Outbound::SubmitInput {
                session_id: session_id.into(),
                input_address: "wallet-1".into(),
            }
        );

        peer.send(&Inbound::TransactionReady {
            transaction: vec![1, 2, 3],
        })
        .unwrap();
        assert_eq!(
            expect(&mut peer).await,
            Outbound::SubmitSignature {
                session_id: session_id.into(),
                signature: vec![3, 2, 1],
            }
        );
        peer.send(&Inbound::TransactionComplete {
            signature: format!("tx-{session_id}"),
        })
        .unwrap();

        commitment
    }
}

fn setup(
    max_attempts: u32,
) -> (
    MemoryConnector,
    Coordinator,
    RunnerConfig,
) {
    let (connector, peers) = MemoryConnector::new();
    let coordinator = Coordinator {
        signer: signing_key(),
        peers,
    };
    (connector, coordinator, config(max_attempts))
}

#[tokio::test]
async fn test_deposit_completes_and_records_commitment() {
    let (connector, mut coordinator, config) = setup(3);
    let sink = Arc::new(RecordingSink::default());
    let runner = SessionRunner::new(connector, ReversingSigner, CommitmentVault::default(), config)
        .with_sink(sink.clone());

    let (receipt, submitted) = tokio::join!(runner.deposit(DENOM), coordinator.serve("s1"));
    let receipt = receipt.unwrap();

    assert_eq!(receipt.attempts, 1);
    assert_eq!(receipt.note.commitment.0, submitted);
    assert!(receipt.note.is_consistent());
    assert_eq!(receipt.note.denomination, DENOM);
    assert_eq!(receipt.session.tx_signature, "tx-s1");
    assert_eq!(receipt.session.commitments_collected, Some(3));
    assert_eq!(receipt.pending_in_batch, Some(1));

    let deposits = sink.deposits.lock().await;
    assert_eq!(deposits.as_slice(), &[(Commitment(submitted), DENOM)]);
}

#[tokio::test]
async fn test_rate_limited_session_is_retried_with_new_note() {
    let (connector, mut coordinator, config) = setup(3);
    let runner = SessionRunner::new(connector, ReversingSigner, CommitmentVault::default(), config);

    let coordinate = async {
        let mut peer = coordinator.accept().await;
        assert_eq!(expect(&mut peer).await, Outbound::Join { denomination: DENOM });
        peer.send(&Inbound::Error {
            code: "RATE_LIMITED".into(),
            message: "slow down".into(),
        })
        .unwrap();
        // no ABORT in reply to a coordinator error
        assert!(peer.recv().await.unwrap().is_none());
        coordinator.serve("s2").await
    };

    let (receipt, submitted) = tokio::join!(runner.deposit(DENOM), coordinate);
    let receipt = receipt.unwrap();
    assert_eq!(receipt.attempts, 2);
    assert_eq!(receipt.note.commitment.0, submitted);
    assert_eq!(receipt.session.session_id, "s2");
}

#[tokio::test]
async fn test_refused_connections_are_retried() {
    let (connector, mut coordinator, config) = setup(5);
    connector.refuse_next(2);
    let runner = SessionRunner::new(connector, ReversingSigner, CommitmentVault::default(), config);

    let (receipt, _) = tokio::join!(runner.deposit(DENOM), coordinator.serve("s1"));
    assert_eq!(receipt.unwrap().attempts, 3);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let (connector, _coordinator, config) = setup(3);
    connector.refuse_next(10);
    let runner = SessionRunner::new(connector, ReversingSigner, CommitmentVault::default(), config);

    match runner.deposit(DENOM).await {
        Err(CoinJoinError::RetriesExhausted { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert_eq!(last.class(), ErrorClass::Connection);
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bad_blind_signature_is_not_retried() {
    let (connector, mut coordinator, config) = setup(3);
    let runner = SessionRunner::new(connector, ReversingSigner, CommitmentVault::default(), config);
    let size = coordinator.signer.public_key().size();

    let coordinate = async {
        let mut peer = coordinator.open_session("s1").await;
        peer.send(&Inbound::RequestBlindedCommitment).unwrap();
        assert!(matches!(
            expect(&mut peer).await,
            Outbound::SubmitBlinded { .. }
        ));
        peer.send(&Inbound::BlindSignature {
            signature: vec![0x42; size],
        })
        .unwrap();
        let abort = expect(&mut peer).await;
        assert!(peer.recv().await.unwrap().is_none());
        abort
    };

    let (result, abort) = tokio::join!(runner.deposit(DENOM), coordinate);
    assert_eq!(
        abort,
        Outbound::Abort {
            session_id: Some("s1".into()),
            reason: "cryptographic verification failed".into(),
        }
    );
    match result {
        Err(CoinJoinError::Session(failure)) => {
            assert_eq!(failure.class(), ErrorClass::Cryptographic);
            assert!(!failure.after_submission);
        }
        other => panic!("expected a session failure, got {other:?}"),
    }
    // one session only
    assert!(coordinator.peers.try_recv().is_err());
}

#[tokio::test]
async fn test_abort_handle_cancels_session() {
    let (connector, mut coordinator, config) = setup(3);
    let runner = SessionRunner::new(connector, ReversingSigner, CommitmentVault::default(), config);
    let handle = runner.abort_handle();

    let coordinate = async {
        let mut peer = coordinator.accept().await;
        assert_eq!(expect(&mut peer).await, Outbound::Join { denomination: DENOM });
        handle.abort();
        expect(&mut peer).await
    };

    let (result, abort) = tokio::join!(runner.deposit(DENOM), coordinate);
    match abort {
        Outbound::Abort { reason, .. } => assert_eq!(reason, "cancelled by user"),
        other => panic!("expected ABORT, got {other:?}"),
    }
    match result {
        Err(CoinJoinError::Session(failure)) => {
            assert!(matches!(failure.error, SessionError::Cancelled(_)));
        }
        other => panic!("expected a cancelled session, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_silent_coordinator_times_out() {
    let (connector, mut coordinator, config) = setup(1);
    let runner = SessionRunner::new(connector, ReversingSigner, CommitmentVault::default(), config);

    let coordinate = async {
        let mut peer = coordinator.accept().await;
        assert_eq!(expect(&mut peer).await, Outbound::Join { denomination: DENOM });
        peer
    };

    let (result, _peer) = tokio::join!(runner.deposit(DENOM), coordinate);
    match result {
        Err(CoinJoinError::RetriesExhausted { attempts, last }) => {
            assert_eq!(attempts, 1);
            assert_eq!(
                last.error,
                SessionError::Connection("coordinator idle timeout".into())
            );
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
}
