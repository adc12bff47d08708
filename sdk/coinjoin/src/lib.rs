//! Shroud CoinJoin
//!
//! Client side of the blind-signature deposit protocol. A depositor joins a
//! coordinator session, gets its commitment blindly signed, and resubmits the
//! unblinded signature over an unrelated connection so the coordinator cannot
//! link the commitment to the depositor.
//!
//! ```text
//! JOIN ─▶ JOINED ─▶ SESSION_STARTING ─▶ READY
//!   ─▶ REQUEST_BLINDED_COMMITMENT ─▶ SUBMIT_BLINDED ─▶ BLIND_SIGNATURE
//!   ─▶ REQUEST_UNBLINDED_COMMITMENT ─▶ SUBMIT_UNBLINDED (fresh connection)
//!   ─▶ COMMITMENTS_COLLECTED ─▶ REQUEST_INPUT_ADDRESS ─▶ SUBMIT_INPUT
//!   ─▶ TRANSACTION_READY ─▶ SUBMIT_SIGNATURE ─▶ TRANSACTION_COMPLETE
//! ```

pub mod blind;
pub mod channel;
pub mod client;
pub mod delay;
pub mod error;
pub mod messages;
pub mod session;

pub use blind::{BlindError, BlindingFactor, RsaPublicKey, RsaSigningKey};
pub use channel::{
    ChannelError, Connector, CoordinatorChannel, MemoryChannel, MemoryConnector, MemoryPeer,
    TcpChannel, TcpConnector,
};
pub use client::{
    AbortHandle, DepositReceipt, DepositSink, RecordError, RunnerConfig, SessionRunner,
    SignerError, TransactionSigner,
};
pub use delay::JoinDelay;
pub use error::CoinJoinError;
pub use messages::{Inbound, Outbound, ProtocolError};
pub use session::{
    CoinJoinSession, CompletedSession, SessionAction, SessionConfig, SessionError,
    SessionFailure, SessionOutcome, SessionState,
};
