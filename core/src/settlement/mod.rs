//! Collaborators outside the client: the ledger program, the proving
//! system, and the service that settles batches against them.

pub mod cache;
pub mod ledger;
pub mod prover;
pub mod retry;
pub mod settler;
pub mod withdraw;

pub use cache::BatchStatusCache;
pub use ledger::{
    BatchStatus, Confirmation, LedgerClient, LedgerError, LedgerInstruction, MockLedger, TxId,
};
pub use prover::{
    MockProofEngine, ProofBlob, ProofEngine, ProofError, PublicInputs, WithdrawalWitness,
};
pub use settler::{
    LedgerSettlementBridge, SettlementBridge, SettlementError, SettlementReceipt,
    SettlementService, SettlerConfig,
};
pub use retry::with_retry;
pub use withdraw::{WithdrawError, WithdrawalReceipt, WithdrawalService};
