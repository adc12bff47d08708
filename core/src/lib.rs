//! Shroud Core
//!
//! Everything around a deposit that is not the coordination protocol itself.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Shroud Core                             │
//! │                                                                  │
//! │  SessionRunner ──record_deposit──▶ AnonymityAccountant          │
//! │                                        │ ready                   │
//! │                                        ▼                         │
//! │                    SettlementService ──▶ SettlementBridge ──▶ Ledger
//! │                                                                  │
//! │  WithdrawalService ──▶ ProofEngine ──▶ LedgerClient              │
//! │                                                                  │
//! │  WalletStore ──▶ KeyValueStore (RocksDB / memory)                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod accountant;
pub mod config;
pub mod settlement;
pub mod storage;

pub use accountant::{
    AccountantConfig, AccountantError, AccountantHandle, AccountantSnapshot, AnonymityAccountant,
    Batch, BatchSummary, Readiness, SettleOutcome,
};
pub use config::ConfigExt;
pub use storage::{
    KeyValueStore, MemoryStore, RocksStore, SealParams, StoreError, WalletStore,
};
