//! # Farmgate Ledger - Marketplace Ledger Engine
//!
//! A hash-linked, proof-of-work ledger for farm-to-buyer purchases, with
//! smart contracts and a reconciliation layer that keeps an older flat
//! transaction table in step with the chain.
//!
//! ## What It Does
//! - **Blocks**: canonical SHA-256 digest over sorted-key JSON, mined until
//!   the hash has the configured number of leading zero hex characters
//! - **Chain**: genesis creation, pending pool, atomic block commit, tamper
//!   detection on reload
//! - **Contracts**: Created to Executed, exactly once, with pluggable
//!   execution conditions
//! - **Reconciliation**: legacy rows approved by transaction id, with a
//!   strict fallback for rows written before ids were tracked
//!
//! ## How The Code Is Organized
//! - `core/`: blocks, mining, the chain, transactions and contracts
//! - `reconcile/`: the legacy table and its reconciler
//! - `ledger/`: the context object every caller goes through
//! - `storage/`: sled tables and the in-memory pool
//! - `config/`: settings from defaults, TOML and the environment
//! - `utils/`: hashing, ids, timestamps and row encoding
//! - `cli/`: command-line interface for operators
//!
//! ## Design Decisions
//! - Sled embedded database, one tree per table, header rows checked on open
//! - The chain transaction table is canonical; the legacy table is a
//!   projection of it and never decides anything on its own
//! - Mining is a plain sequential loop that stops when its token is raised

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod ledger;
pub mod reconcile;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    compute_digest, Block, BlockTransaction, Blockchain, CancelToken, ContractBook,
    ContractCondition, ContractStatus, ProofOfWork, RecordReceipt, RewardTransaction,
    SmartContract, Transaction, TransactionRecord, TransactionRequest, TransactionStatus,
};
pub use error::{IntegrityError, LedgerError, Result, StateError, ValidationError};
pub use ledger::{ActivityReport, ExecutionOutcome, Ledger, MiningOutcome};
pub use reconcile::{LegacyRow, LegacyStatus, ReconcileSummary, Reconciler};
pub use storage::{MemoryPool, Store};
pub use utils::{canonical_encoding, current_timestamp, new_id, sha256_digest, sha256_hex};
