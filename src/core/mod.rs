//! Core ledger functionality
//!
//! This module contains the fundamental ledger components: blocks and their
//! canonical digest, proof-of-work mining, the chain itself, transactions and
//! smart contracts.

pub mod block;
pub mod blockchain;
pub mod contract;
pub mod proof_of_work;
pub mod transaction;

pub use block::{compute_digest, Block, GENESIS_PREVIOUS_HASH};
pub use blockchain::Blockchain;
pub use contract::{
    AlwaysSatisfied, ContractBook, ContractCondition, ContractStatus, SmartContract,
};
pub use proof_of_work::{meets_difficulty, CancelToken, ProofOfWork, CHECK_INTERVAL};
pub use transaction::{
    BlockTransaction, RecordReceipt, RewardTransaction, Transaction, TransactionRecord,
    TransactionRequest, TransactionStatus, REWARD_SENDER,
};
