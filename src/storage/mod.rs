//! Data storage and persistence
//!
//! This module manages the persisted tables (blocks, chain transactions,
//! smart contracts and the legacy transaction table) and the in-memory pool
//! of pending transactions.

pub mod memory_pool;
pub mod tables;

pub use memory_pool::MemoryPool;
pub use tables::{sequence_key, BlockRow, Store, Table};
