//! Reconciliation between the chain and the legacy transaction table
//!
//! The chain transaction table is the canonical record. The legacy flat table
//! is a projection of it kept for older consumers: a row is written Pending
//! when a transaction is recorded and flipped to Approved once the chain
//! confirms it.

pub mod legacy;
pub mod reconciler;

pub use legacy::{LegacyRow, LegacyStatus};
pub use reconciler::{ReconcileSummary, Reconciler};
