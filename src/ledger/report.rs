use crate::core::{Blockchain, SmartContract, TransactionRecord};
use crate::reconcile::LegacyRow;
use std::fmt;

/// Snapshot of ledger activity for operators
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityReport {
    pub chain_valid: bool,
    pub blocks: usize,
    pub pool_size: usize,
    pub transactions_total: usize,
    pub transactions_pending: usize,
    pub transactions_confirmed: usize,
    pub transaction_value: f64,
    pub contracts_total: usize,
    pub contracts_created: usize,
    pub contracts_executed: usize,
    pub legacy_pending: usize,
    pub legacy_approved: usize,
}

impl ActivityReport {
    pub fn collect(
        chain: &Blockchain,
        transactions: &[TransactionRecord],
        contracts: &[SmartContract],
        legacy: &[LegacyRow],
    ) -> ActivityReport {
        let confirmed = transactions
            .iter()
            .filter(|r| r.get_status().is_confirmed())
            .count();
        let executed = contracts.iter().filter(|c| c.is_executed()).count();
        let approved = legacy.iter().filter(|r| r.is_approved()).count();

        ActivityReport {
            chain_valid: chain.is_valid(),
            blocks: chain.len(),
            pool_size: chain.pending_len(),
            transactions_total: transactions.len(),
            transactions_pending: transactions.len() - confirmed,
            transactions_confirmed: confirmed,
            transaction_value: transactions
                .iter()
                .map(|r| r.get_transaction().get_amount())
                .sum(),
            contracts_total: contracts.len(),
            contracts_created: contracts.len() - executed,
            contracts_executed: executed,
            legacy_pending: legacy.len() - approved,
            legacy_approved: approved,
        }
    }
}

impl fmt::Display for ActivityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Chain valid: {}", self.chain_valid)?;
        writeln!(f, "Blocks: {}", self.blocks)?;
        writeln!(f, "Pending pool: {}", self.pool_size)?;
        writeln!(
            f,
            "Transactions: {} ({} pending, {} confirmed)",
            self.transactions_total, self.transactions_pending, self.transactions_confirmed
        )?;
        writeln!(f, "Total value: {:.2}", self.transaction_value)?;
        writeln!(
            f,
            "Contracts: {} ({} created, {} executed)",
            self.contracts_total, self.contracts_created, self.contracts_executed
        )?;
        write!(
            f,
            "Legacy rows: {} pending, {} approved",
            self.legacy_pending, self.legacy_approved
        )
    }
}
