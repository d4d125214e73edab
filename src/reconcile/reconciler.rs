// Keeps the legacy table in step with the chain transaction table.
// A legacy write that fails after the chain side committed is reported as a
// divergence; the chain side is never rolled back.

use crate::core::{
    Blockchain, RecordReceipt, TransactionRecord, TransactionRequest, TransactionStatus,
};
use crate::error::{LedgerError, Result, StateError};
use crate::reconcile::{LegacyRow, LegacyStatus};
use crate::storage::{sequence_key, Store};
use crate::utils::deserialize;
use log::{info, warn};
use sled::IVec;
use std::collections::HashSet;

/// Result of a `reconcile_all` pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileSummary {
    /// Existing legacy rows flipped to Approved
    pub approved: Vec<String>,
    /// Confirmed transactions that had no legacy row and got one
    pub recreated: Vec<String>,
    /// Transaction id and reason for every one still diverging
    pub failed: Vec<(String, String)>,
}

impl ReconcileSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Reconciler {
    store: Store,
}

impl Reconciler {
    pub fn new(store: Store) -> Reconciler {
        Reconciler { store }
    }

    /// Validates the request and records it: legacy Pending row, chain
    /// transaction table Pending row, then the pending pool. Nothing is
    /// written when validation fails.
    pub fn record(
        &self,
        chain: &Blockchain,
        request: &TransactionRequest,
    ) -> Result<RecordReceipt> {
        let tx = request.validate()?;

        let row = LegacyRow::pending(
            request.legacy_buyer_name(),
            request.legacy_product_name(),
            tx.get_amount(),
            Some(tx.get_id()),
        );
        self.append_legacy_row(&row)?;
        chain.record_pending(&tx)?;

        let receipt = RecordReceipt {
            transaction_id: tx.get_id().to_string(),
            status: TransactionStatus::Pending,
        };
        info!(
            "Recorded transaction {} ({} buys {} from {})",
            tx.get_id(),
            tx.get_buyer_id(),
            tx.get_product_id(),
            tx.get_seller_id()
        );
        chain.enqueue(tx);
        Ok(receipt)
    }

    fn confirmed_record(&self, transaction_id: &str) -> Result<TransactionRecord> {
        let record: TransactionRecord = self
            .store
            .transactions()
            .get(transaction_id.as_bytes())?
            .ok_or_else(|| LedgerError::not_found("transaction", transaction_id))?;
        if !record.get_status().is_confirmed() {
            return Err(StateError::NotConfirmed(transaction_id.to_string()).into());
        }
        Ok(record)
    }

    /// Legacy rows with their keys; rows that do not decode are skipped
    fn keyed_legacy_rows(&self) -> Result<Vec<(IVec, LegacyRow)>> {
        let mut rows = Vec::new();
        for (key, value) in self.store.legacy().raw_rows()? {
            match deserialize::<LegacyRow>(value.as_ref()) {
                Ok(row) => rows.push((key, row)),
                Err(e) => warn!("Skipping unreadable legacy row: {e}"),
            }
        }
        Ok(rows)
    }

    /// Flips the legacy row of a Confirmed transaction to Approved.
    ///
    /// The row carrying the transaction id wins. Without one, the single
    /// id-less Pending row for the same buyer and product is taken and stamped
    /// with the id; when several rows qualify none is touched.
    pub fn approve(&self, transaction_id: &str) -> Result<LegacyRow> {
        let record = self.confirmed_record(transaction_id)?;
        let tx = record.get_transaction();

        let legacy = self.store.legacy();
        let _guard = legacy.write_guard()?;
        let rows = self.keyed_legacy_rows()?;

        let (key, mut row) = match rows
            .iter()
            .find(|(_, row)| row.get_transaction_id() == Some(transaction_id))
        {
            Some(exact) => exact.clone(),
            None => {
                let mut candidates: Vec<&(IVec, LegacyRow)> = rows
                    .iter()
                    .filter(|(_, row)| row.could_belong_to(tx))
                    .collect();
                match candidates.len() {
                    0 => return Err(LedgerError::not_found("legacy row", transaction_id)),
                    1 => {
                        info!("Matched id-less legacy row for transaction {transaction_id}");
                        candidates.remove(0).clone()
                    }
                    n => {
                        return Err(StateError::AmbiguousMatch {
                            transaction_id: transaction_id.to_string(),
                            candidates: n,
                        }
                        .into())
                    }
                }
            }
        };

        row.approve(transaction_id)?;
        legacy
            .insert(key.as_ref(), &row)
            .map_err(|e| LedgerError::Divergence {
                transaction_id: transaction_id.to_string(),
                reason: e.to_string(),
            })?;
        info!("Approved legacy row for transaction {transaction_id}");
        Ok(row)
    }

    /// Approves the legacy rows of every Confirmed transaction between
    /// `buyer_id` and `product_id`. Rows already Approved are skipped; a row
    /// that cannot be approved lands in `failed` and the others still run.
    pub fn reconcile_contract(&self, buyer_id: &str, product_id: &str) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        for record in self.store.transactions().rows::<TransactionRecord>()? {
            let tx = record.get_transaction();
            if !record.get_status().is_confirmed()
                || tx.get_buyer_id() != buyer_id
                || tx.get_product_id() != product_id
            {
                continue;
            }
            match self.approve(tx.get_id()) {
                Ok(_) => summary.approved.push(tx.get_id().to_string()),
                Err(LedgerError::State(StateError::AlreadyApproved(_))) => {}
                Err(e) => {
                    warn!("Could not reconcile transaction {}: {e}", tx.get_id());
                    summary.failed.push((tx.get_id().to_string(), e.to_string()));
                }
            }
        }
        Ok(summary)
    }

    /// Ids Confirmed on the chain side whose legacy row is missing or still
    /// Pending
    pub fn divergences(&self) -> Result<Vec<String>> {
        let approved: HashSet<String> = self
            .keyed_legacy_rows()?
            .into_iter()
            .filter(|(_, row)| row.is_approved())
            .filter_map(|(_, row)| row.get_transaction_id().map(str::to_string))
            .collect();

        Ok(self
            .store
            .transactions()
            .rows::<TransactionRecord>()?
            .into_iter()
            .filter(|r| r.get_status().is_confirmed() && !approved.contains(r.get_id()))
            .map(|r| r.get_id().to_string())
            .collect())
    }

    /// Retries `approve` for every divergent transaction. A transaction with
    /// no legacy row at all gets a fresh Approved projection row.
    pub fn reconcile_all(&self) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        for transaction_id in self.divergences()? {
            match self.approve(&transaction_id) {
                Ok(_) => summary.approved.push(transaction_id),
                Err(LedgerError::NotFound {
                    kind: "legacy row", ..
                }) => match self.recreate(&transaction_id) {
                    Ok(()) => summary.recreated.push(transaction_id),
                    Err(e) => {
                        warn!("Could not recreate legacy row for {transaction_id}: {e}");
                        summary.failed.push((transaction_id, e.to_string()));
                    }
                },
                Err(e) => {
                    warn!("Could not reconcile transaction {transaction_id}: {e}");
                    summary.failed.push((transaction_id, e.to_string()));
                }
            }
        }
        info!(
            "Reconciliation: {} approved, {} recreated, {} failed",
            summary.approved.len(),
            summary.recreated.len(),
            summary.failed.len()
        );
        Ok(summary)
    }

    fn recreate(&self, transaction_id: &str) -> Result<()> {
        let record = self.confirmed_record(transaction_id)?;
        let row = LegacyRow::projection(record.get_transaction(), LegacyStatus::Approved);
        self.append_legacy_row(&row)?;
        Ok(())
    }

    /// Appends a row to the legacy table, returning its sequence number
    pub fn append_legacy_row(&self, row: &LegacyRow) -> Result<u64> {
        let sequence = self.store.next_sequence()?;
        self.store.legacy().insert(&sequence_key(sequence), row)?;
        Ok(sequence)
    }

    /// Every legacy row in append order
    pub fn legacy_rows(&self) -> Result<Vec<LegacyRow>> {
        Ok(self
            .keyed_legacy_rows()?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CancelToken, Transaction};
    use crate::error::ValidationError;
    use crate::testnet::create_test_chain;

    fn confirmed(chain: &mut Blockchain, buyer: &str, product: &str) -> Transaction {
        let tx = Transaction::new(buyer, "S1", product, 10.0, None).unwrap();
        chain.record_pending(&tx).unwrap();
        chain.enqueue(tx.clone());
        chain.mine_pending("admin", &CancelToken::new()).unwrap();
        tx
    }

    #[test]
    fn test_record_writes_both_tables() {
        let (chain, _dir) = create_test_chain().unwrap();
        let reconciler = Reconciler::new(chain.get_store().clone());
        let request = TransactionRequest::new("B1", "S1", "P1", 100.0).with_names("Alice", "Eggs");

        let receipt = reconciler.record(&chain, &request).unwrap();
        let rows = reconciler.legacy_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_buyer_name(), "Alice");
        assert_eq!(rows[0].get_status(), LegacyStatus::Pending);
        assert_eq!(rows[0].get_transaction_id(), Some(receipt.transaction_id.as_str()));
        assert!(chain.get_transaction(&receipt.transaction_id).unwrap().is_some());
        assert_eq!(chain.pending_len(), 1);
    }

    #[test]
    fn test_record_rejects_before_writing() {
        let (chain, _dir) = create_test_chain().unwrap();
        let reconciler = Reconciler::new(chain.get_store().clone());
        let mut request = TransactionRequest::new("B1", "S1", "P1", 100.0);
        request.seller_id = Some("  ".to_string());

        assert!(matches!(
            reconciler.record(&chain, &request),
            Err(LedgerError::Validation(ValidationError::MissingField("seller_id")))
        ));
        assert!(reconciler.legacy_rows().unwrap().is_empty());
        assert!(chain.transaction_history(None).unwrap().is_empty());
        assert_eq!(chain.pending_len(), 0);
    }

    #[test]
    fn test_approve_requires_confirmation() {
        let (chain, _dir) = create_test_chain().unwrap();
        let reconciler = Reconciler::new(chain.get_store().clone());
        let receipt = reconciler
            .record(&chain, &TransactionRequest::new("B1", "S1", "P1", 1.0))
            .unwrap();

        assert!(matches!(
            reconciler.approve(&receipt.transaction_id),
            Err(LedgerError::State(StateError::NotConfirmed(_)))
        ));
        assert!(matches!(
            reconciler.approve("unknown"),
            Err(LedgerError::NotFound { kind: "transaction", .. })
        ));
    }

    #[test]
    fn test_approve_exact_match_then_already_approved() {
        let (mut chain, _dir) = create_test_chain().unwrap();
        let reconciler = Reconciler::new(chain.get_store().clone());
        let receipt = reconciler
            .record(&chain, &TransactionRequest::new("B1", "S1", "P1", 1.0))
            .unwrap();
        chain.mine_pending("admin", &CancelToken::new()).unwrap();

        let row = reconciler.approve(&receipt.transaction_id).unwrap();
        assert!(row.is_approved());
        assert!(matches!(
            reconciler.approve(&receipt.transaction_id),
            Err(LedgerError::State(StateError::AlreadyApproved(_)))
        ));
    }

    #[test]
    fn test_fallback_single_candidate() {
        let (mut chain, _dir) = create_test_chain().unwrap();
        let reconciler = Reconciler::new(chain.get_store().clone());
        reconciler
            .append_legacy_row(&LegacyRow::pending("B1", "P1", 10.0, None))
            .unwrap();
        reconciler
            .append_legacy_row(&LegacyRow::pending("B9", "P1", 10.0, None))
            .unwrap();
        let tx = confirmed(&mut chain, "B1", "P1");

        let row = reconciler.approve(tx.get_id()).unwrap();
        assert_eq!(row.get_transaction_id(), Some(tx.get_id()));
        let rows = reconciler.legacy_rows().unwrap();
        assert!(rows[0].is_approved());
        assert!(!rows[1].is_approved());
    }

    #[test]
    fn test_fallback_refuses_to_guess() {
        let (mut chain, _dir) = create_test_chain().unwrap();
        let reconciler = Reconciler::new(chain.get_store().clone());
        for _ in 0..2 {
            reconciler
                .append_legacy_row(&LegacyRow::pending("B1", "P1", 10.0, None))
                .unwrap();
        }
        let tx = confirmed(&mut chain, "B1", "P1");

        assert!(matches!(
            reconciler.approve(tx.get_id()),
            Err(LedgerError::State(StateError::AmbiguousMatch { candidates: 2, .. }))
        ));
        assert!(reconciler
            .legacy_rows()
            .unwrap()
            .iter()
            .all(|row| !row.is_approved() && row.get_transaction_id().is_none()));
    }

    #[test]
    fn test_no_legacy_row() {
        let (mut chain, _dir) = create_test_chain().unwrap();
        let reconciler = Reconciler::new(chain.get_store().clone());
        let tx = confirmed(&mut chain, "B1", "P1");
        assert!(matches!(
            reconciler.approve(tx.get_id()),
            Err(LedgerError::NotFound { kind: "legacy row", .. })
        ));
    }

    #[test]
    fn test_reconcile_all_repairs_divergences() {
        let (mut chain, _dir) = create_test_chain().unwrap();
        let reconciler = Reconciler::new(chain.get_store().clone());

        let with_row = reconciler
            .record(&chain, &TransactionRequest::new("B1", "S1", "P1", 1.0))
            .unwrap();
        let without_row = Transaction::new("B2", "S1", "P2", 2.0, None).unwrap();
        chain.record_pending(&without_row).unwrap();
        chain.enqueue(without_row.clone());
        chain.mine_pending("admin", &CancelToken::new()).unwrap();

        let mut divergent = reconciler.divergences().unwrap();
        divergent.sort();
        let mut expected = vec![
            with_row.transaction_id.clone(),
            without_row.get_id().to_string(),
        ];
        expected.sort();
        assert_eq!(divergent, expected);

        let summary = reconciler.reconcile_all().unwrap();
        assert!(summary.is_clean());
        assert_eq!(summary.approved, vec![with_row.transaction_id.clone()]);
        assert_eq!(summary.recreated, vec![without_row.get_id().to_string()]);
        assert!(reconciler.divergences().unwrap().is_empty());
    }

    #[test]
    fn test_reconcile_contract_skips_approved() {
        let (mut chain, _dir) = create_test_chain().unwrap();
        let reconciler = Reconciler::new(chain.get_store().clone());
        let first = reconciler
            .record(&chain, &TransactionRequest::new("B1", "S1", "P1", 1.0))
            .unwrap();
        reconciler
            .record(&chain, &TransactionRequest::new("B1", "S1", "P2", 1.0))
            .unwrap();
        chain.mine_pending("admin", &CancelToken::new()).unwrap();

        let summary = reconciler.reconcile_contract("B1", "P1").unwrap();
        assert_eq!(summary.approved, vec![first.transaction_id.clone()]);
        assert!(summary.is_clean());
        assert_eq!(
            reconciler.reconcile_contract("B1", "P1").unwrap(),
            ReconcileSummary::default()
        );
    }

    #[test]
    fn test_reconcile_contract_keeps_going_past_missing_rows() {
        let (mut chain, _dir) = create_test_chain().unwrap();
        let reconciler = Reconciler::new(chain.get_store().clone());
        // Confirmed without any legacy row
        let orphan = confirmed(&mut chain, "B1", "P1");
        let recorded = reconciler
            .record(&chain, &TransactionRequest::new("B1", "S1", "P1", 1.0))
            .unwrap();
        chain.mine_pending("admin", &CancelToken::new()).unwrap();

        let summary = reconciler.reconcile_contract("B1", "P1").unwrap();
        assert_eq!(summary.approved, vec![recorded.transaction_id.clone()]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, orphan.get_id());
    }
}
