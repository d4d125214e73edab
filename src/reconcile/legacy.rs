use crate::core::Transaction;
use crate::error::{Result, StateError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum LegacyStatus {
    Pending,
    Approved,
}

impl fmt::Display for LegacyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegacyStatus::Pending => write!(f, "Pending"),
            LegacyStatus::Approved => write!(f, "Approved"),
        }
    }
}

/// Row of the legacy flat table: `[BuyerName, ProductName, Price, Status, TransactionID]`.
/// Rows written before ids were tracked have no `transaction_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct LegacyRow {
    buyer_name: String,
    product_name: String,
    price: f64,
    status: LegacyStatus,
    transaction_id: Option<String>,
}

impl LegacyRow {
    pub fn new(
        buyer_name: &str,
        product_name: &str,
        price: f64,
        status: LegacyStatus,
        transaction_id: Option<&str>,
    ) -> LegacyRow {
        LegacyRow {
            buyer_name: buyer_name.to_string(),
            product_name: product_name.to_string(),
            price,
            status,
            transaction_id: transaction_id.map(str::to_string),
        }
    }

    pub fn pending(
        buyer_name: &str,
        product_name: &str,
        price: f64,
        transaction_id: Option<&str>,
    ) -> LegacyRow {
        LegacyRow::new(
            buyer_name,
            product_name,
            price,
            LegacyStatus::Pending,
            transaction_id,
        )
    }

    /// Projection of a chain transaction, using the buyer and product ids as
    /// display names
    pub fn projection(tx: &Transaction, status: LegacyStatus) -> LegacyRow {
        LegacyRow::new(
            tx.get_buyer_id(),
            tx.get_product_id(),
            tx.get_amount(),
            status,
            Some(tx.get_id()),
        )
    }

    pub fn get_buyer_name(&self) -> &str {
        self.buyer_name.as_str()
    }

    pub fn get_product_name(&self) -> &str {
        self.product_name.as_str()
    }

    pub fn get_price(&self) -> f64 {
        self.price
    }

    pub fn get_status(&self) -> LegacyStatus {
        self.status
    }

    pub fn get_transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn is_approved(&self) -> bool {
        self.status == LegacyStatus::Approved
    }

    /// An id-less Pending row recorded for the same buyer and product
    pub fn could_belong_to(&self, tx: &Transaction) -> bool {
        self.transaction_id.is_none()
            && self.status == LegacyStatus::Pending
            && self.product_name == tx.get_product_id()
            && self.buyer_name == tx.get_buyer_id()
    }

    /// Marks the row Approved and stamps it with the transaction it belongs to
    pub fn approve(&mut self, transaction_id: &str) -> Result<()> {
        if self.is_approved() {
            return Err(StateError::AlreadyApproved(transaction_id.to_string()).into());
        }
        self.status = LegacyStatus::Approved;
        self.transaction_id = Some(transaction_id.to_string());
        Ok(())
    }
}

impl fmt::Display for LegacyRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.buyer_name,
            self.product_name,
            self.price,
            self.status,
            self.transaction_id.as_deref().unwrap_or("")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;

    #[test]
    fn test_fallback_candidate() {
        let tx = Transaction::new("B1", "S1", "P1", 5.0, None).unwrap();
        assert!(LegacyRow::pending("B1", "P1", 5.0, None).could_belong_to(&tx));
        // Already tied to some transaction
        assert!(!LegacyRow::pending("B1", "P1", 5.0, Some("other")).could_belong_to(&tx));
        assert!(!LegacyRow::pending("B2", "P1", 5.0, None).could_belong_to(&tx));
        assert!(!LegacyRow::new("B1", "P1", 5.0, LegacyStatus::Approved, None).could_belong_to(&tx));
    }

    #[test]
    fn test_approve_stamps_id_once() {
        let mut row = LegacyRow::pending("Alice", "Tomatoes", 3.5, None);
        row.approve("tx1").unwrap();
        assert!(row.is_approved());
        assert_eq!(row.get_transaction_id(), Some("tx1"));
        assert!(matches!(
            row.approve("tx1"),
            Err(LedgerError::State(StateError::AlreadyApproved(_)))
        ));
    }

    #[test]
    fn test_display_as_flat_row() {
        let row = LegacyRow::pending("Alice", "Tomatoes", 3.5, None);
        assert_eq!(row.to_string(), "Alice,Tomatoes,3.5,Pending,");
    }
}
