// Transaction records for the ledger
// A transaction is created from a collaborator request, buffered in the pending
// pool and embedded in a mined block. Its parties and amount never change; only
// the status row in the transaction table moves from Pending to Confirmed.

use crate::error::{Result, ValidationError};
use crate::utils::{current_timestamp, new_id};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sender recorded on mining reward entries
pub const REWARD_SENDER: &str = "System";

/// The immutable part of a transfer between a buyer and a seller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: String,
    buyer_id: String,
    seller_id: String,
    product_id: String,
    amount: f64,
    timestamp: i64,
    contract_id: Option<String>,
}

impl Transaction {
    pub fn new(
        buyer_id: &str,
        seller_id: &str,
        product_id: &str,
        amount: f64,
        contract_id: Option<&str>,
    ) -> Result<Transaction> {
        validate_amount(amount)?;
        Ok(Transaction {
            id: new_id(),
            buyer_id: buyer_id.to_string(),
            seller_id: seller_id.to_string(),
            product_id: product_id.to_string(),
            amount,
            timestamp: current_timestamp()?,
            contract_id: contract_id.map(str::to_string),
        })
    }

    pub fn get_id(&self) -> &str {
        self.id.as_str()
    }

    pub fn get_buyer_id(&self) -> &str {
        self.buyer_id.as_str()
    }

    pub fn get_seller_id(&self) -> &str {
        self.seller_id.as_str()
    }

    pub fn get_product_id(&self) -> &str {
        self.product_id.as_str()
    }

    pub fn get_amount(&self) -> f64 {
        self.amount
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_contract_id(&self) -> Option<&str> {
        self.contract_id.as_deref()
    }

    /// True when `user_id` is either party of the transfer
    pub fn involves(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }
}

fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ValidationError::InvalidField {
            field: "amount",
            reason: format!("must be a non-negative number, got {amount}"),
        }
        .into());
    }
    Ok(())
}

/// Status of a row in the transaction table. A confirmed row always knows
/// the block that confirmed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum TransactionStatus {
    Pending,
    Confirmed { block_hash: String },
}

impl TransactionStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TransactionStatus::Confirmed { .. })
    }

    pub fn block_hash(&self) -> Option<&str> {
        match self {
            TransactionStatus::Pending => None,
            TransactionStatus::Confirmed { block_hash } => Some(block_hash.as_str()),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "Pending"),
            TransactionStatus::Confirmed { .. } => write!(f, "Confirmed"),
        }
    }
}

/// Row of the chain transaction table:
/// `[ID, BuyerID, SellerID, ProductID, Amount, Timestamp, Status, BlockHash]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TransactionRecord {
    transaction: Transaction,
    status: TransactionStatus,
}

impl TransactionRecord {
    pub fn pending(transaction: Transaction) -> TransactionRecord {
        TransactionRecord {
            transaction,
            status: TransactionStatus::Pending,
        }
    }

    pub fn confirm(&mut self, block_hash: &str) {
        self.status = TransactionStatus::Confirmed {
            block_hash: block_hash.to_string(),
        };
    }

    pub fn get_transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn get_id(&self) -> &str {
        self.transaction.get_id()
    }

    pub fn get_status(&self) -> &TransactionStatus {
        &self.status
    }
}

/// Mining reward paid by the system to the miner of a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardTransaction {
    sender: String,
    recipient: String,
    amount: f64,
}

impl RewardTransaction {
    pub fn new(recipient: &str, amount: f64) -> RewardTransaction {
        RewardTransaction {
            sender: String::from(REWARD_SENDER),
            recipient: recipient.to_string(),
            amount,
        }
    }

    pub fn get_recipient(&self) -> &str {
        self.recipient.as_str()
    }

    pub fn get_amount(&self) -> f64 {
        self.amount
    }
}

/// Entry of a block's transaction list, tagged by `type` in the payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockTransaction {
    Transfer(Transaction),
    Reward(RewardTransaction),
}

impl BlockTransaction {
    pub fn is_reward(&self) -> bool {
        matches!(self, BlockTransaction::Reward(_))
    }

    pub fn as_transfer(&self) -> Option<&Transaction> {
        match self {
            BlockTransaction::Transfer(tx) => Some(tx),
            BlockTransaction::Reward(_) => None,
        }
    }
}

/// Transaction-shaped request handed over by a collaborator. Fields are
/// optional because the request comes from loosely structured callers; the
/// required ones are checked by `validate`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransactionRequest {
    pub buyer_id: Option<String>,
    pub seller_id: Option<String>,
    pub product_id: Option<String>,
    pub amount: Option<f64>,
    pub buyer_name: Option<String>,
    pub product_name: Option<String>,
}

impl TransactionRequest {
    pub fn new(buyer_id: &str, seller_id: &str, product_id: &str, amount: f64) -> Self {
        TransactionRequest {
            buyer_id: Some(buyer_id.to_string()),
            seller_id: Some(seller_id.to_string()),
            product_id: Some(product_id.to_string()),
            amount: Some(amount),
            buyer_name: None,
            product_name: None,
        }
    }

    pub fn with_names(mut self, buyer_name: &str, product_name: &str) -> Self {
        self.buyer_name = Some(buyer_name.to_string());
        self.product_name = Some(product_name.to_string());
        self
    }

    /// Checks the required fields in the order buyer_id, seller_id,
    /// product_id, amount and builds a fresh transaction.
    pub fn validate(&self) -> Result<Transaction> {
        let buyer_id = required(&self.buyer_id, "buyer_id")?;
        let seller_id = required(&self.seller_id, "seller_id")?;
        let product_id = required(&self.product_id, "product_id")?;
        let amount = self
            .amount
            .ok_or(ValidationError::MissingField("amount"))?;
        Transaction::new(buyer_id, seller_id, product_id, amount, None)
    }

    /// Display name written to the legacy table, the buyer id when absent
    pub fn legacy_buyer_name(&self) -> &str {
        self.buyer_name
            .as_deref()
            .or(self.buyer_id.as_deref())
            .unwrap_or_default()
    }

    pub fn legacy_product_name(&self) -> &str {
        self.product_name
            .as_deref()
            .or(self.product_id.as_deref())
            .unwrap_or_default()
    }
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field).into()),
    }
}

/// What `record` hands back to the collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct RecordReceipt {
    pub transaction_id: String,
    pub status: TransactionStatus,
}
