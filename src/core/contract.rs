//! Smart contracts
//!
//! A contract is a conditional agreement between a buyer and a seller over one
//! product. It is created in the `Created` state and moves once, irreversibly,
//! to `Executed`. Execution is what turns the agreement into a transaction.

use crate::core::Transaction;
use crate::error::{LedgerError, Result, StateError, ValidationError};
use crate::storage::Table;
use crate::utils::{current_timestamp, new_id};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum ContractStatus {
    Created,
    Executed { execution_time: i64 },
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractStatus::Created => write!(f, "Created"),
            ContractStatus::Executed { .. } => write!(f, "Executed"),
        }
    }
}

/// Row of the contracts table:
/// `[ContractID, BuyerID, SellerID, ProductID, Price, Terms, Status, CreationTime, ExecutionTime]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct SmartContract {
    contract_id: String,
    buyer_id: String,
    seller_id: String,
    product_id: String,
    price: f64,
    terms: String,
    status: ContractStatus,
    creation_time: i64,
}

impl SmartContract {
    pub fn new(
        buyer_id: &str,
        seller_id: &str,
        product_id: &str,
        price: f64,
        terms: &str,
    ) -> Result<SmartContract> {
        for (field, value) in [
            ("buyer_id", buyer_id),
            ("seller_id", seller_id),
            ("product_id", product_id),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(field).into());
            }
        }
        if !price.is_finite() || price < 0.0 {
            return Err(ValidationError::InvalidField {
                field: "price",
                reason: format!("must be a non-negative number, got {price}"),
            }
            .into());
        }

        Ok(SmartContract {
            contract_id: new_id(),
            buyer_id: buyer_id.to_string(),
            seller_id: seller_id.to_string(),
            product_id: product_id.to_string(),
            price,
            terms: terms.to_string(),
            status: ContractStatus::Created,
            creation_time: current_timestamp()?,
        })
    }

    pub fn get_contract_id(&self) -> &str {
        self.contract_id.as_str()
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

    pub fn get_price(&self) -> f64 {
        self.price
    }

    pub fn get_terms(&self) -> &str {
        self.terms.as_str()
    }

    pub fn get_status(&self) -> &ContractStatus {
        &self.status
    }

    pub fn get_creation_time(&self) -> i64 {
        self.creation_time
    }

    pub fn get_execution_time(&self) -> Option<i64> {
        match self.status {
            ContractStatus::Created => None,
            ContractStatus::Executed { execution_time } => Some(execution_time),
        }
    }

    pub fn is_executed(&self) -> bool {
        matches!(self.status, ContractStatus::Executed { .. })
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    fn mark_executed(&mut self, execution_time: i64) -> Result<()> {
        if self.is_executed() {
            return Err(StateError::AlreadyExecuted(self.contract_id.clone()).into());
        }
        self.status = ContractStatus::Executed { execution_time };
        Ok(())
    }

    /// The transfer an executed contract settles: the contract's parties and
    /// product, for the contract price, linked back to the contract.
    pub fn derive_transaction(&self) -> Result<Transaction> {
        Transaction::new(
            &self.buyer_id,
            &self.seller_id,
            &self.product_id,
            self.price,
            Some(&self.contract_id),
        )
    }
}

/// Precondition checked before a contract may execute
pub trait ContractCondition {
    fn check(&self, contract: &SmartContract) -> std::result::Result<(), String>;
}

/// Satisfied by every existing contract
pub struct AlwaysSatisfied;

impl ContractCondition for AlwaysSatisfied {
    fn check(&self, _contract: &SmartContract) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Contracts backed by the contracts table, with an in-memory cache of the
/// ones already seen by this process
pub struct ContractBook {
    table: Table,
    cache: HashMap<String, SmartContract>,
    condition: Box<dyn ContractCondition>,
}

impl ContractBook {
    pub fn new(table: Table) -> ContractBook {
        ContractBook {
            table,
            cache: HashMap::new(),
            condition: Box::new(AlwaysSatisfied),
        }
    }

    pub fn with_condition(mut self, condition: Box<dyn ContractCondition>) -> ContractBook {
        self.condition = condition;
        self
    }

    pub fn create(
        &mut self,
        buyer_id: &str,
        seller_id: &str,
        product_id: &str,
        price: f64,
        terms: &str,
    ) -> Result<String> {
        let contract = SmartContract::new(buyer_id, seller_id, product_id, price, terms)?;
        let contract_id = contract.get_contract_id().to_string();
        self.table.insert(contract_id.as_bytes(), &contract)?;
        info!("Created contract {contract_id} for product {product_id}");
        self.cache.insert(contract_id.clone(), contract);
        Ok(contract_id)
    }

    pub fn get(&mut self, contract_id: &str) -> Result<SmartContract> {
        if let Some(contract) = self.cache.get(contract_id) {
            return Ok(contract.clone());
        }
        let contract: SmartContract = self
            .table
            .get(contract_id.as_bytes())?
            .ok_or_else(|| LedgerError::not_found("contract", contract_id))?;
        self.cache.insert(contract_id.to_string(), contract.clone());
        Ok(contract)
    }

    /// Moves the contract to `Executed`. An executed contract is refused with
    /// `AlreadyExecuted` and left as it is; the status is checked again
    /// against the stored row under the table's write guard.
    pub fn execute(&mut self, contract_id: &str) -> Result<SmartContract> {
        let contract = self.get(contract_id)?;
        if contract.is_executed() {
            return Err(StateError::AlreadyExecuted(contract_id.to_string()).into());
        }
        if let Err(reason) = self.condition.check(&contract) {
            return Err(StateError::ConditionsNotMet {
                contract_id: contract_id.to_string(),
                reason,
            }
            .into());
        }

        let execution_time = current_timestamp()?;
        let executed = match self.table.update(
            contract_id.as_bytes(),
            "contract",
            |stored: &mut SmartContract| stored.mark_executed(execution_time),
        ) {
            Ok(executed) => executed,
            Err(e) => {
                // Our cached copy was stale
                self.cache.remove(contract_id);
                return Err(e);
            }
        };
        info!("Executed contract {contract_id}");
        self.cache.insert(contract_id.to_string(), executed.clone());
        Ok(executed)
    }

    /// Contracts where `user_id` is buyer or seller, all of them for `None`,
    /// oldest first
    pub fn history(&self, user_id: Option<&str>) -> Result<Vec<SmartContract>> {
        let mut contracts: Vec<SmartContract> = self
            .table
            .rows::<SmartContract>()?
            .into_iter()
            .filter(|c| user_id.map_or(true, |user| c.involves(user)))
            .collect();
        contracts.sort_by_key(|c| c.creation_time);
        Ok(contracts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use tempfile::tempdir;

    struct NeverSatisfied;

    impl ContractCondition for NeverSatisfied {
        fn check(&self, _contract: &SmartContract) -> std::result::Result<(), String> {
            Err("delivery not confirmed".to_string())
        }
    }

    #[test]
    fn test_create_persists_created_contract() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let mut book = ContractBook::new(store.contracts().clone());

        let id = book.create("B1", "S1", "P1", 250.0, "deliver in 3 days").unwrap();
        let stored: SmartContract = store.contracts().get(id.as_bytes()).unwrap().unwrap();
        assert_eq!(stored.get_status(), &ContractStatus::Created);
        assert_eq!(stored.get_execution_time(), None);
        assert_eq!(stored.get_terms(), "deliver in 3 days");
    }

    #[test]
    fn test_execute_twice() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let mut book = ContractBook::new(store.contracts().clone());
        let id = book.create("B1", "S1", "P1", 250.0, "").unwrap();

        let executed = book.execute(&id).unwrap();
        assert!(executed.is_executed());
        let first_time = executed.get_execution_time().unwrap();

        let second = book.execute(&id);
        assert!(matches!(
            second,
            Err(LedgerError::State(StateError::AlreadyExecuted(ref cid))) if cid == &id
        ));
        let stored: SmartContract = store.contracts().get(id.as_bytes()).unwrap().unwrap();
        assert_eq!(stored.get_execution_time(), Some(first_time));
    }

    #[test]
    fn test_execute_loads_from_table_on_cache_miss() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let id = ContractBook::new(store.contracts().clone())
            .create("B1", "S1", "P1", 10.0, "")
            .unwrap();

        let mut fresh = ContractBook::new(store.contracts().clone());
        assert!(fresh.execute(&id).unwrap().is_executed());
        // The stale copy in another book must not execute again
        let mut stale = ContractBook::new(store.contracts().clone());
        stale.cache.insert(
            id.clone(),
            SmartContract {
                status: ContractStatus::Created,
                ..fresh.get(&id).unwrap()
            },
        );
        assert!(matches!(
            stale.execute(&id),
            Err(LedgerError::State(StateError::AlreadyExecuted(_)))
        ));
    }

    #[test]
    fn test_unknown_contract() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let mut book = ContractBook::new(store.contracts().clone());
        assert!(matches!(
            book.execute("missing"),
            Err(LedgerError::NotFound { kind: "contract", .. })
        ));
    }

    #[test]
    fn test_condition_failure_keeps_contract_created() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let mut book =
            ContractBook::new(store.contracts().clone()).with_condition(Box::new(NeverSatisfied));
        let id = book.create("B1", "S1", "P1", 10.0, "").unwrap();

        assert!(matches!(
            book.execute(&id),
            Err(LedgerError::State(StateError::ConditionsNotMet { .. }))
        ));
        assert!(!book.get(&id).unwrap().is_executed());
    }

    #[test]
    fn test_derived_transaction_links_contract() {
        let contract = SmartContract::new("B1", "S1", "P1", 42.5, "").unwrap();
        let tx = contract.derive_transaction().unwrap();
        assert_eq!(tx.get_amount(), 42.5);
        assert_eq!(tx.get_buyer_id(), "B1");
        assert_eq!(tx.get_contract_id(), Some(contract.get_contract_id()));
    }

    #[test]
    fn test_history_filters_by_party() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let mut book = ContractBook::new(store.contracts().clone());
        book.create("B1", "S1", "P1", 1.0, "").unwrap();
        book.create("B2", "S2", "P2", 1.0, "").unwrap();

        assert_eq!(book.history(None).unwrap().len(), 2);
        assert_eq!(book.history(Some("S2")).unwrap().len(), 1);
        assert!(book.history(Some("nobody")).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_price() {
        assert!(matches!(
            SmartContract::new("B1", "S1", "P1", -1.0, ""),
            Err(LedgerError::Validation(ValidationError::InvalidField { field: "price", .. }))
        ));
    }
}
