//! Ledger context
//!
//! `Ledger` owns one open store and everything built on it: the chain, the
//! contract book and the reconciler. Every collaborator-facing operation goes
//! through it so the legacy table follows each chain-side change.

pub mod report;

pub use report::ActivityReport;

use crate::config::Config;
use crate::core::{
    Block, Blockchain, CancelToken, ContractBook, RecordReceipt, SmartContract,
    TransactionRecord, TransactionRequest,
};
use crate::error::{LedgerError, Result};
use crate::reconcile::{LegacyRow, ReconcileSummary, Reconciler};
use crate::storage::Store;
use log::{info, warn};
use std::fs;

/// What a call to `Ledger::mine_pending` produced
#[derive(Debug, Clone)]
pub struct MiningOutcome {
    pub block: Block,
    /// Ids of the transfers included in the block
    pub confirmed: Vec<String>,
    /// Ids whose legacy row was approved
    pub approved: Vec<String>,
    /// Legacy propagation failures; the block stays committed
    pub divergences: Vec<LedgerError>,
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub contract: SmartContract,
    pub transaction_id: String,
    /// Earlier confirmed transactions of the same buyer and product whose
    /// legacy rows were approved on the way
    pub reconciled: Vec<String>,
    /// Legacy propagation failures; the contract stays Executed and its
    /// transaction stays queued
    pub divergences: Vec<LedgerError>,
}

pub struct Ledger {
    config: Config,
    store: Store,
    chain: Blockchain,
    contracts: ContractBook,
    reconciler: Reconciler,
    cancel: CancelToken,
}

impl Ledger {
    pub fn open(config: Config) -> Result<Ledger> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let store = Store::open(&config.data_dir)?;

        let cancel = CancelToken::new();
        let chain = Blockchain::open(store.clone(), &config, &mining_token(&cancel, &config))?;
        let contracts = ContractBook::new(store.contracts().clone());
        let reconciler = Reconciler::new(store.clone());

        info!(
            "Opened ledger at {} ({} blocks)",
            config.data_dir.display(),
            chain.len()
        );
        Ok(Ledger {
            config,
            store,
            chain,
            contracts,
            reconciler,
            cancel,
        })
    }

    pub fn record(&self, request: &TransactionRequest) -> Result<RecordReceipt> {
        self.reconciler.record(&self.chain, request)
    }

    /// Mines the pending pool into one block and approves the legacy rows of
    /// the transfers it confirmed. `None` pays the reward to the configured
    /// miner.
    pub fn mine_pending(&mut self, miner: Option<&str>) -> Result<MiningOutcome> {
        let miner = miner.unwrap_or(self.config.miner.as_str()).to_string();
        let token = mining_token(&self.cancel, &self.config);
        let block = self.chain.mine_pending(&miner, &token)?;

        let confirmed: Vec<String> = block
            .get_transactions()
            .iter()
            .filter_map(|entry| entry.as_transfer())
            .map(|tx| tx.get_id().to_string())
            .collect();

        let mut approved = Vec::new();
        let mut divergences = Vec::new();
        for transaction_id in &confirmed {
            match self.reconciler.approve(transaction_id) {
                Ok(_) => approved.push(transaction_id.clone()),
                Err(e) => {
                    warn!("Legacy row for {transaction_id} not approved: {e}");
                    divergences.push(LedgerError::Divergence {
                        transaction_id: transaction_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(MiningOutcome {
            block,
            confirmed,
            approved,
            divergences,
        })
    }

    pub fn create_contract(
        &mut self,
        buyer_id: &str,
        seller_id: &str,
        product_id: &str,
        price: f64,
        terms: &str,
    ) -> Result<String> {
        self.contracts
            .create(buyer_id, seller_id, product_id, price, terms)
    }

    /// Executes the contract and records the transaction it settles, Pending
    /// in both tables and queued for the next block. Once the contract is
    /// Executed the call succeeds; legacy failures come back as divergences.
    pub fn execute_contract(&mut self, contract_id: &str) -> Result<ExecutionOutcome> {
        let contract = self.contracts.execute(contract_id)?;
        let tx = contract.derive_transaction()?;
        let transaction_id = tx.get_id().to_string();
        let row = LegacyRow::pending(
            contract.get_buyer_id(),
            contract.get_product_id(),
            contract.get_price(),
            Some(tx.get_id()),
        );

        self.chain.record_pending(&tx)?;
        self.chain.enqueue(tx);

        let mut divergences = Vec::new();
        if let Err(e) = self.reconciler.append_legacy_row(&row) {
            warn!("Legacy row for {transaction_id} not written: {e}");
            divergences.push(LedgerError::Divergence {
                transaction_id: transaction_id.clone(),
                reason: e.to_string(),
            });
        }

        let reconciled = match self
            .reconciler
            .reconcile_contract(contract.get_buyer_id(), contract.get_product_id())
        {
            Ok(summary) => {
                divergences.extend(summary.failed.into_iter().map(|(transaction_id, reason)| {
                    LedgerError::Divergence {
                        transaction_id,
                        reason,
                    }
                }));
                summary.approved
            }
            Err(e) => {
                warn!("Earlier purchases for contract {contract_id} not reconciled: {e}");
                divergences.push(LedgerError::Divergence {
                    transaction_id: transaction_id.clone(),
                    reason: e.to_string(),
                });
                Vec::new()
            }
        };

        Ok(ExecutionOutcome {
            contract,
            transaction_id,
            reconciled,
            divergences,
        })
    }

    pub fn get_contract(&mut self, contract_id: &str) -> Result<SmartContract> {
        self.contracts.get(contract_id)
    }

    pub fn approve(&self, transaction_id: &str) -> Result<LegacyRow> {
        self.reconciler.approve(transaction_id)
    }

    pub fn transaction_history(&self, user_id: Option<&str>) -> Result<Vec<TransactionRecord>> {
        self.chain.transaction_history(user_id)
    }

    pub fn contract_history(&self, user_id: Option<&str>) -> Result<Vec<SmartContract>> {
        self.contracts.history(user_id)
    }

    pub fn is_valid(&self) -> bool {
        self.chain.is_valid()
    }

    pub fn verify(&self) -> Result<()> {
        self.chain.verify()
    }

    pub fn report(&self) -> Result<ActivityReport> {
        Ok(ActivityReport::collect(
            &self.chain,
            &self.transaction_history(None)?,
            &self.contract_history(None)?,
            &self.legacy_rows()?,
        ))
    }

    pub fn reconcile_all(&self) -> Result<ReconcileSummary> {
        self.reconciler.reconcile_all()
    }

    pub fn divergences(&self) -> Result<Vec<String>> {
        self.reconciler.divergences()
    }

    pub fn append_legacy_row(&self, row: &LegacyRow) -> Result<u64> {
        self.reconciler.append_legacy_row(row)
    }

    pub fn legacy_rows(&self) -> Result<Vec<LegacyRow>> {
        self.reconciler.legacy_rows()
    }

    /// Token checked by mining; cancelling it from another thread aborts the
    /// current `mine_pending`
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn get_store(&self) -> &Store {
        &self.store
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}

/// The ledger's token, with the configured deadline counted from now
fn mining_token(cancel: &CancelToken, config: &Config) -> CancelToken {
    match config.mining_timeout() {
        Some(timeout) => cancel.with_timeout(timeout),
        None => cancel.clone(),
    }
}
