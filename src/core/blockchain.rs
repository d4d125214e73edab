// The chain: mined blocks in index order plus the pool of transactions waiting
// for the next block. Blocks live in the `blocks` table keyed by index; the
// status of every transfer lives in the `transactions` table keyed by id.

use crate::config::Config;
use crate::core::{
    Block, BlockTransaction, CancelToken, RewardTransaction, Transaction, TransactionRecord,
};
use crate::error::{IntegrityError, LedgerError, Result, StateError};
use crate::storage::{sequence_key, BlockRow, MemoryPool, Store};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{info, warn};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

pub struct Blockchain {
    store: Store,
    blocks: Vec<Block>,
    pending: MemoryPool,
    difficulty: usize,
    mining_reward: f64,
}

impl Blockchain {
    /// Loads the persisted chain, creating and persisting the genesis block
    /// when the block table has no rows yet.
    pub fn open(store: Store, config: &Config, cancel: &CancelToken) -> Result<Blockchain> {
        let mut chain = Blockchain {
            store,
            blocks: Vec::new(),
            pending: MemoryPool::new(),
            difficulty: config.difficulty,
            mining_reward: config.mining_reward,
        };
        chain.load()?;

        if chain.blocks.is_empty() {
            // Rows that exist but cannot be read are never overwritten
            if !chain.store.blocks().is_empty() {
                return Err(IntegrityError::Unreadable.into());
            }
            chain.create_genesis(cancel)?;
        }
        Ok(chain)
    }

    /// Rebuilds the in-memory chain from the block table. Rows that fail to
    /// decode, or whose transaction payload does not parse, are skipped.
    pub fn load(&mut self) -> Result<()> {
        let mut blocks = Vec::new();
        for (key, value) in self.store.blocks().raw_rows()? {
            let row: BlockRow = match deserialize(value.as_ref()) {
                Ok(row) => row,
                Err(e) => {
                    warn!(
                        "Skipping unreadable block row {}: {e}",
                        HEXLOWER.encode(key.as_ref())
                    );
                    continue;
                }
            };
            let index = row.index;
            match row.into_block() {
                Ok(block) => blocks.push(block),
                Err(e) => warn!("Skipping block {index} with malformed transactions payload: {e}"),
            }
        }
        info!("Loaded {} blocks", blocks.len());
        self.blocks = blocks;
        Ok(())
    }

    fn create_genesis(&mut self, cancel: &CancelToken) -> Result<()> {
        info!("Creating genesis block");
        let genesis = Block::generate_genesis_block(self.difficulty, cancel)?;
        let row = BlockRow::from_block(&genesis)?;
        self.store
            .blocks()
            .insert(&sequence_key(genesis.get_index()), &row)?;
        self.blocks.push(genesis);
        Ok(())
    }

    /// Buffers a transaction for the next block. Nothing is persisted here;
    /// a transaction already waiting is not queued twice.
    pub fn enqueue(&self, transaction: Transaction) {
        let id = transaction.get_id().to_string();
        if !self.pending.add(transaction) {
            warn!("Transaction {id} is already pending");
        }
    }

    /// Writes the Pending row for a transaction in the transaction table
    pub fn record_pending(&self, transaction: &Transaction) -> Result<()> {
        let record = TransactionRecord::pending(transaction.clone());
        self.store
            .transactions()
            .insert(transaction.get_id().as_bytes(), &record)
    }

    /// Mines every pending transaction plus a reward entry for `miner_address`
    /// into a new block.
    ///
    /// The block row and the Confirmed status of each included transaction
    /// are committed in one sled transaction. If mining is cancelled or the
    /// commit fails, the pending pool and the in-memory chain are untouched.
    pub fn mine_pending(&mut self, miner_address: &str, cancel: &CancelToken) -> Result<Block> {
        let pending = self.pending.get_all();
        if pending.is_empty() {
            info!("No transactions to mine");
            return Err(StateError::NoPendingTransactions.into());
        }

        let mut entries: Vec<BlockTransaction> = pending
            .iter()
            .cloned()
            .map(BlockTransaction::Transfer)
            .collect();
        entries.push(BlockTransaction::Reward(RewardTransaction::new(
            miner_address,
            self.mining_reward,
        )));

        let (index, previous_hash) = self.next_position()?;
        info!(
            "Mining block {index} with {} transactions (difficulty: {})",
            entries.len(),
            self.difficulty
        );
        let block = Block::new_block(index, previous_hash, entries, self.difficulty, cancel)?;

        self.commit_block(&block, &pending)?;
        self.blocks.push(block.clone());

        let mined: Vec<&str> = pending.iter().map(|tx| tx.get_id()).collect();
        self.pending.remove_all(&mined);

        info!(
            "Successfully mined block {}: {} (reward to {miner_address})",
            block.get_index(),
            block.get_hash()
        );
        Ok(block)
    }

    fn next_position(&self) -> Result<(u64, String)> {
        let latest = self.latest_block().ok_or(IntegrityError::Unreadable)?;
        let mut index = latest.get_index() + 1;
        // A skipped row still owns its key
        if let Some(last) = self.store.blocks().last_sequence()? {
            index = index.max(last + 1);
        }
        Ok((index, latest.get_hash().to_string()))
    }

    fn commit_block(&self, block: &Block, included: &[Transaction]) -> Result<()> {
        let block_key = sequence_key(block.get_index());
        let block_bytes = serialize(&BlockRow::from_block(block)?)?;

        let transactions = self.store.transactions();
        let _guard = transactions.write_guard()?;

        let mut confirmed = Vec::with_capacity(included.len());
        for tx in included {
            let mut record = transactions
                .get::<TransactionRecord>(tx.get_id().as_bytes())?
                .unwrap_or_else(|| TransactionRecord::pending(tx.clone()));
            record.confirm(block.get_hash());
            confirmed.push((tx.get_id().to_string(), serialize(&record)?));
        }

        (self.store.blocks().tree(), transactions.tree())
            .transaction(|(blocks_tree, tx_tree)| {
                blocks_tree.insert(&block_key[..], block_bytes.as_slice())?;
                for (id, bytes) in &confirmed {
                    tx_tree.insert(id.as_bytes(), bytes.as_slice())?;
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e: TransactionError<()>| {
                LedgerError::Database(format!(
                    "Failed to commit block {}: {e:?}",
                    block.get_index()
                ))
            })?;
        Ok(())
    }

    /// Walks the chain and reports the first block whose hash does not match
    /// its fields or whose `previous_hash` does not match its predecessor.
    /// Genesis is only hash-checked when a skipped row left another block
    /// first.
    pub fn verify(&self) -> Result<()> {
        if let Some(first) = self.blocks.first() {
            if !first.is_genesis() {
                check_hash(first)?;
            }
        }
        for pair in self.blocks.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);
            check_hash(current)?;
            if current.get_previous_hash() != previous.get_hash() {
                return Err(IntegrityError::BrokenLink {
                    index: current.get_index(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        match self.verify() {
            Ok(()) => true,
            Err(e) => {
                warn!("Chain verification failed: {e}");
                false
            }
        }
    }

    pub fn get_transaction(&self, transaction_id: &str) -> Result<Option<TransactionRecord>> {
        self.store
            .transactions()
            .get(transaction_id.as_bytes())
    }

    /// Rows of the transaction table, oldest first, optionally limited to
    /// transactions where `user_id` is the buyer or the seller
    pub fn transaction_history(&self, user_id: Option<&str>) -> Result<Vec<TransactionRecord>> {
        let mut records: Vec<TransactionRecord> = self
            .store
            .transactions()
            .rows::<TransactionRecord>()?
            .into_iter()
            .filter(|r| user_id.map_or(true, |user| r.get_transaction().involves(user)))
            .collect();
        records.sort_by(|a, b| {
            a.get_transaction()
                .get_timestamp()
                .cmp(&b.get_transaction().get_timestamp())
                .then_with(|| a.get_id().cmp(b.get_id()))
        });
        Ok(records)
    }

    pub fn find_block(&self, hash: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.get_hash() == hash)
    }

    pub fn blocks(&self) -> &[Block] {
        self.blocks.as_slice()
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.pending.get_all()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn get_store(&self) -> &Store {
        &self.store
    }
}

fn check_hash(block: &Block) -> Result<()> {
    match block.compute_hash() {
        Ok(hash) if hash == block.get_hash() => Ok(()),
        _ => Err(IntegrityError::HashMismatch {
            index: block.get_index(),
        }
        .into()),
    }
}
