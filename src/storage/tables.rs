// Persisted tables of the ledger, one sled tree per table.
// Each table records its header row in the meta tree the first time it is
// opened; reopening with a different header is refused. Read-modify-write
// cycles on a table go through its write guard so two updates cannot lose
// each other's changes.

use crate::core::{Block, BlockTransaction};
use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use log::debug;
use serde::{Deserialize, Serialize};
use sled::{Db, IVec, Tree};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

pub const BLOCKS_TABLE: &str = "blocks";
pub const TRANSACTIONS_TABLE: &str = "transactions";
pub const CONTRACTS_TABLE: &str = "contracts";
pub const LEGACY_TABLE: &str = "legacy_transactions";
const META_TREE: &str = "meta";

// A handle dropped just before reopening can still hold the directory lock
// while sled's flusher winds down
const OPEN_ATTEMPTS: u32 = 25;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(40);

pub const BLOCKS_HEADER: &[&str] = &[
    "Index",
    "Timestamp",
    "PreviousHash",
    "Hash",
    "Nonce",
    "TransactionsPayload",
];
pub const TRANSACTIONS_HEADER: &[&str] = &[
    "ID",
    "BuyerID",
    "SellerID",
    "ProductID",
    "Amount",
    "Timestamp",
    "Status",
    "BlockHash",
];
pub const CONTRACTS_HEADER: &[&str] = &[
    "ContractID",
    "BuyerID",
    "SellerID",
    "ProductID",
    "Price",
    "Terms",
    "Status",
    "CreationTime",
    "ExecutionTime",
];
pub const LEGACY_HEADER: &[&str] = &[
    "BuyerName",
    "ProductName",
    "Price",
    "Status",
    "TransactionID",
];

/// Big-endian key so sled iterates rows in numeric order
pub fn sequence_key(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

fn key_to_u64(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

#[derive(Clone)]
pub struct Table {
    name: &'static str,
    tree: Tree,
    lock: Arc<Mutex<()>>,
}

impl Table {
    fn open(
        db: &Db,
        meta: &Tree,
        name: &'static str,
        header: &'static [&'static str],
    ) -> Result<Table> {
        let tree = db
            .open_tree(name)
            .map_err(|e| LedgerError::Database(format!("Failed to open {name} table: {e}")))?;

        let header_key = format!("header:{name}");
        let expected = header.join(",");
        match meta.get(&header_key)? {
            Some(stored) if stored.as_ref() != expected.as_bytes() => {
                return Err(LedgerError::Database(format!(
                    "Table {name} has header {:?}, expected {expected:?}",
                    String::from_utf8_lossy(stored.as_ref())
                )));
            }
            Some(_) => {}
            None => {
                meta.insert(header_key.as_bytes(), expected.as_bytes())?;
            }
        }

        Ok(Table {
            name,
            tree,
            lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Exclusive access for a read-modify-write cycle on this table
    pub fn write_guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| LedgerError::Database(format!("Lock on {} table poisoned", self.name)))
    }

    pub fn get<T>(&self, key: &[u8]) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de> + bincode::Decode<()>,
    {
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn insert<T: Serialize + bincode::Encode>(&self, key: &[u8], row: &T) -> Result<()> {
        let bytes = serialize(row)?;
        self.tree.insert(key, bytes)?;
        Ok(())
    }

    /// Loads the row under `key`, applies `change` and writes it back while
    /// holding the table's write guard. Nothing is written when `change`
    /// fails.
    pub fn update<T, F>(&self, key: &[u8], kind: &'static str, change: F) -> Result<T>
    where
        T: Serialize + bincode::Encode + for<'de> Deserialize<'de> + bincode::Decode<()>,
        F: FnOnce(&mut T) -> Result<()>,
    {
        let _guard = self.write_guard()?;
        let mut row: T = self.get(key)?.ok_or_else(|| {
            LedgerError::not_found(kind, String::from_utf8_lossy(key).into_owned())
        })?;
        change(&mut row)?;
        self.insert(key, &row)?;
        Ok(row)
    }

    /// Every row, failing on the first one that does not decode
    pub fn rows<T>(&self) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de> + bincode::Decode<()>,
    {
        let mut rows = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item?;
            rows.push(deserialize(value.as_ref())?);
        }
        Ok(rows)
    }

    /// Every row with its key, still encoded
    pub fn raw_rows(&self) -> Result<Vec<(IVec, IVec)>> {
        let mut rows = Vec::new();
        for item in self.tree.iter() {
            rows.push(item?);
        }
        Ok(rows)
    }

    /// Highest numeric key, for tables keyed by `sequence_key`
    pub fn last_sequence(&self) -> Result<Option<u64>> {
        Ok(self.tree.last()?.and_then(|(key, _)| key_to_u64(key.as_ref())))
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// Row of the block table. The transaction list is kept as a JSON payload so
/// a row with an unreadable payload can be told apart and skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct BlockRow {
    pub index: u64,
    pub timestamp: i64,
    pub previous_hash: String,
    pub hash: String,
    pub nonce: u64,
    pub transactions_payload: String,
}

impl BlockRow {
    pub fn from_block(block: &Block) -> Result<BlockRow> {
        Ok(BlockRow {
            index: block.get_index(),
            timestamp: block.get_timestamp(),
            previous_hash: block.get_previous_hash().to_string(),
            hash: block.get_hash().to_string(),
            nonce: block.get_nonce(),
            transactions_payload: serde_json::to_string(block.get_transactions())?,
        })
    }

    pub fn into_block(self) -> Result<Block> {
        let transactions: Vec<BlockTransaction> =
            serde_json::from_str(&self.transactions_payload)?;
        Ok(Block::from_parts(
            self.index,
            self.timestamp,
            transactions,
            self.previous_hash,
            self.nonce,
            self.hash,
        ))
    }
}

/// Handle on the ledger database and its four tables
#[derive(Clone)]
pub struct Store {
    db: Db,
    blocks: Table,
    transactions: Table,
    contracts: Table,
    legacy: Table,
}

impl Store {
    pub fn open(path: &Path) -> Result<Store> {
        let db = open_db(path)?;
        let meta = db
            .open_tree(META_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open meta tree: {e}")))?;

        let blocks = Table::open(&db, &meta, BLOCKS_TABLE, BLOCKS_HEADER)?;
        let transactions = Table::open(&db, &meta, TRANSACTIONS_TABLE, TRANSACTIONS_HEADER)?;
        let contracts = Table::open(&db, &meta, CONTRACTS_TABLE, CONTRACTS_HEADER)?;
        let legacy = Table::open(&db, &meta, LEGACY_TABLE, LEGACY_HEADER)?;

        Ok(Store {
            db,
            blocks,
            transactions,
            contracts,
            legacy,
        })
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn blocks(&self) -> &Table {
        &self.blocks
    }

    pub fn transactions(&self) -> &Table {
        &self.transactions
    }

    pub fn contracts(&self) -> &Table {
        &self.contracts
    }

    pub fn legacy(&self) -> &Table {
        &self.legacy
    }

    /// Monotonic across restarts; used to key append-only tables
    pub fn next_sequence(&self) -> Result<u64> {
        Ok(self.db.generate_id()?)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn open_db(path: &Path) -> Result<Db> {
    let mut attempt = 1;
    loop {
        match sled::open(path) {
            Ok(db) => return Ok(db),
            Err(sled::Error::Io(ref e)) if attempt < OPEN_ATTEMPTS && is_lock_contention(e) => {
                debug!(
                    "Database at {} is still locked (attempt {attempt}), retrying",
                    path.display()
                );
                attempt += 1;
                thread::sleep(OPEN_RETRY_DELAY);
            }
            Err(e) => {
                return Err(LedgerError::Database(format!(
                    "Failed to open database at {}: {e}",
                    path.display()
                )))
            }
        }
    }
}

fn is_lock_contention(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.to_string().contains("could not acquire lock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
    struct Counter {
        value: u32,
    }

    #[test]
    fn test_headers_are_recorded() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let meta = store.get_db().open_tree(META_TREE).unwrap();
        let stored = meta.get("header:legacy_transactions").unwrap().unwrap();
        assert_eq!(
            stored.as_ref(),
            b"BuyerName,ProductName,Price,Status,TransactionID"
        );
        let blocks = meta.get("header:blocks").unwrap().unwrap();
        assert_eq!(blocks.as_ref(), BLOCKS_HEADER.join(",").as_bytes());
    }

    #[test]
    fn test_open_waits_for_previous_handle() {
        let dir = tempdir().unwrap();
        let first = Store::open(dir.path()).unwrap();
        first
            .blocks()
            .insert(&sequence_key(0), &Counter { value: 7 })
            .unwrap();
        first.flush().unwrap();

        let release = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            drop(first);
        });
        let second = Store::open(dir.path()).unwrap();
        release.join().unwrap();
        assert_eq!(
            second.blocks().get::<Counter>(&sequence_key(0)).unwrap(),
            Some(Counter { value: 7 })
        );
    }

    #[test]
    fn test_reopen_right_after_drop() {
        let dir = tempdir().unwrap();
        for n in 0..10u32 {
            let store = Store::open(dir.path()).unwrap();
            store
                .legacy()
                .insert(&sequence_key(n as u64), &Counter { value: n })
                .unwrap();
            store.flush().unwrap();
        }
        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.legacy().len(), 10);
    }

    #[test]
    fn test_header_mismatch_is_refused() {
        let dir = tempdir().unwrap();
        {
            let store = Store::open(dir.path()).unwrap();
            let meta = store.get_db().open_tree(META_TREE).unwrap();
            meta.insert("header:contracts", "ContractID,Status").unwrap();
            store.flush().unwrap();
        }
        assert!(matches!(
            Store::open(dir.path()),
            Err(LedgerError::Database(_))
        ));
    }

    #[test]
    fn test_update_applies_change() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let table = store.contracts();
        table.insert(b"c1", &Counter { value: 1 }).unwrap();

        let updated: Counter = table
            .update(b"c1", "counter", |row: &mut Counter| {
                row.value += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.value, 2);
        assert_eq!(table.get::<Counter>(b"c1").unwrap(), Some(Counter { value: 2 }));
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let table = store.contracts();
        table.insert(b"c1", &Counter { value: 1 }).unwrap();

        let result = table.update(b"c1", "counter", |row: &mut Counter| {
            row.value = 99;
            Err(LedgerError::Cancelled)
        });
        assert!(result.is_err());
        assert_eq!(table.get::<Counter>(b"c1").unwrap(), Some(Counter { value: 1 }));

        let missing = table.update(b"nope", "counter", |_: &mut Counter| Ok(()));
        assert!(matches!(missing, Err(LedgerError::NotFound { kind: "counter", .. })));
    }

    #[test]
    fn test_sequence_keys_sort_numerically() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let table = store.legacy();
        for n in [10u64, 2, 300] {
            table.insert(&sequence_key(n), &Counter { value: n as u32 }).unwrap();
        }
        let values: Vec<u32> = table
            .rows::<Counter>()
            .unwrap()
            .into_iter()
            .map(|c| c.value)
            .collect();
        assert_eq!(values, vec![2, 10, 300]);
        assert_eq!(table.last_sequence().unwrap(), Some(300));
    }

    #[test]
    fn test_block_row_payload_round_trip() {
        let block = Block::from_parts(
            3,
            1_000,
            vec![BlockTransaction::Reward(crate::core::RewardTransaction::new(
                "admin", 1.0,
            ))],
            "00aa".to_string(),
            17,
            "00bb".to_string(),
        );
        let row = BlockRow::from_block(&block).unwrap();
        assert!(row.transactions_payload.contains("\"type\":\"reward\""));
        assert_eq!(row.into_block().unwrap(), block);
    }

    #[test]
    fn test_block_row_keeps_long_mantissa_amounts() {
        let tx = Transaction::new("B1", "S1", "P1", 4022449.5852449187, None).unwrap();
        let block = Block::from_parts(
            1,
            1_000,
            vec![BlockTransaction::Transfer(tx)],
            "00aa".to_string(),
            3,
            "00bb".to_string(),
        );
        let reloaded = BlockRow::from_block(&block).unwrap().into_block().unwrap();
        let amount = reloaded.get_transactions()[0].as_transfer().unwrap().get_amount();
        assert_eq!(amount.to_bits(), 4022449.5852449187f64.to_bits());
        assert_eq!(reloaded.compute_hash().unwrap(), block.compute_hash().unwrap());
    }

    #[test]
    fn test_block_row_with_bad_payload() {
        let row = BlockRow {
            index: 1,
            timestamp: 0,
            previous_hash: "0".to_string(),
            hash: "00".to_string(),
            nonce: 0,
            transactions_payload: "not json".to_string(),
        };
        assert!(matches!(row.into_block(), Err(LedgerError::Serialization(_))));
    }
}
