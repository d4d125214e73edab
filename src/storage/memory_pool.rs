use crate::core::Transaction;
use std::sync::RwLock;

/// Pending transactions not yet embedded in a block, in arrival order
pub struct MemoryPool {
    inner: RwLock<Vec<Transaction>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(Vec::new()),
        }
    }

    /// Appends the transaction unless one with the same id is already
    /// waiting. Returns whether it was added.
    pub fn add(&self, tx: Transaction) -> bool {
        match self.inner.write() {
            Ok(mut pool) => {
                if pool.iter().any(|pending| pending.get_id() == tx.get_id()) {
                    return false;
                }
                pool.push(tx);
                true
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
                false
            }
        }
    }

    /// Drops the given transactions, keeping the order of the rest
    pub fn remove_all(&self, txids: &[&str]) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.retain(|tx| !txids.iter().any(|id| *id == tx.get_id()));
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                0
            }
        }
    }

    pub fn get_all(&self) -> Vec<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.clone(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                Vec::new()
            }
        }
    }

}
