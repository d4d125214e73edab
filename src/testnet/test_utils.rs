//! Test utilities for ledger testing

use crate::config::Config;
use crate::core::{Blockchain, CancelToken};
use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use crate::storage::Store;
use std::path::Path;
use tempfile::TempDir;

/// Easy difficulty for fast tests
pub const TEST_DIFFICULTY: usize = 1;

/// Create a temporary directory for testing
pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(|e| LedgerError::Io(e.to_string()))
}

/// Configuration rooted in `dir` with the test difficulty
pub fn test_config(dir: &Path) -> Config {
    Config::default()
        .with_data_dir(dir.join("ledger"))
        .with_difficulty(TEST_DIFFICULTY)
}

/// Create a chain with its genesis block on temporary storage
pub fn create_test_chain() -> Result<(Blockchain, TempDir)> {
    let temp_dir = create_temp_dir()?;
    let config = test_config(temp_dir.path());
    let store = Store::open(&config.data_dir)?;
    let chain = Blockchain::open(store, &config, &CancelToken::new())?;
    Ok((chain, temp_dir))
}

/// Create a full ledger on temporary storage
pub fn create_test_ledger() -> Result<(Ledger, TempDir)> {
    let temp_dir = create_temp_dir()?;
    let ledger = Ledger::open(test_config(temp_dir.path()))?;
    Ok((ledger, temp_dir))
}
