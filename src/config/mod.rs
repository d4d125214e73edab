//! Configuration management
//!
//! This module handles the settings of a ledger instance: where its tables
//! live and how expensive mining is.

pub mod settings;

pub use settings::{
    Config, DEFAULT_DIFFICULTY, DEFAULT_MINING_REWARD, MAX_DIFFICULTY, MIN_DIFFICULTY,
};
