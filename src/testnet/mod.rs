//! Test framework for the ledger
//!
//! This module provides isolated ledger instances on temporary storage with
//! a difficulty low enough for fast mining.

pub mod test_utils;

pub use test_utils::*;
