use crate::core::{BlockTransaction, CancelToken, ProofOfWork};
use crate::error::Result;
use crate::utils::{canonical_encoding, current_timestamp, sha256_hex};
use log::info;
use serde::{Deserialize, Serialize};

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    index: u64,
    timestamp: i64,
    transactions: Vec<BlockTransaction>,
    previous_hash: String,
    nonce: u64,
    hash: String,
}

// Field names double as the keys of the canonical encoding
#[derive(Serialize)]
struct DigestFields<'a, T: Serialize + ?Sized> {
    index: u64,
    timestamp: i64,
    transactions: &'a T,
    previous_hash: &'a str,
    nonce: u64,
}

pub(crate) fn digest_of<T: Serialize + ?Sized>(
    index: u64,
    timestamp: i64,
    transactions: &T,
    previous_hash: &str,
    nonce: u64,
) -> Result<String> {
    let fields = DigestFields {
        index,
        timestamp,
        transactions,
        previous_hash,
        nonce,
    };
    Ok(sha256_hex(&canonical_encoding(&fields)?))
}

/// Digest over a block's fields: SHA-256 of their canonical JSON encoding,
/// as lowercase hex.
pub fn compute_digest(
    index: u64,
    timestamp: i64,
    transactions: &[BlockTransaction],
    previous_hash: &str,
    nonce: u64,
) -> Result<String> {
    digest_of(index, timestamp, transactions, previous_hash, nonce)
}

impl Block {
    /// Builds the block at the current time and mines it.
    pub fn new_block(
        index: u64,
        previous_hash: String,
        transactions: Vec<BlockTransaction>,
        difficulty: usize,
        cancel: &CancelToken,
    ) -> Result<Block> {
        let mut block = Block {
            index,
            timestamp: current_timestamp()?,
            transactions,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };

        info!("Starting proof-of-work for block {index} with difficulty {difficulty}");
        let pow = ProofOfWork::new_proof_of_work(&block, difficulty)?;
        let (nonce, hash) = pow.run(cancel)?;
        block.nonce = nonce;
        block.hash = hash;
        info!("Proof-of-work completed for block {index}: {}", block.hash);

        Ok(block)
    }

    pub fn generate_genesis_block(difficulty: usize, cancel: &CancelToken) -> Result<Block> {
        Block::new_block(
            0,
            String::from(GENESIS_PREVIOUS_HASH),
            Vec::new(),
            difficulty,
            cancel,
        )
    }

    /// Reassembles a stored block without recomputing anything; the hash is
    /// taken as persisted so verification can catch tampering.
    pub fn from_parts(
        index: u64,
        timestamp: i64,
        transactions: Vec<BlockTransaction>,
        previous_hash: String,
        nonce: u64,
        hash: String,
    ) -> Block {
        Block {
            index,
            timestamp,
            transactions,
            previous_hash,
            nonce,
            hash,
        }
    }

    pub fn compute_hash(&self) -> Result<String> {
        compute_digest(
            self.index,
            self.timestamp,
            &self.transactions,
            &self.previous_hash,
            self.nonce,
        )
    }

    pub fn get_index(&self) -> u64 {
        self.index
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_transactions(&self) -> &[BlockTransaction] {
        self.transactions.as_slice()
    }

    pub fn get_previous_hash(&self) -> &str {
        self.previous_hash.as_str()
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}
