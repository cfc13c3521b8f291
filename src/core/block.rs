use crate::core::{ProofOfWork, Transaction};
use crate::error::{LedgerError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use log::info;
use serde::{Deserialize, Serialize};

/// A mined block. `pre_block_hash` is empty only for the genesis block,
/// and `hash` always satisfies the proof-of-work target for `nonce`.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    pre_block_hash: String,
    hash: String,
    transactions: Vec<Transaction>,
    nonce: i64,
    height: usize,
}

impl Block {
    /// Build a block at the given height and run the mining search for it.
    /// Blocking and CPU-bound; returns only once a valid nonce is found.
    pub fn new_block(
        pre_block_hash: String,
        transactions: &[Transaction],
        height: usize,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(LedgerError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            timestamp: current_timestamp()?,
            pre_block_hash,
            hash: String::new(),
            transactions: transactions.to_vec(),
            nonce: 0,
            height,
        };

        info!("Starting proof-of-work for block at height {height}");
        let pow = ProofOfWork::new_proof_of_work(block.clone());
        let (nonce, hash) = pow.run();
        block.nonce = nonce;
        block.hash = hash.clone();
        info!("Proof-of-work completed for block: {hash}");

        Ok(block)
    }

    pub fn generate_genesis_block(transaction: &Transaction) -> Result<Block> {
        let transactions = vec![transaction.clone()];
        Block::new_block(String::new(), &transactions, 0)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> String {
        self.pre_block_hash.clone()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_hash_bytes(&self) -> Vec<u8> {
        self.hash.as_bytes().to_vec()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    /// Digest over the concatenated transaction ids. Commits the block
    /// header to its transaction set without a full Merkle tree.
    pub fn hash_transactions(&self) -> Vec<u8> {
        let mut txhashs = vec![];
        for transaction in &self.transactions {
            txhashs.extend(transaction.get_id());
        }

        crate::utils::sha256_digest(txhashs.as_slice())
    }

    #[cfg(test)]
    pub(crate) fn set_nonce_for_test(&mut self, nonce: i64) {
        self.nonce = nonce;
    }
}
