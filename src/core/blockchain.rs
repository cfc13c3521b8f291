// The chain store: an append-only sequence of blocks in sled, keyed by hash,
// with a single reserved key holding the hash of the current tip.

use crate::core::{Block, TXOutput, Transaction};
use crate::error::{LedgerError, Result};
use data_encoding::HEXLOWER;
use log::info;
use sled::{Db, Tree};
use std::collections::HashMap;
use std::env::current_dir;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

const TIP_KEY: &str = "tip";
const BLOCKS_TREE: &str = "blocks";

/// Handle to a node's persistent chain. Cloning shares the database and the
/// tip pointer.
#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<String>>,
    db: Db,
    db_path: PathBuf,
}

impl Blockchain {
    /// Create a brand-new chain for the given node identity, mining the
    /// genesis block with a coinbase paying `genesis_address`. Fails if a
    /// chain already exists there.
    pub fn create_blockchain_with_node_id(
        genesis_address: &str,
        node_id: &str,
    ) -> Result<Blockchain> {
        let db_path = Self::node_db_path(node_id)?;
        Self::create_blockchain_with_path(genesis_address, &db_path)
    }

    /// Open the node's existing chain. Fails if none exists.
    pub fn open_blockchain_with_node_id(node_id: &str) -> Result<Blockchain> {
        let db_path = Self::node_db_path(node_id)?;
        Self::open_blockchain_with_path(&db_path)
    }

    // Per-node database directory (./data/node_<id>/) so several nodes can
    // share one machine.
    fn node_db_path(node_id: &str) -> Result<String> {
        Ok(current_dir()?
            .join("data")
            .join(format!("node_{node_id}"))
            .to_string_lossy()
            .to_string())
    }

    pub fn create_blockchain_with_path(genesis_address: &str, db_path: &str) -> Result<Blockchain> {
        let path = PathBuf::from(db_path);
        let db = sled::open(&path)
            .map_err(|e| LedgerError::Database(format!("Failed to open database: {e}")))?;
        let blocks_tree = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open blocks tree: {e}")))?;

        let existing = blocks_tree
            .get(TIP_KEY)
            .map_err(|e| LedgerError::Database(format!("Failed to get tip hash: {e}")))?;
        if existing.is_some() {
            return Err(LedgerError::Database(
                "A blockchain already exists at this path".to_string(),
            ));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx = Transaction::new_coinbase_tx(genesis_address)?;
        let block = Block::generate_genesis_block(&coinbase_tx)?;
        Self::update_blocks_tree(&blocks_tree, &block)?;
        let tip_hash = String::from(block.get_hash());

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
            db_path: path,
        })
    }

    pub fn open_blockchain_with_path(db_path: &str) -> Result<Blockchain> {
        let path = PathBuf::from(db_path);
        let db = sled::open(&path)
            .map_err(|e| LedgerError::Database(format!("Failed to open database: {e}")))?;
        let blocks_tree = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open blocks tree: {e}")))?;

        let tip_bytes = blocks_tree
            .get(TIP_KEY)
            .map_err(|e| LedgerError::Database(format!("Failed to get tip hash: {e}")))?
            .ok_or_else(|| {
                LedgerError::Database("No existing blockchain found. Create one first.".to_string())
            })?;

        let tip_hash = String::from_utf8(tip_bytes.to_vec())
            .map_err(|e| LedgerError::Database(format!("Invalid tip hash format: {e}")))?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
            db_path: path,
        })
    }

    // Store a block and move the tip to it in one sled transaction.
    fn update_blocks_tree(blocks_tree: &Tree, block: &Block) -> Result<()> {
        let block_hash = block.get_hash();
        let block_data = block.serialize()?;

        blocks_tree
            .transaction(|tx_db| {
                tx_db.insert(block_hash, block_data.as_slice())?;
                tx_db.insert(TIP_KEY, block_hash)?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                LedgerError::Database(format!("Failed to update blocks tree: {e}"))
            })?;

        Ok(())
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn get_tip_hash(&self) -> String {
        self.tip_hash
            .read()
            .expect("tip_hash lock poisoned")
            .clone()
    }

    pub fn set_tip_hash(&self, new_tip_hash: &str) {
        let mut tip_hash = self.tip_hash.write().expect("tip_hash lock poisoned");
        *tip_hash = String::from(new_tip_hash)
    }

    /// Mine a block from the given transactions (coinbase included by the
    /// caller) and commit it as the new tip. Every transaction is verified
    /// and intra-block double spends are rejected first.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        for (i, transaction) in transactions.iter().enumerate() {
            if !transaction.verify(self) {
                return Err(LedgerError::Transaction(format!(
                    "Invalid transaction at index {i}"
                )));
            }
        }

        self.check_for_double_spending(transactions)?;

        let best_height = self.get_best_height()?;
        let next_height = best_height + 1;

        info!(
            "Mining block at height {} with {} transactions",
            next_height,
            transactions.len(),
        );

        let block = Block::new_block(self.get_tip_hash(), transactions, next_height)?;
        let block_hash = block.get_hash();

        let blocks_tree = self
            .db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open blocks tree: {e}")))?;
        Self::update_blocks_tree(&blocks_tree, &block)?;
        self.set_tip_hash(block_hash);

        info!("Successfully mined block: {block_hash}");

        Ok(block)
    }

    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), self.db.clone())
    }

    /// Full backward scan producing txid-hex -> currently unspent outputs.
    /// Spends are tracked by referenced transaction id and output index, so
    /// the tip-to-genesis walk never marks an output spent before the
    /// transaction producing it has been seen.
    pub fn find_utxo(&self) -> HashMap<String, Vec<TXOutput>> {
        let mut utxo: HashMap<String, Vec<TXOutput>> = HashMap::new();
        let mut spent_txos: HashMap<String, Vec<usize>> = HashMap::new();

        for block in self.iterator() {
            for tx in block.get_transactions() {
                let txid_hex = HEXLOWER.encode(tx.get_id());
                'outputs: for (idx, out) in tx.get_vout().iter().enumerate() {
                    if let Some(outs) = spent_txos.get(txid_hex.as_str()) {
                        for spend_out_idx in outs {
                            if idx.eq(spend_out_idx) {
                                continue 'outputs;
                            }
                        }
                    }
                    utxo.entry(txid_hex.clone()).or_default().push(out.clone());
                }
                if tx.is_coinbase() {
                    continue;
                }

                for txin in tx.get_vin() {
                    let txid_hex = HEXLOWER.encode(txin.get_txid());
                    spent_txos.entry(txid_hex).or_default().push(txin.get_vout());
                }
            }
        }
        utxo
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Option<Transaction> {
        for block in self.iterator() {
            for transaction in block.get_transactions() {
                if txid.eq(transaction.get_id()) {
                    return Some(transaction.clone());
                }
            }
        }
        None
    }

    /// Network path: store a received block. Idempotent for known hashes;
    /// the tip only moves if the block is higher than the current tip
    /// (height comparison only, not cumulative work).
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let block_tree = self
            .db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open blocks tree: {e}")))?;

        if block_tree
            .get(block.get_hash())
            .map_err(|e| LedgerError::Database(format!("Failed to check block existence: {e}")))?
            .is_some()
        {
            return Ok(());
        }

        let block_data = block.serialize()?;

        // The closure may be retried or aborted by sled, so it only decides
        // whether the tip moved; the in-memory pointer follows the committed
        // outcome.
        let tip_advanced = block_tree
            .transaction(|tx_db| {
                tx_db.insert(block.get_hash(), block_data.as_slice())?;

                let tip_block_bytes = tx_db.get(self.get_tip_hash())?.ok_or_else(|| {
                    sled::Error::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "Tip hash not found",
                    ))
                })?;
                let tip_block = Block::deserialize(tip_block_bytes.as_ref()).map_err(|_| {
                    sled::Error::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "Failed to deserialize tip block",
                    ))
                })?;

                if block.get_height() > tip_block.get_height() {
                    tx_db.insert(TIP_KEY, block.get_hash())?;
                    return Ok(true);
                }
                Ok(false)
            })
            .map_err(|e: sled::transaction::TransactionError| {
                LedgerError::Database(format!("Failed to add block: {e}"))
            })?;

        if tip_advanced {
            self.set_tip_hash(block.get_hash());
        }

        Ok(())
    }

    pub fn get_best_height(&self) -> Result<usize> {
        let tip_block = self.get_block(&self.get_tip_hash())?;
        Ok(tip_block.get_height())
    }

    pub fn get_block(&self, block_hash: &str) -> Result<Block> {
        let block_tree = self
            .db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open blocks tree: {e}")))?;

        let block_bytes = block_tree
            .get(block_hash)
            .map_err(|e| LedgerError::Database(format!("Failed to get block: {e}")))?
            .ok_or_else(|| LedgerError::BlockNotFound(block_hash.to_string()))?;

        Block::deserialize(block_bytes.as_ref())
    }

    pub fn get_block_by_bytes(&self, block_hash: &[u8]) -> Result<Block> {
        let hash = String::from_utf8(block_hash.to_vec())
            .map_err(|e| LedgerError::BlockNotFound(format!("Invalid block hash bytes: {e}")))?;
        self.get_block(&hash)
    }

    pub fn block_exists(&self, block_hash: &str) -> Result<bool> {
        let block_tree = self
            .db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open blocks tree: {e}")))?;

        let exists = block_tree
            .get(block_hash)
            .map_err(|e| LedgerError::Database(format!("Failed to check block existence: {e}")))?
            .is_some();

        Ok(exists)
    }

    /// All block hashes from tip back to genesis, for inventory
    /// announcements.
    pub fn get_block_hashes(&self) -> Vec<Vec<u8>> {
        let mut blocks = vec![];
        for block in self.iterator() {
            blocks.push(block.get_hash_bytes());
        }
        blocks
    }

    // Reject two inputs in one block naming the same previous output.
    fn check_for_double_spending(&self, transactions: &[Transaction]) -> Result<()> {
        use std::collections::HashSet;
        let mut spent_outputs: HashSet<(Vec<u8>, usize)> = HashSet::new();

        for (tx_index, transaction) in transactions.iter().enumerate() {
            if transaction.is_coinbase() {
                continue;
            }

            for input in transaction.get_vin() {
                let output_reference = (input.get_txid().to_vec(), input.get_vout());

                if spent_outputs.contains(&output_reference) {
                    return Err(LedgerError::Transaction(format!(
                        "Double-spending detected in transaction {}: output {}:{} already spent in this block",
                        tx_index,
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }

                spent_outputs.insert(output_reference);
            }
        }

        Ok(())
    }

    pub fn is_output_spent(&self, txid: &[u8], vout: usize) -> bool {
        for block in self.iterator() {
            for transaction in block.get_transactions() {
                if transaction.is_coinbase() {
                    continue;
                }

                for input in transaction.get_vin() {
                    if input.get_txid() == txid && input.get_vout() == vout {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Check a transaction's inputs reference existing, unspent outputs.
    pub fn validate_transaction_inputs(&self, transaction: &Transaction) -> Result<bool> {
        if transaction.is_coinbase() {
            return Ok(true);
        }

        for input in transaction.get_vin() {
            if self.is_output_spent(input.get_txid(), input.get_vout()) {
                return Err(LedgerError::Transaction(format!(
                    "Input already spent: {}:{}",
                    HEXLOWER.encode(input.get_txid()),
                    input.get_vout()
                )));
            }

            if self.find_transaction(input.get_txid()).is_none() {
                return Err(LedgerError::TransactionNotFound(
                    HEXLOWER.encode(input.get_txid()),
                ));
            }
        }

        Ok(true)
    }
}

/// Lazy backward walk from the tip to genesis. The genesis block's empty
/// previous hash misses on the next lookup, ending the iteration. Not
/// restartable; request a fresh iterator to re-scan.
pub struct BlockchainIterator {
    db: Db,
    current_hash: String,
}

impl BlockchainIterator {
    fn new(tip_hash: String, db: Db) -> BlockchainIterator {
        BlockchainIterator {
            current_hash: tip_hash,
            db,
        }
    }
}

impl Iterator for BlockchainIterator {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        let block_tree = self.db.open_tree(BLOCKS_TREE).ok()?;
        let data = block_tree.get(self.current_hash.clone()).ok()??;
        let block = Block::deserialize(data.to_vec().as_slice()).ok()?;
        self.current_hash = block.get_pre_block_hash();
        Some(block)
    }
}
