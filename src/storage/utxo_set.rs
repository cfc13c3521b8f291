use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use std::collections::HashMap;

const UTXO_TREE: &str = "chainstate";

/// The rebuildable index from transaction id to its still-unspent outputs.
/// Derived data: a `reindex` from the chain store always reproduces it.
pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    /// Greedily accumulate outputs locked to `pub_key_hash`, in index
    /// iteration order, until the running total reaches `amount`. Returns
    /// whatever it found; the caller checks sufficiency.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<usize>>)> {
        let mut unspent_outputs: HashMap<String, Vec<usize>> = HashMap::new();
        let mut accumulated = 0;
        let db = self.blockchain.get_db();
        let utxo_tree = db
            .open_tree(UTXO_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open UTXO tree: {e}")))?;

        for item in utxo_tree.iter() {
            let (k, v) = item
                .map_err(|e| LedgerError::Database(format!("Failed to iterate UTXO tree: {e}")))?;
            let txid_hex = HEXLOWER.encode(k.to_vec().as_slice());
            let outs: Vec<TXOutput> = deserialize(v.to_vec().as_slice()).map_err(|e| {
                LedgerError::Serialization(format!("Failed to deserialize TXOutput: {e}"))
            })?;

            for (idx, out) in outs.iter().enumerate() {
                if out.is_locked_with_key(pub_key_hash) && accumulated < amount {
                    accumulated += out.get_value();
                    unspent_outputs
                        .entry(txid_hex.clone())
                        .or_default()
                        .push(idx);
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    /// All outputs locked to the given key hash; summing their values gives
    /// the balance.
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let db = self.blockchain.get_db();
        let utxo_tree = db
            .open_tree(UTXO_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open UTXO tree: {e}")))?;
        let mut utxos = vec![];

        for item in utxo_tree.iter() {
            let (_, v) = item
                .map_err(|e| LedgerError::Database(format!("Failed to iterate UTXO tree: {e}")))?;
            let outs: Vec<TXOutput> = deserialize(v.to_vec().as_slice()).map_err(|e| {
                LedgerError::Serialization(format!("Failed to deserialize TXOutput: {e}"))
            })?;

            for out in outs.iter() {
                if out.is_locked_with_key(pub_key_hash) {
                    utxos.push(out.clone())
                }
            }
        }
        Ok(utxos)
    }

    pub fn count_transactions(&self) -> Result<u64> {
        let db = self.blockchain.get_db();
        let utxo_tree = db
            .open_tree(UTXO_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open UTXO tree: {e}")))?;
        let mut counter = 0;

        for item in utxo_tree.iter() {
            item.map_err(|e| LedgerError::Database(format!("Failed to iterate UTXO tree: {e}")))?;
            counter += 1;
        }
        Ok(counter)
    }

    /// Clear the index and rebuild it from a full backward scan of the
    /// chain store.
    pub fn reindex(&self) -> Result<()> {
        let db = self.blockchain.get_db();
        let utxo_tree = db
            .open_tree(UTXO_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open UTXO tree: {e}")))?;

        utxo_tree
            .clear()
            .map_err(|e| LedgerError::Database(format!("Failed to clear UTXO tree: {e}")))?;

        let utxo_map = self.blockchain.find_utxo();
        for (txid_hex, outs) in &utxo_map {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                LedgerError::Serialization(format!("Failed to decode transaction ID: {e}"))
            })?;
            let value = serialize(outs).map_err(|e| {
                LedgerError::Serialization(format!("Failed to serialize outputs: {e}"))
            })?;
            utxo_tree
                .insert(txid.as_slice(), value)
                .map_err(|e| LedgerError::Database(format!("Failed to insert UTXO: {e}")))?;
        }
        Ok(())
    }

    /// Incremental maintenance after a newly committed block: drop each
    /// spent output (removing emptied records) and insert every new output.
    /// Leaves the index exactly as a full `reindex` would.
    pub fn update(&self, block: &Block) -> Result<()> {
        let db = self.blockchain.get_db();
        let utxo_tree = db
            .open_tree(UTXO_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open UTXO tree: {e}")))?;

        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    let mut updated_outs = vec![];

                    let outs_bytes = utxo_tree
                        .get(vin.get_txid())
                        .map_err(|e| LedgerError::Database(format!("Failed to get UTXO: {e}")))?
                        .ok_or_else(|| LedgerError::Database("UTXO not found".to_string()))?;

                    let outs: Vec<TXOutput> = deserialize(outs_bytes.as_ref()).map_err(|e| {
                        LedgerError::Serialization(format!("Failed to deserialize TXOutput: {e}"))
                    })?;

                    for (idx, out) in outs.iter().enumerate() {
                        if idx != vin.get_vout() {
                            updated_outs.push(out.clone())
                        }
                    }

                    if updated_outs.is_empty() {
                        utxo_tree.remove(vin.get_txid()).map_err(|e| {
                            LedgerError::Database(format!("Failed to remove UTXO: {e}"))
                        })?;
                    } else {
                        let outs_bytes = serialize(&updated_outs).map_err(|e| {
                            LedgerError::Serialization(format!("Failed to serialize TXOutput: {e}"))
                        })?;
                        utxo_tree.insert(vin.get_txid(), outs_bytes).map_err(|e| {
                            LedgerError::Database(format!("Failed to update UTXO: {e}"))
                        })?;
                    }
                }
            }

            let new_outputs = tx.get_vout().to_vec();
            let outs_bytes = serialize(&new_outputs).map_err(|e| {
                LedgerError::Serialization(format!("Failed to serialize TXOutput: {e}"))
            })?;
            utxo_tree
                .insert(tx.get_id(), outs_bytes)
                .map_err(|e| LedgerError::Database(format!("Failed to insert new UTXO: {e}")))?;
        }
        Ok(())
    }
}
