use crate::core::{Blockchain, ProofOfWork};
use crate::error::{LedgerError, Result};
use tempfile::TempDir;

pub const TEST_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(LedgerError::from)
}

/// A fresh single-genesis chain in temporary storage, rewarded to
/// `TEST_ADDRESS`.
pub fn create_test_blockchain() -> Result<(Blockchain, TempDir)> {
    let temp_dir = create_temp_dir()?;
    let db_path = temp_dir.path().join("test_chain");
    let db_path = db_path
        .to_str()
        .ok_or_else(|| LedgerError::Database("Invalid temp path".to_string()))?;

    let blockchain = Blockchain::create_blockchain_with_path(TEST_ADDRESS, db_path)?;
    Ok((blockchain, temp_dir))
}

/// Walk the chain from tip to genesis checking linkage and proof of work.
pub fn validate_blockchain_integrity(blockchain: &Blockchain) -> Result<bool> {
    let mut expected_hash = blockchain.get_tip_hash();

    for block in blockchain.iterator() {
        if block.get_hash() != expected_hash {
            return Ok(false);
        }
        if !ProofOfWork::validate(&block) {
            return Ok(false);
        }
        expected_hash = block.get_pre_block_hash();
    }

    // The walk must have ended at the genesis block.
    Ok(expected_hash.is_empty())
}
