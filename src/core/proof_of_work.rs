use crate::core::Block;
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::debug;
use num_bigint::{BigInt, Sign};
use std::borrow::Borrow;
use std::ops::ShlAssign;

/// Fixed difficulty: a block hash must be numerically below
/// 2^(256 - TARGET_BITS). There is no retargeting.
pub const TARGET_BITS: u32 = 12;

const MAX_NONCE: i64 = i64::MAX;

pub struct ProofOfWork {
    block: Block,
    target: BigInt,
}

impl ProofOfWork {
    pub fn new_proof_of_work(block: Block) -> ProofOfWork {
        let mut target = BigInt::from(1);
        target.shl_assign(256 - TARGET_BITS);
        ProofOfWork { block, target }
    }

    /// Recompute the digest for the block's stored nonce and check it
    /// against the target. Does not re-check transaction validity.
    pub fn validate(block: &Block) -> bool {
        let pow = ProofOfWork::new_proof_of_work(block.clone());
        let data = pow.prepare_data(block.get_nonce());
        let hash = sha256_digest(data.as_slice());
        let hash_int = BigInt::from_bytes_be(Sign::Plus, hash.as_slice());

        hash_int < pow.target
    }

    // Header bytes hashed in the mining search: everything except the hash
    // field itself.
    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let pre_block_hash = self.block.get_pre_block_hash();
        let tx_hash = self.block.hash_transactions();
        let timestamp = self.block.get_timestamp();
        let height = self.block.get_height();
        let mut data_bytes = vec![];
        data_bytes.extend(pre_block_hash.as_bytes());
        data_bytes.extend(tx_hash);
        data_bytes.extend(timestamp.to_be_bytes());
        data_bytes.extend(height.to_be_bytes());
        data_bytes.extend(TARGET_BITS.to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    /// The mining search: increment the nonce until the digest falls below
    /// the target. Unbounded time, blocking.
    pub fn run(&self) -> (i64, String) {
        let mut nonce = 0;
        let mut hash = Vec::new();
        while nonce < MAX_NONCE {
            let data = self.prepare_data(nonce);
            hash = sha256_digest(data.as_slice());
            let hash_int = BigInt::from_bytes_be(Sign::Plus, hash.as_slice());

            if hash_int.lt(self.target.borrow()) {
                debug!("Mined digest {}", HEXLOWER.encode(hash.as_slice()));
                break;
            }
            nonce += 1;
        }
        (nonce, HEXLOWER.encode(hash.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    fn create_test_block() -> Block {
        let test_address = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
        let coinbase_tx = Transaction::new_coinbase_tx(test_address).unwrap();

        Block::new_block(String::new(), &[coinbase_tx], 0).unwrap()
    }

    #[test]
    fn test_mined_block_validates() {
        let block = create_test_block();
        assert!(ProofOfWork::validate(&block));
    }

    #[test]
    fn test_tampered_nonce_fails_validation() {
        let mut block = create_test_block();
        block.set_nonce_for_test(block.get_nonce() ^ 1);
        assert!(!ProofOfWork::validate(&block));
    }

    #[test]
    fn test_prepare_data_consistency() {
        let block = create_test_block();
        let pow = ProofOfWork::new_proof_of_work(block);

        let data1 = pow.prepare_data(12345);
        let data2 = pow.prepare_data(12345);
        assert_eq!(data1, data2);

        let data3 = pow.prepare_data(54321);
        assert_ne!(data1, data3);
    }

    #[test]
    fn test_target_is_positive() {
        let block = create_test_block();
        let pow = ProofOfWork::new_proof_of_work(block);
        assert!(pow.target > BigInt::from(0));
    }
}
