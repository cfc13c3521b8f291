//! Core ledger functionality
//!
//! Blocks, transactions, the persistent chain store and the proof-of-work
//! consensus rule.

pub mod block;
pub mod blockchain;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator};
pub use proof_of_work::{ProofOfWork, TARGET_BITS};
pub use transaction::{TXInput, TXOutput, Transaction, COINBASE_OUTPUT_INDEX, SUBSIDY};
