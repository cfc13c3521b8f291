//! # Tinycoin
//!
//! A small proof-of-work ledger: UTXO transactions signed with ECDSA P-256,
//! blocks stored in sled, and a TCP protocol that keeps independent nodes
//! converged on the highest chain.
//!
//! - `core/`: blocks, proof of work, transactions, the chain store
//! - `wallet/`: key pairs and base58check addresses
//! - `storage/`: UTXO index, memory pool, blocks-in-transit queue
//! - `network/`: wire protocol and the node server
//! - `config/`: per-node runtime settings
//! - `utils/`: crypto primitives and the bincode layer
//! - `cli/`: command-line surface

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Block, Blockchain, ProofOfWork, TXInput, TXOutput, Transaction, COINBASE_OUTPUT_INDEX, SUBSIDY,
    TARGET_BITS,
};
pub use error::{LedgerError, Result};
pub use network::{send_tx, Node, Nodes, Server, CENTRAL_NODE, TRANSACTION_THRESHOLD};
pub use storage::{BlockInTransit, MemoryPool, UTXOSet};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    convert_address, hash_pub_key, validate_address, Wallet, Wallets, ADDRESS_CHECK_SUM_LEN,
};
