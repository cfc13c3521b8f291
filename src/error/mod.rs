//! Error handling for the ledger
//!
//! One error enum for the whole crate, split along the lines callers care
//! about: environment failures (database, serialization, I/O) that should
//! terminate the process, and recoverable conditions (missing transaction,
//! insufficient funds, bad address) that callers handle per call site.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone)]
pub enum LedgerError {
    /// Database-related errors
    Database(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Network communication errors
    Network(String),
    /// Transaction validation errors
    Transaction(String),
    /// Wallet operation errors
    Wallet(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Invalid address format or checksum
    InvalidAddress(String),
    /// Insufficient funds for a spend
    InsufficientFunds { required: u64, available: u64 },
    /// Block validation errors
    InvalidBlock(String),
    /// Lookup of a transaction by id that is not in the chain
    TransactionNotFound(String),
    /// Lookup of a block by hash that is not in the store
    BlockNotFound(String),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Database(msg) => write!(f, "Database error: {msg}"),
            LedgerError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            LedgerError::Network(msg) => write!(f, "Network error: {msg}"),
            LedgerError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            LedgerError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            LedgerError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            LedgerError::Io(msg) => write!(f, "I/O error: {msg}"),
            LedgerError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            LedgerError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            LedgerError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            LedgerError::TransactionNotFound(id) => write!(f, "Transaction not found: {id}"),
            LedgerError::BlockNotFound(hash) => write!(f, "Block not found: {hash}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for LedgerError {
    fn from(err: bincode::error::EncodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for LedgerError {
    fn from(err: bincode::error::DecodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}
