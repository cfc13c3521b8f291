//! Derived state and pending-transaction storage
//!
//! The UTXO index over the chain store, the in-memory pool of pending
//! transactions, and the queue of announced blocks being fetched.

pub mod memory_pool;
pub mod utxo_set;

pub use memory_pool::{BlockInTransit, MemoryPool};
pub use utxo_set::UTXOSet;
