use crate::core::Transaction;
use data_encoding::HEXLOWER;
use std::collections::HashMap;
use std::sync::RwLock;

/// Pending transactions received by relay, drained by mining. Keyed by
/// txid hex, never persisted.
pub struct MemoryPool {
    inner: RwLock<HashMap<String, Transaction>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, txid: &str) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.get(txid).cloned(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                None
            }
        }
    }

    pub fn add(&self, tx: Transaction) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.insert(HEXLOWER.encode(tx.get_id()), tx);
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    pub fn contains(&self, txid: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.contains_key(txid),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                false
            }
        }
    }

    pub fn remove(&self, txid: &str) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.remove(txid);
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                0
            }
        }
    }

    pub fn get_all(&self) -> Vec<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.values().cloned().collect(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                Vec::new()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.is_empty(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                true
            }
        }
    }
}

/// Queue of block hashes announced by a peer and not yet downloaded.
pub struct BlockInTransit {
    inner: RwLock<Vec<Vec<u8>>>,
}

impl Default for BlockInTransit {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockInTransit {
    pub fn new() -> BlockInTransit {
        BlockInTransit {
            inner: RwLock::new(vec![]),
        }
    }

    pub fn add_blocks(&self, blocks: &[Vec<u8>]) {
        match self.inner.write() {
            Ok(mut inner) => {
                for hash in blocks {
                    inner.push(hash.to_vec());
                }
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on block transit");
            }
        }
    }

    pub fn first(&self) -> Option<Vec<u8>> {
        match self.inner.read() {
            Ok(inner) => inner.first().map(|h| h.to_vec()),
            Err(_) => {
                log::error!("Failed to acquire read lock on block transit");
                None
            }
        }
    }

    pub fn remove(&self, block_hash: &[u8]) {
        match self.inner.write() {
            Ok(mut inner) => {
                if let Some(idx) = inner.iter().position(|x| x.eq(block_hash)) {
                    inner.remove(idx);
                }
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on block transit");
            }
        }
    }

    pub fn clear(&self) {
        match self.inner.write() {
            Ok(mut inner) => {
                inner.clear();
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on block transit");
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(inner) => inner.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on block transit");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.inner.read() {
            Ok(inner) => inner.is_empty(),
            Err(_) => {
                log::error!("Failed to acquire read lock on block transit");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    #[test]
    fn test_mempool_add_contains_remove() {
        let pool = MemoryPool::new();
        let tx = Transaction::new_coinbase_tx("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").unwrap();
        let txid_hex = HEXLOWER.encode(tx.get_id());

        assert!(pool.is_empty());
        pool.add(tx);
        assert!(pool.contains(&txid_hex));
        assert_eq!(pool.len(), 1);
        pool.remove(&txid_hex);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_blocks_in_transit_fifo() {
        let transit = BlockInTransit::new();
        transit.add_blocks(&[b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()]);
        assert_eq!(transit.len(), 3);

        let first = transit.first().unwrap();
        assert_eq!(first, b"aa".to_vec());
        transit.remove(&first);
        assert_eq!(transit.first().unwrap(), b"bb".to_vec());

        transit.clear();
        assert!(transit.is_empty());
    }
}
