use crate::core::Transaction;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct PoolInner {
    /// Admitted transactions waiting to be mined, keyed by hex txid.
    pending: HashMap<String, Transaction>,
    /// Transactions selected for an in-progress mining attempt.
    queued: HashMap<String, Transaction>,
}

/// Two-partition memory pool. One lock guards both partitions so a move
/// between them can never be observed half done.
pub struct MemoryPool {
    inner: RwLock<PoolInner>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(PoolInner::default()),
        }
    }

    pub fn add(&self, tx: Transaction) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.pending.insert(tx.get_id_hex(), tx);
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    /// Look up a transaction in either partition.
    pub fn get(&self, txid_hex: &str) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool
                .pending
                .get(txid_hex)
                .or_else(|| pool.queued.get(txid_hex))
                .cloned(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                None
            }
        }
    }

    pub fn contains(&self, txid_hex: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => {
                pool.pending.contains_key(txid_hex) || pool.queued.contains_key(txid_hex)
            }
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                false
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.pending.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                0
            }
        }
    }

    /// Up to `count` pending transactions, no particular order.
    pub fn get_pending(&self, count: usize) -> Vec<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.pending.values().take(count).cloned().collect(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                Vec::new()
            }
        }
    }

    /// Atomically move up to `count` pending transactions into the queued
    /// partition and return them; they are the candidate set for one
    /// mining attempt.
    pub fn move_to_queued(&self, count: usize) -> Vec<Transaction> {
        match self.inner.write() {
            Ok(mut pool) => {
                let ids: Vec<String> = pool.pending.keys().take(count).cloned().collect();
                let mut moved = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(tx) = pool.pending.remove(&id) {
                        pool.queued.insert(id, tx.clone());
                        moved.push(tx);
                    }
                }
                moved
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
                Vec::new()
            }
        }
    }

    /// Put queued transactions back into pending; used when a mining
    /// attempt is abandoned.
    pub fn requeue(&self) {
        match self.inner.write() {
            Ok(mut pool) => {
                let queued: Vec<(String, Transaction)> = pool.queued.drain().collect();
                for (id, tx) in queued {
                    pool.pending.insert(id, tx);
                }
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    /// Drop the queued partition outright; used when a mining attempt
    /// fails in a way that makes its candidate set unusable.
    pub fn clear_queued(&self) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.queued.clear();
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    /// Drop the transaction from both partitions; called when a block
    /// carrying it is accepted.
    pub fn remove_from_all(&self, txid_hex: &str) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.pending.remove(txid_hex);
                pool.queued.remove(txid_hex);
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.pending.is_empty() && pool.queued.is_empty(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                true
            }
        }
    }
}

/// Ordered queue of block hashes announced by peers but not yet fetched.
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

    /// Append hashes that are not already queued, preserving order.
    pub fn add_blocks(&self, blocks: &[Vec<u8>]) {
        match self.inner.write() {
            Ok(mut inner) => {
                for hash in blocks {
                    if !inner.iter().any(|h| h == hash) {
                        inner.push(hash.to_vec());
                    }
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
