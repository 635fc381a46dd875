// Persistent ledger: blocks live in a sled tree keyed by their hash, and
// the distinguished key "lh" tracks the tip of the best chain.

use crate::core::proof_of_work::MiningInterrupt;
use crate::core::{Block, TXOutput, Transaction};
use crate::error::{ChainError, Result};
use data_encoding::HEXLOWER;
use log::info;
use sled::{Db, Tree};
use std::collections::HashMap;
use std::env::current_dir;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Distinguished key holding the hash of the current tip.
const TIP_BLOCK_HASH_KEY: &str = "lh";
const BLOCKS_TREE: &str = "blocks";

#[derive(Clone, Debug)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<Vec<u8>>>,
    db: Db,
    db_path: PathBuf,
    // Serializes appends so a locally mined block and an inbound network
    // block cannot interleave their tip updates.
    append_lock: Arc<Mutex<()>>,
}

impl Blockchain {
    /// Open or create the ledger at the default path, mining the genesis
    /// block to `genesis_address` when the store is empty.
    pub fn create_blockchain(genesis_address: &str) -> Result<Blockchain> {
        Self::create_blockchain_with_path(genesis_address, &Self::default_db_path()?)
    }

    /// Open an existing ledger at the default path.
    pub fn new_blockchain() -> Result<Blockchain> {
        Self::new_blockchain_with_path(&Self::default_db_path()?)
    }

    pub fn create_blockchain_with_node_id(
        genesis_address: &str,
        node_id: &str,
    ) -> Result<Blockchain> {
        Self::create_blockchain_with_path(genesis_address, &Self::node_db_path(node_id)?)
    }

    pub fn new_blockchain_with_node_id(node_id: &str) -> Result<Blockchain> {
        Self::new_blockchain_with_path(&Self::node_db_path(node_id)?)
    }

    fn default_db_path() -> Result<String> {
        Ok(current_dir()?
            .join("data")
            .join("blocks")
            .to_string_lossy()
            .to_string())
    }

    /// Per-instance path so several nodes can share one host.
    fn node_db_path(node_id: &str) -> Result<String> {
        Ok(current_dir()?
            .join("data")
            .join(format!("blocks_{node_id}"))
            .to_string_lossy()
            .to_string())
    }

    /// Open the store, retrying once after a short back-off when the
    /// file lock is contended (a dying sibling process may still hold it).
    fn open_db(path: &PathBuf) -> Result<Db> {
        match sled::open(path) {
            Ok(db) => Ok(db),
            Err(first_err) => {
                log::warn!("Could not open database at {path:?}: {first_err}; retrying once");
                std::thread::sleep(Duration::from_millis(500));
                sled::open(path).map_err(|e| {
                    ChainError::Storage(format!("Failed to open database at {path:?}: {e}"))
                })
            }
        }
    }

    pub fn create_blockchain_with_path(genesis_address: &str, db_path: &str) -> Result<Blockchain> {
        let path = PathBuf::from(db_path);
        let db = Self::open_db(&path)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;

        let data = blocks_tree.get(TIP_BLOCK_HASH_KEY)?;
        let tip_hash = if let Some(data) = data {
            data.to_vec()
        } else {
            info!("Creating genesis block for address: {genesis_address}");
            let coinbase_tx = Transaction::new_coinbase_tx(genesis_address, "")?;
            let block = Block::generate_genesis_block(&coinbase_tx)?;
            Self::update_blocks_tree(&blocks_tree, &block)?;
            block.get_hash().to_vec()
        };

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
            db_path: path,
            append_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn new_blockchain_with_path(db_path: &str) -> Result<Blockchain> {
        let path = PathBuf::from(db_path);
        let db = Self::open_db(&path)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;

        let tip_bytes = blocks_tree.get(TIP_BLOCK_HASH_KEY)?.ok_or_else(|| {
            ChainError::NotFound("No existing blockchain found. Create one first.".to_string())
        })?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_bytes.to_vec())),
            db,
            db_path: path,
            append_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Persist a block and point the tip at it, atomically.
    fn update_blocks_tree(blocks_tree: &Tree, block: &Block) -> Result<()> {
        let block_hash = block.get_hash();
        let block_data = block.serialize()?;

        blocks_tree
            .transaction(|tx_db| {
                tx_db.insert(block_hash, block_data.as_slice())?;
                tx_db.insert(TIP_BLOCK_HASH_KEY, block_hash)?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                ChainError::Storage(format!("Failed to update blocks tree: {e}"))
            })?;

        Ok(())
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .expect("Failed to acquire read lock on tip_hash - this should never happen")
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self
            .tip_hash
            .write()
            .expect("Failed to acquire write lock on tip_hash - this should never happen");
        *tip_hash = new_tip_hash.to_vec();
    }

    /// Verify the given transactions, mine a successor to the current tip
    /// and append it. Returns `Ok(None)` when the interrupt cancelled the
    /// attempt; nothing is persisted in that case.
    pub fn mine_block(
        &self,
        transactions: &[Transaction],
        interrupt: &MiningInterrupt,
    ) -> Result<Option<Block>> {
        for transaction in transactions {
            if !self.verify_transaction(transaction)? {
                return Err(ChainError::ConsensusViolation(format!(
                    "Invalid transaction {} in block candidate",
                    transaction.get_id_hex()
                )));
            }
        }

        let best_height = self.get_best_height()?;
        let block = match Block::new_block(
            self.get_tip_hash(),
            transactions,
            best_height + 1,
            interrupt,
        )? {
            Some(block) => block,
            None => return Ok(None),
        };

        self.add_block(&block)?;
        info!("Successfully mined block {}", block.get_hash_hex());
        Ok(Some(block))
    }

    /// Append a block. Re-adding an already stored block is a no-op, and
    /// the tip only moves when the new block is strictly higher than the
    /// current tip (longest chain wins, ties keep the incumbent).
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let _guard = self
            .append_lock
            .lock()
            .expect("Failed to acquire append lock - this should never happen");

        let block_tree = self.db.open_tree(BLOCKS_TREE)?;

        if block_tree.get(block.get_hash())?.is_some() {
            return Ok(());
        }

        let block_data = block.serialize()?;
        let tip_hash = self.get_tip_hash();

        let mut tip_moved = false;
        block_tree
            .transaction(|tx_db| {
                tx_db.insert(block.get_hash(), block_data.as_slice())?;

                let tip_height = match tx_db.get(tip_hash.as_slice())? {
                    Some(tip_block_bytes) => {
                        let tip_block =
                            Block::deserialize(tip_block_bytes.as_ref()).map_err(|_| {
                                sled::transaction::ConflictableTransactionError::Storage(
                                    sled::Error::Unsupported(
                                        "Failed to deserialize tip block".to_string(),
                                    ),
                                )
                            })?;
                        Some(tip_block.get_height())
                    }
                    None => None,
                };

                if tip_height.is_none() || block.get_height() > tip_height.unwrap_or(0) {
                    tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                }
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                ChainError::Storage(format!("Failed to add block: {e}"))
            })?;

        // Mirror the persisted tip in memory.
        if let Some(lh) = block_tree.get(TIP_BLOCK_HASH_KEY)? {
            if lh.as_ref() == block.get_hash() {
                tip_moved = true;
            }
            self.set_tip_hash(lh.as_ref());
        }
        if tip_moved {
            info!(
                "Tip advanced to {} at height {}",
                block.get_hash_hex(),
                block.get_height()
            );
        }

        Ok(())
    }

    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), self.db.clone())
    }

    /// Height of the tip block; 0 when only genesis (or nothing) exists.
    pub fn get_best_height(&self) -> Result<usize> {
        let block_tree = self.db.open_tree(BLOCKS_TREE)?;
        let tip_block_bytes = match block_tree.get(self.get_tip_hash())? {
            Some(bytes) => bytes,
            None => return Ok(0),
        };
        let tip_block = Block::deserialize(tip_block_bytes.as_ref())?;
        Ok(tip_block.get_height())
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        let block_tree = self.db.open_tree(BLOCKS_TREE)?;
        if let Some(block_bytes) = block_tree.get(block_hash)? {
            return Ok(Some(Block::deserialize(block_bytes.as_ref())?));
        }
        Ok(None)
    }

    pub fn block_exists(&self, block_hash: &[u8]) -> Result<bool> {
        let block_tree = self.db.open_tree(BLOCKS_TREE)?;
        Ok(block_tree.get(block_hash)?.is_some())
    }

    /// Walk tip to genesis looking for a block at the given height.
    pub fn get_block_by_height(&self, height: usize) -> Option<Block> {
        let mut iterator = self.iterator();
        while let Some(block) = iterator.next() {
            if block.get_height() == height {
                return Some(block);
            }
        }
        None
    }

    /// Hashes of every block strictly above `height`, oldest first. Peers
    /// announce these so a lagging node can catch up.
    pub fn get_block_hashes_since(&self, height: usize) -> Vec<Vec<u8>> {
        let mut hashes = vec![];
        let mut iterator = self.iterator();
        while let Some(block) = iterator.next() {
            if block.get_height() == height {
                break;
            }
            hashes.push(block.get_hash().to_vec());
        }
        hashes.reverse();
        hashes
    }

    /// Replay the whole chain and collect every unspent output, keyed by
    /// hex txid. This is the slow path the UTXO index rebuilds from.
    pub fn find_utxo(&self) -> HashMap<String, Vec<TXOutput>> {
        let mut utxo: HashMap<String, Vec<TXOutput>> = HashMap::new();
        let mut spent_txos: HashMap<String, Vec<i64>> = HashMap::new();

        let mut iterator = self.iterator();
        while let Some(block) = iterator.next() {
            'outer: for tx in block.get_transactions() {
                let txid_hex = HEXLOWER.encode(tx.get_id());
                for (idx, out) in tx.get_vout().iter().enumerate() {
                    if let Some(outs) = spent_txos.get(txid_hex.as_str()) {
                        for spent_out_idx in outs {
                            if (idx as i64).eq(spent_out_idx) {
                                continue 'outer;
                            }
                        }
                    }
                    utxo.entry(txid_hex.clone())
                        .or_default()
                        .push(out.clone());
                }
                if tx.is_coinbase() {
                    continue;
                }

                for txin in tx.get_vin() {
                    let in_txid_hex = HEXLOWER.encode(txin.get_txid());
                    spent_txos
                        .entry(in_txid_hex)
                        .or_default()
                        .push(txin.get_vout());
                }
            }
        }
        utxo
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Option<Transaction> {
        let mut iterator = self.iterator();
        while let Some(block) = iterator.next() {
            for transaction in block.get_transactions() {
                if txid.eq(transaction.get_id()) {
                    return Some(transaction.clone());
                }
            }
        }
        None
    }

    /// Resolve every input of `tx` to its previous transaction.
    fn get_prev_transactions(&self, tx: &Transaction) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for vin in tx.get_vin() {
            let prev_tx = self.find_transaction(vin.get_txid()).ok_or_else(|| {
                ChainError::NotFound(format!(
                    "Previous transaction {} not found",
                    HEXLOWER.encode(vin.get_txid())
                ))
            })?;
            prev_txs.insert(HEXLOWER.encode(prev_tx.get_id()), prev_tx);
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let prev_txs = self.get_prev_transactions(tx)?;
        tx.sign(pkcs8, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.get_prev_transactions(tx)?;
        tx.verify(&prev_txs)
    }
}

pub struct BlockchainIterator {
    db: Db,
    current_hash: Vec<u8>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, db: Db) -> BlockchainIterator {
        BlockchainIterator {
            current_hash: tip_hash,
            db,
        }
    }

    /// Steps tip to genesis; the genesis block's empty prev hash ends the
    /// walk naturally.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Block> {
        if self.current_hash.is_empty() {
            return None;
        }
        let block_tree = self.db.open_tree(BLOCKS_TREE).ok()?;
        let data = block_tree.get(self.current_hash.as_slice()).ok()??;
        let block = Block::deserialize(data.to_vec().as_slice()).ok()?;
        self.current_hash = block.get_pre_block_hash().to_vec();
        Some(block)
    }
}
