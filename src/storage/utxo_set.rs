use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{ChainError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use sled::Batch;
use std::collections::HashMap;

const UTXO_TREE: &str = "chainstate";

/// Index entries are stored under `"utxo-" || txid`.
const UTXO_PREFIX: &[u8] = b"utxo-";

/// Upper bound on keys deleted per batch during a rebuild, keeping any
/// single storage write bounded.
const DELETE_BATCH_SIZE: usize = 100_000;

/// Rebuildable index over the unspent outputs of the chain. Each entry
/// maps a transaction id to the outputs of that transaction which are
/// still spendable. Clones share the underlying chain handle.
#[derive(Clone)]
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

    fn utxo_tree(&self) -> Result<sled::Tree> {
        Ok(self.blockchain.get_db().open_tree(UTXO_TREE)?)
    }

    fn utxo_key(txid: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(UTXO_PREFIX.len() + txid.len());
        key.extend_from_slice(UTXO_PREFIX);
        key.extend_from_slice(txid);
        key
    }

    fn txid_from_key(key: &[u8]) -> &[u8] {
        &key[UTXO_PREFIX.len()..]
    }

    /// Collect outputs of `pub_key_hash` until `amount` is covered,
    /// stopping early once it is. Returns whatever accumulated when the
    /// funds do not suffice; the caller decides what that means.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: f64,
    ) -> Result<(f64, HashMap<String, Vec<usize>>)> {
        let mut unspent_outputs: HashMap<String, Vec<usize>> = HashMap::new();
        let mut accumulated = 0.0;
        let utxo_tree = self.utxo_tree()?;

        'scan: for item in utxo_tree.scan_prefix(UTXO_PREFIX) {
            let (k, v) = item?;
            let txid_hex = HEXLOWER.encode(Self::txid_from_key(k.as_ref()));
            let outs: Vec<TXOutput> = deserialize(v.to_vec().as_slice())?;

            for (idx, out) in outs.iter().enumerate() {
                if out.is_locked_with_key(pub_key_hash) {
                    accumulated += out.get_value();
                    unspent_outputs
                        .entry(txid_hex.clone())
                        .or_default()
                        .push(idx);
                    if accumulated >= amount {
                        break 'scan;
                    }
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    /// Every unspent output locked to `pub_key_hash`; no early stop, this
    /// is the balance query.
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let utxo_tree = self.utxo_tree()?;
        let mut utxos = vec![];

        for item in utxo_tree.scan_prefix(UTXO_PREFIX) {
            let (_, v) = item?;
            let outs: Vec<TXOutput> = deserialize(v.to_vec().as_slice())?;
            for out in outs.iter() {
                if out.is_locked_with_key(pub_key_hash) {
                    utxos.push(out.clone())
                }
            }
        }
        Ok(utxos)
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> Result<u64> {
        let utxo_tree = self.utxo_tree()?;
        let mut counter = 0;
        for item in utxo_tree.scan_prefix(UTXO_PREFIX) {
            item?;
            counter += 1;
        }
        Ok(counter)
    }

    /// Throw the index away and recompute it from a full chain replay.
    pub fn reindex(&self) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        self.delete_by_prefix(&utxo_tree)?;

        let utxo_map = self.blockchain.find_utxo();
        for (txid_hex, outs) in &utxo_map {
            let txid = HEXLOWER
                .decode(txid_hex.as_bytes())
                .map_err(|e| ChainError::Serialization(format!("Invalid transaction ID: {e}")))?;
            let value = serialize(outs)?;
            utxo_tree.insert(Self::utxo_key(&txid), value)?;
        }
        Ok(())
    }

    /// Remove all index entries in bounded batches.
    fn delete_by_prefix(&self, utxo_tree: &sled::Tree) -> Result<()> {
        loop {
            let mut keys = Vec::new();
            for item in utxo_tree.scan_prefix(UTXO_PREFIX) {
                let (k, _) = item?;
                keys.push(k);
                if keys.len() >= DELETE_BATCH_SIZE {
                    break;
                }
            }
            if keys.is_empty() {
                return Ok(());
            }
            let mut batch = Batch::default();
            for key in &keys {
                batch.remove(key);
            }
            utxo_tree.apply_batch(batch)?;
        }
    }

    /// Fold a freshly accepted block into the index: spent outputs are
    /// removed (entries deleted when emptied) and every new transaction's
    /// outputs are inserted whole. Applied atomically per block.
    pub fn update(&self, block: &Block) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        let block = block.clone();

        utxo_tree
            .transaction(move |tx_db| {
                use sled::transaction::ConflictableTransactionError;

                let corrupt = |msg: &str| {
                    ConflictableTransactionError::Storage(sled::Error::Unsupported(msg.to_string()))
                };

                for tx in block.get_transactions() {
                    if !tx.is_coinbase() {
                        for vin in tx.get_vin() {
                            let key = Self::utxo_key(vin.get_txid());
                            let outs_bytes = tx_db
                                .get(key.as_slice())?
                                .ok_or_else(|| corrupt("Referenced UTXO entry not found"))?;
                            let outs: Vec<TXOutput> = deserialize(outs_bytes.as_ref())
                                .map_err(|_| corrupt("Failed to deserialize UTXO entry"))?;

                            let mut updated_outs = vec![];
                            for (idx, out) in outs.iter().enumerate() {
                                if idx as i64 != vin.get_vout() {
                                    updated_outs.push(out.clone())
                                }
                            }

                            if updated_outs.is_empty() {
                                tx_db.remove(key.as_slice())?;
                            } else {
                                let outs_bytes = serialize(&updated_outs)
                                    .map_err(|_| corrupt("Failed to serialize UTXO entry"))?;
                                tx_db.insert(key.as_slice(), outs_bytes)?;
                            }
                        }
                    }

                    let new_outputs: Vec<TXOutput> = tx.get_vout().to_vec();
                    let outs_bytes = serialize(&new_outputs)
                        .map_err(|_| corrupt("Failed to serialize UTXO entry"))?;
                    tx_db.insert(Self::utxo_key(tx.get_id()), outs_bytes)?;
                }
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                ChainError::Storage(format!("Failed to update UTXO set: {e}"))
            })?;
        Ok(())
    }
}
