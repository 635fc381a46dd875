//! Gossip node event loop and message handlers.
//!
//! All session state lives in [`Node`]: the chain, the UTXO index, the
//! memory pool, the blocks-in-transit queue and the transport handle.
//! Cloning a node shares that state, so background workers operate on
//! the same chain and pool as the event loop. A bad peer message is
//! logged and dropped; nothing a peer sends can tear down the loop.

use crate::core::{Block, Blockchain, MiningInterrupt, Transaction};
use crate::error::{ChainError, Result};
use crate::network::message::{
    BlockFrame, GetBlocks, GetData, GetTxFromPool, Inv, InvKind, Message, TxFrame, Version,
};
use crate::network::transport::{
    ChannelContent, Transport, FULLNODES_TOPIC, GENERAL_TOPIC, MINING_TOPIC,
};
use crate::storage::{BlockInTransit, MemoryPool, UTXOSet};
use data_encoding::HEXLOWER;
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

pub const NODE_VERSION: usize = 1;

/// A miner starts a round once this many transactions are pending.
pub const TRANSACTION_THRESHOLD: usize = 2;

/// How often a mining node asks full nodes for pool transactions.
const TX_PULL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Node {
    node_id: String,
    blockchain: Blockchain,
    utxo_set: UTXOSet,
    memory_pool: Arc<MemoryPool>,
    blocks_in_transit: Arc<BlockInTransit>,
    transport: Arc<dyn Transport + Send + Sync>,
    mining_address: Option<String>,
    mining_interrupt: MiningInterrupt,
    /// Set while a mining worker is running; keeps the event loop from
    /// stacking up concurrent rounds.
    mining_active: Arc<AtomicBool>,
    /// Peers that have asked us for pool transactions; replies to them go
    /// out on the mining topic.
    miner_peers: Arc<RwLock<HashSet<String>>>,
}

impl Node {
    pub fn new(
        node_id: &str,
        blockchain: Blockchain,
        transport: Arc<dyn Transport + Send + Sync>,
        mining_address: Option<String>,
    ) -> Node {
        let utxo_set = UTXOSet::new(blockchain.clone());
        Node {
            node_id: node_id.to_string(),
            blockchain,
            utxo_set,
            memory_pool: Arc::new(MemoryPool::new()),
            blocks_in_transit: Arc::new(BlockInTransit::new()),
            transport,
            mining_address,
            mining_interrupt: MiningInterrupt::new(),
            mining_active: Arc::new(AtomicBool::new(false)),
            miner_peers: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn get_node_id(&self) -> &str {
        &self.node_id
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn get_utxo_set(&self) -> &UTXOSet {
        &self.utxo_set
    }

    pub fn get_memory_pool(&self) -> &MemoryPool {
        &self.memory_pool
    }

    pub fn get_blocks_in_transit(&self) -> &BlockInTransit {
        &self.blocks_in_transit
    }

    pub fn get_mining_interrupt(&self) -> &MiningInterrupt {
        &self.mining_interrupt
    }

    pub fn is_miner(&self) -> bool {
        self.mining_address.is_some()
    }

    /// Consume the incoming message stream until the transport closes it.
    /// Announces our version first so peers can trigger synchronization,
    /// and keeps a miner pulling transactions in the background.
    pub fn run(&self, incoming: Receiver<(String, ChannelContent)>) -> Result<()> {
        self.announce_version()?;

        if self.is_miner() {
            let node = self.clone();
            thread::spawn(move || loop {
                thread::sleep(TX_PULL_INTERVAL);
                if let Err(e) = node.request_pool_transactions() {
                    error!("Failed to request pool transactions: {e}");
                }
            });
        }

        for (topic, content) in incoming {
            self.handle_content(&topic, &content);
        }
        Ok(())
    }

    /// Decode and dispatch one envelope. Protocol and consensus failures
    /// are isolated here so the event loop survives them.
    pub fn handle_content(&self, topic: &str, content: &ChannelContent) {
        let message = match Message::from_bytes(&content.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed frame on topic {topic}: {e}");
                return;
            }
        };

        info!(
            "Received {} from {} on topic {topic}",
            message.command(),
            content.node_id
        );

        match self.dispatch(message) {
            Ok(()) => {}
            Err(ChainError::ConsensusViolation(msg)) => {
                warn!("Rejected peer data from {}: {msg}", content.node_id);
            }
            Err(e) => {
                error!("Error handling {} from {}: {e}", content.command, content.node_id);
            }
        }
    }

    fn dispatch(&self, message: Message) -> Result<()> {
        match message {
            Message::Version(version) => self.handle_version(version),
            Message::GetBlocks(get_blocks) => self.handle_get_blocks(get_blocks),
            Message::Inv(inv) => self.handle_inv(inv),
            Message::GetData(get_data) => self.handle_get_data(get_data),
            Message::Block(frame) => self.handle_block(frame),
            Message::Tx(frame) => self.handle_tx(frame),
            Message::GetTxFromPool(request) => self.handle_get_tx_from_pool(request),
        }
    }

    /// Broadcast our best height on the general topic.
    pub fn announce_version(&self) -> Result<()> {
        let best_height = self.blockchain.get_best_height()?;
        self.publish(
            GENERAL_TOPIC,
            &Message::Version(Version {
                version: NODE_VERSION,
                best_height,
                addr_from: self.node_id.clone(),
            }),
            "",
        )
    }

    /// Ask full nodes for up to a mining round's worth of transactions.
    pub fn request_pool_transactions(&self) -> Result<()> {
        self.publish(
            FULLNODES_TOPIC,
            &Message::GetTxFromPool(GetTxFromPool {
                addr_from: self.node_id.clone(),
                count: TRANSACTION_THRESHOLD,
            }),
            "",
        )
    }

    /// Broadcast a locally created transaction on the general topic.
    pub fn broadcast_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.publish(
            GENERAL_TOPIC,
            &Message::Tx(TxFrame {
                addr_from: self.node_id.clone(),
                transaction: transaction.serialize()?,
            }),
            "",
        )
    }

    fn publish(&self, topic: &str, message: &Message, send_to: &str) -> Result<()> {
        let content = ChannelContent {
            command: message.command().to_string(),
            node_id: self.node_id.clone(),
            send_to: send_to.to_string(),
            payload: message.to_bytes()?,
        };
        self.transport.publish(topic, &content)
    }

    fn handle_version(&self, version: Version) -> Result<()> {
        let local_height = self.blockchain.get_best_height()?;
        info!(
            "Peer {} is at height {}, local height {local_height}",
            version.addr_from, version.best_height
        );

        if local_height < version.best_height {
            // A new sync cycle starts; hashes queued from a stale one
            // would be re-announced anyway.
            self.blocks_in_transit.clear();
            self.publish(
                GENERAL_TOPIC,
                &Message::GetBlocks(GetBlocks {
                    addr_from: self.node_id.clone(),
                    height: local_height,
                }),
                &version.addr_from,
            )?;
        } else if local_height > version.best_height {
            self.publish(
                GENERAL_TOPIC,
                &Message::Version(Version {
                    version: NODE_VERSION,
                    best_height: local_height,
                    addr_from: self.node_id.clone(),
                }),
                &version.addr_from,
            )?;
        }
        Ok(())
    }

    fn handle_get_blocks(&self, get_blocks: GetBlocks) -> Result<()> {
        let hashes = self.blockchain.get_block_hashes_since(get_blocks.height);
        if hashes.is_empty() {
            return Ok(());
        }
        self.publish(
            GENERAL_TOPIC,
            &Message::Inv(Inv {
                addr_from: self.node_id.clone(),
                kind: InvKind::Block,
                items: hashes,
            }),
            &get_blocks.addr_from,
        )
    }

    fn handle_inv(&self, inv: Inv) -> Result<()> {
        match inv.kind {
            InvKind::Block => {
                // Only queue hashes we do not already have.
                let mut missing = vec![];
                for hash in &inv.items {
                    if !self.blockchain.block_exists(hash)? {
                        missing.push(hash.to_vec());
                    }
                }
                if missing.is_empty() {
                    return Ok(());
                }
                self.blocks_in_transit.add_blocks(&missing);

                if let Some(hash) = self.blocks_in_transit.first() {
                    self.request_block(&inv.addr_from, &hash)?;
                    self.blocks_in_transit.remove(&hash);
                }
            }
            InvKind::Tx => {
                if let Some(txid) = inv.items.first() {
                    let txid_hex = HEXLOWER.encode(txid);
                    if !self.memory_pool.contains(&txid_hex) {
                        self.publish(
                            GENERAL_TOPIC,
                            &Message::GetData(GetData {
                                addr_from: self.node_id.clone(),
                                kind: InvKind::Tx,
                                id: txid.to_vec(),
                            }),
                            &inv.addr_from,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn request_block(&self, peer: &str, hash: &[u8]) -> Result<()> {
        self.publish(
            GENERAL_TOPIC,
            &Message::GetData(GetData {
                addr_from: self.node_id.clone(),
                kind: InvKind::Block,
                id: hash.to_vec(),
            }),
            peer,
        )
    }

    fn handle_get_data(&self, get_data: GetData) -> Result<()> {
        match get_data.kind {
            InvKind::Block => {
                if let Some(block) = self.blockchain.get_block(&get_data.id)? {
                    self.publish(
                        GENERAL_TOPIC,
                        &Message::Block(BlockFrame {
                            addr_from: self.node_id.clone(),
                            block: block.serialize()?,
                        }),
                        &get_data.addr_from,
                    )?;
                } else {
                    info!("Peer requested an unknown block");
                }
            }
            InvKind::Tx => {
                let txid_hex = HEXLOWER.encode(&get_data.id);
                if let Some(tx) = self.memory_pool.get(&txid_hex) {
                    let topic = if self.is_known_miner(&get_data.addr_from) {
                        MINING_TOPIC
                    } else {
                        GENERAL_TOPIC
                    };
                    self.publish(
                        topic,
                        &Message::Tx(TxFrame {
                            addr_from: self.node_id.clone(),
                            transaction: tx.serialize()?,
                        }),
                        &get_data.addr_from,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Accept a peer block: genesis as-is, anything else only as a valid
    /// successor to the current tip. A rejected block leaves all state
    /// untouched.
    fn handle_block(&self, frame: BlockFrame) -> Result<()> {
        let block = Block::deserialize(&frame.block)
            .map_err(|e| ChainError::Protocol(format!("Undecodable block payload: {e}")))?;

        if !block.is_genesis() {
            let tip = self
                .blockchain
                .get_block(&self.blockchain.get_tip_hash())?
                .ok_or_else(|| ChainError::NotFound("Tip block missing from store".to_string()))?;
            block.validate_against_tip(&tip)?;
        }

        // A finished peer block obsoletes any candidate a mining worker
        // is grinding on; the append lock below serializes the two.
        self.mining_interrupt.interrupt();

        self.blockchain.add_block(&block)?;
        info!(
            "Accepted block {} at height {} from {}",
            block.get_hash_hex(),
            block.get_height(),
            frame.addr_from
        );

        for tx in block.get_transactions() {
            self.memory_pool.remove_from_all(&tx.get_id_hex());
        }

        if let Some(hash) = self.blocks_in_transit.first() {
            self.request_block(&frame.addr_from, &hash)?;
            self.blocks_in_transit.remove(&hash);
        } else {
            self.utxo_set.reindex()?;
        }
        Ok(())
    }

    fn handle_tx(&self, frame: TxFrame) -> Result<()> {
        let tx = Transaction::deserialize(&frame.transaction)
            .map_err(|e| ChainError::Protocol(format!("Undecodable transaction payload: {e}")))?;
        let txid_hex = tx.get_id_hex();

        if self.memory_pool.contains(&txid_hex) {
            return Ok(());
        }
        if !self.blockchain.verify_transaction(&tx)? {
            return Err(ChainError::ConsensusViolation(format!(
                "Transaction {txid_hex} failed signature verification"
            )));
        }
        self.memory_pool.add(tx);
        info!("Admitted transaction {txid_hex} to the memory pool");

        if self.is_miner() && self.memory_pool.pending_len() >= TRANSACTION_THRESHOLD {
            self.spawn_mining_round();
        }
        Ok(())
    }

    /// Full-node side of the miner pull: reply with pending transactions
    /// on the mining topic and remember the requester as a miner.
    fn handle_get_tx_from_pool(&self, request: GetTxFromPool) -> Result<()> {
        self.remember_miner(&request.addr_from);

        for tx in self.memory_pool.get_pending(request.count) {
            self.publish(
                MINING_TOPIC,
                &Message::Tx(TxFrame {
                    addr_from: self.node_id.clone(),
                    transaction: tx.serialize()?,
                }),
                &request.addr_from,
            )?;
        }
        Ok(())
    }

    /// Run the mining round on a worker thread so the event loop stays
    /// free to dispatch inbound blocks, which is what allows a competing
    /// block to interrupt the attempt. At most one worker runs at a time.
    fn spawn_mining_round(&self) {
        if self
            .mining_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let node = self.clone();
        thread::spawn(move || {
            if let Err(e) = node.mine_round() {
                error!("Mining round failed: {e}");
            }
            node.mining_active.store(false, Ordering::SeqCst);
        });
    }

    /// One mining attempt over the currently pending transactions. A
    /// cancelled attempt requeues its candidates and changes nothing else.
    pub fn mine_round(&self) -> Result<()> {
        let mining_address = match &self.mining_address {
            Some(addr) => addr.clone(),
            None => return Ok(()),
        };

        self.mining_interrupt.reset();
        let candidates = self.memory_pool.move_to_queued(TRANSACTION_THRESHOLD);

        let mut txs = vec![];
        for tx in candidates {
            if self.blockchain.verify_transaction(&tx).unwrap_or(false) {
                txs.push(tx);
            } else {
                warn!("Dropping unverifiable transaction {}", tx.get_id_hex());
                self.memory_pool.remove_from_all(&tx.get_id_hex());
            }
        }
        if txs.is_empty() {
            return Ok(());
        }

        let coinbase = Transaction::new_coinbase_tx(&mining_address, "")?;
        txs.insert(0, coinbase);

        let mined = match self.blockchain.mine_block(&txs, &self.mining_interrupt) {
            Ok(mined) => mined,
            Err(e) => {
                // The candidate set is tainted; do not retry it forever.
                self.memory_pool.clear_queued();
                return Err(e);
            }
        };

        match mined {
            Some(block) => {
                self.utxo_set.update(&block)?;
                for tx in block.get_transactions() {
                    self.memory_pool.remove_from_all(&tx.get_id_hex());
                }
                info!("Mined block {} with {} transactions", block.get_hash_hex(), txs.len());
                self.publish(
                    GENERAL_TOPIC,
                    &Message::Inv(Inv {
                        addr_from: self.node_id.clone(),
                        kind: InvKind::Block,
                        items: vec![block.get_hash().to_vec()],
                    }),
                    "",
                )
            }
            None => {
                info!("Mining attempt cancelled, requeueing candidates");
                self.memory_pool.requeue();
                Ok(())
            }
        }
    }

    fn remember_miner(&self, peer: &str) {
        match self.miner_peers.write() {
            Ok(mut peers) => {
                peers.insert(peer.to_string());
            }
            Err(_) => {
                error!("Failed to acquire write lock on miner peers");
            }
        }
    }

    fn is_known_miner(&self, peer: &str) -> bool {
        match self.miner_peers.read() {
            Ok(peers) => peers.contains(peer),
            Err(_) => {
                error!("Failed to acquire read lock on miner peers");
                false
            }
        }
    }
}
