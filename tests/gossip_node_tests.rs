//! Gossip protocol integration tests
//!
//! Exercises the node handlers over the in-process transport: version
//! negotiation, inventory filtering, transaction admission, mining
//! rounds and the isolation of consensus violations.

use gossipchain::core::{Block, Blockchain, MiningInterrupt, Transaction};
use gossipchain::network::message::{BlockFrame, GetBlocks, Inv, TxFrame, Version};
use gossipchain::network::{
    ChannelContent, InvKind, MemoryHub, Message, Node, GENERAL_TOPIC, NODE_VERSION,
};
use gossipchain::storage::UTXOSet;
use gossipchain::wallet::Wallet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const TEST_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

fn chain_at(path: &std::path::Path) -> Blockchain {
    Blockchain::create_blockchain_with_path(TEST_ADDRESS, path.to_str().unwrap()).unwrap()
}

/// Deliver a message to the node as if peer `from` had published it.
fn deliver(node: &Node, from: &str, message: &Message) {
    let content = ChannelContent {
        command: message.command().to_string(),
        node_id: from.to_string(),
        send_to: node.get_node_id().to_string(),
        payload: message.to_bytes().unwrap(),
    };
    node.handle_content(GENERAL_TOPIC, &content);
}

fn next_message(receiver: &Receiver<(String, ChannelContent)>) -> Message {
    let (_, content) = receiver.try_recv().expect("expected an outgoing message");
    Message::from_bytes(&content.payload).unwrap()
}

#[test]
fn test_version_from_a_peer_ahead_triggers_getblocks() {
    let temp_dir = tempdir().unwrap();
    let hub = Arc::new(MemoryHub::new());
    let peer_rx = hub.subscribe("peer");

    let node = Node::new("local", chain_at(&temp_dir.path().join("chain")), hub, None);

    deliver(
        &node,
        "peer",
        &Message::Version(Version {
            version: NODE_VERSION,
            best_height: 5,
            addr_from: "peer".to_string(),
        }),
    );

    match next_message(&peer_rx) {
        Message::GetBlocks(GetBlocks { addr_from, height }) => {
            assert_eq!(addr_from, "local");
            assert_eq!(height, 0);
        }
        other => panic!("expected getblocks, got {other:?}"),
    }
}

#[test]
fn test_version_from_a_peer_behind_gets_our_version() {
    let temp_dir = tempdir().unwrap();
    let hub = Arc::new(MemoryHub::new());
    let peer_rx = hub.subscribe("peer");

    let blockchain = chain_at(&temp_dir.path().join("chain"));
    let coinbase = Transaction::new_coinbase_tx(TEST_ADDRESS, "").unwrap();
    blockchain
        .mine_block(&[coinbase], &MiningInterrupt::new())
        .unwrap()
        .unwrap();

    let node = Node::new("local", blockchain, hub, None);

    deliver(
        &node,
        "peer",
        &Message::Version(Version {
            version: NODE_VERSION,
            best_height: 0,
            addr_from: "peer".to_string(),
        }),
    );

    match next_message(&peer_rx) {
        Message::Version(version) => assert_eq!(version.best_height, 1),
        other => panic!("expected version, got {other:?}"),
    }
}

#[test]
fn test_inv_requests_only_missing_blocks() {
    let temp_dir = tempdir().unwrap();
    let hub = Arc::new(MemoryHub::new());
    let peer_rx = hub.subscribe("peer");

    let blockchain = chain_at(&temp_dir.path().join("chain"));
    let known_hash = blockchain.get_tip_hash();
    let unknown_hash = vec![0xab; 32];

    let node = Node::new("local", blockchain, hub, None);

    deliver(
        &node,
        "peer",
        &Message::Inv(Inv {
            addr_from: "peer".to_string(),
            kind: InvKind::Block,
            items: vec![known_hash, unknown_hash.clone()],
        }),
    );

    match next_message(&peer_rx) {
        Message::GetData(get_data) => {
            assert_eq!(get_data.kind, InvKind::Block);
            assert_eq!(get_data.id, unknown_hash);
        }
        other => panic!("expected getdata, got {other:?}"),
    }
    // the known hash was filtered, so nothing else goes out
    assert!(peer_rx.try_recv().is_err());
}

#[test]
fn test_valid_successor_block_is_accepted() {
    let temp_dir = tempdir().unwrap();
    let hub = Arc::new(MemoryHub::new());

    let blockchain = chain_at(&temp_dir.path().join("chain"));
    let coinbase = Transaction::new_coinbase_tx(TEST_ADDRESS, "peer block").unwrap();
    let successor = Block::new_block(
        blockchain.get_tip_hash(),
        &[coinbase],
        1,
        &MiningInterrupt::new(),
    )
    .unwrap()
    .unwrap();

    let node = Node::new("local", blockchain, hub, None);

    deliver(
        &node,
        "peer",
        &Message::Block(BlockFrame {
            addr_from: "peer".to_string(),
            block: successor.serialize().unwrap(),
        }),
    );

    assert_eq!(node.get_blockchain().get_best_height().unwrap(), 1);
    assert_eq!(node.get_blockchain().get_tip_hash(), successor.get_hash());
}

#[test]
fn test_consensus_violation_is_isolated() {
    let temp_dir = tempdir().unwrap();
    let hub = Arc::new(MemoryHub::new());

    let blockchain = chain_at(&temp_dir.path().join("chain"));
    // mined, but linked to nothing we know at an impossible height
    let coinbase = Transaction::new_coinbase_tx(TEST_ADDRESS, "bad").unwrap();
    let orphan = Block::new_block(vec![0xde, 0xad], &[coinbase], 7, &MiningInterrupt::new())
        .unwrap()
        .unwrap();

    let node = Node::new("local", blockchain, hub, None);

    deliver(
        &node,
        "peer",
        &Message::Block(BlockFrame {
            addr_from: "peer".to_string(),
            block: orphan.serialize().unwrap(),
        }),
    );

    // the node rejected the block and kept running
    assert_eq!(node.get_blockchain().get_best_height().unwrap(), 0);
    assert!(!node.get_blockchain().block_exists(orphan.get_hash()).unwrap());

    deliver(
        &node,
        "peer",
        &Message::Version(Version {
            version: NODE_VERSION,
            best_height: 0,
            addr_from: "peer".to_string(),
        }),
    );
}

#[test]
fn test_malformed_frame_is_dropped() {
    let temp_dir = tempdir().unwrap();
    let hub = Arc::new(MemoryHub::new());
    let node = Node::new("local", chain_at(&temp_dir.path().join("chain")), hub, None);

    let content = ChannelContent {
        command: "garbage".to_string(),
        node_id: "peer".to_string(),
        send_to: "local".to_string(),
        payload: vec![0xff; 4],
    };
    node.handle_content(GENERAL_TOPIC, &content);

    assert_eq!(node.get_blockchain().get_best_height().unwrap(), 0);
}

#[test]
fn test_transaction_admission_and_mining_round() {
    let temp_dir = tempdir().unwrap();
    let hub = Arc::new(MemoryHub::new());
    let observer_rx = hub.subscribe("observer");

    let sender = Wallet::new().unwrap();
    let recipient = Wallet::new().unwrap();
    let blockchain = Blockchain::create_blockchain_with_path(
        &sender.get_address(),
        temp_dir.path().join("chain").to_str().unwrap(),
    )
    .unwrap();

    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();
    let tx =
        Transaction::new_utxo_transaction(&sender, &recipient.get_address(), 5.0, &utxo_set)
            .unwrap();

    let miner = Node::new(
        "miner",
        blockchain,
        hub,
        Some(TEST_ADDRESS.to_string()),
    );

    deliver(
        &miner,
        "peer",
        &Message::Tx(TxFrame {
            addr_from: "peer".to_string(),
            transaction: tx.serialize().unwrap(),
        }),
    );
    assert!(miner.get_memory_pool().contains(&tx.get_id_hex()));

    miner.mine_round().unwrap();

    // the transaction was mined out of the pool and the block announced
    assert_eq!(miner.get_blockchain().get_best_height().unwrap(), 1);
    assert!(miner.get_memory_pool().is_empty());

    match next_message(&observer_rx) {
        Message::Inv(inv) => {
            assert_eq!(inv.kind, InvKind::Block);
            assert_eq!(inv.items.len(), 1);
            assert_eq!(
                inv.items[0],
                miner.get_blockchain().get_tip_hash()
            );
        }
        other => panic!("expected inv, got {other:?}"),
    }
}

#[test]
fn test_reaching_the_threshold_mines_off_the_event_loop() {
    let temp_dir = tempdir().unwrap();
    let hub = Arc::new(MemoryHub::new());
    let observer_rx = hub.subscribe("observer");

    let alice = Wallet::new().unwrap();
    let bob = Wallet::new().unwrap();
    let recipient = Wallet::new().unwrap();
    let blockchain = Blockchain::create_blockchain_with_path(
        &alice.get_address(),
        temp_dir.path().join("chain").to_str().unwrap(),
    )
    .unwrap();

    // fund a second wallet so two independent spends exist
    let bob_coinbase = Transaction::new_coinbase_tx(&bob.get_address(), "").unwrap();
    blockchain
        .mine_block(&[bob_coinbase], &MiningInterrupt::new())
        .unwrap()
        .unwrap();

    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();
    let tx_a =
        Transaction::new_utxo_transaction(&alice, &recipient.get_address(), 5.0, &utxo_set)
            .unwrap();
    let tx_b = Transaction::new_utxo_transaction(&bob, &recipient.get_address(), 5.0, &utxo_set)
        .unwrap();

    let miner = Node::new("miner", blockchain, hub, Some(TEST_ADDRESS.to_string()));

    for tx in [&tx_a, &tx_b] {
        deliver(
            &miner,
            "peer",
            &Message::Tx(TxFrame {
                addr_from: "peer".to_string(),
                transaction: tx.serialize().unwrap(),
            }),
        );
    }

    // the second admission started a round on a worker thread; the block
    // announcement tells us it finished
    let (_, content) = observer_rx
        .recv_timeout(Duration::from_secs(30))
        .expect("expected a block announcement");
    match Message::from_bytes(&content.payload).unwrap() {
        Message::Inv(inv) => {
            assert_eq!(inv.kind, InvKind::Block);
            assert_eq!(inv.items[0], miner.get_blockchain().get_tip_hash());
        }
        other => panic!("expected inv, got {other:?}"),
    }

    assert_eq!(miner.get_blockchain().get_best_height().unwrap(), 2);
    assert!(miner.get_memory_pool().is_empty());
}

#[test]
fn test_peer_block_raises_the_mining_interrupt() {
    let temp_dir = tempdir().unwrap();
    let hub = Arc::new(MemoryHub::new());

    let blockchain = chain_at(&temp_dir.path().join("chain"));
    let coinbase = Transaction::new_coinbase_tx(TEST_ADDRESS, "rival").unwrap();
    let successor = Block::new_block(
        blockchain.get_tip_hash(),
        &[coinbase],
        1,
        &MiningInterrupt::new(),
    )
    .unwrap()
    .unwrap();

    let miner = Node::new("miner", blockchain, hub, Some(TEST_ADDRESS.to_string()));
    assert!(!miner.get_mining_interrupt().is_interrupted());

    deliver(
        &miner,
        "peer",
        &Message::Block(BlockFrame {
            addr_from: "peer".to_string(),
            block: successor.serialize().unwrap(),
        }),
    );

    // any round in flight sees the flag and abandons its candidate
    assert!(miner.get_mining_interrupt().is_interrupted());
    assert_eq!(miner.get_blockchain().get_best_height().unwrap(), 1);
}

#[test]
fn test_cancelled_round_requeues_and_can_be_retried() {
    let temp_dir = tempdir().unwrap();
    let hub = Arc::new(MemoryHub::new());

    let sender = Wallet::new().unwrap();
    let recipient = Wallet::new().unwrap();
    let blockchain = Blockchain::create_blockchain_with_path(
        &sender.get_address(),
        temp_dir.path().join("chain").to_str().unwrap(),
    )
    .unwrap();

    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();
    let tx =
        Transaction::new_utxo_transaction(&sender, &recipient.get_address(), 5.0, &utxo_set)
            .unwrap();

    let miner = Node::new("miner", blockchain, hub, Some(TEST_ADDRESS.to_string()));
    miner.get_memory_pool().add(tx.clone());

    // keep the interrupt raised from another thread for the whole round,
    // the way a concurrently accepted peer block would
    let interrupt = miner.get_mining_interrupt().clone();
    let done = Arc::new(AtomicBool::new(false));
    let done_flag = Arc::clone(&done);
    let presser = thread::spawn(move || {
        while !done_flag.load(Ordering::SeqCst) {
            interrupt.interrupt();
            thread::yield_now();
        }
    });

    miner.mine_round().unwrap();
    done.store(true, Ordering::SeqCst);
    presser.join().unwrap();

    // the attempt was abandoned without side effects
    assert_eq!(miner.get_blockchain().get_best_height().unwrap(), 0);
    assert_eq!(miner.get_memory_pool().pending_len(), 1);
    assert!(miner.get_memory_pool().contains(&tx.get_id_hex()));

    // with the interrupt released the same candidate mines normally
    miner.mine_round().unwrap();
    assert_eq!(miner.get_blockchain().get_best_height().unwrap(), 1);
    assert!(miner.get_memory_pool().is_empty());
}

#[test]
fn test_new_sync_cycle_resets_the_transit_queue() {
    let temp_dir = tempdir().unwrap();
    let hub = Arc::new(MemoryHub::new());
    let peer_rx = hub.subscribe("peer");

    let node = Node::new("local", chain_at(&temp_dir.path().join("chain")), hub, None);

    deliver(
        &node,
        "peer",
        &Message::Inv(Inv {
            addr_from: "peer".to_string(),
            kind: InvKind::Block,
            items: vec![vec![0xaa; 32], vec![0xbb; 32]],
        }),
    );
    // the first hash was requested immediately, the second stays queued
    assert_eq!(node.get_blocks_in_transit().len(), 1);
    next_message(&peer_rx);

    deliver(
        &node,
        "peer",
        &Message::Version(Version {
            version: NODE_VERSION,
            best_height: 5,
            addr_from: "peer".to_string(),
        }),
    );

    // the stale hash does not leak into the new cycle
    assert!(node.get_blocks_in_transit().is_empty());
    match next_message(&peer_rx) {
        Message::GetBlocks(_) => {}
        other => panic!("expected getblocks, got {other:?}"),
    }
}

#[test]
fn test_get_tx_from_pool_replies_on_the_mining_topic() {
    let temp_dir = tempdir().unwrap();
    let hub = Arc::new(MemoryHub::new());
    let miner_rx = hub.subscribe("miner");

    let sender = Wallet::new().unwrap();
    let recipient = Wallet::new().unwrap();
    let blockchain = Blockchain::create_blockchain_with_path(
        &sender.get_address(),
        temp_dir.path().join("chain").to_str().unwrap(),
    )
    .unwrap();

    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();
    let tx =
        Transaction::new_utxo_transaction(&sender, &recipient.get_address(), 5.0, &utxo_set)
            .unwrap();

    let full_node = Node::new("full", blockchain, hub, None);
    full_node.get_memory_pool().add(tx.clone());

    deliver(
        &full_node,
        "miner",
        &Message::GetTxFromPool(gossipchain::network::message::GetTxFromPool {
            addr_from: "miner".to_string(),
            count: 2,
        }),
    );

    let (topic, content) = miner_rx.try_recv().unwrap();
    assert_eq!(topic, gossipchain::MINING_TOPIC);
    match Message::from_bytes(&content.payload).unwrap() {
        Message::Tx(frame) => {
            let received = Transaction::deserialize(&frame.transaction).unwrap();
            assert_eq!(received.get_id_hex(), tx.get_id_hex());
        }
        other => panic!("expected tx, got {other:?}"),
    }
}
