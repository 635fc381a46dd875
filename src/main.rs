use clap::Parser;
use data_encoding::HEXLOWER;
use gossipchain::{
    convert_address, hash_pub_key, utils, validate_address, Blockchain, Command, MemoryHub,
    MiningInterrupt, Node, Opt, Transaction, UTXOSet, Wallets, ADDRESS_CHECK_SUM_LEN,
    GLOBAL_CONFIG,
};
use log::{error, LevelFilter};
use std::process;
use std::sync::Arc;

const MINE_TRUE: usize = 1;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

/// Open the ledger for this instance, namespaced by `NODE_ID` when set.
fn open_blockchain() -> gossipchain::Result<Blockchain> {
    match GLOBAL_CONFIG.get_node_id() {
        Some(node_id) => Blockchain::new_blockchain_with_node_id(&node_id),
        None => Blockchain::new_blockchain(),
    }
}

fn create_blockchain(genesis_address: &str) -> gossipchain::Result<Blockchain> {
    match GLOBAL_CONFIG.get_node_id() {
        Some(node_id) => Blockchain::create_blockchain_with_node_id(genesis_address, &node_id),
        None => Blockchain::create_blockchain(genesis_address),
    }
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let blockchain = create_blockchain(&address)?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::new();
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }

            let payload = utils::base58_decode(&address)?;
            if payload.len() < ADDRESS_CHECK_SUM_LEN + 1 {
                return Err("Address too short".into());
            }
            let pub_key_hash = &payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN];

            let blockchain = open_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain);
            let balance: f64 = utxo_set
                .find_utxo(pub_key_hash)?
                .iter()
                .map(|utxo| utxo.get_value())
                .sum();
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::new();
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }
            if amount <= 0.0 {
                return Err("Amount must be positive".into());
            }

            let wallets = Wallets::new();
            let wallet = wallets
                .get_wallet(&from)
                .ok_or_else(|| format!("No local wallet for address {from}"))?;

            let blockchain = open_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain.clone());
            let transaction = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;

            if mine == MINE_TRUE {
                let coinbase = Transaction::new_coinbase_tx(&from, "")?;
                let block = blockchain
                    .mine_block(&[coinbase, transaction], &MiningInterrupt::new())?
                    .ok_or("Mining was interrupted")?;
                utxo_set.update(&block)?;
            } else {
                let node_id = GLOBAL_CONFIG
                    .get_node_id()
                    .unwrap_or_else(|| "default".to_string());
                // A fresh in-process hub has no subscribers, so from this
                // short-lived CLI process the broadcast reaches nobody.
                // A deployment that wants `send ... 0` delivered swaps in
                // a Transport bridged to its network transport.
                let transport = Arc::new(MemoryHub::new());
                let node = Node::new(&node_id, blockchain, transport, None);
                node.broadcast_transaction(&transaction)?;
            }
            println!("Success!")
        }
        Command::Printchain => {
            let mut block_iterator = open_blockchain()?.iterator();
            while let Some(block) = block_iterator.next() {
                println!(
                    "Pre block hash: {}",
                    HEXLOWER.encode(block.get_pre_block_hash())
                );
                println!("Cur block hash: {}", block.get_hash_hex());
                println!("Cur block timestamp: {}", block.get_timestamp());
                println!("Cur block height: {}", block.get_height());

                for tx in block.get_transactions() {
                    println!("- Transaction txid_hex: {}", tx.get_id_hex());

                    if !tx.is_coinbase() {
                        for input in tx.get_vin() {
                            let txid_hex = HEXLOWER.encode(input.get_txid());
                            let pub_key_hash = hash_pub_key(input.get_pub_key());
                            let address = convert_address(pub_key_hash.as_slice());
                            println!(
                                "-- Input txid = {}, vout = {}, from = {}",
                                txid_hex,
                                input.get_vout(),
                                address,
                            )
                        }
                    }
                    for output in tx.get_vout() {
                        let address = convert_address(output.get_pub_key_hash());
                        println!("-- Output value = {}, to = {}", output.get_value(), address,)
                    }
                }
                println!()
            }
        }
        Command::GetBlock { height } => {
            let blockchain = open_blockchain()?;
            match blockchain.get_block_by_height(height) {
                Some(block) => {
                    println!("Block hash: {}", block.get_hash_hex());
                    println!("Height: {}", block.get_height());
                    println!("Timestamp: {}", block.get_timestamp());
                    println!("Transactions: {}", block.get_transactions().len());
                }
                None => println!("No block at height {height}"),
            }
        }
        Command::Reindexutxo => {
            let blockchain = open_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::StartNode { miner } => {
            let node_id = GLOBAL_CONFIG
                .get_node_id()
                .unwrap_or_else(|| "default".to_string());

            if let Some(addr) = miner {
                if !validate_address(&addr) {
                    return Err(format!("Invalid miner address: {addr}").into());
                }
                println!("Mining is on. Address to receive rewards: {addr}");
                GLOBAL_CONFIG.set_mining_addr(addr);
            }

            let blockchain = open_blockchain().map_err(|_| {
                format!("No blockchain found for node {node_id}. Use 'createblockchain' first.")
            })?;

            let hub = Arc::new(MemoryHub::new());
            let incoming = hub.subscribe(&node_id);
            let node = Node::new(&node_id, blockchain, hub, GLOBAL_CONFIG.get_mining_addr());
            node.run(incoming)?;
        }
    }
    Ok(())
}
