// UTXO transaction model: every transaction consumes previous outputs and
// creates new ones. Coinbase transactions are the only exception - they
// mint the block subsidy out of nothing.

use crate::error::{ChainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    base58_decode, deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    serialize, sha256_digest,
};
use crate::wallet::{hash_pub_key, validate_address, Wallet};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Fixed block subsidy paid by every coinbase transaction.
pub const SUBSIDY: f64 = 20.0;

/// Output index a coinbase input carries instead of a real reference.
pub const COINBASE_VOUT: i64 = -1;

/// A reference to a previous transaction output, plus the material that
/// proves the spender may consume it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i64,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i64) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        let locking_hash = hash_pub_key(self.pub_key.as_slice());
        locking_hash.eq(pub_key_hash)
    }
}

/// A spendable amount locked to the hash of its owner's public key.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: f64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: f64, address: &str) -> Result<TXOutput> {
        let mut output = TXOutput {
            value,
            pub_key_hash: vec![],
        };
        output.lock(address)?;
        Ok(output)
    }

    pub fn get_value(&self) -> f64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    fn lock(&mut self, address: &str) -> Result<()> {
        if !validate_address(address) {
            return Err(ChainError::InvalidAddress(address.to_string()));
        }

        let payload = base58_decode(address)?;
        if payload.len() < crate::wallet::ADDRESS_CHECK_SUM_LEN + 1 {
            return Err(ChainError::InvalidAddress("Address too short".to_string()));
        }

        // strip version byte and checksum
        self.pub_key_hash =
            payload[1..payload.len() - crate::wallet::ADDRESS_CHECK_SUM_LEN].to_vec();
        Ok(())
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Mint the block subsidy to `to`. The single input references no
    /// previous output (`txid` empty, `vout` -1) and carries arbitrary
    /// payload bytes where a real input keeps its public key; a random
    /// payload is generated when none is given.
    pub fn new_coinbase_tx(to: &str, data: &str) -> Result<Transaction> {
        let payload = if data.is_empty() {
            Uuid::new_v4().as_simple().to_string()
        } else {
            data.to_string()
        };

        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: vec![],
            pub_key: payload.into_bytes(),
        };
        let tx_output = TXOutput::new(SUBSIDY, to)?;

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![tx_output],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Build and sign a spend of `amount` from `wallet`'s outputs to
    /// `to`, returning the change to the sender.
    pub fn new_utxo_transaction(
        wallet: &Wallet,
        to: &str,
        amount: f64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount <= 0.0 {
            return Err(ChainError::InvalidBlock(
                "Amount must be positive".to_string(),
            ));
        }
        if !validate_address(to) {
            return Err(ChainError::InvalidAddress(format!(
                "Invalid to address: {to}"
            )));
        }

        let public_key_hash = hash_pub_key(wallet.get_public_key());
        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(public_key_hash.as_slice(), amount)?;

        if accumulated < amount {
            return Err(ChainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER
                .decode(txid_hex.as_bytes())
                .map_err(|e| ChainError::Serialization(format!("Invalid transaction ID: {e}")))?;
            for out in outs {
                inputs.push(TXInput {
                    txid: txid.clone(),
                    vout: out as i64,
                    signature: vec![],
                    pub_key: wallet.get_public_key().to_vec(),
                });
            }
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];
        let change = accumulated - amount;
        if change > 0.0 {
            outputs.push(TXOutput::new(change, &wallet.get_address())?);
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;

        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, wallet.get_pkcs8())?;
        Ok(tx)
    }

    /// Copy with every input's signature and public key cleared; this is
    /// the shape both signing and verification hash over.
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput::new(input.get_txid(), input.get_vout()))
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    /// Sign every input against the outputs it spends. `prev_txs` maps
    /// hex txid to the referenced transaction; a missing entry fails with
    /// `NotFound`. Per input the trimmed copy temporarily carries the
    /// referenced output's public key hash in the `pub_key` slot, the
    /// copy is re-hashed, and that digest is what gets signed.
    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter_mut().enumerate() {
            let prev_tx = lookup_prev_tx(prev_txs, vin.get_txid())?;
            let prev_output = referenced_output(&prev_tx, vin.vout)?;

            tx_copy.vin[idx].signature = vec![];
            tx_copy.vin[idx].pub_key = prev_output.pub_key_hash.clone();
            tx_copy.id = tx_copy.hash()?;
            tx_copy.vin[idx].pub_key = vec![];

            vin.signature = ecdsa_p256_sha256_sign_digest(pkcs8, tx_copy.get_id())?;
        }
        Ok(())
    }

    /// Check every input signature by reconstructing the exact digest
    /// `sign` produced. Coinbase transactions always verify.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_tx = lookup_prev_tx(prev_txs, vin.get_txid())?;
            let prev_output = referenced_output(&prev_tx, vin.vout)?;

            tx_copy.vin[idx].signature = vec![];
            tx_copy.vin[idx].pub_key = prev_output.pub_key_hash.clone();
            tx_copy.id = tx_copy.hash()?;
            tx_copy.vin[idx].pub_key = vec![];

            let valid = ecdsa_p256_sha256_sign_verify(
                vin.pub_key.as_slice(),
                vin.signature.as_slice(),
                tx_copy.get_id(),
            );
            if !valid {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// Transaction id: SHA-256 over the serialization with an empty id.
    fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_hex(&self) -> String {
        HEXLOWER.encode(self.id.as_slice())
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

fn lookup_prev_tx(prev_txs: &HashMap<String, Transaction>, txid: &[u8]) -> Result<Transaction> {
    let key = HEXLOWER.encode(txid);
    prev_txs
        .get(&key)
        .cloned()
        .ok_or_else(|| ChainError::NotFound(format!("Previous transaction {key} not resolved")))
}

fn referenced_output(prev_tx: &Transaction, vout: i64) -> Result<TXOutput> {
    if vout < 0 || vout as usize >= prev_tx.vout.len() {
        return Err(ChainError::NotFound(format!(
            "Output index {vout} out of range for transaction {}",
            prev_tx.get_id_hex()
        )));
    }
    Ok(prev_tx.vout[vout as usize].clone())
}
