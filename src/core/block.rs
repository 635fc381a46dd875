use crate::core::proof_of_work::{MiningInterrupt, DEFAULT_DIFFICULTY};
use crate::core::{MerkleTree, ProofOfWork, Transaction};
use crate::error::{ChainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};
use sled::IVec;

/// A mined block. Hashes are raw byte vectors; the genesis block is the
/// only one with an empty `pre_block_hash`.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    pre_block_hash: Vec<u8>,
    hash: Vec<u8>,
    transactions: Vec<Transaction>,
    nonce: i64,
    height: usize,
    difficulty: i64,
    merkle_root: Vec<u8>,
}

impl Block {
    /// Assemble and mine a block. Returns `Ok(None)` when the interrupt
    /// fires before a nonce is found; the half-built candidate is
    /// discarded.
    pub fn new_block(
        pre_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
        interrupt: &MiningInterrupt,
    ) -> Result<Option<Block>> {
        if transactions.is_empty() {
            return Err(ChainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let merkle_root = MerkleTree::new(transactions)?.get_root().to_vec();

        let mut block = Block {
            timestamp: current_timestamp()?,
            pre_block_hash,
            hash: vec![],
            transactions: transactions.to_vec(),
            nonce: 0,
            height,
            difficulty: DEFAULT_DIFFICULTY,
            merkle_root,
        };

        let pow = ProofOfWork::new_proof_of_work(block.clone());
        match pow.run(interrupt) {
            Some((nonce, hash)) => {
                block.nonce = nonce;
                block.hash = hash;
                info!(
                    "Proof-of-work completed for block {} at height {height}",
                    HEXLOWER.encode(&block.hash)
                );
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    pub fn generate_genesis_block(transaction: &Transaction) -> Result<Block> {
        let transactions = vec![transaction.clone()];
        // Genesis mining is never interrupted
        let block = Block::new_block(vec![], &transactions, 0, &MiningInterrupt::new())?;
        block.ok_or_else(|| ChainError::InvalidBlock("Genesis mining was interrupted".to_string()))
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    /// Tip-successor validity: a genesis block is accepted as-is; any
    /// other block must sit exactly one above the tip, link to the tip's
    /// hash and carry valid proof of work.
    pub fn validate_against_tip(&self, tip: &Block) -> Result<()> {
        if self.is_genesis() {
            return Ok(());
        }
        if self.height != tip.get_height() + 1 {
            return Err(ChainError::ConsensusViolation(format!(
                "Block height {} does not follow tip height {}",
                self.height,
                tip.get_height()
            )));
        }
        if self.pre_block_hash != tip.get_hash() {
            return Err(ChainError::ConsensusViolation(format!(
                "Block {} does not link to tip {}",
                HEXLOWER.encode(&self.hash),
                HEXLOWER.encode(tip.get_hash())
            )));
        }
        if !ProofOfWork::validate(self) {
            return Err(ChainError::ConsensusViolation(format!(
                "Block {} fails proof-of-work validation",
                HEXLOWER.encode(&self.hash)
            )));
        }
        Ok(())
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        self.pre_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_hash_hex(&self) -> String {
        HEXLOWER.encode(self.hash.as_slice())
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_difficulty(&self) -> i64 {
        self.difficulty
    }

    pub fn get_merkle_root(&self) -> &[u8] {
        &self.merkle_root
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    #[cfg(test)]
    pub fn set_nonce_for_test(&mut self, nonce: i64) {
        self.nonce = nonce;
    }

    /// Verify that the stored Merkle root matches the transactions.
    pub fn verify_merkle_root(&self) -> Result<bool> {
        let calculated = MerkleTree::new(&self.transactions)?.get_root().to_vec();
        Ok(calculated == self.merkle_root)
    }
}

impl From<Block> for IVec {
    fn from(b: Block) -> Self {
        let bytes =
            serialize(&b).expect("Block serialization should never fail for IVec conversion");
        Self::from(bytes)
    }
}
