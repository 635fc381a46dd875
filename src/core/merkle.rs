use crate::core::Transaction;
use crate::error::{ChainError, Result};
use crate::utils::sha256_digest;

/// Merkle tree over the serialized transactions of a block.
///
/// Leaves are SHA-256 digests of the transaction serializations. Levels
/// with an odd node count duplicate their last node; parents hash the
/// concatenation of their children. A block therefore commits to full
/// transaction contents, not just ids.
pub struct MerkleTree {
    root: Vec<u8>,
}

impl MerkleTree {
    pub fn new(transactions: &[Transaction]) -> Result<MerkleTree> {
        if transactions.is_empty() {
            return Err(ChainError::InvalidBlock(
                "Cannot build a Merkle tree from an empty transaction list".to_string(),
            ));
        }

        let mut leaves = Vec::with_capacity(transactions.len());
        for tx in transactions {
            leaves.push(tx.serialize()?);
        }
        Ok(MerkleTree {
            root: Self::calculate_merkle_root(&leaves),
        })
    }

    pub fn get_root(&self) -> &[u8] {
        self.root.as_slice()
    }

    /// Fold a non-empty list of leaf payloads up to the root hash.
    fn calculate_merkle_root(leaves: &[Vec<u8>]) -> Vec<u8> {
        let mut current_level: Vec<Vec<u8>> =
            leaves.iter().map(|data| sha256_digest(data)).collect();

        while current_level.len() > 1 {
            if current_level.len() % 2 != 0 {
                let last = current_level[current_level.len() - 1].clone();
                current_level.push(last);
            }

            let mut next_level = Vec::with_capacity(current_level.len() / 2);
            for pair in current_level.chunks(2) {
                let mut combined = Vec::with_capacity(pair[0].len() + pair[1].len());
                combined.extend_from_slice(&pair[0]);
                combined.extend_from_slice(&pair[1]);
                next_level.push(sha256_digest(&combined));
            }
            current_level = next_level;
        }

        current_level.remove(0)
    }
}
