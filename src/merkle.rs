//! Bitcoin Merkle inclusion proofs.
//!
//! Computes the proof the smart-chain contract verifies when a swap is
//! claimed against a confirmed Bitcoin transaction. Pure functions over the
//! block's txid list; double-SHA-256 with the canonical odd-width
//! duplication rule.

use crate::error::{Error, Result};
use bitcoin::Txid;
use bitcoin::hashes::Hash as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Merkle inclusion proof for one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionMerkle {
    /// Transaction id in little-endian (internal) byte order.
    #[serde(with = "crate::types::hex_bytes32")]
    pub reversed_txid: [u8; 32],
    /// Index of the transaction within the block.
    pub pos: u32,
    /// Sibling hashes from leaf level upward.
    pub merkle: Vec<[u8; 32]>,
    /// Height of the containing block.
    pub blockheight: u32,
}

/// `SHA256(SHA256(data))`.
pub fn dbl_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Number of nodes at `height` of a Merkle tree over `n` leaves.
fn tree_width(height: u32, n: usize) -> usize {
    (n + (1usize << height) - 1) >> height
}

/// Hash of the subtree node at `(height, pos)`.
///
/// A right sibling positioned at or past the level width is the duplicated
/// left node, per the Bitcoin rule.
fn compute_partial_hash(height: u32, pos: usize, leaves: &[[u8; 32]]) -> [u8; 32] {
    if height == 0 {
        return leaves[pos];
    }
    let left = compute_partial_hash(height - 1, pos * 2, leaves);
    let right = if pos * 2 + 1 < tree_width(height - 1, leaves.len()) {
        compute_partial_hash(height - 1, pos * 2 + 1, leaves)
    } else {
        left
    };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&left);
    buf[32..].copy_from_slice(&right);
    dbl_sha256(&buf)
}

/// Compute the Merkle inclusion proof of `txid` within a block's txid list.
///
/// Walks up from the transaction's leaf, collecting the sibling partial hash
/// at each level. A node without a sibling (odd level width) is duplicated
/// into its parent and contributes no proof element.
pub fn get_transaction_merkle(
    txid: &Txid,
    block_txids: &[Txid],
    blockheight: u32,
) -> Result<TransactionMerkle> {
    let leaves: Vec<[u8; 32]> = block_txids.iter().map(|t| t.to_byte_array()).collect();
    let index = block_txids
        .iter()
        .position(|t| t == txid)
        .ok_or_else(|| Error::TxNotInBlock(txid.to_string()))?;

    let n = leaves.len();
    let mut merkle = Vec::new();
    let mut height = 0u32;
    while tree_width(height, n) > 1 {
        let node = index >> height;
        let sibling = node ^ 1;
        if sibling < tree_width(height, n) {
            merkle.push(compute_partial_hash(height, sibling, &leaves));
        }
        height += 1;
    }

    Ok(TransactionMerkle {
        reversed_txid: leaves[index],
        pos: index as u32,
        merkle,
        blockheight,
    })
}

/// Merkle root of a block's txid list.
pub fn compute_merkle_root(block_txids: &[Txid]) -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = block_txids.iter().map(|t| t.to_byte_array()).collect();
    if leaves.is_empty() {
        return [0u8; 32];
    }
    let n = leaves.len();
    let mut height = 0u32;
    while tree_width(height, n) > 1 {
        height += 1;
    }
    compute_partial_hash(height, 0, &leaves)
}

/// Reconstruct the root from a proof; the verifying contract runs the same
/// walk with the leaf count taken from its block header data.
pub fn reconstruct_root(proof: &TransactionMerkle, leaf_count: usize) -> [u8; 32] {
    let mut current = proof.reversed_txid;
    let mut elements = proof.merkle.iter();
    let mut height = 0u32;
    while tree_width(height, leaf_count) > 1 {
        let node = (proof.pos as usize) >> height;
        let sibling = node ^ 1;
        let mut buf = [0u8; 64];
        if sibling < tree_width(height, leaf_count) {
            let sibling_hash = match elements.next() {
                Some(h) => *h,
                None => return [0u8; 32],
            };
            if node & 1 == 1 {
                buf[..32].copy_from_slice(&sibling_hash);
                buf[32..].copy_from_slice(&current);
            } else {
                buf[..32].copy_from_slice(&current);
                buf[32..].copy_from_slice(&sibling_hash);
            }
        } else {
            buf[..32].copy_from_slice(&current);
            buf[32..].copy_from_slice(&current);
        }
        current = dbl_sha256(&buf);
        height += 1;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_txids(n: usize) -> Vec<Txid> {
        (0..n)
            .map(|i| {
                let mut bytes = [0u8; 32];
                bytes[0] = i as u8;
                bytes[1] = (i >> 8) as u8;
                Txid::from_byte_array(bytes)
            })
            .collect()
    }

    #[test]
    fn single_transaction_block_has_empty_proof() {
        let txids = fake_txids(1);
        let proof = get_transaction_merkle(&txids[0], &txids, 800_000).unwrap();
        assert!(proof.merkle.is_empty());
        assert_eq!(proof.pos, 0);
        assert_eq!(reconstruct_root(&proof, 1), compute_merkle_root(&txids));
    }

    #[test]
    fn proof_reconstructs_root_for_every_position() {
        for n in [2usize, 3, 4, 5, 7, 8, 11, 16, 33] {
            let txids = fake_txids(n);
            let root = compute_merkle_root(&txids);
            for txid in &txids {
                let proof = get_transaction_merkle(txid, &txids, 1).unwrap();
                assert_eq!(
                    reconstruct_root(&proof, n),
                    root,
                    "n={n} pos={}",
                    proof.pos
                );
            }
        }
    }

    #[test]
    fn missing_transaction_errors() {
        let txids = fake_txids(4);
        let foreign = Txid::from_byte_array([0xffu8; 32]);
        assert!(matches!(
            get_transaction_merkle(&foreign, &txids, 1),
            Err(Error::TxNotInBlock(_))
        ));
    }

    #[test]
    fn reversed_txid_is_internal_byte_order() {
        let txids = fake_txids(2);
        let proof = get_transaction_merkle(&txids[0], &txids, 1).unwrap();
        assert_eq!(proof.reversed_txid, txids[0].to_byte_array());
    }
}
