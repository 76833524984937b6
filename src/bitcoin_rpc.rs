//! Bitcoin chain driver interface.
//!
//! Narrow read/broadcast surface over a full or light Bitcoin backend. The
//! core consumes it for confirmation tracking, Merkle proof inputs and
//! transaction broadcast; SPV verification itself happens on the smart chain.

use crate::error::Result;
use bitcoin::block::Header;
use bitcoin::{Block, BlockHash, Transaction, Txid};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Type alias for Bitcoin driver futures.
pub type BtcFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Confirmation status of a wallet-relevant transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtcTxInfo {
    pub txid: Txid,
    pub confirmations: u32,
    pub blockhash: Option<BlockHash>,
    pub blockheight: Option<u32>,
}

/// Backend sync status.
///
/// Light backends report `verification_progress` as `1.0` whenever they
/// consider themselves synced, and may keep `ibd` raised; `synced` is the
/// authoritative field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtcSyncInfo {
    pub synced: bool,
    pub ibd: bool,
    pub verification_progress: f64,
    pub blockheight: u32,
}

/// Bitcoin chain driver.
pub trait BitcoinRpc: Send + Sync {
    /// Height of the chain tip.
    fn get_tip_height(&self) -> BtcFuture<'_, u32>;

    /// Block hash at the given height.
    fn get_block_hash(&self, height: u32) -> BtcFuture<'_, BlockHash>;

    /// Header of the given block.
    fn get_block_header(&self, hash: &BlockHash) -> BtcFuture<'_, Header>;

    /// Full block with transactions.
    fn get_block(&self, hash: &BlockHash) -> BtcFuture<'_, Block>;

    /// Confirmation info for a transaction.
    ///
    /// Returns `Ok(None)` when the backend does not know the transaction.
    fn get_transaction(&self, txid: &Txid) -> BtcFuture<'_, Option<BtcTxInfo>>;

    /// Fee estimate in satoshi per virtual byte for the given target.
    fn estimate_fee(&self, conf_target: u32) -> BtcFuture<'_, u64>;

    /// Broadcast a raw transaction.
    fn send_raw_transaction(&self, tx: &Transaction) -> BtcFuture<'_, Txid>;

    /// Backend sync status.
    fn get_sync_info(&self) -> BtcFuture<'_, BtcSyncInfo>;
}
