//! Smart-chain contract abstraction.
//!
//! The core never talks to a chain directly; it builds [`SwapData`] payloads,
//! asks the per-chain [`SwapContract`] adapter for signatures and state, and
//! consumes the adapter's `Initialize|Claim|Refund` event feed.

use crate::error::{Error, Result};
use crate::merkle::TransactionMerkle;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for contract adapter futures.
pub type ChainFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Which claim predicate the escrow enforces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SwapKind {
    /// Claimable with a preimage matching the payment hash.
    Htlc,
    /// Claimable with a Merkle-proven Bitcoin transaction.
    Chain {
        /// Confirmations the proof must demonstrate.
        confirmations: u32,
        /// Transaction nonce bound into the payment hash.
        nonce: u64,
        /// Commitment to the expected `(amount, output script)` pair.
        #[serde(with = "crate::types::hex_bytes32")]
        txo_hash: [u8; 32],
    },
}

/// Smart-chain escrow payload.
///
/// Serialized verbatim into swap records and handed back to the adapter for
/// every contract call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapData {
    #[serde(with = "crate::types::hex_bytes32")]
    pub payment_hash: [u8; 32],
    pub sequence: u64,
    /// Address funding the escrow.
    pub offerer: String,
    /// Address withdrawing on proof.
    pub claimer: String,
    /// Token contract address.
    pub token: String,
    /// Escrowed token amount in base units.
    #[serde(with = "crate::types::dec_string")]
    pub amount: u128,
    /// Unix time after which the offerer may refund.
    pub expiry: u64,
    /// Native-currency collateral locked by the claimer side.
    #[serde(with = "crate::types::dec_string")]
    pub security_deposit: u128,
    /// Native-currency reward for whoever posts the claim transaction.
    #[serde(with = "crate::types::dec_string")]
    pub claimer_bounty: u128,
    /// Whether the offerer pays the escrow in from their own balance.
    pub pay_in: bool,
    /// Whether the claim pays out to an external address.
    pub pay_out: bool,
    #[serde(flatten)]
    pub kind: SwapKind,
}

impl SwapData {
    pub fn is_htlc(&self) -> bool {
        matches!(self.kind, SwapKind::Htlc)
    }
}

/// Escrow state as read from the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStatus {
    NotCommitted,
    Committed,
    /// Claimed; the secret is on chain.
    Paid,
    /// Commit window or escrow elapsed.
    Expired,
}

/// Signature envelope authorizing an init or refund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureData {
    pub prefix: String,
    pub timeout: u64,
    pub signature: String,
}

/// Escrow initialized on chain.
#[derive(Debug, Clone)]
pub struct InitializeEvent {
    pub payment_hash: [u8; 32],
    pub sequence: u64,
    pub tx_id: String,
    pub data: SwapData,
}

/// Escrow claimed; the revealed secret travels with the event.
#[derive(Debug, Clone)]
pub struct ClaimEvent {
    pub payment_hash: [u8; 32],
    pub sequence: u64,
    pub secret: [u8; 32],
    pub tx_id: String,
}

/// Escrow refunded to the offerer.
#[derive(Debug, Clone)]
pub struct RefundEvent {
    pub payment_hash: [u8; 32],
    pub sequence: u64,
    pub tx_id: String,
}

/// Event feed of one smart chain, delivered in chain order.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    Initialize(InitializeEvent),
    Claim(ClaimEvent),
    Refund(RefundEvent),
}

impl ChainEvent {
    pub fn payment_hash(&self) -> &[u8; 32] {
        match self {
            ChainEvent::Initialize(e) => &e.payment_hash,
            ChainEvent::Claim(e) => &e.payment_hash,
            ChainEvent::Refund(e) => &e.payment_hash,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            ChainEvent::Initialize(e) => e.sequence,
            ChainEvent::Claim(e) => e.sequence,
            ChainEvent::Refund(e) => e.sequence,
        }
    }
}

/// Smart-chain contract adapter.
pub trait SwapContract: Send + Sync {
    /// The intermediary's address on this chain.
    fn get_address(&self) -> String;

    /// Address of the chain's native currency in token terms.
    fn native_token_address(&self) -> String;

    /// Whether `address` is well-formed for this chain.
    fn is_valid_address(&self, address: &str) -> bool;

    /// Read the escrow state for a payload.
    fn get_commit_status(&self, data: &SwapData) -> ChainFuture<'_, CommitStatus>;

    /// Signature authorizing the counterparty to initialize the escrow.
    fn get_init_signature(
        &self,
        data: &SwapData,
        auth_timeout_secs: u64,
        fee_rate: Option<&str>,
    ) -> ChainFuture<'_, SignatureData>;

    /// Signature authorizing the counterparty to refund a committed escrow.
    fn get_refund_signature(&self, data: &SwapData) -> ChainFuture<'_, SignatureData>;

    /// Opaque signing context streamed to clients ahead of the quote.
    fn pre_fetch_sign_data(&self) -> ChainFuture<'_, serde_json::Value>;

    /// Vault balance for a token, in base units.
    fn get_balance(&self, token: &str) -> ChainFuture<'_, u128>;

    /// Native-currency fee estimate of a refund transaction.
    fn get_refund_fee(&self, data: &SwapData) -> ChainFuture<'_, u128>;

    /// Whether `get_refund_fee` returns a raw estimate. Adapters exposing
    /// only a padded estimate make the base security deposit double it.
    fn has_raw_refund_fee(&self) -> bool;

    /// Claim an escrow we are the claimer of, revealing the preimage.
    fn claim_with_secret(&self, data: &SwapData, secret: &[u8; 32]) -> ChainFuture<'_, String>;

    /// Claim a `Chain`-kind escrow with a Merkle-proven Bitcoin transaction.
    fn claim_with_tx_data(
        &self,
        data: &SwapData,
        proof: &TransactionMerkle,
        raw_tx: &[u8],
    ) -> ChainFuture<'_, String>;

    /// Refund an escrow we funded after its expiry.
    fn refund(&self, data: &SwapData) -> ChainFuture<'_, String>;

    /// Sign an arbitrary message with the chain signer (info envelope).
    fn sign_message(&self, message: &[u8]) -> ChainFuture<'_, String>;
}

/// Payment hash binding `(output script, amount, nonce)` for on-chain swaps,
/// committed in exactly that byte order with the amount little-endian.
pub fn onchain_payment_hash(output_script: &[u8], amount_sat: u64, nonce: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(output_script);
    hasher.update(amount_sat.to_le_bytes());
    hasher.update(nonce.to_le_bytes());
    hasher.finalize().into()
}

/// Commitment to the expected transaction output.
pub fn txo_hash(amount_sat: u64, output_script: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(amount_sat.to_le_bytes());
    hasher.update(output_script);
    hasher.finalize().into()
}

/// One registered smart chain.
pub struct ChainData {
    pub contract: Arc<dyn SwapContract>,
    pub allowed_tokens: HashSet<String>,
}

/// Registry of every smart chain this intermediary serves.
pub struct ChainRegistry {
    chains: HashMap<String, ChainData>,
    default_chain: String,
}

impl ChainRegistry {
    pub fn new(default_chain: impl Into<String>) -> Self {
        Self {
            chains: HashMap::new(),
            default_chain: default_chain.into(),
        }
    }

    pub fn register(
        &mut self,
        chain_id: impl Into<String>,
        contract: Arc<dyn SwapContract>,
        allowed_tokens: impl IntoIterator<Item = String>,
    ) {
        self.chains.insert(
            chain_id.into(),
            ChainData {
                contract,
                allowed_tokens: allowed_tokens.into_iter().collect(),
            },
        );
    }

    pub fn get(&self, chain_id: &str) -> Result<&ChainData> {
        self.chains
            .get(chain_id)
            .ok_or_else(|| Error::ChainNotFound(chain_id.to_string()))
    }

    pub fn contract(&self, chain_id: &str) -> Result<Arc<dyn SwapContract>> {
        Ok(self.get(chain_id)?.contract.clone())
    }

    pub fn is_token_allowed(&self, chain_id: &str, token: &str) -> bool {
        self.chains
            .get(chain_id)
            .map(|c| c.allowed_tokens.contains(token))
            .unwrap_or(false)
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = &String> {
        self.chains.keys()
    }

    pub fn default_chain(&self) -> &str {
        &self.default_chain
    }

    /// Resolve an optional client-supplied chain id to a registered chain.
    pub fn resolve(&self, chain_id: Option<&str>) -> Result<(String, &ChainData)> {
        let id = chain_id.unwrap_or(&self.default_chain).to_string();
        let data = self.get(&id)?;
        Ok((id, data))
    }
}
