//! Lightning node interface.
//!
//! The core owns no Lightning state; hold invoices live on the node and are
//! referenced locally by payment hash only. Create/settle/cancel must be
//! idempotent against duplicate event delivery.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Type alias for Lightning driver futures.
pub type LnFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Decoded BOLT-11 invoice fields the handlers validate against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedInvoice {
    #[serde(with = "crate::types::hex_bytes32")]
    pub payment_hash: [u8; 32],
    /// Invoice amount; `None` for zero-amount invoices (rejected by handlers).
    pub amount_msat: Option<u64>,
    /// Unix timestamp after which the invoice cannot be paid.
    pub expires_at: u64,
    /// Destination node public key, hex.
    pub destination: String,
}

/// Lifecycle of a hold invoice on the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceState {
    /// Created, no HTLC arrived yet.
    Open,
    /// An HTLC is locked in, awaiting settle or cancel.
    Held,
    /// Settled with the preimage.
    Settled,
    /// Canceled; any held HTLC was released.
    Canceled,
}

/// Parameters for creating a hold invoice.
#[derive(Debug, Clone)]
pub struct HoldInvoiceRequest {
    pub payment_hash: [u8; 32],
    pub amount_msat: u64,
    /// CLTV delta demanded from the payer's final hop.
    pub cltv_delta: u32,
    /// Seconds until the invoice expires unpaid.
    pub expires_in_secs: u64,
    pub description: String,
    pub description_hash: Option<[u8; 32]>,
}

/// A hold invoice as reported by the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldInvoice {
    #[serde(with = "crate::types::hex_bytes32")]
    pub payment_hash: [u8; 32],
    pub bolt11: String,
    pub state: InvoiceState,
    pub amount_msat: u64,
    /// Sum over held HTLCs; meaningful in `Held`.
    pub received_msat: u64,
    /// Remaining CLTV budget of the lowest held HTLC, in blocks.
    pub htlc_cltv_remaining: Option<u32>,
    /// Unix expiry of the invoice.
    pub expires_at: u64,
}

/// Final or in-flight status of an outbound payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PaymentStatus {
    /// The node knows nothing about this payment hash.
    NotFound,
    /// Dispatched, not yet resolved.
    Pending,
    /// Paid; the preimage is the proof.
    Confirmed {
        #[serde(with = "crate::types::hex_bytes32")]
        preimage: [u8; 32],
        fee_msat: u64,
    },
    /// Finally failed; safe to let the escrow refund.
    Failed { reason: String },
}

/// Parameters for dispatching an outbound payment.
#[derive(Debug, Clone)]
pub struct PayRequest {
    pub bolt11: String,
    /// Routing fee cap in millisatoshi.
    pub max_fee_msat: u64,
    /// Absolute block height the route's total CLTV must stay under.
    pub max_timeout_height: u32,
}

/// Result of probing a route without paying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Routing fee of the probed route in millisatoshi.
    pub fee_msat: u64,
    /// Success confidence in `[0, 1]` as estimated by the node.
    pub confidence: f64,
}

/// Local/remote channel liquidity totals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelBalance {
    pub local_msat: u64,
    pub remote_msat: u64,
}

/// Lightning node driver.
///
/// Payment dispatch is fire-and-forget: `pay` returns once the payment is
/// accepted by the node, and the outcome is observed via `wait_payment`.
pub trait LightningWallet: Send + Sync {
    /// Decode a BOLT-11 payment request.
    fn parse_invoice(&self, bolt11: &str) -> LnFuture<'_, ParsedInvoice>;

    /// Create a hold invoice for the given payment hash.
    fn create_hold_invoice(&self, request: HoldInvoiceRequest) -> LnFuture<'_, HoldInvoice>;

    /// Look up an invoice by payment hash.
    ///
    /// Returns `Ok(None)` for unknown payment hashes.
    fn get_invoice(&self, payment_hash: &[u8; 32]) -> LnFuture<'_, Option<HoldInvoice>>;

    /// Cancel a hold invoice, releasing any held HTLC.
    ///
    /// Idempotent: canceling an already-canceled invoice succeeds.
    fn cancel_hold_invoice(&self, payment_hash: &[u8; 32]) -> LnFuture<'_, ()>;

    /// Settle a held invoice with its preimage.
    ///
    /// Idempotent: settling an already-settled invoice succeeds.
    fn settle_hold_invoice(&self, preimage: &[u8; 32]) -> LnFuture<'_, ()>;

    /// Dispatch an outbound payment. Fire-and-forget.
    fn pay(&self, request: PayRequest) -> LnFuture<'_, ()>;

    /// Status of a past or in-flight outbound payment.
    fn get_payment(&self, payment_hash: &[u8; 32]) -> LnFuture<'_, PaymentStatus>;

    /// Resolve once an in-flight payment reaches a final state.
    fn wait_payment(&self, payment_hash: &[u8; 32]) -> LnFuture<'_, PaymentStatus>;

    /// Probe a route for the invoice under the given constraints.
    ///
    /// Returns `Ok(None)` when no route satisfies them.
    fn probe_route(
        &self,
        bolt11: &str,
        max_fee_msat: u64,
        max_timeout_height: u32,
    ) -> LnFuture<'_, Option<ProbeResult>>;

    /// Current Bitcoin block height as seen by the node.
    fn get_block_height(&self) -> LnFuture<'_, u32>;

    /// Aggregate channel balance.
    fn get_channel_balance(&self) -> LnFuture<'_, ChannelBalance>;
}
