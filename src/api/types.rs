//! API types for the swap intermediary HTTP surface.
//!
//! These match the wire schema: business errors travel as HTTP 200 with an
//! in-body `code`, malformed input as 400, internal failures as 500.

use crate::chain::SwapData;
use serde::{Deserialize, Serialize};

/// Generic success envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: crate::error::codes::SUCCESS,
            msg: "Success".to_string(),
            data: Some(data),
        }
    }
}

/// `POST {path}/info` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoRequest {
    /// Caller nonce echoed inside the signed envelope; at most 64 hex chars.
    pub nonce: String,
}

/// Per-chain signature over the info envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSignature {
    pub address: String,
    pub signature: String,
}

/// `POST {path}/info` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    /// JSON-stringified `{nonce, services}` envelope the signatures cover.
    pub envelope: String,
    /// Default chain signer address.
    pub address: String,
    /// Default chain signature.
    pub signature: String,
    pub chains: std::collections::HashMap<String, ChainSignature>,
}

/// `POST {path}/ln/payInvoice` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayInvoiceRequest {
    /// BOLT-11 payment request.
    pub pr: String,
    /// Routing fee cap in satoshi.
    pub max_fee: u64,
    /// Unix time the smart-chain escrow expires.
    pub expiry_timestamp: u64,
    pub token: String,
    /// Smart-chain address funding the escrow.
    pub offerer: String,
    #[serde(default)]
    pub chain: Option<String>,
}

/// `POST {path}/ln/payInvoice` success payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayInvoiceResponse {
    #[serde(with = "crate::types::dec_string")]
    pub max_fee: u128,
    #[serde(with = "crate::types::dec_string")]
    pub swap_fee: u128,
    #[serde(with = "crate::types::dec_string")]
    pub total: u128,
    /// Route success confidence in `[0, 1]`.
    pub confidence: f64,
    /// Intermediary's smart-chain address (the claimer).
    pub address: String,
    pub data: SwapData,
    pub prefix: String,
    pub timeout: u64,
    pub signature: String,
}

/// `POST {path}/ln/getRefundAuthorization` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundAuthorizationRequest {
    /// Payment hash, hex.
    pub payment_hash: String,
    #[serde(default)]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub chain: Option<String>,
}

/// Refund authorization payload (code 20000).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundAuthorizationResponse {
    pub address: String,
    pub prefix: String,
    pub timeout: u64,
    pub signature: String,
}

/// `POST {path}/onchain/getQuote` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnchainQuoteRequest {
    /// Destination Bitcoin address.
    pub address: String,
    /// Requested amount in satoshi.
    pub amount: u64,
    pub token: String,
    pub offerer: String,
    /// Preferred confirmation target in blocks.
    pub confirmation_target: u32,
    /// Unix time the smart-chain escrow expires.
    pub expiry_timestamp: u64,
    #[serde(default)]
    pub chain: Option<String>,
}

/// `POST {path}/onchain/getQuote` success payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnchainQuoteResponse {
    pub amount: u64,
    #[serde(with = "crate::types::dec_string")]
    pub network_fee: u128,
    #[serde(with = "crate::types::dec_string")]
    pub swap_fee: u128,
    #[serde(with = "crate::types::dec_string")]
    pub total: u128,
    pub address: String,
    pub data: SwapData,
    pub prefix: String,
    pub timeout: u64,
    pub signature: String,
}

/// `POST {path}/ln/createInvoice` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoiceRequest {
    /// Claimer's smart-chain address.
    pub address: String,
    /// Payment hash, hex.
    pub payment_hash: String,
    /// Invoice amount in satoshi.
    pub amount: u64,
    pub token: String,
    #[serde(default)]
    pub description_hash: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
}

/// `POST {path}/ln/createInvoice` success payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoiceResponse {
    pub pr: String,
    #[serde(with = "crate::types::dec_string")]
    pub swap_fee: u128,
    #[serde(with = "crate::types::dec_string")]
    pub total: u128,
    /// Intermediary's smart-chain address (the offerer of the escrow).
    pub intermediary_key: String,
    #[serde(with = "crate::types::dec_string")]
    pub security_deposit: u128,
}

/// `GET|POST {path}/ln/getInvoiceStatus` and auth request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceStatusRequest {
    /// Payment hash, hex.
    pub payment_hash: String,
}

/// Code-only response of the invoice polling endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub code: u32,
    pub msg: String,
}

impl StatusResponse {
    pub fn new(code: u32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }
}

/// `GET|POST {path}/ln/getInvoicePaymentAuth` success payload (code 10000).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoicePaymentAuthResponse {
    pub address: String,
    pub data: SwapData,
    pub prefix: String,
    pub timeout: u64,
    pub signature: String,
}

/// Claimer bounty parameters supplied by the client on `getAddress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimerBountyParams {
    #[serde(with = "crate::types::dec_string")]
    pub fee_per_block: u128,
    pub safety_factor: u64,
    pub start_timestamp: u64,
    pub add_block: u64,
    #[serde(with = "crate::types::dec_string")]
    pub add_fee: u128,
}

/// `POST {path}/onchain/getAddress` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAddressRequest {
    /// Claimer's smart-chain address.
    pub address: String,
    /// Amount in satoshi (exact-in) or token base units (exact-out).
    #[serde(with = "crate::types::dec_string")]
    pub amount: u128,
    pub token: String,
    /// 64-bit swap disambiguator.
    pub sequence: u64,
    #[serde(default)]
    pub exact_out: bool,
    pub claimer_bounty: ClaimerBountyParams,
    /// Client-suggested smart-chain fee rate hint.
    #[serde(default)]
    pub fee_rate: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
}

/// `POST {path}/onchain/getAddress` success payload.
///
/// The streaming writer sends `sign_data_prefetch` ahead of the final body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAddressResponse {
    pub amount: u64,
    pub btc_address: String,
    /// Intermediary's smart-chain address (the offerer of the escrow).
    pub address: String,
    #[serde(with = "crate::types::dec_string")]
    pub swap_fee: u128,
    #[serde(with = "crate::types::dec_string")]
    pub total: u128,
    pub data: SwapData,
    pub prefix: String,
    pub timeout: u64,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_data_prefetch: Option<serde_json::Value>,
}
