//! Error types for the swap intermediary core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Internal errors surfaced by the swap lifecycle engine and its
/// collaborator interfaces.
///
/// These never reach the client verbatim; the HTTP façade maps them to a
/// generic 500-level [`ServiceError`].
#[derive(Error, Debug)]
pub enum Error {
    /// Token is not configured for the given chain.
    #[error("Token not found: {0}")]
    TokenNotFound(String),

    /// Chain identifier is not registered.
    #[error("Chain not found: {0}")]
    ChainNotFound(String),

    /// Swap record not found in storage.
    #[error("Swap not found: {0}")]
    SwapNotFound(String),

    /// A state transition outside the declared lifecycle DAG was attempted.
    #[error("Invalid state transition for {identity}: {from} -> {to}")]
    InvalidTransition {
        identity: String,
        from: i8,
        to: i8,
    },

    /// Transaction is not part of the given block.
    #[error("Transaction not found in block: {0}")]
    TxNotInBlock(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Parse error.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Bitcoin-related error.
    #[error("Bitcoin error: {0}")]
    Bitcoin(String),

    /// Lightning node error.
    #[error("Lightning error: {0}")]
    Lightning(String),

    /// Smart-chain contract adapter error.
    #[error("Chain error: {0}")]
    Chain(String),

    /// Price oracle error.
    #[error("Price error: {0}")]
    Price(String),

    /// Integer overflow in amount or fee math.
    #[error("Arithmetic overflow: {0}")]
    Overflow(&'static str),

    /// The request was aborted (client disconnect or sibling pre-fetch failure).
    #[error("Request aborted")]
    Aborted,

    /// Network/HTTP error.
    #[error("Network error: {0}")]
    Network(String),

    /// Generic error with context.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(format!("{:#}", err))
    }
}

/// Business-level error envelope returned to clients.
///
/// Carries the in-body `code` the HTTP surface serializes. Lifecycle and
/// resource errors travel with HTTP 200, malformed input with 400, internal
/// failures with 500.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("{msg} (code {code})")]
pub struct ServiceError {
    pub code: u32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip)]
    pub http_status: u16,
}

impl ServiceError {
    pub fn new(code: u32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: None,
            http_status: 200,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = status;
        self
    }

    /// 20001 - the intermediary vault cannot cover the swap.
    pub fn not_enough_liquidity() -> Self {
        Self::new(codes::NOT_ENOUGH_LIQUIDITY, "Not enough liquidity")
    }

    /// 20002 - the time budget is too small to execute safely (or no route).
    pub fn not_enough_time() -> Self {
        Self::new(codes::NOT_ENOUGH_TIME, "Not enough time to reliably process the swap")
    }

    /// 20003 - amount below the minimum, with the bounds hint in token units.
    pub fn amount_too_low(min: u128, max: u128) -> Self {
        Self::new(codes::AMOUNT_TOO_LOW, "Amount too low").with_data(serde_json::json!({
            "min": min.to_string(),
            "max": max.to_string(),
        }))
    }

    /// 20004 - amount above the maximum, with the bounds hint in token units.
    pub fn amount_too_high(min: u128, max: u128) -> Self {
        Self::new(codes::AMOUNT_TOO_HIGH, "Amount too high").with_data(serde_json::json!({
            "min": min.to_string(),
            "max": max.to_string(),
        }))
    }

    /// 20100 - malformed request body.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, msg).with_http_status(400)
    }

    /// 20200 - unknown chain identifier.
    pub fn invalid_chain() -> Self {
        Self::new(codes::INVALID_CHAIN, "Invalid chain specified").with_http_status(400)
    }

    /// 500 - internal failure; details stay in the logs.
    pub fn internal() -> Self {
        Self::new(0, "Internal server error").with_http_status(500)
    }
}

impl From<Error> for ServiceError {
    fn from(err: Error) -> Self {
        log::error!("internal error surfaced to request: {err}");
        ServiceError::internal()
    }
}

/// Business error codes of the HTTP surface.
pub mod codes {
    pub const NOT_ENOUGH_LIQUIDITY: u32 = 20001;
    pub const NOT_ENOUGH_TIME: u32 = 20002;
    pub const AMOUNT_TOO_LOW: u32 = 20003;
    pub const AMOUNT_TOO_HIGH: u32 = 20004;
    pub const NOT_COMMITTED: u32 = 20005;
    pub const ALREADY_PAID: u32 = 20006;
    pub const NOT_FOUND: u32 = 20007;
    pub const PAYMENT_IN_FLIGHT: u32 = 20008;
    pub const ALREADY_COMMITTED: u32 = 20009;
    pub const EXPIRED: u32 = 20010;
    pub const INVALID_SEQUENCE: u32 = 20042;
    pub const INVALID_CLAIMER_BOUNTY: u32 = 20043;
    pub const DUPLICATE_SEQUENCE: u32 = 20060;
    pub const INVALID_REQUEST: u32 = 20100;
    pub const INVALID_CHAIN: u32 = 20200;
    pub const PLUGIN_MESSAGE: u32 = 29999;

    pub const SUCCESS: u32 = 20000;

    // FromBtcLn invoice polling codes.
    pub const INVOICE_PAID: u32 = 10000;
    pub const INVOICE_EXPIRED: u32 = 10001;
    pub const INVOICE_UNPAID: u32 = 10002;
    pub const INVOICE_NOT_FOUND: u32 = 10003;
    pub const INVOICE_WAITING_COMMIT: u32 = 10004;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_errors_carry_hint() {
        let err = ServiceError::amount_too_low(100, 200);
        assert_eq!(err.code, codes::AMOUNT_TOO_LOW);
        let data = err.data.unwrap();
        assert_eq!(data["min"], "100");
        assert_eq!(data["max"], "200");
    }

    #[test]
    fn internal_errors_do_not_leak() {
        let err: ServiceError = Error::Storage("disk on fire".into()).into();
        assert_eq!(err.http_status, 500);
        assert!(!err.msg.contains("disk"));
    }
}
