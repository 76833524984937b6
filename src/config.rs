//! Configuration structs for the swap handlers.
//!
//! These are plain serde structs; loading them from disk or environment is
//! the embedding server's concern.

use serde::{Deserialize, Serialize};

/// Fee and amount-bound parameters shared by all handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Flat fee in satoshi charged on every swap.
    pub base_fee_sat: u64,
    /// Proportional fee in parts-per-million of the BTC amount.
    pub fee_ppm: u64,
    /// Minimum swap amount in satoshi.
    pub min_sat: u64,
    /// Maximum swap amount in satoshi.
    pub max_sat: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            base_fee_sat: 10,
            fee_ppm: 3000,
            min_sat: 1_000,
            max_sat: 1_000_000,
        }
    }
}

/// Security deposit parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityDepositConfig {
    /// Annual percentage yield on locked capital, in parts-per-million.
    pub apy_ppm: u64,
}

impl Default for SecurityDepositConfig {
    fn default() -> Self {
        // 10% APY
        Self { apy_ppm: 100_000 }
    }
}

/// Timing margins applied to CLTV budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Expected Bitcoin block time in seconds.
    pub bitcoin_blocktime_secs: u64,
    /// Multiplicative margin on CLTV budgets to tolerate block-time variance.
    pub safety_factor: u64,
    /// Additive margin in seconds.
    pub grace_period_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            bitcoin_blocktime_secs: 600,
            safety_factor: 2,
            grace_period_secs: 600,
        }
    }
}

/// Configuration of the ToBtcLn handler (Lightning outbound).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToBtcLnConfig {
    pub fees: FeeConfig,
    pub timing: TimingConfig,
    /// Minimum CLTV budget (in blocks) required to dispatch the payment.
    pub min_send_cltv: u32,
    /// Maximum CLTV budget (in blocks) a route may use.
    pub max_usable_cltv: u32,
    /// How long a quote signature stays valid, in seconds.
    pub authorization_timeout_secs: u64,
    /// Watchdog interval in seconds.
    pub swap_check_interval_secs: u64,
}

impl ToBtcLnConfig {
    pub fn sane_defaults() -> Self {
        Self {
            fees: FeeConfig::default(),
            timing: TimingConfig::default(),
            min_send_cltv: 10,
            max_usable_cltv: 500,
            authorization_timeout_secs: 600,
            swap_check_interval_secs: 60,
        }
    }
}

/// Configuration of the ToBtc handler (on-chain outbound).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToBtcConfig {
    pub fees: FeeConfig,
    pub timing: TimingConfig,
    /// Confirmation count after which the Bitcoin payment is claimable.
    pub confirmations: u32,
    /// Bounds on the client-requested confirmation target.
    pub min_confirmation_target: u32,
    pub max_confirmation_target: u32,
    /// How long a quote signature stays valid, in seconds.
    pub authorization_timeout_secs: u64,
    /// Watchdog interval in seconds.
    pub swap_check_interval_secs: u64,
    /// Coin-selection candidate ordering.
    pub coin_selection_order: crate::bitcoin_wallet::CoinSelectionOrder,
    /// Upper bound multiplier (ppm) on fee bumps relative to the quoted rate.
    pub max_fee_bump_ppm: u64,
}

impl ToBtcConfig {
    pub fn sane_defaults() -> Self {
        Self {
            fees: FeeConfig::default(),
            timing: TimingConfig::default(),
            confirmations: 3,
            min_confirmation_target: 1,
            max_confirmation_target: 12,
            authorization_timeout_secs: 600,
            swap_check_interval_secs: 60,
            coin_selection_order: crate::bitcoin_wallet::CoinSelectionOrder::Randomize,
            max_fee_bump_ppm: 1_500_000,
        }
    }
}

/// Configuration of the FromBtcLn handler (Lightning inbound).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FromBtcLnConfig {
    pub fees: FeeConfig,
    pub timing: TimingConfig,
    pub security_deposit: SecurityDepositConfig,
    /// Minimum CLTV delta the incoming HTLC must leave us.
    pub min_cltv: u32,
    /// Hold-invoice expiry in seconds.
    pub invoice_timeout_secs: u64,
    /// Watchdog interval in seconds.
    pub swap_check_interval_secs: u64,
}

impl FromBtcLnConfig {
    pub fn sane_defaults() -> Self {
        Self {
            fees: FeeConfig::default(),
            timing: TimingConfig::default(),
            security_deposit: SecurityDepositConfig::default(),
            min_cltv: 144,
            invoice_timeout_secs: 90,
            swap_check_interval_secs: 60,
        }
    }
}

/// Configuration of the FromBtc handler (on-chain inbound).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FromBtcConfig {
    pub fees: FeeConfig,
    pub timing: TimingConfig,
    pub security_deposit: SecurityDepositConfig,
    /// Confirmations required on the incoming Bitcoin transaction.
    pub confirmations: u32,
    /// How long the init authorization stays valid, in seconds.
    pub authorization_timeout_secs: u64,
    /// Smart-chain escrow duration in seconds.
    pub swap_timeout_secs: u64,
    /// Watchdog interval in seconds.
    pub swap_check_interval_secs: u64,
}

impl FromBtcConfig {
    pub fn sane_defaults() -> Self {
        Self {
            fees: FeeConfig::default(),
            timing: TimingConfig::default(),
            security_deposit: SecurityDepositConfig::default(),
            confirmations: 2,
            authorization_timeout_secs: 600,
            swap_timeout_secs: 4 * 3600,
            swap_check_interval_secs: 60,
        }
    }
}
