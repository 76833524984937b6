//! Fee, bound, security-deposit and claimer-bounty arithmetic.
//!
//! All math is checked integer arithmetic in satoshi, parts-per-million and
//! token base units; the only rounding is explicit floor/ceil.

use crate::error::{Error, Result};

const PPM: u128 = 1_000_000;
const SECONDS_PER_YEAR: u128 = 365 * 24 * 3600;

/// Swap fee in satoshi for an exact-input request:
/// `base_fee + amount * fee_ppm / 10^6`.
pub fn swap_fee_sat(amount_sat: u64, base_fee_sat: u64, fee_ppm: u64) -> Result<u64> {
    let proportional = (amount_sat as u128)
        .checked_mul(fee_ppm as u128)
        .ok_or(Error::Overflow("proportional fee"))?
        / PPM;
    let total = (base_fee_sat as u128)
        .checked_add(proportional)
        .ok_or(Error::Overflow("swap fee"))?;
    u64::try_from(total).map_err(|_| Error::Overflow("swap fee"))
}

/// Back-compute the BTC input for an exact-output request, so that input
/// minus fees converts to the desired token amount:
/// `amount = (to_btc(total) + base_fee) * 10^6 / (10^6 - fee_ppm)`.
pub fn amount_for_exact_out(net_sat: u64, base_fee_sat: u64, fee_ppm: u64) -> Result<u64> {
    if fee_ppm as u128 >= PPM {
        return Err(Error::Overflow("fee ppm at or above unity"));
    }
    let gross = (net_sat as u128)
        .checked_add(base_fee_sat as u128)
        .and_then(|v| v.checked_mul(PPM))
        .ok_or(Error::Overflow("exact-out amount"))?
        / (PPM - fee_ppm as u128);
    u64::try_from(gross).map_err(|_| Error::Overflow("exact-out amount"))
}

/// Outcome of the 5% slack bounds check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsCheck {
    Ok,
    TooLow,
    TooHigh,
}

/// Check an amount against `[0.95*min, 1.05*max]`.
///
/// The slack absorbs oracle jitter between the client's quote and ours; the
/// unslackened `[min, max]` is what gets reported back in the error hint.
pub fn check_bounds(amount_sat: u64, min_sat: u64, max_sat: u64) -> BoundsCheck {
    let amount = amount_sat as u128;
    if amount * 100 < (min_sat as u128) * 95 {
        BoundsCheck::TooLow
    } else if amount * 100 > (max_sat as u128) * 105 {
        BoundsCheck::TooHigh
    } else {
        BoundsCheck::Ok
    }
}

/// Security deposit in native currency.
///
/// `base_deposit` is the refund-transaction fee estimate (the caller doubles
/// it when the adapter lacks a raw estimate); the variable part compensates
/// the counterparty for capital locked until expiry:
/// `value * apy_ppm * timeout / 10^6 / seconds_per_year`.
pub fn security_deposit(
    base_deposit: u128,
    swap_value_in_native: u128,
    apy_ppm: u64,
    expiry_timeout_secs: u64,
) -> Result<u128> {
    let variable = swap_value_in_native
        .checked_mul(apy_ppm as u128)
        .and_then(|v| v.checked_mul(expiry_timeout_secs as u128))
        .ok_or(Error::Overflow("variable security deposit"))?
        / PPM
        / SECONDS_PER_YEAR;
    base_deposit
        .checked_add(variable)
        .ok_or(Error::Overflow("security deposit"))
}

/// Claimer bounty in native currency:
/// `add_fee + (add_block + (expiry - start) / blocktime * safety) * fee_per_block`.
pub fn claimer_bounty(
    add_fee: u128,
    add_block: u64,
    fee_per_block: u128,
    expiry: u64,
    start_ts: u64,
    bitcoin_blocktime_secs: u64,
    safety_factor: u64,
) -> Result<u128> {
    if bitcoin_blocktime_secs == 0 {
        return Err(Error::Overflow("zero blocktime"));
    }
    let lifetime_blocks = (expiry.saturating_sub(start_ts) as u128 / bitcoin_blocktime_secs as u128)
        .checked_mul(safety_factor as u128)
        .ok_or(Error::Overflow("claimer bounty blocks"))?;
    let blocks = (add_block as u128)
        .checked_add(lifetime_blocks)
        .ok_or(Error::Overflow("claimer bounty blocks"))?;
    blocks
        .checked_mul(fee_per_block)
        .and_then(|v| v.checked_add(add_fee))
        .ok_or(Error::Overflow("claimer bounty"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_fee_combines_flat_and_proportional() {
        // 10 sat base + 3000 ppm of 1_000_000 sat = 10 + 3000
        assert_eq!(swap_fee_sat(1_000_000, 10, 3000).unwrap(), 3010);
        assert_eq!(swap_fee_sat(0, 10, 3000).unwrap(), 10);
    }

    #[test]
    fn exact_out_inverts_fee_deduction() {
        let (base, ppm) = (10u64, 3000u64);
        let net = 250_000u64;
        let gross = amount_for_exact_out(net, base, ppm).unwrap();
        let fee = swap_fee_sat(gross, base, ppm).unwrap();
        // input minus fees recovers the requested net within rounding
        assert!(gross - fee >= net.saturating_sub(1));
        assert!(gross - fee <= net + 1);
    }

    #[test]
    fn bounds_band_allows_five_percent_slack() {
        let (min, max) = (10_000u64, 1_000_000u64);
        assert_eq!(check_bounds(9_500, min, max), BoundsCheck::Ok);
        assert_eq!(check_bounds(9_499, min, max), BoundsCheck::TooLow);
        assert_eq!(check_bounds(1_050_000, min, max), BoundsCheck::Ok);
        assert_eq!(check_bounds(1_050_001, min, max), BoundsCheck::TooHigh);
        assert_eq!(check_bounds(500_000, min, max), BoundsCheck::Ok);
    }

    #[test]
    fn security_deposit_matches_reference_value() {
        // 10% APY, 7200 s lock, 1e18 native value, 1e15 base deposit
        let total = security_deposit(1_000_000_000_000_000, 10u128.pow(18), 100_000, 7200).unwrap();
        let variable = total - 1_000_000_000_000_000;
        assert_eq!(variable, 22_831_050_228_310);
        assert_eq!(total, 1_022_831_050_228_310);
    }

    #[test]
    fn claimer_bounty_scales_with_lifetime() {
        // 2h lifetime at 600 s blocks, safety 2 -> 24 blocks + 10 extra
        let bounty = claimer_bounty(1_000, 10, 50, 10_000 + 7200, 10_000, 600, 2).unwrap();
        assert_eq!(bounty, 1_000 + (10 + 24) * 50);
    }

    #[test]
    fn overflow_is_an_error_not_a_wrap() {
        assert!(security_deposit(0, u128::MAX, 1_000_000, u64::MAX).is_err());
        assert!(swap_fee_sat(u64::MAX, u64::MAX, 1).is_ok());
    }
}
