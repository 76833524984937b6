//! Token price oracle and BTC<->token amount conversion.
//!
//! Prices are kept as integers in micro-satoshi per whole token, so every
//! conversion stays in checked integer arithmetic. The oracle caches fetched
//! prices for a short window and supports pre-fetching concurrent with
//! request parsing.

use crate::error::{Error, Result};
use crate::prefetch::{Prefetch, PrefetchGroup};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// How long a fetched price stays fresh.
const PRICE_CACHE_TTL: Duration = Duration::from_secs(15);

/// Scaling factor between satoshi and the oracle's µ-sat price unit.
const MICRO_SAT: u128 = 1_000_000;

/// Prefix of the fixed-price escape hatch coin ids.
const FIXED_PRICE_PREFIX: &str = "$fixed-";

/// Type alias for provider futures.
pub type PriceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A token the intermediary quotes prices for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenData {
    /// Chain identifier the token lives on.
    pub chain: String,
    /// Token contract address (or native-currency marker).
    pub address: String,
    /// Provider-facing coin identifier, e.g. a CoinGecko id or `$fixed-<f>`.
    pub coin_id: String,
    /// Number of base units per whole token, as a power of ten.
    pub decimals: u8,
}

impl TokenData {
    fn pow10(&self) -> u128 {
        10u128.pow(self.decimals as u32)
    }
}

/// Source of token prices.
///
/// Implementations return the price in micro-satoshi per whole token.
pub trait PriceProvider: Send + Sync {
    fn fetch_price(&self, coin_id: &str) -> PriceFuture<'_, u128>;
}

type PriceCache = Arc<Mutex<HashMap<String, (Instant, u128)>>>;

/// Price oracle with a token registry and a short-lived cache.
pub struct PriceOracle {
    provider: Arc<dyn PriceProvider>,
    tokens: HashMap<(String, String), TokenData>,
    chains: Vec<String>,
    cache: PriceCache,
}

impl PriceOracle {
    pub fn new(provider: Arc<dyn PriceProvider>, tokens: Vec<TokenData>) -> Self {
        let mut chains: Vec<String> = tokens.iter().map(|t| t.chain.clone()).collect();
        chains.sort();
        chains.dedup();
        let tokens = tokens
            .into_iter()
            .map(|t| ((t.chain.clone(), t.address.clone()), t))
            .collect();
        Self {
            provider,
            tokens,
            chains,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Look up a token's registry entry.
    pub fn get_token_data(&self, chain: &str, address: &str) -> Result<&TokenData> {
        if !self.chains.iter().any(|c| c == chain) {
            return Err(Error::ChainNotFound(chain.to_string()));
        }
        self.tokens
            .get(&(chain.to_string(), address.to_string()))
            .ok_or_else(|| Error::TokenNotFound(format!("{chain}:{address}")))
    }

    /// Current price for a token, in µ-sat per whole token.
    ///
    /// Fixed-price coin ids (`$fixed-<f>`, `f` in msat per whole token) skip
    /// the provider entirely; everything else goes through the ≤15 s cache.
    pub async fn get_price(&self, token: &TokenData) -> Result<u128> {
        fetch_price_cached(self.provider.clone(), self.cache.clone(), token.clone()).await
    }

    /// Pre-fetch a token's price as part of a request's pre-fetch group.
    pub fn pre_fetch_price(
        &self,
        group: &PrefetchGroup,
        chain: &str,
        address: &str,
    ) -> Prefetch<u128> {
        let token = self.get_token_data(chain, address).cloned();
        let provider = self.provider.clone();
        let cache = self.cache.clone();
        group.spawn(async move { fetch_price_cached(provider, cache, token?).await })
    }

    /// Convert a token amount (base units) to satoshi.
    ///
    /// `floor((amt * price) / 10^decimals / 10^6)`, with an optional ceil via
    /// `+ (10^6 - 1)` before the final divide.
    pub async fn get_to_btc_swap_amount(
        &self,
        amount: u128,
        token: &TokenData,
        round_up: bool,
        prefetched_price: Option<u128>,
    ) -> Result<u64> {
        let price = match prefetched_price {
            Some(p) => p,
            None => self.get_price(token).await?,
        };
        let mut scaled = amount
            .checked_mul(price)
            .ok_or(Error::Overflow("token amount times price"))?
            / token.pow10();
        if round_up {
            scaled = scaled
                .checked_add(MICRO_SAT - 1)
                .ok_or(Error::Overflow("round-up"))?;
        }
        let sat = scaled / MICRO_SAT;
        u64::try_from(sat).map_err(|_| Error::Overflow("satoshi amount"))
    }

    /// Convert a satoshi amount to token base units.
    ///
    /// `floor(sat * 10^decimals * 10^6 / price)`, with an optional ceil via
    /// `+ (price - 1)` before the divide.
    pub async fn get_from_btc_swap_amount(
        &self,
        sat: u64,
        token: &TokenData,
        round_up: bool,
        prefetched_price: Option<u128>,
    ) -> Result<u128> {
        let price = match prefetched_price {
            Some(p) => p,
            None => self.get_price(token).await?,
        };
        if price == 0 {
            return Err(Error::Price("Zero price".into()));
        }
        let mut scaled = (sat as u128)
            .checked_mul(token.pow10())
            .and_then(|v| v.checked_mul(MICRO_SAT))
            .ok_or(Error::Overflow("satoshi amount times decimals"))?;
        if round_up {
            scaled = scaled
                .checked_add(price - 1)
                .ok_or(Error::Overflow("round-up"))?;
        }
        Ok(scaled / price)
    }
}

/// Resolve a token's price, consulting the fixed-price escape hatch first
/// and the shared cache second.
async fn fetch_price_cached(
    provider: Arc<dyn PriceProvider>,
    cache: PriceCache,
    token: TokenData,
) -> Result<u128> {
    if let Some(fixed) = token.coin_id.strip_prefix(FIXED_PRICE_PREFIX) {
        let f: Decimal = fixed
            .parse()
            .map_err(|_| Error::Price(format!("Bad fixed price: {}", token.coin_id)))?;
        let scaled = (f * Decimal::from(1000)).floor();
        return scaled
            .to_u128()
            .ok_or(Error::Price("Fixed price out of range".into()));
    }

    {
        let cache = cache.lock().await;
        if let Some((at, price)) = cache.get(&token.coin_id) {
            if at.elapsed() <= PRICE_CACHE_TTL {
                return Ok(*price);
            }
        }
    }

    let price = provider.fetch_price(&token.coin_id).await?;
    cache
        .lock()
        .await
        .insert(token.coin_id.clone(), (Instant::now(), price));
    Ok(price)
}

/// CoinGecko-backed price provider.
///
/// Quotes each coin in BTC and scales the decimal quote to the oracle's
/// integer µ-sat unit.
pub struct CoinGeckoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for CoinGeckoProvider {
    fn default() -> Self {
        Self::new("https://api.coingecko.com")
    }
}

impl PriceProvider for CoinGeckoProvider {
    fn fetch_price(&self, coin_id: &str) -> PriceFuture<'_, u128> {
        let coin_id = coin_id.to_string();
        Box::pin(async move {
            let url = format!(
                "{}/api/v3/simple/price?ids={}&vs_currencies=btc&precision=full",
                self.base_url, coin_id
            );
            let response: HashMap<String, HashMap<String, Decimal>> = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| Error::Network(format!("Price fetch failed: {e}")))?
                .json()
                .await
                .map_err(|e| Error::Network(format!("Bad price response: {e}")))?;

            let btc_per_token = response
                .get(&coin_id)
                .and_then(|v| v.get("btc"))
                .copied()
                .ok_or_else(|| Error::Price(format!("No price for {coin_id}")))?;

            // BTC/token -> µ-sat/token: 1 BTC = 1e8 sat = 1e14 µ-sat.
            let scaled =
                (btc_per_token * Decimal::from(100_000_000u64) * Decimal::from(MICRO_SAT as u64))
                    .floor();
            scaled
                .to_u128()
                .ok_or(Error::Price(format!("Price out of range for {coin_id}")))
        })
    }
}
