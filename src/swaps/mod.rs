//! Swap lifecycle engine: shared handler machinery.
//!
//! Each swap direction is its own state machine behind the common
//! [`SwapHandler`] trait. This module owns what they share: the watchdog
//! driver, per-chain serial event dispatch, and the record plumbing
//! (metadata marks, transaction ids).

pub mod fees;
pub mod from_btc;
pub mod from_btc_ln;
pub mod info;
pub mod to_btc;
pub mod to_btc_ln;

use crate::chain::ChainEvent;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Type alias for handler futures.
pub type HandlerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Request echo plus timing marks carried on every swap record.
///
/// Free-form observability data; never consulted by the lifecycle logic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// The request body that minted this swap.
    pub request: serde_json::Value,
    /// Millisecond timestamps of named processing steps.
    pub times: BTreeMap<String, u64>,
}

impl Metadata {
    pub fn new(request: serde_json::Value) -> Self {
        let mut metadata = Self {
            request,
            times: BTreeMap::new(),
        };
        metadata.mark("request.received");
        metadata
    }

    /// Record the current time under `label`.
    pub fn mark(&mut self, label: &str) {
        self.times
            .insert(label.to_string(), crate::types::now_millis());
    }
}

/// Transaction ids of the swap's smart-chain legs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxIds {
    pub init: Option<String>,
    pub claim: Option<String>,
    pub refund: Option<String>,
}

/// Static per-handler info served to clients for discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapHandlerInfo {
    pub swap_type: String,
    pub min: u64,
    pub max: u64,
    pub base_fee: u64,
    pub fee_ppm: u64,
    /// Allowed token addresses per chain identifier.
    pub chain_tokens: HashMap<String, Vec<String>>,
    /// Handler-specific extras (CLTV deltas, confirmation counts, ...).
    pub data: serde_json::Value,
}

/// One swap direction's state machine.
pub trait SwapHandler: Send + Sync {
    /// Stable handler name used in the info envelope.
    fn name(&self) -> &'static str;

    /// Static discovery info.
    fn get_info(&self) -> SwapHandlerInfo;

    /// Advance swaps affected by a chain event.
    ///
    /// Must tolerate events for unknown or already-removed swaps (no-op) and
    /// duplicate delivery after restarts.
    fn process_event<'a>(&'a self, chain_id: &'a str, event: &'a ChainEvent)
    -> HandlerFuture<'a, ()>;

    /// One watchdog pass over all stored swaps.
    fn check_past_swaps(&self) -> HandlerFuture<'_, ()>;
}

/// Run a handler's watchdog until shutdown.
///
/// A single loop per handler; overlapping passes are impossible because the
/// loop awaits each pass before sleeping again.
pub fn start_watchdog(
    handler: Arc<dyn SwapHandler>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = handler.check_past_swaps().await {
                        log::error!("{}: watchdog pass failed: {err}", handler.name());
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("{}: watchdog stopped", handler.name());
                        return;
                    }
                }
            }
        }
    })
}

/// Convert the satoshi bounds into the token denomination for error hints.
///
/// Best effort: a failing conversion yields zeroed hints rather than masking
/// the bounds error itself.
pub(crate) async fn token_bounds_hint(
    oracle: &crate::price::PriceOracle,
    token: &crate::price::TokenData,
    min_sat: u64,
    max_sat: u64,
    price: Option<u128>,
) -> (u128, u128) {
    let price = match price {
        Some(p) => Some(p),
        None => oracle.get_price(token).await.ok(),
    };
    let Some(price) = price else {
        return (0, 0);
    };
    let min = oracle
        .get_from_btc_swap_amount(min_sat, token, false, Some(price))
        .await
        .unwrap_or(0);
    let max = oracle
        .get_from_btc_swap_amount(max_sat, token, false, Some(price))
        .await
        .unwrap_or(0);
    (min, max)
}

/// Allowed token addresses per chain, for handler info payloads.
pub(crate) fn registry_chain_tokens(
    registry: &crate::chain::ChainRegistry,
) -> HashMap<String, Vec<String>> {
    registry
        .chain_ids()
        .filter_map(|id| {
            registry.get(id).ok().map(|c| {
                let mut tokens: Vec<String> = c.allowed_tokens.iter().cloned().collect();
                tokens.sort();
                (id.clone(), tokens)
            })
        })
        .collect()
}

/// Fan events of registered chains out to every handler.
///
/// Events are processed strictly serially per chain: the next event is not
/// taken from the channel until every handler finished the previous one.
/// Across chains, dispatch runs in parallel.
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn SwapHandler>>,
}

impl EventDispatcher {
    pub fn new(handlers: Vec<Arc<dyn SwapHandler>>) -> Self {
        Self { handlers }
    }

    /// Spawn the serial dispatch loop for one chain's event feed.
    pub fn spawn_chain(
        &self,
        chain_id: impl Into<String>,
        mut events: mpsc::Receiver<ChainEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let handlers = self.handlers.clone();
        let chain_id = chain_id.into();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else {
                            log::warn!("{chain_id}: event feed closed");
                            return;
                        };
                        for handler in &handlers {
                            if let Err(err) = handler.process_event(&chain_id, &event).await {
                                log::error!(
                                    "{chain_id}/{}: event {} failed: {err}",
                                    handler.name(),
                                    hex::encode(event.payment_hash()),
                                );
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            log::info!("{chain_id}: event dispatch stopped");
                            return;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingHandler {
        passes: AtomicU32,
        seen: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                passes: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl SwapHandler for RecordingHandler {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn get_info(&self) -> SwapHandlerInfo {
            SwapHandlerInfo {
                swap_type: "recording".into(),
                min: 0,
                max: 0,
                base_fee: 0,
                fee_ppm: 0,
                chain_tokens: HashMap::new(),
                data: serde_json::Value::Null,
            }
        }

        fn process_event<'a>(
            &'a self,
            chain_id: &'a str,
            event: &'a ChainEvent,
        ) -> HandlerFuture<'a, ()> {
            Box::pin(async move {
                self.seen
                    .lock()
                    .unwrap()
                    .push(format!("{chain_id}:{:x}", event.sequence()));
                Ok(())
            })
        }

        fn check_past_swaps(&self) -> HandlerFuture<'_, ()> {
            Box::pin(async move {
                self.passes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn refund_event(sequence: u64) -> ChainEvent {
        ChainEvent::Refund(crate::chain::RefundEvent {
            payment_hash: [0u8; 32],
            sequence,
            tx_id: "0xtx".into(),
        })
    }

    #[tokio::test]
    async fn dispatcher_preserves_chain_order() {
        let handler = RecordingHandler::new();
        let dispatcher = EventDispatcher::new(vec![handler.clone() as Arc<dyn SwapHandler>]);
        let (tx, rx) = mpsc::channel(16);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let task = dispatcher.spawn_chain("EVM", rx, stop_rx);

        for sequence in 0..5u64 {
            tx.send(refund_event(sequence)).await.unwrap();
        }
        drop(tx);
        task.await.unwrap();

        let seen = handler.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["EVM:0", "EVM:1", "EVM:2", "EVM:3", "EVM:4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_fires_until_shutdown() {
        let handler = RecordingHandler::new();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = start_watchdog(handler.clone(), Duration::from_secs(60), stop_rx);

        tokio::time::sleep(Duration::from_secs(130)).await;
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        // first tick fires immediately, then two more within 130 s
        assert!(handler.passes.load(Ordering::SeqCst) >= 3);
    }
}
