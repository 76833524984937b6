//! Token -> Lightning swaps.
//!
//! The user locks tokens in a smart-chain HTLC naming us claimer; we pay
//! their BOLT-11 invoice and claim the escrow with the payment preimage. A
//! failed payment leaves the escrow refundable after expiry.

use crate::api::{
    PayInvoiceRequest, PayInvoiceResponse, RefundAuthorizationRequest,
    RefundAuthorizationResponse,
};
use crate::chain::{ChainEvent, ChainRegistry, CommitStatus, SwapData, SwapKind};
use crate::config::ToBtcLnConfig;
use crate::error::{Error, Result, ServiceError, codes};
use crate::lightning::{LightningWallet, PayRequest, PaymentStatus};
use crate::lock::SwapLockMap;
use crate::prefetch::PrefetchGroup;
use crate::price::PriceOracle;
use crate::storage::{StoredSwap, SwapRecordStorage};
use crate::swaps::{HandlerFuture, Metadata, SwapHandler, SwapHandlerInfo, TxIds, fees};
use crate::types::{SwapIdentity, now_seconds};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Lifecycle of a Token -> Lightning swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum ToBtcLnState {
    /// Escrow refunded to the offerer.
    Refunded = -3,
    /// Quote abandoned before commit.
    Canceled = -2,
    /// Payment failed or was never dispatchable; escrow awaits refund.
    NonPayable = -1,
    /// Quote signed, awaiting the on-chain commit.
    Saved = 0,
    /// Escrow committed; payment owed.
    Commited = 1,
    /// Lightning payment confirmed; preimage held.
    Paid = 2,
    /// Escrow claimed with the preimage.
    Claimed = 3,
}

impl From<ToBtcLnState> for i8 {
    fn from(state: ToBtcLnState) -> i8 {
        state as i8
    }
}

impl TryFrom<i8> for ToBtcLnState {
    type Error = String;

    fn try_from(value: i8) -> std::result::Result<Self, Self::Error> {
        match value {
            -3 => Ok(Self::Refunded),
            -2 => Ok(Self::Canceled),
            -1 => Ok(Self::NonPayable),
            0 => Ok(Self::Saved),
            1 => Ok(Self::Commited),
            2 => Ok(Self::Paid),
            3 => Ok(Self::Claimed),
            other => Err(format!("unknown ToBtcLn state {other}")),
        }
    }
}

fn can_transition(from: ToBtcLnState, to: ToBtcLnState) -> bool {
    use ToBtcLnState::*;
    matches!(
        (from, to),
        (Saved, Commited)
            | (Saved, Canceled)
            | (Commited, Paid)
            | (Commited, NonPayable)
            | (Commited, Claimed)
            | (Commited, Refunded)
            | (Paid, Claimed)
            | (NonPayable, Refunded)
    )
}

/// Persisted record of one Token -> Lightning swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToBtcLnSwap {
    pub chain: String,
    pub state: ToBtcLnState,
    pub data: SwapData,
    /// The BOLT-11 invoice we committed to pay.
    pub pr: String,
    /// Unix expiry of the init authorization.
    pub signature_expiry: u64,
    pub swap_fee_sat: u64,
    #[serde(with = "crate::types::dec_string")]
    pub swap_fee_in_token: u128,
    /// Upper-bound routing fee quoted to the client.
    pub quoted_network_fee_sat: u64,
    #[serde(with = "crate::types::dec_string")]
    pub quoted_network_fee_in_token: u128,
    /// Routing fee actually paid; accounting only.
    pub real_network_fee_sat: Option<u64>,
    #[serde(default, with = "crate::types::dec_string_opt")]
    pub real_network_fee_in_token: Option<u128>,
    #[serde(default, with = "crate::types::hex_bytes32_opt")]
    pub secret: Option<[u8; 32]>,
    pub metadata: Metadata,
    pub tx_ids: TxIds,
}

impl StoredSwap for ToBtcLnSwap {
    fn identity(&self) -> SwapIdentity {
        SwapIdentity::new(
            self.chain.clone(),
            self.data.payment_hash,
            self.data.sequence,
        )
    }
}

/// Token -> Lightning swap handler.
pub struct ToBtcLn<S: SwapRecordStorage<ToBtcLnSwap>> {
    registry: Arc<ChainRegistry>,
    storage: Arc<S>,
    oracle: Arc<PriceOracle>,
    ln: Arc<dyn LightningWallet>,
    config: ToBtcLnConfig,
    locks: SwapLockMap,
    /// Payment hashes with an active past-payment subscription.
    subscriptions: Mutex<HashSet<[u8; 32]>>,
    this: Weak<Self>,
}

impl<S: SwapRecordStorage<ToBtcLnSwap> + 'static> ToBtcLn<S> {
    pub fn new(
        registry: Arc<ChainRegistry>,
        storage: Arc<S>,
        oracle: Arc<PriceOracle>,
        ln: Arc<dyn LightningWallet>,
        config: ToBtcLnConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry,
            storage,
            oracle,
            ln,
            config,
            locks: SwapLockMap::new(),
            subscriptions: Mutex::new(HashSet::new()),
            this: this.clone(),
        })
    }

    /// Minimum seconds of escrow lifetime needed to safely send the payment.
    fn min_ts_send_cltv(&self) -> u64 {
        self.config.timing.grace_period_secs
            + self.config.timing.bitcoin_blocktime_secs
                * self.config.min_send_cltv as u64
                * self.config.timing.safety_factor
    }

    fn transition(&self, swap: &mut ToBtcLnSwap, to: ToBtcLnState) -> Result<()> {
        let from = swap.state;
        if !can_transition(from, to) {
            return Err(Error::InvalidTransition {
                identity: swap.identity().to_string(),
                from: from.into(),
                to: to.into(),
            });
        }
        log::info!("{}: {} -> {}", swap.identity(), i8::from(from), i8::from(to));
        swap.state = to;
        swap.metadata.mark(&format!("state.{}", i8::from(to)));
        Ok(())
    }

    /// `POST /payInvoice`: quote and sign a Token -> Lightning swap.
    pub async fn pay_invoice(
        &self,
        request: PayInvoiceRequest,
    ) -> std::result::Result<PayInvoiceResponse, ServiceError> {
        let mut metadata = Metadata::new(serde_json::to_value(&request).unwrap_or_default());

        let (chain_id, chain) = self
            .registry
            .resolve(request.chain.as_deref())
            .map_err(|_| ServiceError::invalid_chain())?;
        if !self.registry.is_token_allowed(&chain_id, &request.token) {
            return Err(ServiceError::invalid_request("Invalid token"));
        }
        let contract = chain.contract.clone();
        if !contract.is_valid_address(&request.offerer) {
            return Err(ServiceError::invalid_request("Invalid offerer address"));
        }

        let prefetch = PrefetchGroup::new();
        let price = self
            .oracle
            .pre_fetch_price(&prefetch, &chain_id, &request.token);
        let signal = prefetch.signal();

        let invoice = self
            .ln
            .parse_invoice(&request.pr)
            .await
            .map_err(|_| ServiceError::invalid_request("Invalid payment request"))?;
        let now = now_seconds();
        if invoice.expires_at <= now {
            return Err(ServiceError::new(codes::EXPIRED, "Invoice already expired"));
        }
        let amount_sat = invoice
            .amount_msat
            .ok_or_else(|| ServiceError::invalid_request("Amountless invoice"))?
            / 1000;

        let token = self
            .oracle
            .get_token_data(&chain_id, &request.token)
            .map_err(ServiceError::from)?
            .clone();
        metadata.mark("amounts.checked");

        let fees_cfg = &self.config.fees;
        match fees::check_bounds(amount_sat, fees_cfg.min_sat, fees_cfg.max_sat) {
            fees::BoundsCheck::Ok => {}
            outcome => {
                let price = price.get().await.ok();
                let (min, max) = super::token_bounds_hint(
                    &self.oracle,
                    &token,
                    fees_cfg.min_sat,
                    fees_cfg.max_sat,
                    price,
                )
                .await;
                return Err(match outcome {
                    fees::BoundsCheck::TooLow => ServiceError::amount_too_low(min, max),
                    _ => ServiceError::amount_too_high(min, max),
                });
            }
        }

        // Escrow must outlive the payment's worst-case CLTV budget.
        if request.expiry_timestamp.saturating_sub(now) < self.min_ts_send_cltv() {
            return Err(ServiceError::not_enough_time());
        }

        // One payment per payment hash, ever.
        let identity = SwapIdentity::new(chain_id.clone(), invoice.payment_hash, 0);
        if self
            .storage
            .get(&identity)
            .await
            .map_err(ServiceError::from)?
            .is_some()
        {
            return Err(ServiceError::new(
                codes::ALREADY_COMMITTED,
                "Swap already exists for this payment hash",
            ));
        }
        match self
            .ln
            .get_payment(&invoice.payment_hash)
            .await
            .map_err(ServiceError::from)?
        {
            PaymentStatus::NotFound => {}
            PaymentStatus::Pending => {
                return Err(ServiceError::new(
                    codes::PAYMENT_IN_FLIGHT,
                    "Payment already in flight",
                ));
            }
            _ => {
                return Err(ServiceError::new(
                    codes::ALREADY_PAID,
                    "Payment hash already used",
                ));
            }
        }

        // Outbound liquidity on the Lightning side.
        let balance = self
            .ln
            .get_channel_balance()
            .await
            .map_err(ServiceError::from)?;
        if balance.local_msat / 1000 < amount_sat + request.max_fee {
            return Err(ServiceError::not_enough_liquidity());
        }
        metadata.mark("balance.checked");

        let current_block = self
            .ln
            .get_block_height()
            .await
            .map_err(ServiceError::from)?;
        let probe = self
            .ln
            .probe_route(
                &request.pr,
                request.max_fee * 1000,
                current_block + self.config.max_usable_cltv,
            )
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(ServiceError::not_enough_time)?;
        metadata.mark("route.probed");

        signal.check().map_err(ServiceError::from)?;
        let price = price.get().await.map_err(ServiceError::from)?;
        metadata.mark("price.calculated");

        let swap_fee_sat = fees::swap_fee_sat(amount_sat, fees_cfg.base_fee_sat, fees_cfg.fee_ppm)
            .map_err(ServiceError::from)?;
        let amount_in_token = self
            .oracle
            .get_from_btc_swap_amount(amount_sat, &token, true, Some(price))
            .await
            .map_err(ServiceError::from)?;
        let max_fee_in_token = self
            .oracle
            .get_from_btc_swap_amount(request.max_fee, &token, true, Some(price))
            .await
            .map_err(ServiceError::from)?;
        let swap_fee_in_token = self
            .oracle
            .get_from_btc_swap_amount(swap_fee_sat, &token, true, Some(price))
            .await
            .map_err(ServiceError::from)?;
        let total = amount_in_token
            .checked_add(max_fee_in_token)
            .and_then(|v| v.checked_add(swap_fee_in_token))
            .ok_or_else(|| ServiceError::from(Error::Overflow("total in token")))?;

        let data = SwapData {
            payment_hash: invoice.payment_hash,
            sequence: 0,
            offerer: request.offerer.clone(),
            claimer: contract.get_address(),
            token: request.token.clone(),
            amount: total,
            expiry: request.expiry_timestamp,
            security_deposit: 0,
            claimer_bounty: 0,
            pay_in: true,
            pay_out: false,
            kind: SwapKind::Htlc,
        };

        let signature = contract
            .get_init_signature(&data, self.config.authorization_timeout_secs, None)
            .await
            .map_err(ServiceError::from)?;
        metadata.mark("swap.signed");

        let mut swap = ToBtcLnSwap {
            chain: chain_id,
            state: ToBtcLnState::Saved,
            data: data.clone(),
            pr: request.pr.clone(),
            signature_expiry: signature.timeout,
            swap_fee_sat,
            swap_fee_in_token,
            quoted_network_fee_sat: request.max_fee,
            quoted_network_fee_in_token: max_fee_in_token,
            real_network_fee_sat: None,
            real_network_fee_in_token: None,
            secret: None,
            metadata,
            tx_ids: TxIds::default(),
        };
        swap.metadata.mark("swap.created");
        self.storage.put(&swap).await.map_err(ServiceError::from)?;

        Ok(PayInvoiceResponse {
            max_fee: max_fee_in_token,
            swap_fee: swap_fee_in_token,
            total,
            confidence: probe.confidence,
            address: contract.get_address(),
            data,
            prefix: signature.prefix,
            timeout: signature.timeout,
            signature: signature.signature,
        })
    }

    /// `POST /getRefundAuthorization`: sign a refund for a failed payment.
    pub async fn get_refund_authorization(
        &self,
        request: RefundAuthorizationRequest,
    ) -> std::result::Result<RefundAuthorizationResponse, ServiceError> {
        let payment_hash = parse_payment_hash(&request.payment_hash)?;
        let (chain_id, chain) = self
            .registry
            .resolve(request.chain.as_deref())
            .map_err(|_| ServiceError::invalid_chain())?;
        let contract = chain.contract.clone();

        let identity = SwapIdentity::new(chain_id, payment_hash, request.sequence.unwrap_or(0));
        let swap = self
            .storage
            .get(&identity)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::new(codes::NOT_FOUND, "Swap not found"))?;

        match self
            .ln
            .get_payment(&payment_hash)
            .await
            .map_err(ServiceError::from)?
        {
            PaymentStatus::Confirmed { preimage, .. } => {
                return Err(
                    ServiceError::new(codes::ALREADY_PAID, "Payment already paid")
                        .with_data(serde_json::json!({ "secret": hex::encode(preimage) })),
                );
            }
            PaymentStatus::Pending => {
                return Err(ServiceError::new(
                    codes::PAYMENT_IN_FLIGHT,
                    "Payment is in flight",
                ));
            }
            PaymentStatus::NotFound if swap.state != ToBtcLnState::NonPayable => {
                return Err(ServiceError::new(
                    codes::NOT_COMMITTED,
                    "Payment not yet failed",
                ));
            }
            PaymentStatus::NotFound | PaymentStatus::Failed { .. } => {}
        }

        let status = contract
            .get_commit_status(&swap.data)
            .await
            .map_err(ServiceError::from)?;
        if status != CommitStatus::Committed {
            return Err(ServiceError::new(
                codes::NOT_COMMITTED,
                "Swap not committed on chain",
            ));
        }

        let signature = contract
            .get_refund_signature(&swap.data)
            .await
            .map_err(ServiceError::from)?;
        Ok(RefundAuthorizationResponse {
            address: contract.get_address(),
            prefix: signature.prefix,
            timeout: signature.timeout,
            signature: signature.signature,
        })
    }

    /// Drive a committed swap: resolve the payment, or dispatch it.
    async fn process_initialized(&self, mut swap: ToBtcLnSwap) -> Result<()> {
        let identity = swap.identity();
        let Some(_lock) = self.locks.lock(&identity, Duration::from_secs(60)) else {
            log::debug!("{identity}: contested, skipping");
            return Ok(());
        };

        match self.ln.get_payment(&swap.data.payment_hash).await? {
            PaymentStatus::Confirmed { preimage, fee_msat } => {
                self.finish_paid(&mut swap, preimage, fee_msat).await?;
            }
            PaymentStatus::Pending => {
                self.subscribe_to_payment(identity);
            }
            PaymentStatus::Failed { reason } => {
                self.handle_payment_failed(&mut swap, &reason).await?;
            }
            PaymentStatus::NotFound => {
                if swap.state != ToBtcLnState::Commited {
                    return Ok(());
                }
                let now = now_seconds();
                if swap.data.expiry.saturating_sub(now) < self.min_ts_send_cltv() {
                    log::warn!("{identity}: not enough time left to pay, marking non-payable");
                    self.transition(&mut swap, ToBtcLnState::NonPayable)?;
                    self.storage.put(&swap).await?;
                    return Ok(());
                }
                let current_block = self.ln.get_block_height().await?;
                self.ln
                    .pay(PayRequest {
                        bolt11: swap.pr.clone(),
                        max_fee_msat: swap.quoted_network_fee_sat * 1000,
                        max_timeout_height: current_block + self.config.max_usable_cltv,
                    })
                    .await?;
                swap.metadata.mark("payment.dispatched");
                self.storage.put(&swap).await?;
                self.subscribe_to_payment(identity);
            }
        }
        Ok(())
    }

    /// A finally-failed payment leaves the swap committed until the escrow
    /// expires; only then does it turn non-payable and refund-eligible. The
    /// watchdog re-runs this on every pass, so the transition lands on the
    /// first pass after expiry.
    async fn handle_payment_failed(&self, swap: &mut ToBtcLnSwap, reason: &str) -> Result<()> {
        log::warn!("{}: payment failed: {reason}", swap.identity());
        if swap.state == ToBtcLnState::Commited && swap.data.expiry <= now_seconds() {
            self.transition(swap, ToBtcLnState::NonPayable)?;
            self.storage.put(swap).await?;
        }
        Ok(())
    }

    /// Record the confirmed payment and claim the escrow with its preimage.
    async fn finish_paid(
        &self,
        swap: &mut ToBtcLnSwap,
        preimage: [u8; 32],
        fee_msat: u64,
    ) -> Result<()> {
        if swap.state == ToBtcLnState::Commited {
            let fee_sat = fee_msat.div_ceil(1000);
            swap.secret = Some(preimage);
            swap.real_network_fee_sat = Some(fee_sat);
            if let Ok(token) = self.oracle.get_token_data(&swap.chain, &swap.data.token) {
                let token = token.clone();
                swap.real_network_fee_in_token = self
                    .oracle
                    .get_from_btc_swap_amount(fee_sat, &token, true, None)
                    .await
                    .ok();
            }
            log::info!(
                "{}: paid, network fee {} sat (quoted {} sat)",
                swap.identity(),
                fee_sat,
                swap.quoted_network_fee_sat
            );
            self.transition(swap, ToBtcLnState::Paid)?;
            self.storage.put(swap).await?;
        }

        let contract = self.registry.contract(&swap.chain)?;
        match contract.claim_with_secret(&swap.data, &preimage).await {
            Ok(tx_id) => {
                swap.tx_ids.claim = Some(tx_id);
                self.transition(swap, ToBtcLnState::Claimed)?;
                self.storage.put(swap).await?;
                Ok(())
            }
            Err(err) => {
                // We already paid on Lightning; losing the claim loses funds.
                log::error!(
                    "{}: CLAIM FAILED AFTER PAYMENT, operator attention required: {err}",
                    swap.identity()
                );
                Err(err)
            }
        }
    }

    /// Watch an in-flight payment to completion; at most one watcher per hash.
    fn subscribe_to_payment(&self, identity: SwapIdentity) {
        {
            let mut subs = self.subscriptions.lock().unwrap();
            if !subs.insert(identity.payment_hash) {
                return;
            }
        }
        let Some(handler) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let status = handler.ln.wait_payment(&identity.payment_hash).await;
            {
                let mut subs = handler.subscriptions.lock().unwrap();
                subs.remove(&identity.payment_hash);
            }
            let status = match status {
                Ok(status) => status,
                Err(err) => {
                    log::error!("{identity}: payment wait failed: {err}");
                    return;
                }
            };
            if let Err(err) = handler.handle_payment_result(&identity, status).await {
                log::error!("{identity}: payment result handling failed: {err}");
            }
        });
    }

    async fn handle_payment_result(
        &self,
        identity: &SwapIdentity,
        status: PaymentStatus,
    ) -> Result<()> {
        let Some(_lock) = self.locks.lock(identity, Duration::from_secs(60)) else {
            // Watchdog will reconcile via get_payment.
            return Ok(());
        };
        let Some(mut swap) = self.storage.get(identity).await? else {
            return Ok(());
        };

        match status {
            PaymentStatus::Confirmed { preimage, fee_msat } => {
                self.finish_paid(&mut swap, preimage, fee_msat).await
            }
            PaymentStatus::Failed { reason } => {
                self.handle_payment_failed(&mut swap, &reason).await
            }
            PaymentStatus::Pending | PaymentStatus::NotFound => Ok(()),
        }
    }

    async fn handle_event(&self, chain_id: &str, event: &ChainEvent) -> Result<()> {
        let identity = SwapIdentity::new(chain_id, *event.payment_hash(), event.sequence());

        match event {
            ChainEvent::Initialize(init) => {
                // Only HTLC escrows naming us claimer without payout concern us.
                let contract = self.registry.contract(chain_id)?;
                if !init.data.is_htlc()
                    || init.data.pay_out
                    || init.data.claimer != contract.get_address()
                {
                    return Ok(());
                }
                let Some(mut swap) = self.storage.get(&identity).await? else {
                    return Ok(());
                };
                if swap.state != ToBtcLnState::Saved {
                    return Ok(());
                }
                swap.tx_ids.init = Some(init.tx_id.clone());
                self.transition(&mut swap, ToBtcLnState::Commited)?;
                self.storage.put(&swap).await?;
                self.process_initialized(swap).await
            }
            ChainEvent::Claim(_) => {
                if self.storage.get(&identity).await?.is_none() {
                    return Ok(());
                }
                // The on-chain claimer revealed the secret matching the invoice.
                log::info!("{identity}: claim observed, swap settled");
                self.storage.remove(&identity).await
            }
            ChainEvent::Refund(_) => {
                let Some(swap) = self.storage.get(&identity).await? else {
                    return Ok(());
                };
                log::info!(
                    "{identity}: refund observed in state {}, removing",
                    i8::from(swap.state)
                );
                self.storage.remove(&identity).await
            }
        }
    }

    async fn watchdog_pass(&self) -> Result<()> {
        let swaps = self.storage.load_all().await?;
        let now = now_seconds();

        for swap in swaps {
            let identity = swap.identity();
            let result = match swap.state {
                ToBtcLnState::Saved => self.expire_saved(swap, now).await,
                ToBtcLnState::Commited | ToBtcLnState::Paid => {
                    self.process_initialized(swap).await
                }
                ToBtcLnState::NonPayable => self.reap_non_payable(swap).await,
                _ => Ok(()),
            };
            if let Err(err) = result {
                log::error!("{identity}: watchdog step failed: {err}");
            }
        }
        Ok(())
    }

    /// Drop quotes whose authorization or invoice expired without a commit.
    async fn expire_saved(&self, swap: ToBtcLnSwap, now: u64) -> Result<()> {
        let invoice = self.ln.parse_invoice(&swap.pr).await;
        let invoice_expired = invoice.map(|i| i.expires_at <= now).unwrap_or(true);
        if swap.signature_expiry > now && !invoice_expired {
            return Ok(());
        }
        let contract = self.registry.contract(&swap.chain)?;
        if contract.get_commit_status(&swap.data).await? == CommitStatus::Committed {
            // Commit landed but the event was missed; reconcile.
            let mut swap = swap;
            self.transition(&mut swap, ToBtcLnState::Commited)?;
            self.storage.put(&swap).await?;
            return Ok(());
        }
        log::info!("{}: quote expired, removing", swap.identity());
        self.storage.remove(&swap.identity()).await
    }

    /// Remove non-payable swaps once the escrow is gone.
    async fn reap_non_payable(&self, swap: ToBtcLnSwap) -> Result<()> {
        let contract = self.registry.contract(&swap.chain)?;
        match contract.get_commit_status(&swap.data).await? {
            CommitStatus::Committed => Ok(()),
            _ => {
                log::info!("{}: escrow resolved, removing non-payable", swap.identity());
                self.storage.remove(&swap.identity()).await
            }
        }
    }
}

fn parse_payment_hash(hex_str: &str) -> std::result::Result<[u8; 32], ServiceError> {
    let bytes =
        hex::decode(hex_str).map_err(|_| ServiceError::invalid_request("Invalid payment hash"))?;
    bytes
        .try_into()
        .map_err(|_| ServiceError::invalid_request("Invalid payment hash"))
}

impl<S: SwapRecordStorage<ToBtcLnSwap> + 'static> SwapHandler for ToBtcLn<S> {
    fn name(&self) -> &'static str {
        "to_btc_ln"
    }

    fn get_info(&self) -> SwapHandlerInfo {
        SwapHandlerInfo {
            swap_type: "to_btc_ln".into(),
            min: self.config.fees.min_sat,
            max: self.config.fees.max_sat,
            base_fee: self.config.fees.base_fee_sat,
            fee_ppm: self.config.fees.fee_ppm,
            chain_tokens: super::registry_chain_tokens(&self.registry),
            data: serde_json::json!({
                "minSendCltv": self.config.min_send_cltv,
                "maxUsableCltv": self.config.max_usable_cltv,
            }),
        }
    }

    fn process_event<'a>(
        &'a self,
        chain_id: &'a str,
        event: &'a ChainEvent,
    ) -> HandlerFuture<'a, ()> {
        Box::pin(async move { self.handle_event(chain_id, event).await })
    }

    fn check_past_swaps(&self) -> HandlerFuture<'_, ()> {
        Box::pin(async move { self.watchdog_pass().await })
    }
}
