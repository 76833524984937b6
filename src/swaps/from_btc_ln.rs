//! Lightning -> Token swaps.
//!
//! We publish a hold invoice; once the payer's HTLC is locked in we fund a
//! smart-chain HTLC for the claimer. Their on-chain claim reveals the
//! preimage, which settles the hold invoice. The preimage being public makes
//! a failed settle fatal-but-retryable, never abandonable.

use crate::api::{
    CreateInvoiceRequest, CreateInvoiceResponse, InvoicePaymentAuthResponse, StatusResponse,
};
use crate::chain::{ChainEvent, ChainRegistry, CommitStatus, SwapData, SwapKind};
use crate::config::FromBtcLnConfig;
use crate::error::{Error, Result, ServiceError, codes};
use crate::lightning::{HoldInvoiceRequest, InvoiceState, LightningWallet};
use crate::lock::SwapLockMap;
use crate::prefetch::PrefetchGroup;
use crate::price::PriceOracle;
use crate::storage::{StoredSwap, SwapRecordStorage};
use crate::swaps::{HandlerFuture, Metadata, SwapHandler, SwapHandlerInfo, TxIds, fees};
use crate::types::{SwapIdentity, now_seconds};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of a Lightning -> Token swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum FromBtcLnState {
    /// Escrow refunded to us; invoice canceled.
    Refunded = -2,
    /// Abandoned before commit; invoice canceled.
    Canceled = -1,
    /// Hold invoice published, awaiting the payer's HTLC.
    Created = 0,
    /// HTLC held; init authorization issued.
    Received = 1,
    /// Smart-chain escrow committed.
    Commited = 2,
    /// Escrow claimed (preimage public) but invoice settle still owed.
    Claimed = 3,
    /// Hold invoice settled; swap complete.
    Settled = 4,
}

impl From<FromBtcLnState> for i8 {
    fn from(state: FromBtcLnState) -> i8 {
        state as i8
    }
}

impl TryFrom<i8> for FromBtcLnState {
    type Error = String;

    fn try_from(value: i8) -> std::result::Result<Self, Self::Error> {
        match value {
            -2 => Ok(Self::Refunded),
            -1 => Ok(Self::Canceled),
            0 => Ok(Self::Created),
            1 => Ok(Self::Received),
            2 => Ok(Self::Commited),
            3 => Ok(Self::Claimed),
            4 => Ok(Self::Settled),
            other => Err(format!("unknown FromBtcLn state {other}")),
        }
    }
}

fn can_transition(from: FromBtcLnState, to: FromBtcLnState) -> bool {
    use FromBtcLnState::*;
    matches!(
        (from, to),
        (Created, Received)
            | (Created, Canceled)
            | (Received, Commited)
            | (Received, Canceled)
            | (Received, Refunded)
            | (Received, Claimed)
            | (Received, Settled)
            | (Commited, Claimed)
            | (Commited, Settled)
            | (Commited, Refunded)
            | (Claimed, Settled)
    )
}

/// Persisted record of one Lightning -> Token swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FromBtcLnSwap {
    pub chain: String,
    pub state: FromBtcLnState,
    #[serde(with = "crate::types::hex_bytes32")]
    pub payment_hash: [u8; 32],
    /// Escrow payload; built once the HTLC is held.
    pub data: Option<SwapData>,
    /// The hold invoice we published.
    pub pr: String,
    /// Claimer's smart-chain address.
    pub claimer: String,
    pub token: String,
    pub amount_sat: u64,
    pub swap_fee_sat: u64,
    #[serde(with = "crate::types::dec_string")]
    pub swap_fee_in_token: u128,
    /// Tokens owed to the claimer.
    #[serde(with = "crate::types::dec_string")]
    pub total_in_token: u128,
    /// Pre-computed native-currency security deposit.
    #[serde(with = "crate::types::dec_string")]
    pub security_deposit: u128,
    /// Init authorization; set in `Received`.
    pub signature: Option<crate::chain::SignatureData>,
    /// Client-supplied smart-chain fee rate hint.
    pub fee_rate: Option<String>,
    /// Preimage revealed by the on-chain claim.
    #[serde(default, with = "crate::types::hex_bytes32_opt")]
    pub secret: Option<[u8; 32]>,
    pub metadata: Metadata,
    pub tx_ids: TxIds,
}

impl StoredSwap for FromBtcLnSwap {
    fn identity(&self) -> SwapIdentity {
        SwapIdentity::new(self.chain.clone(), self.payment_hash, 0)
    }
}

/// Lightning -> Token swap handler.
pub struct FromBtcLn<S: SwapRecordStorage<FromBtcLnSwap>> {
    registry: Arc<ChainRegistry>,
    storage: Arc<S>,
    oracle: Arc<PriceOracle>,
    ln: Arc<dyn LightningWallet>,
    config: FromBtcLnConfig,
    locks: SwapLockMap,
}

impl<S: SwapRecordStorage<FromBtcLnSwap> + 'static> FromBtcLn<S> {
    pub fn new(
        registry: Arc<ChainRegistry>,
        storage: Arc<S>,
        oracle: Arc<PriceOracle>,
        ln: Arc<dyn LightningWallet>,
        config: FromBtcLnConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            storage,
            oracle,
            ln,
            config,
            locks: SwapLockMap::new(),
        })
    }

    fn transition(&self, swap: &mut FromBtcLnSwap, to: FromBtcLnState) -> Result<()> {
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

    /// Escrow lifetime granted once the HTLC is held.
    fn escrow_expiry(&self, now: u64) -> u64 {
        let budget = self.config.min_cltv as u64 * self.config.timing.bitcoin_blocktime_secs
            / self.config.timing.safety_factor;
        now + budget.saturating_sub(self.config.timing.grace_period_secs)
    }

    /// `POST /createInvoice`: publish a hold invoice for a swap-in.
    pub async fn create_invoice(
        &self,
        request: CreateInvoiceRequest,
    ) -> std::result::Result<CreateInvoiceResponse, ServiceError> {
        let mut metadata = Metadata::new(serde_json::to_value(&request).unwrap_or_default());

        let (chain_id, chain) = self
            .registry
            .resolve(request.chain.as_deref())
            .map_err(|_| ServiceError::invalid_chain())?;
        if !self.registry.is_token_allowed(&chain_id, &request.token) {
            return Err(ServiceError::invalid_request("Invalid token"));
        }
        let contract = chain.contract.clone();
        if !contract.is_valid_address(&request.address) {
            return Err(ServiceError::invalid_request("Invalid claimer address"));
        }
        let payment_hash = parse_payment_hash(&request.payment_hash)?;
        let description_hash = request
            .description_hash
            .as_deref()
            .map(parse_payment_hash)
            .transpose()?;

        // Re-POSTing an already-used payment hash must never double-create.
        let identity = SwapIdentity::new(chain_id.clone(), payment_hash, 0);
        if self
            .storage
            .get(&identity)
            .await
            .map_err(ServiceError::from)?
            .is_some()
            || self
                .ln
                .get_invoice(&payment_hash)
                .await
                .map_err(ServiceError::from)?
                .is_some()
        {
            return Err(ServiceError::new(
                codes::ALREADY_COMMITTED,
                "Payment hash already used",
            ));
        }

        let prefetch = PrefetchGroup::new();
        let price = self
            .oracle
            .pre_fetch_price(&prefetch, &chain_id, &request.token);
        let balance = {
            let contract = contract.clone();
            let token = request.token.clone();
            prefetch.spawn(async move { contract.get_balance(&token).await })
        };
        let signal = prefetch.signal();

        let token = self
            .oracle
            .get_token_data(&chain_id, &request.token)
            .map_err(ServiceError::from)?
            .clone();
        metadata.mark("amounts.checked");

        let fees_cfg = &self.config.fees;
        match fees::check_bounds(request.amount, fees_cfg.min_sat, fees_cfg.max_sat) {
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

        signal.check().map_err(ServiceError::from)?;
        let price = price.get().await.map_err(ServiceError::from)?;
        metadata.mark("price.calculated");

        let swap_fee_sat =
            fees::swap_fee_sat(request.amount, fees_cfg.base_fee_sat, fees_cfg.fee_ppm)
                .map_err(ServiceError::from)?;
        let net_sat = request
            .amount
            .checked_sub(swap_fee_sat)
            .ok_or_else(|| ServiceError::from(Error::Overflow("fee exceeds amount")))?;
        let total_in_token = self
            .oracle
            .get_from_btc_swap_amount(net_sat, &token, false, Some(price))
            .await
            .map_err(ServiceError::from)?;
        let swap_fee_in_token = self
            .oracle
            .get_from_btc_swap_amount(swap_fee_sat, &token, true, Some(price))
            .await
            .map_err(ServiceError::from)?;

        let vault_balance = balance.get().await.map_err(ServiceError::from)?;
        if vault_balance < total_in_token {
            return Err(ServiceError::not_enough_liquidity());
        }
        metadata.mark("balance.checked");

        // Native value of the swap drives the capital-lock compensation.
        let native = self
            .oracle
            .get_token_data(&chain_id, &contract.native_token_address())
            .map_err(ServiceError::from)?
            .clone();
        let swap_value_in_native = self
            .oracle
            .get_from_btc_swap_amount(request.amount, &native, true, None)
            .await
            .map_err(ServiceError::from)?;
        let refund_fee = contract
            .get_refund_fee(&placeholder_data(payment_hash, &contract, &request, total_in_token))
            .await
            .map_err(ServiceError::from)?;
        let base_deposit = if contract.has_raw_refund_fee() {
            refund_fee
        } else {
            refund_fee
                .checked_mul(2)
                .ok_or_else(|| ServiceError::from(Error::Overflow("base deposit")))?
        };
        let security_deposit = fees::security_deposit(
            base_deposit,
            swap_value_in_native,
            self.config.security_deposit.apy_ppm,
            self.config.min_cltv as u64 * self.config.timing.bitcoin_blocktime_secs,
        )
        .map_err(ServiceError::from)?;
        metadata.mark("secdep.calculated");

        let invoice = self
            .ln
            .create_hold_invoice(HoldInvoiceRequest {
                payment_hash,
                amount_msat: request.amount * 1000,
                cltv_delta: self.config.min_cltv + 5,
                expires_in_secs: self.config.invoice_timeout_secs,
                description: request.address.clone(),
                description_hash,
            })
            .await
            .map_err(ServiceError::from)?;
        metadata.mark("invoice.created");

        let mut swap = FromBtcLnSwap {
            chain: chain_id,
            state: FromBtcLnState::Created,
            payment_hash,
            data: None,
            pr: invoice.bolt11.clone(),
            claimer: request.address.clone(),
            token: request.token.clone(),
            amount_sat: request.amount,
            swap_fee_sat,
            swap_fee_in_token,
            total_in_token,
            security_deposit,
            signature: None,
            fee_rate: None,
            secret: None,
            metadata,
            tx_ids: TxIds::default(),
        };
        swap.metadata.mark("swap.created");
        self.storage.put(&swap).await.map_err(ServiceError::from)?;

        Ok(CreateInvoiceResponse {
            pr: invoice.bolt11,
            swap_fee: swap_fee_in_token,
            total: total_in_token,
            intermediary_key: contract.get_address(),
            security_deposit,
        })
    }

    /// `GET|POST /getInvoiceStatus`: poll the hold invoice.
    pub async fn get_invoice_status(&self, payment_hash_hex: &str) -> StatusResponse {
        let Ok(payment_hash) = parse_payment_hash(payment_hash_hex) else {
            return StatusResponse::new(codes::INVOICE_NOT_FOUND, "Invalid payment hash");
        };
        let invoice = match self.ln.get_invoice(&payment_hash).await {
            Ok(Some(invoice)) => invoice,
            _ => return StatusResponse::new(codes::INVOICE_NOT_FOUND, "Invoice not found"),
        };
        match invoice.state {
            InvoiceState::Held | InvoiceState::Settled => {
                StatusResponse::new(codes::INVOICE_PAID, "Invoice paid")
            }
            InvoiceState::Canceled => {
                StatusResponse::new(codes::INVOICE_NOT_FOUND, "Invoice canceled")
            }
            InvoiceState::Open if invoice.expires_at <= now_seconds() => {
                StatusResponse::new(codes::INVOICE_EXPIRED, "Invoice expired")
            }
            InvoiceState::Open => StatusResponse::new(codes::INVOICE_UNPAID, "Invoice not paid"),
        }
    }

    /// `GET|POST /getInvoicePaymentAuth`: issue (or re-issue) the init
    /// authorization once the payer's HTLC is held.
    pub async fn get_invoice_payment_auth(
        &self,
        payment_hash_hex: &str,
    ) -> std::result::Result<InvoicePaymentAuthResponse, ServiceError> {
        let payment_hash = parse_payment_hash(payment_hash_hex)?;
        let chain_id = self.registry.default_chain().to_string();
        let identity = SwapIdentity::new(chain_id, payment_hash, 0);

        let Some(swap) = self
            .storage
            .get(&identity)
            .await
            .map_err(ServiceError::from)?
        else {
            return Err(ServiceError::new(codes::INVOICE_NOT_FOUND, "Swap not found"));
        };
        let contract = self
            .registry
            .contract(&swap.chain)
            .map_err(ServiceError::from)?;

        match swap.state {
            FromBtcLnState::Created => {
                let invoice = self
                    .ln
                    .get_invoice(&payment_hash)
                    .await
                    .map_err(ServiceError::from)?
                    .ok_or_else(|| {
                        ServiceError::new(codes::INVOICE_NOT_FOUND, "Invoice not found")
                    })?;
                match invoice.state {
                    InvoiceState::Held => self.htlc_received(swap, invoice).await,
                    InvoiceState::Open if invoice.expires_at <= now_seconds() => Err(
                        ServiceError::new(codes::INVOICE_EXPIRED, "Invoice expired"),
                    ),
                    InvoiceState::Open => Err(ServiceError::new(
                        codes::INVOICE_UNPAID,
                        "Invoice not paid yet",
                    )),
                    _ => Err(ServiceError::new(
                        codes::INVOICE_NOT_FOUND,
                        "Invoice canceled",
                    )),
                }
            }
            FromBtcLnState::Received => {
                let (Some(signature), Some(data)) = (swap.signature.clone(), swap.data.clone())
                else {
                    return Err(ServiceError::internal());
                };
                // Authorization may have lapsed without an on-chain commit.
                if signature.timeout <= now_seconds() {
                    let status = contract
                        .get_commit_status(&data)
                        .await
                        .map_err(ServiceError::from)?;
                    if status == CommitStatus::NotCommitted {
                        let mut swap = swap;
                        self.transition(&mut swap, FromBtcLnState::Canceled)
                            .map_err(ServiceError::from)?;
                        self.storage.put(&swap).await.map_err(ServiceError::from)?;
                        self.ln
                            .cancel_hold_invoice(&payment_hash)
                            .await
                            .map_err(ServiceError::from)?;
                        return Err(ServiceError::new(
                            codes::INVOICE_EXPIRED,
                            "Authorization expired",
                        ));
                    }
                }
                Ok(InvoicePaymentAuthResponse {
                    address: contract.get_address(),
                    data,
                    prefix: signature.prefix,
                    timeout: signature.timeout,
                    signature: signature.signature,
                })
            }
            FromBtcLnState::Commited | FromBtcLnState::Claimed | FromBtcLnState::Settled => Err(
                ServiceError::new(codes::INVOICE_WAITING_COMMIT, "Swap already committed"),
            ),
            _ => Err(ServiceError::new(
                codes::INVOICE_NOT_FOUND,
                "Swap canceled",
            )),
        }
    }

    /// The payer's HTLC is held: build the escrow payload and authorize init.
    async fn htlc_received(
        &self,
        mut swap: FromBtcLnSwap,
        invoice: crate::lightning::HoldInvoice,
    ) -> std::result::Result<InvoicePaymentAuthResponse, ServiceError> {
        let identity = swap.identity();
        let Some(_lock) = self.locks.lock(&identity, Duration::from_secs(60)) else {
            return Err(ServiceError::new(
                codes::PAYMENT_IN_FLIGHT,
                "Swap is being processed",
            ));
        };
        let contract = self
            .registry
            .contract(&swap.chain)
            .map_err(ServiceError::from)?;

        // Balance may have moved since invoice creation.
        let vault_balance = contract
            .get_balance(&swap.token)
            .await
            .map_err(ServiceError::from)?;
        if vault_balance < swap.total_in_token {
            self.cancel_swap(&mut swap).await.map_err(ServiceError::from)?;
            return Err(ServiceError::not_enough_liquidity());
        }

        // The held HTLC must leave us enough CLTV room.
        let remaining = invoice.htlc_cltv_remaining.unwrap_or(0);
        if remaining < self.config.min_cltv {
            self.cancel_swap(&mut swap).await.map_err(ServiceError::from)?;
            return Err(ServiceError::not_enough_time());
        }

        let now = now_seconds();
        let data = SwapData {
            payment_hash: swap.payment_hash,
            sequence: 0,
            offerer: contract.get_address(),
            claimer: swap.claimer.clone(),
            token: swap.token.clone(),
            amount: swap.total_in_token,
            expiry: self.escrow_expiry(now),
            security_deposit: swap.security_deposit,
            claimer_bounty: 0,
            pay_in: false,
            pay_out: false,
            kind: SwapKind::Htlc,
        };
        let signature = contract
            .get_init_signature(
                &data,
                self.config.invoice_timeout_secs.max(60),
                swap.fee_rate.as_deref(),
            )
            .await
            .map_err(ServiceError::from)?;

        swap.data = Some(data.clone());
        swap.signature = Some(signature.clone());
        swap.metadata.mark("htlc.received");
        self.transition(&mut swap, FromBtcLnState::Received)
            .map_err(ServiceError::from)?;
        self.storage.put(&swap).await.map_err(ServiceError::from)?;

        Ok(InvoicePaymentAuthResponse {
            address: contract.get_address(),
            data,
            prefix: signature.prefix,
            timeout: signature.timeout,
            signature: signature.signature,
        })
    }

    /// Cancel the hold invoice and mark the swap canceled.
    async fn cancel_swap(&self, swap: &mut FromBtcLnSwap) -> Result<()> {
        self.transition(swap, FromBtcLnState::Canceled)?;
        self.storage.put(swap).await?;
        self.ln.cancel_hold_invoice(&swap.payment_hash).await
    }

    /// Settle the hold invoice with the claim preimage.
    async fn settle_invoice(&self, mut swap: FromBtcLnSwap, secret: [u8; 32]) -> Result<()> {
        let identity = swap.identity();
        match self.ln.settle_hold_invoice(&secret).await {
            Ok(()) => {
                swap.secret = Some(secret);
                self.transition(&mut swap, FromBtcLnState::Settled)?;
                self.storage.put(&swap).await?;
                log::info!("{identity}: invoice settled, swap complete");
                self.storage.remove(&identity).await
            }
            Err(err) => {
                // The preimage is public on chain; we must keep retrying or
                // the payer's HTLC times out and we lose the Bitcoin leg.
                log::error!("{identity}: SETTLE FAILED WITH PUBLIC PREIMAGE, retrying: {err}");
                if can_transition(swap.state, FromBtcLnState::Claimed) {
                    swap.secret = Some(secret);
                    self.transition(&mut swap, FromBtcLnState::Claimed)?;
                    self.storage.put(&swap).await?;
                }
                Err(err)
            }
        }
    }

    async fn handle_event(&self, chain_id: &str, event: &ChainEvent) -> Result<()> {
        let identity = SwapIdentity::new(chain_id, *event.payment_hash(), event.sequence());

        match event {
            ChainEvent::Initialize(init) => {
                let contract = self.registry.contract(chain_id)?;
                if !init.data.is_htlc() || init.data.offerer != contract.get_address() {
                    return Ok(());
                }
                let Some(mut swap) = self.storage.get(&identity).await? else {
                    return Ok(());
                };
                if swap.state != FromBtcLnState::Received {
                    return Ok(());
                }
                swap.tx_ids.init = Some(init.tx_id.clone());
                self.transition(&mut swap, FromBtcLnState::Commited)?;
                self.storage.put(&swap).await
            }
            ChainEvent::Claim(claim) => {
                let Some(mut swap) = self.storage.get(&identity).await? else {
                    return Ok(());
                };
                swap.tx_ids.claim = Some(claim.tx_id.clone());
                self.settle_invoice(swap, claim.secret).await
            }
            ChainEvent::Refund(refund) => {
                let Some(mut swap) = self.storage.get(&identity).await? else {
                    return Ok(());
                };
                swap.tx_ids.refund = Some(refund.tx_id.clone());
                if can_transition(swap.state, FromBtcLnState::Refunded) {
                    self.transition(&mut swap, FromBtcLnState::Refunded)?;
                }
                self.ln.cancel_hold_invoice(&swap.payment_hash).await?;
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
                FromBtcLnState::Created => self.check_created(swap, now).await,
                FromBtcLnState::Received => self.check_received(swap, now).await,
                FromBtcLnState::Commited => self.check_committed(swap, now).await,
                FromBtcLnState::Claimed => self.retry_settle(swap).await,
                FromBtcLnState::Canceled => {
                    self.ln.cancel_hold_invoice(&swap.payment_hash).await?;
                    self.storage.remove(&identity).await
                }
                _ => Ok(()),
            };
            if let Err(err) = result {
                log::error!("{identity}: watchdog step failed: {err}");
            }
        }
        Ok(())
    }

    async fn check_created(&self, mut swap: FromBtcLnSwap, now: u64) -> Result<()> {
        let invoice = self.ln.get_invoice(&swap.payment_hash).await?;
        match invoice {
            Some(invoice) if invoice.state == InvoiceState::Held => {
                // Client never polled for the auth; produce it proactively.
                if let Err(err) = self.htlc_received(swap, invoice).await {
                    log::warn!("htlc processing failed: {}", err.msg);
                }
                Ok(())
            }
            Some(invoice) if invoice.expires_at > now => Ok(()),
            _ => {
                log::info!("{}: invoice expired, removing", swap.identity());
                let _ = self.cancel_swap(&mut swap).await;
                self.storage.remove(&swap.identity()).await
            }
        }
    }

    async fn check_received(&self, mut swap: FromBtcLnSwap, now: u64) -> Result<()> {
        let contract = self.registry.contract(&swap.chain)?;
        let Some(data) = swap.data.clone() else {
            return Ok(());
        };

        let status = contract.get_commit_status(&data).await?;
        if status == CommitStatus::Committed {
            // Commit landed but the event was missed.
            self.transition(&mut swap, FromBtcLnState::Commited)?;
            self.storage.put(&swap).await?;
            return self.check_committed(swap, now).await;
        }

        let auth_expired = swap
            .signature
            .as_ref()
            .map(|s| s.timeout <= now)
            .unwrap_or(true);
        if auth_expired {
            log::info!("{}: authorization expired, canceling", swap.identity());
            self.cancel_swap(&mut swap).await?;
            return self.storage.remove(&swap.identity()).await;
        }
        Ok(())
    }

    async fn check_committed(&self, mut swap: FromBtcLnSwap, now: u64) -> Result<()> {
        let Some(data) = swap.data.clone() else {
            return Ok(());
        };
        if data.expiry > now {
            return Ok(());
        }
        let Some(_lock) = self.locks.lock(&swap.identity(), Duration::from_secs(120)) else {
            return Ok(());
        };
        // Escrow expired unclaimed: reclaim our tokens and release the HTLC.
        let contract = self.registry.contract(&swap.chain)?;
        let refund_tx = contract.refund(&data).await?;
        swap.tx_ids.refund = Some(refund_tx);
        self.transition(&mut swap, FromBtcLnState::Refunded)?;
        self.storage.put(&swap).await?;
        self.ln.cancel_hold_invoice(&swap.payment_hash).await?;
        self.storage.remove(&swap.identity()).await
    }

    async fn retry_settle(&self, swap: FromBtcLnSwap) -> Result<()> {
        let Some(secret) = swap.secret else {
            return Ok(());
        };
        self.settle_invoice(swap, secret).await
    }
}

/// Minimal payload for the refund-fee estimate before the real one exists.
fn placeholder_data(
    payment_hash: [u8; 32],
    contract: &Arc<dyn crate::chain::SwapContract>,
    request: &CreateInvoiceRequest,
    total_in_token: u128,
) -> SwapData {
    SwapData {
        payment_hash,
        sequence: 0,
        offerer: contract.get_address(),
        claimer: request.address.clone(),
        token: request.token.clone(),
        amount: total_in_token,
        expiry: 0,
        security_deposit: 0,
        claimer_bounty: 0,
        pay_in: false,
        pay_out: false,
        kind: SwapKind::Htlc,
    }
}

fn parse_payment_hash(hex_str: &str) -> std::result::Result<[u8; 32], ServiceError> {
    let bytes =
        hex::decode(hex_str).map_err(|_| ServiceError::invalid_request("Invalid payment hash"))?;
    bytes
        .try_into()
        .map_err(|_| ServiceError::invalid_request("Invalid payment hash"))
}

impl<S: SwapRecordStorage<FromBtcLnSwap> + 'static> SwapHandler for FromBtcLn<S> {
    fn name(&self) -> &'static str {
        "from_btc_ln"
    }

    fn get_info(&self) -> SwapHandlerInfo {
        SwapHandlerInfo {
            swap_type: "from_btc_ln".into(),
            min: self.config.fees.min_sat,
            max: self.config.fees.max_sat,
            base_fee: self.config.fees.base_fee_sat,
            fee_ppm: self.config.fees.fee_ppm,
            chain_tokens: super::registry_chain_tokens(&self.registry),
            data: serde_json::json!({
                "minCltv": self.config.min_cltv,
                "invoiceTimeout": self.config.invoice_timeout_secs,
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
