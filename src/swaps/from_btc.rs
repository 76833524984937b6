//! On-chain BTC -> Token swaps.
//!
//! We hand out a fresh deposit address and fund a smart-chain escrow whose
//! claim predicate is a Merkle-proven Bitcoin transaction paying that
//! address. The claimer proves the deposit and takes the tokens; the secret
//! revealed by the claim is the reversed Bitcoin txid.

use crate::api::{GetAddressRequest, GetAddressResponse};
use crate::bitcoin_wallet::BitcoinWallet;
use crate::chain::{
    ChainEvent, ChainRegistry, CommitStatus, SwapData, SwapKind, onchain_payment_hash, txo_hash,
};
use crate::config::FromBtcConfig;
use crate::error::{Error, Result, ServiceError, codes};
use crate::lock::SwapLockMap;
use crate::prefetch::PrefetchGroup;
use crate::price::PriceOracle;
use crate::storage::{StoredSwap, SwapRecordStorage};
use crate::swaps::{HandlerFuture, Metadata, SwapHandler, SwapHandlerInfo, TxIds, fees};
use crate::types::{SwapIdentity, now_seconds};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of an on-chain BTC -> Token swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum FromBtcState {
    /// Escrow refunded to us after expiry.
    Refunded = -2,
    /// Authorization lapsed without a commit.
    Canceled = -1,
    /// Address issued, escrow authorized, awaiting commit.
    Created = 0,
    /// Escrow committed; awaiting the claimer's proof.
    Commited = 1,
    /// Claimed against a confirmed Bitcoin deposit.
    Claimed = 2,
}

impl From<FromBtcState> for i8 {
    fn from(state: FromBtcState) -> i8 {
        state as i8
    }
}

impl TryFrom<i8> for FromBtcState {
    type Error = String;

    fn try_from(value: i8) -> std::result::Result<Self, Self::Error> {
        match value {
            -2 => Ok(Self::Refunded),
            -1 => Ok(Self::Canceled),
            0 => Ok(Self::Created),
            1 => Ok(Self::Commited),
            2 => Ok(Self::Claimed),
            other => Err(format!("unknown FromBtc state {other}")),
        }
    }
}

fn can_transition(from: FromBtcState, to: FromBtcState) -> bool {
    use FromBtcState::*;
    matches!(
        (from, to),
        (Created, Commited)
            | (Created, Canceled)
            | (Commited, Claimed)
            | (Commited, Refunded)
    )
}

/// Persisted record of one on-chain BTC -> Token swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FromBtcSwap {
    pub chain: String,
    pub state: FromBtcState,
    pub data: SwapData,
    /// Deposit address handed to the payer.
    pub btc_address: String,
    pub amount_sat: u64,
    pub authorization_expiry: u64,
    pub swap_fee_sat: u64,
    #[serde(with = "crate::types::dec_string")]
    pub swap_fee_in_token: u128,
    /// Bitcoin txid of the incoming deposit (learned from the claim secret).
    pub tx_id: Option<String>,
    #[serde(default, with = "crate::types::hex_bytes32_opt")]
    pub secret: Option<[u8; 32]>,
    pub metadata: Metadata,
    pub tx_ids: TxIds,
}

impl StoredSwap for FromBtcSwap {
    fn identity(&self) -> SwapIdentity {
        SwapIdentity::new(
            self.chain.clone(),
            self.data.payment_hash,
            self.data.sequence,
        )
    }
}

/// On-chain BTC -> Token swap handler.
pub struct FromBtc<S: SwapRecordStorage<FromBtcSwap>> {
    registry: Arc<ChainRegistry>,
    storage: Arc<S>,
    oracle: Arc<PriceOracle>,
    wallet: Arc<dyn BitcoinWallet>,
    config: FromBtcConfig,
    locks: SwapLockMap,
}

impl<S: SwapRecordStorage<FromBtcSwap> + 'static> FromBtc<S> {
    pub fn new(
        registry: Arc<ChainRegistry>,
        storage: Arc<S>,
        oracle: Arc<PriceOracle>,
        wallet: Arc<dyn BitcoinWallet>,
        config: FromBtcConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            storage,
            oracle,
            wallet,
            config,
            locks: SwapLockMap::new(),
        })
    }

    fn transition(&self, swap: &mut FromBtcSwap, to: FromBtcState) -> Result<()> {
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

    fn validate_claimer_bounty(
        params: &crate::api::ClaimerBountyParams,
        now: u64,
    ) -> std::result::Result<(), ServiceError> {
        let err = || ServiceError::new(codes::INVALID_CLAIMER_BOUNTY, "Invalid claimerBounty");
        if params.safety_factor == 0 || params.safety_factor > 10 {
            return Err(err());
        }
        // The lifetime estimate must anchor near the present.
        if params.start_timestamp > now + 600 || params.start_timestamp + 86_400 < now {
            return Err(err());
        }
        Ok(())
    }

    /// `POST /getAddress`: issue a deposit address and authorize the escrow.
    pub async fn get_address(
        &self,
        request: GetAddressRequest,
    ) -> std::result::Result<GetAddressResponse, ServiceError> {
        let mut metadata = Metadata::new(serde_json::to_value(&request).unwrap_or_default());
        let now = now_seconds();

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
        Self::validate_claimer_bounty(&request.claimer_bounty, now)?;

        let prefetch = PrefetchGroup::new();
        let price = self
            .oracle
            .pre_fetch_price(&prefetch, &chain_id, &request.token);
        let balance = {
            let contract = contract.clone();
            let token = request.token.clone();
            prefetch.spawn(async move { contract.get_balance(&token).await })
        };
        let sign_data = {
            let contract = contract.clone();
            prefetch.spawn(async move { contract.pre_fetch_sign_data().await })
        };
        let signal = prefetch.signal();

        let token = self
            .oracle
            .get_token_data(&chain_id, &request.token)
            .map_err(ServiceError::from)?
            .clone();
        let fees_cfg = &self.config.fees;

        // Exact-out requests name the token amount; back-compute the BTC side.
        let (amount_sat, exact_out_total) = if request.exact_out {
            let net_sat = self
                .oracle
                .get_to_btc_swap_amount(request.amount, &token, true, None)
                .await
                .map_err(ServiceError::from)?;
            let gross =
                fees::amount_for_exact_out(net_sat, fees_cfg.base_fee_sat, fees_cfg.fee_ppm)
                    .map_err(ServiceError::from)?;
            (gross, Some(request.amount))
        } else {
            let sat = u64::try_from(request.amount)
                .map_err(|_| ServiceError::invalid_request("Amount out of range"))?;
            (sat, None)
        };
        metadata.mark("amounts.checked");

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

        signal.check().map_err(ServiceError::from)?;
        let price = price.get().await.map_err(ServiceError::from)?;
        metadata.mark("price.calculated");

        let swap_fee_sat = fees::swap_fee_sat(amount_sat, fees_cfg.base_fee_sat, fees_cfg.fee_ppm)
            .map_err(ServiceError::from)?;
        let total_in_token = match exact_out_total {
            Some(total) => total,
            None => {
                let net_sat = amount_sat
                    .checked_sub(swap_fee_sat)
                    .ok_or_else(|| ServiceError::from(Error::Overflow("fee exceeds amount")))?;
                self.oracle
                    .get_from_btc_swap_amount(net_sat, &token, false, Some(price))
                    .await
                    .map_err(ServiceError::from)?
            }
        };
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

        let deposit_address = self
            .wallet
            .get_fresh_address()
            .await
            .map_err(ServiceError::from)?;
        let output_script = deposit_address.script_pubkey();
        metadata.mark("address.created");

        // One swap per (payment hash, sequence), ever.
        let payment_hash = onchain_payment_hash(output_script.as_bytes(), amount_sat, 0);
        let identity = SwapIdentity::new(chain_id.clone(), payment_hash, request.sequence);
        if self
            .storage
            .get(&identity)
            .await
            .map_err(ServiceError::from)?
            .is_some()
        {
            return Err(ServiceError::new(
                codes::DUPLICATE_SEQUENCE,
                "Sequence already used for this payment hash",
            ));
        }

        let expiry = now + self.config.swap_timeout_secs;
        let bounty = fees::claimer_bounty(
            request.claimer_bounty.add_fee,
            request.claimer_bounty.add_block,
            request.claimer_bounty.fee_per_block,
            expiry,
            request.claimer_bounty.start_timestamp,
            self.config.timing.bitcoin_blocktime_secs,
            request.claimer_bounty.safety_factor,
        )
        .map_err(ServiceError::from)?;

        let native = self
            .oracle
            .get_token_data(&chain_id, &contract.native_token_address())
            .map_err(ServiceError::from)?
            .clone();
        let swap_value_in_native = self
            .oracle
            .get_from_btc_swap_amount(amount_sat, &native, true, None)
            .await
            .map_err(ServiceError::from)?;

        let mut data = SwapData {
            payment_hash,
            sequence: request.sequence,
            offerer: contract.get_address(),
            claimer: request.address.clone(),
            token: request.token.clone(),
            amount: total_in_token,
            expiry,
            security_deposit: 0,
            claimer_bounty: bounty,
            pay_in: false,
            pay_out: false,
            kind: SwapKind::Chain {
                confirmations: self.config.confirmations,
                nonce: 0,
                txo_hash: txo_hash(amount_sat, output_script.as_bytes()),
            },
        };

        let refund_fee = contract
            .get_refund_fee(&data)
            .await
            .map_err(ServiceError::from)?;
        let base_deposit = if contract.has_raw_refund_fee() {
            refund_fee
        } else {
            refund_fee
                .checked_mul(2)
                .ok_or_else(|| ServiceError::from(Error::Overflow("base deposit")))?
        };
        data.security_deposit = fees::security_deposit(
            base_deposit,
            swap_value_in_native,
            self.config.security_deposit.apy_ppm,
            self.config.swap_timeout_secs,
        )
        .map_err(ServiceError::from)?;
        metadata.mark("secdep.calculated");

        let signature = contract
            .get_init_signature(
                &data,
                self.config.authorization_timeout_secs,
                request.fee_rate.as_deref(),
            )
            .await
            .map_err(ServiceError::from)?;
        metadata.mark("swap.signed");

        let mut swap = FromBtcSwap {
            chain: chain_id,
            state: FromBtcState::Created,
            data: data.clone(),
            btc_address: deposit_address.to_string(),
            amount_sat,
            authorization_expiry: signature.timeout,
            swap_fee_sat,
            swap_fee_in_token,
            tx_id: None,
            secret: None,
            metadata,
            tx_ids: TxIds::default(),
        };
        swap.metadata.mark("swap.created");
        self.storage.put(&swap).await.map_err(ServiceError::from)?;

        let sign_data_prefetch = sign_data.get().await.ok();

        Ok(GetAddressResponse {
            amount: amount_sat,
            btc_address: deposit_address.to_string(),
            address: contract.get_address(),
            swap_fee: swap_fee_in_token,
            total: total_in_token,
            data,
            prefix: signature.prefix,
            timeout: signature.timeout,
            signature: signature.signature,
            sign_data_prefetch,
        })
    }

    async fn handle_event(&self, chain_id: &str, event: &ChainEvent) -> Result<()> {
        let identity = SwapIdentity::new(chain_id, *event.payment_hash(), event.sequence());

        match event {
            ChainEvent::Initialize(init) => {
                let contract = self.registry.contract(chain_id)?;
                if init.data.is_htlc() || init.data.offerer != contract.get_address() {
                    return Ok(());
                }
                let Some(mut swap) = self.storage.get(&identity).await? else {
                    return Ok(());
                };
                if swap.state != FromBtcState::Created {
                    return Ok(());
                }
                swap.tx_ids.init = Some(init.tx_id.clone());
                self.transition(&mut swap, FromBtcState::Commited)?;
                self.storage.put(&swap).await
            }
            ChainEvent::Claim(claim) => {
                let Some(mut swap) = self.storage.get(&identity).await? else {
                    return Ok(());
                };
                // The secret of a chain swap is the reversed Bitcoin txid.
                let mut txid_display = claim.secret;
                txid_display.reverse();
                swap.secret = Some(claim.secret);
                swap.tx_id = Some(hex::encode(txid_display));
                swap.tx_ids.claim = Some(claim.tx_id.clone());
                if can_transition(swap.state, FromBtcState::Claimed) {
                    self.transition(&mut swap, FromBtcState::Claimed)?;
                }
                self.storage.put(&swap).await?;
                log::info!(
                    "{identity}: claimed against bitcoin tx {}",
                    swap.tx_id.as_deref().unwrap_or("?")
                );
                self.storage.remove(&identity).await
            }
            ChainEvent::Refund(refund) => {
                let Some(mut swap) = self.storage.get(&identity).await? else {
                    return Ok(());
                };
                swap.tx_ids.refund = Some(refund.tx_id.clone());
                log::info!("{identity}: refund observed, removing");
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
                FromBtcState::Created => self.check_created(swap, now).await,
                FromBtcState::Commited => self.check_committed(swap, now).await,
                _ => Ok(()),
            };
            if let Err(err) = result {
                log::error!("{identity}: watchdog step failed: {err}");
            }
        }
        Ok(())
    }

    /// Expired authorizations either advance (commit landed unseen) or die.
    async fn check_created(&self, mut swap: FromBtcSwap, now: u64) -> Result<()> {
        if swap.authorization_expiry > now {
            return Ok(());
        }
        let contract = self.registry.contract(&swap.chain)?;
        if contract.get_commit_status(&swap.data).await? == CommitStatus::Committed {
            self.transition(&mut swap, FromBtcState::Commited)?;
            return self.storage.put(&swap).await;
        }
        log::info!("{}: authorization expired, removing", swap.identity());
        self.transition(&mut swap, FromBtcState::Canceled)?;
        self.storage.remove(&swap.identity()).await
    }

    /// Reclaim escrows whose on-chain expiry elapsed unclaimed.
    async fn check_committed(&self, mut swap: FromBtcSwap, now: u64) -> Result<()> {
        if swap.data.expiry > now {
            return Ok(());
        }
        let Some(_lock) = self.locks.lock(&swap.identity(), Duration::from_secs(120)) else {
            return Ok(());
        };
        let contract = self.registry.contract(&swap.chain)?;
        match contract.get_commit_status(&swap.data).await? {
            CommitStatus::Committed | CommitStatus::Expired => {
                let refund_tx = contract.refund(&swap.data).await?;
                swap.tx_ids.refund = Some(refund_tx);
                self.transition(&mut swap, FromBtcState::Refunded)?;
                self.storage.put(&swap).await?;
                self.storage.remove(&swap.identity()).await
            }
            CommitStatus::Paid => {
                // Claim landed but the event was missed; nothing left to do.
                log::info!("{}: already claimed, removing", swap.identity());
                self.storage.remove(&swap.identity()).await
            }
            CommitStatus::NotCommitted => self.storage.remove(&swap.identity()).await,
        }
    }
}

impl<S: SwapRecordStorage<FromBtcSwap> + 'static> SwapHandler for FromBtc<S> {
    fn name(&self) -> &'static str {
        "from_btc"
    }

    fn get_info(&self) -> SwapHandlerInfo {
        SwapHandlerInfo {
            swap_type: "from_btc".into(),
            min: self.config.fees.min_sat,
            max: self.config.fees.max_sat,
            base_fee: self.config.fees.base_fee_sat,
            fee_ppm: self.config.fees.fee_ppm,
            chain_tokens: super::registry_chain_tokens(&self.registry),
            data: serde_json::json!({
                "confirmations": self.config.confirmations,
                "swapTimeout": self.config.swap_timeout_secs,
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
