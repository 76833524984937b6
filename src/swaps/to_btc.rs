//! Token -> on-chain BTC swaps.
//!
//! The user locks tokens in a smart-chain escrow whose payment hash binds the
//! destination output script, amount and a transaction nonce. We broadcast
//! the Bitcoin payment carrying that nonce in its locktime/sequence and claim
//! the escrow with a Merkle proof of the confirmed transaction.

use crate::api::{
    OnchainQuoteRequest, OnchainQuoteResponse, RefundAuthorizationRequest,
    RefundAuthorizationResponse,
};
use crate::bitcoin_rpc::BitcoinRpc;
use crate::bitcoin_wallet::{
    BitcoinWallet, CoinSelectionRequest, OutputType, build_payment_transaction, random_nonce,
    select_coins,
};
use crate::chain::{
    ChainEvent, ChainRegistry, CommitStatus, SwapData, SwapKind, onchain_payment_hash, txo_hash,
};
use crate::config::ToBtcConfig;
use crate::error::{Error, Result, ServiceError, codes};
use crate::lock::SwapLockMap;
use crate::merkle::get_transaction_merkle;
use crate::prefetch::PrefetchGroup;
use crate::price::PriceOracle;
use crate::storage::{StoredSwap, SwapRecordStorage};
use crate::swaps::{HandlerFuture, Metadata, SwapHandler, SwapHandlerInfo, TxIds, fees};
use crate::types::{SwapIdentity, now_seconds};
use bitcoin::consensus::encode::{deserialize as btc_deserialize, serialize as btc_serialize};
use bitcoin::hashes::Hash as _;
use bitcoin::{Address, Transaction, Txid};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of a Token -> on-chain BTC swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum ToBtcState {
    Refunded = -3,
    Canceled = -2,
    /// Payment cannot be made anymore; escrow awaits refund.
    NonPayable = -1,
    Saved = 0,
    Commited = 1,
    /// Transaction assembled, broadcast in progress; locked.
    BtcSending = 2,
    /// Broadcast accepted; awaiting confirmations.
    BtcSent = 3,
    Claimed = 4,
}

impl From<ToBtcState> for i8 {
    fn from(state: ToBtcState) -> i8 {
        state as i8
    }
}

impl TryFrom<i8> for ToBtcState {
    type Error = String;

    fn try_from(value: i8) -> std::result::Result<Self, Self::Error> {
        match value {
            -3 => Ok(Self::Refunded),
            -2 => Ok(Self::Canceled),
            -1 => Ok(Self::NonPayable),
            0 => Ok(Self::Saved),
            1 => Ok(Self::Commited),
            2 => Ok(Self::BtcSending),
            3 => Ok(Self::BtcSent),
            4 => Ok(Self::Claimed),
            other => Err(format!("unknown ToBtc state {other}")),
        }
    }
}

fn can_transition(from: ToBtcState, to: ToBtcState) -> bool {
    use ToBtcState::*;
    matches!(
        (from, to),
        (Saved, Commited)
            | (Saved, Canceled)
            | (Commited, BtcSending)
            | (Commited, NonPayable)
            | (Commited, Refunded)
            | (BtcSending, BtcSent)
            | (BtcSending, Commited)
            | (BtcSending, NonPayable)
            | (BtcSent, Claimed)
            | (BtcSent, Commited)
            | (NonPayable, Refunded)
    )
}

/// Persisted record of one Token -> on-chain BTC swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToBtcSwap {
    pub chain: String,
    pub state: ToBtcState,
    pub data: SwapData,
    /// Destination Bitcoin address.
    pub address: String,
    /// Requested payout in satoshi.
    pub amount_sat: u64,
    /// Current fee rate; broadcast retries bump this upward.
    pub sats_per_vbyte: u64,
    /// Fee rate at quote time; bumps are capped relative to this value.
    pub quoted_sats_per_vbyte: u64,
    /// Transaction nonce carried in the locktime/sequence.
    pub nonce: u64,
    pub preferred_confirmation_target: u32,
    pub signature_expiry: u64,
    pub swap_fee_sat: u64,
    #[serde(with = "crate::types::dec_string")]
    pub swap_fee_in_token: u128,
    pub quoted_network_fee_sat: u64,
    #[serde(with = "crate::types::dec_string")]
    pub quoted_network_fee_in_token: u128,
    pub real_network_fee_sat: Option<u64>,
    #[serde(default, with = "crate::types::dec_string_opt")]
    pub real_network_fee_in_token: Option<u128>,
    /// Bitcoin txid of the broadcast payment.
    pub tx_id: Option<String>,
    /// Signed raw transaction, hex; kept for rebroadcast and the claim proof.
    pub raw_tx: Option<String>,
    #[serde(default, with = "crate::types::hex_bytes32_opt")]
    pub secret: Option<[u8; 32]>,
    pub metadata: Metadata,
    pub tx_ids: TxIds,
}

impl StoredSwap for ToBtcSwap {
    fn identity(&self) -> SwapIdentity {
        SwapIdentity::new(
            self.chain.clone(),
            self.data.payment_hash,
            self.data.sequence,
        )
    }
}

/// Token -> on-chain BTC swap handler.
pub struct ToBtc<S: SwapRecordStorage<ToBtcSwap>> {
    registry: Arc<ChainRegistry>,
    storage: Arc<S>,
    oracle: Arc<PriceOracle>,
    btc_rpc: Arc<dyn BitcoinRpc>,
    wallet: Arc<dyn BitcoinWallet>,
    network: bitcoin::Network,
    config: ToBtcConfig,
    locks: SwapLockMap,
}

impl<S: SwapRecordStorage<ToBtcSwap> + 'static> ToBtc<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ChainRegistry>,
        storage: Arc<S>,
        oracle: Arc<PriceOracle>,
        btc_rpc: Arc<dyn BitcoinRpc>,
        wallet: Arc<dyn BitcoinWallet>,
        network: bitcoin::Network,
        config: ToBtcConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            storage,
            oracle,
            btc_rpc,
            wallet,
            network,
            config,
            locks: SwapLockMap::new(),
        })
    }

    fn transition(&self, swap: &mut ToBtcSwap, to: ToBtcState) -> Result<()> {
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

    /// Seconds of escrow lifetime needed to confirm the payment and claim.
    fn min_ts_confirm(&self) -> u64 {
        self.config.timing.grace_period_secs
            + self.config.timing.bitcoin_blocktime_secs
                * self.config.confirmations as u64
                * self.config.timing.safety_factor
    }

    fn parse_destination(&self, address: &str) -> std::result::Result<Address, ServiceError> {
        Address::from_str(address)
            .map_err(|_| ServiceError::invalid_request("Invalid bitcoin address"))?
            .require_network(self.network)
            .map_err(|_| ServiceError::invalid_request("Address network mismatch"))
    }

    /// `POST /getQuote`: quote, sign and persist an on-chain payout swap.
    pub async fn get_quote(
        &self,
        request: OnchainQuoteRequest,
    ) -> std::result::Result<OnchainQuoteResponse, ServiceError> {
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
        let destination = self.parse_destination(&request.address)?;
        if request.confirmation_target < self.config.min_confirmation_target
            || request.confirmation_target > self.config.max_confirmation_target
        {
            return Err(ServiceError::invalid_request(
                "Confirmation target out of range",
            ));
        }

        let prefetch = PrefetchGroup::new();
        let price = self
            .oracle
            .pre_fetch_price(&prefetch, &chain_id, &request.token);
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

        let now = now_seconds();
        if request.expiry_timestamp.saturating_sub(now) < self.min_ts_confirm() {
            return Err(ServiceError::not_enough_time());
        }

        // Estimate the network fee by actually selecting coins.
        let sats_per_vbyte = self
            .wallet
            .get_fee_rate(request.confirmation_target)
            .await
            .map_err(ServiceError::from)?;
        let utxos = self.wallet.get_utxos().await.map_err(ServiceError::from)?;
        let out_type =
            OutputType::of_script(&destination.script_pubkey()).unwrap_or(OutputType::P2wsh);
        let selection = select_coins(&CoinSelectionRequest {
            target_sat: request.amount,
            output_vsize: out_type.vsize(),
            sats_per_vbyte,
            change_type: OutputType::P2wpkh,
            required: vec![],
            candidates: utxos,
            order: self.config.coin_selection_order,
        })
        .ok_or_else(ServiceError::not_enough_liquidity)?;
        let network_fee_sat = selection.fee_sat;
        metadata.mark("balance.checked");

        signal.check().map_err(ServiceError::from)?;
        let price = price.get().await.map_err(ServiceError::from)?;
        metadata.mark("price.calculated");

        let swap_fee_sat =
            fees::swap_fee_sat(request.amount, fees_cfg.base_fee_sat, fees_cfg.fee_ppm)
                .map_err(ServiceError::from)?;
        let amount_in_token = self
            .oracle
            .get_from_btc_swap_amount(request.amount, &token, true, Some(price))
            .await
            .map_err(ServiceError::from)?;
        let network_fee_in_token = self
            .oracle
            .get_from_btc_swap_amount(network_fee_sat, &token, true, Some(price))
            .await
            .map_err(ServiceError::from)?;
        let swap_fee_in_token = self
            .oracle
            .get_from_btc_swap_amount(swap_fee_sat, &token, true, Some(price))
            .await
            .map_err(ServiceError::from)?;
        let total = amount_in_token
            .checked_add(network_fee_in_token)
            .and_then(|v| v.checked_add(swap_fee_in_token))
            .ok_or_else(|| ServiceError::from(Error::Overflow("total in token")))?;

        let nonce = random_nonce();
        let output_script = destination.script_pubkey();
        let payment_hash = onchain_payment_hash(output_script.as_bytes(), request.amount, nonce);
        let data = SwapData {
            payment_hash,
            sequence: 0,
            offerer: request.offerer.clone(),
            claimer: contract.get_address(),
            token: request.token.clone(),
            amount: total,
            expiry: request.expiry_timestamp,
            security_deposit: 0,
            claimer_bounty: 0,
            pay_in: true,
            pay_out: true,
            kind: SwapKind::Chain {
                confirmations: self.config.confirmations,
                nonce,
                txo_hash: txo_hash(request.amount, output_script.as_bytes()),
            },
        };

        let signature = contract
            .get_init_signature(&data, self.config.authorization_timeout_secs, None)
            .await
            .map_err(ServiceError::from)?;
        metadata.mark("swap.signed");

        let mut swap = ToBtcSwap {
            chain: chain_id,
            state: ToBtcState::Saved,
            data: data.clone(),
            address: request.address.clone(),
            amount_sat: request.amount,
            sats_per_vbyte,
            quoted_sats_per_vbyte: sats_per_vbyte,
            nonce,
            preferred_confirmation_target: request.confirmation_target,
            signature_expiry: signature.timeout,
            swap_fee_sat,
            swap_fee_in_token,
            quoted_network_fee_sat: network_fee_sat,
            quoted_network_fee_in_token: network_fee_in_token,
            real_network_fee_sat: None,
            real_network_fee_in_token: None,
            tx_id: None,
            raw_tx: None,
            secret: None,
            metadata,
            tx_ids: TxIds::default(),
        };
        swap.metadata.mark("swap.created");
        self.storage.put(&swap).await.map_err(ServiceError::from)?;

        Ok(OnchainQuoteResponse {
            amount: request.amount,
            network_fee: network_fee_in_token,
            swap_fee: swap_fee_in_token,
            total,
            address: contract.get_address(),
            data,
            prefix: signature.prefix,
            timeout: signature.timeout,
            signature: signature.signature,
        })
    }

    /// `POST /getQuoteCommit`: refresh the init authorization of a quote.
    pub async fn get_quote_commit(
        &self,
        chain: Option<&str>,
        payment_hash_hex: &str,
    ) -> std::result::Result<OnchainQuoteResponse, ServiceError> {
        let payment_hash = parse_payment_hash(payment_hash_hex)?;
        let (chain_id, chain) = self
            .registry
            .resolve(chain)
            .map_err(|_| ServiceError::invalid_chain())?;
        let identity = SwapIdentity::new(chain_id, payment_hash, 0);
        let swap = self
            .storage
            .get(&identity)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::new(codes::NOT_FOUND, "Swap not found"))?;
        if swap.state != ToBtcState::Saved {
            return Err(ServiceError::new(
                codes::ALREADY_COMMITTED,
                "Swap already committed",
            ));
        }

        let signature = chain
            .contract
            .get_init_signature(&swap.data, self.config.authorization_timeout_secs, None)
            .await
            .map_err(ServiceError::from)?;
        let mut swap = swap;
        swap.signature_expiry = signature.timeout;
        self.storage.put(&swap).await.map_err(ServiceError::from)?;

        Ok(OnchainQuoteResponse {
            amount: swap.amount_sat,
            network_fee: swap.quoted_network_fee_in_token,
            swap_fee: swap.swap_fee_in_token,
            total: swap.data.amount,
            address: chain.contract.get_address(),
            data: swap.data.clone(),
            prefix: signature.prefix,
            timeout: signature.timeout,
            signature: signature.signature,
        })
    }

    /// `POST /getRefundAuthorization`: sign a refund when the payout failed.
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

        match swap.state {
            ToBtcState::BtcSent | ToBtcState::Claimed => {
                return Err(
                    ServiceError::new(codes::ALREADY_PAID, "Bitcoin payment already sent")
                        .with_data(serde_json::json!({ "txId": swap.tx_id })),
                );
            }
            ToBtcState::BtcSending => {
                return Err(ServiceError::new(
                    codes::PAYMENT_IN_FLIGHT,
                    "Bitcoin payment in flight",
                ));
            }
            ToBtcState::NonPayable => {}
            _ => {
                return Err(ServiceError::new(
                    codes::NOT_COMMITTED,
                    "Payment not yet failed",
                ));
            }
        }

        if contract
            .get_commit_status(&swap.data)
            .await
            .map_err(ServiceError::from)?
            != CommitStatus::Committed
        {
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

    /// Assemble, sign and broadcast the Bitcoin payment for a committed swap.
    async fn send_bitcoin_payment(&self, mut swap: ToBtcSwap) -> Result<()> {
        let identity = swap.identity();
        let Some(_lock) = self.locks.lock(&identity, Duration::from_secs(120)) else {
            log::debug!("{identity}: contested, skipping");
            return Ok(());
        };
        if swap.state != ToBtcState::Commited {
            return Ok(());
        }

        let now = now_seconds();
        if swap.data.expiry.saturating_sub(now) < self.min_ts_confirm() {
            log::warn!("{identity}: not enough time to confirm payout, marking non-payable");
            self.transition(&mut swap, ToBtcState::NonPayable)?;
            return self.storage.put(&swap).await;
        }

        let destination = Address::from_str(&swap.address)
            .map_err(|e| Error::Bitcoin(format!("Stored address invalid: {e}")))?
            .require_network(self.network)
            .map_err(|e| Error::Bitcoin(format!("Stored address network mismatch: {e}")))?;
        let out_type =
            OutputType::of_script(&destination.script_pubkey()).unwrap_or(OutputType::P2wsh);

        // The quote is the cap: never pay more network fee than quoted.
        let utxos = self.wallet.get_utxos().await?;
        let mut selection = None;
        let mut rate = swap.sats_per_vbyte;
        while rate > 0 {
            let candidate = select_coins(&CoinSelectionRequest {
                target_sat: swap.amount_sat,
                output_vsize: out_type.vsize(),
                sats_per_vbyte: rate,
                change_type: OutputType::P2wpkh,
                required: vec![],
                candidates: utxos.clone(),
                order: self.config.coin_selection_order,
            });
            match candidate {
                Some(sel) if sel.fee_sat <= swap.quoted_network_fee_sat => {
                    selection = Some(sel);
                    break;
                }
                _ => rate /= 2,
            }
        }
        let Some(selection) = selection else {
            log::warn!("{identity}: cannot fund payout within quoted fee, marking non-payable");
            self.transition(&mut swap, ToBtcState::NonPayable)?;
            return self.storage.put(&swap).await;
        };

        let change_script = if selection.change_sat > 0 {
            Some(self.wallet.get_fresh_address().await?.script_pubkey())
        } else {
            None
        };
        let unsigned = build_payment_transaction(
            &selection,
            destination.script_pubkey(),
            swap.amount_sat,
            change_script,
            swap.nonce,
        )?;
        let signed = self
            .wallet
            .sign_transaction(unsigned, &selection.inputs)
            .await?;

        self.transition(&mut swap, ToBtcState::BtcSending)?;
        swap.tx_id = Some(signed.compute_txid().to_string());
        swap.raw_tx = Some(hex::encode(btc_serialize(&signed)));
        swap.real_network_fee_sat = Some(selection.fee_sat);
        if let Ok(token) = self.oracle.get_token_data(&swap.chain, &swap.data.token) {
            let token = token.clone();
            swap.real_network_fee_in_token = self
                .oracle
                .get_from_btc_swap_amount(selection.fee_sat, &token, true, None)
                .await
                .ok();
        }
        self.storage.put(&swap).await?;

        match self.btc_rpc.send_raw_transaction(&signed).await {
            Ok(txid) => {
                log::info!("{identity}: payout broadcast as {txid}");
                swap.metadata.mark("btc.broadcast");
                self.transition(&mut swap, ToBtcState::BtcSent)?;
                self.storage.put(&swap).await
            }
            Err(err) => {
                // Stay in BtcSending; the watchdog rebroadcasts or reselects.
                log::error!("{identity}: broadcast failed: {err}");
                Ok(())
            }
        }
    }

    /// Rebroadcast a stuck BtcSending swap, bumping fees within the cap.
    async fn retry_sending(&self, mut swap: ToBtcSwap) -> Result<()> {
        let identity = swap.identity();
        let Some(_lock) = self.locks.lock(&identity, Duration::from_secs(120)) else {
            return Ok(());
        };
        let Some(raw_hex) = swap.raw_tx.clone() else {
            // Never got as far as signing; restart from Commited.
            self.transition(&mut swap, ToBtcState::Commited)?;
            self.storage.put(&swap).await?;
            return Ok(());
        };

        let raw = hex::decode(&raw_hex).map_err(|e| Error::Bitcoin(e.to_string()))?;
        let tx: Transaction =
            btc_deserialize(&raw).map_err(|e| Error::Bitcoin(format!("Stored raw tx: {e}")))?;
        match self.btc_rpc.send_raw_transaction(&tx).await {
            Ok(_) => {
                self.transition(&mut swap, ToBtcState::BtcSent)?;
                self.storage.put(&swap).await
            }
            Err(err) => {
                log::warn!("{identity}: rebroadcast failed, restarting selection: {err}");
                // Inputs may be double-spent; drop the stale transaction and
                // rebuild at a bumped rate on the next pass. Bumps are capped
                // relative to the rate quoted to the client, and the quoted
                // network fee stays the hard cap on the total.
                let rate_cap =
                    swap.quoted_sats_per_vbyte * self.config.max_fee_bump_ppm / 1_000_000;
                let bumped = (swap.sats_per_vbyte + swap.sats_per_vbyte / 4 + 1)
                    .min(rate_cap)
                    .max(swap.sats_per_vbyte);
                swap.sats_per_vbyte = bumped;
                swap.raw_tx = None;
                swap.tx_id = None;
                self.transition(&mut swap, ToBtcState::Commited)?;
                self.storage.put(&swap).await
            }
        }
    }

    /// Track confirmations and claim the escrow once the payout confirmed.
    async fn check_sent(&self, mut swap: ToBtcSwap) -> Result<()> {
        let identity = swap.identity();
        let Some(txid_str) = swap.tx_id.clone() else {
            return Ok(());
        };
        let txid = Txid::from_str(&txid_str).map_err(|e| Error::Bitcoin(e.to_string()))?;

        let Some(info) = self.btc_rpc.get_transaction(&txid).await? else {
            let Some(_lock) = self.locks.lock(&identity, Duration::from_secs(120)) else {
                return Ok(());
            };
            // Evicted or double-spent by a competing transaction.
            log::warn!("{identity}: payout transaction vanished, restarting from commit");
            swap.tx_id = None;
            swap.raw_tx = None;
            self.transition(&mut swap, ToBtcState::Commited)?;
            return self.storage.put(&swap).await;
        };

        let required = match swap.data.kind {
            SwapKind::Chain { confirmations, .. } => confirmations,
            SwapKind::Htlc => self.config.confirmations,
        };
        if info.confirmations < required {
            return Ok(());
        }
        let (Some(blockhash), Some(blockheight)) = (info.blockhash, info.blockheight) else {
            return Ok(());
        };

        let Some(_lock) = self.locks.lock(&identity, Duration::from_secs(120)) else {
            return Ok(());
        };
        let block = self.btc_rpc.get_block(&blockhash).await?;
        let block_txids: Vec<Txid> = block.txdata.iter().map(|tx| tx.compute_txid()).collect();
        let proof = get_transaction_merkle(&txid, &block_txids, blockheight)?;
        let raw_tx = swap
            .raw_tx
            .as_deref()
            .map(hex::decode)
            .transpose()
            .map_err(|e| Error::Bitcoin(e.to_string()))?
            .unwrap_or_default();

        let contract = self.registry.contract(&swap.chain)?;
        let claim_tx = contract
            .claim_with_tx_data(&swap.data, &proof, &raw_tx)
            .await?;
        // The contract's secret for a chain swap is the reversed txid.
        swap.secret = Some(txid.to_byte_array());
        swap.tx_ids.claim = Some(claim_tx);
        self.transition(&mut swap, ToBtcState::Claimed)?;
        self.storage.put(&swap).await
    }

    async fn handle_event(&self, chain_id: &str, event: &ChainEvent) -> Result<()> {
        let identity = SwapIdentity::new(chain_id, *event.payment_hash(), event.sequence());

        match event {
            ChainEvent::Initialize(init) => {
                let contract = self.registry.contract(chain_id)?;
                if init.data.is_htlc() || init.data.claimer != contract.get_address() {
                    return Ok(());
                }
                let Some(mut swap) = self.storage.get(&identity).await? else {
                    return Ok(());
                };
                if swap.state != ToBtcState::Saved {
                    return Ok(());
                }
                swap.tx_ids.init = Some(init.tx_id.clone());
                self.transition(&mut swap, ToBtcState::Commited)?;
                self.storage.put(&swap).await?;
                self.send_bitcoin_payment(swap).await
            }
            ChainEvent::Claim(claim) => {
                if self.storage.get(&identity).await?.is_none() {
                    return Ok(());
                }
                log::info!(
                    "{identity}: claim observed (secret {}), removing",
                    hex::encode(claim.secret)
                );
                self.storage.remove(&identity).await
            }
            ChainEvent::Refund(_) => {
                if self.storage.get(&identity).await?.is_none() {
                    return Ok(());
                }
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
                ToBtcState::Saved => self.expire_saved(swap, now).await,
                ToBtcState::Commited => self.check_committed(swap, now).await,
                ToBtcState::BtcSending => self.retry_sending(swap).await,
                ToBtcState::BtcSent => self.check_sent(swap).await,
                ToBtcState::NonPayable => self.reap_non_payable(swap).await,
                _ => Ok(()),
            };
            if let Err(err) = result {
                log::error!("{identity}: watchdog step failed: {err}");
            }
        }
        Ok(())
    }

    async fn expire_saved(&self, mut swap: ToBtcSwap, now: u64) -> Result<()> {
        if swap.signature_expiry > now {
            return Ok(());
        }
        let contract = self.registry.contract(&swap.chain)?;
        if contract.get_commit_status(&swap.data).await? == CommitStatus::Committed {
            self.transition(&mut swap, ToBtcState::Commited)?;
            self.storage.put(&swap).await?;
            return Ok(());
        }
        log::info!("{}: quote expired, removing", swap.identity());
        self.storage.remove(&swap.identity()).await
    }

    /// Committed swaps either get paid or become refund candidates.
    async fn check_committed(&self, mut swap: ToBtcSwap, now: u64) -> Result<()> {
        if swap.data.expiry <= now {
            let Some(_lock) = self.locks.lock(&swap.identity(), Duration::from_secs(60)) else {
                return Ok(());
            };
            log::warn!("{}: escrow expired before payout", swap.identity());
            self.transition(&mut swap, ToBtcState::NonPayable)?;
            return self.storage.put(&swap).await;
        }
        self.send_bitcoin_payment(swap).await
    }

    async fn reap_non_payable(&self, swap: ToBtcSwap) -> Result<()> {
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

impl<S: SwapRecordStorage<ToBtcSwap> + 'static> SwapHandler for ToBtc<S> {
    fn name(&self) -> &'static str {
        "to_btc"
    }

    fn get_info(&self) -> SwapHandlerInfo {
        SwapHandlerInfo {
            swap_type: "to_btc".into(),
            min: self.config.fees.min_sat,
            max: self.config.fees.max_sat,
            base_fee: self.config.fees.base_fee_sat,
            fee_ppm: self.config.fees.fee_ppm,
            chain_tokens: super::registry_chain_tokens(&self.registry),
            data: serde_json::json!({
                "confirmations": self.config.confirmations,
                "minConfTarget": self.config.min_confirmation_target,
                "maxConfTarget": self.config.max_confirmation_target,
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
