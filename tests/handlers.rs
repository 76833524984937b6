//! End-to-end swap lifecycle tests against in-memory collaborators.

use swapgate::api::{
    ClaimerBountyParams, CreateInvoiceRequest, GetAddressRequest, InfoRequest,
    OnchainQuoteRequest, PayInvoiceRequest,
};
use swapgate::chain::{
    ChainEvent, ChainFuture, ChainRegistry, ClaimEvent, CommitStatus, InitializeEvent,
    RefundEvent, SignatureData, SwapContract, SwapData,
};
use swapgate::config::{
    FromBtcConfig, FromBtcLnConfig, TimingConfig, ToBtcConfig, ToBtcLnConfig,
};
use swapgate::error::codes;
use swapgate::lightning::{
    ChannelBalance, HoldInvoice, HoldInvoiceRequest, InvoiceState, LightningWallet, LnFuture,
    ParsedInvoice, PayRequest, PaymentStatus, ProbeResult,
};
use swapgate::merkle::TransactionMerkle;
use swapgate::swaps::SwapHandler;
use swapgate::types::now_seconds;
use swapgate::{
    BitcoinRpc, BitcoinWallet, CoinSelectionOrder, DepositKeys, FromBtc, FromBtcLn,
    MemorySwapStorage, PriceOracle, PriceProvider, SwapIdentity, ToBtc, ToBtcLn, WalletUtxo,
};

use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::hashes::Hash as _;
use bitcoin::pow::CompactTarget;
use bitcoin::{Address, Block, BlockHash, Transaction, TxMerkleNode, Txid};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CHAIN: &str = "EVM";
const TOKEN: &str = "0xToken";
const NATIVE: &str = "0xNative";
const INTERMEDIARY: &str = "0xIntermediary";
const USER: &str = "0xUser";

// ---------------------------------------------------------------------------
// Mock smart-chain contract
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockContractState {
    commits: HashMap<String, CommitStatus>,
    claims: Vec<(String, [u8; 32])>,
    tx_claims: Vec<String>,
    refunds: Vec<String>,
    balance: u128,
}

struct MockContract {
    state: Mutex<MockContractState>,
}

impl MockContract {
    fn new(balance: u128) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockContractState {
                balance,
                ..Default::default()
            }),
        })
    }

    fn key(data: &SwapData) -> String {
        format!("{}-{:x}", hex::encode(data.payment_hash), data.sequence)
    }

    fn set_committed(&self, data: &SwapData) {
        self.state
            .lock()
            .unwrap()
            .commits
            .insert(Self::key(data), CommitStatus::Committed);
    }

    fn claims(&self) -> Vec<(String, [u8; 32])> {
        self.state.lock().unwrap().claims.clone()
    }

    fn tx_claims(&self) -> Vec<String> {
        self.state.lock().unwrap().tx_claims.clone()
    }

    fn refunds(&self) -> Vec<String> {
        self.state.lock().unwrap().refunds.clone()
    }
}

impl SwapContract for MockContract {
    fn get_address(&self) -> String {
        INTERMEDIARY.to_string()
    }

    fn native_token_address(&self) -> String {
        NATIVE.to_string()
    }

    fn is_valid_address(&self, address: &str) -> bool {
        address.starts_with("0x")
    }

    fn get_commit_status(&self, data: &SwapData) -> ChainFuture<'_, CommitStatus> {
        let key = Self::key(data);
        Box::pin(async move {
            Ok(*self
                .state
                .lock()
                .unwrap()
                .commits
                .get(&key)
                .unwrap_or(&CommitStatus::NotCommitted))
        })
    }

    fn get_init_signature(
        &self,
        _data: &SwapData,
        auth_timeout_secs: u64,
        _fee_rate: Option<&str>,
    ) -> ChainFuture<'_, SignatureData> {
        Box::pin(async move {
            Ok(SignatureData {
                prefix: "claim_initialize".to_string(),
                timeout: now_seconds() + auth_timeout_secs,
                signature: "mock-init-signature".to_string(),
            })
        })
    }

    fn get_refund_signature(&self, _data: &SwapData) -> ChainFuture<'_, SignatureData> {
        Box::pin(async move {
            Ok(SignatureData {
                prefix: "refund".to_string(),
                timeout: now_seconds() + 600,
                signature: "mock-refund-signature".to_string(),
            })
        })
    }

    fn pre_fetch_sign_data(&self) -> ChainFuture<'_, serde_json::Value> {
        Box::pin(async move { Ok(serde_json::json!({ "blockhash": "0xabc" })) })
    }

    fn get_balance(&self, _token: &str) -> ChainFuture<'_, u128> {
        Box::pin(async move { Ok(self.state.lock().unwrap().balance) })
    }

    fn get_refund_fee(&self, _data: &SwapData) -> ChainFuture<'_, u128> {
        Box::pin(async move { Ok(1_000_000_000_000_000) })
    }

    fn has_raw_refund_fee(&self) -> bool {
        false
    }

    fn claim_with_secret(&self, data: &SwapData, secret: &[u8; 32]) -> ChainFuture<'_, String> {
        let key = Self::key(data);
        let secret = *secret;
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.claims.push((key.clone(), secret));
            state.commits.insert(key, CommitStatus::Paid);
            Ok("0xclaimtx".to_string())
        })
    }

    fn claim_with_tx_data(
        &self,
        data: &SwapData,
        _proof: &TransactionMerkle,
        _raw_tx: &[u8],
    ) -> ChainFuture<'_, String> {
        let key = Self::key(data);
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.tx_claims.push(key.clone());
            state.commits.insert(key, CommitStatus::Paid);
            Ok("0xclaimtx".to_string())
        })
    }

    fn refund(&self, data: &SwapData) -> ChainFuture<'_, String> {
        let key = Self::key(data);
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.refunds.push(key.clone());
            state.commits.insert(key, CommitStatus::NotCommitted);
            Ok("0xrefundtx".to_string())
        })
    }

    fn sign_message(&self, message: &[u8]) -> ChainFuture<'_, String> {
        let digest = hex::encode(&message[..8.min(message.len())]);
        Box::pin(async move { Ok(format!("signed:{digest}")) })
    }
}

// ---------------------------------------------------------------------------
// Mock Lightning node
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockLnState {
    invoices: HashMap<[u8; 32], HoldInvoice>,
    payments: HashMap<[u8; 32], PaymentStatus>,
    settled_preimages: Vec<[u8; 32]>,
    route_fee_msat: Option<u64>,
    local_msat: u64,
}

struct MockLightning {
    state: Mutex<MockLnState>,
}

impl MockLightning {
    fn new(local_msat: u64, route_fee_msat: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockLnState {
                local_msat,
                route_fee_msat,
                ..Default::default()
            }),
        })
    }

    /// Test invoice encoding: `lntest:<hash>:<amount_msat>:<expires_at>`.
    fn encode_invoice(payment_hash: [u8; 32], amount_msat: u64, expires_at: u64) -> String {
        format!(
            "lntest:{}:{}:{}",
            hex::encode(payment_hash),
            amount_msat,
            expires_at
        )
    }

    fn hold_htlc(&self, payment_hash: [u8; 32], cltv_remaining: u32) {
        let mut state = self.state.lock().unwrap();
        let invoice = state.invoices.get_mut(&payment_hash).unwrap();
        invoice.state = InvoiceState::Held;
        invoice.received_msat = invoice.amount_msat;
        invoice.htlc_cltv_remaining = Some(cltv_remaining);
    }

    fn expire_invoice(&self, payment_hash: [u8; 32]) {
        let mut state = self.state.lock().unwrap();
        state.invoices.get_mut(&payment_hash).unwrap().expires_at = now_seconds() - 1;
    }

    fn invoice_state(&self, payment_hash: [u8; 32]) -> Option<InvoiceState> {
        self.state
            .lock()
            .unwrap()
            .invoices
            .get(&payment_hash)
            .map(|i| i.state)
    }

    fn settled_preimages(&self) -> Vec<[u8; 32]> {
        self.state.lock().unwrap().settled_preimages.clone()
    }

    fn resolve_payment(&self, payment_hash: [u8; 32], status: PaymentStatus) {
        self.state
            .lock()
            .unwrap()
            .payments
            .insert(payment_hash, status);
    }
}

impl LightningWallet for MockLightning {
    fn parse_invoice(&self, bolt11: &str) -> LnFuture<'_, ParsedInvoice> {
        let bolt11 = bolt11.to_string();
        Box::pin(async move {
            let parts: Vec<&str> = bolt11.split(':').collect();
            if parts.len() != 4 || parts[0] != "lntest" {
                return Err(swapgate::Error::Lightning("bad invoice".into()));
            }
            let hash: [u8; 32] = hex::decode(parts[1])
                .map_err(|e| swapgate::Error::Lightning(e.to_string()))?
                .try_into()
                .map_err(|_| swapgate::Error::Lightning("bad hash".into()))?;
            Ok(ParsedInvoice {
                payment_hash: hash,
                amount_msat: Some(parts[2].parse().unwrap()),
                expires_at: parts[3].parse().unwrap(),
                destination: "mock-destination".to_string(),
            })
        })
    }

    fn create_hold_invoice(&self, request: HoldInvoiceRequest) -> LnFuture<'_, HoldInvoice> {
        Box::pin(async move {
            let expires_at = now_seconds() + request.expires_in_secs;
            let invoice = HoldInvoice {
                payment_hash: request.payment_hash,
                bolt11: Self::encode_invoice(request.payment_hash, request.amount_msat, expires_at),
                state: InvoiceState::Open,
                amount_msat: request.amount_msat,
                received_msat: 0,
                htlc_cltv_remaining: None,
                expires_at,
            };
            self.state
                .lock()
                .unwrap()
                .invoices
                .insert(request.payment_hash, invoice.clone());
            Ok(invoice)
        })
    }

    fn get_invoice(&self, payment_hash: &[u8; 32]) -> LnFuture<'_, Option<HoldInvoice>> {
        let hash = *payment_hash;
        Box::pin(async move { Ok(self.state.lock().unwrap().invoices.get(&hash).cloned()) })
    }

    fn cancel_hold_invoice(&self, payment_hash: &[u8; 32]) -> LnFuture<'_, ()> {
        let hash = *payment_hash;
        Box::pin(async move {
            if let Some(invoice) = self.state.lock().unwrap().invoices.get_mut(&hash) {
                invoice.state = InvoiceState::Canceled;
            }
            Ok(())
        })
    }

    fn settle_hold_invoice(&self, preimage: &[u8; 32]) -> LnFuture<'_, ()> {
        let preimage = *preimage;
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.settled_preimages.push(preimage);
            for invoice in state.invoices.values_mut() {
                if invoice.state == InvoiceState::Held {
                    invoice.state = InvoiceState::Settled;
                }
            }
            Ok(())
        })
    }

    fn pay(&self, request: PayRequest) -> LnFuture<'_, ()> {
        Box::pin(async move {
            let parts: Vec<&str> = request.bolt11.split(':').collect();
            let hash: [u8; 32] = hex::decode(parts[1]).unwrap().try_into().unwrap();
            self.state
                .lock()
                .unwrap()
                .payments
                .entry(hash)
                .or_insert(PaymentStatus::Pending);
            Ok(())
        })
    }

    fn get_payment(&self, payment_hash: &[u8; 32]) -> LnFuture<'_, PaymentStatus> {
        let hash = *payment_hash;
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .unwrap()
                .payments
                .get(&hash)
                .cloned()
                .unwrap_or(PaymentStatus::NotFound))
        })
    }

    fn wait_payment(&self, payment_hash: &[u8; 32]) -> LnFuture<'_, PaymentStatus> {
        let hash = *payment_hash;
        Box::pin(async move {
            loop {
                let status = self
                    .state
                    .lock()
                    .unwrap()
                    .payments
                    .get(&hash)
                    .cloned()
                    .unwrap_or(PaymentStatus::NotFound);
                match status {
                    PaymentStatus::Pending | PaymentStatus::NotFound => {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    final_status => return Ok(final_status),
                }
            }
        })
    }

    fn probe_route(
        &self,
        _bolt11: &str,
        max_fee_msat: u64,
        _max_timeout_height: u32,
    ) -> LnFuture<'_, Option<ProbeResult>> {
        Box::pin(async move {
            let fee = self.state.lock().unwrap().route_fee_msat;
            Ok(fee.filter(|f| *f <= max_fee_msat).map(|fee_msat| ProbeResult {
                fee_msat,
                confidence: 0.95,
            }))
        })
    }

    fn get_block_height(&self) -> LnFuture<'_, u32> {
        Box::pin(async move { Ok(800_000) })
    }

    fn get_channel_balance(&self) -> LnFuture<'_, ChannelBalance> {
        Box::pin(async move {
            Ok(ChannelBalance {
                local_msat: self.state.lock().unwrap().local_msat,
                remote_msat: 0,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Mock Bitcoin wallet + RPC
// ---------------------------------------------------------------------------

struct MockWallet {
    keys: DepositKeys,
    next_index: AtomicU32,
    utxos: Mutex<Vec<WalletUtxo>>,
}

impl MockWallet {
    fn new(utxo_values: &[u64]) -> Arc<Self> {
        let keys = DepositKeys::generate(bitcoin::Network::Regtest, 12).unwrap();
        let utxos = utxo_values
            .iter()
            .enumerate()
            .map(|(i, value)| WalletUtxo {
                outpoint: bitcoin::OutPoint {
                    txid: Txid::from_byte_array([0x42; 32]),
                    vout: i as u32,
                },
                value_sat: *value,
                script_pubkey: keys.derive_address(1000 + i as u32).unwrap().script_pubkey(),
                confirmations: 6,
            })
            .collect();
        Arc::new(Self {
            keys,
            next_index: AtomicU32::new(0),
            utxos: Mutex::new(utxos),
        })
    }
}

impl BitcoinWallet for MockWallet {
    fn get_fresh_address(&self) -> swapgate::bitcoin_rpc::BtcFuture<'_, Address> {
        Box::pin(async move {
            let index = self.next_index.fetch_add(1, Ordering::SeqCst);
            self.keys.derive_address(index)
        })
    }

    fn get_utxos(&self) -> swapgate::bitcoin_rpc::BtcFuture<'_, Vec<WalletUtxo>> {
        Box::pin(async move { Ok(self.utxos.lock().unwrap().clone()) })
    }

    fn get_balance(&self) -> swapgate::bitcoin_rpc::BtcFuture<'_, u64> {
        Box::pin(async move { Ok(self.utxos.lock().unwrap().iter().map(|u| u.value_sat).sum()) })
    }

    fn get_fee_rate(&self, _conf_target: u32) -> swapgate::bitcoin_rpc::BtcFuture<'_, u64> {
        Box::pin(async move { Ok(2) })
    }

    fn sign_transaction(
        &self,
        unsigned: Transaction,
        _spent: &[WalletUtxo],
    ) -> swapgate::bitcoin_rpc::BtcFuture<'_, Transaction> {
        Box::pin(async move { Ok(unsigned) })
    }
}

#[derive(Default)]
struct MockRpcState {
    broadcast: Vec<Transaction>,
    confirmations: HashMap<Txid, u32>,
    blocks: HashMap<BlockHash, Block>,
    tx_block: HashMap<Txid, (BlockHash, u32)>,
}

struct MockBitcoinRpc {
    state: Mutex<MockRpcState>,
}

impl MockBitcoinRpc {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockRpcState::default()),
        })
    }

    fn broadcast_txs(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().broadcast.clone()
    }

    /// Mine the given transaction into a single-tx block.
    fn confirm(&self, tx: &Transaction, confirmations: u32, height: u32) {
        let header = Header {
            version: BlockVersion::ONE,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 0,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce: 0,
        };
        let block = Block {
            header,
            txdata: vec![tx.clone()],
        };
        let hash = block.block_hash();
        let mut state = self.state.lock().unwrap();
        let txid = tx.compute_txid();
        state.confirmations.insert(txid, confirmations);
        state.tx_block.insert(txid, (hash, height));
        state.blocks.insert(hash, block);
    }
}

impl BitcoinRpc for MockBitcoinRpc {
    fn get_tip_height(&self) -> swapgate::bitcoin_rpc::BtcFuture<'_, u32> {
        Box::pin(async move { Ok(800_000) })
    }

    fn get_block_hash(&self, _height: u32) -> swapgate::bitcoin_rpc::BtcFuture<'_, BlockHash> {
        Box::pin(async move { Ok(BlockHash::all_zeros()) })
    }

    fn get_block_header(
        &self,
        hash: &BlockHash,
    ) -> swapgate::bitcoin_rpc::BtcFuture<'_, Header> {
        let hash = *hash;
        Box::pin(async move {
            self.state
                .lock()
                .unwrap()
                .blocks
                .get(&hash)
                .map(|b| b.header)
                .ok_or(swapgate::Error::Bitcoin("unknown block".into()))
        })
    }

    fn get_block(&self, hash: &BlockHash) -> swapgate::bitcoin_rpc::BtcFuture<'_, Block> {
        let hash = *hash;
        Box::pin(async move {
            self.state
                .lock()
                .unwrap()
                .blocks
                .get(&hash)
                .cloned()
                .ok_or(swapgate::Error::Bitcoin("unknown block".into()))
        })
    }

    fn get_transaction(
        &self,
        txid: &Txid,
    ) -> swapgate::bitcoin_rpc::BtcFuture<'_, Option<swapgate::bitcoin_rpc::BtcTxInfo>> {
        let txid = *txid;
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            if !state.broadcast.iter().any(|tx| tx.compute_txid() == txid) {
                return Ok(None);
            }
            let confirmations = *state.confirmations.get(&txid).unwrap_or(&0);
            let (blockhash, blockheight) = state
                .tx_block
                .get(&txid)
                .map(|(h, height)| (Some(*h), Some(*height)))
                .unwrap_or((None, None));
            Ok(Some(swapgate::bitcoin_rpc::BtcTxInfo {
                txid,
                confirmations,
                blockhash,
                blockheight,
            }))
        })
    }

    fn estimate_fee(&self, _conf_target: u32) -> swapgate::bitcoin_rpc::BtcFuture<'_, u64> {
        Box::pin(async move { Ok(2) })
    }

    fn send_raw_transaction(
        &self,
        tx: &Transaction,
    ) -> swapgate::bitcoin_rpc::BtcFuture<'_, Txid> {
        let tx = tx.clone();
        Box::pin(async move {
            let txid = tx.compute_txid();
            self.state.lock().unwrap().broadcast.push(tx);
            Ok(txid)
        })
    }

    fn get_sync_info(&self) -> swapgate::bitcoin_rpc::BtcFuture<'_, swapgate::BtcSyncInfo> {
        Box::pin(async move {
            Ok(swapgate::BtcSyncInfo {
                synced: true,
                ibd: true,
                verification_progress: 1.0,
                blockheight: 800_000,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct NoProvider;

impl PriceProvider for NoProvider {
    fn fetch_price(&self, coin_id: &str) -> swapgate::price::PriceFuture<'_, u128> {
        let coin_id = coin_id.to_string();
        Box::pin(async move { Err(swapgate::Error::Price(format!("no live price: {coin_id}"))) })
    }
}

fn oracle() -> Arc<PriceOracle> {
    Arc::new(PriceOracle::new(
        Arc::new(NoProvider),
        vec![
            swapgate::TokenData {
                chain: CHAIN.into(),
                address: TOKEN.into(),
                // 1 sat per whole token (6 decimals)
                coin_id: "$fixed-1000".into(),
                decimals: 6,
            },
            swapgate::TokenData {
                chain: CHAIN.into(),
                address: NATIVE.into(),
                // 1e6 sat per whole token (18 decimals)
                coin_id: "$fixed-1000000000".into(),
                decimals: 18,
            },
        ],
    ))
}

fn registry(contract: Arc<MockContract>) -> Arc<ChainRegistry> {
    let mut registry = ChainRegistry::new(CHAIN);
    registry.register(
        CHAIN,
        contract,
        vec![TOKEN.to_string(), NATIVE.to_string()],
    );
    Arc::new(registry)
}

fn timing() -> TimingConfig {
    TimingConfig {
        bitcoin_blocktime_secs: 600,
        safety_factor: 1,
        grace_period_secs: 600,
    }
}

fn from_btc_ln_config() -> FromBtcLnConfig {
    let mut config = FromBtcLnConfig::sane_defaults();
    config.timing = timing();
    config
}

fn to_btc_ln_config() -> ToBtcLnConfig {
    let mut config = ToBtcLnConfig::sane_defaults();
    config.timing = timing();
    config.min_send_cltv = 5;
    config
}

fn to_btc_config() -> ToBtcConfig {
    let mut config = ToBtcConfig::sane_defaults();
    config.timing = timing();
    config.confirmations = 2;
    config.coin_selection_order = CoinSelectionOrder::ScoreSort;
    config
}

fn initialize_event(data: &SwapData) -> ChainEvent {
    ChainEvent::Initialize(InitializeEvent {
        payment_hash: data.payment_hash,
        sequence: data.sequence,
        tx_id: "0xinit".to_string(),
        data: data.clone(),
    })
}

fn claim_event(data: &SwapData, secret: [u8; 32]) -> ChainEvent {
    ChainEvent::Claim(ClaimEvent {
        payment_hash: data.payment_hash,
        sequence: data.sequence,
        secret,
        tx_id: "0xclaim".to_string(),
    })
}

fn bounty() -> ClaimerBountyParams {
    ClaimerBountyParams {
        fee_per_block: 50,
        safety_factor: 2,
        start_timestamp: now_seconds(),
        add_block: 10,
        add_fee: 1_000,
    }
}

// ---------------------------------------------------------------------------
// FromBtcLn scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn from_btc_ln_happy_path() {
    let contract = MockContract::new(u128::MAX / 2);
    let ln = MockLightning::new(0, None);
    let storage = Arc::new(MemorySwapStorage::new());
    let handler = FromBtcLn::new(
        registry(contract.clone()),
        storage.clone(),
        oracle(),
        ln.clone(),
        from_btc_ln_config(),
    );

    let payment_hash = [0xaa; 32];
    let response = handler
        .create_invoice(CreateInvoiceRequest {
            address: USER.into(),
            payment_hash: hex::encode(payment_hash),
            amount: 10_000,
            token: TOKEN.into(),
            description_hash: None,
            chain: None,
        })
        .await
        .unwrap();
    assert_eq!(response.intermediary_key, INTERMEDIARY);
    assert!(response.total > 0);
    assert_eq!(storage.len(), 1);

    // The payer's HTLC arrives with plenty of CLTV budget.
    ln.hold_htlc(payment_hash, 149);
    let auth = handler
        .get_invoice_payment_auth(&hex::encode(payment_hash))
        .await
        .unwrap();
    assert_eq!(auth.signature, "mock-init-signature");
    assert_eq!(auth.data.offerer, INTERMEDIARY);
    assert_eq!(auth.data.claimer, USER);

    // Asking again returns the stored authorization.
    let again = handler
        .get_invoice_payment_auth(&hex::encode(payment_hash))
        .await
        .unwrap();
    assert_eq!(again.signature, auth.signature);

    contract.set_committed(&auth.data);
    handler
        .process_event(CHAIN, &initialize_event(&auth.data))
        .await
        .unwrap();

    let secret = [0xbb; 32];
    handler
        .process_event(CHAIN, &claim_event(&auth.data, secret))
        .await
        .unwrap();

    assert_eq!(ln.settled_preimages(), vec![secret]);
    assert_eq!(ln.invoice_state(payment_hash), Some(InvoiceState::Settled));
    assert_eq!(storage.len(), 0, "settled swap must be removed");

    // Re-delivering the claim for a removed swap is a no-op.
    handler
        .process_event(CHAIN, &claim_event(&auth.data, secret))
        .await
        .unwrap();
    assert_eq!(ln.settled_preimages().len(), 1);
}

#[tokio::test]
async fn from_btc_ln_invoice_timeout() {
    let contract = MockContract::new(u128::MAX / 2);
    let ln = MockLightning::new(0, None);
    let storage = Arc::new(MemorySwapStorage::new());
    let handler = FromBtcLn::new(
        registry(contract),
        storage.clone(),
        oracle(),
        ln.clone(),
        from_btc_ln_config(),
    );

    let payment_hash = [0xab; 32];
    handler
        .create_invoice(CreateInvoiceRequest {
            address: USER.into(),
            payment_hash: hex::encode(payment_hash),
            amount: 10_000,
            token: TOKEN.into(),
            description_hash: None,
            chain: None,
        })
        .await
        .unwrap();

    ln.expire_invoice(payment_hash);
    handler.check_past_swaps().await.unwrap();

    assert_eq!(storage.len(), 0);
    assert_eq!(ln.invoice_state(payment_hash), Some(InvoiceState::Canceled));
}

#[tokio::test]
async fn from_btc_ln_duplicate_payment_hash_rejected() {
    let contract = MockContract::new(u128::MAX / 2);
    let ln = MockLightning::new(0, None);
    let storage = Arc::new(MemorySwapStorage::new());
    let handler = FromBtcLn::new(
        registry(contract),
        storage.clone(),
        oracle(),
        ln,
        from_btc_ln_config(),
    );

    let request = CreateInvoiceRequest {
        address: USER.into(),
        payment_hash: hex::encode([0xac; 32]),
        amount: 10_000,
        token: TOKEN.into(),
        description_hash: None,
        chain: None,
    };
    handler.create_invoice(request.clone()).await.unwrap();
    let err = handler.create_invoice(request).await.unwrap_err();
    assert_eq!(err.code, codes::ALREADY_COMMITTED);
    assert_eq!(storage.len(), 1, "must never double-create");
}

#[tokio::test]
async fn from_btc_ln_insufficient_balance() {
    let contract = MockContract::new(100);
    let ln = MockLightning::new(0, None);
    let handler = FromBtcLn::new(
        registry(contract),
        Arc::new(MemorySwapStorage::new()),
        oracle(),
        ln,
        from_btc_ln_config(),
    );

    let err = handler
        .create_invoice(CreateInvoiceRequest {
            address: USER.into(),
            payment_hash: hex::encode([0xad; 32]),
            amount: 10_000,
            token: TOKEN.into(),
            description_hash: None,
            chain: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::NOT_ENOUGH_LIQUIDITY);
}

// ---------------------------------------------------------------------------
// ToBtcLn scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn to_btc_ln_no_route() {
    let contract = MockContract::new(u128::MAX / 2);
    let ln = MockLightning::new(1_000_000_000_000, None);
    let storage = Arc::new(MemorySwapStorage::new());
    let handler = ToBtcLn::new(
        registry(contract),
        storage.clone(),
        oracle(),
        ln,
        to_btc_ln_config(),
    );

    let payment_hash = [0xba; 32];
    let pr = MockLightning::encode_invoice(payment_hash, 200_000_000, now_seconds() + 3600);
    let err = handler
        .pay_invoice(PayInvoiceRequest {
            pr,
            max_fee: 500,
            expiry_timestamp: now_seconds() + 7200,
            token: TOKEN.into(),
            offerer: USER.into(),
            chain: None,
        })
        .await
        .unwrap_err();

    assert_eq!(err.code, codes::NOT_ENOUGH_TIME);
    assert_eq!(storage.len(), 0, "no swap may be persisted without a route");
}

#[tokio::test]
async fn to_btc_ln_happy_path() {
    let contract = MockContract::new(u128::MAX / 2);
    let ln = MockLightning::new(1_000_000_000_000, Some(400_000));
    let storage = Arc::new(MemorySwapStorage::new());
    let handler = ToBtcLn::new(
        registry(contract.clone()),
        storage.clone(),
        oracle(),
        ln.clone(),
        to_btc_ln_config(),
    );

    let payment_hash = [0xbc; 32];
    let pr = MockLightning::encode_invoice(payment_hash, 50_000_000, now_seconds() + 3600);
    let response = handler
        .pay_invoice(PayInvoiceRequest {
            pr,
            max_fee: 500,
            expiry_timestamp: now_seconds() + 7200,
            token: TOKEN.into(),
            offerer: USER.into(),
            chain: None,
        })
        .await
        .unwrap();
    assert!(response.confidence > 0.0);
    assert_eq!(storage.len(), 1);

    contract.set_committed(&response.data);
    handler
        .process_event(CHAIN, &initialize_event(&response.data))
        .await
        .unwrap();

    // The dispatched payment confirms with the invoice preimage.
    let preimage = [0xcd; 32];
    ln.resolve_payment(
        payment_hash,
        PaymentStatus::Confirmed {
            preimage,
            fee_msat: 320_000,
        },
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    let claims = contract.claims();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].1, preimage);

    // The Claim event finishes the swap.
    handler
        .process_event(CHAIN, &claim_event(&response.data, preimage))
        .await
        .unwrap();
    assert_eq!(storage.len(), 0);
}

#[tokio::test]
async fn to_btc_ln_amount_bounds() {
    let contract = MockContract::new(u128::MAX / 2);
    let ln = MockLightning::new(1_000_000_000_000, Some(100_000));
    let handler = ToBtcLn::new(
        registry(contract),
        Arc::new(MemorySwapStorage::new()),
        oracle(),
        ln,
        to_btc_ln_config(),
    );

    // Below 0.95 * min (min = 1_000 sat).
    let pr = MockLightning::encode_invoice([0xbd; 32], 900_000, now_seconds() + 3600);
    let err = handler
        .pay_invoice(PayInvoiceRequest {
            pr,
            max_fee: 10,
            expiry_timestamp: now_seconds() + 7200,
            token: TOKEN.into(),
            offerer: USER.into(),
            chain: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::AMOUNT_TOO_LOW);
    let data = err.data.unwrap();
    assert!(data["min"].is_string() && data["max"].is_string());

    // Above 1.05 * max (max = 1_000_000 sat).
    let pr = MockLightning::encode_invoice([0xbe; 32], 1_100_000_000, now_seconds() + 3600);
    let err = handler
        .pay_invoice(PayInvoiceRequest {
            pr,
            max_fee: 10,
            expiry_timestamp: now_seconds() + 7200,
            token: TOKEN.into(),
            offerer: USER.into(),
            chain: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::AMOUNT_TOO_HIGH);
}

// ---------------------------------------------------------------------------
// ToBtc scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn to_btc_quote_send_confirm_claim() {
    let contract = MockContract::new(u128::MAX / 2);
    let wallet = MockWallet::new(&[10_000_000]);
    let rpc = MockBitcoinRpc::new();
    let storage = Arc::new(MemorySwapStorage::new());
    let handler = ToBtc::new(
        registry(contract.clone()),
        storage.clone(),
        oracle(),
        rpc.clone(),
        wallet.clone(),
        bitcoin::Network::Regtest,
        to_btc_config(),
    );

    let destination = wallet.keys.derive_address(9_999).unwrap();
    let response = handler
        .get_quote(OnchainQuoteRequest {
            address: destination.to_string(),
            amount: 250_000,
            token: TOKEN.into(),
            offerer: USER.into(),
            confirmation_target: 3,
            expiry_timestamp: now_seconds() + 7200,
            chain: None,
        })
        .await
        .unwrap();
    assert!(response.network_fee > 0);
    assert_eq!(storage.len(), 1);

    contract.set_committed(&response.data);
    handler
        .process_event(CHAIN, &initialize_event(&response.data))
        .await
        .unwrap();

    // Broadcast happened and pays the right script/amount.
    let broadcast = rpc.broadcast_txs();
    assert_eq!(broadcast.len(), 1);
    let payment = &broadcast[0];
    assert_eq!(payment.output[0].value.to_sat(), 250_000);
    assert_eq!(payment.output[0].script_pubkey, destination.script_pubkey());

    // Confirm it and let the watchdog claim with the Merkle proof.
    rpc.confirm(payment, 2, 800_001);
    handler.check_past_swaps().await.unwrap();
    assert_eq!(contract.tx_claims().len(), 1);

    let reversed_txid = payment.compute_txid().to_byte_array();
    handler
        .process_event(CHAIN, &claim_event(&response.data, reversed_txid))
        .await
        .unwrap();
    assert_eq!(storage.len(), 0);
}

#[tokio::test]
async fn to_btc_insufficient_wallet_funds() {
    let contract = MockContract::new(u128::MAX / 2);
    let wallet = MockWallet::new(&[1_000]);
    let rpc = MockBitcoinRpc::new();
    let handler = ToBtc::new(
        registry(contract),
        Arc::new(MemorySwapStorage::new()),
        oracle(),
        rpc,
        wallet.clone(),
        bitcoin::Network::Regtest,
        to_btc_config(),
    );

    let destination = wallet.keys.derive_address(9_999).unwrap();
    let err = handler
        .get_quote(OnchainQuoteRequest {
            address: destination.to_string(),
            amount: 250_000,
            token: TOKEN.into(),
            offerer: USER.into(),
            confirmation_target: 3,
            expiry_timestamp: now_seconds() + 7200,
            chain: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::NOT_ENOUGH_LIQUIDITY);
}

// ---------------------------------------------------------------------------
// FromBtc scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn from_btc_happy_path() {
    let contract = MockContract::new(u128::MAX / 2);
    let wallet = MockWallet::new(&[]);
    let storage = Arc::new(MemorySwapStorage::new());
    let handler = FromBtc::new(
        registry(contract.clone()),
        storage.clone(),
        oracle(),
        wallet,
        FromBtcConfig::sane_defaults(),
    );

    let response = handler
        .get_address(GetAddressRequest {
            address: USER.into(),
            amount: 1_000_000,
            token: TOKEN.into(),
            sequence: 1,
            exact_out: false,
            claimer_bounty: bounty(),
            fee_rate: None,
            chain: None,
        })
        .await
        .unwrap();
    assert!(response.btc_address.starts_with("bcrt1q"));
    assert_eq!(response.amount, 1_000_000);
    assert!(response.data.security_deposit > 0);
    assert!(response.data.claimer_bounty > 0);
    assert!(response.sign_data_prefetch.is_some());
    assert_eq!(storage.len(), 1);

    contract.set_committed(&response.data);
    handler
        .process_event(CHAIN, &initialize_event(&response.data))
        .await
        .unwrap();

    // Claim secret is the reversed txid of the deposit transaction.
    let mut reversed = [0u8; 32];
    reversed[0] = 0x99;
    handler
        .process_event(CHAIN, &claim_event(&response.data, reversed))
        .await
        .unwrap();
    assert_eq!(storage.len(), 0);
}

#[tokio::test]
async fn from_btc_issues_fresh_address_per_request() {
    let contract = MockContract::new(u128::MAX / 2);
    let wallet = MockWallet::new(&[]);
    let storage = Arc::new(MemorySwapStorage::new());
    let handler = FromBtc::new(
        registry(contract),
        storage.clone(),
        oracle(),
        wallet,
        FromBtcConfig::sane_defaults(),
    );

    let request = GetAddressRequest {
        address: USER.into(),
        amount: 1_000_000,
        token: TOKEN.into(),
        sequence: 7,
        exact_out: false,
        claimer_bounty: bounty(),
        fee_rate: None,
        chain: None,
    };
    let first = handler.get_address(request.clone()).await.unwrap();
    let second = handler.get_address(request).await.unwrap();

    // A fresh deposit address means a fresh payment hash; both coexist.
    assert_ne!(first.btc_address, second.btc_address);
    assert_ne!(first.data.payment_hash, second.data.payment_hash);
    assert_eq!(storage.len(), 2);
}

#[tokio::test]
async fn from_btc_expired_commit_is_refunded() {
    let contract = MockContract::new(u128::MAX / 2);
    let wallet = MockWallet::new(&[]);
    let storage = Arc::new(MemorySwapStorage::new());
    let mut config = FromBtcConfig::sane_defaults();
    config.swap_timeout_secs = 0;
    let handler = FromBtc::new(
        registry(contract.clone()),
        storage.clone(),
        oracle(),
        wallet,
        config,
    );

    let response = handler
        .get_address(GetAddressRequest {
            address: USER.into(),
            amount: 1_000_000,
            token: TOKEN.into(),
            sequence: 2,
            exact_out: false,
            claimer_bounty: bounty(),
            fee_rate: None,
            chain: None,
        })
        .await
        .unwrap();

    contract.set_committed(&response.data);
    handler
        .process_event(CHAIN, &initialize_event(&response.data))
        .await
        .unwrap();

    handler.check_past_swaps().await.unwrap();
    assert_eq!(contract.refunds().len(), 1);
    assert_eq!(storage.len(), 0);
}

// ---------------------------------------------------------------------------
// Info + refund events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn info_envelope_binds_nonce_and_lists_handlers() {
    let contract = MockContract::new(u128::MAX / 2);
    let ln = MockLightning::new(0, None);
    let registry = registry(contract);
    let from_btc_ln = FromBtcLn::new(
        registry.clone(),
        Arc::new(MemorySwapStorage::new()),
        oracle(),
        ln,
        from_btc_ln_config(),
    );

    let info = swapgate::InfoHandler::new(
        registry,
        vec![from_btc_ln as Arc<dyn SwapHandler>],
    );
    let response = info
        .get_info(InfoRequest {
            nonce: "deadbeef".into(),
        })
        .await
        .unwrap();

    assert!(response.envelope.contains("deadbeef"));
    assert!(response.envelope.contains("from_btc_ln"));
    assert_eq!(response.address, INTERMEDIARY);
    assert!(response.signature.starts_with("signed:"));
    assert!(response.chains.contains_key(CHAIN));

    let bad = info
        .get_info(InfoRequest {
            nonce: "not-hex!".into(),
        })
        .await;
    assert!(bad.is_err());
}

#[tokio::test]
async fn refund_event_removes_swap_and_cancels_invoice() {
    let contract = MockContract::new(u128::MAX / 2);
    let ln = MockLightning::new(0, None);
    let storage = Arc::new(MemorySwapStorage::new());
    let handler = FromBtcLn::new(
        registry(contract.clone()),
        storage.clone(),
        oracle(),
        ln.clone(),
        from_btc_ln_config(),
    );

    let payment_hash = [0xaf; 32];
    handler
        .create_invoice(CreateInvoiceRequest {
            address: USER.into(),
            payment_hash: hex::encode(payment_hash),
            amount: 10_000,
            token: TOKEN.into(),
            description_hash: None,
            chain: None,
        })
        .await
        .unwrap();
    ln.hold_htlc(payment_hash, 149);
    let auth = handler
        .get_invoice_payment_auth(&hex::encode(payment_hash))
        .await
        .unwrap();
    handler
        .process_event(CHAIN, &initialize_event(&auth.data))
        .await
        .unwrap();

    handler
        .process_event(
            CHAIN,
            &ChainEvent::Refund(RefundEvent {
                payment_hash,
                sequence: 0,
                tx_id: "0xrefund".into(),
            }),
        )
        .await
        .unwrap();

    assert_eq!(storage.len(), 0);
    assert_eq!(ln.invoice_state(payment_hash), Some(InvoiceState::Canceled));
}

// ---------------------------------------------------------------------------
// Storage identity collision
// ---------------------------------------------------------------------------

#[test]
fn identities_with_same_hash_different_sequence_coexist() {
    // Sequence participates in the storage key.
    let a = SwapIdentity::new(CHAIN, [1u8; 32], 1);
    let b = SwapIdentity::new(CHAIN, [1u8; 32], 2);
    assert_ne!(a.storage_key(), b.storage_key());
    assert_eq!(
        a.storage_key(),
        format!("{}-1", hex::encode([1u8; 32]))
    );
}
