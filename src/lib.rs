//! swapgate - cross-chain atomic swap intermediary, server core.
//!
//! The swap lifecycle engine of an intermediary bridging Bitcoin (on-chain
//! and Lightning) with smart-contract chains: four per-direction state
//! machines plus the coordination primitives around them, from chain-event
//! dispatch and hold-invoice management to signature pre-fetching, watchdog
//! reconciliation, security-deposit and fee math, and the price oracle.
//!
//! Chain RPC, the Lightning node, the Bitcoin backend and durable storage
//! are consumed through traits; plug in adapters for your deployment:
//!
//! ```rust,ignore
//! use swapgate::{ChainRegistry, FromBtcLn, MemorySwapStorage, PriceOracle};
//!
//! let mut registry = ChainRegistry::new("EVM");
//! registry.register("EVM", my_contract, tokens);
//!
//! let handler = FromBtcLn::new(registry, storage, oracle, lightning, config);
//! ```

pub mod api;
pub mod bitcoin_rpc;
pub mod bitcoin_wallet;
pub mod chain;
pub mod config;
pub mod error;
pub mod hd_keys;
pub mod lightning;
pub mod lock;
pub mod merkle;
pub mod prefetch;
pub mod price;
pub mod storage;
pub mod swaps;
pub mod types;

pub use bitcoin_rpc::{BitcoinRpc, BtcSyncInfo};
pub use bitcoin_wallet::{BitcoinWallet, CoinSelectionOrder, WalletUtxo};
pub use chain::{ChainEvent, ChainRegistry, CommitStatus, SwapContract, SwapData, SwapKind};
pub use error::{Error, Result, ServiceError};
pub use hd_keys::DepositKeys;
pub use lightning::{HoldInvoice, InvoiceState, LightningWallet, PaymentStatus};
pub use lock::SwapLockMap;
pub use prefetch::{AbortHandle, AbortSignal, Prefetch, PrefetchGroup};
pub use price::{CoinGeckoProvider, PriceOracle, PriceProvider, TokenData};
pub use storage::{StoredSwap, SwapRecordStorage, memory::MemorySwapStorage};
pub use swaps::from_btc::{FromBtc, FromBtcState, FromBtcSwap};
pub use swaps::from_btc_ln::{FromBtcLn, FromBtcLnState, FromBtcLnSwap};
pub use swaps::info::InfoHandler;
pub use swaps::to_btc::{ToBtc, ToBtcState, ToBtcSwap};
pub use swaps::to_btc_ln::{ToBtcLn, ToBtcLnState, ToBtcLnSwap};
pub use swaps::{EventDispatcher, SwapHandler, SwapHandlerInfo, start_watchdog};
pub use types::{Network, SwapIdentity};
