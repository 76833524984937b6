//! Bitcoin wallet interface and coin selection.
//!
//! The wallet driver owns keys and UTXOs; the core runs coin selection to
//! quote network fees and to assemble outbound payments. Two strategies run
//! in order: blackjack (no change output) and accumulative (greedy fill plus
//! change), with required inputs always included first.

use crate::bitcoin_rpc::BtcFuture;
use crate::error::{Error, Result};
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Transaction overhead in virtual bytes (version, locktime, counts, segwit
/// marker).
const TX_BASE_VSIZE: u64 = 11;

/// Virtual size of one P2WPKH input (the wallet's only input type).
const INPUT_VSIZE: u64 = 68;

/// A spendable wallet output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletUtxo {
    pub outpoint: OutPoint,
    pub value_sat: u64,
    pub script_pubkey: ScriptBuf,
    pub confirmations: u32,
}

/// Output script classes the wallet pays to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    P2wpkh,
    P2sh,
    P2pkh,
    P2wsh,
    P2tr,
}

impl OutputType {
    /// Virtual size of one output of this type.
    pub fn vsize(self) -> u64 {
        match self {
            OutputType::P2wpkh => 31,
            OutputType::P2sh => 32,
            OutputType::P2pkh => 34,
            OutputType::P2wsh => 43,
            OutputType::P2tr => 43,
        }
    }

    /// Dust threshold for outputs of this type, in satoshi.
    pub fn dust_threshold(self) -> u64 {
        match self {
            OutputType::P2wpkh => 294,
            OutputType::P2sh => 540,
            OutputType::P2pkh => 546,
            OutputType::P2wsh => 330,
            OutputType::P2tr => 330,
        }
    }

    /// Classify a script pubkey.
    pub fn of_script(script: &ScriptBuf) -> Option<Self> {
        if script.is_p2wpkh() {
            Some(OutputType::P2wpkh)
        } else if script.is_p2sh() {
            Some(OutputType::P2sh)
        } else if script.is_p2pkh() {
            Some(OutputType::P2pkh)
        } else if script.is_p2wsh() {
            Some(OutputType::P2wsh)
        } else if script.is_p2tr() {
            Some(OutputType::P2tr)
        } else {
            None
        }
    }
}

/// Candidate ordering before selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinSelectionOrder {
    /// Shuffle candidates uniformly.
    #[default]
    Randomize,
    /// Largest effective value first.
    ScoreSort,
}

/// Inputs for one coin-selection run.
#[derive(Debug, Clone)]
pub struct CoinSelectionRequest {
    /// Payment amount in satoshi (sum over payment outputs).
    pub target_sat: u64,
    /// Total virtual size of the payment outputs.
    pub output_vsize: u64,
    /// Fee rate in satoshi per virtual byte.
    pub sats_per_vbyte: u64,
    /// Script class of a change output, determining its size and dust cutoff.
    pub change_type: OutputType,
    /// Inputs that must be spent regardless of value.
    pub required: Vec<WalletUtxo>,
    /// Free candidates.
    pub candidates: Vec<WalletUtxo>,
    pub order: CoinSelectionOrder,
}

/// Result of a successful selection.
#[derive(Debug, Clone)]
pub struct CoinSelection {
    pub inputs: Vec<WalletUtxo>,
    /// Change value; zero means no change output.
    pub change_sat: u64,
    pub fee_sat: u64,
    /// Estimated virtual size of the final transaction.
    pub vbytes: u64,
}

/// Run blackjack then accumulative selection over the request.
pub fn select_coins(request: &CoinSelectionRequest) -> Option<CoinSelection> {
    let mut candidates = request.candidates.clone();
    match request.order {
        CoinSelectionOrder::Randomize => {
            candidates.shuffle(&mut rand::thread_rng());
        }
        CoinSelectionOrder::ScoreSort => {
            candidates.sort_by(|a, b| {
                let score_a = a.value_sat.saturating_sub(request.sats_per_vbyte * INPUT_VSIZE);
                let score_b = b.value_sat.saturating_sub(request.sats_per_vbyte * INPUT_VSIZE);
                score_b.cmp(&score_a)
            });
        }
    }

    blackjack(request, &candidates).or_else(|| accumulative(request, &candidates))
}

/// Greedy no-change selection: accept a candidate only while the accumulated
/// value stays within `target + fee + dust threshold`, so every selected sat
/// above the target is burnable as fee.
fn blackjack(request: &CoinSelectionRequest, candidates: &[WalletUtxo]) -> Option<CoinSelection> {
    let threshold = request.change_type.dust_threshold();
    let mut vbytes = TX_BASE_VSIZE + request.output_vsize;
    let mut in_sum: u64 = 0;
    let mut inputs = Vec::new();

    for utxo in &request.required {
        vbytes += INPUT_VSIZE;
        in_sum += utxo.value_sat;
        inputs.push(utxo.clone());
    }

    if let Some(selection) = try_finish_without_change(request, &inputs, in_sum, vbytes) {
        return Some(selection);
    }

    for utxo in candidates {
        let fee = request.sats_per_vbyte * (vbytes + INPUT_VSIZE);
        if in_sum + utxo.value_sat > request.target_sat + fee + threshold {
            continue;
        }
        vbytes += INPUT_VSIZE;
        in_sum += utxo.value_sat;
        inputs.push(utxo.clone());

        if let Some(selection) = try_finish_without_change(request, &inputs, in_sum, vbytes) {
            return Some(selection);
        }
    }
    None
}

fn try_finish_without_change(
    request: &CoinSelectionRequest,
    inputs: &[WalletUtxo],
    in_sum: u64,
    vbytes: u64,
) -> Option<CoinSelection> {
    let fee = request.sats_per_vbyte * vbytes;
    if inputs.is_empty() || in_sum < request.target_sat + fee {
        return None;
    }
    Some(CoinSelection {
        inputs: inputs.to_vec(),
        change_sat: 0,
        // everything above the target is fee
        fee_sat: in_sum - request.target_sat,
        vbytes,
    })
}

/// Greedy fill with a change output; sub-dust change is absorbed into the fee.
fn accumulative(request: &CoinSelectionRequest, candidates: &[WalletUtxo]) -> Option<CoinSelection> {
    let mut vbytes = TX_BASE_VSIZE + request.output_vsize;
    let mut in_sum: u64 = 0;
    let mut inputs = Vec::new();

    for utxo in &request.required {
        vbytes += INPUT_VSIZE;
        in_sum += utxo.value_sat;
        inputs.push(utxo.clone());
    }

    if let Some(selection) = try_finish(request, &inputs, in_sum, vbytes) {
        return Some(selection);
    }

    for utxo in candidates {
        vbytes += INPUT_VSIZE;
        in_sum += utxo.value_sat;
        inputs.push(utxo.clone());

        if let Some(selection) = try_finish(request, &inputs, in_sum, vbytes) {
            return Some(selection);
        }
    }
    None
}

fn try_finish(
    request: &CoinSelectionRequest,
    inputs: &[WalletUtxo],
    in_sum: u64,
    vbytes: u64,
) -> Option<CoinSelection> {
    if inputs.is_empty() {
        return None;
    }
    let change_vsize = request.change_type.vsize();
    let fee_with_change = request.sats_per_vbyte * (vbytes + change_vsize);
    let dust = request.change_type.dust_threshold();

    if in_sum >= request.target_sat + fee_with_change + dust {
        return Some(CoinSelection {
            inputs: inputs.to_vec(),
            change_sat: in_sum - request.target_sat - fee_with_change,
            fee_sat: fee_with_change,
            vbytes: vbytes + change_vsize,
        });
    }

    let fee = request.sats_per_vbyte * vbytes;
    if in_sum >= request.target_sat + fee {
        return Some(CoinSelection {
            inputs: inputs.to_vec(),
            change_sat: 0,
            fee_sat: in_sum - request.target_sat,
            vbytes,
        });
    }
    None
}

/// Unix-timestamp locktimes start here; values below are block heights.
const LOCKTIME_BASE: u32 = 500_000_000;

/// Low bits of the nonce carried in every input's sequence field.
const SEQUENCE_NONCE_BITS: u64 = 24;
const SEQUENCE_NONCE_MASK: u64 = (1 << SEQUENCE_NONCE_BITS) - 1;

/// Upper bound keeping the locktime in the timestamp range.
const MAX_NONCE: u64 = (1 << 54) - 1;

/// Draw a fresh transaction nonce.
pub fn random_nonce() -> u64 {
    rand::random::<u64>() & MAX_NONCE
}

/// Encode a nonce into `(locktime, sequence)`.
///
/// The high 30 bits ride in the timestamp locktime, the low 24 bits in the
/// input sequence; the transaction thus carries the swap nonce without any
/// extra output data. The sequence stays below final, keeping RBF usable.
pub fn encode_nonce(nonce: u64) -> Result<(u32, u32)> {
    if nonce > MAX_NONCE {
        return Err(Error::Bitcoin(format!("Nonce out of range: {nonce}")));
    }
    let locktime = LOCKTIME_BASE + (nonce >> SEQUENCE_NONCE_BITS) as u32;
    let sequence = 0xFE00_0000u32 | (nonce & SEQUENCE_NONCE_MASK) as u32;
    Ok((locktime, sequence))
}

/// Recover the nonce from `(locktime, sequence)`.
pub fn decode_nonce(locktime: u32, sequence: u32) -> Result<u64> {
    if locktime < LOCKTIME_BASE {
        return Err(Error::Bitcoin(format!(
            "Locktime {locktime} is not a timestamp"
        )));
    }
    let high = (locktime - LOCKTIME_BASE) as u64;
    let low = (sequence as u64) & SEQUENCE_NONCE_MASK;
    Ok((high << SEQUENCE_NONCE_BITS) | low)
}

/// Assemble the unsigned payment transaction for a selection.
pub fn build_payment_transaction(
    selection: &CoinSelection,
    destination: ScriptBuf,
    amount_sat: u64,
    change_script: Option<ScriptBuf>,
    nonce: u64,
) -> Result<Transaction> {
    let (locktime, sequence) = encode_nonce(nonce)?;

    let input = selection
        .inputs
        .iter()
        .map(|utxo| TxIn {
            previous_output: utxo.outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence(sequence),
            witness: Witness::default(),
        })
        .collect();

    let mut output = vec![TxOut {
        value: Amount::from_sat(amount_sat),
        script_pubkey: destination,
    }];
    if selection.change_sat > 0 {
        let script = change_script.ok_or(Error::Bitcoin(
            "Selection produced change but no change script was given".into(),
        ))?;
        output.push(TxOut {
            value: Amount::from_sat(selection.change_sat),
            script_pubkey: script,
        });
    }

    Ok(Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(locktime),
        input,
        output,
    })
}

/// Bitcoin wallet driver.
pub trait BitcoinWallet: Send + Sync {
    /// Derive a fresh P2WPKH receive address.
    fn get_fresh_address(&self) -> BtcFuture<'_, Address>;

    /// Spendable UTXOs.
    fn get_utxos(&self) -> BtcFuture<'_, Vec<WalletUtxo>>;

    /// Confirmed spendable balance in satoshi.
    fn get_balance(&self) -> BtcFuture<'_, u64>;

    /// Wallet's preferred fee rate for a confirmation target, sat/vbyte.
    fn get_fee_rate(&self, conf_target: u32) -> BtcFuture<'_, u64>;

    /// Sign a transaction spending the given wallet UTXOs.
    fn sign_transaction(
        &self,
        unsigned: Transaction,
        spent: &[WalletUtxo],
    ) -> BtcFuture<'_, Transaction>;
}
