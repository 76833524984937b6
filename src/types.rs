//! Shared types and serde helpers for the swap intermediary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serde module for serializing `[u8; 32]` as hex strings.
pub mod hex_bytes32 {
    use super::*;

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

/// Serde module for optional 32-byte hex strings.
pub mod hex_bytes32_opt {
    use super::*;

    pub fn serialize<S>(bytes: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => serializer.serialize_some(&hex::encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            None => Ok(None),
            Some(s) => {
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                let arr = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
                Ok(Some(arr))
            }
        }
    }
}

/// Serde module for serializing `u128` amounts as decimal strings.
///
/// Token amounts on smart chains routinely exceed `u64` and JSON number
/// precision, so the persisted layout carries them as decimal strings.
pub mod dec_string {
    use super::*;

    pub fn serialize<S>(value: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<u128>().map_err(serde::de::Error::custom)
    }
}

/// Serde module for optional `u128` amounts as decimal strings.
pub mod dec_string_opt {
    use super::*;

    pub fn serialize<S>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u128>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| s.parse::<u128>().map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Bitcoin network type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Bitcoin mainnet.
    Bitcoin,
    /// Bitcoin testnet.
    Testnet,
    /// Bitcoin regtest (local development).
    Regtest,
    /// Signet.
    Signet,
}

impl Network {
    /// Convert to bitcoin crate's Network type.
    pub fn to_bitcoin_network(self) -> bitcoin::Network {
        match self {
            Network::Bitcoin => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
            Network::Signet => bitcoin::Network::Signet,
        }
    }
}

impl std::str::FromStr for Network {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
            "testnet" | "testnet3" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            "signet" => Ok(Network::Signet),
            _ => Err(crate::error::Error::Parse(format!(
                "Unknown network: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Bitcoin => write!(f, "bitcoin"),
            Network::Testnet => write!(f, "testnet"),
            Network::Regtest => write!(f, "regtest"),
            Network::Signet => write!(f, "signet"),
        }
    }
}

/// Current unix time in seconds.
pub fn now_seconds() -> u64 {
    time::OffsetDateTime::now_utc().unix_timestamp().max(0) as u64
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).max(0) as u64
}

/// Identity of a swap across the whole intermediary.
///
/// The 64-bit sequence disambiguates multiple swaps sharing one payment hash;
/// when a swap type carries no sequence it is fixed to zero, collapsing
/// identity to `(chain, payment_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SwapIdentity {
    pub chain: String,
    #[serde(with = "hex_bytes32")]
    pub payment_hash: [u8; 32],
    pub sequence: u64,
}

impl SwapIdentity {
    pub fn new(chain: impl Into<String>, payment_hash: [u8; 32], sequence: u64) -> Self {
        Self {
            chain: chain.into(),
            payment_hash,
            sequence,
        }
    }

    /// Storage key: payment hash hex concatenated with the hex sequence.
    pub fn storage_key(&self) -> String {
        format!("{}-{:x}", hex::encode(self.payment_hash), self.sequence)
    }
}

impl std::fmt::Display for SwapIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}-{:x}",
            self.chain,
            hex::encode(self.payment_hash),
            self.sequence
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_uses_hex_sequence() {
        let id = SwapIdentity::new("EVM", [0xaa; 32], 255);
        assert!(id.storage_key().ends_with("-ff"));
    }

    #[test]
    fn dec_string_round_trip() {
        #[derive(Serialize, Deserialize)]
        struct Wrap {
            #[serde(with = "dec_string")]
            v: u128,
        }
        let w = Wrap { v: u128::MAX };
        let s = serde_json::to_string(&w).unwrap();
        assert!(s.contains("\"340282366920938463463374607431768211455\""));
        let back: Wrap = serde_json::from_str(&s).unwrap();
        assert_eq!(back.v, w.v);
    }
}
