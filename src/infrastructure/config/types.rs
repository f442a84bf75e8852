use crate::foundation::{
    CoinjoinError, Result, DEFAULT_DUST_THRESHOLD, DEFAULT_FEE_TARGET_BLOCKS, DEFAULT_MAKER_REPLACEMENT_ATTEMPTS,
    DEFAULT_MAX_OFFER_AGE_SECS, DEFAULT_MESSAGE_BURST_LIMIT, DEFAULT_MESSAGE_RATE_LIMIT, DEFAULT_SESSION_TIMEOUT_SECS,
    DEFAULT_TAKER_UTXO_AGE, DEFAULT_TAKER_UTXO_AMTPERCENT, DEFAULT_TAKER_UTXO_RETRIES, FEE_TARGET_MAX_BLOCKS,
    FEE_TARGET_MIN_BLOCKS,
};
use serde::{Deserialize, Serialize};

/// How the finished transaction leaves the building.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastPolicy {
    #[serde(rename = "SELF")]
    Self_,
    #[serde(rename = "RANDOM_PEER")]
    RandomPeer,
    /// Fan the raw transaction out to a few makers via `!push`.
    #[default]
    #[serde(rename = "MULTIPLE_PEERS")]
    MultiplePeers,
    /// Never broadcast locally, even when every peer push fails.
    #[serde(rename = "NOT_SELF")]
    NotSelf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoinjoinConfig {
    #[serde(default = "defaults::counterparty_count")]
    pub counterparty_count: usize,
    #[serde(default = "defaults::replacement_attempts")]
    pub max_maker_replacement_attempts: u8,
    #[serde(default = "defaults::dust_threshold")]
    pub dust_threshold: u64,
    #[serde(default)]
    pub broadcast_policy: BroadcastPolicy,
    /// Explicit fee rate wins over block-target estimation when set.
    #[serde(default)]
    pub fee_rate_sat_vb: Option<u64>,
    #[serde(default = "defaults::fee_target_blocks")]
    pub fee_target_blocks: u16,
    /// Seconds the taker collects offers after `!orderbook`.
    #[serde(default = "defaults::order_wait_time")]
    pub order_wait_time_secs: u64,
    /// Alpha for the `weighted` selection policy.
    #[serde(default = "defaults::weighted_fee_alpha")]
    pub weighted_fee_alpha: f64,
    /// Numerator of the bond-weighted slot split (of 8).
    #[serde(default = "defaults::bond_weighted_numerator")]
    pub bond_weighted_numerator: u8,
    #[serde(default)]
    pub prefer_direct_connections: bool,
}

impl Default for CoinjoinConfig {
    fn default() -> Self {
        Self {
            counterparty_count: defaults::counterparty_count(),
            max_maker_replacement_attempts: defaults::replacement_attempts(),
            dust_threshold: defaults::dust_threshold(),
            broadcast_policy: BroadcastPolicy::default(),
            fee_rate_sat_vb: None,
            fee_target_blocks: defaults::fee_target_blocks(),
            order_wait_time_secs: defaults::order_wait_time(),
            weighted_fee_alpha: defaults::weighted_fee_alpha(),
            bond_weighted_numerator: defaults::bond_weighted_numerator(),
            prefer_direct_connections: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MakerConfig {
    /// Minimum confirmations on the taker's PoDLE utxo.
    #[serde(default = "defaults::taker_utxo_age")]
    pub taker_utxo_age: u32,
    /// Minimum value of that utxo as a percentage of the coinjoin amount.
    #[serde(default = "defaults::taker_utxo_amtpercent")]
    pub taker_utxo_amtpercent: u8,
    #[serde(default = "defaults::taker_utxo_retries")]
    pub taker_utxo_retries: u8,
    /// NUMS retry indices this maker will accept.
    #[serde(default = "defaults::accepted_podle_indices")]
    pub accepted_podle_indices: Vec<u8>,
}

impl Default for MakerConfig {
    fn default() -> Self {
        Self {
            taker_utxo_age: defaults::taker_utxo_age(),
            taker_utxo_amtpercent: defaults::taker_utxo_amtpercent(),
            taker_utxo_retries: defaults::taker_utxo_retries(),
            accepted_podle_indices: defaults::accepted_podle_indices(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "defaults::session_timeout")]
    pub session_timeout_sec: u64,
    #[serde(default = "defaults::max_offer_age")]
    pub max_offer_age: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { session_timeout_sec: defaults::session_timeout(), max_offer_age: defaults::max_offer_age() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Sustained messages per second per connection.
    #[serde(default = "defaults::message_rate_limit")]
    pub message_rate_limit: f64,
    /// Burst size per connection.
    #[serde(default = "defaults::message_burst_limit")]
    pub message_burst_limit: f64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self { message_rate_limit: defaults::message_rate_limit(), message_burst_limit: defaults::message_burst_limit() }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub coinjoin: CoinjoinConfig,
    #[serde(default)]
    pub maker: MakerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub limits: LimitConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.coinjoin.counterparty_count < 2 {
            return Err(CoinjoinError::ConfigInvalid(format!(
                "counterparty_count {} below minimum 2",
                self.coinjoin.counterparty_count
            )));
        }
        if self.coinjoin.max_maker_replacement_attempts > 10 {
            return Err(CoinjoinError::ConfigInvalid("max_maker_replacement_attempts above 10".into()));
        }
        if self.maker.taker_utxo_amtpercent > 100 {
            return Err(CoinjoinError::ConfigInvalid("taker_utxo_amtpercent above 100".into()));
        }
        if self.maker.taker_utxo_retries > 9 {
            return Err(CoinjoinError::ConfigInvalid("taker_utxo_retries above 9".into()));
        }
        if !(FEE_TARGET_MIN_BLOCKS..=FEE_TARGET_MAX_BLOCKS).contains(&self.coinjoin.fee_target_blocks) {
            return Err(CoinjoinError::ConfigInvalid(format!(
                "fee_target_blocks {} outside [{FEE_TARGET_MIN_BLOCKS}, {FEE_TARGET_MAX_BLOCKS}]",
                self.coinjoin.fee_target_blocks
            )));
        }
        if self.coinjoin.bond_weighted_numerator > 8 {
            return Err(CoinjoinError::ConfigInvalid("bond_weighted_numerator above 8".into()));
        }
        if self.limits.message_rate_limit <= 0.0 || self.limits.message_burst_limit <= 0.0 {
            return Err(CoinjoinError::ConfigInvalid("message rate limits must be positive".into()));
        }
        Ok(())
    }
}

mod defaults {
    use super::*;

    pub fn counterparty_count() -> usize {
        4
    }
    pub fn replacement_attempts() -> u8 {
        DEFAULT_MAKER_REPLACEMENT_ATTEMPTS
    }
    pub fn dust_threshold() -> u64 {
        DEFAULT_DUST_THRESHOLD
    }
    pub fn fee_target_blocks() -> u16 {
        DEFAULT_FEE_TARGET_BLOCKS
    }
    pub fn order_wait_time() -> u64 {
        30
    }
    pub fn weighted_fee_alpha() -> f64 {
        0.1
    }
    pub fn bond_weighted_numerator() -> u8 {
        7
    }
    pub fn taker_utxo_age() -> u32 {
        DEFAULT_TAKER_UTXO_AGE
    }
    pub fn taker_utxo_amtpercent() -> u8 {
        DEFAULT_TAKER_UTXO_AMTPERCENT
    }
    pub fn taker_utxo_retries() -> u8 {
        DEFAULT_TAKER_UTXO_RETRIES
    }
    pub fn accepted_podle_indices() -> Vec<u8> {
        vec![0, 1, 2]
    }
    pub fn session_timeout() -> u64 {
        DEFAULT_SESSION_TIMEOUT_SECS
    }
    pub fn max_offer_age() -> u64 {
        DEFAULT_MAX_OFFER_AGE_SECS
    }
    pub fn message_rate_limit() -> f64 {
        DEFAULT_MESSAGE_RATE_LIMIT
    }
    pub fn message_burst_limit() -> f64 {
        DEFAULT_MESSAGE_BURST_LIMIT
    }
}
