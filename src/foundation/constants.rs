/// Protocol version carried in nicks and handshakes. Min == max: only v5
/// peers are interoperable.
pub const PROTO_VERSION: u8 = 5;
pub const PROTO_VERSION_MIN: u8 = 5;

/// Nick prefix letter; a full nick is `J` + version digit + 14 chars of
/// base58(sha256(pubkey)[..10]), right-padded with `O` (not in the base58
/// alphabet) when the encoding comes up short.
pub const NICK_PREFIX: char = 'J';
pub const NICK_HASH_LEN: usize = 10;
pub const NICK_MAX_ENCODED: usize = 14;
pub const NICK_PAD_CHAR: char = 'O';

/// Hostid used for direct (non-directory) channels in anti-replay signing.
pub const DIRECT_HOSTID: &str = "onion-network";

/// Location advertised by peers that do not accept inbound connections.
pub const NOT_SERVING_ONION: &str = "NOT-SERVING-ONION";

/// Destination nick for public (broadcast) application messages.
pub const PUBLIC_NICK: &str = "PUBLIC";

/// Envelope hard limits, enforced on raw bytes before any JSON parsing.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;
pub const MAX_JSON_DEPTH: usize = 10;

/// Outputs at or below this value are forfeited to miner fees; a CoinJoin
/// output below it aborts the run.
pub const DEFAULT_DUST_THRESHOLD: u64 = 27_300;

/// Multi-channel deduplication window.
pub const DEDUP_WINDOW_SECS: u64 = 30;

/// Offers older than this are purged on read.
pub const DEFAULT_MAX_OFFER_AGE_SECS: u64 = 3600;

pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_TAKER_UTXO_AGE: u32 = 5;
pub const DEFAULT_TAKER_UTXO_AMTPERCENT: u8 = 20;
pub const DEFAULT_TAKER_UTXO_RETRIES: u8 = 3;
pub const DEFAULT_MAKER_REPLACEMENT_ATTEMPTS: u8 = 3;

pub const DEFAULT_MESSAGE_RATE_LIMIT: f64 = 100.0;
pub const DEFAULT_MESSAGE_BURST_LIMIT: f64 = 200.0;

/// Fee estimation block-target bounds.
pub const FEE_TARGET_MIN_BLOCKS: u16 = 1;
pub const FEE_TARGET_MAX_BLOCKS: u16 = 1008;
pub const DEFAULT_FEE_TARGET_BLOCKS: u16 = 3;

/// Blocks per difficulty-retarget period; bond certificates expire at
/// `cert_expiry * RETARGET_PERIOD`.
pub const RETARGET_PERIOD: u32 = 2016;

/// Known feature flags.
pub const FEATURE_EXTENDED_PEERLIST: &str = "extended_peerlist";
pub const FEATURE_NEUTRINO_COMPAT: &str = "neutrino_compat";

/// Application command names (the `!cmd` verbs inside envelope payloads).
pub mod commands {
    pub const ORDERBOOK: &str = "orderbook";
    pub const RELOFFER: &str = "reloffer";
    pub const ABSOFFER: &str = "absoffer";
    pub const TBOND: &str = "tbond";
    pub const FILL: &str = "fill";
    pub const PUBKEY: &str = "pubkey";
    pub const AUTH: &str = "auth";
    pub const IOAUTH: &str = "ioauth";
    pub const HP2: &str = "hp2";
    pub const TX: &str = "tx";
    pub const SIG: &str = "sig";
    pub const PUSH: &str = "push";
    pub const ERROR: &str = "error";

    /// Commands whose argument payload is NaCl-boxed for the session.
    pub const ENCRYPTED: [&str; 4] = [AUTH, IOAUTH, TX, SIG];

    pub fn is_encrypted(cmd: &str) -> bool {
        ENCRYPTED.contains(&cmd)
    }
}
