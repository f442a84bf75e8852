use secp256k1::Error as SecpError;
use std::io;
use thiserror::Error;

/// Stable machine-readable tag for every error variant.
///
/// Run-level failure reports name the phase, the counterparty and one of
/// these codes; the codes are part of the diagnostic surface and must not
/// be renumbered or renamed casually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    MalformedEnvelope,
    MessageTooLarge,
    NestingTooDeep,
    UnknownMessageType,
    MalformedCommand,
    ProtocolViolation,
    PhaseViolation,
    ChannelInconsistent,
    HandshakeRejected,
    ReplayDetected,
    SignatureInvalid,
    NickMismatch,
    DecryptFailed,
    CryptoError,
    PodleMalformed,
    PodleCommitmentMismatch,
    PodleProofInvalid,
    CommitmentReused,
    BondInvalid,
    UtxoMissing,
    UtxoImmature,
    UtxoValueLow,
    OracleError,
    BroadcastFailed,
    VerifyRefused,
    SigningRefused,
    InsufficientMakers,
    CounterpartyCountInvalid,
    SessionTimeout,
    SessionAborted,
    RateLimited,
    TransportError,
    Disconnected,
    StorageError,
    SerializationError,
    ConfigInvalid,
    WalletUnavailable,
    ParseError,
    Message,
}

#[derive(Debug, Error)]
pub enum CoinjoinError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("message too large: {size} exceeds max {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("JSON nesting depth {depth} exceeds max {max}")]
    NestingTooDeep { depth: usize, max: usize },

    #[error("unknown envelope type: {0}")]
    UnknownMessageType(u16),

    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid phase transition: {from} -> {to}")]
    PhaseViolation { from: String, to: String },

    #[error("channel inconsistency: session pinned to {pinned}, message arrived via {actual}")]
    ChannelInconsistent { pinned: String, actual: String },

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("replayed message from {nick} dropped")]
    ReplayDetected { nick: String },

    #[error("message signature verification failed")]
    SignatureInvalid,

    #[error("nick mismatch: claimed {claimed}, derived {derived}")]
    NickMismatch { claimed: String, derived: String },

    #[error("session decrypt failed")]
    DecryptFailed,

    #[error("crypto error during {operation}: {details}")]
    CryptoError { operation: String, details: String },

    #[error("PoDLE malformed: {0}")]
    PodleMalformed(String),

    #[error("PoDLE commitment does not match revealed P2")]
    PodleCommitmentMismatch,

    #[error("PoDLE proof invalid")]
    PodleProofInvalid,

    #[error("commitment already used: {0}")]
    CommitmentReused(String),

    #[error("fidelity bond proof invalid: {0}")]
    BondInvalid(String),

    #[error("UTXO not found: {outpoint}")]
    UtxoMissing { outpoint: String },

    #[error("UTXO {outpoint} has {confirmations} confirmations, need {required}")]
    UtxoImmature { outpoint: String, confirmations: u32, required: u32 },

    #[error("UTXO value {value} below required {required}")]
    UtxoValueLow { value: u64, required: u64 },

    #[error("UTXO oracle error: {0}")]
    OracleError(String),

    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("refusing to sign: {0}")]
    VerifyRefused(String),

    #[error("signing refused: {0}")]
    SigningRefused(String),

    #[error("insufficient makers: needed {needed}, have {available}")]
    InsufficientMakers { needed: usize, available: usize },

    #[error("counterparty count {0} rejected (minimum 2)")]
    CounterpartyCountInvalid(usize),

    #[error("session with {nick} timed out in phase {phase}")]
    SessionTimeout { nick: String, phase: String },

    #[error("session with {nick} aborted: {reason}")]
    SessionAborted { nick: String, reason: String },

    #[error("rate limited: {nick}")]
    RateLimited { nick: String },

    #[error("transport error during {operation}: {details}")]
    TransportError { operation: String, details: String },

    #[error("peer disconnected: {0}")]
    Disconnected(String),

    #[error("storage error during {operation}: {details}")]
    StorageError { operation: String, details: String },

    #[error("{format} serialization error: {details}")]
    SerializationError { format: String, details: String },

    #[error("configuration error: {0}")]
    ConfigInvalid(String),

    #[error("wallet unavailable: {0}")]
    WalletUnavailable(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("{0}")]
    Message(String),
}

pub type Result<T> = std::result::Result<T, CoinjoinError>;

impl CoinjoinError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoinjoinError::MalformedEnvelope(_) => ErrorCode::MalformedEnvelope,
            CoinjoinError::MessageTooLarge { .. } => ErrorCode::MessageTooLarge,
            CoinjoinError::NestingTooDeep { .. } => ErrorCode::NestingTooDeep,
            CoinjoinError::UnknownMessageType(_) => ErrorCode::UnknownMessageType,
            CoinjoinError::MalformedCommand(_) => ErrorCode::MalformedCommand,
            CoinjoinError::ProtocolViolation(_) => ErrorCode::ProtocolViolation,
            CoinjoinError::PhaseViolation { .. } => ErrorCode::PhaseViolation,
            CoinjoinError::ChannelInconsistent { .. } => ErrorCode::ChannelInconsistent,
            CoinjoinError::HandshakeRejected(_) => ErrorCode::HandshakeRejected,
            CoinjoinError::ReplayDetected { .. } => ErrorCode::ReplayDetected,
            CoinjoinError::SignatureInvalid => ErrorCode::SignatureInvalid,
            CoinjoinError::NickMismatch { .. } => ErrorCode::NickMismatch,
            CoinjoinError::DecryptFailed => ErrorCode::DecryptFailed,
            CoinjoinError::CryptoError { .. } => ErrorCode::CryptoError,
            CoinjoinError::PodleMalformed(_) => ErrorCode::PodleMalformed,
            CoinjoinError::PodleCommitmentMismatch => ErrorCode::PodleCommitmentMismatch,
            CoinjoinError::PodleProofInvalid => ErrorCode::PodleProofInvalid,
            CoinjoinError::CommitmentReused(_) => ErrorCode::CommitmentReused,
            CoinjoinError::BondInvalid(_) => ErrorCode::BondInvalid,
            CoinjoinError::UtxoMissing { .. } => ErrorCode::UtxoMissing,
            CoinjoinError::UtxoImmature { .. } => ErrorCode::UtxoImmature,
            CoinjoinError::UtxoValueLow { .. } => ErrorCode::UtxoValueLow,
            CoinjoinError::OracleError(_) => ErrorCode::OracleError,
            CoinjoinError::BroadcastFailed(_) => ErrorCode::BroadcastFailed,
            CoinjoinError::VerifyRefused(_) => ErrorCode::VerifyRefused,
            CoinjoinError::SigningRefused(_) => ErrorCode::SigningRefused,
            CoinjoinError::InsufficientMakers { .. } => ErrorCode::InsufficientMakers,
            CoinjoinError::CounterpartyCountInvalid(_) => ErrorCode::CounterpartyCountInvalid,
            CoinjoinError::SessionTimeout { .. } => ErrorCode::SessionTimeout,
            CoinjoinError::SessionAborted { .. } => ErrorCode::SessionAborted,
            CoinjoinError::RateLimited { .. } => ErrorCode::RateLimited,
            CoinjoinError::TransportError { .. } => ErrorCode::TransportError,
            CoinjoinError::Disconnected(_) => ErrorCode::Disconnected,
            CoinjoinError::StorageError { .. } => ErrorCode::StorageError,
            CoinjoinError::SerializationError { .. } => ErrorCode::SerializationError,
            CoinjoinError::ConfigInvalid(_) => ErrorCode::ConfigInvalid,
            CoinjoinError::WalletUnavailable(_) => ErrorCode::WalletUnavailable,
            CoinjoinError::ParseError(_) => ErrorCode::ParseError,
            CoinjoinError::Message(_) => ErrorCode::Message,
        }
    }

    pub fn transport(operation: impl Into<String>, details: impl ToString) -> Self {
        CoinjoinError::TransportError { operation: operation.into(), details: details.to_string() }
    }

    pub fn storage(operation: impl Into<String>, details: impl ToString) -> Self {
        CoinjoinError::StorageError { operation: operation.into(), details: details.to_string() }
    }

    pub fn crypto(operation: impl Into<String>, details: impl ToString) -> Self {
        CoinjoinError::CryptoError { operation: operation.into(), details: details.to_string() }
    }
}

impl From<hex::FromHexError> for CoinjoinError {
    fn from(err: hex::FromHexError) -> Self {
        CoinjoinError::ParseError(format!("hex decode error: {}", err))
    }
}

impl From<toml::de::Error> for CoinjoinError {
    fn from(err: toml::de::Error) -> Self {
        CoinjoinError::ConfigInvalid(format!("TOML parsing error: {}", err))
    }
}

impl From<io::Error> for CoinjoinError {
    fn from(err: io::Error) -> Self {
        CoinjoinError::StorageError { operation: "io".to_string(), details: err.to_string() }
    }
}

impl From<serde_json::Error> for CoinjoinError {
    fn from(err: serde_json::Error) -> Self {
        CoinjoinError::SerializationError { format: "json".to_string(), details: err.to_string() }
    }
}

impl From<SecpError> for CoinjoinError {
    fn from(err: SecpError) -> Self {
        CoinjoinError::CryptoError { operation: "secp256k1".to_string(), details: err.to_string() }
    }
}

impl From<base64::DecodeError> for CoinjoinError {
    fn from(err: base64::DecodeError) -> Self {
        CoinjoinError::ParseError(format!("base64 decode error: {}", err))
    }
}

// NOTE: Avoid adding generic "stringly" error conversions here.
// Use structured `CoinjoinError` variants at the call site to preserve context.
