//! Wire envelope: one JSON object per `\r\n`-terminated line.
//!
//! Size and depth bounds are enforced on the raw bytes before any JSON
//! parsing; a peer that violates them gets its connection closed, not a
//! polite error message.

use crate::foundation::{CoinjoinError, Result, MAX_JSON_DEPTH, MAX_LINE_LENGTH, MAX_MESSAGE_SIZE};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
#[repr(u16)]
pub enum EnvelopeType {
    Privmsg = 685,
    Pubmsg = 687,
    Peerlist = 789,
    GetPeerlist = 791,
    Handshake = 793,
    DnHandshake = 795,
    Ping = 797,
    Pong = 799,
    Disconnect = 801,
}

impl From<EnvelopeType> for u16 {
    fn from(value: EnvelopeType) -> Self {
        value as u16
    }
}

impl TryFrom<u16> for EnvelopeType {
    type Error = CoinjoinError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            685 => Ok(EnvelopeType::Privmsg),
            687 => Ok(EnvelopeType::Pubmsg),
            789 => Ok(EnvelopeType::Peerlist),
            791 => Ok(EnvelopeType::GetPeerlist),
            793 => Ok(EnvelopeType::Handshake),
            795 => Ok(EnvelopeType::DnHandshake),
            797 => Ok(EnvelopeType::Ping),
            799 => Ok(EnvelopeType::Pong),
            801 => Ok(EnvelopeType::Disconnect),
            other => Err(CoinjoinError::UnknownMessageType(other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub line: String,
}

impl Envelope {
    pub fn new(kind: EnvelopeType, line: impl Into<String>) -> Self {
        Self { kind, line: line.into() }
    }

    /// Encode as a single wire line, `\r\n` terminator included.
    pub fn encode(&self) -> Result<String> {
        let mut encoded = serde_json::to_string(self)?;
        if encoded.len() + 2 > MAX_LINE_LENGTH {
            return Err(CoinjoinError::MessageTooLarge { size: encoded.len() + 2, max: MAX_LINE_LENGTH });
        }
        encoded.push_str("\r\n");
        Ok(encoded)
    }

    /// Decode one raw line. Bounds are checked before `serde_json` sees a
    /// byte; any violation here means "close the connection".
    pub fn decode(raw: &str) -> Result<Self> {
        if raw.len() > MAX_LINE_LENGTH {
            return Err(CoinjoinError::MessageTooLarge { size: raw.len(), max: MAX_LINE_LENGTH });
        }
        let trimmed = raw.strip_suffix("\r\n").or_else(|| raw.strip_suffix('\n')).unwrap_or(raw);
        if trimmed.len() > MAX_MESSAGE_SIZE {
            return Err(CoinjoinError::MessageTooLarge { size: trimmed.len(), max: MAX_MESSAGE_SIZE });
        }
        check_json_depth(trimmed, MAX_JSON_DEPTH)?;
        let envelope: Envelope = serde_json::from_str(trimmed)
            .map_err(|err| CoinjoinError::MalformedEnvelope(err.to_string()))?;
        Ok(envelope)
    }
}

/// String-aware nesting scan: counts `{`/`[` depth outside of JSON string
/// literals so a hostile peer cannot stack a parser bomb.
fn check_json_depth(raw: &str, max_depth: usize) -> Result<()> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for byte in raw.bytes() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if depth > max_depth {
                    return Err(CoinjoinError::NestingTooDeep { depth, max: max_depth });
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}
