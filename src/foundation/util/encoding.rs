use crate::foundation::error::CoinjoinError;
use crate::foundation::types::Hash32;

/// Parse a 64-char hex string (optionally `0x`-prefixed) into 32 bytes.
pub fn parse_hex_32bytes(s: &str) -> Result<Hash32, CoinjoinError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() != 64 {
        return Err(CoinjoinError::ParseError(format!("expected 64 hex chars, got {}", s.len())));
    }
    let bytes = hex::decode(s)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Parse hex into a fixed-size array, failing on length mismatch.
pub fn parse_hex_array<const N: usize>(s: &str) -> Result<[u8; N], CoinjoinError> {
    let bytes = hex::decode(s)?;
    if bytes.len() != N {
        return Err(CoinjoinError::ParseError(format!("expected {} bytes, got {}", N, bytes.len())));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}
