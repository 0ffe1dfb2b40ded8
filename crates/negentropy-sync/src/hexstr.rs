//! Case-insensitive hex codec with optional `0x` prefix (§4.A).
//!
//! Thin wrapper around the `hex` crate (already in the teacher's dependency
//! table) that adds the `0x` prefix stripping and lowercase-only output the
//! engine boundary requires.

use crate::error::CodecError;

/// Decode a hex string into bytes. Accepts an optional leading `0x`/`0X` and
/// is case-insensitive.
pub fn decode(input: &str) -> Result<Vec<u8>, CodecError> {
    let stripped = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);

    if stripped.len() % 2 != 0 {
        return Err(CodecError::OddLengthHex);
    }

    hex::decode(stripped).map_err(|_| CodecError::InvalidHexDigit)
}

/// Encode bytes as a lowercase hex string.
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(bytes)
}
