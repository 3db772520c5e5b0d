//! Numeric codec.
//!
//! Two directions:
//! - **wire**: Ethereum JSON-RPC quantities, `0x`-prefixed big-endian hex with
//!   no leading zeros (`0` is `0x0`).
//! - **store**: base-10 text, the representation `NUMERIC` columns are read
//!   back as. Nothing on this path goes through `f64`.

use alloy_primitives::U256;

use crate::error::MirrorError;

/// Encode a `u64` as a wire quantity.
pub fn encode_u64(n: u64) -> String {
    format!("{n:#x}")
}

/// Encode a 256-bit integer as a wire quantity.
pub fn encode_u256(v: U256) -> String {
    let bytes = v.to_be_bytes::<32>();
    let digits = alloy_primitives::hex::encode(bytes);
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{trimmed}")
    }
}

/// Strip the `0x` prefix and check that only hex digits remain.
fn hex_digits(s: &str) -> Result<&str, MirrorError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| MirrorError::InvalidParams(format!("quantity {s:?} is missing the 0x prefix")))?;
    if digits.is_empty() {
        return Err(MirrorError::InvalidParams(format!("quantity {s:?} has no digits")));
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(MirrorError::InvalidParams(format!("quantity {s:?} is not hex")));
    }
    Ok(digits)
}

/// Decode a wire quantity into a `u64`.
pub fn decode_u64(s: &str) -> Result<u64, MirrorError> {
    let digits = hex_digits(s)?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| MirrorError::InvalidParams(format!("quantity {s:?} does not fit in 64 bits: {e}")))
}

/// Decode a wire quantity into a 256-bit integer.
pub fn decode_u256(s: &str) -> Result<U256, MirrorError> {
    let digits = hex_digits(s)?;
    U256::from_str_radix(digits, 16)
        .map_err(|e| MirrorError::InvalidParams(format!("quantity {s:?} does not fit in 256 bits: {e}")))
}

/// Render a 256-bit integer for a `NUMERIC` column.
pub fn to_decimal(v: U256) -> String {
    v.to_string()
}

/// Parse a `NUMERIC` column (read back as text) into a 256-bit integer.
pub fn from_decimal(s: &str) -> Result<U256, MirrorError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MirrorError::Codec(format!("not an unsigned integer: {s:?}")));
    }
    U256::from_str_radix(s, 10).map_err(|e| MirrorError::Codec(format!("{s:?}: {e}")))
}

/// Parse a `NUMERIC` column (read back as text) into a `u64`.
pub fn u64_from_decimal(s: &str) -> Result<u64, MirrorError> {
    let v = from_decimal(s)?;
    u64::try_from(v).map_err(|_| MirrorError::Codec(format!("{s} does not fit in 64 bits")))
}

/// Checked conversion for `BIGINT` columns.
pub fn to_i64(n: u64) -> Result<i64, MirrorError> {
    i64::try_from(n).map_err(|_| MirrorError::Codec(format!("{n} exceeds BIGINT range")))
}

/// Checked conversion back from `BIGINT` columns.
pub fn from_i64(n: i64) -> Result<u64, MirrorError> {
    u64::try_from(n).map_err(|_| MirrorError::Codec(format!("negative value {n} in unsigned column")))
}
