//! `0x`-prefixed hex encoding for unsigned integers, matching the
//! go-ethereum `hexutil` conventions the stream payloads use on the wire
//! (spec §6: `number`, `nonce`, `block_number` are hex-encoded uint64).

use crate::errors::Error;

/// Encodes `n` as a minimal `0x`-prefixed hex string (no leading zeros,
/// `0x0` for zero), mirroring `hexutil.EncodeUint64`.
pub fn encode_u64(n: u64) -> String {
    format!("0x{n:x}")
}

/// Decodes a `0x`-prefixed hex string produced by [`encode_u64`].
pub fn decode_u64(s: &str) -> Result<u64, Error> {
    let trimmed = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| Error::MalformedMessage(format!("hex value missing 0x prefix: {s}")))?;
    if trimmed.is_empty() {
        return Err(Error::MalformedMessage("empty hex value".into()));
    }
    u64::from_str_radix(trimmed, 16)
        .map_err(|e| Error::MalformedMessage(format!("invalid hex uint64 {s}: {e}")))
}
