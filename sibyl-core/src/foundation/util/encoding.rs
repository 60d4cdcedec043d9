use crate::foundation::error::{OracleError, Result};

pub fn decode_hex_prefixed(value: &str) -> Result<Vec<u8>> {
    let stripped = value.trim().trim_start_matches("0x").trim_start_matches("0X");
    hex::decode(stripped).map_err(|err| OracleError::Parse(format!("invalid hex: {err}")))
}

pub fn parse_hex_fixed<const N: usize>(value: &str) -> Result<[u8; N]> {
    let bytes = decode_hex_prefixed(value)?;
    if bytes.len() != N {
        return Err(OracleError::Parse(format!("expected {N} bytes, got {}", bytes.len())));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub fn parse_hex_32bytes(value: &str) -> Result<[u8; 32]> {
    parse_hex_fixed::<32>(value)
}
