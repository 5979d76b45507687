use crate::bail;
use crate::error::{ErrorKind, ReplError, ReplResult};

/// Converts a Postgres bytea hex string to a byte array.
///
/// Postgres emits bytea values as `\x` followed by hexadecimal digits, two
/// per output byte.
pub fn parse_bytea_hex(bytea_hex_string: &str) -> ReplResult<Vec<u8>> {
    if bytea_hex_string.len() < 2 || &bytea_hex_string[..2] != "\\x" {
        bail!(
            ErrorKind::ConversionError,
            "could not convert from bytea hex string to byte array",
            "the prefix '\\x' is missing"
        );
    }

    let bytea_hex_string = &bytea_hex_string[2..];

    if bytea_hex_string.len() % 2 != 0 {
        bail!(
            ErrorKind::ConversionError,
            "could not convert from bytea hex string to byte array",
            "the number of digits is odd"
        );
    }

    let mut result = Vec::with_capacity(bytea_hex_string.len() / 2);
    for i in (0..bytea_hex_string.len()).step_by(2) {
        let val = u8::from_str_radix(&bytea_hex_string[i..i + 2], 16)?;
        result.push(val);
    }

    Ok(result)
}
