use crate::bail;
use crate::error::{ErrorKind, ReplError, ReplResult};

/// Parses a Postgres textual boolean (`t` / `f`).
pub fn parse_bool(s: &str) -> ReplResult<bool> {
    if s == "t" {
        Ok(true)
    } else if s == "f" {
        Ok(false)
    } else {
        bail!(
            ErrorKind::ConversionError,
            "invalid boolean value",
            format!("boolean value must be 't' or 'f' (received: {s})")
        );
    }
}
