use core::str;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio_postgres::types::Type;
use uuid::Uuid;

use crate::conversions::bool::parse_bool;
use crate::conversions::hex::parse_bytea_hex;
use crate::error::{ErrorKind, ReplError, ReplResult};
use crate::types::{Cell, ColumnSchema, Row};
use crate::{bail, repl_error};

/// Timestamp format produced with `datestyle=ISO`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Timestamp-with-timezone format produced with `datestyle=ISO` and `timezone=UTC`.
const TIMESTAMPTZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%#z";

/// Parses a single Postgres textual value into a typed [`Cell`].
///
/// Types without a dedicated representation fall back to [`Cell::String`],
/// which the destination stores verbatim.
pub fn parse_cell_from_postgres_text(typ: &Type, s: &str) -> ReplResult<Cell> {
    let cell = match *typ {
        Type::BOOL => Cell::Bool(parse_bool(s)?),
        Type::INT2 => Cell::I16(s.parse()?),
        Type::INT4 => Cell::I32(s.parse()?),
        Type::INT8 => Cell::I64(s.parse()?),
        Type::FLOAT4 => Cell::F32(s.parse()?),
        Type::FLOAT8 => Cell::F64(s.parse()?),
        Type::NUMERIC => Cell::Numeric(s.to_string()),
        Type::DATE => {
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
                repl_error!(
                    ErrorKind::ConversionError,
                    "date parsing failed",
                    format!("value `{s}`: {e}")
                )
            })?;
            Cell::Date(date)
        }
        Type::TIMESTAMP => {
            let timestamp = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).map_err(|e| {
                repl_error!(
                    ErrorKind::ConversionError,
                    "timestamp parsing failed",
                    format!("value `{s}`: {e}")
                )
            })?;
            Cell::Timestamp(timestamp)
        }
        Type::TIMESTAMPTZ => {
            let timestamp = DateTime::parse_from_str(s, TIMESTAMPTZ_FORMAT).map_err(|e| {
                repl_error!(
                    ErrorKind::ConversionError,
                    "timestamptz parsing failed",
                    format!("value `{s}`: {e}")
                )
            })?;
            Cell::TimestampTz(timestamp.with_timezone(&Utc))
        }
        Type::UUID => {
            let uuid = Uuid::parse_str(s).map_err(|e| {
                repl_error!(
                    ErrorKind::ConversionError,
                    "uuid parsing failed",
                    format!("value `{s}`: {e}")
                )
            })?;
            Cell::Uuid(uuid)
        }
        Type::JSON | Type::JSONB => {
            let value = serde_json::from_str(s).map_err(|e| {
                repl_error!(
                    ErrorKind::ConversionError,
                    "json parsing failed",
                    format!("{e}")
                )
            })?;
            Cell::Json(value)
        }
        Type::BYTEA => Cell::Bytes(parse_bytea_hex(s)?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::CHAR => {
            Cell::String(s.to_string())
        }
        _ => Cell::String(s.to_string()),
    };

    Ok(cell)
}

/// Parses one line of `COPY … TO STDOUT WITH (FORMAT text)` output into a [`Row`].
///
/// In text format a literal tab always delimits fields (tabs inside data are
/// escaped), NULL is the two-character sequence `\N`, and backslash escapes
/// cover the C escapes plus octal and hex forms.
pub fn parse_copy_text_row(line: &[u8], column_schemas: &[ColumnSchema]) -> ReplResult<Row> {
    let line = strip_line_ending(line);
    let raw_fields: Vec<&[u8]> = line.split(|b| *b == b'\t').collect();

    if raw_fields.len() != column_schemas.len() {
        bail!(
            ErrorKind::ConversionError,
            "copy row has unexpected column count",
            format!(
                "expected {} columns, found {}",
                column_schemas.len(),
                raw_fields.len()
            )
        );
    }

    let mut values = Vec::with_capacity(column_schemas.len());
    for (raw, column_schema) in raw_fields.iter().zip(column_schemas.iter()) {
        if *raw == b"\\N" {
            values.push(Cell::Null);
            continue;
        }

        let unescaped = unescape_copy_text(raw)?;
        let text = str::from_utf8(&unescaped)?;
        values.push(parse_cell_from_postgres_text(&column_schema.typ, text)?);
    }

    Ok(Row::new(values))
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Reverses the backslash escaping applied by COPY text format.
fn unescape_copy_text(raw: &[u8]) -> ReplResult<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter().copied().peekable();

    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }

        let Some(escaped) = bytes.next() else {
            bail!(
                ErrorKind::ConversionError,
                "truncated escape sequence in copy data"
            );
        };

        match escaped {
            b'\\' => out.push(b'\\'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'x' => {
                let mut value: u32 = 0;
                let mut digits = 0;
                while digits < 2 {
                    match bytes.peek().copied().and_then(hex_digit) {
                        Some(d) => {
                            bytes.next();
                            value = value * 16 + d;
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if digits == 0 {
                    // `\x` without digits is a literal `x`, matching COPY.
                    out.push(b'x');
                } else {
                    out.push(value as u8);
                }
            }
            b'0'..=b'7' => {
                let mut value: u32 = u32::from(escaped - b'0');
                let mut digits = 1;
                while digits < 3 {
                    match bytes.peek().copied() {
                        Some(d @ b'0'..=b'7') => {
                            bytes.next();
                            value = value * 8 + u32::from(d - b'0');
                            digits += 1;
                        }
                        _ => break,
                    }
                }
                out.push(value as u8);
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

fn hex_digit(b: u8) -> Option<u32> {
    (b as char).to_digit(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, typ: Type) -> ColumnSchema {
        ColumnSchema {
            name: name.to_string(),
            typ,
            nullable: true,
            primary: false,
        }
    }

    #[test]
    fn parses_scalar_cells() {
        assert_eq!(
            parse_cell_from_postgres_text(&Type::BOOL, "t").unwrap(),
            Cell::Bool(true)
        );
        assert_eq!(
            parse_cell_from_postgres_text(&Type::INT4, "-7").unwrap(),
            Cell::I32(-7)
        );
        assert_eq!(
            parse_cell_from_postgres_text(&Type::INT8, "42").unwrap(),
            Cell::I64(42)
        );
        assert_eq!(
            parse_cell_from_postgres_text(&Type::TEXT, "hello").unwrap(),
            Cell::String("hello".to_string())
        );
        assert_eq!(
            parse_cell_from_postgres_text(&Type::NUMERIC, "3.1415").unwrap(),
            Cell::Numeric("3.1415".to_string())
        );
    }

    #[test]
    fn parses_temporal_cells() {
        assert_eq!(
            parse_cell_from_postgres_text(&Type::DATE, "2024-01-31").unwrap(),
            Cell::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
        );

        let ts = parse_cell_from_postgres_text(&Type::TIMESTAMP, "2024-01-31 10:23:54.123").unwrap();
        assert!(matches!(ts, Cell::Timestamp(_)));

        let tstz =
            parse_cell_from_postgres_text(&Type::TIMESTAMPTZ, "2024-01-31 10:23:54+00").unwrap();
        assert!(matches!(tstz, Cell::TimestampTz(_)));
    }

    #[test]
    fn parses_uuid_json_bytea() {
        let uuid = parse_cell_from_postgres_text(&Type::UUID, "550e8400-e29b-41d4-a716-446655440000")
            .unwrap();
        assert!(matches!(uuid, Cell::Uuid(_)));

        assert_eq!(
            parse_cell_from_postgres_text(&Type::JSONB, "{\"a\":1}").unwrap(),
            Cell::Json(serde_json::json!({"a": 1}))
        );

        assert_eq!(
            parse_cell_from_postgres_text(&Type::BYTEA, "\\xdeadbeef").unwrap(),
            Cell::Bytes(vec![0xde, 0xad, 0xbe, 0xef])
        );
    }

    #[test]
    fn unknown_types_fall_back_to_string() {
        assert_eq!(
            parse_cell_from_postgres_text(&Type::INT4_ARRAY, "{1,2,3}").unwrap(),
            Cell::String("{1,2,3}".to_string())
        );
    }

    #[test]
    fn parses_copy_row_with_nulls() {
        let schemas = vec![column("id", Type::INT4), column("v", Type::TEXT)];
        let row = parse_copy_text_row(b"1\t\\N\n", &schemas).unwrap();
        assert_eq!(row.values(), &[Cell::I32(1), Cell::Null]);
    }

    #[test]
    fn unescapes_copy_text() {
        let schemas = vec![column("v", Type::TEXT)];
        let row = parse_copy_text_row(b"a\\tb\\\\c\\nd\n", &schemas).unwrap();
        assert_eq!(row.values(), &[Cell::String("a\tb\\c\nd".to_string())]);
    }

    #[test]
    fn unescapes_octal_and_hex() {
        let schemas = vec![column("v", Type::TEXT)];
        let row = parse_copy_text_row(b"\\101\\x42\n", &schemas).unwrap();
        assert_eq!(row.values(), &[Cell::String("AB".to_string())]);
    }

    #[test]
    fn rejects_column_count_mismatch() {
        let schemas = vec![column("id", Type::INT4), column("v", Type::TEXT)];
        assert!(parse_copy_text_row(b"1\n", &schemas).is_err());
        assert!(parse_copy_text_row(b"1\t2\t3\n", &schemas).is_err());
    }
}
