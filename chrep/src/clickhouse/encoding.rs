use std::fmt;

use chrono::NaiveDate;

use crate::error::{ErrorKind, ReplError, ReplResult};
use crate::types::Cell;
use crate::{bail, repl_error};

// We bypass the typed `Row` / `Inserter` API entirely and write RowBinary
// bytes directly via `INSERT INTO "t" (...) FORMAT RowBinary`. The typed path
// needs compile-time column lists, which do not exist for dynamically
// configured tables.

/// Owned ClickHouse-compatible value, moved (not cloned) from a [`Cell`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClickHouseValue {
    Null,
    Bool(bool),
    /// Sign columns of collapsing engines (`Int8`, +1 / -1 on the wire).
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    /// Version columns of replacing/versioned engines (`UInt64`, fed with the LSN).
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    /// TEXT, NUMERIC (string), JSON, BYTEA (hex-encoded)
    String(String),
    /// Days since Unix epoch (ClickHouse `Date` on wire = UInt16 LE)
    Date(u16),
    /// Microseconds since Unix epoch (ClickHouse `DateTime64(6)` on wire = Int64 LE)
    DateTime64(i64),
    /// UUID in standard 16-byte big-endian order (converted to ClickHouse wire format on encode)
    Uuid([u8; 16]),
}

/// Converts a [`Cell`] to a [`ClickHouseValue`], consuming it (no clone).
///
/// An unresolved [`Cell::Unchanged`] placeholder is an error: it must have
/// been replaced from the row's pre-image before encoding.
pub fn cell_to_clickhouse_value(cell: Cell) -> ReplResult<ClickHouseValue> {
    let value = match cell {
        Cell::Null => ClickHouseValue::Null,
        Cell::Unchanged => {
            bail!(
                ErrorKind::InvalidState,
                "unresolved toast placeholder reached encoding"
            );
        }
        Cell::Bool(b) => ClickHouseValue::Bool(b),
        Cell::I16(v) => ClickHouseValue::Int16(v),
        Cell::I32(v) => ClickHouseValue::Int32(v),
        Cell::I64(v) => ClickHouseValue::Int64(v),
        Cell::F32(v) => ClickHouseValue::Float32(v),
        Cell::F64(v) => ClickHouseValue::Float64(v),
        Cell::Numeric(n) => ClickHouseValue::String(n),
        Cell::Date(d) => {
            let days = d
                .signed_duration_since(unix_epoch())
                .num_days()
                .clamp(0, i64::from(u16::MAX)) as u16;
            ClickHouseValue::Date(days)
        }
        Cell::Timestamp(dt) => ClickHouseValue::DateTime64(dt.and_utc().timestamp_micros()),
        Cell::TimestampTz(dt) => ClickHouseValue::DateTime64(dt.timestamp_micros()),
        Cell::Uuid(u) => ClickHouseValue::Uuid(*u.as_bytes()),
        Cell::Json(j) => ClickHouseValue::String(j.to_string()),
        Cell::Bytes(b) => ClickHouseValue::String(bytes_to_hex(b)),
        Cell::String(s) => ClickHouseValue::String(s),
    };

    Ok(value)
}

fn unix_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid date")
}

fn bytes_to_hex(bytes: Vec<u8>) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use fmt::Write;
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Encodes a variable-length integer (LEB128) used by ClickHouse for string lengths.
pub(crate) fn rb_varint(mut v: usize, buf: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Encodes a value for a `Nullable(T)` column (1-byte null indicator + value if present).
pub(crate) fn rb_encode_nullable(val: ClickHouseValue, buf: &mut Vec<u8>) -> ReplResult<()> {
    match val {
        ClickHouseValue::Null => buf.push(1),
        v => {
            buf.push(0);
            rb_encode_value(v, buf)?;
        }
    }
    Ok(())
}

/// Encodes a value for a non-nullable column (no null indicator byte).
pub(crate) fn rb_encode_value(val: ClickHouseValue, buf: &mut Vec<u8>) -> ReplResult<()> {
    match val {
        ClickHouseValue::Null => {
            // A non-nullable column unexpectedly received NULL. Write a
            // zero-length string as the least-harmful fallback.
            buf.push(0);
        }
        ClickHouseValue::Bool(b) => buf.push(b as u8),
        ClickHouseValue::Int8(v) => buf.extend_from_slice(&v.to_le_bytes()),
        ClickHouseValue::Int16(v) => buf.extend_from_slice(&v.to_le_bytes()),
        ClickHouseValue::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        ClickHouseValue::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        ClickHouseValue::UInt32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        ClickHouseValue::UInt64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        ClickHouseValue::Float32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        ClickHouseValue::Float64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        ClickHouseValue::String(s) => {
            rb_varint(s.len(), buf);
            buf.extend_from_slice(s.as_bytes());
        }
        ClickHouseValue::Date(days) => buf.extend_from_slice(&days.to_le_bytes()),
        ClickHouseValue::DateTime64(micros) => buf.extend_from_slice(&micros.to_le_bytes()),
        ClickHouseValue::Uuid(bytes) => {
            // ClickHouse RowBinary UUID = two little-endian u64 (high bits then
            // low bits). Our bytes are in standard UUID big-endian order, so we
            // split into two u64 and write each in little-endian.
            let high = u64::from_be_bytes(bytes[0..8].try_into().map_err(
                |e: std::array::TryFromSliceError| {
                    repl_error!(ErrorKind::ConversionError, "uuid high-half conversion failed", e)
                },
            )?);
            let low = u64::from_be_bytes(bytes[8..16].try_into().map_err(
                |e: std::array::TryFromSliceError| {
                    repl_error!(ErrorKind::ConversionError, "uuid low-half conversion failed", e)
                },
            )?);
            buf.extend_from_slice(&high.to_le_bytes());
            buf.extend_from_slice(&low.to_le_bytes());
        }
    }
    Ok(())
}

/// Encodes a complete row into `buf`, selecting nullable vs non-nullable encoding per column.
pub(crate) fn rb_encode_row(
    values: Vec<ClickHouseValue>,
    nullable_flags: &[bool],
    buf: &mut Vec<u8>,
) -> ReplResult<()> {
    for (val, &is_nullable) in values.into_iter().zip(nullable_flags.iter()) {
        if is_nullable {
            rb_encode_nullable(val, buf)?;
        } else {
            rb_encode_value(val, buf)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    #[test]
    fn cell_to_value_scalars() {
        assert_eq!(
            cell_to_clickhouse_value(Cell::Null).unwrap(),
            ClickHouseValue::Null
        );
        assert_eq!(
            cell_to_clickhouse_value(Cell::Bool(true)).unwrap(),
            ClickHouseValue::Bool(true)
        );
        assert_eq!(
            cell_to_clickhouse_value(Cell::I32(42)).unwrap(),
            ClickHouseValue::Int32(42)
        );
        assert_eq!(
            cell_to_clickhouse_value(Cell::String("hello".to_string())).unwrap(),
            ClickHouseValue::String("hello".to_string())
        );
    }

    #[test]
    fn cell_to_value_date() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(
            cell_to_clickhouse_value(Cell::Date(epoch)).unwrap(),
            ClickHouseValue::Date(0)
        );

        let day1 = NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
        assert_eq!(
            cell_to_clickhouse_value(Cell::Date(day1)).unwrap(),
            ClickHouseValue::Date(1)
        );
    }

    #[test]
    fn cell_to_value_bytes_hex() {
        assert_eq!(
            cell_to_clickhouse_value(Cell::Bytes(vec![0xde, 0xad, 0xbe, 0xef])).unwrap(),
            ClickHouseValue::String("deadbeef".to_string())
        );
    }

    #[test]
    fn unresolved_toast_placeholder_is_an_error() {
        assert!(cell_to_clickhouse_value(Cell::Unchanged).is_err());
    }

    #[test]
    fn encode_value_scalars() {
        let mut buf = Vec::new();

        rb_encode_value(ClickHouseValue::Bool(true), &mut buf).unwrap();
        assert_eq!(buf, [1u8]);

        buf.clear();
        rb_encode_value(ClickHouseValue::Int8(-1), &mut buf).unwrap();
        assert_eq!(buf, (-1i8).to_le_bytes());

        buf.clear();
        rb_encode_value(ClickHouseValue::Int32(-1), &mut buf).unwrap();
        assert_eq!(buf, (-1i32).to_le_bytes());

        buf.clear();
        rb_encode_value(ClickHouseValue::UInt64(0x1_0000_0001), &mut buf).unwrap();
        assert_eq!(buf, 0x1_0000_0001u64.to_le_bytes());

        buf.clear();
        rb_encode_value(ClickHouseValue::String("hi".to_string()), &mut buf).unwrap();
        assert_eq!(buf, [2, b'h', b'i']);

        buf.clear();
        rb_encode_value(ClickHouseValue::Date(1), &mut buf).unwrap();
        assert_eq!(buf, 1u16.to_le_bytes());
    }

    #[test]
    fn encode_uuid_wire_format() {
        let u = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let mut buf = Vec::new();
        rb_encode_value(ClickHouseValue::Uuid(*u.as_bytes()), &mut buf).unwrap();

        assert_eq!(buf.len(), 16);
        let bytes = u.as_bytes();
        let high = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let low = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
        let mut expected = high.to_le_bytes().to_vec();
        expected.extend_from_slice(&low.to_le_bytes());
        assert_eq!(buf, expected);
    }

    #[test]
    fn encode_nullable() {
        let mut buf = Vec::new();

        rb_encode_nullable(ClickHouseValue::Null, &mut buf).unwrap();
        assert_eq!(buf, [1u8]);

        buf.clear();
        rb_encode_nullable(ClickHouseValue::Int32(42), &mut buf).unwrap();
        let mut expected = vec![0u8];
        expected.extend_from_slice(&42i32.to_le_bytes());
        assert_eq!(buf, expected);
    }

    #[test]
    fn varint_encoding() {
        let mut buf = Vec::new();
        rb_varint(0, &mut buf);
        assert_eq!(buf, [0x00]);

        buf.clear();
        rb_varint(127, &mut buf);
        assert_eq!(buf, [0x7f]);

        buf.clear();
        rb_varint(128, &mut buf);
        assert_eq!(buf, [0x80, 0x01]);

        buf.clear();
        rb_varint(300, &mut buf);
        assert_eq!(buf, [0xac, 0x02]);
    }

    #[test]
    fn encode_row_mixed_nullability() {
        let mut buf = Vec::new();
        rb_encode_row(
            vec![
                ClickHouseValue::Int32(7),
                ClickHouseValue::Null,
                ClickHouseValue::Int8(1),
            ],
            &[false, true, false],
            &mut buf,
        )
        .unwrap();

        let mut expected = 7i32.to_le_bytes().to_vec();
        expected.push(1); // null indicator
        expected.extend_from_slice(&1i8.to_le_bytes());
        assert_eq!(buf, expected);
    }
}
