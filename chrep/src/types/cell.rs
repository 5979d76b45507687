use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

/// A single typed value in a replicated row.
///
/// [`Cell::Unchanged`] is the placeholder the source sends for an out-of-line
/// (TOAST) value that did not change in an update; it must be resolved from
/// the row's pre-image before the cell is encoded for the destination.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// SQL NULL.
    Null,
    /// Unchanged TOAST placeholder, resolved from the old row before encoding.
    Unchanged,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// Arbitrary-precision numeric, kept in its textual form.
    Numeric(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    String(String),
}

impl Cell {
    /// Returns `true` for the unchanged TOAST placeholder.
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Cell::Unchanged)
    }
}
