//! ClickHouse client and RowBinary wire encoding.

pub mod client;
pub mod encoding;

pub use client::ClickHouseClient;
pub use encoding::ClickHouseValue;
