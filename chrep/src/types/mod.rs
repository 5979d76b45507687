//! Common types used throughout the replication pipeline.

mod cell;
mod lsn;
mod message;
mod row;
mod schema;

pub use cell::*;
pub use lsn::*;
pub use message::*;
pub use row::*;
pub use schema::*;
