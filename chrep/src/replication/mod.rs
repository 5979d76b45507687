//! Source-side replication plumbing: client, streams, and the consumer task.

pub mod client;
pub mod consumer;
pub mod stream;
