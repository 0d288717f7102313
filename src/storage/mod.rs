//! Persistence: the sqlite store and the replicated-blob writer.

pub mod replica;
pub mod store;

pub use replica::{BlobStore, ReplicatedWriter};
pub use store::{CachedPayload, JobStatusRow, Store};
