//! Persisted outputs.

pub mod storage;

pub use storage::ResultsWriter;
