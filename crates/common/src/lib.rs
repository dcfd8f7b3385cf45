//! Shared error definitions used across all switchyard crates.

pub mod error;

pub use error::{Context, Error, ErrorCode, ErrorKind, FromMessage, Result};
