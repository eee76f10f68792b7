//! Error-context plumbing and time helpers used across all jobkeeper crates.

pub mod error;
pub mod time;

pub use error::FromMessage;
