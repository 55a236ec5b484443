//! Shared error plumbing used across the lectern crates.

pub mod error;

pub use error::FromMessage;
