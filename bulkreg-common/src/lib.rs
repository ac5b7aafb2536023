//! # Bulkreg Common Library
//!
//! Shared code for the bulk registration services:
//! - Error types and crate-wide `Result` alias
//! - Configuration resolution (env → TOML → defaults)

pub mod config;
pub mod error;

pub use error::{Error, Result};
