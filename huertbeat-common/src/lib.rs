//! # Huertbeat Common Library
//!
//! Shared code for the huertbeat service:
//! - Error types
//! - Credentials and tunables loading
//! - Configuration file resolution

pub mod config;
pub mod error;

pub use error::{Error, Result};
