//! Core types and utilities for the R-Oracle client
//!
//! This crate provides shared types used across all components:
//! - Price sources and fetched quotes
//! - On-chain oracle records and fixed-point price scaling
//! - Error taxonomy
//! - Layered configuration

pub mod types;
pub mod settings;
pub mod errors;

pub use types::*;
pub use settings::*;
pub use errors::*;
