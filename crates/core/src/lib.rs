//! Shopgate Core - Shared types library.
//!
//! This crate provides the value types shared by the shopgate components:
//! - `gateway` - OAuth installation flow and webhook ingestion (axum)
//! - `cli` - Command-line tools for migrations and operations
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Everything here is safe to use from tests, the CLI,
//! and the gateway alike.
//!
//! # Modules
//!
//! - [`types`] - Shop domains, OAuth install state, webhook topics, delivery ids,
//!   and newtype IDs

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
