//! Shopgate Gateway library.
//!
//! OAuth installation and webhook ingestion for a Shopify app, exposed as a
//! library so the CLI and integration tests can drive the same code the
//! server runs.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod shopify;
pub mod state;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
