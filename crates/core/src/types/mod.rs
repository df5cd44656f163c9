//! Core types for shopgate.
//!
//! This module provides type-safe wrappers for the values that cross the
//! trust boundary with the commerce platform.

pub mod id;
pub mod install_state;
pub mod shop;
pub mod webhook;

pub use id::*;
pub use install_state::{InstallState, InstallStateError};
pub use shop::{ShopDomain, ShopDomainError};
pub use webhook::{DeliveryId, DeliveryIdError, UnknownTopic, WebhookTopic};
