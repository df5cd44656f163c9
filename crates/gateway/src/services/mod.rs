//! Business logic services for the gateway.
//!
//! # Services
//!
//! - `installation` - OAuth install state machine
//! - `idempotency` - Fail-open webhook dedup guard
//! - `circuit_breaker` - Breaker protecting the dedup store
//! - `compliance` - Mandatory webhook subscription reconciliation

pub mod circuit_breaker;
pub mod compliance;
pub mod idempotency;
pub mod installation;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use compliance::{ComplianceWebhookRegistrar, RegistrationReport, TopicOutcome};
pub use idempotency::{GuardDecision, IdempotencyGuard, UnguardedReason};
pub use installation::{
    CallbackParams, InstallError, InstallOutcome, InstallRedirect, InstallStage, InstallationFlow,
};
