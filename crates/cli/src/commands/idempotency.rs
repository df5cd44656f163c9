//! Webhook dedup record maintenance.
//!
//! Expired records are ignored by lookups, so purging only reclaims space.
//! Run it from a scheduler:
//!
//! ```bash
//! shopgate idempotency purge
//! ```

use shopgate_gateway::db::{IdempotencyError, IdempotencyStore, PgIdempotencyStore};
use thiserror::Error;

use super::{CommandError, connect};

/// Errors that can occur while purging.
#[derive(Debug, Error)]
pub enum PurgeError {
    /// Could not connect.
    #[error(transparent)]
    Connect(#[from] CommandError),

    /// The delete failed.
    #[error(transparent)]
    Store(#[from] IdempotencyError),
}

/// Delete expired dedup records.
pub async fn purge() -> Result<(), PurgeError> {
    let store = PgIdempotencyStore::new(connect().await?);
    let removed = store.purge_expired().await?;
    tracing::info!(removed, "Purged expired idempotency records");
    Ok(())
}
