//! Stored shop credential commands.
//!
//! # Usage
//!
//! ```bash
//! # List installed shops
//! shopgate credentials list
//!
//! # Mark a shop's token inactive (e.g. after a missed uninstall webhook)
//! shopgate credentials deactivate acme.myshopify.com
//! ```

use shopgate_core::ShopDomain;
use shopgate_gateway::db::{CredentialStore, PgCredentialStore};

use super::{CommandError, connect};

/// Print every stored credential, most recently updated first.
///
/// Tokens are never printed.
pub async fn list() -> Result<(), CommandError> {
    let store = PgCredentialStore::new(connect().await?);
    let credentials = store.list().await?;

    #[allow(clippy::print_stdout)]
    {
        println!(
            "{:<40} {:<8} {:<25} SCOPES",
            "SHOP", "ACTIVE", "UPDATED"
        );
        for credential in &credentials {
            println!(
                "{:<40} {:<8} {:<25} {}",
                credential.shop,
                credential.is_active,
                credential.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
                credential.scopes.join(",")
            );
        }
        println!("{} shop(s)", credentials.len());
    }

    Ok(())
}

/// Mark the credential for `shop` inactive.
pub async fn deactivate(shop: &str) -> Result<(), CommandError> {
    let shop = ShopDomain::parse(shop).map_err(|e| CommandError::InvalidArgument(e.to_string()))?;
    let store = PgCredentialStore::new(connect().await?);

    if store.deactivate(&shop).await? {
        tracing::info!(shop = %shop, "Credential deactivated");
    } else {
        tracing::warn!(shop = %shop, "No credential stored for shop");
    }

    Ok(())
}
