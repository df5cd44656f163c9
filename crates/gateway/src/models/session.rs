//! Session-related types.

use serde::{Deserialize, Serialize};
use shopgate_core::{ShopDomain, ShopUserId};

/// Session-stored shop identity, written at the end of an install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentShop {
    /// Installed shop.
    pub shop: ShopDomain,
    /// The shop's application user.
    pub user_id: ShopUserId,
    /// Embedding host, for installs started inside the platform admin.
    pub host: Option<String>,
}

/// Session keys.
pub mod keys {
    /// Key for the authenticated shop.
    pub const CURRENT_SHOP: &str = "current_shop";
}
