//! Webhook topics and delivery identifiers.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A webhook topic the gateway accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum WebhookTopic {
    /// The app was uninstalled from a shop.
    AppUninstalled,
    /// Shop settings changed.
    ShopUpdate,
    /// A product was updated.
    ProductsUpdate,
    /// An inventory level changed.
    InventoryLevelsUpdate,
    /// An order was created.
    OrdersCreate,
    /// Compliance: a customer asked for their stored data.
    CustomersDataRequest,
    /// Compliance: erase a customer's data.
    CustomersRedact,
    /// Compliance: erase all data for a shop (sent after uninstall).
    ShopRedact,
}

/// Error returned when a topic string is not recognized.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown webhook topic: {0}")]
pub struct UnknownTopic(pub String);

impl WebhookTopic {
    /// Every topic the gateway routes.
    pub const ALL: [Self; 8] = [
        Self::AppUninstalled,
        Self::ShopUpdate,
        Self::ProductsUpdate,
        Self::InventoryLevelsUpdate,
        Self::OrdersCreate,
        Self::CustomersDataRequest,
        Self::CustomersRedact,
        Self::ShopRedact,
    ];

    /// Subscriptions every installed shop must have.
    pub const MANDATORY: [Self; 4] = [
        Self::AppUninstalled,
        Self::CustomersDataRequest,
        Self::CustomersRedact,
        Self::ShopRedact,
    ];

    /// The topic as sent in the `X-Shopify-Topic` header, e.g. `app/uninstalled`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppUninstalled => "app/uninstalled",
            Self::ShopUpdate => "shop/update",
            Self::ProductsUpdate => "products/update",
            Self::InventoryLevelsUpdate => "inventory_levels/update",
            Self::OrdersCreate => "orders/create",
            Self::CustomersDataRequest => "customers/data_request",
            Self::CustomersRedact => "customers/redact",
            Self::ShopRedact => "shop/redact",
        }
    }

    /// The GraphQL enum value, e.g. `APP_UNINSTALLED`.
    #[must_use]
    pub const fn graphql_name(self) -> &'static str {
        match self {
            Self::AppUninstalled => "APP_UNINSTALLED",
            Self::ShopUpdate => "SHOP_UPDATE",
            Self::ProductsUpdate => "PRODUCTS_UPDATE",
            Self::InventoryLevelsUpdate => "INVENTORY_LEVELS_UPDATE",
            Self::OrdersCreate => "ORDERS_CREATE",
            Self::CustomersDataRequest => "CUSTOMERS_DATA_REQUEST",
            Self::CustomersRedact => "CUSTOMERS_REDACT",
            Self::ShopRedact => "SHOP_REDACT",
        }
    }

    /// Parse a GraphQL enum value back into a topic.
    #[must_use]
    pub fn from_graphql_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.graphql_name() == name)
    }

    /// Whether this is a data-privacy compliance topic.
    ///
    /// Compliance deliveries refer to data the app holds, so they are only
    /// accepted for shops the gateway knows about.
    #[must_use]
    pub const fn is_compliance(self) -> bool {
        matches!(
            self,
            Self::CustomersDataRequest | Self::CustomersRedact | Self::ShopRedact
        )
    }

    /// Route path for this topic, relative to the gateway base URL.
    #[must_use]
    pub fn path(self) -> String {
        format!("/webhooks/{}", self.as_str())
    }
}

impl fmt::Display for WebhookTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WebhookTopic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_owned()))
    }
}

impl TryFrom<String> for WebhookTopic {
    type Error = UnknownTopic;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WebhookTopic> for &'static str {
    fn from(topic: WebhookTopic) -> Self {
        topic.as_str()
    }
}

/// Errors that can occur when parsing a [`DeliveryId`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryIdError {
    /// The header value is empty or whitespace.
    #[error("delivery id cannot be empty")]
    Empty,
    /// The header value is too long to use as a key.
    #[error("delivery id must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
}

/// Unique identifier of one webhook delivery (the `X-Shopify-Webhook-Id` header).
///
/// Retries of the same delivery carry the same id, which makes it the
/// idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(String);

impl DeliveryId {
    /// Maximum accepted length.
    pub const MAX_LENGTH: usize = 255;

    /// Prefix of the idempotency record key.
    pub const KEY_PREFIX: &'static str = "webhook_processed:";

    /// Parse a delivery id from a header value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is blank or longer than [`Self::MAX_LENGTH`].
    pub fn parse(s: &str) -> Result<Self, DeliveryIdError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DeliveryIdError::Empty);
        }
        if trimmed.len() > Self::MAX_LENGTH {
            return Err(DeliveryIdError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key under which this delivery's idempotency record is stored.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        format!("{}{}", Self::KEY_PREFIX, self.0)
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_str_roundtrip() {
        for topic in WebhookTopic::ALL {
            assert_eq!(topic.as_str().parse::<WebhookTopic>().unwrap(), topic);
            assert_eq!(
                WebhookTopic::from_graphql_name(topic.graphql_name()),
                Some(topic)
            );
        }
    }

    #[test]
    fn test_unknown_topic() {
        let err = "carts/update".parse::<WebhookTopic>().unwrap_err();
        assert_eq!(err.to_string(), "unknown webhook topic: carts/update");
    }

    #[test]
    fn test_mandatory_topics_include_compliance() {
        let compliance: Vec<_> = WebhookTopic::ALL
            .into_iter()
            .filter(|t| t.is_compliance())
            .collect();
        for topic in compliance {
            assert!(WebhookTopic::MANDATORY.contains(&topic));
        }
        assert!(WebhookTopic::MANDATORY.contains(&WebhookTopic::AppUninstalled));
        assert!(!WebhookTopic::AppUninstalled.is_compliance());
    }

    #[test]
    fn test_topic_path() {
        assert_eq!(
            WebhookTopic::CustomersRedact.path(),
            "/webhooks/customers/redact"
        );
    }

    #[test]
    fn test_topic_serde() {
        let json = serde_json::to_string(&WebhookTopic::ShopRedact).unwrap();
        assert_eq!(json, "\"shop/redact\"");
        let topic: WebhookTopic = serde_json::from_str("\"orders/create\"").unwrap();
        assert_eq!(topic, WebhookTopic::OrdersCreate);
    }

    #[test]
    fn test_delivery_id_parse() {
        let id = DeliveryId::parse(" b54557e4-bdd9-4b37-8a5f-bf7d70bcd043 ").unwrap();
        assert_eq!(id.as_str(), "b54557e4-bdd9-4b37-8a5f-bf7d70bcd043");
        assert_eq!(
            id.idempotency_key(),
            "webhook_processed:b54557e4-bdd9-4b37-8a5f-bf7d70bcd043"
        );
    }

    #[test]
    fn test_delivery_id_rejects_blank_and_long() {
        assert_eq!(DeliveryId::parse("   "), Err(DeliveryIdError::Empty));
        assert!(matches!(
            DeliveryId::parse(&"x".repeat(256)),
            Err(DeliveryIdError::TooLong { .. })
        ));
    }
}
