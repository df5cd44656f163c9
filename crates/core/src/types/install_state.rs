//! OAuth install state carried through the platform's authorize redirect.
//!
//! The platform echoes the `state` query parameter back unchanged on the
//! callback, but it may reorder or drop the other parameters. The embedding
//! host therefore travels inside `state` as well as (sometimes) on its own.
//!
//! Wire format: `<shop>` or `<shop>||<urlencoded-host>`. Valid shop domains
//! never contain `|`, and the host is percent-encoded, so the first `||` is
//! always the separator.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::shop::{ShopDomain, ShopDomainError};

/// Separator between the shop and the encoded host.
const SEPARATOR: &str = "||";

/// Errors that can occur when decoding an [`InstallState`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallStateError {
    /// The shop portion is not a valid shop domain.
    #[error("invalid shop in state: {0}")]
    Shop(#[from] ShopDomainError),
    /// The host portion is not valid percent-encoded UTF-8.
    #[error("host in state is not valid percent-encoding")]
    HostEncoding,
}

/// The value round-tripped through the OAuth `state` parameter.
///
/// ```
/// use shopgate_core::{InstallState, ShopDomain};
///
/// let shop = ShopDomain::normalize("acme").unwrap();
/// let state = InstallState::new(shop, Some("YWRtaW4uc2hvcGlmeS5jb20vc3RvcmUvYWNtZQ==".into()));
///
/// let encoded = state.encode();
/// assert_eq!(InstallState::decode(&encoded).unwrap(), state);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallState {
    shop: ShopDomain,
    host: Option<String>,
}

impl InstallState {
    /// Create a new install state.
    #[must_use]
    pub const fn new(shop: ShopDomain, host: Option<String>) -> Self {
        Self { shop, host }
    }

    /// The shop being installed.
    #[must_use]
    pub const fn shop(&self) -> &ShopDomain {
        &self.shop
    }

    /// The embedding host token, present for installs started inside the admin iframe.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Consume the state and return its parts.
    #[must_use]
    pub fn into_parts(self) -> (ShopDomain, Option<String>) {
        (self.shop, self.host)
    }

    /// Serialize to the `state` query parameter value.
    #[must_use]
    pub fn encode(&self) -> String {
        match &self.host {
            Some(host) => format!(
                "{}{SEPARATOR}{}",
                self.shop,
                urlencoding::encode(host)
            ),
            None => self.shop.to_string(),
        }
    }

    /// Deserialize from a `state` query parameter value.
    ///
    /// # Errors
    ///
    /// Returns an error if the shop is not a valid normalized domain or the
    /// host is not valid percent-encoding.
    pub fn decode(raw: &str) -> Result<Self, InstallStateError> {
        let (shop, host) = match raw.split_once(SEPARATOR) {
            Some((shop, encoded_host)) => {
                let host = urlencoding::decode(encoded_host)
                    .map_err(|_| InstallStateError::HostEncoding)?;
                (shop, Some(host.into_owned()))
            }
            None => (raw, None),
        };

        Ok(Self {
            shop: ShopDomain::parse(shop)?,
            host,
        })
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn shop() -> ShopDomain {
        ShopDomain::normalize("foo").unwrap()
    }

    #[test]
    fn test_encode_without_host_is_bare_shop() {
        let state = InstallState::new(shop(), None);
        assert_eq!(state.encode(), "foo.myshopify.com");
    }

    #[test]
    fn test_encode_with_host_percent_encodes() {
        let state = InstallState::new(shop(), Some("abc=/+&|x".to_string()));
        assert_eq!(state.encode(), "foo.myshopify.com||abc%3D%2F%2B%26%7Cx");
    }

    #[test]
    fn test_roundtrip_without_host() {
        let state = InstallState::new(shop(), None);
        let decoded = InstallState::decode(&state.encode()).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.host(), None);
    }

    #[test]
    fn test_roundtrip_with_hosts() {
        let hosts = [
            "YWRtaW4uc2hvcGlfeS5jb20vc3RvcmUvZm9v",
            "YWRtaW4=",
            "contains||double|pipes",
            "spaces and ünïcode",
            "",
        ];
        for host in hosts {
            let state = InstallState::new(shop(), Some(host.to_string()));
            let decoded = InstallState::decode(&state.encode()).unwrap();
            assert_eq!(decoded, state, "roundtrip failed for host {host:?}");
        }
    }

    #[test]
    fn test_decode_rejects_invalid_shop() {
        assert!(matches!(
            InstallState::decode("not a shop||abc"),
            Err(InstallStateError::Shop(_))
        ));
        assert!(InstallState::decode("").is_err());
    }

    #[test]
    fn test_decode_rejects_bad_percent_encoding() {
        assert_eq!(
            InstallState::decode("foo.myshopify.com||%FF%FE"),
            Err(InstallStateError::HostEncoding)
        );
    }

    #[test]
    fn test_into_parts() {
        let (shop_out, host) = InstallState::new(shop(), Some("h".into())).into_parts();
        assert_eq!(shop_out, shop());
        assert_eq!(host.as_deref(), Some("h"));
    }
}
