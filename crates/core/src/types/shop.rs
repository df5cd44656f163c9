//! Shop domain type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`ShopDomain`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShopDomainError {
    /// The input string is empty (after stripping protocol and `www.`).
    #[error("shop domain cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("shop domain must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input contains a character that cannot appear in a hostname.
    #[error("shop domain contains invalid character {0:?}")]
    InvalidCharacter(char),
    /// A label is empty or starts/ends with a hyphen.
    #[error("shop domain has a malformed label")]
    MalformedLabel,
    /// The domain has no dot, so it cannot be a platform subdomain.
    #[error("shop domain must contain a dot")]
    MissingDot,
}

/// A normalized shop domain such as `acme.myshopify.com`.
///
/// Shop domains are the natural key for installed stores. Every domain held
/// by this type is lowercase and consists only of `[a-z0-9.-]`, so separators
/// such as `|` can never occur inside one.
///
/// ## Examples
///
/// ```
/// use shopgate_core::ShopDomain;
///
/// let shop = ShopDomain::normalize("https://www.Acme.myshopify.com/admin").unwrap();
/// assert_eq!(shop.as_str(), "acme.myshopify.com");
///
/// let shop = ShopDomain::normalize("acme").unwrap();
/// assert_eq!(shop.as_str(), "acme.myshopify.com");
///
/// assert!(ShopDomain::normalize("").is_err());
/// assert!(ShopDomain::normalize("acme|evil").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct ShopDomain(String);

impl ShopDomain {
    /// Platform domain suffix appended to bare shop handles.
    pub const DEFAULT_SUFFIX: &'static str = ".myshopify.com";

    /// Maximum length of a hostname.
    pub const MAX_LENGTH: usize = 253;

    /// Normalize user input into a shop domain using [`Self::DEFAULT_SUFFIX`].
    ///
    /// # Errors
    ///
    /// Returns an error if the normalized value is not a valid hostname.
    pub fn normalize(input: &str) -> Result<Self, ShopDomainError> {
        Self::normalize_with_suffix(input, Self::DEFAULT_SUFFIX)
    }

    /// Normalize user input into a shop domain.
    ///
    /// Trims whitespace, lowercases, strips an `http://`/`https://` scheme and
    /// anything after the host, strips leading `www.` labels (never down to the
    /// bare platform domain), and appends `suffix`
    /// when the host does not already end with it. Normalizing an already
    /// normalized domain returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the normalized value is not a valid hostname.
    pub fn normalize_with_suffix(input: &str, suffix: &str) -> Result<Self, ShopDomainError> {
        let lowered = input.trim().to_ascii_lowercase();

        let mut host = lowered.as_str();
        for scheme in ["https://", "http://"] {
            if let Some(rest) = host.strip_prefix(scheme) {
                host = rest;
                break;
            }
        }
        if let Some(end) = host.find(['/', '?', '#']) {
            host = host.get(..end).unwrap_or(host);
        }

        let suffix = suffix.to_ascii_lowercase();
        let platform_domain = suffix.trim_start_matches('.');
        while let Some(rest) = host.strip_prefix("www.") {
            // `www.myshopify.com` is a shop named `www`, not a prefixed platform domain.
            if rest == platform_domain {
                break;
            }
            host = rest;
        }

        if host.is_empty() {
            return Err(ShopDomainError::Empty);
        }

        if host.ends_with(&suffix) {
            Self::parse(host)
        } else {
            Self::parse(&format!("{host}{suffix}"))
        }
    }

    /// Parse an already-normalized shop domain without rewriting it.
    ///
    /// Used for values that went through [`Self::normalize`] earlier, such as
    /// the shop carried inside the OAuth `state` parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a lowercase hostname made of
    /// dot-separated labels.
    pub fn parse(s: &str) -> Result<Self, ShopDomainError> {
        if s.is_empty() {
            return Err(ShopDomainError::Empty);
        }

        if s.len() > Self::MAX_LENGTH {
            return Err(ShopDomainError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.'))
        {
            return Err(ShopDomainError::InvalidCharacter(bad));
        }

        if !s.contains('.') {
            return Err(ShopDomainError::MissingDot);
        }

        let malformed = s
            .split('.')
            .any(|label| label.is_empty() || label.starts_with('-') || label.ends_with('-'));
        if malformed {
            return Err(ShopDomainError::MalformedLabel);
        }

        Ok(Self(s.to_owned()))
    }

    /// Returns the shop domain as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `ShopDomain` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Returns the first label, e.g. `acme` for `acme.myshopify.com`.
    #[must_use]
    pub fn handle(&self) -> &str {
        self.0.split('.').next().unwrap_or("")
    }
}

impl fmt::Display for ShopDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ShopDomain {
    type Err = ShopDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ShopDomain {
    type Error = ShopDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ShopDomain> for String {
    fn from(shop: ShopDomain) -> Self {
        shop.0
    }
}

impl AsRef<str> for ShopDomain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// SQLx support (with postgres feature)
#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for ShopDomain {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ShopDomain {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(&s)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for ShopDomain {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}
