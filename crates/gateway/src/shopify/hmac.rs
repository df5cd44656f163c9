//! Signature verification for platform-signed requests.
//!
//! Two schemes share the app's client secret as the HMAC-SHA256 key:
//!
//! - **OAuth callbacks** sign the query string: every parameter except the
//!   signature itself, sorted by key, joined as `key=value` with `&`, and
//!   hex-encoded.
//! - **Webhooks** sign the exact request body bytes; the base64 digest is sent
//!   in the `X-Shopify-Hmac-Sha256` header.
//!
//! Webhook verification takes `&[u8]` straight from the request body. The
//! body must never be parsed and re-serialized before verification: two JSON
//! documents with the same meaning rarely have the same bytes.
//!
//! Both verifiers return `false` on any problem (missing signature, bad
//! encoding, mismatch) and never panic. Comparison is constant-time via
//! [`Mac::verify_slice`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Query parameters that carry a signature and are excluded from the message.
const SIGNATURE_PARAMS: &[&str] = &["hmac", "signature"];

/// Build the canonical message signed for an OAuth callback.
fn query_message<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs: Vec<(&str, &str)> = params
        .into_iter()
        .filter(|(key, _)| !SIGNATURE_PARAMS.contains(key))
        .collect();

    pairs.sort_unstable();

    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn new_mac(secret: &[u8]) -> Option<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(secret).ok()
}

/// Compute the hex signature the platform attaches to an OAuth callback.
///
/// Any `hmac`/`signature` entries in `params` are ignored.
#[must_use]
pub fn compute_query_hmac<'a, I>(params: I, secret: &[u8]) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let Some(mut mac) = new_mac(secret) else {
        return String::new();
    };
    mac.update(query_message(params).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify the `hmac` parameter of an OAuth callback query.
///
/// Returns `false` when the `hmac` parameter is missing, is not hex, or does
/// not match the signature computed over the remaining parameters.
#[must_use]
pub fn verify_query_hmac<'a, I>(params: I, secret: &[u8]) -> bool
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let params: Vec<(&str, &str)> = params.into_iter().collect();

    let Some(provided) = params
        .iter()
        .find(|(key, _)| *key == "hmac")
        .map(|(_, value)| *value)
    else {
        return false;
    };

    let Ok(provided) = hex::decode(provided.trim()) else {
        return false;
    };

    let Some(mut mac) = new_mac(secret) else {
        return false;
    };
    mac.update(query_message(params.iter().copied()).as_bytes());
    mac.verify_slice(&provided).is_ok()
}

/// Compute the base64 signature the platform attaches to a webhook body.
#[must_use]
pub fn compute_webhook_hmac(raw_body: &[u8], secret: &[u8]) -> String {
    let Some(mut mac) = new_mac(secret) else {
        return String::new();
    };
    mac.update(raw_body);
    BASE64.encode(mac.finalize().into_bytes())
}

/// Verify a webhook signature header against the raw request body.
#[must_use]
pub fn verify_webhook_hmac(raw_body: &[u8], header_signature: &str, secret: &[u8]) -> bool {
    let Ok(provided) = BASE64.decode(header_signature.trim()) else {
        return false;
    };

    let Some(mut mac) = new_mac(secret) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&provided).is_ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"hush";

    fn callback_params<'a>() -> Vec<(&'a str, &'a str)> {
        vec![
            ("shop", "some-shop.myshopify.com"),
            ("code", "0907a61c0c8d55e99db179b68161bc00"),
            ("timestamp", "1337178173"),
            ("state", "some-shop.myshopify.com"),
        ]
    }

    #[test]
    fn test_query_message_sorted_and_excludes_signatures() {
        let mut params = callback_params();
        params.push(("hmac", "abc"));
        params.push(("signature", "def"));
        assert_eq!(
            query_message(params),
            "code=0907a61c0c8d55e99db179b68161bc00&shop=some-shop.myshopify.com\
             &state=some-shop.myshopify.com&timestamp=1337178173"
        );
    }

    #[test]
    fn test_known_vector() {
        // Reference vector from the platform's OAuth documentation.
        let params = [
            ("code", "0907a61c0c8d55e99db179b68161bc00"),
            ("shop", "some-shop.myshopify.com"),
            ("state", "0.6784241404160823"),
            ("timestamp", "1337178173"),
        ];
        assert_eq!(
            compute_query_hmac(params, SECRET),
            "700e2dadb827fcc8609e9d5ce208b2e9cdaab9df07390d2cbca10d7c328fc4bf"
        );
    }

    #[test]
    fn test_verify_query_hmac_accepts_valid_signature_in_any_order() {
        let params = callback_params();
        let signature = compute_query_hmac(params.clone(), SECRET);

        let mut signed = params;
        signed.reverse();
        signed.insert(1, ("hmac", signature.as_str()));
        assert!(verify_query_hmac(signed, SECRET));
    }

    #[test]
    fn test_verify_query_hmac_rejects_any_mutated_value() {
        let params = callback_params();
        let signature = compute_query_hmac(params.clone(), SECRET);

        for index in 0..params.len() {
            let mut mutated: Vec<(&str, String)> = params
                .iter()
                .map(|(k, v)| (*k, (*v).to_string()))
                .collect();
            if let Some(entry) = mutated.get_mut(index) {
                entry.1.push('x');
            }
            let mut signed: Vec<(&str, &str)> =
                mutated.iter().map(|(k, v)| (*k, v.as_str())).collect();
            signed.push(("hmac", signature.as_str()));
            assert!(
                !verify_query_hmac(signed, SECRET),
                "mutating param {index} should invalidate the signature"
            );
        }
    }

    #[test]
    fn test_verify_query_hmac_rejects_added_param() {
        let params = callback_params();
        let signature = compute_query_hmac(params.clone(), SECRET);
        let mut signed = params;
        signed.push(("host", "injected"));
        signed.push(("hmac", signature.as_str()));
        assert!(!verify_query_hmac(signed, SECRET));
    }

    #[test]
    fn test_verify_query_hmac_missing_or_malformed_signature() {
        assert!(!verify_query_hmac(callback_params(), SECRET));

        let mut params = callback_params();
        params.push(("hmac", "not-hex"));
        assert!(!verify_query_hmac(params, SECRET));

        let mut params = callback_params();
        params.push(("hmac", ""));
        assert!(!verify_query_hmac(params, SECRET));
    }

    #[test]
    fn test_verify_query_hmac_wrong_secret() {
        let params = callback_params();
        let signature = compute_query_hmac(params.clone(), b"other");
        let mut signed = params;
        signed.push(("hmac", signature.as_str()));
        assert!(!verify_query_hmac(signed, SECRET));
    }

    #[test]
    fn test_verify_webhook_hmac_valid() {
        let body = br#"{"id":820982911946154508,"email":"jon@example.com"}"#;
        let header = compute_webhook_hmac(body, SECRET);
        assert!(verify_webhook_hmac(body, &header, SECRET));
        assert!(verify_webhook_hmac(body, &format!(" {header} "), SECRET));
    }

    #[test]
    fn test_verify_webhook_hmac_rejects_flipped_byte() {
        let body = br#"{"id":820982911946154508,"email":"jon@example.com"}"#.to_vec();
        let header = compute_webhook_hmac(&body, SECRET);

        let mut tampered = body;
        if let Some(byte) = tampered.get_mut(5) {
            *byte ^= 0x01;
        }
        assert!(!verify_webhook_hmac(&tampered, &header, SECRET));
    }

    #[test]
    fn test_verify_webhook_hmac_requires_original_bytes() {
        // Same JSON document, different bytes: compact vs pretty printed.
        let compact = br#"{"id":1,"name":"Widget","tags":["a","b"]}"#;
        let header = compute_webhook_hmac(compact, SECRET);

        let value: serde_json::Value = serde_json::from_slice(compact).unwrap();
        let pretty = serde_json::to_vec_pretty(&value).unwrap();

        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&pretty).unwrap(),
            value
        );
        assert!(verify_webhook_hmac(compact, &header, SECRET));
        assert!(!verify_webhook_hmac(&pretty, &header, SECRET));
    }

    #[test]
    fn test_verify_webhook_hmac_malformed_header() {
        let body = b"{}";
        assert!(!verify_webhook_hmac(body, "", SECRET));
        assert!(!verify_webhook_hmac(body, "%%%not-base64%%%", SECRET));
        assert!(!verify_webhook_hmac(body, &BASE64.encode(b"short"), SECRET));
    }
}
