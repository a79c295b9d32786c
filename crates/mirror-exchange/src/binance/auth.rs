//! Binance request signing.
//!
//! Private endpoints take a `signature` parameter: the HMAC-SHA256 of the
//! URL-encoded query string, keyed with the API secret and rendered as
//! lowercase hex. The query must already contain `timestamp` (and usually
//! `recvWindow`) when it is signed.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute an HMAC-SHA256 signature and return it as a lowercase hex string.
pub fn hmac_sha256_sign(secret: &str, message: &str) -> String {
    // HMAC is defined for keys of any length, so this cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts any key length"),
    };
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// URL-encode `params` in order and join them with `&`.
pub fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build a URL-encoded query string with `&signature=<hex>` appended.
///
/// The signature covers exactly the bytes that precede it, so parameter
/// order is preserved as given.
pub fn build_signed_query(params: &[(&str, String)], secret: &str) -> String {
    let query = encode_query(params);
    let signature = hmac_sha256_sign(secret, &query);
    if query.is_empty() {
        format!("signature={signature}")
    } else {
        format!("{query}&signature={signature}")
    }
}
