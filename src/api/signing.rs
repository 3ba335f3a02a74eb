use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::Error;
use crate::Result;

type HmacSha256 = Hmac<Sha256>;

/// Join parameters as `k1=v1&k2=v2` in the order given
///
/// Values are sent verbatim; callers only pass symbols, enum names, numbers
/// and client ids, none of which need escaping.
pub fn canonical_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercase hex HMAC-SHA256 of `payload`
pub fn sign(secret: &str, payload: &str) -> Result<String> {
    if secret.is_empty() {
        return Err(Error::Signature("API secret is not configured".to_string()));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Signature(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build the final signed query string
///
/// `recvWindow` (when non-zero) and `timestamp` are appended after `params`,
/// the signature is computed over that exact string and appended last.
pub fn signed_query(
    params: &[(&str, String)],
    recv_window_ms: u64,
    timestamp_ms: i64,
    secret: &str,
) -> Result<String> {
    let mut query = canonical_query(params);

    let mut push = |key: &str, value: String| {
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(key);
        query.push('=');
        query.push_str(&value);
    };
    if recv_window_ms > 0 {
        push("recvWindow", recv_window_ms.to_string());
    }
    push("timestamp", timestamp_ms.to_string());

    let signature = sign(secret, &query)?;
    query.push_str("&signature=");
    query.push_str(&signature);
    Ok(query)
}
