//! BitMEX request signing.
//!
//! WebSocket authentication signs `"GET" + target + expires` with
//! HMAC-SHA256 over the API secret and sends the lowercase hex digest in an
//! `authKeyExpires` message.

use hmac::{Hmac, Mac};
use mdc_core::time_util;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of a signed request.
pub const AUTH_TTL_SECS: u64 = 10;

/// Expiration timestamp for a request signed now.
pub fn expires() -> u64 {
    time_util::now_s() + AUTH_TTL_SECS
}

/// Compute the request signature as a lowercase hex string.
pub fn request_signature(secret: &str, verb: &str, target: &str, expires: u64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{verb}{target}{expires}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
