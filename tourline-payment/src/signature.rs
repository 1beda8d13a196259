use hmac::{Hmac, Mac};
use sha2::Sha256;
use tourline_core::{CoreError, CoreResult};

type HmacSha256 = Hmac<Sha256>;

/// How a provider joins the fields of the string it signs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonical {
    /// Values only, `|` separated (ZaloPay).
    Pipe,
    /// `key=value` pairs, `&` separated (MoMo).
    Query,
}

/// Builds the string to sign. Fields are taken in the order given; the
/// provider's documented order is the caller's responsibility.
pub fn canonical(style: Canonical, fields: &[(&str, &str)]) -> String {
    match style {
        Canonical::Pipe => fields
            .iter()
            .map(|(_, value)| *value)
            .collect::<Vec<_>>()
            .join("|"),
        Canonical::Query => fields
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&"),
    }
}

/// Lowercase hex HMAC-SHA256 of `message` under `secret`.
pub fn sign(secret: &str, message: &str) -> CoreResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| CoreError::GatewayError("HMAC key error".to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature. Malformed hex is a mismatch.
pub fn verify(secret: &str, message: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message.as_bytes());
    mac.verify_slice(&expected).is_ok()
}
