//! Shared deserialization and signing helpers
//!
//! Venue REST payloads carry numbers as strings; the visitors here parse
//! them in place so the model structs stay plain `f64`/`i64` fields.

use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde::{
    de::{self, Error, Visitor},
    Deserialize, Deserializer,
};
use sha2::Sha256;

struct F64Visitor;

impl Visitor<'_> for F64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string containing an f64 number")
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if s.is_empty() {
            Ok(None)
        } else {
            Ok(Some(s.parse::<f64>().map_err(Error::custom)?))
        }
    }
}

pub fn from_str_to_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer
        .deserialize_str(F64Visitor)
        .map(|value| value.unwrap_or(0.0))
}

pub fn to_uppercase<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(deserializer)?;
    Ok(s.to_uppercase())
}

/// HMAC-SHA256 over `payload`, hex-encoded. Binance query signature.
pub fn sign_hmac_sha256_hex(secret: &str, payload: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// HMAC-SHA256 over `payload`, base64-encoded. KuCoin header signature.
pub fn sign_hmac_sha256_base64(secret: &str, payload: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize)]
    struct Row {
        #[serde(deserialize_with = "from_str_to_f64")]
        price: f64,
    }

    #[test]
    fn parses_stringified_numbers() {
        let row: Row = serde_json::from_str(r#"{"price":"31.85"}"#).unwrap();
        assert_eq!(row.price, 31.85);
    }

    #[test]
    fn empty_strings_default() {
        let row: Row = serde_json::from_str(r#"{"price":""}"#).unwrap();
        assert_eq!(row.price, 0.0);
    }

    #[test]
    fn hex_signature_is_stable() {
        let sig = sign_hmac_sha256_hex("secret", "symbol=BTCUSDT&timestamp=1");
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, sign_hmac_sha256_hex("secret", "symbol=BTCUSDT&timestamp=1"));
    }
}
