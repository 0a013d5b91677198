//! Authentication utilities for the OKX v5 API
//!
//! Every private request carries a base64 HMAC-SHA256 signature over
//! `timestamp + METHOD + request_path + body`, keyed with the API secret.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::VenueError;

type HmacSha256 = Hmac<Sha256>;

/// Generate the OKX request signature
///
/// `request_path` includes the query string for GET requests; `body` is
/// empty for GET and the JSON payload for POST.
///
/// # Example
///
/// ```
/// use perp_trader::okx::auth::sign_request;
///
/// let signature = sign_request(
///     "2024-01-01T00:00:00.000Z",
///     "GET",
///     "/api/v5/account/balance?ccy=USDT",
///     "",
///     "your-api-secret",
/// )
/// .unwrap();
/// ```
pub fn sign_request(
    timestamp: &str,
    method: &str,
    request_path: &str,
    body: &str,
    secret: &str,
) -> Result<String, VenueError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| VenueError::Auth(format!("invalid secret: {e}")))?;
    mac.update(timestamp.as_bytes());
    mac.update(method.to_uppercase().as_bytes());
    mac.update(request_path.as_bytes());
    mac.update(body.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// ISO-8601 UTC timestamp with millisecond precision, as OKX expects
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// API credentials container
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
    passphrase: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .field("passphrase", &"***")
            .finish()
    }
}

impl Credentials {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: passphrase.into(),
        }
    }

    /// Create credentials from environment variables
    ///
    /// Looks for `OKX_API_KEY`, `OKX_SECRET_KEY` and `OKX_PASSPHRASE`
    pub fn from_env() -> Result<Self, std::env::VarError> {
        let api_key = std::env::var("OKX_API_KEY")?;
        let api_secret = std::env::var("OKX_SECRET_KEY")?;
        let passphrase = std::env::var("OKX_PASSPHRASE")?;
        Ok(Self::new(api_key, api_secret, passphrase))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty() && !self.passphrase.is_empty()
    }

    /// Sign one request
    pub fn sign(
        &self,
        timestamp: &str,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<String, VenueError> {
        sign_request(timestamp, method, request_path, body, &self.api_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let signature = sign_request("", "", "The quick brown fox jumps over the lazy dog", "", "key")
            .unwrap();
        assert_eq!(signature, "97yD9DBThCSxMpjmqm+xQ+9NWaFJRhdZl0edvC0aPNg=");
    }

    #[test]
    fn test_prehash_concatenation() {
        let signature = sign_request(
            "2024-01-01T00:00:00.000Z",
            "GET",
            "/api/v5/account/balance?ccy=USDT",
            "",
            "secret",
        )
        .unwrap();
        assert_eq!(signature, "gLs6l9GXeLDJZxxFYmlsn8GeYlqGeSOJKAI+LyQRTqo=");
    }

    #[test]
    fn test_method_is_uppercased() {
        let lower = sign_request("t", "get", "/p", "", "s").unwrap();
        let upper = sign_request("t", "GET", "/p", "", "s").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_different_bodies_produce_different_signatures() {
        let sig1 = sign_request("t", "POST", "/api/v5/trade/order", r#"{"sz":"1"}"#, "s").unwrap();
        let sig2 = sign_request("t", "POST", "/api/v5/trade/order", r#"{"sz":"2"}"#, "s").unwrap();
        assert_ne!(sig1, sig2);
    }

    #[test]
    fn test_timestamp_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(timestamp(now), "2024-03-05T07:08:09.000Z");
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let creds = Credentials::new("my_key", "my_secret", "my_pass");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("my_key"));
        assert!(!debug.contains("my_secret"));
        assert!(!debug.contains("my_pass"));
        assert!(creds.is_complete());
    }
}
