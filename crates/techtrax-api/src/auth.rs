// Bearer credentials and local access-token inspection.
//
// Access tokens are JWTs. The client never verifies their signature (that
// is the backend's job); it only reads the payload segment to learn the
// expiry and identity claims without a network round-trip.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::Error;

/// Access + refresh bearer pair issued by the login and refresh endpoints.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
        }
    }

    /// Decode the access token's claims.
    pub fn access_claims(&self) -> Result<AccessClaims, Error> {
        decode_claims(self.access_token.expose_secret())
    }
}

/// Claims carried in the access token payload.
///
/// Every claim is optional: the backend has shipped several claim layouts
/// and the client only needs the expiry plus enough to label the session.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    /// Subject (user id) in standard JWT layouts.
    #[serde(default)]
    pub sub: Option<String>,

    /// User id in the backend's own layout.
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub tenant_id: Option<String>,

    #[serde(default)]
    pub first_name: Option<String>,

    #[serde(default)]
    pub last_name: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// Expiration time (Unix seconds).
    #[serde(default)]
    pub exp: Option<i64>,

    /// Issued at (Unix seconds).
    #[serde(default)]
    pub iat: Option<i64>,
}

impl AccessClaims {
    /// The user id, preferring the backend's own claims over the JWT `sub`.
    pub fn subject(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.user_id.as_deref())
            .or(self.sub.as_deref())
    }

    /// Best-effort human label for the token holder.
    pub fn display_name(&self) -> Option<String> {
        if let Some(ref name) = self.name {
            return Some(name.clone());
        }
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first.clone()),
            _ => self.email.clone(),
        }
    }

    /// Absolute expiry instant, if the token carries one.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// Whether the token expires before `now + window`.
    ///
    /// A token without an `exp` claim is treated as already expired.
    pub fn expires_within(&self, window: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(at) => at - now < window,
            None => true,
        }
    }
}

/// Decode the payload segment of a JWT without verifying its signature.
pub fn decode_claims(token: &str) -> Result<AccessClaims, Error> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next()) {
        (Some(_header), Some(payload)) if !payload.is_empty() => payload,
        _ => return Err(Error::MalformedToken("expected three dot-separated segments".into())),
    };

    let trimmed = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .map_err(|e| Error::MalformedToken(format!("payload is not base64: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| Error::MalformedToken(format!("payload is not a claims object: {e}")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn encode(payload: &serde_json::Value) -> String {
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("eyJhbGciOiJIUzI1NiJ9.{body}.sig")
    }

    #[test]
    fn decodes_backend_claims() {
        let token = encode(&serde_json::json!({
            "id": "u-1",
            "email": "doctor@x.com",
            "role": "doctor",
            "tenantId": "t-9",
            "firstName": "Ana",
            "lastName": "Diaz",
            "exp": 4_102_444_800_i64
        }));

        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.subject(), Some("u-1"));
        assert_eq!(claims.tenant_id.as_deref(), Some("t-9"));
        assert_eq!(claims.display_name().as_deref(), Some("Ana Diaz"));
        assert!(claims.expires_at().is_some());
    }

    #[test]
    fn sub_is_fallback_user_id() {
        let token = encode(&serde_json::json!({ "sub": "abc", "exp": 1 }));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.subject(), Some("abc"));
    }

    #[test]
    fn garbage_token_is_malformed() {
        assert!(matches!(
            decode_claims("not-a-jwt"),
            Err(Error::MalformedToken(_))
        ));
        assert!(matches!(
            decode_claims("a.%%%.c"),
            Err(Error::MalformedToken(_))
        ));
    }

    #[test]
    fn expiry_window() {
        let now = Utc::now();
        let soon = AccessClaims {
            exp: Some((now + chrono::Duration::seconds(60)).timestamp()),
            ..AccessClaims::default()
        };
        let later = AccessClaims {
            exp: Some((now + chrono::Duration::minutes(10)).timestamp()),
            ..AccessClaims::default()
        };
        let window = chrono::Duration::minutes(2);

        assert!(soon.expires_within(window, now));
        assert!(!later.expires_within(window, now));
        assert!(AccessClaims::default().expires_within(window, now));
    }
}
