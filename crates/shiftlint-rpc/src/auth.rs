use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use shiftlint_provider::{Error, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const ISSUER: &str = "shiftlint";
const AUDIENCE: &str = "shiftlint-provider";
const TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Environment variable consulted when no secret is configured explicitly.
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";

/// Standard claims carried on every bearer token. `name` identifies the
/// calling engine instance in provider logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub name: String,
    pub exp: u64,
}

/// Mint an HMAC-signed bearer token for the shared secret.
pub fn issue(secret: &str, name: &str) -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Unauthenticated(e.to_string()))?;
    let claims = Claims {
        sub: name.to_string(),
        iss: ISSUER.to_string(),
        aud: AUDIENCE.to_string(),
        name: name.to_string(),
        exp: (now + TOKEN_LIFETIME).as_secs(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| Error::Unauthenticated(e.to_string()))
}

/// Verify a bearer token against the shared secret. Absent, malformed, or
/// wrongly-signed tokens are all `Unauthenticated`.
pub fn verify(secret: &str, token: Option<&str>) -> Result<Claims> {
    let token = token.ok_or_else(|| Error::Unauthenticated("missing bearer token".to_string()))?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[AUDIENCE]);
    validation.set_issuer(&[ISSUER]);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| Error::Unauthenticated(e.to_string()))?;
    tracing::debug!(name = %data.claims.name, sub = %data.claims.sub, "authenticated rpc peer");
    Ok(data.claims)
}

/// The configured secret, falling back to `JWT_SECRET`.
pub fn resolve_secret(configured: Option<&str>) -> Option<String> {
    configured
        .map(|s| s.to_string())
        .or_else(|| std::env::var(JWT_SECRET_ENV).ok())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify_with_the_same_secret() {
        let token = issue("s3cret", "engine-1").unwrap();
        let claims = verify("s3cret", Some(&token)).unwrap();
        assert_eq!(claims.name, "engine-1");
        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.aud, AUDIENCE);
    }

    #[test]
    fn wrong_secret_is_unauthenticated() {
        let token = issue("s3cret", "engine-1").unwrap();
        let err = verify("other", Some(&token)).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(_)));
    }

    #[test]
    fn missing_and_malformed_tokens_are_unauthenticated() {
        assert!(matches!(
            verify("s3cret", None).unwrap_err(),
            Error::Unauthenticated(_)
        ));
        assert!(matches!(
            verify("s3cret", Some("not.a.jwt")).unwrap_err(),
            Error::Unauthenticated(_)
        ));
    }
}
