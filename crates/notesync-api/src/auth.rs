use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::AppError;

/// Identity attached to a request by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

/// Verifies HS256 bearer tokens signed with the shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    clock_skew: std::time::Duration,
}

impl JwtVerifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            clock_skew: config.auth_clock_skew,
        }
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.leeway = self.clock_skew.as_secs();

        let decoded = decode::<AccessClaims>(token, &self.key, &validation).map_err(|error| {
            AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
        })?;
        let claims = decoded.claims;

        // Password-reset and similar tokens are not session tokens
        if claims.purpose.is_some() {
            return Err(AppError::unauthorized("Token purpose is not allowed"));
        }
        validate_temporal_claims(&claims, self.clock_skew)?;

        let user_id = claims
            .subject()
            .ok_or_else(|| AppError::unauthorized("Token subject is missing"))?;
        Ok(AuthenticatedUser { user_id })
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

#[derive(Debug, Deserialize)]
struct AccessClaims {
    sub: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<Value>,
    purpose: Option<String>,
    exp: Option<i64>,
    iat: Option<i64>,
    nbf: Option<i64>,
}

impl AccessClaims {
    /// `sub`, or the legacy numeric/string `userId` claim.
    fn subject(&self) -> Option<String> {
        let subject = match (&self.sub, &self.user_id) {
            (Some(sub), _) => sub.trim().to_string(),
            (None, Some(Value::String(id))) => id.trim().to_string(),
            (None, Some(Value::Number(id))) => id.to_string(),
            _ => return None,
        };
        (!subject.is_empty()).then_some(subject)
    }
}

fn validate_temporal_claims(
    claims: &AccessClaims,
    clock_skew: std::time::Duration,
) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp();
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);

    let exp = claims
        .exp
        .ok_or_else(|| AppError::unauthorized("Token missing `exp` claim"))?;
    if exp <= now.saturating_sub(skew) {
        return Err(AppError::unauthorized("Token is expired"));
    }

    if let Some(iat) = claims.iat {
        if iat > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token `iat` is in the future"));
        }
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token is not yet valid"));
        }
    }

    Ok(())
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

#[cfg(test)]
pub(crate) fn sign_test_token(secret: &str, claims: &Value) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(Algorithm::HS256),
        claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
