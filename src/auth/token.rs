// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HS256 access tokens.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::{AuthError, AuthenticatedUser, Claims, Role};
use crate::config::JwtConfig;

/// Access tokens are valid for 24 hours.
pub const TOKEN_TTL_HOURS: i64 = 24;

/// Signs and verifies access tokens with the shared HS256 secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: Option<String>,
    leeway: u64,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            leeway: config.leeway.as_secs(),
        }
    }

    pub fn issue(&self, user_id: &str, email: &str, role: Role, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::InternalError(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway;
        validation.set_issuer(&[&self.issuer]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            ErrorKind::InvalidAudience => AuthError::InvalidAudience,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            _ => AuthError::MalformedToken,
        })?;
        Ok(AuthenticatedUser::from_claims(data.claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(audience: Option<&str>) -> JwtConfig {
        JwtConfig {
            secret: "test-secret-test-secret-test-secret".into(),
            issuer: "crypto-wallet".into(),
            audience: audience.map(str::to_string),
            leeway: std::time::Duration::from_secs(30),
        }
    }

    #[test]
    fn issued_tokens_verify() {
        let tokens = TokenService::new(&config(None));
        let token = tokens.issue("u1", "ada@example.com", Role::Admin, Utc::now()).unwrap();
        let user = tokens.verify(&token).unwrap();
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.role, Role::Admin);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let tokens = TokenService::new(&config(None));
        let token = tokens
            .issue("u1", "a@b.c", Role::User, Utc::now() - Duration::hours(TOKEN_TTL_HOURS + 1))
            .unwrap();
        assert!(matches!(tokens.verify(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn foreign_secret_and_audience_are_rejected() {
        let ours = TokenService::new(&config(Some("wallet-app")));
        let mut other_config = config(Some("wallet-app"));
        other_config.secret = "another-secret-another-secret-xx".into();
        let theirs = TokenService::new(&other_config);
        let token = theirs.issue("u1", "a@b.c", Role::User, Utc::now()).unwrap();
        assert!(matches!(ours.verify(&token), Err(AuthError::InvalidSignature)));

        let no_aud = TokenService::new(&config(None));
        let token = no_aud.issue("u1", "a@b.c", Role::User, Utc::now()).unwrap();
        assert!(ours.verify(&token).is_err());

        assert!(matches!(ours.verify("not-a-jwt"), Err(AuthError::MalformedToken)));
    }
}
