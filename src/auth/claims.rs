// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and authenticated user representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::roles::Role;

/// Claims carried by access tokens issued at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated user information extracted from JWT.
///
/// This is the primary type used throughout the application to represent
/// the authenticated user making a request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Canonical user ID (`sub` claim)
    pub user_id: String,
    pub email: String,
    pub role: Role,
    /// Token expiration (Unix timestamp)
    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
            expires_at: claims.exp,
        }
    }

    /// Check if the user has the required role.
    pub fn has_role(&self, required: Role) -> bool {
        self.role.has_privilege(required)
    }

    /// Check if this user is an admin.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_claims() -> Claims {
        Claims {
            sub: "user_123".to_string(),
            email: "ada@example.com".to_string(),
            role: Role::Admin,
            iss: "crypto-wallet".to_string(),
            aud: None,
            iat: 1700000000,
            exp: 1700003600,
        }
    }

    #[test]
    fn from_claims_extracts_user() {
        let user = AuthenticatedUser::from_claims(sample_claims());
        assert_eq!(user.user_id, "user_123");
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.expires_at, 1700003600);
        assert!(user.is_admin());
        assert!(user.has_role(Role::User));
    }

    #[test]
    fn role_defaults_to_user_when_absent() {
        let json = r#"{"sub":"u1","email":"a@b.c","iss":"x","iat":1,"exp":2}"#;
        let claims: Claims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.role, Role::User);
        assert!(claims.aud.is_none());
    }
}
