// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Registration, login and TOTP two-factor lifecycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use unicode_normalization::UnicodeNormalization;
use utoipa::ToSchema;

use crate::audit_log;
use crate::auth::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::auth::token::TOKEN_TTL_HOURS;
use crate::auth::{totp, Role, TokenService};
use crate::clock::Clock;
use crate::crypto::KeyEncryptor;
use crate::storage::{
    AuditEvent, AuditEventType, Databases, DisplayCurrency, User, UserRepository, UserStatus,
};

use super::{ServiceError, ServiceResult};

const TOTP_ISSUER: &str = "crypto-wallet";

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_currency: Option<DisplayCurrency>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Required once two-factor authentication is enabled
    pub totp_code: Option<String>,
}

/// Returned once by `setup_2fa`; the secret is not retrievable later.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TwoFactorSetup {
    pub secret: String,
    pub otpauth_uri: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub display_currency: DisplayCurrency,
    pub role: Role,
    pub two_factor_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            display_currency: user.display_currency,
            role: user.role,
            two_factor_enabled: user.two_factor_enabled,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: UserProfile,
}

/// NFKC, trimmed and lowercased.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().nfkc().collect::<String>().to_lowercase()
}

fn valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

pub struct UserService {
    dbs: Arc<Databases>,
    tokens: TokenService,
    encryptor: Arc<KeyEncryptor>,
    clock: Arc<dyn Clock>,
}

impl UserService {
    pub fn new(
        dbs: Arc<Databases>,
        tokens: TokenService,
        encryptor: Arc<KeyEncryptor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dbs,
            tokens,
            encryptor,
            clock,
        }
    }

    fn repo(&self) -> UserRepository<'_> {
        UserRepository::new(&self.dbs.core)
    }

    fn active_user(&self, user_id: &str) -> ServiceResult<User> {
        self.repo()
            .get(user_id)?
            .filter(|u| u.status == UserStatus::Active)
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))
    }

    pub fn register(&self, request: RegisterRequest) -> ServiceResult<User> {
        let email = normalize_email(&request.email);
        if !valid_email(&email) {
            return Err(ServiceError::validation("email", "email is not valid"));
        }
        if request.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ServiceError::validation(
                "password",
                format!("password must be at least {MIN_PASSWORD_LEN} characters"),
            ));
        }
        let now = self.clock.now();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            password_hash: hash_password(&request.password)?,
            display_currency: request.display_currency.unwrap_or_default(),
            role: Role::User,
            two_factor_enabled: false,
            two_factor_secret: None,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        };
        self.repo().create(&user)?;

        info!(user_id = %user.id, "User registered");
        audit_log!(&self.dbs.audit, AuditEventType::UserRegistered, user.id.as_str(), "user", user.id.as_str());
        Ok(user)
    }

    pub fn login(&self, request: LoginRequest) -> ServiceResult<LoginResponse> {
        let email = normalize_email(&request.email);
        let user = match self.repo().get_by_email(&email)? {
            Some(user) if user.status == UserStatus::Active && verify_password(&request.password, &user.password_hash) => user,
            other => {
                audit_log!(
                    &self.dbs.audit,
                    AuditEvent::new(AuditEventType::AuthFailure)
                        .with_resource("user", other.map(|u| u.id).unwrap_or_default())
                        .failed("invalid credentials")
                );
                return Err(ServiceError::InvalidCredentials);
            }
        };

        if user.two_factor_enabled {
            let code = request
                .totp_code
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .ok_or(ServiceError::TwoFactorRequired)?;
            if !self.check_code(&user, code)? {
                audit_log!(
                    &self.dbs.audit,
                    AuditEvent::new(AuditEventType::AuthFailure)
                        .with_user(user.id.as_str())
                        .failed("invalid two-factor code")
                );
                return Err(ServiceError::InvalidTwoFactorCode);
            }
        }

        let token = self.tokens.issue(&user.id, &user.email, user.role, self.clock.now())?;
        info!(user_id = %user.id, "User logged in");
        audit_log!(&self.dbs.audit, AuditEventType::AuthSuccess, user.id.as_str(), "user", user.id.as_str());
        Ok(LoginResponse {
            token,
            token_type: "Bearer",
            expires_in: TOKEN_TTL_HOURS * 3600,
            user: UserProfile::from(&user),
        })
    }

    pub fn me(&self, user_id: &str) -> ServiceResult<UserProfile> {
        Ok(UserProfile::from(&self.active_user(user_id)?))
    }

    /// Generate and store a new secret. Two-factor stays disabled until a
    /// code from it is confirmed with [`UserService::enable_2fa`].
    pub fn setup_2fa(&self, user_id: &str) -> ServiceResult<TwoFactorSetup> {
        let mut user = self.active_user(user_id)?;
        if user.two_factor_enabled {
            return Err(ServiceError::Conflict("two-factor authentication is already enabled".into()));
        }
        let secret = totp::generate_secret();
        user.two_factor_secret = Some(self.encryptor.encrypt_str(&secret, &totp_ad(user_id))?);
        user.updated_at = self.clock.now();
        self.repo().update(&user)?;
        Ok(TwoFactorSetup {
            otpauth_uri: totp::provisioning_uri(&secret, &user.email, TOTP_ISSUER),
            secret,
        })
    }

    pub fn enable_2fa(&self, user_id: &str, code: &str) -> ServiceResult<UserProfile> {
        let mut user = self.active_user(user_id)?;
        if user.two_factor_enabled {
            return Err(ServiceError::Conflict("two-factor authentication is already enabled".into()));
        }
        if user.two_factor_secret.is_none() {
            return Err(ServiceError::validation("code", "run two-factor setup first"));
        }
        if !self.check_code(&user, code)? {
            return Err(ServiceError::InvalidTwoFactorCode);
        }
        user.two_factor_enabled = true;
        user.updated_at = self.clock.now();
        self.repo().update(&user)?;

        audit_log!(&self.dbs.audit, AuditEventType::TwoFactorEnabled, user_id, "user", user_id);
        Ok(UserProfile::from(&user))
    }

    pub fn disable_2fa(&self, user_id: &str, code: &str) -> ServiceResult<UserProfile> {
        let mut user = self.active_user(user_id)?;
        if !user.two_factor_enabled {
            return Err(ServiceError::Conflict("two-factor authentication is not enabled".into()));
        }
        if !self.check_code(&user, code)? {
            return Err(ServiceError::InvalidTwoFactorCode);
        }
        user.two_factor_enabled = false;
        user.two_factor_secret = None;
        user.updated_at = self.clock.now();
        self.repo().update(&user)?;

        audit_log!(&self.dbs.audit, AuditEventType::TwoFactorDisabled, user_id, "user", user_id);
        Ok(UserProfile::from(&user))
    }

    fn check_code(&self, user: &User, code: &str) -> ServiceResult<bool> {
        let Some(sealed) = &user.two_factor_secret else {
            return Ok(false);
        };
        let secret = self.encryptor.decrypt_str(sealed, &totp_ad(&user.id))?;
        Ok(totp::verify(&secret, code, self.clock.now()))
    }
}

fn totp_ad(user_id: &str) -> String {
    format!("totp:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::JwtConfig;
    use crate::storage::test_support::databases;

    fn service() -> (UserService, Arc<ManualClock>, tempfile::TempDir) {
        let (dbs, dir) = databases();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tokens = TokenService::new(&JwtConfig {
            secret: "users-test-secret-0123456789abcd".into(),
            issuer: "crypto-wallet".into(),
            audience: None,
            leeway: std::time::Duration::from_secs(30),
        });
        let service = UserService::new(
            Arc::new(dbs),
            tokens,
            Arc::new(KeyEncryptor::ephemeral().unwrap()),
            clock.clone(),
        );
        (service, clock, dir)
    }

    fn register(service: &UserService, email: &str) -> User {
        service
            .register(RegisterRequest {
                email: email.into(),
                password: "hunter2hunter2".into(),
                display_currency: None,
            })
            .unwrap()
    }

    fn login(service: &UserService, email: &str, code: Option<String>) -> ServiceResult<LoginResponse> {
        service.login(LoginRequest {
            email: email.into(),
            password: "hunter2hunter2".into(),
            totp_code: code,
        })
    }

    #[test]
    fn register_normalizes_and_rejects_duplicates() {
        let (service, _, _dir) = service();
        let user = register(&service, "  Ada@Example.COM ");
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.display_currency, DisplayCurrency::Usd);
        assert_ne!(user.password_hash, "hunter2hunter2");

        let dup = service.register(RegisterRequest {
            email: "ADA@example.com".into(),
            password: "another-password".into(),
            display_currency: None,
        });
        assert!(matches!(dup, Err(ServiceError::Conflict(_))));
    }

    #[test]
    fn register_validates_input() {
        let (service, _, _dir) = service();
        let short = service.register(RegisterRequest {
            email: "a@b.co".into(),
            password: "short".into(),
            display_currency: None,
        });
        assert!(matches!(short, Err(ServiceError::Validation { field: "password", .. })));
        let bad = service.register(RegisterRequest {
            email: "not-an-email".into(),
            password: "long-enough".into(),
            display_currency: None,
        });
        assert!(matches!(bad, Err(ServiceError::Validation { field: "email", .. })));
    }

    #[test]
    fn login_issues_token() {
        let (service, _, _dir) = service();
        let user = register(&service, "ada@example.com");
        let response = login(&service, "ADA@example.com", None).unwrap();
        assert_eq!(response.user.id, user.id);
        let verified = service.tokens.verify(&response.token).unwrap();
        assert_eq!(verified.user_id, user.id);

        let wrong = service.login(LoginRequest {
            email: "ada@example.com".into(),
            password: "wrong-password".into(),
            totp_code: None,
        });
        assert!(matches!(wrong, Err(ServiceError::InvalidCredentials)));
        assert!(matches!(login(&service, "nobody@example.com", None), Err(ServiceError::InvalidCredentials)));
    }

    #[test]
    fn two_factor_lifecycle() {
        let (service, clock, _dir) = service();
        let user = register(&service, "ada@example.com");
        let setup = service.setup_2fa(&user.id).unwrap();
        assert!(setup.otpauth_uri.contains(&setup.secret));

        // not enabled yet, so login still works without a code
        assert!(login(&service, "ada@example.com", None).is_ok());

        let step = totp::step_for(clock.now());
        let valid: Vec<String> = (-1..=1).map(|d| totp::code_at(&setup.secret, step + d).unwrap()).collect();
        let wrong = (0..).map(|n| format!("{n:06}")).find(|c| !valid.contains(c)).unwrap();
        assert!(matches!(service.enable_2fa(&user.id, &wrong), Err(ServiceError::InvalidTwoFactorCode)));

        let profile = service.enable_2fa(&user.id, &valid[1]).unwrap();
        assert!(profile.two_factor_enabled);

        assert!(matches!(login(&service, "ada@example.com", None), Err(ServiceError::TwoFactorRequired)));
        let code = totp::code_at(&setup.secret, totp::step_for(clock.now())).unwrap();
        assert!(login(&service, "ada@example.com", Some(code.clone())).is_ok());

        let disabled = service.disable_2fa(&user.id, &code).unwrap();
        assert!(!disabled.two_factor_enabled);
        assert!(login(&service, "ada@example.com", None).is_ok());
    }
}
