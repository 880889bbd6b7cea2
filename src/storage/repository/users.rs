// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User accounts.
//!
//! Users are never hard-deleted; deletion flips `status` to `deleted` and
//! keeps the email reserved.

use chrono::{DateTime, Utc};
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Role;
use crate::storage::database::{get_json, put_json, Database, DbError, DbResult, IndexTable, JsonTable};

pub(crate) const USERS: JsonTable = TableDefinition::new("users");
/// normalized email → user id
pub(crate) const USER_BY_EMAIL: IndexTable = TableDefinition::new("user_by_email");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum DisplayCurrency {
    #[default]
    Usd,
    Eur,
    Gbp,
    Jpy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub display_currency: DisplayCurrency,
    pub role: Role,
    pub two_factor_enabled: bool,
    /// Encrypted TOTP secret; present whenever `two_factor_enabled`.
    pub two_factor_secret: Option<String>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct UserRepository<'a> {
    db: &'a Database,
}

impl<'a> UserRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new user; the email must not be taken.
    pub fn create(&self, user: &User) -> DbResult<()> {
        self.db.write(|txn| {
            let mut by_email = txn.open_table(USER_BY_EMAIL)?;
            if by_email.get(user.email.as_str())?.is_some() {
                return Err(DbError::Conflict(format!("email {} already registered", user.email)));
            }
            by_email.insert(user.email.as_str(), user.id.as_str())?;
            put_json(&mut txn.open_table(USERS)?, &user.id, user)
        })
    }

    pub fn get(&self, user_id: &str) -> DbResult<Option<User>> {
        self.db.read(|txn| get_json(&txn.open_table(USERS)?, user_id))
    }

    pub fn get_by_email(&self, email: &str) -> DbResult<Option<User>> {
        self.db.read(|txn| {
            let by_email = txn.open_table(USER_BY_EMAIL)?;
            let Some(id) = by_email.get(email)?.map(|v| v.value().to_string()) else {
                return Ok(None);
            };
            get_json(&txn.open_table(USERS)?, &id)
        })
    }

    pub fn update(&self, user: &User) -> DbResult<()> {
        self.db.write(|txn| {
            let mut users = txn.open_table(USERS)?;
            if users.get(user.id.as_str())?.is_none() {
                return Err(DbError::NotFound(format!("User {}", user.id)));
            }
            put_json(&mut users, &user.id, user)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::core_db;

    fn sample(id: &str, email: &str) -> User {
        User {
            id: id.into(),
            email: email.into(),
            password_hash: "hash".into(),
            display_currency: DisplayCurrency::Usd,
            role: Role::User,
            two_factor_enabled: false,
            two_factor_secret: None,
            status: UserStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn email_is_unique() {
        let (db, _dir) = core_db();
        let repo = UserRepository::new(&db);
        repo.create(&sample("u1", "a@example.com")).unwrap();
        let err = repo.create(&sample("u2", "a@example.com")).unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        let found = repo.get_by_email("a@example.com").unwrap().unwrap();
        assert_eq!(found.id, "u1");
        assert!(repo.get_by_email("b@example.com").unwrap().is_none());
    }

    #[test]
    fn update_requires_existing_user() {
        let (db, _dir) = core_db();
        let repo = UserRepository::new(&db);
        let err = repo.update(&sample("ghost", "g@example.com")).unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }
}
