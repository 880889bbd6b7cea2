// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ownership enforcement for user-scoped records.
//!
//! Wallets, transactions and exchange operations are only ever returned to
//! the user that owns them; every service lookup goes through these checks.

/// Why a user could not access a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessDenied {
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("{resource} {id} belongs to another user")]
    NotOwner { resource: &'static str, id: String },
}

/// Trait for resources that have an owner.
pub trait OwnedResource {
    /// Get the owner's user ID.
    fn owner_user_id(&self) -> &str;
}

/// Trait for enforcing ownership on a loaded record.
pub trait OwnershipEnforcer {
    fn verify_ownership(&self, user_id: &str) -> bool;
}

impl<T: OwnedResource> OwnershipEnforcer for T {
    fn verify_ownership(&self, user_id: &str) -> bool {
        self.owner_user_id() == user_id
    }
}

/// Turns an optional lookup into an owned record or an [`AccessDenied`].
pub trait OwnershipCheck<T> {
    fn verify_owner(self, user_id: &str, resource: &'static str, id: &str) -> Result<T, AccessDenied>;
}

impl<T: OwnedResource> OwnershipCheck<T> for Option<T> {
    fn verify_owner(self, user_id: &str, resource: &'static str, id: &str) -> Result<T, AccessDenied> {
        match self {
            Some(record) if record.verify_ownership(user_id) => Ok(record),
            Some(_) => Err(AccessDenied::NotOwner {
                resource,
                id: id.to_string(),
            }),
            None => Err(AccessDenied::NotFound {
                resource,
                id: id.to_string(),
            }),
        }
    }
}
