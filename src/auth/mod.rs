// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Local accounts with bearer tokens.
//!
//! ## Auth Flow
//!
//! 1. Client registers with email and password (argon2id hash stored)
//! 2. `POST /auth/login` verifies the password and, when enabled, a TOTP code
//! 3. Server issues an HS256 JWT (`sub`, `email`, `role`, `iss`, `aud`, `exp`)
//! 4. Client sends `Authorization: Bearer <JWT>` on every protected route
//!
//! ## Security
//!
//! - All non-health endpoints require authentication
//! - Clock skew tolerance is configurable (`JWT_LEEWAY`, default 30 s)
//! - TOTP secrets are stored encrypted and never returned after setup

pub mod claims;
pub mod error;
pub mod extractor;
pub mod password;
pub mod roles;
pub mod token;
pub mod totp;

pub use claims::{AuthenticatedUser, Claims};
pub use error::AuthError;
pub use extractor::{AdminOnly, Auth};
pub use roles::Role;
pub use token::TokenService;
