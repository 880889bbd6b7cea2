// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Symmetric encryption of signing keys and PII, plus small encodings
//! shared by several chains.

pub mod base32;
pub mod encryptor;

pub use encryptor::{CryptoError, KeyEncryptor, KEY_LEN};
