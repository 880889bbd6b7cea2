// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Time-based one-time passwords (RFC 6238, HMAC-SHA256).
//!
//! 6 digits, 30 second step, one step of skew accepted either side.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::crypto::base32;

pub const STEP_SECS: i64 = 30;
pub const DIGITS: u32 = 6;
const SECRET_BYTES: usize = 20;
const SKEW_STEPS: i64 = 1;

/// Fresh random secret, base32 encoded for authenticator apps.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base32::encode(&bytes)
}

pub fn provisioning_uri(secret: &str, account: &str, issuer: &str) -> String {
    format!(
        "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&algorithm=SHA256&digits={DIGITS}&period={STEP_SECS}",
        issuer = url::form_urlencoded::byte_serialize(issuer.as_bytes()).collect::<String>(),
        account = url::form_urlencoded::byte_serialize(account.as_bytes()).collect::<String>(),
    )
}

/// Code for a given time step, or `None` for an undecodable secret.
pub fn code_at(secret: &str, step: i64) -> Option<String> {
    let key = base32::decode(secret)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).ok()?;
    mac.update(&step.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    Some(format!("{:0width$}", binary % 10u32.pow(DIGITS), width = DIGITS as usize))
}

pub fn step_for(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(STEP_SECS)
}

pub fn verify(secret: &str, code: &str, at: DateTime<Utc>) -> bool {
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let current = step_for(at);
    (-SKEW_STEPS..=SKEW_STEPS).any(|delta| code_at(secret, current + delta).is_some_and(|expected| expected == code))
}
