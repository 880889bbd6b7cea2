// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Conversions between decimal amounts and integer base units
//! (satoshi, wei, lamport, stroop).

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::types::ChainError;

/// `1.5` with 8 decimals becomes `150000000`. Amounts with more precision
/// than the chain supports are rejected rather than rounded.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<u128, ChainError> {
    if amount.is_sign_negative() {
        return Err(ChainError::InvalidAmount(format!("{amount} is negative")));
    }
    let factor = 10u64
        .checked_pow(decimals)
        .map(Decimal::from)
        .ok_or_else(|| ChainError::InvalidAmount(format!("unsupported precision {decimals}")))?;
    let scaled = amount
        .checked_mul(factor)
        .ok_or_else(|| ChainError::InvalidAmount(format!("{amount} is too large")))?;
    if !scaled.fract().is_zero() {
        return Err(ChainError::InvalidAmount(format!(
            "{amount} has more than {decimals} decimal places"
        )));
    }
    scaled
        .to_u128()
        .ok_or_else(|| ChainError::InvalidAmount(format!("{amount} is out of range")))
}

/// Inverse of [`to_base_units`]; the result is normalised (`"1.5"`, `"0"`).
pub fn from_base_units(units: u128, decimals: u32) -> Result<Decimal, ChainError> {
    let signed = i128::try_from(units)
        .map_err(|_| ChainError::InvalidAmount(format!("{units} is out of range")))?;
    Decimal::try_from_i128_with_scale(signed, decimals)
        .map(|d| d.normalize())
        .map_err(|_| ChainError::InvalidAmount(format!("{units} is out of range")))
}

/// Parse a decimal string of base units (e.g. a U256 balance).
pub fn parse_base_units(raw: &str, decimals: u32) -> Result<Decimal, ChainError> {
    let units = u128::from_str(raw.trim())
        .map_err(|_| ChainError::InvalidAmount(format!("`{raw}` is not an integer amount")))?;
    from_base_units(units, decimals)
}
