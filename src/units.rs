//! Conversions between the units humans type and the units the contract
//! stores: percentages ↔ basis points, days ↔ seconds, decimal amounts ↔
//! base units scaled by token decimals.
//!
//! Every conversion floors. Parsing a value with more fractional digits than
//! the target precision silently drops the excess rather than rounding up,
//! so encode∘decode is the identity on representable values.

use std::fmt;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::UnitError;

/// Seconds per day, the contract's duration granularity.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Decimals assumed for the native coin (zero-address lending asset).
pub const NATIVE_DECIMALS: u8 = 18;

// ── Basis points ────────────────────────────────────────────────────────────

/// An interest rate or collateral ratio in basis points (1 bip = 0.01 %).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Bips(pub u32);

impl Bips {
    pub const ZERO: Bips = Bips(0);

    /// Parse a percentage string like `"4.5"` into basis points (`450`).
    /// Digits beyond two decimal places are floored away.
    pub fn parse_percent(s: &str) -> Result<Self, UnitError> {
        let raw = parse_decimal(s, 2)?;
        u32::try_from(raw).map(Bips).map_err(|_| UnitError::Overflow)
    }

    /// Decode a wire-level basis point count.
    pub fn from_wire(raw: U256) -> Result<Self, UnitError> {
        u32::try_from(raw).map(Bips).map_err(|_| UnitError::Overflow)
    }

    /// Render as a percentage string with trailing zeros trimmed
    /// (`450` → `"4.5"`).
    pub fn format_percent(self) -> String {
        format_decimal(U256::from(self.0), 2)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_wire(self) -> U256 {
        U256::from(self.0)
    }
}

impl fmt::Display for Bips {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.format_percent())
    }
}

// ── Durations ───────────────────────────────────────────────────────────────

/// Whole days to contract seconds.
pub fn days_to_seconds(days: u32) -> u64 {
    u64::from(days) * SECONDS_PER_DAY
}

/// Contract seconds to whole days, flooring partial days.
pub fn seconds_to_days(seconds: u64) -> u32 {
    (seconds / SECONDS_PER_DAY).min(u64::from(u32::MAX)) as u32
}

// ── Token amounts ───────────────────────────────────────────────────────────

/// A token amount in base units, paired with the token's decimal precision.
///
/// The pairing keeps formatting lossless: `10^decimals` base units make one
/// whole token, and the zero-address native coin uses [`NATIVE_DECIMALS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub base_units: U256,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn zero(decimals: u8) -> Self {
        TokenAmount {
            base_units: U256::ZERO,
            decimals,
        }
    }

    /// Parse a decimal string like `"0.5"` into base units. Fractional
    /// digits beyond `decimals` are floored away.
    pub fn parse(s: &str, decimals: u8) -> Result<Self, UnitError> {
        Ok(TokenAmount {
            base_units: parse_decimal(s, decimals)?,
            decimals,
        })
    }

    pub fn from_base_units(base_units: U256, decimals: u8) -> Self {
        TokenAmount {
            base_units,
            decimals,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.base_units.is_zero()
    }

    /// Render as a decimal string with trailing zeros trimmed.
    pub fn format(&self) -> String {
        format_decimal(self.base_units, self.decimals)
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

// ── Decimal plumbing ────────────────────────────────────────────────────────

/// Parse a non-negative decimal string into an integer scaled by
/// `10^decimals`, flooring fractional digits beyond that precision.
pub fn parse_decimal(input: &str, decimals: u8) -> Result<U256, UnitError> {
    let s = input.trim();
    let invalid = || UnitError::InvalidNumber(input.to_string());

    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if frac_part.contains('.')
        || !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let scale = pow10(decimals)?;
    let kept = &frac_part[..frac_part.len().min(decimals as usize)];

    let int_units = fold_digits(int_part)?
        .checked_mul(scale)
        .ok_or(UnitError::Overflow)?;
    let frac_units = fold_digits(kept)?
        .checked_mul(pow10(decimals - kept.len() as u8)?)
        .ok_or(UnitError::Overflow)?;
    int_units.checked_add(frac_units).ok_or(UnitError::Overflow)
}

/// Format an integer scaled by `10^decimals` back into a decimal string,
/// trimming trailing fractional zeros.
pub fn format_decimal(units: U256, decimals: u8) -> String {
    let digits = units.to_string();
    let d = decimals as usize;
    let (int_part, frac_part) = if digits.len() > d {
        let split = digits.len() - d;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{digits:0>d$}"))
    };
    let frac = frac_part.trim_end_matches('0');
    if frac.is_empty() {
        int_part
    } else {
        format!("{int_part}.{frac}")
    }
}

fn pow10(n: u8) -> Result<U256, UnitError> {
    U256::from(10u8)
        .checked_pow(U256::from(n))
        .ok_or(UnitError::UnsupportedPrecision(n))
}

fn fold_digits(digits: &str) -> Result<U256, UnitError> {
    let ten = U256::from(10u8);
    let mut acc = U256::ZERO;
    for c in digits.bytes() {
        acc = acc
            .checked_mul(ten)
            .and_then(|v| v.checked_add(U256::from(c - b'0')))
            .ok_or(UnitError::Overflow)?;
    }
    Ok(acc)
}
