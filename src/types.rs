//! Decoded domain records and user-facing operation parameters.
//!
//! Wire tuples from [`crate::contract`] carry basis points, seconds, and
//! raw base units; the records here carry [`Bips`], whole days, and
//! [`TokenAmount`] so the UI never touches chain units. Serialization is
//! camelCase for frontend consumption.

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contract::{
    BorrowerListingData, LenderListingData, LoanData, LoanStatusData, MarketMetricsData,
};
use crate::error::UnitError;
use crate::units::{Bips, TokenAmount, seconds_to_days};

// ── Validation bounds ───────────────────────────────────────────────────────

/// Highest interest rate accepted from user input.
pub const MAX_INTEREST_RATE: Bips = Bips(3000);

/// Lowest collateral ratio the contract accepts (100 %).
pub const MIN_COLLATERAL_RATIO_FLOOR: Bips = Bips(10_000);

/// Collateral ratio new-listing forms pre-fill with (120 %).
pub const DEFAULT_COLLATERAL_RATIO: Bips = Bips(12_000);

/// Longest loan term accepted from user input, days.
pub const MAX_DURATION_DAYS: u32 = 365;

// ── Decoded records ─────────────────────────────────────────────────────────

/// An open lending offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LenderListing {
    pub id: u64,
    pub lender: Address,
    pub amount: TokenAmount,
    pub min_interest_rate: Bips,
    pub max_duration_days: u32,
    pub accepted_collateral_tokens: Vec<Address>,
    pub min_collateral_ratio: Bips,
    pub lending_token: Address,
}

impl LenderListing {
    pub fn decode(id: u64, data: &LenderListingData, decimals: u8) -> Result<Self, UnitError> {
        Ok(LenderListing {
            id,
            lender: data.lender,
            amount: TokenAmount::from_base_units(data.amount, decimals),
            min_interest_rate: Bips::from_wire(data.min_interest_rate)?,
            max_duration_days: seconds_to_days(wire_u64(data.max_duration)?),
            accepted_collateral_tokens: data.accepted_collateral_tokens.clone(),
            min_collateral_ratio: Bips::from_wire(data.min_collateral_ratio)?,
            lending_token: data.lending_token,
        })
    }
}

/// An open borrowing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowerListing {
    pub id: u64,
    pub borrower: Address,
    pub amount: TokenAmount,
    pub max_interest_rate: Bips,
    pub duration_days: u32,
    pub collateral_token: Address,
    pub collateral_amount: TokenAmount,
    pub lending_token: Address,
}

impl BorrowerListing {
    pub fn decode(id: u64, data: &BorrowerListingData, decimals: u8) -> Result<Self, UnitError> {
        Ok(BorrowerListing {
            id,
            borrower: data.borrower,
            amount: TokenAmount::from_base_units(data.amount, decimals),
            max_interest_rate: Bips::from_wire(data.max_interest_rate)?,
            duration_days: seconds_to_days(wire_u64(data.duration)?),
            collateral_token: data.collateral_token,
            collateral_amount: TokenAmount::from_base_units(data.collateral_amount, decimals),
            lending_token: data.lending_token,
        })
    }
}

/// A funded loan joined with its live status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: u64,
    pub lender: Address,
    pub borrower: Address,
    pub amount: TokenAmount,
    pub interest_rate: Bips,
    pub start_time: DateTime<Utc>,
    pub duration_days: u32,
    pub collateral_token: Address,
    pub collateral_amount: TokenAmount,
    pub lending_token: Address,
    pub grace_period_end: DateTime<Utc>,
    pub is_overdue: bool,
    /// Principal plus accrued interest, from `getLoanStatus`.
    pub total_owed: TokenAmount,
}

impl Loan {
    pub fn decode(
        id: u64,
        data: &LoanData,
        status: &LoanStatusData,
        decimals: u8,
    ) -> Result<Self, UnitError> {
        Ok(Loan {
            id,
            lender: data.lender,
            borrower: data.borrower,
            amount: TokenAmount::from_base_units(data.amount, decimals),
            interest_rate: Bips::from_wire(data.interest_rate)?,
            start_time: wire_timestamp(data.start_time)?,
            duration_days: seconds_to_days(wire_u64(data.duration)?),
            collateral_token: data.collateral_token,
            collateral_amount: TokenAmount::from_base_units(data.collateral_amount, decimals),
            lending_token: data.lending_token,
            grace_period_end: wire_timestamp(data.grace_period_end)?,
            is_overdue: status.is_overdue,
            total_owed: TokenAmount::from_base_units(status.total_owed, decimals),
        })
    }

    /// True when the loan is repaid with the chain's native coin rather
    /// than an ERC20 token.
    pub fn uses_native_asset(&self) -> bool {
        self.lending_token.is_zero()
    }
}

/// Decoded `getMarketMetrics` totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketMetrics {
    pub active_lender_listings: u64,
    pub active_borrower_listings: u64,
    pub active_loans: u64,
    pub total_loan_volume: TokenAmount,
}

impl MarketMetrics {
    pub fn decode(data: &MarketMetricsData, decimals: u8) -> Result<Self, UnitError> {
        Ok(MarketMetrics {
            active_lender_listings: wire_u64(data.total_active_lender_listings)?,
            active_borrower_listings: wire_u64(data.total_active_borrower_listings)?,
            active_loans: wire_u64(data.total_active_loans)?,
            total_loan_volume: TokenAmount::from_base_units(data.total_loan_volume, decimals),
        })
    }
}

// ── User-facing operation parameters ────────────────────────────────────────

/// Human-unit inputs for `create_lender_listing`. Amounts and percentages
/// are decimal strings straight from form fields; `lending_token` is the
/// offered asset, zero address for the native coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LenderListingParams {
    pub amount: String,
    pub min_interest_rate_percent: String,
    pub max_duration_days: u32,
    pub accepted_collateral_tokens: Vec<Address>,
    pub min_collateral_ratio_percent: String,
    pub lending_token: Address,
}

/// Human-unit inputs for `create_borrower_listing`. `lending_token` is
/// the requested asset, zero address for the native coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowerListingParams {
    pub amount: String,
    pub max_interest_rate_percent: String,
    pub duration_days: u32,
    pub collateral_token: Address,
    pub collateral_amount: String,
    pub lending_token: Address,
}

// ── Wire decoding helpers ───────────────────────────────────────────────────

fn wire_u64(v: U256) -> Result<u64, UnitError> {
    u64::try_from(v).map_err(|_| UnitError::Overflow)
}

fn wire_timestamp(v: U256) -> Result<DateTime<Utc>, UnitError> {
    let secs = i64::try_from(v).map_err(|_| UnitError::Overflow)?;
    DateTime::from_timestamp(secs, 0).ok_or(UnitError::Overflow)
}
