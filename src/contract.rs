//! Boundary trait for the deployed marketplace contract.
//!
//! Everything on-chain sits behind [`MarketplaceContract`]: per-id getters
//! returning raw wire tuples, write calls returning transaction hashes, and
//! a confirmation wait. Production bindings wrap an RPC signer; tests use
//! the in-memory mock from [`crate::testing`].

use alloy_primitives::{Address, TxHash, U256};
use async_trait::async_trait;

use crate::error::CallError;

// ── Wire tuples ─────────────────────────────────────────────────────────────

/// Raw `getLenderListing(id)` return tuple.
///
/// Rates and ratios are basis points, durations are seconds, amounts are
/// base units of `lending_token`. A zeroed tuple (zero lender or zero
/// amount) marks an id with no record behind it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LenderListingData {
    pub lender: Address,
    pub amount: U256,
    pub min_interest_rate: U256,
    pub max_duration: U256,
    pub accepted_collateral_tokens: Vec<Address>,
    pub min_collateral_ratio: U256,
    pub is_active: bool,
    pub lending_token: Address,
}

impl LenderListingData {
    pub fn is_structurally_empty(&self) -> bool {
        self.lender.is_zero() || self.amount.is_zero()
    }
}

/// Raw `getBorrowerListing(id)` return tuple.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BorrowerListingData {
    pub borrower: Address,
    pub amount: U256,
    pub max_interest_rate: U256,
    pub duration: U256,
    pub collateral_token: Address,
    pub collateral_amount: U256,
    pub is_active: bool,
    pub lending_token: Address,
}

impl BorrowerListingData {
    pub fn is_structurally_empty(&self) -> bool {
        self.borrower.is_zero() || self.amount.is_zero()
    }
}

/// Raw `getLoan(id)` return tuple. `start_time` and `grace_period_end` are
/// epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoanData {
    pub lender: Address,
    pub borrower: Address,
    pub amount: U256,
    pub interest_rate: U256,
    pub start_time: U256,
    pub duration: U256,
    pub collateral_token: Address,
    pub collateral_amount: U256,
    pub lending_token: Address,
    pub grace_period_end: U256,
}

impl LoanData {
    pub fn is_structurally_empty(&self) -> bool {
        self.borrower.is_zero() || self.amount.is_zero()
    }
}

/// Raw `getLoanStatus(id)` return tuple. `total_owed` is principal plus
/// accrued interest in base units of the loan's lending token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoanStatusData {
    pub is_active: bool,
    pub is_overdue: bool,
    pub total_owed: U256,
}

/// Raw `getMarketMetrics()` return tuple. The active listing counts bound
/// count-oracle scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarketMetricsData {
    pub total_active_lender_listings: U256,
    pub total_active_borrower_listings: U256,
    pub total_active_loans: U256,
    pub total_loan_volume: U256,
}

// ── Write call parameters ───────────────────────────────────────────────────

/// Arguments for `createLenderListing`, already encoded to chain units.
/// `lending_token` is the asset offered; the zero address means the
/// native coin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateLenderListingCall {
    pub amount: U256,
    pub min_interest_rate: U256,
    pub max_duration: U256,
    pub accepted_collateral_tokens: Vec<Address>,
    pub min_collateral_ratio: U256,
    pub lending_token: Address,
}

/// Arguments for `createBorrowerListing`, already encoded to chain units.
/// `lending_token` is the asset requested; the zero address means the
/// native coin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateBorrowerListingCall {
    pub amount: U256,
    pub max_interest_rate: U256,
    pub duration: U256,
    pub collateral_token: Address,
    pub collateral_amount: U256,
    pub lending_token: Address,
}

// ── Boundary trait ──────────────────────────────────────────────────────────

/// Signer-bound handle to the marketplace contract.
///
/// Write methods submit and return the transaction hash without waiting;
/// [`wait_for_confirmation`](Self::wait_for_confirmation) blocks until the
/// transaction is mined. The split lets the submit machine put its own
/// deadline around the wait.
#[async_trait]
pub trait MarketplaceContract: Send + Sync {
    /// Deployed marketplace address. Spender target for ERC20 approvals.
    fn address(&self) -> Address;

    async fn lender_listing(&self, id: u64) -> Result<LenderListingData, CallError>;

    async fn borrower_listing(&self, id: u64) -> Result<BorrowerListingData, CallError>;

    async fn loan(&self, id: u64) -> Result<LoanData, CallError>;

    async fn loan_status(&self, id: u64) -> Result<LoanStatusData, CallError>;

    async fn market_metrics(&self) -> Result<MarketMetricsData, CallError>;

    async fn create_lender_listing(
        &self,
        call: CreateLenderListingCall,
    ) -> Result<TxHash, CallError>;

    async fn create_borrower_listing(
        &self,
        call: CreateBorrowerListingCall,
    ) -> Result<TxHash, CallError>;

    /// Repay a loan. `value` is attached as native payment when the loan's
    /// lending token is the native coin, zero otherwise.
    async fn repay_loan(&self, id: u64, value: U256) -> Result<TxHash, CallError>;

    /// Move a loan's grace-period deadline to the absolute epoch second
    /// `new_end`.
    async fn set_grace_period(&self, id: u64, new_end: U256) -> Result<TxHash, CallError>;

    async fn liquidate_loan(&self, id: u64) -> Result<TxHash, CallError>;

    /// `approve(spender, amount)` on the ERC20 contract at `token`, signed
    /// by the session account.
    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxHash, CallError>;

    /// Wait until `tx` is mined. No client-side deadline here; callers
    /// impose their own.
    async fn wait_for_confirmation(&self, tx: TxHash) -> Result<(), CallError>;
}
