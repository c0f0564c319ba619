//! Test doubles for the wallet and marketplace boundaries.
//!
//! `MockMarketplace` serves reads from in-memory tables, hands out
//! sequence-numbered transaction hashes for writes, and keeps an ordered
//! log of every call so tests can assert sequencing (approval confirmed
//! before the primary call, probes strictly by id). `MockWallet` drives
//! the session layer: account switches, disconnects, and absent-provider
//! scenarios.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::contract::{
    BorrowerListingData, CreateBorrowerListingCall, CreateLenderListingCall, LenderListingData,
    LoanData, LoanStatusData, MarketMetricsData, MarketplaceContract,
};
use crate::error::{CallError, SessionError};
use crate::units::days_to_seconds;
use crate::wallet::{AccountEvent, WalletProvider};

/// Marketplace address every mock binds against.
pub const MOCK_MARKETPLACE_ADDRESS: Address = Address::repeat_byte(0xEE);

// ---------------------------------------------------------------------------
// Call log
// ---------------------------------------------------------------------------

/// One entry in the mock's ordered call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRecord {
    LenderListing(u64),
    BorrowerListing(u64),
    Loan(u64),
    LoanStatus(u64),
    MarketMetrics,
    CreateLenderListing,
    CreateBorrowerListing,
    RepayLoan { id: u64, value: U256 },
    SetGracePeriod { id: u64, new_end: U256 },
    LiquidateLoan { id: u64 },
    Approve { token: Address, spender: Address, amount: U256 },
    Confirmed(TxHash),
}

/// Read calls that can be scripted to fail. Failures persist until
/// cleared, so every probe of the same id sees the same error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadCall {
    LenderListing(u64),
    BorrowerListing(u64),
    Loan(u64),
    LoanStatus(u64),
    MarketMetrics,
}

/// Write calls that can be scripted to fail. Failures are consumed in
/// FIFO order, one per call, so a retry can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteCall {
    CreateLenderListing,
    CreateBorrowerListing,
    RepayLoan,
    SetGracePeriod,
    LiquidateLoan,
    Approve,
}

/// How `wait_for_confirmation` behaves.
#[derive(Debug, Clone, Default)]
pub enum WaitMode {
    /// Confirm immediately.
    #[default]
    Instant,
    /// Confirm after a fixed delay.
    Delayed(Duration),
    /// Park forever. Pair with a short confirmation timeout.
    Never,
    /// Fail every wait with this error.
    Fail(CallError),
}

// ---------------------------------------------------------------------------
// MockMarketplace
// ---------------------------------------------------------------------------

struct MarketInner {
    address: Address,
    lender_listings: Mutex<BTreeMap<u64, LenderListingData>>,
    borrower_listings: Mutex<BTreeMap<u64, BorrowerListingData>>,
    loans: Mutex<BTreeMap<u64, (LoanData, LoanStatusData)>>,
    metrics_override: Mutex<Option<MarketMetricsData>>,
    read_delay: Mutex<Option<Duration>>,
    read_failures: Mutex<HashMap<ReadCall, CallError>>,
    write_failures: Mutex<HashMap<WriteCall, VecDeque<CallError>>>,
    calls: Mutex<Vec<CallRecord>>,
    wait: Mutex<WaitMode>,
    tx_seq: AtomicU64,
}

/// In-memory marketplace double.
///
/// Clones share the same tables and call log; each clone is a distinct
/// contract handle, which is what lets session tests tell a rebind from
/// a cache hit by `Arc` identity.
#[derive(Clone)]
pub struct MockMarketplace {
    inner: Arc<MarketInner>,
    signer: Option<Address>,
}

impl Default for MockMarketplace {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMarketplace {
    pub fn new() -> Self {
        MockMarketplace {
            inner: Arc::new(MarketInner {
                address: MOCK_MARKETPLACE_ADDRESS,
                lender_listings: Mutex::default(),
                borrower_listings: Mutex::default(),
                loans: Mutex::default(),
                metrics_override: Mutex::default(),
                read_delay: Mutex::default(),
                read_failures: Mutex::default(),
                write_failures: Mutex::default(),
                calls: Mutex::default(),
                wait: Mutex::default(),
                tx_seq: AtomicU64::new(0),
            }),
            signer: None,
        }
    }

    /// A handle whose writes act as `account`, as a wallet bind would
    /// produce.
    pub fn bound_to(&self, account: Address) -> Self {
        MockMarketplace {
            inner: self.inner.clone(),
            signer: Some(account),
        }
    }

    // -- seeding --

    pub fn insert_lender_listing(&self, id: u64, data: LenderListingData) {
        self.lock(&self.inner.lender_listings).insert(id, data);
    }

    pub fn insert_borrower_listing(&self, id: u64, data: BorrowerListingData) {
        self.lock(&self.inner.borrower_listings).insert(id, data);
    }

    pub fn insert_loan(&self, id: u64, data: LoanData, status: LoanStatusData) {
        self.lock(&self.inner.loans).insert(id, (data, status));
    }

    /// Serve these metrics instead of counting the tables. Lets tests
    /// model an oracle that over- or understates the live counts.
    pub fn set_metrics_override(&self, metrics: MarketMetricsData) {
        *self.lock(&self.inner.metrics_override) = Some(metrics);
    }

    // -- failure scripting --

    pub fn set_read_failure(&self, call: ReadCall, error: CallError) {
        self.lock(&self.inner.read_failures).insert(call, error);
    }

    pub fn clear_read_failure(&self, call: ReadCall) {
        self.lock(&self.inner.read_failures).remove(&call);
    }

    pub fn queue_write_failure(&self, call: WriteCall, error: CallError) {
        self.lock(&self.inner.write_failures)
            .entry(call)
            .or_default()
            .push_back(error);
    }

    pub fn set_wait_mode(&self, mode: WaitMode) {
        *self.lock(&self.inner.wait) = mode;
    }

    /// Make every read sleep before answering. Lets a test hold one
    /// refresh mid-flight while a second one is attempted.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.lock(&self.inner.read_delay) = Some(delay);
    }

    // -- inspection --

    /// The ordered call log since construction (or the last clear).
    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock(&self.inner.calls).clone()
    }

    pub fn clear_calls(&self) {
        self.lock(&self.inner.calls).clear();
    }

    /// Ids probed so far for lender listings, in call order.
    pub fn lender_probe_ids(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                CallRecord::LenderListing(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Stored loan record and status, if any.
    pub fn stored_loan(&self, id: u64) -> Option<(LoanData, LoanStatusData)> {
        self.lock(&self.inner.loans).get(&id).cloned()
    }

    // -- internals --

    fn lock<'a, T>(&self, slot: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        slot.lock().expect("mock state lock")
    }

    fn record(&self, record: CallRecord) {
        self.lock(&self.inner.calls).push(record);
    }

    async fn maybe_delay(&self) {
        let delay = *self.lock(&self.inner.read_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn read_failure(&self, call: ReadCall) -> Option<CallError> {
        self.lock(&self.inner.read_failures).get(&call).cloned()
    }

    fn take_write_failure(&self, call: WriteCall) -> Option<CallError> {
        self.lock(&self.inner.write_failures)
            .get_mut(&call)
            .and_then(|queue| queue.pop_front())
    }

    fn next_hash(&self) -> TxHash {
        let n = self.inner.tx_seq.fetch_add(1, Ordering::SeqCst) + 1;
        TxHash::from(U256::from(n).to_be_bytes::<32>())
    }

    fn signer_or_default(&self) -> Address {
        self.signer.unwrap_or_else(|| Address::repeat_byte(0x11))
    }

    fn computed_metrics(&self) -> MarketMetricsData {
        let lenders = self
            .lock(&self.inner.lender_listings)
            .values()
            .filter(|d| d.is_active && !d.is_structurally_empty())
            .count();
        let borrowers = self
            .lock(&self.inner.borrower_listings)
            .values()
            .filter(|d| d.is_active && !d.is_structurally_empty())
            .count();
        let loans = self.lock(&self.inner.loans);
        let active_loans = loans
            .values()
            .filter(|(d, s)| s.is_active && !d.is_structurally_empty())
            .count();
        let volume = loans
            .values()
            .fold(U256::ZERO, |acc, (d, _)| acc.saturating_add(d.amount));
        MarketMetricsData {
            total_active_lender_listings: U256::from(lenders),
            total_active_borrower_listings: U256::from(borrowers),
            total_active_loans: U256::from(active_loans),
            total_loan_volume: volume,
        }
    }
}

#[async_trait]
impl MarketplaceContract for MockMarketplace {
    fn address(&self) -> Address {
        self.inner.address
    }

    async fn lender_listing(&self, id: u64) -> Result<LenderListingData, CallError> {
        self.record(CallRecord::LenderListing(id));
        self.maybe_delay().await;
        if let Some(e) = self.read_failure(ReadCall::LenderListing(id)) {
            return Err(e);
        }
        // Missing ids decode to a zeroed tuple, as a mapping getter does.
        Ok(self
            .lock(&self.inner.lender_listings)
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn borrower_listing(&self, id: u64) -> Result<BorrowerListingData, CallError> {
        self.record(CallRecord::BorrowerListing(id));
        self.maybe_delay().await;
        if let Some(e) = self.read_failure(ReadCall::BorrowerListing(id)) {
            return Err(e);
        }
        Ok(self
            .lock(&self.inner.borrower_listings)
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn loan(&self, id: u64) -> Result<LoanData, CallError> {
        self.record(CallRecord::Loan(id));
        self.maybe_delay().await;
        if let Some(e) = self.read_failure(ReadCall::Loan(id)) {
            return Err(e);
        }
        Ok(self
            .lock(&self.inner.loans)
            .get(&id)
            .map(|(data, _)| data.clone())
            .unwrap_or_default())
    }

    async fn loan_status(&self, id: u64) -> Result<LoanStatusData, CallError> {
        self.record(CallRecord::LoanStatus(id));
        self.maybe_delay().await;
        if let Some(e) = self.read_failure(ReadCall::LoanStatus(id)) {
            return Err(e);
        }
        Ok(self
            .lock(&self.inner.loans)
            .get(&id)
            .map(|(_, status)| *status)
            .unwrap_or_default())
    }

    async fn market_metrics(&self) -> Result<MarketMetricsData, CallError> {
        self.record(CallRecord::MarketMetrics);
        self.maybe_delay().await;
        if let Some(e) = self.read_failure(ReadCall::MarketMetrics) {
            return Err(e);
        }
        if let Some(metrics) = *self.lock(&self.inner.metrics_override) {
            return Ok(metrics);
        }
        Ok(self.computed_metrics())
    }

    async fn create_lender_listing(
        &self,
        call: CreateLenderListingCall,
    ) -> Result<TxHash, CallError> {
        self.record(CallRecord::CreateLenderListing);
        if let Some(e) = self.take_write_failure(WriteCall::CreateLenderListing) {
            return Err(e);
        }
        let mut table = self.lock(&self.inner.lender_listings);
        let id = table.keys().next_back().map_or(0, |last| last + 1);
        table.insert(
            id,
            LenderListingData {
                lender: self.signer_or_default(),
                amount: call.amount,
                min_interest_rate: call.min_interest_rate,
                max_duration: call.max_duration,
                accepted_collateral_tokens: call.accepted_collateral_tokens,
                min_collateral_ratio: call.min_collateral_ratio,
                is_active: true,
                lending_token: call.lending_token,
            },
        );
        Ok(self.next_hash())
    }

    async fn create_borrower_listing(
        &self,
        call: CreateBorrowerListingCall,
    ) -> Result<TxHash, CallError> {
        self.record(CallRecord::CreateBorrowerListing);
        if let Some(e) = self.take_write_failure(WriteCall::CreateBorrowerListing) {
            return Err(e);
        }
        let mut table = self.lock(&self.inner.borrower_listings);
        let id = table.keys().next_back().map_or(0, |last| last + 1);
        table.insert(
            id,
            BorrowerListingData {
                borrower: self.signer_or_default(),
                amount: call.amount,
                max_interest_rate: call.max_interest_rate,
                duration: call.duration,
                collateral_token: call.collateral_token,
                collateral_amount: call.collateral_amount,
                is_active: true,
                lending_token: call.lending_token,
            },
        );
        Ok(self.next_hash())
    }

    async fn repay_loan(&self, id: u64, value: U256) -> Result<TxHash, CallError> {
        self.record(CallRecord::RepayLoan { id, value });
        if let Some(e) = self.take_write_failure(WriteCall::RepayLoan) {
            return Err(e);
        }
        Ok(self.next_hash())
    }

    async fn set_grace_period(&self, id: u64, new_end: U256) -> Result<TxHash, CallError> {
        self.record(CallRecord::SetGracePeriod { id, new_end });
        if let Some(e) = self.take_write_failure(WriteCall::SetGracePeriod) {
            return Err(e);
        }
        if let Some((data, _)) = self.lock(&self.inner.loans).get_mut(&id) {
            data.grace_period_end = new_end;
        }
        Ok(self.next_hash())
    }

    async fn liquidate_loan(&self, id: u64) -> Result<TxHash, CallError> {
        self.record(CallRecord::LiquidateLoan { id });
        if let Some(e) = self.take_write_failure(WriteCall::LiquidateLoan) {
            return Err(e);
        }
        if let Some((_, status)) = self.lock(&self.inner.loans).get_mut(&id) {
            status.is_active = false;
        }
        Ok(self.next_hash())
    }

    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxHash, CallError> {
        self.record(CallRecord::Approve {
            token,
            spender,
            amount,
        });
        if let Some(e) = self.take_write_failure(WriteCall::Approve) {
            return Err(e);
        }
        Ok(self.next_hash())
    }

    async fn wait_for_confirmation(&self, tx: TxHash) -> Result<(), CallError> {
        let mode = self.lock(&self.inner.wait).clone();
        match mode {
            WaitMode::Instant => {
                self.record(CallRecord::Confirmed(tx));
                Ok(())
            }
            WaitMode::Delayed(delay) => {
                tokio::time::sleep(delay).await;
                self.record(CallRecord::Confirmed(tx));
                Ok(())
            }
            WaitMode::Never => std::future::pending().await,
            WaitMode::Fail(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// MockWallet
// ---------------------------------------------------------------------------

/// Wallet provider double.
///
/// Clones share the account slot and event channel, so a test can hold a
/// clone to switch accounts while the session manager owns the original.
#[derive(Clone)]
pub struct MockWallet {
    account: Arc<Mutex<Option<Address>>>,
    available: bool,
    market: MockMarketplace,
    events: broadcast::Sender<AccountEvent>,
    binds: Arc<AtomicU64>,
}

impl MockWallet {
    /// Provider with `account` already authorized.
    pub fn connected(account: Address) -> Self {
        Self::build(Some(account), true)
    }

    /// Provider reachable, but no account connected.
    pub fn disconnected() -> Self {
        Self::build(None, true)
    }

    /// No wallet transport at all.
    pub fn unavailable() -> Self {
        Self::build(None, false)
    }

    fn build(account: Option<Address>, available: bool) -> Self {
        let (events, _) = broadcast::channel(16);
        MockWallet {
            account: Arc::new(Mutex::new(account)),
            available,
            market: MockMarketplace::new(),
            events,
            binds: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Serve binds from this marketplace instead of a fresh empty one.
    pub fn with_market(mut self, market: MockMarketplace) -> Self {
        self.market = market;
        self
    }

    /// The marketplace every bind hands out a handle to.
    pub fn market(&self) -> MockMarketplace {
        self.market.clone()
    }

    /// Authorize a different account and broadcast the change.
    pub fn switch_account(&self, account: Address) {
        *self.account.lock().expect("mock account lock") = Some(account);
        let _ = self.events.send(AccountEvent::Connected(account));
    }

    /// Drop the account and broadcast the disconnect.
    pub fn drop_account(&self) {
        *self.account.lock().expect("mock account lock") = None;
        let _ = self.events.send(AccountEvent::Disconnected);
    }

    /// How many times `bind_marketplace` has been called.
    pub fn bind_count(&self) -> u64 {
        self.binds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn connected_account(&self) -> Result<Option<Address>, SessionError> {
        if !self.available {
            return Err(SessionError::NoProvider);
        }
        Ok(*self.account.lock().expect("mock account lock"))
    }

    async fn bind_marketplace(
        &self,
        account: Address,
        _marketplace: Address,
    ) -> Result<Arc<dyn MarketplaceContract>, SessionError> {
        if !self.available {
            return Err(SessionError::NoProvider);
        }
        self.binds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.market.bound_to(account)))
    }

    fn subscribe_accounts(&self) -> broadcast::Receiver<AccountEvent> {
        self.events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Seed data builders
// ---------------------------------------------------------------------------

/// Active lending offer: 5 % minimum rate, 30-day maximum term, 150 %
/// collateral ratio, native lending asset.
pub fn lender_listing_data(lender: Address, amount: U256) -> LenderListingData {
    LenderListingData {
        lender,
        amount,
        min_interest_rate: U256::from(500u64),
        max_duration: U256::from(days_to_seconds(30)),
        accepted_collateral_tokens: vec![Address::repeat_byte(0xC0)],
        min_collateral_ratio: U256::from(15_000u64),
        is_active: true,
        lending_token: Address::ZERO,
    }
}

/// Active borrowing request: 8 % maximum rate, 14-day term.
pub fn borrower_listing_data(borrower: Address, amount: U256) -> BorrowerListingData {
    BorrowerListingData {
        borrower,
        amount,
        max_interest_rate: U256::from(800u64),
        duration: U256::from(days_to_seconds(14)),
        collateral_token: Address::repeat_byte(0xC0),
        collateral_amount: amount,
        is_active: true,
        lending_token: Address::ZERO,
    }
}

/// Funded loan at 5 % over 30 days with a one-week grace tail.
pub fn loan_data(
    lender: Address,
    borrower: Address,
    amount: U256,
    lending_token: Address,
) -> LoanData {
    let start = 1_700_000_000u64;
    LoanData {
        lender,
        borrower,
        amount,
        interest_rate: U256::from(500u64),
        start_time: U256::from(start),
        duration: U256::from(days_to_seconds(30)),
        collateral_token: Address::repeat_byte(0xC0),
        collateral_amount: amount,
        lending_token,
        grace_period_end: U256::from(start + days_to_seconds(37)),
    }
}

/// Live status for a seeded loan.
pub fn active_status(total_owed: U256) -> LoanStatusData {
    LoanStatusData {
        is_active: true,
        is_overdue: false,
        total_owed,
    }
}
