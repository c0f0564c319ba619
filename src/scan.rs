//! Sequential id discovery against the marketplace's per-id getters.
//!
//! The contract exposes no enumeration, so the scanner probes ids from 0
//! upward, one at a time, classifying each return: decoded-and-active
//! records are collected; zeroed tuples, failed calls, and
//! inactive-but-present records all feed the termination policy as
//! misses (inactive ids are cancelled or filled entries and must not
//! hold the scan open). A `NoData` return short-circuits the scan as a
//! definitive end-of-range signal.
//!
//! When to stop is a pluggable [`TerminationPolicy`]. The default bounds
//! the scan with the `getMarketMetrics` active counts and keeps the
//! consecutive-miss heuristic as a safety net; the pure heuristic remains
//! available for contracts whose metrics cannot be trusted.

use std::fmt;
use std::future::Future;

use serde::Serialize;

use crate::config::{ScanConfig, ScanStrategy};
use crate::contract::MarketplaceContract;
use crate::error::CallError;
use crate::types::{BorrowerListing, LenderListing, Loan};

/// What a scan enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanKind {
    LenderListings,
    BorrowerListings,
    Loans,
}

impl ScanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanKind::LenderListings => "lender-listings",
            ScanKind::BorrowerListings => "borrower-listings",
            ScanKind::Loans => "loans",
        }
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified result of probing one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Decoded and active; collected.
    Active,
    /// Call succeeded but the tuple is zero-valued.
    Empty,
    /// Decoded but inactive; skipped, and counted toward the miss run
    /// like an empty probe.
    InactivePresent,
    /// Call or decode failed.
    Error,
    /// Definitive end-of-range signal ([`CallError::NoData`]).
    PastEnd,
}

/// Why a scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanTermination {
    /// The miss run filled with empty or inactive probes (or the range
    /// ended).
    Exhausted,
    /// The terminating miss run contained at least one failed probe.
    ErrorExhausted,
    /// The count oracle's total was collected.
    CountReached,
}

/// Continue-or-stop decision from a [`TerminationPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop(ScanTermination),
}

/// Decides when a sequential scan may stop.
///
/// Stateful within a single scan; build a fresh policy per scan.
pub trait TerminationPolicy: Send {
    /// Called before each probe. Lets a policy stop without spending a
    /// contract call (a satisfied count bound, for instance).
    fn before_probe(&self) -> ScanControl {
        ScanControl::Continue
    }

    /// Record the outcome of one probe and decide whether to continue.
    fn observe(&mut self, outcome: ProbeOutcome) -> ScanControl;
}

/// Stop after `threshold` consecutive probes without an active record.
pub struct EmptyRunPolicy {
    threshold: u32,
    run: u32,
    error_in_run: bool,
}

impl EmptyRunPolicy {
    pub fn new(threshold: u32) -> Self {
        EmptyRunPolicy {
            threshold: threshold.max(1),
            run: 0,
            error_in_run: false,
        }
    }

    fn check(&self) -> ScanControl {
        if self.run >= self.threshold {
            ScanControl::Stop(if self.error_in_run {
                ScanTermination::ErrorExhausted
            } else {
                ScanTermination::Exhausted
            })
        } else {
            ScanControl::Continue
        }
    }
}

impl TerminationPolicy for EmptyRunPolicy {
    fn observe(&mut self, outcome: ProbeOutcome) -> ScanControl {
        match outcome {
            ProbeOutcome::Active => {
                self.run = 0;
                self.error_in_run = false;
                ScanControl::Continue
            }
            ProbeOutcome::InactivePresent | ProbeOutcome::Empty => {
                self.run += 1;
                self.check()
            }
            ProbeOutcome::Error => {
                self.run += 1;
                self.error_in_run = true;
                self.check()
            }
            ProbeOutcome::PastEnd => ScanControl::Stop(ScanTermination::Exhausted),
        }
    }
}

/// Stop once `expected` active records are collected, with an
/// [`EmptyRunPolicy`] safety net so an overstated oracle count cannot
/// spin the scan forever.
pub struct CountBoundPolicy {
    remaining: u64,
    safety: EmptyRunPolicy,
}

impl CountBoundPolicy {
    pub fn new(expected: u64, empty_run_threshold: u32) -> Self {
        CountBoundPolicy {
            remaining: expected,
            safety: EmptyRunPolicy::new(empty_run_threshold),
        }
    }
}

impl TerminationPolicy for CountBoundPolicy {
    fn before_probe(&self) -> ScanControl {
        if self.remaining == 0 {
            ScanControl::Stop(ScanTermination::CountReached)
        } else {
            ScanControl::Continue
        }
    }

    fn observe(&mut self, outcome: ProbeOutcome) -> ScanControl {
        if outcome == ProbeOutcome::Active {
            self.remaining = self.remaining.saturating_sub(1);
        }
        self.safety.observe(outcome)
    }
}

// ── Scan results ────────────────────────────────────────────────────────────

/// Probe tallies for one scan, for logging and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub probed: u64,
    pub active: u64,
    pub inactive: u64,
    pub empty: u64,
    pub errors: u64,
}

impl ScanStats {
    fn record(&mut self, outcome: ProbeOutcome) {
        self.probed += 1;
        match outcome {
            ProbeOutcome::Active => self.active += 1,
            ProbeOutcome::InactivePresent => self.inactive += 1,
            ProbeOutcome::Empty | ProbeOutcome::PastEnd => self.empty += 1,
            ProbeOutcome::Error => self.errors += 1,
        }
    }
}

impl fmt::Display for ScanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "probed={}, active={}, inactive={}, empty={}, errors={}",
            self.probed, self.active, self.inactive, self.empty, self.errors
        )
    }
}

/// Output of one scan: records ordered by id, plus why it stopped.
#[derive(Debug, Clone)]
pub struct ScanResult<T> {
    pub records: Vec<T>,
    pub termination: ScanTermination,
    pub stats: ScanStats,
}

// ── Scanner ─────────────────────────────────────────────────────────────────

/// Drives sequential scans with the configured strategy and decimal
/// precision.
#[derive(Debug, Clone)]
pub struct Scanner {
    config: ScanConfig,
    decimals: u8,
}

impl Scanner {
    pub fn new(config: ScanConfig, decimals: u8) -> Self {
        Scanner { config, decimals }
    }

    pub async fn scan_lender_listings(
        &self,
        contract: &dyn MarketplaceContract,
    ) -> ScanResult<LenderListing> {
        let policy = self.policy_for(ScanKind::LenderListings, contract).await;
        self.scan_lender_listings_with(contract, policy).await
    }

    pub async fn scan_borrower_listings(
        &self,
        contract: &dyn MarketplaceContract,
    ) -> ScanResult<BorrowerListing> {
        let policy = self.policy_for(ScanKind::BorrowerListings, contract).await;
        self.scan_borrower_listings_with(contract, policy).await
    }

    pub async fn scan_loans(&self, contract: &dyn MarketplaceContract) -> ScanResult<Loan> {
        let policy = self.policy_for(ScanKind::Loans, contract).await;
        self.scan_loans_with(contract, policy).await
    }

    /// Lender listing scan with a caller-supplied termination policy.
    pub async fn scan_lender_listings_with(
        &self,
        contract: &dyn MarketplaceContract,
        policy: Box<dyn TerminationPolicy>,
    ) -> ScanResult<LenderListing> {
        let decimals = self.decimals;
        run_scan(ScanKind::LenderListings, policy, |id| async move {
            match contract.lender_listing(id).await {
                Err(e) => (probe_error(ScanKind::LenderListings, id, &e), None),
                Ok(data) if data.is_structurally_empty() => (ProbeOutcome::Empty, None),
                Ok(data) if !data.is_active => (ProbeOutcome::InactivePresent, None),
                Ok(data) => match LenderListing::decode(id, &data, decimals) {
                    Ok(listing) => (ProbeOutcome::Active, Some(listing)),
                    Err(e) => {
                        log::warn!("skipping undecodable lender listing {id}: {e}");
                        (ProbeOutcome::Error, None)
                    }
                },
            }
        })
        .await
    }

    /// Borrower listing scan with a caller-supplied termination policy.
    pub async fn scan_borrower_listings_with(
        &self,
        contract: &dyn MarketplaceContract,
        policy: Box<dyn TerminationPolicy>,
    ) -> ScanResult<BorrowerListing> {
        let decimals = self.decimals;
        run_scan(ScanKind::BorrowerListings, policy, |id| async move {
            match contract.borrower_listing(id).await {
                Err(e) => (probe_error(ScanKind::BorrowerListings, id, &e), None),
                Ok(data) if data.is_structurally_empty() => (ProbeOutcome::Empty, None),
                Ok(data) if !data.is_active => (ProbeOutcome::InactivePresent, None),
                Ok(data) => match BorrowerListing::decode(id, &data, decimals) {
                    Ok(listing) => (ProbeOutcome::Active, Some(listing)),
                    Err(e) => {
                        log::warn!("skipping undecodable borrower listing {id}: {e}");
                        (ProbeOutcome::Error, None)
                    }
                },
            }
        })
        .await
    }

    /// Loan scan with a caller-supplied termination policy. Joins
    /// `getLoan` with `getLoanStatus` by id; the status read only happens
    /// for structurally present records.
    pub async fn scan_loans_with(
        &self,
        contract: &dyn MarketplaceContract,
        policy: Box<dyn TerminationPolicy>,
    ) -> ScanResult<Loan> {
        let decimals = self.decimals;
        run_scan(ScanKind::Loans, policy, |id| async move {
            let data = match contract.loan(id).await {
                Err(e) => return (probe_error(ScanKind::Loans, id, &e), None),
                Ok(data) => data,
            };
            if data.is_structurally_empty() {
                return (ProbeOutcome::Empty, None);
            }
            let status = match contract.loan_status(id).await {
                Err(e) => {
                    log::warn!("loan {id} status read failed: {e}");
                    return (ProbeOutcome::Error, None);
                }
                Ok(status) => status,
            };
            if !status.is_active {
                return (ProbeOutcome::InactivePresent, None);
            }
            match Loan::decode(id, &data, &status, decimals) {
                Ok(loan) => (ProbeOutcome::Active, Some(loan)),
                Err(e) => {
                    log::warn!("skipping undecodable loan {id}: {e}");
                    (ProbeOutcome::Error, None)
                }
            }
        })
        .await
    }

    /// Build the termination policy the config asks for, falling back to
    /// the heuristic when the count oracle is unreachable.
    async fn policy_for(
        &self,
        kind: ScanKind,
        contract: &dyn MarketplaceContract,
    ) -> Box<dyn TerminationPolicy> {
        let threshold = self.config.empty_run_threshold;
        match self.config.strategy {
            ScanStrategy::EmptyRun => Box::new(EmptyRunPolicy::new(threshold)),
            ScanStrategy::CountOracle => match contract.market_metrics().await {
                Ok(metrics) => {
                    let raw = match kind {
                        ScanKind::LenderListings => metrics.total_active_lender_listings,
                        ScanKind::BorrowerListings => metrics.total_active_borrower_listings,
                        ScanKind::Loans => metrics.total_active_loans,
                    };
                    match u64::try_from(raw) {
                        Ok(expected) => {
                            log::debug!("{kind} scan bounded by oracle count {expected}");
                            Box::new(CountBoundPolicy::new(expected, threshold))
                        }
                        Err(_) => {
                            log::warn!("{kind} oracle count out of range, using empty-run scan");
                            Box::new(EmptyRunPolicy::new(threshold))
                        }
                    }
                }
                Err(e) => {
                    log::warn!("market metrics read failed, using empty-run scan: {e}");
                    Box::new(EmptyRunPolicy::new(threshold))
                }
            },
        }
    }
}

/// Strictly sequential probe loop: id k+1 is not probed until k resolved.
async fn run_scan<T, F, Fut>(
    kind: ScanKind,
    mut policy: Box<dyn TerminationPolicy>,
    mut probe: F,
) -> ScanResult<T>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = (ProbeOutcome, Option<T>)>,
{
    let mut records = Vec::new();
    let mut stats = ScanStats::default();
    let mut id = 0u64;

    let termination = loop {
        if let ScanControl::Stop(reason) = policy.before_probe() {
            break reason;
        }
        let (outcome, record) = probe(id).await;
        stats.record(outcome);
        log::debug!("{kind} id {id}: {outcome:?}");
        if let Some(r) = record {
            records.push(r);
        }
        if let ScanControl::Stop(reason) = policy.observe(outcome) {
            break reason;
        }
        id += 1;
    };

    log::info!("{kind} scan stopped ({termination:?}): {stats}");
    ScanResult {
        records,
        termination,
        stats,
    }
}

fn probe_error(kind: ScanKind, id: u64, e: &CallError) -> ProbeOutcome {
    match e {
        CallError::NoData => {
            log::debug!("{kind} id {id} returned no data, end of range");
            ProbeOutcome::PastEnd
        }
        other => {
            log::warn!("{kind} probe {id} failed: {other}");
            ProbeOutcome::Error
        }
    }
}
