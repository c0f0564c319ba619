//! `PeerlendNode` — unified client coordinator.
//!
//! Owns the wallet session, the scanner, and the read model behind a
//! single `&self` API. Write operations validate user input, run the
//! approve-then-act submit machine, and refresh the affected collections
//! before returning. Account lifecycle events from the wallet provider
//! are consumed by a background task spawned at construction.

use std::future::Future;
use std::sync::{Arc, Weak};

use alloy_primitives::{Address, TxHash, U256};
use tokio::sync::broadcast;

use crate::config::ClientConfig;
use crate::contract::{CreateBorrowerListingCall, CreateLenderListingCall, LoanData};
use crate::error::{CallError, Error, Result, SessionError, UnitError};
use crate::poller::{PollerHandle, spawn_poller};
use crate::scan::Scanner;
use crate::session::{Session, SessionManager};
use crate::state::{MarketEvent, MarketSnapshot, ReadModel};
use crate::submit::{ApprovalLeg, SubmitProgress, TwoPhaseSubmit};
use crate::types::{
    BorrowerListing, BorrowerListingParams, LenderListing, LenderListingParams, Loan,
    MarketMetrics, MAX_DURATION_DAYS, MAX_INTEREST_RATE, MIN_COLLATERAL_RATIO_FLOOR,
};
use crate::units::{Bips, days_to_seconds, parse_decimal};
use crate::wallet::{AccountEvent, WalletProvider};

// ── Struct ──────────────────────────────────────────────────────────────────

/// Unified coordinator over the wallet session, scanner, and read model.
///
/// All public methods take `&self`; the node is intended to live behind
/// an `Arc` shared between the UI layer and the poller.
pub struct PeerlendNode {
    session: Arc<SessionManager>,
    model: Arc<ReadModel>,
    scanner: Scanner,
    config: ClientConfig,
}

// ── Construction ────────────────────────────────────────────────────────────

impl PeerlendNode {
    /// Create a node around an injected wallet provider.
    ///
    /// Spawns the account-event forwarding task, so this must be called
    /// inside a tokio runtime. The task exits on its own once the node
    /// is dropped or the provider closes its event channel.
    pub fn new(provider: Arc<dyn WalletProvider>, config: ClientConfig) -> Self {
        let events = provider.subscribe_accounts();
        let session = Arc::new(SessionManager::new(provider, config.marketplace_address));
        let model = Arc::new(ReadModel::new());
        let scanner = Scanner::new(config.scan, config.token_decimals);

        spawn_account_task(events, Arc::downgrade(&session), Arc::downgrade(&model));

        PeerlendNode {
            session,
            model,
            scanner,
            config,
        }
    }

    // ── Session lifecycle ───────────────────────────────────────────────

    /// Bind (or reuse) the contract session for the connected account.
    pub async fn ensure_initialized(&self) -> Result<Session> {
        Ok(self.session.ensure_initialized().await?)
    }

    /// Establish the session and load all collections. Returns the bound
    /// account.
    pub async fn connect(&self) -> Result<Address> {
        let session = self.ensure_initialized().await?;
        self.model.notify(MarketEvent::SessionChanged);
        self.refresh_all().await?;
        Ok(session.account)
    }

    /// Drop the session and all cached market data.
    pub async fn disconnect(&self) {
        self.session.invalidate().await;
        self.model.clear();
        self.model.notify(MarketEvent::SessionChanged);
    }

    pub async fn current_account(&self) -> Option<Address> {
        self.session.current_account().await
    }

    pub async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    pub fn is_initializing(&self) -> bool {
        self.session.is_initializing()
    }

    // ── Read model ──────────────────────────────────────────────────────

    pub fn lender_listings(&self) -> Vec<LenderListing> {
        self.model.lender_listings()
    }

    pub fn borrower_listings(&self) -> Vec<BorrowerListing> {
        self.model.borrower_listings()
    }

    pub fn loans(&self) -> Vec<Loan> {
        self.model.loans()
    }

    pub fn is_loading(&self) -> bool {
        self.model.is_loading()
    }

    pub fn revision(&self) -> u64 {
        self.model.revision()
    }

    /// One coherent view of session and market state, for the UI.
    pub async fn snapshot(&self) -> MarketSnapshot {
        let is_connected = self.session.is_connected().await;
        self.model
            .snapshot(is_connected, self.session.is_initializing())
    }

    /// Subscribe to read-model change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.model.subscribe()
    }

    /// Live `getMarketMetrics` totals, decoded to human units.
    pub async fn market_metrics(&self) -> Result<MarketMetrics> {
        let session = self.ensure_initialized().await?;
        let data = session.contract.market_metrics().await?;
        Ok(MarketMetrics::decode(&data, self.config.token_decimals)?)
    }

    // ── Refresh ─────────────────────────────────────────────────────────

    /// Rescan every collection. A cycle already in flight makes this a
    /// no-op.
    pub async fn refresh_all(&self) -> Result<()> {
        run_refresh_cycle(&self.session, &self.model, &self.scanner).await
    }

    /// Rescan both listing collections.
    pub async fn refresh_listings(&self) -> Result<()> {
        let session = self.ensure_initialized().await?;
        let _guard = self.model.begin_loading();
        let contract = session.contract.as_ref();

        let generation = self.model.begin_scan();
        let result = self.scanner.scan_lender_listings(contract).await;
        self.model.apply_lender_listings(generation, result);

        let generation = self.model.begin_scan();
        let result = self.scanner.scan_borrower_listings(contract).await;
        self.model.apply_borrower_listings(generation, result);
        Ok(())
    }

    /// Rescan the loan collection.
    pub async fn refresh_loans(&self) -> Result<()> {
        let session = self.ensure_initialized().await?;
        let _guard = self.model.begin_loading();

        let generation = self.model.begin_scan();
        let result = self.scanner.scan_loans(session.contract.as_ref()).await;
        self.model.apply_loans(generation, result);
        Ok(())
    }

    // ── Write operations ────────────────────────────────────────────────

    /// Publish a lending offer.
    pub async fn create_lender_listing(&self, params: LenderListingParams) -> Result<TxHash> {
        let amount = parse_amount("amount", &params.amount, self.config.token_decimals)?;
        let min_interest_rate = parse_rate("minInterestRate", &params.min_interest_rate_percent)?;
        let max_duration = validate_duration("maxDuration", params.max_duration_days)?;
        let min_collateral_ratio =
            parse_ratio("minCollateralRatio", &params.min_collateral_ratio_percent)?;
        if params.accepted_collateral_tokens.is_empty() {
            return Err(Error::invalid_input(
                "acceptedCollateralTokens",
                "at least one collateral token is required",
            ));
        }

        let session = self.ensure_initialized().await?;
        let call = CreateLenderListingCall {
            amount,
            min_interest_rate: min_interest_rate.as_wire(),
            max_duration: U256::from(max_duration),
            accepted_collateral_tokens: params.accepted_collateral_tokens,
            min_collateral_ratio: min_collateral_ratio.as_wire(),
            lending_token: params.lending_token,
        };
        let hash = self
            .submit(&session, "create lender listing", None, || {
                session.contract.create_lender_listing(call)
            })
            .await?;
        self.refresh_listings_after("create lender listing").await;
        Ok(hash)
    }

    /// Publish a borrowing request. The marketplace escrows the collateral
    /// at listing time, so a token collateral approves the marketplace
    /// before the listing call.
    pub async fn create_borrower_listing(&self, params: BorrowerListingParams) -> Result<TxHash> {
        let amount = parse_amount("amount", &params.amount, self.config.token_decimals)?;
        let max_interest_rate = parse_rate("maxInterestRate", &params.max_interest_rate_percent)?;
        let duration = validate_duration("duration", params.duration_days)?;
        let collateral_amount = parse_amount(
            "collateralAmount",
            &params.collateral_amount,
            self.config.token_decimals,
        )?;

        let session = self.ensure_initialized().await?;
        let approval = (!params.collateral_token.is_zero()).then(|| ApprovalLeg {
            token: params.collateral_token,
            amount: collateral_amount,
        });
        let call = CreateBorrowerListingCall {
            amount,
            max_interest_rate: max_interest_rate.as_wire(),
            duration: U256::from(duration),
            collateral_token: params.collateral_token,
            collateral_amount,
            lending_token: params.lending_token,
        };
        let hash = self
            .submit(&session, "create borrower listing", approval, || {
                session.contract.create_borrower_listing(call)
            })
            .await?;
        self.refresh_listings_after("create borrower listing").await;
        Ok(hash)
    }

    /// Repay `amount` (a decimal string in lending-asset units) against a
    /// loan. Token-denominated loans approve the marketplace first; native
    /// loans attach the amount as transaction value.
    pub async fn repay_loan(&self, id: u64, amount: &str) -> Result<TxHash> {
        self.repay_inner(id, amount, SubmitProgress::NotStarted)
            .await
    }

    /// Retry a repayment whose approval already confirmed, skipping the
    /// approve leg.
    pub async fn resume_repay_loan(
        &self,
        id: u64,
        amount: &str,
        progress: SubmitProgress,
    ) -> Result<TxHash> {
        self.repay_inner(id, amount, progress).await
    }

    /// Push a loan's grace-period deadline out by `added_days`.
    pub async fn set_grace_period(&self, id: u64, added_days: u32) -> Result<TxHash> {
        if added_days == 0 {
            return Err(Error::invalid_input(
                "addedDays",
                "must extend by at least one day",
            ));
        }
        let session = self.ensure_initialized().await?;
        let record = self.loan_record(&session, id).await?;
        let new_end = record
            .grace_period_end
            .checked_add(U256::from(days_to_seconds(added_days)))
            .ok_or(UnitError::Overflow)?;

        let hash = self
            .submit(&session, "set grace period", None, || {
                session.contract.set_grace_period(id, new_end)
            })
            .await?;
        self.refresh_loans_after("set grace period").await;
        Ok(hash)
    }

    /// Seize collateral on a defaulted loan.
    pub async fn liquidate_loan(&self, id: u64) -> Result<TxHash> {
        let session = self.ensure_initialized().await?;
        let hash = self
            .submit(&session, "liquidate loan", None, || {
                session.contract.liquidate_loan(id)
            })
            .await?;
        self.refresh_loans_after("liquidate loan").await;
        Ok(hash)
    }

    // ── Polling ─────────────────────────────────────────────────────────

    /// Start the periodic refresh task. Stop it by calling
    /// [`PollerHandle::shutdown`] or dropping every handle.
    pub fn start_polling(&self) -> PollerHandle {
        let session = self.session.clone();
        let model = self.model.clone();
        let scanner = self.scanner.clone();
        spawn_poller(self.config.poll_interval(), move || {
            let session = session.clone();
            let model = model.clone();
            let scanner = scanner.clone();
            async move {
                match run_refresh_cycle(&session, &model, &scanner).await {
                    Ok(()) => {}
                    Err(Error::Session(SessionError::NotConnected)) => {
                        log::debug!("poll skipped, wallet not connected");
                    }
                    Err(e) => log::warn!("scheduled refresh failed: {e}"),
                }
            }
        })
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn repay_inner(
        &self,
        id: u64,
        amount: &str,
        progress: SubmitProgress,
    ) -> Result<TxHash> {
        let value = parse_amount("amount", amount, self.config.token_decimals)?;
        let session = self.ensure_initialized().await?;
        let record = self.loan_record(&session, id).await?;

        let (approval, attached) = if record.lending_token.is_zero() {
            (None, value)
        } else {
            let leg = ApprovalLeg {
                token: record.lending_token,
                amount: value,
            };
            (Some(leg), U256::ZERO)
        };

        let hash = self
            .submit_from(&session, "repay loan", approval, progress, || {
                session.contract.repay_loan(id, attached)
            })
            .await?;
        self.refresh_loans_after("repay loan").await;
        Ok(hash)
    }

    /// Fresh `getLoan` read; absent ids surface as [`Error::LoanNotFound`].
    async fn loan_record(&self, session: &Session, id: u64) -> Result<LoanData> {
        match session.contract.loan(id).await {
            Ok(data) if data.is_structurally_empty() => Err(Error::LoanNotFound(id)),
            Ok(data) => Ok(data),
            Err(CallError::NoData) => Err(Error::LoanNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn submit<F, Fut>(
        &self,
        session: &Session,
        label: &str,
        approval: Option<ApprovalLeg>,
        primary: F,
    ) -> Result<TxHash>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<TxHash, CallError>>,
    {
        self.submit_from(session, label, approval, SubmitProgress::NotStarted, primary)
            .await
    }

    async fn submit_from<F, Fut>(
        &self,
        session: &Session,
        label: &str,
        approval: Option<ApprovalLeg>,
        progress: SubmitProgress,
        primary: F,
    ) -> Result<TxHash>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<TxHash, CallError>>,
    {
        let mut machine = TwoPhaseSubmit::new(
            session.contract.as_ref(),
            self.config.approval_mode,
            self.config.confirmation_timeout(),
        );
        Ok(machine.resume(label, approval, progress, primary).await?)
    }

    /// Best-effort rescan of both listing collections after a confirmed
    /// write. The transaction already happened; a failed rescan is logged,
    /// not surfaced.
    async fn refresh_listings_after(&self, label: &str) {
        if let Err(e) = self.refresh_listings().await {
            log::warn!("refresh after {label} failed: {e}");
        }
    }

    /// Best-effort loan rescan after a confirmed write.
    async fn refresh_loans_after(&self, label: &str) {
        if let Err(e) = self.refresh_loans().await {
            log::warn!("refresh after {label} failed: {e}");
        }
    }
}

// ── Refresh cycle ───────────────────────────────────────────────────────────

/// One full rescan of all three collections. Shared between the poller
/// and [`PeerlendNode::refresh_all`]; overlapping cycles collapse into
/// whichever started first.
async fn run_refresh_cycle(
    session: &SessionManager,
    model: &ReadModel,
    scanner: &Scanner,
) -> Result<()> {
    let Some(_guard) = model.try_begin_loading() else {
        log::debug!("refresh already in flight, skipping");
        return Ok(());
    };
    let session = session.ensure_initialized().await?;
    let contract = session.contract.as_ref();

    let generation = model.begin_scan();
    let result = scanner.scan_lender_listings(contract).await;
    model.apply_lender_listings(generation, result);

    let generation = model.begin_scan();
    let result = scanner.scan_borrower_listings(contract).await;
    model.apply_borrower_listings(generation, result);

    let generation = model.begin_scan();
    let result = scanner.scan_loans(contract).await;
    model.apply_loans(generation, result);
    Ok(())
}

// ── Account event task ──────────────────────────────────────────────────────

/// Forward wallet account events into the session and read model. Holds
/// weak references only, so the task cannot outlive the node.
fn spawn_account_task(
    mut events: broadcast::Receiver<AccountEvent>,
    session: Weak<SessionManager>,
    model: Weak<ReadModel>,
) {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("missed {missed} account events, re-deriving session");
                    None
                }
                Err(broadcast::error::RecvError::Closed) => {
                    log::debug!("account event channel closed");
                    return;
                }
            };
            let (Some(session), Some(model)) = (session.upgrade(), model.upgrade()) else {
                return;
            };
            match event {
                Some(event) => {
                    session.handle_account_event(event).await;
                    if event == AccountEvent::Disconnected {
                        model.clear();
                    }
                    model.notify(MarketEvent::SessionChanged);
                }
                // Lagged: the current account is unknown, force a re-bind.
                None => session.invalidate().await,
            }
        }
    });
}

// ── Input validation ────────────────────────────────────────────────────────

fn parse_amount(field: &'static str, input: &str, decimals: u8) -> Result<U256> {
    let units =
        parse_decimal(input, decimals).map_err(|e| Error::invalid_input(field, e.to_string()))?;
    if units.is_zero() {
        return Err(Error::invalid_input(field, "must be greater than zero"));
    }
    Ok(units)
}

fn parse_rate(field: &'static str, input: &str) -> Result<Bips> {
    let rate = Bips::parse_percent(input).map_err(|e| Error::invalid_input(field, e.to_string()))?;
    if rate > MAX_INTEREST_RATE {
        return Err(Error::invalid_input(
            field,
            format!("interest rate above {MAX_INTEREST_RATE}"),
        ));
    }
    Ok(rate)
}

fn parse_ratio(field: &'static str, input: &str) -> Result<Bips> {
    let ratio =
        Bips::parse_percent(input).map_err(|e| Error::invalid_input(field, e.to_string()))?;
    if ratio < MIN_COLLATERAL_RATIO_FLOOR {
        return Err(Error::invalid_input(
            field,
            format!("collateral ratio below {MIN_COLLATERAL_RATIO_FLOOR}"),
        ));
    }
    Ok(ratio)
}

fn validate_duration(field: &'static str, days: u32) -> Result<u64> {
    if days == 0 {
        return Err(Error::invalid_input(field, "must be at least one day"));
    }
    if days > MAX_DURATION_DAYS {
        return Err(Error::invalid_input(
            field,
            format!("duration above {MAX_DURATION_DAYS} days"),
        ));
    }
    Ok(days_to_seconds(days))
}
