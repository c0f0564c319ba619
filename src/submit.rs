//! Two-phase transaction submission: optional ERC20 approval, confirmation
//! barrier, primary call, confirmation.
//!
//! The machine is explicit about where it is so a failed submission can be
//! resumed. A confirmed approval is never repeated on retry; everything
//! before that point is. Failures are classified from the raw call error
//! in a fixed order: wallet rejection, insufficient funds, decoded revert,
//! timeout, unknown.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use alloy_primitives::{Address, TxHash, U256};
use serde::Serialize;
use thiserror::Error;

use crate::config::ApprovalMode;
use crate::contract::MarketplaceContract;
use crate::error::CallError;

/// Which leg of a submission an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TxPhase {
    Approval,
    Primary,
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TxPhase::Approval => "approval",
            TxPhase::Primary => "primary",
        })
    }
}

/// Classified cause of a failed submission.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TxFailure {
    #[error("transaction rejected in the wallet")]
    Rejected,

    #[error("account has insufficient funds")]
    InsufficientFunds,

    #[error("contract rejected the call: {name}")]
    ContractReverted { name: String },

    #[error("confirmation wait exceeded the client deadline")]
    TimedOut,

    #[error("unclassified failure: {0}")]
    Unknown(String),
}

/// Progress a submission has durably made. Returned inside
/// [`SubmitError`] so a retry can skip completed legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitProgress {
    #[default]
    NotStarted,
    /// The approval confirmed on chain; retrying from here must not
    /// approve again.
    ApprovalConfirmed,
}

/// A failed submission: which phase, why, and how far it got.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{phase} transaction failed: {failure}")]
pub struct SubmitError {
    pub phase: TxPhase,
    pub failure: TxFailure,
    pub progress: SubmitProgress,
}

/// Observable machine states, in order of progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitState {
    NotStarted,
    ApprovalPending(TxHash),
    ApprovalConfirmed,
    PrimaryPending(TxHash),
    Confirmed(TxHash),
    Failed { phase: TxPhase, failure: TxFailure },
}

/// ERC20 allowance that must confirm before the primary call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalLeg {
    pub token: Address,
    pub amount: U256,
}

// ── Failure classification ──────────────────────────────────────────────────

/// Raw provider messages that mean the signer refused.
const REJECTION_MARKERS: &[&str] = &["user rejected", "user denied", "action_rejected"];

/// Raw provider messages that mean the account cannot cover value plus gas.
const INSUFFICIENT_MARKERS: &[&str] = &[
    "insufficient funds",
    "insufficient balance",
    "exceeds balance",
];

/// Classify a raw call error. Checked in order: wallet rejection,
/// insufficient funds, decoded revert, then unknown.
pub fn classify_failure(e: &CallError) -> TxFailure {
    match e {
        CallError::Rejected => TxFailure::Rejected,
        CallError::Reverted { reason: Some(name) } => TxFailure::ContractReverted {
            name: name.clone(),
        },
        CallError::Reverted { reason: None } => {
            TxFailure::Unknown("execution reverted without a decodable reason".into())
        }
        CallError::Rpc(msg) => classify_rpc_message(msg),
        CallError::NoData => TxFailure::Unknown(e.to_string()),
    }
}

fn classify_rpc_message(msg: &str) -> TxFailure {
    let lower = msg.to_lowercase();
    if REJECTION_MARKERS.iter().any(|m| lower.contains(m)) {
        return TxFailure::Rejected;
    }
    if INSUFFICIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return TxFailure::InsufficientFunds;
    }
    TxFailure::Unknown(msg.to_string())
}

// ── The machine ─────────────────────────────────────────────────────────────

/// Drives one submission against a captured contract handle.
///
/// Build one per operation; the machine is not reusable across operations
/// but may be re-run after a failure with the progress from the error.
pub struct TwoPhaseSubmit<'a> {
    contract: &'a dyn MarketplaceContract,
    approval_mode: ApprovalMode,
    confirmation_timeout: Duration,
    state: SubmitState,
}

impl<'a> TwoPhaseSubmit<'a> {
    pub fn new(
        contract: &'a dyn MarketplaceContract,
        approval_mode: ApprovalMode,
        confirmation_timeout: Duration,
    ) -> Self {
        TwoPhaseSubmit {
            contract,
            approval_mode,
            confirmation_timeout,
            state: SubmitState::NotStarted,
        }
    }

    /// Current machine state, for diagnostics and tests.
    pub fn state(&self) -> &SubmitState {
        &self.state
    }

    /// Run approve-then-act from scratch.
    pub async fn run<F, Fut>(
        &mut self,
        label: &str,
        approval: Option<ApprovalLeg>,
        primary: F,
    ) -> Result<TxHash, SubmitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TxHash, CallError>>,
    {
        self.resume(label, approval, SubmitProgress::NotStarted, primary)
            .await
    }

    /// Run from prior progress. `SubmitProgress::ApprovalConfirmed` skips
    /// the approval leg entirely.
    pub async fn resume<F, Fut>(
        &mut self,
        label: &str,
        approval: Option<ApprovalLeg>,
        progress: SubmitProgress,
        primary: F,
    ) -> Result<TxHash, SubmitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TxHash, CallError>>,
    {
        self.state = match progress {
            SubmitProgress::NotStarted => SubmitState::NotStarted,
            SubmitProgress::ApprovalConfirmed => SubmitState::ApprovalConfirmed,
        };
        let mut progress = progress;

        if let Some(leg) = approval {
            if progress == SubmitProgress::NotStarted {
                self.approve(label, leg, progress).await?;
                progress = SubmitProgress::ApprovalConfirmed;
            } else {
                log::debug!("{label}: approval already confirmed, skipping");
            }
        }

        let hash = match primary().await {
            Ok(hash) => hash,
            Err(e) => return Err(self.fail(label, TxPhase::Primary, &e, progress)),
        };
        self.transition(label, SubmitState::PrimaryPending(hash));
        self.confirm(label, hash, TxPhase::Primary, progress).await?;

        self.transition(label, SubmitState::Confirmed(hash));
        log::info!("{label} confirmed in {hash}");
        Ok(hash)
    }

    async fn approve(
        &mut self,
        label: &str,
        leg: ApprovalLeg,
        progress: SubmitProgress,
    ) -> Result<(), SubmitError> {
        let amount = match self.approval_mode {
            ApprovalMode::Exact => leg.amount,
            ApprovalMode::Unlimited => U256::MAX,
        };
        let spender = self.contract.address();
        log::debug!(
            "{label}: approving {amount} of {token} for {spender}",
            token = leg.token
        );

        let hash = match self.contract.approve(leg.token, spender, amount).await {
            Ok(hash) => hash,
            Err(e) => return Err(self.fail(label, TxPhase::Approval, &e, progress)),
        };
        self.transition(label, SubmitState::ApprovalPending(hash));
        self.confirm(label, hash, TxPhase::Approval, progress).await?;
        self.transition(label, SubmitState::ApprovalConfirmed);
        Ok(())
    }

    /// Wait for `hash` to mine, bounded by the configured deadline.
    async fn confirm(
        &mut self,
        label: &str,
        hash: TxHash,
        phase: TxPhase,
        progress: SubmitProgress,
    ) -> Result<(), SubmitError> {
        let wait = self.contract.wait_for_confirmation(hash);
        match tokio::time::timeout(self.confirmation_timeout, wait).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.fail(label, phase, &e, progress)),
            Err(_) => {
                log::warn!(
                    "{label}: {phase} confirmation not seen within {:?}",
                    self.confirmation_timeout
                );
                Err(self.fail_with(label, phase, TxFailure::TimedOut, progress))
            }
        }
    }

    fn fail(
        &mut self,
        label: &str,
        phase: TxPhase,
        e: &CallError,
        progress: SubmitProgress,
    ) -> SubmitError {
        self.fail_with(label, phase, classify_failure(e), progress)
    }

    fn fail_with(
        &mut self,
        label: &str,
        phase: TxPhase,
        failure: TxFailure,
        progress: SubmitProgress,
    ) -> SubmitError {
        log::warn!("{label}: {phase} failed: {failure}");
        self.transition(
            label,
            SubmitState::Failed {
                phase,
                failure: failure.clone(),
            },
        );
        SubmitError {
            phase,
            failure,
            progress,
        }
    }

    fn transition(&mut self, label: &str, next: SubmitState) {
        log::debug!("{label}: {:?} -> {next:?}", self.state);
        self.state = next;
    }
}
