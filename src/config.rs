//! Client configuration: marketplace address, scan strategy, approval
//! style, poll period. Loadable from a JSON file; every field has a
//! working default except the marketplace address.

use std::fs;
use std::path::Path;
use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Background refresh period, seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Per-wait confirmation deadline, seconds.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 120;

/// Consecutive misses that end a heuristic scan.
pub const DEFAULT_EMPTY_RUN_THRESHOLD: u32 = 3;

/// Decimal precision assumed for lending assets when the token contract
/// is not consulted.
pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How a sequential scan decides to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ScanStrategy {
    /// Bound the scan with the active counts from `getMarketMetrics`,
    /// keeping the empty-run counter as a safety net. Falls back to
    /// [`ScanStrategy::EmptyRun`] when the metrics read fails.
    #[default]
    CountOracle,
    /// Probe until a run of consecutive empty-or-error ids.
    EmptyRun,
}

/// ERC20 allowance style for approve-then-act operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalMode {
    /// Approve exactly the amount being moved, every time.
    #[default]
    Exact,
    /// Approve `U256::MAX` once and rely on the standing allowance.
    Unlimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub strategy: ScanStrategy,
    pub empty_run_threshold: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            strategy: ScanStrategy::default(),
            empty_run_threshold: DEFAULT_EMPTY_RUN_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deployed marketplace address. Session binding fails with
    /// `ConfigMissing` while this is unset.
    pub marketplace_address: Option<Address>,
    pub scan: ScanConfig,
    pub approval_mode: ApprovalMode,
    pub poll_interval_secs: u64,
    pub confirmation_timeout_secs: u64,
    /// Decimals used to encode and format lending-asset amounts.
    pub token_decimals: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            marketplace_address: None,
            scan: ScanConfig::default(),
            approval_mode: ApprovalMode::default(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            token_decimals: DEFAULT_TOKEN_DECIMALS,
        }
    }
}

impl ClientConfig {
    /// Default config pointed at a deployed marketplace.
    pub fn for_marketplace(address: Address) -> Self {
        ClientConfig {
            marketplace_address: Some(address),
            ..Default::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}
