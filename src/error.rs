use thiserror::Error;

use crate::submit::SubmitError;

/// Failures establishing or refreshing the wallet-bound contract session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no wallet provider is available")]
    NoProvider,

    #[error("wallet provider has no connected account")]
    NotConnected,

    #[error("marketplace address or ABI configuration is missing")]
    ConfigMissing,

    #[error("provider error: {0}")]
    Provider(String),
}

/// Raw outcome of a single contract call, before any classification.
///
/// Produced by [`MarketplaceContract`](crate::contract::MarketplaceContract)
/// implementations. The scanner and the submit machine interpret these;
/// callers normally see the classified forms instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// The call returned no decodable data. For per-id getters this marks
    /// an index past the end of the contract's storage.
    #[error("call returned no data")]
    NoData,

    /// The wallet refused to sign (EIP-1193 code 4001 or equivalent).
    #[error("signature request rejected by wallet")]
    Rejected,

    /// Execution reverted; `reason` holds the decoded ABI error name when
    /// the revert data was decodable.
    #[error("execution reverted: {}", reason.as_deref().unwrap_or("no reason given"))]
    Reverted { reason: Option<String> },

    /// Transport or node failure, raw provider message preserved.
    #[error("rpc error: {0}")]
    Rpc(String),
}

impl CallError {
    pub fn rpc(msg: impl Into<String>) -> Self {
        CallError::Rpc(msg.into())
    }

    pub fn reverted(reason: impl Into<String>) -> Self {
        CallError::Reverted {
            reason: Some(reason.into()),
        }
    }
}

/// Failures converting between human units and chain units.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("not a decimal number: {0:?}")]
    InvalidNumber(String),

    #[error("amount overflows 256 bits")]
    Overflow,

    #[error("unsupported token precision: {0} decimals")]
    UnsupportedPrecision(u8),
}

/// Errors returned by [`PeerlendNode`](crate::node::PeerlendNode) operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("unit conversion error: {0}")]
    Unit(#[from] UnitError),

    #[error("contract call error: {0}")]
    Call(#[from] CallError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error("invalid {field}: {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    #[error("no loan exists with id {0}")]
    LoanNotFound(u64),
}

impl Error {
    pub(crate) fn invalid_input(field: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidInput {
            field,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
