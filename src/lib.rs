pub use alloy_primitives;

pub mod config;
pub mod contract;
pub mod error;
pub mod node;
pub mod poller;
pub mod scan;
pub mod session;
pub mod state;
pub mod submit;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod units;
pub mod wallet;

// Core types
pub use config::{ApprovalMode, ClientConfig, ScanConfig, ScanStrategy};
pub use error::{CallError, Error, Result, SessionError, UnitError};
pub use node::PeerlendNode;
pub use session::{Session, SessionManager};

// Boundary traits implemented by the embedding application
pub use contract::MarketplaceContract;
pub use wallet::{AccountEvent, WalletProvider};

// Scanning and the read model
pub use scan::{
    CountBoundPolicy, EmptyRunPolicy, ScanKind, ScanResult, ScanStats, ScanTermination, Scanner,
    TerminationPolicy,
};
pub use state::{MarketEvent, MarketSnapshot, ReadModel};

// Submit machine
pub use submit::{
    ApprovalLeg, SubmitError, SubmitProgress, SubmitState, TwoPhaseSubmit, TxFailure, TxPhase,
};

// Decoded records and unit types
pub use types::{
    BorrowerListing, BorrowerListingParams, LenderListing, LenderListingParams, Loan,
    MarketMetrics,
};
pub use units::{Bips, TokenAmount};

// Polling
pub use poller::{PollerHandle, spawn_poller};
