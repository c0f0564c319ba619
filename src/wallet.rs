//! Boundary trait for the injected wallet provider.
//!
//! The provider owns accounts and signing; this crate only asks it which
//! account is active and for a signer-bound marketplace handle. Account
//! changes arrive over an explicit broadcast channel instead of being
//! polled.

use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::contract::MarketplaceContract;
use crate::error::SessionError;

/// Account lifecycle notifications from the wallet provider.
///
/// A switch between two accounts arrives as a single `Connected` carrying
/// the new account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountEvent {
    Connected(Address),
    Disconnected,
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// The currently authorized account.
    ///
    /// `Ok(None)` means the provider is reachable but no account is
    /// connected; [`SessionError::NoProvider`] means there is no wallet
    /// transport at all.
    async fn connected_account(&self) -> Result<Option<Address>, SessionError>;

    /// Derive a signer for `account` and bind a contract handle to the
    /// marketplace deployed at `marketplace`.
    async fn bind_marketplace(
        &self,
        account: Address,
        marketplace: Address,
    ) -> Result<Arc<dyn MarketplaceContract>, SessionError>;

    /// Subscribe to account lifecycle changes.
    fn subscribe_accounts(&self) -> broadcast::Receiver<AccountEvent>;
}
