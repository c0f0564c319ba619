//! Contract session manager.
//!
//! Owns the (provider, signer, contract-handle) triple every on-chain
//! operation depends on. The handle is derived lazily, cached per account,
//! and dropped when the account changes or disconnects. In-flight
//! operations clone the handle at call start, so invalidation never pulls
//! a session out from under them.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use alloy_primitives::Address;
use tokio::sync::Mutex;

use crate::contract::MarketplaceContract;
use crate::error::SessionError;
use crate::wallet::{AccountEvent, WalletProvider};

/// A signer-bound contract handle tied to the account that produced it.
#[derive(Clone)]
pub struct Session {
    pub account: Address,
    pub contract: Arc<dyn MarketplaceContract>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

pub struct SessionManager {
    provider: Arc<dyn WalletProvider>,
    marketplace: Option<Address>,
    current: Mutex<Option<Session>>,
    initializing: AtomicBool,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn WalletProvider>, marketplace: Option<Address>) -> Self {
        SessionManager {
            provider,
            marketplace,
            current: Mutex::new(None),
            initializing: AtomicBool::new(false),
        }
    }

    /// Return the session for the currently connected account, binding one
    /// if none is cached.
    ///
    /// Idempotent: a cached handle matching the current account is returned
    /// without re-deriving. Concurrent callers serialize on the session
    /// slot; the loser of a race observes the winner's handle.
    pub async fn ensure_initialized(&self) -> Result<Session, SessionError> {
        let account = self
            .provider
            .connected_account()
            .await?
            .ok_or(SessionError::NotConnected)?;

        let mut slot = self.current.lock().await;
        if let Some(session) = slot.as_ref() {
            if session.account == account {
                return Ok(session.clone());
            }
            log::debug!(
                "cached session account {} is stale, rebinding for {account}",
                session.account
            );
        }

        let marketplace = self.marketplace.ok_or(SessionError::ConfigMissing)?;
        self.initializing.store(true, Ordering::SeqCst);
        let bound = self.provider.bind_marketplace(account, marketplace).await;
        self.initializing.store(false, Ordering::SeqCst);
        let contract = bound?;

        log::info!("session bound to {account} against marketplace {marketplace}");
        let session = Session { account, contract };
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Drop the cached handle. The next `ensure_initialized` re-derives.
    pub async fn invalidate(&self) {
        if self.current.lock().await.take().is_some() {
            log::info!("session invalidated");
        }
    }

    /// React to an account lifecycle event from the wallet provider.
    pub async fn handle_account_event(&self, event: AccountEvent) {
        match event {
            AccountEvent::Connected(account) => {
                let mut slot = self.current.lock().await;
                match slot.as_ref() {
                    Some(session) if session.account == account => {}
                    Some(_) => {
                        *slot = None;
                        log::info!("account changed to {account}, session dropped");
                    }
                    None => {}
                }
            }
            AccountEvent::Disconnected => self.invalidate().await,
        }
    }

    /// Account of the cached session, if one exists.
    pub async fn current_account(&self) -> Option<Address> {
        self.current.lock().await.as_ref().map(|s| s.account)
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.provider.connected_account().await, Ok(Some(_)))
    }

    /// True while a bind is in flight.
    pub fn is_initializing(&self) -> bool {
        self.initializing.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockWallet;

    fn manager_with(wallet: MockWallet) -> SessionManager {
        SessionManager::new(Arc::new(wallet), Some(Address::repeat_byte(0xEE)))
    }

    #[tokio::test]
    async fn ensure_is_idempotent_for_same_account() {
        let wallet = MockWallet::connected(Address::repeat_byte(0x01));
        let manager = manager_with(wallet);

        let first = manager.ensure_initialized().await.unwrap();
        let second = manager.ensure_initialized().await.unwrap();
        assert_eq!(first.account, second.account);
        assert!(Arc::ptr_eq(&first.contract, &second.contract));
    }

    #[tokio::test]
    async fn account_change_produces_new_handle() {
        let wallet = MockWallet::connected(Address::repeat_byte(0x01));
        let manager = SessionManager::new(
            Arc::new(wallet.clone()),
            Some(Address::repeat_byte(0xEE)),
        );

        let first = manager.ensure_initialized().await.unwrap();

        let next = Address::repeat_byte(0x02);
        wallet.switch_account(next);
        manager
            .handle_account_event(AccountEvent::Connected(next))
            .await;

        let second = manager.ensure_initialized().await.unwrap();
        assert_eq!(second.account, next);
        assert!(!Arc::ptr_eq(&first.contract, &second.contract));
    }

    #[tokio::test]
    async fn no_account_is_not_connected() {
        let wallet = MockWallet::disconnected();
        let manager = manager_with(wallet);
        assert_eq!(
            manager.ensure_initialized().await.unwrap_err(),
            SessionError::NotConnected
        );
    }

    #[tokio::test]
    async fn missing_marketplace_address_is_config_missing() {
        let wallet = MockWallet::connected(Address::repeat_byte(0x01));
        let manager = SessionManager::new(Arc::new(wallet), None);
        assert_eq!(
            manager.ensure_initialized().await.unwrap_err(),
            SessionError::ConfigMissing
        );
    }

    #[tokio::test]
    async fn absent_provider_surfaces_no_provider() {
        let wallet = MockWallet::unavailable();
        let manager = manager_with(wallet);
        assert_eq!(
            manager.ensure_initialized().await.unwrap_err(),
            SessionError::NoProvider
        );
    }

    #[tokio::test]
    async fn disconnect_clears_session() {
        let wallet = MockWallet::connected(Address::repeat_byte(0x01));
        let manager = SessionManager::new(
            Arc::new(wallet.clone()),
            Some(Address::repeat_byte(0xEE)),
        );

        manager.ensure_initialized().await.unwrap();
        assert!(manager.current_account().await.is_some());

        manager.handle_account_event(AccountEvent::Disconnected).await;
        assert!(manager.current_account().await.is_none());
    }
}
