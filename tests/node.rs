use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use peerlend_sdk::testing::{
    CallRecord, MOCK_MARKETPLACE_ADDRESS, MockMarketplace, MockWallet, WriteCall, active_status,
    borrower_listing_data, lender_listing_data, loan_data,
};
use peerlend_sdk::{
    Bips, BorrowerListingParams, CallError, ClientConfig, Error, LenderListingParams, MarketEvent,
    PeerlendNode, SessionError, SubmitProgress,
};
use tokio::sync::broadcast;

const ACCOUNT: Address = Address::repeat_byte(0x01);
const OTHER_ACCOUNT: Address = Address::repeat_byte(0x02);
const ERC20: Address = Address::repeat_byte(0xAB);

fn tokens(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

fn setup() -> (PeerlendNode, MockWallet, MockMarketplace) {
    let wallet = MockWallet::connected(ACCOUNT);
    let market = wallet.market();
    let node = PeerlendNode::new(
        Arc::new(wallet.clone()),
        ClientConfig::for_marketplace(MOCK_MARKETPLACE_ADDRESS),
    );
    (node, wallet, market)
}

fn valid_lender_params() -> LenderListingParams {
    LenderListingParams {
        amount: "10".into(),
        min_interest_rate_percent: "5".into(),
        max_duration_days: 30,
        accepted_collateral_tokens: vec![Address::repeat_byte(0xC0)],
        min_collateral_ratio_percent: "150".into(),
        lending_token: Address::ZERO,
    }
}

fn valid_borrower_params() -> BorrowerListingParams {
    BorrowerListingParams {
        amount: "4".into(),
        max_interest_rate_percent: "8".into(),
        duration_days: 14,
        collateral_token: Address::ZERO,
        collateral_amount: "6".into(),
        lending_token: Address::ZERO,
    }
}

async fn wait_for(events: &mut broadcast::Receiver<MarketEvent>, wanted: MarketEvent) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for a read-model event")
            .expect("event channel closed");
        if event == wanted {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_binds_and_loads_every_collection() {
    let (node, _wallet, market) = setup();
    market.insert_lender_listing(0, lender_listing_data(ACCOUNT, tokens(10)));
    market.insert_borrower_listing(0, borrower_listing_data(OTHER_ACCOUNT, tokens(4)));
    market.insert_loan(
        0,
        loan_data(ACCOUNT, OTHER_ACCOUNT, tokens(5), Address::ZERO),
        active_status(tokens(6)),
    );

    let account = node.connect().await.unwrap();
    assert_eq!(account, ACCOUNT);
    assert_eq!(node.lender_listings().len(), 1);
    assert_eq!(node.borrower_listings().len(), 1);
    assert_eq!(node.loans().len(), 1);

    let snapshot = node.snapshot().await;
    assert!(snapshot.is_connected);
    assert!(!snapshot.is_loading);
    assert_eq!(snapshot.loans[0].total_owed.format(), "6");
}

#[tokio::test]
async fn ensure_initialized_reuses_the_bound_session() {
    let (node, wallet, _market) = setup();

    let first = node.ensure_initialized().await.unwrap();
    let second = node.ensure_initialized().await.unwrap();

    assert_eq!(first.account, second.account);
    assert!(Arc::ptr_eq(&first.contract, &second.contract));
    assert_eq!(wallet.bind_count(), 1);
}

#[tokio::test]
async fn connect_without_wallet_account_fails() {
    let wallet = MockWallet::disconnected();
    let node = PeerlendNode::new(
        Arc::new(wallet),
        ClientConfig::for_marketplace(MOCK_MARKETPLACE_ADDRESS),
    );

    match node.connect().await.unwrap_err() {
        Error::Session(SessionError::NotConnected) => {}
        other => panic!("expected NotConnected, got {other}"),
    }
}

#[tokio::test]
async fn missing_marketplace_address_is_reported() {
    let wallet = MockWallet::connected(ACCOUNT);
    let node = PeerlendNode::new(Arc::new(wallet), ClientConfig::default());

    match node.ensure_initialized().await.map(|s| s.account).unwrap_err() {
        Error::Session(SessionError::ConfigMissing) => {}
        other => panic!("expected ConfigMissing, got {other}"),
    }
}

#[tokio::test]
async fn unavailable_provider_is_distinguished_from_disconnected() {
    let node = PeerlendNode::new(
        Arc::new(MockWallet::unavailable()),
        ClientConfig::for_marketplace(MOCK_MARKETPLACE_ADDRESS),
    );

    match node.ensure_initialized().await.map(|s| s.account).unwrap_err() {
        Error::Session(SessionError::NoProvider) => {}
        other => panic!("expected NoProvider, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Account events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn account_switch_rebinds_on_next_use() {
    let (node, wallet, _market) = setup();
    node.ensure_initialized().await.unwrap();
    assert_eq!(wallet.bind_count(), 1);

    let mut events = node.subscribe();
    wallet.switch_account(OTHER_ACCOUNT);
    wait_for(&mut events, MarketEvent::SessionChanged).await;

    let session = node.ensure_initialized().await.unwrap();
    assert_eq!(session.account, OTHER_ACCOUNT);
    assert_eq!(wallet.bind_count(), 2);
}

#[tokio::test]
async fn disconnect_event_clears_cached_data() {
    let (node, wallet, market) = setup();
    market.insert_loan(
        0,
        loan_data(ACCOUNT, OTHER_ACCOUNT, tokens(5), Address::ZERO),
        active_status(tokens(6)),
    );
    node.connect().await.unwrap();
    assert_eq!(node.loans().len(), 1);

    let mut events = node.subscribe();
    wallet.drop_account();
    wait_for(&mut events, MarketEvent::SessionChanged).await;

    assert!(node.loans().is_empty());
    assert!(!node.is_connected().await);
    match node.ensure_initialized().await.map(|s| s.account).unwrap_err() {
        Error::Session(SessionError::NotConnected) => {}
        other => panic!("expected NotConnected, got {other}"),
    }
}

#[tokio::test]
async fn manual_disconnect_clears_the_read_model() {
    let (node, _wallet, market) = setup();
    market.insert_lender_listing(0, lender_listing_data(ACCOUNT, tokens(10)));
    node.connect().await.unwrap();
    assert_eq!(node.lender_listings().len(), 1);

    node.disconnect().await;

    assert!(node.lender_listings().is_empty());
    assert_eq!(node.current_account().await, None);
}

// ---------------------------------------------------------------------------
// Write operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn created_listing_appears_after_the_follow_up_refresh() {
    let (node, _wallet, _market) = setup();
    node.connect().await.unwrap();
    assert!(node.lender_listings().is_empty());

    node.create_lender_listing(valid_lender_params())
        .await
        .unwrap();

    let listings = node.lender_listings();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].lender, ACCOUNT);
    assert_eq!(listings[0].amount.format(), "10");
    assert_eq!(listings[0].min_interest_rate, Bips(500));
}

#[tokio::test]
async fn created_borrower_listing_appears_too() {
    let (node, _wallet, _market) = setup();
    node.connect().await.unwrap();

    node.create_borrower_listing(valid_borrower_params())
        .await
        .unwrap();

    let listings = node.borrower_listings();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].duration_days, 14);
    assert_eq!(listings[0].collateral_amount.format(), "6");
}

#[tokio::test]
async fn created_listing_carries_its_lending_token() {
    let (node, _wallet, _market) = setup();
    node.connect().await.unwrap();

    let mut params = valid_lender_params();
    params.lending_token = ERC20;
    node.create_lender_listing(params).await.unwrap();

    let listings = node.lender_listings();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].lending_token, ERC20);
}

#[tokio::test]
async fn borrower_collateral_approval_precedes_the_listing_call() {
    let (node, _wallet, market) = setup();
    let mut params = valid_borrower_params();
    params.collateral_token = ERC20;
    params.collateral_amount = "0.5".into();

    node.create_borrower_listing(params).await.unwrap();

    let calls = market.calls();
    // The collateral allowance must be confirmed before the listing is
    // submitted.
    match &calls[0] {
        CallRecord::Approve {
            token,
            spender,
            amount,
        } => {
            assert_eq!(*token, ERC20);
            assert_eq!(*spender, MOCK_MARKETPLACE_ADDRESS);
            assert_eq!(*amount, U256::from(500_000_000_000_000_000u64));
        }
        other => panic!("expected an approve, got {other:?}"),
    }
    assert!(matches!(calls[1], CallRecord::Confirmed(_)));
    assert_eq!(calls[2], CallRecord::CreateBorrowerListing);
}

#[tokio::test]
async fn native_collateral_listing_skips_approval() {
    let (node, _wallet, market) = setup();
    let mut params = valid_borrower_params();
    params.collateral_token = Address::ZERO;

    node.create_borrower_listing(params).await.unwrap();

    assert!(
        !market
            .calls()
            .iter()
            .any(|c| matches!(c, CallRecord::Approve { .. }))
    );
}

#[tokio::test]
async fn repay_erc20_loan_approves_the_marketplace_first() {
    let (node, _wallet, market) = setup();
    market.insert_loan(
        3,
        loan_data(OTHER_ACCOUNT, ACCOUNT, tokens(5), ERC20),
        active_status(tokens(6)),
    );
    node.ensure_initialized().await.unwrap();
    market.clear_calls();

    node.repay_loan(3, "1.5").await.unwrap();

    let calls = market.calls();
    // Fresh loan read decides the token route before anything is signed.
    assert_eq!(calls[0], CallRecord::Loan(3));
    match &calls[1] {
        CallRecord::Approve {
            token,
            spender,
            amount,
        } => {
            assert_eq!(*token, ERC20);
            assert_eq!(*spender, MOCK_MARKETPLACE_ADDRESS);
            assert_eq!(*amount, U256::from(1_500_000_000_000_000_000u64));
        }
        other => panic!("expected an approve, got {other:?}"),
    }
    assert!(matches!(calls[2], CallRecord::Confirmed(_)));
    assert_eq!(
        calls[3],
        CallRecord::RepayLoan {
            id: 3,
            value: U256::ZERO
        }
    );
}

#[tokio::test]
async fn repay_native_loan_attaches_value_instead_of_approving() {
    let (node, _wallet, market) = setup();
    market.insert_loan(
        0,
        loan_data(OTHER_ACCOUNT, ACCOUNT, tokens(5), Address::ZERO),
        active_status(tokens(6)),
    );

    node.repay_loan(0, "2").await.unwrap();

    let calls = market.calls();
    assert!(
        !calls
            .iter()
            .any(|c| matches!(c, CallRecord::Approve { .. }))
    );
    assert!(calls.contains(&CallRecord::RepayLoan {
        id: 0,
        value: tokens(2),
    }));
}

#[tokio::test]
async fn repay_of_an_unknown_loan_fails_before_signing() {
    let (node, _wallet, market) = setup();

    match node.repay_loan(42, "1").await.unwrap_err() {
        Error::LoanNotFound(42) => {}
        other => panic!("expected LoanNotFound, got {other}"),
    }
    assert!(
        !market
            .calls()
            .iter()
            .any(|c| matches!(c, CallRecord::RepayLoan { .. }))
    );
}

#[tokio::test]
async fn failed_repay_resumes_without_a_second_approval() {
    let (node, _wallet, market) = setup();
    market.insert_loan(
        1,
        loan_data(OTHER_ACCOUNT, ACCOUNT, tokens(5), ERC20),
        active_status(tokens(6)),
    );
    market.queue_write_failure(WriteCall::RepayLoan, CallError::rpc("nonce too low"));

    let progress = match node.repay_loan(1, "1").await.unwrap_err() {
        Error::Submit(e) => {
            assert_eq!(e.progress, SubmitProgress::ApprovalConfirmed);
            e.progress
        }
        other => panic!("expected a submit failure, got {other}"),
    };

    market.clear_calls();
    node.resume_repay_loan(1, "1", progress).await.unwrap();

    let calls = market.calls();
    assert!(
        !calls
            .iter()
            .any(|c| matches!(c, CallRecord::Approve { .. })),
        "retry must reuse the confirmed allowance: {calls:?}"
    );
    assert!(
        calls
            .iter()
            .any(|c| matches!(c, CallRecord::RepayLoan { .. }))
    );
}

#[tokio::test]
async fn grace_period_extends_from_the_fresh_deadline() {
    let (node, _wallet, market) = setup();
    market.insert_loan(
        2,
        loan_data(ACCOUNT, OTHER_ACCOUNT, tokens(5), Address::ZERO),
        active_status(tokens(6)),
    );
    let before = market.stored_loan(2).unwrap().0.grace_period_end;

    node.set_grace_period(2, 7).await.unwrap();

    let after = market.stored_loan(2).unwrap().0.grace_period_end;
    assert_eq!(after, before + U256::from(7 * 86_400u64));

    match node.set_grace_period(2, 0).await.unwrap_err() {
        Error::InvalidInput { field, .. } => assert_eq!(field, "addedDays"),
        other => panic!("expected invalid input, got {other}"),
    }
}

#[tokio::test]
async fn grace_period_on_an_unknown_loan_fails() {
    let (node, _wallet, _market) = setup();

    match node.set_grace_period(99, 7).await.unwrap_err() {
        Error::LoanNotFound(99) => {}
        other => panic!("expected LoanNotFound, got {other}"),
    }
}

#[tokio::test]
async fn liquidation_drops_the_loan_from_the_read_model() {
    let (node, _wallet, market) = setup();
    market.insert_loan(
        0,
        loan_data(ACCOUNT, OTHER_ACCOUNT, tokens(5), Address::ZERO),
        active_status(tokens(6)),
    );
    node.connect().await.unwrap();
    assert_eq!(node.loans().len(), 1);

    node.liquidate_loan(0).await.unwrap();

    assert!(node.loans().is_empty());
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validation_failures_never_touch_the_chain() {
    // Wallet has no account, so any pre-validation contract path would
    // surface as NotConnected instead of InvalidInput.
    let wallet = MockWallet::disconnected();
    let market = wallet.market();
    let node = PeerlendNode::new(
        Arc::new(wallet.clone()),
        ClientConfig::for_marketplace(MOCK_MARKETPLACE_ADDRESS),
    );

    let mut params = valid_lender_params();
    params.min_interest_rate_percent = "45".into();
    match node.create_lender_listing(params).await.unwrap_err() {
        Error::InvalidInput { field, .. } => assert_eq!(field, "minInterestRate"),
        other => panic!("expected invalid input, got {other}"),
    }

    let mut params = valid_borrower_params();
    params.duration_days = 0;
    match node.create_borrower_listing(params).await.unwrap_err() {
        Error::InvalidInput { field, .. } => assert_eq!(field, "duration"),
        other => panic!("expected invalid input, got {other}"),
    }

    assert!(market.calls().is_empty());
    assert_eq!(wallet.bind_count(), 0);

    // Valid input on the same node gets as far as the session and no
    // further.
    match node
        .create_lender_listing(valid_lender_params())
        .await
        .unwrap_err()
    {
        Error::Session(SessionError::NotConnected) => {}
        other => panic!("expected NotConnected, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Refresh and polling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn overlapping_refreshes_collapse_into_one_cycle() {
    let (node, _wallet, market) = setup();
    market.insert_lender_listing(0, lender_listing_data(ACCOUNT, tokens(10)));
    market.set_read_delay(Duration::from_millis(20));

    let (first, second) = tokio::join!(node.refresh_all(), node.refresh_all());
    first.unwrap();
    second.unwrap();

    // One cycle reads the metrics once per collection; a second concurrent
    // cycle would double that.
    let metrics_reads = market
        .calls()
        .iter()
        .filter(|c| matches!(c, CallRecord::MarketMetrics))
        .count();
    assert_eq!(metrics_reads, 3);
}

#[tokio::test]
async fn poll_tick_populates_the_read_model() {
    let (node, _wallet, market) = setup();
    market.insert_loan(
        0,
        loan_data(ACCOUNT, OTHER_ACCOUNT, tokens(5), Address::ZERO),
        active_status(tokens(6)),
    );

    let mut events = node.subscribe();
    let handle = node.start_polling();
    wait_for(&mut events, MarketEvent::LoansUpdated).await;

    assert_eq!(node.loans().len(), 1);
    handle.shutdown();
}

#[tokio::test]
async fn market_metrics_reports_live_totals() {
    let (node, _wallet, market) = setup();
    market.insert_lender_listing(0, lender_listing_data(ACCOUNT, tokens(10)));
    market.insert_lender_listing(1, lender_listing_data(OTHER_ACCOUNT, tokens(20)));
    market.insert_loan(
        0,
        loan_data(ACCOUNT, OTHER_ACCOUNT, tokens(3), Address::ZERO),
        active_status(tokens(3)),
    );

    let metrics = node.market_metrics().await.unwrap();
    assert_eq!(metrics.active_lender_listings, 2);
    assert_eq!(metrics.active_borrower_listings, 0);
    assert_eq!(metrics.active_loans, 1);
    assert_eq!(metrics.total_loan_volume.format(), "3");
}
