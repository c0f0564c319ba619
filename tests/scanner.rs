use alloy_primitives::{Address, U256};
use peerlend_sdk::contract::MarketMetricsData;
use peerlend_sdk::testing::{
    CallRecord, MockMarketplace, ReadCall, active_status, borrower_listing_data,
    lender_listing_data, loan_data,
};
use peerlend_sdk::{CallError, ScanConfig, ScanStrategy, ScanTermination, Scanner};

fn scanner(strategy: ScanStrategy) -> Scanner {
    let config = ScanConfig {
        strategy,
        empty_run_threshold: 3,
    };
    Scanner::new(config, 18)
}

fn tokens(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

// ---------------------------------------------------------------------------
// Empty-run termination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_run_collects_until_three_consecutive_misses() {
    let market = MockMarketplace::new();
    market.insert_lender_listing(0, lender_listing_data(Address::repeat_byte(0x01), tokens(10)));
    market.insert_lender_listing(1, lender_listing_data(Address::repeat_byte(0x02), tokens(20)));

    let result = scanner(ScanStrategy::EmptyRun)
        .scan_lender_listings(&market)
        .await;

    let ids: Vec<u64> = result.records.iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert_eq!(result.termination, ScanTermination::Exhausted);

    // Two hits, then exactly three empty probes before giving up.
    assert_eq!(market.lender_probe_ids(), vec![0, 1, 2, 3, 4]);
    assert_eq!(result.stats.probed, 5);
    assert_eq!(result.stats.active, 2);
    assert_eq!(result.stats.empty, 3);
}

#[tokio::test]
async fn errors_spend_the_termination_run() {
    let market = MockMarketplace::new();
    market.insert_lender_listing(0, lender_listing_data(Address::repeat_byte(0x01), tokens(10)));
    for id in 1..=3 {
        market.set_read_failure(ReadCall::LenderListing(id), CallError::rpc("eth_call failed"));
    }

    let result = scanner(ScanStrategy::EmptyRun)
        .scan_lender_listings(&market)
        .await;

    assert_eq!(result.records.len(), 1);
    assert_eq!(result.termination, ScanTermination::ErrorExhausted);
    assert_eq!(market.lender_probe_ids(), vec![0, 1, 2, 3]);
    assert_eq!(result.stats.errors, 3);
}

#[tokio::test]
async fn consecutive_inactive_records_end_the_scan() {
    let market = MockMarketplace::new();
    market.insert_lender_listing(0, lender_listing_data(Address::repeat_byte(0x01), tokens(10)));
    for id in 1..=3 {
        let mut retired = lender_listing_data(Address::repeat_byte(0x02), tokens(20));
        retired.is_active = false;
        market.insert_lender_listing(id, retired);
    }

    let result = scanner(ScanStrategy::EmptyRun)
        .scan_lender_listings(&market)
        .await;

    // Retired records are skipped and spend the miss run like empties, so
    // three in a row terminate without probing further.
    let ids: Vec<u64> = result.records.iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![0]);
    assert_eq!(market.lender_probe_ids(), vec![0, 1, 2, 3]);
    assert_eq!(result.termination, ScanTermination::Exhausted);
    assert_eq!(result.stats.inactive, 3);
}

#[tokio::test]
async fn active_record_after_an_inactive_gap_is_still_collected() {
    let market = MockMarketplace::new();
    for id in 0..3 {
        market.insert_lender_listing(
            id,
            lender_listing_data(Address::repeat_byte(0x01), tokens(10)),
        );
    }
    let mut retired = lender_listing_data(Address::repeat_byte(0x02), tokens(20));
    retired.is_active = false;
    market.insert_lender_listing(3, retired);
    market.insert_lender_listing(4, lender_listing_data(Address::repeat_byte(0x03), tokens(30)));

    let result = scanner(ScanStrategy::EmptyRun)
        .scan_lender_listings(&market)
        .await;

    // The retired id at 3 opens a miss run, but the hit at 4 clears it;
    // only the genuine empties at 5, 6, and 7 terminate the scan.
    let ids: Vec<u64> = result.records.iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 4]);
    assert_eq!(market.lender_probe_ids(), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(result.termination, ScanTermination::Exhausted);
}

#[tokio::test]
async fn no_data_ends_the_range_immediately() {
    let market = MockMarketplace::new();
    market.insert_lender_listing(0, lender_listing_data(Address::repeat_byte(0x01), tokens(10)));
    market.insert_lender_listing(1, lender_listing_data(Address::repeat_byte(0x02), tokens(20)));
    market.set_read_failure(ReadCall::LenderListing(2), CallError::NoData);

    let result = scanner(ScanStrategy::EmptyRun)
        .scan_lender_listings(&market)
        .await;

    // No three-miss run needed after a definitive end-of-range signal.
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.termination, ScanTermination::Exhausted);
    assert_eq!(market.lender_probe_ids(), vec![0, 1, 2]);
}

// ---------------------------------------------------------------------------
// Count-oracle termination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn count_bound_stops_without_tail_probes() {
    let market = MockMarketplace::new();
    for id in 0..3 {
        market.insert_lender_listing(
            id,
            lender_listing_data(Address::repeat_byte(0x01), tokens(10)),
        );
    }

    let result = scanner(ScanStrategy::CountOracle)
        .scan_lender_listings(&market)
        .await;

    assert_eq!(result.records.len(), 3);
    assert_eq!(result.termination, ScanTermination::CountReached);
    // The oracle said three, so id 3 is never probed.
    assert_eq!(market.lender_probe_ids(), vec![0, 1, 2]);
}

#[tokio::test]
async fn count_bound_scans_past_inactive_gaps() {
    let market = MockMarketplace::new();
    market.insert_lender_listing(0, lender_listing_data(Address::repeat_byte(0x01), tokens(10)));
    let mut retired = lender_listing_data(Address::repeat_byte(0x02), tokens(20));
    retired.is_active = false;
    market.insert_lender_listing(1, retired);
    market.insert_lender_listing(2, lender_listing_data(Address::repeat_byte(0x03), tokens(30)));

    let result = scanner(ScanStrategy::CountOracle)
        .scan_lender_listings(&market)
        .await;

    let ids: Vec<u64> = result.records.iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![0, 2]);
    assert_eq!(result.termination, ScanTermination::CountReached);
    assert_eq!(market.lender_probe_ids(), vec![0, 1, 2]);
}

#[tokio::test]
async fn zero_oracle_count_skips_probing_entirely() {
    let market = MockMarketplace::new();

    let result = scanner(ScanStrategy::CountOracle)
        .scan_lender_listings(&market)
        .await;

    assert!(result.records.is_empty());
    assert_eq!(result.termination, ScanTermination::CountReached);
    assert!(market.lender_probe_ids().is_empty());
}

#[tokio::test]
async fn overstated_oracle_count_hits_the_safety_net() {
    let market = MockMarketplace::new();
    market.insert_lender_listing(0, lender_listing_data(Address::repeat_byte(0x01), tokens(10)));
    market.set_metrics_override(MarketMetricsData {
        total_active_lender_listings: U256::from(5u64),
        total_active_borrower_listings: U256::ZERO,
        total_active_loans: U256::ZERO,
        total_loan_volume: U256::ZERO,
    });

    let result = scanner(ScanStrategy::CountOracle)
        .scan_lender_listings(&market)
        .await;

    // The oracle promised five but the chain holds one; the empty-run
    // backstop ends the scan instead of chasing the missing four.
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.termination, ScanTermination::Exhausted);
    assert_eq!(market.lender_probe_ids(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn metrics_failure_falls_back_to_empty_run() {
    let market = MockMarketplace::new();
    market.insert_lender_listing(0, lender_listing_data(Address::repeat_byte(0x01), tokens(10)));
    market.set_read_failure(ReadCall::MarketMetrics, CallError::rpc("node down"));

    let result = scanner(ScanStrategy::CountOracle)
        .scan_lender_listings(&market)
        .await;

    assert_eq!(result.records.len(), 1);
    assert_eq!(result.termination, ScanTermination::Exhausted);
    assert_eq!(market.lender_probe_ids(), vec![0, 1, 2, 3]);
}

// ---------------------------------------------------------------------------
// Borrower listing and loan scans
// ---------------------------------------------------------------------------

#[tokio::test]
async fn borrower_listings_share_the_scan_pipeline() {
    let market = MockMarketplace::new();
    market.insert_borrower_listing(
        0,
        borrower_listing_data(Address::repeat_byte(0x0A), tokens(7)),
    );
    market.insert_borrower_listing(
        1,
        borrower_listing_data(Address::repeat_byte(0x0B), tokens(9)),
    );

    let result = scanner(ScanStrategy::CountOracle)
        .scan_borrower_listings(&market)
        .await;

    assert_eq!(result.records.len(), 2);
    assert_eq!(result.termination, ScanTermination::CountReached);
    assert_eq!(result.records[1].amount.format(), "9");
    assert_eq!(result.records[1].duration_days, 14);
}

#[tokio::test]
async fn loan_scan_joins_record_and_status_in_probe_order() {
    let lender = Address::repeat_byte(0x01);
    let borrower = Address::repeat_byte(0x02);
    let market = MockMarketplace::new();

    let mut repaid = active_status(U256::ZERO);
    repaid.is_active = false;
    market.insert_loan(0, loan_data(lender, borrower, tokens(5), Address::ZERO), repaid);
    market.insert_loan(
        1,
        loan_data(lender, borrower, tokens(5), Address::ZERO),
        active_status(tokens(6)),
    );

    let result = scanner(ScanStrategy::CountOracle).scan_loans(&market).await;

    let ids: Vec<u64> = result.records.iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![1]);
    let loan = &result.records[0];
    assert_eq!(loan.total_owed.format(), "6");
    assert_eq!(loan.duration_days, 30);
    assert!(!loan.is_overdue);

    // Each id's status read lands before the next id is touched.
    assert_eq!(
        market.calls(),
        vec![
            CallRecord::MarketMetrics,
            CallRecord::Loan(0),
            CallRecord::LoanStatus(0),
            CallRecord::Loan(1),
            CallRecord::LoanStatus(1),
        ]
    );
}

#[tokio::test]
async fn status_read_failure_is_a_probe_error() {
    let market = MockMarketplace::new();
    market.insert_loan(
        0,
        loan_data(
            Address::repeat_byte(0x01),
            Address::repeat_byte(0x02),
            tokens(5),
            Address::ZERO,
        ),
        active_status(tokens(6)),
    );
    market.set_read_failure(ReadCall::LoanStatus(0), CallError::rpc("eth_call failed"));

    let result = scanner(ScanStrategy::EmptyRun).scan_loans(&market).await;

    assert!(result.records.is_empty());
    assert_eq!(result.termination, ScanTermination::ErrorExhausted);
    assert_eq!(result.stats.errors, 1);
    assert_eq!(result.stats.empty, 2);
}
