//! In-memory read model of the marketplace.
//!
//! Scans write here, the UI reads from here. Every write is stamped with
//! the generation issued when its scan started; a write whose stamp is not
//! newer than what the collection already holds is discarded, so a slow
//! stale scan can never overwrite fresher data. Subscribers learn about
//! applied changes over a broadcast channel.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::scan::{ScanResult, ScanTermination};
use crate::types::{BorrowerListing, LenderListing, Loan};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Read-model change notifications for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketEvent {
    LenderListingsUpdated,
    BorrowerListingsUpdated,
    LoansUpdated,
    SessionChanged,
}

/// One coherent view of everything the client knows.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub lender_listings: Vec<LenderListing>,
    pub borrower_listings: Vec<BorrowerListing>,
    pub loans: Vec<Loan>,
    pub is_connected: bool,
    pub is_initializing: bool,
    pub is_loading: bool,
    pub revision: u64,
}

#[derive(Debug)]
struct Collection<T> {
    records: Vec<T>,
    generation: u64,
    last_termination: Option<ScanTermination>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Collection {
            records: Vec::new(),
            generation: 0,
            last_termination: None,
        }
    }
}

impl<T> Collection<T> {
    /// Replace contents if `generation` is newer. Returns whether the
    /// write was applied.
    fn apply(&mut self, generation: u64, result: ScanResult<T>) -> bool {
        if generation <= self.generation {
            log::debug!(
                "discarding stale scan result (generation {generation} <= {})",
                self.generation
            );
            return false;
        }
        self.records = result.records;
        self.generation = generation;
        self.last_termination = Some(result.termination);
        true
    }
}

/// Generation-guarded store for scanned collections.
pub struct ReadModel {
    lender_listings: Mutex<Collection<LenderListing>>,
    borrower_listings: Mutex<Collection<BorrowerListing>>,
    loans: Mutex<Collection<Loan>>,
    generations: AtomicU64,
    /// Stamps at or below this are discarded unseen; raised when pending
    /// scans must not land (disconnect, shutdown).
    floor: AtomicU64,
    loading: AtomicU64,
    revision: AtomicU64,
    events: broadcast::Sender<MarketEvent>,
}

impl Default for ReadModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadModel {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        ReadModel {
            lender_listings: Mutex::default(),
            borrower_listings: Mutex::default(),
            loans: Mutex::default(),
            generations: AtomicU64::new(0),
            floor: AtomicU64::new(0),
            loading: AtomicU64::new(0),
            revision: AtomicU64::new(0),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    /// Stamp a scan that is about to start.
    pub fn begin_scan(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Discard every scan stamped before now, applied or not.
    pub fn invalidate_pending(&self) {
        let floor = self.begin_scan();
        self.floor.store(floor, Ordering::SeqCst);
        log::debug!("read model floor raised to generation {floor}");
    }

    pub fn apply_lender_listings(
        &self,
        generation: u64,
        result: ScanResult<LenderListing>,
    ) -> bool {
        let applied = self.apply_to(&self.lender_listings, generation, result);
        if applied {
            self.notify(MarketEvent::LenderListingsUpdated);
        }
        applied
    }

    pub fn apply_borrower_listings(
        &self,
        generation: u64,
        result: ScanResult<BorrowerListing>,
    ) -> bool {
        let applied = self.apply_to(&self.borrower_listings, generation, result);
        if applied {
            self.notify(MarketEvent::BorrowerListingsUpdated);
        }
        applied
    }

    pub fn apply_loans(&self, generation: u64, result: ScanResult<Loan>) -> bool {
        let applied = self.apply_to(&self.loans, generation, result);
        if applied {
            self.notify(MarketEvent::LoansUpdated);
        }
        applied
    }

    pub fn lender_listings(&self) -> Vec<LenderListing> {
        read_records(&self.lender_listings)
    }

    pub fn borrower_listings(&self) -> Vec<BorrowerListing> {
        read_records(&self.borrower_listings)
    }

    pub fn loans(&self) -> Vec<Loan> {
        read_records(&self.loans)
    }

    /// How the most recent applied loan scan terminated.
    pub fn last_loan_termination(&self) -> Option<ScanTermination> {
        self.loans.lock().ok().and_then(|c| c.last_termination)
    }

    /// Drop all records and refuse pending scan results. Used on wallet
    /// disconnect.
    pub fn clear(&self) {
        self.invalidate_pending();
        if let Ok(mut c) = self.lender_listings.lock() {
            *c = Collection::default();
        }
        if let Ok(mut c) = self.borrower_listings.lock() {
            *c = Collection::default();
        }
        if let Ok(mut c) = self.loans.lock() {
            *c = Collection::default();
        }
        self.bump_revision();
        self.notify(MarketEvent::LenderListingsUpdated);
        self.notify(MarketEvent::BorrowerListingsUpdated);
        self.notify(MarketEvent::LoansUpdated);
    }

    /// Mark a load in progress until the guard drops.
    pub fn begin_loading(&self) -> LoadGuard<'_> {
        self.loading.fetch_add(1, Ordering::SeqCst);
        LoadGuard { model: self }
    }

    /// Claim the loading flag only if no load is running. Full refresh
    /// cycles use this so overlapping cycles collapse into one.
    pub fn try_begin_loading(&self) -> Option<LoadGuard<'_>> {
        self.loading
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| LoadGuard { model: self })
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, is_connected: bool, is_initializing: bool) -> MarketSnapshot {
        MarketSnapshot {
            lender_listings: self.lender_listings(),
            borrower_listings: self.borrower_listings(),
            loans: self.loans(),
            is_connected,
            is_initializing,
            is_loading: self.is_loading(),
            revision: self.revision(),
        }
    }

    pub(crate) fn notify(&self, event: MarketEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn apply_to<T>(
        &self,
        slot: &Mutex<Collection<T>>,
        generation: u64,
        result: ScanResult<T>,
    ) -> bool {
        if generation <= self.floor.load(Ordering::SeqCst) {
            log::debug!("discarding scan result below floor (generation {generation})");
            return false;
        }
        let Ok(mut collection) = slot.lock() else {
            log::warn!("read model lock poisoned, dropping scan result");
            return false;
        };
        let applied = collection.apply(generation, result);
        drop(collection);
        if applied {
            self.bump_revision();
        }
        applied
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }
}

/// Decrements the load counter when dropped.
pub struct LoadGuard<'a> {
    model: &'a ReadModel,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.model.loading.fetch_sub(1, Ordering::SeqCst);
    }
}

fn read_records<T: Clone>(slot: &Mutex<Collection<T>>) -> Vec<T> {
    slot.lock().map(|c| c.records.clone()).unwrap_or_default()
}
