//! Cursor behaviour observed through full orchestrator runs.

mod harness;

use async_trait::async_trait;
use harness::*;
use showdown_ingest::Orchestrator;
use showdown_ingest_client::{ReplaySource, SourceError};
use showdown_ingest_core::{ChainStop, ReplayRecord, ReplaySummary, SearchWindow};
use showdown_ingest_storage::ReplayStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn walk_stops_at_window_start() {
    // Catalogue runs two hours back, the window is only one
    let service = Arc::new(SimulatedService::new(catalogue(24, WINDOW_END, 300), 4));
    let store = ReplayStore::open_in_memory().unwrap();

    let report = Orchestrator::with_store(test_config(), service.clone(), store)
        .await
        .unwrap()
        .run()
        .await
        .unwrap();

    let windows = service.searched_windows();
    assert!(windows.iter().all(|w| w.before >= WINDOW_START));
    assert!(windows.windows(2).all(|pair| pair[1].before < pair[0].before));
    assert_eq!(report.chain_stops, vec![(0, ChainStop::ReachedStart)]);
    // Three pages inside the window, the fourth crosses start and ends the walk
    assert_eq!(report.pages_searched, 4);
    assert_eq!(windows.last().map(|w| w.before), Some(WINDOW_START));
}

/// Ignores the cursor and serves the same page forever.
struct StuckService {
    searches: AtomicUsize,
}

#[async_trait]
impl ReplaySource for StuckService {
    async fn search(&self, _window: &SearchWindow) -> Result<Vec<ReplaySummary>, SourceError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            summary(1, WINDOW_END - 10),
            summary(2, WINDOW_END - 20),
        ])
    }

    async fn fetch(&self, id: &str) -> Result<ReplayRecord, SourceError> {
        Ok(ReplayRecord {
            id: id.to_string(),
            format: FORMAT.to_string(),
            players: vec!["p1".to_string(), "p2".to_string()],
            log: "|win|p1".to_string(),
            uploadtime: WINDOW_END - 10,
            rating: None,
        })
    }
}

#[tokio::test]
async fn non_advancing_page_terminates_chain() {
    let service = Arc::new(StuckService {
        searches: AtomicUsize::new(0),
    });
    let store = ReplayStore::open_in_memory().unwrap();

    let report = Orchestrator::with_store(test_config(), service.clone(), store.clone())
        .await
        .unwrap()
        .run()
        .await
        .unwrap();

    // One step to learn the cursor, one more to see it stall
    assert_eq!(service.searches.load(Ordering::SeqCst), 2);
    assert_eq!(report.chain_stops, vec![(0, ChainStop::Stalled)]);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn private_replays_are_not_fetched() {
    let mut entries = catalogue(4, WINDOW_END, 600);
    entries[1].private = true;
    entries[2].password = true;
    let hidden = [entries[1].id.clone(), entries[2].id.clone()];

    let service = Arc::new(SimulatedService::new(entries, 10));
    let store = ReplayStore::open_in_memory().unwrap();

    let report = Orchestrator::with_store(test_config(), service.clone(), store.clone())
        .await
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.skipped_ineligible, 2);
    assert_eq!(store.count().await.unwrap(), 2);
    for id in &hidden {
        assert_eq!(service.fetch_calls(id), 0);
    }
}

#[tokio::test]
async fn parallel_chains_cover_the_window_once() {
    let service = Arc::new(SimulatedService::new(catalogue(12, WINDOW_END, 290), 2));
    let store = ReplayStore::open_in_memory().unwrap();
    let mut config = test_config();
    config.search.chains = 2;

    let report = Orchestrator::with_store(config, service.clone(), store.clone())
        .await
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(store.count().await.unwrap(), 12);
    assert_eq!(report.rows_inserted, 12);
    assert_eq!(report.chain_stops.len(), 2);

    // Each chain's cursor strictly decreases on its own
    let windows = service.searched_windows();
    for chain in 0..2 {
        let befores: Vec<i64> = windows
            .iter()
            .filter(|w| w.chain == chain)
            .map(|w| w.before)
            .collect();
        assert!(!befores.is_empty());
        assert!(befores.windows(2).all(|pair| pair[1] < pair[0]));
    }
}

#[tokio::test]
async fn warmup_defers_fetching_without_losing_work() {
    let service = Arc::new(SimulatedService::new(catalogue(6, WINDOW_END, 500), 2));
    let store = ReplayStore::open_in_memory().unwrap();
    let mut config = test_config();
    config.fetch.warmup_pages = 100;

    let report = Orchestrator::with_store(config, service, store.clone())
        .await
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.fetched, 6);
    assert_eq!(store.count().await.unwrap(), 6);
}
