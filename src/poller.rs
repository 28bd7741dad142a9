use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::broadcaster::Broadcaster;
use crate::error::Result;
use crate::market_fetcher::{decode_events, OddsFeed};
use crate::market_scanner::MarketScanner;
use crate::shared_types::{EventId, EventRecord, EventSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Scanning,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub retry_backoff: Duration,
    pub lookback: chrono::Duration,
    pub lookahead: chrono::Duration,
    pub concurrency: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(5),
            lookback: chrono::Duration::hours(4),
            lookahead: chrono::Duration::hours(24),
            concurrency: 4,
        }
    }
}

/// Latest snapshot per event. Each completed cycle replaces the contents.
#[derive(Clone, Default)]
pub struct SnapshotStore {
    inner: Arc<RwLock<HashMap<EventId, EventSnapshot>>>,
    listed: Arc<RwLock<HashSet<EventId>>>,
}

impl SnapshotStore {
    /// Records the ids the latest event listing returned, scanned or not.
    pub async fn set_listed(&self, ids: impl IntoIterator<Item = EventId>) {
        *self.listed.write().await = ids.into_iter().collect();
    }

    pub async fn is_listed(&self, event_id: EventId) -> bool {
        self.listed.read().await.contains(&event_id)
    }

    pub async fn get(&self, event_id: EventId) -> Option<EventSnapshot> {
        self.inner.read().await.get(&event_id).cloned()
    }

    pub async fn replace(&self, snapshots: &[EventSnapshot]) {
        let fresh = snapshots.iter().map(|s| (s.event_id, s.clone())).collect();
        *self.inner.write().await = fresh;
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub events_scanned: usize,
    pub events_failed: usize,
    pub opportunities: usize,
    pub delivered: usize,
}

/// Games that started a little while ago still carry in-play prices, so
/// the window reaches back as well as forward.
pub fn within_window(
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    lookback: chrono::Duration,
    lookahead: chrono::Duration,
) -> bool {
    start >= now - lookback && start <= now + lookahead
}

fn window_dates(
    now: DateTime<Utc>,
    lookback: chrono::Duration,
    lookahead: chrono::Duration,
) -> Vec<NaiveDate> {
    let first = (now - lookback).date_naive();
    let last = (now + lookahead).date_naive();
    first.iter_days().take_while(|d| *d <= last).collect()
}

/// Periodically scans every event in the time window and hands the batch
/// to the broadcaster.
pub struct EventPoller {
    feed: Arc<dyn OddsFeed>,
    scanner: Arc<MarketScanner>,
    broadcaster: Arc<Broadcaster>,
    store: SnapshotStore,
    config: PollerConfig,
    state: watch::Sender<PollerState>,
}

impl EventPoller {
    pub fn new(
        feed: Arc<dyn OddsFeed>,
        scanner: Arc<MarketScanner>,
        broadcaster: Arc<Broadcaster>,
        store: SnapshotStore,
        config: PollerConfig,
    ) -> Self {
        let (state, _) = watch::channel(PollerState::Idle);
        Self {
            feed,
            scanner,
            broadcaster,
            store,
            config,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    /// Events in the window, one per id, ordered by start time.
    pub async fn list_events(&self, now: DateTime<Utc>) -> Result<Vec<EventRecord>> {
        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for date in window_dates(now, self.config.lookback, self.config.lookahead) {
            let payload = self.feed.fetch_events(date).await?;
            for event in decode_events(payload)? {
                if within_window(event.start_time, now, self.config.lookback, self.config.lookahead)
                    && seen.insert(event.event_id)
                {
                    events.push(event);
                }
            }
        }
        events.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.event_id.cmp(&b.event_id)));
        Ok(events)
    }

    /// One Scanning pass. Fails only when the event listing itself fails;
    /// individual event failures are logged and left out of the batch.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let events = self.list_events(now).await?;
        debug!(events = events.len(), "scanning events in window");
        self.store.set_listed(events.iter().map(|e| e.event_id)).await;

        let scanner = &self.scanner;
        let mut results: Vec<(EventRecord, Result<EventSnapshot>)> = stream::iter(events)
            .map(|event| async move {
                let snapshot = scanner.scan_event(event.event_id).await;
                (event, snapshot)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        results.sort_by(|(a, _), (b, _)| {
            a.start_time
                .cmp(&b.start_time)
                .then(a.event_id.cmp(&b.event_id))
        });

        let mut report = CycleReport::default();
        let mut snapshots = Vec::with_capacity(results.len());
        for (event, result) in results {
            match result {
                Ok(snapshot) => {
                    report.events_scanned += 1;
                    report.opportunities += snapshot.opportunities.len();
                    snapshots.push(snapshot);
                }
                Err(e) => {
                    report.events_failed += 1;
                    warn!(
                        event_id = event.event_id,
                        event = %event.name,
                        error = %e,
                        "event scan failed"
                    );
                }
            }
        }

        self.store.replace(&snapshots).await;
        report.delivered = self.broadcaster.broadcast(&snapshots).await.delivered;
        Ok(report)
    }

    /// Idle -> Scanning -> Idle until `shutdown` flips. A failed cycle is
    /// retried after the short backoff instead of the full interval.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "poller started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.state.send_replace(PollerState::Scanning);
            let cycle = tokio::select! {
                result = self.run_cycle(Utc::now()) => Some(result),
                _ = shutdown.changed() => None,
            };
            self.state.send_replace(PollerState::Idle);

            let wait = match cycle {
                None => break,
                Some(Ok(report)) => {
                    info!(
                        scanned = report.events_scanned,
                        failed = report.events_failed,
                        opportunities = report.opportunities,
                        delivered = report.delivered,
                        "cycle complete"
                    );
                    self.config.interval
                }
                Some(Err(e)) => {
                    warn!(
                        error = %e,
                        retry_secs = self.config.retry_backoff.as_secs(),
                        "cycle aborted"
                    );
                    self.config.retry_backoff
                }
            };

            tokio::select! {
                _ = sleep(wait) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.broadcaster.close_all().await;
        info!("poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArbError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeFeed {
        events: Value,
        fail_listing: bool,
        listing_calls: AtomicUsize,
    }

    impl FakeFeed {
        fn new(events: Value) -> Self {
            Self {
                events,
                fail_listing: false,
                listing_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OddsFeed for FakeFeed {
        async fn fetch_events(&self, _date: NaiveDate) -> Result<Value> {
            self.listing_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_listing {
                return Err(ArbError::UpstreamUnavailable("connection refused".to_string()));
            }
            Ok(self.events.clone())
        }

        async fn fetch_markets(&self, event_id: EventId) -> Result<Value> {
            match event_id {
                1 => Ok(json!([{
                    "BettingMarketID": 10,
                    "BettingMarketType": "Total Points",
                    "AnyBetsAvailable": true,
                    "BettingOutcomes": [
                        quote("BookA", 102, "Over"),
                        quote("BookB", 100, "Under")
                    ]
                }])),
                2 => Ok(json!({ "unexpected": true })),
                _ => Ok(json!([])),
            }
        }
    }

    fn quote(book: &str, odds: i64, side: &str) -> Value {
        json!({
            "SportsBook": { "Name": book },
            "PayoutAmerican": odds,
            "BettingOutcomeType": side,
            "Value": 25.5,
            "IsAvailable": true
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap()
    }

    fn events() -> Value {
        json!([
            { "BettingEventID": 3, "Name": "later", "StartDate": "2024-01-15T23:00:00" },
            { "BettingEventID": 1, "Name": "live", "StartDate": "2024-01-15T19:00:00" },
            { "BettingEventID": 2, "Name": "broken", "StartDate": "2024-01-15T21:00:00" },
            { "BettingEventID": 4, "Name": "stale", "StartDate": "2024-01-14T08:00:00" },
            { "BettingEventID": 5, "Name": "far", "StartDate": "2024-01-20T08:00:00" }
        ])
    }

    fn poller(
        feed: FakeFeed,
        config: PollerConfig,
    ) -> (EventPoller, Arc<Broadcaster>, SnapshotStore) {
        let feed: Arc<dyn OddsFeed> = Arc::new(feed);
        let scanner = Arc::new(MarketScanner::new(feed.clone(), dec!(20)));
        let broadcaster = Arc::new(Broadcaster::new(8));
        let store = SnapshotStore::default();
        let poller = EventPoller::new(feed, scanner, broadcaster.clone(), store.clone(), config);
        (poller, broadcaster, store)
    }

    #[test]
    fn test_window_includes_started_games() {
        let lookback = chrono::Duration::hours(4);
        let lookahead = chrono::Duration::hours(24);
        let t = now();
        assert!(within_window(t - chrono::Duration::hours(1), t, lookback, lookahead));
        assert!(within_window(t + chrono::Duration::hours(23), t, lookback, lookahead));
        assert!(!within_window(t - chrono::Duration::hours(5), t, lookback, lookahead));
        assert!(!within_window(t + chrono::Duration::hours(25), t, lookback, lookahead));
    }

    #[test]
    fn test_window_dates_span_calendar_days() {
        let dates = window_dates(now(), chrono::Duration::hours(4), chrono::Duration::hours(24));
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 16).unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn test_list_events_filters_and_dedups() {
        let (poller, _, _) = poller(FakeFeed::new(events()), PollerConfig::default());
        let listed = poller.list_events(now()).await.unwrap();
        let ids: Vec<u64> = listed.iter().map(|e| e.event_id).collect();
        // listing is fetched once per day but each event appears once
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_cycle_skips_failed_event_and_broadcasts() {
        let (poller, broadcaster, store) = poller(FakeFeed::new(events()), PollerConfig::default());
        let mut sub = broadcaster.register().await;

        let report = poller.run_cycle(now()).await.unwrap();
        assert_eq!(report.events_scanned, 2);
        assert_eq!(report.events_failed, 1);
        assert_eq!(report.opportunities, 1);
        assert_eq!(report.delivered, 1);

        assert!(store.get(1).await.unwrap().has_arbitrage);
        assert!(!store.get(3).await.unwrap().has_arbitrage);
        assert!(store.get(2).await.is_none());
        assert!(store.is_listed(2).await);
        assert!(!store.is_listed(99).await);

        let batch: Value = serde_json::from_str(&sub.receiver.recv().await.unwrap()).unwrap();
        let ids: Vec<u64> = batch
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["event_id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(batch[0]["opportunities"][0]["stakes"]["over"]["sportsbook"], "BookA");
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_cycle() {
        let mut feed = FakeFeed::new(events());
        feed.fail_listing = true;
        let (poller, broadcaster, _) = poller(feed, PollerConfig::default());
        let mut sub = broadcaster.register().await;

        let result = poller.run_cycle(now()).await;
        assert!(matches!(result, Err(ArbError::UpstreamUnavailable(_))));
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_retries_after_backoff() {
        let mut feed = FakeFeed::new(events());
        feed.fail_listing = true;
        let feed = Arc::new(feed);
        let dyn_feed: Arc<dyn OddsFeed> = feed.clone();
        let config = PollerConfig {
            interval: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(5),
            ..PollerConfig::default()
        };
        let poller = EventPoller::new(
            dyn_feed.clone(),
            Arc::new(MarketScanner::new(dyn_feed, dec!(20))),
            Arc::new(Broadcaster::new(8)),
            SnapshotStore::default(),
            config,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(shutdown_rx));

        // three attempts fit in 12s with a 5s backoff, only one with a 30s interval
        sleep(Duration::from_secs(12)).await;
        assert_eq!(feed.listing_calls.load(Ordering::SeqCst), 3);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop_and_closes_subscribers() {
        let (poller, broadcaster, _) = poller(FakeFeed::new(events()), PollerConfig::default());
        let mut state = poller.state();
        let mut sub = broadcaster.register().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(shutdown_rx));

        // first cycle's batch arrives, then the loop idles
        assert!(sub.receiver.recv().await.is_some());
        state.wait_for(|s| *s == PollerState::Idle).await.unwrap();

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(sub.receiver.recv().await.is_none());
        assert_eq!(broadcaster.subscriber_count().await, 0);
    }
}
