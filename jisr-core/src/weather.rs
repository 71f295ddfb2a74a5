//! Weather status for the point of interest.
//!
//! [`WeatherStatusManager`] owns the published [`WeatherStatus`]. Callers
//! ask for a snapshot with [`WeatherStatusManager::request_snapshot`];
//! presentation code watches [`WeatherStatusManager::status`].
//!
//! At most one request is in flight. Every request carries a sequence
//! number and a completion only replaces the published snapshot when its
//! sequence is newer than the one that produced it.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    error::WeatherError,
    geo::Coordinate,
    model::{WeatherSnapshot, WeatherStatus},
    provider::WeatherProvider,
};

pub type FetchOutcome = Result<WeatherSnapshot, WeatherError>;

/// What to do with a request issued while another is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InFlightPolicy {
    /// Join the pending request for the same coordinate; reject others with `Busy`.
    #[default]
    Coalesce,
    /// Reject with `Busy`.
    Reject,
}

/// Proof that a fetch was issued. Consumed by [`WeatherStatusManager::complete`].
#[derive(Debug, PartialEq, Eq)]
pub struct FetchTicket {
    seq: u64,
}

impl FetchTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// What [`WeatherStatusManager::complete`] did with an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A new snapshot was published.
    Applied,
    /// The error was recorded; the previous snapshot stays.
    Recorded,
    /// A newer snapshot already exists; nothing was published.
    Stale,
    /// The ticket was already completed.
    Unknown,
}

#[derive(Debug)]
struct Pending {
    seq: u64,
    coordinate: Coordinate,
    done: watch::Receiver<Option<FetchOutcome>>,
}

#[derive(Debug, Default)]
struct Ledger {
    issued: u64,
    applied: u64,
    outstanding: BTreeSet<u64>,
    pending: Option<Pending>,
}

#[derive(Debug)]
struct Inner {
    provider: Arc<dyn WeatherProvider>,
    policy: InFlightPolicy,
    ledger: Mutex<Ledger>,
    status: watch::Sender<WeatherStatus>,
}

/// Fetches and classifies current weather, publishing the result.
///
/// Cloning is cheap; clones share state.
#[derive(Debug, Clone)]
pub struct WeatherStatusManager {
    inner: Arc<Inner>,
}

impl WeatherStatusManager {
    pub fn new(provider: Arc<dyn WeatherProvider>, policy: InFlightPolicy) -> Self {
        let (status, _) = watch::channel(WeatherStatus::default());
        Self {
            inner: Arc::new(Inner {
                provider,
                policy,
                ledger: Mutex::new(Ledger::default()),
                status,
            }),
        }
    }

    /// Read-only view of the published status.
    pub fn status(&self) -> watch::Receiver<WeatherStatus> {
        self.inner.status.subscribe()
    }

    pub fn current(&self) -> WeatherStatus {
        self.inner.status.borrow().clone()
    }

    pub fn policy(&self) -> InFlightPolicy {
        self.inner.policy
    }

    /// Fetch, classify and publish the current weather at `coordinate`.
    ///
    /// Resolves once the remote call does. Failures are also recorded in the
    /// published status; the previous snapshot is kept.
    ///
    /// The result is this fetch's own outcome, shared by every caller that
    /// joined it. If a newer snapshot was published through
    /// [`complete`](Self::complete) first, the fetched snapshot is still
    /// returned but is not published; read [`current`](Self::current) for
    /// what is on display.
    pub async fn request_snapshot(&self, coordinate: Coordinate) -> FetchOutcome {
        let mut done = self.join_or_start(coordinate)?;

        let outcome = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| WeatherError::Network("weather fetch stopped before completing".into()))?
            .clone();

        outcome.unwrap_or_else(|| {
            Err(WeatherError::Network("weather fetch finished without a result".into()))
        })
    }

    fn join_or_start(
        &self,
        coordinate: Coordinate,
    ) -> Result<watch::Receiver<Option<FetchOutcome>>, WeatherError> {
        let mut ledger = self.inner.ledger.lock();

        if let Some(pending) = &ledger.pending {
            return match self.inner.policy {
                InFlightPolicy::Coalesce if pending.coordinate == coordinate => {
                    debug!(seq = pending.seq, "joining in-flight weather request");
                    Ok(pending.done.clone())
                }
                _ => {
                    debug!(seq = pending.seq, "rejecting weather request: another is in flight");
                    Err(WeatherError::Busy)
                }
            };
        }

        let ticket = self.inner.begin_locked(&mut ledger);
        let (tx, rx) = watch::channel(None);
        ledger.pending = Some(Pending {
            seq: ticket.seq,
            coordinate,
            done: rx.clone(),
        });
        drop(ledger);

        // Detached: joined callers still get a result if the starter is dropped.
        let guard = FetchGuard {
            inner: Arc::clone(&self.inner),
            ticket: Some(ticket),
            done: tx,
            outcome: None,
        };
        tokio::spawn(async move {
            let mut guard = guard;
            let outcome = guard
                .inner
                .provider
                .current_conditions(coordinate)
                .await
                .map(WeatherSnapshot::from_conditions);
            guard.outcome = Some(outcome);
        });

        Ok(rx)
    }

    /// Issue a ticket for a fetch performed elsewhere, marking the status as loading.
    ///
    /// Pair with [`complete`](Self::complete). This path bypasses the
    /// in-flight policy; ordering is still enforced at completion.
    pub fn begin(&self) -> FetchTicket {
        let mut ledger = self.inner.ledger.lock();
        self.inner.begin_locked(&mut ledger)
    }

    /// Apply the outcome of a fetch, unless a newer snapshot is already published.
    pub fn complete(&self, ticket: FetchTicket, outcome: FetchOutcome) -> Completion {
        self.inner.complete(ticket, outcome)
    }
}

/// Completes a spawned fetch when its task ends, including by panic or
/// runtime shutdown, so the ledger never keeps a dead pending request.
struct FetchGuard {
    inner: Arc<Inner>,
    ticket: Option<FetchTicket>,
    done: watch::Sender<Option<FetchOutcome>>,
    outcome: Option<FetchOutcome>,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        let outcome = self.outcome.take().unwrap_or_else(|| {
            warn!(seq = ticket.seq, "weather fetch task ended without a result");
            Err(WeatherError::Network("weather fetch stopped before completing".into()))
        });
        self.inner.complete(ticket, outcome.clone());
        let _ = self.done.send(Some(outcome));
    }
}

impl Inner {
    fn begin_locked(&self, ledger: &mut Ledger) -> FetchTicket {
        ledger.issued += 1;
        let seq = ledger.issued;
        ledger.outstanding.insert(seq);
        debug!(seq, "weather request issued");

        self.status.send_if_modified(|status| {
            let changed = !status.loading;
            status.loading = true;
            changed
        });

        FetchTicket { seq }
    }

    fn complete(&self, ticket: FetchTicket, outcome: FetchOutcome) -> Completion {
        let mut ledger = self.ledger.lock();
        let seq = ticket.seq;

        if !ledger.outstanding.remove(&seq) {
            debug!(seq, "ignoring completion for unknown weather ticket");
            return Completion::Unknown;
        }
        if ledger.pending.as_ref().is_some_and(|p| p.seq == seq) {
            ledger.pending = None;
        }

        let fresh = seq > ledger.applied;
        let completion = match (&outcome, fresh) {
            (Ok(_), true) => {
                ledger.applied = seq;
                Completion::Applied
            }
            (Err(_), true) => Completion::Recorded,
            (_, false) => Completion::Stale,
        };
        let loading = !ledger.outstanding.is_empty();

        // Published while the ledger is held so publication order matches
        // ledger order.
        self.status.send_modify(|status| {
            status.loading = loading;
            match (completion, outcome) {
                (Completion::Applied, Ok(snapshot)) => {
                    info!(
                        seq,
                        temperature = snapshot.temperature_celsius,
                        code = snapshot.weather_code,
                        condition = ?snapshot.condition,
                        "weather snapshot applied"
                    );
                    status.snapshot = Some(snapshot);
                    status.last_error = None;
                }
                (Completion::Recorded, Err(err)) => {
                    warn!(seq, error = %err, "weather fetch failed; keeping previous snapshot");
                    status.last_error = Some(err.user_message().to_string());
                }
                _ => {
                    debug!(seq, applied = ledger.applied, "discarding stale weather response");
                }
            }
        });

        completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Condition, CurrentConditions};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const TAIF: Coordinate = Coordinate::new(21.0722, 40.353);
    const RIYADH: Coordinate = Coordinate::new(24.7136, 46.6753);

    /// Provider whose replies are queued up front and released on demand.
    #[derive(Debug, Default)]
    struct ScriptedProvider {
        calls: AtomicUsize,
        release: Notify,
        gated: bool,
        replies: parking_lot::Mutex<VecDeque<Result<CurrentConditions, WeatherError>>>,
    }

    impl ScriptedProvider {
        fn immediate(replies: Vec<Result<CurrentConditions, WeatherError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: parking_lot::Mutex::new(replies.into()),
                ..Default::default()
            })
        }

        fn gated(replies: Vec<Result<CurrentConditions, WeatherError>>) -> Arc<Self> {
            Arc::new(Self {
                gated: true,
                replies: parking_lot::Mutex::new(replies.into()),
                ..Default::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WeatherProvider for ScriptedProvider {
        async fn current_conditions(
            &self,
            _coordinate: Coordinate,
        ) -> Result<CurrentConditions, WeatherError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.gated {
                self.release.notified().await;
            }
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(WeatherError::Network("no scripted reply".into())))
        }
    }

    fn reading(temperature_celsius: f64, weather_code: i64) -> CurrentConditions {
        CurrentConditions { temperature_celsius, weather_code }
    }

    fn snapshot(temperature_celsius: f64, weather_code: i64) -> WeatherSnapshot {
        WeatherSnapshot::from_conditions(reading(temperature_celsius, weather_code))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn successful_fetch_publishes_snapshot() {
        let provider = ScriptedProvider::immediate(vec![Ok(reading(30.0, 0))]);
        let manager = WeatherStatusManager::new(provider.clone(), InFlightPolicy::Coalesce);
        let status = manager.status();

        let result = manager.request_snapshot(TAIF).await.unwrap();
        assert_eq!(result.condition, Condition::Clear);
        assert_eq!(result.icon_token, "sun");

        let published = status.borrow().clone();
        assert_eq!(published.snapshot, Some(result));
        assert!(!published.loading);
        assert_eq!(published.last_error, None);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn failure_keeps_previous_snapshot_and_records_error() {
        let provider = ScriptedProvider::immediate(vec![
            Ok(reading(10.0, 80)),
            Err(WeatherError::Network("connection refused".into())),
        ]);
        let manager = WeatherStatusManager::new(provider, InFlightPolicy::Coalesce);

        let first = manager.request_snapshot(TAIF).await.unwrap();
        assert_eq!(first.condition, Condition::FoggyOrRainy);

        let err = manager.request_snapshot(TAIF).await.unwrap_err();
        assert!(matches!(err, WeatherError::Network(_)));

        let status = manager.current();
        assert_eq!(status.snapshot, Some(first));
        assert!(!status.loading);
        assert_eq!(
            status.last_error.as_deref(),
            Some(WeatherError::Network(String::new()).user_message())
        );
    }

    #[tokio::test]
    async fn success_clears_previous_error() {
        let provider = ScriptedProvider::immediate(vec![
            Err(WeatherError::Decode("bad".into())),
            Ok(reading(20.0, 1)),
        ]);
        let manager = WeatherStatusManager::new(provider, InFlightPolicy::Coalesce);

        assert!(manager.request_snapshot(TAIF).await.is_err());
        assert!(manager.current().last_error.is_some());
        assert!(manager.current().snapshot.is_none());

        manager.request_snapshot(TAIF).await.unwrap();
        let status = manager.current();
        assert_eq!(status.last_error, None);
        assert_eq!(status.snapshot, Some(snapshot(20.0, 1)));
    }

    #[tokio::test]
    async fn concurrent_requests_for_same_coordinate_are_coalesced() {
        let provider = ScriptedProvider::gated(vec![Ok(reading(12.0, 2))]);
        let manager = WeatherStatusManager::new(provider.clone(), InFlightPolicy::Coalesce);

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.request_snapshot(TAIF).await }
        });
        settle().await;
        assert_eq!(provider.calls(), 1);
        assert!(manager.current().loading);

        let second = tokio::spawn({
            let manager = manager.clone();
            async move { manager.request_snapshot(TAIF).await }
        });
        settle().await;

        provider.release.notify_one();

        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.condition, Condition::Cold);
        assert_eq!(provider.calls(), 1);
        assert!(!manager.current().loading);
    }

    #[tokio::test]
    async fn coalesce_rejects_a_different_coordinate() {
        let provider = ScriptedProvider::gated(vec![Ok(reading(12.0, 2))]);
        let manager = WeatherStatusManager::new(provider.clone(), InFlightPolicy::Coalesce);

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.request_snapshot(TAIF).await }
        });
        settle().await;

        let err = manager.request_snapshot(RIYADH).await.unwrap_err();
        assert_eq!(err, WeatherError::Busy);

        provider.release.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn reject_policy_returns_busy_while_pending() {
        let provider = ScriptedProvider::gated(vec![Ok(reading(22.0, 0)), Ok(reading(28.0, 0))]);
        let manager = WeatherStatusManager::new(provider.clone(), InFlightPolicy::Reject);

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.request_snapshot(TAIF).await }
        });
        settle().await;

        assert_eq!(manager.request_snapshot(TAIF).await.unwrap_err(), WeatherError::Busy);

        provider.release.notify_one();
        assert_eq!(first.await.unwrap().unwrap().condition, Condition::Mild);

        // Once the first completes, a new request goes through.
        let second = tokio::spawn({
            let manager = manager.clone();
            async move { manager.request_snapshot(TAIF).await }
        });
        settle().await;
        provider.release.notify_one();
        assert_eq!(second.await.unwrap().unwrap().condition, Condition::Clear);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn dropped_caller_does_not_cancel_joined_request() {
        let provider = ScriptedProvider::gated(vec![Ok(reading(18.0, 0))]);
        let manager = WeatherStatusManager::new(provider.clone(), InFlightPolicy::Coalesce);

        let leader = tokio::spawn({
            let manager = manager.clone();
            async move { manager.request_snapshot(TAIF).await }
        });
        settle().await;
        let follower = tokio::spawn({
            let manager = manager.clone();
            async move { manager.request_snapshot(TAIF).await }
        });
        settle().await;

        leader.abort();
        settle().await;
        provider.release.notify_one();

        assert_eq!(follower.await.unwrap().unwrap(), snapshot(18.0, 0));
        assert_eq!(manager.current().snapshot, Some(snapshot(18.0, 0)));
    }

    #[derive(Debug)]
    struct PanickingProvider;

    #[async_trait]
    impl WeatherProvider for PanickingProvider {
        async fn current_conditions(
            &self,
            _coordinate: Coordinate,
        ) -> Result<CurrentConditions, WeatherError> {
            panic!("provider blew up");
        }
    }

    #[tokio::test]
    async fn panicking_provider_does_not_leave_request_pending() {
        let manager = WeatherStatusManager::new(Arc::new(PanickingProvider), InFlightPolicy::Reject);

        for _ in 0..2 {
            let err = manager.request_snapshot(TAIF).await.unwrap_err();
            assert!(matches!(err, WeatherError::Network(_)), "got {err:?}");

            let status = manager.current();
            assert!(!status.loading);
            assert!(status.last_error.is_some());
        }
    }

    #[test]
    fn runtime_shutdown_mid_fetch_releases_the_pending_request() {
        let provider = ScriptedProvider::gated(vec![Ok(reading(26.0, 0))]);
        let manager = WeatherStatusManager::new(provider.clone(), InFlightPolicy::Reject);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            tokio::spawn({
                let manager = manager.clone();
                async move { manager.request_snapshot(TAIF).await }
            });
            settle().await;
            assert!(manager.current().loading);
        });
        drop(runtime);

        let status = manager.current();
        assert!(!status.loading);
        assert!(status.last_error.is_some());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(async {
            let next = tokio::spawn({
                let manager = manager.clone();
                async move { manager.request_snapshot(TAIF).await }
            });
            settle().await;
            provider.release.notify_one();
            next.await.unwrap()
        });
        assert_eq!(result.unwrap().condition, Condition::Clear);
        assert_eq!(manager.current().snapshot, Some(snapshot(26.0, 0)));
    }

    #[tokio::test]
    async fn superseded_fetch_returns_its_snapshot_without_publishing() {
        let provider = ScriptedProvider::gated(vec![Ok(reading(12.0, 0))]);
        let manager = WeatherStatusManager::new(provider.clone(), InFlightPolicy::Coalesce);

        let fetch = tokio::spawn({
            let manager = manager.clone();
            async move { manager.request_snapshot(TAIF).await }
        });
        settle().await;

        let newer = manager.begin();
        assert_eq!(manager.complete(newer, Ok(snapshot(30.0, 0))), Completion::Applied);

        provider.release.notify_one();
        assert_eq!(fetch.await.unwrap().unwrap(), snapshot(12.0, 0));
        assert_eq!(manager.current().snapshot, Some(snapshot(30.0, 0)));
        assert!(!manager.current().loading);
    }

    #[test]
    fn late_response_from_older_request_is_discarded() {
        let manager = WeatherStatusManager::new(
            ScriptedProvider::immediate(vec![]),
            InFlightPolicy::Coalesce,
        );

        let first = manager.begin();
        let second = manager.begin();
        assert!(first.seq() < second.seq());
        assert!(manager.current().loading);

        assert_eq!(manager.complete(second, Ok(snapshot(30.0, 0))), Completion::Applied);
        assert!(manager.current().loading);
        assert_eq!(manager.complete(first, Ok(snapshot(5.0, 0))), Completion::Stale);

        let status = manager.current();
        assert_eq!(status.snapshot, Some(snapshot(30.0, 0)));
        assert!(!status.loading);
    }

    #[test]
    fn older_response_applies_when_it_arrives_first() {
        let manager = WeatherStatusManager::new(
            ScriptedProvider::immediate(vec![]),
            InFlightPolicy::Coalesce,
        );

        let first = manager.begin();
        let second = manager.begin();

        assert_eq!(manager.complete(first, Ok(snapshot(5.0, 0))), Completion::Applied);
        assert_eq!(manager.current().snapshot, Some(snapshot(5.0, 0)));
        assert_eq!(manager.complete(second, Ok(snapshot(30.0, 0))), Completion::Applied);
        assert_eq!(manager.current().snapshot, Some(snapshot(30.0, 0)));
    }

    #[test]
    fn stale_error_is_not_recorded() {
        let manager = WeatherStatusManager::new(
            ScriptedProvider::immediate(vec![]),
            InFlightPolicy::Coalesce,
        );

        let first = manager.begin();
        let second = manager.begin();
        manager.complete(second, Ok(snapshot(20.0, 0)));
        assert_eq!(
            manager.complete(first, Err(WeatherError::Network("late".into()))),
            Completion::Stale
        );
        assert_eq!(manager.current().last_error, None);
    }

    #[test]
    fn failed_newer_request_does_not_block_older_success() {
        let manager = WeatherStatusManager::new(
            ScriptedProvider::immediate(vec![]),
            InFlightPolicy::Coalesce,
        );

        let first = manager.begin();
        let second = manager.begin();
        assert_eq!(
            manager.complete(second, Err(WeatherError::Decode("bad".into()))),
            Completion::Recorded
        );
        assert_eq!(manager.complete(first, Ok(snapshot(20.0, 0))), Completion::Applied);
        assert_eq!(manager.current().snapshot, Some(snapshot(20.0, 0)));
    }
}
