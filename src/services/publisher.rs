//! Position stream publisher - replays a route as paced position events
//!
//! One `handle` call covers one route request end to end:
//! decode the payload, ask the route provider for the ordered position
//! events, then publish them one at a time with a fixed pause after each
//! publish. Events are published strictly in sequence order.

use crate::domain::route::{RouteError, RouteProvider};
use crate::domain::types::{DecodeError, PositionEvent, Route, RouteId};
use crate::infra::metrics::Metrics;
use crate::io::broker_client::{BrokerClient, PublishError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What to do when a position cannot be published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum FailurePolicy {
    /// Stop the stream and return the publish error
    #[serde(rename = "abort")]
    AbortOnFailure,
    /// Log the failure and move on to the next position
    #[default]
    #[serde(rename = "continue")]
    ContinueOnFailure,
}

/// Publisher settings fixed at construction
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub output_topic: String,
    /// Pause after every publish, successful or not
    pub pacing_interval: Duration,
    pub failure_policy: FailurePolicy,
    /// Extra attempts per position after a failed publish
    pub publish_retries: u32,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            output_topic: "route.new-position".to_string(),
            pacing_interval: Duration::from_millis(500),
            failure_policy: FailurePolicy::ContinueOnFailure,
            publish_retries: 0,
        }
    }
}

/// Terminal failure of a route stream
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to decode route request: {0}")]
    Decode(#[from] DecodeError),

    #[error("failed to export positions for route {route_id}: {source}")]
    Export {
        route_id: RouteId,
        #[source]
        source: RouteError,
    },

    /// Only returned under `FailurePolicy::AbortOnFailure`
    #[error("failed to publish position {seq} of route {route_id}: {source}")]
    Publish {
        route_id: RouteId,
        seq: usize,
        #[source]
        source: PublishError,
    },
}

/// Outcome of a stream that was not aborted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    pub route_id: RouteId,
    /// Events produced by the route provider
    pub total: usize,
    pub published: usize,
    pub failed: usize,
    /// Stopped early by the shutdown signal
    pub cancelled: bool,
}

/// Drives one route request at a time through decode, export and paced publish
///
/// Holds no per-route state, so one instance can serve concurrent calls.
pub struct PositionStreamPublisher {
    provider: Arc<dyn RouteProvider>,
    broker: Arc<dyn BrokerClient>,
    settings: PublisherSettings,
    metrics: Arc<Metrics>,
}

impl PositionStreamPublisher {
    pub fn new(
        provider: Arc<dyn RouteProvider>,
        broker: Arc<dyn BrokerClient>,
        settings: PublisherSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { provider, broker, settings, metrics }
    }

    /// Stream one route request to the output topic
    ///
    /// Decode and export failures return before anything is published.
    /// Setting `shutdown` to true stops the stream before the next publish,
    /// or abandons a publish that has not completed yet.
    pub async fn handle(
        &self,
        raw: &[u8],
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<StreamReport, StreamError> {
        self.metrics.record_route_received();

        let route = Route::from_json(raw).inspect_err(|_| self.metrics.record_decode_error())?;
        let events = self.export(&route).inspect_err(|_| self.metrics.record_export_error())?;

        let stream_id = Uuid::now_v7();
        info!(
            stream_id = %stream_id,
            route_id = %route.route_id,
            client_id = %route.client_id,
            positions = %events.len(),
            topic = %self.settings.output_topic,
            pacing_ms = %self.settings.pacing_interval.as_millis(),
            "route_stream_started"
        );

        self.metrics.record_stream_started();
        let started = Instant::now();
        let result = self.stream(&route, &events, &mut shutdown).await;

        match &result {
            Ok(report) => {
                self.metrics.record_stream_finished(report.cancelled);
                info!(
                    stream_id = %stream_id,
                    route_id = %route.route_id,
                    published = %report.published,
                    failed = %report.failed,
                    cancelled = %report.cancelled,
                    elapsed_ms = %started.elapsed().as_millis(),
                    "route_stream_finished"
                );
            }
            Err(e) => {
                self.metrics.record_stream_aborted();
                error!(stream_id = %stream_id, error = %e, "route_stream_aborted");
            }
        }

        result
    }

    fn export(&self, route: &Route) -> Result<Vec<PositionEvent>, StreamError> {
        let to_stream_error =
            |source| StreamError::Export { route_id: route.route_id.clone(), source };

        let positions = self.provider.load_positions(route).map_err(to_stream_error)?;
        self.provider.export_positions(route, &positions).map_err(to_stream_error)
    }

    async fn stream(
        &self,
        route: &Route,
        events: &[PositionEvent],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamReport, StreamError> {
        let mut report = StreamReport {
            route_id: route.route_id.clone(),
            total: events.len(),
            published: 0,
            failed: 0,
            cancelled: false,
        };

        for (seq, event) in events.iter().enumerate() {
            if *shutdown.borrow() {
                report.cancelled = true;
                break;
            }

            // A publish can stall on a full client queue; shutdown must still win
            let outcome = tokio::select! {
                result = self.publish_with_retry(seq, event) => result,
                _ = shutdown_requested(shutdown) => {
                    report.cancelled = true;
                    break;
                }
            };

            match outcome {
                Ok(()) => {
                    report.published += 1;
                    self.metrics.record_position_published();
                    debug!(route_id = %route.route_id, seq = %seq, finished = %event.finished, "position_published");
                }
                Err(e) => {
                    report.failed += 1;
                    self.metrics.record_publish_failure();
                    match self.settings.failure_policy {
                        FailurePolicy::AbortOnFailure => {
                            return Err(StreamError::Publish {
                                route_id: route.route_id.clone(),
                                seq,
                                source: e,
                            });
                        }
                        FailurePolicy::ContinueOnFailure => {
                            warn!(route_id = %route.route_id, seq = %seq, error = %e, "position_publish_failed");
                        }
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.pacing_interval) => {}
                _ = shutdown_requested(shutdown) => {
                    // Every event was already submitted when the pause after the last one is cut
                    report.cancelled = seq + 1 < events.len();
                    break;
                }
            }
        }

        Ok(report)
    }

    async fn publish_with_retry(
        &self,
        seq: usize,
        event: &PositionEvent,
    ) -> Result<(), PublishError> {
        let mut attempt = 0;
        loop {
            match self.broker.publish(event, &self.settings.output_topic).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.settings.publish_retries => {
                    attempt += 1;
                    self.metrics.record_publish_retry();
                    debug!(seq = %seq, attempt = %attempt, error = %e, "position_publish_retry");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Resolves once the shutdown flag is true
///
/// Never resolves if the sender is dropped without signalling.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Position;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Provider returning a fixed set of positions
    struct StaticProvider {
        positions: Vec<Position>,
    }

    impl StaticProvider {
        fn with_len(n: usize) -> Self {
            let positions =
                (0..n).map(|i| Position { seq: i, lat: i as f64, lng: -(i as f64) }).collect();
            Self { positions }
        }
    }

    impl RouteProvider for StaticProvider {
        fn load_positions(&self, _route: &Route) -> Result<Vec<Position>, RouteError> {
            Ok(self.positions.clone())
        }
    }

    /// Broker failing the publishes whose call index is listed in `fail_calls`
    #[derive(Default)]
    struct RecordingBroker {
        calls: Mutex<Vec<(String, PositionEvent, Instant)>>,
        fail_calls: Vec<usize>,
    }

    #[async_trait]
    impl BrokerClient for RecordingBroker {
        async fn publish(&self, event: &PositionEvent, topic: &str) -> Result<(), PublishError> {
            let mut calls = self.calls.lock();
            let index = calls.len();
            calls.push((topic.to_string(), event.clone(), Instant::now()));
            if self.fail_calls.contains(&index) {
                return Err(PublishError::Broker(format!("call {} refused", index)));
            }
            Ok(())
        }
    }

    fn settings(pacing_ms: u64) -> PublisherSettings {
        PublisherSettings {
            output_topic: "positions".to_string(),
            pacing_interval: Duration::from_millis(pacing_ms),
            ..Default::default()
        }
    }

    fn publisher(
        positions: usize,
        broker: Arc<RecordingBroker>,
        settings: PublisherSettings,
    ) -> (PositionStreamPublisher, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let publisher = PositionStreamPublisher::new(
            Arc::new(StaticProvider::with_len(positions)),
            broker,
            settings,
            metrics.clone(),
        );
        (publisher, metrics)
    }

    const REQUEST: &[u8] = br#"{"routeId":"1","clientId":"abc"}"#;

    #[tokio::test]
    async fn test_publishes_every_position_in_order() {
        let broker = Arc::new(RecordingBroker::default());
        let (publisher, metrics) = publisher(5, broker.clone(), settings(0));
        let (_tx, rx) = watch::channel(false);

        let report = publisher.handle(REQUEST, rx).await.unwrap();
        assert_eq!(report.total, 5);
        assert_eq!(report.published, 5);
        assert!(!report.cancelled);

        let calls = broker.calls.lock();
        let lats: Vec<f64> = calls.iter().map(|(_, e, _)| e.position[0]).collect();
        assert_eq!(lats, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert!(calls.iter().all(|(topic, _, _)| topic == "positions"));
        assert!(calls[4].1.finished);
        assert_eq!(metrics.positions_published(), 5);
    }

    #[tokio::test]
    async fn test_malformed_payload_publishes_nothing() {
        let broker = Arc::new(RecordingBroker::default());
        let (publisher, metrics) = publisher(3, broker.clone(), settings(0));
        let (_tx, rx) = watch::channel(false);

        let err = publisher.handle(b"{not json", rx).await.unwrap_err();
        assert!(matches!(err, StreamError::Decode(_)));
        assert!(broker.calls.lock().is_empty());
        assert_eq!(metrics.report().decode_errors, 1);
    }

    #[tokio::test]
    async fn test_export_failure_publishes_nothing() {
        let broker = Arc::new(RecordingBroker::default());
        let (publisher, metrics) = publisher(0, broker.clone(), settings(0));
        let (_tx, rx) = watch::channel(false);

        let err = publisher.handle(REQUEST, rx).await.unwrap_err();
        assert!(matches!(err, StreamError::Export { source: RouteError::Empty(_), .. }));
        assert!(broker.calls.lock().is_empty());
        assert_eq!(metrics.report().export_errors, 1);
    }

    #[tokio::test]
    async fn test_pacing_between_publishes() {
        let broker = Arc::new(RecordingBroker::default());
        let (publisher, _) = publisher(4, broker.clone(), settings(40));
        let (_tx, rx) = watch::channel(false);

        publisher.handle(REQUEST, rx).await.unwrap();

        let calls = broker.calls.lock();
        for pair in calls.windows(2) {
            assert!(pair[1].2.duration_since(pair[0].2) >= Duration::from_millis(40));
        }
    }

    #[tokio::test]
    async fn test_continue_on_failure() {
        let broker = Arc::new(RecordingBroker { fail_calls: vec![1], ..Default::default() });
        let (publisher, metrics) = publisher(4, broker.clone(), settings(0));
        let (_tx, rx) = watch::channel(false);

        let report = publisher.handle(REQUEST, rx).await.unwrap();
        assert_eq!(report.published, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(broker.calls.lock().len(), 4);
        assert_eq!(metrics.publish_failures(), 1);
    }

    #[tokio::test]
    async fn test_abort_on_failure() {
        let broker = Arc::new(RecordingBroker { fail_calls: vec![1], ..Default::default() });
        let settings =
            PublisherSettings { failure_policy: FailurePolicy::AbortOnFailure, ..settings(0) };
        let (publisher, metrics) = publisher(4, broker.clone(), settings);
        let (_tx, rx) = watch::channel(false);

        let err = publisher.handle(REQUEST, rx).await.unwrap_err();
        assert!(matches!(err, StreamError::Publish { seq: 1, .. }));
        assert_eq!(broker.calls.lock().len(), 2);
        assert_eq!(metrics.report().routes_aborted, 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_failed_publish() {
        let broker = Arc::new(RecordingBroker { fail_calls: vec![0], ..Default::default() });
        let settings = PublisherSettings { publish_retries: 2, ..settings(0) };
        let (publisher, metrics) = publisher(2, broker.clone(), settings);
        let (_tx, rx) = watch::channel(false);

        let report = publisher.handle(REQUEST, rx).await.unwrap();
        assert_eq!(report.published, 2);
        assert_eq!(report.failed, 0);
        // first event took two attempts
        assert_eq!(broker.calls.lock().len(), 3);
        assert_eq!(metrics.report().publish_retries, 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_publishes_nothing() {
        let broker = Arc::new(RecordingBroker::default());
        let (publisher, _) = publisher(3, broker.clone(), settings(0));
        let (_tx, rx) = watch::channel(true);

        let report = publisher.handle(REQUEST, rx).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.published, 0);
        assert!(broker.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pacing() {
        let broker = Arc::new(RecordingBroker::default());
        let (publisher, metrics) = publisher(10, broker.clone(), settings(10_000));
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let started = Instant::now();
        let report = publisher.handle(REQUEST, rx).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.published, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(metrics.report().routes_cancelled, 1);
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_does_not_cancel() {
        let broker = Arc::new(RecordingBroker::default());
        let (publisher, _) = publisher(3, broker.clone(), settings(5));
        let (tx, rx) = watch::channel(false);
        drop(tx);

        let report = publisher.handle(REQUEST, rx).await.unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.published, 3);
    }

    /// Broker whose publish never completes, like a client with a full request queue
    struct StalledBroker;

    #[async_trait]
    impl BrokerClient for StalledBroker {
        async fn publish(&self, _event: &PositionEvent, _topic: &str) -> Result<(), PublishError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_stalled_publish() {
        let metrics = Arc::new(Metrics::new());
        let publisher = PositionStreamPublisher::new(
            Arc::new(StaticProvider::with_len(3)),
            Arc::new(StalledBroker),
            settings(0),
            metrics.clone(),
        );
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let report = tokio::time::timeout(Duration::from_secs(2), publisher.handle(REQUEST, rx))
            .await
            .expect("stream did not stop after shutdown")
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.published, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(metrics.report().routes_cancelled, 1);
    }

    #[tokio::test]
    async fn test_shutdown_after_last_publish_is_not_cancelled() {
        let broker = Arc::new(RecordingBroker::default());
        let (publisher, metrics) = publisher(1, broker.clone(), settings(10_000));
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let report = publisher.handle(REQUEST, rx).await.unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.published, 1);
        assert!(!report.cancelled);

        let summary = metrics.report();
        assert_eq!(summary.routes_completed, 1);
        assert_eq!(summary.routes_cancelled, 0);
    }

    #[tokio::test]
    async fn test_waits_after_final_publish() {
        let broker = Arc::new(RecordingBroker::default());
        let (publisher, _) = publisher(3, broker.clone(), settings(40));
        let (_tx, rx) = watch::channel(false);

        let started = Instant::now();
        publisher.handle(REQUEST, rx).await.unwrap();
        // three pauses, including the one after the final event
        assert!(started.elapsed() >= Duration::from_millis(120));
        assert_eq!(broker.calls.lock().len(), 3);
    }

    #[test]
    fn test_failure_policy_from_toml_value() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: FailurePolicy,
        }
        let w: Wrapper = toml::from_str(r#"policy = "abort""#).unwrap();
        assert_eq!(w.policy, FailurePolicy::AbortOnFailure);
        let w: Wrapper = toml::from_str(r#"policy = "continue""#).unwrap();
        assert_eq!(w.policy, FailurePolicy::ContinueOnFailure);
        assert_eq!(FailurePolicy::default(), FailurePolicy::ContinueOnFailure);
    }
}
