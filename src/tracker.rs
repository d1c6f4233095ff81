//! The polling loop: fetch, keep what is inside the bounding box, persist,
//! then sleep for as long as the cycle's outcome calls for.

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::aviation_api::RawFlight;
use crate::config::ScheduleConfig;
use crate::database::PersistError;
use crate::geo::BoundingBox;
use crate::observations_repo::PersistSummary;

/// Where raw flights come from. Implementations degrade to an empty list
/// instead of failing.
#[async_trait]
pub trait FlightSource: Send + Sync {
    async fn fetch(&self) -> Vec<RawFlight>;
}

/// Where admitted flights go.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    async fn persist(&self, flights: &[RawFlight]) -> Result<PersistSummary, PersistError>;
}

/// Per-cycle counts, the tracker's only user-facing signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub in_region: usize,
    pub persisted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The API returned nothing (or could not be reached)
    NoFlights,
    /// Flights came back but none were inside the bounding box
    NoneInRegion(CycleReport),
    /// A batch went through the gateway, whatever its failure count
    Persisted(CycleReport),
    /// The cycle itself broke; the loop recovers and tries again
    Failed(String),
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::NoFlights => "no_flights",
            CycleOutcome::NoneInRegion(_) => "none_in_region",
            CycleOutcome::Persisted(_) => "persisted",
            CycleOutcome::Failed(_) => "failed",
        }
    }

    pub fn report(&self) -> CycleReport {
        match self {
            CycleOutcome::NoneInRegion(report) | CycleOutcome::Persisted(report) => *report,
            CycleOutcome::NoFlights | CycleOutcome::Failed(_) => CycleReport::default(),
        }
    }

    pub fn sleep_duration(&self, schedule: &ScheduleConfig) -> Duration {
        match self {
            CycleOutcome::NoFlights => schedule.idle(),
            CycleOutcome::NoneInRegion(_) => schedule.quiet(),
            CycleOutcome::Persisted(_) => schedule.poll(),
            CycleOutcome::Failed(_) => schedule.recovery(),
        }
    }
}

pub struct Tracker {
    source: Arc<dyn FlightSource>,
    sink: Arc<dyn ObservationSink>,
    bbox: BoundingBox,
    schedule: ScheduleConfig,
}

impl Tracker {
    pub fn new(
        source: Arc<dyn FlightSource>,
        sink: Arc<dyn ObservationSink>,
        bbox: BoundingBox,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            source,
            sink,
            bbox,
            schedule,
        }
    }

    pub fn filter_in_region(&self, flights: Vec<RawFlight>) -> Vec<RawFlight> {
        flights
            .into_iter()
            .filter(|flight| {
                let (latitude, longitude) = flight.coordinates();
                self.bbox.contains(latitude, longitude)
            })
            .collect()
    }

    /// One fetch → filter → persist pass.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let flights = self.source.fetch().await;
        if flights.is_empty() {
            return CycleOutcome::NoFlights;
        }

        let mut report = CycleReport {
            fetched: flights.len(),
            ..Default::default()
        };
        let in_region = self.filter_in_region(flights);
        report.in_region = in_region.len();
        if in_region.is_empty() {
            return CycleOutcome::NoneInRegion(report);
        }

        match self.sink.persist(&in_region).await {
            Ok(summary) => {
                report.persisted = summary.persisted;
                report.failed = summary.failed;
                CycleOutcome::Persisted(report)
            }
            Err(e) => CycleOutcome::Failed(e.to_string()),
        }
    }

    /// [`Self::run_cycle`] with panics turned into a failed outcome.
    pub async fn run_cycle_guarded(&self) -> CycleOutcome {
        match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                CycleOutcome::Failed(format!("cycle panicked: {message}"))
            }
        }
    }

    /// Run cycles until `shutdown` is cancelled. The token is checked between
    /// cycles and while sleeping; a cycle in progress always finishes.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Flight tracker started (bbox {:?}, poll every {:?})",
            self.bbox,
            self.schedule.poll()
        );
        let mut cycle: u64 = 0;

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            cycle += 1;

            let outcome = self
                .run_cycle_guarded()
                .instrument(info_span!("cycle", number = cycle))
                .await;
            record_cycle(&outcome);

            let delay = outcome.sleep_duration(&self.schedule);
            let report = outcome.report();
            match &outcome {
                CycleOutcome::NoFlights => warn!("No flight data this cycle"),
                CycleOutcome::NoneInRegion(_) => {
                    info!("No flights in region ({} fetched)", report.fetched)
                }
                CycleOutcome::Persisted(_) => info!(
                    "Cycle {} done: fetched={} in_region={} persisted={} failed={}",
                    cycle, report.fetched, report.in_region, report.persisted, report.failed
                ),
                CycleOutcome::Failed(reason) => error!("Cycle {} failed: {}", cycle, reason),
            }
            info!("Sleeping {:?}", delay);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Flight tracker stopped after {} cycles", cycle);
    }
}

fn record_cycle(outcome: &CycleOutcome) {
    let report = outcome.report();
    metrics::counter!("tracker_cycles_total", "outcome" => outcome.label()).increment(1);
    metrics::counter!("tracker_flights_fetched_total").increment(report.fetched as u64);
    metrics::counter!("tracker_flights_in_region_total").increment(report.in_region as u64);
    metrics::counter!("tracker_observations_persisted_total").increment(report.persisted as u64);
    metrics::counter!("tracker_observations_failed_total").increment(report.failed as u64);
    metrics::gauge!("tracker_last_cycle_timestamp_seconds")
        .set(chrono::Utc::now().timestamp() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aviation_api::{RawAirline, RawFlightIdentity, RawLive};
    use serde_json::json;
    use std::sync::Mutex;

    fn flight_at(latitude: f64, longitude: f64) -> RawFlight {
        RawFlight {
            airline: Some(RawAirline {
                name: Some("Test Air".into()),
                icao: Some("TST".into()),
            }),
            flight: Some(RawFlightIdentity {
                icao: Some("TST123".into()),
                iata: None,
            }),
            live: Some(RawLive {
                latitude: Some(json!(latitude)),
                longitude: Some(json!(longitude)),
                altitude: None,
            }),
            ..Default::default()
        }
    }

    struct StaticSource {
        flights: Vec<RawFlight>,
        stop_after_fetch: Option<CancellationToken>,
    }

    #[async_trait]
    impl FlightSource for StaticSource {
        async fn fetch(&self) -> Vec<RawFlight> {
            if let Some(token) = &self.stop_after_fetch {
                token.cancel();
            }
            self.flights.clone()
        }
    }

    struct PanickingSource;

    #[async_trait]
    impl FlightSource for PanickingSource {
        async fn fetch(&self) -> Vec<RawFlight> {
            panic!("feed exploded");
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl ObservationSink for RecordingSink {
        async fn persist(&self, flights: &[RawFlight]) -> Result<PersistSummary, PersistError> {
            self.batches.lock().unwrap().push(flights.len());
            if self.fail {
                return Err(PersistError::ConnectionExhausted("connection refused".into()));
            }
            Ok(PersistSummary {
                persisted: flights.len() - 1,
                failed: 1,
            })
        }
    }

    fn tracker(
        flights: Vec<RawFlight>,
        sink: Arc<RecordingSink>,
        bbox: BoundingBox,
    ) -> Tracker {
        Tracker::new(
            Arc::new(StaticSource {
                flights,
                stop_after_fetch: None,
            }),
            sink,
            bbox,
            ScheduleConfig::default(),
        )
    }

    fn black_sea() -> BoundingBox {
        BoundingBox::new(41.0, 27.5, 44.5, 41.5).unwrap()
    }

    #[test]
    fn test_outcome_to_sleep_mapping() {
        let schedule = ScheduleConfig::default();
        assert_eq!(
            CycleOutcome::NoFlights.sleep_duration(&schedule),
            Duration::from_secs(60)
        );
        assert_eq!(
            CycleOutcome::NoneInRegion(CycleReport::default()).sleep_duration(&schedule),
            Duration::from_secs(300)
        );
        assert_eq!(
            CycleOutcome::Persisted(CycleReport::default()).sleep_duration(&schedule),
            Duration::from_secs(3600)
        );
        assert_eq!(
            CycleOutcome::Failed("boom".into()).sleep_duration(&schedule),
            Duration::from_secs(60)
        );
    }

    #[tokio::test]
    async fn test_empty_fetch_is_no_flights() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker(vec![], sink.clone(), BoundingBox::WORLD);

        assert_eq!(tracker.run_cycle().await, CycleOutcome::NoFlights);
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_in_region_skips_persist() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker(
            vec![flight_at(10.0, 10.0), flight_at(60.0, 30.0)],
            sink.clone(),
            black_sea(),
        );

        let outcome = tracker.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::NoneInRegion(CycleReport {
                fetched: 2,
                ..Default::default()
            })
        );
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_flights_in_region_are_persisted() {
        let sink = Arc::new(RecordingSink::default());
        let mut no_position = flight_at(0.0, 0.0);
        no_position.live = None;
        let tracker = tracker(
            vec![
                flight_at(43.0, 34.0),
                flight_at(10.0, 10.0),
                flight_at(42.0, 30.0),
                no_position,
            ],
            sink.clone(),
            black_sea(),
        );

        let outcome = tracker.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Persisted(CycleReport {
                fetched: 4,
                in_region: 2,
                persisted: 1,
                failed: 1,
            })
        );
        assert_eq!(*sink.batches.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_gateway_error_becomes_failed_outcome() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let tracker = tracker(vec![flight_at(43.0, 34.0)], sink, BoundingBox::WORLD);

        let outcome = tracker.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Failed(ref reason) if reason.contains("refused")));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let tracker = Tracker::new(
            Arc::new(PanickingSource),
            Arc::new(RecordingSink::default()),
            BoundingBox::WORLD,
            ScheduleConfig::default(),
        );

        let outcome = tracker.run_cycle_guarded().await;
        assert!(
            matches!(outcome, CycleOutcome::Failed(ref reason) if reason.contains("feed exploded"))
        );
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_already_stopped() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = tracker(vec![flight_at(43.0, 34.0)], sink.clone(), BoundingBox::WORLD);
        let token = CancellationToken::new();
        token.cancel();

        tracker.run(token).await;
        assert!(sink.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_during_cycle_lets_cycle_finish() {
        let sink = Arc::new(RecordingSink::default());
        let token = CancellationToken::new();
        let tracker = Tracker::new(
            Arc::new(StaticSource {
                flights: vec![flight_at(43.0, 34.0), flight_at(42.0, 30.0)],
                stop_after_fetch: Some(token.clone()),
            }),
            sink.clone(),
            BoundingBox::WORLD,
            ScheduleConfig::default(),
        );

        // Would otherwise sleep for an hour after persisting
        tokio::time::timeout(Duration::from_secs(5), tracker.run(token))
            .await
            .expect("tracker did not stop");
        assert_eq!(*sink.batches.lock().unwrap(), vec![2]);
    }
}
