use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel::upsert::excluded;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::aviation_api::RawFlight;
use crate::database::{ConnectionSource, PersistError, PgPool, checkout};
use crate::flights::{Aircraft, NewAirline, NewFlight, NewFlightPosition};
use crate::observation::{Observation, normalize_batch};
use crate::retry::{RetryPolicy, Sleeper};
use crate::tracker::ObservationSink;

/// Outcome counts for one persisted batch. Rejected records are included in
/// `failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    pub persisted: usize,
    pub failed: usize,
}

/// Sole writer of airlines, aircrafts, flights and flight_positions.
///
/// Every observation is written in its own transaction, so a bad record only
/// ever costs itself.
#[derive(Clone)]
pub struct ObservationsRepository {
    source: Arc<dyn ConnectionSource>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl ObservationsRepository {
    pub fn new(pool: PgPool, retry: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self::with_source(Arc::new(pool), retry, sleeper)
    }

    pub fn with_source(
        source: Arc<dyn ConnectionSource>,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            source,
            retry,
            sleeper,
        }
    }

    /// Validate and store a batch of raw records.
    ///
    /// Individual failures are counted, never raised. The only error is
    /// running out of connection attempts, which stops the batch; everything
    /// committed before that stays committed.
    pub async fn persist_batch(&self, raw: &[RawFlight]) -> Result<PersistSummary, PersistError> {
        info!("Saving {} flights", raw.len());

        let (observations, rejections) = normalize_batch(raw);
        for (idx, rejection) in &rejections {
            warn!("Rejected flight record #{}: {}", idx, rejection);
        }
        let mut summary = PersistSummary {
            persisted: 0,
            failed: rejections.len(),
        };
        if observations.is_empty() {
            return Ok(summary);
        }

        let aircraft = collect_aircraft(&observations);
        if !aircraft.is_empty() {
            match self.upsert_aircraft(aircraft).await {
                Ok(count) => debug!("Upserted {} aircraft", count),
                Err(e @ PersistError::ConnectionExhausted(_)) => return Err(e),
                Err(e) => error!("Failed to upsert aircraft for this batch: {}", e),
            }
        }

        for (idx, observation) in observations.into_iter().enumerate() {
            let flight_icao = observation.flight.flight_icao.clone();
            match self.save_observation(observation).await {
                Ok(position_id) => {
                    debug!("Stored position {} for flight {}", position_id, flight_icao);
                    summary.persisted += 1;
                }
                Err(e @ PersistError::ConnectionExhausted(_)) => {
                    error!(
                        "Stopping batch after {} stored, {} failed: {}",
                        summary.persisted, summary.failed, e
                    );
                    return Err(e);
                }
                Err(e) => {
                    error!("Failed to store observation #{} ({}): {}", idx, flight_icao, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Save finished: {} stored, {} failed",
            summary.persisted, summary.failed
        );
        Ok(summary)
    }

    /// Bulk upsert of every aircraft seen in a batch. A stored model name is
    /// only replaced by one that is not just the aircraft code again.
    pub async fn upsert_aircraft(&self, rows: Vec<Aircraft>) -> Result<usize, PersistError> {
        let rows = Arc::new(rows);
        self.retry
            .run(
                self.sleeper.as_ref(),
                "aircraft upsert",
                |attempt| {
                    let rows = Arc::clone(&rows);
                    async move {
                        if attempt > 0 {
                            metrics::counter!("database_retries_total", "stage" => "aircraft")
                                .increment(1);
                        }
                        let mut conn = self.checkout().await?;
                        tokio::task::spawn_blocking(move || {
                            let conn: &mut PgConnection = &mut conn;
                            upsert_aircraft_rows(conn, &rows).map_err(PersistError::from)
                        })
                        .await?
                    }
                },
                PersistError::is_transient,
            )
            .await
    }

    /// Write airline, flight and position for one observation atomically.
    /// Returns the new position id.
    pub async fn save_observation(&self, observation: Observation) -> Result<i64, PersistError> {
        let observation = Arc::new(observation);
        self.retry
            .run(
                self.sleeper.as_ref(),
                "observation write",
                |attempt| {
                    let observation = Arc::clone(&observation);
                    async move {
                        if attempt > 0 {
                            metrics::counter!("database_retries_total", "stage" => "observation")
                                .increment(1);
                        }
                        let mut conn = self.checkout().await?;
                        tokio::task::spawn_blocking(move || {
                            let conn: &mut PgConnection = &mut conn;
                            conn.transaction(|conn| {
                                write_observation(conn, &observation, Utc::now())
                            })
                            .map_err(PersistError::from)
                        })
                        .await?
                    }
                },
                PersistError::is_transient,
            )
            .await
    }

    async fn checkout(&self) -> Result<crate::database::PgPooledConnection, PersistError> {
        checkout(&self.source, &self.retry, self.sleeper.as_ref()).await
    }
}

#[async_trait]
impl ObservationSink for ObservationsRepository {
    async fn persist(&self, flights: &[RawFlight]) -> Result<PersistSummary, PersistError> {
        self.persist_batch(flights).await
    }
}

/// One row per aircraft code. A real model name beats a placeholder for the
/// same code; otherwise the last sighting wins.
pub fn collect_aircraft(observations: &[Observation]) -> Vec<Aircraft> {
    let mut by_code: BTreeMap<String, Aircraft> = BTreeMap::new();
    for record in observations.iter().filter_map(|o| o.aircraft.as_ref()) {
        let keep_existing = record.has_placeholder_model()
            && by_code
                .get(&record.icao_code)
                .is_some_and(|existing| existing.model_name != existing.icao_code);
        if !keep_existing {
            by_code.insert(record.icao_code.clone(), Aircraft::from(record));
        }
    }
    by_code.into_values().collect()
}

fn upsert_aircraft_rows(conn: &mut PgConnection, rows: &Vec<Aircraft>) -> QueryResult<usize> {
    use crate::schema::aircrafts;

    diesel::insert_into(aircrafts::table)
        .values(rows)
        .on_conflict(aircrafts::icao_code)
        .do_update()
        .set(aircrafts::model_name.eq(sql::<Text>(
            "CASE WHEN UPPER(TRIM(excluded.model_name)) <> excluded.icao_code \
             THEN excluded.model_name ELSE aircrafts.model_name END",
        )))
        .execute(conn)
}

fn write_observation(
    conn: &mut PgConnection,
    observation: &Observation,
    now: DateTime<Utc>,
) -> QueryResult<i64> {
    use crate::schema::{airlines, flight_positions, flights};

    let airline_id: i32 = diesel::insert_into(airlines::table)
        .values(NewAirline::from(&observation.airline))
        .on_conflict(airlines::icao_code)
        .do_update()
        .set(airlines::name.eq(excluded(airlines::name)))
        .returning(airlines::id)
        .get_result(conn)?;

    let flight_id: i32 = diesel::insert_into(flights::table)
        .values(NewFlight::from_observation(observation, airline_id, now))
        .on_conflict((flights::flight_icao, flights::airline_id))
        .do_update()
        .set((
            flights::aircraft_icao.eq(excluded(flights::aircraft_icao)),
            flights::departure_airport.eq(excluded(flights::departure_airport)),
            flights::arrival_airport.eq(excluded(flights::arrival_airport)),
            flights::updated_at.eq(excluded(flights::updated_at)),
        ))
        .returning(flights::id)
        .get_result(conn)?;

    diesel::insert_into(flight_positions::table)
        .values(NewFlightPosition::from_observation(observation, flight_id))
        .returning(flight_positions::id)
        .get_result(conn)
}
