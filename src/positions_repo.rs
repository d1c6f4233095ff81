use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Float8, Integer, Text, Timestamptz};
use serde::Serialize;

use crate::database::PgPool;

/// One row of the live map: a recent position with its flight and model.
#[derive(Debug, Clone, PartialEq, QueryableByName, Serialize)]
pub struct RecentPosition {
    #[diesel(sql_type = Text)]
    pub flight_icao: String,
    #[diesel(sql_type = Text)]
    pub model: String,
    #[diesel(sql_type = Float8)]
    pub latitude: f64,
    #[diesel(sql_type = Float8)]
    pub longitude: f64,
    #[diesel(sql_type = Float8)]
    pub altitude: f64,
    #[diesel(sql_type = Timestamptz)]
    pub timestamp: DateTime<Utc>,
}

/// Read-only queries over the position history.
#[derive(Clone)]
pub struct PositionsRepository {
    pool: PgPool,
}

impl PositionsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Positions from the last `minutes`, newest first. Aircraft are matched
    /// ignoring case and surrounding whitespace; a missing or blank model
    /// reads as "Unknown Model".
    pub async fn recent_positions(&self, minutes: i32, limit: i64) -> Result<Vec<RecentPosition>> {
        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rows = diesel::sql_query(
                "SELECT f.flight_icao, \
                        COALESCE(NULLIF(a.model_name, ''), 'Unknown Model') AS model, \
                        fp.latitude, fp.longitude, fp.altitude, fp.timestamp \
                 FROM flight_positions fp \
                 JOIN flights f ON fp.flight_id = f.id \
                 LEFT JOIN aircrafts a \
                   ON UPPER(TRIM(f.aircraft_icao)) = UPPER(TRIM(a.icao_code)) \
                 WHERE fp.timestamp >= NOW() - make_interval(mins => $1) \
                   AND fp.latitude BETWEEN -90 AND 90 \
                   AND fp.longitude BETWEEN -180 AND 180 \
                 ORDER BY fp.timestamp DESC, fp.id DESC \
                 LIMIT $2",
            )
            .bind::<Integer, _>(minutes)
            .bind::<BigInt, _>(limit)
            .load::<RecentPosition>(&mut conn)?;

            Ok::<Vec<RecentPosition>, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows)
    }

    /// Number of stored positions for one flight
    pub async fn count_for_flight(&self, flight_id: i32) -> Result<i64> {
        use crate::schema::flight_positions;

        let pool = self.pool.clone();

        let count = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let count = flight_positions::table
                .filter(flight_positions::flight_id.eq(flight_id))
                .count()
                .get_result::<i64>(&mut conn)?;

            Ok::<i64, anyhow::Error>(count)
        })
        .await??;

        Ok(count)
    }
}
