//! Row types for the four tracked tables.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::observation::{AircraftRecord, AirlineRecord, Observation};

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::airlines)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Airline {
    pub id: i32,
    pub name: String,
    pub icao_code: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::airlines)]
pub struct NewAirline {
    pub name: String,
    pub icao_code: String,
}

impl From<&AirlineRecord> for NewAirline {
    fn from(record: &AirlineRecord) -> Self {
        Self {
            name: record.name.clone(),
            icao_code: record.icao_code.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::aircrafts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Aircraft {
    pub icao_code: String,
    pub model_name: String,
}

impl From<&AircraftRecord> for Aircraft {
    fn from(record: &AircraftRecord) -> Self {
        Self {
            icao_code: record.icao_code.clone(),
            model_name: record.model_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::flights)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Flight {
    pub id: i32,
    pub flight_icao: String,
    pub aircraft_icao: Option<String>,
    pub airline_id: i32,
    pub departure_airport: String,
    pub arrival_airport: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::flights)]
pub struct NewFlight {
    pub flight_icao: String,
    pub aircraft_icao: Option<String>,
    pub airline_id: i32,
    pub departure_airport: String,
    pub arrival_airport: String,
    pub updated_at: DateTime<Utc>,
}

impl NewFlight {
    pub fn from_observation(observation: &Observation, airline_id: i32, now: DateTime<Utc>) -> Self {
        Self {
            flight_icao: observation.flight.flight_icao.clone(),
            aircraft_icao: observation.flight.aircraft_icao.clone(),
            airline_id,
            departure_airport: observation.flight.departure_airport.clone(),
            arrival_airport: observation.flight.arrival_airport.clone(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::flight_positions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FlightPosition {
    pub id: i64,
    pub flight_id: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub timestamp: DateTime<Utc>,
}

/// Positions are timestamped by the database on insert.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::flight_positions)]
pub struct NewFlightPosition {
    pub flight_id: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl NewFlightPosition {
    pub fn from_observation(observation: &Observation, flight_id: i32) -> Self {
        Self {
            flight_id,
            latitude: observation.position.latitude,
            longitude: observation.position.longitude,
            altitude: observation.position.altitude,
        }
    }
}
