//! Turns raw API records into validated observations.
//!
//! Everything downstream of this module works with [`Observation`] only; the
//! loosely typed [`RawFlight`] never reaches the database layer.

use crate::aviation_api::{RawFlight, numeric};
use crate::geo::is_valid_coordinate;

pub const UNKNOWN_AIRLINE: &str = "Unknown Airline";
pub const UNKNOWN_AIRPORT: &str = "N/A";

#[derive(Debug, Clone, PartialEq)]
pub struct AirlineRecord {
    pub icao_code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AircraftRecord {
    pub icao_code: String,
    pub model_name: String,
}

impl AircraftRecord {
    /// A model name equal to the code is a stand-in, not real information.
    pub fn has_placeholder_model(&self) -> bool {
        self.model_name == self.icao_code
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlightRecord {
    pub flight_icao: String,
    pub aircraft_icao: Option<String>,
    pub departure_airport: String,
    pub arrival_airport: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// A fully validated observation, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub airline: AirlineRecord,
    pub flight: FlightRecord,
    pub aircraft: Option<AircraftRecord>,
    pub position: PositionRecord,
}

/// Why a raw record was refused. Rejections are final: retrying cannot fix
/// bad data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("record has no `{0}` block")]
    MissingBlock(&'static str),
    #[error("airline has no ICAO code")]
    MissingAirlineCode,
    #[error("flight has no ICAO code")]
    MissingFlightCode,
    #[error("live position has no numeric {0}")]
    NonNumericCoordinate(&'static str),
    #[error("coordinates ({latitude}, {longitude}) are outside the valid range")]
    CoordinateOutOfRange { latitude: f64, longitude: f64 },
    #[error("altitude is not numeric")]
    NonNumericAltitude,
}

/// Trim and upper-case an identifying code; blank codes count as absent.
pub fn normalize_code(code: Option<&str>) -> Option<String> {
    let code = code?.trim();
    (!code.is_empty()).then(|| code.to_uppercase())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub fn normalize(raw: &RawFlight) -> Result<Observation, Rejection> {
    let airline = raw.airline.as_ref().ok_or(Rejection::MissingBlock("airline"))?;
    let flight = raw.flight.as_ref().ok_or(Rejection::MissingBlock("flight"))?;
    let live = raw.live.as_ref().ok_or(Rejection::MissingBlock("live"))?;

    let airline = AirlineRecord {
        icao_code: normalize_code(airline.icao.as_deref()).ok_or(Rejection::MissingAirlineCode)?,
        name: non_blank(airline.name.as_deref()).unwrap_or_else(|| UNKNOWN_AIRLINE.to_string()),
    };

    let aircraft = raw.aircraft.as_ref().and_then(|aircraft| {
        let icao_code = normalize_code(aircraft.icao.as_deref())?;
        // A model that only repeats the code, in any case, is the placeholder
        let model_name = match non_blank(aircraft.model.as_deref()) {
            Some(model) if !model.eq_ignore_ascii_case(&icao_code) => model,
            _ => icao_code.clone(),
        };
        Some(AircraftRecord {
            icao_code,
            model_name,
        })
    });

    let latitude = live
        .latitude()
        .ok_or(Rejection::NonNumericCoordinate("latitude"))?;
    let longitude = live
        .longitude()
        .ok_or(Rejection::NonNumericCoordinate("longitude"))?;
    if !is_valid_coordinate(latitude, longitude) {
        return Err(Rejection::CoordinateOutOfRange {
            latitude,
            longitude,
        });
    }
    let altitude = match &live.altitude {
        None | Some(serde_json::Value::Null) => 0.0,
        Some(value) => numeric(value).ok_or(Rejection::NonNumericAltitude)?,
    };

    let airport = |block: &Option<crate::aviation_api::RawAirport>| {
        non_blank(block.as_ref().and_then(|a| a.airport.as_deref()))
            .unwrap_or_else(|| UNKNOWN_AIRPORT.to_string())
    };

    let flight = FlightRecord {
        flight_icao: non_blank(flight.icao.as_deref()).ok_or(Rejection::MissingFlightCode)?,
        aircraft_icao: aircraft.as_ref().map(|a| a.icao_code.clone()),
        departure_airport: airport(&raw.departure),
        arrival_airport: airport(&raw.arrival),
    };

    Ok(Observation {
        airline,
        flight,
        aircraft,
        position: PositionRecord {
            latitude,
            longitude,
            altitude,
        },
    })
}

/// Normalize a batch, keeping each rejection with its index in the input.
pub fn normalize_batch(raw: &[RawFlight]) -> (Vec<Observation>, Vec<(usize, Rejection)>) {
    let mut observations = Vec::with_capacity(raw.len());
    let mut rejections = Vec::new();
    for (idx, record) in raw.iter().enumerate() {
        match normalize(record) {
            Ok(observation) => observations.push(observation),
            Err(rejection) => rejections.push((idx, rejection)),
        }
    }
    (observations, rejections)
}
