//! skytrack - flight position ingestion
//!
//! Polls a flight-data API, keeps the aircraft inside a configured bounding
//! box and records airlines, aircraft, flights and their positions in
//! PostgreSQL.

pub mod aviation_api;
pub mod config;
pub mod database;
pub mod flights;
pub mod geo;
pub mod logging;
pub mod metrics;
pub mod observation;
pub mod observations_repo;
pub mod positions_repo;
pub mod retry;
pub mod schema;
pub mod tracker;

pub use aviation_api::{AviationApiClient, RawFlight};
pub use config::TrackerConfig;
pub use geo::BoundingBox;
pub use observations_repo::{ObservationsRepository, PersistSummary};
pub use retry::RetryPolicy;
pub use tracker::{CycleOutcome, CycleReport, Tracker};
