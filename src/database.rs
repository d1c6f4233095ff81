use anyhow::{Result, anyhow};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::retry::{RetryPolicy, Sleeper};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

// Embed migrations into the binary
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/");

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("database unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Query(#[from] DieselError),
    #[error("could not obtain a database connection: {0}")]
    ConnectionExhausted(String),
    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PersistError {
    /// Errors a later attempt may not hit again: lost connections,
    /// serialization failures, deadlocks. Constraint violations and other
    /// query errors are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            PersistError::Unavailable(_) => true,
            PersistError::Query(e) => is_transient_query_error(e),
            PersistError::ConnectionExhausted(_) | PersistError::Task(_) => false,
        }
    }
}

fn is_transient_query_error(e: &DieselError) -> bool {
    match e {
        DieselError::DatabaseError(kind, info) => match kind {
            DatabaseErrorKind::SerializationFailure
            | DatabaseErrorKind::ClosedConnection
            | DatabaseErrorKind::UnableToSendCommand => true,
            DatabaseErrorKind::Unknown => info.message().contains("deadlock"),
            _ => false,
        },
        DieselError::BrokenTransactionManager => true,
        _ => false,
    }
}

/// Where connections come from. The pool is the only production
/// implementation.
pub trait ConnectionSource: Send + Sync + 'static {
    fn connect(&self) -> Result<PgPooledConnection, PersistError>;
}

impl ConnectionSource for PgPool {
    fn connect(&self) -> Result<PgPooledConnection, PersistError> {
        self.get()
            .map_err(|e| PersistError::Unavailable(e.to_string()))
    }
}

/// Build the connection pool without connecting; connection failures surface
/// on checkout, where they are retried.
pub fn build_pool(config: &DatabaseConfig) -> PgPool {
    let manager = ConnectionManager::<PgConnection>::new(config.connection_url());
    Pool::builder()
        .max_size(config.pool_size)
        .min_idle(Some(0))
        .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
        .build_unchecked(manager)
}

/// Check out a connection, retrying transient failures under `retry`.
///
/// Exhausting the attempts yields [`PersistError::ConnectionExhausted`].
pub async fn checkout(
    source: &Arc<dyn ConnectionSource>,
    retry: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<PgPooledConnection, PersistError> {
    retry
        .run(
            sleeper,
            "database connection",
            |attempt| {
                if attempt > 0 {
                    metrics::counter!("database_retries_total", "stage" => "connect").increment(1);
                }
                let source = Arc::clone(source);
                async move { tokio::task::spawn_blocking(move || source.connect()).await? }
            },
            PersistError::is_transient,
        )
        .await
        .map_err(|e| match e {
            PersistError::Unavailable(reason) => PersistError::ConnectionExhausted(reason),
            other => other,
        })
}

/// Apply any pending embedded migrations.
pub async fn run_migrations(
    source: &Arc<dyn ConnectionSource>,
    retry: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<usize> {
    let mut conn = checkout(source, retry, sleeper).await?;

    let applied = tokio::task::spawn_blocking(move || {
        let conn: &mut PgConnection = &mut conn;
        conn.run_pending_migrations(MIGRATIONS)
            .map(|versions| versions.len())
            .map_err(|e| anyhow!("Failed to run database migrations: {e}"))
    })
    .await??;

    info!("Database migrations completed ({} applied)", applied);
    Ok(applied)
}
