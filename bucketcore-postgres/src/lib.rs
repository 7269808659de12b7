//! PostgreSQL ownership store for BucketCore.
//!
//! Ownership lives in a single `bucketcore_ownership` table keyed by
//! `(endpoint, bucket)`. Every ownership-changing call is one conditional
//! statement, so the database row lock is the only thing that arbitrates
//! between competing instances.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

use async_trait::async_trait;
use bucketcore_types::{
    BucketKey, ConsumerId, LogPosition, Operation, OwnershipOutcome, OwnershipRecord,
    OwnershipStore, OwnershipStoreError, Timestamp,
};
use chrono::{DateTime, Utc};
use nutype::nutype;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{query, Pool, Postgres, Row};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

const CREATE_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS bucketcore_ownership (
        endpoint        TEXT        NOT NULL,
        bucket          BIGINT      NOT NULL,
        owner           TEXT        NOT NULL,
        last_heartbeat  TIMESTAMPTZ NOT NULL,
        last_position   BIGINT,
        PRIMARY KEY (endpoint, bucket)
    )
";

const CHECK_OR_SAVE: &str = r"
    INSERT INTO bucketcore_ownership (endpoint, bucket, owner, last_heartbeat, last_position)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (endpoint, bucket) DO UPDATE
        SET last_heartbeat = EXCLUDED.last_heartbeat,
            last_position = EXCLUDED.last_position
        WHERE bucketcore_ownership.owner = EXCLUDED.owner
    RETURNING owner
";

const HEARTBEAT: &str = r"
    UPDATE bucketcore_ownership
    SET last_heartbeat = $4,
        last_position = COALESCE($5, last_position)
    WHERE endpoint = $1 AND bucket = $2 AND owner = $3
";

const ADOPT: &str = r"
    UPDATE bucketcore_ownership
    SET owner = $3,
        last_heartbeat = $5
    WHERE endpoint = $1 AND bucket = $2 AND last_heartbeat = $4
";

const SELECT_RECORD: &str = r"
    SELECT owner, last_heartbeat, last_position
    FROM bucketcore_ownership
    WHERE endpoint = $1 AND bucket = $2
";

/// Failures setting up the store.
#[derive(Debug, Error)]
pub enum PostgresOwnershipStoreError {
    /// The connection pool could not be created.
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),
    /// The ownership table could not be created.
    #[error("failed to create the ownership table")]
    MigrationFailed(#[source] sqlx::Error),
}

/// Maximum number of database connections in the pool.
///
/// Must be at least 1, enforced by using `NonZeroU32` as the underlying type.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(std::num::NonZeroU32);

/// Configuration for the store's connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 5 seconds).
    ///
    /// Keep it well below the lease expiration: a claim or heartbeat that
    /// waits longer than that is reported as a store outage anyway.
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: std::num::NonZeroU32 =
            match std::num::NonZeroU32::new(10) {
                Some(v) => v,
                None => unreachable!(),
            };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Ownership store backed by a PostgreSQL table.
#[derive(Debug, Clone)]
pub struct PostgresOwnershipStore {
    pool: Pool<Postgres>,
}

impl PostgresOwnershipStore {
    /// Connect with the default pool configuration.
    pub async fn new<S: Into<String>>(
        connection_string: S,
    ) -> Result<Self, PostgresOwnershipStoreError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Connect with a custom pool configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresOwnershipStoreError> {
        let connection_string = connection_string.into();
        let max_connections: std::num::NonZeroU32 = config.max_connections.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&connection_string)
            .await
            .map_err(PostgresOwnershipStoreError::ConnectionFailed)?;
        Ok(Self { pool })
    }

    /// Use an existing pool, for instance one shared with the event log.
    pub const fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Create the ownership table if it does not exist yet.
    #[instrument(name = "postgres.migrate", skip(self))]
    pub async fn migrate(&self) -> Result<(), PostgresOwnershipStoreError> {
        let _ = query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(PostgresOwnershipStoreError::MigrationFailed)?;
        info!("[postgres.migrate] ownership table ready");
        Ok(())
    }

    /// Check that the database answers.
    pub async fn ping(&self) -> Result<(), PostgresOwnershipStoreError> {
        let _ = query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(PostgresOwnershipStoreError::ConnectionFailed)?;
        Ok(())
    }

    async fn fetch_record(
        &self,
        key: &BucketKey,
        operation: Operation,
    ) -> Result<Option<OwnershipRecord>, OwnershipStoreError> {
        let row = query(SELECT_RECORD)
            .bind(key.endpoint.as_ref())
            .bind(bucket_column(key))
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| store_failure(&error, operation))?;

        row.map(|row| record_from_row(&row, operation)).transpose()
    }
}

#[async_trait]
impl OwnershipStore for PostgresOwnershipStore {
    #[instrument(
        name = "postgres.check_or_save",
        skip(self, key, owner),
        fields(key = %key, owner = %owner)
    )]
    async fn check_or_save(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        position: LogPosition,
    ) -> OwnershipOutcome {
        let operation = Operation::CheckOrSave;
        let position = match position_column(position, operation) {
            Ok(position) => position,
            Err(error) => return unavailable(&error),
        };

        let result = query(CHECK_OR_SAVE)
            .bind(key.endpoint.as_ref())
            .bind(bucket_column(key))
            .bind(owner.as_ref())
            .bind(Timestamp::now().into_datetime())
            .bind(position)
            .fetch_optional(&self.pool)
            .await;

        match result {
            Ok(Some(_)) => OwnershipOutcome::Owned,
            Ok(None) => {
                debug!("[postgres.check_or_save] bucket owned elsewhere");
                OwnershipOutcome::Conflict
            }
            Err(error) => unavailable(&store_failure(&error, operation)),
        }
    }

    #[instrument(
        name = "postgres.heartbeat",
        skip(self, key, owner, now),
        fields(key = %key, owner = %owner)
    )]
    async fn heartbeat(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        now: Timestamp,
        position: Option<LogPosition>,
    ) -> OwnershipOutcome {
        let operation = Operation::Heartbeat;
        let position = match position.map(|p| position_column(p, operation)).transpose() {
            Ok(position) => position,
            Err(error) => return unavailable(&error),
        };

        let result = query(HEARTBEAT)
            .bind(key.endpoint.as_ref())
            .bind(bucket_column(key))
            .bind(owner.as_ref())
            .bind(now.into_datetime())
            .bind(position)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => OwnershipOutcome::Owned,
            Ok(_) => OwnershipOutcome::Conflict,
            Err(error) => unavailable(&store_failure(&error, operation)),
        }
    }

    #[instrument(
        name = "postgres.adopt",
        skip(self, key, owner, now),
        fields(key = %key, owner = %owner)
    )]
    async fn adopt(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        observed_heartbeat: Timestamp,
        now: Timestamp,
    ) -> OwnershipOutcome {
        let result = query(ADOPT)
            .bind(key.endpoint.as_ref())
            .bind(bucket_column(key))
            .bind(owner.as_ref())
            .bind(observed_heartbeat.into_datetime())
            .bind(now.into_datetime())
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => {
                info!("[postgres.adopt] ownership transferred");
                OwnershipOutcome::Owned
            }
            Ok(_) => OwnershipOutcome::Conflict,
            Err(error) => unavailable(&store_failure(&error, Operation::Adopt)),
        }
    }

    async fn last_heartbeat(
        &self,
        key: &BucketKey,
    ) -> Result<Option<Timestamp>, OwnershipStoreError> {
        let record = self.fetch_record(key, Operation::LastHeartbeat).await?;
        Ok(record.map(|record| record.last_heartbeat))
    }

    async fn last_position(
        &self,
        key: &BucketKey,
    ) -> Result<Option<LogPosition>, OwnershipStoreError> {
        let record = self.fetch_record(key, Operation::LastPosition).await?;
        Ok(record.and_then(|record| record.last_position))
    }

    async fn record(
        &self,
        key: &BucketKey,
    ) -> Result<Option<OwnershipRecord>, OwnershipStoreError> {
        self.fetch_record(key, Operation::ReadRecord).await
    }
}

fn bucket_column(key: &BucketKey) -> i64 {
    i64::from(key.bucket.into_inner())
}

fn position_column(
    position: LogPosition,
    operation: Operation,
) -> Result<i64, OwnershipStoreError> {
    i64::try_from(position.into_inner()).map_err(|_| {
        OwnershipStoreError::unavailable(
            operation,
            format!("position {position} exceeds the BIGINT column range"),
        )
    })
}

fn record_from_row(
    row: &PgRow,
    operation: Operation,
) -> Result<OwnershipRecord, OwnershipStoreError> {
    let malformed = |detail: String| {
        warn!(%operation, %detail, "[postgres.malformed_record] unreadable ownership row");
        OwnershipStoreError::unavailable(operation, detail)
    };

    let owner: String = row
        .try_get("owner")
        .map_err(|error| store_failure(&error, operation))?;
    let last_heartbeat: DateTime<Utc> = row
        .try_get("last_heartbeat")
        .map_err(|error| store_failure(&error, operation))?;
    let last_position: Option<i64> = row
        .try_get("last_position")
        .map_err(|error| store_failure(&error, operation))?;

    let owner = ConsumerId::try_new(owner).map_err(|error| malformed(error.to_string()))?;
    let last_position = last_position
        .map(|value| {
            u64::try_from(value)
                .map(LogPosition::new)
                .map_err(|_| malformed(format!("negative position {value}")))
        })
        .transpose()?;

    Ok(OwnershipRecord {
        owner,
        last_heartbeat: Timestamp::new(last_heartbeat),
        last_position,
    })
}

fn store_failure(error: &sqlx::Error, operation: Operation) -> OwnershipStoreError {
    warn!(
        error = %error,
        operation = %operation,
        "[postgres.database_error] ownership store operation failed"
    );
    OwnershipStoreError::unavailable(operation, error.to_string())
}

const fn unavailable(error: &OwnershipStoreError) -> OwnershipOutcome {
    OwnershipOutcome::StoreUnavailable(error.operation())
}
