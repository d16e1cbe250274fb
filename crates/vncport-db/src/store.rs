//! SeaORM implementation of [`AllocationStore`]
//!
//! `set_if_absent` is a single upsert statement whose update branch only fires
//! when the existing row has expired:
//!
//! ```sql
//! INSERT INTO port_allocations (key, value, expires_at_ms, created_at)
//! VALUES ($1, $2, <db now> + $ttl, $3)
//! ON CONFLICT (key) DO UPDATE
//!     SET value = excluded.value, expires_at_ms = excluded.expires_at_ms,
//!         created_at = excluded.created_at
//!     WHERE port_allocations.expires_at_ms <= <db now>
//! ```
//!
//! A live row makes the statement affect zero rows, so the unique key is the
//! only arbiter between concurrent writers.
//!
//! Expiry is always computed and compared with the database server's clock,
//! never the caller's. Processes with skewed clocks therefore agree on which
//! rows are live. `created_at` is informational and comes from the caller.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict, Query, SimpleExpr};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Statement,
};
use std::time::Duration;
use tracing::debug;
use vncport_store::{AllocationStore, StoreError};

use crate::entities::port_allocation;

/// Allocation store persisted in a SQL database
#[derive(Clone)]
pub struct SqlStore {
    db: DatabaseConnection,
}

impl SqlStore {
    /// Wrap an already migrated connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Underlying connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Current time on the database server, in epoch milliseconds
    pub async fn database_now_ms(&self) -> Result<i64, StoreError> {
        let backend = self.db.get_database_backend();
        let stmt = Statement::from_string(
            backend,
            format!("SELECT {} AS now_ms", now_ms_sql(backend)),
        );

        let row = self
            .db
            .query_one(stmt)
            .await
            .map_err(map_db_err)?
            .ok_or_else(|| StoreError::Backend("clock query returned no row".to_string()))?;

        row.try_get::<i64>("", "now_ms").map_err(map_db_err)
    }

    fn now_ms(&self) -> SimpleExpr {
        Expr::cust(now_ms_sql(self.db.get_database_backend()))
    }

    fn expires_at_ms() -> Expr {
        Expr::col((
            port_allocation::Entity,
            port_allocation::Column::ExpiresAtMs,
        ))
    }
}

/// SQL expression for the server clock in epoch milliseconds
fn now_ms_sql(backend: DatabaseBackend) -> &'static str {
    match backend {
        DatabaseBackend::Postgres => "CAST(EXTRACT(EPOCH FROM now()) * 1000 AS BIGINT)",
        DatabaseBackend::MySql => "CAST(UNIX_TIMESTAMP(NOW(3)) * 1000 AS SIGNED)",
        DatabaseBackend::Sqlite => "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)",
    }
}

fn map_db_err(err: DbErr) -> StoreError {
    match err {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => StoreError::Unavailable(err.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

#[async_trait]
impl AllocationStore for SqlStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let ttl_ms = i64::try_from(ttl.as_millis())
            .map_err(|_| StoreError::Backend(format!("TTL out of range: {:?}", ttl)))?;

        let mut insert = Query::insert();
        insert
            .into_table(port_allocation::Entity)
            .columns([
                port_allocation::Column::Key,
                port_allocation::Column::Value,
                port_allocation::Column::ExpiresAtMs,
                port_allocation::Column::CreatedAt,
            ])
            .values([
                key.into(),
                value.into(),
                self.now_ms().add(ttl_ms),
                Utc::now().into(),
            ])
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        insert.on_conflict(
            OnConflict::column(port_allocation::Column::Key)
                .update_columns([
                    port_allocation::Column::Value,
                    port_allocation::Column::ExpiresAtMs,
                    port_allocation::Column::CreatedAt,
                ])
                .action_and_where(Self::expires_at_ms().lte(self.now_ms()))
                .to_owned(),
        );

        let stmt = self.db.get_database_backend().build(&insert);
        let affected = self
            .db
            .execute(stmt)
            .await
            .map_err(map_db_err)?
            .rows_affected();

        debug!("set_if_absent {} affected {} row(s)", key, affected);
        Ok(affected == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = port_allocation::Entity::find_by_id(key.to_string())
            .filter(Self::expires_at_ms().gt(self.now_ms()))
            .one(&self.db)
            .await
            .map_err(map_db_err)?;

        Ok(row.map(|row| row.value))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let count = port_allocation::Entity::find()
            .filter(port_allocation::Column::Key.eq(key))
            .filter(Self::expires_at_ms().gt(self.now_ms()))
            .count(&self.db)
            .await
            .map_err(map_db_err)?;

        Ok(count > 0)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        port_allocation::Entity::delete_by_id(key.to_string())
            .exec(&self.db)
            .await
            .map_err(map_db_err)?;

        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let rows = port_allocation::Entity::find()
            .filter(port_allocation::Column::Key.starts_with(prefix))
            .filter(Self::expires_at_ms().gt(self.now_ms()))
            .order_by_asc(port_allocation::Column::Key)
            .all(&self.db)
            .await
            .map_err(map_db_err)?;

        // LIKE treats '_' and '%' in the prefix as wildcards
        Ok(rows
            .into_iter()
            .filter(|row| row.key.starts_with(prefix))
            .map(|row| (row.key, row.value))
            .collect())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = port_allocation::Entity::delete_many()
            .filter(Self::expires_at_ms().lte(self.now_ms()))
            .exec(&self.db)
            .await
            .map_err(map_db_err)?;

        Ok(result.rows_affected)
    }
}
