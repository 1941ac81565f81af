//! Postgres-backed inventory store.
//!
//! The `InventoryStore` and `UnitOfWork` traits are synchronous; this store
//! owns a Tokio runtime and blocks on it for every statement, so callers
//! never need an async context of their own.
//!
//! ## Locking
//!
//! A unit of work is one database transaction started with
//! `SET LOCAL lock_timeout`. `*_for_update` methods use `SELECT ... FOR UPDATE`.
//! A projection row that does not exist yet cannot be locked; the first
//! insert for a key uses `ON CONFLICT DO NOTHING` and reports `Conflict` when
//! a concurrent transaction created the row first.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (lock not available) | `55P03` | `Busy` | `lock_timeout` expired |
//! | Database (deadlock detected) | `40P01` | `Busy` | Deadlock victim |
//! | Database (serialization failure) | `40001` | `Busy` | Concurrent update |
//! | Database (unique violation) | `23505` | `Conflict` | Concurrent insert of the same row |
//! | Database (other) | Any other | `Storage` | Constraint or other database errors |
//! | PoolTimedOut | N/A | `Busy` | No connection available in time |
//! | Other | N/A | `Storage` | Network errors, connection failures, etc. |

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;
use tokio::runtime::Runtime;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use stockpro_core::{
    CountItemId, InventoryResult, LocationId, ProductId, SessionId, TransactionId,
};
use stockpro_inventory::{
    CountStatus, CurrentStock, InventoryTransaction, Location, MasterData, Product,
    StockCountItem, StockCountSession, StockKey, TransactionKind,
};

use super::query::{
    Page, Pagination, SessionPage, StockFilter, TransactionFilter, TransactionPage,
};
use super::r#trait::{InventoryStore, StoreError, UnitOfWork};
use crate::config::DatabaseConfig;

const SCHEMA: &str = include_str!("../../migrations/0001_inventory_core.sql");

const TRANSACTION_COLUMNS: &str = "id, kind, product_id, location_id, quantity_change, \
     cost_per_unit, production_date, expiry_date, related_transaction_id, notes, transaction_date";
const STOCK_COLUMNS: &str = "product_id, location_id, quantity, last_updated";
const SESSION_COLUMNS: &str = "id, location_id, status, start_date, end_date, notes";
const ITEM_COLUMNS: &str =
    "id, session_id, product_id, system_quantity, counted_quantity, count_date";

/// Postgres-backed inventory store.
///
/// `Send + Sync`; share it behind an `Arc`. Connections come from a SQLx
/// pool sized by `DatabaseConfig::max_connections`.
#[derive(Debug)]
pub struct PostgresInventoryStore {
    pool: PgPool,
    rt: Runtime,
    lock_timeout_ms: u64,
}

impl PostgresInventoryStore {
    /// Build a runtime and connect the pool.
    pub fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("stockpro-db")
            .enable_all()
            .build()
            .map_err(|e| StoreError::Storage(format!("failed to start runtime: {e}")))?;

        let pool = rt
            .block_on(
                PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect(&config.url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self {
            pool,
            rt,
            lock_timeout_ms: config.lock_timeout_ms,
        })
    }

    /// Create the inventory tables if they do not exist.
    #[instrument(skip(self), err)]
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        self.rt
            .block_on(sqlx::raw_sql(SCHEMA).execute(&self.pool))
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    fn fetch_transactions(
        &self,
        operation: &str,
        sql: &str,
        key: StockKey,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let rows = self
            .rt
            .block_on(
                sqlx::query(sql)
                    .bind(*key.product_id.as_uuid())
                    .bind(*key.location_id.as_uuid())
                    .fetch_all(&self.pool),
            )
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(transaction_from_row).collect()
    }
}

impl InventoryStore for PostgresInventoryStore {
    #[instrument(skip(self), err)]
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        let set_timeout = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms);
        let tx = self.rt.block_on(async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin_transaction", e))?;
            sqlx::query(&set_timeout)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
            Ok::<_, StoreError>(tx)
        })?;

        Ok(Box::new(PgUnitOfWork {
            rt: &self.rt,
            tx: Some(tx),
            existing: HashSet::new(),
        }))
    }

    fn stock(&self, key: StockKey) -> Result<Option<CurrentStock>, StoreError> {
        let sql = format!(
            "SELECT {STOCK_COLUMNS} FROM current_stock WHERE product_id = $1 AND location_id = $2"
        );
        let row = self
            .rt
            .block_on(
                sqlx::query(&sql)
                    .bind(*key.product_id.as_uuid())
                    .bind(*key.location_id.as_uuid())
                    .fetch_optional(&self.pool),
            )
            .map_err(|e| map_sqlx_error("stock", e))?;
        row.as_ref().map(stock_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    fn list_stock(&self, filter: &StockFilter) -> Result<Vec<CurrentStock>, StoreError> {
        let sql = format!(
            "SELECT {STOCK_COLUMNS} FROM current_stock
             WHERE ($1::uuid IS NULL OR product_id = $1)
               AND ($2::uuid IS NULL OR location_id = $2)
               AND (NOT $3 OR quantity < 0)
             ORDER BY location_id, product_id"
        );
        let rows = self
            .rt
            .block_on(
                sqlx::query(&sql)
                    .bind(filter.product_id.map(Uuid::from))
                    .bind(filter.location_id.map(Uuid::from))
                    .bind(filter.negative_only)
                    .fetch_all(&self.pool),
            )
            .map_err(|e| map_sqlx_error("list_stock", e))?;
        rows.iter().map(stock_from_row).collect()
    }

    #[instrument(skip(self), err)]
    fn query_transactions(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<TransactionPage, StoreError> {
        const WHERE: &str = "WHERE ($1::uuid IS NULL OR product_id = $1)
               AND ($2::uuid IS NULL OR location_id = $2)
               AND ($3::text IS NULL OR kind = $3)
               AND ($4::timestamptz IS NULL OR transaction_date >= $4)
               AND ($5::timestamptz IS NULL OR transaction_date < $5)";

        let product = filter.product_id.map(Uuid::from);
        let location = filter.location_id.map(Uuid::from);
        let kind = filter.kind.map(TransactionKind::as_str);
        let from = filter.from_instant();
        let until = filter.until_instant();

        let count_sql = format!("SELECT COUNT(*) AS total FROM inventory_transactions {WHERE}");
        let page_sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM inventory_transactions {WHERE}
             ORDER BY transaction_date DESC, id DESC
             LIMIT $6 OFFSET $7"
        );

        let (total, rows) = self.rt.block_on(async {
            let count_row = sqlx::query(&count_sql)
                .bind(product)
                .bind(location)
                .bind(kind)
                .bind(from)
                .bind(until)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("count_transactions", e))?;
            let total: i64 = count_row.try_get("total").map_err(decode_error)?;

            let rows = sqlx::query(&page_sql)
                .bind(product)
                .bind(location)
                .bind(kind)
                .bind(from)
                .bind(until)
                .bind(i64::from(pagination.limit))
                .bind(i64::from(pagination.offset))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("query_transactions", e))?;
            Ok::<_, StoreError>((total, rows))
        })?;

        let items = rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total.max(0) as u64, pagination))
    }

    fn ledger_for_key(&self, key: StockKey) -> Result<Vec<InventoryTransaction>, StoreError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM inventory_transactions
             WHERE product_id = $1 AND location_id = $2
             ORDER BY transaction_date, id"
        );
        self.fetch_transactions("ledger_for_key", &sql, key)
    }

    #[instrument(skip(self), err)]
    fn near_expiry(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let sql = format!(
            "SELECT {} FROM inventory_transactions t
             JOIN current_stock s
               ON s.product_id = t.product_id AND s.location_id = t.location_id
             WHERE t.kind = 'STOCK_IN'
               AND t.expiry_date BETWEEN $1 AND $2
               AND s.quantity > 0
             ORDER BY t.expiry_date ASC, t.id ASC",
            prefixed("t", TRANSACTION_COLUMNS)
        );
        let rows = self
            .rt
            .block_on(sqlx::query(&sql).bind(from).bind(to).fetch_all(&self.pool))
            .map_err(|e| map_sqlx_error("near_expiry", e))?;
        rows.iter().map(transaction_from_row).collect()
    }

    fn stock_keys(&self) -> Result<Vec<StockKey>, StoreError> {
        let rows = self
            .rt
            .block_on(
                sqlx::query(
                    "SELECT product_id, location_id FROM current_stock
                     UNION
                     SELECT DISTINCT product_id, location_id FROM inventory_transactions
                     ORDER BY location_id, product_id",
                )
                .fetch_all(&self.pool),
            )
            .map_err(|e| map_sqlx_error("stock_keys", e))?;
        rows.iter()
            .map(|row| {
                Ok(StockKey::new(
                    ProductId::from_uuid(row.try_get("product_id").map_err(decode_error)?),
                    LocationId::from_uuid(row.try_get("location_id").map_err(decode_error)?),
                ))
            })
            .collect()
    }

    fn session(&self, id: SessionId) -> Result<Option<StockCountSession>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM stock_count_sessions WHERE id = $1");
        let row = self
            .rt
            .block_on(sqlx::query(&sql).bind(*id.as_uuid()).fetch_optional(&self.pool))
            .map_err(|e| map_sqlx_error("session", e))?;
        row.as_ref().map(session_from_row).transpose()
    }

    fn session_items(&self, id: SessionId) -> Result<Vec<StockCountItem>, StoreError> {
        let sql =
            format!("SELECT {ITEM_COLUMNS} FROM stock_count_items WHERE session_id = $1 ORDER BY id");
        let rows = self
            .rt
            .block_on(sqlx::query(&sql).bind(*id.as_uuid()).fetch_all(&self.pool))
            .map_err(|e| map_sqlx_error("session_items", e))?;
        rows.iter().map(item_from_row).collect()
    }

    fn list_sessions(&self, pagination: Pagination) -> Result<SessionPage, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS}, COUNT(*) OVER () AS total FROM stock_count_sessions
             ORDER BY start_date DESC, id DESC
             LIMIT $1 OFFSET $2"
        );
        let rows = self
            .rt
            .block_on(
                sqlx::query(&sql)
                    .bind(i64::from(pagination.limit))
                    .bind(i64::from(pagination.offset))
                    .fetch_all(&self.pool),
            )
            .map_err(|e| map_sqlx_error("list_sessions", e))?;

        let total = match rows.first() {
            Some(row) => row.try_get::<i64, _>("total").map_err(decode_error)?.max(0) as u64,
            None => 0,
        };
        let sessions = rows
            .iter()
            .map(session_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(sessions, total, pagination))
    }
}

impl MasterData for PostgresInventoryStore {
    fn product(&self, id: ProductId) -> InventoryResult<Option<Product>> {
        let row = self
            .rt
            .block_on(
                sqlx::query(
                    "SELECT id, sku, barcode, name, shelf_life_days, standard_cost
                     FROM products WHERE id = $1",
                )
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool),
            )
            .map_err(|e| map_sqlx_error("product", e))?;
        Ok(row.as_ref().map(product_from_row).transpose()?)
    }

    fn location(&self, id: LocationId) -> InventoryResult<Option<Location>> {
        let row = self
            .rt
            .block_on(
                sqlx::query("SELECT id, name FROM locations WHERE id = $1")
                    .bind(*id.as_uuid())
                    .fetch_optional(&self.pool),
            )
            .map_err(|e| map_sqlx_error("location", e))?;
        Ok(row
            .as_ref()
            .map(|row| {
                Ok::<_, StoreError>(Location {
                    id: LocationId::from_uuid(row.try_get("id").map_err(decode_error)?),
                    name: row.try_get("name").map_err(decode_error)?,
                })
            })
            .transpose()?)
    }
}

/// One database transaction.
///
/// Dropping it without `commit` lets SQLx roll the transaction back.
struct PgUnitOfWork<'a> {
    rt: &'a Runtime,
    /// `None` once committed or rolled back.
    tx: Option<Transaction<'static, Postgres>>,
    /// Keys whose projection row existed when locked.
    existing: HashSet<StockKey>,
}

impl<'a> PgUnitOfWork<'a> {
    fn parts(&mut self) -> Result<(&'a Runtime, &mut PgConnection), StoreError> {
        let rt = self.rt;
        let conn = self.tx.as_deref_mut().ok_or_else(finished)?;
        Ok((rt, conn))
    }
}

// SQLx returns the connection to the pool from a spawned task, which needs
// the runtime; roll back explicitly while it is reachable.
impl Drop for PgUnitOfWork<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(e) = self.rt.block_on(tx.rollback()) {
                warn!(error = %e, "rollback failed");
            }
        }
    }
}

fn finished() -> StoreError {
    StoreError::Storage("unit of work already finished".to_string())
}

impl UnitOfWork for PgUnitOfWork<'_> {
    fn lock_stock(&mut self, keys: &[StockKey]) -> Result<(), StoreError> {
        let mut ordered = keys.to_vec();
        ordered.sort();
        ordered.dedup();
        for key in ordered {
            self.stock_for_update(key)?;
        }
        Ok(())
    }

    fn stock_for_update(&mut self, key: StockKey) -> Result<Option<CurrentStock>, StoreError> {
        let (rt, conn) = self.parts()?;
        let sql = format!(
            "SELECT {STOCK_COLUMNS} FROM current_stock
             WHERE product_id = $1 AND location_id = $2
             FOR UPDATE"
        );
        let row = rt
            .block_on(
                sqlx::query(&sql)
                    .bind(*key.product_id.as_uuid())
                    .bind(*key.location_id.as_uuid())
                    .fetch_optional(&mut *conn),
            )
            .map_err(|e| map_sqlx_error("stock_for_update", e))?;
        debug!(%key, found = row.is_some(), "stock row locked");
        let stock = row.as_ref().map(stock_from_row).transpose()?;
        if stock.is_some() {
            self.existing.insert(key);
        }
        Ok(stock)
    }

    fn stock(&mut self, key: StockKey) -> Result<Option<CurrentStock>, StoreError> {
        let (rt, conn) = self.parts()?;
        let sql = format!(
            "SELECT {STOCK_COLUMNS} FROM current_stock WHERE product_id = $1 AND location_id = $2"
        );
        let row = rt
            .block_on(
                sqlx::query(&sql)
                    .bind(*key.product_id.as_uuid())
                    .bind(*key.location_id.as_uuid())
                    .fetch_optional(&mut *conn),
            )
            .map_err(|e| map_sqlx_error("stock", e))?;
        row.as_ref().map(stock_from_row).transpose()
    }

    fn put_stock(&mut self, row: &CurrentStock) -> Result<(), StoreError> {
        let key = row.key();
        let existed = self.existing.contains(&key);
        let (rt, conn) = self.parts()?;
        if existed {
            rt.block_on(
                sqlx::query(
                    "UPDATE current_stock SET quantity = $3, last_updated = $4
                     WHERE product_id = $1 AND location_id = $2",
                )
                .bind(*row.product_id.as_uuid())
                .bind(*row.location_id.as_uuid())
                .bind(row.quantity)
                .bind(row.last_updated)
                .execute(&mut *conn),
            )
            .map_err(|e| map_sqlx_error("update_stock", e))?;
            return Ok(());
        }

        let inserted = rt
            .block_on(
                sqlx::query(
                    "INSERT INTO current_stock (product_id, location_id, quantity, last_updated)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (product_id, location_id) DO NOTHING",
                )
                .bind(*row.product_id.as_uuid())
                .bind(*row.location_id.as_uuid())
                .bind(row.quantity)
                .bind(row.last_updated)
                .execute(&mut *conn),
            )
            .map_err(|e| map_sqlx_error("insert_stock", e))?;
        if inserted.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "stock row {key} was created by a concurrent transaction"
            )));
        }
        self.existing.insert(key);
        Ok(())
    }

    fn stock_at_location(
        &mut self,
        location_id: LocationId,
    ) -> Result<Vec<CurrentStock>, StoreError> {
        let (rt, conn) = self.parts()?;
        let sql = format!(
            "SELECT {STOCK_COLUMNS} FROM current_stock WHERE location_id = $1 ORDER BY product_id"
        );
        let rows = rt
            .block_on(
                sqlx::query(&sql)
                    .bind(*location_id.as_uuid())
                    .fetch_all(&mut *conn),
            )
            .map_err(|e| map_sqlx_error("stock_at_location", e))?;
        rows.iter().map(stock_from_row).collect()
    }

    fn insert_transaction(&mut self, entry: &InventoryTransaction) -> Result<(), StoreError> {
        let cost = entry.cost_per_unit.map(to_i64).transpose()?;
        let (rt, conn) = self.parts()?;
        rt
            .block_on(
                sqlx::query(
                    "INSERT INTO inventory_transactions (
                        id, kind, product_id, location_id, quantity_change, cost_per_unit,
                        production_date, expiry_date, related_transaction_id, notes, transaction_date
                     ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                )
                .bind(*entry.id.as_uuid())
                .bind(entry.kind.as_str())
                .bind(*entry.product_id.as_uuid())
                .bind(*entry.location_id.as_uuid())
                .bind(entry.quantity_change)
                .bind(cost)
                .bind(entry.production_date)
                .bind(entry.expiry_date)
                .bind(entry.related_transaction_id)
                .bind(entry.notes.as_deref())
                .bind(entry.transaction_date)
                .execute(&mut *conn),
            )
            .map_err(|e| map_sqlx_error("insert_transaction", e))?;
        Ok(())
    }

    fn ledger_sum(&mut self, key: StockKey) -> Result<i64, StoreError> {
        let (rt, conn) = self.parts()?;
        let row = rt
            .block_on(
                sqlx::query(
                    "SELECT COALESCE(SUM(quantity_change), 0)::BIGINT AS total
                     FROM inventory_transactions
                     WHERE product_id = $1 AND location_id = $2",
                )
                .bind(*key.product_id.as_uuid())
                .bind(*key.location_id.as_uuid())
                .fetch_one(&mut *conn),
            )
            .map_err(|e| map_sqlx_error("ledger_sum", e))?;
        row.try_get("total").map_err(decode_error)
    }

    fn session_for_update(
        &mut self,
        id: SessionId,
    ) -> Result<Option<StockCountSession>, StoreError> {
        let (rt, conn) = self.parts()?;
        let sql =
            format!("SELECT {SESSION_COLUMNS} FROM stock_count_sessions WHERE id = $1 FOR UPDATE");
        let row = rt
            .block_on(sqlx::query(&sql).bind(*id.as_uuid()).fetch_optional(&mut *conn))
            .map_err(|e| map_sqlx_error("session_for_update", e))?;
        row.as_ref().map(session_from_row).transpose()
    }

    fn save_session(&mut self, session: &StockCountSession) -> Result<(), StoreError> {
        let (rt, conn) = self.parts()?;
        rt
            .block_on(
                sqlx::query(
                    "INSERT INTO stock_count_sessions (id, location_id, status, start_date, end_date, notes)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (id) DO UPDATE
                     SET status = EXCLUDED.status, end_date = EXCLUDED.end_date, notes = EXCLUDED.notes",
                )
                .bind(*session.id().as_uuid())
                .bind(*session.location_id().as_uuid())
                .bind(session.status().as_str())
                .bind(session.start_date())
                .bind(session.end_date())
                .bind(session.notes())
                .execute(&mut *conn),
            )
            .map_err(|e| map_sqlx_error("save_session", e))?;
        Ok(())
    }

    fn items(&mut self, session_id: SessionId) -> Result<Vec<StockCountItem>, StoreError> {
        let (rt, conn) = self.parts()?;
        let sql =
            format!("SELECT {ITEM_COLUMNS} FROM stock_count_items WHERE session_id = $1 ORDER BY id");
        let rows = rt
            .block_on(
                sqlx::query(&sql)
                    .bind(*session_id.as_uuid())
                    .fetch_all(&mut *conn),
            )
            .map_err(|e| map_sqlx_error("items", e))?;
        rows.iter().map(item_from_row).collect()
    }

    fn item_for_update(&mut self, id: CountItemId) -> Result<Option<StockCountItem>, StoreError> {
        let (rt, conn) = self.parts()?;
        let sql = format!("SELECT {ITEM_COLUMNS} FROM stock_count_items WHERE id = $1 FOR UPDATE");
        let row = rt
            .block_on(sqlx::query(&sql).bind(*id.as_uuid()).fetch_optional(&mut *conn))
            .map_err(|e| map_sqlx_error("item_for_update", e))?;
        row.as_ref().map(item_from_row).transpose()
    }

    fn insert_item(&mut self, item: &StockCountItem) -> Result<(), StoreError> {
        let (rt, conn) = self.parts()?;
        let inserted = rt
            .block_on(
                sqlx::query(
                    "INSERT INTO stock_count_items
                        (id, session_id, product_id, system_quantity, counted_quantity, count_date)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (session_id, product_id) DO NOTHING",
                )
                .bind(*item.id.as_uuid())
                .bind(*item.session_id.as_uuid())
                .bind(*item.product_id.as_uuid())
                .bind(item.system_quantity)
                .bind(item.counted_quantity)
                .bind(item.count_date)
                .execute(&mut *conn),
            )
            .map_err(|e| map_sqlx_error("insert_item", e))?;
        if inserted.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "session {} already has product {}",
                item.session_id, item.product_id
            )));
        }
        Ok(())
    }

    fn save_item(&mut self, item: &StockCountItem) -> Result<(), StoreError> {
        let (rt, conn) = self.parts()?;
        let updated = rt
            .block_on(
                sqlx::query(
                    "UPDATE stock_count_items SET counted_quantity = $2, count_date = $3
                     WHERE id = $1",
                )
                .bind(*item.id.as_uuid())
                .bind(item.counted_quantity)
                .bind(item.count_date)
                .execute(&mut *conn),
            )
            .map_err(|e| map_sqlx_error("save_item", e))?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::Storage(format!("stock count item {} does not exist", item.id)));
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or_else(finished)?;
        self.rt
            .block_on(tx.commit())
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // lock_not_available, deadlock_detected, serialization_failure
                Some("55P03") | Some("40P01") | Some("40001") => StoreError::Busy(msg),
                // unique_violation
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Busy(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Storage(format!("failed to decode row: {err}"))
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Storage(format!("value {value} out of range")))
}

fn to_u64(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Storage(format!("negative amount {value}")))
}

fn prefixed(alias: &str, columns: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn stock_from_row(row: &PgRow) -> Result<CurrentStock, StoreError> {
    Ok(CurrentStock {
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(decode_error)?),
        location_id: LocationId::from_uuid(row.try_get("location_id").map_err(decode_error)?),
        quantity: row.try_get("quantity").map_err(decode_error)?,
        last_updated: row.try_get("last_updated").map_err(decode_error)?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<InventoryTransaction, StoreError> {
    let kind: String = row.try_get("kind").map_err(decode_error)?;
    let cost: Option<i64> = row.try_get("cost_per_unit").map_err(decode_error)?;
    Ok(InventoryTransaction {
        id: TransactionId::from_uuid(row.try_get("id").map_err(decode_error)?),
        kind: kind
            .parse()
            .map_err(|e| StoreError::Storage(format!("{e}")))?,
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(decode_error)?),
        location_id: LocationId::from_uuid(row.try_get("location_id").map_err(decode_error)?),
        quantity_change: row.try_get("quantity_change").map_err(decode_error)?,
        cost_per_unit: cost.map(to_u64).transpose()?,
        production_date: row.try_get("production_date").map_err(decode_error)?,
        expiry_date: row.try_get("expiry_date").map_err(decode_error)?,
        related_transaction_id: row.try_get("related_transaction_id").map_err(decode_error)?,
        notes: row.try_get("notes").map_err(decode_error)?,
        transaction_date: row.try_get("transaction_date").map_err(decode_error)?,
    })
}

fn session_from_row(row: &PgRow) -> Result<StockCountSession, StoreError> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    let status: CountStatus = status
        .parse()
        .map_err(|e| StoreError::Storage(format!("{e}")))?;
    let start_date: DateTime<Utc> = row.try_get("start_date").map_err(decode_error)?;
    Ok(StockCountSession::restore(
        SessionId::from_uuid(row.try_get("id").map_err(decode_error)?),
        LocationId::from_uuid(row.try_get("location_id").map_err(decode_error)?),
        status,
        start_date,
        row.try_get("end_date").map_err(decode_error)?,
        row.try_get("notes").map_err(decode_error)?,
    ))
}

fn item_from_row(row: &PgRow) -> Result<StockCountItem, StoreError> {
    Ok(StockCountItem {
        id: CountItemId::from_uuid(row.try_get("id").map_err(decode_error)?),
        session_id: SessionId::from_uuid(row.try_get("session_id").map_err(decode_error)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(decode_error)?),
        system_quantity: row.try_get("system_quantity").map_err(decode_error)?,
        counted_quantity: row.try_get("counted_quantity").map_err(decode_error)?,
        count_date: row.try_get("count_date").map_err(decode_error)?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let shelf_life: Option<i32> = row.try_get("shelf_life_days").map_err(decode_error)?;
    let cost: Option<i64> = row.try_get("standard_cost").map_err(decode_error)?;
    Ok(Product {
        id: ProductId::from_uuid(row.try_get("id").map_err(decode_error)?),
        sku: row.try_get("sku").map_err(decode_error)?,
        barcode: row.try_get("barcode").map_err(decode_error)?,
        name: row.try_get("name").map_err(decode_error)?,
        shelf_life_days: shelf_life
            .map(|d| {
                u32::try_from(d)
                    .map_err(|_| StoreError::Storage(format!("negative shelf life {d}")))
            })
            .transpose()?,
        standard_cost: cost.map(to_u64).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_every_column() {
        assert_eq!(prefixed("t", "id, kind,notes"), "t.id, t.kind, t.notes");
    }

    #[test]
    fn pool_timeout_is_busy() {
        assert!(matches!(
            map_sqlx_error("begin", sqlx::Error::PoolTimedOut),
            StoreError::Busy(_)
        ));
        assert!(matches!(
            map_sqlx_error("begin", sqlx::Error::PoolClosed),
            StoreError::Storage(_)
        ));
    }

    #[test]
    fn amounts_outside_range_are_rejected() {
        assert!(to_i64(u64::MAX).is_err());
        assert!(to_u64(-1).is_err());
        assert_eq!(to_u64(250).unwrap(), 250);
    }
}
