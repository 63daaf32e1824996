//! PostgreSQL store.
//!
//! The engine API is synchronous, so the store owns a small tokio runtime
//! and drives sqlx on it. Every transaction runs at SERIALIZABLE isolation
//! and stock rows are read `FOR UPDATE`, so two transactions touching the
//! same item queue up instead of both passing the availability check.
//!
//! Do not drop a [`PostgresStore`] from inside another tokio runtime.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tokio::runtime::Runtime;
use tracing::{debug, info};
use uuid::Uuid;

use florist_core::{
    AggregateRoot, CustomerId, Entity, EventId, EventLineId, Money, OrderId, OrderLineId,
    ProductId, StockItemId,
};
use florist_events::{
    Event, EventLine, EventLineKind, EventLineRow, EventState, EventStatus, NewEvent,
};
use florist_inventory::{NewStockItem, StockCategory, StockCounters, StockItem};
use florist_orders::{NewOrder, Order, OrderLine, OrderState};
use florist_products::{NewProduct, Product, ProductStatus, Recipe, RecipeLine};

use super::{Store, StoreTx, check_version};
use crate::config::FloristConfig;
use crate::error::{StoreError, StoreResult};

const SCHEMA: &str = include_str!("schema.sql");

const STOCK_COLUMNS: &str = "id, category, name, variety, colour, location, unit_cost_cents, \
     stock_total, reserved_for_orders, reserved_for_events";

const ORDER_COLUMNS: &str = "id, customer_id, product_id, fulfilment_date, delivery_address, \
     pickup_at_store, state, sale_price_cents, deposit_cents, paid, notes, cancellation_reason, \
     created_at, updated_at, version";

const ORDER_LINE_COLUMNS: &str =
    "id, order_id, stock_item_id, quantity, unit_cost_cents, total_cost_cents, consumed";

const EVENT_COLUMNS: &str = "id, customer_id, event_date, name, venue, notes, state, \
     labour_cost_cents, transport_cost_cents, other_cost_cents, margin_bps, final_price_cents, \
     deposit_cents, reserved, stock_consumed, has_shortages, created_at, updated_at, version";

const EVENT_LINE_COLUMNS: &str = "id, event_id, kind, stock_item_id, product_id, name, quantity, \
     unit_cost_cents, total_cost_cents, reserved, consumed, returned, missing_quantity, notes";

/// PostgreSQL-backed [`Store`].
pub struct PostgresStore {
    pool: PgPool,
    runtime: Runtime,
}

impl PostgresStore {
    /// Connect using `DATABASE_URL` and the pool size from `config`.
    pub fn connect(config: &FloristConfig) -> StoreResult<Self> {
        let url = config
            .require_database_url()
            .map_err(|e| StoreError::backend("connect", e))?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("florist-pg")
            .enable_all()
            .build()
            .map_err(|e| StoreError::backend("connect", e))?;
        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(config.db_max_connections)
                    .connect(url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;
        info!(max_connections = config.db_max_connections, "connected to postgres");
        Ok(Self { pool, runtime })
    }

    /// Create the tables if they do not exist yet.
    pub fn migrate(&self) -> StoreResult<()> {
        self.runtime
            .block_on(sqlx::raw_sql(SCHEMA).execute(&self.pool))
            .map_err(|e| map_sqlx_error("migrate", e))?;
        debug!("schema ensured");
        Ok(())
    }
}

impl Store for PostgresStore {
    type Tx<'a> = PostgresTx<'a>;

    fn begin(&self) -> StoreResult<PostgresTx<'_>> {
        let tx = self
            .runtime
            .block_on(async {
                let mut tx = self.pool.begin().await?;
                sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                    .execute(&mut *tx)
                    .await?;
                Ok::<_, sqlx::Error>(tx)
            })
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PostgresTx {
            runtime: &self.runtime,
            tx: Some(tx),
        })
    }
}

/// Transaction over [`PostgresStore`]. Dropping it rolls back.
pub struct PostgresTx<'a> {
    runtime: &'a Runtime,
    tx: Option<Transaction<'static, Postgres>>,
}

impl<'a> PostgresTx<'a> {
    fn parts(&mut self) -> StoreResult<(&'a Runtime, &mut Transaction<'static, Postgres>)> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| StoreError::backend("transaction", "already finished"))?;
        Ok((self.runtime, tx))
    }

    fn order_lines(&mut self, order_ids: Vec<Uuid>) -> StoreResult<HashMap<Uuid, Vec<OrderLine>>> {
        let (rt, tx) = self.parts()?;
        let sql = format!(
            "SELECT {ORDER_LINE_COLUMNS} FROM order_lines \
             WHERE order_id = ANY($1) ORDER BY order_id, position"
        );
        let rows = rt
            .block_on(sqlx::query(&sql).bind(order_ids).fetch_all(&mut **tx))
            .map_err(|e| map_sqlx_error("load_order_lines", e))?;

        let mut lines: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in &rows {
            let line = order_line_from_row(row)?;
            lines
                .entry(*line.order_id.as_uuid())
                .or_default()
                .push(line);
        }
        Ok(lines)
    }

    fn event_lines(&mut self, event_ids: Vec<Uuid>) -> StoreResult<HashMap<Uuid, Vec<EventLine>>> {
        let (rt, tx) = self.parts()?;
        let sql = format!(
            "SELECT {EVENT_LINE_COLUMNS} FROM event_lines \
             WHERE event_id = ANY($1) ORDER BY event_id, position"
        );
        let rows = rt
            .block_on(sqlx::query(&sql).bind(event_ids).fetch_all(&mut **tx))
            .map_err(|e| map_sqlx_error("load_event_lines", e))?;

        let mut lines: HashMap<Uuid, Vec<EventLine>> = HashMap::new();
        for row in &rows {
            let line = event_line_from_row(row)?;
            lines
                .entry(*line.event_id.as_uuid())
                .or_default()
                .push(line);
        }
        Ok(lines)
    }

    fn orders_from_rows(&mut self, rows: Vec<PgRow>) -> StoreResult<Vec<Order>> {
        let ids = rows
            .iter()
            .map(|r| col::<Uuid>(r, "id"))
            .collect::<StoreResult<Vec<_>>>()?;
        let mut lines = self.order_lines(ids)?;
        rows.iter()
            .map(|row| {
                let id: Uuid = col(row, "id")?;
                order_from_row(row, lines.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    fn events_from_rows(&mut self, rows: Vec<PgRow>) -> StoreResult<Vec<Event>> {
        let ids = rows
            .iter()
            .map(|r| col::<Uuid>(r, "id"))
            .collect::<StoreResult<Vec<_>>>()?;
        let mut lines = self.event_lines(ids)?;
        rows.iter()
            .map(|row| {
                let id: Uuid = col(row, "id")?;
                event_from_row(row, lines.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    fn stored_version(&mut self, table: &'static str, id: Uuid) -> StoreResult<Option<u64>> {
        let (rt, tx) = self.parts()?;
        let sql = format!("SELECT version FROM {table} WHERE id = $1");
        let stored: Option<i64> = rt
            .block_on(sqlx::query_scalar(&sql).bind(id).fetch_optional(&mut **tx))
            .map_err(|e| map_sqlx_error("load_version", e))?;
        stored.map(|v| to_u64(v, "version")).transpose()
    }
}

impl StoreTx for PostgresTx<'_> {
    fn load_stock_item(&mut self, id: &StockItemId) -> StoreResult<Option<StockItem>> {
        let (rt, tx) = self.parts()?;
        let sql = format!("SELECT {STOCK_COLUMNS} FROM stock_items WHERE id = $1 FOR UPDATE");
        let row = rt
            .block_on(sqlx::query(&sql).bind(id.as_str()).fetch_optional(&mut **tx))
            .map_err(|e| map_sqlx_error("load_stock_item", e))?;
        row.as_ref().map(stock_item_from_row).transpose()
    }

    fn read_stock_items(&mut self, ids: &[StockItemId]) -> StoreResult<Vec<StockItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        let (rt, tx) = self.parts()?;
        let sql = format!("SELECT {STOCK_COLUMNS} FROM stock_items WHERE id = ANY($1) ORDER BY id");
        let rows = rt
            .block_on(sqlx::query(&sql).bind(keys).fetch_all(&mut **tx))
            .map_err(|e| map_sqlx_error("read_stock_items", e))?;
        rows.iter().map(stock_item_from_row).collect()
    }

    fn list_stock_items(&mut self, category: Option<StockCategory>) -> StoreResult<Vec<StockItem>> {
        let (rt, tx) = self.parts()?;
        let sql = format!(
            "SELECT {STOCK_COLUMNS} FROM stock_items \
             WHERE $1::text IS NULL OR category = $1 ORDER BY id"
        );
        let rows = rt
            .block_on(
                sqlx::query(&sql)
                    .bind(category.map(|c| c.as_str()))
                    .fetch_all(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("list_stock_items", e))?;
        rows.iter().map(stock_item_from_row).collect()
    }

    fn save_stock_item(&mut self, item: &StockItem) -> StoreResult<()> {
        let (rt, tx) = self.parts()?;
        let query = sqlx::query(
            r#"
            INSERT INTO stock_items (id, category, name, variety, colour, location,
                unit_cost_cents, stock_total, reserved_for_orders, reserved_for_events)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                category = EXCLUDED.category,
                name = EXCLUDED.name,
                variety = EXCLUDED.variety,
                colour = EXCLUDED.colour,
                location = EXCLUDED.location,
                unit_cost_cents = EXCLUDED.unit_cost_cents,
                stock_total = EXCLUDED.stock_total,
                reserved_for_orders = EXCLUDED.reserved_for_orders,
                reserved_for_events = EXCLUDED.reserved_for_events
            "#,
        )
        .bind(item.id().as_str())
        .bind(item.category().as_str())
        .bind(item.name())
        .bind(item.variety())
        .bind(item.colour())
        .bind(item.location())
        .bind(item.unit_cost().cents())
        .bind(item.stock_total())
        .bind(item.reserved_for_orders())
        .bind(item.reserved_for_events());
        rt.block_on(query.execute(&mut **tx))
            .map_err(|e| map_sqlx_error("save_stock_item", e))?;
        Ok(())
    }

    fn load_product(&mut self, id: ProductId) -> StoreResult<Option<Product>> {
        let (rt, tx) = self.parts()?;
        let (row, recipe_rows) = rt
            .block_on(async {
                let row = sqlx::query(
                    "SELECT id, name, category, sale_price_cents, status FROM products WHERE id = $1",
                )
                .bind(id.as_uuid())
                .fetch_optional(&mut **tx)
                .await?;
                let recipe_rows = sqlx::query(
                    "SELECT stock_item_id, quantity, unit, optional FROM recipe_lines \
                     WHERE product_id = $1 ORDER BY position",
                )
                .bind(id.as_uuid())
                .fetch_all(&mut **tx)
                .await?;
                Ok::<_, sqlx::Error>((row, recipe_rows))
            })
            .map_err(|e| map_sqlx_error("load_product", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let lines = recipe_rows
            .iter()
            .map(|r| {
                Ok(RecipeLine {
                    stock_item_id: StockItemId::new(col::<String>(r, "stock_item_id")?),
                    quantity: col(r, "quantity")?,
                    unit: col(r, "unit")?,
                    optional: col(r, "optional")?,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        let recipe = Recipe::new(lines).map_err(corrupt)?;
        let status: String = col(&row, "status")?;
        let status = ProductStatus::parse(&status)
            .ok_or_else(|| StoreError::corrupt(format!("unknown product status {status:?}")))?;
        let input = NewProduct {
            id: ProductId::from_uuid(col(&row, "id")?),
            name: col(&row, "name")?,
            category: col(&row, "category")?,
            sale_price: Money::from_cents(col(&row, "sale_price_cents")?),
        };
        Product::restore(input, status, recipe)
            .map(Some)
            .map_err(corrupt)
    }

    fn save_product(&mut self, product: &Product) -> StoreResult<()> {
        let (rt, tx) = self.parts()?;
        rt.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO products (id, name, category, sale_price_cents, status)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    category = EXCLUDED.category,
                    sale_price_cents = EXCLUDED.sale_price_cents,
                    status = EXCLUDED.status
                "#,
            )
            .bind(product.id().as_uuid())
            .bind(product.name())
            .bind(product.category())
            .bind(product.sale_price().cents())
            .bind(product.status().as_str())
            .execute(&mut **tx)
            .await?;

            sqlx::query("DELETE FROM recipe_lines WHERE product_id = $1")
                .bind(product.id().as_uuid())
                .execute(&mut **tx)
                .await?;
            for (position, line) in product.recipe().lines().iter().enumerate() {
                sqlx::query(
                    "INSERT INTO recipe_lines (product_id, position, stock_item_id, quantity, unit, optional) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(product.id().as_uuid())
                .bind(position as i32)
                .bind(line.stock_item_id.as_str())
                .bind(line.quantity)
                .bind(&line.unit)
                .bind(line.optional)
                .execute(&mut **tx)
                .await?;
            }
            Ok::<_, sqlx::Error>(())
        })
        .map_err(|e| map_sqlx_error("save_product", e))
    }

    fn load_order(&mut self, id: OrderId) -> StoreResult<Option<Order>> {
        let (rt, tx) = self.parts()?;
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = rt
            .block_on(sqlx::query(&sql).bind(id.as_uuid()).fetch_optional(&mut **tx))
            .map_err(|e| map_sqlx_error("load_order", e))?;
        Ok(self.orders_from_rows(row.into_iter().collect())?.pop())
    }

    fn list_orders(&mut self, states: Option<&[OrderState]>) -> StoreResult<Vec<Order>> {
        let (rt, tx) = self.parts()?;
        let states: Option<Vec<String>> =
            states.map(|s| s.iter().map(|state| state.as_str().to_string()).collect());
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE $1::text[] IS NULL OR state = ANY($1) ORDER BY id"
        );
        let rows = rt
            .block_on(sqlx::query(&sql).bind(states).fetch_all(&mut **tx))
            .map_err(|e| map_sqlx_error("list_orders", e))?;
        self.orders_from_rows(rows)
    }

    fn save_order(&mut self, order: &Order) -> StoreResult<()> {
        let stored = self.stored_version("orders", *order.id().as_uuid())?;
        check_version(order, stored, "save_order")?;

        let (rt, tx) = self.parts()?;
        rt.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO orders (id, customer_id, product_id, fulfilment_date, delivery_address,
                    pickup_at_store, state, sale_price_cents, deposit_cents, paid, notes,
                    cancellation_reason, created_at, updated_at, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                ON CONFLICT (id) DO UPDATE SET
                    product_id = EXCLUDED.product_id,
                    fulfilment_date = EXCLUDED.fulfilment_date,
                    delivery_address = EXCLUDED.delivery_address,
                    pickup_at_store = EXCLUDED.pickup_at_store,
                    state = EXCLUDED.state,
                    sale_price_cents = EXCLUDED.sale_price_cents,
                    deposit_cents = EXCLUDED.deposit_cents,
                    paid = EXCLUDED.paid,
                    notes = EXCLUDED.notes,
                    cancellation_reason = EXCLUDED.cancellation_reason,
                    updated_at = EXCLUDED.updated_at,
                    version = EXCLUDED.version
                "#,
            )
            .bind(order.id().as_uuid())
            .bind(order.customer_id().as_uuid())
            .bind(order.product_id().map(|p| *p.as_uuid()))
            .bind(order.fulfilment_date())
            .bind(order.delivery_address())
            .bind(order.pickup_at_store())
            .bind(order.state().as_str())
            .bind(order.sale_price().cents())
            .bind(order.deposit().cents())
            .bind(order.paid())
            .bind(order.notes())
            .bind(order.cancellation_reason())
            .bind(order.created_at())
            .bind(order.updated_at())
            .bind(order.version() as i64)
            .execute(&mut **tx)
            .await?;

            sqlx::query("DELETE FROM order_lines WHERE order_id = $1")
                .bind(order.id().as_uuid())
                .execute(&mut **tx)
                .await?;
            for (position, line) in order.lines().iter().enumerate() {
                sqlx::query(
                    "INSERT INTO order_lines (id, order_id, position, stock_item_id, quantity, \
                     unit_cost_cents, total_cost_cents, consumed) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                )
                .bind(line.id.as_uuid())
                .bind(line.order_id.as_uuid())
                .bind(position as i32)
                .bind(line.stock_item_id.as_str())
                .bind(line.quantity)
                .bind(line.unit_cost.cents())
                .bind(line.total_cost.cents())
                .bind(line.consumed)
                .execute(&mut **tx)
                .await?;
            }
            Ok::<_, sqlx::Error>(())
        })
        .map_err(|e| map_sqlx_error("save_order", e))
    }

    fn delete_order(&mut self, id: OrderId) -> StoreResult<bool> {
        let (rt, tx) = self.parts()?;
        let result = rt
            .block_on(
                sqlx::query("DELETE FROM orders WHERE id = $1")
                    .bind(id.as_uuid())
                    .execute(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("delete_order", e))?;
        Ok(result.rows_affected() > 0)
    }

    fn load_event(&mut self, id: EventId) -> StoreResult<Option<Event>> {
        let (rt, tx) = self.parts()?;
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        let row = rt
            .block_on(sqlx::query(&sql).bind(id.as_uuid()).fetch_optional(&mut **tx))
            .map_err(|e| map_sqlx_error("load_event", e))?;
        Ok(self.events_from_rows(row.into_iter().collect())?.pop())
    }

    fn list_events(&mut self) -> StoreResult<Vec<Event>> {
        let (rt, tx) = self.parts()?;
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY id");
        let rows = rt
            .block_on(sqlx::query(&sql).fetch_all(&mut **tx))
            .map_err(|e| map_sqlx_error("list_events", e))?;
        self.events_from_rows(rows)
    }

    fn save_event(&mut self, event: &Event) -> StoreResult<()> {
        let stored = self.stored_version("events", *event.id().as_uuid())?;
        check_version(event, stored, "save_event")?;

        let (rt, tx) = self.parts()?;
        rt.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO events (id, customer_id, event_date, name, venue, notes, state,
                    labour_cost_cents, transport_cost_cents, other_cost_cents, margin_bps,
                    final_price_cents, deposit_cents, cost_inputs_cents, cost_total_cents,
                    proposal_price_cents, balance_cents, reserved, stock_consumed, has_shortages,
                    created_at, updated_at, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23)
                ON CONFLICT (id) DO UPDATE SET
                    event_date = EXCLUDED.event_date,
                    name = EXCLUDED.name,
                    venue = EXCLUDED.venue,
                    notes = EXCLUDED.notes,
                    state = EXCLUDED.state,
                    labour_cost_cents = EXCLUDED.labour_cost_cents,
                    transport_cost_cents = EXCLUDED.transport_cost_cents,
                    other_cost_cents = EXCLUDED.other_cost_cents,
                    margin_bps = EXCLUDED.margin_bps,
                    final_price_cents = EXCLUDED.final_price_cents,
                    deposit_cents = EXCLUDED.deposit_cents,
                    cost_inputs_cents = EXCLUDED.cost_inputs_cents,
                    cost_total_cents = EXCLUDED.cost_total_cents,
                    proposal_price_cents = EXCLUDED.proposal_price_cents,
                    balance_cents = EXCLUDED.balance_cents,
                    reserved = EXCLUDED.reserved,
                    stock_consumed = EXCLUDED.stock_consumed,
                    has_shortages = EXCLUDED.has_shortages,
                    updated_at = EXCLUDED.updated_at,
                    version = EXCLUDED.version
                "#,
            )
            .bind(event.id().as_uuid())
            .bind(event.customer_id().as_uuid())
            .bind(event.event_date())
            .bind(event.name())
            .bind(event.venue())
            .bind(event.notes())
            .bind(event.state().as_str())
            .bind(event.labour_cost().cents())
            .bind(event.transport_cost().cents())
            .bind(event.other_cost().cents())
            .bind(event.margin_bps() as i32)
            .bind(event.final_price().map(Money::cents))
            .bind(event.deposit().cents())
            .bind(event.cost_inputs().cents())
            .bind(event.cost_total().cents())
            .bind(event.proposal_price().cents())
            .bind(event.balance().cents())
            .bind(event.reserved())
            .bind(event.stock_consumed())
            .bind(event.has_shortages())
            .bind(event.created_at())
            .bind(event.updated_at())
            .bind(event.version() as i64)
            .execute(&mut **tx)
            .await?;

            sqlx::query("DELETE FROM event_lines WHERE event_id = $1")
                .bind(event.id().as_uuid())
                .execute(&mut **tx)
                .await?;
            for (position, line) in event.lines().iter().enumerate() {
                let reference = EventLineRow::from(&line.kind);
                sqlx::query(
                    "INSERT INTO event_lines (id, event_id, position, kind, stock_item_id, \
                     product_id, name, quantity, unit_cost_cents, total_cost_cents, reserved, \
                     consumed, returned, missing_quantity, notes) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
                )
                .bind(line.id.as_uuid())
                .bind(line.event_id.as_uuid())
                .bind(position as i32)
                .bind(&reference.kind)
                .bind(reference.stock_item_id.as_deref())
                .bind(reference.product_id.map(|p| *p.as_uuid()))
                .bind(reference.name.as_deref())
                .bind(line.quantity)
                .bind(line.unit_cost.cents())
                .bind(line.total_cost.cents())
                .bind(line.reserved)
                .bind(line.consumed)
                .bind(line.returned)
                .bind(line.missing_quantity)
                .bind(line.notes.as_deref())
                .execute(&mut **tx)
                .await?;
            }
            Ok::<_, sqlx::Error>(())
        })
        .map_err(|e| map_sqlx_error("save_event", e))
    }

    fn commit(mut self) -> StoreResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::backend("commit", "already finished"))?;
        self.runtime
            .block_on(tx.commit())
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

impl Drop for PostgresTx<'_> {
    fn drop(&mut self) {
        // Returning the connection to the pool spawns onto the runtime.
        if let Some(tx) = self.tx.take() {
            let _guard = self.runtime.enter();
            drop(tx);
        }
    }
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001") | Some("40P01") => StoreError::SerializationConflict(operation),
            _ => StoreError::backend(operation, db_err.message()),
        },
        sqlx::Error::RowNotFound => StoreError::backend(operation, "row not found"),
        other => StoreError::backend(operation, other),
    }
}

fn corrupt(err: impl ToString) -> StoreError {
    StoreError::corrupt(err.to_string())
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::corrupt(format!("column {name}: {e}")))
}

fn to_u64(value: i64, column: &str) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::corrupt(format!("negative {column}: {value}")))
}

fn stock_item_from_row(row: &PgRow) -> StoreResult<StockItem> {
    let category: String = col(row, "category")?;
    let category = StockCategory::parse(&category)
        .ok_or_else(|| StoreError::corrupt(format!("unknown stock category {category:?}")))?;
    let counters = StockCounters {
        stock_total: col(row, "stock_total")?,
        reserved_for_orders: col(row, "reserved_for_orders")?,
        reserved_for_events: col(row, "reserved_for_events")?,
    };
    let input = NewStockItem {
        id: StockItemId::new(col::<String>(row, "id")?),
        category,
        name: col(row, "name")?,
        variety: col(row, "variety")?,
        colour: col(row, "colour")?,
        location: col(row, "location")?,
        unit_cost: Money::from_cents(col(row, "unit_cost_cents")?),
        stock_total: counters.stock_total,
    };
    StockItem::restore(input, counters).map_err(corrupt)
}

fn order_line_from_row(row: &PgRow) -> StoreResult<OrderLine> {
    Ok(OrderLine {
        id: OrderLineId::from_uuid(col(row, "id")?),
        order_id: OrderId::from_uuid(col(row, "order_id")?),
        stock_item_id: StockItemId::new(col::<String>(row, "stock_item_id")?),
        quantity: col(row, "quantity")?,
        unit_cost: Money::from_cents(col(row, "unit_cost_cents")?),
        total_cost: Money::from_cents(col(row, "total_cost_cents")?),
        consumed: col(row, "consumed")?,
    })
}

fn order_from_row(row: &PgRow, lines: Vec<OrderLine>) -> StoreResult<Order> {
    let state: String = col(row, "state")?;
    let state = OrderState::parse(&state)
        .ok_or_else(|| StoreError::corrupt(format!("unknown order state {state:?}")))?;
    let fulfilment_date: NaiveDate = col(row, "fulfilment_date")?;
    let created_at: DateTime<Utc> = col(row, "created_at")?;
    let updated_at: DateTime<Utc> = col(row, "updated_at")?;
    let input = NewOrder {
        id: OrderId::from_uuid(col(row, "id")?),
        customer_id: CustomerId::from_uuid(col(row, "customer_id")?),
        product_id: col::<Option<Uuid>>(row, "product_id")?.map(ProductId::from_uuid),
        fulfilment_date,
        delivery_address: col(row, "delivery_address")?,
        pickup_at_store: col(row, "pickup_at_store")?,
        sale_price: Money::from_cents(col(row, "sale_price_cents")?),
        deposit: Money::from_cents(col(row, "deposit_cents")?),
        notes: col(row, "notes")?,
    };
    Ok(Order::restore(
        input,
        state,
        col(row, "paid")?,
        col(row, "cancellation_reason")?,
        lines,
        created_at,
        updated_at,
        to_u64(col(row, "version")?, "version")?,
    ))
}

fn event_line_from_row(row: &PgRow) -> StoreResult<EventLine> {
    let reference = EventLineRow {
        kind: col(row, "kind")?,
        stock_item_id: col(row, "stock_item_id")?,
        product_id: col::<Option<Uuid>>(row, "product_id")?.map(ProductId::from_uuid),
        name: col(row, "name")?,
    };
    Ok(EventLine {
        id: EventLineId::from_uuid(col(row, "id")?),
        event_id: EventId::from_uuid(col(row, "event_id")?),
        kind: EventLineKind::try_from(reference).map_err(corrupt)?,
        quantity: col(row, "quantity")?,
        unit_cost: Money::from_cents(col(row, "unit_cost_cents")?),
        total_cost: Money::from_cents(col(row, "total_cost_cents")?),
        reserved: col(row, "reserved")?,
        consumed: col(row, "consumed")?,
        returned: col(row, "returned")?,
        missing_quantity: col(row, "missing_quantity")?,
        notes: col(row, "notes")?,
    })
}

fn event_from_row(row: &PgRow, lines: Vec<EventLine>) -> StoreResult<Event> {
    let state: String = col(row, "state")?;
    let state = EventState::parse(&state)
        .ok_or_else(|| StoreError::corrupt(format!("unknown event state {state:?}")))?;
    let margin_bps: i32 = col(row, "margin_bps")?;
    let input = NewEvent {
        id: EventId::from_uuid(col(row, "id")?),
        customer_id: CustomerId::from_uuid(col(row, "customer_id")?),
        event_date: col(row, "event_date")?,
        name: col(row, "name")?,
        venue: col(row, "venue")?,
        notes: col(row, "notes")?,
        labour_cost: Money::from_cents(col(row, "labour_cost_cents")?),
        transport_cost: Money::from_cents(col(row, "transport_cost_cents")?),
        other_cost: Money::from_cents(col(row, "other_cost_cents")?),
        margin_bps: u32::try_from(margin_bps)
            .map_err(|_| StoreError::corrupt(format!("negative margin {margin_bps}")))?,
        deposit: Money::from_cents(col(row, "deposit_cents")?),
    };
    let status = EventStatus {
        state,
        final_price: col::<Option<i64>>(row, "final_price_cents")?.map(Money::from_cents),
        reserved: col(row, "reserved")?,
        stock_consumed: col(row, "stock_consumed")?,
        has_shortages: col(row, "has_shortages")?,
    };
    Event::restore(
        input,
        status,
        lines,
        col(row, "created_at")?,
        col(row, "updated_at")?,
        to_u64(col(row, "version")?, "version")?,
    )
    .map_err(corrupt)
}
