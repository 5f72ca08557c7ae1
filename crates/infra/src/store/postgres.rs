//! Postgres-backed stock store.
//!
//! A write transaction loads only the rows its [`LoadScope`] reaches. It
//! first reads the targeted movements to learn what they moved, then takes
//! one transaction-scoped advisory lock per spare part reference, equipment
//! tag and serialized unit (in sorted order), and finally loads the stock
//! rows and targeted movements `FOR UPDATE`. Writers touching disjoint stock
//! run concurrently. Commit writes back only the rows that changed (see
//! [`InventoryState::diff`]); dropping the transaction rolls it back.
//!
//! Reads run in a `REPEATABLE READ, READ ONLY` transaction with filtering and
//! paging done in SQL.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Domain(Conflict)` |
//! | anything else | any | `Database` |

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{instrument, Span};
use uuid::Uuid;

use fieldstock_core::{
    BatchId, ConnectionId, DomainError, EquipmentId, MovementId, RegionId, SerializedItemId,
    SparePartId, UserId, ZoneId,
};
use fieldstock_inventory::{
    Connection, Equipment, EquipmentStock, InventoryState, LoadScope, MovableKind, MovableRef,
    MovementFilter, MovementType, Page, PageRequest, Region, RegionHolding, SerializedItem,
    SparePart, SparePartStock, StateDiff, StockMovement, Zone,
};

use super::{StockStore, StockTransaction, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS regions (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS zones (
        id UUID PRIMARY KEY,
        region_id UUID NOT NULL,
        name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS connections (
        id UUID PRIMARY KEY,
        zone_id UUID NOT NULL,
        customer TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS spare_parts (
        id UUID PRIMARY KEY,
        reference TEXT NOT NULL,
        name TEXT NOT NULL,
        unit TEXT,
        region_id UUID NOT NULL,
        quantity BIGINT NOT NULL CHECK (quantity >= 0),
        UNIQUE (reference, region_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS equipment (
        id UUID PRIMARY KEY,
        tag TEXT NOT NULL,
        brand TEXT,
        model TEXT,
        equipment_type TEXT,
        region_id UUID NOT NULL,
        quantity BIGINT NOT NULL CHECK (quantity >= 0),
        parent_id UUID
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS serialized_items (
        id UUID PRIMARY KEY,
        kind TEXT NOT NULL,
        serial TEXT NOT NULL,
        region_id UUID,
        zone_id UUID,
        connection_id UUID,
        meter_id UUID,
        quantity BIGINT NOT NULL CHECK (quantity >= 0),
        UNIQUE (kind, serial)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_movements (
        id UUID PRIMARY KEY,
        batch_id UUID NOT NULL,
        line_no INTEGER NOT NULL,
        movable_type TEXT NOT NULL,
        movable_id UUID NOT NULL,
        movement_type TEXT NOT NULL,
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        source_region_id UUID,
        destination_region_id UUID,
        date DATE NOT NULL,
        notes TEXT,
        user_id UUID NOT NULL,
        responsible_user_id UUID,
        intended_for_user_id UUID,
        stock_at_movement BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS stock_movements_batch_idx ON stock_movements (batch_id, line_no)",
    r#"
    CREATE INDEX IF NOT EXISTS stock_movements_movable_idx
        ON stock_movements (movable_type, movable_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS stock_movements_date_idx
        ON stock_movements (date DESC, created_at DESC)
    "#,
    "CREATE INDEX IF NOT EXISTS spare_parts_region_idx ON spare_parts (region_id)",
    "CREATE INDEX IF NOT EXISTS equipment_tag_idx ON equipment (tag)",
    "CREATE INDEX IF NOT EXISTS equipment_region_idx ON equipment (region_id)",
    "CREATE INDEX IF NOT EXISTS serialized_items_region_idx ON serialized_items (region_id)",
];

const SPARE_PART_COLUMNS: &str = "id, reference, name, unit, region_id, quantity";

const EQUIPMENT_COLUMNS: &str =
    "id, tag, brand, model, equipment_type, region_id, quantity, parent_id";

const SERIALIZED_COLUMNS: &str =
    "id, kind, serial, region_id, zone_id, connection_id, meter_id, quantity";

const MOVEMENT_COLUMNS: &str = "id, batch_id, line_no, movable_type, movable_id, movement_type, \
     quantity, source_region_id, destination_region_id, date, notes, \
     user_id, responsible_user_id, intended_for_user_id, \
     stock_at_movement, created_at";

/// Postgres-backed stock store.
///
/// Uses a SQLx connection pool; cheap to clone and share across tasks.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the inventory tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    /// Read-only transaction over one consistent snapshot.
    async fn begin_read(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;
        Ok(tx)
    }
}

async fn finish_read(tx: Transaction<'static, Postgres>) -> Result<(), StoreError> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback", e))
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
    baseline: InventoryState,
    working: InventoryState,
}

#[async_trait]
impl StockTransaction for PostgresTransaction {
    fn state(&self) -> &InventoryState {
        &self.working
    }

    fn state_mut(&mut self) -> &mut InventoryState {
        &mut self.working
    }

    #[instrument(skip(self), fields(upserted, deleted), err)]
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresTransaction {
            mut tx,
            baseline,
            working,
        } = *self;

        let diff = baseline.diff(&working);
        if !diff.is_empty() {
            write_diff(&mut tx, &diff).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    #[instrument(skip(self, scope), fields(lock_count, movement_count, row_count), err)]
    async fn begin(&self, scope: &LoadScope) -> Result<Box<dyn StockTransaction>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let baseline = load_scoped(&mut tx, scope).await?;
        let working = baseline.clone();
        Ok(Box::new(PostgresTransaction {
            tx,
            baseline,
            working,
        }))
    }

    #[instrument(skip_all, fields(page = page.page, per_page = page.per_page), err)]
    async fn list_movements(
        &self,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> Result<Page<StockMovement>, StoreError> {
        let mut tx = self.begin_read().await?;

        let mut count: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM stock_movements");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("count_stock_movements", e))?;

        let mut select: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements"));
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY date DESC, created_at DESC, batch_id DESC, line_no DESC")
            .push(" LIMIT ")
            .push_bind(i64::from(page.per_page))
            .push(" OFFSET ")
            .push_bind(i64::try_from(page.offset()).unwrap_or(i64::MAX));
        let rows = select
            .build()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("list_stock_movements", e))?;
        let items = decode(rows, "list_stock_movements", movement_from_row)?;

        finish_read(tx).await?;
        Ok(Page::new(items, u64::try_from(total).unwrap_or(0), page))
    }

    #[instrument(skip(self), err)]
    async fn get_movement(&self, id: MovementId) -> Result<StockMovement, StoreError> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_stock_movement", e))?
            .ok_or_else(|| DomainError::not_found("stock movement", id))?;
        movement_from_row(&row).map_err(|e| map_sqlx_error("get_stock_movement", e))
    }

    #[instrument(skip(self), err)]
    async fn spare_part_stock(&self, reference: &str) -> Result<SparePartStock, StoreError> {
        let mut tx = self.begin_read().await?;
        let mut state = InventoryState::new();

        let sql = format!("SELECT {SPARE_PART_COLUMNS} FROM spare_parts WHERE reference = $1");
        let rows = fetch_all(&mut tx, "load_spare_parts", sqlx::query(&sql).bind(reference)).await?;
        for part in decode(rows, "load_spare_parts", spare_part_from_row)? {
            state.spare_parts.load(part);
        }
        let regions = uuids(state.spare_parts.rows().values().map(|p| p.region_id));
        load_regions(&mut tx, regions, &mut state).await?;

        finish_read(tx).await?;
        Ok(state.spare_part_stock(reference)?)
    }

    #[instrument(skip(self), err)]
    async fn equipment_stock(&self, tag: &str) -> Result<EquipmentStock, StoreError> {
        let mut tx = self.begin_read().await?;
        let mut state = InventoryState::new();

        let sql = format!("SELECT {EQUIPMENT_COLUMNS} FROM equipment WHERE tag = $1");
        let rows = fetch_all(&mut tx, "load_equipment", sqlx::query(&sql).bind(tag)).await?;
        for equipment in decode(rows, "load_equipment", equipment_from_row)? {
            state.equipment.load(equipment);
        }
        let regions = uuids(state.equipment.rows().values().map(|e| e.region_id));
        load_regions(&mut tx, regions, &mut state).await?;

        finish_read(tx).await?;
        Ok(state.equipment_stock(tag)?)
    }

    #[instrument(skip(self), err)]
    async fn region_stock(&self, region: RegionId) -> Result<Vec<RegionHolding>, StoreError> {
        let mut tx = self.begin_read().await?;
        let mut state = InventoryState::new();
        let region_id = *region.as_uuid();

        load_regions(&mut tx, vec![region_id], &mut state).await?;

        let sql = format!("SELECT {SPARE_PART_COLUMNS} FROM spare_parts WHERE region_id = $1");
        let rows = fetch_all(&mut tx, "load_spare_parts", sqlx::query(&sql).bind(region_id)).await?;
        for part in decode(rows, "load_spare_parts", spare_part_from_row)? {
            state.spare_parts.load(part);
        }

        let sql = format!(
            "SELECT {EQUIPMENT_COLUMNS} FROM equipment WHERE region_id = $1 AND parent_id IS NULL"
        );
        let rows = fetch_all(&mut tx, "load_equipment", sqlx::query(&sql).bind(region_id)).await?;
        for equipment in decode(rows, "load_equipment", equipment_from_row)? {
            state.equipment.load(equipment);
        }

        let sql = format!("SELECT {SERIALIZED_COLUMNS} FROM serialized_items WHERE region_id = $1");
        let rows = fetch_all(
            &mut tx,
            "load_serialized_items",
            sqlx::query(&sql).bind(region_id),
        )
        .await?;
        for unit in decode(rows, "load_serialized_items", serialized_from_row)? {
            state.serialized.load(unit);
        }

        finish_read(tx).await?;
        Ok(state.region_stock(region)?)
    }
}

/// Restrict a movement query to the rows `filter` matches.
fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &MovementFilter) {
    query.push(" WHERE TRUE");
    if let Some(kind) = filter.kind {
        query.push(" AND movable_type = ").push_bind(kind.as_str());
    }
    if let Some(movable) = filter.movable {
        query
            .push(" AND movable_type = ")
            .push_bind(movable.kind().as_str())
            .push(" AND movable_id = ")
            .push_bind(movable.raw_id());
    }
    if let Some(movement_type) = filter.movement_type {
        query.push(" AND movement_type = ").push_bind(movement_type.as_str());
    }
    if let Some(region) = filter.region {
        query
            .push(" AND (source_region_id = ")
            .push_bind(*region.as_uuid())
            .push(" OR destination_region_id = ")
            .push_bind(*region.as_uuid())
            .push(")");
    }
    if let Some(from) = filter.date_from {
        query.push(" AND date >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        query.push(" AND date <= ").push_bind(to);
    }
    if let Some(batch_id) = filter.batch_id {
        query.push(" AND batch_id = ").push_bind(*batch_id.as_uuid());
    }
}

// -------------------------
// Loading
// -------------------------

fn uuids<I>(ids: I) -> Vec<Uuid>
where
    I: IntoIterator,
    I::Item: Into<Uuid>,
{
    ids.into_iter().map(Into::into).collect()
}

async fn fetch_all(
    conn: &mut PgConnection,
    operation: &'static str,
    query: Query<'_, Postgres, PgArguments>,
) -> Result<Vec<PgRow>, StoreError> {
    query
        .fetch_all(conn)
        .await
        .map_err(|e| map_sqlx_error(operation, e))
}

fn decode<T>(
    rows: Vec<PgRow>,
    operation: &'static str,
    f: impl Fn(&PgRow) -> Result<T, sqlx::Error>,
) -> Result<Vec<T>, StoreError> {
    rows.iter()
        .map(|row| f(row).map_err(|e| map_sqlx_error(operation, e)))
        .collect()
}

/// What the stock rows of a scope are keyed by.
struct StockKeys {
    references: Vec<String>,
    tags: Vec<String>,
    units: Vec<Uuid>,
}

impl StockKeys {
    async fn resolve(conn: &mut PgConnection, scope: &LoadScope) -> Result<Self, StoreError> {
        let part_ids = uuids(scope.spare_part_ids());
        let references = if part_ids.is_empty() {
            Vec::new()
        } else {
            sqlx::query_scalar::<_, String>(
                "SELECT DISTINCT reference FROM spare_parts WHERE id = ANY($1)",
            )
            .bind(part_ids)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("resolve_references", e))?
        };

        let equipment_ids = uuids(scope.equipment_ids());
        let tags = if equipment_ids.is_empty() {
            Vec::new()
        } else {
            sqlx::query_scalar::<_, String>("SELECT DISTINCT tag FROM equipment WHERE id = ANY($1)")
                .bind(equipment_ids)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("resolve_tags", e))?
        };

        Ok(Self {
            references,
            tags,
            units: uuids(scope.serialized_ids()),
        })
    }

    /// Advisory lock names, sorted so every writer locks in the same order.
    fn lock_names(&self) -> BTreeSet<String> {
        let references = self.references.iter().map(|r| format!("spare_part:{r}"));
        let tags = self.tags.iter().map(|t| format!("equipment:{t}"));
        let units = self.units.iter().map(|u| format!("serialized:{u}"));
        references.chain(tags).chain(units).collect()
    }
}

async fn fetch_movements(
    conn: &mut PgConnection,
    scope: &LoadScope,
    lock: bool,
) -> Result<Vec<StockMovement>, StoreError> {
    if scope.movements.is_empty() && scope.batches.is_empty() {
        return Ok(Vec::new());
    }
    let mut sql = format!(
        "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
         WHERE id = ANY($1) OR batch_id = ANY($2) ORDER BY batch_id, line_no"
    );
    if lock {
        sql.push_str(" FOR UPDATE");
    }
    let query = sqlx::query(&sql)
        .bind(uuids(scope.movements.iter().copied()))
        .bind(uuids(scope.batches.iter().copied()));
    let rows = fetch_all(conn, "load_stock_movements", query).await?;
    decode(rows, "load_stock_movements", movement_from_row)
}

/// Load the rows `scope` reaches, locking the stock rows against other
/// writers until the transaction ends.
async fn load_scoped(
    conn: &mut PgConnection,
    scope: &LoadScope,
) -> Result<InventoryState, StoreError> {
    let span = Span::current();
    let mut scope = scope.clone();
    let mut state = InventoryState::new();

    // Unlocked: only learns what the targeted movements moved.
    for movement in fetch_movements(conn, &scope, false).await? {
        scope.include_movement(&movement);
    }

    let keys = StockKeys::resolve(conn, &scope).await?;
    let lock_names = keys.lock_names();
    for name in &lock_names {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(name)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("advisory_lock", e))?;
    }
    span.record("lock_count", lock_names.len());

    // Locked: rows as the previous holder of the locks left them.
    for movement in fetch_movements(conn, &scope, true).await? {
        if !scope.movables.contains(&movement.movable) {
            return Err(DomainError::conflict(format!(
                "movement batch {} changed while it was being loaded; retry",
                movement.batch_id
            ))
            .into());
        }
        scope.include_movement(&movement);
        state.movements.append(movement);
    }
    span.record("movement_count", state.movements.len());

    if !keys.units.is_empty() {
        let sql = format!(
            "SELECT {SERIALIZED_COLUMNS} FROM serialized_items \
             WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        );
        let query = sqlx::query(&sql).bind(keys.units.as_slice());
        let rows = fetch_all(conn, "load_serialized_items", query).await?;
        for unit in decode(rows, "load_serialized_items", serialized_from_row)? {
            scope.include_unit(&unit);
            state.serialized.load(unit);
        }
    }

    if !keys.references.is_empty() {
        let sql = format!(
            "SELECT {SPARE_PART_COLUMNS} FROM spare_parts \
             WHERE reference = ANY($1) ORDER BY id FOR UPDATE"
        );
        let query = sqlx::query(&sql).bind(keys.references.as_slice());
        let rows = fetch_all(conn, "load_spare_parts", query).await?;
        for part in decode(rows, "load_spare_parts", spare_part_from_row)? {
            state.spare_parts.load(part);
        }
    }

    if !keys.tags.is_empty() {
        let sql = format!(
            "SELECT {EQUIPMENT_COLUMNS} FROM equipment WHERE tag = ANY($1) ORDER BY id FOR UPDATE"
        );
        let query = sqlx::query(&sql).bind(keys.tags.as_slice());
        let rows = fetch_all(conn, "load_equipment", query).await?;
        for equipment in decode(rows, "load_equipment", equipment_from_row)? {
            state.equipment.load(equipment);
        }
    }

    load_directory(conn, &mut scope, &mut state).await?;

    span.record(
        "row_count",
        state.serialized.units().len()
            + state.spare_parts.rows().len()
            + state.equipment.rows().len(),
    );
    Ok(state)
}

/// Connections, then the zones they imply, then the regions.
async fn load_directory(
    conn: &mut PgConnection,
    scope: &mut LoadScope,
    state: &mut InventoryState,
) -> Result<(), StoreError> {
    if !scope.connections.is_empty() {
        let query = sqlx::query("SELECT id, zone_id, customer FROM connections WHERE id = ANY($1)")
            .bind(uuids(scope.connections.iter().copied()));
        let rows = fetch_all(conn, "load_connections", query).await?;
        for connection in decode(rows, "load_connections", connection_from_row)? {
            scope.zones.insert(connection.zone_id);
            state.directory.insert_connection(connection);
        }
    }

    if !scope.zones.is_empty() {
        let query = sqlx::query("SELECT id, region_id, name FROM zones WHERE id = ANY($1)")
            .bind(uuids(scope.zones.iter().copied()));
        let rows = fetch_all(conn, "load_zones", query).await?;
        for zone in decode(rows, "load_zones", zone_from_row)? {
            scope.regions.insert(zone.region_id);
            state.directory.insert_zone(zone);
        }
    }

    load_regions(conn, uuids(scope.regions.iter().copied()), state).await
}

async fn load_regions(
    conn: &mut PgConnection,
    ids: Vec<Uuid>,
    state: &mut InventoryState,
) -> Result<(), StoreError> {
    if ids.is_empty() {
        return Ok(());
    }
    let query = sqlx::query("SELECT id, name FROM regions WHERE id = ANY($1)").bind(ids);
    let rows = fetch_all(conn, "load_regions", query).await?;
    for region in decode(rows, "load_regions", region_from_row)? {
        state.directory.insert_region(region);
    }
    Ok(())
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: core::str::FromStr<Err = DomainError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn region_from_row(row: &PgRow) -> Result<Region, sqlx::Error> {
    Ok(Region {
        id: RegionId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
    })
}

fn zone_from_row(row: &PgRow) -> Result<Zone, sqlx::Error> {
    Ok(Zone {
        id: ZoneId::from_uuid(row.try_get("id")?),
        region_id: RegionId::from_uuid(row.try_get("region_id")?),
        name: row.try_get("name")?,
    })
}

fn connection_from_row(row: &PgRow) -> Result<Connection, sqlx::Error> {
    Ok(Connection {
        id: ConnectionId::from_uuid(row.try_get("id")?),
        zone_id: ZoneId::from_uuid(row.try_get("zone_id")?),
        customer: row.try_get("customer")?,
    })
}

fn spare_part_from_row(row: &PgRow) -> Result<SparePart, sqlx::Error> {
    Ok(SparePart {
        id: SparePartId::from_uuid(row.try_get("id")?),
        reference: row.try_get("reference")?,
        name: row.try_get("name")?,
        unit: row.try_get("unit")?,
        region_id: RegionId::from_uuid(row.try_get("region_id")?),
        quantity: row.try_get("quantity")?,
    })
}

fn equipment_from_row(row: &PgRow) -> Result<Equipment, sqlx::Error> {
    let parent: Option<Uuid> = row.try_get("parent_id")?;
    Ok(Equipment {
        id: EquipmentId::from_uuid(row.try_get("id")?),
        tag: row.try_get("tag")?,
        brand: row.try_get("brand")?,
        model: row.try_get("model")?,
        equipment_type: row.try_get("equipment_type")?,
        region_id: RegionId::from_uuid(row.try_get("region_id")?),
        quantity: row.try_get("quantity")?,
        parent_id: parent.map(EquipmentId::from_uuid),
    })
}

fn serialized_from_row(row: &PgRow) -> Result<SerializedItem, sqlx::Error> {
    let region: Option<Uuid> = row.try_get("region_id")?;
    let zone: Option<Uuid> = row.try_get("zone_id")?;
    let connection: Option<Uuid> = row.try_get("connection_id")?;
    let meter: Option<Uuid> = row.try_get("meter_id")?;
    Ok(SerializedItem {
        id: SerializedItemId::from_uuid(row.try_get("id")?),
        kind: parse_column::<MovableKind>(row, "kind")?,
        serial: row.try_get("serial")?,
        region_id: region.map(RegionId::from_uuid),
        zone_id: zone.map(ZoneId::from_uuid),
        connection_id: connection.map(ConnectionId::from_uuid),
        meter_id: meter.map(SerializedItemId::from_uuid),
        quantity: row.try_get("quantity")?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, sqlx::Error> {
    let kind = parse_column::<MovableKind>(row, "movable_type")?;
    let source: Option<Uuid> = row.try_get("source_region_id")?;
    let destination: Option<Uuid> = row.try_get("destination_region_id")?;
    let responsible: Option<Uuid> = row.try_get("responsible_user_id")?;
    let intended: Option<Uuid> = row.try_get("intended_for_user_id")?;
    let line_no: i32 = row.try_get("line_no")?;

    Ok(StockMovement {
        id: MovementId::from_uuid(row.try_get("id")?),
        batch_id: BatchId::from_uuid(row.try_get("batch_id")?),
        line_no: line_no as u32,
        movable: MovableRef::from_parts(kind, row.try_get("movable_id")?),
        movement_type: parse_column::<MovementType>(row, "movement_type")?,
        quantity: row.try_get("quantity")?,
        source_region_id: source.map(RegionId::from_uuid),
        destination_region_id: destination.map(RegionId::from_uuid),
        date: row.try_get("date")?,
        notes: row.try_get("notes")?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        responsible_user_id: responsible.map(UserId::from_uuid),
        intended_for_user_id: intended.map(UserId::from_uuid),
        stock_at_movement: row.try_get("stock_at_movement")?,
        created_at: row.try_get("created_at")?,
    })
}

// -------------------------
// Writing
// -------------------------

async fn delete_ids(
    conn: &mut PgConnection,
    table: &'static str,
    ids: Vec<Uuid>,
) -> Result<(), StoreError> {
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query(&format!("DELETE FROM {table} WHERE id = ANY($1)"))
        .bind(ids)
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error("delete_rows", e))?;
    Ok(())
}

async fn write_diff(
    tx: &mut Transaction<'static, Postgres>,
    diff: &StateDiff,
) -> Result<(), StoreError> {
    let span = Span::current();

    // Deletes first so a row replaced under a unique key frees the key.
    delete_ids(tx, "stock_movements", uuids(diff.movements.deletes.iter().copied())).await?;
    delete_ids(tx, "serialized_items", uuids(diff.serialized.deletes.iter().copied())).await?;
    delete_ids(tx, "equipment", uuids(diff.equipment.deletes.iter().copied())).await?;
    delete_ids(tx, "spare_parts", uuids(diff.spare_parts.deletes.iter().copied())).await?;
    delete_ids(tx, "connections", uuids(diff.connections.deletes.iter().copied())).await?;
    delete_ids(tx, "zones", uuids(diff.zones.deletes.iter().copied())).await?;
    delete_ids(tx, "regions", uuids(diff.regions.deletes.iter().copied())).await?;

    for region in &diff.regions.upserts {
        sqlx::query(
            r#"
            INSERT INTO regions (id, name) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(region.id.as_uuid())
        .bind(&region.name)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_region", e))?;
    }

    for zone in &diff.zones.upserts {
        sqlx::query(
            r#"
            INSERT INTO zones (id, region_id, name) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET region_id = EXCLUDED.region_id, name = EXCLUDED.name
            "#,
        )
        .bind(zone.id.as_uuid())
        .bind(zone.region_id.as_uuid())
        .bind(&zone.name)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_zone", e))?;
    }

    for connection in &diff.connections.upserts {
        sqlx::query(
            r#"
            INSERT INTO connections (id, zone_id, customer) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET zone_id = EXCLUDED.zone_id, customer = EXCLUDED.customer
            "#,
        )
        .bind(connection.id.as_uuid())
        .bind(connection.zone_id.as_uuid())
        .bind(&connection.customer)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_connection", e))?;
    }

    for part in &diff.spare_parts.upserts {
        sqlx::query(
            r#"
            INSERT INTO spare_parts (id, reference, name, unit, region_id, quantity)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                reference = EXCLUDED.reference,
                name = EXCLUDED.name,
                unit = EXCLUDED.unit,
                region_id = EXCLUDED.region_id,
                quantity = EXCLUDED.quantity
            "#,
        )
        .bind(part.id.as_uuid())
        .bind(&part.reference)
        .bind(&part.name)
        .bind(&part.unit)
        .bind(part.region_id.as_uuid())
        .bind(part.quantity)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_spare_part", e))?;
    }

    for equipment in &diff.equipment.upserts {
        sqlx::query(
            r#"
            INSERT INTO equipment (
                id, tag, brand, model, equipment_type, region_id, quantity, parent_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                tag = EXCLUDED.tag,
                brand = EXCLUDED.brand,
                model = EXCLUDED.model,
                equipment_type = EXCLUDED.equipment_type,
                region_id = EXCLUDED.region_id,
                quantity = EXCLUDED.quantity,
                parent_id = EXCLUDED.parent_id
            "#,
        )
        .bind(equipment.id.as_uuid())
        .bind(&equipment.tag)
        .bind(&equipment.brand)
        .bind(&equipment.model)
        .bind(&equipment.equipment_type)
        .bind(equipment.region_id.as_uuid())
        .bind(equipment.quantity)
        .bind(equipment.parent_id.map(|id| *id.as_uuid()))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_equipment", e))?;
    }

    for unit in &diff.serialized.upserts {
        sqlx::query(
            r#"
            INSERT INTO serialized_items (
                id, kind, serial, region_id, zone_id, connection_id, meter_id, quantity
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                kind = EXCLUDED.kind,
                serial = EXCLUDED.serial,
                region_id = EXCLUDED.region_id,
                zone_id = EXCLUDED.zone_id,
                connection_id = EXCLUDED.connection_id,
                meter_id = EXCLUDED.meter_id,
                quantity = EXCLUDED.quantity
            "#,
        )
        .bind(unit.id.as_uuid())
        .bind(unit.kind.as_str())
        .bind(&unit.serial)
        .bind(unit.region_id.map(|id| *id.as_uuid()))
        .bind(unit.zone_id.map(|id| *id.as_uuid()))
        .bind(unit.connection_id.map(|id| *id.as_uuid()))
        .bind(unit.meter_id.map(|id| *id.as_uuid()))
        .bind(unit.quantity)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_serialized_item", e))?;
    }

    for movement in &diff.movements.upserts {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, batch_id, line_no, movable_type, movable_id, movement_type,
                quantity, source_region_id, destination_region_id, date, notes,
                user_id, responsible_user_id, intended_for_user_id,
                stock_at_movement, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                batch_id = EXCLUDED.batch_id,
                line_no = EXCLUDED.line_no,
                movable_type = EXCLUDED.movable_type,
                movable_id = EXCLUDED.movable_id,
                movement_type = EXCLUDED.movement_type,
                quantity = EXCLUDED.quantity,
                source_region_id = EXCLUDED.source_region_id,
                destination_region_id = EXCLUDED.destination_region_id,
                date = EXCLUDED.date,
                notes = EXCLUDED.notes,
                user_id = EXCLUDED.user_id,
                responsible_user_id = EXCLUDED.responsible_user_id,
                intended_for_user_id = EXCLUDED.intended_for_user_id,
                stock_at_movement = EXCLUDED.stock_at_movement,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(movement.id.as_uuid())
        .bind(movement.batch_id.as_uuid())
        .bind(movement.line_no as i32)
        .bind(movement.movable.kind().as_str())
        .bind(movement.movable.raw_id())
        .bind(movement.movement_type.as_str())
        .bind(movement.quantity)
        .bind(movement.source_region_id.map(|id| *id.as_uuid()))
        .bind(movement.destination_region_id.map(|id| *id.as_uuid()))
        .bind(movement.date)
        .bind(&movement.notes)
        .bind(movement.user_id.as_uuid())
        .bind(movement.responsible_user_id.map(|id| *id.as_uuid()))
        .bind(movement.intended_for_user_id.map(|id| *id.as_uuid()))
        .bind(movement.stock_at_movement)
        .bind(movement.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_stock_movement", e))?;
    }

    span.record("upserted", diff.upsert_count());
    span.record("deleted", diff.delete_count());
    Ok(())
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Domain(DomainError::conflict(format!(
                "duplicate row in {operation}: {}",
                db_err.message()
            )));
        }
    }
    StoreError::Database {
        operation,
        source: err,
    }
}
