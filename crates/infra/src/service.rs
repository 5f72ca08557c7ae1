//! Ledger orchestration: one store transaction per ledger operation.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{error, info, instrument, warn};

use fieldstock_core::{
    BatchId, DomainResult, EquipmentId, MovementId, RegionId, SerializedItemId, UserId,
};
use fieldstock_inventory::{
    Equipment, EquipmentStock, InventoryState, KeypadDestination, Ledger, LedgerContext,
    LoadScope, MeterDestination, MovementFilter, MovementRequest, Page, PageRequest,
    RegionHolding, SparePartStock, StockMovement,
};

use crate::config::LedgerSettings;
use crate::store::{StockStore, StoreError};

/// Page-size bounds applied to movement listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default: u32,
    pub max: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default: fieldstock_inventory::query::DEFAULT_PER_PAGE,
            max: fieldstock_inventory::query::MAX_PER_PAGE,
        }
    }
}

impl From<&LedgerSettings> for PageLimits {
    fn from(settings: &LedgerSettings) -> Self {
        Self {
            default: settings.default_page_size,
            max: settings.max_page_size,
        }
    }
}

#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn StockStore>,
    limits: PageLimits,
}

impl LedgerService {
    pub fn new(store: Arc<dyn StockStore>) -> Self {
        Self {
            store,
            limits: PageLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Record a new batch.
    #[instrument(
        skip(self, request),
        fields(
            user_id = %user,
            movement_type = %request.movement_type,
            lines = request.lines.len()
        )
    )]
    pub async fn record(
        &self,
        user: UserId,
        request: MovementRequest,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let ctx = LedgerContext::new(user);
        let scope = LoadScope::for_request(&request);
        let rows = observe(
            "record",
            self.transact(&scope, |state| Ledger::new(state, ctx).record(&request))
                .await,
        )?;
        if let Some(first) = rows.first() {
            info!(batch_id = %first.batch_id, rows = rows.len(), "movement batch recorded");
        }
        Ok(rows)
    }

    /// Replace the rows of an existing batch.
    #[instrument(skip(self, request), fields(user_id = %user, batch_id = %batch_id))]
    pub async fn update_batch(
        &self,
        user: UserId,
        batch_id: BatchId,
        request: MovementRequest,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let ctx = LedgerContext::new(user);
        let scope = LoadScope::for_batch_update(batch_id, &request);
        let rows = observe(
            "update_batch",
            self.transact(&scope, |state| Ledger::new(state, ctx).update_batch(batch_id, &request))
                .await,
        )?;
        info!(rows = rows.len(), "movement batch updated");
        Ok(rows)
    }

    #[instrument(skip(self), fields(user_id = %user, movement_id = %id))]
    pub async fn delete(&self, user: UserId, id: MovementId) -> Result<StockMovement, StoreError> {
        let ctx = LedgerContext::new(user);
        let scope = LoadScope::for_movements(&[id]);
        let removed = observe(
            "delete",
            self.transact(&scope, |state| Ledger::new(state, ctx).delete(id))
                .await,
        )?;
        info!(batch_id = %removed.batch_id, "movement deleted");
        Ok(removed)
    }

    /// Delete several movements in one transaction: all of them or none.
    #[instrument(skip(self, ids), fields(user_id = %user, requested = ids.len()))]
    pub async fn delete_many(
        &self,
        user: UserId,
        ids: Vec<MovementId>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let ctx = LedgerContext::new(user);
        let scope = LoadScope::for_movements(&ids);
        let removed = observe(
            "delete_many",
            self.transact(&scope, |state| Ledger::new(state, ctx).delete_many(&ids)).await,
        )?;
        info!(deleted = removed.len(), "movements deleted");
        Ok(removed)
    }

    #[instrument(skip(self, ids, notes), fields(user_id = %user, meters = ids.len()))]
    pub async fn transfer_meters(
        &self,
        user: UserId,
        ids: Vec<SerializedItemId>,
        destination: MeterDestination,
        date: NaiveDate,
        notes: Option<String>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let ctx = LedgerContext::new(user);
        let scope = LoadScope::for_meter_transfer(&ids, &destination);
        let rows = observe(
            "transfer_meters",
            self.transact(&scope, |state| {
                Ledger::new(state, ctx).transfer_meters(&ids, &destination, date, notes.as_deref())
            })
            .await,
        )?;
        info!(moved = rows.len(), "meters transferred");
        Ok(rows)
    }

    #[instrument(skip(self, ids, notes), fields(user_id = %user, keypads = ids.len()))]
    pub async fn transfer_keypads(
        &self,
        user: UserId,
        ids: Vec<SerializedItemId>,
        destination: KeypadDestination,
        date: NaiveDate,
        notes: Option<String>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let ctx = LedgerContext::new(user);
        let scope = LoadScope::for_keypad_transfer(&ids, &destination);
        let rows = observe(
            "transfer_keypads",
            self.transact(&scope, |state| {
                Ledger::new(state, ctx).transfer_keypads(&ids, &destination, date, notes.as_deref())
            })
            .await,
        )?;
        info!(moved = rows.len(), "keypads transferred");
        Ok(rows)
    }

    /// Split tracked sub-units off an equipment pool row. Returns the new rows.
    #[instrument(skip(self, quantities), fields(user_id = %user, equipment_id = %parent))]
    pub async fn partition_equipment(
        &self,
        user: UserId,
        parent: EquipmentId,
        quantities: Vec<i64>,
    ) -> Result<Vec<Equipment>, StoreError> {
        let scope = LoadScope::for_equipment(parent);
        let children = observe(
            "partition_equipment",
            self.transact(&scope, |state| {
                let ids = state.equipment.partition(parent, &quantities)?;
                ids.into_iter()
                    .map(|id| state.equipment.get(id).cloned())
                    .collect::<DomainResult<Vec<_>>>()
            })
            .await,
        )?;
        info!(children = children.len(), "equipment partitioned");
        Ok(children)
    }

    pub async fn list_movements(
        &self,
        filter: MovementFilter,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> Result<Page<StockMovement>, StoreError> {
        let page = PageRequest::with_limits(page, per_page, self.limits.default, self.limits.max);
        self.store.list_movements(&filter, page).await
    }

    pub async fn get_movement(&self, id: MovementId) -> Result<StockMovement, StoreError> {
        self.store.get_movement(id).await
    }

    pub async fn spare_part_stock(&self, reference: &str) -> Result<SparePartStock, StoreError> {
        self.store.spare_part_stock(reference).await
    }

    pub async fn equipment_stock(&self, tag: &str) -> Result<EquipmentStock, StoreError> {
        self.store.equipment_stock(tag).await
    }

    pub async fn region_stock(&self, region: RegionId) -> Result<Vec<RegionHolding>, StoreError> {
        self.store.region_stock(region).await
    }

    /// Run `f` on a write transaction over `scope`; commit only if it succeeds.
    async fn transact<T>(
        &self,
        scope: &LoadScope,
        f: impl FnOnce(&mut InventoryState) -> DomainResult<T>,
    ) -> Result<T, StoreError> {
        let mut tx = self.store.begin(scope).await?;
        let out = f(tx.state_mut())?;
        tx.commit().await?;
        Ok(out)
    }
}

fn observe<T>(operation: &'static str, result: Result<T, StoreError>) -> Result<T, StoreError> {
    match &result {
        Err(StoreError::Domain(err)) => warn!(operation, error = %err, "ledger operation rejected"),
        Err(err) => error!(operation, error = %err, "ledger operation failed"),
        Ok(_) => {}
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldstock_core::{DomainError, SparePartId};
    use fieldstock_inventory::{MovableKind, MovableRef, MovementType, SerializedItem, SparePart};

    use crate::store::InMemoryStockStore;

    struct World {
        service: LedgerService,
        a: RegionId,
        b: RegionId,
        part: SparePartId,
        meters: Vec<SerializedItemId>,
    }

    fn world() -> World {
        let mut state = InventoryState::new();
        let a = state.directory.add_region("Region A").unwrap();
        let b = state.directory.add_region("Region B").unwrap();
        let part = state
            .spare_parts
            .insert(SparePart::new("REF-1", "Fuse", a, 10))
            .unwrap();
        let meters = (1..=3)
            .map(|i| {
                state
                    .serialized
                    .insert(SerializedItem::new(MovableKind::Meter, format!("M-{i}"), Some(a)))
                    .unwrap()
            })
            .collect();
        let store: Arc<dyn StockStore> = Arc::new(InMemoryStockStore::with_state(state));
        World {
            service: LedgerService::new(store),
            a,
            b,
            part,
            meters,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 2).unwrap()
    }

    async fn qty(w: &World, region: RegionId) -> i64 {
        let stock = w.service.spare_part_stock("REF-1").await.unwrap();
        stock
            .regions
            .iter()
            .find(|r| r.region_id == region)
            .map(|r| r.quantity)
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn transfer_then_delete_round_trips_through_the_store() {
        let w = world();
        let user = UserId::new();
        let req = MovementRequest::new(MovementType::Transfer, today())
            .from_region(w.a)
            .to_region(w.b)
            .line(MovableRef::SparePart(w.part), 4);

        let rows = w.service.record(user, req).await.unwrap();
        assert_eq!(qty(&w, w.a).await, 6);
        assert_eq!(qty(&w, w.b).await, 4);

        w.service.delete(user, rows[0].id).await.unwrap();
        assert_eq!(qty(&w, w.a).await, 10);
        assert_eq!(qty(&w, w.b).await, 0);
    }

    #[tokio::test]
    async fn rejected_batch_leaves_store_untouched() {
        let w = world();
        let req = MovementRequest::new(MovementType::Exit, today())
            .from_region(w.a)
            .line(MovableRef::SparePart(w.part), 3)
            .line(MovableRef::SparePart(w.part), 8);

        let err = w.service.record(UserId::new(), req).await.unwrap_err();

        assert_eq!(
            err.domain(),
            Some(&DomainError::insufficient_stock("spare part REF-1", 7, 8))
        );
        assert_eq!(qty(&w, w.a).await, 10);
        let page = w.service.list_movements(MovementFilter::default(), None, None).await.unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn failing_bulk_delete_keeps_every_row() {
        let w = world();
        let user = UserId::new();
        let req = MovementRequest::new(MovementType::Exit, today())
            .from_region(w.a)
            .line(MovableRef::SparePart(w.part), 1);
        let rows = w.service.record(user, req).await.unwrap();

        let err = w
            .service
            .delete_many(user, vec![rows[0].id, MovementId::new()])
            .await
            .unwrap_err();

        assert!(matches!(err.domain(), Some(DomainError::NotFound { .. })));
        assert_eq!(qty(&w, w.a).await, 9);
        assert!(w.service.get_movement(rows[0].id).await.is_ok());
    }

    #[tokio::test]
    async fn meters_bulk_transfer_to_region() {
        let w = world();
        let destination = MeterDestination {
            region_id: Some(w.b),
            ..MeterDestination::default()
        };

        let rows = w
            .service
            .transfer_meters(UserId::new(), w.meters.clone(), destination, today(), None)
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|m| m.quantity == 1 && m.movement_type == MovementType::Transfer));
        let holdings = w.service.region_stock(w.b).await.unwrap();
        assert_eq!(holdings.len(), 3);
    }

    #[tokio::test]
    async fn listing_uses_configured_page_limits() {
        let mut w = world();
        w.service = w.service.clone().with_limits(PageLimits { default: 2, max: 3 });
        let user = UserId::new();
        for _ in 0..4 {
            let req = MovementRequest::new(MovementType::Entry, today())
                .to_region(w.b)
                .line(MovableRef::SparePart(w.part), 1);
            w.service.record(user, req).await.unwrap();
        }

        let page = w.service.list_movements(MovementFilter::default(), None, None).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.last_page, 2);

        let page = w
            .service
            .list_movements(MovementFilter::default(), Some(1), Some(50))
            .await
            .unwrap();
        assert_eq!(page.per_page, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_exits_never_oversell() {
        let w = world();
        let service = w.service.clone();

        let mut handles = Vec::new();
        for _ in 0..15 {
            let service = service.clone();
            let req = MovementRequest::new(MovementType::Exit, today())
                .from_region(w.a)
                .line(MovableRef::SparePart(w.part), 1);
            handles.push(tokio::spawn(async move { service.record(UserId::new(), req).await }));
        }

        let mut accepted = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 10);
        assert_eq!(qty(&w, w.a).await, 0);
    }

    #[tokio::test]
    async fn partition_returns_child_rows() {
        let mut state = InventoryState::new();
        let a = state.directory.add_region("A").unwrap();
        let parent = state.equipment.insert(Equipment::new("EQ-1", a, 6)).unwrap();
        let service = LedgerService::new(Arc::new(InMemoryStockStore::with_state(state)));

        let children = service
            .partition_equipment(UserId::new(), parent, vec![2, 1])
            .await
            .unwrap();

        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.parent_id == Some(parent)));
        let stock = service.equipment_stock("EQ-1").await.unwrap();
        assert_eq!(stock.partitioned, 3);
        assert_eq!(stock.total, 6);
    }
}
