use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use fieldstock_core::{MovementId, RegionId};
use fieldstock_inventory::{
    EquipmentStock, InventoryState, LoadScope, MovementFilter, Page, PageRequest, RegionHolding,
    SparePartStock, StockMovement,
};

use super::{StockStore, StockTransaction, StoreError};

/// In-memory store for tests/dev.
///
/// A transaction holds the write lock for its whole lifetime and works on a
/// scoped copy; commit merges the copy's changes back.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    inner: Arc<RwLock<InventoryState>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: InventoryState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Copy of the whole current state.
    pub async fn snapshot(&self) -> InventoryState {
        self.inner.read().await.clone()
    }
}

struct InMemoryTransaction {
    guard: OwnedRwLockWriteGuard<InventoryState>,
    baseline: InventoryState,
    working: InventoryState,
}

#[async_trait]
impl StockTransaction for InMemoryTransaction {
    fn state(&self) -> &InventoryState {
        &self.working
    }

    fn state_mut(&mut self) -> &mut InventoryState {
        &mut self.working
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTransaction {
            mut guard,
            baseline,
            working,
        } = *self;
        guard.apply_diff(baseline.diff(&working));
        Ok(())
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn begin(&self, scope: &LoadScope) -> Result<Box<dyn StockTransaction>, StoreError> {
        let guard = self.inner.clone().write_owned().await;
        let baseline = guard.scoped(scope);
        let working = baseline.clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            baseline,
            working,
        }))
    }

    async fn list_movements(
        &self,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> Result<Page<StockMovement>, StoreError> {
        Ok(self.inner.read().await.list_movements(filter, page))
    }

    async fn get_movement(&self, id: MovementId) -> Result<StockMovement, StoreError> {
        Ok(self.inner.read().await.movements.get(id)?.clone())
    }

    async fn spare_part_stock(&self, reference: &str) -> Result<SparePartStock, StoreError> {
        Ok(self.inner.read().await.spare_part_stock(reference)?)
    }

    async fn equipment_stock(&self, tag: &str) -> Result<EquipmentStock, StoreError> {
        Ok(self.inner.read().await.equipment_stock(tag)?)
    }

    async fn region_stock(&self, region: RegionId) -> Result<Vec<RegionHolding>, StoreError> {
        Ok(self.inner.read().await.region_stock(region)?)
    }
}
