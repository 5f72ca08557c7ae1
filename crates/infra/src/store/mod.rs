//! Transactional storage boundary for the inventory state.
//!
//! A store hands out [`StockTransaction`]s. The caller mutates the
//! transaction's state through the pure ledger and either commits it or drops
//! it; dropping rolls back. A transaction holds only the rows its
//! [`LoadScope`] reaches, and writers whose scopes overlap are serialized, so
//! a ledger call always sees the rows the previous one left.
//!
//! Reads go through dedicated methods so a store can answer them without
//! materializing the inventory.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use fieldstock_core::{DomainError, MovementId, RegionId};
use fieldstock_inventory::{
    EquipmentStock, InventoryState, LoadScope, MovementFilter, Page, PageRequest, RegionHolding,
    SparePartStock, StockMovement,
};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;

/// Store operation error.
///
/// Domain errors pass through untouched so callers can map them to
/// user-facing responses; everything else is an infrastructure failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("database error in {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            StoreError::Domain(err) => Some(err),
            _ => None,
        }
    }
}

/// An open write transaction over a slice of the inventory state.
#[async_trait]
pub trait StockTransaction: Send {
    fn state(&self) -> &InventoryState;

    fn state_mut(&mut self) -> &mut InventoryState;

    /// Make the changes durable and visible. Dropping without committing
    /// discards them.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait StockStore: Send + Sync {
    /// Open a write transaction holding the rows `scope` reaches. Blocks
    /// until no other writer holds any of them.
    async fn begin(&self, scope: &LoadScope) -> Result<Box<dyn StockTransaction>, StoreError>;

    /// Movements matching `filter`, newest first.
    async fn list_movements(
        &self,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> Result<Page<StockMovement>, StoreError>;

    async fn get_movement(&self, id: MovementId) -> Result<StockMovement, StoreError>;

    async fn spare_part_stock(&self, reference: &str) -> Result<SparePartStock, StoreError>;

    async fn equipment_stock(&self, tag: &str) -> Result<EquipmentStock, StoreError>;

    async fn region_stock(&self, region: RegionId) -> Result<Vec<RegionHolding>, StoreError>;
}

#[async_trait]
impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    async fn begin(&self, scope: &LoadScope) -> Result<Box<dyn StockTransaction>, StoreError> {
        (**self).begin(scope).await
    }

    async fn list_movements(
        &self,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> Result<Page<StockMovement>, StoreError> {
        (**self).list_movements(filter, page).await
    }

    async fn get_movement(&self, id: MovementId) -> Result<StockMovement, StoreError> {
        (**self).get_movement(id).await
    }

    async fn spare_part_stock(&self, reference: &str) -> Result<SparePartStock, StoreError> {
        (**self).spare_part_stock(reference).await
    }

    async fn equipment_stock(&self, tag: &str) -> Result<EquipmentStock, StoreError> {
        (**self).equipment_stock(tag).await
    }

    async fn region_stock(&self, region: RegionId) -> Result<Vec<RegionHolding>, StoreError> {
        (**self).region_stock(region).await
    }
}
