use std::sync::Arc;

use anyhow::Context;

use fieldstock_infra::{
    config::{Settings, StorageBackend},
    service::PageLimits,
    InMemoryStockStore, LedgerService, PostgresStockStore, StockStore,
};
use fieldstock_inventory::InventoryState;

/// Everything handlers need, shared behind an `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub ledger: LedgerService,
}

impl AppServices {
    pub fn new(ledger: LedgerService) -> Self {
        Self { ledger }
    }

    /// In-memory backend seeded with `state`.
    pub fn in_memory(state: InventoryState) -> Self {
        let store: Arc<dyn StockStore> = Arc::new(InMemoryStockStore::with_state(state));
        Self::new(LedgerService::new(store))
    }
}

/// Wire the storage backend selected in `settings`.
pub async fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    let store: Arc<dyn StockStore> = match settings.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; data is lost on restart");
            Arc::new(InMemoryStockStore::new())
        }
        StorageBackend::Postgres => {
            let url = settings
                .database
                .url
                .as_deref()
                .context("database.url is required for the postgres backend")?;
            let store = PostgresStockStore::connect(url, settings.database.max_connections)
                .await
                .context("failed to connect to postgres")?;
            store
                .ensure_schema()
                .await
                .context("failed to apply database schema")?;
            tracing::info!("using postgres storage");
            Arc::new(store)
        }
    };

    let ledger = LedgerService::new(store).with_limits(PageLimits::from(&settings.ledger));
    Ok(AppServices::new(ledger))
}
