use axum::{
    routing::{get, post},
    Router,
};

pub mod movements;
pub mod stock;
pub mod system;
pub mod transfers;

/// Ledger routes. Expects `Extension<Arc<AppServices>>` and an
/// `ActorContext` to be provided by outer layers.
pub fn router() -> Router {
    Router::new()
        .nest("/stock-movements", movements::router())
        .route("/meters/bulk-transfer", post(transfers::transfer_meters))
        .route("/keypads/bulk-transfer", post(transfers::transfer_keypads))
        .route("/equipment/:id/partition", post(transfers::partition_equipment))
        .route("/equipment/tags/:tag/stock", get(stock::equipment_stock))
        .route("/spare-parts/:reference/stock", get(stock::spare_part_stock))
        .route("/regions/:id/stock", get(stock::region_stock))
}
