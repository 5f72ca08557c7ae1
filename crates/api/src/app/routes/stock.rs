use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
};

use fieldstock_core::RegionId;

use crate::app::{dto, errors, services::AppServices};

pub async fn spare_part_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path(reference): Path<String>,
) -> Response {
    match services.ledger.spare_part_stock(&reference).await {
        Ok(stock) => errors::json_success(StatusCode::OK, "spare part stock", stock),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn equipment_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path(tag): Path<String>,
) -> Response {
    match services.ledger.equipment_stock(&tag).await {
        Ok(stock) => errors::json_success(StatusCode::OK, "equipment stock", stock),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn region_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match dto::parse_id::<RegionId>(&id) {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.ledger.region_stock(id).await {
        Ok(holdings) => errors::json_success(StatusCode::OK, "region stock", holdings),
        Err(e) => errors::store_error_to_response(e),
    }
}
