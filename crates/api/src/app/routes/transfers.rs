use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::Utc;

use fieldstock_core::EquipmentId;

use crate::app::{dto, errors, services::AppServices};
use crate::context::ActorContext;

pub async fn transfer_meters(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::MeterTransferRequest>,
) -> Response {
    let destination = body.destination();
    let date = body.date.unwrap_or_else(|| Utc::now().date_naive());

    match services
        .ledger
        .transfer_meters(actor.user_id(), body.meter_ids, destination, date, body.notes)
        .await
    {
        Ok(rows) => errors::json_success(
            StatusCode::OK,
            format!("{} meter(s) transferred", rows.len()),
            rows,
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn transfer_keypads(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::KeypadTransferRequest>,
) -> Response {
    let destination = body.destination();
    let date = body.date.unwrap_or_else(|| Utc::now().date_naive());

    match services
        .ledger
        .transfer_keypads(actor.user_id(), body.keypad_ids, destination, date, body.notes)
        .await
    {
        Ok(rows) => errors::json_success(
            StatusCode::OK,
            format!("{} keypad(s) transferred", rows.len()),
            rows,
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn partition_equipment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PartitionRequest>,
) -> Response {
    let id = match dto::parse_id::<EquipmentId>(&id) {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services
        .ledger
        .partition_equipment(actor.user_id(), id, body.quantities)
        .await
    {
        Ok(children) => {
            errors::json_success(StatusCode::CREATED, "equipment partitioned", children)
        }
        Err(e) => errors::store_error_to_response(e),
    }
}
