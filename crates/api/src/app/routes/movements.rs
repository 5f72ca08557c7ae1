use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Response,
    routing::{get, post, put},
    Json, Router,
};

use fieldstock_core::{BatchId, MovementId};

use crate::app::{dto, errors, services::AppServices};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_movements).post(store_movements))
        .route("/bulk-delete", post(bulk_delete))
        .route("/batches/:batch_id", put(update_batch))
        .route("/:id", get(show_movement).delete(delete_movement))
}

pub async fn list_movements(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListMovementsQuery>,
) -> Response {
    let filter = match query.filter() {
        Ok(f) => f,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services
        .ledger
        .list_movements(filter, query.page, query.per_page)
        .await
    {
        Ok(page) => errors::json_success(StatusCode::OK, "stock movements", page),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn store_movements(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::StoreMovementsRequest>,
) -> Response {
    match services.ledger.record(actor.user_id(), body.into_request()).await {
        Ok(rows) => errors::json_success(
            StatusCode::CREATED,
            format!("{} stock movement(s) recorded", rows.len()),
            rows,
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn show_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id = match dto::parse_id::<MovementId>(&id) {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.ledger.get_movement(id).await {
        Ok(movement) => errors::json_success(StatusCode::OK, "stock movement", movement),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn update_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(batch_id): Path<String>,
    Json(body): Json<dto::StoreMovementsRequest>,
) -> Response {
    let batch_id = match dto::parse_id::<BatchId>(&batch_id) {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services
        .ledger
        .update_batch(actor.user_id(), batch_id, body.into_request())
        .await
    {
        Ok(rows) => errors::json_success(
            StatusCode::OK,
            format!("{} stock movement(s) updated", rows.len()),
            rows,
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn delete_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> Response {
    let id = match dto::parse_id::<MovementId>(&id) {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.ledger.delete(actor.user_id(), id).await {
        Ok(removed) => errors::json_success(StatusCode::OK, "stock movement deleted", removed),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn bulk_delete(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::BulkDeleteRequest>,
) -> Response {
    match services.ledger.delete_many(actor.user_id(), body.ids).await {
        Ok(removed) => errors::json_success(
            StatusCode::OK,
            format!("{} stock movement(s) deleted", removed.len()),
            removed,
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}
