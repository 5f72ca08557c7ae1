use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use fieldstock_core::DomainError;
use fieldstock_infra::StoreError;

pub fn store_error_to_response(err: StoreError) -> Response {
    match err {
        StoreError::Domain(err) => domain_error_to_response(err),
        other => {
            tracing::error!(error = %other, "storage failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "the request could not be completed",
            )
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> Response {
    let message = err.to_string();
    match err {
        DomainError::Validation { field, message } => validation_error(field, message),
        DomainError::InsufficientStock { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "insufficient_stock", message)
        }
        DomainError::InvariantViolation(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", message)
        }
        DomainError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, "invalid_id", message),
        DomainError::NotFound { .. } => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", message),
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "status": "error",
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// 422 naming the offending input field.
pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        axum::Json(json!({
            "status": "error",
            "error": "validation_error",
            "field": field.into(),
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn json_success(
    status: StatusCode,
    message: impl Into<String>,
    data: impl Serialize,
) -> Response {
    (
        status,
        axum::Json(json!({
            "status": "success",
            "message": message.into(),
            "data": data,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_status_codes() {
        let cases = [
            (DomainError::validation("items", "required"), StatusCode::UNPROCESSABLE_ENTITY),
            (
                DomainError::insufficient_stock("equipment EQ-1", 5, 6),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (DomainError::invariant("negative"), StatusCode::UNPROCESSABLE_ENTITY),
            (DomainError::invalid_id("MovementId: bad"), StatusCode::BAD_REQUEST),
            (DomainError::not_found("movement", "x"), StatusCode::NOT_FOUND),
            (DomainError::conflict("duplicate"), StatusCode::CONFLICT),
        ];

        for (err, expected) in cases {
            let label = err.to_string();
            assert_eq!(domain_error_to_response(err).status(), expected, "{label}");
        }
    }

    #[test]
    fn store_domain_errors_are_unwrapped() {
        let err = StoreError::Domain(DomainError::not_found("region", "r"));
        let response = store_error_to_response(err);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
