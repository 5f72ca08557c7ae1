use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use fieldstock_core::UserId;

use crate::app::errors::json_error;
use crate::context::ActorContext;

pub const USER_ID_HEADER: &str = "x-user-id";

pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let user_id = match extract_user_id(req.headers()) {
        Ok(id) => id,
        Err(message) => return json_error(StatusCode::UNAUTHORIZED, "unauthenticated", message),
    };

    req.extensions_mut().insert(ActorContext::new(user_id));
    next.run(req).await
}

fn extract_user_id(headers: &HeaderMap) -> Result<UserId, &'static str> {
    let header = headers
        .get(USER_ID_HEADER)
        .ok_or("missing X-User-Id header")?;

    let header = header.to_str().map_err(|_| "X-User-Id header is not valid text")?;

    header
        .trim()
        .parse::<UserId>()
        .map_err(|_| "X-User-Id header is not a valid user id")
}
