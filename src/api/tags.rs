use std::sync::Arc;

use axum::response::Response;

use super::common::ok_json_response;
use crate::state::AppState;

/// `GET /api/tags`: the prebuilt catalog body.
#[must_use]
pub fn handler(state: &Arc<AppState>) -> Response {
    ok_json_response(state.catalog.tags_body())
}
