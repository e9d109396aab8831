// Administrative control surface.
//
// Access control is enforced in front of the relay; these handlers trust
// every caller that reaches them.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use coedit_common::doc_id::validate_doc_id;

use crate::error::{ErrorCode, RelayError};
use crate::hub::CollabHub;

pub fn router(hub: CollabHub) -> Router {
    Router::new()
        .route("/lock/{doc_id}", post(lock_document))
        .route("/unlock/{doc_id}", post(unlock_document))
        .route("/redirect/{doc_id}/{*target}", post(redirect_document))
        .route("/delete/{doc_id}/{*target}", post(delete_document))
        .route("/docs", get(overview))
        .route("/docs/{doc_id}", get(document_status))
        .with_state(hub)
}

/// Applies the shared doc id rule, rejecting with `VALIDATION_FAILED`.
pub fn require_doc_id(doc_id: &str) -> Result<(), RelayError> {
    validate_doc_id(doc_id)
        .map_err(|error| RelayError::new(ErrorCode::ValidationFailed, error.to_string()))
}

fn validate_target(target: &str) -> Result<(), RelayError> {
    if target.chars().any(char::is_control) {
        return Err(RelayError::new(
            ErrorCode::ValidationFailed,
            "redirect target must not contain control characters",
        ));
    }
    Ok(())
}

async fn lock_document(State(hub): State<CollabHub>, Path(doc_id): Path<String>) -> Response {
    if let Err(error) = require_doc_id(&doc_id) {
        return error.into_response();
    }
    hub.lock(&doc_id).await.into_response()
}

async fn unlock_document(State(hub): State<CollabHub>, Path(doc_id): Path<String>) -> Response {
    if let Err(error) = require_doc_id(&doc_id) {
        return error.into_response();
    }
    hub.unlock(&doc_id).await.into_response()
}

async fn redirect_document(
    State(hub): State<CollabHub>,
    Path((doc_id, target)): Path<(String, String)>,
) -> Response {
    if let Err(error) = require_doc_id(&doc_id).and_then(|()| validate_target(&target)) {
        return error.into_response();
    }
    hub.redirect(&doc_id, &target).await.into_response()
}

async fn delete_document(
    State(hub): State<CollabHub>,
    Path((doc_id, target)): Path<(String, String)>,
) -> Response {
    if let Err(error) = require_doc_id(&doc_id).and_then(|()| validate_target(&target)) {
        return error.into_response();
    }
    hub.notify_deleted(&doc_id, &target).await.into_response()
}

async fn overview(State(hub): State<CollabHub>) -> Response {
    Json(hub.overview().await).into_response()
}

async fn document_status(State(hub): State<CollabHub>, Path(doc_id): Path<String>) -> Response {
    if let Err(error) = require_doc_id(&doc_id) {
        return error.into_response();
    }
    Json(hub.status(&doc_id).await).into_response()
}
