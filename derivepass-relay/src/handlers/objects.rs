//! Object fetch/push handlers.

use crate::auth::AuthUser;
use crate::error::RelayError;
use crate::storage::models::{IncomingObject, StoredObject};
use crate::storage::RelayStorage;
use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct FetchQuery {
    #[serde(default)]
    pub since: i64,
}

#[derive(Serialize)]
pub struct FetchResponse {
    pub objects: Vec<StoredObject>,
}

#[derive(Deserialize)]
pub struct PushRequest {
    pub objects: Vec<IncomingObject>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub modified_at: i64,
}

/// `GET /objects?since=<ms>`
pub async fn fetch(
    State(storage): State<RelayStorage>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(query): Query<FetchQuery>,
) -> Result<Json<FetchResponse>, RelayError> {
    let objects = storage.objects_since(&user, query.since)?;
    tracing::debug!(user = %user, since = query.since, count = objects.len(), "Fetch");
    Ok(Json(FetchResponse { objects }))
}

/// `PUT /objects`: store a batch under one server-assigned `modifiedAt`
pub async fn push(
    State(storage): State<RelayStorage>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<PushRequest>,
) -> Result<Json<PushResponse>, RelayError> {
    for object in &req.objects {
        validate(object)?;
    }

    let modified_at = storage.put_objects(&user, &req.objects, Utc::now().timestamp_millis())?;
    tracing::debug!(user = %user, count = req.objects.len(), modified_at, "Push");

    Ok(Json(PushResponse { modified_at }))
}

fn validate(object: &IncomingObject) -> Result<(), RelayError> {
    if object.id.is_empty() {
        return Err(RelayError::BadRequest("Object without id".to_string()));
    }
    if !object.data.is_object() {
        return Err(RelayError::BadRequest(format!(
            "Object {} data must be a JSON object",
            object.id
        )));
    }
    Ok(())
}
