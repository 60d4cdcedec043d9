use super::ApiState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use sibyl_core::foundation::{DataStructureId, OracleError, RequestHash};
use std::collections::HashMap;
use std::sync::Arc;

type Params = Query<HashMap<String, String>>;

fn page_param(params: &HashMap<String, String>) -> usize {
    params.get("page").and_then(|value| value.parse().ok()).unwrap_or(0)
}

fn limit_param(params: &HashMap<String, String>) -> usize {
    params.get("limit").and_then(|value| value.parse().ok()).unwrap_or(0)
}

fn store_error(err: OracleError) -> Response {
    error!("store error serving api request error={err}");
    (StatusCode::INTERNAL_SERVER_ERROR, "database error").into_response()
}

pub async fn list(State(state): State<Arc<ApiState>>, Query(params): Params) -> Response {
    let ds_id: DataStructureId = params.get("dsid").and_then(|value| value.parse().ok()).unwrap_or(0);
    match state.store.get_all_messages(ds_id, page_param(&params), limit_param(&params)) {
        Ok(records) => Json(records).into_response(),
        Err(err) => store_error(err),
    }
}

pub async fn list_by_field(
    State(state): State<Arc<ApiState>>,
    Path(ds_id): Path<DataStructureId>,
    Query(params): Params,
) -> Response {
    // The first query pair that is not paging is the field filter.
    let (field, value) = params
        .iter()
        .find(|(key, _)| key.as_str() != "page" && key.as_str() != "limit")
        .map(|(key, value)| (key.clone(), value.clone()))
        .unwrap_or_default();
    match state.store.get_messages_by_field(ds_id, &field, &value, page_param(&params), limit_param(&params)) {
        Ok(records) => Json(records).into_response(),
        Err(err) => store_error(err),
    }
}

pub async fn latest(
    State(state): State<Arc<ApiState>>,
    Path(ds_id): Path<DataStructureId>,
    Query(params): Params,
) -> Response {
    let field = params.get("field").map(String::as_str).unwrap_or_default();
    let value = params.get("value").map(String::as_str).unwrap_or_default();
    let result = if !field.is_empty() && !value.is_empty() {
        state.store.get_latest_by_field(ds_id, state.threshold, field, value)
    } else {
        state.store.get_latest_confirmed(ds_id, state.threshold)
    };
    match result {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => Json(serde_json::json!({})).into_response(),
        Err(err) => store_error(err),
    }
}

pub async fn by_hash(State(state): State<Arc<ApiState>>, Query(params): Params) -> Response {
    let Some(raw) = params.get("hash") else {
        return (StatusCode::BAD_REQUEST, "missing hash parameter").into_response();
    };
    let hash: RequestHash = match raw.parse() {
        Ok(hash) => hash,
        Err(_) => return (StatusCode::BAD_REQUEST, "malformed hash").into_response(),
    };
    match state.store.get_data(&hash) {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "hash not found").into_response(),
        Err(err) => store_error(err),
    }
}

pub async fn structures(State(state): State<Arc<ApiState>>) -> Response {
    match state.store.get_data_structures() {
        Ok(ids) => Json(ids).into_response(),
        Err(err) => store_error(err),
    }
}

pub async fn health() -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}
