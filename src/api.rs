//! HTTP surface over [`DownloadJobManager`].

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::manager::{DownloadError, DownloadJobManager, DownloadRequest};
use crate::model::{
    ActiveJobsQuery, AssetType, CancelOutcome, DataSource, InventoryQuery, JobId, JobSortField,
    PageRequest, SortDirection, Timeframe,
};

pub const API_PREFIX: &str = "/api/v1/market-data";

const ACTIVE_DEFAULT_LIMIT: u32 = 10;
const INVENTORY_DEFAULT_LIMIT: u32 = 20;
const MAX_PAGE_LIMIT: u32 = 100;
const DEFAULT_STATUS_TIMEFRAME: Timeframe = Timeframe::H1;

pub fn download_router(manager: Arc<DownloadJobManager>) -> Router {
    Router::new()
        .route(&format!("{API_PREFIX}/downloads"), post(post_download))
        .route(&format!("{API_PREFIX}/downloads/active"), get(get_active_downloads))
        .route(&format!("{API_PREFIX}/downloads/summary"), get(get_jobs_summary))
        .route(
            &format!("{API_PREFIX}/downloads/{{id}}/status"),
            get(get_download_status),
        )
        .route(&format!("{API_PREFIX}/downloads/{{id}}"), delete(cancel_download))
        .route(
            &format!("{API_PREFIX}/downloads/sources/{{source}}/symbols"),
            get(get_source_symbols),
        )
        .route(
            &format!("{API_PREFIX}/downloads/symbols/{{symbol}}/status"),
            get(get_symbol_status),
        )
        .route(&format!("{API_PREFIX}/inventory"), get(get_inventory))
        .with_state(ApiState { manager })
}

#[derive(Clone)]
struct ApiState {
    manager: Arc<DownloadJobManager>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        let status = match &err {
            DownloadError::InvalidRequest(_)
            | DownloadError::Validation(_)
            | DownloadError::UnsupportedSource(_)
            | DownloadError::SymbolNotListed { .. } => StatusCode::BAD_REQUEST,
            DownloadError::JobNotFound(_) => StatusCode::NOT_FOUND,
            DownloadError::Exchange(_) => StatusCode::BAD_GATEWAY,
            DownloadError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(
                component = "api",
                event = "api.request_failed",
                status = status.as_u16(),
                error = %err
            );
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ActiveParams {
    source: Option<String>,
    sort_by: Option<String>,
    sort_direction: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct CancelParams {
    force: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SymbolStatusParams {
    timeframe: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InventoryParams {
    asset_type: Option<String>,
    exchange: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct AcceptedResponse {
    message: &'static str,
    job_id: JobId,
}

async fn post_download(
    State(state): State<ApiState>,
    Json(request): Json<DownloadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = state.manager.initiate_download(&request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            message: "data download initiated",
            job_id,
        }),
    ))
}

async fn get_download_status(
    State(state): State<ApiState>,
    Path(id): Path<JobId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.get_status(id)?))
}

async fn get_active_downloads(
    State(state): State<ApiState>,
    Query(params): Query<ActiveParams>,
) -> Result<impl IntoResponse, ApiError> {
    let source = non_empty(params.source.as_deref())
        .map(|raw| raw.parse::<DataSource>())
        .transpose()
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    let query = ActiveJobsQuery {
        source,
        sort_by: params
            .sort_by
            .as_deref()
            .map(JobSortField::parse_or_default)
            .unwrap_or_default(),
        direction: params
            .sort_direction
            .as_deref()
            .map(SortDirection::parse_or_default)
            .unwrap_or_default(),
        page: PageRequest::normalized(
            params.page.unwrap_or(1),
            params.limit.unwrap_or(ACTIVE_DEFAULT_LIMIT),
            ACTIVE_DEFAULT_LIMIT,
            MAX_PAGE_LIMIT,
        ),
    };
    Ok(Json(state.manager.list_active(&query)?))
}

async fn cancel_download(
    State(state): State<ApiState>,
    Path(id): Path<JobId>,
    Query(params): Query<CancelParams>,
) -> Result<impl IntoResponse, ApiError> {
    let force = params.force.unwrap_or(false);
    let body = match state.manager.cancel(id, force)? {
        CancelOutcome::Cancelled { previous_status } => json!({
            "job_id": id,
            "cancelled": true,
            "previous_status": previous_status,
            "current_status": "cancelled",
        }),
        CancelOutcome::NotCancellable { status } => json!({
            "job_id": id,
            "cancelled": false,
            "already_done": true,
            "status": status,
            "message": format!("job is already {status}; use ?force=true to cancel anyway"),
        }),
        CancelOutcome::NotFound => return Err(DownloadError::JobNotFound(id).into()),
    };
    Ok(Json(body))
}

async fn get_jobs_summary(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.summary()?))
}

async fn get_source_symbols(
    State(state): State<ApiState>,
    Path(source): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let source: DataSource = source
        .parse()
        .map_err(|err: crate::model::ModelError| ApiError::bad_request(err.to_string()))?;
    Ok(Json(state.manager.available_symbols(source).await?))
}

async fn get_symbol_status(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(params): Query<SymbolStatusParams>,
) -> Result<impl IntoResponse, ApiError> {
    let timeframe = match non_empty(params.timeframe.as_deref()) {
        Some(raw) => raw
            .parse::<Timeframe>()
            .map_err(|err| ApiError::bad_request(err.to_string()))?,
        None => DEFAULT_STATUS_TIMEFRAME,
    };
    Ok(Json(state.manager.symbol_data_status(&symbol, timeframe)?))
}

async fn get_inventory(
    State(state): State<ApiState>,
    Query(params): Query<InventoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = InventoryQuery {
        asset_type: non_empty(params.asset_type.as_deref()).map(AssetType::parse_lenient),
        exchange: non_empty(params.exchange.as_deref()).map(str::to_string),
        page: PageRequest::normalized(
            params.page.unwrap_or(1),
            params.limit.unwrap_or(INVENTORY_DEFAULT_LIMIT),
            INVENTORY_DEFAULT_LIMIT,
            MAX_PAGE_LIMIT,
        ),
    };
    Ok(Json(state.manager.inventory(&query)?))
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|value| !value.is_empty())
}
