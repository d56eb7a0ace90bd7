//! Data source API routes
//!
//! - `GET /datasources` - List readable data sources
//! - `GET /datasources/:id` - Get one data source
//! - `GET /datasources/upload` - Probe a chunk of a resumable upload
//! - `POST /datasources/upload` - Store a chunk, finalizing on the last one
//! - `DELETE /datasources/upload` - Discard an unfinished upload
//! - `GET /datasources/:id/download` - Stream the raw artifact
//! - `GET /datasources/:id/sample` - First rows as typed cells
//! - `POST /datasources/:id/infer` - Infer and store the schema

use crate::api::response::ApiResponse;
use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::Caller;
use crate::staging::ChunkState;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use super::{
    commands::{DiscardUploadCommand, InferSchemaCommand, UploadChunkCommand},
    queries::{DownloadQuery, ListDataSourcesQuery, ProbeUploadQuery, SampleQuery},
};

pub fn datasources_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_data_sources))
        .route(
            "/upload",
            get(probe_upload).post(upload_chunk).delete(discard_upload),
        )
        .route("/:id", get(get_data_source))
        .route("/:id/download", get(download_data_source))
        .route("/:id/sample", get(sample_data_source))
        .route("/:id/infer", post(infer_schema))
}

#[tracing::instrument(skip(state, caller))]
async fn list_data_sources(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(query): Query<ListDataSourcesQuery>,
) -> AppResult<Response> {
    let response = super::queries::list::handle(&state.gateway, &caller, query).await?;
    Ok(ApiResponse::paginated(response.items, response.pagination).into_response())
}

#[tracing::instrument(skip(state, caller))]
async fn get_data_source(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<i32>,
) -> AppResult<Response> {
    let data_source = state.gateway.data_source(&caller, id).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(data_source))).into_response())
}

/// `200` when the chunk is already stored, `404` when it still has to be sent
#[tracing::instrument(skip(state, _caller))]
async fn probe_upload(
    State(state): State<AppState>,
    Caller(_caller): Caller,
    Query(query): Query<ProbeUploadQuery>,
) -> AppResult<Response> {
    let chunk = query.chunk_number;
    match super::queries::probe::handle(&state.gateway, query).await? {
        ChunkState::Present => Ok(ApiResponse::ok().into_response()),
        ChunkState::Absent => Err(AppError::NotFound(format!("Chunk {} not uploaded", chunk))),
    }
}

#[tracing::instrument(skip(state, caller, body))]
async fn upload_chunk(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(command): Query<UploadChunkCommand>,
    body: Body,
) -> AppResult<Response> {
    let reader = Box::pin(StreamReader::new(
        body.into_data_stream().map_err(std::io::Error::other),
    ));
    let status = super::commands::upload::handle(&state.gateway, &caller, command, reader).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(status))).into_response())
}

#[tracing::instrument(skip(state, caller))]
async fn discard_upload(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(command): Query<DiscardUploadCommand>,
) -> AppResult<Response> {
    super::commands::upload::discard(&state.gateway, &caller, command).await?;
    Ok(ApiResponse::ok().into_response())
}

/// Authenticated by the regular headers or by a signed `token`
#[tracing::instrument(skip(state, headers, query))]
async fn download_data_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
    Query(query): Query<DownloadQuery>,
) -> AppResult<Response> {
    let download =
        super::queries::download::handle(&state.gateway, &state.auth, &headers, id, query).await?;
    Ok(download.into_response())
}

#[tracing::instrument(skip(state, caller))]
async fn sample_data_source(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<i32>,
    Query(query): Query<SampleQuery>,
) -> AppResult<Response> {
    let rows = super::queries::sample::handle(&state.gateway, &caller, id, query).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(rows))).into_response())
}

#[tracing::instrument(skip(state, caller, command))]
async fn infer_schema(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<i32>,
    Json(command): Json<InferSchemaCommand>,
) -> AppResult<Response> {
    let data_source = super::commands::infer::handle(&state.gateway, &caller, id, command).await?;
    tracing::info!(
        data_source_id = data_source.id,
        attributes = data_source.attributes.len(),
        "Schema inferred via API"
    );
    Ok(ApiResponse::ok().into_response())
}
