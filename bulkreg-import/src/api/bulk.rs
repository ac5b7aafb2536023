//! Bulk import API handlers
//!
//! POST /bulk/preview, POST /bulk/execute, GET /bulk/status/:job_id,
//! GET /bulk/rows/:import_id, GET /bulk/report/:import_id

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::sessions::{self, ConfirmOutcome},
    error::{ApiError, ApiResult},
    models::{ImportRow, ImportSession, JobStatus, RowValidation},
    services::{row_parser, row_validator, status_reporter, JobExecutor, ReferenceData},
    AppState,
};

/// Preview responses carry at most this many rows inline; the full set
/// stays available through GET /bulk/rows.
const PREVIEW_ROW_LIMIT: usize = 100;

/// Per-status row tallies for a preview response
#[derive(Debug, Serialize)]
pub struct PreviewSummary {
    pub total: usize,
    pub ready: usize,
    pub needs_review: usize,
    pub invalid: usize,
}

/// POST /bulk/preview response
#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub import_id: Uuid,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub summary: PreviewSummary,
    pub rows: Vec<ImportRow>,
}

/// A single row-level group override in an execute request
#[derive(Debug, Deserialize)]
pub struct OverrideSpec {
    pub row_index: i64,
    pub group_id: i64,
}

/// POST /bulk/execute request
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub import_id: Uuid,
    pub owner_id: i64,
    #[serde(default)]
    pub overrides: Vec<OverrideSpec>,
}

/// POST /bulk/execute response
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner_id: i64,
}

/// POST /bulk/preview
///
/// Accepts a multipart upload (`file` plus an `owner_id` field), parses and
/// validates every row, and persists the session for later confirmation.
pub async fn preview(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<PreviewResponse>> {
    let mut filename: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut owner_id: Option<i64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                filename = field.file_name().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
                file_bytes = Some(bytes.to_vec());
            }
            Some("owner_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read owner_id: {}", e)))?;
                owner_id = Some(text.trim().parse().map_err(|_| {
                    ApiError::BadRequest(format!("owner_id must be an integer, got '{}'", text))
                })?);
            }
            _ => {}
        }
    }

    let file_bytes =
        file_bytes.ok_or_else(|| ApiError::BadRequest("Missing 'file' field".to_string()))?;
    let owner_id =
        owner_id.ok_or_else(|| ApiError::BadRequest("Missing 'owner_id' field".to_string()))?;
    let filename = filename.unwrap_or_else(|| "upload.csv".to_string());

    if !filename.to_ascii_lowercase().ends_with(".csv") {
        return Err(ApiError::BadRequest(
            "Invalid file format. Only CSV files are allowed.".to_string(),
        ));
    }

    let mut rows = row_parser::parse(&file_bytes)?;

    let reference = ReferenceData::load(&state.db, owner_id).await?;
    row_validator::validate_rows(&mut rows, &reference);

    let session = ImportSession::new(
        owner_id,
        Some(filename),
        rows.len() as i64,
        state.config.session_ttl_minutes,
    );
    sessions::create_session(&state.db, &session, &rows).await?;

    let summary = summarize(&rows);
    tracing::info!(
        import_id = %session.import_id,
        owner_id,
        total = summary.total,
        ready = summary.ready,
        needs_review = summary.needs_review,
        invalid = summary.invalid,
        "Preview session created"
    );

    rows.truncate(PREVIEW_ROW_LIMIT);
    Ok(Json(PreviewResponse {
        import_id: session.import_id,
        expires_at: session.expires_at,
        summary,
        rows,
    }))
}

fn summarize(rows: &[ImportRow]) -> PreviewSummary {
    let mut summary = PreviewSummary {
        total: rows.len(),
        ready: 0,
        needs_review: 0,
        invalid: 0,
    };
    for row in rows {
        match row.validation_status {
            RowValidation::Ready => summary.ready += 1,
            RowValidation::NeedsReview => summary.needs_review += 1,
            RowValidation::Invalid => summary.invalid += 1,
        }
    }
    summary
}

/// POST /bulk/execute
///
/// Applies any group overrides, then confirms the session. The first
/// confirmation spawns the background job; repeats return the same job
/// without spawning another.
pub async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<(StatusCode, Json<ExecuteResponse>)> {
    if !request.overrides.is_empty() {
        let overrides: Vec<(i64, i64)> = request
            .overrides
            .iter()
            .map(|o| (o.row_index, o.group_id))
            .collect();
        sessions::apply_overrides(&state.db, request.import_id, request.owner_id, &overrides)
            .await?;
    }

    let outcome = sessions::confirm_session(&state.db, request.import_id, request.owner_id).await?;

    match outcome {
        ConfirmOutcome::Started(job) => {
            tracing::info!(
                import_id = %request.import_id,
                job_id = %job.job_id,
                "Import confirmed, spawning background job"
            );
            let executor = JobExecutor::new(state.db.clone(), state.config.row_delay_ms);
            executor.spawn(request.import_id, request.owner_id);
            Ok((
                StatusCode::ACCEPTED,
                Json(ExecuteResponse {
                    job_id: job.job_id,
                    status: job.status,
                }),
            ))
        }
        ConfirmOutcome::AlreadyConfirmed(job) => {
            tracing::info!(
                import_id = %request.import_id,
                job_id = %job.job_id,
                "Duplicate confirmation, returning existing job"
            );
            Ok((
                StatusCode::OK,
                Json(ExecuteResponse {
                    job_id: job.job_id,
                    status: job.status,
                }),
            ))
        }
    }
}

/// GET /bulk/status/:job_id
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<Json<crate::models::BulkJob>> {
    let job = status_reporter::job_status(&state.db, job_id, query.owner_id).await?;
    Ok(Json(job))
}

/// GET /bulk/rows/:import_id
///
/// Full row detail for a session, in original file order.
pub async fn session_rows(
    State(state): State<AppState>,
    Path(import_id): Path<Uuid>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<Json<Vec<ImportRow>>> {
    let rows = status_reporter::session_rows(&state.db, import_id, query.owner_id).await?;
    Ok(Json(rows))
}

/// GET /bulk/report/:import_id
///
/// CSV error report covering invalid and failed rows.
pub async fn error_report(
    State(state): State<AppState>,
    Path(import_id): Path<Uuid>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<Response> {
    let csv = status_reporter::error_report_csv(&state.db, import_id, query.owner_id).await?;
    let disposition = format!("attachment; filename=\"import-errors-{}.csv\"", import_id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

/// Build bulk import routes
pub fn bulk_routes() -> Router<AppState> {
    Router::new()
        .route("/bulk/preview", post(preview))
        .route("/bulk/execute", post(execute))
        .route("/bulk/status/:job_id", get(job_status))
        .route("/bulk/rows/:import_id", get(session_rows))
        .route("/bulk/report/:import_id", get(error_report))
}
