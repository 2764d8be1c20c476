//! # Job and Batch Handlers
//!
//! Thin wrappers over the ledger, router, batch scheduler, and undo
//! dispatcher. No orchestration decisions happen here.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;

use crate::engine::{RouterError, UndoError};
use crate::ledger::LedgerError;
use crate::models::{Job, JobSource};
use crate::state_machine::JobState;
use crate::storage::JobFilter;
use crate::web::{ApiError, AppState};

fn map_ledger_error(e: LedgerError) -> ApiError {
    match e {
        LedgerError::JobNotFound(id) => ApiError::NotFound(format!("job {id} not found")),
        LedgerError::RetryOfActiveJob { job_id, status } => ApiError::Conflict(format!(
            "job {job_id} is still {status}; only terminal jobs can be retried"
        )),
        other => ApiError::Internal(other.to_string()),
    }
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Job>, ApiError> {
    let job = state
        .engine
        .ledger()
        .get(job_id)
        .await
        .map_err(map_ledger_error)?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub source: Option<String>,
    pub owner_ref: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let statuses = params
        .status
        .map(|s| {
            JobState::from_str(&s)
                .map(|state| vec![state])
                .map_err(ApiError::Unprocessable)
        })
        .transpose()?;
    let sources = params
        .source
        .map(|s| {
            JobSource::from_str(&s)
                .map(|source| vec![source])
                .map_err(ApiError::Unprocessable)
        })
        .transpose()?;

    let filter = JobFilter {
        statuses,
        sources,
        owner_ref: params.owner_ref,
        batch_job_id: None,
        limit: Some(params.limit.unwrap_or(100).min(1000)),
    };

    let jobs = state
        .engine
        .ledger()
        .list(&filter)
        .await
        .map_err(map_ledger_error)?;
    Ok(Json(jobs))
}

/// Create a fresh job re-running a terminal one and enqueue its first step.
pub async fn retry(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let retry = state
        .engine
        .ledger()
        .retry(job_id)
        .await
        .map_err(map_ledger_error)?;

    state
        .engine
        .router()
        .dispatch_first_step(&retry)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((StatusCode::CREATED, Json(retry)))
}

#[derive(Debug, Deserialize)]
pub struct FailParams {
    pub reason: Option<String>,
}

/// Operator fail: force a non-terminal job into `failed` with a reason.
pub async fn fail(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    params: Option<Json<FailParams>>,
) -> Result<Json<Value>, ApiError> {
    let reason = params
        .and_then(|Json(p)| p.reason)
        .unwrap_or_else(|| "Failed by operator".to_string());

    let status = state
        .engine
        .ledger()
        .fail(job_id, reason)
        .await
        .map_err(|e| match e {
            LedgerError::Transition(inner) => ApiError::Conflict(inner.to_string()),
            other => map_ledger_error(other),
        })?;
    Ok(Json(json!({"job_id": job_id, "status": status})))
}

/// Release a parked job; it continues from the parked step's successor.
pub async fn resume(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    match state.engine.router().resume(job_id).await {
        Ok(outcome) => Ok(Json(json!({"job_id": job_id, "outcome": format!("{outcome:?}")}))),
        Err(RouterError::NotParked { job_id, status }) => Err(ApiError::Conflict(format!(
            "job {job_id} is {status}, not waiting"
        ))),
        Err(RouterError::Ledger(e)) => Err(map_ledger_error(e)),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

/// Replay the job's recorded effects in reverse.
pub async fn undo(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    match state.engine.undo().undo(job_id).await {
        Ok(report) => Ok(Json(serde_json::to_value(report).map_err(|e| {
            ApiError::Internal(e.to_string())
        })?)),
        Err(UndoError::AlreadyUndone(id)) => {
            Err(ApiError::Conflict(format!("job {id} was already undone")))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

pub async fn batch_progress(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let progress = state.engine.batch().progress(job_id).await.map_err(|e| {
        use crate::engine::BatchError;
        match e {
            BatchError::Ledger(inner) => map_ledger_error(inner),
            other => ApiError::Internal(other.to_string()),
        }
    })?;
    Ok(Json(
        serde_json::to_value(progress).map_err(|e| ApiError::Internal(e.to_string()))?,
    ))
}

/// Set the batch's cooperative cancellation flag; takes effect at the next
/// chunk boundary.
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.engine.batch().cancel(job_id).await.map_err(|e| {
        use crate::engine::BatchError;
        match e {
            BatchError::Ledger(inner) => map_ledger_error(inner),
            other => ApiError::Internal(other.to_string()),
        }
    })?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"job_id": job_id, "cancellation": "requested"})),
    ))
}
