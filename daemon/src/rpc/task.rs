use super::{authorize, require_platform_admin, AppState, ApiError};
use crate::{
    core::storage::DeadLetterProvider,
    jobs::{task::TaskOptions, worker::replay_dead_letter, QueueClass},
};
use actix_web::{web, HttpRequest, HttpResponse};
use festa_common::{
    api::{
        task::{DeadLetterResponse, EnqueueParams, EnqueueResponse},
        Paging,
    },
    crypto::Id,
};
use serde::Deserialize;
use std::{str::FromStr, time::Duration};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/task")
            .route("", web::post().to(enqueue))
            .route("/dead-letter", web::get().to(list_dead_letters))
            .route("/dead-letter/{id}/replay", web::post().to(replay)),
    );
}

async fn enqueue(
    state: web::Data<AppState>,
    req: HttpRequest,
    params: web::Json<EnqueueParams>,
) -> Result<HttpResponse, ApiError> {
    let session = authorize(&state, &req, true).await?;
    require_platform_admin(&session)?;

    let params = params.into_inner();
    let queue = match params.queue.as_deref() {
        None => None,
        Some(raw) => Some(
            QueueClass::from_str(raw)
                .ok_or_else(|| ApiError::Validation(format!("unknown queue: {}", raw)))?,
        ),
    };

    let task = state
        .enqueuer
        .enqueue(
            &params.kind,
            params.payload,
            TaskOptions {
                queue,
                delay: params.delay_secs.map(Duration::from_secs),
                max_retries: params.max_retries,
                timeout: params.timeout_secs.map(Duration::from_secs),
                idempotency_key: params.idempotency_key,
            },
        )
        .await?;

    Ok(HttpResponse::Accepted().json(EnqueueResponse {
        task_id: task.id.to_hex(),
        queue: task.queue.to_string(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct DeadLetterQuery {
    #[serde(default)]
    skip: usize,
    limit: Option<usize>,
}

async fn list_dead_letters(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<DeadLetterQuery>,
) -> Result<HttpResponse, ApiError> {
    let session = authorize(&state, &req, false).await?;
    require_platform_admin(&session)?;

    let entries = state
        .storage
        .list_dead_letters(Paging {
            skip: query.skip,
            limit: query.limit,
        })
        .await?;

    let response: Vec<DeadLetterResponse> = entries
        .iter()
        .map(|entry| DeadLetterResponse {
            task_id: entry.task_id.to_hex(),
            kind: entry.kind.clone(),
            payload: entry.payload_value(),
            last_error: entry.last_error.clone(),
            retry_count: entry.retry_count,
            processed_at: entry.processed_at,
        })
        .collect();

    Ok(HttpResponse::Ok().json(response))
}

async fn replay(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let session = authorize(&state, &req, true).await?;
    require_platform_admin(&session)?;

    let task_id =
        Id::from_str(&path).map_err(|_| ApiError::Validation("malformed id".to_string()))?;

    match replay_dead_letter(&state.storage, &state.enqueuer, &task_id).await? {
        Some(task) => Ok(HttpResponse::Accepted().json(EnqueueResponse {
            task_id: task.id.to_hex(),
            queue: task.queue.to_string(),
        })),
        None => Err(ApiError::NotFound),
    }
}
