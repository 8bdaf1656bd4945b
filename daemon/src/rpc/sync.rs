use super::{authorize, require_operator, AppState, ApiError};
use actix_web::{web, HttpRequest, HttpResponse};
use festa_common::{api::sync::SubmitBatchParams, crypto::Id};
use serde::Deserialize;
use std::str::FromStr;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/sync")
            .route("/batch", web::post().to(submit_batch))
            .route("/batch/{id}", web::get().to(get_batch))
            .route("/pending", web::get().to(list_pending)),
    );
}

async fn submit_batch(
    state: web::Data<AppState>,
    req: HttpRequest,
    params: web::Json<SubmitBatchParams>,
) -> Result<HttpResponse, ApiError> {
    let session = authorize(&state, &req, true).await?;
    require_operator(&session)?;

    let result = state
        .sync
        .submit_batch(
            &session.ctx,
            &session.store,
            &session.tenant,
            params.into_inner(),
        )
        .await?;

    Ok(HttpResponse::Ok().json(result))
}

async fn get_batch(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let session = authorize(&state, &req, false).await?;
    let batch_id = Id::from_str(&path).map_err(|_| ApiError::Validation("malformed id".to_string()))?;

    match state.sync.get_batch(&session.store, &batch_id).await? {
        Some(result) => Ok(HttpResponse::Ok().json(result)),
        None => Err(ApiError::NotFound),
    }
}

#[derive(Debug, Deserialize)]
struct PendingQuery {
    device_id: String,
}

async fn list_pending(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<PendingQuery>,
) -> Result<HttpResponse, ApiError> {
    let session = authorize(&state, &req, false).await?;

    let pending = state
        .sync
        .list_pending(&session.store, &query.device_id)
        .await?;
    Ok(HttpResponse::Ok().json(pending))
}
