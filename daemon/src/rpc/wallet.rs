use super::{authorize, require_operator, AppState, ApiError};
use crate::core::storage::{TransactionProvider, WalletProvider};
use actix_web::{web, HttpRequest, HttpResponse};
use festa_common::{
    api::{
        wallet::{
            CancelParams, MutationParams, RefundParams, TransactionListResponse,
            TransactionResponse, WalletResponse,
        },
        Paging, TimeRange,
    },
    crypto::Id,
    transaction::TransactionSource,
};
use serde::Deserialize;
use std::str::FromStr;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/wallet")
            .route("", web::post().to(create_wallet))
            .route("/{id}", web::get().to(get_wallet))
            .route("/{id}/transactions", web::get().to(list_transactions))
            .route("/{id}/credit", web::post().to(credit))
            .route("/{id}/debit", web::post().to(debit)),
    )
    .service(
        web::scope("/transaction")
            .route("/{id}/refund", web::post().to(refund))
            .route("/{id}/cancel", web::post().to(cancel)),
    );
}

fn parse_id(raw: &str) -> Result<Id, ApiError> {
    Id::from_str(raw).map_err(|_| ApiError::Validation("malformed id".to_string()))
}

#[derive(Debug, Deserialize)]
struct CreateWalletParams {
    user_id: Id,
    currency_label: String,
    #[serde(default = "default_exchange_rate")]
    exchange_rate_milli: u64,
}

fn default_exchange_rate() -> u64 {
    1000
}

async fn create_wallet(
    state: web::Data<AppState>,
    req: HttpRequest,
    params: web::Json<CreateWalletParams>,
) -> Result<HttpResponse, ApiError> {
    let session = authorize(&state, &req, true).await?;
    require_operator(&session)?;

    let params = params.into_inner();
    let wallet = state
        .ledger
        .open_wallet(
            &session.ctx,
            &session.store,
            params.user_id,
            params.currency_label,
            params.exchange_rate_milli,
        )
        .await?;

    Ok(HttpResponse::Created().json(WalletResponse::from(&wallet)))
}

async fn get_wallet(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let session = authorize(&state, &req, false).await?;
    let wallet_id = parse_id(&path)?;

    let wallet = session.store.get_wallet(&wallet_id).await?;
    Ok(HttpResponse::Ok().json(WalletResponse::from(&wallet)))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    min_ts: Option<u64>,
    max_ts: Option<u64>,
    #[serde(default)]
    skip: usize,
    limit: Option<usize>,
}

async fn list_transactions(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    let session = authorize(&state, &req, false).await?;
    let wallet_id = parse_id(&path)?;

    // 404 on unknown wallet rather than an empty list
    if !session.store.has_wallet(&wallet_id).await? {
        return Err(ApiError::NotFound);
    }

    let transactions = session
        .store
        .list_transactions(
            &wallet_id,
            TimeRange {
                min_ts: query.min_ts,
                max_ts: query.max_ts,
            },
            Paging {
                skip: query.skip,
                limit: query.limit,
            },
        )
        .await?;

    Ok(HttpResponse::Ok().json(TransactionListResponse {
        total: transactions.len(),
        transactions: transactions.iter().map(TransactionResponse::from).collect(),
    }))
}

async fn credit(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    params: web::Json<MutationParams>,
) -> Result<HttpResponse, ApiError> {
    let session = authorize(&state, &req, true).await?;
    require_operator(&session)?;
    let wallet_id = parse_id(&path)?;
    let params = params.into_inner();

    let outcome = state
        .ledger
        .credit(
            &session.ctx,
            &session.store,
            &wallet_id,
            params.amount,
            params.reference,
            params.idempotency_key,
            TransactionSource {
                stand_id: params.stand_id,
                ..Default::default()
            },
        )
        .await?;

    Ok(HttpResponse::Ok().json(TransactionResponse::from(outcome.transaction())))
}

async fn debit(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    params: web::Json<MutationParams>,
) -> Result<HttpResponse, ApiError> {
    let session = authorize(&state, &req, true).await?;
    require_operator(&session)?;
    let wallet_id = parse_id(&path)?;
    let params = params.into_inner();

    let outcome = state
        .ledger
        .debit(
            &session.ctx,
            &session.store,
            &wallet_id,
            params.amount,
            params.reference,
            params.idempotency_key,
            TransactionSource {
                stand_id: params.stand_id,
                ..Default::default()
            },
        )
        .await?;

    Ok(HttpResponse::Ok().json(TransactionResponse::from(outcome.transaction())))
}

async fn refund(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    params: web::Json<RefundParams>,
) -> Result<HttpResponse, ApiError> {
    let session = authorize(&state, &req, true).await?;
    require_operator(&session)?;
    let transaction_id = parse_id(&path)?;
    let params = params.into_inner();

    let outcome = state
        .ledger
        .refund(
            &session.ctx,
            &session.store,
            &transaction_id,
            params.amount,
            params.reason,
            params.idempotency_key,
        )
        .await?;

    Ok(HttpResponse::Ok().json(TransactionResponse::from(outcome.transaction())))
}

async fn cancel(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    params: web::Json<CancelParams>,
) -> Result<HttpResponse, ApiError> {
    let session = authorize(&state, &req, true).await?;
    require_operator(&session)?;
    let transaction_id = parse_id(&path)?;
    let params = params.into_inner();

    let outcome = state
        .ledger
        .cancel(
            &session.ctx,
            &session.store,
            &transaction_id,
            params.reason,
            params.idempotency_key,
            params.admin_override,
        )
        .await?;

    Ok(HttpResponse::Ok().json(TransactionResponse::from(outcome.transaction())))
}
