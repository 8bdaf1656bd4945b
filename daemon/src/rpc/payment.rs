// Payment-provider webhook ingress. A confirmed payment intent becomes
// a wallet top-up task on the critical queue; the ledger credit happens
// in the fleet, never in this handler.
//
// Requests are authenticated with an HMAC signature over
// "{timestamp}.{body}" carried in X-Festa-Signature / X-Festa-Timestamp,
// the same scheme the outbound webhooks use.

use super::{AppState, ApiError};
use crate::jobs::task::TaskOptions;
use actix_web::{web, HttpRequest, HttpResponse};
use festa_common::{
    crypto::{sign, Id},
    time::get_current_time_in_seconds,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;

// Confirmations older than this are replays
const INGRESS_MAX_AGE_SECONDS: u64 = 300;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/payment/confirm", web::post().to(confirm));
}

#[derive(Debug, Deserialize)]
struct ConfirmPayload {
    tenant_id: Id,
    wallet_id: Id,
    amount: u64,
    intent_ref: String,
}

async fn confirm(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let Some(secret) = &state.ingress_secret else {
        warn!("Payment confirmation received but no ingress secret is configured");
        return Err(ApiError::Unauthorized);
    };

    let timestamp: u64 = req
        .headers()
        .get("X-Festa-Timestamp")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .ok_or(ApiError::Unauthorized)?;
    let provided = req
        .headers()
        .get("X-Festa-Signature")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| hex::decode(value).ok())
        .ok_or(ApiError::Unauthorized)?;

    let now = get_current_time_in_seconds();
    if now.abs_diff(timestamp) > INGRESS_MAX_AGE_SECONDS {
        return Err(ApiError::Unauthorized);
    }

    let message = format!(
        "{}.{}",
        timestamp,
        std::str::from_utf8(&body).map_err(|_| ApiError::Validation("invalid body".to_string()))?
    );
    let expected = sign(secret, message.as_bytes());
    if !bool::from(expected.as_bytes().as_slice().ct_eq(&provided)) {
        return Err(ApiError::Unauthorized);
    }

    let payload: ConfirmPayload = serde_json::from_slice(&body)
        .map_err(|err| ApiError::Validation(format!("invalid payload: {}", err)))?;

    // Idempotent on the intent reference: a gateway retrying its
    // webhook cannot double-credit
    let task = state
        .enqueuer
        .enqueue(
            crate::jobs::handlers::topup::KIND,
            serde_json::json!({
                "tenant_id": payload.tenant_id,
                "wallet_id": payload.wallet_id,
                "amount": payload.amount,
                "intent_ref": payload.intent_ref,
            }),
            TaskOptions {
                idempotency_key: Some(format!("topup-intent:{}", payload.intent_ref)),
                ..Default::default()
            },
        )
        .await;

    match task {
        Ok(task) => Ok(HttpResponse::Accepted().json(serde_json::json!({
            "task_id": task.id.to_hex(),
        }))),
        // The confirmation was already accepted earlier; acknowledge it
        // so the gateway stops retrying
        Err(crate::jobs::worker::EnqueueError::Duplicate(_)) => {
            Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "already_accepted" })))
        }
        Err(err) => Err(err.into()),
    }
}
