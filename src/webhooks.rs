use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::config::UPGRADE_EVENT;
use crate::core::errors::{ApiError, ApiResult};
use crate::core::helpers::authorization_credential;
use crate::users::AccountChanges;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct BillingEvent {
    pub event: String,
    #[serde(default)]
    pub data: BillingEventData,
}

#[derive(Debug, Default, Deserialize)]
pub struct BillingEventData {
    #[serde(default)]
    pub user_id: u64,
}

/// Billing provider callback. Marks an account as upgraded; there is no way to downgrade here.
pub async fn handle_upgrade_webhook(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> ApiResult<HttpResponse> {
    match authorization_credential(&req, "ApiKey") {
        Some(key) if key == state.webhook_key => {}
        _ => return Err(ApiError::unauthorized("bad webhook key")),
    }

    let payload: BillingEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid webhook body: {}", e)))?;

    if payload.event != UPGRADE_EVENT {
        return Ok(HttpResponse::NoContent().finish());
    }

    let account_id = payload.data.user_id;
    let changes = AccountChanges {
        is_upgraded: Some(true),
        ..Default::default()
    };
    web::block(move || state.accounts.update(account_id, changes)).await??;

    tracing::info!(account_id, "account upgraded");
    Ok(HttpResponse::NoContent().finish())
}
