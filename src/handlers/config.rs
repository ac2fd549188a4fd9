use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration with the upstream credential masked.
///
/// Read-only: configuration is fixed for the life of the process.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.config();
    let redacted = config.redacted()?;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "credential_configured": config.has_credential(),
        "config": redacted
    })))
}
