use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

pub async fn list_calls(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let calls = state.call_summaries();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": calls.len(),
        "calls": calls
    })))
}

pub async fn get_call(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let call = state
        .get_call(&id)
        .ok_or_else(|| AppError::NotFound(format!("Call '{}' not found", id)))?;

    Ok(HttpResponse::Ok().json(call.summary()))
}

/// Hang up a call and drop it from the registry.
pub async fn hangup_call(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let call = state
        .remove_call(&id)
        .ok_or_else(|| AppError::NotFound(format!("Call '{}' not found", id)))?;

    info!("Hangup requested for call {}", id);
    call.hangup().await;

    Ok(HttpResponse::Ok().json(json!({
        "status": "ended",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "call": call.summary()
    })))
}
