//! HTTP handlers for analysis submission and rate limit status.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use super::auth::authenticated_user;
use super::AppState;
use crate::client::resolve_client_id;
use crate::pipeline::{AnalysisJob, TargetUrl};

/// Body of an analysis request.
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub url: Option<String>,
}

fn error_response(status: StatusCode, error: &str, message: Option<String>) -> Response {
    let mut body = json!({ "success": false, "error": error });
    if let Some(message) = message {
        body["message"] = json!(message);
    }
    (status, Json(body)).into_response()
}

/// Submit a website for analysis.
///
/// Validates the URL, resolves the caller, and checks the rate limit exactly
/// once before handing the job to the pipeline.
#[instrument(skip_all, fields(client = tracing::field::Empty))]
pub async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected malformed analysis request");
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid request body",
                Some(rejection.body_text()),
            );
        }
    };

    let Some(target) = request.url.as_deref().and_then(TargetUrl::parse) else {
        debug!(url = ?request.url, "Rejected invalid URL");
        return error_response(StatusCode::BAD_REQUEST, "Invalid URL provided", None);
    };

    let user_id = authenticated_user(state.identity.as_ref(), &headers).await;
    let client_id = resolve_client_id(&headers);
    tracing::Span::current().record("client", client_id.as_str());

    let decision = state.limiter.check(&client_id, user_id.as_deref()).await;

    if !decision.allowed {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "success": false,
                "error": "Rate limit exceeded",
                "message": decision.message,
                "reset_time": decision.reset_time,
            })),
        )
            .into_response();

        if let Some(secs) = decision.retry_after_secs(state.limiter.now()) {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        return response;
    }

    let job = AnalysisJob {
        target: target.clone(),
        user_id,
        client_id,
    };

    match state.pipeline.submit(job).await {
        Ok(receipt) => {
            info!(
                analysis_id = %receipt.analysis_id,
                remaining = decision.remaining,
                "Analysis accepted"
            );
            Json(json!({
                "success": true,
                "analysis_id": receipt.analysis_id,
                "url": target.url,
                "normalized_url": target.normalized,
                "status": receipt.status,
                "remaining": decision.remaining,
                "message": "Analysis submitted successfully",
            }))
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Analysis pipeline failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Analysis failed",
                Some(e.to_string()),
            )
        }
    }
}

/// Report the caller's current usage without counting a request.
pub async fn rate_limit_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user_id = authenticated_user(state.identity.as_ref(), &headers).await;
    let client_id = resolve_client_id(&headers);
    let status = state.limiter.status(&client_id, user_id.as_deref()).await;

    Json(json!({
        "success": true,
        "authenticated": user_id.is_some(),
        "hourly": status.hourly,
        "daily": status.daily,
    }))
    .into_response()
}

/// Liveness check.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "primary_store": state.limiter.store().has_primary(),
    }))
}
