//! AI symptom insight handler.
//!
//! The one endpoint guarded by the in-memory rate limiter: each caller gets
//! a fixed number of requests per window, and every attempt is recorded in
//! the AI interaction log, including blocked and failed ones.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use mongodb::bson::DateTime;
use prohealth_core::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    middleware::UserContext,
    models::{AiInteractionLog, AiInteractionStatus},
    services::InsightError,
    AppState,
};

#[derive(Debug, Deserialize, Validate)]
pub struct SymptomInsightRequest {
    #[validate(length(
        min = 1,
        max = 1000,
        message = "Symptom description must be between 1 and 1000 characters"
    ))]
    pub symptoms: String,
}

#[derive(Debug, Serialize)]
pub struct SymptomInsightResponse {
    pub insight: String,
}

pub async fn symptom_insights(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<SymptomInsightRequest>,
) -> Result<Response, AppError> {
    if !state.gemini.is_configured() {
        return Err(AppError::ServiceUnavailable(
            "The AI Health Assistant is temporarily unavailable. Please try again later."
                .to_string(),
        ));
    }

    let decision = state.rate_limiter.check(&user.user_id);
    if !decision.admitted {
        return Ok(rate_limited_response(&decision));
    }

    payload.validate()?;
    let symptoms = payload.symptoms.trim().to_string();
    if symptoms.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Symptom description cannot be empty"
        )));
    }
    if contains_markup(&symptoms) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Invalid input detected"
        )));
    }

    match state.gemini.generate_insight(&symptoms).await {
        Ok(insight) => {
            log_interaction(
                &state,
                &user.user_id,
                &symptoms,
                &insight,
                AiInteractionStatus::Success,
                None,
            )
            .await?;

            let mut response =
                Json(SymptomInsightResponse { insight }).into_response();
            response.headers_mut().extend(decision.headers());
            Ok(response)
        }
        Err(InsightError::Blocked(reason)) => {
            tracing::warn!(user_id = %user.user_id, reason = %reason, "AI response blocked");
            log_interaction(
                &state,
                &user.user_id,
                &symptoms,
                "",
                AiInteractionStatus::Error,
                Some(format!("AI response blocked due to: {}", reason)),
            )
            .await?;

            Err(AppError::BadRequest(anyhow::anyhow!(
                "AI response blocked due to: {}. Please rephrase your query or ensure it's appropriate.",
                reason
            )))
        }
        Err(err) => {
            tracing::error!(user_id = %user.user_id, error = %err, "AI insight request failed");
            log_interaction(
                &state,
                &user.user_id,
                &symptoms,
                "",
                AiInteractionStatus::Error,
                Some(err.to_string()),
            )
            .await?;

            Err(AppError::BadGateway(
                "An error occurred while processing your request with the AI service."
                    .to_string(),
            ))
        }
    }
}

fn rate_limited_response(decision: &prohealth_core::rate_limit::RateLimitDecision) -> Response {
    let retry_after = decision.retry_after_secs(Utc::now().timestamp_millis());

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": {
                "code": "RATE_LIMIT_EXCEEDED",
                "message": "Too many requests. Please try again later.",
                "retry_after": retry_after
            }
        })),
    )
        .into_response();

    response.headers_mut().extend(decision.headers());
    response
        .headers_mut()
        .insert(axum::http::header::RETRY_AFTER, retry_after.into());
    response
}

fn contains_markup(input: &str) -> bool {
    let lowered = input.to_lowercase();
    ["<script", "javascript:", "data:", "onerror=", "onload=", "onclick="]
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

async fn log_interaction(
    state: &AppState,
    user_id: &str,
    input: &str,
    response: &str,
    status: AiInteractionStatus,
    error: Option<String>,
) -> Result<(), AppError> {
    state
        .repository
        .log_ai_interaction(AiInteractionLog {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            input: input.to_string(),
            response: response.to_string(),
            status,
            error,
            created_at: DateTime::now(),
        })
        .await?;
    Ok(())
}
