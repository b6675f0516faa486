//! Service catalog handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use mongodb::bson::DateTime;
use prohealth_core::error::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{middleware::UserContext, models::ServiceOffering, AppState};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateServiceRequest {
    #[validate(length(min = 1, message = "Service name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Service description is required"))]
    pub description: String,
    #[validate(range(min = 1.0, message = "Price must be at least 1 KES"))]
    pub price: f64,
    #[validate(range(min = 1, message = "Duration must be at least 1 minute"))]
    pub duration_minutes: i32,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServiceResponse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub duration_minutes: i32,
    pub image_url: Option<String>,
}

impl From<ServiceOffering> for ServiceResponse {
    fn from(s: ServiceOffering) -> Self {
        Self {
            id: s.id,
            name: s.name,
            description: s.description,
            price: s.price,
            duration_minutes: s.duration_minutes,
            image_url: s.image_url,
        }
    }
}

pub async fn create_service(
    State(state): State<AppState>,
    _user: UserContext,
    Json(payload): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<ServiceResponse>), AppError> {
    payload.validate()?;

    let now = DateTime::now();
    let service = ServiceOffering {
        id: Uuid::new_v4(),
        name: payload.name,
        description: payload.description,
        price: payload.price,
        duration_minutes: payload.duration_minutes,
        image_url: payload.image_url,
        created_at: now,
        updated_at: now,
    };

    state.repository.create_service(service.clone()).await?;

    tracing::info!(service_id = %service.id, name = %service.name, "Service created");

    Ok((StatusCode::CREATED, Json(service.into())))
}

pub async fn get_service(
    State(state): State<AppState>,
    Path(service_id): Path<Uuid>,
) -> Result<Json<ServiceResponse>, AppError> {
    let service = state
        .repository
        .find_service(service_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Service not found")))?;

    Ok(Json(service.into()))
}

pub async fn list_services(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServiceResponse>>, AppError> {
    let services = state.repository.list_services().await?;
    Ok(Json(services.into_iter().map(Into::into).collect()))
}
