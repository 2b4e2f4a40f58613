// handler/dealerships.rs
use std::sync::Arc;

use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{
        cache::{CacheHelper, ENTITLEMENT_CACHE_TTL},
        dealershipdb::DealershipExt,
        subscriptiondb::SubscriptionExt,
    },
    dtos::subscriptiondtos::{
        EntitlementsDto, FilterSubscriptionDto, RegisterDealershipDto,
        RegisterDealershipResponseDto,
    },
    error::{ErrorMessage, HttpError},
    models::subscriptionmodels::PlanTier,
    service::analytics::AnalyticsEvent,
    AppState,
};

/// Creates the dealership together with its PENDING_PAYMENT subscription row.
/// The subscription stays pending until the first provider webhook arrives.
pub async fn register_dealership(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(body): Json<RegisterDealershipDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let plan = match &body.plan {
        Some(slug) => PlanTier::from_str(slug)
            .ok_or_else(|| HttpError::bad_request(format!("Unknown plan: {}", slug)))?,
        None => PlanTier::Starter,
    };

    if app_state
        .db_client
        .get_dealership_by_email(&body.contact_email)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .is_some()
    {
        return Err(HttpError::bad_request(
            "A dealership with this email is already registered".to_string(),
        ));
    }

    let dealership = app_state
        .db_client
        .save_dealership(
            &body.name,
            &body.contact_email,
            body.phone.as_deref(),
            body.city.as_deref(),
        )
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    let subscription = app_state
        .db_client
        .create_pending_subscription(dealership.id, plan)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    app_state.analytics.track(AnalyticsEvent::now(
        "dealership_registered",
        Some(dealership.id),
    ));

    let to_email = dealership.contact_email.clone();
    let name = dealership.name.clone();
    let mailer = app_state.mailer.clone();
    tokio::spawn(async move {
        if let Err(e) = mailer.send_welcome_email(&to_email, &name).await {
            tracing::warn!("failed to send welcome email to {}: {}", to_email, e);
        }
    });

    let response = RegisterDealershipResponseDto {
        status: "success".to_string(),
        dealership,
        subscription: FilterSubscriptionDto::filter_subscription(&subscription),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Entitlement lookup used by the marketplace when publishing listings.
/// Served from Redis when available; the reconciler invalidates on mutation.
pub async fn get_entitlements(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(dealership_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let cache_key = CacheHelper::entitlement_key(dealership_id);

    if let Some(redis) = &app_state.db_client.redis_client {
        if let Ok(Some(cached)) = CacheHelper::get::<EntitlementsDto>(redis, &cache_key).await {
            return Ok(Json(cached));
        }
    }

    let subscription = app_state
        .db_client
        .get_subscription_by_dealership(dealership_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found(ErrorMessage::SubscriptionNotFound.to_string()))?;

    let entitlements = EntitlementsDto::from_subscription(&subscription);

    if let Some(redis) = &app_state.db_client.redis_client {
        let _ = CacheHelper::set(redis, &cache_key, &entitlements, ENTITLEMENT_CACHE_TTL).await;
    }

    app_state.analytics.track(AnalyticsEvent::now(
        "entitlement_check",
        Some(dealership_id),
    ));

    Ok(Json(entitlements))
}
