// handler/subscriptions.rs
use std::sync::Arc;

use axum::{extract::Path, response::IntoResponse, Extension, Json};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{
        cache::{CacheHelper, SUBSCRIPTION_CACHE_TTL},
        subscriptiondb::SubscriptionExt,
    },
    dtos::subscriptiondtos::{
        ChangePlanDto, FilterSubscriptionDto, NotificationListResponseDto, PaymentListResponseDto,
        SubscriptionResponseDto,
    },
    error::{ErrorMessage, HttpError},
    middleware::{AuthRole, JWTAuthMiddleware},
    models::subscriptionmodels::PlanTier,
    AppState,
};

const NOTIFICATION_PAGE_SIZE: i64 = 50;

pub async fn get_my_subscription(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let cache_key = CacheHelper::subscription_key(auth.dealership_id);

    if let Some(redis) = &app_state.db_client.redis_client {
        if let Ok(Some(cached)) =
            CacheHelper::get::<FilterSubscriptionDto>(redis, &cache_key).await
        {
            return Ok(Json(SubscriptionResponseDto {
                status: "success".to_string(),
                subscription: cached,
            }));
        }
    }

    let subscription = app_state
        .db_client
        .get_subscription_by_dealership(auth.dealership_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found(ErrorMessage::SubscriptionNotFound.to_string()))?;

    let filtered = FilterSubscriptionDto::filter_subscription(&subscription);

    if let Some(redis) = &app_state.db_client.redis_client {
        let _ = CacheHelper::set(redis, &cache_key, &filtered, SUBSCRIPTION_CACHE_TTL).await;
    }

    Ok(Json(SubscriptionResponseDto {
        status: "success".to_string(),
        subscription: filtered,
    }))
}

pub async fn list_my_notifications(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let subscription = app_state
        .db_client
        .get_subscription_by_dealership(auth.dealership_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found(ErrorMessage::SubscriptionNotFound.to_string()))?;

    let notifications = app_state
        .notification_service
        .list_for_subscription(subscription.id, NOTIFICATION_PAGE_SIZE)
        .await?;

    Ok(Json(NotificationListResponseDto {
        status: "success".to_string(),
        results: notifications.len(),
        notifications,
    }))
}

/// Payment ledger for the token's dealership, newest first.
pub async fn list_my_payments(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let subscription = app_state
        .db_client
        .get_subscription_by_dealership(auth.dealership_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found(ErrorMessage::SubscriptionNotFound.to_string()))?;

    let payments = app_state
        .db_client
        .list_payments(subscription.id, NOTIFICATION_PAGE_SIZE)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(PaymentListResponseDto {
        status: "success".to_string(),
        results: payments.len(),
        payments,
    }))
}

/// Admin-only plan change; the only subscription mutator outside the
/// webhook reconciler.
pub async fn change_plan(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    Path(dealership_id): Path<Uuid>,
    Json(body): Json<ChangePlanDto>,
) -> Result<impl IntoResponse, HttpError> {
    if auth.role != AuthRole::Admin {
        return Err(HttpError::new(
            ErrorMessage::PermissionDenied.to_string(),
            axum::http::StatusCode::FORBIDDEN,
        ));
    }

    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let plan = PlanTier::from_str(&body.plan)
        .ok_or_else(|| HttpError::bad_request(format!("Unknown plan: {}", body.plan)))?;

    let subscription = app_state
        .db_client
        .update_subscription_plan(dealership_id, plan)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found(ErrorMessage::SubscriptionNotFound.to_string()))?;

    if let Some(redis) = &app_state.db_client.redis_client {
        let _ = CacheHelper::delete(redis, &CacheHelper::entitlement_key(dealership_id)).await;
        let _ = CacheHelper::delete(redis, &CacheHelper::subscription_key(dealership_id)).await;
    }

    app_state
        .notification_service
        .notify_plan_changed(&subscription, plan)
        .await?;

    Ok(Json(SubscriptionResponseDto {
        status: "success".to_string(),
        subscription: FilterSubscriptionDto::filter_subscription(&subscription),
    }))
}
