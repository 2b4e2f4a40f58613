// handler/webhooks.rs
use std::sync::Arc;

use axum::{http::HeaderMap, response::IntoResponse, Extension, Json};
use serde_json::json;

use crate::{
    error::{ErrorMessage, HttpError},
    service::{
        analytics::AnalyticsEvent,
        error::ReconcileError,
        events::{NormalizedEvent, Provider},
        reconciler::Ack,
    },
    AppState,
};

/// Stripe webhook endpoint. Signature is verified over the raw body before
/// anything is parsed; a bad signature is the only 4xx in the flow.
pub async fn stripe_webhook(
    Extension(app_state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, HttpError> {
    let signature = signature_header(&headers, Provider::Stripe)?;

    if !app_state.stripe.verify_signature(body.as_bytes(), signature) {
        tracing::warn!("Invalid Stripe webhook signature received");
        return Err(ReconcileError::InvalidSignature.into());
    }

    let event = app_state.stripe.parse_event(&body)?;
    dispatch(&app_state, event).await
}

/// Paystack webhook endpoint; same contract as the Stripe one.
pub async fn paystack_webhook(
    Extension(app_state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, HttpError> {
    let signature = signature_header(&headers, Provider::Paystack)?;

    if !app_state.paystack.verify_signature(body.as_bytes(), signature) {
        tracing::warn!("Invalid Paystack webhook signature received");
        return Err(ReconcileError::InvalidSignature.into());
    }

    let event = app_state.paystack.parse_event(&body)?;
    dispatch(&app_state, event).await
}

fn signature_header<'a>(
    headers: &'a HeaderMap,
    provider: Provider,
) -> Result<&'a str, HttpError> {
    headers
        .get(provider.signature_header())
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| HttpError::bad_request(ErrorMessage::SignatureNotProvided.to_string()))
}

async fn dispatch(
    app_state: &Arc<AppState>,
    event: NormalizedEvent,
) -> Result<Json<serde_json::Value>, HttpError> {
    let provider = event.provider;
    let event_type = event.event_type.clone();

    let ack = app_state.reconciler.handle_event(event).await?;

    if ack == Ack::Processed {
        app_state.analytics.track(AnalyticsEvent {
            event_type: format!("billing.{}", event_type),
            dealership_id: None,
            session_id: None,
            metadata: Some(json!({ "provider": provider.to_str() })),
            occurred_at: chrono::Utc::now(),
        });
    }

    // Every non-error disposition acknowledges, so the provider never
    // retries events we chose to skip.
    Ok(Json(json!({ "received": true })))
}
