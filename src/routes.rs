// routes.rs
use std::sync::Arc;

use axum::{middleware, routing::{get, post, put}, Extension, Json, Router};
use tower_http::trace::TraceLayer;
use serde_json::json;

use crate::{
    handler::{
        dealerships::{get_entitlements, register_dealership},
        subscriptions::{change_plan, get_my_subscription, list_my_notifications, list_my_payments},
        webhooks::{paystack_webhook, stripe_webhook},
    },
    middleware::auth,
    AppState,
};

// Health check handler
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "Server is running"
    }))
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Webhook endpoints are public; integrity comes from the provider
    // signature, never from a session.
    let webhook_routes = Router::new()
        .route("/stripe/webhook", post(stripe_webhook))
        .route("/paystack/webhook", post(paystack_webhook));

    let public_dealership_routes = Router::new()
        .route("/register", post(register_dealership));

    let protected_dealership_routes = Router::new()
        .route("/:dealership_id/entitlements", get(get_entitlements))
        .layer(middleware::from_fn(auth));

    let dealership_routes = Router::new()
        .merge(public_dealership_routes)
        .merge(protected_dealership_routes);

    let subscription_routes = Router::new()
        .route("/me", get(get_my_subscription))
        .route("/notifications", get(list_my_notifications))
        .route("/payments", get(list_my_payments))
        .route("/:dealership_id/plan", put(change_plan))
        .layer(middleware::from_fn(auth));

    let api_route = Router::new()
        .merge(webhook_routes)
        .nest("/dealerships", dealership_routes)
        .nest("/subscriptions", subscription_routes)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(app_state));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_route)
}
