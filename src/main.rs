mod config;
mod db;
mod dtos;
mod error;
mod handler;
mod mail;
mod middleware;
mod models;
mod routes;
mod service;
mod utils;

use std::sync::Arc;

use axum::http::{header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE}, HeaderValue, Method};
use config::Config;
use dotenv::dotenv;
use routes::create_router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::filter::LevelFilter;

use crate::db::db::DBClient;
use crate::mail::mailer::Mailer;
use crate::service::{
    analytics::{AnalyticsHandle, AnalyticsTracker},
    notification_service::NotificationService,
    paystack::PaystackAdapter,
    provider_api::ProviderApiClient,
    reconciler::SubscriptionReconciler,
    stripe::StripeAdapter,
};

#[derive(Clone)]
pub struct AppState {
    pub env: Config,
    pub db_client: Arc<DBClient>,
    pub reconciler: Arc<SubscriptionReconciler>,
    pub notification_service: Arc<NotificationService>,
    pub stripe: Arc<StripeAdapter>,
    pub paystack: Arc<PaystackAdapter>,
    pub analytics: AnalyticsHandle,
    pub mailer: Arc<Mailer>,
}

impl AppState {
    pub fn new(db_client: Arc<DBClient>, config: Config, analytics: AnalyticsHandle) -> Self {
        let mailer = Arc::new(Mailer::new(&config));
        let notification_service =
            Arc::new(NotificationService::new(db_client.clone(), mailer.clone()));
        let provider_api = Arc::new(ProviderApiClient::new(&config));

        let reconciler = Arc::new(SubscriptionReconciler::new(
            db_client.clone(),
            notification_service.clone(),
            provider_api,
        ));

        let stripe = Arc::new(StripeAdapter::new(config.stripe_webhook_secret.clone()));
        let paystack = Arc::new(PaystackAdapter::new(config.paystack_secret_key.clone()));

        Self {
            env: config,
            db_client,
            reconciler,
            notification_service,
            stripe,
            paystack,
            analytics,
            mailer,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .init();

    dotenv().ok();

    let config = Config::init();

    // Connect to PostgreSQL
    let pool = match PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => {
            println!("✅ Connection to the database is successful!");

            // Watch pool saturation in the background
            let pool_for_monitoring = pool.clone();
            let max_connections = 20;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
                loop {
                    interval.tick().await;
                    let size = pool_for_monitoring.size();
                    let idle = pool_for_monitoring.num_idle();
                    tracing::debug!("🔍 Pool Status - Active: {}, Idle: {}, Total: {}",
                        size - idle as u32, idle, size);

                    if size >= max_connections * 8 / 10 {
                        tracing::warn!("⚠️  Connection pool at 80% capacity! Consider increasing max_connections");
                    }
                }
            });

            pool
        }
        Err(err) => {
            println!("🔥 Failed to connect to the database: {:?}", err);
            std::process::exit(1);
        }
    };

    // Initialize DBClient with optional Redis
    let db_client = if let Some(ref redis_url) = config.redis_url {
        match DBClient::with_redis(pool.clone(), redis_url).await {
            Ok(client) => {
                if client.is_redis_available() {
                    println!("✅ Redis caching is ACTIVE - entitlement lookups are cached");
                } else {
                    println!("⚠️  Redis connection failed - Running without cache");
                }
                client
            }
            Err(e) => {
                println!("⚠️  Redis initialization error: {} - Running without cache", e);
                DBClient::new(pool)
            }
        }
    } else {
        println!("ℹ️  Redis not configured - Running without cache (set REDIS_URL to enable)");
        DBClient::new(pool)
    };
    let db_client = Arc::new(db_client);

    // Analytics queue is constructed once here and handed to handlers
    // through AppState; the worker drains it on CTRL+C.
    let (analytics_handle, analytics_tracker) = AnalyticsTracker::new(db_client.clone());
    tokio::spawn(async move {
        analytics_tracker
            .run(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
    });

    let allowed_origins = vec![
        "https://cars.na".parse::<HeaderValue>().unwrap(),
        "https://www.cars.na".parse::<HeaderValue>().unwrap(),
        "http://localhost:3000".parse::<HeaderValue>().unwrap(),
        "http://localhost:8000".parse::<HeaderValue>().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::PATCH]);

    let app_state = Arc::new(AppState::new(db_client, config.clone(), analytics_handle));

    let app = create_router(app_state.clone()).layer(cors);

    println!(
        "🚀 Billing service is running on http://localhost:{}",
        config.port
    );
    println!("📊 Cache status: {}", app_state.db_client.cache_status());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", &config.port))
        .await
        .unwrap();

    axum::serve(listener, app).await.unwrap();
}
