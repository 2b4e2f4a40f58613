pub mod analytics;
pub mod error;
pub mod events;
pub mod notification_service;
pub mod paystack;
pub mod provider_api;
pub mod reconciler;
pub mod stripe;
