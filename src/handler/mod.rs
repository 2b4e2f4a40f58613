pub mod dealerships;
pub mod subscriptions;
pub mod webhooks;
