pub mod cache;
pub mod db;
pub mod dealershipdb;
pub mod subscriptiondb;
