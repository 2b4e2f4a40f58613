pub mod dealershipmodel;
pub mod subscriptionmodels;
