pub mod subscriptiondtos;
