// dtos/subscriptiondtos.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    dealershipmodel::Dealership,
    subscriptionmodels::{
        DealershipSubscription, Payment, PlanTier, SubscriptionNotification, SubscriptionStatus,
    },
};

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct RegisterDealershipDto {
    #[validate(length(min = 2, message = "Dealership name is required"))]
    pub name: String,

    #[validate(email(message = "Contact email is invalid"))]
    pub contact_email: String,

    pub phone: Option<String>,
    pub city: Option<String>,

    /// Plan slug; defaults to starter when omitted
    pub plan: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ChangePlanDto {
    #[validate(length(min = 1, message = "Plan is required"))]
    pub plan: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilterSubscriptionDto {
    pub id: Uuid,
    pub dealership_id: Uuid,
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub next_payment_date: Option<DateTime<Utc>>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub auto_renew: bool,
}

impl FilterSubscriptionDto {
    pub fn filter_subscription(subscription: &DealershipSubscription) -> Self {
        FilterSubscriptionDto {
            id: subscription.id,
            dealership_id: subscription.dealership_id,
            plan: subscription.plan,
            status: subscription.status,
            start_date: subscription.start_date,
            end_date: subscription.end_date,
            next_payment_date: subscription.next_payment_date,
            last_payment_date: subscription.last_payment_date,
            auto_renew: subscription.auto_renew,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntitlementsDto {
    pub dealership_id: Uuid,
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
    pub entitled: bool,
    pub max_listings: i32,
    pub listings_used: i32,
    pub max_featured_listings: i32,
    pub featured_listings_used: i32,
    pub max_photos_per_listing: i32,
}

impl EntitlementsDto {
    pub fn from_subscription(subscription: &DealershipSubscription) -> Self {
        EntitlementsDto {
            dealership_id: subscription.dealership_id,
            plan: subscription.plan,
            status: subscription.status,
            entitled: subscription.status.is_entitled(),
            max_listings: subscription.plan.max_listings(),
            listings_used: subscription.listings_used,
            max_featured_listings: subscription.plan.max_featured_listings(),
            featured_listings_used: subscription.featured_listings_used,
            max_photos_per_listing: subscription.plan.max_photos_per_listing(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterDealershipResponseDto {
    pub status: String,
    pub dealership: Dealership,
    pub subscription: FilterSubscriptionDto,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponseDto {
    pub status: String,
    pub subscription: FilterSubscriptionDto,
}

#[derive(Debug, Serialize)]
pub struct NotificationListResponseDto {
    pub status: String,
    pub notifications: Vec<SubscriptionNotification>,
    pub results: usize,
}

#[derive(Debug, Serialize)]
pub struct PaymentListResponseDto {
    pub status: String,
    pub payments: Vec<Payment>,
    pub results: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_dto_requires_valid_email() {
        let dto = RegisterDealershipDto {
            name: "Windhoek Motors".to_string(),
            contact_email: "not-an-email".to_string(),
            phone: None,
            city: Some("Windhoek".to_string()),
            plan: None,
        };
        assert!(dto.validate().is_err());
    }

    #[test]
    fn entitlements_reflect_plan_and_status() {
        let subscription = DealershipSubscription {
            id: Uuid::new_v4(),
            dealership_id: Uuid::new_v4(),
            plan: PlanTier::Growth,
            status: SubscriptionStatus::Active,
            provider: None,
            provider_customer_id: None,
            provider_subscription_id: None,
            start_date: None,
            end_date: None,
            next_payment_date: None,
            last_payment_date: None,
            auto_renew: true,
            current_listings: 3,
            listings_used: 3,
            featured_listings_used: 1,
            created_at: None,
            updated_at: None,
        };

        let dto = EntitlementsDto::from_subscription(&subscription);
        assert!(dto.entitled);
        assert_eq!(dto.max_listings, 50);
        assert_eq!(dto.listings_used, 3);
    }
}
