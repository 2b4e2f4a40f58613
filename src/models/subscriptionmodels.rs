// models/subscriptionmodels.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "plan_tier", rename_all = "snake_case")]
pub enum PlanTier {
    Starter,
    Growth,
    Pro,
}

impl PlanTier {
    pub fn to_str(&self) -> &str {
        match self {
            PlanTier::Starter => "starter",
            PlanTier::Growth => "growth",
            PlanTier::Pro => "pro",
        }
    }

    pub fn from_str(s: &str) -> Option<PlanTier> {
        match s {
            "starter" => Some(PlanTier::Starter),
            "growth" => Some(PlanTier::Growth),
            "pro" => Some(PlanTier::Pro),
            _ => None,
        }
    }

    pub fn max_listings(&self) -> i32 {
        match self {
            PlanTier::Starter => 10,
            PlanTier::Growth => 50,
            PlanTier::Pro => 200,
        }
    }

    pub fn max_featured_listings(&self) -> i32 {
        match self {
            PlanTier::Starter => 1,
            PlanTier::Growth => 10,
            PlanTier::Pro => 50,
        }
    }

    pub fn max_photos_per_listing(&self) -> i32 {
        match self {
            PlanTier::Starter => 8,
            PlanTier::Growth => 20,
            PlanTier::Pro => 40,
        }
    }

    /// Monthly price in NAD minor units (cents).
    pub fn monthly_price_minor(&self) -> i64 {
        match self {
            PlanTier::Starter => 29_900,
            PlanTier::Growth => 79_900,
            PlanTier::Pro => 199_900,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    PendingPayment,
    Active,
    PastDue,
    Cancelled,
    Suspended,
}

impl SubscriptionStatus {
    pub fn to_str(&self) -> &str {
        match self {
            SubscriptionStatus::PendingPayment => "pending_payment",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Suspended => "suspended",
        }
    }

    /// Whether a dealership in this status is entitled to its plan features.
    pub fn is_entitled(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::PastDue)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
pub enum PaymentStatus {
    Completed,
    Failed,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "notification_type", rename_all = "snake_case")]
pub enum NotificationType {
    PlanUpgraded,
    PlanChanged,
    PaymentReceived,
    PaymentFailed,
    SubscriptionCancelled,
    InvoiceUpdated,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct DealershipSubscription {
    pub id: Uuid,
    pub dealership_id: Uuid,
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
    pub provider: Option<String>,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub next_payment_date: Option<DateTime<Utc>>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub current_listings: i32,
    pub listings_used: i32,
    pub featured_listings_used: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider: String,
    pub provider_reference: String,
    pub failure_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct SubscriptionNotification {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub read: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_limits_increase_with_tier() {
        assert!(PlanTier::Starter.max_listings() < PlanTier::Growth.max_listings());
        assert!(PlanTier::Growth.max_listings() < PlanTier::Pro.max_listings());
        assert!(PlanTier::Starter.monthly_price_minor() < PlanTier::Pro.monthly_price_minor());
    }

    #[test]
    fn entitlement_follows_status() {
        assert!(SubscriptionStatus::Active.is_entitled());
        // Past-due keeps access until the provider gives up retrying
        assert!(SubscriptionStatus::PastDue.is_entitled());
        assert!(!SubscriptionStatus::PendingPayment.is_entitled());
        assert!(!SubscriptionStatus::Cancelled.is_entitled());
        assert!(!SubscriptionStatus::Suspended.is_entitled());
    }

    #[test]
    fn plan_tier_round_trips_from_str() {
        for tier in [PlanTier::Starter, PlanTier::Growth, PlanTier::Pro] {
            assert_eq!(PlanTier::from_str(tier.to_str()), Some(tier));
        }
        assert_eq!(PlanTier::from_str("enterprise"), None);
    }
}
