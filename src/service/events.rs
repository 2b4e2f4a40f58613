// service/events.rs
//
// Provider-neutral webhook event. Each provider adapter translates its raw
// payload into one of these before dispatch, so the reconciler runs a single
// state machine for both providers.
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Provider {
    Stripe,
    Paystack,
}

impl Provider {
    pub fn to_str(&self) -> &str {
        match self {
            Provider::Stripe => "stripe",
            Provider::Paystack => "paystack",
        }
    }

    pub fn signature_header(&self) -> &str {
        match self {
            Provider::Stripe => "stripe-signature",
            Provider::Paystack => "x-paystack-signature",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEventKind {
    /// Subscription activated or (re)created on the provider side.
    Activated {
        plan_code: Option<String>,
        provider_customer_id: Option<String>,
        period_end: Option<DateTime<Utc>>,
    },
    /// Subscription cancelled/disabled; terminal.
    Cancelled,
    PaymentSucceeded {
        amount_minor: i64,
        currency: String,
        reference: String,
        period_end: Option<DateTime<Utc>>,
    },
    PaymentFailed {
        amount_minor: i64,
        currency: String,
        reference: String,
        failure_reason: Option<String>,
    },
    /// Invoice changed without a payment outcome; recorded, never mutates state.
    InvoiceUpdated { summary: Option<String> },
    /// Recognized envelope, event type we choose not to handle.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub provider: Provider,
    /// Provider's delivery/event identifier, used for idempotency.
    pub event_id: String,
    /// Raw provider event type, kept for logging and the audit row.
    pub event_type: String,
    /// Correlation from event metadata, when the provider carried it through.
    pub dealership_id: Option<Uuid>,
    /// Fallback correlation against the stored provider subscription id.
    pub provider_subscription_id: Option<String>,
    pub kind: WebhookEventKind,
}
