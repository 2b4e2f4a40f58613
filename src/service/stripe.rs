// service/stripe.rs
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::service::{
    error::ReconcileError,
    events::{NormalizedEvent, Provider, WebhookEventKind},
};

/// Maximum accepted age of a `stripe-signature` timestamp, in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Translates Stripe webhook deliveries into normalized events.
///
/// Stripe signs `"{t}.{raw_body}"` with HMAC-SHA256 under the endpoint's
/// webhook secret; the `stripe-signature` header carries the timestamp and
/// one or more `v1` digests (`t=...,v1=...`).
pub struct StripeAdapter {
    webhook_secret: String,
}

impl StripeAdapter {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn verify_signature(&self, raw_body: &[u8], signature_header: &str) -> bool {
        self.verify_signature_at(raw_body, signature_header, Utc::now())
    }

    pub fn verify_signature_at(
        &self,
        raw_body: &[u8],
        signature_header: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = match timestamp {
            Some(t) => t,
            None => return false,
        };
        if candidates.is_empty() {
            return false;
        }

        if (now.timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!("Stripe signature timestamp outside tolerance window");
            return false;
        }

        let mut mac = Hmac::<Sha256>::new_from_slice(self.webhook_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(raw_body);
        let expected = hex::encode(mac.finalize().into_bytes());

        candidates
            .iter()
            .any(|candidate| bool::from(ConstantTimeEq::ct_eq(candidate.as_bytes(), expected.as_bytes())))
    }

    pub fn parse_event(&self, raw_body: &str) -> Result<NormalizedEvent, ReconcileError> {
        let body: Value = serde_json::from_str(raw_body)
            .map_err(|e| ReconcileError::MalformedPayload(e.to_string()))?;

        let event_id = body["id"]
            .as_str()
            .ok_or_else(|| ReconcileError::MalformedPayload("missing event id".to_string()))?
            .to_string();
        let event_type = body["type"]
            .as_str()
            .ok_or_else(|| ReconcileError::MalformedPayload("missing event type".to_string()))?
            .to_string();

        let object = &body["data"]["object"];
        let dealership_id = extract_dealership_id(object);
        let provider_subscription_id = extract_subscription_id(&event_type, object);

        let kind = match event_type.as_str() {
            "customer.subscription.created" | "customer.subscription.updated" => {
                WebhookEventKind::Activated {
                    plan_code: object["items"]["data"][0]["price"]["id"]
                        .as_str()
                        .or_else(|| object["plan"]["id"].as_str())
                        .map(|s| s.to_string()),
                    provider_customer_id: object["customer"].as_str().map(|s| s.to_string()),
                    period_end: epoch_seconds(&object["current_period_end"]),
                }
            }
            "customer.subscription.deleted" => WebhookEventKind::Cancelled,
            "invoice.payment_succeeded" => WebhookEventKind::PaymentSucceeded {
                amount_minor: object["amount_paid"].as_i64().unwrap_or(0),
                currency: object["currency"]
                    .as_str()
                    .unwrap_or("nad")
                    .to_uppercase(),
                reference: object["payment_intent"]
                    .as_str()
                    .or_else(|| object["id"].as_str())
                    .unwrap_or(&event_id)
                    .to_string(),
                period_end: epoch_seconds(&object["period_end"]),
            },
            "invoice.payment_failed" => WebhookEventKind::PaymentFailed {
                amount_minor: object["amount_due"].as_i64().unwrap_or(0),
                currency: object["currency"]
                    .as_str()
                    .unwrap_or("nad")
                    .to_uppercase(),
                reference: object["payment_intent"]
                    .as_str()
                    .or_else(|| object["id"].as_str())
                    .unwrap_or(&event_id)
                    .to_string(),
                failure_reason: object["last_finalization_error"]["message"]
                    .as_str()
                    .or_else(|| object["billing_reason"].as_str())
                    .map(|s| s.to_string()),
            },
            "invoice.updated" => WebhookEventKind::InvoiceUpdated {
                summary: object["status"].as_str().map(|s| s.to_string()),
            },
            _ => WebhookEventKind::Ignored,
        };

        Ok(NormalizedEvent {
            provider: Provider::Stripe,
            event_id,
            event_type,
            dealership_id,
            provider_subscription_id,
            kind,
        })
    }
}

fn extract_dealership_id(object: &Value) -> Option<Uuid> {
    let raw = object["metadata"]["dealership_id"]
        .as_str()
        .or_else(|| object["metadata"]["dealershipId"].as_str())
        .or_else(|| object["subscription_details"]["metadata"]["dealership_id"].as_str())
        .or_else(|| object["subscription_details"]["metadata"]["dealershipId"].as_str())?;
    Uuid::parse_str(raw).ok()
}

fn extract_subscription_id(event_type: &str, object: &Value) -> Option<String> {
    if event_type.starts_with("customer.subscription.") {
        return object["id"].as_str().map(|s| s.to_string());
    }
    object["subscription"].as_str().map(|s| s.to_string())
}

fn epoch_seconds(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_i64()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn sign(body: &str, timestamp: i64) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, body).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_header_within_tolerance() {
        let adapter = StripeAdapter::new(SECRET);
        let body = r#"{"id":"evt_1","type":"invoice.payment_succeeded"}"#;
        let now = Utc::now();
        let header = sign(body, now.timestamp());

        assert!(adapter.verify_signature_at(body.as_bytes(), &header, now));
    }

    #[test]
    fn rejects_stale_timestamp_and_bad_digest() {
        let adapter = StripeAdapter::new(SECRET);
        let body = r#"{"id":"evt_1","type":"invoice.payment_succeeded"}"#;
        let now = Utc::now();

        let stale = sign(body, now.timestamp() - SIGNATURE_TOLERANCE_SECS - 10);
        assert!(!adapter.verify_signature_at(body.as_bytes(), &stale, now));

        let header = sign(body, now.timestamp());
        let tampered = r#"{"id":"evt_1","type":"invoice.payment_failed"}"#;
        assert!(!adapter.verify_signature_at(tampered.as_bytes(), &header, now));

        assert!(!adapter.verify_signature_at(body.as_bytes(), "t=abc", now));
        assert!(!adapter.verify_signature_at(body.as_bytes(), "v1=deadbeef", now));
    }

    #[test]
    fn parses_subscription_created_with_metadata() {
        let adapter = StripeAdapter::new(SECRET);
        let dealership_id = Uuid::new_v4();
        let body = format!(
            r#"{{"id":"evt_sub1","type":"customer.subscription.created","data":{{"object":{{"id":"sub_123","customer":"cus_9","current_period_end":1767225600,"metadata":{{"dealership_id":"{}"}},"items":{{"data":[{{"price":{{"id":"price_growth"}}}}]}}}}}}}}"#,
            dealership_id
        );

        let event = adapter.parse_event(&body).unwrap();
        assert_eq!(event.event_id, "evt_sub1");
        assert_eq!(event.dealership_id, Some(dealership_id));
        assert_eq!(event.provider_subscription_id.as_deref(), Some("sub_123"));
        match event.kind {
            WebhookEventKind::Activated {
                ref plan_code,
                ref provider_customer_id,
                period_end,
            } => {
                assert_eq!(plan_code.as_deref(), Some("price_growth"));
                assert_eq!(provider_customer_id.as_deref(), Some("cus_9"));
                assert_eq!(period_end.unwrap().timestamp(), 1767225600);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn parses_invoice_payment_failed_with_subscription_fallback() {
        let adapter = StripeAdapter::new(SECRET);
        let body = r#"{"id":"evt_in2","type":"invoice.payment_failed","data":{"object":{"id":"in_44","subscription":"sub_123","amount_due":199900,"currency":"nad","billing_reason":"subscription_cycle"}}}"#;

        let event = adapter.parse_event(body).unwrap();
        assert_eq!(event.dealership_id, None);
        assert_eq!(event.provider_subscription_id.as_deref(), Some("sub_123"));
        match event.kind {
            WebhookEventKind::PaymentFailed {
                amount_minor,
                ref currency,
                ref reference,
                ref failure_reason,
            } => {
                assert_eq!(amount_minor, 199900);
                assert_eq!(currency, "NAD");
                assert_eq!(reference, "in_44");
                assert_eq!(failure_reason.as_deref(), Some("subscription_cycle"));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let adapter = StripeAdapter::new(SECRET);
        let body = r#"{"id":"evt_x","type":"payment_method.attached","data":{"object":{}}}"#;
        let event = adapter.parse_event(body).unwrap();
        assert_eq!(event.kind, WebhookEventKind::Ignored);
    }
}
