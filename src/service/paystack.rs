// service/paystack.rs
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::service::{
    error::ReconcileError,
    events::{NormalizedEvent, Provider, WebhookEventKind},
};

/// Translates Paystack webhook deliveries into normalized events.
///
/// Paystack signs the raw request body with HMAC-SHA512 under the account
/// secret key and sends the hex digest in `x-paystack-signature`.
pub struct PaystackAdapter {
    secret_key: String,
}

impl PaystackAdapter {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
        }
    }

    pub fn verify_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        let mut mac = Hmac::<Sha512>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(raw_body);

        let expected = hex::encode(mac.finalize().into_bytes());

        // Compare in constant time to prevent timing attacks
        ConstantTimeEq::ct_eq(signature.as_bytes(), expected.as_bytes()).into()
    }

    pub fn parse_event(&self, raw_body: &str) -> Result<NormalizedEvent, ReconcileError> {
        let body: Value = serde_json::from_str(raw_body)
            .map_err(|e| ReconcileError::MalformedPayload(e.to_string()))?;

        let event_type = body["event"]
            .as_str()
            .ok_or_else(|| ReconcileError::MalformedPayload("missing event type".to_string()))?
            .to_string();

        let data = &body["data"];
        let dealership_id = extract_dealership_id(data);
        let provider_subscription_id = extract_subscription_code(data);
        let event_id = derive_event_id(&event_type, data);

        let kind = match event_type.as_str() {
            "subscription.create" => WebhookEventKind::Activated {
                plan_code: data["plan"]["plan_code"]
                    .as_str()
                    .map(|s| s.to_string()),
                provider_customer_id: data["customer"]["customer_code"]
                    .as_str()
                    .map(|s| s.to_string()),
                period_end: parse_rfc3339(&data["next_payment_date"]),
            },
            "subscription.disable" | "subscription.not_renew" => WebhookEventKind::Cancelled,
            "charge.success" => WebhookEventKind::PaymentSucceeded {
                // Paystack amounts are already minor units (kobo/cents)
                amount_minor: data["amount"].as_i64().unwrap_or(0),
                currency: data["currency"].as_str().unwrap_or("NAD").to_string(),
                reference: data["reference"]
                    .as_str()
                    .ok_or_else(|| {
                        ReconcileError::MalformedPayload("charge without reference".to_string())
                    })?
                    .to_string(),
                period_end: parse_rfc3339(&data["next_payment_date"]),
            },
            "invoice.payment_failed" => WebhookEventKind::PaymentFailed {
                amount_minor: data["amount"].as_i64().unwrap_or(0),
                currency: data["currency"].as_str().unwrap_or("NAD").to_string(),
                reference: data["invoice_code"]
                    .as_str()
                    .or_else(|| data["transaction"]["reference"].as_str())
                    .unwrap_or(&event_id)
                    .to_string(),
                failure_reason: data["description"].as_str().map(|s| s.to_string()),
            },
            "invoice.update" => WebhookEventKind::InvoiceUpdated {
                summary: data["status"].as_str().map(|s| s.to_string()),
            },
            _ => WebhookEventKind::Ignored,
        };

        Ok(NormalizedEvent {
            provider: Provider::Paystack,
            event_id,
            event_type,
            dealership_id,
            provider_subscription_id,
            kind,
        })
    }
}

fn extract_dealership_id(data: &Value) -> Option<Uuid> {
    let raw = data["metadata"]["dealership_id"]
        .as_str()
        .or_else(|| data["metadata"]["dealershipId"].as_str())?;
    Uuid::parse_str(raw).ok()
}

fn extract_subscription_code(data: &Value) -> Option<String> {
    data["subscription_code"]
        .as_str()
        .or_else(|| data["subscription"]["subscription_code"].as_str())
        .or_else(|| data["plan"]["subscription_code"].as_str())
        .map(|s| s.to_string())
}

// Paystack carries no top-level event id, so the idempotency key is derived
// from the event type plus the most specific identifier the payload offers.
// A payload with none at all is keyed on its own digest; two distinct
// unkeyed events must not dedupe each other.
fn derive_event_id(event_type: &str, data: &Value) -> String {
    let discriminator = data["id"]
        .as_i64()
        .map(|id| id.to_string())
        .or_else(|| data["reference"].as_str().map(|s| s.to_string()))
        .or_else(|| data["invoice_code"].as_str().map(|s| s.to_string()))
        .or_else(|| data["subscription_code"].as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| {
            tracing::warn!(
                "Paystack {} event carries no identifier, keying on payload digest",
                event_type
            );
            hex::encode(&Sha512::digest(data.to_string().as_bytes())[..8])
        });

    format!("{}:{}", event_type, discriminator)
}

fn parse_rfc3339(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(adapter: &PaystackAdapter, body: &str) -> String {
        let mut mac = Hmac::<Sha512>::new_from_slice(adapter.secret_key.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_signature_and_rejects_tampered_body() {
        let adapter = PaystackAdapter::new("sk_test_abc");
        let body = r#"{"event":"charge.success","data":{"reference":"ref_1","amount":29900}}"#;
        let signature = signed(&adapter, body);

        assert!(adapter.verify_signature(body.as_bytes(), &signature));

        let tampered = body.replace("29900", "1");
        assert!(!adapter.verify_signature(tampered.as_bytes(), &signature));
        assert!(!adapter.verify_signature(body.as_bytes(), "deadbeef"));
    }

    #[test]
    fn parses_charge_success_with_metadata() {
        let adapter = PaystackAdapter::new("sk_test_abc");
        let dealership_id = Uuid::new_v4();
        let body = format!(
            r#"{{"event":"charge.success","data":{{"id":302961,"reference":"ref_9xy","amount":79900,"currency":"NAD","subscription_code":"SUB_vsyqdmlzble3uii","metadata":{{"dealership_id":"{}"}}}}}}"#,
            dealership_id
        );

        let event = adapter.parse_event(&body).unwrap();
        assert_eq!(event.provider, Provider::Paystack);
        assert_eq!(event.event_id, "charge.success:302961");
        assert_eq!(event.dealership_id, Some(dealership_id));
        assert_eq!(
            event.provider_subscription_id.as_deref(),
            Some("SUB_vsyqdmlzble3uii")
        );
        match event.kind {
            WebhookEventKind::PaymentSucceeded {
                amount_minor,
                ref currency,
                ref reference,
                ..
            } => {
                assert_eq!(amount_minor, 79900);
                assert_eq!(currency, "NAD");
                assert_eq!(reference, "ref_9xy");
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn parses_subscription_create_as_activated() {
        let adapter = PaystackAdapter::new("sk_test_abc");
        let body = r#"{"event":"subscription.create","data":{"subscription_code":"SUB_abc","next_payment_date":"2026-09-25T00:00:00+00:00","plan":{"plan_code":"PLN_growth"},"customer":{"customer_code":"CUS_xnxdt6s1zg1f4nx"}}}"#;

        let event = adapter.parse_event(body).unwrap();
        assert_eq!(event.dealership_id, None);
        match event.kind {
            WebhookEventKind::Activated {
                ref plan_code,
                ref provider_customer_id,
                period_end,
            } => {
                assert_eq!(plan_code.as_deref(), Some("PLN_growth"));
                assert_eq!(provider_customer_id.as_deref(), Some("CUS_xnxdt6s1zg1f4nx"));
                assert!(period_end.is_some());
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_types_are_ignored_not_errors() {
        let adapter = PaystackAdapter::new("sk_test_abc");
        let body = r#"{"event":"transfer.success","data":{"id":1}}"#;
        let event = adapter.parse_event(body).unwrap();
        assert_eq!(event.kind, WebhookEventKind::Ignored);
    }

    #[test]
    fn unkeyed_events_get_distinct_digest_ids() {
        let adapter = PaystackAdapter::new("sk_test_abc");
        let first = adapter
            .parse_event(r#"{"event":"subscription.expiring_cards","data":{"cards":1}}"#)
            .unwrap();
        let second = adapter
            .parse_event(r#"{"event":"subscription.expiring_cards","data":{"cards":2}}"#)
            .unwrap();
        assert_ne!(first.event_id, second.event_id);

        // Byte-identical replays still map to the same id
        let replay = adapter
            .parse_event(r#"{"event":"subscription.expiring_cards","data":{"cards":1}}"#)
            .unwrap();
        assert_eq!(first.event_id, replay.event_id);
    }

    #[test]
    fn missing_event_type_is_a_payload_error() {
        let adapter = PaystackAdapter::new("sk_test_abc");
        assert!(adapter.parse_event(r#"{"data":{}}"#).is_err());
        assert!(adapter.parse_event("not json").is_err());
    }
}
