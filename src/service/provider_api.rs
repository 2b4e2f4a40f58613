// service/provider_api.rs
use chrono::{DateTime, TimeZone, Utc};

use crate::{config::Config, service::events::Provider};

/// Thin read-only client for the provider REST APIs, used to look up
/// subscription objects that webhook payloads reference but do not include.
pub struct ProviderApiClient {
    http: reqwest::Client,
    stripe_secret_key: String,
    paystack_secret_key: String,
}

impl ProviderApiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            stripe_secret_key: config.stripe_secret_key.clone(),
            paystack_secret_key: config.paystack_secret_key.clone(),
        }
    }

    /// Retrieve the current period end for a provider subscription.
    pub async fn fetch_period_end(
        &self,
        provider: Provider,
        provider_subscription_id: &str,
    ) -> Result<Option<DateTime<Utc>>, reqwest::Error> {
        match provider {
            Provider::Stripe => self.stripe_period_end(provider_subscription_id).await,
            Provider::Paystack => self.paystack_period_end(provider_subscription_id).await,
        }
    }

    async fn stripe_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<Option<DateTime<Utc>>, reqwest::Error> {
        let response = self
            .http
            .get(format!(
                "https://api.stripe.com/v1/subscriptions/{}",
                subscription_id
            ))
            .bearer_auth(&self.stripe_secret_key)
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::debug!(
                "Stripe subscription lookup for {} returned {}",
                subscription_id,
                response.status()
            );
            return Ok(None);
        }

        let body: serde_json::Value = response.json().await?;
        Ok(body["current_period_end"]
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()))
    }

    async fn paystack_period_end(
        &self,
        subscription_code: &str,
    ) -> Result<Option<DateTime<Utc>>, reqwest::Error> {
        let response = self
            .http
            .get(format!(
                "https://api.paystack.co/subscription/{}",
                subscription_code
            ))
            .bearer_auth(&self.paystack_secret_key)
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::debug!(
                "Paystack subscription lookup for {} returned {}",
                subscription_code,
                response.status()
            );
            return Ok(None);
        }

        let body: serde_json::Value = response.json().await?;
        Ok(body["data"]["next_payment_date"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }
}
