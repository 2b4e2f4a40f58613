// mail/mailer.rs
use std::fs;

use serde_json::json;
use thiserror::Error;
use tokio::time::{sleep, Duration};

use crate::config::Config;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 1000;
const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

#[derive(Error, Debug)]
pub enum MailError {
    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("RESEND_API_KEY is not configured")]
    MissingApiKey,

    #[error("email template {path}: {source}")]
    Template {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Resend API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error(transparent)]
    Network(#[from] reqwest::Error),
}

/// Transactional mail for the billing flows, sent through the Resend HTTP
/// API. Every send retries with exponential backoff before surfacing an
/// error; callers treat delivery as best effort.
#[derive(Debug, Clone)]
pub struct Mailer {
    http: reqwest::Client,
    api_key: String,
    from: String,
}

impl Mailer {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.resend_api_key.clone(),
            from: config.mail_from.clone(),
        }
    }

    pub async fn send_welcome_email(
        &self,
        to: &str,
        dealership_name: &str,
    ) -> Result<(), MailError> {
        self.send(
            to,
            "Welcome to Cars.na",
            "src/mail/templates/Welcome-email.html",
            &[("{{dealership_name}}", dealership_name)],
        )
        .await
    }

    pub async fn send_payment_received_email(
        &self,
        to: &str,
        dealership_name: &str,
        summary: &str,
    ) -> Result<(), MailError> {
        self.send(
            to,
            "Payment received",
            "src/mail/templates/Payment-received-email.html",
            &[
                ("{{dealership_name}}", dealership_name),
                ("{{summary}}", summary),
            ],
        )
        .await
    }

    pub async fn send_payment_failed_email(
        &self,
        to: &str,
        dealership_name: &str,
        summary: &str,
    ) -> Result<(), MailError> {
        self.send(
            to,
            "Payment failed - action required",
            "src/mail/templates/Payment-failed-email.html",
            &[
                ("{{dealership_name}}", dealership_name),
                ("{{summary}}", summary),
            ],
        )
        .await
    }

    pub async fn send_subscription_cancelled_email(
        &self,
        to: &str,
        dealership_name: &str,
    ) -> Result<(), MailError> {
        self.send(
            to,
            "Your subscription has been cancelled",
            "src/mail/templates/Subscription-cancelled-email.html",
            &[("{{dealership_name}}", dealership_name)],
        )
        .await
    }

    async fn send(
        &self,
        to: &str,
        subject: &str,
        template_path: &str,
        placeholders: &[(&str, &str)],
    ) -> Result<(), MailError> {
        if self.api_key.is_empty() {
            return Err(MailError::MissingApiKey);
        }
        if to.is_empty() || !to.contains('@') {
            return Err(MailError::InvalidRecipient(to.to_string()));
        }

        let template = fs::read_to_string(template_path).map_err(|source| MailError::Template {
            path: template_path.to_string(),
            source,
        })?;
        let html = render(&template, placeholders);

        let mut last_error = None;
        for attempt in 1..=MAX_RETRIES {
            match self.post(to, subject, &html).await {
                Ok(email_id) => {
                    tracing::info!("✓ Email sent to {} (id: {})", to, email_id);
                    return Ok(());
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        let delay = RETRY_DELAY_MS * 2_u64.pow(attempt - 1);
                        tracing::warn!(
                            "Email attempt {} for {} failed: {}. Retrying in {}ms",
                            attempt,
                            to,
                            e,
                            delay
                        );
                        sleep(Duration::from_millis(delay)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let error = match last_error {
            Some(error) => error,
            None => return Ok(()),
        };
        tracing::error!(
            "✗ Email to {} failed after {} attempts: {}",
            to,
            MAX_RETRIES,
            error
        );
        Err(error)
    }

    async fn post(&self, to: &str, subject: &str, html: &str) -> Result<String, MailError> {
        let response = self
            .http
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": to,
                "subject": subject,
                "html": html,
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(MailError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let id = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["id"].as_str().map(|s| s.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Ok(id)
    }
}

fn render(template: &str, placeholders: &[(&str, &str)]) -> String {
    placeholders
        .iter()
        .fold(template.to_string(), |html, (key, value)| {
            html.replace(key, value)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailer(api_key: &str) -> Mailer {
        Mailer {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            from: "Cars.na <billing@cars.na>".to_string(),
        }
    }

    #[test]
    fn render_substitutes_every_placeholder() {
        let html = render(
            "Hello {{dealership_name}}, we received {{summary}}.",
            &[
                ("{{dealership_name}}", "Windhoek Motors"),
                ("{{summary}}", "N$799.00"),
            ],
        );
        assert_eq!(html, "Hello Windhoek Motors, we received N$799.00.");
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let result = mailer("").send_welcome_email("dealer@example.test", "X").await;
        assert!(matches!(result, Err(MailError::MissingApiKey)));
    }

    #[tokio::test]
    async fn rejects_malformed_recipient() {
        let result = mailer("re_test_key")
            .send(
                "not-an-address",
                "subject",
                "src/mail/templates/Welcome-email.html",
                &[],
            )
            .await;
        assert!(matches!(result, Err(MailError::InvalidRecipient(_))));
    }
}
