// service/reconciler.rs
//
// The subscription state reconciler. Both provider adapters feed normalized
// events into `handle_event`, which claims the delivery for idempotency,
// correlates it to a dealership subscription and applies one transition.
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    db::{
        cache::CacheHelper,
        db::DBClient,
        subscriptiondb::{
            EventClaim, NewNotification, NewPayment, ReconcileOutcome, SubscriptionChanges,
            SubscriptionExt,
        },
    },
    models::subscriptionmodels::{
        DealershipSubscription, NotificationType, PaymentStatus, SubscriptionStatus,
    },
    service::{
        error::ReconcileError,
        events::{NormalizedEvent, WebhookEventKind},
        notification_service::NotificationService,
        provider_api::ProviderApiClient,
    },
    utils::currency,
};

/// Billing period granted per successful payment when the provider payload
/// carries no period end of its own.
const FALLBACK_PERIOD_DAYS: i64 = 30;

/// How a delivery was disposed of. All four variants acknowledge with 200;
/// the provider must never be told to retry an event we chose to skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Processed,
    DuplicateDelivery,
    Ignored,
    Unmatched,
}

/// Everything one event does to the subscription row and its satellites.
/// Produced by `plan_transition`, persisted atomically by the db layer.
#[derive(Debug, Default)]
pub struct TransitionPlan {
    pub changes: SubscriptionChanges,
    pub payment: Option<NewPayment>,
    pub notification: Option<NewNotification>,
}

pub struct SubscriptionReconciler {
    db_client: Arc<DBClient>,
    notification_service: Arc<NotificationService>,
    provider_api: Arc<ProviderApiClient>,
}

impl SubscriptionReconciler {
    pub fn new(
        db_client: Arc<DBClient>,
        notification_service: Arc<NotificationService>,
        provider_api: Arc<ProviderApiClient>,
    ) -> Self {
        Self {
            db_client,
            notification_service,
            provider_api,
        }
    }

    pub async fn handle_event(&self, mut event: NormalizedEvent) -> Result<Ack, ReconcileError> {
        if event.kind == WebhookEventKind::Ignored {
            tracing::info!(
                "Unhandled {} webhook event: {}",
                event.provider.to_str(),
                event.event_type
            );
            return Ok(Ack::Ignored);
        }

        let subscription = match self.resolve_subscription(&event).await? {
            Some(subscription) => subscription,
            None => {
                tracing::warn!(
                    provider = event.provider.to_str(),
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "webhook event could not be correlated to any subscription; acknowledging without changes"
                );
                return Ok(Ack::Unmatched);
            }
        };

        self.backfill_period_end(&mut event).await;

        let now = Utc::now();
        let plan = match plan_transition(subscription.status, &event, now) {
            Some(plan) => plan,
            None => return Ok(Ack::Ignored),
        };

        let claim = EventClaim {
            provider: event.provider.to_str(),
            event_id: &event.event_id,
            event_type: &event.event_type,
        };

        let outcome = self
            .db_client
            .apply_reconciliation(
                claim,
                subscription.id,
                &plan.changes,
                plan.payment.as_ref(),
                plan.notification.as_ref(),
            )
            .await?;

        match outcome {
            ReconcileOutcome::DuplicateDelivery => {
                tracing::info!(
                    provider = event.provider.to_str(),
                    event_id = %event.event_id,
                    "duplicate webhook delivery skipped"
                );
                Ok(Ack::DuplicateDelivery)
            }
            ReconcileOutcome::Applied(updated) => {
                tracing::info!(
                    provider = event.provider.to_str(),
                    event_id = %event.event_id,
                    dealership_id = %updated.dealership_id,
                    status = updated.status.to_str(),
                    "webhook event reconciled"
                );

                self.invalidate_entitlement_cache(&updated).await;

                if let Some(notification) = &plan.notification {
                    self.notification_service
                        .dispatch(&updated, notification)
                        .await;
                }

                Ok(Ack::Processed)
            }
        }
    }

    /// Correlation order: `dealership_id` from event metadata first, then the
    /// stored provider subscription id. The fallback is a supported path
    /// (renewal charges routinely arrive without custom metadata) and is
    /// logged so its use stays visible.
    async fn resolve_subscription(
        &self,
        event: &NormalizedEvent,
    ) -> Result<Option<DealershipSubscription>, ReconcileError> {
        if let Some(dealership_id) = event.dealership_id {
            if let Some(subscription) = self
                .db_client
                .get_subscription_by_dealership(dealership_id)
                .await?
            {
                return Ok(Some(subscription));
            }
            tracing::warn!(
                %dealership_id,
                event_id = %event.event_id,
                "event metadata names a dealership with no subscription row"
            );
        }

        if let Some(provider_subscription_id) = &event.provider_subscription_id {
            if let Some(subscription) = self
                .db_client
                .get_subscription_by_provider_ref(
                    event.provider.to_str(),
                    provider_subscription_id,
                )
                .await?
            {
                tracing::warn!(
                    provider = event.provider.to_str(),
                    provider_subscription_id = %provider_subscription_id,
                    event_id = %event.event_id,
                    "subscription resolved via provider subscription id fallback"
                );
                return Ok(Some(subscription));
            }
        }

        Ok(None)
    }

    /// Activation payloads sometimes omit the period end; ask the provider
    /// for the subscription object before falling back to +30 days. Best
    /// effort only.
    async fn backfill_period_end(&self, event: &mut NormalizedEvent) {
        let WebhookEventKind::Activated { period_end, .. } = &mut event.kind else {
            return;
        };
        if period_end.is_some() {
            return;
        }
        let Some(provider_subscription_id) = &event.provider_subscription_id else {
            return;
        };

        match self
            .provider_api
            .fetch_period_end(event.provider, provider_subscription_id)
            .await
        {
            Ok(Some(fetched)) => *period_end = Some(fetched),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(
                    provider = event.provider.to_str(),
                    "period end lookup failed: {}",
                    e
                );
            }
        }
    }

    async fn invalidate_entitlement_cache(&self, subscription: &DealershipSubscription) {
        if let Some(redis) = &self.db_client.redis_client {
            let _ = CacheHelper::delete(redis, &CacheHelper::entitlement_key(subscription.dealership_id)).await;
            let _ = CacheHelper::delete(redis, &CacheHelper::subscription_key(subscription.dealership_id)).await;
        }
    }
}

/// Pure transition table: current status + event -> plan. `None` only for
/// events the dispatcher already filters out.
///
/// Re-entrant transitions are deliberate: ACTIVE -> ACTIVE is the normal
/// renewal case, and a payment arriving for a cancelled subscription
/// reactivates it (the provider is the source of truth).
pub fn plan_transition(
    current: SubscriptionStatus,
    event: &NormalizedEvent,
    now: DateTime<Utc>,
) -> Option<TransitionPlan> {
    let provider = event.provider;

    match &event.kind {
        WebhookEventKind::Activated {
            plan_code,
            provider_customer_id,
            period_end,
        } => {
            let title = if current == SubscriptionStatus::PendingPayment {
                "Subscription activated"
            } else {
                "Subscription updated"
            };
            Some(TransitionPlan {
                changes: SubscriptionChanges {
                    status: Some(SubscriptionStatus::Active),
                    provider: Some(provider.to_str().to_string()),
                    provider_customer_id: provider_customer_id.clone(),
                    provider_subscription_id: event.provider_subscription_id.clone(),
                    start_date: Some(now),
                    next_payment_date: Some(
                        period_end.unwrap_or(now + Duration::days(FALLBACK_PERIOD_DAYS)),
                    ),
                    ..Default::default()
                },
                payment: None,
                notification: Some(NewNotification {
                    notification_type: NotificationType::PlanUpgraded,
                    title: title.to_string(),
                    message: "Your Cars.na dealership subscription is now active.".to_string(),
                    metadata: Some(serde_json::json!({
                        "provider": provider.to_str(),
                        "plan_code": plan_code,
                    })),
                }),
            })
        }

        WebhookEventKind::Cancelled => Some(TransitionPlan {
            changes: SubscriptionChanges {
                status: Some(SubscriptionStatus::Cancelled),
                auto_renew: Some(false),
                end_date: Some(now),
                ..Default::default()
            },
            payment: None,
            notification: Some(NewNotification {
                notification_type: NotificationType::SubscriptionCancelled,
                title: "Subscription cancelled".to_string(),
                message: "Your subscription has been cancelled and will not renew.".to_string(),
                metadata: Some(serde_json::json!({ "provider": provider.to_str() })),
            }),
        }),

        WebhookEventKind::PaymentSucceeded {
            amount_minor,
            currency,
            reference,
            period_end,
        } => Some(TransitionPlan {
            changes: SubscriptionChanges {
                status: Some(SubscriptionStatus::Active),
                last_payment_date: Some(now),
                next_payment_date: Some(
                    period_end.unwrap_or(now + Duration::days(FALLBACK_PERIOD_DAYS)),
                ),
                ..Default::default()
            },
            payment: Some(NewPayment {
                amount_minor: *amount_minor,
                currency: currency.clone(),
                status: PaymentStatus::Completed,
                provider: provider.to_str().to_string(),
                provider_reference: reference.clone(),
                failure_reason: None,
            }),
            notification: Some(NewNotification {
                notification_type: NotificationType::PaymentReceived,
                title: "Payment received".to_string(),
                message: format!(
                    "We received your payment of {}.",
                    currency::format_minor(*amount_minor, currency)
                ),
                metadata: Some(serde_json::json!({
                    "provider": provider.to_str(),
                    "reference": reference,
                })),
            }),
        }),

        WebhookEventKind::PaymentFailed {
            amount_minor,
            currency,
            reference,
            failure_reason,
        } => Some(TransitionPlan {
            changes: SubscriptionChanges {
                status: Some(SubscriptionStatus::PastDue),
                ..Default::default()
            },
            payment: Some(NewPayment {
                amount_minor: *amount_minor,
                currency: currency.clone(),
                status: PaymentStatus::Failed,
                provider: provider.to_str().to_string(),
                provider_reference: reference.clone(),
                failure_reason: failure_reason.clone(),
            }),
            notification: Some(NewNotification {
                notification_type: NotificationType::PaymentFailed,
                title: "Payment failed".to_string(),
                message: format!(
                    "Your payment of {} could not be processed. Please update your payment details.",
                    currency::format_minor(*amount_minor, currency)
                ),
                metadata: Some(serde_json::json!({
                    "provider": provider.to_str(),
                    "reference": reference,
                    "failure_reason": failure_reason,
                })),
            }),
        }),

        WebhookEventKind::InvoiceUpdated { summary } => Some(TransitionPlan {
            changes: SubscriptionChanges::default(),
            payment: None,
            notification: Some(NewNotification {
                notification_type: NotificationType::InvoiceUpdated,
                title: "Invoice updated".to_string(),
                message: match summary {
                    Some(summary) => format!("Your latest invoice is now {}.", summary),
                    None => "Your latest invoice was updated.".to_string(),
                },
                metadata: Some(serde_json::json!({ "provider": provider.to_str() })),
            }),
        }),

        WebhookEventKind::Ignored => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, mail::mailer::Mailer, service::events::Provider};
    use sqlx::postgres::PgPoolOptions;
    use uuid::Uuid;

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/carsna_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            port: 8000,
            stripe_secret_key: "sk_test".to_string(),
            stripe_webhook_secret: "whsec_test".to_string(),
            paystack_secret_key: "sk_test".to_string(),
            resend_api_key: String::new(),
            mail_from: "Cars.na <billing@cars.na>".to_string(),
            redis_url: None,
        }
    }

    // Pool is lazily connected and points at nothing; any query attempt
    // errors, so these tests double as proof that no writes happen.
    fn reconciler() -> SubscriptionReconciler {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/carsna_test")
            .unwrap();
        let db_client = Arc::new(DBClient::new(pool));
        let config = test_config();
        let mailer = Arc::new(Mailer::new(&config));
        let notification_service =
            Arc::new(NotificationService::new(db_client.clone(), mailer));
        let provider_api = Arc::new(ProviderApiClient::new(&config));
        SubscriptionReconciler::new(db_client, notification_service, provider_api)
    }

    fn event(kind: WebhookEventKind) -> NormalizedEvent {
        NormalizedEvent {
            provider: Provider::Paystack,
            event_id: "charge.success:1".to_string(),
            event_type: "charge.success".to_string(),
            dealership_id: Some(Uuid::new_v4()),
            provider_subscription_id: Some("SUB_abc".to_string()),
            kind,
        }
    }

    fn succeeded() -> WebhookEventKind {
        WebhookEventKind::PaymentSucceeded {
            amount_minor: 79900,
            currency: "NAD".to_string(),
            reference: "ref_1".to_string(),
            period_end: None,
        }
    }

    fn failed() -> WebhookEventKind {
        WebhookEventKind::PaymentFailed {
            amount_minor: 79900,
            currency: "NAD".to_string(),
            reference: "ref_2".to_string(),
            failure_reason: Some("insufficient_funds".to_string()),
        }
    }

    #[test]
    fn activation_from_pending_payment_goes_active_with_plan_upgraded_notice() {
        let now = Utc::now();
        let plan = plan_transition(
            SubscriptionStatus::PendingPayment,
            &event(WebhookEventKind::Activated {
                plan_code: Some("PLN_growth".to_string()),
                provider_customer_id: Some("CUS_1".to_string()),
                period_end: None,
            }),
            now,
        )
        .unwrap();

        assert_eq!(plan.changes.status, Some(SubscriptionStatus::Active));
        assert_eq!(plan.changes.start_date, Some(now));
        assert_eq!(
            plan.changes.provider_subscription_id.as_deref(),
            Some("SUB_abc")
        );
        assert!(plan.payment.is_none());
        let notification = plan.notification.unwrap();
        assert_eq!(
            notification.notification_type,
            NotificationType::PlanUpgraded
        );
    }

    #[test]
    fn payment_succeeded_then_failed_leaves_past_due_with_two_ledger_rows() {
        let now = Utc::now();

        let first = plan_transition(SubscriptionStatus::Active, &event(succeeded()), now).unwrap();
        let after_first = first.changes.status.unwrap();
        assert_eq!(after_first, SubscriptionStatus::Active);
        assert_eq!(
            first.payment.as_ref().unwrap().status,
            PaymentStatus::Completed
        );

        let second = plan_transition(after_first, &event(failed()), now).unwrap();
        assert_eq!(second.changes.status, Some(SubscriptionStatus::PastDue));
        let failed_payment = second.payment.unwrap();
        assert_eq!(failed_payment.status, PaymentStatus::Failed);
        assert_eq!(
            failed_payment.failure_reason.as_deref(),
            Some("insufficient_funds")
        );
        // Distinct references means distinct ledger rows survive the
        // (provider, provider_reference) uniqueness constraint.
        assert_ne!(
            first.payment.unwrap().provider_reference,
            failed_payment.provider_reference
        );
    }

    #[test]
    fn renewal_payment_reenters_active_without_guard() {
        let now = Utc::now();
        let plan = plan_transition(SubscriptionStatus::Active, &event(succeeded()), now).unwrap();
        assert_eq!(plan.changes.status, Some(SubscriptionStatus::Active));
        assert_eq!(plan.changes.last_payment_date, Some(now));
    }

    #[test]
    fn payment_after_cancellation_reactivates() {
        // Fallback-lookup renewal for a cancelled subscription: the provider
        // is authoritative, so the payment flips it back to active.
        let now = Utc::now();
        let plan =
            plan_transition(SubscriptionStatus::Cancelled, &event(succeeded()), now).unwrap();
        assert_eq!(plan.changes.status, Some(SubscriptionStatus::Active));
    }

    #[test]
    fn cancellation_turns_off_auto_renew() {
        let now = Utc::now();
        let plan =
            plan_transition(SubscriptionStatus::Active, &event(WebhookEventKind::Cancelled), now)
                .unwrap();
        assert_eq!(plan.changes.status, Some(SubscriptionStatus::Cancelled));
        assert_eq!(plan.changes.auto_renew, Some(false));
        assert_eq!(plan.changes.end_date, Some(now));
        assert_eq!(
            plan.notification.unwrap().notification_type,
            NotificationType::SubscriptionCancelled
        );
    }

    #[test]
    fn next_payment_date_defaults_to_thirty_days() {
        let now = Utc::now();
        let plan = plan_transition(SubscriptionStatus::Active, &event(succeeded()), now).unwrap();
        assert_eq!(
            plan.changes.next_payment_date,
            Some(now + Duration::days(FALLBACK_PERIOD_DAYS))
        );
    }

    #[test]
    fn provider_period_end_wins_over_fallback() {
        let now = Utc::now();
        let period_end = now + Duration::days(365);
        let plan = plan_transition(
            SubscriptionStatus::Active,
            &event(WebhookEventKind::PaymentSucceeded {
                amount_minor: 199900,
                currency: "NAD".to_string(),
                reference: "ref_annual".to_string(),
                period_end: Some(period_end),
            }),
            now,
        )
        .unwrap();
        assert_eq!(plan.changes.next_payment_date, Some(period_end));
    }

    #[test]
    fn invoice_update_never_mutates_status() {
        let now = Utc::now();
        let plan = plan_transition(
            SubscriptionStatus::PastDue,
            &event(WebhookEventKind::InvoiceUpdated {
                summary: Some("open".to_string()),
            }),
            now,
        )
        .unwrap();
        assert_eq!(plan.changes.status, None);
        assert!(plan.payment.is_none());
        assert_eq!(
            plan.notification.unwrap().notification_type,
            NotificationType::InvoiceUpdated
        );
    }

    #[tokio::test]
    async fn uncorrelated_event_is_acknowledged_without_writes() {
        let reconciler = reconciler();
        let mut event = event(succeeded());
        event.dealership_id = None;
        event.provider_subscription_id = None;

        let ack = reconciler.handle_event(event).await.unwrap();
        assert_eq!(ack, Ack::Unmatched);
    }

    #[tokio::test]
    async fn ignored_events_are_acknowledged_without_writes() {
        let reconciler = reconciler();
        let ack = reconciler
            .handle_event(event(WebhookEventKind::Ignored))
            .await
            .unwrap();
        assert_eq!(ack, Ack::Ignored);
    }

    #[test]
    fn ignored_events_produce_no_plan() {
        let now = Utc::now();
        assert!(plan_transition(
            SubscriptionStatus::Active,
            &event(WebhookEventKind::Ignored),
            now
        )
        .is_none());
    }
}
