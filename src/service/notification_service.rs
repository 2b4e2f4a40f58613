// service/notification_service.rs
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::{
        db::DBClient,
        dealershipdb::DealershipExt,
        subscriptiondb::{NewNotification, SubscriptionExt},
    },
    mail::mailer::Mailer,
    models::subscriptionmodels::{
        DealershipSubscription, NotificationType, PlanTier, SubscriptionNotification,
    },
    service::error::ReconcileError,
};

#[derive(Debug, Clone)]
pub struct NotificationService {
    db_client: Arc<DBClient>,
    mailer: Arc<Mailer>,
}

impl NotificationService {
    pub fn new(db_client: Arc<DBClient>, mailer: Arc<Mailer>) -> Self {
        Self { db_client, mailer }
    }

    /// Fan a stored notification out to the dealer by email. The row is
    /// already persisted by the caller; email is best effort and never
    /// fails the webhook.
    pub async fn dispatch(
        &self,
        subscription: &DealershipSubscription,
        notification: &NewNotification,
    ) {
        tracing::info!(
            dealership_id = %subscription.dealership_id,
            kind = ?notification.notification_type,
            "subscription notification: {}",
            notification.title
        );

        let dealership = match self.db_client.get_dealership(subscription.dealership_id).await {
            Ok(Some(dealership)) => dealership,
            Ok(None) => {
                tracing::warn!(
                    dealership_id = %subscription.dealership_id,
                    "notification for a subscription whose dealership is gone"
                );
                return;
            }
            Err(e) => {
                tracing::error!("failed to load dealership for notification email: {}", e);
                return;
            }
        };

        let to_email = dealership.contact_email.clone();
        let dealership_name = dealership.name.clone();
        let notification_type = notification.notification_type;
        let title = notification.title.clone();
        let message = notification.message.clone();
        let mailer = self.mailer.clone();

        tokio::spawn(async move {
            let result = match notification_type {
                NotificationType::PaymentReceived => {
                    mailer
                        .send_payment_received_email(&to_email, &dealership_name, &message)
                        .await
                }
                NotificationType::PaymentFailed => {
                    mailer
                        .send_payment_failed_email(&to_email, &dealership_name, &message)
                        .await
                }
                NotificationType::SubscriptionCancelled => {
                    mailer
                        .send_subscription_cancelled_email(&to_email, &dealership_name)
                        .await
                }
                // Activation, plan changes and invoice edits stay in-app only
                _ => Ok(()),
            };

            if let Err(e) = result {
                tracing::warn!("failed to send '{}' email to {}: {}", title, to_email, e);
            }
        });
    }

    /// Record an admin-driven plan change and tell the dealer about it.
    pub async fn notify_plan_changed(
        &self,
        subscription: &DealershipSubscription,
        new_plan: PlanTier,
    ) -> Result<SubscriptionNotification, ReconcileError> {
        let notification = NewNotification {
            notification_type: NotificationType::PlanChanged,
            title: "Plan changed".to_string(),
            message: format!(
                "Your dealership is now on the {} plan ({} listings, {} featured).",
                new_plan.to_str(),
                new_plan.max_listings(),
                new_plan.max_featured_listings()
            ),
            metadata: Some(serde_json::json!({ "plan": new_plan.to_str() })),
        };

        let stored = self
            .db_client
            .insert_notification(subscription.id, &notification)
            .await?;

        self.dispatch(subscription, &notification).await;
        Ok(stored)
    }

    pub async fn list_for_subscription(
        &self,
        subscription_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SubscriptionNotification>, ReconcileError> {
        Ok(self
            .db_client
            .list_notifications(subscription_id, limit)
            .await?)
    }
}
