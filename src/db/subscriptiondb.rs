// db/subscriptiondb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::subscriptionmodels::{
    DealershipSubscription, NotificationType, Payment, PaymentStatus, PlanTier,
    SubscriptionNotification, SubscriptionStatus,
};

/// Webhook delivery to claim before mutating anything. The claim shares the
/// reconciliation transaction, so a failed attempt leaves no claim behind and
/// the provider retry can go through.
#[derive(Debug, Clone)]
pub struct EventClaim<'a> {
    pub provider: &'a str,
    pub event_id: &'a str,
    pub event_type: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionChanges {
    pub status: Option<SubscriptionStatus>,
    pub auto_renew: Option<bool>,
    pub provider: Option<String>,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub next_payment_date: Option<DateTime<Utc>>,
    pub last_payment_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub amount_minor: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider: String,
    pub provider_reference: String,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum ReconcileOutcome {
    Applied(DealershipSubscription),
    DuplicateDelivery,
}

#[async_trait]
pub trait SubscriptionExt {
    async fn create_pending_subscription(
        &self,
        dealership_id: Uuid,
        plan: PlanTier,
    ) -> Result<DealershipSubscription, sqlx::Error>;

    async fn get_subscription_by_dealership(
        &self,
        dealership_id: Uuid,
    ) -> Result<Option<DealershipSubscription>, sqlx::Error>;

    async fn get_subscription_by_provider_ref(
        &self,
        provider: &str,
        provider_subscription_id: &str,
    ) -> Result<Option<DealershipSubscription>, sqlx::Error>;

    async fn update_subscription_plan(
        &self,
        dealership_id: Uuid,
        plan: PlanTier,
    ) -> Result<Option<DealershipSubscription>, sqlx::Error>;

    /// Apply one reconciliation atomically: claim the webhook delivery,
    /// update the subscription row, append the payment ledger row and the
    /// notification. An already-claimed (provider, event_id) pair
    /// short-circuits without touching state.
    async fn apply_reconciliation(
        &self,
        claim: EventClaim<'_>,
        subscription_id: Uuid,
        changes: &SubscriptionChanges,
        payment: Option<&NewPayment>,
        notification: Option<&NewNotification>,
    ) -> Result<ReconcileOutcome, sqlx::Error>;

    async fn insert_notification(
        &self,
        subscription_id: Uuid,
        notification: &NewNotification,
    ) -> Result<SubscriptionNotification, sqlx::Error>;

    async fn list_notifications(
        &self,
        subscription_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SubscriptionNotification>, sqlx::Error>;

    async fn list_payments(
        &self,
        subscription_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Payment>, sqlx::Error>;
}

#[async_trait]
impl SubscriptionExt for super::db::DBClient {
    async fn create_pending_subscription(
        &self,
        dealership_id: Uuid,
        plan: PlanTier,
    ) -> Result<DealershipSubscription, sqlx::Error> {
        sqlx::query_as::<_, DealershipSubscription>(
            r#"
            INSERT INTO dealership_subscriptions (dealership_id, plan, status)
            VALUES ($1, $2, 'pending_payment')
            RETURNING *
            "#,
        )
        .bind(dealership_id)
        .bind(plan)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_subscription_by_dealership(
        &self,
        dealership_id: Uuid,
    ) -> Result<Option<DealershipSubscription>, sqlx::Error> {
        sqlx::query_as::<_, DealershipSubscription>(
            "SELECT * FROM dealership_subscriptions WHERE dealership_id = $1",
        )
        .bind(dealership_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_subscription_by_provider_ref(
        &self,
        provider: &str,
        provider_subscription_id: &str,
    ) -> Result<Option<DealershipSubscription>, sqlx::Error> {
        sqlx::query_as::<_, DealershipSubscription>(
            r#"
            SELECT * FROM dealership_subscriptions
            WHERE provider = $1 AND provider_subscription_id = $2
            "#,
        )
        .bind(provider)
        .bind(provider_subscription_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_subscription_plan(
        &self,
        dealership_id: Uuid,
        plan: PlanTier,
    ) -> Result<Option<DealershipSubscription>, sqlx::Error> {
        sqlx::query_as::<_, DealershipSubscription>(
            r#"
            UPDATE dealership_subscriptions
            SET plan = $1, updated_at = NOW()
            WHERE dealership_id = $2
            RETURNING *
            "#,
        )
        .bind(plan)
        .bind(dealership_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn apply_reconciliation(
        &self,
        claim: EventClaim<'_>,
        subscription_id: Uuid,
        changes: &SubscriptionChanges,
        payment: Option<&NewPayment>,
        notification: Option<&NewNotification>,
    ) -> Result<ReconcileOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            INSERT INTO webhook_events (provider, event_id, event_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (provider, event_id) DO NOTHING
            "#,
        )
        .bind(claim.provider)
        .bind(claim.event_id)
        .bind(claim.event_type)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(ReconcileOutcome::DuplicateDelivery);
        }

        let subscription = sqlx::query_as::<_, DealershipSubscription>(
            r#"
            UPDATE dealership_subscriptions
            SET status = COALESCE($1, status),
                auto_renew = COALESCE($2, auto_renew),
                provider = COALESCE($3, provider),
                provider_customer_id = COALESCE($4, provider_customer_id),
                provider_subscription_id = COALESCE($5, provider_subscription_id),
                start_date = COALESCE($6, start_date),
                end_date = COALESCE($7, end_date),
                next_payment_date = COALESCE($8, next_payment_date),
                last_payment_date = COALESCE($9, last_payment_date),
                updated_at = NOW()
            WHERE id = $10
            RETURNING *
            "#,
        )
        .bind(changes.status)
        .bind(changes.auto_renew)
        .bind(changes.provider.as_deref())
        .bind(changes.provider_customer_id.as_deref())
        .bind(changes.provider_subscription_id.as_deref())
        .bind(changes.start_date)
        .bind(changes.end_date)
        .bind(changes.next_payment_date)
        .bind(changes.last_payment_date)
        .bind(subscription_id)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(payment) = payment {
            // Ledger is append-only; a reference seen before is a no-op.
            sqlx::query(
                r#"
                INSERT INTO payments
                (subscription_id, amount_minor, currency, status, provider, provider_reference, failure_reason)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (provider, provider_reference) DO NOTHING
                "#,
            )
            .bind(subscription_id)
            .bind(payment.amount_minor)
            .bind(&payment.currency)
            .bind(payment.status)
            .bind(&payment.provider)
            .bind(&payment.provider_reference)
            .bind(payment.failure_reason.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        if let Some(notification) = notification {
            sqlx::query(
                r#"
                INSERT INTO subscription_notifications
                (subscription_id, notification_type, title, message, metadata)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(subscription_id)
            .bind(notification.notification_type)
            .bind(&notification.title)
            .bind(&notification.message)
            .bind(notification.metadata.as_ref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(ReconcileOutcome::Applied(subscription))
    }

    async fn insert_notification(
        &self,
        subscription_id: Uuid,
        notification: &NewNotification,
    ) -> Result<SubscriptionNotification, sqlx::Error> {
        sqlx::query_as::<_, SubscriptionNotification>(
            r#"
            INSERT INTO subscription_notifications
            (subscription_id, notification_type, title, message, metadata)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(subscription_id)
        .bind(notification.notification_type)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.metadata.as_ref())
        .fetch_one(&self.pool)
        .await
    }

    async fn list_notifications(
        &self,
        subscription_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SubscriptionNotification>, sqlx::Error> {
        sqlx::query_as::<_, SubscriptionNotification>(
            r#"
            SELECT * FROM subscription_notifications
            WHERE subscription_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(subscription_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn list_payments(
        &self,
        subscription_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Payment>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments
            WHERE subscription_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(subscription_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{db::DBClient, dealershipdb::DealershipExt};
    use sqlx::postgres::PgPoolOptions;

    async fn connect() -> DBClient {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for db tests");
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .expect("failed to connect to the test database");
        DBClient::new(pool)
    }

    #[tokio::test]
    #[ignore = "needs a migrated postgres database"]
    async fn replayed_event_id_short_circuits_and_keeps_one_payment_row() {
        let db = connect().await;

        let suffix = Uuid::new_v4();
        let dealership = db
            .save_dealership(
                &format!("Replay Motors {}", suffix),
                &format!("replay-{}@example.test", suffix),
                None,
                Some("Windhoek"),
            )
            .await
            .unwrap();
        let subscription = db
            .create_pending_subscription(dealership.id, PlanTier::Starter)
            .await
            .unwrap();

        let event_id = format!("evt_{}", suffix);
        let claim = EventClaim {
            provider: "stripe",
            event_id: &event_id,
            event_type: "invoice.payment_succeeded",
        };
        let changes = SubscriptionChanges {
            status: Some(SubscriptionStatus::Active),
            last_payment_date: Some(chrono::Utc::now()),
            ..Default::default()
        };
        let payment = NewPayment {
            amount_minor: 29900,
            currency: "NAD".to_string(),
            status: PaymentStatus::Completed,
            provider: "stripe".to_string(),
            provider_reference: format!("pi_{}", suffix),
            failure_reason: None,
        };

        let first = db
            .apply_reconciliation(claim.clone(), subscription.id, &changes, Some(&payment), None)
            .await
            .unwrap();
        match first {
            ReconcileOutcome::Applied(updated) => {
                assert_eq!(updated.status, SubscriptionStatus::Active)
            }
            other => panic!("first delivery not applied: {:?}", other),
        }

        // Identical delivery again: must short-circuit without new rows
        let second = db
            .apply_reconciliation(claim, subscription.id, &changes, Some(&payment), None)
            .await
            .unwrap();
        assert!(matches!(second, ReconcileOutcome::DuplicateDelivery));

        let payment_rows: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE subscription_id = $1")
                .bind(subscription.id)
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!(payment_rows, 1);

        let claims: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM webhook_events WHERE provider = $1 AND event_id = $2",
        )
        .bind("stripe")
        .bind(&event_id)
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(claims, 1);
    }
}
