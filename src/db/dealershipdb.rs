// db/dealershipdb.rs
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::dealershipmodel::Dealership;

#[async_trait]
pub trait DealershipExt {
    async fn save_dealership(
        &self,
        name: &str,
        contact_email: &str,
        phone: Option<&str>,
        city: Option<&str>,
    ) -> Result<Dealership, sqlx::Error>;

    async fn get_dealership(&self, dealership_id: Uuid) -> Result<Option<Dealership>, sqlx::Error>;

    async fn get_dealership_by_email(
        &self,
        contact_email: &str,
    ) -> Result<Option<Dealership>, sqlx::Error>;
}

#[async_trait]
impl DealershipExt for super::db::DBClient {
    async fn save_dealership(
        &self,
        name: &str,
        contact_email: &str,
        phone: Option<&str>,
        city: Option<&str>,
    ) -> Result<Dealership, sqlx::Error> {
        sqlx::query_as::<_, Dealership>(
            r#"
            INSERT INTO dealerships (name, contact_email, phone, city)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(contact_email)
        .bind(phone)
        .bind(city)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_dealership(&self, dealership_id: Uuid) -> Result<Option<Dealership>, sqlx::Error> {
        sqlx::query_as::<_, Dealership>("SELECT * FROM dealerships WHERE id = $1")
            .bind(dealership_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn get_dealership_by_email(
        &self,
        contact_email: &str,
    ) -> Result<Option<Dealership>, sqlx::Error> {
        sqlx::query_as::<_, Dealership>("SELECT * FROM dealerships WHERE contact_email = $1")
            .bind(contact_email)
            .fetch_optional(&self.pool)
            .await
    }
}
