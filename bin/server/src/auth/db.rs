//! Postgres-backed user store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portcullis_identity::{ProviderContext, StoreError, UserProfile, UserRecord, UserStore};
use rootcause::prelude::Report;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

/// Row type for user queries.
#[derive(FromRow)]
struct UserRow {
    login: String,
    display_name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    email: Option<String>,
    providers: Json<Vec<ProviderContext>>,
    last_authenticated_by: Option<Json<ProviderContext>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self) -> UserRecord {
        UserRecord::with_all_fields(
            self.login,
            UserProfile {
                display_name: self.display_name,
                given_name: self.given_name,
                family_name: self.family_name,
                email: self.email,
            },
            self.providers.0,
            self.last_authenticated_by.map(|c| c.0),
            self.created_at,
            self.updated_at,
        )
    }
}

/// User store over the `users` table.
///
/// Upserts are a single `INSERT ... ON CONFLICT`, so concurrent logins of one
/// user never create two rows.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Creates a new user store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> Report<StoreError> {
    StoreError::Backend {
        details: e.to_string(),
    }
    .into()
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find(&self, login: &str) -> Result<Option<UserRecord>, Report<StoreError>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT login, display_name, given_name, family_name, email,
                   providers, last_authenticated_by, created_at, updated_at
            FROM users
            WHERE login = $1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(UserRow::into_user))
    }

    async fn upsert(&self, user: &UserRecord) -> Result<(), Report<StoreError>> {
        let profile = user.profile();
        sqlx::query(
            r#"
            INSERT INTO users (login, display_name, given_name, family_name, email,
                               providers, last_authenticated_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (login) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                given_name = EXCLUDED.given_name,
                family_name = EXCLUDED.family_name,
                email = EXCLUDED.email,
                providers = EXCLUDED.providers,
                last_authenticated_by = EXCLUDED.last_authenticated_by,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user.login())
        .bind(profile.display_name.as_deref())
        .bind(profile.given_name.as_deref())
        .bind(profile.family_name.as_deref())
        .bind(profile.email.as_deref())
        .bind(Json(user.providers().to_vec()))
        .bind(user.last_authenticated_by().cloned().map(Json))
        .bind(user.created_at())
        .bind(user.updated_at())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}
