use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;
use uuid::Uuid;

use super::{StoreError, UserStore};
use crate::models::{NewUser, StoredFile, User};

const USER_COLUMNS: &str = "id, username, email, password_hash, role, is_verified, created_at";
const FILE_COLUMNS: &str =
    "name, original_name, path, owner_id, content_type, size_bytes, sha256, created_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects and runs the embedded migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        info!("Connected to database.");

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users (id, username, email, password_hash, role, is_verified) \
             VALUES ($1, $2, $3, $4, $5, FALSE) RETURNING {}",
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new_user.username)
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .bind(new_user.role.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateEmail
                } else {
                    StoreError::Database(e)
                }
            })
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn mark_verified(&self, email: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE users SET is_verified = TRUE WHERE email = $1 AND is_verified = FALSE",
        )
        .bind(email)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_upload(&self, file: &StoredFile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO files (name, original_name, path, owner_id, content_type, size_bytes, sha256, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&file.name)
        .bind(&file.original_name)
        .bind(&file.path)
        .bind(file.owner_id)
        .bind(&file.content_type)
        .bind(file.size_bytes)
        .bind(&file.sha256)
        .bind(file.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateFile(file.name.clone())
            } else if is_foreign_key_violation(&e) {
                StoreError::UnknownOwner(file.owner_id)
            } else {
                StoreError::Database(e)
            }
        })?;

        Ok(())
    }

    async fn owned_files(&self, owner_id: Uuid) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT name FROM files WHERE owner_id = $1 ORDER BY created_at, name",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn find_file(&self, name: &str) -> Result<Option<StoredFile>, StoreError> {
        let sql = format!("SELECT {} FROM files WHERE name = $1", FILE_COLUMNS);
        Ok(sqlx::query_as::<_, StoredFile>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_files(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query_as::<_, (String,)>("SELECT name FROM files ORDER BY created_at, name")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}
