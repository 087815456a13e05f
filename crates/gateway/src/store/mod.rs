//! Persistence seam for users and the stored-file registry.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewUser, StoredFile, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error("owner {0} does not exist")]
    UnknownOwner(Uuid),

    #[error("file {0} is already registered")]
    DuplicateFile(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts an unverified user. Fails with `DuplicateEmail` if the
    /// address is taken, even under concurrent signups.
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Flips the verification flag. Returns `false` if the user was
    /// already verified or does not exist.
    async fn mark_verified(&self, email: &str) -> Result<bool, StoreError>;

    /// Registers an uploaded file and appends it to its owner's files.
    async fn record_upload(&self, file: &StoredFile) -> Result<(), StoreError>;

    /// File ids owned by a user, oldest first.
    async fn owned_files(&self, owner_id: Uuid) -> Result<Vec<String>, StoreError>;

    async fn find_file(&self, name: &str) -> Result<Option<StoredFile>, StoreError>;

    /// Every registered file id, oldest first.
    async fn list_files(&self) -> Result<Vec<String>, StoreError>;
}
