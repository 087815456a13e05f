use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StoreError, UserStore};
use crate::models::{NewUser, StoredFile, User};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    email_index: HashMap<String, Uuid>,
    owned: HashMap<Uuid, Vec<String>>,
    files: HashMap<String, StoredFile>,
    file_order: Vec<String>,
}

/// Process-local store used when no `DATABASE_URL` is configured and by
/// the test suite. Contents vanish on restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.email_index.contains_key(&new_user.email) {
            return Err(StoreError::DuplicateEmail);
        }

        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            role: new_user.role,
            is_verified: false,
            created_at: Utc::now(),
        };

        inner.email_index.insert(user.email.clone(), user.id);
        inner.owned.insert(user.id, Vec::new());
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .email_index
            .get(email)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn mark_verified(&self, email: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(id) = inner.email_index.get(email).copied() else {
            return Ok(false);
        };
        match inner.users.get_mut(&id) {
            Some(user) if !user.is_verified => {
                user.is_verified = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_upload(&self, file: &StoredFile) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&file.owner_id) {
            return Err(StoreError::UnknownOwner(file.owner_id));
        }
        if inner.files.contains_key(&file.name) {
            return Err(StoreError::DuplicateFile(file.name.clone()));
        }

        inner.files.insert(file.name.clone(), file.clone());
        inner.file_order.push(file.name.clone());
        inner
            .owned
            .entry(file.owner_id)
            .or_default()
            .push(file.name.clone());
        Ok(())
    }

    async fn owned_files(&self, owner_id: Uuid) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .owned
            .get(&owner_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_file(&self, name: &str) -> Result<Option<StoredFile>, StoreError> {
        Ok(self.inner.read().await.files.get(name).cloned())
    }

    async fn list_files(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.read().await.file_order.clone())
    }
}
