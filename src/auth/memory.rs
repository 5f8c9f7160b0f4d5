//! In-process `UserStore` for tests. Each operation runs under one lock, which
//! gives the same atomicity the Postgres store gets from its transactions.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{
    repo::UserStore,
    repo_types::{NewUser, ResetRequest, StoreError, User, UserChanges},
    reset::{ResetError, Verdict},
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    resets: HashMap<String, ResetRequest>,
}

#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<Inner>,
}

impl Inner {
    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.inner.lock().unwrap().users.get(&id).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        let mut users: Vec<User> = self.inner.lock().unwrap().users.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.email_taken(&user.email, None) {
            return Err(StoreError::DuplicateEmail);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            role: user.role,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(email) = &changes.email {
            if inner.email_taken(email, Some(id)) {
                return Err(StoreError::DuplicateEmail);
            }
            inner
                .resets
                .retain(|key, r| !(r.user_id == id && key != email));
        }
        let Some(user) = inner.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(role) = changes.role {
            user.role = role;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        inner.resets.retain(|_, r| r.user_id != id);
        Ok(inner.users.remove(&id).is_some())
    }

    async fn save_reset(&self, request: &ResetRequest) -> anyhow::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .resets
            .insert(request.email.clone(), request.clone());
        Ok(())
    }

    async fn find_reset(&self, email: &str) -> anyhow::Result<Option<ResetRequest>> {
        Ok(self.inner.lock().unwrap().resets.get(email).cloned())
    }

    async fn consume_reset(
        &self,
        email: &str,
        code: &str,
        now: OffsetDateTime,
        new_password_hash: &str,
        max_attempts: i32,
    ) -> Result<Uuid, ResetError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(pending) = inner.resets.get_mut(email) else {
            return Err(ResetError::NotFound);
        };

        match pending.judge(code, now, max_attempts) {
            Verdict::Accept => {
                let user_id = pending.user_id;
                inner.resets.remove(email);
                let user = inner.users.get_mut(&user_id).ok_or(ResetError::NotFound)?;
                user.password_hash = new_password_hash.to_string();
                user.updated_at = now;
                Ok(user_id)
            }
            Verdict::Expired => {
                inner.resets.remove(email);
                Err(ResetError::Expired)
            }
            Verdict::Mismatch { exhausted: true } => {
                inner.resets.remove(email);
                Err(ResetError::CodeMismatch)
            }
            Verdict::Mismatch { exhausted: false } => {
                pending.attempts += 1;
                Err(ResetError::CodeMismatch)
            }
        }
    }
}
