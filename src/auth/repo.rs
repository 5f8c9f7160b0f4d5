use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{
    repo_types::{NewUser, ResetRequest, StoreError, User, UserChanges, UserRow},
    reset::{ResetError, Verdict},
};

/// Persistence for accounts and their pending reset requests.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn list(&self) -> anyhow::Result<Vec<User>>;
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;
    /// Returns `None` when the user does not exist. Changing the email drops
    /// any reset request filed under the old one.
    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Insert-or-replace keyed by email.
    async fn save_reset(&self, request: &ResetRequest) -> anyhow::Result<()>;
    async fn find_reset(&self, email: &str) -> anyhow::Result<Option<ResetRequest>>;
    /// Validates `code` and, on success, stores the new hash and deletes the
    /// request as one atomic step. Returns the id of the updated user.
    async fn consume_reset(
        &self,
        email: &str,
        code: &str,
        now: OffsetDateTime,
        new_password_hash: &str,
        max_attempts: i32,
    ) -> Result<Uuid, ResetError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const USER_COLUMNS: &str = "id, name, email, role, password_hash, created_at, updated_at";

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn into_users(rows: Vec<UserRow>) -> anyhow::Result<Vec<User>> {
    rows.into_iter().map(User::try_from).collect()
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        row.map(User::try_from).transpose()
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
        ))
        .fetch_all(&self.db)
        .await
        .context("list users")?;
        into_users(rows)
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, name, email, role, password_hash)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateEmail
            } else {
                StoreError::Other(anyhow::Error::new(e).context("insert user"))
            }
        })?;
        Ok(User::try_from(row)?)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        if let Some(email) = &changes.email {
            sqlx::query("DELETE FROM password_resets WHERE user_id = $1 AND email <> $2")
                .bind(id)
                .bind(email)
                .execute(&mut *tx)
                .await
                .context("drop reset request for old email")?;
        }

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET name          = COALESCE($2, name),
                   email         = COALESCE($3, email),
                   role          = COALESCE($4, role),
                   password_hash = COALESCE($5, password_hash),
                   updated_at    = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.name)
        .bind(changes.email)
        .bind(changes.role.map(|r| r.as_str()))
        .bind(changes.password_hash)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateEmail
            } else {
                StoreError::Other(anyhow::Error::new(e).context("update user"))
            }
        })?;

        tx.commit().await.context("commit tx")?;
        Ok(row.map(User::try_from).transpose()?)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        Ok(res.rows_affected() > 0)
    }

    async fn save_reset(&self, request: &ResetRequest) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO password_resets (email, code, user_id, expires_at, attempts)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO UPDATE
               SET code       = EXCLUDED.code,
                   user_id    = EXCLUDED.user_id,
                   expires_at = EXCLUDED.expires_at,
                   attempts   = EXCLUDED.attempts
            "#,
        )
        .bind(&request.email)
        .bind(&request.code)
        .bind(request.user_id)
        .bind(request.expires_at)
        .bind(request.attempts)
        .execute(&self.db)
        .await
        .context("save reset request")?;
        Ok(())
    }

    async fn find_reset(&self, email: &str) -> anyhow::Result<Option<ResetRequest>> {
        let row = sqlx::query_as::<_, ResetRequest>(
            "SELECT email, code, user_id, expires_at, attempts FROM password_resets WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find reset request")?;
        Ok(row)
    }

    async fn consume_reset(
        &self,
        email: &str,
        code: &str,
        now: OffsetDateTime,
        new_password_hash: &str,
        max_attempts: i32,
    ) -> Result<Uuid, ResetError> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        // Row lock serializes concurrent attempts on the same email.
        let pending = sqlx::query_as::<_, ResetRequest>(
            r#"
            SELECT email, code, user_id, expires_at, attempts
              FROM password_resets
             WHERE email = $1
               FOR UPDATE
            "#,
        )
        .bind(email)
        .fetch_optional(&mut *tx)
        .await
        .context("lock reset request")?;

        let Some(pending) = pending else {
            return Err(ResetError::NotFound);
        };

        let verdict = pending.judge(code, now, max_attempts);
        match verdict {
            Verdict::Mismatch { exhausted: false } => {
                sqlx::query("UPDATE password_resets SET attempts = attempts + 1 WHERE email = $1")
                    .bind(email)
                    .execute(&mut *tx)
                    .await
                    .context("count failed reset attempt")?;
            }
            _ => {
                sqlx::query("DELETE FROM password_resets WHERE email = $1")
                    .bind(email)
                    .execute(&mut *tx)
                    .await
                    .context("delete reset request")?;
            }
        }

        let updated = if verdict == Verdict::Accept {
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
                .bind(pending.user_id)
                .bind(new_password_hash)
                .execute(&mut *tx)
                .await
                .context("store reset password")?
                .rows_affected()
        } else {
            0
        };

        tx.commit().await.context("commit tx")?;

        match verdict {
            Verdict::Accept if updated > 0 => Ok(pending.user_id),
            Verdict::Accept => Err(ResetError::NotFound),
            Verdict::Expired => Err(ResetError::Expired),
            Verdict::Mismatch { .. } => Err(ResetError::CodeMismatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::Role;
    use time::{macros::datetime, Duration};

    const NOW: OffsetDateTime = datetime!(2024-03-10 08:00 UTC);

    async fn seeded(pool: PgPool) -> (PgUserStore, User) {
        let store = PgUserStore::new(pool);
        let user = store
            .insert(NewUser {
                name: "Bob".into(),
                email: "bob@example.com".into(),
                role: Role::Coordinator,
                password_hash: "old-hash".into(),
            })
            .await
            .unwrap();
        let request = ResetRequest::new(
            "bob@example.com",
            user.id,
            "123456".into(),
            NOW,
            Duration::minutes(30),
        );
        store.save_reset(&request).await.unwrap();
        (store, user)
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn save_reset_replaces_the_pending_request(pool: PgPool) {
        let (store, user) = seeded(pool).await;
        assert!(matches!(
            store.consume_reset("bob@example.com", "000000", NOW, "x", 5).await,
            Err(ResetError::CodeMismatch)
        ));

        let fresh = ResetRequest::new("bob@example.com", user.id, "654321".into(), NOW, Duration::minutes(30));
        store.save_reset(&fresh).await.unwrap();
        assert_eq!(store.find_reset("bob@example.com").await.unwrap(), Some(fresh));
        assert!(store.find_reset("nobody@example.com").await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn wrong_code_counts_an_attempt(pool: PgPool) {
        let (store, user) = seeded(pool).await;
        let err = store
            .consume_reset("bob@example.com", "000000", NOW, "new-hash", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ResetError::CodeMismatch));

        let pending = store.find_reset("bob@example.com").await.unwrap().unwrap();
        assert_eq!(pending.attempts, 1);
        let unchanged = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(unchanged.password_hash, "old-hash");
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn exhausted_attempts_drop_the_request(pool: PgPool) {
        let (store, _) = seeded(pool).await;
        for _ in 0..2 {
            assert!(matches!(
                store.consume_reset("bob@example.com", "000000", NOW, "new-hash", 2).await,
                Err(ResetError::CodeMismatch)
            ));
        }
        assert!(store.find_reset("bob@example.com").await.unwrap().is_none());
        assert!(matches!(
            store.consume_reset("bob@example.com", "123456", NOW, "new-hash", 2).await,
            Err(ResetError::NotFound)
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn expired_request_is_dropped(pool: PgPool) {
        let (store, user) = seeded(pool).await;
        let late = NOW + Duration::minutes(30) + Duration::seconds(1);
        assert!(matches!(
            store.consume_reset("bob@example.com", "123456", late, "new-hash", 5).await,
            Err(ResetError::Expired)
        ));
        assert!(store.find_reset("bob@example.com").await.unwrap().is_none());
        let unchanged = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(unchanged.password_hash, "old-hash");
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn correct_code_stores_hash_and_consumes_request(pool: PgPool) {
        let (store, user) = seeded(pool).await;
        let id = store
            .consume_reset("bob@example.com", "123456", NOW, "new-hash", 5)
            .await
            .unwrap();
        assert_eq!(id, user.id);

        let updated = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(updated.password_hash, "new-hash");
        assert!(store.find_reset("bob@example.com").await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn concurrent_consumes_succeed_once(pool: PgPool) {
        let (store, _) = seeded(pool).await;
        let tasks: Vec<_> = ["hash-a", "hash-b"]
            .into_iter()
            .map(|hash| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .consume_reset("bob@example.com", "123456", NOW, hash, 5)
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(ResetError::NotFound) => {}
                Err(other) => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(ok, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn email_change_drops_reset_for_old_email(pool: PgPool) {
        let (store, user) = seeded(pool).await;

        let renamed = store
            .update(
                user.id,
                UserChanges {
                    name: Some("Robert".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.name, "Robert");
        assert!(store.find_reset("bob@example.com").await.unwrap().is_some());

        let moved = store
            .update(
                user.id,
                UserChanges {
                    email: Some("robert@example.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.email, "robert@example.com");
        assert!(store.find_reset("bob@example.com").await.unwrap().is_none());
        assert!(store.update(Uuid::new_v4(), UserChanges::default()).await.unwrap().is_none());
    }
}
