use anyhow::{Context, Result};
use chrono::Utc;
use rand::RngCore;
use rusqlite::{params, OptionalExtension};

use crate::db::Database;
use crate::models::OwnerIdentity;

/// 24 random bytes, hex-encoded: the shape every issued token has had since
/// the first deployment.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Database {
    /// Creates the account if it does not exist and returns its current
    /// token, issuing one when missing.
    pub async fn ensure_user(&self, email: &str) -> Result<String> {
        let email = email.to_string();
        let fresh = generate_token();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO users (email, token, created_at) VALUES (?1, ?2, ?3)",
                params![email, fresh, Utc::now().to_rfc3339()],
            )
            .with_context(|| "failed to insert user")?;

            let token: Option<String> = conn
                .query_row("SELECT token FROM users WHERE email = ?1", params![email], |row| {
                    row.get(0)
                })
                .with_context(|| "failed to read user token")?;

            match token {
                Some(token) => Ok(token),
                None => {
                    let issued = generate_token();
                    conn.execute(
                        "UPDATE users SET token = ?1 WHERE email = ?2",
                        params![issued, email],
                    )?;
                    Ok(issued)
                }
            }
        })
        .await
    }

    /// Maps a presented token to its owner. Pure lookup against current
    /// state; rotated-away tokens stop resolving immediately.
    pub async fn resolve_token(&self, token: &str) -> Result<Option<OwnerIdentity>> {
        let token = token.to_string();
        self.execute(move |conn| {
            let email: Option<String> = conn
                .query_row(
                    "SELECT email FROM users WHERE token = ?1",
                    params![token],
                    |row| row.get(0),
                )
                .optional()
                .with_context(|| "failed to resolve token")?;
            Ok(email.map(OwnerIdentity::new))
        })
        .await
    }

    /// Replaces the owner's current token with a fresh one. Returns `None`
    /// when the presented token is not current for any owner.
    pub async fn rotate_token(&self, current: &str) -> Result<Option<String>> {
        let current = current.to_string();
        let fresh = generate_token();
        self.execute(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET token = ?1 WHERE token = ?2",
                    params![fresh, current],
                )
                .with_context(|| "failed to rotate token")?;
            Ok((changed == 1).then_some(fresh))
        })
        .await
    }

    /// Recording-policy interval override for one owner, if configured.
    pub async fn policy_interval_ms(&self, owner: &OwnerIdentity) -> Result<Option<i64>> {
        let owner = owner.clone();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT min_interval_ms FROM policies WHERE owner = ?1",
                params![owner.as_str()],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| "failed to read policy")
        })
        .await
    }

    pub async fn set_policy_interval_ms(&self, owner: &OwnerIdentity, interval_ms: i64) -> Result<()> {
        let owner = owner.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO policies (owner, min_interval_ms) VALUES (?1, ?2)
                 ON CONFLICT(owner) DO UPDATE SET min_interval_ms = excluded.min_interval_ms",
                params![owner.as_str(), interval_ms],
            )
            .with_context(|| "failed to store policy")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_support::open_temp;
    use crate::models::OwnerIdentity;

    #[tokio::test]
    async fn ensure_user_is_idempotent_and_tokens_resolve() {
        let (db, _dir) = open_temp();
        let token = db.ensure_user("u1@example.com").await.unwrap();
        let again = db.ensure_user("u1@example.com").await.unwrap();
        assert_eq!(token, again);

        let owner = db.resolve_token(&token).await.unwrap().unwrap();
        assert_eq!(owner.as_str(), "u1@example.com");
        assert!(db.resolve_token("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rotation_invalidates_the_previous_token() {
        let (db, _dir) = open_temp();
        let old = db.ensure_user("u1@example.com").await.unwrap();

        let fresh = db.rotate_token(&old).await.unwrap().unwrap();
        assert_ne!(fresh, old);

        assert!(db.resolve_token(&old).await.unwrap().is_none());
        let owner = db.resolve_token(&fresh).await.unwrap().unwrap();
        assert_eq!(owner.as_str(), "u1@example.com");

        assert!(db.rotate_token(&old).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn policy_roundtrip() {
        let (db, _dir) = open_temp();
        let owner = OwnerIdentity::from("u1@example.com");
        assert!(db.policy_interval_ms(&owner).await.unwrap().is_none());

        db.set_policy_interval_ms(&owner, 300_000).await.unwrap();
        assert_eq!(db.policy_interval_ms(&owner).await.unwrap(), Some(300_000));

        db.set_policy_interval_ms(&owner, 600_000).await.unwrap();
        assert_eq!(db.policy_interval_ms(&owner).await.unwrap(), Some(600_000));
    }
}
