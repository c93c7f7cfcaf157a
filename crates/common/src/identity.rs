//! Local identity store: users, password hashes and login sessions
//!
//! Passwords are stored as Argon2 PHC strings. Session tokens are random
//! 256-bit values handed to the client once; only their SHA-256 is kept.

use crate::types::{Session, UserAccount};
use crate::{Database, Error, Result};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Identity store over the shared state database
#[derive(Clone)]
pub struct IdentityStore {
    db: Database,
}

fn now_epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// SHA-256 of a session token, hex encoded
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

impl IdentityStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a new user with a password
    pub fn register(&self, username: &str, password: &str) -> Result<UserAccount> {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)?
            .to_string();

        let user = UserAccount::new(username);
        let conn = self.db.connection();
        let conn = conn.lock();
        let inserted = conn.execute(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(username) DO NOTHING",
            params![user.id, user.username, password_hash, user.created_at],
        )?;
        if inserted == 0 {
            return Err(Error::AlreadyExists {
                kind: "user".to_string(),
                id: username.to_string(),
            });
        }

        info!("Registered user {}", username);
        Ok(user)
    }

    /// Check a username/password pair
    pub fn verify_login(&self, username: &str, password: &str) -> Result<UserAccount> {
        let row: Option<(String, String, i64)> = {
            let conn = self.db.connection();
            let conn = conn.lock();
            conn.query_row(
                "SELECT id, password_hash, created_at FROM users WHERE username = ?1",
                params![username],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?
        };

        let (id, stored, created_at) = row.ok_or_else(|| Error::not_found("user", username))?;
        let parsed = PasswordHash::new(&stored)?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            return Err(Error::PermissionDenied("wrong password".to_string()));
        }

        Ok(UserAccount {
            id,
            username: username.to_string(),
            created_at,
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserAccount>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.query_row(
            "SELECT id, username, created_at FROM users WHERE id = ?1",
            params![id],
            |r| {
                Ok(UserAccount {
                    id: r.get(0)?,
                    username: r.get(1)?,
                    created_at: r.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    /// Open a session for `user_id` and return the raw bearer token
    pub fn create_session(&self, user_id: &str, ttl_secs: i64) -> Result<(String, Session)> {
        let token = hex::encode(rand::random::<[u8; 32]>());
        let now = now_epoch_secs();
        let session = Session {
            token_hash: hash_token(&token),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + ttl_secs,
        };

        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![session.token_hash, session.user_id, session.created_at, session.expires_at],
        )?;
        debug!("Opened session for user {}", user_id);
        Ok((token, session))
    }

    /// Resolve a bearer token to its user. Expired sessions are removed.
    pub fn resolve_session(&self, token: &str) -> Result<Option<UserAccount>> {
        let token_hash = hash_token(token);
        let session: Option<Session> = {
            let conn = self.db.connection();
            let conn = conn.lock();
            conn.query_row(
                "SELECT token_hash, user_id, created_at, expires_at FROM sessions WHERE token_hash = ?1",
                params![token_hash],
                |r| {
                    Ok(Session {
                        token_hash: r.get(0)?,
                        user_id: r.get(1)?,
                        created_at: r.get(2)?,
                        expires_at: r.get(3)?,
                    })
                },
            )
            .optional()?
        };

        let session = match session {
            Some(s) => s,
            None => return Ok(None),
        };
        if session.is_expired(now_epoch_secs()) {
            self.revoke_session(token)?;
            return Ok(None);
        }
        self.get_user(&session.user_id)
    }

    pub fn revoke_session(&self, token: &str) -> Result<()> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "DELETE FROM sessions WHERE token_hash = ?1",
            params![hash_token(token)],
        )?;
        Ok(())
    }

    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let count = conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            params![now_epoch_secs()],
        )?;
        Ok(count)
    }
}
