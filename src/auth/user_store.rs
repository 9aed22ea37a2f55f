//! User Storage
//! Mission: Persist user accounts and magic-link tokens in SQLite

use crate::auth::magic_link::MagicLink;
use crate::auth::models::User;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const USER_COLUMNS: &str =
    "id, email, password_hash, name, email_verified, created_at, last_login_at";

/// Errors from account creation where callers need to branch
#[derive(Debug)]
pub enum UserStoreError {
    EmailTaken,
    Other(anyhow::Error),
}

impl fmt::Display for UserStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStoreError::EmailTaken => write!(f, "Email already registered"),
            UserStoreError::Other(e) => write!(f, "{:#}", e),
        }
    }
}

impl std::error::Error for UserStoreError {}

impl From<rusqlite::Error> for UserStoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                UserStoreError::EmailTaken
            }
            _ => UserStoreError::Other(e.into()),
        }
    }
}

impl From<anyhow::Error> for UserStoreError {
    fn from(e: anyhow::Error) -> Self {
        UserStoreError::Other(e)
    }
}

/// User storage with SQLite backend
pub struct UserStore {
    db_path: String,
}

impl UserStore {
    /// Create a new user store and initialize database
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("Failed to open user database at {}", self.db_path))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Initialize database schema
    fn init_db(&self) -> Result<()> {
        let conn = self.connect()?;

        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .context("Failed to enable WAL")?;

        // Users table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT,
                name TEXT,
                email_verified INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_login_at TEXT
            )",
            [],
        )?;

        // Magic link tokens table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS magic_link_tokens (
                token TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                used_at INTEGER,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_magic_link_tokens_user
             ON magic_link_tokens(user_id)",
            [],
        )?;

        Ok(())
    }

    fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            name: row.get(3)?,
            email_verified: row.get::<_, i64>(4)? != 0,
            created_at: row.get(5)?,
            last_login_at: row.get(6)?,
        })
    }

    /// Create a new user. `password_hash` is None for passwordless accounts.
    pub fn create_user(
        &self,
        email: &str,
        password_hash: Option<&str>,
        name: Option<&str>,
    ) -> Result<User, UserStoreError> {
        let conn = self.connect()?;
        let created_at = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO users (email, password_hash, name, email_verified, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![email, password_hash, name, created_at],
        )?;

        let user = User {
            id: conn.last_insert_rowid(),
            email: email.to_string(),
            password_hash: password_hash.map(str::to_string),
            name: name.map(str::to_string),
            email_verified: false,
            created_at,
            last_login_at: None,
        };

        info!(
            user_id = user.id,
            passwordless = !user.has_password(),
            "Created user"
        );

        Ok(user)
    }

    /// Get user by (normalised) email
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS);
        conn.query_row(&sql, params![email], Self::user_from_row)
            .optional()
            .context("Failed to look up user by email")
    }

    /// Get user by ID
    pub fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
        conn.query_row(&sql, params![user_id], Self::user_from_row)
            .optional()
            .context("Failed to look up user by id")
    }

    /// List all users (admin only)
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(users)
    }

    /// Delete a user by ID (admin only). Returns false when no such user.
    pub fn delete_user(&self, user_id: i64) -> Result<bool> {
        let conn = self.connect()?;
        let rows_affected = conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;

        if rows_affected > 0 {
            info!(user_id, "Deleted user");
        }
        Ok(rows_affected > 0)
    }

    pub fn update_password_hash(&self, user_id: i64, password_hash: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![password_hash, user_id],
        )
        .context("Failed to update password hash")?;
        Ok(())
    }

    pub fn touch_last_login(&self, user_id: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE users SET last_login_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), user_id],
        )
        .context("Failed to record login time")?;
        Ok(())
    }

    /// Store a new magic link, invalidating any unused links the user still holds.
    pub fn insert_magic_link(&self, link: &MagicLink) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM magic_link_tokens WHERE user_id = ?1 AND used_at IS NULL",
            params![link.user_id],
        )?;
        tx.execute(
            "INSERT INTO magic_link_tokens (token, user_id, expires_at, used_at, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![
                link.token,
                link.user_id,
                link.expires_at.timestamp(),
                link.created_at.timestamp(),
            ],
        )?;

        tx.commit().context("Failed to store magic link")?;
        debug!(user_id = link.user_id, "Stored magic link");
        Ok(())
    }

    pub fn get_magic_link(&self, token: &str) -> Result<Option<MagicLink>> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT token, user_id, expires_at, used_at, created_at
             FROM magic_link_tokens WHERE token = ?1",
            params![token],
            |row| {
                Ok(MagicLink {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: from_unix(row.get(2)?),
                    used_at: row.get::<_, Option<i64>>(3)?.map(from_unix),
                    created_at: from_unix(row.get(4)?),
                })
            },
        )
        .optional()
        .context("Failed to look up magic link")
    }

    /// Consume a magic link. Check and mark happen in one conditional UPDATE, so
    /// of any number of concurrent redemptions at most one gets the user id.
    pub fn redeem_magic_link(&self, token: &str, now: DateTime<Utc>) -> Result<Option<i64>> {
        let mut conn = self.connect()?;
        let now_ts = now.timestamp();

        // Consuming the link and verifying the mailbox commit together or not at all.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let user_id: Option<i64> = tx
            .query_row(
                "UPDATE magic_link_tokens
                 SET used_at = ?1
                 WHERE token = ?2 AND used_at IS NULL AND expires_at > ?1
                 RETURNING user_id",
                params![now_ts, token],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to redeem magic link")?;

        if let Some(id) = user_id {
            tx.execute(
                "UPDATE users SET email_verified = 1 WHERE id = ?1",
                params![id],
            )
            .context("Failed to mark email verified")?;
        }

        tx.commit().context("Failed to commit magic link redemption")?;
        Ok(user_id)
    }

    /// Drop expired and already-used links. Returns the number removed.
    pub fn purge_expired_magic_links(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.connect()?;
        let deleted = conn.execute(
            "DELETE FROM magic_link_tokens WHERE expires_at <= ?1 OR used_at IS NOT NULL",
            params![now.timestamp()],
        )?;
        Ok(deleted)
    }
}

fn from_unix(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (UserStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = UserStore::new(db_path).unwrap();
        (store, temp_file)
    }

    #[test]
    fn test_create_and_retrieve_user() {
        let (store, _temp) = create_test_store();

        let user = store
            .create_user("reader@example.com", Some("$argon2id$x"), Some("Reader"))
            .unwrap();
        assert_eq!(user.email, "reader@example.com");
        assert!(!user.email_verified);

        let by_email = store.get_user_by_email("reader@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert_eq!(by_email.password_hash.as_deref(), Some("$argon2id$x"));
        assert_eq!(by_email.name.as_deref(), Some("Reader"));

        let by_id = store.get_user_by_id(user.id).unwrap().unwrap();
        assert_eq!(by_id.email, "reader@example.com");

        assert!(store.get_user_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn test_passwordless_user() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("nopass@example.com", None, None).unwrap();

        let loaded = store.get_user_by_id(user.id).unwrap().unwrap();
        assert!(loaded.password_hash.is_none());
        assert!(!loaded.has_password());
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let (store, _temp) = create_test_store();
        store.create_user("dup@example.com", None, None).unwrap();

        let err = store.create_user("dup@example.com", None, None).unwrap_err();
        assert!(matches!(err, UserStoreError::EmailTaken));
    }

    #[test]
    fn test_list_and_delete_users() {
        let (store, _temp) = create_test_store();
        let a = store.create_user("a@example.com", None, None).unwrap();
        store.create_user("b@example.com", None, None).unwrap();

        assert_eq!(store.list_users().unwrap().len(), 2);

        assert!(store.delete_user(a.id).unwrap());
        assert!(!store.delete_user(a.id).unwrap());
        assert_eq!(store.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_update_password_and_login_time() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("u@example.com", Some("old"), None).unwrap();

        store.update_password_hash(user.id, "new").unwrap();
        store.touch_last_login(user.id, Utc::now()).unwrap();

        let loaded = store.get_user_by_id(user.id).unwrap().unwrap();
        assert_eq!(loaded.password_hash.as_deref(), Some("new"));
        assert!(loaded.last_login_at.is_some());
    }

    #[test]
    fn test_magic_link_single_use() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("m@example.com", None, None).unwrap();
        let now = Utc::now();
        let link = MagicLink::new(user.id, ChronoDuration::minutes(15), now);
        store.insert_magic_link(&link).unwrap();

        assert_eq!(store.redeem_magic_link(&link.token, now).unwrap(), Some(user.id));
        assert_eq!(store.redeem_magic_link(&link.token, now).unwrap(), None);

        let stored = store.get_magic_link(&link.token).unwrap().unwrap();
        assert!(stored.is_used());

        let verified = store.get_user_by_id(user.id).unwrap().unwrap();
        assert!(verified.email_verified);
    }

    #[test]
    fn test_magic_link_expiry() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("e@example.com", None, None).unwrap();
        let now = Utc::now();
        let link = MagicLink::new(user.id, ChronoDuration::minutes(15), now);
        store.insert_magic_link(&link).unwrap();

        let later = now + ChronoDuration::minutes(15);
        assert_eq!(store.redeem_magic_link(&link.token, later).unwrap(), None);

        // An expired attempt must not burn the link for an in-window attempt.
        let within = now + ChronoDuration::minutes(14);
        assert_eq!(store.redeem_magic_link(&link.token, within).unwrap(), Some(user.id));
    }

    #[test]
    fn test_unknown_magic_link() {
        let (store, _temp) = create_test_store();
        assert_eq!(
            store.redeem_magic_link(&"0".repeat(64), Utc::now()).unwrap(),
            None
        );
    }

    #[test]
    fn test_new_link_invalidates_previous() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("p@example.com", None, None).unwrap();
        let now = Utc::now();

        let first = MagicLink::new(user.id, ChronoDuration::minutes(15), now);
        store.insert_magic_link(&first).unwrap();
        let second = MagicLink::new(user.id, ChronoDuration::minutes(15), now);
        store.insert_magic_link(&second).unwrap();

        assert_eq!(store.redeem_magic_link(&first.token, now).unwrap(), None);
        assert_eq!(store.redeem_magic_link(&second.token, now).unwrap(), Some(user.id));
    }

    #[test]
    fn test_concurrent_redemption_has_one_winner() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("race@example.com", None, None).unwrap();
        let now = Utc::now();
        let link = MagicLink::new(user.id, ChronoDuration::minutes(15), now);
        store.insert_magic_link(&link).unwrap();

        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let token = link.token.clone();
                std::thread::spawn(move || store.redeem_magic_link(&token, now).unwrap())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Option::is_some)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_failed_verification_leaves_link_unused() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("atomic@example.com", None, None).unwrap();
        let now = Utc::now();
        let link = MagicLink::new(user.id, ChronoDuration::minutes(15), now);
        store.insert_magic_link(&link).unwrap();

        store
            .connect()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER block_verify BEFORE UPDATE OF email_verified ON users
                 BEGIN SELECT RAISE(ABORT, 'verification blocked'); END;",
            )
            .unwrap();

        assert!(store.redeem_magic_link(&link.token, now).is_err());
        let stored = store.get_magic_link(&link.token).unwrap().unwrap();
        assert!(!stored.is_used());

        store
            .connect()
            .unwrap()
            .execute_batch("DROP TRIGGER block_verify;")
            .unwrap();
        assert_eq!(store.redeem_magic_link(&link.token, now).unwrap(), Some(user.id));
        assert!(store.get_user_by_id(user.id).unwrap().unwrap().email_verified);
    }

    #[test]
    fn test_deleting_user_removes_links() {
        let (store, _temp) = create_test_store();
        let user = store.create_user("gone@example.com", None, None).unwrap();
        let link = MagicLink::new(user.id, ChronoDuration::minutes(15), Utc::now());
        store.insert_magic_link(&link).unwrap();

        store.delete_user(user.id).unwrap();
        assert!(store.get_magic_link(&link.token).unwrap().is_none());
    }

    #[test]
    fn test_purge_expired_links() {
        let (store, _temp) = create_test_store();
        let a = store.create_user("a@example.com", None, None).unwrap();
        let b = store.create_user("b@example.com", None, None).unwrap();
        let now = Utc::now();

        let stale = MagicLink::new(a.id, ChronoDuration::minutes(15), now - ChronoDuration::hours(1));
        let fresh = MagicLink::new(b.id, ChronoDuration::minutes(15), now);
        store.insert_magic_link(&stale).unwrap();
        store.insert_magic_link(&fresh).unwrap();

        assert_eq!(store.purge_expired_magic_links(now).unwrap(), 1);
        assert!(store.get_magic_link(&fresh.token).unwrap().is_some());
    }
}
