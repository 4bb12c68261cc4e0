//! Record Store
//!
//! The single durable persistence layer for the identity subsystem:
//! member profiles, auth side-state (attempt counters, locks, OTP
//! challenges) and the append-only audit trail, all in one embedded
//! SQLite database behind a connection pool.
//!
//! The store knows nothing about authentication semantics; callers own
//! the meaning of what they persist here.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::path::Path;
use std::time::Duration;

use crate::error::{IdentityError, UniqueField};
use crate::models::{CampusCategory, UserProfile};

/// Bound on how long a caller may wait for storage before the operation
/// is surfaced as a retryable error.
const STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================
// Aux Records & Audit Events
// ============================================

/// Side-table record kinds, one logical table per auth concern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxKind {
    /// Consecutive failed sign-in attempts
    Attempts,
    /// Temporary account lock
    Lock,
    /// Live one-time passcode challenge
    Otp,
}

impl AuxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuxKind::Attempts => "attempts",
            AuxKind::Lock => "lock",
            AuxKind::Otp => "otp",
        }
    }
}

/// Authentication-relevant events appended to the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    UserRegistered,
    LoginSuccess,
    LoginFailed,
    AccountLocked,
    AccountUnlocked,
    OtpIssued,
    OtpVerified,
    OtpRejected,
    OtpExpired,
    OtpDeliveryFailed,
    SessionCreated,
    SessionDestroyed,
    PasswordChanged,
    ProfileUpdated,
    IdentifierRecovered,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::UserRegistered => "USER_REGISTERED",
            AuditEvent::LoginSuccess => "LOGIN_SUCCESS",
            AuditEvent::LoginFailed => "LOGIN_FAILED",
            AuditEvent::AccountLocked => "ACCOUNT_LOCKED",
            AuditEvent::AccountUnlocked => "ACCOUNT_UNLOCKED",
            AuditEvent::OtpIssued => "OTP_ISSUED",
            AuditEvent::OtpVerified => "OTP_VERIFIED",
            AuditEvent::OtpRejected => "OTP_REJECTED",
            AuditEvent::OtpExpired => "OTP_EXPIRED",
            AuditEvent::OtpDeliveryFailed => "OTP_DELIVERY_FAILED",
            AuditEvent::SessionCreated => "SESSION_CREATED",
            AuditEvent::SessionDestroyed => "SESSION_DESTROYED",
            AuditEvent::PasswordChanged => "PASSWORD_CHANGED",
            AuditEvent::ProfileUpdated => "PROFILE_UPDATED",
            AuditEvent::IdentifierRecovered => "IDENTIFIER_RECOVERED",
        }
    }
}

/// One row of the audit trail
#[derive(Debug, Clone, FromRow)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub identifier: String,
    pub event: String,
    pub detail: String,
}

// ============================================
// Row Mapping
// ============================================

/// Raw profile row; `field_labels` is stored as a JSON array so label
/// count and text length are not tied to any fixed-width layout.
#[derive(Debug, FromRow)]
struct ProfileRow {
    identifier: String,
    name: String,
    institute: String,
    department: String,
    campus: CampusCategory,
    email: String,
    mobile: String,
    password_hash: String,
    field_labels: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for UserProfile {
    type Error = IdentityError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let field_labels: Vec<String> = serde_json::from_str(&row.field_labels)
            .map_err(|e| IdentityError::Io(format!("corrupt field_labels column: {e}")))?;

        Ok(UserProfile {
            identifier: row.identifier,
            name: row.name,
            institute: row.institute,
            department: row.department,
            campus: row.campus,
            email: row.email,
            mobile: row.mobile,
            password_hash: row.password_hash,
            field_labels,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============================================
// Record Store
// ============================================

/// Durable keyed storage for profiles, auth side-state and the audit log
#[derive(Debug, Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    /// Open (creating if missing) a file-backed store
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(STORAGE_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(STORAGE_TIMEOUT)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Open an in-memory store. Single connection: every pooled
    /// connection to `:memory:` would otherwise get its own database.
    pub async fn open_in_memory() -> Result<Self, IdentityError> {
        let options = SqliteConnectOptions::new().filename(":memory:");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(STORAGE_TIMEOUT)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), IdentityError> {
        tracing::info!("Running identity store migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                identifier TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                institute TEXT NOT NULL,
                department TEXT NOT NULL,
                campus TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                mobile TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                field_labels TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auth_state (
                identifier TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (identifier, kind)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                at TEXT NOT NULL,
                identifier TEXT NOT NULL,
                event TEXT NOT NULL,
                detail TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_identifier ON audit_log(identifier);",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    // ============================================
    // Profiles
    // ============================================

    /// Persist a new profile. Uniqueness of identifier, email and mobile
    /// is enforced by the database constraints, so two racing creates
    /// cannot both succeed; the loser sees `AlreadyExists` naming the
    /// offending field.
    pub async fn create_profile(&self, profile: &UserProfile) -> Result<(), IdentityError> {
        let labels = serde_json::to_string(&profile.field_labels)
            .map_err(|e| IdentityError::Io(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO profiles
                (identifier, name, institute, department, campus, email, mobile,
                 password_hash, field_labels, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.identifier)
        .bind(&profile.name)
        .bind(&profile.institute)
        .bind(&profile.department)
        .bind(profile.campus)
        .bind(&profile.email)
        .bind(&profile.mobile)
        .bind(&profile.password_hash)
        .bind(&labels)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Point lookup by identifier
    pub async fn get_profile(&self, identifier: &str) -> Result<UserProfile, IdentityError> {
        let row: Option<ProfileRow> =
            sqlx::query_as("SELECT * FROM profiles WHERE identifier = ?")
                .bind(identifier)
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or(IdentityError::NotFound)?.try_into()
    }

    /// Rewrite an existing profile. A single UPDATE statement, so a
    /// concurrent reader sees either the old row or the new one, never
    /// a torn mix.
    pub async fn update_profile(&self, profile: &UserProfile) -> Result<(), IdentityError> {
        let labels = serde_json::to_string(&profile.field_labels)
            .map_err(|e| IdentityError::Io(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE profiles SET
                name = ?, institute = ?, department = ?, campus = ?,
                email = ?, mobile = ?, password_hash = ?, field_labels = ?,
                updated_at = ?
            WHERE identifier = ?
            "#,
        )
        .bind(&profile.name)
        .bind(&profile.institute)
        .bind(&profile.department)
        .bind(profile.campus)
        .bind(&profile.email)
        .bind(&profile.mobile)
        .bind(&profile.password_hash)
        .bind(&labels)
        .bind(profile.updated_at)
        .bind(&profile.identifier)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::NotFound);
        }

        Ok(())
    }

    /// Resolve an identifier through one of the unique secondary fields.
    /// Drives signup uniqueness checks and forgot-identifier recovery.
    pub async fn find_by_unique(
        &self,
        field: UniqueField,
        value: &str,
    ) -> Result<String, IdentityError> {
        let sql = match field {
            UniqueField::Identifier => "SELECT identifier FROM profiles WHERE identifier = ?",
            UniqueField::Email => "SELECT identifier FROM profiles WHERE email = ?",
            UniqueField::Mobile => "SELECT identifier FROM profiles WHERE mobile = ?",
        };

        let id: Option<String> = sqlx::query_scalar(sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        id.ok_or(IdentityError::NotFound)
    }

    // ============================================
    // Aux Side-Tables
    // ============================================

    /// Upsert an aux record, replacing any previous one of that kind
    pub async fn put_aux<T: Serialize>(
        &self,
        identifier: &str,
        kind: AuxKind,
        value: &T,
    ) -> Result<(), IdentityError> {
        let data = serde_json::to_string(value).map_err(|e| IdentityError::Io(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO auth_state (identifier, kind, data, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (identifier, kind)
            DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            "#,
        )
        .bind(identifier)
        .bind(kind.as_str())
        .bind(&data)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch an aux record, `None` when absent
    pub async fn get_aux<T: DeserializeOwned>(
        &self,
        identifier: &str,
        kind: AuxKind,
    ) -> Result<Option<T>, IdentityError> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM auth_state WHERE identifier = ? AND kind = ?")
                .bind(identifier)
                .bind(kind.as_str())
                .fetch_optional(&self.pool)
                .await?;

        match data {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| IdentityError::Io(format!("corrupt {} record: {e}", kind.as_str()))),
            None => Ok(None),
        }
    }

    /// Delete an aux record. Returns whether a record existed, which is
    /// what makes single-use consumption (OTP) race-safe: of two
    /// concurrent deletes, exactly one observes `true`.
    pub async fn delete_aux(
        &self,
        identifier: &str,
        kind: AuxKind,
    ) -> Result<bool, IdentityError> {
        let result =
            sqlx::query("DELETE FROM auth_state WHERE identifier = ? AND kind = ?")
                .bind(identifier)
                .bind(kind.as_str())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Audit Trail
    // ============================================

    /// Append one audit entry; the trail is never mutated
    pub async fn append_audit(
        &self,
        identifier: &str,
        event: AuditEvent,
        detail: &str,
    ) -> Result<(), IdentityError> {
        tracing::debug!(identifier, event = event.as_str(), "audit");

        sqlx::query("INSERT INTO audit_log (at, identifier, event, detail) VALUES (?, ?, ?, ?)")
            .bind(Utc::now())
            .bind(identifier)
            .bind(event.as_str())
            .bind(detail)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Audit entries for one identifier, oldest first
    pub async fn audit_for(&self, identifier: &str) -> Result<Vec<AuditEntry>, IdentityError> {
        let entries = sqlx::query_as(
            "SELECT at, identifier, event, detail FROM audit_log WHERE identifier = ? ORDER BY id",
        )
        .bind(identifier)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    // ============================================
    // Backup
    // ============================================

    /// Write a consistent snapshot of the whole store to `dest`.
    /// The snapshot is itself a valid store file.
    pub async fn backup(&self, dest: impl AsRef<Path>) -> Result<(), IdentityError> {
        let dest = dest.as_ref().to_string_lossy().to_string();

        sqlx::query("VACUUM INTO ?")
            .bind(&dest)
            .execute(&self.pool)
            .await?;

        tracing::info!(dest, "Store backup written");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::sample_profile;
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Marker {
        n: u32,
    }

    #[tokio::test]
    async fn test_create_then_get_roundtrip() {
        let store = RecordStore::open_in_memory().await.unwrap();
        let profile = sample_profile("ab261234", "a@b.com", "9876543210");

        store.create_profile(&profile).await.unwrap();
        let loaded = store.get_profile("ab261234").await.unwrap();

        assert_eq!(loaded, profile);
    }

    #[tokio::test]
    async fn test_missing_profile_is_not_found() {
        let store = RecordStore::open_in_memory().await.unwrap();
        assert!(matches!(
            store.get_profile("nobody").await,
            Err(IdentityError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_create_names_offending_field() {
        let store = RecordStore::open_in_memory().await.unwrap();
        store
            .create_profile(&sample_profile("ab261234", "a@b.com", "9876543210"))
            .await
            .unwrap();

        let dup_id = store
            .create_profile(&sample_profile("ab261234", "x@y.com", "9999999999"))
            .await;
        assert!(matches!(
            dup_id,
            Err(IdentityError::AlreadyExists {
                field: UniqueField::Identifier
            })
        ));

        let dup_email = store
            .create_profile(&sample_profile("cd261234", "a@b.com", "9999999999"))
            .await;
        assert!(matches!(
            dup_email,
            Err(IdentityError::AlreadyExists {
                field: UniqueField::Email
            })
        ));

        let dup_mobile = store
            .create_profile(&sample_profile("ef261234", "x@y.com", "9876543210"))
            .await;
        assert!(matches!(
            dup_mobile,
            Err(IdentityError::AlreadyExists {
                field: UniqueField::Mobile
            })
        ));
    }

    #[tokio::test]
    async fn test_update_changes_exactly_one_field() {
        let store = RecordStore::open_in_memory().await.unwrap();
        store
            .create_profile(&sample_profile("ab261234", "a@b.com", "9876543210"))
            .await
            .unwrap();

        let mut changed = store.get_profile("ab261234").await.unwrap();
        changed.department = "ECE".to_string();
        store.update_profile(&changed).await.unwrap();

        let reloaded = store.get_profile("ab261234").await.unwrap();
        assert_eq!(reloaded.department, "ECE");
        assert_eq!(reloaded, changed);
    }

    #[tokio::test]
    async fn test_update_missing_profile_is_not_found() {
        let store = RecordStore::open_in_memory().await.unwrap();
        let ghost = sample_profile("gh261234", "g@h.com", "9123456780");

        assert!(matches!(
            store.update_profile(&ghost).await,
            Err(IdentityError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_find_by_unique_fields() {
        let store = RecordStore::open_in_memory().await.unwrap();
        store
            .create_profile(&sample_profile("ab261234", "a@b.com", "9876543210"))
            .await
            .unwrap();

        assert_eq!(
            store.find_by_unique(UniqueField::Email, "a@b.com").await.unwrap(),
            "ab261234"
        );
        assert_eq!(
            store
                .find_by_unique(UniqueField::Mobile, "9876543210")
                .await
                .unwrap(),
            "ab261234"
        );
        assert!(matches!(
            store.find_by_unique(UniqueField::Email, "no@one.com").await,
            Err(IdentityError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_aux_roundtrip_and_single_use_delete() {
        let store = RecordStore::open_in_memory().await.unwrap();

        store
            .put_aux("ab261234", AuxKind::Attempts, &Marker { n: 2 })
            .await
            .unwrap();
        let loaded: Option<Marker> = store.get_aux("ab261234", AuxKind::Attempts).await.unwrap();
        assert_eq!(loaded, Some(Marker { n: 2 }));

        // Upsert replaces
        store
            .put_aux("ab261234", AuxKind::Attempts, &Marker { n: 3 })
            .await
            .unwrap();
        let replaced: Option<Marker> =
            store.get_aux("ab261234", AuxKind::Attempts).await.unwrap();
        assert_eq!(replaced, Some(Marker { n: 3 }));

        // First delete consumes, second observes nothing
        assert!(store.delete_aux("ab261234", AuxKind::Attempts).await.unwrap());
        assert!(!store.delete_aux("ab261234", AuxKind::Attempts).await.unwrap());
    }

    #[tokio::test]
    async fn test_aux_kinds_are_independent() {
        let store = RecordStore::open_in_memory().await.unwrap();

        store
            .put_aux("ab261234", AuxKind::Attempts, &Marker { n: 1 })
            .await
            .unwrap();
        store
            .put_aux("ab261234", AuxKind::Lock, &Marker { n: 9 })
            .await
            .unwrap();

        store.delete_aux("ab261234", AuxKind::Attempts).await.unwrap();

        let lock: Option<Marker> = store.get_aux("ab261234", AuxKind::Lock).await.unwrap();
        assert_eq!(lock, Some(Marker { n: 9 }));
    }

    #[tokio::test]
    async fn test_audit_is_append_only_and_ordered() {
        let store = RecordStore::open_in_memory().await.unwrap();

        store
            .append_audit("ab261234", AuditEvent::LoginFailed, "wrong password")
            .await
            .unwrap();
        store
            .append_audit("ab261234", AuditEvent::AccountLocked, "threshold reached")
            .await
            .unwrap();
        store
            .append_audit("cd265678", AuditEvent::LoginSuccess, "")
            .await
            .unwrap();

        let trail = store.audit_for("ab261234").await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].event, "LOGIN_FAILED");
        assert_eq!(trail[1].event, "ACCOUNT_LOCKED");
    }

    #[tokio::test]
    async fn test_backup_snapshot_is_a_valid_store() {
        let store = RecordStore::open_in_memory().await.unwrap();
        store
            .create_profile(&sample_profile("ab261234", "a@b.com", "9876543210"))
            .await
            .unwrap();

        let dest = std::env::temp_dir().join(format!(
            "campus-identity-backup-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&dest);

        store.backup(&dest).await.unwrap();

        let restored = RecordStore::open(&dest).await.unwrap();
        let profile = restored.get_profile("ab261234").await.unwrap();
        assert_eq!(profile.email, "a@b.com");

        let _ = std::fs::remove_file(&dest);
    }
}
