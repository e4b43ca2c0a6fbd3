//! Store encryption.
//!
//! # Keying flow
//!
//! 1. **Open**: The engine opens the file. If it is encrypted, nothing can
//!    be read yet.
//! 2. **Detect**: `PRAGMA cipher_version` tells whether the engine was built
//!    with a cipher. A plain build silently ignores `PRAGMA key`, so a
//!    credential against a plain build is rejected up front with
//!    [`DbError::CipherUnavailable`].
//! 3. **Key**: `PRAGMA key` is issued with either the passphrase or the
//!    raw 32-byte key in `x'<hex>'` form. Raw keys skip the KDF.
//! 4. **Verify**: A read from `sqlite_master` touches the first page. A
//!    wrong key surfaces here as [`DbError::NotADatabase`] instead of later
//!    during schema setup.
//!
//! Every intermediate string holding key material is wrapped in
//! [`Zeroizing`] and cleared on drop.

use std::fmt;
use std::sync::Arc;

use rusqlite::OptionalExtension;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::connection::Connection;
use crate::error::{DbError, DbResult};

/// Secret used to key an encrypted store.
#[derive(Default)]
pub enum Credential {
    /// The store is not encrypted.
    #[default]
    None,
    /// Passphrase, run through the cipher's KDF.
    Passphrase(SecretString),
    /// Raw 256-bit key, used as-is.
    RawKey(Zeroizing<[u8; 32]>),
}

impl Credential {
    /// Builds a passphrase credential.
    #[must_use]
    pub fn passphrase(passphrase: impl Into<String>) -> Self {
        Self::Passphrase(SecretString::from(passphrase.into()))
    }

    /// Builds a raw-key credential.
    #[must_use]
    pub fn raw_key(key: [u8; 32]) -> Self {
        Self::RawKey(Zeroizing::new(key))
    }

    /// Returns `true` unless this is [`Credential::None`].
    #[must_use]
    pub const fn is_some(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Renders the value for `PRAGMA key` / `PRAGMA rekey`, or `None` when
    /// there is no secret.
    fn pragma_value(&self) -> Option<Zeroizing<String>> {
        match self {
            Self::None => None,
            Self::Passphrase(secret) => Some(Zeroizing::new(format!(
                "'{}'",
                secret.expose_secret().replace('\'', "''")
            ))),
            Self::RawKey(key) => {
                let key_hex = Zeroizing::new(hex::encode(key.as_slice()));
                Some(Zeroizing::new(format!("\"x'{}'\"", key_hex.as_str())))
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::None => "None",
            Self::Passphrase(_) => "Passphrase([REDACTED])",
            Self::RawKey(_) => "RawKey([REDACTED])",
        };
        f.write_str(kind)
    }
}

/// Callback run against a freshly opened connection.
pub type ConnectionHook = Arc<dyn Fn(&Connection) -> DbResult<()> + Send + Sync>;

/// Callbacks around the keying step.
///
/// `pre_key` runs before `PRAGMA key` (cipher compatibility settings go
/// here), `post_key` after the key has been verified.
#[derive(Clone, Default)]
pub struct KeyHooks {
    /// Runs before keying.
    pub pre_key: Option<ConnectionHook>,
    /// Runs after the key was verified.
    pub post_key: Option<ConnectionHook>,
}

impl fmt::Debug for KeyHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHooks")
            .field("pre_key", &self.pre_key.is_some())
            .field("post_key", &self.post_key.is_some())
            .finish()
    }
}

/// Returns `true` if the engine was built with a cipher.
///
/// # Errors
///
/// Propagates engine failures.
pub fn cipher_available(conn: &Connection) -> DbResult<bool> {
    let version: Option<String> = conn
        .raw()
        .query_row("PRAGMA cipher_version;", [], |row| row.get(0))
        .optional()?;
    Ok(version.is_some_and(|v| !v.trim().is_empty()))
}

/// Keys `conn` with `credential` and verifies the key.
///
/// Hooks run even when the credential is [`Credential::None`].
pub(crate) fn apply_key(
    conn: &Connection,
    credential: &Credential,
    hooks: &KeyHooks,
) -> DbResult<()> {
    if let Some(pre_key) = &hooks.pre_key {
        pre_key(conn)?;
    }
    if let Some(value) = credential.pragma_value() {
        if !cipher_available(conn)? {
            return Err(DbError::CipherUnavailable);
        }
        let pragma = Zeroizing::new(format!("PRAGMA key = {};", value.as_str()));
        conn.execute_batch(&pragma)?;
    }
    verify_readable(conn)?;
    if let Some(post_key) = &hooks.post_key {
        post_key(conn)?;
    }
    Ok(())
}

/// Changes the key of an open, keyed store.
///
/// Rekeying to [`Credential::None`] decrypts the store.
pub(crate) fn rekey(conn: &Connection, credential: &Credential) -> DbResult<()> {
    if !cipher_available(conn)? {
        return Err(DbError::CipherUnavailable);
    }
    let value = credential
        .pragma_value()
        .unwrap_or_else(|| Zeroizing::new("''".to_string()));
    let pragma = Zeroizing::new(format!("PRAGMA rekey = {};", value.as_str()));
    conn.execute_batch(&pragma)
}

/// Touches the first page so a wrong key fails here.
fn verify_readable(conn: &Connection) -> DbResult<()> {
    conn.raw()
        .query_row("SELECT count(*) FROM sqlite_master;", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|err| match DbError::from(err) {
            DbError::NotADatabase(message) => DbError::NotADatabase(format!(
                "key verification failed (is the key correct?): {message}"
            )),
            other => other,
        })?;
    Ok(())
}

/// Runs `PRAGMA integrity_check` and returns whether the store is healthy.
///
/// # Errors
///
/// Propagates engine failures, including corruption detected while reading.
pub fn integrity_check(conn: &Connection) -> DbResult<bool> {
    let result: String = conn
        .raw()
        .query_row("PRAGMA integrity_check;", [], |row| row.get(0))?;
    Ok(result.trim() == "ok")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_passphrase_is_quoted_and_redacted() {
        let credential = Credential::passphrase("it's secret");
        let value = credential.pragma_value().expect("value");
        assert_eq!(value.as_str(), "'it''s secret'");
        assert_eq!(format!("{credential:?}"), "Passphrase([REDACTED])");
    }

    #[test]
    fn test_raw_key_uses_hex_literal() {
        let credential = Credential::raw_key([0xAB; 32]);
        let value = credential.pragma_value().expect("value");
        assert!(value.starts_with("\"x'abab"));
        assert!(value.ends_with("'\""));
        assert!(Credential::None.pragma_value().is_none());
    }

    #[test]
    fn test_unkeyed_open_runs_hooks() {
        let conn = Connection::open_in_memory().expect("open");
        let calls = Arc::new(AtomicUsize::new(0));
        let pre = Arc::clone(&calls);
        let post = Arc::clone(&calls);
        let hooks = KeyHooks {
            pre_key: Some(Arc::new(move |_| {
                pre.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
            post_key: Some(Arc::new(move |_| {
                post.fetch_add(10, Ordering::SeqCst);
                Ok(())
            })),
        };
        apply_key(&conn, &Credential::None, &hooks).expect("apply");
        assert_eq!(calls.load(Ordering::SeqCst), 11);
        assert!(integrity_check(&conn).expect("check"));
    }

    #[cfg(not(feature = "sqlcipher"))]
    #[test]
    fn test_credential_without_cipher_is_rejected() {
        let conn = Connection::open_in_memory().expect("open");
        let result = apply_key(&conn, &Credential::passphrase("pw"), &KeyHooks::default());
        assert!(matches!(result, Err(DbError::CipherUnavailable)));
        assert!(matches!(
            rekey(&conn, &Credential::raw_key([1; 32])),
            Err(DbError::CipherUnavailable)
        ));
    }

    #[cfg(feature = "sqlcipher")]
    #[test]
    fn test_wrong_key_is_reported_as_not_a_database() {
        use crate::config::OpenFlags;
        use crate::connection::DatabasePath;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = DatabasePath::File(dir.path().join("keyed.db"));
        {
            let conn = Connection::open(&path, OpenFlags::READ_WRITE_CREATE).expect("open");
            apply_key(&conn, &Credential::raw_key([7; 32]), &KeyHooks::default()).expect("key");
            conn.execute_batch("CREATE TABLE t (x INTEGER);").expect("create");
        }
        let conn = Connection::open(&path, OpenFlags::READ_WRITE_CREATE).expect("reopen");
        let result = apply_key(&conn, &Credential::raw_key([8; 32]), &KeyHooks::default());
        assert!(matches!(result, Err(DbError::NotADatabase(_))));
    }
}
