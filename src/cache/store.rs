//! SQLite storage for the cache engine.
//!
//! One table of `(key BLOB PRIMARY KEY, value BLOB, expires INTEGER NULL)`
//! per store file. Size is bounded with `PRAGMA max_page_count`, which makes
//! SQLite fail a write with `SQLITE_FULL` once the store is at capacity; the
//! engine answers that with [`make_space`].

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;

use super::keys::KEY_WIDTH;

const TABLE: &str = "entries";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Space accounting reported by the store, in SQLite pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entries: u64,
    pub page_size: u64,
    pub page_count: u64,
    pub free_pages: u64,
    pub max_page_count: u64,
}

impl StoreStats {
    /// Pages holding live data.
    pub fn used_pages(&self) -> u64 {
        self.page_count.saturating_sub(self.free_pages)
    }
}

/// Open a store file and make sure its schema exists.
pub(crate) fn open(path: &Path, max_size_bytes: u64) -> rusqlite::Result<Connection> {
    let mut conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
    conn.execute_batch("PRAGMA synchronous = NORMAL;")?;

    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    let max_pages = (max_size_bytes / page_size.max(1) as u64).max(8);
    conn.query_row(&format!("PRAGMA max_page_count = {max_pages}"), [], |row| {
        row.get::<_, i64>(0)
    })?;

    ensure_schema(&mut conn)?;
    Ok(conn)
}

/// Create the table if missing. The existence check is repeated inside an
/// exclusive transaction so two workers initializing the same file do not race.
fn ensure_schema(conn: &mut Connection) -> rusqlite::Result<()> {
    if table_exists(conn)? {
        return Ok(());
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
    if !table_exists(&tx)? {
        tx.execute_batch(&format!(
            "CREATE TABLE {TABLE} (
                key BLOB PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                expires INTEGER
            ) WITHOUT ROWID;"
        ))?;
    }
    tx.commit()
}

fn table_exists(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![TABLE],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
}

/// Read a live value. Expired rows are deleted and reported as missing.
pub(crate) fn read(conn: &Connection, key: &[u8], now: i64) -> rusqlite::Result<Option<Vec<u8>>> {
    let row: Option<(Vec<u8>, Option<i64>)> = conn
        .query_row(
            &format!("SELECT value, expires FROM {TABLE} WHERE key = ?1"),
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        Some((_, Some(expires))) if expires <= now => {
            remove(conn, key)?;
            Ok(None)
        }
        Some((value, _)) => Ok(Some(value)),
        None => Ok(None),
    }
}

pub(crate) fn write(
    conn: &Connection,
    key: &[u8],
    value: &[u8],
    expires: Option<i64>,
) -> rusqlite::Result<()> {
    conn.execute(
        &format!("INSERT OR REPLACE INTO {TABLE} (key, value, expires) VALUES (?1, ?2, ?3)"),
        params![key, value, expires],
    )?;
    Ok(())
}

pub(crate) fn remove(conn: &Connection, key: &[u8]) -> rusqlite::Result<()> {
    conn.execute(&format!("DELETE FROM {TABLE} WHERE key = ?1"), params![key])?;
    Ok(())
}

pub(crate) fn clear(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(&format!("DELETE FROM {TABLE}"), [])?;
    Ok(())
}

/// Evict up to `budget` pseudo-randomly chosen entries in one transaction.
///
/// Each round draws a random key and deletes the first stored key at or after
/// it, wrapping to the smallest key when the draw lands past the end. Returns
/// the number of rows removed.
pub(crate) fn make_space(conn: &mut Connection, budget: usize) -> rusqlite::Result<usize> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut removed = 0;

    for _ in 0..budget {
        let probe: [u8; KEY_WIDTH] = rand::random();
        let victim: Option<Vec<u8>> = tx
            .query_row(
                &format!("SELECT key FROM {TABLE} WHERE key >= ?1 ORDER BY key LIMIT 1"),
                params![&probe[..]],
                |row| row.get(0),
            )
            .optional()?;
        let victim = match victim {
            Some(key) => Some(key),
            None => tx
                .query_row(
                    &format!("SELECT key FROM {TABLE} ORDER BY key LIMIT 1"),
                    [],
                    |row| row.get(0),
                )
                .optional()?,
        };
        let Some(victim) = victim else { break };
        tx.execute(&format!("DELETE FROM {TABLE} WHERE key = ?1"), params![victim])?;
        removed += 1;
    }

    tx.commit()?;
    Ok(removed)
}

pub(crate) fn stats(conn: &Connection) -> rusqlite::Result<StoreStats> {
    let pragma = |name: &str| -> rusqlite::Result<u64> {
        conn.query_row(&format!("PRAGMA {name}"), [], |row| row.get::<_, i64>(0))
            .map(|value| value.max(0) as u64)
    };
    let entries: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {TABLE}"), [], |row| {
        row.get(0)
    })?;

    Ok(StoreStats {
        entries: entries.max(0) as u64,
        page_size: pragma("page_size")?,
        page_count: pragma("page_count")?,
        free_pages: pragma("freelist_count")?,
        max_page_count: pragma("max_page_count")?,
    })
}

/// Faults that mean the file itself is unusable and should be recreated.
pub(crate) fn is_structural(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(
            ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen
                | ErrorCode::Unknown
        )
    )
}

/// The store hit its page budget.
pub(crate) fn is_full(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(ErrorCode::DiskFull)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp(max_size_bytes: u64) -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().expect("temp dir");
        let conn = open(&dir.path().join("store.sqlite"), max_size_bytes).expect("open store");
        (dir, conn)
    }

    #[test]
    fn write_then_read() {
        let (_dir, conn) = open_temp(1 << 20);
        write(&conn, b"k", b"v", None).unwrap();
        assert_eq!(read(&conn, b"k", 0).unwrap(), Some(b"v".to_vec()));
        assert_eq!(read(&conn, b"missing", 0).unwrap(), None);
    }

    #[test]
    fn expired_rows_are_misses_and_removed() {
        let (_dir, conn) = open_temp(1 << 20);
        write(&conn, b"k", b"v", Some(100)).unwrap();
        assert_eq!(read(&conn, b"k", 99).unwrap(), Some(b"v".to_vec()));
        assert_eq!(read(&conn, b"k", 100).unwrap(), None);
        assert_eq!(stats(&conn).unwrap().entries, 0);
    }

    #[test]
    fn reopening_keeps_schema_and_data() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("store.sqlite");
        {
            let conn = open(&path, 1 << 20).unwrap();
            write(&conn, b"k", b"v", None).unwrap();
        }
        let conn = open(&path, 1 << 20).unwrap();
        assert_eq!(read(&conn, b"k", 0).unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn make_space_removes_at_most_budget() {
        let (_dir, mut conn) = open_temp(1 << 20);
        for i in 0..20u8 {
            write(&conn, &[i; KEY_WIDTH], b"v", None).unwrap();
        }
        let removed = make_space(&mut conn, 5).unwrap();
        assert_eq!(removed, 5);
        assert_eq!(stats(&conn).unwrap().entries, 15);

        let removed = make_space(&mut conn, 100).unwrap();
        assert_eq!(removed, 15);
        assert_eq!(make_space(&mut conn, 100).unwrap(), 0);
    }

    #[test]
    fn page_budget_produces_full_error() {
        let (_dir, conn) = open_temp(64 * 1024);
        let payload = vec![7u8; 2048];
        let mut saw_full = false;
        for i in 0..200u32 {
            match write(&conn, &i.to_be_bytes(), &payload, None) {
                Ok(()) => {}
                Err(err) => {
                    assert!(is_full(&err), "unexpected error: {err}");
                    saw_full = true;
                    break;
                }
            }
        }
        assert!(saw_full);
    }
}
