use r2d2::ManageConnection;
use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;

/// r2d2 manager handing out read-only connections to a single SQLite file.
pub struct SqliteConnectionManager {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteConnectionManager {
    pub fn read_only(path: PathBuf) -> Self {
        Self {
            path,
            flags: OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        }
    }
}

impl ManageConnection for SqliteConnectionManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let conn = Connection::open_with_flags(&self.path, self.flags)?;
        // The generated SQL may be slow; never let a reader fail fast on a busy writer.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.query_row("SELECT 1", [], |_| Ok(()))
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connections_are_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.sqlite");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1);")
            .unwrap();

        let manager = SqliteConnectionManager::read_only(path);
        let mut conn = manager.connect().unwrap();
        assert!(manager.is_valid(&mut conn).is_ok());

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 1);
        assert!(conn.execute("INSERT INTO t VALUES (2)", []).is_err());
    }

    #[test]
    fn missing_file_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sqlite");
        let manager = SqliteConnectionManager::read_only(path.clone());
        assert!(manager.connect().is_err());
        assert!(!path.exists());
    }
}
