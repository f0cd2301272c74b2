use crate::db::db_pool::SqliteConnectionManager;
use crate::db::DbError;
use r2d2::{Pool, PooledConnection};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Resolves named databases under the data directory and keeps one read-only
/// pool per database. Layout: `<data_dir>/<name>/<name>.sqlite`.
pub struct MultiDbPool {
    data_dir: PathBuf,
    pool_size: u32,
    pools: Mutex<HashMap<String, SqlitePool>>,
}

impl MultiDbPool {
    pub fn new(data_dir: PathBuf, pool_size: u32) -> Self {
        Self {
            data_dir,
            pool_size,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the database file and its context files
    pub fn database_dir(&self, database: &str) -> Result<PathBuf, DbError> {
        validate_name(database)?;
        Ok(self.data_dir.join(database))
    }

    pub fn database_path(&self, database: &str) -> Result<PathBuf, DbError> {
        Ok(self.database_dir(database)?.join(format!("{}.sqlite", database)))
    }

    pub fn exists(&self, database: &str) -> bool {
        self.database_path(database)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Names of all databases present in the data directory, sorted
    pub fn list_databases(&self) -> Result<Vec<String>, DbError> {
        let mut databases = Vec::new();
        if !self.data_dir.exists() {
            return Ok(databases);
        }

        for entry in std::fs::read_dir(&self.data_dir)?.filter_map(Result::ok) {
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if self.exists(name) {
                    databases.push(name.to_string());
                }
            }
        }

        databases.sort();
        Ok(databases)
    }

    /// Pool for the named database, created on first use
    pub fn pool(&self, database: &str) -> Result<SqlitePool, DbError> {
        let path = self.database_path(database)?;

        let mut pools = self.pools.lock().map_err(|_| DbError::Poisoned)?;
        if let Some(pool) = pools.get(database) {
            return Ok(pool.clone());
        }

        if !path.is_file() {
            return Err(DbError::UnknownDatabase(database.to_string()));
        }

        info!("Opening read-only pool for database '{}' at {}", database, path.display());
        let pool = Pool::builder()
            .max_size(self.pool_size)
            .connection_timeout(Duration::from_secs(10))
            .build(SqliteConnectionManager::read_only(path))
            .map_err(|e| DbError::Pool(e.to_string()))?;

        pools.insert(database.to_string(), pool.clone());
        Ok(pool)
    }

    pub fn get(&self, database: &str) -> Result<PooledConnection<SqliteConnectionManager>, DbError> {
        let pool = self.pool(database)?;
        debug!("Borrowing connection for '{}' ({} idle)", database, pool.state().idle_connections);
        pool.get().map_err(|e| DbError::Pool(e.to_string()))
    }
}

/// Database names become path components, so only plain identifiers are allowed.
fn validate_name(database: &str) -> Result<(), DbError> {
    let valid = !database.is_empty()
        && database
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidName(database.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn create_db(root: &std::path::Path, name: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        Connection::open(dir.join(format!("{}.sqlite", name)))
            .unwrap()
            .execute_batch("CREATE TABLE t (id INTEGER);")
            .unwrap();
    }

    #[test]
    fn lists_only_directories_with_a_database_file() {
        let dir = tempfile::tempdir().unwrap();
        create_db(dir.path(), "credit");
        create_db(dir.path(), "alien");
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let pools = MultiDbPool::new(dir.path().to_path_buf(), 2);
        assert_eq!(pools.list_databases().unwrap(), vec!["alien", "credit"]);
    }

    #[test]
    fn pools_are_reused_per_database() {
        let dir = tempfile::tempdir().unwrap();
        create_db(dir.path(), "credit");

        let pools = MultiDbPool::new(dir.path().to_path_buf(), 2);
        let conn = pools.get("credit").unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 0);
        drop(conn);

        pools.get("credit").unwrap();
        assert_eq!(pools.pools.lock().unwrap().len(), 1);
    }

    #[test]
    fn unknown_and_malformed_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pools = MultiDbPool::new(dir.path().to_path_buf(), 2);

        assert!(matches!(pools.pool("missing"), Err(DbError::UnknownDatabase(_))));
        assert!(matches!(pools.pool("../etc"), Err(DbError::InvalidName(_))));
        assert!(matches!(pools.pool(""), Err(DbError::InvalidName(_))));
    }
}
