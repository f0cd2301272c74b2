pub mod db_pool;
pub mod db_utils;
pub mod multi_db_pool;
pub mod schema_manager;

use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum DbError {
    UnknownDatabase(String),
    InvalidName(String),
    Pool(String),
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    Poisoned,
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::UnknownDatabase(name) => write!(f, "Database '{}' not found", name),
            DbError::InvalidName(name) => write!(f, "Invalid database name: '{}'", name),
            DbError::Pool(msg) => write!(f, "Connection pool error: {}", msg),
            DbError::Sqlite(err) => write!(f, "SQLite error: {}", err),
            DbError::Io(err) => write!(f, "IO error: {}", err),
            DbError::Poisoned => write!(f, "Database registry lock poisoned"),
        }
    }
}

impl Error for DbError {}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::Sqlite(err)
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::Io(err)
    }
}
