use crate::db::db_utils::{column_names, quote_ident, row_to_json};
use crate::db::multi_db_pool::MultiDbPool;
use crate::db::DbError;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Table name -> ordered column names, as found in the live database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TableCatalog {
    tables: BTreeMap<String, Vec<String>>,
}

impl TableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_table<I, S>(mut self, name: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(name, columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn insert(&mut self, name: &str, columns: Vec<String>) {
        self.tables.insert(name.to_string(), columns);
    }

    /// SQLite resolves table names case-insensitively, so the lookup does too.
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
            || self.tables.keys().any(|known| known.eq_ignore_ascii_case(name))
    }

    #[cfg(test)]
    pub fn columns(&self, name: &str) -> Option<&[String]> {
        self.tables.get(name).map(Vec::as_slice)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Caches per-database catalogs and LLM schema context. Both are loaded on
/// first use and kept until an explicit refresh.
pub struct SchemaManager {
    pools: Arc<MultiDbPool>,
    catalogs: RwLock<HashMap<String, Arc<TableCatalog>>>,
    contexts: RwLock<HashMap<String, Arc<String>>>,
    last_refresh: RwLock<chrono::DateTime<chrono::Utc>>,
}

impl SchemaManager {
    pub fn new(pools: Arc<MultiDbPool>) -> Self {
        Self {
            pools,
            catalogs: RwLock::new(HashMap::new()),
            contexts: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(chrono::Utc::now()),
        }
    }

    pub async fn catalog(&self, database: &str) -> Result<Arc<TableCatalog>, DbError> {
        if let Some(catalog) = self.catalogs.read().await.get(database) {
            return Ok(Arc::clone(catalog));
        }

        let pools = Arc::clone(&self.pools);
        let name = database.to_string();
        let catalog = tokio::task::spawn_blocking(move || -> Result<TableCatalog, DbError> {
            let conn = pools.get(&name)?;
            load_catalog(&conn)
        })
        .await
        .map_err(|e| DbError::Pool(format!("schema task failed: {}", e)))??;

        info!(
            "Loaded catalog for '{}': {} tables {:?}",
            database,
            catalog.len(),
            catalog.table_names().collect::<Vec<_>>()
        );
        if catalog.is_empty() {
            warn!("Database '{}' has no tables; every query against it will be rejected", database);
        }

        let catalog = Arc::new(catalog);
        self.catalogs
            .write()
            .await
            .insert(database.to_string(), Arc::clone(&catalog));
        Ok(catalog)
    }

    /// `CREATE` statements plus one example row per table, for the generator prompt.
    pub async fn schema_context(&self, database: &str) -> Result<Arc<String>, DbError> {
        if let Some(context) = self.contexts.read().await.get(database) {
            return Ok(Arc::clone(context));
        }

        let pools = Arc::clone(&self.pools);
        let name = database.to_string();
        let context = tokio::task::spawn_blocking(move || -> Result<String, DbError> {
            let conn = pools.get(&name)?;
            load_schema_context(&conn)
        })
        .await
        .map_err(|e| DbError::Pool(format!("schema task failed: {}", e)))??;

        let context = Arc::new(context);
        self.contexts
            .write()
            .await
            .insert(database.to_string(), Arc::clone(&context));
        Ok(context)
    }

    /// Drops every cached catalog and schema context.
    pub async fn refresh_cache(&self) {
        info!("Refreshing schema cache");
        self.catalogs.write().await.clear();
        self.contexts.write().await.clear();
        *self.last_refresh.write().await = chrono::Utc::now();
    }

    pub async fn last_refresh(&self) -> chrono::DateTime<chrono::Utc> {
        *self.last_refresh.read().await
    }
}

fn user_tables(conn: &Connection) -> Result<Vec<(String, Option<String>)>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master \
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tables)
}

pub fn load_catalog(conn: &Connection) -> Result<TableCatalog, DbError> {
    let mut catalog = TableCatalog::new();
    let mut columns_stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;

    for (table, _) in user_tables(conn)? {
        let columns = columns_stmt
            .query_map([&table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Table {} has columns {:?}", table, columns);
        catalog.insert(&table, columns);
    }

    Ok(catalog)
}

pub fn load_schema_context(conn: &Connection) -> Result<String, DbError> {
    let mut blocks = Vec::new();

    for (table, create_sql) in user_tables(conn)? {
        let mut sample_stmt = conn.prepare(&format!("SELECT * FROM {} LIMIT 1", quote_ident(&table)))?;
        let columns = column_names(&sample_stmt);
        let sample = sample_stmt
            .query_map([], |row| row_to_json(row, &columns))?
            .next()
            .transpose()?
            .map(|row| serde_json::Value::Object(row).to_string())
            .unwrap_or_else(|| "{}".to_string());

        blocks.push(format!(
            "{}\n-- Example row for {}:\n-- {}\n",
            create_sql.unwrap_or_else(|| format!("-- table {}", table)),
            table,
            sample
        ));
    }

    Ok(blocks.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT, segment TEXT);
             CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER, total REAL);
             CREATE VIEW big_orders AS SELECT * FROM orders WHERE total > 100;
             INSERT INTO customers VALUES (1, 'Ada', 'retail');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn catalog_lists_tables_views_and_ordered_columns() {
        let catalog = load_catalog(&fixture()).unwrap();

        assert_eq!(
            catalog.table_names().collect::<Vec<_>>(),
            vec!["big_orders", "customers", "orders"]
        );
        assert_eq!(
            catalog.columns("customers").unwrap(),
            &["id".to_string(), "name".to_string(), "segment".to_string()]
        );
        assert!(catalog.contains("ORDERS"));
        assert!(!catalog.contains("payments"));
    }

    #[test]
    fn schema_context_includes_ddl_and_sample_rows() {
        let context = load_schema_context(&fixture()).unwrap();

        assert!(context.contains("CREATE TABLE customers"));
        assert!(context.contains("-- Example row for customers:"));
        assert!(context.contains(r#"{"id":1,"name":"Ada","segment":"retail"}"#));
        assert!(context.contains("-- Example row for orders:\n-- {}"));
    }

    #[tokio::test]
    async fn catalogs_are_cached_until_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let db_dir = dir.path().join("shop");
        std::fs::create_dir_all(&db_dir).unwrap();
        let path = db_dir.join("shop.sqlite");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE a (x INTEGER);")
            .unwrap();

        let manager = SchemaManager::new(Arc::new(MultiDbPool::new(dir.path().to_path_buf(), 2)));
        assert_eq!(manager.catalog("shop").await.unwrap().len(), 1);

        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE b (y INTEGER);")
            .unwrap();
        assert_eq!(manager.catalog("shop").await.unwrap().len(), 1);

        manager.refresh_cache().await;
        assert_eq!(manager.catalog("shop").await.unwrap().len(), 2);
    }
}
