/// SQLite repository backend
///
/// Persists the node tree in two tables. Each session lazily opens one
/// transaction for its writes; `save` commits it and `discard_changes`
/// rolls it back. Reads go through the open transaction when there is one
/// so a session sees its own pending changes.
use crate::{
    config::RepositoryConfig,
    error::{RepositoryError, RepositoryResult},
    repository::{
        NodeQuery, NodeRef, Property, PropertyType, PropertyValue, Session, Value,
        MIX_REFERENCEABLE, NT_ROOT, PROP_MIXIN_TYPES, PROP_PRIMARY_TYPE, PROP_UUID, ROOT_NODE_KEY,
    },
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Run a read either inside the session's open transaction or on the pool
macro_rules! run_read {
    ($session:expr, $query:expr, $method:ident) => {{
        let mut guard = $session.tx.lock().await;
        match guard.as_mut() {
            Some(tx) => $query.$method(&mut **tx).await?,
            None => $query.$method(&$session.pool).await?,
        }
    }};
}

/// SQLite-backed repository
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (creating if missing) the repository database
    pub async fn open(config: &RepositoryConfig) -> RepositoryResult<Self> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RepositoryError::Database(sqlx::Error::Io(e)))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(&config.database_path)
                    .journal_mode(SqliteJournalMode::Wal)
                    .foreign_keys(true)
                    .create_if_missing(true)
                    .busy_timeout(Duration::from_secs(config.busy_timeout_secs)),
            )
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS node (
                id TEXT PRIMARY KEY NOT NULL,
                parent_id TEXT REFERENCES node(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                node_type TEXT NOT NULL,
                referenceable INTEGER NOT NULL DEFAULT 0,
                UNIQUE (parent_id, name)
            );

            CREATE TABLE IF NOT EXISTS property (
                node_id TEXT NOT NULL REFERENCES node(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                value_type TEXT NOT NULL,
                multiple INTEGER NOT NULL,
                protected INTEGER NOT NULL DEFAULT 0,
                value_json TEXT NOT NULL,
                index_key TEXT,
                PRIMARY KEY (node_id, name)
            );

            CREATE INDEX IF NOT EXISTS idx_node_type ON node(node_type);
            CREATE INDEX IF NOT EXISTS idx_property_lookup ON property(name, index_key);
            "#,
        )
        .execute(&pool)
        .await?;

        let mut tx = pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO node (id, parent_id, name, node_type) VALUES (?1, NULL, '', ?2)",
        )
        .bind(ROOT_NODE_KEY)
        .bind(NT_ROOT)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() > 0 {
            insert_property(
                &mut tx,
                ROOT_NODE_KEY,
                PROP_PRIMARY_TYPE,
                &PropertyValue::Single(Value::Name(NT_ROOT.to_string())),
                true,
            )
            .await?;
            tracing::info!("Initialized repository database at {}", config.database_path.display());
        }
        tx.commit().await?;

        Ok(Self { pool })
    }

    /// Open a session for a user
    pub fn login(&self, user_id: impl Into<String>) -> SqliteSession {
        SqliteSession {
            user_id: user_id.into(),
            pool: self.pool.clone(),
            tx: Mutex::new(None),
        }
    }

    /// Number of persisted nodes, root included
    pub async fn node_count(&self) -> RepositoryResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM node")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Close the pool; open sessions fail afterwards
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn insert_property(
    tx: &mut Transaction<'static, Sqlite>,
    node_id: &str,
    name: &str,
    value: &PropertyValue,
    protected: bool,
) -> RepositoryResult<()> {
    sqlx::query(
        "INSERT INTO property (node_id, name, value_type, multiple, protected, value_json, index_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(node_id, name) DO UPDATE SET
            value_type = excluded.value_type,
            multiple = excluded.multiple,
            protected = excluded.protected,
            value_json = excluded.value_json,
            index_key = excluded.index_key",
    )
    .bind(node_id)
    .bind(name)
    .bind(value.value_type().as_str())
    .bind(value.is_multiple())
    .bind(protected)
    .bind(serde_json::to_string(value)?)
    .bind(value.index_key())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn property_from_row(row: &sqlx::sqlite::SqliteRow) -> RepositoryResult<Property> {
    let value_json: String = row.try_get("value_json")?;
    Ok(Property {
        name: row.try_get("name")?,
        value: serde_json::from_str(&value_json)?,
        protected: row.try_get("protected")?,
    })
}

fn not_found(node: &NodeRef) -> RepositoryError {
    RepositoryError::ItemNotFound(format!("node {}", node.as_str()))
}

/// Session over a [`SqliteRepository`]
pub struct SqliteSession {
    user_id: String,
    pool: SqlitePool,
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
}

impl SqliteSession {
    async fn node_exists(&self, node: &NodeRef) -> RepositoryResult<bool> {
        let found: Option<String> = run_read!(
            self,
            sqlx::query_scalar("SELECT id FROM node WHERE id = ?1").bind(node.as_str()),
            fetch_optional
        );
        Ok(found.is_some())
    }
}

async fn begin<'a>(
    pool: &SqlitePool,
    slot: &'a mut Option<Transaction<'static, Sqlite>>,
) -> RepositoryResult<&'a mut Transaction<'static, Sqlite>> {
    if slot.is_none() {
        *slot = Some(pool.begin().await?);
    }
    slot.as_mut()
        .ok_or_else(|| RepositoryError::ConstraintViolation("no open transaction".to_string()))
}

#[async_trait]
impl Session for SqliteSession {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn has_child(&self, parent: &NodeRef, name: &str) -> RepositoryResult<bool> {
        let found: Option<String> = run_read!(
            self,
            sqlx::query_scalar("SELECT id FROM node WHERE parent_id = ?1 AND name = ?2")
                .bind(parent.as_str())
                .bind(name),
            fetch_optional
        );
        Ok(found.is_some())
    }

    async fn child(&self, parent: &NodeRef, name: &str) -> RepositoryResult<NodeRef> {
        let found: Option<String> = run_read!(
            self,
            sqlx::query_scalar("SELECT id FROM node WHERE parent_id = ?1 AND name = ?2")
                .bind(parent.as_str())
                .bind(name),
            fetch_optional
        );
        found
            .map(NodeRef::new)
            .ok_or_else(|| RepositoryError::ItemNotFound(format!("{}/{}", parent.as_str(), name)))
    }

    async fn child_names(&self, parent: &NodeRef) -> RepositoryResult<Vec<String>> {
        let names: Vec<String> = run_read!(
            self,
            sqlx::query_scalar("SELECT name FROM node WHERE parent_id = ?1 ORDER BY name")
                .bind(parent.as_str()),
            fetch_all
        );
        Ok(names)
    }

    async fn add_child(&self, parent: &NodeRef, name: &str, node_type: &str) -> RepositoryResult<NodeRef> {
        if !self.node_exists(parent).await? {
            return Err(not_found(parent));
        }
        if self.has_child(parent, name).await? {
            return Err(RepositoryError::ItemExists(format!("{}/{}", parent.as_str(), name)));
        }

        let key = Uuid::new_v4().to_string();
        let mut guard = self.tx.lock().await;
        let tx = begin(&self.pool, &mut guard).await?;

        sqlx::query("INSERT INTO node (id, parent_id, name, node_type) VALUES (?1, ?2, ?3, ?4)")
            .bind(&key)
            .bind(parent.as_str())
            .bind(name)
            .bind(node_type)
            .execute(&mut **tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    RepositoryError::ItemExists(format!("{}/{}", parent.as_str(), name))
                }
                _ => RepositoryError::Database(e),
            })?;

        insert_property(
            tx,
            &key,
            PROP_PRIMARY_TYPE,
            &PropertyValue::Single(Value::Name(node_type.to_string())),
            true,
        )
        .await?;

        Ok(NodeRef::new(key))
    }

    async fn remove(&self, node: &NodeRef) -> RepositoryResult<()> {
        if node.as_str() == ROOT_NODE_KEY {
            return Err(RepositoryError::ConstraintViolation(
                "the root node cannot be removed".to_string(),
            ));
        }

        let mut guard = self.tx.lock().await;
        let tx = begin(&self.pool, &mut guard).await?;

        let removed = sqlx::query("DELETE FROM node WHERE id = ?1")
            .bind(node.as_str())
            .execute(&mut **tx)
            .await?;

        if removed.rows_affected() == 0 {
            return Err(not_found(node));
        }
        Ok(())
    }

    async fn node_by_identifier(&self, identifier: &str) -> RepositoryResult<NodeRef> {
        let found: Option<String> = run_read!(
            self,
            sqlx::query_scalar("SELECT id FROM node WHERE id = ?1 AND referenceable = 1")
                .bind(identifier),
            fetch_optional
        );
        found.map(NodeRef::new).ok_or_else(|| {
            RepositoryError::ItemNotFound(format!("no referenceable node with identifier {}", identifier))
        })
    }

    async fn identifier(&self, node: &NodeRef) -> RepositoryResult<String> {
        if self.node_exists(node).await? {
            Ok(node.as_str().to_string())
        } else {
            Err(not_found(node))
        }
    }

    async fn mark_referenceable(&self, node: &NodeRef) -> RepositoryResult<()> {
        if self.is_referenceable(node).await? {
            return Ok(());
        }

        let mut guard = self.tx.lock().await;
        let tx = begin(&self.pool, &mut guard).await?;

        sqlx::query("UPDATE node SET referenceable = 1 WHERE id = ?1")
            .bind(node.as_str())
            .execute(&mut **tx)
            .await?;

        insert_property(
            tx,
            node.as_str(),
            PROP_MIXIN_TYPES,
            &PropertyValue::Multiple {
                value_type: PropertyType::Name,
                values: vec![Value::Name(MIX_REFERENCEABLE.to_string())],
            },
            true,
        )
        .await?;
        insert_property(
            tx,
            node.as_str(),
            PROP_UUID,
            &PropertyValue::Single(Value::String(node.as_str().to_string())),
            true,
        )
        .await
    }

    async fn is_referenceable(&self, node: &NodeRef) -> RepositoryResult<bool> {
        let flag: Option<bool> = run_read!(
            self,
            sqlx::query_scalar("SELECT referenceable FROM node WHERE id = ?1").bind(node.as_str()),
            fetch_optional
        );
        flag.ok_or_else(|| not_found(node))
    }

    async fn properties(&self, node: &NodeRef) -> RepositoryResult<Vec<Property>> {
        if !self.node_exists(node).await? {
            return Err(not_found(node));
        }

        let rows = run_read!(
            self,
            sqlx::query("SELECT name, protected, value_json FROM property WHERE node_id = ?1 ORDER BY name")
                .bind(node.as_str()),
            fetch_all
        );
        rows.iter().map(property_from_row).collect()
    }

    async fn property(&self, node: &NodeRef, name: &str) -> RepositoryResult<Option<Property>> {
        if !self.node_exists(node).await? {
            return Err(not_found(node));
        }

        let row = run_read!(
            self,
            sqlx::query("SELECT name, protected, value_json FROM property WHERE node_id = ?1 AND name = ?2")
                .bind(node.as_str())
                .bind(name),
            fetch_optional
        );
        row.as_ref().map(property_from_row).transpose()
    }

    async fn set_property(&self, node: &NodeRef, name: &str, value: PropertyValue) -> RepositoryResult<()> {
        value.validate()?;

        if let Some(existing) = self.property(node, name).await? {
            if existing.protected {
                return Err(RepositoryError::ConstraintViolation(format!(
                    "property {} is protected",
                    name
                )));
            }
        }

        let mut guard = self.tx.lock().await;
        let tx = begin(&self.pool, &mut guard).await?;
        insert_property(tx, node.as_str(), name, &value, false).await
    }

    async fn save(&self) -> RepositoryResult<()> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn discard_changes(&self) -> RepositoryResult<()> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn query(&self, query: &NodeQuery) -> RepositoryResult<Vec<NodeRef>> {
        let Some(wanted) = query.equals.index_key() else {
            return Ok(Vec::new());
        };

        let direction = match &query.order_by {
            Some(order) if order.descending => "DESC",
            _ => "ASC",
        };
        let order_property = query.order_by.as_ref().map(|o| o.property.as_str()).unwrap_or("");
        // SQLite treats a negative LIMIT as unbounded
        let limit = query.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);

        let statement = format!(
            "SELECT n.id FROM node n
             JOIN property p ON p.node_id = n.id AND p.name = ?1 AND p.multiple = 0
                AND p.value_type = ?2 AND p.index_key = ?3
             LEFT JOIN property o ON o.node_id = n.id AND o.name = ?4
             WHERE n.node_type = ?5
             ORDER BY o.index_key {}, n.id
             LIMIT ?6 OFFSET ?7",
            direction
        );

        let ids: Vec<String> = run_read!(
            self,
            sqlx::query_scalar(&statement)
                .bind(&query.property)
                .bind(query.equals.value_type().as_str())
                .bind(&wanted)
                .bind(order_property)
                .bind(&query.node_type)
                .bind(limit)
                .bind(offset),
            fetch_all
        );

        Ok(ids.into_iter().map(NodeRef::new).collect())
    }
}
