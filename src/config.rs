/// Configuration management for the comment store
use crate::comment::mapper::{NT_COMMENT, PROP_CREATED, PROP_SUBJECT_ID};
use crate::error::{CommentError, CommentResult};
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Default name of the bucket-index root container
pub const DEFAULT_ROOT_LOCATION: &str = "doccommentdata";

/// Default prefix of comment leaf node names
pub const DEFAULT_LEAF_PREFIX: &str = "comment_";

/// Default display format for comment timestamps
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: CommentStoreConfig,
    pub repository: RepositoryConfig,
    pub logging: LoggingConfig,
}

/// Comment store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentStoreConfig {
    /// Child of the repository root holding the bucket index
    pub root_location: String,
    /// Leaf nodes are named `<prefix><creation nanos>`
    pub leaf_prefix: String,
    /// strftime format used when rendering comment headers
    pub date_format: String,
    /// Shape of the subject listing query
    pub query: SubjectQueryConfig,
}

impl Default for CommentStoreConfig {
    fn default() -> Self {
        Self {
            root_location: DEFAULT_ROOT_LOCATION.to_string(),
            leaf_prefix: DEFAULT_LEAF_PREFIX.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            query: SubjectQueryConfig::default(),
        }
    }
}

/// Which nodes the subject listing matches and how it orders them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectQueryConfig {
    pub node_type: String,
    pub subject_property: String,
    pub order_property: String,
    pub descending: bool,
}

impl Default for SubjectQueryConfig {
    fn default() -> Self {
        Self {
            node_type: NT_COMMENT.to_string(),
            subject_property: PROP_SUBJECT_ID.to_string(),
            order_property: PROP_CREATED.to_string(),
            descending: true,
        }
    }
}

/// SQLite repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub database_path: PathBuf,
    pub busy_timeout_secs: u64,
    pub max_connections: u32,
    /// User id of sessions opened by the operator binary
    pub user_id: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/comments.sqlite"),
            busy_timeout_secs: 5,
            max_connections: 5,
            user_id: "admin".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> CommentResult<Self> {
        dotenv::dotenv().ok();

        let store_defaults = CommentStoreConfig::default();
        let repository_defaults = RepositoryConfig::default();

        let root_location =
            env::var("DOCCOMMENT_ROOT_LOCATION").unwrap_or(store_defaults.root_location);
        let leaf_prefix = env::var("DOCCOMMENT_LEAF_PREFIX").unwrap_or(store_defaults.leaf_prefix);
        let date_format = env::var("DOCCOMMENT_DATE_FORMAT").unwrap_or(store_defaults.date_format);

        let query_defaults = store_defaults.query;
        let query = SubjectQueryConfig {
            node_type: env::var("DOCCOMMENT_QUERY_NODE_TYPE").unwrap_or(query_defaults.node_type),
            subject_property: env::var("DOCCOMMENT_QUERY_SUBJECT_PROPERTY")
                .unwrap_or(query_defaults.subject_property),
            order_property: env::var("DOCCOMMENT_QUERY_ORDER_PROPERTY")
                .unwrap_or(query_defaults.order_property),
            descending: match env::var("DOCCOMMENT_QUERY_DESCENDING") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|_| CommentError::Config(format!("Invalid query direction flag: {}", raw)))?,
                Err(_) => query_defaults.descending,
            },
        };

        let database_path = env::var("DOCCOMMENT_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or(repository_defaults.database_path);
        let busy_timeout_secs = match env::var("DOCCOMMENT_BUSY_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| CommentError::Config(format!("Invalid busy timeout: {}", raw)))?,
            Err(_) => repository_defaults.busy_timeout_secs,
        };
        let max_connections = env::var("DOCCOMMENT_MAX_CONNECTIONS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(repository_defaults.max_connections);
        let user_id = env::var("DOCCOMMENT_USER").unwrap_or(repository_defaults.user_id);

        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Config {
            store: CommentStoreConfig {
                root_location,
                leaf_prefix,
                date_format,
                query,
            },
            repository: RepositoryConfig {
                database_path,
                busy_timeout_secs,
                max_connections,
                user_id,
            },
            logging: LoggingConfig { level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> CommentResult<()> {
        self.store.validate()?;

        if self.repository.max_connections == 0 {
            return Err(CommentError::Config(
                "Repository needs at least one connection".to_string(),
            ));
        }

        Ok(())
    }
}

impl CommentStoreConfig {
    /// Validate store settings
    pub fn validate(&self) -> CommentResult<()> {
        if self.root_location.trim().is_empty() {
            return Err(CommentError::Config("Root location cannot be empty".to_string()));
        }

        if self.root_location.contains('/') {
            return Err(CommentError::Config(format!(
                "Root location must be a single node name: {}",
                self.root_location
            )));
        }

        if self.leaf_prefix.is_empty() {
            return Err(CommentError::Config("Leaf prefix cannot be empty".to_string()));
        }

        if StrftimeItems::new(&self.date_format).any(|item| matches!(item, Item::Error)) {
            return Err(CommentError::Config(format!(
                "Unsupported date format: {}",
                self.date_format
            )));
        }

        if self.query.node_type.trim().is_empty()
            || self.query.subject_property.trim().is_empty()
            || self.query.order_property.trim().is_empty()
        {
            return Err(CommentError::Config(
                "Subject query needs a node type, a subject property and an order property".to_string(),
            ));
        }

        Ok(())
    }
}
