/// Content Repository
///
/// Hierarchical node/property store that comment records live in.
/// Supports multiple backend implementations (in-memory, SQLite).

pub mod memory;
pub mod sqlite;
pub mod value;

pub use memory::{MemoryRepository, MemorySession};
pub use sqlite::{SqliteRepository, SqliteSession};
pub use value::{Property, PropertyType, PropertyValue, Value};

use crate::error::RepositoryResult;
use async_trait::async_trait;

/// Key of the repository root node in every backend
pub const ROOT_NODE_KEY: &str = "00000000-0000-0000-0000-000000000000";

/// Node type of the repository root
pub const NT_ROOT: &str = "rep:root";

/// System property holding a node's primary type
pub const PROP_PRIMARY_TYPE: &str = "jcr:primaryType";

/// System property listing a node's mixins
pub const PROP_MIXIN_TYPES: &str = "jcr:mixinTypes";

/// System property holding the identifier of a referenceable node
pub const PROP_UUID: &str = "jcr:uuid";

/// Mixin that makes a node addressable by identifier
pub const MIX_REFERENCEABLE: &str = "mix:referenceable";

/// Handle to a node, valid for any session of the same repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(String);

impl NodeRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn root() -> Self {
        Self(ROOT_NODE_KEY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Sort order for a node query
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub property: String,
    pub descending: bool,
}

/// Attribute-equality query over nodes of one type
#[derive(Debug, Clone, PartialEq)]
pub struct NodeQuery {
    pub node_type: String,
    pub property: String,
    pub equals: Value,
    pub order_by: Option<OrderBy>,
    pub offset: u64,
    pub limit: Option<u64>,
}

/// One user's view of a repository.
///
/// Writes are pending until [`Session::save`] and can be dropped with
/// [`Session::discard_changes`]. Reads see the session's own pending
/// changes.
#[async_trait]
pub trait Session: Send + Sync {
    /// Identifier of the user this session belongs to
    fn user_id(&self) -> &str;

    /// The repository root node
    async fn root(&self) -> RepositoryResult<NodeRef> {
        Ok(NodeRef::root())
    }

    /// Check whether `parent` has a child called `name`
    async fn has_child(&self, parent: &NodeRef, name: &str) -> RepositoryResult<bool>;

    /// Get the child called `name`
    async fn child(&self, parent: &NodeRef, name: &str) -> RepositoryResult<NodeRef>;

    /// Names of the children of `parent`
    async fn child_names(&self, parent: &NodeRef) -> RepositoryResult<Vec<String>>;

    /// Add a child node; sibling names are unique
    async fn add_child(&self, parent: &NodeRef, name: &str, node_type: &str) -> RepositoryResult<NodeRef>;

    /// Remove a node and its subtree
    async fn remove(&self, node: &NodeRef) -> RepositoryResult<()>;

    /// Resolve a referenceable node by its identifier
    async fn node_by_identifier(&self, identifier: &str) -> RepositoryResult<NodeRef>;

    /// Identifier of a node
    async fn identifier(&self, node: &NodeRef) -> RepositoryResult<String>;

    /// Add the referenceable mixin so the node resolves by identifier
    async fn mark_referenceable(&self, node: &NodeRef) -> RepositoryResult<()>;

    /// Check whether the node carries the referenceable mixin
    async fn is_referenceable(&self, node: &NodeRef) -> RepositoryResult<bool>;

    /// All properties of a node, system properties included
    async fn properties(&self, node: &NodeRef) -> RepositoryResult<Vec<Property>>;

    /// A single property, if present
    async fn property(&self, node: &NodeRef, name: &str) -> RepositoryResult<Option<Property>>;

    /// Check whether the node has a property called `name`
    async fn has_property(&self, node: &NodeRef, name: &str) -> RepositoryResult<bool> {
        Ok(self.property(node, name).await?.is_some())
    }

    /// Set a property; protected properties are rejected
    async fn set_property(&self, node: &NodeRef, name: &str, value: PropertyValue) -> RepositoryResult<()>;

    /// Persist all pending changes
    async fn save(&self) -> RepositoryResult<()>;

    /// Drop all pending changes
    async fn discard_changes(&self) -> RepositoryResult<()>;

    /// Run a node query, materializing the whole page
    async fn query(&self, query: &NodeQuery) -> RepositoryResult<Vec<NodeRef>>;
}
