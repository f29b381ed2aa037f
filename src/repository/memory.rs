/// In-memory repository backend
///
/// The persisted tree sits behind a shared lock. A session copies it into a
/// private draft on its first write and records a change log; saving replays
/// the log onto the shared tree, so two sessions racing on the same sibling
/// name fail the same way they would against a real repository.
use crate::{
    error::{RepositoryError, RepositoryResult},
    repository::{
        NodeQuery, NodeRef, Property, PropertyType, PropertyValue, Session, Value,
        MIX_REFERENCEABLE, NT_ROOT, PROP_MIXIN_TYPES, PROP_PRIMARY_TYPE, PROP_UUID, ROOT_NODE_KEY,
    },
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct NodeEntry {
    name: String,
    node_type: String,
    parent: Option<String>,
    children: BTreeMap<String, String>,
    properties: BTreeMap<String, Property>,
    referenceable: bool,
}

impl NodeEntry {
    fn new(name: &str, node_type: &str, parent: Option<String>) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(
            PROP_PRIMARY_TYPE.to_string(),
            Property {
                name: PROP_PRIMARY_TYPE.to_string(),
                value: PropertyValue::Single(Value::Name(node_type.to_string())),
                protected: true,
            },
        );

        Self {
            name: name.to_string(),
            node_type: node_type.to_string(),
            parent,
            children: BTreeMap::new(),
            properties,
            referenceable: false,
        }
    }
}

/// A single pending write
#[derive(Debug, Clone)]
enum Change {
    AddChild {
        parent: String,
        key: String,
        name: String,
        node_type: String,
    },
    Remove {
        key: String,
    },
    SetProperty {
        key: String,
        name: String,
        value: PropertyValue,
    },
    MarkReferenceable {
        key: String,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: HashMap<String, NodeEntry>,
}

impl Default for Tree {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_NODE_KEY.to_string(), NodeEntry::new("", NT_ROOT, None));
        Self { nodes }
    }
}

impl Tree {
    fn node(&self, key: &str) -> RepositoryResult<&NodeEntry> {
        self.nodes
            .get(key)
            .ok_or_else(|| RepositoryError::ItemNotFound(format!("node {}", key)))
    }

    fn node_mut(&mut self, key: &str) -> RepositoryResult<&mut NodeEntry> {
        self.nodes
            .get_mut(key)
            .ok_or_else(|| RepositoryError::ItemNotFound(format!("node {}", key)))
    }

    fn path(&self, key: &str) -> String {
        let mut segments = Vec::new();
        let mut current = self.nodes.get(key);

        while let Some(entry) = current {
            if entry.parent.is_none() {
                break;
            }
            segments.push(entry.name.as_str());
            current = entry.parent.as_deref().and_then(|p| self.nodes.get(p));
        }

        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    /// Apply a change, leaving the tree untouched when it is rejected
    fn apply(&mut self, change: &Change) -> RepositoryResult<()> {
        match change {
            Change::AddChild {
                parent,
                key,
                name,
                node_type,
            } => {
                if self.node(parent)?.children.contains_key(name) {
                    return Err(RepositoryError::ItemExists(format!(
                        "{}/{}",
                        self.path(parent).trim_end_matches('/'),
                        name
                    )));
                }
                if self.nodes.contains_key(key) {
                    return Err(RepositoryError::ItemExists(format!("node {}", key)));
                }

                self.nodes
                    .insert(key.clone(), NodeEntry::new(name, node_type, Some(parent.clone())));
                self.node_mut(parent)?.children.insert(name.clone(), key.clone());
            }
            Change::Remove { key } => {
                if key == ROOT_NODE_KEY {
                    return Err(RepositoryError::ConstraintViolation(
                        "the root node cannot be removed".to_string(),
                    ));
                }

                let entry = self.node(key)?;
                let name = entry.name.clone();
                let parent = entry.parent.clone();

                let mut stack = vec![key.clone()];
                while let Some(next) = stack.pop() {
                    if let Some(removed) = self.nodes.remove(&next) {
                        stack.extend(removed.children.into_values());
                    }
                }

                if let Some(parent) = parent {
                    if let Some(parent_entry) = self.nodes.get_mut(&parent) {
                        parent_entry.children.remove(&name);
                    }
                }
            }
            Change::SetProperty { key, name, value } => {
                value.validate()?;
                let entry = self.node_mut(key)?;

                if entry.properties.get(name).map_or(false, |p| p.protected) {
                    return Err(RepositoryError::ConstraintViolation(format!(
                        "property {} is protected",
                        name
                    )));
                }

                entry.properties.insert(
                    name.clone(),
                    Property {
                        name: name.clone(),
                        value: value.clone(),
                        protected: false,
                    },
                );
            }
            Change::MarkReferenceable { key } => {
                let entry = self.node_mut(key)?;
                if entry.referenceable {
                    return Ok(());
                }

                entry.referenceable = true;
                entry.properties.insert(
                    PROP_MIXIN_TYPES.to_string(),
                    Property {
                        name: PROP_MIXIN_TYPES.to_string(),
                        value: PropertyValue::Multiple {
                            value_type: PropertyType::Name,
                            values: vec![Value::Name(MIX_REFERENCEABLE.to_string())],
                        },
                        protected: true,
                    },
                );
                entry.properties.insert(
                    PROP_UUID.to_string(),
                    Property {
                        name: PROP_UUID.to_string(),
                        value: PropertyValue::Single(Value::String(key.clone())),
                        protected: true,
                    },
                );
            }
        }

        Ok(())
    }

    fn query(&self, query: &NodeQuery) -> Vec<NodeRef> {
        let Some(wanted) = query.equals.index_key() else {
            return Vec::new();
        };
        let wanted_type = query.equals.value_type();

        let mut hits: Vec<(Option<String>, &String)> = self
            .nodes
            .iter()
            .filter(|(_, entry)| entry.node_type == query.node_type)
            .filter(|(_, entry)| {
                entry.properties.get(&query.property).map_or(false, |p| {
                    !p.is_multiple()
                        && p.property_type() == wanted_type
                        && p.value.index_key().as_deref() == Some(wanted.as_str())
                })
            })
            .map(|(key, entry)| {
                let sort_key = query
                    .order_by
                    .as_ref()
                    .and_then(|order| entry.properties.get(&order.property))
                    .and_then(|p| p.value.index_key());
                (sort_key, key)
            })
            .collect();

        // Missing sort keys order first ascending and last descending
        let descending = query.order_by.as_ref().map_or(false, |o| o.descending);
        hits.sort_by(|a, b| {
            let primary = if descending { b.0.cmp(&a.0) } else { a.0.cmp(&b.0) };
            primary.then_with(|| a.1.cmp(b.1))
        });

        hits.into_iter()
            .skip(query.offset as usize)
            .take(query.limit.map_or(usize::MAX, |l| l as usize))
            .map(|(_, key)| NodeRef::new(key.clone()))
            .collect()
    }
}

/// In-memory repository shared by all of its sessions
#[derive(Clone, Default)]
pub struct MemoryRepository {
    tree: Arc<RwLock<Tree>>,
}

impl MemoryRepository {
    /// Create an empty repository holding only the root node
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for a user
    pub fn login(&self, user_id: impl Into<String>) -> MemorySession {
        MemorySession {
            user_id: user_id.into(),
            shared: Arc::clone(&self.tree),
            pending: Mutex::new(None),
        }
    }

    /// Number of persisted nodes, root included
    pub async fn node_count(&self) -> usize {
        self.tree.read().await.nodes.len()
    }
}

struct Pending {
    draft: Tree,
    changes: Vec<Change>,
}

/// Session over a [`MemoryRepository`]
pub struct MemorySession {
    user_id: String,
    shared: Arc<RwLock<Tree>>,
    pending: Mutex<Option<Pending>>,
}

impl MemorySession {
    async fn read<T>(&self, f: impl FnOnce(&Tree) -> RepositoryResult<T>) -> RepositoryResult<T> {
        let pending = self.pending.lock().await;
        if let Some(p) = pending.as_ref() {
            return f(&p.draft);
        }

        let shared = self.shared.read().await;
        f(&shared)
    }

    async fn write(&self, change: Change) -> RepositoryResult<()> {
        let mut pending = self.pending.lock().await;

        if pending.is_none() {
            let snapshot = (*self.shared.read().await).clone();
            *pending = Some(Pending {
                draft: snapshot,
                changes: Vec::new(),
            });
        }

        let Some(p) = pending.as_mut() else {
            return Ok(());
        };

        if let Err(e) = p.draft.apply(&change) {
            if p.changes.is_empty() {
                *pending = None;
            }
            return Err(e);
        }

        p.changes.push(change);
        Ok(())
    }
}

#[async_trait]
impl Session for MemorySession {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn has_child(&self, parent: &NodeRef, name: &str) -> RepositoryResult<bool> {
        self.read(|tree| Ok(tree.node(parent.as_str())?.children.contains_key(name)))
            .await
    }

    async fn child(&self, parent: &NodeRef, name: &str) -> RepositoryResult<NodeRef> {
        self.read(|tree| {
            tree.node(parent.as_str())?
                .children
                .get(name)
                .map(|key| NodeRef::new(key.clone()))
                .ok_or_else(|| {
                    RepositoryError::ItemNotFound(format!(
                        "{}/{}",
                        tree.path(parent.as_str()).trim_end_matches('/'),
                        name
                    ))
                })
        })
        .await
    }

    async fn child_names(&self, parent: &NodeRef) -> RepositoryResult<Vec<String>> {
        self.read(|tree| Ok(tree.node(parent.as_str())?.children.keys().cloned().collect()))
            .await
    }

    async fn add_child(&self, parent: &NodeRef, name: &str, node_type: &str) -> RepositoryResult<NodeRef> {
        let key = Uuid::new_v4().to_string();

        self.write(Change::AddChild {
            parent: parent.as_str().to_string(),
            key: key.clone(),
            name: name.to_string(),
            node_type: node_type.to_string(),
        })
        .await?;

        Ok(NodeRef::new(key))
    }

    async fn remove(&self, node: &NodeRef) -> RepositoryResult<()> {
        self.write(Change::Remove {
            key: node.as_str().to_string(),
        })
        .await
    }

    async fn node_by_identifier(&self, identifier: &str) -> RepositoryResult<NodeRef> {
        self.read(|tree| match tree.nodes.get(identifier) {
            Some(entry) if entry.referenceable => Ok(NodeRef::new(identifier)),
            _ => Err(RepositoryError::ItemNotFound(format!(
                "no referenceable node with identifier {}",
                identifier
            ))),
        })
        .await
    }

    async fn identifier(&self, node: &NodeRef) -> RepositoryResult<String> {
        self.read(|tree| tree.node(node.as_str()).map(|_| node.as_str().to_string()))
            .await
    }

    async fn mark_referenceable(&self, node: &NodeRef) -> RepositoryResult<()> {
        self.write(Change::MarkReferenceable {
            key: node.as_str().to_string(),
        })
        .await
    }

    async fn is_referenceable(&self, node: &NodeRef) -> RepositoryResult<bool> {
        self.read(|tree| Ok(tree.node(node.as_str())?.referenceable)).await
    }

    async fn properties(&self, node: &NodeRef) -> RepositoryResult<Vec<Property>> {
        self.read(|tree| Ok(tree.node(node.as_str())?.properties.values().cloned().collect()))
            .await
    }

    async fn property(&self, node: &NodeRef, name: &str) -> RepositoryResult<Option<Property>> {
        self.read(|tree| Ok(tree.node(node.as_str())?.properties.get(name).cloned()))
            .await
    }

    async fn set_property(&self, node: &NodeRef, name: &str, value: PropertyValue) -> RepositoryResult<()> {
        self.write(Change::SetProperty {
            key: node.as_str().to_string(),
            name: name.to_string(),
            value,
        })
        .await
    }

    async fn save(&self) -> RepositoryResult<()> {
        let mut pending = self.pending.lock().await;
        let Some(p) = pending.take() else {
            return Ok(());
        };

        let mut shared = self.shared.write().await;
        let mut next = (*shared).clone();

        let replayed = p.changes.iter().try_for_each(|change| next.apply(change));
        match replayed {
            Ok(()) => {
                *shared = next;
                Ok(())
            }
            Err(e) => {
                // A failed save keeps the pending changes until discarded
                *pending = Some(p);
                Err(e)
            }
        }
    }

    async fn discard_changes(&self) -> RepositoryResult<()> {
        *self.pending.lock().await = None;
        Ok(())
    }

    async fn query(&self, query: &NodeQuery) -> RepositoryResult<Vec<NodeRef>> {
        // Queries only see persisted state
        let shared = self.shared.read().await;
        Ok(shared.query(query))
    }
}
