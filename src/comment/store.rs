/// Comment Store - record lifecycle on top of a repository session
use crate::{
    comment::{
        allocator::BucketAllocator,
        mapper::{RecordMapper, NT_COMMENT, PROP_SUBJECT_ID},
        models::CommentRecord,
        presenter::DefaultCommentPresenter,
    },
    config::CommentStoreConfig,
    error::{CommentError, CommentResult, RepositoryError},
    repository::{NodeQuery, NodeRef, OrderBy, Session, Value, PROP_PRIMARY_TYPE},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Creates, reads, updates, deletes and queries comments.
///
/// A store works through one session; every mutating call ends with a save,
/// or with a discard of the session's pending changes when it fails.
pub struct CommentStore {
    session: Arc<dyn Session>,
    config: CommentStoreConfig,
    allocator: BucketAllocator,
    mapper: RecordMapper,
}

impl CommentStore {
    pub fn new(session: Arc<dyn Session>, config: CommentStoreConfig) -> Self {
        let allocator = BucketAllocator::new(config.root_location.clone());
        Self {
            session,
            config,
            allocator,
            mapper: RecordMapper,
        }
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub fn config(&self) -> &CommentStoreConfig {
        &self.config
    }

    /// Presenter rendering dates with the configured format
    pub fn presenter(&self) -> DefaultCommentPresenter {
        DefaultCommentPresenter::new(self.config.date_format.clone())
    }

    /// Make sure the bucket index exists, returning its root
    pub async fn ensure_index(&self) -> CommentResult<NodeRef> {
        self.allocator.ensure_index_root(&*self.session).await
    }

    /// Store a new comment and return its identifier.
    ///
    /// `subject_id` and `author` override whatever the record carries. The
    /// caller's record is left untouched.
    pub async fn create(&self, subject_id: &str, author: &str, record: &CommentRecord) -> CommentResult<String> {
        let mut record = record.clone();
        record.subject_id = subject_id.to_string();
        record.author = author.to_string();

        let result = self.create_node(&record).await;
        let id = self.finish("create", result).await?;

        info!("Created comment {} on {}", id, subject_id);
        Ok(id)
    }

    async fn create_node(&self, record: &CommentRecord) -> CommentResult<String> {
        let session = &*self.session;

        let container = self.allocator.ensure_index_root(session).await?;
        let bucket = self.allocator.allocate(session, &container).await?;

        let name = self.leaf_name();
        let node = session.add_child(&bucket.node, &name, NT_COMMENT).await?;
        session.mark_referenceable(&node).await?;
        self.mapper.bind_record(session, &node, record).await?;
        let id = session.identifier(&node).await?;

        session.save().await?;
        debug!("Stored comment {} at {}/{}", id, bucket.path(), name);
        Ok(id)
    }

    /// Write the record back to its node, refreshing `lastModified`.
    ///
    /// The author becomes the session user. The subject stays the one the
    /// comment was created on, whatever the record carries.
    pub async fn update(&self, record: &CommentRecord) -> CommentResult<()> {
        let id = required_id(record, "update")?.to_string();

        let mut record = record.clone();
        record.author = self.session.user_id().to_string();

        let result = self.update_node(&id, record).await;
        self.finish("update", result).await?;

        info!("Updated comment {}", id);
        Ok(())
    }

    async fn update_node(&self, id: &str, mut record: CommentRecord) -> CommentResult<()> {
        let node = self.comment_node(id).await?;

        let stored_subject = self.session.property(&node, PROP_SUBJECT_ID).await?;
        record.subject_id = match stored_subject.as_ref().and_then(|p| p.value.as_single()) {
            Some(Value::String(subject)) => subject.clone(),
            _ => String::new(),
        };

        self.mapper.bind_record(&*self.session, &node, &record).await?;
        self.session.save().await?;
        Ok(())
    }

    /// Remove the record's node
    pub async fn delete(&self, record: &CommentRecord) -> CommentResult<()> {
        let id = required_id(record, "delete")?.to_string();

        let result = self.delete_node(&id).await;
        self.finish("delete", result).await?;

        info!("Deleted comment {}", id);
        Ok(())
    }

    async fn delete_node(&self, id: &str) -> CommentResult<()> {
        let node = self.comment_node(id).await?;
        self.session.remove(&node).await?;
        self.session.save().await?;
        Ok(())
    }

    /// Load a comment by identifier
    pub async fn get_by_id(&self, id: &str) -> CommentResult<CommentRecord> {
        if id.trim().is_empty() {
            return Err(CommentError::InvalidArgument("comment id cannot be blank".to_string()));
        }

        let node = self.comment_node(id).await?;
        Ok(self.mapper.to_record(&*self.session, &node).await?)
    }

    /// Comments on a subject, newest first unless the query config says otherwise.
    ///
    /// A non-positive `limit` returns nothing without touching the
    /// repository; a negative `offset` counts as zero.
    pub async fn query_by_subject(&self, subject_id: &str, offset: i64, limit: i64) -> CommentResult<Vec<CommentRecord>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let shape = &self.config.query;
        let query = NodeQuery {
            node_type: shape.node_type.clone(),
            property: shape.subject_property.clone(),
            equals: Value::String(subject_id.to_string()),
            order_by: Some(OrderBy {
                property: shape.order_property.clone(),
                descending: shape.descending,
            }),
            offset: offset.max(0) as u64,
            limit: Some(limit as u64),
        };

        let nodes = self.session.query(&query).await?;
        debug!("Subject {} matched {} comments", subject_id, nodes.len());

        let mut records = Vec::with_capacity(nodes.len());
        for node in &nodes {
            records.push(self.mapper.to_record(&*self.session, node).await?);
        }
        Ok(records)
    }

    /// Resolve an identifier to a comment node
    async fn comment_node(&self, id: &str) -> CommentResult<NodeRef> {
        let node = match self.session.node_by_identifier(id).await {
            Ok(node) => node,
            Err(RepositoryError::ItemNotFound(_)) => return Err(CommentError::NotFound(id.to_string())),
            Err(e) => return Err(e.into()),
        };

        let is_comment = match self.session.property(&node, PROP_PRIMARY_TYPE).await? {
            Some(property) => matches!(property.value.as_single(), Some(Value::Name(t)) if t == NT_COMMENT),
            None => false,
        };
        if !is_comment {
            return Err(CommentError::NotFound(id.to_string()));
        }

        Ok(node)
    }

    fn leaf_name(&self) -> String {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("{}{}", self.config.leaf_prefix, nanos)
    }

    /// Discard pending changes when `result` failed; a failing discard is
    /// logged so the original error still reaches the caller
    async fn finish<T>(&self, operation: &str, result: CommentResult<T>) -> CommentResult<T> {
        if let Err(e) = &result {
            warn!("Comment {} failed: {}", operation, e);
            if let Err(rollback) = self.session.discard_changes().await {
                error!("Failed to discard changes after {}: {}", operation, rollback);
            }
        }
        result
    }
}

fn required_id<'a>(record: &'a CommentRecord, operation: &str) -> CommentResult<&'a str> {
    record
        .id()
        .ok_or_else(|| CommentError::InvalidArgument(format!("cannot {} a comment without an id", operation)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comment::models::AttributeValue;
    use crate::comment::presenter::CommentPresenter;
    use crate::config::SubjectQueryConfig;
    use crate::repository::MemoryRepository;
    use tokio_test::assert_ok;

    fn store(repo: &MemoryRepository, user: &str) -> CommentStore {
        CommentStore::new(Arc::new(repo.login(user)), CommentStoreConfig::default())
    }

    #[tokio::test]
    async fn test_create_stamps_subject_and_author() {
        let repo = MemoryRepository::new();
        let store = store(&repo, "alice");

        let mut record = CommentRecord::new("hello");
        record.subject_id = "ignored".to_string();
        record.author = "mallory".to_string();
        record.set_attribute("page", 3i64).unwrap();

        let id = store.create("doc-1", "alice", &record).await.unwrap();
        assert!(!id.trim().is_empty());
        assert_eq!(record.author, "mallory");
        assert_eq!(record.id, None);

        let stored = store.get_by_id(&id).await.unwrap();
        assert_eq!(stored.id.as_deref(), Some(id.as_str()));
        assert_eq!(stored.subject_id, "doc-1");
        assert_eq!(stored.author, "alice");
        assert_eq!(stored.attribute("page"), Some(&AttributeValue::Long(3)));
        assert!(stored.created.is_some());
        assert_eq!(stored.created, stored.last_modified);
    }

    #[tokio::test]
    async fn test_leaf_sits_four_levels_below_index() {
        let repo = MemoryRepository::new();
        let store = store(&repo, "alice");

        store.create("doc", "alice", &CommentRecord::new("x")).await.unwrap();

        // root + index root + 26 + 676 + up to two new levels + leaf
        let count = repo.node_count().await;
        let index = 1 + 1 + 26 + 26 * 26;
        assert!(count >= index + 1 && count <= index + 3, "unexpected node count {}", count);
    }

    #[tokio::test]
    async fn test_leaf_name_uses_prefix() {
        let repo = MemoryRepository::new();
        let store = store(&repo, "alice");
        let name = store.leaf_name();
        assert!(name.starts_with("comment_"));
        assert!(name["comment_".len()..].parse::<i64>().is_ok());
    }

    #[tokio::test]
    async fn test_update_and_delete_need_an_id() {
        let repo = MemoryRepository::new();
        let store = store(&repo, "alice");
        let mut record = CommentRecord::new("x");
        record.id = Some(" ".to_string());

        let err = store.update(&record).await.unwrap_err();
        assert!(matches!(err, CommentError::InvalidArgument(_)));
        let err = store.delete(&record).await.unwrap_err();
        assert!(matches!(err, CommentError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let repo = MemoryRepository::new();
        let store = store(&repo, "alice");
        let mut record = CommentRecord::new("x");
        record.id = Some("does-not-exist".to_string());

        assert!(matches!(store.get_by_id("does-not-exist").await, Err(CommentError::NotFound(_))));
        assert!(matches!(store.update(&record).await, Err(CommentError::NotFound(_))));
        assert!(matches!(store.delete(&record).await, Err(CommentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_keeps_created_and_stamps_session_user() {
        let repo = MemoryRepository::new();
        let store = store(&repo, "bob");

        let id = store.create("doc", "alice", &CommentRecord::new("v1")).await.unwrap();
        let mut record = store.get_by_id(&id).await.unwrap();
        record.content = "v2".to_string();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_ok!(store.update(&record).await);

        let stored = store.get_by_id(&id).await.unwrap();
        assert_eq!(stored.content, "v2");
        assert_eq!(stored.author, "bob");
        assert_eq!(stored.subject_id, "doc");
        assert_eq!(stored.created, record.created);
        assert!(stored.last_modified > stored.created);
    }

    #[tokio::test]
    async fn test_partial_update_keeps_subject() {
        let repo = MemoryRepository::new();
        let store = store(&repo, "alice");
        let id = store.create("doc-1", "alice", &CommentRecord::new("v1")).await.unwrap();

        let mut edit = CommentRecord::new("v2");
        edit.id = Some(id.clone());
        store.update(&edit).await.unwrap();

        let stored = store.get_by_id(&id).await.unwrap();
        assert_eq!(stored.subject_id, "doc-1");
        assert_eq!(stored.content, "v2");
        assert_eq!(store.query_by_subject("doc-1", 0, 10).await.unwrap().len(), 1);

        let mut moved = stored.clone();
        moved.subject_id = "doc-2".to_string();
        store.update(&moved).await.unwrap();
        assert_eq!(store.get_by_id(&id).await.unwrap().subject_id, "doc-1");
        assert!(store.query_by_subject("doc-2", 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_presenter_uses_configured_date_format() {
        let repo = MemoryRepository::new();
        let config = CommentStoreConfig {
            date_format: "%d.%m.%Y".to_string(),
            ..CommentStoreConfig::default()
        };
        let store = CommentStore::new(Arc::new(repo.login("alice")), config);

        let id = store.create("doc", "alice", &CommentRecord::new("x")).await.unwrap();
        let record = store.get_by_id(&id).await.unwrap();
        let created = record.created.unwrap();

        let head = store.presenter().head_text(&record);
        assert_eq!(head, format!("alice - {}", created.format("%d.%m.%Y")));
    }

    #[tokio::test]
    async fn test_query_shape_comes_from_config() {
        let repo = MemoryRepository::new();
        let config = CommentStoreConfig {
            query: SubjectQueryConfig {
                descending: false,
                ..SubjectQueryConfig::default()
            },
            ..CommentStoreConfig::default()
        };
        let store = CommentStore::new(Arc::new(repo.login("alice")), config);

        let first = store.create("doc", "alice", &CommentRecord::new("first")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = store.create("doc", "alice", &CommentRecord::new("second")).await.unwrap();

        let ids: Vec<String> = store
            .query_by_subject("doc", 0, 10)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![first, second]);

        let other_type = CommentStore::new(
            Arc::new(repo.login("alice")),
            CommentStoreConfig {
                query: SubjectQueryConfig {
                    node_type: "doccommenting:archived".to_string(),
                    ..SubjectQueryConfig::default()
                },
                ..CommentStoreConfig::default()
            },
        );
        assert!(other_type.query_by_subject("doc", 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_with_non_positive_limit_is_empty() {
        let repo = MemoryRepository::new();
        let store = store(&repo, "alice");
        store.create("doc", "alice", &CommentRecord::new("x")).await.unwrap();

        assert!(store.query_by_subject("doc", 0, 0).await.unwrap().is_empty());
        assert!(store.query_by_subject("doc", 0, -5).await.unwrap().is_empty());
        assert_eq!(store.query_by_subject("doc", -3, 10).await.unwrap().len(), 1);
        assert!(store.query_by_subject("other", 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_containers_are_not_comments() {
        let repo = MemoryRepository::new();
        let store = store(&repo, "alice");
        let root = store.ensure_index().await.unwrap();

        let err = store.get_by_id(root.as_str()).await.unwrap_err();
        assert!(matches!(err, CommentError::NotFound(_)));
    }
}
