/// Comment Store integration tests
/// Runs the record lifecycle against both repository backends
use async_trait::async_trait;
use doccomment_store::{
    comment::mapper::NT_COMMENT,
    config::RepositoryConfig,
    repository::{NodeQuery, NodeRef, Property, PropertyValue},
    CommentError, CommentRecord, CommentResult, CommentStore, CommentStoreConfig, MemoryRepository,
    RepositoryError, RepositoryResult, Session, SqliteRepository,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn memory_store(repo: &MemoryRepository, user: &str) -> CommentStore {
    CommentStore::new(Arc::new(repo.login(user)), CommentStoreConfig::default())
}

async fn sqlite_store(dir: &TempDir) -> (SqliteRepository, CommentStore) {
    let config = RepositoryConfig {
        database_path: dir.path().join("comments.sqlite"),
        ..RepositoryConfig::default()
    };
    let repo = SqliteRepository::open(&config).await.unwrap();
    let store = CommentStore::new(Arc::new(repo.login("alice")), CommentStoreConfig::default());
    (repo, store)
}

async fn lifecycle(store: &CommentStore) {
    let id = store
        .create("doc-1", "alice", &CommentRecord::new("hello"))
        .await
        .unwrap();
    assert!(!id.trim().is_empty());

    let mut record = store.get_by_id(&id).await.unwrap();
    assert!(record.created.is_some());
    assert_eq!(record.created, record.last_modified);
    assert_eq!(record.content, "hello");
    assert_eq!(record.subject_id, "doc-1");
    assert_eq!(record.author, "alice");

    tokio::time::sleep(Duration::from_millis(5)).await;
    record.content = "hello world".to_string();
    store.update(&record).await.unwrap();

    let updated = store.get_by_id(&id).await.unwrap();
    assert!(updated.last_modified > updated.created);
    assert_eq!(updated.created, record.created);
    assert_eq!(updated.content, "hello world");

    store.delete(&updated).await.unwrap();
    let err = store.get_by_id(&id).await.unwrap_err();
    assert!(matches!(err, CommentError::NotFound(_)));

    let err = store.delete(&updated).await.unwrap_err();
    assert!(matches!(err, CommentError::NotFound(_)));
}

async fn paging(store: &CommentStore) {
    let mut ids = HashSet::new();
    for i in 0..150 {
        let id = store
            .create("doc-2", "alice", &CommentRecord::new(format!("comment {}", i)))
            .await
            .unwrap();
        ids.insert(id);
    }
    store
        .create("doc-3", "alice", &CommentRecord::new("elsewhere"))
        .await
        .unwrap();

    let first = store.query_by_subject("doc-2", 0, 100).await.unwrap();
    let second = store.query_by_subject("doc-2", 100, 100).await.unwrap();
    assert_eq!(first.len(), 100);
    assert_eq!(second.len(), 50);

    let all: Vec<&CommentRecord> = first.iter().chain(second.iter()).collect();
    assert!(all.windows(2).all(|w| w[0].created >= w[1].created));
    assert!(all.iter().all(|r| r.subject_id == "doc-2"));

    let returned: HashSet<String> = all.iter().filter_map(|r| r.id.clone()).collect();
    assert_eq!(returned, ids);

    assert!(store.query_by_subject("doc-2", 150, 100).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lifecycle_in_memory() {
    let repo = MemoryRepository::new();
    lifecycle(&memory_store(&repo, "alice")).await;
}

#[tokio::test]
async fn test_lifecycle_in_sqlite() {
    let dir = TempDir::new().unwrap();
    let (_repo, store) = sqlite_store(&dir).await;
    lifecycle(&store).await;
}

#[tokio::test]
async fn test_paging_in_memory() {
    let repo = MemoryRepository::new();
    paging(&memory_store(&repo, "alice")).await;
}

#[tokio::test]
async fn test_paging_in_sqlite() {
    let dir = TempDir::new().unwrap();
    let (_repo, store) = sqlite_store(&dir).await;
    paging(&store).await;
}

#[tokio::test]
async fn test_sqlite_comments_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let id = {
        let (repo, store) = sqlite_store(&dir).await;
        let id = store
            .create("doc-1", "alice", &CommentRecord::new("persisted"))
            .await
            .unwrap();
        repo.close().await;
        id
    };

    let (repo, store) = sqlite_store(&dir).await;
    let record = store.get_by_id(&id).await.unwrap();
    assert_eq!(record.content, "persisted");

    // Reopening must not build a second index
    let before = repo.node_count().await.unwrap();
    store.ensure_index().await.unwrap();
    assert_eq!(repo.node_count().await.unwrap(), before);
}

#[tokio::test]
async fn test_non_finite_attributes_do_not_poison_a_subject_in_sqlite() {
    let dir = TempDir::new().unwrap();
    let (_repo, store) = sqlite_store(&dir).await;

    store
        .create("doc", "alice", &CommentRecord::new("plain"))
        .await
        .unwrap();
    let mut odd = CommentRecord::new("odd");
    odd.set_attribute("score", f64::NAN).unwrap();
    odd.set_attribute("bounds", vec![f64::NEG_INFINITY, -0.0, f64::INFINITY]).unwrap();
    let id = store.create("doc", "alice", &odd).await.unwrap();

    let stored = store.get_by_id(&id).await.unwrap();
    assert_eq!(stored.attribute("score"), odd.attribute("score"));
    assert_eq!(stored.attribute("bounds"), odd.attribute("bounds"));
    assert_eq!(store.query_by_subject("doc", 0, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_edit_with_only_id_and_content_keeps_subject_in_sqlite() {
    let dir = TempDir::new().unwrap();
    let (_repo, store) = sqlite_store(&dir).await;
    let id = store
        .create("doc-1", "alice", &CommentRecord::new("v1"))
        .await
        .unwrap();

    let mut edit = CommentRecord::new("v2");
    edit.id = Some(id.clone());
    store.update(&edit).await.unwrap();

    let listed = store.query_by_subject("doc-1", 0, 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].content, "v2");
    assert_eq!(listed[0].subject_id, "doc-1");
}

#[tokio::test]
async fn test_sessions_share_one_repository() {
    let repo = MemoryRepository::new();
    let alice = memory_store(&repo, "alice");
    let bob = memory_store(&repo, "bob");

    let id = alice
        .create("doc-1", "alice", &CommentRecord::new("from alice"))
        .await
        .unwrap();

    let mut record = bob.get_by_id(&id).await.unwrap();
    record.content = "edited by bob".to_string();
    bob.update(&record).await.unwrap();

    let seen = alice.get_by_id(&id).await.unwrap();
    assert_eq!(seen.content, "edited by bob");
    assert_eq!(seen.author, "bob");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_succeed_or_are_retryable() {
    let repo = MemoryRepository::new();

    let tasks = (0..10).map(|i| {
        let store = memory_store(&repo, &format!("user-{}", i));
        tokio::spawn(async move {
            store
                .create("doc-busy", "someone", &CommentRecord::new(format!("c{}", i)))
                .await
        })
    });
    let results = futures::future::join_all(tasks).await;

    let mut created = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(e.is_retryable(), "unexpected failure: {}", e),
        }
    }

    let store = memory_store(&repo, "reader");
    let found = store.query_by_subject("doc-busy", 0, 100).await.unwrap();
    assert_eq!(found.len(), created);
    assert!(created > 0);
}

/// Session whose `save` and `discard_changes` can be made to fail
struct FlakySession {
    inner: Box<dyn Session>,
    fail_save: AtomicBool,
    fail_discard: AtomicBool,
    discards: AtomicUsize,
}

impl FlakySession {
    fn new(inner: impl Session + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            fail_save: AtomicBool::new(false),
            fail_discard: AtomicBool::new(false),
            discards: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Session for FlakySession {
    fn user_id(&self) -> &str {
        self.inner.user_id()
    }

    async fn has_child(&self, parent: &NodeRef, name: &str) -> RepositoryResult<bool> {
        self.inner.has_child(parent, name).await
    }

    async fn child(&self, parent: &NodeRef, name: &str) -> RepositoryResult<NodeRef> {
        self.inner.child(parent, name).await
    }

    async fn child_names(&self, parent: &NodeRef) -> RepositoryResult<Vec<String>> {
        self.inner.child_names(parent).await
    }

    async fn add_child(&self, parent: &NodeRef, name: &str, node_type: &str) -> RepositoryResult<NodeRef> {
        self.inner.add_child(parent, name, node_type).await
    }

    async fn remove(&self, node: &NodeRef) -> RepositoryResult<()> {
        self.inner.remove(node).await
    }

    async fn node_by_identifier(&self, identifier: &str) -> RepositoryResult<NodeRef> {
        self.inner.node_by_identifier(identifier).await
    }

    async fn identifier(&self, node: &NodeRef) -> RepositoryResult<String> {
        self.inner.identifier(node).await
    }

    async fn mark_referenceable(&self, node: &NodeRef) -> RepositoryResult<()> {
        self.inner.mark_referenceable(node).await
    }

    async fn is_referenceable(&self, node: &NodeRef) -> RepositoryResult<bool> {
        self.inner.is_referenceable(node).await
    }

    async fn properties(&self, node: &NodeRef) -> RepositoryResult<Vec<Property>> {
        self.inner.properties(node).await
    }

    async fn property(&self, node: &NodeRef, name: &str) -> RepositoryResult<Option<Property>> {
        self.inner.property(node, name).await
    }

    async fn set_property(&self, node: &NodeRef, name: &str, value: PropertyValue) -> RepositoryResult<()> {
        self.inner.set_property(node, name, value).await
    }

    async fn save(&self) -> RepositoryResult<()> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(RepositoryError::ConstraintViolation("disk full".to_string()));
        }
        self.inner.save().await
    }

    async fn discard_changes(&self) -> RepositoryResult<()> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        if self.fail_discard.load(Ordering::SeqCst) {
            return Err(RepositoryError::ConstraintViolation("session closed".to_string()));
        }
        self.inner.discard_changes().await
    }

    async fn query(&self, query: &NodeQuery) -> RepositoryResult<Vec<NodeRef>> {
        self.inner.query(query).await
    }
}

async fn flaky_store(repo: &MemoryRepository) -> (Arc<FlakySession>, CommentStore) {
    let session = Arc::new(FlakySession::new(repo.login("alice")));
    let store = CommentStore::new(session.clone(), CommentStoreConfig::default());
    store.ensure_index().await.unwrap();
    (session, store)
}

fn assert_storage_failure(result: CommentResult<impl std::fmt::Debug>, reason: &str) {
    match result {
        Err(CommentError::Storage(RepositoryError::ConstraintViolation(msg))) => assert_eq!(msg, reason),
        other => panic!("expected storage failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_create_discards_pending_nodes() {
    let repo = MemoryRepository::new();
    let (session, store) = flaky_store(&repo).await;
    let before = repo.node_count().await;

    session.fail_save.store(true, Ordering::SeqCst);
    assert_storage_failure(
        store.create("doc-1", "alice", &CommentRecord::new("lost")).await,
        "disk full",
    );
    assert_eq!(session.discards.load(Ordering::SeqCst), 1);

    // Nothing from the failed create is flushed by the next save
    session.fail_save.store(false, Ordering::SeqCst);
    session.save().await.unwrap();
    assert_eq!(repo.node_count().await, before);
    assert!(store.query_by_subject("doc-1", 0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rollback_failure_keeps_original_error() {
    let repo = MemoryRepository::new();
    let (session, store) = flaky_store(&repo).await;
    let id = store
        .create("doc-1", "alice", &CommentRecord::new("v1"))
        .await
        .unwrap();
    let mut record = store.get_by_id(&id).await.unwrap();
    record.content = "v2".to_string();

    session.fail_save.store(true, Ordering::SeqCst);
    session.fail_discard.store(true, Ordering::SeqCst);
    assert_storage_failure(store.update(&record).await, "disk full");
    assert_storage_failure(store.delete(&record).await, "disk full");
    assert_eq!(session.discards.load(Ordering::SeqCst), 2);

    // The failed discards left the pending changes in place
    session.fail_discard.store(false, Ordering::SeqCst);
    session.discard_changes().await.unwrap();
    let stored = store.get_by_id(&id).await.unwrap();
    assert_eq!(stored.content, "v1");
}

#[tokio::test]
async fn test_caller_record_is_not_mutated_on_failure() {
    let repo = MemoryRepository::new();
    let (session, store) = flaky_store(&repo).await;

    let mut record = CommentRecord::new("draft");
    record.set_attribute("mood", "hopeful").unwrap();
    let snapshot = record.clone();

    session.fail_save.store(true, Ordering::SeqCst);
    assert!(store.create("doc-1", "alice", &record).await.is_err());
    assert_eq!(record, snapshot);
}

#[tokio::test]
async fn test_invalid_arguments_do_not_touch_the_session() {
    let repo = MemoryRepository::new();
    let (session, store) = flaky_store(&repo).await;

    let err = store.update(&CommentRecord::new("no id")).await.unwrap_err();
    assert!(matches!(err, CommentError::InvalidArgument(_)));
    assert_eq!(err.code(), "INVALID_ARGUMENT");
    assert_eq!(session.discards.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_comment_nodes_have_comment_type() {
    let repo = MemoryRepository::new();
    let store = memory_store(&repo, "alice");
    store
        .create("doc-1", "alice", &CommentRecord::new("typed"))
        .await
        .unwrap();

    let query = NodeQuery {
        node_type: NT_COMMENT.to_string(),
        property: "doccommenting:content".to_string(),
        equals: doccomment_store::repository::Value::String("typed".to_string()),
        order_by: None,
        offset: 0,
        limit: None,
    };
    assert_eq!(store.session().query(&query).await.unwrap().len(), 1);
}
