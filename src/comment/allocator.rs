/// Bucket Allocator - shards comment nodes across a 4-level letter tree
///
/// The first two levels form a fixed 26x26 index created once per
/// repository. The two levels below grow on demand.
use crate::{
    comment::mapper::NT_COMMENTS_CONTAINER,
    error::{CommentResult, RepositoryError},
    repository::{NodeRef, Session},
};
use lazy_static::lazy_static;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Depth of a bucket path below the index root
pub const BUCKET_DEPTH: usize = 4;

/// Levels of the bucket path that are pre-built
pub const INDEX_DEPTH: usize = 2;

const LETTERS: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

lazy_static! {
    /// Serializes first-time creation of the index root within the process
    static ref INDEX_ROOT_LOCK: Mutex<()> = Mutex::new(());
}

/// Location chosen for a new comment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub node: NodeRef,
    pub letters: [char; BUCKET_DEPTH],
}

impl Bucket {
    /// Path below the index root, e.g. `q/c/x/a`
    pub fn path(&self) -> String {
        self.letters
            .iter()
            .map(char::to_string)
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Draw one uniformly random letter per bucket level
pub fn draw_path<R: Rng + ?Sized>(rng: &mut R) -> [char; BUCKET_DEPTH] {
    let mut letters = ['a'; BUCKET_DEPTH];
    for letter in letters.iter_mut() {
        *letter = LETTERS[rng.gen_range(0..LETTERS.len())] as char;
    }
    letters
}

/// Locates the index root and picks bucket paths under it
#[derive(Debug, Clone)]
pub struct BucketAllocator {
    root_location: String,
}

impl BucketAllocator {
    pub fn new(root_location: impl Into<String>) -> Self {
        Self {
            root_location: root_location.into(),
        }
    }

    pub fn root_location(&self) -> &str {
        &self.root_location
    }

    /// Return the index root, creating it with its full 26x26 index on first use.
    ///
    /// Creation is saved immediately so later sessions in this process see it
    /// before the lock is released. A concurrent creator in another process
    /// shows up as `ItemExists` on save; that case falls back to reading the
    /// winner's root.
    pub async fn ensure_index_root(&self, session: &dyn Session) -> CommentResult<NodeRef> {
        let root = session.root().await?;
        if session.has_child(&root, &self.root_location).await? {
            return Ok(session.child(&root, &self.root_location).await?);
        }

        let _guard = INDEX_ROOT_LOCK.lock().await;

        if session.has_child(&root, &self.root_location).await? {
            return Ok(session.child(&root, &self.root_location).await?);
        }

        info!("Creating comment index at /{}", self.root_location);

        let created = self.build_index(session, &root).await;
        let result = match created {
            Ok(container) => session.save().await.map(|_| container),
            Err(e) => Err(e),
        };

        match result {
            Ok(container) => {
                debug!("Comment index created");
                Ok(container)
            }
            Err(RepositoryError::ItemExists(path)) => {
                warn!("Comment index created concurrently ({}), reusing it", path);
                session.discard_changes().await?;
                Ok(session.child(&root, &self.root_location).await?)
            }
            Err(e) => {
                if let Err(rollback) = session.discard_changes().await {
                    tracing::error!("Failed to discard partial comment index: {}", rollback);
                }
                Err(e.into())
            }
        }
    }

    async fn build_index(&self, session: &dyn Session, root: &NodeRef) -> Result<NodeRef, RepositoryError> {
        let container = session
            .add_child(root, &self.root_location, NT_COMMENTS_CONTAINER)
            .await?;

        for first in LETTERS {
            let first = (*first as char).to_string();
            let level = session
                .add_child(&container, &first, NT_COMMENTS_CONTAINER)
                .await?;
            for second in LETTERS {
                let second = (*second as char).to_string();
                session
                    .add_child(&level, &second, NT_COMMENTS_CONTAINER)
                    .await?;
            }
        }

        Ok(container)
    }

    /// Pick a bucket 4 levels below `container`, creating missing levels.
    ///
    /// The walk follows existing children until the first miss; from there
    /// on every level is created without checking, since nothing below a
    /// new node can exist yet.
    pub async fn allocate(&self, session: &dyn Session, container: &NodeRef) -> CommentResult<Bucket> {
        let letters = draw_path(&mut rand::thread_rng());
        self.allocate_path(session, container, letters).await
    }

    /// Walk a given letter path; `allocate` draws it at random
    pub async fn allocate_path(
        &self,
        session: &dyn Session,
        container: &NodeRef,
        letters: [char; BUCKET_DEPTH],
    ) -> CommentResult<Bucket> {
        let mut node = container.clone();
        let mut creating = false;

        for letter in letters {
            let name = letter.to_string();
            if !creating && session.has_child(&node, &name).await? {
                node = session.child(&node, &name).await?;
            } else {
                creating = true;
                node = session
                    .add_child(&node, &name, NT_COMMENTS_CONTAINER)
                    .await?;
            }
        }

        let bucket = Bucket { node, letters };
        debug!("Allocated bucket {}", bucket.path());
        Ok(bucket)
    }
}
