/// Doc Commenting - sharded comment storage
///
/// Stores comments on documents inside a hierarchical content repository,
/// spreading them across a letter-keyed bucket tree so no container node
/// collects thousands of children.

pub mod comment;
pub mod config;
pub mod error;
pub mod repository;

pub use comment::{
    AttributeValue, CommentPresenter, CommentRecord, CommentStore, DefaultCommentPresenter,
};
pub use config::{CommentStoreConfig, Config, RepositoryConfig, SubjectQueryConfig};
pub use error::{CommentError, CommentResult, RepositoryError, RepositoryResult};
pub use repository::{MemoryRepository, Session, SqliteRepository};
