/// Comment storage
///
/// Comments live as leaf nodes four letter-levels below an index root,
/// addressed afterwards by their repository identifier.

pub mod allocator;
pub mod mapper;
pub mod models;
pub mod presenter;
pub mod store;

pub use allocator::{Bucket, BucketAllocator};
pub use mapper::RecordMapper;
pub use models::{AttributeValue, CommentRecord};
pub use presenter::{CommentPresenter, DefaultCommentPresenter};
pub use store::CommentStore;
