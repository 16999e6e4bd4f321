mod engine;
pub use engine::{CommentSyncEngine, CountCheck, Operation, TargetStatus};

mod error;
pub use error::Error;

mod fuzz;

mod http;
pub use http::{HttpCommentService, DEFAULT_HOST};

mod node;
pub use node::{CommentNode, Node, NodeId, ReplyNode};

mod tree;
pub use tree::{CommentTree, Removed};

pub mod api {
    pub use blogthread_api::*;
}
