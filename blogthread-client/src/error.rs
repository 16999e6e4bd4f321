use crate::{api::RemoteError, NodeId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Comment content is empty")]
    EmptyContent,

    #[error("No comment id was given")]
    InvalidId,

    #[error("Parent comment {0} not found")]
    ParentNotFound(NodeId),

    #[error("Comment id already used {0}")]
    DuplicateId(NodeId),

    #[error("Comment {0} not found")]
    NodeNotFound(NodeId),

    #[error("Remote comment service failed: {0}")]
    RemoteFailure(#[from] RemoteError),
}

impl Error {
    /// Errors raised before anything was attempted
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::EmptyContent | Error::InvalidId)
    }

    /// Errors coming from the shape of the comment tree
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::ParentNotFound(_) | Error::DuplicateId(_) | Error::NodeNotFound(_)
        )
    }
}
