use async_trait::async_trait;

use crate::{Comment, CommentId, PostId, RemoteError};

/// The remote endpoints behind a post's comment section
///
/// Nothing here retries: an error is reported to the caller as-is.
#[async_trait(?Send)]
pub trait RemoteCommentService {
    /// All top-level comments of `post`, in display order, with their replies
    async fn list_comments(&self, post: PostId) -> Result<Vec<Comment>, RemoteError>;

    async fn create_comment(&self, post: PostId, content: &str) -> Result<Comment, RemoteError>;

    async fn create_reply(
        &self,
        post: PostId,
        parent: CommentId,
        content: &str,
    ) -> Result<Comment, RemoteError>;

    async fn update_comment(
        &self,
        post: PostId,
        id: CommentId,
        content: &str,
    ) -> Result<Comment, RemoteError>;

    /// Deleting a top-level comment also deletes its replies
    async fn delete_comment(&self, post: PostId, id: CommentId) -> Result<(), RemoteError>;

    /// Number of comments and replies the server thinks `post` has
    async fn count_comments(&self, post: PostId) -> Result<u64, RemoteError>;
}

#[async_trait(?Send)]
impl<T: RemoteCommentService + ?Sized> RemoteCommentService for std::sync::Arc<T> {
    async fn list_comments(&self, post: PostId) -> Result<Vec<Comment>, RemoteError> {
        (**self).list_comments(post).await
    }

    async fn create_comment(&self, post: PostId, content: &str) -> Result<Comment, RemoteError> {
        (**self).create_comment(post, content).await
    }

    async fn create_reply(
        &self,
        post: PostId,
        parent: CommentId,
        content: &str,
    ) -> Result<Comment, RemoteError> {
        (**self).create_reply(post, parent, content).await
    }

    async fn update_comment(
        &self,
        post: PostId,
        id: CommentId,
        content: &str,
    ) -> Result<Comment, RemoteError> {
        (**self).update_comment(post, id, content).await
    }

    async fn delete_comment(&self, post: PostId, id: CommentId) -> Result<(), RemoteError> {
        (**self).delete_comment(post, id).await
    }

    async fn count_comments(&self, post: PostId) -> Result<u64, RemoteError> {
        (**self).count_comments(post).await
    }
}
