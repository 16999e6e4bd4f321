use std::collections::BTreeMap;

use anyhow::anyhow;
use async_trait::async_trait;
use blogthread_api::{
    validate_content, Comment, CommentId, Error, PostId, RemoteCommentService, RemoteError,
};
use chrono::Utc;
use parking_lot::Mutex;

/// In-memory comment service
///
/// Every call is recorded, then suspends once before being answered, so that
/// concurrent callers actually interleave. Failures can be injected to
/// simulate an unreachable server.
pub struct MockServer(Mutex<State>);

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    List(PostId),
    Create {
        post: PostId,
        content: String,
    },
    Reply {
        post: PostId,
        parent: CommentId,
        content: String,
    },
    Update {
        post: PostId,
        id: CommentId,
        content: String,
    },
    Delete {
        post: PostId,
        id: CommentId,
    },
    Count(PostId),
}

#[derive(Debug)]
struct State {
    posts: BTreeMap<PostId, Vec<Comment>>,
    next_id: u64,
    offline: bool,
    failures: usize,
    calls: Vec<Call>,
}

impl State {
    fn new_id(&mut self) -> CommentId {
        let id = CommentId(self.next_id);
        self.next_id += 1;
        id
    }

    fn find_mut(&mut self, post: PostId, id: CommentId) -> Result<&mut Comment, Error> {
        let comments = self
            .posts
            .get_mut(&post)
            .ok_or(Error::CommentNotFound(id))?;
        for c in comments.iter_mut() {
            if c.id == id {
                return Ok(c);
            }
            if let Some(r) = c.replies.iter_mut().find(|r| r.id == id) {
                return Ok(r);
            }
        }
        Err(Error::CommentNotFound(id))
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer(Mutex::new(State {
            posts: BTreeMap::new(),
            next_id: 1,
            offline: false,
            failures: 0,
            calls: Vec::new(),
        }))
    }

    /// Server already holding `comments` under `post`
    pub fn with_comments(post: PostId, comments: Vec<Comment>) -> MockServer {
        let server = MockServer::new();
        server.load(post, comments);
        server
    }

    pub fn load(&self, post: PostId, comments: Vec<Comment>) {
        let mut state = self.0.lock();
        let max_id = comments
            .iter()
            .flat_map(|c| std::iter::once(c).chain(c.replies.iter()))
            .map(|c| c.id.0)
            .max()
            .unwrap_or(0);
        state.next_id = std::cmp::max(state.next_id, max_id + 1);
        state.posts.insert(post, comments);
    }

    /// While offline, every call fails
    pub fn set_offline(&self, offline: bool) {
        self.0.lock().offline = offline;
    }

    /// Makes the next `n` calls fail
    pub fn fail_next(&self, n: usize) {
        self.0.lock().failures += n;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.0.lock().calls.clear();
    }

    /// Current comments of `post`, as `list_comments` would return them
    pub fn comments(&self, post: PostId) -> Vec<Comment> {
        self.0.lock().posts.get(&post).cloned().unwrap_or_default()
    }

    pub fn test_num_comments(&self, post: PostId) -> usize {
        self.comments(post)
            .iter()
            .map(|c| 1 + c.replies.len())
            .sum()
    }

    async fn enter(&self, call: Call) -> Result<(), RemoteError> {
        let fail = {
            let mut state = self.0.lock();
            tracing::trace!(?call, "mock server received call");
            state.calls.push(call);
            if state.offline {
                true
            } else if state.failures > 0 {
                state.failures -= 1;
                true
            } else {
                false
            }
        };
        tokio::task::yield_now().await;
        match fail {
            true => Err(RemoteError::Transport(anyhow!("mock server is unreachable"))),
            false => Ok(()),
        }
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

#[async_trait(?Send)]
impl RemoteCommentService for MockServer {
    async fn list_comments(&self, post: PostId) -> Result<Vec<Comment>, RemoteError> {
        self.enter(Call::List(post)).await?;
        Ok(self.comments(post))
    }

    async fn create_comment(&self, post: PostId, content: &str) -> Result<Comment, RemoteError> {
        self.enter(Call::Create {
            post,
            content: String::from(content),
        })
        .await?;
        validate_content(content)?;
        let mut state = self.0.lock();
        let comment = Comment {
            id: state.new_id(),
            parent_id: None,
            content: String::from(content),
            created_at: Utc::now(),
            replies: Vec::new(),
        };
        state.posts.entry(post).or_default().push(comment.clone());
        Ok(comment)
    }

    async fn create_reply(
        &self,
        post: PostId,
        parent: CommentId,
        content: &str,
    ) -> Result<Comment, RemoteError> {
        self.enter(Call::Reply {
            post,
            parent,
            content: String::from(content),
        })
        .await?;
        validate_content(content)?;
        let mut state = self.0.lock();
        let id = state.new_id();
        let parent_comment = state
            .posts
            .get_mut(&post)
            .and_then(|comments| comments.iter_mut().find(|c| c.id == parent))
            .ok_or(Error::CommentNotFound(parent))?;
        let reply = Comment {
            id,
            parent_id: Some(parent),
            content: String::from(content),
            created_at: Utc::now(),
            replies: Vec::new(),
        };
        parent_comment.replies.push(reply.clone());
        Ok(reply)
    }

    async fn update_comment(
        &self,
        post: PostId,
        id: CommentId,
        content: &str,
    ) -> Result<Comment, RemoteError> {
        self.enter(Call::Update {
            post,
            id,
            content: String::from(content),
        })
        .await?;
        validate_content(content)?;
        let mut state = self.0.lock();
        let comment = state.find_mut(post, id)?;
        comment.content = String::from(content);
        Ok(comment.clone())
    }

    async fn delete_comment(&self, post: PostId, id: CommentId) -> Result<(), RemoteError> {
        self.enter(Call::Delete { post, id }).await?;
        let mut state = self.0.lock();
        let comments = state
            .posts
            .get_mut(&post)
            .ok_or(Error::CommentNotFound(id))?;
        if let Some(pos) = comments.iter().position(|c| c.id == id) {
            comments.remove(pos);
            return Ok(());
        }
        for c in comments.iter_mut() {
            if let Some(pos) = c.replies.iter().position(|r| r.id == id) {
                c.replies.remove(pos);
                return Ok(());
            }
        }
        Err(Error::CommentNotFound(id).into())
    }

    async fn count_comments(&self, post: PostId) -> Result<u64, RemoteError> {
        self.enter(Call::Count(post)).await?;
        Ok(self.test_num_comments(post) as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use super::*;

    const POST: PostId = PostId(1);

    fn run<F: Future<Output = ()>>(f: F) {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed initializing tokio runtime")
            .block_on(f)
    }

    #[test]
    fn stores_comments_and_replies() {
        run(async {
            let server = MockServer::new();
            let first = server.create_comment(POST, "first").await.unwrap();
            let second = server.create_comment(POST, "second").await.unwrap();
            let reply = server.create_reply(POST, first.id, "answer").await.unwrap();
            assert_eq!(reply.parent_id, Some(first.id));
            assert_ne!(first.id, second.id);
            assert_ne!(reply.id, second.id);

            let listing = server.list_comments(POST).await.unwrap();
            assert_eq!(listing.len(), 2);
            assert_eq!(listing[0].replies, vec![reply.clone()]);
            assert_eq!(server.count_comments(POST).await.unwrap(), 3);

            let edited = server.update_comment(POST, reply.id, "edited").await.unwrap();
            assert_eq!(edited.content, "edited");
            assert_eq!(server.comments(POST)[0].replies[0].content, "edited");
        })
    }

    #[test]
    fn deletion_cascades_to_replies() {
        run(async {
            let server = MockServer::new();
            let first = server.create_comment(POST, "first").await.unwrap();
            server.create_reply(POST, first.id, "a").await.unwrap();
            server.create_reply(POST, first.id, "b").await.unwrap();
            server.create_comment(POST, "second").await.unwrap();
            assert_eq!(server.test_num_comments(POST), 4);

            server.delete_comment(POST, first.id).await.unwrap();
            assert_eq!(server.test_num_comments(POST), 1);
            assert!(matches!(
                server.delete_comment(POST, first.id).await,
                Err(RemoteError::Api(Error::CommentNotFound(id))) if id == first.id
            ));
        })
    }

    #[test]
    fn rejects_invalid_requests() {
        run(async {
            let server = MockServer::new();
            assert!(matches!(
                server.create_comment(POST, "  ").await,
                Err(RemoteError::Api(Error::EmptyContent))
            ));
            assert!(matches!(
                server.create_reply(POST, CommentId(99), "hi").await,
                Err(RemoteError::Api(Error::CommentNotFound(CommentId(99))))
            ));
            let reply_parent = server.create_comment(POST, "ok").await.unwrap();
            let reply = server
                .create_reply(POST, reply_parent.id, "reply")
                .await
                .unwrap();
            // replies cannot be answered
            assert!(matches!(
                server.create_reply(POST, reply.id, "nested").await,
                Err(RemoteError::Api(Error::CommentNotFound(id))) if id == reply.id
            ));
        })
    }

    #[test]
    fn injected_failures() {
        run(async {
            let server = MockServer::new();
            server.fail_next(1);
            assert!(matches!(
                server.create_comment(POST, "lost").await,
                Err(RemoteError::Transport(_))
            ));
            assert_eq!(server.test_num_comments(POST), 0);
            server.create_comment(POST, "kept").await.unwrap();

            server.set_offline(true);
            assert!(server.list_comments(POST).await.is_err());
            server.set_offline(false);
            assert_eq!(server.list_comments(POST).await.unwrap().len(), 1);

            assert_eq!(
                server.calls(),
                vec![
                    Call::Create {
                        post: POST,
                        content: String::from("lost")
                    },
                    Call::Create {
                        post: POST,
                        content: String::from("kept")
                    },
                    Call::List(POST),
                    Call::List(POST),
                ]
            );
        })
    }

    #[test]
    fn loaded_comments_keep_ids_unique() {
        run(async {
            let server = MockServer::with_comments(
                POST,
                vec![Comment {
                    id: CommentId(10),
                    parent_id: None,
                    content: String::from("loaded"),
                    created_at: Utc::now(),
                    replies: vec![Comment {
                        id: CommentId(12),
                        parent_id: Some(CommentId(10)),
                        content: String::from("loaded reply"),
                        created_at: Utc::now(),
                        replies: Vec::new(),
                    }],
                }],
            );
            let c = server.create_comment(POST, "new").await.unwrap();
            assert_eq!(c.id, CommentId(13));
        })
    }
}
