use anyhow::Context;
use async_trait::async_trait;

use crate::api::{
    self, Comment, CommentId, NewComment, PostId, RemoteCommentService, RemoteError,
    UpdateComment,
};

pub const DEFAULT_HOST: &str = "http://localhost:8111";

/// `RemoteCommentService` talking to the blog backend over its REST API
#[derive(Clone, Debug)]
pub struct HttpCommentService {
    client: reqwest::Client,
    host: String,
}

impl HttpCommentService {
    pub fn new(host: impl Into<String>) -> HttpCommentService {
        HttpCommentService {
            client: reqwest::Client::new(),
            host: host.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn comments_url(&self, post: PostId) -> String {
        format!("{}/api/posts/{}/comments", self.host, post)
    }

    fn comment_url(&self, post: PostId, id: CommentId) -> String {
        format!("{}/api/posts/{}/comments/{}", self.host, post, id)
    }
}

async fn send(req: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
    let resp = req
        .send()
        .await
        .context("sending request to comment service")?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .bytes()
        .await
        .with_context(|| format!("reading body of {status} response"))?;
    match api::Error::parse(&body) {
        Ok(err) => {
            tracing::info!(%status, "comment service returned error: {err}");
            Err(RemoteError::Api(err))
        }
        Err(err) => Err(RemoteError::Transport(
            err.context(format!("comment service answered {status}")),
        )),
    }
}

async fn fetch<R>(req: reqwest::RequestBuilder) -> Result<R, RemoteError>
where
    R: for<'de> serde::Deserialize<'de>,
{
    Ok(send(req)
        .await?
        .json()
        .await
        .context("parsing comment service response")?)
}

#[async_trait(?Send)]
impl RemoteCommentService for HttpCommentService {
    async fn list_comments(&self, post: PostId) -> Result<Vec<Comment>, RemoteError> {
        fetch(self.client.get(self.comments_url(post))).await
    }

    async fn create_comment(&self, post: PostId, content: &str) -> Result<Comment, RemoteError> {
        let body = NewComment {
            content: String::from(content),
        };
        fetch(self.client.post(self.comments_url(post)).json(&body)).await
    }

    async fn create_reply(
        &self,
        post: PostId,
        parent: CommentId,
        content: &str,
    ) -> Result<Comment, RemoteError> {
        let body = NewComment {
            content: String::from(content),
        };
        let url = format!("{}/replies", self.comment_url(post, parent));
        fetch(self.client.post(url).json(&body)).await
    }

    async fn update_comment(
        &self,
        post: PostId,
        id: CommentId,
        content: &str,
    ) -> Result<Comment, RemoteError> {
        let body = UpdateComment {
            content: String::from(content),
        };
        fetch(self.client.put(self.comment_url(post, id)).json(&body)).await
    }

    async fn delete_comment(&self, post: PostId, id: CommentId) -> Result<(), RemoteError> {
        send(self.client.delete(self.comment_url(post, id))).await?;
        Ok(())
    }

    async fn count_comments(&self, post: PostId) -> Result<u64, RemoteError> {
        fetch(self.client.get(format!("{}/count", self.comments_url(post)))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_urls() {
        let service = HttpCommentService::new(DEFAULT_HOST);
        assert_eq!(
            service.comments_url(PostId(4)),
            "http://localhost:8111/api/posts/4/comments"
        );
        assert_eq!(
            service.comment_url(PostId(4), CommentId(12)),
            "http://localhost:8111/api/posts/4/comments/12"
        );
    }
}
