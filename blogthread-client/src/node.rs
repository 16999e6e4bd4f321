use chrono::Utc;

use crate::api::{self, CommentId, Time, Uuid};

/// Identifier of a node in a comment tree
///
/// Nodes created locally live under a placeholder id until the server hands
/// back their real id.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NodeId {
    Confirmed(CommentId),
    Placeholder(Uuid),
}

impl NodeId {
    pub fn placeholder() -> NodeId {
        NodeId::Placeholder(Uuid::new_v4())
    }

    pub fn confirmed(&self) -> Option<CommentId> {
        match self {
            NodeId::Confirmed(id) => Some(*id),
            NodeId::Placeholder(_) => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, NodeId::Placeholder(_))
    }
}

impl From<CommentId> for NodeId {
    fn from(id: CommentId) -> NodeId {
        NodeId::Confirmed(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeId::Confirmed(id) => write!(f, "{id}"),
            NodeId::Placeholder(id) => write!(f, "pending-{id}"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub id: NodeId,
    pub content: String,
    pub created_at: Time,

    /// Replies in arrival order
    pub replies: im::Vector<ReplyNode>,
}

impl CommentNode {
    pub fn placeholder(content: String) -> CommentNode {
        CommentNode {
            id: NodeId::placeholder(),
            content,
            created_at: Utc::now(),
            replies: im::Vector::new(),
        }
    }
}

impl From<api::Comment> for CommentNode {
    fn from(c: api::Comment) -> CommentNode {
        let id = NodeId::from(c.id);
        CommentNode {
            id,
            content: c.content,
            created_at: c.created_at,
            replies: c
                .replies
                .into_iter()
                .map(|r| ReplyNode::from_api(r, id))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplyNode {
    pub id: NodeId,
    pub parent_id: NodeId,
    pub content: String,
    pub created_at: Time,
}

impl ReplyNode {
    pub fn placeholder(parent_id: NodeId, content: String) -> ReplyNode {
        ReplyNode {
            id: NodeId::placeholder(),
            parent_id,
            content,
            created_at: Utc::now(),
        }
    }

    /// Builds the reply from its server representation, as a child of `parent_id`
    pub fn from_api(c: api::Comment, parent_id: NodeId) -> ReplyNode {
        if !c.replies.is_empty() {
            tracing::warn!(
                id = %c.id,
                num_replies = c.replies.len(),
                "dropping replies nested under a reply"
            );
        }
        ReplyNode {
            id: NodeId::from(c.id),
            parent_id,
            content: c.content,
            created_at: c.created_at,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Node {
    Comment(CommentNode),
    Reply(ReplyNode),
}

impl Node {
    pub fn id(&self) -> NodeId {
        match self {
            Node::Comment(c) => c.id,
            Node::Reply(r) => r.id,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Node::Comment(c) => &c.content,
            Node::Reply(r) => &r.content,
        }
    }

    pub fn created_at(&self) -> Time {
        match self {
            Node::Comment(c) => c.created_at,
            Node::Reply(r) => r.created_at,
        }
    }

    /// `None` for top-level comments
    pub fn parent_id(&self) -> Option<NodeId> {
        match self {
            Node::Comment(_) => None,
            Node::Reply(r) => Some(r.parent_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_server_comment() {
        let date = Utc::now();
        let c = api::Comment {
            id: CommentId(7),
            parent_id: None,
            content: String::from("hello"),
            created_at: date,
            replies: vec![api::Comment {
                id: CommentId(9),
                parent_id: Some(CommentId(7)),
                content: String::from("hi back"),
                created_at: date,
                replies: vec![api::Comment {
                    id: CommentId(11),
                    parent_id: Some(CommentId(9)),
                    content: String::from("too deep"),
                    created_at: date,
                    replies: Vec::new(),
                }],
            }],
        };
        let node = CommentNode::from(c);
        assert_eq!(node.id, NodeId::Confirmed(CommentId(7)));
        assert_eq!(node.replies.len(), 1);
        assert_eq!(node.replies[0].id, NodeId::Confirmed(CommentId(9)));
        assert_eq!(node.replies[0].parent_id, node.id);
    }

    #[test]
    fn placeholders_are_distinct() {
        let a = CommentNode::placeholder(String::from("a"));
        let b = CommentNode::placeholder(String::from("a"));
        assert!(a.id.is_placeholder());
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.confirmed(), None);
        assert_eq!(
            NodeId::from(CommentId(3)).confirmed(),
            Some(CommentId(3))
        );
    }
}
