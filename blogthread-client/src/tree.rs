use std::collections::HashSet;

use crate::{CommentNode, Error, Node, NodeId, ReplyNode};

/// The comments of one post: top-level comments, each with its replies
///
/// Every mutation either applies fully or leaves the tree untouched. Cloning
/// is cheap, the clone shares structure with the original.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommentTree {
    comments: im::Vector<CommentNode>,

    /// Owner of every node in the tree: `None` for top-level comments, the
    /// parent comment for replies
    owners: im::HashMap<NodeId, Option<NodeId>>,
}

/// A node taken out of the tree, along with where it was
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Removed {
    Comment { node: CommentNode, index: usize },
    Reply { node: ReplyNode, index: usize },
}

impl Removed {
    pub fn id(&self) -> NodeId {
        match self {
            Removed::Comment { node, .. } => node.id,
            Removed::Reply { node, .. } => node.id,
        }
    }

    /// Ids of every node that left the tree
    pub fn ids(&self) -> Vec<NodeId> {
        match self {
            Removed::Comment { node, .. } => std::iter::once(node.id)
                .chain(node.replies.iter().map(|r| r.id))
                .collect(),
            Removed::Reply { node, .. } => vec![node.id],
        }
    }

    /// Number of nodes that left the tree
    pub fn count(&self) -> usize {
        match self {
            Removed::Comment { node, .. } => 1 + node.replies.len(),
            Removed::Reply { .. } => 1,
        }
    }

    pub fn into_node(self) -> Node {
        match self {
            Removed::Comment { node, .. } => Node::Comment(node),
            Removed::Reply { node, .. } => Node::Reply(node),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Slot {
    Comment(usize),
    Reply(usize, usize),
}

impl CommentTree {
    pub fn new() -> CommentTree {
        CommentTree::default()
    }

    /// Replaces the whole tree, failing without any change if `nodes` is not
    /// a valid tree
    pub fn load(&mut self, nodes: Vec<CommentNode>) -> Result<(), Error> {
        let mut owners = im::HashMap::new();
        for c in nodes.iter() {
            if owners.insert(c.id, None).is_some() {
                return Err(Error::DuplicateId(c.id));
            }
            for r in c.replies.iter() {
                if r.parent_id != c.id {
                    return Err(Error::ParentNotFound(r.parent_id));
                }
                if owners.insert(r.id, Some(c.id)).is_some() {
                    return Err(Error::DuplicateId(r.id));
                }
            }
        }
        self.comments = nodes.into_iter().collect();
        self.owners = owners;
        Ok(())
    }

    pub fn insert_top_level(&mut self, node: CommentNode) -> Result<(), Error> {
        self.check_comment(&node, None)?;
        self.index_comment(&node);
        self.comments.push_back(node);
        Ok(())
    }

    /// Appends `node` to the replies of `parent`, setting its parent id
    pub fn insert_reply(&mut self, parent: &NodeId, mut node: ReplyNode) -> Result<(), Error> {
        let pos = match self.slot(parent) {
            Some(Slot::Comment(pos)) => pos,
            _ => return Err(Error::ParentNotFound(*parent)),
        };
        if self.owners.contains_key(&node.id) {
            return Err(Error::DuplicateId(node.id));
        }
        let comment = self
            .comments
            .get_mut(pos)
            .ok_or(Error::ParentNotFound(*parent))?;
        node.parent_id = *parent;
        self.owners.insert(node.id, Some(*parent));
        comment.replies.push_back(node);
        Ok(())
    }

    /// Rewrites the content of `id` in place, returning the updated node
    pub fn replace_node<F>(&mut self, id: &NodeId, updater: F) -> Result<Node, Error>
    where
        F: FnOnce(&str) -> String,
    {
        match self.slot(id) {
            Some(Slot::Comment(pos)) => {
                let comment = self.comments.get_mut(pos).ok_or(Error::NodeNotFound(*id))?;
                comment.content = updater(&comment.content);
                Ok(Node::Comment(comment.clone()))
            }
            Some(Slot::Reply(pos, idx)) => {
                let reply = self
                    .comments
                    .get_mut(pos)
                    .and_then(|c| c.replies.get_mut(idx))
                    .ok_or(Error::NodeNotFound(*id))?;
                reply.content = updater(&reply.content);
                Ok(Node::Reply(reply.clone()))
            }
            None => Err(Error::NodeNotFound(*id)),
        }
    }

    /// Removes `id`, and all its replies if it is a top-level comment
    ///
    /// Returns the number of nodes removed.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<usize, Error> {
        self.take_node(id).map(|removed| removed.count())
    }

    /// Removes `id` like `remove_node`, handing back what was removed so it
    /// can later be restored
    pub fn take_node(&mut self, id: &NodeId) -> Result<Removed, Error> {
        match self.slot(id) {
            Some(Slot::Comment(pos)) => {
                let node = self.comments.remove(pos);
                self.unindex_comment(&node);
                Ok(Removed::Comment { node, index: pos })
            }
            Some(Slot::Reply(pos, idx)) => {
                let comment = self.comments.get_mut(pos).ok_or(Error::NodeNotFound(*id))?;
                let node = comment.replies.remove(idx);
                self.owners.remove(&node.id);
                Ok(Removed::Reply { node, index: idx })
            }
            None => Err(Error::NodeNotFound(*id)),
        }
    }

    /// Puts back a node returned by `take_node`, at its former position or at
    /// the end of its list if the list got shorter since
    pub fn restore(&mut self, removed: Removed) -> Result<(), Error> {
        match removed {
            Removed::Comment { node, index } => {
                self.check_comment(&node, None)?;
                self.index_comment(&node);
                let index = std::cmp::min(index, self.comments.len());
                self.comments.insert(index, node);
            }
            Removed::Reply { node, index } => {
                let pos = match self.slot(&node.parent_id) {
                    Some(Slot::Comment(pos)) => pos,
                    _ => return Err(Error::ParentNotFound(node.parent_id)),
                };
                if self.owners.contains_key(&node.id) {
                    return Err(Error::DuplicateId(node.id));
                }
                let comment = self
                    .comments
                    .get_mut(pos)
                    .ok_or(Error::ParentNotFound(node.parent_id))?;
                self.owners.insert(node.id, Some(node.parent_id));
                let index = std::cmp::min(index, comment.replies.len());
                comment.replies.insert(index, node);
            }
        }
        Ok(())
    }

    /// Swaps the node at `old` for `new`, keeping its position
    ///
    /// `new` must live at the same depth as `old`: a top-level comment brings
    /// its own replies along, a reply must belong to the same parent.
    pub fn replace_id(&mut self, old: &NodeId, new: Node) -> Result<(), Error> {
        match (self.slot(old), new) {
            (Some(Slot::Comment(pos)), Node::Comment(node)) => {
                self.check_comment(&node, Some(*old))?;
                let previous = self.comments.set(pos, node.clone());
                self.unindex_comment(&previous);
                self.index_comment(&node);
                Ok(())
            }
            (Some(Slot::Reply(pos, idx)), Node::Reply(node)) => {
                let comment = self.comments.get_mut(pos).ok_or(Error::NodeNotFound(*old))?;
                if node.parent_id != comment.id {
                    return Err(Error::ParentNotFound(node.parent_id));
                }
                if node.id != *old && self.owners.contains_key(&node.id) {
                    return Err(Error::DuplicateId(node.id));
                }
                self.owners.remove(old);
                self.owners.insert(node.id, Some(node.parent_id));
                comment.replies.set(idx, node);
                Ok(())
            }
            _ => Err(Error::NodeNotFound(*old)),
        }
    }

    /// Number of comments and replies, walking the tree
    pub fn total_count(&self) -> usize {
        self.comments.len() + self.comments.iter().map(|c| c.replies.len()).sum::<usize>()
    }

    /// Counts every node one by one, without relying on list lengths
    pub fn recount(&self) -> usize {
        self.comments
            .iter()
            .map(|c| 1 + c.replies.iter().count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.owners.contains_key(id)
    }

    /// `Ok(None)` for a top-level comment, `Ok(Some(parent))` for a reply
    pub fn parent_of(&self, id: &NodeId) -> Result<Option<NodeId>, Error> {
        self.owners.get(id).copied().ok_or(Error::NodeNotFound(*id))
    }

    pub fn get(&self, id: &NodeId) -> Option<Node> {
        match self.slot(id)? {
            Slot::Comment(pos) => self.comments.get(pos).cloned().map(Node::Comment),
            Slot::Reply(pos, idx) => self
                .comments
                .get(pos)
                .and_then(|c| c.replies.get(idx))
                .cloned()
                .map(Node::Reply),
        }
    }

    pub fn comments(&self) -> impl Iterator<Item = &CommentNode> {
        self.comments.iter()
    }

    /// Every node, each comment followed by its replies
    pub fn nodes(&self) -> impl Iterator<Item = Node> + '_ {
        self.comments.iter().flat_map(|c| {
            std::iter::once(Node::Comment(c.clone()))
                .chain(c.replies.iter().cloned().map(Node::Reply))
        })
    }

    #[cfg(test)]
    pub(crate) fn indexed_len(&self) -> usize {
        self.owners.len()
    }
}

impl CommentTree {
    fn slot(&self, id: &NodeId) -> Option<Slot> {
        match self.owners.get(id)? {
            None => self
                .comments
                .iter()
                .position(|c| c.id == *id)
                .map(Slot::Comment),
            Some(parent) => {
                let pos = self.comments.iter().position(|c| c.id == *parent)?;
                let idx = self.comments[pos].replies.iter().position(|r| r.id == *id)?;
                Some(Slot::Reply(pos, idx))
            }
        }
    }

    /// Checks that `c` could join the tree once the subtree rooted at
    /// `replacing` is gone
    fn check_comment(&self, c: &CommentNode, replacing: Option<NodeId>) -> Result<(), Error> {
        let is_free = |id: &NodeId| match self.owners.get(id) {
            None => true,
            Some(owner) => replacing.is_some() && (Some(*id) == replacing || *owner == replacing),
        };
        if !is_free(&c.id) {
            return Err(Error::DuplicateId(c.id));
        }
        let mut seen = HashSet::new();
        seen.insert(c.id);
        for r in c.replies.iter() {
            if r.parent_id != c.id {
                return Err(Error::ParentNotFound(r.parent_id));
            }
            if !is_free(&r.id) || !seen.insert(r.id) {
                return Err(Error::DuplicateId(r.id));
            }
        }
        Ok(())
    }

    fn index_comment(&mut self, c: &CommentNode) {
        self.owners.insert(c.id, None);
        for r in c.replies.iter() {
            self.owners.insert(r.id, Some(c.id));
        }
    }

    fn unindex_comment(&mut self, c: &CommentNode) {
        self.owners.remove(&c.id);
        for r in c.replies.iter() {
            self.owners.remove(&r.id);
        }
    }
}
