use std::{
    collections::{hash_map, HashMap},
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::sync::{watch, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::{
    api::{PostId, RemoteCommentService},
    CommentNode, CommentTree, Error, Node, NodeId, ReplyNode,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    Create,
    Edit,
    Delete,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TargetStatus {
    Idle,
    Pending {
        operation: Operation,

        /// Number of operations queued behind this one
        waiting: usize,
    },
}

/// Comment count of the loaded tree compared with what the server reports
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CountCheck {
    pub local: usize,
    pub remote: u64,
}

impl CountCheck {
    pub fn matches(&self) -> bool {
        self.local as u64 == self.remote
    }
}

struct Target {
    lock: Arc<RwLock<()>>,

    /// Operations holding or waiting for `lock`
    users: usize,
    running: Option<Operation>,
}

struct State {
    tree: CommentTree,
    targets: HashMap<NodeId, Target>,

    /// Placeholder id -> id the server gave the node, kept while pinned
    confirmed: HashMap<NodeId, NodeId>,

    /// Operations in progress that were handed each placeholder id
    pins: HashMap<NodeId, usize>,

    /// Nodes removed by a delete still in flight -> target of that delete
    detached: HashMap<NodeId, NodeId>,
}

impl State {
    fn resolve(&self, mut id: NodeId) -> NodeId {
        while let Some(next) = self.confirmed.get(&id) {
            id = *next;
        }
        id
    }
}

enum Access {
    Shared,
    Exclusive(Operation),
}

enum Held {
    Waiting,
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// Registration of one operation on a target, releasing it on drop
struct TargetGuard<'a> {
    state: &'a Mutex<State>,
    id: NodeId,
    held: Held,
}

impl Drop for TargetGuard<'_> {
    fn drop(&mut self) {
        let was_exclusive = matches!(self.held, Held::Exclusive(_));
        // release the lock before the bookkeeping
        self.held = Held::Waiting;
        let mut state = self.state.lock();
        let key = state.resolve(self.id);
        if let hash_map::Entry::Occupied(mut e) = state.targets.entry(key) {
            let target = e.get_mut();
            if was_exclusive {
                target.running = None;
            }
            target.users -= 1;
            if target.users == 0 {
                e.remove();
            }
        }
    }
}

/// Keeps the alias of a placeholder alive while an operation refers to it
struct AliasPin<'a> {
    state: &'a Mutex<State>,
    id: Option<NodeId>,
}

impl Drop for AliasPin<'_> {
    fn drop(&mut self) {
        let id = match self.id {
            Some(id) => id,
            None => return,
        };
        let mut state = self.state.lock();
        let state = &mut *state;
        if let hash_map::Entry::Occupied(mut e) = state.pins.entry(id) {
            *e.get_mut() -= 1;
            if *e.get() == 0 {
                e.remove();
                state.confirmed.remove(&id);
            }
        }
    }
}

/// Locks held while mutating one node
struct Locked<'a> {
    id: NodeId,
    _node: TargetGuard<'a>,
    _parent: Option<TargetGuard<'a>>,
}

/// Keeps the comments of one post in sync with the remote comment service
///
/// Every operation first applies its result to the local tree, then calls the
/// service, then either reconciles the tree with the answer or undoes its
/// change. Operations on the same node run one after the other, in the order
/// they were started; operations on different nodes interleave freely.
pub struct CommentSyncEngine<S> {
    post: PostId,
    service: S,

    /// Taken shared by every operation, exclusively by `load`
    epoch: RwLock<()>,
    state: Mutex<State>,
    updates: watch::Sender<CommentTree>,
}

impl<S: RemoteCommentService> CommentSyncEngine<S> {
    pub fn new(service: S, post: PostId) -> CommentSyncEngine<S> {
        let (updates, _) = watch::channel(CommentTree::new());
        CommentSyncEngine {
            post,
            service,
            epoch: RwLock::new(()),
            state: Mutex::new(State {
                tree: CommentTree::new(),
                targets: HashMap::new(),
                confirmed: HashMap::new(),
                pins: HashMap::new(),
                detached: HashMap::new(),
            }),
            updates,
        }
    }

    pub fn post(&self) -> PostId {
        self.post
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn snapshot(&self) -> CommentTree {
        self.state.lock().tree.clone()
    }

    pub fn total_count(&self) -> usize {
        self.state.lock().tree.total_count()
    }

    /// Receives a new snapshot after every change to the tree
    pub fn subscribe(&self) -> watch::Receiver<CommentTree> {
        self.updates.subscribe()
    }

    pub fn status(&self, id: &NodeId) -> TargetStatus {
        let state = self.state.lock();
        match state.targets.get(&state.resolve(*id)) {
            Some(Target {
                running: Some(operation),
                users,
                ..
            }) => TargetStatus::Pending {
                operation: *operation,
                waiting: users.saturating_sub(1),
            },
            _ => TargetStatus::Idle,
        }
    }

    /// Replaces the tree with the server's current listing
    ///
    /// Waits for the operations in flight, and holds back new ones until done.
    pub async fn load(&self) -> Result<(), Error> {
        let _epoch = self.epoch.write().await;
        let comments = self.service.list_comments(self.post).await?;
        let nodes = comments.into_iter().map(CommentNode::from).collect();
        self.update(|state| state.tree.load(nodes))?;
        tracing::info!(post = %self.post, total = self.total_count(), "loaded comments");
        Ok(())
    }

    pub async fn submit_comment(&self, content: &str) -> Result<CommentNode, Error> {
        check_content(content)?;
        let _epoch = self.epoch.read().await;

        let placeholder = CommentNode::placeholder(String::from(content));
        let temp = placeholder.id;
        let _pin = self.pin(temp);
        let _node = self.acquire(temp, Access::Exclusive(Operation::Create)).await;
        self.update(|state| state.tree.insert_top_level(placeholder))?;

        match self.service.create_comment(self.post, content).await {
            Ok(c) => {
                let node = CommentNode::from(c);
                self.confirm(temp, Node::Comment(node.clone()))?;
                Ok(node)
            }
            Err(e) => {
                tracing::warn!(%temp, "comment creation failed, removing placeholder: {e}");
                self.discard(temp);
                Err(Error::RemoteFailure(e))
            }
        }
    }

    pub async fn submit_reply(&self, parent: NodeId, content: &str) -> Result<ReplyNode, Error> {
        check_content(content)?;
        let _parent_pin = self.pin(parent);
        let _epoch = self.epoch.read().await;

        let (parent, _parent) = self.lock_parent(parent).await?;
        let server_parent = parent.confirmed().ok_or(Error::ParentNotFound(parent))?;

        let placeholder = ReplyNode::placeholder(parent, String::from(content));
        let temp = placeholder.id;
        let _pin = self.pin(temp);
        let _node = self.acquire(temp, Access::Exclusive(Operation::Create)).await;
        self.update(|state| state.tree.insert_reply(&parent, placeholder))?;

        match self
            .service
            .create_reply(self.post, server_parent, content)
            .await
        {
            Ok(c) => {
                let node = ReplyNode::from_api(c, parent);
                self.confirm(temp, Node::Reply(node.clone()))?;
                Ok(node)
            }
            Err(e) => {
                tracing::warn!(%temp, %parent, "reply creation failed, removing placeholder: {e}");
                self.discard(temp);
                Err(Error::RemoteFailure(e))
            }
        }
    }

    /// Replaces the content of a comment or reply
    ///
    /// Edits of a node still waiting for its creation to be confirmed wait for
    /// the confirmation, then apply to the confirmed node.
    pub async fn edit_comment(
        &self,
        id: impl Into<Option<NodeId>>,
        content: &str,
    ) -> Result<Node, Error> {
        let id = id.into().ok_or(Error::InvalidId)?;
        check_content(content)?;
        let _pin = self.pin(id);
        let _epoch = self.epoch.read().await;

        let locked = self.lock_node(id, Operation::Edit).await?;
        let id = locked.id;
        let server_id = id.confirmed().ok_or(Error::InvalidId)?;
        let previous = self
            .state
            .lock()
            .tree
            .get(&id)
            .map(|n| String::from(n.content()))
            .ok_or(Error::NodeNotFound(id))?;
        self.update(|state| state.tree.replace_node(&id, |_| String::from(content)))?;

        match self
            .service
            .update_comment(self.post, server_id, content)
            .await
        {
            Ok(c) => {
                let node = self.update(|state| state.tree.replace_node(&id, |_| c.content))?;
                tracing::debug!(%id, "comment edit confirmed");
                Ok(node)
            }
            Err(e) => {
                tracing::warn!(%id, "comment edit failed, restoring previous content: {e}");
                if let Err(err) = self.update(|state| state.tree.replace_node(&id, |_| previous)) {
                    tracing::error!(%id, ?err, "failed rolling back comment edit");
                }
                Err(Error::RemoteFailure(e))
            }
        }
    }

    /// Deletes a comment with all its replies, or a single reply
    ///
    /// Returns the number of nodes that left the tree.
    pub async fn delete_comment(&self, id: impl Into<Option<NodeId>>) -> Result<usize, Error> {
        let id = id.into().ok_or(Error::InvalidId)?;
        let _pin = self.pin(id);
        let _epoch = self.epoch.read().await;

        let locked = self.lock_node(id, Operation::Delete).await?;
        let id = locked.id;
        let server_id = id.confirmed().ok_or(Error::InvalidId)?;
        let removed = self.update(|state| {
            let removed = state.tree.take_node(&id)?;
            for node in removed.ids() {
                state.detached.insert(node, id);
            }
            Ok(removed)
        })?;

        let res = self.service.delete_comment(self.post, server_id).await;
        let ids = removed.ids();
        let count = removed.count();
        match res {
            Ok(()) => {
                let mut state = self.state.lock();
                for node in ids.iter() {
                    state.detached.remove(node);
                }
                tracing::debug!(%id, count, "comment deletion confirmed");
                Ok(count)
            }
            Err(e) => {
                tracing::warn!(%id, "comment deletion failed, restoring it: {e}");
                let restored = self.update(|state| {
                    for node in ids.iter() {
                        state.detached.remove(node);
                    }
                    state.tree.restore(removed)
                });
                if let Err(err) = restored {
                    tracing::error!(%id, ?err, "failed rolling back comment deletion");
                }
                Err(Error::RemoteFailure(e))
            }
        }
    }

    /// Compares the loaded tree with the server's own comment count
    ///
    /// The tree stays authoritative; a mismatch is only logged.
    pub async fn check_remote_count(&self) -> Result<CountCheck, Error> {
        let _epoch = self.epoch.read().await;
        let remote = self.service.count_comments(self.post).await?;
        let check = CountCheck {
            local: self.total_count(),
            remote,
        };
        if !check.matches() {
            tracing::warn!(
                post = %self.post,
                local = check.local,
                remote = check.remote,
                "remote comment count disagrees with the comment tree"
            );
        }
        Ok(check)
    }
}

impl<S: RemoteCommentService> CommentSyncEngine<S> {
    fn update<R>(&self, f: impl FnOnce(&mut State) -> Result<R, Error>) -> Result<R, Error> {
        let mut state = self.state.lock();
        let res = f(&mut state);
        match &res {
            Ok(_) => {
                self.updates.send_replace(state.tree.clone());
            }
            Err(err) => tracing::error!(?err, "comment tree refused mutation"),
        }
        res
    }

    fn confirm(&self, temp: NodeId, node: Node) -> Result<(), Error> {
        let id = node.id();
        let res = self.update(|state| {
            state.tree.replace_id(&temp, node)?;
            state.confirmed.insert(temp, id);
            // operations queued on either id now share one lock
            if let Some(target) = state.targets.remove(&temp) {
                state.targets.insert(id, target);
            }
            Ok(())
        });
        match res {
            Ok(()) => {
                tracing::info!(%temp, %id, "comment confirmed");
                Ok(())
            }
            Err(e) => {
                self.discard(temp);
                Err(e)
            }
        }
    }

    fn discard(&self, temp: NodeId) {
        if let Err(err) = self.update(|state| state.tree.remove_node(&temp)) {
            tracing::error!(%temp, ?err, "failed removing placeholder");
        }
    }

    fn pin(&self, id: NodeId) -> AliasPin<'_> {
        if !id.is_placeholder() {
            return AliasPin {
                state: &self.state,
                id: None,
            };
        }
        *self.state.lock().pins.entry(id).or_insert(0) += 1;
        AliasPin {
            state: &self.state,
            id: Some(id),
        }
    }

    /// Registers on the target `id` currently stands for, then waits for its
    /// lock
    ///
    /// `id` must stay pinned while the guard lives.
    async fn acquire(&self, id: NodeId, access: Access) -> TargetGuard<'_> {
        let lock = {
            let mut state = self.state.lock();
            let key = state.resolve(id);
            let target = state.targets.entry(key).or_insert_with(|| Target {
                lock: Arc::new(RwLock::new(())),
                users: 0,
                running: None,
            });
            target.users += 1;
            target.lock.clone()
        };
        let mut guard = TargetGuard {
            state: &self.state,
            id,
            held: Held::Waiting,
        };
        match access {
            Access::Shared => guard.held = Held::Shared(lock.read_owned().await),
            Access::Exclusive(op) => {
                guard.held = Held::Exclusive(lock.write_owned().await);
                let mut state = self.state.lock();
                let key = state.resolve(id);
                if let Some(target) = state.targets.get_mut(&key) {
                    target.running = Some(op);
                }
                tracing::debug!(id = %key, ?op, "target pending");
            }
        }
        guard
    }

    /// Waits until the delete that detached `id` is over
    async fn wait_detached(&self, delete_target: NodeId) {
        drop(self.acquire(delete_target, Access::Shared).await);
    }

    /// Locks `id` for mutation: shared on its parent if it is a reply, then
    /// exclusive on the node itself
    async fn lock_node(&self, id: NodeId, op: Operation) -> Result<Locked<'_>, Error> {
        let mut id = id;
        loop {
            let (owner, detached_by) = {
                let state = self.state.lock();
                id = state.resolve(id);
                (state.tree.parent_of(&id), state.detached.get(&id).copied())
            };
            let owner = match (owner, detached_by) {
                (Ok(owner), _) => owner,
                (Err(_), Some(target)) => {
                    self.wait_detached(target).await;
                    continue;
                }
                (Err(e), None) => return Err(e),
            };

            let parent = match owner {
                Some(parent) => Some(self.acquire(parent, Access::Shared).await),
                None => None,
            };
            let node = self.acquire(id, Access::Exclusive(op)).await;

            let now_owner = {
                let state = self.state.lock();
                // follow the server id if it got confirmed while we waited
                id = state.resolve(id);
                state.tree.parent_of(&id)
            };
            match now_owner {
                Ok(now_owner) if now_owner == owner => {
                    return Ok(Locked {
                        id,
                        _node: node,
                        _parent: parent,
                    })
                }
                Ok(_) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Locks `parent` shared, making sure it is a top-level comment
    async fn lock_parent(&self, parent: NodeId) -> Result<(NodeId, TargetGuard<'_>), Error> {
        let mut id = parent;
        loop {
            let (owner, detached_by) = {
                let state = self.state.lock();
                id = state.resolve(id);
                (state.tree.parent_of(&id), state.detached.get(&id).copied())
            };
            match (owner, detached_by) {
                (Ok(None), _) => (),
                (Err(_), Some(target)) => {
                    self.wait_detached(target).await;
                    continue;
                }
                _ => return Err(Error::ParentNotFound(id)),
            }

            let guard = self.acquire(id, Access::Shared).await;
            let now_owner = {
                let state = self.state.lock();
                id = state.resolve(id);
                state.tree.parent_of(&id)
            };
            match now_owner {
                Ok(None) => return Ok((id, guard)),
                _ => return Err(Error::ParentNotFound(id)),
            }
        }
    }
}

fn check_content(content: &str) -> Result<(), Error> {
    match content.trim().is_empty() {
        true => Err(Error::EmptyContent),
        false => Ok(()),
    }
}
