#![cfg(test)]

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use blogthread_mock_server::MockServer;
use bolero::generator::TypeGenerator;
use chrono::Utc;

use crate::{
    api::{CommentId, PostId},
    *,
};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            if std::env::var("RUST_LOG").is_ok() {
                let _ = tracing_subscriber::fmt::try_init();
            }
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

const POST: PostId = PostId(1);

fn id(n: u8) -> NodeId {
    // small space so that operations collide
    NodeId::Confirmed(CommentId(u64::from(n % 16)))
}

fn comment(n: u8, replies: &[u8]) -> CommentNode {
    let id = id(n);
    CommentNode {
        id,
        content: format!("comment {n}"),
        created_at: Utc::now(),
        replies: replies
            .iter()
            .map(|r| ReplyNode {
                id: self::id(*r),
                parent_id: id,
                content: format!("reply {r}"),
                created_at: Utc::now(),
            })
            .collect(),
    }
}

fn check_tree(tree: &CommentTree) {
    assert_eq!(tree.total_count(), tree.recount());
    assert_eq!(tree.total_count(), tree.indexed_len());
    for c in tree.comments() {
        assert_eq!(tree.parent_of(&c.id).unwrap(), None);
        for r in c.replies.iter() {
            assert_eq!(r.parent_id, c.id);
            assert_eq!(tree.parent_of(&r.id).unwrap(), Some(c.id));
        }
    }
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum TreeOp {
    InsertTopLevel { id: u8, replies: Vec<u8> },
    InsertReply { parent: u8, id: u8 },
    Edit { id: u8, content: String },
    Remove { id: u8 },
    ReplaceId { old: u8, new: u8 },
    TakeRestore { id: u8, between: Option<u8> },
}

fn apply_tree_op(tree: &mut CommentTree, op: TreeOp) -> Result<(), Error> {
    match op {
        TreeOp::InsertTopLevel { id, replies } => tree.insert_top_level(comment(id, &replies)),
        TreeOp::InsertReply { parent, id } => {
            let reply = ReplyNode::placeholder(self::id(parent), format!("reply {id}"));
            let reply = ReplyNode {
                id: self::id(id),
                ..reply
            };
            tree.insert_reply(&self::id(parent), reply)
        }
        TreeOp::Edit { id, content } => {
            let node = tree.replace_node(&self::id(id), |_| content.clone())?;
            assert_eq!(node.content(), content);
            Ok(())
        }
        TreeOp::Remove { id } => {
            let before = tree.total_count();
            let removed = tree.remove_node(&self::id(id))?;
            assert_eq!(tree.total_count() + removed, before);
            assert!(!tree.contains(&self::id(id)));
            Ok(())
        }
        TreeOp::ReplaceId { old, new } => {
            let (old, new) = (id(old), id(new));
            let node = match tree.get(&old) {
                Some(Node::Comment(c)) => Node::Comment(CommentNode {
                    id: new,
                    replies: c
                        .replies
                        .into_iter()
                        .map(|r| ReplyNode { parent_id: new, ..r })
                        .collect(),
                    ..c
                }),
                Some(Node::Reply(r)) => Node::Reply(ReplyNode { id: new, ..r }),
                None => Node::Comment(comment(0, &[])),
            };
            let count = tree.total_count();
            tree.replace_id(&old, node)?;
            assert_eq!(tree.total_count(), count);
            assert!(tree.contains(&new));
            Ok(())
        }
        TreeOp::TakeRestore { id, between } => {
            let before = tree.clone();
            let removed = tree.take_node(&self::id(id))?;
            check_tree(tree);
            let reinserted = match between {
                Some(other) => tree.insert_top_level(comment(other, &[])).is_ok(),
                None => false,
            };
            let after_take = tree.clone();
            match tree.restore(removed) {
                Ok(()) if !reinserted => assert_eq!(*tree, before),
                Ok(()) => assert_eq!(tree.total_count(), before.total_count() + 1),
                Err(_) => assert_eq!(*tree, after_take),
            }
            Ok(())
        }
    }
}

do_tokio_test!(tree_invariants_hold, Vec<TreeOp>, |ops: Vec<TreeOp>| async move {
    let mut tree = CommentTree::new();
    for op in ops {
        let before = tree.clone();
        if apply_tree_op(&mut tree, op).is_err() {
            assert_eq!(tree, before, "failed operation changed the tree");
        }
        check_tree(&tree);
    }
});

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum EngineOp {
    Comment { fail: bool },
    Reply { parent: u8, fail: bool },
    Edit { target: u8, fail: bool },
    Delete { target: u8, fail: bool },
    Load { fail: bool },
}

fn pick(tree: &CommentTree, target: u8) -> NodeId {
    let nodes = tree.nodes().collect::<Vec<_>>();
    match nodes.len() {
        0 => NodeId::Confirmed(CommentId(1_000_000)),
        len => nodes[usize::from(target) % len].id(),
    }
}

fn server_tree(mock: &MockServer) -> CommentTree {
    let mut tree = CommentTree::new();
    tree.load(
        mock.comments(POST)
            .into_iter()
            .map(CommentNode::from)
            .collect(),
    )
    .expect("server listing is a valid tree");
    tree
}

/// Runs `op` with content numbered `n`, picking its target in the current tree
async fn apply_engine_op(
    engine: &CommentSyncEngine<Arc<MockServer>>,
    op: EngineOp,
    n: usize,
) -> Result<(), Error> {
    let content = format!("content {n}");
    let snapshot = engine.snapshot();
    match op {
        EngineOp::Comment { .. } => engine.submit_comment(&content).await.map(|_| ()),
        EngineOp::Reply { parent, .. } => engine
            .submit_reply(pick(&snapshot, parent), &content)
            .await
            .map(|_| ()),
        EngineOp::Edit { target, .. } => engine
            .edit_comment(pick(&snapshot, target), &content)
            .await
            .map(|_| ()),
        EngineOp::Delete { target, .. } => engine
            .delete_comment(pick(&snapshot, target))
            .await
            .map(|_| ()),
        EngineOp::Load { .. } => engine.load().await,
    }
}

fn fails(op: &EngineOp) -> bool {
    match *op {
        EngineOp::Comment { fail }
        | EngineOp::Reply { fail, .. }
        | EngineOp::Edit { fail, .. }
        | EngineOp::Delete { fail, .. }
        | EngineOp::Load { fail } => fail,
    }
}

do_tokio_test!(
    engine_follows_server,
    Vec<EngineOp>,
    |ops: Vec<EngineOp>| async move {
        let mock = Arc::new(MockServer::new());
        let engine = CommentSyncEngine::new(mock.clone(), POST);
        for (n, op) in ops.into_iter().enumerate() {
            let fail = fails(&op);
            let before = engine.snapshot();
            let reaches_server = match op {
                EngineOp::Comment { .. } | EngineOp::Load { .. } => true,
                EngineOp::Edit { target, .. } | EngineOp::Delete { target, .. } => {
                    before.contains(&pick(&before, target))
                }
                EngineOp::Reply { parent, .. } => {
                    matches!(before.parent_of(&pick(&before, parent)), Ok(None))
                }
            };
            mock.set_offline(fail);
            let res = apply_engine_op(&engine, op, n).await;
            mock.set_offline(false);

            match (reaches_server, fail) {
                (true, false) => assert!(res.is_ok(), "{res:?}"),
                (true, true) => {
                    assert!(matches!(res, Err(Error::RemoteFailure(_))), "{res:?}");
                    assert_eq!(engine.snapshot(), before);
                }
                (false, _) => {
                    assert!(matches!(&res, Err(e) if e.is_structural()), "{res:?}");
                    assert_eq!(engine.snapshot(), before);
                }
            }
            assert_eq!(engine.snapshot(), server_tree(&mock));
            assert_eq!(engine.total_count(), mock.test_num_comments(POST));
        }
    }
);

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
struct Batch {
    initial: Vec<EngineOp>,
    concurrent: Vec<EngineOp>,
    failures: u8,
}

fn contents(tree: &CommentTree) -> HashMap<NodeId, (Option<NodeId>, String)> {
    tree.nodes()
        .map(|n| (n.id(), (n.parent_id(), String::from(n.content()))))
        .collect()
}

do_tokio_test!(
    concurrent_operations_settle_on_server_state,
    Batch,
    |batch: Batch| async move {
        let mock = Arc::new(MockServer::new());
        let engine = CommentSyncEngine::new(mock.clone(), POST);
        for (n, op) in batch.initial.into_iter().enumerate() {
            let _ = apply_engine_op(&engine, op, n).await;
        }

        mock.fail_next(usize::from(batch.failures % 8));
        let offset = 1000;
        futures::future::join_all(
            batch
                .concurrent
                .into_iter()
                .enumerate()
                .map(|(n, op)| apply_engine_op(&engine, op, offset + n)),
        )
        .await;

        let tree = engine.snapshot();
        check_tree(&tree);
        assert_eq!(contents(&tree), contents(&server_tree(&mock)));
        for node in tree.nodes() {
            assert!(!node.id().is_placeholder());
            assert_eq!(engine.status(&node.id()), TargetStatus::Idle);
        }
    }
);
