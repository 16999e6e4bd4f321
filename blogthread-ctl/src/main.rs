use anyhow::Context;
use blogthread_api::{CommentId, PostId, RemoteCommentService};
use blogthread_client::{CommentSyncEngine, CommentTree, HttpCommentService, NodeId};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long, env = "BLOGTHREAD_HOST", default_value = "http://localhost:8111")]
    host: String,

    /// Post whose comments to work on
    #[structopt(short, long)]
    post: u64,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Show the comment thread
    List,

    /// Print the comments as JSON, in the format the test data uses
    Dump,

    /// Compare the thread with the server's comment count
    Count,

    /// Add a top-level comment
    Comment { content: String },

    /// Reply to a top-level comment
    Reply { parent: u64, content: String },

    /// Replace the content of a comment or reply
    Edit { id: u64, content: String },

    /// Delete a comment with its replies, or a single reply
    Delete { id: u64 },
}

fn print_tree(tree: &CommentTree) {
    for c in tree.comments() {
        println!("[{}] {} ({})", c.id, c.content, c.created_at);
        for r in c.replies.iter() {
            println!("    [{}] {} ({})", r.id, r.content, r.created_at);
        }
    }
    println!("{} comments", tree.total_count());
}

fn node(id: u64) -> NodeId {
    NodeId::from(CommentId(id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = <Opt as structopt::StructOpt>::from_args();

    let service = HttpCommentService::new(opt.host);
    let post = PostId(opt.post);

    if let Command::Dump = opt.cmd {
        let comments = service
            .list_comments(post)
            .await
            .with_context(|| format!("listing comments of post {post}"))?;
        let json = serde_json::to_string_pretty(&comments).context("serializing comments")?;
        println!("{json}");
        return Ok(());
    }

    let engine = CommentSyncEngine::new(service, post);
    engine
        .load()
        .await
        .with_context(|| format!("loading comments of post {post}"))?;

    match opt.cmd {
        Command::List | Command::Dump => (),
        Command::Count => {
            let check = engine
                .check_remote_count()
                .await
                .context("retrieving comment count")?;
            println!("local: {}, server: {}", check.local, check.remote);
            if !check.matches() {
                println!("the server count disagrees with the loaded thread");
            }
            return Ok(());
        }
        Command::Comment { content } => {
            let c = engine
                .submit_comment(&content)
                .await
                .context("submitting comment")?;
            tracing::info!(id = %c.id, "comment created");
        }
        Command::Reply { parent, content } => {
            let r = engine
                .submit_reply(node(parent), &content)
                .await
                .with_context(|| format!("replying to comment {parent}"))?;
            tracing::info!(id = %r.id, "reply created");
        }
        Command::Edit { id, content } => {
            engine
                .edit_comment(node(id), &content)
                .await
                .with_context(|| format!("editing comment {id}"))?;
        }
        Command::Delete { id } => {
            let removed = engine
                .delete_comment(node(id))
                .await
                .with_context(|| format!("deleting comment {id}"))?;
            tracing::info!(removed, "comment deleted");
        }
    }

    print_tree(&engine.snapshot());
    Ok(())
}
