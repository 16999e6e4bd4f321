use blogthread_api::{Comment, CommentId};
use chrono::{Duration, Utc};
use rand::Rng;

const NUM_COMMENTS: usize = 40;
const MAX_REPLIES: usize = 6;

const COMMENT_WORD_COUNT: usize = 30;
const REPLY_WORD_COUNT: usize = 12;

const MAX_AGE_DAYS: i64 = 60;

fn main() -> serde_json::Result<()> {
    let mut rng = rand::thread_rng();
    let mut next_id = 0;
    let mut gen_id = || {
        next_id += 1;
        CommentId(next_id)
    };

    let now = Utc::now();
    let mut comments = (0..NUM_COMMENTS)
        .map(|_| {
            let id = gen_id();
            let created_at = now - Duration::minutes(rng.gen_range(0..MAX_AGE_DAYS * 24 * 60));
            let replies = (0..rng.gen_range(0..=MAX_REPLIES))
                .map(|_| Comment {
                    id: gen_id(),
                    parent_id: Some(id),
                    content: lipsum::lipsum_words(rng.gen_range(1..=REPLY_WORD_COUNT)),
                    // replies always come after what they answer
                    created_at: created_at + Duration::minutes(rng.gen_range(1..24 * 60)),
                    replies: Vec::new(),
                })
                .collect::<Vec<_>>();
            Comment {
                id,
                parent_id: None,
                content: lipsum::lipsum(rng.gen_range(1..=COMMENT_WORD_COUNT)),
                created_at,
                replies,
            }
        })
        .collect::<Vec<_>>();
    comments.sort_by_key(|c| c.created_at);
    for c in comments.iter_mut() {
        c.replies.sort_by_key(|r| r.created_at);
    }

    println!("{}", serde_json::to_string_pretty(&comments)?);
    Ok(())
}
