use chrono::Utc;

pub use uuid::Uuid;
pub type Time = chrono::DateTime<Utc>;

mod comment;
pub use comment::{Comment, CommentId, NewComment, UpdateComment};

mod error;
pub use error::{Error, RemoteError};

mod service;
pub use service::RemoteCommentService;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PostId(pub u64);

impl std::fmt::Display for PostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

pub fn validate_string(s: &str) -> Result<(), Error> {
    match s.contains('\0') {
        true => Err(Error::NullByteInString(String::from(s))),
        false => Ok(()),
    }
}

/// Checks comment contents the way the server does before storing them
pub fn validate_content(s: &str) -> Result<(), Error> {
    validate_string(s)?;
    if s.trim().is_empty() {
        return Err(Error::EmptyContent);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_validation() {
        assert_eq!(validate_content("hello"), Ok(()));
        assert_eq!(validate_content("  hello \n"), Ok(()));
        assert_eq!(validate_content(""), Err(Error::EmptyContent));
        assert_eq!(validate_content(" \t\n "), Err(Error::EmptyContent));
        assert_eq!(
            validate_content("foo\0bar"),
            Err(Error::NullByteInString(String::from("foo\0bar"))),
        );
    }
}
