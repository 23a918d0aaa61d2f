/// Core error type for the story bot.
///
/// Adapter crates map their specific errors into this type so the core can
/// decide uniformly what is logged and what is shown to the user.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid handle: {0:?}")]
    InvalidHandle(String),

    #[error("story service error: {0}")]
    Story(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
