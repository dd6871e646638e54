use thiserror::Error;

/// Errors produced by the store layer.
///
/// The domain variants double as the user-visible failure reasons: the
/// server maps each to a status code and sends the message text through to
/// the client unchanged.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON (de)serialization of an associative column failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Item not found")]
    ItemNotFound,

    #[error("Match not found")]
    MatchNotFound,

    /// An item cannot be offered in exchange for itself.
    #[error("An item cannot be traded for itself")]
    InvalidProposal,

    /// The acting user does not own the item they are offering or deleting.
    #[error("You do not own this item")]
    NotOwner,

    /// The target item belongs to the proposer.
    #[error("You cannot propose a trade for your own item")]
    SelfTarget,

    /// The acting user reacted to their own item.
    #[error("You cannot react to your own item")]
    SelfInteraction,

    /// The item was already exchanged or withdrawn.
    #[error("This item is no longer available")]
    ItemUnavailable,

    /// An identical pending proposal already exists.
    #[error("An identical proposal is already pending")]
    DuplicatePending,

    /// The per-day proposal ceiling was reached; retryable after UTC
    /// date rollover, not before.
    #[error("Daily proposal limit of {limit} reached, try again tomorrow")]
    RateLimitExceeded { limit: u32 },

    /// The acting user is not one of the match's two participants.
    #[error("You are not part of this match")]
    NotParticipant,

    /// The match is completed or archived.
    #[error("This match is no longer active")]
    MatchNotActive,

    /// Blank or over-long message content.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// True when the underlying SQLite error is a uniqueness violation.
    /// Used to recover duplicate-key races instead of surfacing them.
    pub(crate) fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
