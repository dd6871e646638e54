/// Application name.
pub const APP_NAME: &str = "Swesh";

/// Default number of proposals a user may submit per UTC calendar day.
pub const DAILY_PROPOSAL_LIMIT: u32 = 50;

/// Maximum chat message length in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Number of messages returned per chat page.
pub const MESSAGE_PAGE_SIZE: u32 = 100;

/// Pending proposals older than this are swept to `expired`.
pub const PROPOSAL_EXPIRY_DAYS: i64 = 30;

/// Default HTTP API port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;
