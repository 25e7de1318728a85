//! Error type shared by the sync engine and its backends.

/// Errors raised while reconciling one account.
#[derive(Debug)]
pub enum SyncError {
    /// Database read/write failed.
    Database(sqlx::Error),
    /// Payload could not be encoded or decoded.
    Codec(String),
    /// Remote listing, upload or delete failed.
    Remote(String),
    /// HTTP transport error talking to a DAV server.
    Http(reqwest::Error),
    /// Git operation failed.
    Git(git2::Error),
    /// Filesystem error in the working clone.
    Io(std::io::Error),
    /// Account, config or entity not found.
    NotFound(String),
    /// A sync feature is disabled or missing its collection path.
    NotConfigured(String),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Database(e) => write!(f, "Database error: {}", e),
            SyncError::Codec(e) => write!(f, "Codec error: {}", e),
            SyncError::Remote(e) => write!(f, "Remote error: {}", e),
            SyncError::Http(e) => write!(f, "HTTP error: {}", e),
            SyncError::Git(e) => write!(f, "Git error: {}", e),
            SyncError::Io(e) => write!(f, "I/O error: {}", e),
            SyncError::NotFound(what) => write!(f, "Not found: {}", what),
            SyncError::NotConfigured(what) => write!(f, "Not configured: {}", what),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Database(e)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Http(e)
    }
}

impl From<git2::Error> for SyncError {
    fn from(e: git2::Error) -> Self {
        SyncError::Git(e)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Io(e)
    }
}
