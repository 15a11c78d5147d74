use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("record encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("invalid name '{0}': only letters, digits, '_', '-', '.' and spaces are allowed")]
    InvalidName(String),

    #[error("original file does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("a file already exists at {0}")]
    NameCollision(PathBuf),

    #[error("file not found at {0} after renaming")]
    VerificationFailed(PathBuf),

    #[error("file was written but is not present at {0}")]
    StorageVerificationFailed(PathBuf),

    #[error("content location already in use: {0}")]
    LocationTaken(String),

    #[error("text extraction failed: {0}")]
    Extraction(String),
}

impl Error {
    /// Stable, machine-readable code for the error class.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidName(_) => "invalid-name",
            Error::SourceMissing(_) => "source-missing",
            Error::NameCollision(_) => "name-collision",
            Error::VerificationFailed(_) => "verification-failed",
            Error::StorageVerificationFailed(_) => {
                "storage-verification-failed"
            }
            Error::NotFound { .. } => "not-found",
            Error::Extraction(_) => "extraction-failure",
            _ => "failure",
        }
    }

    /// Returns `true` when the error was caused by caller input rather than
    /// by the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidName(_)
                | Error::NameCollision(_)
                | Error::SourceMissing(_)
                | Error::NotFound { .. }
        )
    }

    pub(crate) fn file_not_found(id: u64) -> Self {
        Error::NotFound {
            kind: "file",
            name: format!("#{id}"),
        }
    }
}
