use std::panic::Location;

use thiserror::Error;

/// Numeric Subversion error codes written in `failure` responses.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// `SVN_ERR_BASE`, used for uncategorized failures.
    Unknown,
    /// `SVN_ERR_INCOMPLETE_DATA`
    IncompleteData,
    /// `SVN_ERR_UNSUPPORTED_FEATURE`
    UnsupportedFeature,
    /// `SVN_ERR_CHECKSUM_MISMATCH`
    ChecksumMismatch,
    /// `SVN_ERR_SVNDIFF_CORRUPT_WINDOW`
    SvndiffCorrupt,
    /// `SVN_ERR_FS_NO_SUCH_REVISION`
    FsNoSuchRevision,
    /// `SVN_ERR_FS_NOT_FOUND`
    FsNotFound,
    /// `SVN_ERR_FS_NOT_DIRECTORY`
    FsNotDirectory,
    /// `SVN_ERR_FS_PATH_ALREADY_LOCKED`
    FsPathAlreadyLocked,
    /// `SVN_ERR_FS_NO_SUCH_LOCK`
    FsNoSuchLock,
    /// `SVN_ERR_REPOS_BAD_ARGS`
    ReposBadArgs,
    /// `SVN_ERR_RA_ILLEGAL_URL`
    RaIllegalUrl,
    /// `SVN_ERR_RA_NOT_IMPLEMENTED`
    RaNotImplemented,
    /// `SVN_ERR_CLIENT_PROPERTY_NAME`
    BadPropertyName,
    /// `SVN_ERR_RA_SVN_UNKNOWN_CMD`
    UnknownCommand,
    /// `SVN_ERR_RA_SVN_MALFORMED_DATA`
    MalformedData,
    /// `SVN_ERR_RA_SVN_REPOS_NOT_FOUND`
    ReposNotFound,
    /// `SVN_ERR_RA_SVN_BAD_VERSION`
    BadVersion,
    /// `SVN_ERR_RA_SVN_NO_MECHANISMS`
    NoMechanisms,
    /// `SVN_ERR_RA_SVN_EDIT_ABORTED`
    EditAborted,
    /// `SVN_ERR_AUTHN_FAILED`
    AuthnFailed,
}

impl ErrorCode {
    /// Returns the numeric code sent on the wire.
    pub fn code(self) -> u64 {
        match self {
            ErrorCode::Unknown => 200_000,
            ErrorCode::IncompleteData => 200_003,
            ErrorCode::UnsupportedFeature => 200_007,
            ErrorCode::ChecksumMismatch => 200_014,
            ErrorCode::SvndiffCorrupt => 185_001,
            ErrorCode::FsNoSuchRevision => 160_006,
            ErrorCode::FsNotFound => 160_013,
            ErrorCode::FsNotDirectory => 160_016,
            ErrorCode::FsPathAlreadyLocked => 160_035,
            ErrorCode::FsNoSuchLock => 160_040,
            ErrorCode::ReposBadArgs => 165_002,
            ErrorCode::RaIllegalUrl => 170_000,
            ErrorCode::RaNotImplemented => 170_003,
            ErrorCode::BadPropertyName => 195_011,
            ErrorCode::UnknownCommand => 210_001,
            ErrorCode::MalformedData => 210_004,
            ErrorCode::ReposNotFound => 210_005,
            ErrorCode::BadVersion => 210_006,
            ErrorCode::NoMechanisms => 210_007,
            ErrorCode::EditAborted => 210_008,
            ErrorCode::AuthnFailed => 215_004,
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
/// One entry of a `failure` response.
pub struct ServerErrorItem {
    /// Subversion error code.
    pub code: u64,
    /// Human-readable error message.
    pub message: Option<String>,
    /// Source file where the failure was raised.
    pub file: Option<String>,
    /// Source line where the failure was raised.
    pub line: Option<u64>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
/// A recoverable command failure.
///
/// Handlers return this when a command cannot be completed but the session
/// stays usable; the dispatcher serializes it as
/// `( failure ( ( code message file line ) ... ) )`. `context` is the
/// command name and only shows up in logs.
pub struct ServerError {
    /// High-level context for the failure (for example, the command name).
    pub context: Option<String>,
    /// Error chain, outermost first.
    pub chain: Vec<ServerErrorItem>,
}

impl ServerError {
    /// Creates a single-item failure tagged with the caller's location.
    #[track_caller]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let location = Location::caller();
        Self {
            context: None,
            chain: vec![ServerErrorItem {
                code: code.code(),
                message: Some(message.into()),
                file: Some(location.file().to_string()),
                line: Some(u64::from(location.line())),
            }],
        }
    }

    /// Builds a failure from an error chain received from the peer.
    pub fn from_chain(chain: Vec<ServerErrorItem>) -> Self {
        Self {
            context: None,
            chain,
        }
    }

    /// Shorthand for a malformed-parameter failure.
    #[track_caller]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedData, message)
    }

    /// Attaches additional context to this error.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Code of the outermost error in the chain.
    pub fn code(&self) -> u64 {
        self.chain
            .first()
            .map(|item| item.code)
            .unwrap_or(ErrorCode::Unknown.code())
    }

    /// Returns a single-line, human-readable message.
    pub fn message_summary(&self) -> String {
        let mut messages = Vec::new();
        for err in &self.chain {
            if let Some(message) = err.message.as_deref()
                && !message.is_empty()
            {
                messages.push(message);
            }
        }
        if messages.is_empty() {
            "unknown error".to_string()
        } else {
            messages.join("; ")
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ctx) = self.context.as_deref()
            && !ctx.is_empty()
        {
            write!(f, "{ctx}: ")?;
        }
        write!(f, "{} (E{})", self.message_summary(), self.code())
    }
}

impl std::error::Error for ServerError {}

#[derive(Debug, Error)]
#[non_exhaustive]
/// Categorized failures reported by a [`crate::Repository`] backend.
pub enum RepositoryError {
    /// The path does not exist at the requested revision.
    #[error("path '{0}' not found")]
    NotFound(String),
    /// A directory operation was applied to a non-directory.
    #[error("'{0}' is not a directory")]
    NotDirectory(String),
    /// The revision is newer than the youngest revision.
    #[error("no such revision {0}")]
    NoSuchRevision(u64),
    /// The path is locked by someone else.
    #[error("path '{0}' is already locked")]
    AlreadyLocked(String),
    /// No lock exists on the path, or the token does not match.
    #[error("no lock on path '{0}'")]
    NoSuchLock(String),
    /// Anything the backend does not categorize.
    #[error("{0}")]
    Other(String),
}

impl RepositoryError {
    /// Wire code for this category.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RepositoryError::NotFound(_) => ErrorCode::FsNotFound,
            RepositoryError::NotDirectory(_) => ErrorCode::FsNotDirectory,
            RepositoryError::NoSuchRevision(_) => ErrorCode::FsNoSuchRevision,
            RepositoryError::AlreadyLocked(_) => ErrorCode::FsPathAlreadyLocked,
            RepositoryError::NoSuchLock(_) => ErrorCode::FsNoSuchLock,
            RepositoryError::Other(_) => ErrorCode::Unknown,
        }
    }
}

impl From<RepositoryError> for ServerError {
    #[track_caller]
    fn from(err: RepositoryError) -> Self {
        ServerError::new(err.error_code(), err.to_string())
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
/// Fatal errors; any of these ends the session.
pub enum SvnError {
    /// The provided URL is syntactically invalid or unsupported.
    #[error("invalid svn url: {0}")]
    InvalidUrl(String),
    /// The provided repository path is invalid or unsafe.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// An I/O error occurred while reading/writing the network stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer sent data that does not match the `ra_svn` framing.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The peer closed the connection.
    #[error("unexpected EOF")]
    UnexpectedEof,
}

impl SvnError {
    pub(crate) fn timed_out(what: &str) -> Self {
        SvnError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{what} timed out"),
        ))
    }
}
