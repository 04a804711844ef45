//! The storage backend seam.
//!
//! The server never touches repository data itself: every command handler
//! goes through a [`Repository`] opened by a [`RepositoryFactory`] once the
//! client has named its target URL.
//!
//! All paths passed to a repository are canonical and relative to the
//! repository root (no leading `/`); the session joins client paths onto the
//! current location before calling in.

use crate::editor::{CommitEdit, EditorScript, ReportEntry};
use crate::{
    CommitInfo, Depth, DirListing, DirentField, FileContents, FileRevision, LocationEntry,
    LockDesc, LogEntry, PropertyList, RepositoryError, StatEntry,
};

#[derive(Debug)]
/// Everything a client sent with `commit`.
pub struct CommitRequest {
    /// Log message (`svn:log`).
    pub log_message: String,
    /// Lock tokens the client holds, as `(path, token)`.
    pub lock_tokens: Vec<(String, String)>,
    /// Whether locks should survive the commit.
    pub keep_locks: bool,
    /// Revision properties for the new revision, including `svn:log`.
    pub rev_props: PropertyList,
    /// The editor drive.
    pub edit: CommitEdit,
    /// Authenticated user, if any.
    pub author: Option<String>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// Which revision properties a `log` request wants.
pub enum RevPropSelection {
    /// Every revision property.
    #[default]
    All,
    /// Only the named ones.
    Named(Vec<String>),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// Parameters of `log`.
pub struct LogRequest {
    /// Paths whose history is wanted.
    pub paths: Vec<String>,
    /// First revision; `None` means youngest.
    pub start: Option<u64>,
    /// Last revision; `None` means youngest.
    pub end: Option<u64>,
    /// Whether entries carry changed-path records.
    pub changed_paths: bool,
    /// Do not follow copies.
    pub strict_node_history: bool,
    /// Maximum number of entries; 0 is unlimited.
    pub limit: u64,
    /// Include revisions merged into the requested ones.
    pub include_merged_revisions: bool,
    /// Revision properties to include.
    pub revprops: RevPropSelection,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// Parameters shared by `update`, `switch` and `status`.
pub struct TreeDeltaRequest {
    /// Revision to move to; `None` means youngest.
    pub rev: Option<u64>,
    /// Directory the report and the resulting editor are relative to.
    pub anchor: String,
    /// Entry below the anchor the operation is limited to; empty for the
    /// whole anchor.
    pub target: String,
    /// Requested depth.
    pub depth: Depth,
    /// For `switch`: the path the target is switched to.
    pub switch_path: Option<String>,
    /// Whether adds may carry copy sources.
    pub send_copyfrom_args: bool,
    /// Whether unrelated nodes at the same path are treated as modified.
    pub ignore_ancestry: bool,
}

/// A repository bound to one session.
///
/// Implementations that share state across sessions provide their own
/// synchronization; the server calls each handle from one task at a time.
pub trait Repository: Send {
    /// Repository UUID.
    fn uuid(&self) -> &str;

    /// Path of the repository root within the URL space (for example `/repo`).
    fn root_path(&self) -> &str;

    /// Current location, relative to the root.
    fn location(&self) -> &str;

    /// Moves the current location (set by `reparent`).
    fn set_location(&mut self, path: &str);

    /// Youngest revision.
    fn latest_revision(&self) -> Result<u64, RepositoryError>;

    /// Node metadata, or `None` if nothing exists at `path`.
    fn stat(&self, path: &str, rev: Option<u64>) -> Result<Option<StatEntry>, RepositoryError>;

    /// Lists a directory.
    fn get_dir(
        &self,
        path: &str,
        rev: Option<u64>,
        want_props: bool,
        fields: &[DirentField],
    ) -> Result<DirListing, RepositoryError>;

    /// Reads a file.
    fn get_file(
        &self,
        path: &str,
        rev: Option<u64>,
        want_props: bool,
    ) -> Result<FileContents, RepositoryError>;

    /// Locks `path` for `owner`, the authenticated user if any.
    fn lock(
        &mut self,
        path: &str,
        owner: Option<&str>,
        comment: Option<&str>,
        steal: bool,
        current_rev: Option<u64>,
    ) -> Result<LockDesc, RepositoryError>;

    /// Releases the lock on `path`.
    fn unlock(
        &mut self,
        path: &str,
        token: Option<&str>,
        break_lock: bool,
    ) -> Result<(), RepositoryError>;

    /// The lock on `path`, if any.
    fn get_lock(&self, path: &str) -> Result<Option<LockDesc>, RepositoryError>;

    /// Locks on or below `path`.
    fn get_locks(&self, path: &str, depth: Depth) -> Result<Vec<LockDesc>, RepositoryError>;

    /// All properties of revision `rev`.
    fn rev_proplist(&self, rev: u64) -> Result<PropertyList, RepositoryError>;

    /// One property of revision `rev`.
    fn rev_prop(&self, rev: u64, name: &str) -> Result<Option<Vec<u8>>, RepositoryError> {
        Ok(self.rev_proplist(rev)?.remove(name))
    }

    /// Sets or deletes a revision property.
    fn change_rev_prop(
        &mut self,
        rev: u64,
        name: &str,
        value: Option<&[u8]>,
    ) -> Result<(), RepositoryError>;

    /// Creates a new revision from a client's editor drive.
    fn commit(&mut self, request: CommitRequest) -> Result<CommitInfo, RepositoryError>;

    /// History entries, in the order they should be sent.
    fn log(&self, request: &LogRequest) -> Result<Vec<LogEntry>, RepositoryError>;

    /// Changes that bring the reported working copy to the requested state.
    fn update(
        &self,
        request: &TreeDeltaRequest,
        report: &[ReportEntry],
    ) -> Result<EditorScript, RepositoryError>;

    /// Like [`Repository::update`], towards `request.switch_path`.
    fn switch(
        &self,
        request: &TreeDeltaRequest,
        report: &[ReportEntry],
    ) -> Result<EditorScript, RepositoryError>;

    /// Local changes between the reported working copy and the repository.
    fn status(
        &self,
        request: &TreeDeltaRequest,
        report: &[ReportEntry],
    ) -> Result<EditorScript, RepositoryError>;

    /// Revisions of one file between `start` and `end`, oldest first.
    fn get_file_revs(
        &self,
        path: &str,
        start: Option<u64>,
        end: Option<u64>,
        include_merged_revisions: bool,
    ) -> Result<Vec<FileRevision>, RepositoryError>;

    /// Where the node at `path@peg_rev` lived in each of `revs`.
    fn get_locations(
        &self,
        path: &str,
        peg_rev: u64,
        revs: &[u64],
    ) -> Result<Vec<LocationEntry>, RepositoryError>;

    /// Called once when the session ends.
    fn close(&mut self) {}
}

/// Opens repositories for new sessions.
pub trait RepositoryFactory: Send + Sync {
    /// Opens the repository containing `path` (the path of the client's URL)
    /// on behalf of `identity`.
    ///
    /// The returned handle's [`Repository::root_path`] must be a prefix of
    /// `path`; the rest becomes the initial location.
    fn open(
        &self,
        identity: Option<&str>,
        path: &str,
    ) -> Result<Box<dyn Repository>, RepositoryError>;
}
