//! Data types exchanged between the protocol engine and repository backends.
//!
//! Most of these map one-to-one onto tuples of the `ra_svn` protocol.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

/// Properties as a sorted map of name -> raw value.
pub type PropertyList = BTreeMap<String, Vec<u8>>;

/// Pending property changes; `None` deletes the property.
pub type PropertyChanges = BTreeMap<String, Option<Vec<u8>>>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// Result of a successful commit.
pub struct CommitInfo {
    /// Newly created revision number.
    pub new_rev: u64,
    /// Commit timestamp, if known.
    pub date: Option<String>,
    /// Commit author, if known.
    pub author: Option<String>,
    /// Post-commit hook error, if any.
    pub post_commit_err: Option<String>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// A path location for a revision (from `get-locations`).
pub struct LocationEntry {
    /// Revision number.
    pub rev: u64,
    /// Repository path at that revision (relative, no leading `/`).
    pub path: String,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// A property change entry.
pub struct PropDelta {
    /// Property name.
    pub name: String,
    /// New value, or `None` if the property was removed.
    pub value: Option<Vec<u8>>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// One revision of a file, as streamed by `get-file-revs`.
pub struct FileRevision {
    /// Repository path of the file in this revision (relative).
    pub path: String,
    /// Revision number.
    pub rev: u64,
    /// Revision properties.
    pub rev_props: PropertyList,
    /// File property changes relative to the previous entry.
    pub prop_deltas: Vec<PropDelta>,
    /// Whether this revision was reached through merge history.
    pub merged_revision: bool,
    /// Full file contents in this revision, if the text changed.
    pub contents: Option<Vec<u8>>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// A lock description.
pub struct LockDesc {
    /// Repository path (relative, no leading `/`).
    pub path: String,
    /// Lock token.
    pub token: String,
    /// Lock owner.
    pub owner: String,
    /// Optional lock comment.
    pub comment: Option<String>,
    /// Creation timestamp.
    pub created: String,
    /// Expiration timestamp, if any.
    pub expires: Option<String>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// What happened to a path in a revision.
pub enum ChangeAction {
    /// `A`
    Added,
    /// `D`
    Deleted,
    /// `M`
    Modified,
    /// `R`: deleted and re-added in the same revision.
    Replaced,
}

impl ChangeAction {
    pub(crate) fn as_word(self) -> &'static str {
        match self {
            Self::Added => "A",
            Self::Deleted => "D",
            Self::Modified => "M",
            Self::Replaced => "R",
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// A changed-path record of a log entry.
pub struct ChangedPath {
    /// Action.
    pub action: ChangeAction,
    /// Repository path (relative, no leading `/`).
    pub path: String,
    /// Copy source path and revision, for copies.
    pub copy_from: Option<(String, u64)>,
    /// Node kind, if known.
    pub node_kind: Option<NodeKind>,
    /// Whether text was modified, if known.
    pub text_mods: Option<bool>,
    /// Whether properties were modified, if known.
    pub prop_mods: Option<bool>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// One revision of history.
pub struct LogEntry {
    /// Revision number.
    pub rev: u64,
    /// Changed paths (only sent when requested).
    pub changed_paths: Vec<ChangedPath>,
    /// `svn:author`.
    pub author: Option<String>,
    /// `svn:date`.
    pub date: Option<String>,
    /// `svn:log`.
    pub message: Option<String>,
    /// Other revision properties.
    pub rev_props: PropertyList,
    /// Whether merged revisions follow this entry.
    pub has_children: bool,
    /// Whether this entry reverses a merge.
    pub subtractive_merge: bool,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// Node kind.
pub enum NodeKind {
    /// The path does not exist.
    None,
    /// A file.
    File,
    /// A directory.
    Dir,
    /// Unknown kind.
    Unknown,
}

impl NodeKind {
    pub(crate) fn from_word(word: &str) -> Self {
        match word {
            "none" => Self::None,
            "file" => Self::File,
            "dir" => Self::Dir,
            _ => Self::Unknown,
        }
    }

    /// Returns the protocol word for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::File => "file",
            Self::Dir => "dir",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// Node metadata as returned by `stat`.
pub struct StatEntry {
    /// Node kind.
    pub kind: NodeKind,
    /// File size in bytes (0 for directories).
    pub size: u64,
    /// Whether the node has any properties.
    pub has_props: bool,
    /// Last changed revision.
    pub created_rev: Option<u64>,
    /// Last changed date.
    pub created_date: Option<String>,
    /// Last changed author.
    pub last_author: Option<String>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// One entry of a directory listing.
pub struct DirEntry {
    /// Entry name (no `/`).
    pub name: String,
    /// Metadata.
    pub stat: StatEntry,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// A directory at a resolved revision.
pub struct DirListing {
    /// Revision the listing was taken at.
    pub rev: u64,
    /// Directory properties.
    pub props: PropertyList,
    /// Entries, in the order they should be sent.
    pub entries: Vec<DirEntry>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// A file at a resolved revision.
pub struct FileContents {
    /// Revision the contents were read at.
    pub rev: u64,
    /// File properties.
    pub props: PropertyList,
    /// Full text.
    pub contents: Vec<u8>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
/// Depth for operations that recurse into directories.
pub enum Depth {
    /// The path is excluded from the working copy.
    Exclude,
    /// Only the target itself.
    Empty,
    /// Target plus its file children.
    Files,
    /// Target plus its immediate children.
    Immediates,
    /// Full recursion.
    Infinity,
}

impl Depth {
    pub(crate) fn from_word(word: &str) -> Option<Self> {
        match word {
            "exclude" => Some(Self::Exclude),
            "empty" => Some(Self::Empty),
            "files" => Some(Self::Files),
            "immediates" => Some(Self::Immediates),
            "infinity" => Some(Self::Infinity),
            _ => None,
        }
    }

    /// Depth implied by the legacy `recurse` flag.
    pub(crate) fn from_recurse(recurse: bool) -> Self {
        if recurse { Self::Infinity } else { Self::Files }
    }

    /// Returns the protocol word for this depth.
    pub fn as_word(self) -> &'static str {
        match self {
            Self::Exclude => "exclude",
            Self::Empty => "empty",
            Self::Files => "files",
            Self::Immediates => "immediates",
            Self::Infinity => "infinity",
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
/// Directory entry fields a client may request from `get-dir`.
pub enum DirentField {
    /// `kind`
    Kind,
    /// `size`
    Size,
    /// `has-props`
    HasProps,
    /// `created-rev`
    CreatedRev,
    /// `time`
    Time,
    /// `last-author`
    LastAuthor,
}

impl DirentField {
    pub(crate) const ALL: [DirentField; 6] = [
        Self::Kind,
        Self::Size,
        Self::HasProps,
        Self::CreatedRev,
        Self::Time,
        Self::LastAuthor,
    ];

    pub(crate) fn from_word(word: &str) -> Option<Self> {
        match word {
            "kind" => Some(Self::Kind),
            "size" => Some(Self::Size),
            "has-props" => Some(Self::HasProps),
            "created-rev" => Some(Self::CreatedRev),
            "time" => Some(Self::Time),
            "last-author" => Some(Self::LastAuthor),
            _ => None,
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Protocol capabilities known to the server.
pub enum Capability {
    /// `edit-pipeline`
    EditPipeline,
    /// `svndiff1`
    Svndiff1,
    /// `accepts-svndiff2`
    AcceptsSvndiff2,
    /// `absent-entries`
    AbsentEntries,
    /// `commit-revprops`
    CommitRevProps,
    /// `mergeinfo`
    MergeInfo,
    /// `depth`
    Depth,
    /// `atomic-revprops`
    AtomicRevProps,
    /// `log-revprops`
    LogRevProps,
}

impl Capability {
    /// Returns the protocol word for this capability.
    pub fn as_wire_word(self) -> &'static str {
        match self {
            Self::EditPipeline => "edit-pipeline",
            Self::Svndiff1 => "svndiff1",
            Self::AcceptsSvndiff2 => "accepts-svndiff2",
            Self::AbsentEntries => "absent-entries",
            Self::CommitRevProps => "commit-revprops",
            Self::MergeInfo => "mergeinfo",
            Self::Depth => "depth",
            Self::AtomicRevProps => "atomic-revprops",
            Self::LogRevProps => "log-revprops",
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// A set of capability words announced by one side of a connection.
///
/// Built once during the handshake and never changed afterwards.
pub struct CapabilitySet(BTreeSet<String>);

impl CapabilitySet {
    /// Builds a set from raw words.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(words.into_iter().map(Into::into).collect())
    }

    /// Builds a set from known capabilities.
    pub fn from_capabilities(caps: &[Capability]) -> Self {
        Self::from_words(caps.iter().map(|c| c.as_wire_word()))
    }

    /// Returns `true` if `cap` is in the set.
    pub fn has(&self, cap: Capability) -> bool {
        self.0.contains(cap.as_wire_word())
    }

    /// Returns `true` if the raw `word` is in the set.
    pub fn contains_word(&self, word: &str) -> bool {
        self.0.contains(word)
    }

    /// Iterates over the words in sorted order.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}
