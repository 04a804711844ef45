//! Well-known property names and their classification.
//!
//! Every name in [`PropKey::ALL`] belongs to exactly one [`PropClass`]; any
//! other name is [`PropClass::Custom`].

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Property class.
pub enum PropClass {
    /// Versioned node properties (`svn:mime-type`, `svn:ignore`, ...).
    Versioned,
    /// Revision properties (`svn:author`, `svn:date`, `svn:log`, ...).
    Revision,
    /// Sync bookkeeping kept on revision 0 (`svn:sync-*`).
    RevisionZero,
    /// Server-maintained entry metadata (`svn:entry:*`). Clients may not set these.
    Entry,
    /// Anything not in the table.
    Custom,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
/// A well-known property name.
pub enum PropKey {
    /// `svn:mime-type`
    MimeType,
    /// `svn:ignore`
    Ignore,
    /// `svn:eol-style`
    EolStyle,
    /// `svn:keywords`
    Keywords,
    /// `svn:executable`
    Executable,
    /// `svn:needs-lock`
    NeedsLock,
    /// `svn:special`, set on symlinks.
    Special,
    /// `svn:externals`
    Externals,
    /// `svn:mergeinfo`
    MergeInfo,
    /// `svn:global-ignores`, inherited by descendants.
    GlobalIgnores,
    /// `svn:auto-props`, inherited by descendants.
    AutoProps,

    /// `svn:author` revision property.
    Author,
    /// `svn:date` revision property.
    Date,
    /// `svn:log` revision property.
    Log,
    /// `svn:autoversioned` revision property.
    Autoversioned,
    /// `svn:txn-client-compat-version`, transaction only.
    TxnClientCompatVersion,
    /// `svn:txn-user-agent`, transaction only.
    TxnUserAgent,

    /// `svn:sync-lock`, held by svnsync on revision 0.
    SyncLock,
    /// `svn:sync-from-url`
    SyncFromUrl,
    /// `svn:sync-from-uuid`
    SyncFromUuid,
    /// `svn:sync-last-merged-rev`
    SyncLastMergedRev,
    /// `svn:sync-currently-copying`
    SyncCurrentlyCopying,

    /// `svn:entry:committed-rev`, sent by the server.
    EntryCommittedRev,
    /// `svn:entry:committed-date`, sent by the server.
    EntryCommittedDate,
    /// `svn:entry:last-author`, sent by the server.
    EntryLastAuthor,
    /// `svn:entry:uuid`, sent by the server.
    EntryUuid,
    /// `svn:entry:lock-token`
    EntryLockToken,
    /// `svn:entry:checksum`
    EntryChecksum,
}

impl PropKey {
    /// Every well-known key.
    pub const ALL: [PropKey; 28] = [
        Self::MimeType,
        Self::Ignore,
        Self::EolStyle,
        Self::Keywords,
        Self::Executable,
        Self::NeedsLock,
        Self::Special,
        Self::Externals,
        Self::MergeInfo,
        Self::GlobalIgnores,
        Self::AutoProps,
        Self::Author,
        Self::Date,
        Self::Log,
        Self::Autoversioned,
        Self::TxnClientCompatVersion,
        Self::TxnUserAgent,
        Self::SyncLock,
        Self::SyncFromUrl,
        Self::SyncFromUuid,
        Self::SyncLastMergedRev,
        Self::SyncCurrentlyCopying,
        Self::EntryCommittedRev,
        Self::EntryCommittedDate,
        Self::EntryLastAuthor,
        Self::EntryUuid,
        Self::EntryLockToken,
        Self::EntryChecksum,
    ];

    /// The property name.
    pub fn name(self) -> &'static str {
        match self {
            Self::MimeType => "svn:mime-type",
            Self::Ignore => "svn:ignore",
            Self::EolStyle => "svn:eol-style",
            Self::Keywords => "svn:keywords",
            Self::Executable => "svn:executable",
            Self::NeedsLock => "svn:needs-lock",
            Self::Special => "svn:special",
            Self::Externals => "svn:externals",
            Self::MergeInfo => "svn:mergeinfo",
            Self::GlobalIgnores => "svn:global-ignores",
            Self::AutoProps => "svn:auto-props",
            Self::Author => "svn:author",
            Self::Date => "svn:date",
            Self::Log => "svn:log",
            Self::Autoversioned => "svn:autoversioned",
            Self::TxnClientCompatVersion => "svn:txn-client-compat-version",
            Self::TxnUserAgent => "svn:txn-user-agent",
            Self::SyncLock => "svn:sync-lock",
            Self::SyncFromUrl => "svn:sync-from-url",
            Self::SyncFromUuid => "svn:sync-from-uuid",
            Self::SyncLastMergedRev => "svn:sync-last-merged-rev",
            Self::SyncCurrentlyCopying => "svn:sync-currently-copying",
            Self::EntryCommittedRev => "svn:entry:committed-rev",
            Self::EntryCommittedDate => "svn:entry:committed-date",
            Self::EntryLastAuthor => "svn:entry:last-author",
            Self::EntryUuid => "svn:entry:uuid",
            Self::EntryLockToken => "svn:entry:lock-token",
            Self::EntryChecksum => "svn:entry:checksum",
        }
    }

    /// The class this key belongs to.
    pub fn class(self) -> PropClass {
        match self {
            Self::MimeType
            | Self::Ignore
            | Self::EolStyle
            | Self::Keywords
            | Self::Executable
            | Self::NeedsLock
            | Self::Special
            | Self::Externals
            | Self::MergeInfo
            | Self::GlobalIgnores
            | Self::AutoProps => PropClass::Versioned,
            Self::Author
            | Self::Date
            | Self::Log
            | Self::Autoversioned
            | Self::TxnClientCompatVersion
            | Self::TxnUserAgent => PropClass::Revision,
            Self::SyncLock
            | Self::SyncFromUrl
            | Self::SyncFromUuid
            | Self::SyncLastMergedRev
            | Self::SyncCurrentlyCopying => PropClass::RevisionZero,
            Self::EntryCommittedRev
            | Self::EntryCommittedDate
            | Self::EntryLastAuthor
            | Self::EntryUuid
            | Self::EntryLockToken
            | Self::EntryChecksum => PropClass::Entry,
        }
    }

    /// Looks up a key by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }
}

/// Classifies a property name.
pub fn classify(name: &str) -> PropClass {
    PropKey::from_name(name).map_or(PropClass::Custom, PropKey::class)
}

/// Returns `true` if `name` is syntactically a valid property name.
///
/// The first character must be an ASCII letter, `_` or `:`; the rest may
/// also contain digits, `-` and `.`.
pub fn is_valid_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == b'_' || first == b':') {
        return false;
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b':' | b'_'))
}

/// Returns `true` if a client may set `name` on a node or revision.
pub(crate) fn client_may_set(name: &str) -> bool {
    is_valid_name(name)
        && classify(name) != PropClass::Entry
        && !name.starts_with("svn:entry:")
}
