use std::borrow::Cow;
use std::fmt::{Display, Formatter};

use super::wire::WireEncoder;

/// Words the protocol uses as keywords. Reading a word from the wire resolves
/// it against this table so the common case does not allocate; other words
/// are kept verbatim.
const KEYWORDS: &[&str] = &[
    "true",
    "false",
    "success",
    "failure",
    "step",
    "done",
    // node kinds
    "none",
    "file",
    "dir",
    "unknown",
    // depths
    "exclude",
    "empty",
    "files",
    "immediates",
    "infinity",
    // changed-path actions
    "A",
    "D",
    "M",
    "R",
    // log revprops selectors
    "all-revprops",
    "revprops",
    // capabilities
    "edit-pipeline",
    "svndiff1",
    "accepts-svndiff2",
    "absent-entries",
    "commit-revprops",
    "depth",
    "log-revprops",
    "mergeinfo",
    "atomic-revprops",
    "partial-replay",
    "inherited-props",
    "ephemeral-txnprops",
    "file-revs-reverse",
    "list",
    // commands
    "reparent",
    "get-latest-rev",
    "get-dated-rev",
    "change-rev-prop",
    "change-rev-prop2",
    "rev-proplist",
    "rev-prop",
    "commit",
    "get-file",
    "get-dir",
    "check-path",
    "stat",
    "update",
    "switch",
    "status",
    "diff",
    "log",
    "get-locations",
    "get-location-segments",
    "get-file-revs",
    "lock",
    "lock-many",
    "unlock",
    "unlock-many",
    "get-lock",
    "get-locks",
    "replay",
    "replay-range",
    "get-deleted-rev",
    "get-iprops",
    "get-mergeinfo",
    // editor
    "target-rev",
    "open-root",
    "delete-entry",
    "add-dir",
    "open-dir",
    "change-dir-prop",
    "close-dir",
    "absent-dir",
    "add-file",
    "open-file",
    "apply-textdelta",
    "textdelta-chunk",
    "textdelta-end",
    "change-file-prop",
    "close-file",
    "absent-file",
    "close-edit",
    "abort-edit",
    "finish-replay",
    // report
    "set-path",
    "delete-path",
    "link-path",
    "finish-report",
    "abort-report",
    // auth mechanisms
    "ANONYMOUS",
    "PLAIN",
    "CRAM-MD5",
    "DIGEST-MD5",
    "EXTERNAL",
];

/// Resolves `word` against the keyword table.
pub(crate) fn intern_word(word: &str) -> Cow<'static, str> {
    match KEYWORDS.iter().find(|kw| **kw == word) {
        Some(kw) => Cow::Borrowed(kw),
        None => Cow::Owned(word.to_string()),
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// A raw `ra_svn` wire protocol element.
///
/// Booleans travel as the words `true` and `false`; see [`SvnItem::bool`] and
/// [`SvnItem::as_bool`].
pub enum SvnItem {
    /// A protocol word token.
    Word(Cow<'static, str>),
    /// A protocol number token.
    Number(u64),
    /// A protocol string token (raw bytes; may not be valid UTF-8).
    String(Vec<u8>),
    /// A protocol list token.
    List(Vec<SvnItem>),
}

impl SvnItem {
    /// A word element, interned when it is a known keyword.
    pub fn word(word: &str) -> Self {
        SvnItem::Word(intern_word(word))
    }

    /// The word `true` or `false`.
    pub fn bool(b: bool) -> Self {
        SvnItem::Word(Cow::Borrowed(if b { "true" } else { "false" }))
    }

    /// A string element.
    pub fn string(bytes: impl Into<Vec<u8>>) -> Self {
        SvnItem::String(bytes.into())
    }

    /// A list containing `item` if present, `( )` otherwise.
    pub fn optional(item: Option<SvnItem>) -> Self {
        SvnItem::List(item.into_iter().collect())
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            SvnItem::Word(_) => "word",
            SvnItem::Number(_) => "number",
            SvnItem::String(_) => "string",
            SvnItem::List(_) => "list",
        }
    }

    /// Returns this item as a word, if it is a word.
    pub fn as_word(&self) -> Option<&str> {
        match self {
            SvnItem::Word(s) => Some(s),
            _ => None,
        }
    }

    /// Returns this item as a `u64`, if it is a number.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SvnItem::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns this item as a `bool`, if it is the word `true` or `false`.
    pub fn as_bool(&self) -> Option<bool> {
        match self.as_word()? {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    /// Returns this item as a UTF-8 string, if it is a `string` and is valid UTF-8.
    pub fn as_string(&self) -> Option<String> {
        match self {
            SvnItem::String(bytes) => String::from_utf8(bytes.clone()).ok(),
            _ => None,
        }
    }

    /// Returns this item as raw bytes, if it is a `string`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SvnItem::String(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns this item as a list, if it is a `list`.
    pub fn as_list(&self) -> Option<&[SvnItem]> {
        match self {
            SvnItem::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<u64> for SvnItem {
    fn from(n: u64) -> Self {
        SvnItem::Number(n)
    }
}

impl From<&str> for SvnItem {
    fn from(s: &str) -> Self {
        SvnItem::String(s.as_bytes().to_vec())
    }
}

impl From<String> for SvnItem {
    fn from(s: String) -> Self {
        SvnItem::String(s.into_bytes())
    }
}

impl From<Vec<SvnItem>> for SvnItem {
    fn from(items: Vec<SvnItem>) -> Self {
        SvnItem::List(items)
    }
}

/// Renders the item in wire order with string payloads elided, for logs.
impl Display for SvnItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SvnItem::Word(w) => f.write_str(w),
            SvnItem::Number(n) => write!(f, "{n}"),
            SvnItem::String(s) => write!(f, "{}:..", s.len()),
            SvnItem::List(items) => {
                f.write_str("(")?;
                for item in items {
                    write!(f, " {item}")?;
                }
                f.write_str(" )")
            }
        }
    }
}

/// Appends the wire form of `item` (no trailing newline).
pub(crate) fn encode_item(item: &SvnItem, out: &mut Vec<u8>) {
    fn walk(enc: &mut WireEncoder<'_>, item: &SvnItem) {
        match item {
            SvnItem::List(items) => {
                enc.list_start();
                items.iter().for_each(|child| walk(enc, child));
                enc.list_end();
            }
            SvnItem::String(bytes) => enc.string_bytes(bytes),
            SvnItem::Number(n) => enc.number(*n),
            SvnItem::Word(w) => enc.word(w),
        }
    }
    walk(&mut WireEncoder::new(out), item);
}
