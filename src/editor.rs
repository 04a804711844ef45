//! Types for report and editor flows.
//!
//! An editor describes a tree change as a flat pre-order stream: every node
//! is opened under its parent directory's token and closed before anything
//! outside that directory is touched. [`EditorScript`] holds the nodes a
//! backend wants to send; [`EditorSerializer`] turns it into that stream.
//! [`CommitEdit`] is the mirror image: what a client sent during `commit`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque, btree_map};
use std::io::{Read, Seek, SeekFrom};

use tempfile::SpooledTempFile;

use crate::delta::{DeltaCodec, md5_hex};
use crate::path::{compare_paths, fs_path, parent_of, skip_ancestor, validate_rel_dir_path};
use crate::{CapabilitySet, Depth, NodeKind, PropKey, PropertyChanges, ServerError, SvnError};

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// Client-to-server report commands sent before `update`/`switch`/`status`.
pub enum ReportEntry {
    /// The working copy has `path` at `rev`.
    SetPath {
        /// Path relative to the operation's anchor.
        path: String,
        /// Revision of the working copy node.
        rev: u64,
        /// Whether the node starts out empty (its children are not present).
        start_empty: bool,
        /// Lock token held for the path.
        lock_token: Option<String>,
        /// Depth of the working copy node.
        depth: Depth,
    },
    /// The path is missing from the working copy.
    DeletePath {
        /// Path relative to the operation's anchor.
        path: String,
    },
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// One command of the editor vocabulary.
///
/// Tokens are the short identifiers a party assigns to open directories and
/// files for the duration of one edit.
pub enum EditorCommand {
    /// Announces the revision the edit brings the client to.
    TargetRev {
        /// Target revision number.
        rev: u64,
    },
    /// Opens the root directory.
    OpenRoot {
        /// Optional base revision.
        rev: Option<u64>,
        /// Root token.
        token: String,
    },
    /// Deletes an entry.
    DeleteEntry {
        /// Repository-relative path.
        path: String,
        /// Revision number.
        rev: Option<u64>,
        /// Directory token.
        dir_token: String,
    },
    /// Adds a directory.
    AddDir {
        /// Repository-relative path.
        path: String,
        /// Parent directory token.
        parent_token: String,
        /// Child directory token.
        child_token: String,
        /// Optional copy source `(url or path, rev)`.
        copy_from: Option<(String, u64)>,
    },
    /// Opens an existing directory.
    OpenDir {
        /// Repository-relative path.
        path: String,
        /// Parent directory token.
        parent_token: String,
        /// Child directory token.
        child_token: String,
        /// Base revision.
        rev: Option<u64>,
    },
    /// Changes a directory property.
    ChangeDirProp {
        /// Directory token.
        dir_token: String,
        /// Property name.
        name: String,
        /// Property value (raw bytes), or `None` to delete.
        value: Option<Vec<u8>>,
    },
    /// Closes a directory.
    CloseDir {
        /// Directory token.
        dir_token: String,
    },
    /// Adds a file.
    AddFile {
        /// Repository-relative path.
        path: String,
        /// Directory token.
        dir_token: String,
        /// File token.
        file_token: String,
        /// Optional copy source `(url or path, rev)`.
        copy_from: Option<(String, u64)>,
    },
    /// Opens an existing file.
    OpenFile {
        /// Repository-relative path.
        path: String,
        /// Directory token.
        dir_token: String,
        /// File token.
        file_token: String,
        /// Base revision.
        rev: Option<u64>,
    },
    /// Begins a text delta stream for a file.
    ApplyTextDelta {
        /// File token.
        file_token: String,
        /// Optional base checksum.
        base_checksum: Option<String>,
    },
    /// A single delta chunk.
    TextDeltaChunk {
        /// File token.
        file_token: String,
        /// Raw delta chunk.
        chunk: Vec<u8>,
    },
    /// Marks the end of the delta stream.
    TextDeltaEnd {
        /// File token.
        file_token: String,
    },
    /// Changes a file property.
    ChangeFileProp {
        /// File token.
        file_token: String,
        /// Property name.
        name: String,
        /// Property value (raw bytes), or `None` to delete.
        value: Option<Vec<u8>>,
    },
    /// Closes a file.
    CloseFile {
        /// File token.
        file_token: String,
        /// Optional MD5 of the resulting text.
        text_checksum: Option<String>,
    },
    /// Closes the edit successfully.
    CloseEdit,
    /// Aborts the edit.
    AbortEdit,
}

impl EditorCommand {
    /// The command word.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TargetRev { .. } => "target-rev",
            Self::OpenRoot { .. } => "open-root",
            Self::DeleteEntry { .. } => "delete-entry",
            Self::AddDir { .. } => "add-dir",
            Self::OpenDir { .. } => "open-dir",
            Self::ChangeDirProp { .. } => "change-dir-prop",
            Self::CloseDir { .. } => "close-dir",
            Self::AddFile { .. } => "add-file",
            Self::OpenFile { .. } => "open-file",
            Self::ApplyTextDelta { .. } => "apply-textdelta",
            Self::TextDeltaChunk { .. } => "textdelta-chunk",
            Self::TextDeltaEnd { .. } => "textdelta-end",
            Self::ChangeFileProp { .. } => "change-file-prop",
            Self::CloseFile { .. } => "close-file",
            Self::CloseEdit => "close-edit",
            Self::AbortEdit => "abort-edit",
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// What an editor does with a node.
pub enum NodeAction {
    /// The node is new (`add-dir` / `add-file`).
    Add,
    /// The node exists and is modified (`open-dir` / `open-file`).
    Open,
    /// The node is removed (`delete-entry`).
    Delete,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// One node of an [`EditorScript`].
pub struct DeltaNode {
    /// [`NodeKind::Dir`] or [`NodeKind::File`].
    pub kind: NodeKind,
    /// What happens to the node.
    pub action: NodeAction,
    /// Base revision for opens and deletes.
    pub base_rev: Option<u64>,
    /// Copy source (repository-relative path, revision) for adds.
    pub copy_from: Option<(String, u64)>,
    /// Last changed revision, sent as `svn:entry:committed-rev`.
    pub committed_rev: Option<u64>,
    /// Last changed date, sent as `svn:entry:committed-date`.
    pub committed_date: Option<String>,
    /// Last changed author, sent as `svn:entry:last-author`.
    pub last_author: Option<String>,
    /// Property changes; `None` deletes.
    pub props: PropertyChanges,
    /// Full new text of a file, if it changed.
    pub content: Option<Vec<u8>>,
}

impl DeltaNode {
    fn new(kind: NodeKind, action: NodeAction, base_rev: Option<u64>) -> Self {
        Self {
            kind,
            action,
            base_rev,
            copy_from: None,
            committed_rev: None,
            committed_date: None,
            last_author: None,
            props: PropertyChanges::new(),
            content: None,
        }
    }

    /// A new directory.
    pub fn add_dir() -> Self {
        Self::new(NodeKind::Dir, NodeAction::Add, None)
    }

    /// An existing directory at `base_rev`.
    pub fn open_dir(base_rev: Option<u64>) -> Self {
        Self::new(NodeKind::Dir, NodeAction::Open, base_rev)
    }

    /// A new file with `content`.
    pub fn add_file(content: Vec<u8>) -> Self {
        let mut node = Self::new(NodeKind::File, NodeAction::Add, None);
        node.content = Some(content);
        node
    }

    /// An existing file at `base_rev`; `content` is the new text, if changed.
    pub fn open_file(base_rev: Option<u64>, content: Option<Vec<u8>>) -> Self {
        let mut node = Self::new(NodeKind::File, NodeAction::Open, base_rev);
        node.content = content;
        node
    }

    /// A removed node.
    pub fn delete(kind: NodeKind, base_rev: Option<u64>) -> Self {
        Self::new(kind, NodeAction::Delete, base_rev)
    }

    /// Sets a property change.
    #[must_use]
    pub fn with_prop(mut self, name: impl Into<String>, value: Option<Vec<u8>>) -> Self {
        self.props.insert(name.into(), value);
        self
    }

    /// Sets the committed-state metadata sent as entry props.
    #[must_use]
    pub fn with_committed(
        mut self,
        rev: Option<u64>,
        date: Option<String>,
        author: Option<String>,
    ) -> Self {
        self.committed_rev = rev;
        self.committed_date = date;
        self.last_author = author;
        self
    }

    /// Sets the copy source.
    #[must_use]
    pub fn with_copy_from(mut self, path: impl Into<String>, rev: u64) -> Self {
        self.copy_from = Some((path.into(), rev));
        self
    }
}

/// Path key that orders parents directly before their descendants.
#[derive(Clone, Debug, PartialEq, Eq)]
struct EditPath(String);

impl Ord for EditPath {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_paths(&self.0, &other.0)
    }
}

impl PartialOrd for EditPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Nodes a backend wants to send to a client, keyed by path.
///
/// Paths are relative to the edit's anchor; `""` is the anchor itself and is
/// sent as `open-root`. Missing ancestors are opened implicitly.
pub struct EditorScript {
    target_rev: u64,
    nodes: BTreeMap<EditPath, DeltaNode>,
}

impl EditorScript {
    /// An empty script for `target_rev`.
    pub fn new(target_rev: u64) -> Self {
        Self {
            target_rev,
            nodes: BTreeMap::new(),
        }
    }

    /// Revision announced by `target-rev`.
    pub fn target_rev(&self) -> u64 {
        self.target_rev
    }

    /// Adds or replaces the node at `path`.
    pub fn insert(&mut self, path: &str, node: DeltaNode) -> Result<(), SvnError> {
        let path = validate_rel_dir_path(path)?;
        self.nodes.insert(EditPath(path), node);
        Ok(())
    }

    /// Builder form of [`EditorScript::insert`].
    pub fn with_node(mut self, path: &str, node: DeltaNode) -> Result<Self, SvnError> {
        self.insert(path, node)?;
        Ok(self)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the script touches nothing.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in send order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeltaNode)> {
        self.nodes.iter().map(|(path, node)| (path.0.as_str(), node))
    }
}

/// Environment the serializer needs besides the script.
#[derive(Clone, Copy)]
pub(crate) struct SerializeContext<'a> {
    pub(crate) uuid: &'a str,
    /// Copy sources are announced as URLs below this root.
    pub(crate) root_url: &'a str,
    pub(crate) codec: &'a dyn DeltaCodec,
    pub(crate) peer: &'a CapabilitySet,
}

struct OpenDir {
    path: String,
    token: String,
}

/// Turns an [`EditorScript`] into editor commands.
///
/// Directories stay on a stack of `(path, token)` until a node outside them
/// comes up; files are closed right after their content. The sequence
/// always starts with `target-rev` and ends with `close-edit`.
pub(crate) struct EditorSerializer<'a> {
    ctx: SerializeContext<'a>,
    target_rev: u64,
    nodes: btree_map::IntoIter<EditPath, DeltaNode>,
    stack: Vec<OpenDir>,
    pending: VecDeque<EditorCommand>,
    next_dir: u64,
    next_file: u64,
    started: bool,
    finished: bool,
}

impl<'a> EditorSerializer<'a> {
    pub(crate) fn new(script: EditorScript, ctx: SerializeContext<'a>) -> Self {
        Self {
            ctx,
            target_rev: script.target_rev,
            nodes: script.nodes.into_iter(),
            stack: Vec::new(),
            pending: VecDeque::new(),
            next_dir: 0,
            next_file: 0,
            started: false,
            finished: false,
        }
    }

    fn dir_token(&mut self) -> String {
        let token = format!("d{}", self.next_dir);
        self.next_dir += 1;
        token
    }

    fn file_token(&mut self) -> String {
        let token = format!("f{}", self.next_file);
        self.next_file += 1;
        token
    }

    fn close_top(&mut self) {
        if let Some(dir) = self.stack.pop() {
            self.pending
                .push_back(EditorCommand::CloseDir { dir_token: dir.token });
        }
    }

    fn open_root(&mut self, rev: Option<u64>) -> String {
        let token = self.dir_token();
        self.pending.push_back(EditorCommand::OpenRoot {
            rev,
            token: token.clone(),
        });
        self.stack.push(OpenDir {
            path: String::new(),
            token: token.clone(),
        });
        token
    }

    /// Closes directories until the top is `parent`, opening any ancestors
    /// the script left out. Returns the parent's token.
    fn descend_to(&mut self, parent: &str) -> String {
        if self.stack.is_empty() {
            self.open_root(None);
        }
        while let Some(top) = self.stack.last() {
            if skip_ancestor(&top.path, parent).is_some() {
                break;
            }
            self.close_top();
        }
        loop {
            let Some(top) = self.stack.last() else {
                return self.open_root(None);
            };
            if top.path == parent {
                return top.token.clone();
            }
            let parent_token = top.token.clone();
            let rest = skip_ancestor(&top.path, parent).unwrap_or(parent);
            let next = rest.split('/').next().unwrap_or(rest);
            let path = crate::path::join(&top.path, next);
            let token = self.dir_token();
            self.pending.push_back(EditorCommand::OpenDir {
                path: path.clone(),
                parent_token,
                child_token: token.clone(),
                rev: None,
            });
            self.stack.push(OpenDir { path, token });
        }
    }

    fn queue_props(&mut self, token: &str, kind: NodeKind, node: &DeltaNode) {
        let mut props: Vec<(String, Option<Vec<u8>>)> = Vec::new();
        if let Some(rev) = node.committed_rev {
            props.push((
                PropKey::EntryCommittedRev.name().to_string(),
                Some(rev.to_string().into_bytes()),
            ));
        }
        if let Some(date) = &node.committed_date {
            props.push((
                PropKey::EntryCommittedDate.name().to_string(),
                Some(date.clone().into_bytes()),
            ));
        }
        if node.committed_rev.is_some()
            || node.committed_date.is_some()
            || node.last_author.is_some()
        {
            props.push((
                PropKey::EntryUuid.name().to_string(),
                Some(self.ctx.uuid.as_bytes().to_vec()),
            ));
        }
        if let Some(author) = &node.last_author {
            props.push((
                PropKey::EntryLastAuthor.name().to_string(),
                Some(author.clone().into_bytes()),
            ));
        }
        props.extend(node.props.iter().map(|(k, v)| (k.clone(), v.clone())));

        for (name, value) in props {
            let cmd = match kind {
                NodeKind::File => EditorCommand::ChangeFileProp {
                    file_token: token.to_string(),
                    name,
                    value,
                },
                _ => EditorCommand::ChangeDirProp {
                    dir_token: token.to_string(),
                    name,
                    value,
                },
            };
            self.pending.push_back(cmd);
        }
    }

    fn copy_from_url(&self, copy_from: Option<(String, u64)>) -> Option<(String, u64)> {
        copy_from.map(|(path, rev)| {
            let root = self.ctx.root_url.trim_end_matches('/');
            (format!("{root}{}", fs_path(&path)), rev)
        })
    }

    fn expand(&mut self, path: String, node: DeltaNode) -> Result<(), ServerError> {
        if path.is_empty() {
            if !self.stack.is_empty() {
                return Err(ServerError::malformed("root node must come first"));
            }
            let token = self.open_root(node.base_rev);
            self.queue_props(&token, NodeKind::Dir, &node);
            return Ok(());
        }

        let parent = parent_of(&path).unwrap_or("");
        let parent_token = self.descend_to(parent);
        let copy_from = self.copy_from_url(node.copy_from.clone());

        match (node.action, node.kind) {
            (NodeAction::Delete, _) => {
                self.pending.push_back(EditorCommand::DeleteEntry {
                    path,
                    rev: node.base_rev,
                    dir_token: parent_token,
                });
            }
            (action, NodeKind::Dir) => {
                let token = self.dir_token();
                self.pending.push_back(if action == NodeAction::Add {
                    EditorCommand::AddDir {
                        path: path.clone(),
                        parent_token,
                        child_token: token.clone(),
                        copy_from,
                    }
                } else {
                    EditorCommand::OpenDir {
                        path: path.clone(),
                        parent_token,
                        child_token: token.clone(),
                        rev: node.base_rev,
                    }
                });
                self.queue_props(&token, NodeKind::Dir, &node);
                self.stack.push(OpenDir { path, token });
            }
            (action, NodeKind::File) => {
                let token = self.file_token();
                self.pending.push_back(if action == NodeAction::Add {
                    EditorCommand::AddFile {
                        path,
                        dir_token: parent_token,
                        file_token: token.clone(),
                        copy_from,
                    }
                } else {
                    EditorCommand::OpenFile {
                        path,
                        dir_token: parent_token,
                        file_token: token.clone(),
                        rev: node.base_rev,
                    }
                });
                self.queue_props(&token, NodeKind::File, &node);
                let mut text_checksum = None;
                if let Some(content) = &node.content {
                    let chunks = self.ctx.codec.encode_fulltext(content, self.ctx.peer)?;
                    self.pending.push_back(EditorCommand::ApplyTextDelta {
                        file_token: token.clone(),
                        base_checksum: None,
                    });
                    for chunk in chunks {
                        self.pending.push_back(EditorCommand::TextDeltaChunk {
                            file_token: token.clone(),
                            chunk,
                        });
                    }
                    self.pending.push_back(EditorCommand::TextDeltaEnd {
                        file_token: token.clone(),
                    });
                    text_checksum = Some(md5_hex(content));
                }
                self.pending.push_back(EditorCommand::CloseFile {
                    file_token: token,
                    text_checksum,
                });
            }
            (_, kind) => {
                return Err(ServerError::malformed(format!(
                    "cannot send a node of kind {kind}"
                )));
            }
        }
        Ok(())
    }
}

impl Iterator for EditorSerializer<'_> {
    type Item = Result<EditorCommand, ServerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(cmd) = self.pending.pop_front() {
                return Some(Ok(cmd));
            }
            if self.finished {
                return None;
            }
            if !self.started {
                self.started = true;
                self.pending.push_back(EditorCommand::TargetRev {
                    rev: self.target_rev,
                });
                continue;
            }
            match self.nodes.next() {
                Some((EditPath(path), node)) => {
                    if let Err(err) = self.expand(path, node) {
                        self.finished = true;
                        self.pending.clear();
                        return Some(Err(err));
                    }
                }
                None => {
                    while !self.stack.is_empty() {
                        self.close_top();
                    }
                    self.pending.push_back(EditorCommand::CloseEdit);
                    self.finished = true;
                }
            }
        }
    }
}

/// Text of a file received during a commit.
///
/// Held in a [`SpooledTempFile`]: small texts stay in memory, larger ones
/// spill to an anonymous temporary file that is removed on drop.
pub struct FileContent {
    data: SpooledTempFile,
    len: u64,
    md5: String,
}

impl FileContent {
    pub(crate) fn new(mut data: SpooledTempFile, len: u64, md5: String) -> std::io::Result<Self> {
        data.seek(SeekFrom::Start(0))?;
        Ok(Self { data, len, md5 })
    }

    /// Size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` for an empty text.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hex MD5 of the text.
    pub fn md5(&self) -> &str {
        &self.md5
    }

    /// Moves the read position back to the start.
    pub fn rewind(&mut self) -> std::io::Result<()> {
        self.data.seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Reads the whole text from the start.
    pub fn to_vec(&mut self) -> std::io::Result<Vec<u8>> {
        self.rewind()?;
        let mut out = Vec::with_capacity(usize::try_from(self.len).unwrap_or(0));
        self.data.read_to_end(&mut out)?;
        self.rewind()?;
        Ok(out)
    }
}

impl Read for FileContent {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.data.read(buf)
    }
}

impl std::fmt::Debug for FileContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileContent")
            .field("len", &self.len)
            .field("md5", &self.md5)
            .finish()
    }
}

#[derive(Debug)]
/// A node touched by a client's commit.
pub struct CommitNode {
    /// Repository-relative path.
    pub path: String,
    /// [`NodeKind::Dir`], [`NodeKind::File`], or [`NodeKind::Unknown`] for deletes.
    pub kind: NodeKind,
    /// What the client did.
    pub action: NodeAction,
    /// Base revision the client opened or deleted.
    pub base_rev: Option<u64>,
    /// Copy source as a repository-relative path and revision.
    pub copy_from: Option<(String, u64)>,
    /// Property changes; `None` deletes.
    pub props: PropertyChanges,
    /// New text, if the client sent one.
    pub content: Option<FileContent>,
}

#[derive(Debug, Default)]
/// Everything a client sent in one commit editor drive, in arrival order.
///
/// Dropping it releases any spooled file content.
pub struct CommitEdit {
    nodes: Vec<CommitNode>,
}

impl CommitEdit {
    pub(crate) fn from_nodes(nodes: Vec<CommitNode>) -> Self {
        Self { nodes }
    }

    /// Nodes in the order the client opened them.
    pub fn nodes(&self) -> &[CommitNode] {
        &self.nodes
    }

    /// Mutable access, e.g. to read file content.
    pub fn nodes_mut(&mut self) -> &mut [CommitNode] {
        &mut self.nodes
    }

    /// Consumes the edit.
    pub fn into_nodes(self) -> Vec<CommitNode> {
        self.nodes
    }

    /// The node at `path`, if the client touched it.
    pub fn find(&self, path: &str) -> Option<&CommitNode> {
        self.nodes.iter().find(|node| node.path == path)
    }
}
