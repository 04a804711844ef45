//! Shared fixtures: an in-memory repository and a raw wire client.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use svnserve::raw::SvnItem;
use svnserve::{
    ChangeAction, ChangedPath, CommitInfo, CommitRequest, DeltaNode, Depth, DirEntry,
    DirListing, DirentField, EditorScript, FileContents, FileRevision, LocationEntry, LockDesc,
    LogEntry, LogRequest, NodeAction, NodeKind, PropertyChanges, PropertyList, ReportEntry,
    Repository, RepositoryError, RepositoryFactory, StatEntry, SvnServer, TreeDeltaRequest,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

pub const UUID: &str = "d2f6e3b4-5c1a-4e8f-9b7d-0123456789ab";
pub const ROOT_URL: &str = "svn://localhost/repo";

pub fn run_async<T>(f: impl std::future::Future<Output = T>) -> T {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(f)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// In-memory repository.

#[derive(Clone, Debug)]
pub struct MemNode {
    pub kind: NodeKind,
    pub contents: Vec<u8>,
    pub props: PropertyList,
    pub created_rev: u64,
}

#[derive(Clone, Debug, Default)]
pub struct Revision {
    pub tree: BTreeMap<String, MemNode>,
    pub props: PropertyList,
}

#[derive(Clone, Debug)]
pub struct RecordedNode {
    pub path: String,
    pub kind: NodeKind,
    pub action: NodeAction,
    pub copy_from: Option<(String, u64)>,
    pub props: PropertyChanges,
    pub content: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct RecordedCommit {
    pub log_message: String,
    pub author: Option<String>,
    pub rev_props: PropertyList,
    pub lock_tokens: Vec<(String, String)>,
    pub nodes: Vec<RecordedNode>,
}

#[derive(Debug, Default)]
pub struct MemState {
    pub revisions: Vec<Revision>,
    pub locks: BTreeMap<String, LockDesc>,
    pub commits: Vec<RecordedCommit>,
    pub closed_sessions: usize,
    next_lock: u64,
}

fn rev_props(author: &str, date: &str, log: &str) -> PropertyList {
    let mut props = PropertyList::new();
    props.insert("svn:author".into(), author.as_bytes().to_vec());
    props.insert("svn:date".into(), date.as_bytes().to_vec());
    props.insert("svn:log".into(), log.as_bytes().to_vec());
    props
}

fn dir(created_rev: u64) -> MemNode {
    MemNode {
        kind: NodeKind::Dir,
        contents: Vec::new(),
        props: PropertyList::new(),
        created_rev,
    }
}

fn file(contents: &[u8], created_rev: u64) -> MemNode {
    MemNode {
        kind: NodeKind::File,
        contents: contents.to_vec(),
        props: PropertyList::new(),
        created_rev,
    }
}

impl MemState {
    /// r0 is empty; r1 adds `trunk/` with two files; r2 edits one of them.
    pub fn fixture() -> Self {
        let r0 = Revision {
            tree: BTreeMap::new(),
            props: rev_props("", "2024-01-01T00:00:00.000000Z", ""),
        };
        let mut r1 = Revision {
            tree: BTreeMap::new(),
            props: rev_props("alice", "2024-01-02T00:00:00.000000Z", "initial import"),
        };
        r1.tree.insert("trunk".into(), dir(1));
        let mut readme = file(b"hello\n", 1);
        readme
            .props
            .insert("custom:color".into(), b"blue".to_vec());
        r1.tree.insert("trunk/file.txt".into(), readme);
        r1.tree.insert("trunk/sub".into(), dir(1));
        r1.tree
            .insert("trunk/sub/deep.txt".into(), file(b"deep\n", 1));
        r1.tree.insert("branches".into(), dir(1));
        r1.tree
            .insert("branches/other.txt".into(), file(b"other\n", 1));

        let mut r2 = Revision {
            tree: r1.tree.clone(),
            props: rev_props("bob", "2024-01-03T00:00:00.000000Z", "edit file"),
        };
        if let Some(node) = r2.tree.get_mut("trunk/file.txt") {
            node.contents = b"hello world\n".to_vec();
            node.created_rev = 2;
        }
        if let Some(node) = r2.tree.get_mut("trunk") {
            node.created_rev = 2;
        }

        Self {
            revisions: vec![r0, r1, r2],
            ..Self::default()
        }
    }

    pub fn head(&self) -> u64 {
        self.revisions.len() as u64 - 1
    }

    fn revision(&self, rev: Option<u64>) -> Result<(u64, &Revision), RepositoryError> {
        let rev = rev.unwrap_or_else(|| self.head());
        self.revisions
            .get(rev as usize)
            .map(|revision| (rev, revision))
            .ok_or(RepositoryError::NoSuchRevision(rev))
    }

    fn stat_node(&self, node: &MemNode) -> StatEntry {
        let props = &self.revisions[node.created_rev as usize].props;
        StatEntry {
            kind: node.kind,
            size: node.contents.len() as u64,
            has_props: !node.props.is_empty(),
            created_rev: Some(node.created_rev),
            created_date: prop_string(props, "svn:date"),
            last_author: prop_string(props, "svn:author"),
        }
    }
}

fn prop_string(props: &PropertyList, name: &str) -> Option<String> {
    props
        .get(name)
        .map(|value| String::from_utf8_lossy(value).into_owned())
        .filter(|value| !value.is_empty())
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

fn join(base: &str, rel: &str) -> String {
    match (base.is_empty(), rel.is_empty()) {
        (true, _) => rel.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{base}/{rel}"),
    }
}

/// `path` relative to `scope`, if it is `scope` or below it.
fn below<'a>(scope: &str, path: &'a str) -> Option<&'a str> {
    if scope.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(scope)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/')
    }
}

fn subtree<'a>(
    tree: &'a BTreeMap<String, MemNode>,
    scope: &str,
) -> BTreeMap<String, &'a MemNode> {
    tree.iter()
        .filter_map(|(path, node)| below(scope, path).map(|rel| (rel.to_string(), node)))
        .collect()
}

#[derive(Clone)]
pub struct MemFactory {
    pub state: Arc<Mutex<MemState>>,
}

impl MemFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemState::fixture())),
        }
    }
}

impl RepositoryFactory for MemFactory {
    fn open(
        &self,
        _identity: Option<&str>,
        path: &str,
    ) -> Result<Box<dyn Repository>, RepositoryError> {
        if path != "/repo" && !path.starts_with("/repo/") {
            return Err(RepositoryError::NotFound(path.to_string()));
        }
        Ok(Box::new(MemRepo {
            state: Arc::clone(&self.state),
            uuid: UUID.to_string(),
            location: String::new(),
        }))
    }
}

pub struct MemRepo {
    state: Arc<Mutex<MemState>>,
    uuid: String,
    location: String,
}

impl MemRepo {
    fn tree_delta(
        &self,
        request: &TreeDeltaRequest,
        report: &[ReportEntry],
        target_scope: &str,
    ) -> Result<EditorScript, RepositoryError> {
        let state = self.state.lock().unwrap();
        let (target_rev, target) = state.revision(request.rev)?;
        let (base_rev, start_empty) = report
            .iter()
            .find_map(|entry| match entry {
                ReportEntry::SetPath {
                    path,
                    rev,
                    start_empty,
                    ..
                } if path.is_empty() => Some((*rev, *start_empty)),
                _ => None,
            })
            .unwrap_or((0, true));
        let (_, base) = state.revision(Some(base_rev))?;

        let scope = join(&request.anchor, &request.target);
        let empty = BTreeMap::new();
        let base_nodes = subtree(if start_empty { &empty } else { &base.tree }, &scope);
        let target_nodes = subtree(&target.tree, target_scope);

        let mut script = EditorScript::new(target_rev);
        script
            .insert("", DeltaNode::open_dir(Some(base_rev)))
            .map_err(|err| RepositoryError::Other(err.to_string()))?;
        for (rel, node) in &target_nodes {
            if rel.is_empty() && request.target.is_empty() {
                continue;
            }
            let stat = state.stat_node(node);
            let delta = match base_nodes.get(rel) {
                None if node.kind == NodeKind::Dir => DeltaNode::add_dir(),
                None => DeltaNode::add_file(node.contents.clone()),
                Some(old) if old.kind == node.kind && old.contents == node.contents => {
                    if old.props == node.props {
                        continue;
                    }
                    if node.kind == NodeKind::Dir {
                        DeltaNode::open_dir(Some(base_rev))
                    } else {
                        DeltaNode::open_file(Some(base_rev), None)
                    }
                }
                Some(_) if node.kind == NodeKind::Dir => DeltaNode::open_dir(Some(base_rev)),
                Some(_) => DeltaNode::open_file(Some(base_rev), Some(node.contents.clone())),
            };
            let mut delta = delta.with_committed(stat.created_rev, stat.created_date, stat.last_author);
            for (name, value) in &node.props {
                delta = delta.with_prop(name.clone(), Some(value.clone()));
            }
            let path = join(&request.target, rel);
            script
                .insert(&path, delta)
                .map_err(|err| RepositoryError::Other(err.to_string()))?;
        }
        for (rel, node) in &base_nodes {
            if target_nodes.contains_key(rel) || (rel.is_empty() && request.target.is_empty()) {
                continue;
            }
            if !rel.is_empty() && base_nodes.contains_key(parent(rel)) && !target_nodes.contains_key(parent(rel)) {
                continue;
            }
            let path = join(&request.target, rel);
            script
                .insert(&path, DeltaNode::delete(node.kind, Some(base_rev)))
                .map_err(|err| RepositoryError::Other(err.to_string()))?;
        }
        Ok(script)
    }
}

impl Repository for MemRepo {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn root_path(&self) -> &str {
        "/repo"
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn set_location(&mut self, path: &str) {
        self.location = path.to_string();
    }

    fn latest_revision(&self) -> Result<u64, RepositoryError> {
        Ok(self.state.lock().unwrap().head())
    }

    fn stat(&self, path: &str, rev: Option<u64>) -> Result<Option<StatEntry>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let (rev, revision) = state.revision(rev)?;
        if path.is_empty() {
            return Ok(Some(StatEntry {
                kind: NodeKind::Dir,
                size: 0,
                has_props: false,
                created_rev: Some(rev),
                created_date: prop_string(&revision.props, "svn:date"),
                last_author: prop_string(&revision.props, "svn:author"),
            }));
        }
        Ok(revision.tree.get(path).map(|node| state.stat_node(node)))
    }

    fn get_dir(
        &self,
        path: &str,
        rev: Option<u64>,
        _want_props: bool,
        _fields: &[DirentField],
    ) -> Result<DirListing, RepositoryError> {
        let state = self.state.lock().unwrap();
        let (rev, revision) = state.revision(rev)?;
        let props = if path.is_empty() {
            PropertyList::new()
        } else {
            match revision.tree.get(path) {
                Some(node) if node.kind == NodeKind::Dir => node.props.clone(),
                Some(_) => return Err(RepositoryError::NotDirectory(path.to_string())),
                None => return Err(RepositoryError::NotFound(path.to_string())),
            }
        };
        let entries = revision
            .tree
            .iter()
            .filter(|(child, _)| !child.is_empty() && parent(child) == path)
            .map(|(child, node)| DirEntry {
                name: child.rsplit('/').next().unwrap_or(child).to_string(),
                stat: state.stat_node(node),
            })
            .collect();
        Ok(DirListing {
            rev,
            props,
            entries,
        })
    }

    fn get_file(
        &self,
        path: &str,
        rev: Option<u64>,
        _want_props: bool,
    ) -> Result<FileContents, RepositoryError> {
        let state = self.state.lock().unwrap();
        let (rev, revision) = state.revision(rev)?;
        match revision.tree.get(path) {
            Some(node) if node.kind == NodeKind::File => Ok(FileContents {
                rev,
                props: node.props.clone(),
                contents: node.contents.clone(),
            }),
            _ => Err(RepositoryError::NotFound(path.to_string())),
        }
    }

    fn lock(
        &mut self,
        path: &str,
        owner: Option<&str>,
        comment: Option<&str>,
        steal: bool,
        _current_rev: Option<u64>,
    ) -> Result<LockDesc, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let (_, head) = state.revision(None)?;
        if !head.tree.get(path).is_some_and(|node| node.kind == NodeKind::File) {
            return Err(RepositoryError::NotFound(path.to_string()));
        }
        if state.locks.contains_key(path) && !steal {
            return Err(RepositoryError::AlreadyLocked(path.to_string()));
        }
        state.next_lock += 1;
        let lock = LockDesc {
            path: path.to_string(),
            token: format!("opaquelocktoken:{}", state.next_lock),
            owner: owner.unwrap_or("anonymous").to_string(),
            comment: comment.map(str::to_string),
            created: "2024-01-04T00:00:00.000000Z".to_string(),
            expires: None,
        };
        state.locks.insert(path.to_string(), lock.clone());
        Ok(lock)
    }

    fn unlock(
        &mut self,
        path: &str,
        token: Option<&str>,
        break_lock: bool,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let Some(lock) = state.locks.get(path) else {
            return Err(RepositoryError::NoSuchLock(path.to_string()));
        };
        if !break_lock && token != Some(lock.token.as_str()) {
            return Err(RepositoryError::NoSuchLock(path.to_string()));
        }
        state.locks.remove(path);
        Ok(())
    }

    fn get_lock(&self, path: &str) -> Result<Option<LockDesc>, RepositoryError> {
        Ok(self.state.lock().unwrap().locks.get(path).cloned())
    }

    fn get_locks(&self, path: &str, _depth: Depth) -> Result<Vec<LockDesc>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .locks
            .values()
            .filter(|lock| below(path, &lock.path).is_some())
            .cloned()
            .collect())
    }

    fn rev_proplist(&self, rev: u64) -> Result<PropertyList, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state.revision(Some(rev))?.1.props.clone())
    }

    fn change_rev_prop(
        &mut self,
        rev: u64,
        name: &str,
        value: Option<&[u8]>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let revision = state
            .revisions
            .get_mut(rev as usize)
            .ok_or(RepositoryError::NoSuchRevision(rev))?;
        match value {
            Some(value) => revision.props.insert(name.to_string(), value.to_vec()),
            None => revision.props.remove(name),
        };
        Ok(())
    }

    fn commit(&mut self, request: CommitRequest) -> Result<CommitInfo, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let new_rev = state.head() + 1;
        let mut tree = state.revisions[state.head() as usize].tree.clone();
        let mut recorded = Vec::new();

        for mut node in request.edit.into_nodes() {
            if let Some(lock) = state.locks.get(&node.path)
                && !request
                    .lock_tokens
                    .iter()
                    .any(|(path, token)| *path == node.path && *token == lock.token)
            {
                return Err(RepositoryError::AlreadyLocked(node.path));
            }
            let content = match node.content.as_mut() {
                Some(content) => Some(
                    content
                        .to_vec()
                        .map_err(|err| RepositoryError::Other(err.to_string()))?,
                ),
                None => None,
            };
            match node.action {
                NodeAction::Delete => {
                    let doomed = node.path.clone();
                    tree.retain(|path, _| below(&doomed, path).is_none());
                }
                NodeAction::Add | NodeAction::Open if !node.path.is_empty() => {
                    let copied = node.copy_from.as_ref().and_then(|(source, rev)| {
                        state
                            .revisions
                            .get(*rev as usize)
                            .and_then(|revision| revision.tree.get(source))
                            .cloned()
                    });
                    let entry = tree.entry(node.path.clone()).or_insert_with(|| {
                        copied.unwrap_or(MemNode {
                            kind: node.kind,
                            contents: Vec::new(),
                            props: PropertyList::new(),
                            created_rev: new_rev,
                        })
                    });
                    entry.created_rev = new_rev;
                    if let Some(content) = &content {
                        entry.contents = content.clone();
                    }
                    for (name, value) in &node.props {
                        match value {
                            Some(value) => entry.props.insert(name.clone(), value.clone()),
                            None => entry.props.remove(name),
                        };
                    }
                }
                _ => {}
            }
            recorded.push(RecordedNode {
                path: node.path,
                kind: node.kind,
                action: node.action,
                copy_from: node.copy_from,
                props: node.props,
                content,
            });
        }

        let date = "2024-02-01T00:00:00.000000Z".to_string();
        let mut props = request.rev_props.clone();
        props.insert("svn:date".into(), date.clone().into_bytes());
        if let Some(author) = &request.author {
            props.insert("svn:author".into(), author.clone().into_bytes());
        }
        if !request.keep_locks {
            for (path, _) in &request.lock_tokens {
                state.locks.remove(path);
            }
        }
        state.revisions.push(Revision { tree, props });
        state.commits.push(RecordedCommit {
            log_message: request.log_message,
            author: request.author.clone(),
            rev_props: request.rev_props,
            lock_tokens: request.lock_tokens,
            nodes: recorded,
        });
        Ok(CommitInfo {
            new_rev,
            date: Some(date),
            author: request.author,
            post_commit_err: None,
        })
    }

    fn log(&self, request: &LogRequest) -> Result<Vec<LogEntry>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let head = state.head();
        let start = request.start.unwrap_or(head).min(head);
        let end = request.end.unwrap_or(head).min(head);
        let revs: Vec<u64> = if start <= end {
            (start..=end).collect()
        } else {
            (end..=start).rev().collect()
        };
        let mut entries = Vec::new();
        for rev in revs {
            let revision = &state.revisions[rev as usize];
            let changed_paths = if request.changed_paths && rev > 0 {
                let before = &state.revisions[rev as usize - 1].tree;
                let mut changes = Vec::new();
                for (path, node) in &revision.tree {
                    let action = match before.get(path) {
                        None => ChangeAction::Added,
                        Some(old) if old.contents != node.contents => ChangeAction::Modified,
                        Some(_) => continue,
                    };
                    changes.push(ChangedPath {
                        action,
                        path: path.clone(),
                        copy_from: None,
                        node_kind: Some(node.kind),
                        text_mods: Some(node.kind == NodeKind::File),
                        prop_mods: Some(false),
                    });
                }
                changes
            } else {
                Vec::new()
            };
            entries.push(LogEntry {
                rev,
                changed_paths,
                author: prop_string(&revision.props, "svn:author"),
                date: prop_string(&revision.props, "svn:date"),
                message: prop_string(&revision.props, "svn:log"),
                ..LogEntry::default()
            });
        }
        Ok(entries)
    }

    fn update(
        &self,
        request: &TreeDeltaRequest,
        report: &[ReportEntry],
    ) -> Result<EditorScript, RepositoryError> {
        let scope = join(&request.anchor, &request.target);
        self.tree_delta(request, report, &scope)
    }

    fn switch(
        &self,
        request: &TreeDeltaRequest,
        report: &[ReportEntry],
    ) -> Result<EditorScript, RepositoryError> {
        let scope = request.switch_path.clone().unwrap_or_default();
        self.tree_delta(request, report, &scope)
    }

    fn status(
        &self,
        request: &TreeDeltaRequest,
        report: &[ReportEntry],
    ) -> Result<EditorScript, RepositoryError> {
        let scope = join(&request.anchor, &request.target);
        self.tree_delta(request, report, &scope)
    }

    fn get_file_revs(
        &self,
        path: &str,
        start: Option<u64>,
        end: Option<u64>,
        _include_merged_revisions: bool,
    ) -> Result<Vec<FileRevision>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let head = state.head();
        let mut out: Vec<FileRevision> = Vec::new();
        let mut previous: Option<&[u8]> = None;
        for rev in start.unwrap_or(0)..=end.unwrap_or(head).min(head) {
            let revision = &state.revisions[rev as usize];
            let Some(node) = revision.tree.get(path) else {
                continue;
            };
            if previous == Some(node.contents.as_slice()) {
                continue;
            }
            previous = Some(&node.contents);
            out.push(FileRevision {
                path: path.to_string(),
                rev,
                rev_props: revision.props.clone(),
                prop_deltas: Vec::new(),
                merged_revision: false,
                contents: Some(node.contents.clone()),
            });
        }
        if out.is_empty() {
            return Err(RepositoryError::NotFound(path.to_string()));
        }
        Ok(out)
    }

    fn get_locations(
        &self,
        path: &str,
        peg_rev: u64,
        revs: &[u64],
    ) -> Result<Vec<LocationEntry>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let (_, peg) = state.revision(Some(peg_rev))?;
        if !peg.tree.contains_key(path) {
            return Err(RepositoryError::NotFound(path.to_string()));
        }
        Ok(revs
            .iter()
            .filter(|rev| {
                state
                    .revisions
                    .get(**rev as usize)
                    .is_some_and(|revision| revision.tree.contains_key(path))
            })
            .map(|rev| LocationEntry {
                rev: *rev,
                path: path.to_string(),
            })
            .collect())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed_sessions += 1;
    }
}

// Wire client.

pub fn w(word: &str) -> SvnItem {
    SvnItem::word(word)
}

pub fn s(text: &str) -> SvnItem {
    SvnItem::string(text)
}

pub fn n(value: u64) -> SvnItem {
    SvnItem::Number(value)
}

pub fn list(items: Vec<SvnItem>) -> SvnItem {
    SvnItem::List(items)
}

pub fn cmd(name: &str, params: Vec<SvnItem>) -> SvnItem {
    list(vec![w(name), list(params)])
}

pub fn encode(item: &SvnItem, out: &mut Vec<u8>) {
    match item {
        SvnItem::Word(word) => {
            out.extend_from_slice(word.as_bytes());
            out.push(b' ');
        }
        SvnItem::Number(value) => {
            out.extend_from_slice(value.to_string().as_bytes());
            out.push(b' ');
        }
        SvnItem::String(bytes) => {
            out.extend_from_slice(bytes.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(bytes);
            out.push(b' ');
        }
        SvnItem::List(items) => {
            out.extend_from_slice(b"( ");
            for item in items {
                encode(item, out);
            }
            out.extend_from_slice(b") ");
        }
    }
}

/// Parses one item starting at `pos`; `None` if `buf` does not hold a
/// complete item yet.
fn parse_item(buf: &[u8], mut pos: usize) -> Option<(SvnItem, usize)> {
    while buf.get(pos)?.is_ascii_whitespace() {
        pos += 1;
    }
    let first = buf[pos];
    if first == b'(' {
        pos += 1;
        let mut items = Vec::new();
        loop {
            while buf.get(pos)?.is_ascii_whitespace() {
                pos += 1;
            }
            if buf[pos] == b')' {
                return Some((SvnItem::List(items), pos + 1));
            }
            let (item, next) = parse_item(buf, pos)?;
            items.push(item);
            pos = next;
        }
    }
    if first.is_ascii_digit() {
        let start = pos;
        while buf.get(pos)?.is_ascii_digit() {
            pos += 1;
        }
        let value: u64 = std::str::from_utf8(&buf[start..pos]).ok()?.parse().ok()?;
        if buf[pos] == b':' {
            let begin = pos + 1;
            let end = begin + value as usize;
            if end >= buf.len() {
                return None;
            }
            return Some((SvnItem::String(buf[begin..end].to_vec()), end));
        }
        return Some((SvnItem::Number(value), pos));
    }
    let start = pos;
    while !buf.get(pos)?.is_ascii_whitespace() {
        pos += 1;
    }
    Some((SvnItem::word(std::str::from_utf8(&buf[start..pos]).ok()?), pos))
}

pub struct WireClient {
    stream: DuplexStream,
    buf: Vec<u8>,
}

impl WireClient {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    pub async fn send(&mut self, item: &SvnItem) {
        let mut out = Vec::new();
        encode(item, &mut out);
        out.push(b'\n');
        self.stream.write_all(&out).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn read_item(&mut self) -> SvnItem {
        loop {
            if let Some((item, used)) = parse_item(&self.buf, 0) {
                self.buf.drain(..used);
                return item;
            }
            let mut chunk = [0u8; 4096];
            let read = self.stream.read(&mut chunk).await.unwrap();
            assert!(read > 0, "server closed the connection");
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Returns `true` once the server has closed the stream.
    pub async fn read_eof(&mut self) -> bool {
        if self.buf.iter().any(|b| !b.is_ascii_whitespace()) {
            return false;
        }
        let mut chunk = [0u8; 64];
        matches!(self.stream.read(&mut chunk).await, Ok(0))
    }

    /// Reads `( kind ( params ) )`, returning the kind and params.
    pub async fn read_response(&mut self) -> (String, Vec<SvnItem>) {
        let item = self.read_item().await;
        let parts = item.as_list().unwrap();
        (
            parts[0].as_word().unwrap().to_string(),
            parts[1].as_list().unwrap().to_vec(),
        )
    }

    pub async fn expect_success(&mut self) -> Vec<SvnItem> {
        let (kind, params) = self.read_response().await;
        assert_eq!(kind, "success", "unexpected response: {params:?}");
        params
    }

    /// Reads a failure and returns the code of its first error.
    pub async fn expect_failure(&mut self) -> u64 {
        let (kind, params) = self.read_response().await;
        assert_eq!(kind, "failure", "unexpected response: {params:?}");
        params[0].as_list().unwrap()[0].as_u64().unwrap()
    }

    /// The empty auth request sent ahead of command responses.
    pub async fn expect_marker(&mut self) {
        let params = self.expect_success().await;
        assert_eq!(params, vec![list(Vec::new()), s("")]);
    }

    /// Greeting, anonymous auth and repository info for `url`.
    pub async fn handshake(&mut self, url: &str) -> Vec<SvnItem> {
        let greeting = self.expect_success().await;
        assert_eq!(greeting[0], n(2));
        self.send(&list(vec![
            n(2),
            list(vec![w("edit-pipeline"), w("svndiff1")]),
            s(url),
        ]))
        .await;
        let auth = self.expect_success().await;
        let mechs = auth[0].as_list().unwrap();
        assert!(mechs.contains(&w("ANONYMOUS")), "mechanisms: {mechs:?}");
        self.send(&list(vec![w("ANONYMOUS"), list(vec![s("")])])).await;
        self.expect_success().await;
        self.expect_success().await
    }

    /// Reads editor commands up to and including `close-edit`.
    pub async fn read_editor(&mut self) -> Vec<(String, Vec<SvnItem>)> {
        let mut commands = Vec::new();
        loop {
            let (name, params) = self.read_response().await;
            let done = name == "close-edit" || name == "abort-edit";
            commands.push((name, params));
            if done {
                return commands;
            }
        }
    }
}

/// Runs one session of `server` over an in-memory stream.
pub fn start_session(
    server: SvnServer,
) -> (WireClient, JoinHandle<svnserve::Result<()>>) {
    let (client, server_end) = tokio::io::duplex(1 << 20);
    let (read, write) = tokio::io::split(server_end);
    let handle = tokio::spawn(async move { server.serve_connection(read, write, None).await });
    (WireClient::new(client), handle)
}

/// Session already past the handshake, bound to `svn://localhost/repo/trunk`.
pub async fn trunk_session(
    factory: &MemFactory,
) -> (WireClient, JoinHandle<svnserve::Result<()>>) {
    let (mut client, handle) = start_session(SvnServer::new(factory.clone()));
    client.handshake(&format!("{ROOT_URL}/trunk")).await;
    (client, handle)
}
