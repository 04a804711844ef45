//! Editor and report drives over an `ra_svn` connection.
//!
//! The write direction streams an editor to the client and then waits for
//! its verdict. The read direction collects a client's commit editor into a
//! [`CommitEdit`], and [`read_report`] collects the working-copy report that
//! precedes `update`, `switch` and `status`.

use std::collections::{BTreeSet, HashMap};

use tempfile::SpooledTempFile;
use tracing::debug;

use crate::delta::{ChecksumWriter, DeltaCodec, DeltaDecoder, md5_hex};
use crate::editor::{CommitEdit, CommitNode, EditorCommand, FileContent, NodeAction, ReportEntry};
use crate::path::{join, validate_rel_dir_path};
use crate::props::client_may_set;
use crate::url::relative_to_root;
use crate::{Depth, ErrorCode, NodeKind, PropertyChanges, ServerError, SvnError};

use super::SvnItem;
use super::conn::RaSvnConnection;
use super::parse::{
    opt_depth, opt_tuple_bytes, opt_tuple_copyfrom, opt_tuple_string, opt_tuple_u64, req_bool,
    req_rel_path, req_string, req_u64,
};
use super::wire::WireEncoder;

/// Received file texts above this size spill from memory to a temp file.
const SPOOL_THRESHOLD: usize = 1024 * 1024;

pub(crate) fn encode_editor_command(cmd: &EditorCommand, out: &mut Vec<u8>) {
    WireEncoder::new(out).command(cmd.name(), |enc| match cmd {
        EditorCommand::TargetRev { rev } => enc.number(*rev),
        EditorCommand::OpenRoot { rev, token } => {
            enc.tuple_number(*rev);
            enc.string_str(token);
        }
        EditorCommand::DeleteEntry {
            path,
            rev,
            dir_token,
        } => {
            enc.string_str(path);
            enc.tuple_number(*rev);
            enc.string_str(dir_token);
        }
        EditorCommand::AddDir {
            path,
            parent_token: dir_token,
            child_token: token,
            copy_from,
        }
        | EditorCommand::AddFile {
            path,
            dir_token,
            file_token: token,
            copy_from,
        } => {
            enc.string_str(path);
            enc.string_str(dir_token);
            enc.string_str(token);
            enc.copy_source(copy_from.as_ref());
        }
        EditorCommand::OpenDir {
            path,
            parent_token: dir_token,
            child_token: token,
            rev,
        }
        | EditorCommand::OpenFile {
            path,
            dir_token,
            file_token: token,
            rev,
        } => {
            enc.string_str(path);
            enc.string_str(dir_token);
            enc.string_str(token);
            enc.tuple_number(*rev);
        }
        EditorCommand::ChangeDirProp {
            dir_token: token,
            name,
            value,
        }
        | EditorCommand::ChangeFileProp {
            file_token: token,
            name,
            value,
        } => {
            enc.string_str(token);
            enc.string_str(name);
            enc.tuple_bytes(value.as_deref());
        }
        EditorCommand::ApplyTextDelta {
            file_token: token,
            base_checksum: checksum,
        }
        | EditorCommand::CloseFile {
            file_token: token,
            text_checksum: checksum,
        } => {
            enc.string_str(token);
            enc.tuple_bytes(checksum.as_deref().map(str::as_bytes));
        }
        EditorCommand::TextDeltaChunk { file_token, chunk } => {
            enc.string_str(file_token);
            enc.string_bytes(chunk);
        }
        EditorCommand::CloseDir { dir_token: token }
        | EditorCommand::TextDeltaEnd { file_token: token } => enc.string_str(token),
        EditorCommand::CloseEdit | EditorCommand::AbortEdit => {}
    });
}

/// Parses one client editor command; `Ok(None)` for words outside the
/// editor vocabulary.
pub(crate) fn parse_editor_command(
    cmd: &str,
    params: &[SvnItem],
) -> Result<Option<EditorCommand>, ServerError> {
    let parsed = match cmd {
        "target-rev" => EditorCommand::TargetRev {
            rev: req_u64(params, 0, "target-rev revision")?,
        },
        "open-root" => EditorCommand::OpenRoot {
            rev: opt_tuple_u64(params, 0),
            token: req_string(params, 1, "open-root token")?,
        },
        "delete-entry" => EditorCommand::DeleteEntry {
            path: req_rel_path(params, 0, "delete-entry path")?,
            rev: opt_tuple_u64(params, 1),
            dir_token: req_string(params, 2, "delete-entry dir token")?,
        },
        "add-dir" => EditorCommand::AddDir {
            path: req_rel_path(params, 0, "add-dir path")?,
            parent_token: req_string(params, 1, "add-dir parent token")?,
            child_token: req_string(params, 2, "add-dir child token")?,
            copy_from: opt_tuple_copyfrom(params, 3)?,
        },
        "open-dir" => EditorCommand::OpenDir {
            path: req_rel_path(params, 0, "open-dir path")?,
            parent_token: req_string(params, 1, "open-dir parent token")?,
            child_token: req_string(params, 2, "open-dir child token")?,
            rev: opt_tuple_u64(params, 3),
        },
        "change-dir-prop" => EditorCommand::ChangeDirProp {
            dir_token: req_string(params, 0, "change-dir-prop token")?,
            name: req_string(params, 1, "change-dir-prop name")?,
            value: opt_tuple_bytes(params, 2),
        },
        "close-dir" => EditorCommand::CloseDir {
            dir_token: req_string(params, 0, "close-dir token")?,
        },
        "add-file" => EditorCommand::AddFile {
            path: req_rel_path(params, 0, "add-file path")?,
            dir_token: req_string(params, 1, "add-file dir token")?,
            file_token: req_string(params, 2, "add-file file token")?,
            copy_from: opt_tuple_copyfrom(params, 3)?,
        },
        "open-file" => EditorCommand::OpenFile {
            path: req_rel_path(params, 0, "open-file path")?,
            dir_token: req_string(params, 1, "open-file dir token")?,
            file_token: req_string(params, 2, "open-file file token")?,
            rev: opt_tuple_u64(params, 3),
        },
        "apply-textdelta" => EditorCommand::ApplyTextDelta {
            file_token: req_string(params, 0, "apply-textdelta token")?,
            base_checksum: opt_tuple_string(params, 1),
        },
        "textdelta-chunk" => EditorCommand::TextDeltaChunk {
            file_token: req_string(params, 0, "textdelta-chunk token")?,
            chunk: params
                .get(1)
                .and_then(SvnItem::as_bytes)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| ServerError::malformed("textdelta-chunk missing chunk"))?,
        },
        "textdelta-end" => EditorCommand::TextDeltaEnd {
            file_token: req_string(params, 0, "textdelta-end token")?,
        },
        "change-file-prop" => EditorCommand::ChangeFileProp {
            file_token: req_string(params, 0, "change-file-prop token")?,
            name: req_string(params, 1, "change-file-prop name")?,
            value: opt_tuple_bytes(params, 2),
        },
        "close-file" => EditorCommand::CloseFile {
            file_token: req_string(params, 0, "close-file token")?,
            text_checksum: opt_tuple_string(params, 1),
        },
        "close-edit" => EditorCommand::CloseEdit,
        "abort-edit" => EditorCommand::AbortEdit,
        _ => return Ok(None),
    };
    Ok(Some(parsed))
}

/// Reads `( word ( params ... ) )`.
async fn read_command_item(
    conn: &mut RaSvnConnection,
) -> Result<(String, Vec<SvnItem>), SvnError> {
    let item = conn.read_item().await?;
    let SvnItem::List(mut parts) = item else {
        return Err(SvnError::Protocol("expected command list".into()));
    };
    if parts.is_empty() {
        return Err(SvnError::Protocol("empty command list".into()));
    }
    let cmd = parts[0]
        .as_word()
        .ok_or_else(|| SvnError::Protocol("command name not a word".into()))?
        .to_string();
    let params = match parts.get_mut(1) {
        Some(SvnItem::List(items)) => std::mem::take(items),
        _ => Vec::new(),
    };
    Ok((cmd, params))
}

/// Streams `commands` to the client, then reads its verdict on the edit.
///
/// Output is flushed whenever `batch_bytes` are queued; if the client has
/// spoken by then it hit an error, so the drive is aborted and the client's
/// failure returned. A failing producer also aborts the drive, and its error
/// is returned once the client has acknowledged the abort.
pub(crate) async fn write_editor<I>(
    conn: &mut RaSvnConnection,
    commands: I,
    batch_bytes: usize,
) -> Result<Result<(), ServerError>, SvnError>
where
    I: IntoIterator<Item = Result<EditorCommand, ServerError>>,
{
    for next in commands {
        let cmd = match next {
            Ok(cmd) => cmd,
            Err(err) => {
                debug!(error = %err, "aborting editor drive");
                queue_abort(conn);
                conn.flush().await?;
                if let Err(client) = conn.read_command_response().await? {
                    debug!(error = %client, "client failed while aborting");
                }
                return Ok(Err(err));
            }
        };
        conn.queue_encoded(|out| encode_editor_command(&cmd, out));
        if conn.queued_len() >= batch_bytes {
            conn.flush().await?;
            if conn.data_available().await? {
                debug!("client sent data during editor drive");
                queue_abort(conn);
                conn.flush().await?;
                return Ok(match conn.read_command_response().await? {
                    Err(err) => Err(err),
                    Ok(_) => Err(ServerError::new(
                        ErrorCode::EditAborted,
                        "client aborted the edit",
                    )),
                });
            }
        }
    }
    conn.flush().await?;
    Ok(conn.read_command_response().await?.map(|_| ()))
}

fn queue_abort(conn: &mut RaSvnConnection) {
    conn.queue_encoded(|out| encode_editor_command(&EditorCommand::AbortEdit, out));
}

/// Where a commit editor's paths and copy sources are resolved.
#[derive(Clone, Copy)]
pub(crate) struct EditTarget<'a> {
    /// Root-relative path the client's paths are relative to.
    pub(crate) anchor: &'a str,
    /// Repository root URL, for copy sources.
    pub(crate) root_url: &'a str,
    pub(crate) codec: &'a dyn DeltaCodec,
}

struct PendingText {
    decoder: Box<dyn DeltaDecoder>,
    out: ChecksumWriter<SpooledTempFile>,
}

/// Node arena plus token map for one commit editor drive.
struct CommitEditReader<'a, F> {
    target: EditTarget<'a>,
    base_text: F,
    nodes: Vec<CommitNode>,
    tokens: HashMap<String, usize>,
    texts: HashMap<String, PendingText>,
}

impl<'a, F> CommitEditReader<'a, F>
where
    F: FnMut(&str, Option<u64>) -> Result<Vec<u8>, ServerError>,
{
    fn new(target: EditTarget<'a>, base_text: F) -> Self {
        Self {
            target,
            base_text,
            nodes: Vec::new(),
            tokens: HashMap::new(),
            texts: HashMap::new(),
        }
    }

    fn lookup(&self, token: &str) -> Result<usize, ServerError> {
        self.tokens
            .get(token)
            .copied()
            .ok_or_else(|| ServerError::malformed(format!("invalid editor token '{token}'")))
    }

    fn resolve_copy(
        &self,
        copy_from: Option<(String, u64)>,
    ) -> Result<Option<(String, u64)>, ServerError> {
        let Some((source, rev)) = copy_from else {
            return Ok(None);
        };
        let path = if source.contains("://") {
            relative_to_root(self.target.root_url, &source).ok_or_else(|| {
                ServerError::new(
                    ErrorCode::RaIllegalUrl,
                    format!(
                        "'{source}' is not in the same repository as '{}'",
                        self.target.root_url
                    ),
                )
            })?
        } else {
            source.trim_start_matches('/').to_string()
        };
        let path = validate_rel_dir_path(&path)
            .map_err(|err| ServerError::malformed(err.to_string()))?;
        Ok(Some((path, rev)))
    }

    fn open_node(
        &mut self,
        path: &str,
        parent_token: Option<&str>,
        kind: NodeKind,
        action: NodeAction,
        base_rev: Option<u64>,
        copy_from: Option<(String, u64)>,
    ) -> Result<usize, ServerError> {
        if let Some(parent) = parent_token {
            self.lookup(parent)?;
        }
        let copy_from = self.resolve_copy(copy_from)?;
        self.nodes.push(CommitNode {
            path: join(self.target.anchor, path),
            kind,
            action,
            base_rev,
            copy_from,
            props: PropertyChanges::new(),
            content: None,
        });
        Ok(self.nodes.len() - 1)
    }

    fn bind(&mut self, token: String, idx: usize) {
        self.tokens.insert(token, idx);
    }

    fn change_prop(
        &mut self,
        token: &str,
        name: String,
        value: Option<Vec<u8>>,
    ) -> Result<(), ServerError> {
        if !client_may_set(&name) {
            return Err(ServerError::new(
                ErrorCode::BadPropertyName,
                format!("Bad property name: '{name}'"),
            ));
        }
        let idx = self.lookup(token)?;
        self.nodes[idx].props.insert(name, value);
        Ok(())
    }

    fn apply(&mut self, cmd: EditorCommand) -> Result<(), ServerError> {
        match cmd {
            EditorCommand::TargetRev { .. }
            | EditorCommand::CloseEdit
            | EditorCommand::AbortEdit => {}
            EditorCommand::OpenRoot { rev, token } => {
                let idx = self.open_node("", None, NodeKind::Dir, NodeAction::Open, rev, None)?;
                self.bind(token, idx);
            }
            EditorCommand::DeleteEntry {
                path,
                rev,
                dir_token,
            } => {
                self.open_node(
                    &path,
                    Some(&dir_token),
                    NodeKind::Unknown,
                    NodeAction::Delete,
                    rev,
                    None,
                )?;
            }
            EditorCommand::AddDir {
                path,
                parent_token,
                child_token,
                copy_from,
            } => {
                let idx = self.open_node(
                    &path,
                    Some(&parent_token),
                    NodeKind::Dir,
                    NodeAction::Add,
                    None,
                    copy_from,
                )?;
                self.bind(child_token, idx);
            }
            EditorCommand::OpenDir {
                path,
                parent_token,
                child_token,
                rev,
            } => {
                let idx = self.open_node(
                    &path,
                    Some(&parent_token),
                    NodeKind::Dir,
                    NodeAction::Open,
                    rev,
                    None,
                )?;
                self.bind(child_token, idx);
            }
            EditorCommand::AddFile {
                path,
                dir_token,
                file_token,
                copy_from,
            } => {
                let idx = self.open_node(
                    &path,
                    Some(&dir_token),
                    NodeKind::File,
                    NodeAction::Add,
                    None,
                    copy_from,
                )?;
                self.bind(file_token, idx);
            }
            EditorCommand::OpenFile {
                path,
                dir_token,
                file_token,
                rev,
            } => {
                let idx = self.open_node(
                    &path,
                    Some(&dir_token),
                    NodeKind::File,
                    NodeAction::Open,
                    rev,
                    None,
                )?;
                self.bind(file_token, idx);
            }
            EditorCommand::ChangeDirProp {
                dir_token: token,
                name,
                value,
            }
            | EditorCommand::ChangeFileProp {
                file_token: token,
                name,
                value,
            } => self.change_prop(&token, name, value)?,
            EditorCommand::CloseDir { dir_token } => {
                self.lookup(&dir_token)?;
                self.tokens.remove(&dir_token);
            }
            EditorCommand::ApplyTextDelta {
                file_token,
                base_checksum,
            } => self.start_text(file_token, base_checksum)?,
            EditorCommand::TextDeltaChunk { file_token, chunk } => {
                let pending = self.texts.get_mut(&file_token).ok_or_else(|| {
                    ServerError::malformed(format!("no text delta open for '{file_token}'"))
                })?;
                pending.decoder.push(&chunk, &mut pending.out)?;
            }
            EditorCommand::TextDeltaEnd { file_token } => self.finish_text(&file_token)?,
            EditorCommand::CloseFile {
                file_token,
                text_checksum,
            } => {
                let idx = self.lookup(&file_token)?;
                if self.texts.contains_key(&file_token) {
                    return Err(ServerError::malformed(format!(
                        "text delta for '{file_token}' was not finished"
                    )));
                }
                let node = &self.nodes[idx];
                if let (Some(expected), Some(content)) = (text_checksum, node.content.as_ref())
                    && expected != content.md5()
                {
                    return Err(ServerError::new(
                        ErrorCode::ChecksumMismatch,
                        format!(
                            "Checksum mismatch for '{}': expected {expected}, actual {}",
                            node.path,
                            content.md5()
                        ),
                    ));
                }
                self.tokens.remove(&file_token);
            }
        }
        Ok(())
    }

    fn start_text(
        &mut self,
        token: String,
        base_checksum: Option<String>,
    ) -> Result<(), ServerError> {
        let idx = self.lookup(&token)?;
        let node = &self.nodes[idx];
        let base = match (node.action, node.copy_from.clone()) {
            (NodeAction::Add, Some((source, rev))) => (self.base_text)(&source, Some(rev))?,
            (NodeAction::Add, None) => Vec::new(),
            _ => {
                let path = node.path.clone();
                let rev = node.base_rev;
                (self.base_text)(&path, rev)?
            }
        };
        if let Some(expected) = base_checksum {
            let actual = md5_hex(&base);
            if expected != actual {
                return Err(ServerError::new(
                    ErrorCode::ChecksumMismatch,
                    format!("Base checksum mismatch: expected {expected}, actual {actual}"),
                ));
            }
        }
        let pending = PendingText {
            decoder: self.target.codec.decoder(base),
            out: ChecksumWriter::new(SpooledTempFile::new(SPOOL_THRESHOLD)),
        };
        self.texts.insert(token, pending);
        Ok(())
    }

    fn finish_text(&mut self, token: &str) -> Result<(), ServerError> {
        let idx = self.lookup(token)?;
        let PendingText { decoder, mut out } = self.texts.remove(token).ok_or_else(|| {
            ServerError::malformed(format!("no text delta open for '{token}'"))
        })?;
        decoder.finish(&mut out)?;
        let len = out.len();
        let (spool, md5) = out.finish();
        let content = FileContent::new(spool, len, md5)
            .map_err(|err| ServerError::new(ErrorCode::Unknown, err.to_string()))?;
        self.nodes[idx].content = Some(content);
        Ok(())
    }

    fn into_edit(self) -> CommitEdit {
        CommitEdit::from_nodes(self.nodes)
    }
}

/// Reads a client's commit editor until `close-edit` or `abort-edit`.
///
/// The first failing command is answered with a failure right away; the rest
/// of the drive is then read and discarded. `base_text` supplies the text a
/// delta applies to, for opened files and copied adds. An `Err` result has
/// already been written to the client; on `Ok` the caller still owes the
/// response to `close-edit`.
pub(crate) async fn read_commit_editor<F>(
    conn: &mut RaSvnConnection,
    target: EditTarget<'_>,
    base_text: F,
) -> Result<Result<CommitEdit, ServerError>, SvnError>
where
    F: FnMut(&str, Option<u64>) -> Result<Vec<u8>, ServerError> + Send,
{
    let mut reader = CommitEditReader::new(target, base_text);
    let mut failure: Option<ServerError> = None;
    let mut unknown = BTreeSet::new();

    loop {
        let (word, params) = read_command_item(conn).await?;
        match word.as_str() {
            "close-edit" => break,
            "abort-edit" => {
                if let Some(err) = failure {
                    return Ok(Err(err));
                }
                let err = ServerError::new(ErrorCode::IncompleteData, "commit edit was aborted");
                conn.write_failure(&err).await?;
                return Ok(Err(err));
            }
            _ if failure.is_some() => continue,
            _ => {}
        }
        let result = match parse_editor_command(&word, &params) {
            Ok(Some(cmd)) => reader.apply(cmd),
            Ok(None) => {
                unknown.insert(word);
                continue;
            }
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            let err = err.with_context(word);
            debug!(error = %err, "commit editor command failed");
            conn.write_failure(&err).await?;
            failure = Some(err);
        }
    }

    if let Some(err) = failure {
        return Ok(Err(err));
    }
    if !unknown.is_empty() {
        let words: Vec<String> = unknown.into_iter().collect();
        let err = ServerError::new(
            ErrorCode::UnknownCommand,
            format!("Unknown editor command(s): {}", words.join(", ")),
        );
        conn.write_failure(&err).await?;
        return Ok(Err(err));
    }
    Ok(Ok(reader.into_edit()))
}

/// A working-copy report as read from the client.
#[derive(Debug, Default)]
pub(crate) struct Report {
    pub(crate) entries: Vec<ReportEntry>,
    /// The client ended with `abort-report`.
    pub(crate) aborted: bool,
    pub(crate) link_paths: usize,
}

/// Reads report commands until `finish-report` or `abort-report`.
///
/// Errors are held until the terminator so the stream stays in step.
pub(crate) async fn read_report(
    conn: &mut RaSvnConnection,
) -> Result<Result<Report, ServerError>, SvnError> {
    let mut report = Report::default();
    let mut failure: Option<ServerError> = None;
    loop {
        let (word, params) = read_command_item(conn).await?;
        let entry = match word.as_str() {
            "finish-report" => break,
            "abort-report" => {
                report.aborted = true;
                break;
            }
            "set-path" => parse_set_path(&params).map(Some),
            "delete-path" => req_rel_path(&params, 0, "delete-path path")
                .map(|path| Some(ReportEntry::DeletePath { path })),
            "link-path" => {
                report.link_paths += 1;
                parse_link_path(&params).map(|()| None)
            }
            other => Err(ServerError::new(
                ErrorCode::UnknownCommand,
                format!("Unknown report command '{other}'"),
            )),
        };
        match entry {
            Ok(Some(entry)) => report.entries.push(entry),
            Ok(None) => {}
            Err(err) => {
                failure.get_or_insert(err);
            }
        }
    }

    if let Some(err) = failure {
        return Ok(Err(err));
    }
    if report.link_paths > 0 && !report.aborted {
        return Ok(Err(ServerError::new(
            ErrorCode::UnsupportedFeature,
            "link-path is not implemented",
        )));
    }
    Ok(Ok(report))
}

/// `( path rev start-empty ( lock-token? ) ?depth )`
fn parse_set_path(params: &[SvnItem]) -> Result<ReportEntry, ServerError> {
    Ok(ReportEntry::SetPath {
        path: req_rel_path(params, 0, "set-path path")?,
        rev: req_u64(params, 1, "set-path revision")?,
        start_empty: req_bool(params, 2, "set-path start-empty")?,
        lock_token: opt_tuple_string(params, 3),
        depth: opt_depth(params, 4).unwrap_or(Depth::Infinity),
    })
}

/// `( path url rev start-empty ( lock-token? ) ?depth )`
fn parse_link_path(params: &[SvnItem]) -> Result<(), ServerError> {
    req_rel_path(params, 0, "link-path path")?;
    req_string(params, 1, "link-path url")?;
    req_u64(params, 2, "link-path revision")?;
    req_bool(params, 3, "link-path start-empty")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::CapabilitySet;
    use crate::delta::SvndiffCodec;
    use crate::rasvn::conn::tests::{
        connected_conn, read_until_newline, run_async, write_item_line,
    };
    use crate::rasvn::parse::failure_item;
    use tokio::io::DuplexStream;

    fn cmd(word: &str, params: Vec<SvnItem>) -> SvnItem {
        SvnItem::List(vec![SvnItem::word(word), SvnItem::List(params)])
    }

    fn s(text: &str) -> SvnItem {
        SvnItem::string(text)
    }

    fn none() -> SvnItem {
        SvnItem::List(Vec::new())
    }

    fn success() -> SvnItem {
        cmd("success", Vec::new())
    }

    fn encoded(cmd: &EditorCommand) -> String {
        let mut out = Vec::new();
        encode_editor_command(cmd, &mut out);
        String::from_utf8(out).unwrap()
    }

    async fn read_lines_until(stream: &mut DuplexStream, last: &str) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = String::from_utf8(read_until_newline(stream).await).unwrap();
            assert!(!line.is_empty(), "stream closed before {last}");
            let done = line.starts_with(&format!("( {last} "));
            lines.push(line);
            if done {
                return lines;
            }
        }
    }

    #[test]
    fn editor_commands_have_wire_shape() {
        assert_eq!(
            encoded(&EditorCommand::TargetRev { rev: 7 }),
            "( target-rev ( 7 ) ) \n"
        );
        assert_eq!(
            encoded(&EditorCommand::OpenRoot {
                rev: None,
                token: "d0".into()
            }),
            "( open-root ( ( ) 2:d0 ) ) \n"
        );
        assert_eq!(
            encoded(&EditorCommand::AddFile {
                path: "a/b".into(),
                dir_token: "d1".into(),
                file_token: "f0".into(),
                copy_from: Some(("svn://h/r/x".into(), 3)),
            }),
            "( add-file ( 3:a/b 2:d1 2:f0 ( 11:svn://h/r/x 3 ) ) ) \n"
        );
        assert_eq!(
            encoded(&EditorCommand::ChangeFileProp {
                file_token: "f0".into(),
                name: "p".into(),
                value: None,
            }),
            "( change-file-prop ( 2:f0 1:p ( ) ) ) \n"
        );
        assert_eq!(encoded(&EditorCommand::CloseEdit), "( close-edit ( ) ) \n");
    }

    #[test]
    fn write_editor_streams_commands_then_reads_client_verdict() {
        run_async(async {
            let (mut conn, mut client) = connected_conn();
            let commands = vec![
                Ok(EditorCommand::TargetRev { rev: 2 }),
                Ok(EditorCommand::OpenRoot {
                    rev: Some(1),
                    token: "d0".into(),
                }),
                Ok(EditorCommand::CloseDir {
                    dir_token: "d0".into(),
                }),
                Ok(EditorCommand::CloseEdit),
            ];
            let client_side = async {
                let lines = read_lines_until(&mut client, "close-edit").await;
                write_item_line(&mut client, &success()).await;
                lines
            };
            let (result, lines) =
                tokio::join!(write_editor(&mut conn, commands, 64 * 1024), client_side);
            result.unwrap().unwrap();
            assert_eq!(lines.len(), 4);
            assert_eq!(lines[1], "( open-root ( ( 1 ) 2:d0 ) ) \n");
        });
    }

    #[test]
    fn early_client_failure_aborts_the_drive() {
        run_async(async {
            let (mut conn, mut client) = connected_conn();
            let err = ServerError::new(ErrorCode::FsNotFound, "client broke");
            write_item_line(&mut client, &failure_item(&err)).await;

            let commands = vec![
                Ok(EditorCommand::TargetRev { rev: 2 }),
                Ok(EditorCommand::OpenRoot {
                    rev: None,
                    token: "d0".into(),
                }),
                Ok(EditorCommand::CloseEdit),
            ];
            let result = write_editor(&mut conn, commands, 1).await.unwrap();
            assert_eq!(result.unwrap_err().code(), 160_013);

            let lines = read_lines_until(&mut client, "abort-edit").await;
            assert_eq!(lines, vec!["( target-rev ( 2 ) ) \n", "( abort-edit ( ) ) \n"]);
        });
    }

    #[test]
    fn producer_error_aborts_and_reports_our_failure() {
        run_async(async {
            let (mut conn, mut client) = connected_conn();
            let commands = vec![
                Ok(EditorCommand::TargetRev { rev: 2 }),
                Err(ServerError::new(ErrorCode::FsNotDirectory, "bad tree")),
            ];
            let client_side = async {
                let lines = read_lines_until(&mut client, "abort-edit").await;
                write_item_line(&mut client, &success()).await;
                lines
            };
            let (result, lines) =
                tokio::join!(write_editor(&mut conn, commands, 64 * 1024), client_side);
            assert_eq!(result.unwrap().unwrap_err().code(), 160_016);
            assert_eq!(lines.len(), 2);
        });
    }

    fn delta_chunks(text: &[u8]) -> Vec<Vec<u8>> {
        SvndiffCodec::default()
            .encode_fulltext(text, &CapabilitySet::default())
            .unwrap()
    }

    fn add_file_drive(checksum: &str) -> Vec<SvnItem> {
        let mut items = vec![
            cmd("open-root", vec![SvnItem::List(vec![SvnItem::Number(1)]), s("r")]),
            cmd("add-file", vec![s("foo.txt"), s("r"), s("c1"), none()]),
            cmd(
                "change-file-prop",
                vec![s("c1"), s("team:owner"), SvnItem::List(vec![s("me")])],
            ),
            cmd("apply-textdelta", vec![s("c1"), none()]),
        ];
        for chunk in delta_chunks(b"hello world") {
            items.push(cmd("textdelta-chunk", vec![s("c1"), SvnItem::string(chunk)]));
        }
        items.push(cmd("textdelta-end", vec![s("c1")]));
        items.push(cmd(
            "close-file",
            vec![s("c1"), SvnItem::List(vec![s(checksum)])],
        ));
        items.push(cmd("close-dir", vec![s("r")]));
        items.push(cmd("close-edit", Vec::new()));
        items
    }

    async fn run_commit_drive(
        items: Vec<SvnItem>,
    ) -> (Result<CommitEdit, ServerError>, String) {
        let (mut conn, mut client) = connected_conn();
        for item in &items {
            write_item_line(&mut client, item).await;
        }
        let codec = SvndiffCodec::default();
        let target = EditTarget {
            anchor: "trunk",
            root_url: "svn://host/repo",
            codec: &codec,
        };
        let result = read_commit_editor(&mut conn, target, |_: &str, _: Option<u64>| {
            Ok(b"base".to_vec())
        })
        .await
        .unwrap();
        if result.is_ok() {
            conn.write_success(Vec::new()).await.unwrap();
        }
        let reply = String::from_utf8(read_until_newline(&mut client).await).unwrap();
        (result, reply)
    }

    #[test]
    fn commit_drive_collects_nodes_props_and_content() {
        run_async(async {
            let (result, reply) = run_commit_drive(add_file_drive(&md5_hex(b"hello world"))).await;
            assert_eq!(reply, "( success ( ) ) \n");
            let mut edit = result.unwrap();
            assert_eq!(edit.nodes().len(), 2);
            let file = &mut edit.nodes_mut()[1];
            assert_eq!(file.path, "trunk/foo.txt");
            assert_eq!(file.kind, NodeKind::File);
            assert_eq!(file.action, NodeAction::Add);
            assert_eq!(file.props.len(), 1);
            assert_eq!(file.props["team:owner"], Some(b"me".to_vec()));
            let content = file.content.as_mut().unwrap();
            assert_eq!(content.to_vec().unwrap(), b"hello world");
        });
    }

    #[test]
    fn wrong_checksum_is_reported_and_the_rest_drained() {
        run_async(async {
            let (result, reply) = run_commit_drive(add_file_drive("0badc0de")).await;
            assert!(reply.starts_with("( failure ( ( 200014 "), "{reply}");
            assert_eq!(result.unwrap_err().code(), 200_014);
        });
    }

    #[test]
    fn abort_edit_is_incomplete_data() {
        run_async(async {
            let items = vec![
                cmd("open-root", vec![none(), s("r")]),
                cmd("abort-edit", Vec::new()),
            ];
            let (result, reply) = run_commit_drive(items).await;
            assert!(reply.starts_with("( failure ( ( 200003 "), "{reply}");
            assert_eq!(result.unwrap_err().code(), 200_003);
        });
    }

    #[test]
    fn unknown_editor_words_fail_at_close_edit() {
        run_async(async {
            let items = vec![
                cmd("open-root", vec![none(), s("r")]),
                cmd("frobnicate", Vec::new()),
                cmd("close-dir", vec![s("r")]),
                cmd("close-edit", Vec::new()),
            ];
            let (result, reply) = run_commit_drive(items).await;
            assert!(reply.starts_with("( failure ( ( 210001 "), "{reply}");
            assert!(result.unwrap_err().message_summary().contains("frobnicate"));
        });
    }

    #[test]
    fn entry_props_are_rejected() {
        run_async(async {
            let items = vec![
                cmd("open-root", vec![none(), s("r")]),
                cmd(
                    "change-dir-prop",
                    vec![s("r"), s("svn:entry:uuid"), SvnItem::List(vec![s("x")])],
                ),
                cmd("close-dir", vec![s("r")]),
                cmd("close-edit", Vec::new()),
            ];
            let (result, _) = run_commit_drive(items).await;
            assert_eq!(result.unwrap_err().code(), 195_011);
        });
    }

    #[test]
    fn copy_sources_resolve_against_the_root_url() {
        run_async(async {
            let items = vec![
                cmd("open-root", vec![none(), s("r")]),
                cmd(
                    "add-dir",
                    vec![
                        s("b"),
                        s("r"),
                        s("d1"),
                        SvnItem::List(vec![s("svn://host/repo/branches/x"), SvnItem::Number(4)]),
                    ],
                ),
                cmd("close-dir", vec![s("d1")]),
                cmd(
                    "add-dir",
                    vec![
                        s("c"),
                        s("r"),
                        s("d2"),
                        SvnItem::List(vec![s("svn://elsewhere/other"), SvnItem::Number(4)]),
                    ],
                ),
                cmd("close-edit", Vec::new()),
            ];
            let (mut conn, mut client) = connected_conn();
            for item in &items[..4] {
                write_item_line(&mut client, item).await;
            }
            write_item_line(&mut client, &items[4]).await;
            let codec = SvndiffCodec::default();
            let target = EditTarget {
                anchor: "",
                root_url: "svn://host/repo",
                codec: &codec,
            };
            let result = read_commit_editor(&mut conn, target, |_: &str, _: Option<u64>| {
                Ok(Vec::new())
            })
            .await
            .unwrap();
            assert_eq!(result.unwrap_err().code(), ErrorCode::RaIllegalUrl.code());
        });
    }

    #[test]
    fn report_collects_entries_and_flags_link_path() {
        run_async(async {
            let (mut conn, mut client) = connected_conn();
            let items = vec![
                cmd(
                    "set-path",
                    vec![
                        s(""),
                        SvnItem::Number(3),
                        SvnItem::bool(false),
                        none(),
                        SvnItem::word("files"),
                    ],
                ),
                cmd("delete-path", vec![s("gone")]),
                cmd("finish-report", Vec::new()),
                cmd("set-path", vec![s("a"), SvnItem::Number(1), SvnItem::bool(true), none()]),
                cmd(
                    "link-path",
                    vec![s("b"), s("svn://h/r/b"), SvnItem::Number(1), SvnItem::bool(false), none()],
                ),
                cmd("finish-report", Vec::new()),
            ];
            for item in &items {
                write_item_line(&mut client, item).await;
            }

            let report = read_report(&mut conn).await.unwrap().unwrap();
            assert_eq!(
                report.entries,
                vec![
                    ReportEntry::SetPath {
                        path: String::new(),
                        rev: 3,
                        start_empty: false,
                        lock_token: None,
                        depth: Depth::Files,
                    },
                    ReportEntry::DeletePath {
                        path: "gone".into()
                    },
                ]
            );

            let err = read_report(&mut conn).await.unwrap().unwrap_err();
            assert_eq!(err.code(), ErrorCode::UnsupportedFeature.code());
        });
    }
}
