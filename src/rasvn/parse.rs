//! Typed access to command parameter lists, and builders for the tuples the
//! server sends back.
//!
//! Accessors fail with a recoverable `MALFORMED_DATA` [`ServerError`]; the
//! dispatcher answers those with a failure and keeps the session.

use crate::path::{fs_path, validate_rel_dir_path};
use crate::{
    ChangedPath, CommitInfo, Depth, ErrorCode, LockDesc, LogEntry, PropDelta, PropKey,
    PropertyList, ServerError, ServerErrorItem, StatEntry,
};

use super::SvnItem;

pub(crate) fn failure_item(err: &ServerError) -> SvnItem {
    let chain = if err.chain.is_empty() {
        vec![SvnItem::List(vec![
            SvnItem::Number(ErrorCode::Unknown.code()),
            SvnItem::string(err.message_summary()),
            SvnItem::string(""),
            SvnItem::Number(0),
        ])]
    } else {
        err.chain
            .iter()
            .map(|item| {
                SvnItem::List(vec![
                    SvnItem::Number(item.code),
                    SvnItem::string(item.message.clone().unwrap_or_default()),
                    SvnItem::string(item.file.clone().unwrap_or_default()),
                    SvnItem::Number(item.line.unwrap_or(0)),
                ])
            })
            .collect()
    };
    SvnItem::List(vec![SvnItem::word("failure"), SvnItem::List(chain)])
}

/// Parses the error list of a peer's `failure` response.
pub(crate) fn parse_failure_chain(items: &[SvnItem]) -> ServerError {
    let mut chain = Vec::new();
    for item in items {
        let SvnItem::List(parts) = item else {
            continue;
        };
        if parts.len() < 4 {
            continue;
        }
        chain.push(ServerErrorItem {
            code: parts[0].as_u64().unwrap_or(0),
            message: lossy_string(&parts[1]).filter(|m| !m.is_empty()),
            file: lossy_string(&parts[2]).filter(|s| !s.is_empty()),
            line: parts[3].as_u64(),
        });
    }
    ServerError::from_chain(chain)
}

fn lossy_string(item: &SvnItem) -> Option<String> {
    match item {
        SvnItem::String(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        SvnItem::Word(word) => Some(word.to_string()),
        _ => None,
    }
}

// Parameter accessors.

#[track_caller]
fn missing(what: &str) -> ServerError {
    ServerError::malformed(format!("missing or malformed parameter: {what}"))
}

#[track_caller]
pub(crate) fn req_list<'a>(
    params: &'a [SvnItem],
    idx: usize,
    what: &str,
) -> Result<&'a [SvnItem], ServerError> {
    params
        .get(idx)
        .and_then(SvnItem::as_list)
        .ok_or_else(|| missing(what))
}

#[track_caller]
pub(crate) fn req_bytes(params: &[SvnItem], idx: usize, what: &str) -> Result<Vec<u8>, ServerError> {
    params
        .get(idx)
        .and_then(SvnItem::as_bytes)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| missing(what))
}

#[track_caller]
pub(crate) fn req_string(params: &[SvnItem], idx: usize, what: &str) -> Result<String, ServerError> {
    params
        .get(idx)
        .and_then(SvnItem::as_string)
        .ok_or_else(|| missing(what))
}

/// A canonical repository-relative path; the root (`""`) is allowed.
#[track_caller]
pub(crate) fn req_rel_path(
    params: &[SvnItem],
    idx: usize,
    what: &str,
) -> Result<String, ServerError> {
    let raw = req_string(params, idx, what)?;
    validate_rel_dir_path(&raw).map_err(|err| ServerError::malformed(err.to_string()))
}

#[track_caller]
pub(crate) fn req_u64(params: &[SvnItem], idx: usize, what: &str) -> Result<u64, ServerError> {
    params
        .get(idx)
        .and_then(SvnItem::as_u64)
        .ok_or_else(|| missing(what))
}

#[track_caller]
pub(crate) fn req_bool(params: &[SvnItem], idx: usize, what: &str) -> Result<bool, ServerError> {
    params
        .get(idx)
        .and_then(SvnItem::as_bool)
        .ok_or_else(|| missing(what))
}

/// Optional trailing boolean; absent means `default`.
pub(crate) fn opt_bool(params: &[SvnItem], idx: usize, default: bool) -> bool {
    params
        .get(idx)
        .and_then(SvnItem::as_bool)
        .unwrap_or(default)
}

fn tuple_first(item: Option<&SvnItem>) -> Option<&SvnItem> {
    item.and_then(SvnItem::as_list).and_then(<[SvnItem]>::first)
}

/// `( rev? )`
pub(crate) fn opt_tuple_u64(params: &[SvnItem], idx: usize) -> Option<u64> {
    tuple_first(params.get(idx)).and_then(SvnItem::as_u64)
}

/// `( string? )`
pub(crate) fn opt_tuple_string(params: &[SvnItem], idx: usize) -> Option<String> {
    tuple_first(params.get(idx)).and_then(SvnItem::as_string)
}

/// `( bytes? )`
pub(crate) fn opt_tuple_bytes(params: &[SvnItem], idx: usize) -> Option<Vec<u8>> {
    tuple_first(params.get(idx))
        .and_then(SvnItem::as_bytes)
        .map(<[u8]>::to_vec)
}

/// `( copy-path copy-rev )` or `( )`.
#[track_caller]
pub(crate) fn opt_tuple_copyfrom(
    params: &[SvnItem],
    idx: usize,
) -> Result<Option<(String, u64)>, ServerError> {
    let Some(items) = params.get(idx).and_then(SvnItem::as_list) else {
        return Ok(None);
    };
    if items.is_empty() {
        return Ok(None);
    }
    let path = req_string(items, 0, "copy-path")?;
    let rev = req_u64(items, 1, "copy-rev")?;
    Ok(Some((path, rev)))
}

/// A depth word, if present and recognized.
pub(crate) fn opt_depth(params: &[SvnItem], idx: usize) -> Option<Depth> {
    params
        .get(idx)
        .and_then(SvnItem::as_word)
        .and_then(Depth::from_word)
}

/// Depth from an explicit depth word, falling back to the `recurse` flag.
pub(crate) fn depth_or_recurse(params: &[SvnItem], depth_idx: usize, recurse_idx: usize) -> Depth {
    opt_depth(params, depth_idx)
        .unwrap_or_else(|| Depth::from_recurse(opt_bool(params, recurse_idx, true)))
}

/// `( ( name value ) ... )`
pub(crate) fn parse_proplist(item: &SvnItem) -> Result<PropertyList, ServerError> {
    let entries = item
        .as_list()
        .ok_or_else(|| ServerError::malformed("property list is not a list"))?;
    let mut props = PropertyList::new();
    for entry in entries {
        let items = entry
            .as_list()
            .ok_or_else(|| ServerError::malformed("property entry is not a list"))?;
        let name = req_string(items, 0, "property name")?;
        let value = req_bytes(items, 1, "property value")?;
        props.insert(name, value);
    }
    Ok(props)
}

// Response builders.

pub(crate) fn opt_string(value: Option<&str>) -> SvnItem {
    SvnItem::optional(value.map(SvnItem::from))
}

pub(crate) fn opt_number(value: Option<u64>) -> SvnItem {
    SvnItem::optional(value.map(SvnItem::Number))
}

pub(crate) fn proplist_item(props: &PropertyList) -> SvnItem {
    SvnItem::List(
        props
            .iter()
            .map(|(name, value)| {
                SvnItem::List(vec![
                    SvnItem::string(name.as_str()),
                    SvnItem::string(value.clone()),
                ])
            })
            .collect(),
    )
}

/// `( ( name ( value? ) ) ... )`, used by `get-file-revs`.
pub(crate) fn propdelta_item(deltas: &[PropDelta]) -> SvnItem {
    SvnItem::List(
        deltas
            .iter()
            .map(|delta| {
                SvnItem::List(vec![
                    SvnItem::string(delta.name.as_str()),
                    SvnItem::optional(delta.value.clone().map(SvnItem::String)),
                ])
            })
            .collect(),
    )
}

/// Merges the entry props the server maintains into `props`.
pub(crate) fn with_entry_props(
    mut props: PropertyList,
    stat: &StatEntry,
    uuid: &str,
) -> PropertyList {
    if let Some(rev) = stat.created_rev {
        props.insert(
            PropKey::EntryCommittedRev.name().to_string(),
            rev.to_string().into_bytes(),
        );
    }
    if let Some(date) = &stat.created_date {
        props.insert(
            PropKey::EntryCommittedDate.name().to_string(),
            date.clone().into_bytes(),
        );
    }
    if let Some(author) = &stat.last_author {
        props.insert(
            PropKey::EntryLastAuthor.name().to_string(),
            author.clone().into_bytes(),
        );
    }
    props.insert(
        PropKey::EntryUuid.name().to_string(),
        uuid.as_bytes().to_vec(),
    );
    props
}

/// `( path token owner ( comment? ) created ( expires? ) )`
pub(crate) fn lockdesc_item(lock: &LockDesc) -> SvnItem {
    SvnItem::List(vec![
        SvnItem::string(fs_path(&lock.path)),
        SvnItem::string(lock.token.as_str()),
        SvnItem::string(lock.owner.as_str()),
        opt_string(lock.comment.as_deref()),
        SvnItem::string(lock.created.as_str()),
        opt_string(lock.expires.as_deref()),
    ])
}

/// `stat` entry: `( kind size has-props ( created-rev? ) ( date? ) ( author? ) )`
pub(crate) fn stat_item(stat: &StatEntry) -> SvnItem {
    SvnItem::List(vec![
        SvnItem::word(stat.kind.as_str()),
        SvnItem::Number(stat.size),
        SvnItem::bool(stat.has_props),
        opt_number(stat.created_rev),
        opt_string(stat.created_date.as_deref()),
        opt_string(stat.last_author.as_deref()),
    ])
}

/// `get-dir` entry: `( name kind size has-props created-rev ( date? ) ( author? ) )`
pub(crate) fn dirent_item(name: &str, stat: &StatEntry) -> SvnItem {
    SvnItem::List(vec![
        SvnItem::string(name),
        SvnItem::word(stat.kind.as_str()),
        SvnItem::Number(stat.size),
        SvnItem::bool(stat.has_props),
        SvnItem::Number(stat.created_rev.unwrap_or(0)),
        opt_string(stat.created_date.as_deref()),
        opt_string(stat.last_author.as_deref()),
    ])
}

fn changed_path_item(change: &ChangedPath) -> SvnItem {
    let copy_from = match &change.copy_from {
        Some((path, rev)) => SvnItem::List(vec![
            SvnItem::string(fs_path(path)),
            SvnItem::Number(*rev),
        ]),
        None => SvnItem::List(Vec::new()),
    };
    let mut node_info = Vec::new();
    if let Some(kind) = change.node_kind {
        node_info.push(SvnItem::word(kind.as_str()));
        node_info.push(SvnItem::optional(change.text_mods.map(SvnItem::bool)));
        node_info.push(SvnItem::optional(change.prop_mods.map(SvnItem::bool)));
    }
    SvnItem::List(vec![
        SvnItem::string(fs_path(&change.path)),
        SvnItem::word(change.action.as_word()),
        copy_from,
        SvnItem::List(node_info),
    ])
}

/// One `log` entry:
/// `( ( changed-path ... ) rev ( author? ) ( date? ) ( message? ) has-children invalid-revnum revprop-count rev-props subtractive-merge )`
pub(crate) fn log_entry_item(entry: &LogEntry, with_changed_paths: bool) -> SvnItem {
    let changes = if with_changed_paths {
        entry.changed_paths.iter().map(changed_path_item).collect()
    } else {
        Vec::new()
    };
    SvnItem::List(vec![
        SvnItem::List(changes),
        SvnItem::Number(entry.rev),
        opt_string(entry.author.as_deref()),
        opt_string(entry.date.as_deref()),
        opt_string(entry.message.as_deref()),
        SvnItem::bool(entry.has_children),
        SvnItem::bool(false),
        SvnItem::Number(entry.rev_props.len() as u64),
        proplist_item(&entry.rev_props),
        SvnItem::bool(entry.subtractive_merge),
    ])
}

/// `( new-rev ( date? ) ( author? ) ( post-commit-err? ) )`
pub(crate) fn commit_info_item(info: &CommitInfo) -> SvnItem {
    SvnItem::List(vec![
        SvnItem::Number(info.new_rev),
        opt_string(info.date.as_deref()),
        opt_string(info.author.as_deref()),
        opt_string(info.post_commit_err.as_deref()),
    ])
}
