//! Main command-set handlers.
//!
//! Every handler writes the empty auth request first and then its response.
//! Parameter and repository problems are answered with a failure; only wire
//! faults propagate as [`SvnError`].

use tracing::debug;

use crate::delta::md5_hex;
use crate::editor::{DeltaNode, EditorScript, EditorSerializer, ReportEntry, SerializeContext};
use crate::path::{fs_path, join};
use crate::props::client_may_set;
use crate::rasvn::SvnItem;
use crate::rasvn::edit::{EditTarget, read_commit_editor, read_report, write_editor};
use crate::rasvn::parse::{
    commit_info_item, depth_or_recurse, dirent_item, failure_item, lockdesc_item,
    log_entry_item, opt_bool, opt_depth, opt_tuple_bytes, opt_tuple_string, opt_tuple_u64,
    parse_proplist, propdelta_item, proplist_item, req_bool, req_list, req_rel_path,
    req_string, req_u64, stat_item, with_entry_props,
};
use crate::repository::{CommitRequest, LogRequest, RevPropSelection, TreeDeltaRequest};
use crate::session::Session;
use crate::url::relative_to_root;
use crate::{
    Depth, DirentField, ErrorCode, NodeKind, PropKey, PropertyList, ServerError, StatEntry,
    SvnError,
};

/// Which tree-delta producer a report feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TreeDeltaKind {
    Update,
    Switch,
    Status,
}

impl Session<'_> {
    /// Root-relative path of a client path.
    fn repo_path(&self, rel: &str) -> String {
        join(self.repo.location(), rel)
    }

    fn req_repo_path(&self, params: &[SvnItem], idx: usize) -> Result<String, ServerError> {
        Ok(self.repo_path(&req_rel_path(params, idx, "path")?))
    }

    async fn respond(
        &mut self,
        result: Result<Vec<SvnItem>, ServerError>,
    ) -> Result<(), SvnError> {
        self.conn.write_auth_marker().await?;
        self.conn.write_response(result).await
    }

    fn entry_props(
        &self,
        props: PropertyList,
        path: &str,
        rev: u64,
    ) -> Result<PropertyList, ServerError> {
        Ok(match self.repo.stat(path, Some(rev))? {
            Some(stat) => with_entry_props(props, &stat, self.repo.uuid()),
            None => props,
        })
    }

    pub(crate) async fn get_latest_rev(&mut self) -> Result<(), SvnError> {
        let result = self
            .repo
            .latest_revision()
            .map(|rev| vec![SvnItem::Number(rev)])
            .map_err(ServerError::from);
        self.respond(result).await
    }

    /// `( path ( rev? ) )` -> `( kind )`
    pub(crate) async fn check_path(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let result = self.stat_at(params).map(|stat| {
            let kind = stat.map_or(NodeKind::None, |stat| stat.kind);
            vec![SvnItem::word(kind.as_str())]
        });
        self.respond(result).await
    }

    /// `( path ( rev? ) )` -> `( ( stat? ) )`
    pub(crate) async fn stat(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let result = self
            .stat_at(params)
            .map(|stat| vec![SvnItem::optional(stat.as_ref().map(stat_item))]);
        self.respond(result).await
    }

    fn stat_at(&self, params: &[SvnItem]) -> Result<Option<StatEntry>, ServerError> {
        let path = self.req_repo_path(params, 0)?;
        Ok(self.repo.stat(&path, opt_tuple_u64(params, 1))?)
    }

    /// `( path ( rev? ) want-props want-contents ?( field... ) )`
    pub(crate) async fn get_dir(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let result = self.get_dir_response(params);
        self.respond(result).await
    }

    fn get_dir_response(&self, params: &[SvnItem]) -> Result<Vec<SvnItem>, ServerError> {
        let path = self.req_repo_path(params, 0)?;
        let rev = opt_tuple_u64(params, 1);
        let want_props = req_bool(params, 2, "want-props")?;
        let want_contents = req_bool(params, 3, "want-contents")?;
        let fields: Vec<DirentField> = match params.get(4).and_then(SvnItem::as_list) {
            Some(words) => words
                .iter()
                .filter_map(SvnItem::as_word)
                .filter_map(DirentField::from_word)
                .collect(),
            None => DirentField::ALL.to_vec(),
        };

        let listing = self.repo.get_dir(&path, rev, want_props, &fields)?;
        let props = if want_props {
            self.entry_props(listing.props, &path, listing.rev)?
        } else {
            PropertyList::new()
        };
        let entries = if want_contents {
            listing
                .entries
                .iter()
                .map(|entry| dirent_item(&entry.name, &entry.stat))
                .collect()
        } else {
            Vec::new()
        };
        Ok(vec![
            SvnItem::Number(listing.rev),
            proplist_item(&props),
            SvnItem::List(entries),
        ])
    }

    /// `( path ( rev? ) want-props want-contents ?want-iprops )`
    ///
    /// Answers `( ( md5 ) rev props )`, then the contents as strings ended
    /// by an empty one, then a second response.
    pub(crate) async fn get_file(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let prepared = self.get_file_response(params);
        self.conn.write_auth_marker().await?;
        let (header, contents) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return self.conn.write_failure(&err).await,
        };
        self.conn.write_success(header).await?;
        let Some(contents) = contents else {
            return Ok(());
        };
        let chunk_size = self.config.max_chunk_size;
        for chunk in contents.chunks(chunk_size) {
            self.conn.queue_item(&SvnItem::string(chunk));
            if self.conn.queued_len() >= chunk_size {
                self.conn.flush().await?;
            }
        }
        self.conn.queue_item(&SvnItem::String(Vec::new()));
        self.conn.write_success(Vec::new()).await
    }

    fn get_file_response(
        &self,
        params: &[SvnItem],
    ) -> Result<(Vec<SvnItem>, Option<Vec<u8>>), ServerError> {
        let path = self.req_repo_path(params, 0)?;
        let rev = opt_tuple_u64(params, 1);
        let want_props = req_bool(params, 2, "want-props")?;
        let want_contents = req_bool(params, 3, "want-contents")?;

        let file = self.repo.get_file(&path, rev, want_props)?;
        let props = if want_props {
            self.entry_props(file.props, &path, file.rev)?
        } else {
            PropertyList::new()
        };
        let header = vec![
            SvnItem::List(vec![SvnItem::string(md5_hex(&file.contents))]),
            SvnItem::Number(file.rev),
            proplist_item(&props),
        ];
        Ok((header, want_contents.then_some(file.contents)))
    }

    /// `( url )`
    pub(crate) async fn reparent(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let result = req_string(params, 0, "url").and_then(|url| {
            relative_to_root(&self.root_url, &url).ok_or_else(|| {
                ServerError::new(
                    ErrorCode::RaIllegalUrl,
                    format!(
                        "URL '{url}' is not a child of the repository root URL '{}'",
                        self.root_url
                    ),
                )
            })
        });
        let result = result.map(|location| {
            debug!(location = %location, "reparent");
            self.repo.set_location(&location);
            Vec::new()
        });
        self.respond(result).await
    }

    /// `( path )` -> `( ( lock? ) )`
    pub(crate) async fn get_lock(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let result = self.req_repo_path(params, 0).and_then(|path| {
            let lock = self.repo.get_lock(&path)?;
            Ok(vec![SvnItem::optional(lock.as_ref().map(lockdesc_item))])
        });
        self.respond(result).await
    }

    /// `( path ?( depth ) )` -> `( ( lock... ) )`
    pub(crate) async fn get_locks(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let result = self.req_repo_path(params, 0).and_then(|path| {
            let depth = params
                .get(1)
                .and_then(SvnItem::as_list)
                .and_then(|tuple| opt_depth(tuple, 0))
                .unwrap_or(Depth::Infinity);
            let locks = self.repo.get_locks(&path, depth)?;
            Ok(vec![SvnItem::List(locks.iter().map(lockdesc_item).collect())])
        });
        self.respond(result).await
    }

    /// `( path ( comment? ) steal-lock ( current-rev? ) )` -> `( lock )`
    pub(crate) async fn lock(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let result = self.lock_one(params);
        self.respond(result).await
    }

    fn lock_one(&mut self, params: &[SvnItem]) -> Result<Vec<SvnItem>, ServerError> {
        let path = self.req_repo_path(params, 0)?;
        let comment = opt_tuple_string(params, 1);
        let steal = req_bool(params, 2, "steal-lock")?;
        let current_rev = opt_tuple_u64(params, 3);
        let lock = self.repo.lock(
            &path,
            self.user.as_deref(),
            comment.as_deref(),
            steal,
            current_rev,
        )?;
        Ok(vec![lockdesc_item(&lock)])
    }

    /// `( ( comment? ) steal-lock ( ( path ( current-rev? ) )... ) )`
    ///
    /// One `success`/`failure` line per target, in request order, then
    /// `done` and the overall response.
    pub(crate) async fn lock_many(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        self.conn.write_auth_marker().await?;
        let parsed = (|| -> Result<_, ServerError> {
            let comment = opt_tuple_string(params, 0);
            let steal = req_bool(params, 1, "steal-lock")?;
            let mut targets = Vec::new();
            for target in req_list(params, 2, "lock targets")? {
                let target = target
                    .as_list()
                    .ok_or_else(|| ServerError::malformed("lock target is not a list"))?;
                targets.push((self.req_repo_path(target, 0)?, opt_tuple_u64(target, 1)));
            }
            Ok((comment, steal, targets))
        })();
        let (comment, steal, targets) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => return self.conn.write_failure(&err).await,
        };

        for (path, current_rev) in targets {
            let line = match self.repo.lock(
                &path,
                self.user.as_deref(),
                comment.as_deref(),
                steal,
                current_rev,
            ) {
                Ok(lock) => success_line(vec![lockdesc_item(&lock)]),
                Err(err) => {
                    debug!(path = %path, error = %err, "lock-many target failed");
                    failure_item(&ServerError::from(err))
                }
            };
            self.conn.write_item(&line).await?;
        }
        self.conn.write_word("done").await?;
        self.conn.write_success(Vec::new()).await
    }

    /// `( path ( token? ) break-lock )`
    pub(crate) async fn unlock(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let result = (|| -> Result<Vec<SvnItem>, ServerError> {
            let path = self.req_repo_path(params, 0)?;
            let token = opt_tuple_string(params, 1);
            let break_lock = req_bool(params, 2, "break-lock")?;
            self.repo.unlock(&path, token.as_deref(), break_lock)?;
            Ok(Vec::new())
        })();
        self.respond(result).await
    }

    /// `( break-lock ( ( path ( token? ) )... ) )`
    pub(crate) async fn unlock_many(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        self.conn.write_auth_marker().await?;
        let parsed = (|| -> Result<_, ServerError> {
            let break_lock = req_bool(params, 0, "break-lock")?;
            let mut targets = Vec::new();
            for target in req_list(params, 1, "unlock targets")? {
                let target = target
                    .as_list()
                    .ok_or_else(|| ServerError::malformed("unlock target is not a list"))?;
                let rel = req_rel_path(target, 0, "path")?;
                targets.push((rel, opt_tuple_string(target, 1)));
            }
            Ok((break_lock, targets))
        })();
        let (break_lock, targets) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => return self.conn.write_failure(&err).await,
        };

        for (rel, token) in targets {
            let path = self.repo_path(&rel);
            let line = match self.repo.unlock(&path, token.as_deref(), break_lock) {
                Ok(()) => success_line(vec![SvnItem::string(rel)]),
                Err(err) => {
                    debug!(path = %path, error = %err, "unlock-many target failed");
                    failure_item(&ServerError::from(err))
                }
            };
            self.conn.write_item(&line).await?;
        }
        self.conn.write_word("done").await?;
        self.conn.write_success(Vec::new()).await
    }

    /// `( ( path... ) ( start? ) ( end? ) changed-paths strict-node ?limit
    /// ?include-merged ?revprop-word ?( revprop... ) )`
    pub(crate) async fn log(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        self.conn.write_auth_marker().await?;
        let request = match self.parse_log_request(params) {
            Ok(request) => request,
            Err(err) => return self.conn.write_failure(&err).await,
        };
        let result = self.repo.log(&request).map_err(ServerError::from);
        if let Ok(entries) = &result {
            let limit = usize::try_from(request.limit).unwrap_or(usize::MAX);
            let limit = if limit == 0 { usize::MAX } else { limit };
            for entry in entries.iter().take(limit) {
                self.conn
                    .queue_item(&log_entry_item(entry, request.changed_paths));
                if self.conn.queued_len() >= self.config.max_chunk_size {
                    self.conn.flush().await?;
                }
            }
        }
        self.conn.write_word("done").await?;
        self.conn.write_response(result.map(|_| Vec::new())).await
    }

    fn parse_log_request(&self, params: &[SvnItem]) -> Result<LogRequest, ServerError> {
        let targets = req_list(params, 0, "log paths")?;
        let paths = (0..targets.len())
            .map(|idx| Ok(self.repo_path(&req_rel_path(targets, idx, "log path")?)))
            .collect::<Result<Vec<_>, ServerError>>()?;
        let revprops = match params.get(7).and_then(SvnItem::as_word) {
            None | Some("all-revprops") => RevPropSelection::All,
            Some("revprops") => RevPropSelection::Named(
                params
                    .get(8)
                    .and_then(SvnItem::as_list)
                    .unwrap_or_default()
                    .iter()
                    .filter_map(SvnItem::as_string)
                    .collect(),
            ),
            Some(other) => {
                return Err(ServerError::malformed(format!(
                    "Unknown revprop word '{other}' in log command"
                )));
            }
        };
        Ok(LogRequest {
            paths,
            start: opt_tuple_u64(params, 1),
            end: opt_tuple_u64(params, 2),
            changed_paths: req_bool(params, 3, "changed-paths")?,
            strict_node_history: req_bool(params, 4, "strict-node")?,
            limit: params.get(5).and_then(SvnItem::as_u64).unwrap_or(0),
            include_merged_revisions: opt_bool(params, 6, false),
            revprops,
        })
    }

    /// `( rev )` -> `( props )`
    pub(crate) async fn rev_proplist(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let result = req_u64(params, 0, "rev").and_then(|rev| {
            let props = self.repo.rev_proplist(rev)?;
            Ok(vec![proplist_item(&props)])
        });
        self.respond(result).await
    }

    /// `( rev name )` -> `( ( value? ) )`
    pub(crate) async fn rev_prop(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let result = (|| -> Result<Vec<SvnItem>, ServerError> {
            let rev = req_u64(params, 0, "rev")?;
            let name = req_string(params, 1, "name")?;
            let value = self.repo.rev_prop(rev, &name)?;
            Ok(vec![SvnItem::optional(value.map(SvnItem::String))])
        })();
        self.respond(result).await
    }

    /// `( rev name ( value? ) )`
    pub(crate) async fn change_rev_prop(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let result = (|| -> Result<Vec<SvnItem>, ServerError> {
            let rev = req_u64(params, 0, "rev")?;
            let name = req_string(params, 1, "name")?;
            if !client_may_set(&name) {
                return Err(ServerError::new(
                    ErrorCode::BadPropertyName,
                    format!("'{name}' is not a valid revision property name"),
                ));
            }
            let value = opt_tuple_bytes(params, 2);
            self.repo.change_rev_prop(rev, &name, value.as_deref())?;
            Ok(Vec::new())
        })();
        self.respond(result).await
    }

    /// `( path ( start? ) ( end? ) ?include-merged )`
    ///
    /// Per revision: `( path rev ( rev-props ) ( prop-deltas ) merged )`, the
    /// text delta as strings and an empty string; then `done`.
    pub(crate) async fn get_file_revs(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        self.conn.write_auth_marker().await?;
        let revisions = (|| -> Result<_, ServerError> {
            let path = self.req_repo_path(params, 0)?;
            let start = opt_tuple_u64(params, 1);
            let end = opt_tuple_u64(params, 2);
            let include_merged = opt_bool(params, 3, false);
            Ok(self.repo.get_file_revs(&path, start, end, include_merged)?)
        })();
        let revisions = match revisions {
            Ok(revisions) => revisions,
            Err(err) => {
                self.conn.write_word("done").await?;
                return self.conn.write_failure(&err).await;
            }
        };

        let mut failure = None;
        for file_rev in &revisions {
            let chunks = match &file_rev.contents {
                Some(contents) => {
                    match self.config.codec.encode_fulltext(contents, &self.client_caps) {
                        Ok(chunks) => chunks,
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
                None => Vec::new(),
            };
            self.conn.queue_item(&SvnItem::List(vec![
                SvnItem::string(fs_path(&file_rev.path)),
                SvnItem::Number(file_rev.rev),
                proplist_item(&file_rev.rev_props),
                propdelta_item(&file_rev.prop_deltas),
                SvnItem::bool(file_rev.merged_revision),
            ]));
            for chunk in chunks {
                self.conn.queue_item(&SvnItem::String(chunk));
            }
            self.conn.queue_item(&SvnItem::String(Vec::new()));
            if self.conn.queued_len() >= self.config.max_chunk_size {
                self.conn.flush().await?;
            }
        }
        self.conn.write_word("done").await?;
        match failure {
            Some(err) => self.conn.write_failure(&err).await,
            None => self.conn.write_success(Vec::new()).await,
        }
    }

    /// `( path peg-rev ( rev... ) )` -> `( rev abs-path )`... `done`
    pub(crate) async fn get_locations(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        self.conn.write_auth_marker().await?;
        let result = (|| -> Result<_, ServerError> {
            let path = self.req_repo_path(params, 0)?;
            let peg_rev = req_u64(params, 1, "peg-rev")?;
            let revs: Vec<u64> = req_list(params, 2, "location revisions")?
                .iter()
                .filter_map(SvnItem::as_u64)
                .collect();
            Ok(self.repo.get_locations(&path, peg_rev, &revs)?)
        })();
        if let Ok(locations) = &result {
            for location in locations {
                self.conn.queue_item(&SvnItem::List(vec![
                    SvnItem::Number(location.rev),
                    SvnItem::string(fs_path(&location.path)),
                ]));
            }
        }
        self.conn.write_word("done").await?;
        self.conn.write_response(result.map(|_| Vec::new())).await
    }

    /// `( log-msg ?( ( path token )... ) ?keep-locks ?( rev-props ) )`
    ///
    /// After the client's editor drive the answer to `close-edit` is written,
    /// then another auth request and the bare commit info.
    pub(crate) async fn commit(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        self.conn.write_auth_marker().await?;
        let parsed = self.parse_commit_params(params);
        let (log_message, lock_tokens, keep_locks, rev_props) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => return self.conn.write_failure(&err).await,
        };
        self.conn.write_success(Vec::new()).await?;

        let anchor = self.repo.location().to_string();
        let target = EditTarget {
            anchor: &anchor,
            root_url: &self.root_url,
            codec: self.config.codec.as_ref(),
        };
        let repo = &mut self.repo;
        let drive = read_commit_editor(&mut self.conn, target, move |path, rev| {
            Ok(repo.get_file(path, rev, false)?.contents)
        })
        .await?;
        let edit = match drive {
            Ok(edit) => edit,
            Err(err) => {
                debug!(error = %err, "commit editor failed");
                return Ok(());
            }
        };

        debug!(nodes = edit.nodes().len(), "committing");
        let request = CommitRequest {
            log_message,
            lock_tokens,
            keep_locks,
            rev_props,
            edit,
            author: self.user.clone(),
        };
        let info = match self.repo.commit(request) {
            Ok(info) => info,
            Err(err) => return self.conn.write_failure(&ServerError::from(err)).await,
        };
        self.conn.write_success(Vec::new()).await?;
        self.conn.write_auth_marker().await?;
        self.conn.write_item(&commit_info_item(&info)).await
    }

    fn parse_commit_params(
        &self,
        params: &[SvnItem],
    ) -> Result<(String, Vec<(String, String)>, bool, PropertyList), ServerError> {
        let log_message = req_string(params, 0, "log message")?;
        let mut lock_tokens = Vec::new();
        if let Some(pairs) = params.get(1).and_then(SvnItem::as_list) {
            for pair in pairs {
                let pair = pair
                    .as_list()
                    .ok_or_else(|| ServerError::malformed("lock token entry is not a list"))?;
                let path = self.repo_path(&req_rel_path(pair, 0, "lock path")?);
                lock_tokens.push((path, req_string(pair, 1, "lock token")?));
            }
        }
        let keep_locks = opt_bool(params, 2, false);
        let mut rev_props = match params.get(3) {
            Some(item) => parse_proplist(item)?,
            None => PropertyList::new(),
        };
        if let Some(name) = rev_props.keys().find(|name| !client_may_set(name)) {
            return Err(ServerError::new(
                ErrorCode::BadPropertyName,
                format!("'{name}' is not a valid revision property name"),
            ));
        }
        rev_props
            .entry(PropKey::Log.name().to_string())
            .or_insert_with(|| log_message.clone().into_bytes());
        Ok((log_message, lock_tokens, keep_locks, rev_props))
    }

    /// `( ( rev? ) target recurse ?depth send-copyfrom ?ignore-ancestry )`
    pub(crate) async fn update(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let request = (|| -> Result<_, ServerError> {
            Ok(TreeDeltaRequest {
                rev: opt_tuple_u64(params, 0),
                anchor: self.repo.location().to_string(),
                target: req_rel_path(params, 1, "target")?,
                depth: depth_or_recurse(params, 3, 2),
                switch_path: None,
                send_copyfrom_args: opt_bool(params, 4, false),
                ignore_ancestry: opt_bool(params, 5, false),
            })
        })();
        self.tree_delta(TreeDeltaKind::Update, request).await
    }

    /// `( ( rev? ) target recurse url ?depth send-copyfrom ?ignore-ancestry )`
    pub(crate) async fn switch(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let request = (|| -> Result<_, ServerError> {
            let url = req_string(params, 3, "switch url")?;
            let switch_path = relative_to_root(&self.root_url, &url).ok_or_else(|| {
                ServerError::new(
                    ErrorCode::RaIllegalUrl,
                    format!("Cannot switch to '{url}': not in the repository"),
                )
            })?;
            Ok(TreeDeltaRequest {
                rev: opt_tuple_u64(params, 0),
                anchor: self.repo.location().to_string(),
                target: req_rel_path(params, 1, "target")?,
                depth: depth_or_recurse(params, 4, 2),
                switch_path: Some(switch_path),
                send_copyfrom_args: opt_bool(params, 5, false),
                ignore_ancestry: opt_bool(params, 6, false),
            })
        })();
        self.tree_delta(TreeDeltaKind::Switch, request).await
    }

    /// `( target recurse ( rev? ) ?depth )`
    pub(crate) async fn status(&mut self, params: &[SvnItem]) -> Result<(), SvnError> {
        let request = (|| -> Result<_, ServerError> {
            Ok(TreeDeltaRequest {
                rev: opt_tuple_u64(params, 2),
                anchor: self.repo.location().to_string(),
                target: req_rel_path(params, 0, "target")?,
                depth: depth_or_recurse(params, 3, 1),
                switch_path: None,
                send_copyfrom_args: false,
                ignore_ancestry: false,
            })
        })();
        self.tree_delta(TreeDeltaKind::Status, request).await
    }

    /// Reads the report, then drives the resulting editor to the client.
    ///
    /// The report is always read, even when the parameters were bad, so the
    /// connection stays in step. A finished report gets a second auth
    /// marker before the drive starts.
    async fn tree_delta(
        &mut self,
        kind: TreeDeltaKind,
        request: Result<TreeDeltaRequest, ServerError>,
    ) -> Result<(), SvnError> {
        self.conn.write_auth_marker().await?;
        let report = read_report(&mut self.conn).await?;
        let (request, report) = match (request, report) {
            (Err(err), _) | (_, Err(err)) => return self.conn.write_failure(&err).await,
            (Ok(request), Ok(report)) => (request, report),
        };
        if report.aborted {
            debug!(?kind, "report aborted");
            return self.conn.write_success(Vec::new()).await;
        }
        debug!(?kind, entries = report.entries.len(), target = %request.target, "report received");
        self.conn.write_auth_marker().await?;

        let script = match self.tree_delta_script(kind, &request, &report.entries) {
            Ok(script) => script,
            Err(err) => return self.conn.write_failure(&err).await,
        };
        let ctx = SerializeContext {
            uuid: self.repo.uuid(),
            root_url: &self.root_url,
            codec: self.config.codec.as_ref(),
            peer: &self.client_caps,
        };
        let commands = EditorSerializer::new(script, ctx);
        let outcome = write_editor(&mut self.conn, commands, self.config.max_chunk_size).await?;
        self.conn.write_response(outcome.map(|()| Vec::new())).await
    }

    fn tree_delta_script(
        &self,
        kind: TreeDeltaKind,
        request: &TreeDeltaRequest,
        report: &[ReportEntry],
    ) -> Result<EditorScript, ServerError> {
        Ok(match kind {
            TreeDeltaKind::Update => self.repo.update(request, report)?,
            TreeDeltaKind::Status => self.repo.status(request, report)?,
            TreeDeltaKind::Switch => match self.switch_file_script(request, report)? {
                Some(script) => script,
                None => self.repo.switch(request, report)?,
            },
        })
    }

    /// A switch whose destination is a file is sent as a single `open-file`
    /// carrying the full destination text.
    fn switch_file_script(
        &self,
        request: &TreeDeltaRequest,
        report: &[ReportEntry],
    ) -> Result<Option<EditorScript>, ServerError> {
        let Some(switch_path) = request.switch_path.as_deref() else {
            return Ok(None);
        };
        if request.target.is_empty() {
            return Ok(None);
        }
        let Some(stat) = self.repo.stat(switch_path, request.rev)? else {
            return Ok(None);
        };
        if stat.kind != NodeKind::File {
            return Ok(None);
        }

        let target_rev = match request.rev {
            Some(rev) => rev,
            None => self.repo.latest_revision()?,
        };
        let file = self.repo.get_file(switch_path, Some(target_rev), true)?;
        let base_rev = report.iter().find_map(|entry| match entry {
            ReportEntry::SetPath { path, rev, .. } if *path == request.target => Some(*rev),
            _ => None,
        });
        let mut node = DeltaNode::open_file(base_rev, Some(file.contents)).with_committed(
            stat.created_rev,
            stat.created_date,
            stat.last_author,
        );
        for (name, value) in file.props {
            node = node.with_prop(name, Some(value));
        }
        let script = EditorScript::new(target_rev)
            .with_node(&request.target, node)
            .map_err(|err| ServerError::malformed(err.to_string()))?;
        Ok(Some(script))
    }
}

fn success_line(params: Vec<SvnItem>) -> SvnItem {
    SvnItem::List(vec![SvnItem::word("success"), SvnItem::List(params)])
}
