//! Per-connection state machine.
//!
//! `Greeting -> Authenticating -> RepositoryBound -> CommandLoop -> Closed`.
//! Recoverable problems during the handshake are answered with a failure and
//! end the session cleanly; anything on the fatal channel ends it with an
//! error.

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::debug;

use crate::path::{fs_path, skip_ancestor};
use crate::rasvn::SvnItem;
use crate::rasvn::conn::RaSvnConnection;
use crate::rasvn::sasl::negotiate;
use crate::repository::Repository;
use crate::server::ServerConfig;
use crate::{
    Capability, CapabilitySet, ErrorCode, RepositoryError, ServerError, SvnError, SvnUrl,
};

/// Protocol version spoken by this server (both minimum and maximum).
const PROTOCOL_VERSION: u64 = 2;

/// Main command-set vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Command {
    GetLatestRev,
    CheckPath,
    Stat,
    GetDir,
    GetFile,
    Reparent,
    GetLock,
    GetLocks,
    Lock,
    LockMany,
    Unlock,
    UnlockMany,
    Log,
    RevProplist,
    RevProp,
    ChangeRevProp,
    GetFileRevs,
    GetLocations,
    Commit,
    Update,
    Switch,
    Status,
}

impl Command {
    const ALL: [Command; 22] = [
        Command::GetLatestRev,
        Command::CheckPath,
        Command::Stat,
        Command::GetDir,
        Command::GetFile,
        Command::Reparent,
        Command::GetLock,
        Command::GetLocks,
        Command::Lock,
        Command::LockMany,
        Command::Unlock,
        Command::UnlockMany,
        Command::Log,
        Command::RevProplist,
        Command::RevProp,
        Command::ChangeRevProp,
        Command::GetFileRevs,
        Command::GetLocations,
        Command::Commit,
        Command::Update,
        Command::Switch,
        Command::Status,
    ];

    pub(crate) fn word(self) -> &'static str {
        match self {
            Command::GetLatestRev => "get-latest-rev",
            Command::CheckPath => "check-path",
            Command::Stat => "stat",
            Command::GetDir => "get-dir",
            Command::GetFile => "get-file",
            Command::Reparent => "reparent",
            Command::GetLock => "get-lock",
            Command::GetLocks => "get-locks",
            Command::Lock => "lock",
            Command::LockMany => "lock-many",
            Command::Unlock => "unlock",
            Command::UnlockMany => "unlock-many",
            Command::Log => "log",
            Command::RevProplist => "rev-proplist",
            Command::RevProp => "rev-prop",
            Command::ChangeRevProp => "change-rev-prop",
            Command::GetFileRevs => "get-file-revs",
            Command::GetLocations => "get-locations",
            Command::Commit => "commit",
            Command::Update => "update",
            Command::Switch => "switch",
            Command::Status => "status",
        }
    }

    /// Looks up a command word; built once per process.
    pub(crate) fn from_word(word: &str) -> Option<Command> {
        static TABLE: OnceLock<HashMap<&'static str, Command>> = OnceLock::new();
        TABLE
            .get_or_init(|| Command::ALL.iter().map(|cmd| (cmd.word(), *cmd)).collect())
            .get(word)
            .copied()
    }
}

/// A bound session: connection, repository handle and client identity.
pub(crate) struct Session<'a> {
    pub(crate) conn: RaSvnConnection,
    pub(crate) config: &'a ServerConfig,
    pub(crate) repo: Box<dyn Repository>,
    pub(crate) user: Option<String>,
    /// Capabilities the client announced.
    pub(crate) client_caps: CapabilitySet,
    /// URL of the repository root.
    pub(crate) root_url: String,
}

struct ClientGreeting {
    caps: CapabilitySet,
    url: SvnUrl,
}

/// Runs one connection to completion.
pub(crate) async fn run(
    mut conn: RaSvnConnection,
    config: &ServerConfig,
    preauth: Option<String>,
) -> Result<(), SvnError> {
    conn.write_success(vec![
        SvnItem::Number(PROTOCOL_VERSION),
        SvnItem::Number(PROTOCOL_VERSION),
        SvnItem::List(Vec::new()),
        SvnItem::List(config.capabilities.words().map(SvnItem::word).collect()),
    ])
    .await?;

    let item = conn.read_item().await?;
    let greeting = match parse_client_greeting(&item) {
        Ok(greeting) => greeting,
        Err(err) => {
            debug!(error = %err, "rejecting client greeting");
            return conn.write_failure(&err).await;
        }
    };
    debug!(url = %greeting.url, "client greeting");

    let realm = config
        .realm
        .clone()
        .unwrap_or_else(|| greeting.url.host.clone());
    let user = match preauth {
        Some(user) => {
            conn.write_success(vec![SvnItem::List(Vec::new()), SvnItem::string(realm)])
                .await?;
            Some(user)
        }
        None => {
            negotiate(&mut conn, config.auth.as_ref(), &realm, config.max_qop)
                .await?
                .identity
        }
    };

    let mut repo = match config.factory.open(user.as_deref(), &greeting.url.path) {
        Ok(repo) => repo,
        Err(err) => {
            let err = match err {
                RepositoryError::NotFound(_) => ServerError::new(
                    ErrorCode::ReposNotFound,
                    format!("No repository found in '{}'", greeting.url),
                ),
                other => ServerError::from(other),
            };
            return conn.write_failure(&err).await;
        }
    };

    let root = repo.root_path().trim_matches('/').to_string();
    let target = greeting.url.path.trim_matches('/');
    let Some(location) = skip_ancestor(&root, target) else {
        repo.close();
        let err = ServerError::new(
            ErrorCode::RaIllegalUrl,
            format!("URL '{}' is not inside the repository", greeting.url),
        );
        return conn.write_failure(&err).await;
    };
    repo.set_location(location);
    let root_url = greeting.url.with_path(&fs_path(&root));

    let mut session = Session {
        conn,
        config,
        repo,
        user,
        client_caps: greeting.caps,
        root_url,
    };
    let result = session.bind_and_serve().await;
    session.repo.close();
    result
}

fn parse_client_greeting(item: &SvnItem) -> Result<ClientGreeting, ServerError> {
    let parts = item
        .as_list()
        .ok_or_else(|| ServerError::malformed("client greeting is not a list"))?;
    let version = parts
        .first()
        .and_then(SvnItem::as_u64)
        .ok_or_else(|| ServerError::malformed("client greeting has no version"))?;
    if version != PROTOCOL_VERSION {
        return Err(ServerError::new(
            ErrorCode::BadVersion,
            format!("Protocol version {version} is not supported"),
        ));
    }
    let caps = CapabilitySet::from_words(
        parts
            .get(1)
            .and_then(SvnItem::as_list)
            .ok_or_else(|| ServerError::malformed("client greeting has no capability list"))?
            .iter()
            .filter_map(SvnItem::as_word),
    );
    if !caps.has(Capability::EditPipeline) {
        return Err(ServerError::new(
            ErrorCode::BadVersion,
            "Missing edit-pipeline capability",
        ));
    }
    let url = parts
        .get(2)
        .and_then(SvnItem::as_string)
        .ok_or_else(|| ServerError::malformed("client greeting has no URL"))?;
    let url = SvnUrl::parse(&url)
        .map_err(|err| ServerError::new(ErrorCode::RaIllegalUrl, err.to_string()))?;
    Ok(ClientGreeting { caps, url })
}

impl Session<'_> {
    async fn bind_and_serve(&mut self) -> Result<(), SvnError> {
        self.conn
            .write_success(vec![
                SvnItem::string(self.repo.uuid()),
                SvnItem::string(self.root_url.as_str()),
                SvnItem::List(
                    self.config
                        .capabilities
                        .words()
                        .map(SvnItem::word)
                        .collect(),
                ),
            ])
            .await?;
        debug!(
            user = ?self.user,
            location = %self.repo.location(),
            "repository bound"
        );

        while let Some(item) = self.conn.read_command().await? {
            let SvnItem::List(mut parts) = item else {
                return Err(SvnError::Protocol("command is not a list".into()));
            };
            let word = match parts.first().and_then(SvnItem::as_word) {
                Some(word) => word.to_string(),
                None => return Err(SvnError::Protocol("command name is not a word".into())),
            };
            let params = match parts.get_mut(1) {
                Some(SvnItem::List(items)) => std::mem::take(items),
                _ => return Err(SvnError::Protocol(format!("{word}: parameters not a list"))),
            };
            debug!(command = %word, "dispatching");
            match Command::from_word(&word) {
                Some(cmd) => self.dispatch(cmd, &params).await?,
                None => {
                    let err = ServerError::new(
                        ErrorCode::UnknownCommand,
                        format!("Unknown command '{word}'"),
                    );
                    self.conn.write_failure(&err).await?;
                }
            }
        }
        debug!("client disconnected");
        Ok(())
    }

    async fn dispatch(&mut self, cmd: Command, params: &[SvnItem]) -> Result<(), SvnError> {
        match cmd {
            Command::GetLatestRev => self.get_latest_rev().await,
            Command::CheckPath => self.check_path(params).await,
            Command::Stat => self.stat(params).await,
            Command::GetDir => self.get_dir(params).await,
            Command::GetFile => self.get_file(params).await,
            Command::Reparent => self.reparent(params).await,
            Command::GetLock => self.get_lock(params).await,
            Command::GetLocks => self.get_locks(params).await,
            Command::Lock => self.lock(params).await,
            Command::LockMany => self.lock_many(params).await,
            Command::Unlock => self.unlock(params).await,
            Command::UnlockMany => self.unlock_many(params).await,
            Command::Log => self.log(params).await,
            Command::RevProplist => self.rev_proplist(params).await,
            Command::RevProp => self.rev_prop(params).await,
            Command::ChangeRevProp => self.change_rev_prop(params).await,
            Command::GetFileRevs => self.get_file_revs(params).await,
            Command::GetLocations => self.get_locations(params).await,
            Command::Commit => self.commit(params).await,
            Command::Update => self.update(params).await,
            Command::Switch => self.switch(params).await,
            Command::Status => self.status(params).await,
        }
    }
}
