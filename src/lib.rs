//! Async server for Subversion's `svn://` (`ra_svn`) protocol.
//!
//! This crate implements the protocol engine of an `svnserve`-style server:
//! the wire codec, the per-connection session (handshake, authentication,
//! command dispatch) and the editor/report sub-protocols used by commits,
//! updates, switches and status. It does **not** store anything: repository
//! data is reached through the [`Repository`] trait, opened per session by a
//! [`RepositoryFactory`].
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use svnserve::{BuiltinAuth, PasswordDb, RepositoryFactory, SvnServer};
//!
//! fn serve(factory: impl RepositoryFactory + 'static) -> svnserve::Result<()> {
//!     let rt = tokio::runtime::Builder::new_multi_thread()
//!         .enable_all()
//!         .build()?;
//!
//!     rt.block_on(async {
//!         let listener = tokio::net::TcpListener::bind("0.0.0.0:3690").await?;
//!         let users = PasswordDb::new().with_user("alice", "secret");
//!         SvnServer::new(factory)
//!             .with_auth(BuiltinAuth::with_passwords(users))
//!             .with_read_timeout(Duration::from_secs(300))
//!             .serve(listener)
//!             .await
//!     })
//! }
//! ```
//!
//! ## Features
//!
//! - `serde`: enables `Serialize`/`Deserialize` for public data types.
//!
//! ## Protocol notes
//!
//! - Protocol version 2 only; clients must announce `edit-pipeline`.
//! - Built-in authentication mechanisms: `ANONYMOUS`, `PLAIN` and `CRAM-MD5`.
//!   Other mechanisms plug in through [`AuthProvider`].
//! - File contents are sent as svndiff2, svndiff1 or svndiff0 depending on
//!   what the client accepts; see [`DeltaCodec`] to replace the codec.
//! - `link-path` report entries are answered with "not implemented".
//!
//! ## Low-level access
//!
//! For raw wire protocol items, see [`raw::SvnItem`].

#![deny(unsafe_code)]

mod commands;
mod delta;
mod editor;
mod error;
mod path;
mod props;
mod rasvn;
mod repository;
mod server;
mod session;
mod svndiff;
mod textdelta;
mod types;
mod url;

pub use delta::{DeltaCodec, DeltaDecoder, SvndiffCodec, md5_hex};
pub use editor::{
    CommitEdit, CommitNode, DeltaNode, EditorCommand, EditorScript, FileContent, NodeAction,
    ReportEntry,
};
pub use error::{ErrorCode, RepositoryError, ServerError, ServerErrorItem, SvnError};
/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, SvnError>;
pub use props::{PropClass, PropKey, classify, is_valid_name};
pub use rasvn::sasl::{
    AuthProvider, BuiltinAuth, MechanismParams, PasswordDb, PasswordLookup, Qop, SASL_SERVICE,
    SaslMechanism, SaslStep, SecurityLayer,
};
/// Low-level wire-protocol types and helpers.
pub mod raw {
    pub use crate::rasvn::SvnItem;
}
pub use repository::{
    CommitRequest, LogRequest, Repository, RepositoryFactory, RevPropSelection, TreeDeltaRequest,
};
pub use server::{DEFAULT_CAPABILITIES, SvnServer};
pub use svndiff::SvndiffVersion;
pub use textdelta::{TextDeltaApplier, apply_textdelta};
pub use types::{
    Capability, CapabilitySet, ChangeAction, ChangedPath, CommitInfo, Depth, DirEntry,
    DirListing, DirentField, FileContents, FileRevision, LocationEntry, LockDesc, LogEntry,
    NodeKind, PropDelta, PropertyChanges, PropertyList, StatEntry,
};
pub use url::SvnUrl;
