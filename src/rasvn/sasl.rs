//! Server side of the authentication sub-protocol.
//!
//! The session announces the mechanisms of an [`AuthProvider`], lets the
//! client pick one and then relays tokens between the wire and a
//! [`SaslMechanism`] until it completes or fails. `CRAM-MD5` tokens travel as
//! raw bytes; every other mechanism's tokens are Base64 on the wire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;
use tracing::debug;

use crate::{ErrorCode, ServerError, SvnError};

use super::SvnItem;
use super::conn::RaSvnConnection;

/// Service name passed to mechanisms.
pub const SASL_SERVICE: &str = "svn";

/// Wraps the byte stream after authentication when the negotiated
/// quality-of-protection asks for integrity or confidentiality.
pub trait SecurityLayer: Send {
    /// Largest cleartext frame `encode` accepts; 0 means unlimited.
    fn max_outbuf(&self) -> u32;
    /// Wraps outgoing cleartext.
    fn encode(&mut self, input: &[u8]) -> Result<Vec<u8>, SvnError>;
    /// Unwraps incoming bytes; may return nothing until a frame completes.
    fn decode(&mut self, input: &[u8]) -> Result<Vec<u8>, SvnError>;
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
/// Quality-of-protection level.
pub enum Qop {
    /// Authentication only; the stream stays unwrapped.
    #[default]
    Auth,
    /// Integrity protection.
    AuthInt,
    /// Integrity and confidentiality.
    AuthConf,
}

impl Qop {
    /// Returns `true` if the stream must be wrapped after authentication.
    pub fn requires_layer(self) -> bool {
        self != Qop::Auth
    }
}

#[derive(Clone, Debug)]
/// What a mechanism is started with.
pub struct MechanismParams {
    /// Service name (always [`SASL_SERVICE`]).
    pub service: String,
    /// Realm announced to the client (normally the target host).
    pub realm: String,
    /// Highest quality-of-protection the server is willing to negotiate.
    pub max_qop: Qop,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Outcome of one [`SaslMechanism::evaluate`] call.
pub enum SaslStep {
    /// Send this challenge and wait for another response.
    Continue(Vec<u8>),
    /// Authentication finished; the optional token goes into `success`.
    Complete(Option<Vec<u8>>),
}

/// One running authentication exchange.
pub trait SaslMechanism: Send {
    /// Feeds the client's next response (the initial token first, empty if
    /// the client sent none).
    ///
    /// An error is a mechanism-level failure: the client is told and may
    /// pick a mechanism again.
    fn evaluate(&mut self, response: &[u8]) -> Result<SaslStep, ServerError>;

    /// Identity established by the exchange; `None` for anonymous access.
    fn authorization_id(&self) -> Option<String>;

    /// Negotiated quality-of-protection.
    fn negotiated_qop(&self) -> Qop {
        Qop::Auth
    }

    /// Stream wrapper for the negotiated quality-of-protection.
    fn into_security_layer(self: Box<Self>) -> Option<Box<dyn SecurityLayer>> {
        None
    }
}

/// Source of authentication mechanisms.
pub trait AuthProvider: Send + Sync {
    /// Mechanism names, in the order they are offered.
    fn mechanisms(&self) -> Vec<String>;

    /// Starts a new exchange for `mechanism`.
    fn start(
        &self,
        mechanism: &str,
        params: &MechanismParams,
    ) -> Result<Box<dyn SaslMechanism>, ServerError>;
}

/// Looks up a user's cleartext password for a realm.
pub trait PasswordLookup: Send + Sync {
    /// Returns the password, or `None` for unknown users.
    fn password(&self, realm: &str, user: &str) -> Option<String>;
}

impl<F> PasswordLookup for F
where
    F: Fn(&str, &str) -> Option<String> + Send + Sync,
{
    fn password(&self, realm: &str, user: &str) -> Option<String> {
        self(realm, user)
    }
}

#[derive(Clone, Debug, Default)]
/// In-memory user/password table, valid for every realm.
pub struct PasswordDb {
    users: HashMap<String, String>,
}

impl PasswordDb {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(user.into(), password.into());
        self
    }
}

impl PasswordLookup for PasswordDb {
    fn password(&self, _realm: &str, user: &str) -> Option<String> {
        self.users.get(user).cloned()
    }
}

#[derive(Clone)]
/// `ANONYMOUS`, `PLAIN` and `CRAM-MD5` backed by a [`PasswordLookup`].
pub struct BuiltinAuth {
    lookup: Option<Arc<dyn PasswordLookup>>,
    anonymous: bool,
}

impl std::fmt::Debug for BuiltinAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinAuth")
            .field("passwords", &self.lookup.is_some())
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

impl BuiltinAuth {
    /// Anonymous access only.
    pub fn anonymous() -> Self {
        Self {
            lookup: None,
            anonymous: true,
        }
    }

    /// Password authentication (`CRAM-MD5`, `PLAIN`) without anonymous access.
    pub fn with_passwords(lookup: impl PasswordLookup + 'static) -> Self {
        Self {
            lookup: Some(Arc::new(lookup)),
            anonymous: false,
        }
    }

    /// Also offers `ANONYMOUS`.
    #[must_use]
    pub fn allow_anonymous(mut self, allow: bool) -> Self {
        self.anonymous = allow;
        self
    }
}

impl AuthProvider for BuiltinAuth {
    fn mechanisms(&self) -> Vec<String> {
        let mut mechs = Vec::new();
        if self.lookup.is_some() {
            mechs.push("CRAM-MD5".to_string());
            mechs.push("PLAIN".to_string());
        }
        if self.anonymous {
            mechs.push("ANONYMOUS".to_string());
        }
        mechs
    }

    fn start(
        &self,
        mechanism: &str,
        params: &MechanismParams,
    ) -> Result<Box<dyn SaslMechanism>, ServerError> {
        match (mechanism, &self.lookup) {
            ("ANONYMOUS", _) if self.anonymous => Ok(Box::new(Anonymous)),
            ("PLAIN", Some(lookup)) => Ok(Box::new(Plain {
                lookup: lookup.clone(),
                realm: params.realm.clone(),
                user: None,
            })),
            ("CRAM-MD5", Some(lookup)) => Ok(Box::new(CramMd5 {
                lookup: lookup.clone(),
                realm: params.realm.clone(),
                challenge: None,
                user: None,
            })),
            _ => Err(ServerError::new(
                ErrorCode::AuthnFailed,
                format!("Unsupported mechanism '{mechanism}'"),
            )),
        }
    }
}

struct Anonymous;

impl SaslMechanism for Anonymous {
    fn evaluate(&mut self, _response: &[u8]) -> Result<SaslStep, ServerError> {
        Ok(SaslStep::Complete(None))
    }

    fn authorization_id(&self) -> Option<String> {
        None
    }
}

struct Plain {
    lookup: Arc<dyn PasswordLookup>,
    realm: String,
    user: Option<String>,
}

impl SaslMechanism for Plain {
    fn evaluate(&mut self, response: &[u8]) -> Result<SaslStep, ServerError> {
        if response.is_empty() {
            return Ok(SaslStep::Continue(Vec::new()));
        }
        let mut parts = response.splitn(3, |b| *b == 0);
        let (Some(authzid), Some(authcid), Some(password)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(auth_failed("Malformed PLAIN response"));
        };
        let authcid = String::from_utf8_lossy(authcid).into_owned();
        if !authzid.is_empty() && authzid != authcid.as_bytes() {
            return Err(auth_failed("Authorization identity differs from user"));
        }
        match self.lookup.password(&self.realm, &authcid) {
            Some(expected) if expected.as_bytes() == password => {
                self.user = Some(authcid);
                Ok(SaslStep::Complete(None))
            }
            _ => Err(auth_failed("Username or password incorrect")),
        }
    }

    fn authorization_id(&self) -> Option<String> {
        self.user.clone()
    }
}

struct CramMd5 {
    lookup: Arc<dyn PasswordLookup>,
    realm: String,
    challenge: Option<Vec<u8>>,
    user: Option<String>,
}

impl CramMd5 {
    fn new_challenge(host: &str) -> Vec<u8> {
        let nonce: u64 = rand::random();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        format!("<{nonce}.{now}@{host}>").into_bytes()
    }
}

impl SaslMechanism for CramMd5 {
    fn evaluate(&mut self, response: &[u8]) -> Result<SaslStep, ServerError> {
        let Some(challenge) = self.challenge.as_deref() else {
            let challenge = Self::new_challenge(&self.realm);
            self.challenge = Some(challenge.clone());
            return Ok(SaslStep::Continue(challenge));
        };
        let text = std::str::from_utf8(response)
            .map_err(|_| auth_failed("Malformed CRAM-MD5 response"))?;
        let Some((user, digest)) = text.trim_end().rsplit_once(' ') else {
            return Err(auth_failed("Malformed CRAM-MD5 response"));
        };
        let digest =
            hex::decode(digest).map_err(|_| auth_failed("Malformed CRAM-MD5 response"))?;
        let password = self
            .lookup
            .password(&self.realm, user)
            .ok_or_else(|| auth_failed("Username or password incorrect"))?;
        let mut mac = Hmac::<Md5>::new_from_slice(password.as_bytes())
            .map_err(|_| auth_failed("Failed to create HMAC-MD5"))?;
        mac.update(challenge);
        mac.verify_slice(&digest)
            .map_err(|_| auth_failed("Username or password incorrect"))?;
        self.user = Some(user.to_string());
        Ok(SaslStep::Complete(None))
    }

    fn authorization_id(&self) -> Option<String> {
        self.user.clone()
    }
}

#[track_caller]
fn auth_failed(message: &str) -> ServerError {
    ServerError::new(ErrorCode::AuthnFailed, message)
}

pub(crate) fn base64_encode(data: &[u8]) -> Vec<u8> {
    base64::engine::general_purpose::STANDARD
        .encode(data)
        .into_bytes()
}

fn base64_decode(data: &[u8]) -> Result<Vec<u8>, ServerError> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|_| auth_failed("Authentication token is not valid base64"))
}

fn uses_raw_tokens(mechanism: &str) -> bool {
    mechanism == "CRAM-MD5"
}

fn wire_token(mechanism: &str, token: &[u8]) -> SvnItem {
    if uses_raw_tokens(mechanism) {
        SvnItem::string(token)
    } else {
        SvnItem::String(base64_encode(token))
    }
}

/// A token that does not decode is a mechanism failure, not a wire fault.
fn token_from_wire(mechanism: &str, token: &[u8]) -> Result<Vec<u8>, ServerError> {
    if uses_raw_tokens(mechanism) {
        Ok(token.to_vec())
    } else {
        base64_decode(token)
    }
}

/// Identity chosen by [`negotiate`].
#[derive(Debug)]
pub(crate) struct AuthOutcome {
    pub(crate) identity: Option<String>,
}

/// Runs the auth exchange: request, mechanism selection, step loop.
///
/// Mechanism failures are reported to the client, who may select again; only
/// wire faults end the exchange with an error.
pub(crate) async fn negotiate(
    conn: &mut RaSvnConnection,
    provider: &dyn AuthProvider,
    realm: &str,
    max_qop: Qop,
) -> Result<AuthOutcome, SvnError> {
    let mechs = provider.mechanisms();
    conn.write_success(vec![
        SvnItem::List(mechs.iter().map(|m| SvnItem::word(m)).collect()),
        SvnItem::string(realm),
    ])
    .await?;
    if mechs.is_empty() {
        debug!("no mechanisms offered; anonymous access");
        return Ok(AuthOutcome { identity: None });
    }

    let params = MechanismParams {
        service: SASL_SERVICE.to_string(),
        realm: realm.to_string(),
        max_qop,
    };
    loop {
        let selection = conn.read_item().await?;
        let SvnItem::List(parts) = selection else {
            return Err(SvnError::Protocol("mechanism selection not a list".into()));
        };
        let mech = parts
            .first()
            .and_then(SvnItem::as_word)
            .ok_or_else(|| SvnError::Protocol("mechanism name not a word".into()))?
            .to_string();
        let initial = parts
            .get(1)
            .and_then(SvnItem::as_list)
            .and_then(<[SvnItem]>::first)
            .and_then(SvnItem::as_bytes);
        debug!(mech = %mech, "client selected auth mechanism");

        if !mechs.iter().any(|m| *m == mech) {
            write_auth_failure(conn, &format!("Unknown mechanism '{mech}'")).await?;
            continue;
        }
        let mut mechanism = match provider.start(&mech, &params) {
            Ok(mechanism) => mechanism,
            Err(err) => {
                write_auth_failure(conn, &err.message_summary()).await?;
                continue;
            }
        };

        // DIGEST-MD5 initial responses are not usable for a fresh exchange.
        let initial = match initial {
            Some(_) if mech == "DIGEST-MD5" => Ok(Vec::new()),
            Some(token) => token_from_wire(&mech, token),
            None => Ok(Vec::new()),
        };
        let mut response = match initial {
            Ok(response) => response,
            Err(err) => {
                debug!(mech = %mech, error = %err, "initial auth token rejected");
                write_auth_failure(conn, &err.message_summary()).await?;
                continue;
            }
        };

        let result = loop {
            match mechanism.evaluate(&response) {
                Ok(SaslStep::Continue(challenge)) => {
                    conn.write_item(&SvnItem::List(vec![
                        SvnItem::word("step"),
                        SvnItem::List(vec![wire_token(&mech, &challenge)]),
                    ]))
                    .await?;
                    let reply = conn.read_item().await?;
                    let bytes = reply
                        .as_bytes()
                        .ok_or_else(|| SvnError::Protocol("auth response not a string".into()))?;
                    match token_from_wire(&mech, bytes) {
                        Ok(bytes) => response = bytes,
                        Err(err) => break Err(err),
                    }
                }
                Ok(SaslStep::Complete(token)) => break Ok(token),
                Err(err) => break Err(err),
            }
        };

        match result {
            Ok(token) => {
                conn.write_success(
                    token
                        .map(|t| vec![wire_token(&mech, &t)])
                        .unwrap_or_default(),
                )
                .await?;
                let identity = mechanism.authorization_id();
                debug!(mech = %mech, user = ?identity, "authentication succeeded");
                let qop = mechanism.negotiated_qop();
                if qop.requires_layer() {
                    if let Some(layer) = mechanism.into_security_layer() {
                        conn.install_security_layer(layer)?;
                    } else {
                        return Err(SvnError::Protocol(format!(
                            "mechanism {mech} negotiated {qop:?} without a security layer"
                        )));
                    }
                }
                return Ok(AuthOutcome { identity });
            }
            Err(err) => {
                debug!(mech = %mech, error = %err, "authentication failed");
                write_auth_failure(conn, &err.message_summary()).await?;
            }
        }
    }
}

async fn write_auth_failure(conn: &mut RaSvnConnection, message: &str) -> Result<(), SvnError> {
    conn.write_item(&SvnItem::List(vec![
        SvnItem::word("failure"),
        SvnItem::List(vec![SvnItem::string(message)]),
    ]))
    .await
}
