use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::delta::{DeltaCodec, SvndiffCodec};
use crate::rasvn::conn::{ConnectionConfig, RaSvnConnection};
use crate::rasvn::sasl::{AuthProvider, BuiltinAuth, Qop};
use crate::repository::RepositoryFactory;
use crate::{Capability, CapabilitySet, SvnError};

/// Capabilities announced when none are configured.
pub const DEFAULT_CAPABILITIES: [Capability; 7] = [
    Capability::EditPipeline,
    Capability::Svndiff1,
    Capability::AcceptsSvndiff2,
    Capability::AbsentEntries,
    Capability::Depth,
    Capability::LogRevProps,
    Capability::CommitRevProps,
];

#[derive(Clone)]
pub(crate) struct ServerConfig {
    pub(crate) factory: Arc<dyn RepositoryFactory>,
    pub(crate) auth: Arc<dyn AuthProvider>,
    pub(crate) realm: Option<String>,
    pub(crate) capabilities: CapabilitySet,
    pub(crate) codec: Arc<dyn DeltaCodec>,
    pub(crate) max_qop: Qop,
    pub(crate) max_chunk_size: usize,
    pub(crate) read_timeout: Duration,
    pub(crate) write_timeout: Duration,
}

/// An `svn://` server: configuration plus the accept loop.
///
/// Each accepted connection runs as its own tokio task. Sessions share
/// nothing but the configured [`RepositoryFactory`], [`AuthProvider`] and
/// [`DeltaCodec`].
///
/// ```rust,no_run
/// # use svnserve::{RepositoryFactory, SvnServer};
/// # async fn run(factory: impl RepositoryFactory + 'static) -> svnserve::Result<()> {
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:3690").await?;
/// SvnServer::new(factory)
///     .with_realm("example")
///     .serve(listener)
///     .await
/// # }
/// ```
#[derive(Clone)]
pub struct SvnServer {
    config: ServerConfig,
}

impl std::fmt::Debug for SvnServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvnServer")
            .field("mechanisms", &self.config.auth.mechanisms())
            .field("realm", &self.config.realm)
            .field("capabilities", &self.config.capabilities)
            .field("max_qop", &self.config.max_qop)
            .field("max_chunk_size", &self.config.max_chunk_size)
            .field("read_timeout", &self.config.read_timeout)
            .field("write_timeout", &self.config.write_timeout)
            .finish()
    }
}

impl SvnServer {
    /// Creates a server that opens repositories through `factory`.
    ///
    /// Defaults: anonymous access only, svndiff codec, a 10 minute read
    /// timeout and a 60 second write timeout.
    pub fn new(factory: impl RepositoryFactory + 'static) -> Self {
        Self {
            config: ServerConfig {
                factory: Arc::new(factory),
                auth: Arc::new(BuiltinAuth::anonymous()),
                realm: None,
                capabilities: CapabilitySet::from_capabilities(&DEFAULT_CAPABILITIES),
                codec: Arc::new(SvndiffCodec::default()),
                max_qop: Qop::Auth,
                max_chunk_size: 64 * 1024,
                read_timeout: Duration::from_secs(600),
                write_timeout: Duration::from_secs(60),
            },
        }
    }

    /// Sets the authentication provider.
    #[must_use]
    pub fn with_auth(mut self, provider: impl AuthProvider + 'static) -> Self {
        self.config.auth = Arc::new(provider);
        self
    }

    /// Sets the realm announced during authentication (defaults to the
    /// host of the client's URL).
    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.config.realm = Some(realm.into());
        self
    }

    /// Sets the capabilities announced in the greeting.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[Capability]) -> Self {
        self.config.capabilities = CapabilitySet::from_capabilities(capabilities);
        self
    }

    /// Sets the codec used for file contents.
    #[must_use]
    pub fn with_delta_codec(mut self, codec: impl DeltaCodec + 'static) -> Self {
        self.config.codec = Arc::new(codec);
        self
    }

    /// Sets the strongest quality of protection offered to mechanisms.
    #[must_use]
    pub fn with_max_qop(mut self, qop: Qop) -> Self {
        self.config.max_qop = qop;
        self
    }

    /// Sets how many bytes are written before a flush: the string chunk
    /// size for file contents and the batch size of editor drives.
    #[must_use]
    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.config.max_chunk_size = size.max(1);
        self
    }

    /// Sets the per-read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Sets the per-write timeout.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Accepts connections forever.
    pub async fn serve(self, listener: TcpListener) -> Result<(), SvnError> {
        self.serve_until(listener, std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves. Sessions already
    /// running are left to finish on their own.
    pub async fn serve_until<F>(self, listener: TcpListener, shutdown: F) -> Result<(), SvnError>
    where
        F: Future<Output = ()>,
    {
        let config = Arc::new(self.config);
        tokio::pin!(shutdown);
        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => {
                    info!("listener shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            if let Err(err) = stream.set_nodelay(true) {
                debug!(error = %err, "set_nodelay failed");
            }
            let config = Arc::clone(&config);
            let span = info_span!("session", %peer);
            tokio::spawn(
                async move {
                    info!("connection accepted");
                    let (read, write) = stream.into_split();
                    let conn = new_connection(&config, Box::new(read), Box::new(write));
                    match crate::session::run(conn, &config, None).await {
                        Ok(()) => info!("connection closed"),
                        Err(err) => warn!(error = %err, "session ended"),
                    }
                }
                .instrument(span),
            );
        }
    }

    /// Runs one session over an already-established stream pair, for example
    /// a tunnel whose user was authenticated by the transport (`preauth`).
    pub async fn serve_connection<R, W>(
        &self,
        read: R,
        write: W,
        preauth: Option<String>,
    ) -> Result<(), SvnError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let conn = new_connection(&self.config, Box::new(read), Box::new(write));
        crate::session::run(conn, &self.config, preauth).await
    }
}

fn new_connection(
    config: &ServerConfig,
    read: crate::rasvn::conn::DynRead,
    write: crate::rasvn::conn::DynWrite,
) -> RaSvnConnection {
    RaSvnConnection::new(
        read,
        write,
        ConnectionConfig {
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        },
    )
}
