use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::metrics::{MetricsSink, NullMetricsSink};
use crate::notification::PushNotification;
use crate::pool::{ChannelPool, PoolConfig, ProtocolConnectionFactory};
use crate::protocol::{ProtocolHandle, ProtocolTimeouts};
use crate::response::Response;
use crate::result::{Error, Result};
use crate::token::AuthTokenIssuer;
use crate::transport::TransportFactory;

/// Which credential the façade attaches to outgoing requests (§4.6).
///
/// Certificate auth is established at connection time by whatever
/// [`TransportFactory`] the caller supplied (e.g. a
/// [`crate::transport::RustlsTransportFactory`] built via
/// `with_client_certificate`); token auth attaches a fresh bearer JWT per request.
pub enum AuthMode {
    /// Authentication is carried entirely by the transport (mTLS); no per-request
    /// header is attached.
    ClientCertificate,
    /// Attach `authorization: bearer <jwt>` to every request, minted by the issuer.
    ProviderToken(Arc<AuthTokenIssuer>),
}

/// Builds a [`Client`], mirroring the way connections, pool sizing and auth mode are
/// wired together (§2a, §4.6).
pub struct ClientBuilder<F: TransportFactory> {
    transport: F,
    pool_config: PoolConfig,
    timeouts: ProtocolTimeouts,
    auth: AuthMode,
    metrics: Arc<dyn MetricsSink>,
}

impl<F: TransportFactory + 'static> ClientBuilder<F> {
    pub fn new(transport: F) -> Self {
        Self {
            transport,
            pool_config: PoolConfig::default(),
            timeouts: ProtocolTimeouts::default(),
            auth: AuthMode::ClientCertificate,
            metrics: Arc::new(NullMetricsSink),
        }
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    pub fn timeouts(mut self, timeouts: ProtocolTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn provider_token(mut self, issuer: Arc<AuthTokenIssuer>) -> Self {
        self.auth = AuthMode::ProviderToken(issuer);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Client {
        let factory = ProtocolConnectionFactory::new(self.transport, self.timeouts);
        let pool = ChannelPool::new(self.pool_config, factory, self.metrics.clone());
        Client {
            pool: Arc::new(pool),
            auth: self.auth,
            metrics: self.metrics,
            acquire_timeout: self.pool_config.acquire_timeout,
        }
    }
}

/// The single entry point callers use to deliver notifications (§4.6).
///
/// Holds the mapping from caller-supplied notifications to pooled connections; nothing
/// else in the crate reaches back into the pool after a connection is handed out.
pub struct Client {
    pool: Arc<ChannelPool>,
    auth: AuthMode,
    metrics: Arc<dyn MetricsSink>,
    acquire_timeout: Option<Duration>,
}

impl Client {
    pub fn builder<F: TransportFactory + 'static>(transport: F) -> ClientBuilder<F> {
        ClientBuilder::new(transport)
    }

    /// Sends `notification`, resolving exactly once with either an accept or a typed
    /// rejection (§3, §8).
    #[instrument(skip(self, notification), fields(topic = notification.topic()))]
    pub async fn send(&self, notification: PushNotification) -> Result<Response> {
        self.metrics.notification_sent();

        // Minted before acquiring a connection: if it fails, nothing was ever checked
        // out of the pool to leak.
        let bearer = self.bearer_token()?;
        let connection = self.acquire().await?;

        let result = connection.write(notification, bearer).await;
        self.pool.release(connection);

        match &result {
            Ok(response) if response.accepted => self.metrics.notification_accepted(),
            Ok(_) => self.metrics.notification_rejected(),
            Err(_) => self.metrics.write_failed(),
        }
        result
    }

    async fn acquire(&self) -> Result<ProtocolHandle> {
        match self.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.pool.acquire())
                .await
                .map_err(|_| Error::NotConnected)?,
            None => self.pool.acquire().await,
        }
    }

    fn bearer_token(&self) -> Result<Option<String>> {
        match &self.auth {
            AuthMode::ClientCertificate => Ok(None),
            AuthMode::ProviderToken(issuer) => Ok(Some(issuer.bearer_token()?.to_string())),
        }
    }

    /// Shuts the connection pool down: pending acquires fail with
    /// [`Error::ClientClosed`] and idle connections are closed.
    pub fn close(&self) {
        self.pool.close();
    }
}
