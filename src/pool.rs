use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics::MetricsSink;
use crate::protocol::{ProtocolHandle, ProtocolHandler, ProtocolTimeouts};
use crate::result::{Error, Result};
use crate::transport::TransportFactory;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_millis(51_200);

/// Builds and tears down the connections a [`ChannelPool`] manages (§4.5).
///
/// The pool never constructs a transport itself; it only calls through this trait,
/// keeping connection policy (capacity, back-off, FIFO waiters) separate from
/// transport/protocol concerns.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(&self) -> Result<ProtocolHandle>;
    async fn destroy(&self, connection: ProtocolHandle);
}

/// The default [`ConnectionFactory`]: dials via a [`TransportFactory`] and performs the
/// HTTP/2 handshake via [`ProtocolHandler`].
pub struct ProtocolConnectionFactory<F: TransportFactory> {
    transport: F,
    timeouts: ProtocolTimeouts,
}

impl<F: TransportFactory> ProtocolConnectionFactory<F> {
    pub fn new(transport: F, timeouts: ProtocolTimeouts) -> Self {
        Self { transport, timeouts }
    }
}

#[async_trait]
impl<F: TransportFactory> ConnectionFactory for ProtocolConnectionFactory<F> {
    async fn create(&self) -> Result<ProtocolHandle> {
        let stream = self.transport.connect().await?;
        ProtocolHandler::connect(stream, self.timeouts).await
    }

    async fn destroy(&self, connection: ProtocolHandle) {
        connection.close();
    }
}

/// Tunables for a [`ChannelPool`] (§2a, §4.5).
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub capacity: usize,
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { capacity: 4, acquire_timeout: None }
    }
}

enum Command {
    Acquire { respond_to: oneshot::Sender<Result<ProtocolHandle>> },
    Release { connection: ProtocolHandle },
    Created { connection: ProtocolHandle },
    CreationFailed,
    Close,
}

/// A bounded pool of [`ProtocolHandle`]s whose acquire/release state machine is
/// serialised on a single task (§4.5, §5). All mutation happens inside `run()`; callers
/// only ever talk to the pool through the channel in [`ChannelPool`].
pub struct ChannelPool {
    commands: mpsc::UnboundedSender<Command>,
}

impl ChannelPool {
    pub fn new(
        config: PoolConfig,
        factory: impl ConnectionFactory + 'static,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Actor {
            commands: rx,
            self_commands: tx.clone(),
            factory: Arc::new(factory),
            config,
            idle: VecDeque::new(),
            in_use: HashSet::new(),
            waiters: VecDeque::new(),
            creating: 0,
            backoff_millis: Arc::new(AtomicU64::new(INITIAL_BACKOFF.as_millis() as u64)),
            metrics,
            closed: false,
        };
        tokio::spawn(actor.run());
        Self { commands: tx }
    }

    /// Returns an idle connection, or starts one if under capacity, or waits in FIFO
    /// order for the next one released (§4.5).
    pub async fn acquire(&self) -> Result<ProtocolHandle> {
        let (respond_to, rx) = oneshot::channel();
        self.commands
            .send(Command::Acquire { respond_to })
            .map_err(|_| Error::ClientClosed)?;
        rx.await.map_err(|_| Error::ClientClosed)?
    }

    /// Returns a connection to the pool. If it is no longer active it is destroyed and
    /// a replacement is started when the pool is under capacity (§4.5).
    pub fn release(&self, connection: ProtocolHandle) {
        let _ = self.commands.send(Command::Release { connection });
    }

    /// Cancels pending waiters and asynchronously destroys every connection (§4.5).
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

struct Actor {
    commands: mpsc::UnboundedReceiver<Command>,
    self_commands: mpsc::UnboundedSender<Command>,
    factory: Arc<dyn ConnectionFactory>,
    config: PoolConfig,
    idle: VecDeque<ProtocolHandle>,
    in_use: HashSet<Uuid>,
    waiters: VecDeque<oneshot::Sender<Result<ProtocolHandle>>>,
    creating: usize,
    backoff_millis: Arc<AtomicU64>,
    metrics: Arc<dyn MetricsSink>,
    closed: bool,
}

impl Actor {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Acquire { respond_to } => self.handle_acquire(respond_to),
                Command::Release { connection } => self.handle_release(connection),
                Command::Created { connection } => self.handle_created(connection),
                Command::CreationFailed => {
                    self.creating -= 1;
                }
                Command::Close => {
                    self.handle_close();
                    break;
                }
            }
        }
    }

    fn total(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.creating
    }

    fn handle_acquire(&mut self, respond_to: oneshot::Sender<Result<ProtocolHandle>>) {
        // Skip stale idle entries (P3): a connection that died while idle is destroyed
        // here instead of ever being handed out.
        while let Some(connection) = self.idle.pop_front() {
            if connection.is_active() {
                self.in_use.insert(connection.id());
                let _ = respond_to.send(Ok(connection));
                return;
            }
            debug!(id = %connection.id(), "dropping stale idle connection");
            let factory = self.factory.clone();
            tokio::spawn(async move { factory.destroy(connection).await });
        }

        if self.total() < self.config.capacity {
            self.waiters.push_back(respond_to);
            self.start_creation();
            return;
        }

        self.waiters.push_back(respond_to);
    }

    fn start_creation(&mut self) {
        self.creating += 1;
        let factory = self.factory.clone();
        let completions = self.self_commands.clone();
        let backoff_millis = self.backoff_millis.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let delay = Duration::from_millis(backoff_millis.load(Ordering::Acquire));
            match factory.create().await {
                Ok(connection) => {
                    backoff_millis.store(INITIAL_BACKOFF.as_millis() as u64, Ordering::Release);
                    metrics.connection_added();
                    let _ = completions.send(Command::Created { connection });
                }
                Err(e) => {
                    metrics.connection_failed();
                    warn!(error = %e, "connection creation failed, backing off");
                    let next = (delay.as_millis() as u64).saturating_mul(2).min(MAX_BACKOFF.as_millis() as u64);
                    backoff_millis.store(next, Ordering::Release);
                    tokio::time::sleep(delay).await;
                    let _ = completions.send(Command::CreationFailed);
                }
            }
        });
    }

    fn handle_created(&mut self, connection: ProtocolHandle) {
        self.creating -= 1;
        self.hand_off_or_park(connection);
    }

    fn handle_release(&mut self, connection: ProtocolHandle) {
        self.in_use.remove(&connection.id());
        if connection.is_active() {
            self.hand_off_or_park(connection);
        } else {
            self.metrics.connection_removed();
            let factory = self.factory.clone();
            tokio::spawn(async move { factory.destroy(connection).await });
            if self.total() < self.config.capacity && !self.waiters.is_empty() {
                self.start_creation();
            }
        }
    }

    /// Serves the oldest non-cancelled waiter with `connection`, or parks it idle.
    fn hand_off_or_park(&mut self, mut connection: ProtocolHandle) {
        while let Some(waiter) = self.waiters.pop_front() {
            self.in_use.insert(connection.id());
            match waiter.send(Ok(connection)) {
                Ok(()) => return,
                Err(Ok(returned)) => {
                    // Waiter was cancelled between send and now; try the next one.
                    self.in_use.remove(&returned.id());
                    connection = returned;
                }
                Err(Err(_)) => unreachable!("only Ok(connection) is ever sent to a waiter"),
            }
        }
        self.idle.push_back(connection);
    }

    fn handle_close(&mut self) {
        self.closed = true;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(Error::ClientClosed));
        }
        for connection in self.idle.drain(..) {
            let factory = self.factory.clone();
            tokio::spawn(async move { factory.destroy(connection).await });
        }
    }
}
