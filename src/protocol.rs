use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::notification::PushNotification;
use crate::response::Response;
use crate::result::{Error, Result};
use crate::transport::Transport;
use crate::wire;

/// Deadlines governing a single connection's liveness checks and shutdown behaviour
/// (§5). `ping_idle` / `ping_ack_timeout` are handed straight to `h2`'s own keep-alive
/// machinery, which sends the idle-triggered PING and closes the connection if no PONG
/// arrives within the timeout — the same contract §4.4 describes, implemented by the
/// library rather than hand-rolled.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolTimeouts {
    pub write_timeout: Duration,
    pub ping_idle: Duration,
    pub ping_ack_timeout: Duration,
    pub shutdown_deadline: Option<Duration>,
}

impl Default for ProtocolTimeouts {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(20),
            ping_idle: Duration::from_secs(60),
            ping_ack_timeout: Duration::from_secs(30),
            shutdown_deadline: None,
        }
    }
}

/// Stream-ids are 31-bit and client-allocated odd numbers; this mirrors the real `h2`
/// counter 1:1 (every `write()` consumes exactly one client-initiated stream), so the
/// handler can anticipate overflow without reading it back off the wire (I4).
const STREAM_ID_DRAIN_THRESHOLD: u64 = (i32::MAX as u64) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connecting,
    Ready,
    Draining,
    Closed,
}

enum Command {
    Write {
        notification: PushNotification,
        bearer: Option<String>,
        respond_to: oneshot::Sender<Result<Response>>,
    },
    Completed {
        id: u64,
        result: Result<Response>,
    },
    Closed {
        cause: Option<Error>,
    },
    Shutdown,
}

/// A lightweight, cloneable handle to a running [`ProtocolHandler`] actor (§4.4).
///
/// All mutable state lives on the actor's task; this handle only holds a command
/// sender plus the atomics the pool needs to read without a round-trip (active flag,
/// outstanding count).
#[derive(Clone)]
pub struct ProtocolHandle {
    commands: mpsc::UnboundedSender<Command>,
    active: Arc<AtomicBool>,
    outstanding: Arc<AtomicUsize>,
    last_activity: Arc<AtomicI64>,
    id: Uuid,
}

impl std::fmt::Debug for ProtocolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl ProtocolHandle {
    /// Identity used by the pool to distinguish connections; not part of the wire
    /// protocol.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// `true` once TLS + the HTTP/2 preface complete, until shutdown begins (I2).
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn last_activity_unix(&self) -> i64 {
        self.last_activity.load(Ordering::Acquire)
    }

    /// Writes a notification and returns a future resolving exactly once (§4.4, §8).
    ///
    /// Allocates the next stream, writes HEADERS then DATA. If the underlying write
    /// fails the returned future fails with the transport cause and no entry is ever
    /// added to the pending map (I1). If the connection has already stopped accepting
    /// writes, fails immediately with [`Error::ClientClosed`].
    pub async fn write(&self, notification: PushNotification, bearer: Option<String>) -> Result<Response> {
        let (respond_to, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Write { notification, bearer, respond_to })
            .is_err()
        {
            return Err(Error::ClientClosed);
        }
        rx.await.map_err(|_| Error::Unprocessed)?
    }

    /// Begins graceful shutdown: no new writes are accepted; the actor closes once the
    /// pending map drains (§4.4).
    pub fn close(&self) {
        self.active.store(false, Ordering::Release);
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Drives one HTTP/2 connection: allocates streams, correlates responses, and owns the
/// liveness/shutdown state machine described in §4.4.
///
/// Every mutation of the pending-stream map happens on this actor's own task, reached
/// only through the channel inside [`ProtocolHandle`] — matching §5's "no locks held
/// across suspension points" rule by using message passing instead.
pub struct ProtocolHandler;

impl ProtocolHandler {
    /// Performs the HTTP/2 handshake over `transport` and spawns the connection actor,
    /// returning a handle once the connection reaches `Ready` (I2).
    #[instrument(skip(transport), fields(connection_id = tracing::field::Empty))]
    pub async fn connect<T: Transport>(transport: T, timeouts: ProtocolTimeouts) -> Result<ProtocolHandle> {
        let (send_request, connection) = h2::client::Builder::new()
            .keep_alive_interval(Some(timeouts.ping_idle))
            .keep_alive_timeout(timeouts.ping_ack_timeout)
            .keep_alive_while_idle(true)
            .handshake(transport)
            .await?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let connection_watchdog_tx = commands_tx.clone();
        let connection_task: JoinHandle<()> = tokio::spawn(async move {
            let cause = connection.await.err().map(Error::from);
            let _ = connection_watchdog_tx.send(Command::Closed { cause });
        });

        let id = Uuid::new_v4();
        tracing::Span::current().record("connection_id", tracing::field::display(id));

        let handle = ProtocolHandle {
            commands: commands_tx.clone(),
            active: Arc::new(AtomicBool::new(true)),
            outstanding: Arc::new(AtomicUsize::new(0)),
            last_activity: Arc::new(AtomicI64::new(now_unix())),
            id,
        };

        let actor = Actor {
            send_request,
            connection_task,
            commands: commands_rx,
            self_commands: commands_tx,
            pending: HashMap::new(),
            next_id: 1,
            state: ConnectionState::Ready,
            active: handle.active.clone(),
            outstanding: handle.outstanding.clone(),
            last_activity: handle.last_activity.clone(),
            timeouts,
            id,
        };
        tokio::spawn(actor.run());

        debug!(%id, "connection ready");
        Ok(handle)
    }
}

struct Actor {
    send_request: h2::client::SendRequest<Bytes>,
    connection_task: JoinHandle<()>,
    commands: mpsc::UnboundedReceiver<Command>,
    self_commands: mpsc::UnboundedSender<Command>,
    pending: HashMap<u64, oneshot::Sender<Result<Response>>>,
    next_id: u64,
    state: ConnectionState,
    active: Arc<AtomicBool>,
    outstanding: Arc<AtomicUsize>,
    last_activity: Arc<AtomicI64>,
    timeouts: ProtocolTimeouts,
    id: Uuid,
}

impl Actor {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Write { notification, bearer, respond_to } => {
                    self.handle_write(notification, bearer, respond_to).await;
                }
                Command::Completed { id, result } => {
                    if let Some(sender) = self.pending.remove(&id) {
                        let _ = sender.send(result);
                    }
                    self.outstanding.store(self.pending.len(), Ordering::Release);
                    self.last_activity.store(now_unix(), Ordering::Release);
                    self.maybe_finish_draining();
                }
                Command::Closed { cause } => {
                    warn!(id = %self.id, ?cause, "connection closed");
                    self.fail_all_pending(cause.unwrap_or(Error::Unprocessed));
                    self.state = ConnectionState::Closed;
                    self.active.store(false, Ordering::Release);
                    break;
                }
                Command::Shutdown => {
                    self.state = ConnectionState::Draining;
                    self.active.store(false, Ordering::Release);
                    self.maybe_finish_draining();
                }
            }
        }
        self.connection_task.abort();
    }

    fn maybe_finish_draining(&mut self) {
        if self.state == ConnectionState::Draining && self.pending.is_empty() {
            self.state = ConnectionState::Closed;
            self.connection_task.abort();
        }
    }

    fn fail_all_pending(&mut self, cause: Error) {
        for (_, sender) in self.pending.drain() {
            let _ = sender.send(Err(clone_error(&cause)));
        }
        self.outstanding.store(0, Ordering::Release);
    }

    async fn handle_write(
        &mut self,
        notification: PushNotification,
        bearer: Option<String>,
        respond_to: oneshot::Sender<Result<Response>>,
    ) {
        if self.state != ConnectionState::Ready {
            let _ = respond_to.send(Err(Error::ClientClosed));
            return;
        }

        let generated_id = notification.apns_id().unwrap_or_else(Uuid::new_v4);
        let request = match wire::encode_request(&notification, bearer.as_deref()) {
            Ok(request) => request,
            Err(e) => {
                let _ = respond_to.send(Err(e));
                return;
            }
        };
        let payload = Bytes::from(notification.payload().to_owned());

        if let Err(e) = self.send_request.ready().await {
            let _ = respond_to.send(Err(Error::from(e)));
            return;
        }

        let (response_future, mut send_stream) = match self.send_request.send_request(request, false) {
            Ok(pair) => pair,
            Err(e) => {
                let _ = respond_to.send(Err(Error::from(e)));
                return;
            }
        };

        if let Err(e) = send_stream.send_data(payload, true) {
            let _ = respond_to.send(Err(Error::from(e)));
            return;
        }

        let local_id = self.next_id;
        self.next_id += 2;
        self.pending.insert(local_id, respond_to);
        self.outstanding.store(self.pending.len(), Ordering::Release);
        self.last_activity.store(now_unix(), Ordering::Release);

        if self.next_id >= STREAM_ID_DRAIN_THRESHOLD {
            debug!(id = %self.id, "stream-id space exhausted, draining");
            self.state = ConnectionState::Draining;
            self.active.store(false, Ordering::Release);
        }

        let completions = self.self_commands.clone();
        tokio::spawn(async move {
            let result = await_response(generated_id, response_future).await;
            // The actor owns the real oneshot sender; route the outcome back through
            // it so the pending map is only ever touched on the actor's task.
            let _ = completions.send(Command::Completed { id: local_id, result });
        });
    }
}

async fn await_response(
    fallback_id: Uuid,
    response_future: h2::client::ResponseFuture,
) -> Result<Response> {
    let response = response_future.await.map_err(map_goaway_error)?;
    let status = response.status();
    let apns_id = response
        .headers()
        .get(&wire::APNS_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or(fallback_id);

    let mut body = response.into_body();
    let mut buffer = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(map_goaway_error)?;
        let _ = body.flow_control().release_capacity(chunk.len());
        buffer.extend_from_slice(&chunk);
    }

    wire::decode_response(apns_id, status, if buffer.is_empty() { None } else { Some(&buffer) })
}

/// A stream that never got a response because the peer sent GOAWAY (or refused the
/// stream outright) is "unprocessed; retryable" (§4.4's `on_goaway` contract,
/// spec.md:164), not an opaque transport failure — the caller is told explicitly that
/// retrying on a different connection is safe.
fn map_goaway_error(e: h2::Error) -> Error {
    if e.is_go_away() || e.reason() == Some(h2::Reason::REFUSED_STREAM) {
        Error::Unprocessed
    } else {
        Error::from(e)
    }
}

fn clone_error(e: &Error) -> Error {
    match e {
        Error::Unprocessed => Error::Unprocessed,
        Error::ClientClosed => Error::ClientClosed,
        other => Error::TransportFailure(other.to_string()),
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
