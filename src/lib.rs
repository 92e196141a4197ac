//! An asynchronous HTTP/2 client core for Apple's Push Notification service (APNs),
//! together with an in-process mock APNs server for end-to-end testing.
//!
//! The three load-bearing pieces are [`pool::ChannelPool`] (bounded, single-actor
//! connection pool), [`protocol::ProtocolHandler`] (per-connection stream
//! multiplexing, pings, graceful shutdown), and [`client::Client`] (the façade that
//! ties acquisition, writes and reconnection together). [`payload::PayloadBuilder`]
//! and [`token::AuthTokenIssuer`]/[`token::TokenVerifier`] are standalone and usable
//! without the rest of the stack. [`mock`] hosts a server that validates requests the
//! way real APNs does, for tests that want to drive a [`client::Client`] end-to-end
//! without a network.
//!
//! No global logger or allocator is installed; callers wire up their own `tracing`
//! subscriber. TLS stack selection is narrowed to the [`transport::Transport`] /
//! [`transport::TransportFactory`] seam: the default `rustls` feature talks to real
//! APNs, and [`transport::InMemoryTransportFactory`] drives everything over an
//! in-memory pipe for tests.

pub mod client;
pub mod clock;
pub mod metrics;
pub mod mock;
pub mod notification;
pub mod payload;
pub mod pool;
pub mod protocol;
pub mod reason;
pub mod response;
pub mod result;
pub mod token;
pub mod transport;
pub mod wire;

pub use client::{AuthMode, Client, ClientBuilder};
pub use clock::{Clock, SystemClock};
pub use notification::{Priority, PushNotification};
pub use payload::PayloadBuilder;
pub use pool::{ChannelPool, PoolConfig};
pub use protocol::{ProtocolHandle, ProtocolTimeouts};
pub use reason::RejectionReason;
pub use response::Response;
pub use result::{Error, Result};
pub use token::{AuthTokenIssuer, SigningKey, TokenVerifier, VerificationKey};
pub use transport::{Endpoint, Transport, TransportFactory};
